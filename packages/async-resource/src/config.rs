//! Resource configuration builder.
//!
//! Required: `name`, `fetch`, `action_namespace`. Everything else has a
//! default:
//!
//! | Option               | Default     | Env override              |
//! |----------------------|-------------|---------------------------|
//! | `stale_age`          | 900 000 ms  | `<PREFIX>_STALE_AGE_MS`   |
//! | `retry_after`        | 60 000 ms   | `<PREFIX>_RETRY_AFTER_MS` |
//! | `check_online`       | `true`      | `<PREFIX>_CHECK_ONLINE`   |
//! | `persist_on_success` | `true`      | `<PREFIX>_PERSIST`        |
//!
//! # Example
//!
//! ```ignore
//! let bundle = ResourceConfig::new()
//!     .name("user")
//!     .action_namespace("FETCH_USER")
//!     .fetch(fetch_fn(|_| async { load_user().await.map_err(FetchFailure::from) }))
//!     .with_env_overrides("USER_RESOURCE")?
//!     .build()?;
//! ```

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use tracing::debug;

use crate::bundle::ResourceBundle;
use crate::error::ConfigurationError;
use crate::fetch::Fetch;
use crate::query::{RefetchPolicy, DEFAULT_RETRY_AFTER, DEFAULT_STALE_AGE};
use crate::state::Payload;

pub struct ResourceConfig<T> {
    name: Option<String>,
    fetch: Option<Arc<dyn Fetch<T>>>,
    action_namespace: Option<String>,
    stale_age: Duration,
    retry_after: Duration,
    check_online: bool,
    persist_on_success: bool,
}

impl<T: Payload> ResourceConfig<T> {
    pub fn new() -> Self {
        Self {
            name: None,
            fetch: None,
            action_namespace: None,
            stale_age: DEFAULT_STALE_AGE,
            retry_after: DEFAULT_RETRY_AFTER,
            check_online: true,
            persist_on_success: true,
        }
    }

    /// Resource identifier. Also the base of the generated accessor names.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn fetch<F: Fetch<T>>(mut self, capability: F) -> Self {
        self.fetch = Some(Arc::new(capability));
        self
    }

    pub fn fetch_arc(mut self, capability: Arc<dyn Fetch<T>>) -> Self {
        self.fetch = Some(capability);
        self
    }

    /// Prefix of the four action identifiers, e.g. `FETCH_USER`.
    pub fn action_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.action_namespace = Some(namespace.into());
        self
    }

    pub fn stale_age(mut self, age: Duration) -> Self {
        self.stale_age = age;
        self
    }

    pub fn retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = wait;
        self
    }

    pub fn check_online(mut self, check: bool) -> Self {
        self.check_online = check;
        self
    }

    pub fn persist_on_success(mut self, persist: bool) -> Self {
        self.persist_on_success = persist;
        self
    }

    /// Override timing and flags from the environment.
    ///
    /// Loads `.env` if present (development), then reads the variables listed
    /// in the module docs. Unset variables leave the current value alone.
    pub fn with_env_overrides(self, prefix: &str) -> Result<Self, ConfigurationError> {
        // Load .env file if present (development)
        let _ = dotenv();
        self.with_overrides_from(prefix, |key| env::var(key).ok())
    }

    /// Same as [`with_env_overrides`](Self::with_env_overrides) with an
    /// explicit lookup instead of the process environment.
    pub fn with_overrides_from<F>(
        mut self,
        prefix: &str,
        lookup: F,
    ) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = read_var(&lookup, prefix, "STALE_AGE_MS", parse_millis)? {
            self.stale_age = ms;
        }
        if let Some(ms) = read_var(&lookup, prefix, "RETRY_AFTER_MS", parse_millis)? {
            self.retry_after = ms;
        }
        if let Some(flag) = read_var(&lookup, prefix, "CHECK_ONLINE", parse_flag)? {
            self.check_online = flag;
        }
        if let Some(flag) = read_var(&lookup, prefix, "PERSIST", parse_flag)? {
            self.persist_on_success = flag;
        }
        Ok(self)
    }

    /// Validate and build the bundle.
    ///
    /// Fails with the first missing option, checked in the order `name`,
    /// `fetch`, `action_namespace`.
    pub fn build(self) -> Result<ResourceBundle<T>, ConfigurationError> {
        let name = required(self.name, "name")?;
        let fetch = self
            .fetch
            .ok_or(ConfigurationError::MissingField { field: "fetch" })?;
        let action_namespace = required(self.action_namespace, "action_namespace")?;

        let policy = RefetchPolicy {
            stale_age: self.stale_age,
            retry_after: self.retry_after,
            check_online: self.check_online,
        };
        debug!(resource = %name, namespace = %action_namespace, ?policy, "resource bundle built");

        Ok(ResourceBundle::new(
            name,
            &action_namespace,
            fetch,
            policy,
            self.persist_on_success,
        ))
    }
}

impl<T: Payload> Default for ResourceConfig<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ResourceConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceConfig")
            .field("name", &self.name)
            .field("fetch", &self.fetch.as_ref().map(|_| "<capability>"))
            .field("action_namespace", &self.action_namespace)
            .field("stale_age", &self.stale_age)
            .field("retry_after", &self.retry_after)
            .field("check_online", &self.check_online)
            .field("persist_on_success", &self.persist_on_success)
            .finish()
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigurationError> {
    match value {
        None => Err(ConfigurationError::MissingField { field }),
        Some(v) if v.trim().is_empty() => Err(ConfigurationError::EmptyField { field }),
        Some(v) => Ok(v),
    }
}

fn read_var<F, V>(
    lookup: &F,
    prefix: &str,
    suffix: &str,
    parse: fn(&str) -> Option<V>,
) -> Result<Option<V>, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{prefix}_{suffix}");
    let Some(raw) = lookup(&key) else {
        return Ok(None);
    };
    match parse(raw.trim()) {
        Some(value) => Ok(Some(value)),
        None => Err(ConfigurationError::InvalidEnv { key, value: raw }),
    }
}

fn parse_millis(raw: &str) -> Option<Duration> {
    raw.parse::<u64>().ok().map(Duration::from_millis)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchFailure;
    use crate::fetch::fetch_fn;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn capability() -> impl Fetch<Value> {
        fetch_fn(|_| async { Ok::<_, FetchFailure>(json!({"name": "henrik"})) })
    }

    fn complete() -> ResourceConfig<Value> {
        ResourceConfig::new()
            .name("user")
            .action_namespace("FETCH_USER")
            .fetch(capability())
    }

    #[test]
    fn test_build_with_defaults() {
        let bundle = complete().build().unwrap();
        assert_eq!(bundle.name(), "user");
        assert_eq!(bundle.policy().stale_age, Duration::from_millis(900_000));
        assert_eq!(bundle.policy().retry_after, Duration::from_millis(60_000));
        assert!(bundle.policy().check_online);
        assert_eq!(bundle.persist_actions(), ["FETCH_USER_SUCCESS".to_string()]);
    }

    #[test]
    fn test_missing_fields_reported_in_order() {
        let err = ResourceConfig::<Value>::new().build().unwrap_err();
        assert_eq!(err, ConfigurationError::MissingField { field: "name" });

        let err = ResourceConfig::<Value>::new()
            .name("user")
            .action_namespace("FETCH_USER")
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigurationError::MissingField { field: "fetch" });

        let err = ResourceConfig::new()
            .name("user")
            .fetch(capability())
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MissingField {
                field: "action_namespace"
            }
        );
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = complete().name("  ").build().unwrap_err();
        assert_eq!(err, ConfigurationError::EmptyField { field: "name" });
    }

    #[test]
    fn test_persist_disabled_declares_nothing() {
        let bundle = complete().persist_on_success(false).build().unwrap();
        assert!(bundle.persist_actions().is_empty());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("USER_STALE_AGE_MS", "5000"),
            ("USER_RETRY_AFTER_MS", " 250 "),
            ("USER_CHECK_ONLINE", "false"),
            ("USER_PERSIST", "0"),
        ]);

        let bundle = complete()
            .with_overrides_from("USER", |key| vars.get(key).map(|v| v.to_string()))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(bundle.policy().stale_age, Duration::from_millis(5_000));
        assert_eq!(bundle.policy().retry_after, Duration::from_millis(250));
        assert!(!bundle.policy().check_online);
        assert!(bundle.persist_actions().is_empty());
    }

    #[test]
    fn test_unset_overrides_keep_values() {
        let bundle = complete()
            .retry_after(Duration::from_secs(5))
            .with_overrides_from("USER", |_| None)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(bundle.policy().retry_after, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_override_is_configuration_error() {
        let err = complete()
            .with_overrides_from("USER", |key| {
                (key == "USER_CHECK_ONLINE").then(|| "maybe".to_string())
            })
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::InvalidEnv {
                key: "USER_CHECK_ONLINE".to_string(),
                value: "maybe".to_string()
            }
        );
    }

    #[test]
    fn test_env_overrides_read_process_environment() {
        env::set_var("ASYNC_RESOURCE_CFG_TEST_STALE_AGE_MS", "1234");
        let bundle = complete()
            .with_env_overrides("ASYNC_RESOURCE_CFG_TEST")
            .unwrap()
            .build()
            .unwrap();
        env::remove_var("ASYNC_RESOURCE_CFG_TEST_STALE_AGE_MS");
        assert_eq!(bundle.policy().stale_age, Duration::from_millis(1_234));
    }
}

//! Error types for resource bundles and the store.
//!
//! - [`ConfigurationError`] is raised synchronously while building a bundle.
//! - [`FetchFailure`] is what a fetch capability rejects with. It never
//!   escapes the orchestrator; it is recorded in state through an ERROR action.
//! - [`StoreError`] covers registration and typed lookup on a [`Store`](crate::Store).
//!
//! # The Error Boundary Rule
//!
//! > **A fetch failure is state, not a fault.**
//!
//! Capabilities may use `anyhow` internally and `?` freely; the conversion
//! into [`FetchFailure`] happens at the capability boundary and the
//! orchestrator turns every failure into an ERROR action.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Raised when a resource bundle cannot be constructed.
///
/// Not recoverable: fix the configuration and build again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A required option was never supplied.
    #[error("you must supply a `{field}` option when creating a resource bundle")]
    MissingField { field: &'static str },

    /// A required identifier was supplied but is empty.
    #[error("the `{field}` option of a resource bundle must not be empty")]
    EmptyField { field: &'static str },

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for environment variable {key}")]
    InvalidEnv { key: String, value: String },
}

impl ConfigurationError {
    /// The option this error is about, if it names one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigurationError::MissingField { field }
            | ConfigurationError::EmptyField { field } => Some(*field),
            ConfigurationError::InvalidEnv { .. } => None,
        }
    }
}

// =============================================================================
// Fetch Failure
// =============================================================================

/// Why a fetch capability rejected.
///
/// A failure is either **transient** (recorded, retried once `retry_after`
/// has elapsed) or **permanent** (sets `failed_permanently` and blocks every
/// further automatic refetch until a success clears it).
///
/// # Example
///
/// ```ignore
/// use async_resource::FetchFailure;
///
/// async fn load_profile(client: &Client) -> Result<Profile, FetchFailure> {
///     let res = client.get("/me").await?;          // anyhow -> transient
///     if res.status() == 410 {
///         return Err(FetchFailure::permanent("account deleted"));
///     }
///     Ok(res.json().await?)
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct FetchFailure {
    message: String,
    #[serde(default)]
    permanent: bool,
}

impl FetchFailure {
    /// A failure worth retrying later.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    /// A failure that must not be retried automatically.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }

    /// Human-readable description of the failure.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether automatic refetching should stop.
    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    /// Mark this failure permanent.
    pub fn into_permanent(mut self) -> Self {
        self.permanent = true;
        self
    }
}

impl From<anyhow::Error> for FetchFailure {
    fn from(err: anyhow::Error) -> Self {
        if let Some(failure) = err.downcast_ref::<FetchFailure>() {
            return failure.clone();
        }
        Self::transient(format!("{err:#}"))
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from registering resources on, or looking them up in, a store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Two bundles were registered under the same name.
    #[error("resource '{name}' is already registered")]
    DuplicateResource { name: String },

    /// No bundle is registered under this name.
    #[error("no resource named '{name}' is registered")]
    UnknownResource { name: String },

    /// The bundle exists but holds a different payload type.
    #[error("resource '{name}' does not hold payloads of type {expected}")]
    PayloadMismatch {
        name: String,
        expected: &'static str,
    },
}

/// Outcome label used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    Transient,
    Permanent,
}

impl From<&FetchFailure> for FailureKind {
    fn from(failure: &FetchFailure) -> Self {
        if failure.is_permanent() {
            FailureKind::Permanent
        } else {
            FailureKind::Transient
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

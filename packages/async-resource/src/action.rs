//! Actions and the identifiers generated for a resource.
//!
//! Every resource owns four namespaced action identifiers:
//!
//! | Kind        | Identifier          | Body                      |
//! |-------------|---------------------|---------------------------|
//! | START       | `<NS>_START`        | none                      |
//! | SUCCESS     | `<NS>_SUCCESS`      | `payload`, `merge`        |
//! | ERROR       | `<NS>_ERROR`        | `error` (may be permanent)|
//! | MARK_STALE  | `<NS>_MAKE_STALE`   | none                      |
//!
//! The identifiers, together with the generated accessor names, are built
//! once when the bundle is constructed ([`ActionTypes`], [`BundleNames`]).
//! Call sites never concatenate strings.
//!
//! # Broadcast Semantics
//!
//! Hosts broadcast every action to every resource. An action whose type
//! belongs to another namespace, or whose body does not fit its kind, is
//! ignored by [`ActionTypes::classify`] and the state stays as it is.

use std::fmt;

use crate::error::FetchFailure;
use crate::state::Transition;

/// The four action kinds a resource reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Start,
    Success,
    Error,
    MakeStale,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Start => write!(f, "START"),
            ActionKind::Success => write!(f, "SUCCESS"),
            ActionKind::Error => write!(f, "ERROR"),
            ActionKind::MakeStale => write!(f, "MAKE_STALE"),
        }
    }
}

/// Action body. Which variant is valid depends on the action type.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionBody<T> {
    /// START and MAKE_STALE carry nothing.
    Empty,
    Success { payload: T, merge: bool },
    Error { error: FetchFailure },
}

/// A dispatched action: a namespaced type identifier plus its body.
#[derive(Debug, Clone, PartialEq)]
pub struct Action<T> {
    pub action_type: String,
    pub body: ActionBody<T>,
}

impl<T> Action<T> {
    pub fn new(action_type: impl Into<String>, body: ActionBody<T>) -> Self {
        Self {
            action_type: action_type.into(),
            body,
        }
    }

    /// An action with no body.
    pub fn empty(action_type: impl Into<String>) -> Self {
        Self::new(action_type, ActionBody::Empty)
    }

    pub fn payload(&self) -> Option<&T> {
        match &self.body {
            ActionBody::Success { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FetchFailure> {
        match &self.body {
            ActionBody::Error { error } => Some(error),
            _ => None,
        }
    }
}

/// The namespaced action identifiers of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTypes {
    pub start: String,
    pub success: String,
    pub error: String,
    pub make_stale: String,
}

impl ActionTypes {
    pub fn new(namespace: &str) -> Self {
        Self {
            start: format!("{namespace}_START"),
            success: format!("{namespace}_SUCCESS"),
            error: format!("{namespace}_ERROR"),
            make_stale: format!("{namespace}_MAKE_STALE"),
        }
    }

    pub fn kind_of(&self, action_type: &str) -> Option<ActionKind> {
        if action_type == self.start {
            Some(ActionKind::Start)
        } else if action_type == self.success {
            Some(ActionKind::Success)
        } else if action_type == self.error {
            Some(ActionKind::Error)
        } else if action_type == self.make_stale {
            Some(ActionKind::MakeStale)
        } else {
            None
        }
    }

    pub fn identifier(&self, kind: ActionKind) -> &str {
        match kind {
            ActionKind::Start => &self.start,
            ActionKind::Success => &self.success,
            ActionKind::Error => &self.error,
            ActionKind::MakeStale => &self.make_stale,
        }
    }

    /// Map an action onto the transition it requests.
    ///
    /// Returns `None` for actions this resource does not own and for bodies
    /// that do not match their kind. Ignoring them is intentional: hosts
    /// broadcast every action to every resource.
    pub fn classify<'a, T>(&self, action: &'a Action<T>) -> Option<Transition<'a, T>> {
        match (self.kind_of(&action.action_type)?, &action.body) {
            (ActionKind::Start, _) => Some(Transition::Start),
            (ActionKind::Success, ActionBody::Success { payload, merge }) => {
                Some(Transition::Success {
                    payload,
                    merge: *merge,
                })
            }
            (ActionKind::Error, ActionBody::Error { error }) => {
                Some(Transition::Error { failure: error })
            }
            (ActionKind::MakeStale, _) => Some(Transition::MarkStale),
            _ => None,
        }
    }
}

/// Accessor names generated from a resource name.
///
/// For a resource called `user`:
///
/// | Field                 | Name                               |
/// |-----------------------|------------------------------------|
/// | `raw`                 | `select_user_raw`                  |
/// | `data`                | `select_user`                      |
/// | `is_stale`            | `select_user_is_stale`             |
/// | `last_error`          | `select_user_last_error`           |
/// | `is_waiting_to_retry` | `select_user_is_waiting_to_retry`  |
/// | `is_loading`          | `select_user_is_loading`           |
/// | `failed_permanently`  | `select_user_failed_permanently`   |
/// | `should_refetch`      | `select_user_should_refetch`       |
/// | `fetch`               | `do_fetch_user`                    |
/// | `fetch_success`       | `do_fetch_user_success`            |
/// | `fetch_error`         | `do_fetch_user_error`              |
/// | `mark_stale`          | `do_mark_user_as_stale`            |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleNames {
    pub raw: String,
    pub data: String,
    pub is_stale: String,
    pub last_error: String,
    pub is_waiting_to_retry: String,
    pub is_loading: String,
    pub failed_permanently: String,
    pub should_refetch: String,
    pub fetch: String,
    pub fetch_success: String,
    pub fetch_error: String,
    pub mark_stale: String,
}

impl BundleNames {
    pub fn new(resource_name: &str) -> Self {
        let n = snake_case(resource_name);
        Self {
            raw: format!("select_{n}_raw"),
            data: format!("select_{n}"),
            is_stale: format!("select_{n}_is_stale"),
            last_error: format!("select_{n}_last_error"),
            is_waiting_to_retry: format!("select_{n}_is_waiting_to_retry"),
            is_loading: format!("select_{n}_is_loading"),
            failed_permanently: format!("select_{n}_failed_permanently"),
            should_refetch: format!("select_{n}_should_refetch"),
            fetch: format!("do_fetch_{n}"),
            fetch_success: format!("do_fetch_{n}_success"),
            fetch_error: format!("do_fetch_{n}_error"),
            mark_stale: format!("do_mark_{n}_as_stale"),
        }
    }

    /// Every generated name, selectors first.
    pub fn all(&self) -> [&str; 12] {
        [
            self.raw.as_str(),
            self.data.as_str(),
            self.is_stale.as_str(),
            self.last_error.as_str(),
            self.is_waiting_to_retry.as_str(),
            self.is_loading.as_str(),
            self.failed_permanently.as_str(),
            self.should_refetch.as_str(),
            self.fetch.as_str(),
            self.fetch_success.as_str(),
            self.fetch_error.as_str(),
            self.mark_stale.as_str(),
        ]
    }
}

/// `userProfile`, `UserProfile`, `user-profile` and `user profile` all
/// become `user_profile`.
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else if ch == '-' || ch == ' ' || ch == '_' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

//! Resource state and its pure transition function.
//!
//! # Lifecycle
//!
//! ```text
//!            START              SUCCESS
//!   Idle ───────────► Loading ───────────► Succeeded ─┐
//!                       │  ▲                          │
//!                 ERROR │  └──────── START ───────────┤
//!                       ▼                             │
//!                    Failed ◄─────────────────────────┘
//!                       │            (ERROR)
//!                       └─── START ──► Loading
//! ```
//!
//! `MARK_STALE` can arrive in any phase; it only touches `stale` and the
//! failure history.
//!
//! # Key Properties
//!
//! - **Pure**: [`ResourceState::apply`] takes `&self` and returns a new snapshot
//! - **Stamped on application**: `now` comes from the caller, not the action
//! - **One in-flight flag**: a second START while loading is not rejected

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::FetchFailure;
use crate::merge::Merge;

/// Values a resource can hold.
///
/// Automatically implemented for every `Merge + Clone + Send + Sync + 'static`
/// type.
pub trait Payload: Merge + Clone + Send + Sync + 'static {}

impl<T: Merge + Clone + Send + Sync + 'static> Payload for T {}

/// Snapshot of one resource's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState<T> {
    /// True between a START and the next SUCCESS or ERROR.
    pub is_loading: bool,
    /// Last successfully fetched value.
    pub data: Option<T>,
    /// Failure times since the last success or manual stale mark.
    pub error_times: Vec<Timestamp>,
    pub last_success: Option<Timestamp>,
    /// Set by an ERROR carrying the permanent marker; cleared by SUCCESS.
    pub failed_permanently: bool,
    /// Manual staleness mark. Not consulted by the refetch decision.
    pub stale: bool,
}

impl<T> Default for ResourceState<T> {
    fn default() -> Self {
        Self {
            is_loading: false,
            data: None,
            error_times: Vec::new(),
            last_success: None,
            failed_permanently: false,
            stale: false,
        }
    }
}

/// A recognized state change, borrowed out of an action.
#[derive(Debug, PartialEq)]
pub enum Transition<'a, T> {
    Start,
    Success { payload: &'a T, merge: bool },
    Error { failure: &'a FetchFailure },
    MarkStale,
}

impl<T> ResourceState<T> {
    /// The fixed initial snapshot.
    pub fn initial() -> Self {
        Self::default()
    }

    /// Most recent failure time, if any failure happened since the last reset.
    pub fn last_error(&self) -> Option<Timestamp> {
        self.error_times.last().copied()
    }
}

impl<T: Merge + Clone> ResourceState<T> {
    /// Apply one transition at time `now`, producing the next snapshot.
    pub fn apply(&self, transition: Transition<'_, T>, now: Timestamp) -> Self {
        match transition {
            Transition::Start => Self {
                is_loading: true,
                ..self.clone()
            },
            Transition::Success { payload, merge } => {
                let data = match (&self.data, merge) {
                    (Some(previous), true) => previous.clone().merge(payload.clone()),
                    _ => payload.clone(),
                };
                Self {
                    is_loading: false,
                    data: Some(data),
                    error_times: Vec::new(),
                    last_success: Some(now),
                    failed_permanently: false,
                    stale: false,
                }
            }
            Transition::Error { failure } => {
                let mut error_times = self.error_times.clone();
                error_times.push(now);
                Self {
                    is_loading: false,
                    error_times,
                    failed_permanently: failure.is_permanent(),
                    ..self.clone()
                }
            }
            Transition::MarkStale => Self {
                error_times: Vec::new(),
                stale: true,
                ..self.clone()
            },
        }
    }
}

//! Derived queries over a resource snapshot.
//!
//! Every function here is a pure function of `(state, now, online)` plus the
//! resource's [`RefetchPolicy`]. Nothing is cached; callers recompute on each
//! read.
//!
//! # Refetch Rules
//!
//! Evaluated in order, first match wins:
//!
//! 1. `check_online` and offline → no
//! 2. loading → no
//! 3. failed permanently → no
//! 4. waiting to retry → no
//! 5. never succeeded → yes
//! 6. otherwise → stale by time
//!
//! The manual `stale` flag is not part of these rules.

use std::fmt;
use std::time::Duration;

use crate::clock::{duration_millis, Timestamp};
use crate::state::ResourceState;

/// Default age after which a successful result is stale (fifteen minutes).
pub const DEFAULT_STALE_AGE: Duration = Duration::from_millis(900_000);

/// Default wait after a failure before retrying (one minute).
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_millis(60_000);

/// Timing and connectivity knobs of the refetch decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefetchPolicy {
    /// Age after which a successful fetch counts as stale.
    pub stale_age: Duration,
    /// How long after a failure the decision waits before retrying.
    pub retry_after: Duration,
    /// When set, no refetch is suggested while offline.
    pub check_online: bool,
}

impl Default for RefetchPolicy {
    fn default() -> Self {
        Self {
            stale_age: DEFAULT_STALE_AGE,
            retry_after: DEFAULT_RETRY_AFTER,
            check_online: true,
        }
    }
}

/// Outcome of the refetch rules, naming the rule that decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefetchDecision {
    Offline,
    Loading,
    FailedPermanently,
    WaitingToRetry,
    /// No successful result yet.
    NeverFetched,
    Stale,
    Fresh,
}

impl RefetchDecision {
    pub fn should_refetch(self) -> bool {
        matches!(self, RefetchDecision::NeverFetched | RefetchDecision::Stale)
    }
}

impl fmt::Display for RefetchDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RefetchDecision::Offline => "offline",
            RefetchDecision::Loading => "loading",
            RefetchDecision::FailedPermanently => "failed_permanently",
            RefetchDecision::WaitingToRetry => "waiting_to_retry",
            RefetchDecision::NeverFetched => "never_fetched",
            RefetchDecision::Stale => "stale",
            RefetchDecision::Fresh => "fresh",
        };
        f.write_str(label)
    }
}

/// True when more than `age` has passed since `time`.
fn older_than(time: Option<Timestamp>, now: Timestamp, age: Duration) -> bool {
    time.is_some_and(|t| now.millis_since(t) > duration_millis(age))
}

/// True when less than `age` has passed since `time`.
fn younger_than(time: Option<Timestamp>, now: Timestamp, age: Duration) -> bool {
    time.is_some_and(|t| now.millis_since(t) < duration_millis(age))
}

pub fn last_error<T>(state: &ResourceState<T>) -> Option<Timestamp> {
    state.last_error()
}

/// Whether the last success is older than `stale_age`.
///
/// Never true before the first success.
pub fn is_stale<T>(state: &ResourceState<T>, now: Timestamp, stale_age: Duration) -> bool {
    older_than(state.last_success, now, stale_age)
}

/// Whether the last failure happened less than `retry_after` ago.
pub fn is_waiting_to_retry<T>(
    state: &ResourceState<T>,
    now: Timestamp,
    retry_after: Duration,
) -> bool {
    younger_than(state.last_error(), now, retry_after)
}

pub fn refetch_decision<T>(
    state: &ResourceState<T>,
    now: Timestamp,
    online: bool,
    policy: &RefetchPolicy,
) -> RefetchDecision {
    if policy.check_online && !online {
        return RefetchDecision::Offline;
    }
    if state.is_loading {
        return RefetchDecision::Loading;
    }
    if state.failed_permanently {
        return RefetchDecision::FailedPermanently;
    }
    if is_waiting_to_retry(state, now, policy.retry_after) {
        return RefetchDecision::WaitingToRetry;
    }
    if state.data.is_none() {
        return RefetchDecision::NeverFetched;
    }
    if is_stale(state, now, policy.stale_age) {
        RefetchDecision::Stale
    } else {
        RefetchDecision::Fresh
    }
}

pub fn should_refetch<T>(
    state: &ResourceState<T>,
    now: Timestamp,
    online: bool,
    policy: &RefetchPolicy,
) -> bool {
    refetch_decision(state, now, online, policy).should_refetch()
}

//! Testing utilities for resource bundles.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! async-resource = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ## Using `assert_transitions!` Macro
//!
//! ```ignore
//! use async_resource::testing::assert_transitions;
//!
//! let state = assert_transitions!(
//!     bundle,
//!     bundle.initial_state(),
//!     ts(0), bundle.start() => |s| s.is_loading,
//!     ts(5), bundle.fetch_success(json!(1)) => |s| s.last_success == Some(ts(5)),
//! );
//! ```
//!
//! ## Using Fluent Builder
//!
//! ```ignore
//! use async_resource::testing::ResourceTest;
//!
//! ResourceTest::new(bundle)
//!     .at(ts(12))
//!     .fail(FetchFailure::transient("down"))
//!     .expect_errors(1)
//!     .advance(Duration::from_millis(60_000))
//!     .expect_should_refetch(true);
//! ```
//!
//! ## Using `RecordingDispatch`
//!
//! ```ignore
//! let recorder = RecordingDispatch::new();
//! bundle.fetch(&recorder).await;
//! recorder.assert_types(&["FETCH_USER_START", "FETCH_USER_SUCCESS"]);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::action::Action;
use crate::bundle::ResourceBundle;
use crate::clock::Timestamp;
use crate::error::FetchFailure;
use crate::fetch::Dispatch;
use crate::query::RefetchDecision;
use crate::state::{Payload, ResourceState};

/// Applies a sequence of timed actions to a bundle and checks each resulting
/// state. Evaluates to the final state.
///
/// # Syntax
///
/// ```ignore
/// assert_transitions!(
///     bundle,
///     initial_state,
///     now1, action1 => predicate1,
///     now2, action2 => predicate2,
/// );
/// ```
///
/// # Panics
///
/// Panics if any predicate returns `false`.
#[macro_export]
macro_rules! assert_transitions {
    ($bundle:expr, $state:expr, $($now:expr, $action:expr => $check:expr),+ $(,)?) => {{
        let mut state = $state;
        $(
            let now = $now;
            let action = $action;
            state = $bundle.reduce(&state, &action, now);
            assert!(
                $crate::testing::check_state(&state, $check),
                "Unexpected state after {} at {}\n  state: {:?}",
                action.action_type, now, state
            );
        )+
        state
    }};
}

pub use assert_transitions;

/// Evaluate a state predicate. Used by [`assert_transitions!`].
pub fn check_state<T, F>(state: &ResourceState<T>, predicate: F) -> bool
where
    F: FnOnce(&ResourceState<T>) -> bool,
{
    predicate(state)
}

// =============================================================================
// Fluent tester
// =============================================================================

/// Fluent test builder for a single resource.
///
/// Holds a state snapshot, a current time, and an online flag. Each action
/// is applied at the current time.
///
/// # Example
///
/// ```ignore
/// ResourceTest::new(bundle)
///     .start()
///     .expect_loading(true)
///     .expect_decision(RefetchDecision::Loading)
///     .succeed(json!({"name": "henrik"}))
///     .expect_data(Some(&json!({"name": "henrik"})))
///     .then(Action::empty("UNRELATED"))
///     .expect_ignored();
/// ```
pub struct ResourceTest<T> {
    bundle: ResourceBundle<T>,
    state: ResourceState<T>,
    now: Timestamp,
    online: bool,
    last_recognized: bool,
}

impl<T> ResourceTest<T>
where
    T: Payload + fmt::Debug + PartialEq,
{
    /// Starts from the initial state at the epoch, online.
    pub fn new(bundle: ResourceBundle<T>) -> Self {
        Self {
            state: bundle.initial_state(),
            bundle,
            now: Timestamp::EPOCH,
            online: true,
            last_recognized: false,
        }
    }

    /// Start from an arbitrary snapshot, e.g. one restored from persistence.
    pub fn with_state(mut self, state: ResourceState<T>) -> Self {
        self.state = state;
        self
    }

    /// Set the current time.
    pub fn at(mut self, now: Timestamp) -> Self {
        self.now = now;
        self
    }

    pub fn advance(mut self, by: Duration) -> Self {
        self.now = self.now.plus(by);
        self
    }

    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Apply an action at the current time.
    pub fn given(self, action: Action<T>) -> Self {
        self.then(action)
    }

    /// Apply a subsequent action at the current time.
    pub fn then(mut self, action: Action<T>) -> Self {
        match self.bundle.try_reduce(&self.state, &action, self.now) {
            Some(next) => {
                self.state = next;
                self.last_recognized = true;
            }
            None => self.last_recognized = false,
        }
        self
    }

    pub fn start(self) -> Self {
        let action = self.bundle.start();
        self.then(action)
    }

    pub fn succeed(self, payload: T) -> Self {
        let action = self.bundle.fetch_success(payload);
        self.then(action)
    }

    pub fn succeed_merge(self, payload: T) -> Self {
        let action = self.bundle.fetch_success_merge(payload);
        self.then(action)
    }

    pub fn fail(self, failure: FetchFailure) -> Self {
        let action = self.bundle.fetch_error(failure);
        self.then(action)
    }

    pub fn mark_stale(self) -> Self {
        let action = self.bundle.mark_as_stale();
        self.then(action)
    }

    /// Assert the last action was ignored.
    pub fn expect_ignored(self) -> Self {
        assert!(
            !self.last_recognized,
            "Expected the last action to be ignored\n  state: {:?}",
            self.state
        );
        self
    }

    pub fn expect_loading(self, expected: bool) -> Self {
        assert_eq!(
            self.state.is_loading, expected,
            "is_loading mismatch\n  state: {:?}",
            self.state
        );
        self
    }

    pub fn expect_data(self, expected: Option<&T>) -> Self {
        assert_eq!(self.state.data.as_ref(), expected, "data mismatch");
        self
    }

    /// Assert the number of recorded failure times.
    pub fn expect_errors(self, count: usize) -> Self {
        assert_eq!(
            self.state.error_times.len(),
            count,
            "error_times mismatch: {:?}",
            self.state.error_times
        );
        self
    }

    pub fn expect_failed_permanently(self, expected: bool) -> Self {
        assert_eq!(
            self.state.failed_permanently, expected,
            "failed_permanently mismatch\n  state: {:?}",
            self.state
        );
        self
    }

    pub fn expect_stale(self, expected: bool) -> Self {
        let actual = self.bundle.select_is_stale(&self.state, self.now);
        assert_eq!(actual, expected, "is_stale mismatch at {}", self.now);
        self
    }

    pub fn expect_waiting_to_retry(self, expected: bool) -> Self {
        let actual = self.bundle.select_is_waiting_to_retry(&self.state, self.now);
        assert_eq!(actual, expected, "is_waiting_to_retry mismatch at {}", self.now);
        self
    }

    pub fn expect_decision(self, expected: RefetchDecision) -> Self {
        let actual = self
            .bundle
            .select_refetch_decision(&self.state, self.now, self.online);
        assert_eq!(
            actual, expected,
            "refetch decision mismatch at {} (online: {})",
            self.now, self.online
        );
        self
    }

    pub fn expect_should_refetch(self, expected: bool) -> Self {
        let decision = self
            .bundle
            .select_refetch_decision(&self.state, self.now, self.online);
        assert_eq!(
            decision.should_refetch(),
            expected,
            "should_refetch mismatch at {}: decision was {}",
            self.now,
            decision
        );
        self
    }

    /// Assert the state matches a predicate.
    pub fn assert_state<F>(self, predicate: F) -> Self
    where
        F: FnOnce(&ResourceState<T>) -> bool,
    {
        assert!(
            predicate(&self.state),
            "State predicate failed\n  state: {:?}",
            self.state
        );
        self
    }

    pub fn state(&self) -> &ResourceState<T> {
        &self.state
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn into_state(self) -> ResourceState<T> {
        self.state
    }
}

// =============================================================================
// Recording dispatch
// =============================================================================

/// A [`Dispatch`] that records every action instead of applying it.
///
/// Clones share the same recording.
pub struct RecordingDispatch<T> {
    actions: Arc<Mutex<Vec<Action<T>>>>,
}

impl<T: Clone> RecordingDispatch<T> {
    pub fn new() -> Self {
        Self {
            actions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn actions(&self) -> Vec<Action<T>> {
        self.lock().clone()
    }

    pub fn action_types(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|action| action.action_type.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drain and return everything recorded so far.
    pub fn take(&self) -> Vec<Action<T>> {
        std::mem::take(&mut *self.lock())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Assert the recorded action types, in order.
    pub fn assert_types(&self, expected: &[&str]) {
        let actual = self.action_types();
        assert_eq!(actual, expected, "Recorded action types mismatch");
    }

    /// Replay the recording through a bundle, all at time `now`.
    pub fn replay(&self, bundle: &ResourceBundle<T>, now: Timestamp) -> ResourceState<T>
    where
        T: Payload,
    {
        self.lock()
            .iter()
            .fold(bundle.initial_state(), |state, action| {
                bundle.reduce(&state, action, now)
            })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Action<T>>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for RecordingDispatch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for RecordingDispatch<T> {
    fn clone(&self) -> Self {
        Self {
            actions: Arc::clone(&self.actions),
        }
    }
}

impl<T: Send> Dispatch<T> for RecordingDispatch<T> {
    fn dispatch(&self, action: Action<T>) {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }
}

impl<T> fmt::Debug for RecordingDispatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingDispatch").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::fetch::fetch_fn;
    use serde_json::{json, Value};

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn bundle() -> ResourceBundle<Value> {
        ResourceConfig::new()
            .name("user")
            .action_namespace("FETCH_USER")
            .fetch(fetch_fn(|_| async {
                Ok::<_, FetchFailure>(json!({"name": "henrik"}))
            }))
            .build()
            .unwrap()
    }

    #[test]
    fn test_assert_transitions_macro() {
        let b = bundle();
        let state = assert_transitions!(
            b,
            b.initial_state(),
            ts(0), b.start() => |s| s.is_loading,
            ts(5), b.fetch_success(json!(1)) => |s| s.last_success == Some(ts(5)),
            ts(9), b.mark_as_stale() => |s| s.stale && s.data == Some(json!(1)),
        );
        assert!(!state.is_loading);
    }

    #[test]
    #[should_panic(expected = "Unexpected state")]
    fn test_assert_transitions_macro_fails() {
        let b = bundle();
        assert_transitions!(
            b,
            b.initial_state(),
            ts(0), b.start() => |s| !s.is_loading,
        );
    }

    #[test]
    fn test_fluent_tester() {
        ResourceTest::new(bundle())
            .expect_decision(RefetchDecision::NeverFetched)
            .start()
            .expect_loading(true)
            .expect_should_refetch(false)
            .at(ts(100))
            .succeed(json!({"name": "henrik"}))
            .expect_data(Some(&json!({"name": "henrik"})))
            .expect_decision(RefetchDecision::Fresh)
            .then(Action::empty("FETCH_POSTS_START"))
            .expect_ignored()
            .advance(Duration::from_millis(900_001))
            .expect_stale(true)
            .online(false)
            .expect_decision(RefetchDecision::Offline);
    }

    #[test]
    fn test_fluent_tester_failures() {
        let state = ResourceTest::new(bundle())
            .at(ts(12))
            .fail(FetchFailure::transient("down"))
            .at(ts(25))
            .fail(FetchFailure::transient("down"))
            .expect_errors(2)
            .expect_waiting_to_retry(true)
            .fail(FetchFailure::permanent("gone"))
            .expect_failed_permanently(true)
            .expect_decision(RefetchDecision::FailedPermanently)
            .into_state();
        assert_eq!(state.last_error(), Some(ts(25)));
    }

    #[tokio::test]
    async fn test_recording_dispatch() {
        let b = bundle();
        let recorder = RecordingDispatch::new();

        b.fetch(&recorder).await;

        recorder.assert_types(&["FETCH_USER_START", "FETCH_USER_SUCCESS"]);
        let state = recorder.replay(&b, ts(7));
        assert_eq!(state.data, Some(json!({"name": "henrik"})));
        assert_eq!(recorder.take().len(), 2);
        assert!(recorder.is_empty());
    }
}

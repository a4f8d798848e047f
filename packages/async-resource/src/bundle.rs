//! The resource bundle: reducer, selectors, and action creators for one
//! named resource.
//!
//! A bundle is immutable once built. It holds no state of its own; the host
//! keeps the [`ResourceState`] snapshot and passes it in.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::action::{Action, ActionBody, ActionTypes, BundleNames};
use crate::clock::Timestamp;
use crate::error::FetchFailure;
use crate::fetch::{context_for, run_fetch, Dispatch, Fetch};
use crate::query::{self, RefetchDecision, RefetchPolicy};
use crate::state::{Payload, ResourceState};

pub struct ResourceBundle<T> {
    name: String,
    names: BundleNames,
    types: ActionTypes,
    fetch: Arc<dyn Fetch<T>>,
    policy: RefetchPolicy,
    persist_actions: Vec<String>,
}

impl<T> ResourceBundle<T> {
    /// The resource's name, as given to the config.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generated accessor names (`select_user`, `do_fetch_user`, ...).
    pub fn names(&self) -> &BundleNames {
        &self.names
    }

    /// The four namespaced action identifiers.
    pub fn action_types(&self) -> &ActionTypes {
        &self.types
    }

    /// Thresholds used by the refetch decision.
    pub fn policy(&self) -> &RefetchPolicy {
        &self.policy
    }

    /// Action identifiers an external persistence layer may snapshot after.
    ///
    /// Contains the SUCCESS identifier when `persist_on_success` is set.
    pub fn persist_actions(&self) -> &[String] {
        &self.persist_actions
    }
}

impl<T: Payload> ResourceBundle<T> {
    pub(crate) fn new(
        name: String,
        action_namespace: &str,
        fetch: Arc<dyn Fetch<T>>,
        policy: RefetchPolicy,
        persist_on_success: bool,
    ) -> Self {
        let types = ActionTypes::new(action_namespace);
        let persist_actions = if persist_on_success {
            vec![types.success.clone()]
        } else {
            Vec::new()
        };
        Self {
            names: BundleNames::new(&name),
            name,
            types,
            fetch,
            policy,
            persist_actions,
        }
    }

    pub fn initial_state(&self) -> ResourceState<T> {
        ResourceState::initial()
    }

    // -------------------------------------------------------------------------
    // Reducer
    // -------------------------------------------------------------------------

    /// Apply `action` at time `now`.
    ///
    /// Returns `None` when the action is not one of this resource's four
    /// kinds, which leaves the caller's snapshot as the current one.
    pub fn try_reduce(
        &self,
        state: &ResourceState<T>,
        action: &Action<T>,
        now: Timestamp,
    ) -> Option<ResourceState<T>> {
        match self.types.classify(action) {
            Some(transition) => Some(state.apply(transition, now)),
            None => {
                trace!(resource = %self.name, action = %action.action_type, "action ignored");
                None
            }
        }
    }

    /// Total form of [`try_reduce`](Self::try_reduce): unknown actions return
    /// an unchanged copy.
    pub fn reduce(
        &self,
        state: &ResourceState<T>,
        action: &Action<T>,
        now: Timestamp,
    ) -> ResourceState<T> {
        self.try_reduce(state, action, now).unwrap_or_else(|| state.clone())
    }

    // -------------------------------------------------------------------------
    // Selectors
    // -------------------------------------------------------------------------

    pub fn select_raw<'s>(&self, state: &'s ResourceState<T>) -> &'s ResourceState<T> {
        state
    }

    pub fn select_data<'s>(&self, state: &'s ResourceState<T>) -> Option<&'s T> {
        state.data.as_ref()
    }

    pub fn select_is_stale(&self, state: &ResourceState<T>, now: Timestamp) -> bool {
        query::is_stale(state, now, self.policy.stale_age)
    }

    pub fn select_last_error(&self, state: &ResourceState<T>) -> Option<Timestamp> {
        query::last_error(state)
    }

    pub fn select_is_waiting_to_retry(&self, state: &ResourceState<T>, now: Timestamp) -> bool {
        query::is_waiting_to_retry(state, now, self.policy.retry_after)
    }

    pub fn select_is_loading(&self, state: &ResourceState<T>) -> bool {
        state.is_loading
    }

    pub fn select_failed_permanently(&self, state: &ResourceState<T>) -> bool {
        state.failed_permanently
    }

    pub fn select_refetch_decision(
        &self,
        state: &ResourceState<T>,
        now: Timestamp,
        online: bool,
    ) -> RefetchDecision {
        query::refetch_decision(state, now, online, &self.policy)
    }

    pub fn select_should_refetch(
        &self,
        state: &ResourceState<T>,
        now: Timestamp,
        online: bool,
    ) -> bool {
        self.select_refetch_decision(state, now, online).should_refetch()
    }

    // -------------------------------------------------------------------------
    // Action creators
    // -------------------------------------------------------------------------

    pub fn start(&self) -> Action<T> {
        Action::empty(self.types.start.clone())
    }

    pub fn fetch_success(&self, payload: T) -> Action<T> {
        Action::new(
            self.types.success.clone(),
            ActionBody::Success {
                payload,
                merge: false,
            },
        )
    }

    /// SUCCESS with the merge directive: `payload` is shallow-merged into the
    /// current data instead of replacing it.
    pub fn fetch_success_merge(&self, payload: T) -> Action<T> {
        Action::new(
            self.types.success.clone(),
            ActionBody::Success {
                payload,
                merge: true,
            },
        )
    }

    pub fn fetch_error(&self, failure: FetchFailure) -> Action<T> {
        Action::new(
            self.types.error.clone(),
            ActionBody::Error { error: failure },
        )
    }

    pub fn mark_as_stale(&self) -> Action<T> {
        Action::empty(self.types.make_stale.clone())
    }

    /// Trigger one fetch attempt through `dispatch`.
    ///
    /// Dispatches START, awaits the capability, then dispatches SUCCESS or
    /// ERROR. The returned future always resolves; failures end up in state.
    ///
    /// The capability receives a [`FetchContext`](crate::FetchContext). When
    /// `dispatch` is a [`Store`](crate::Store), the context carries it.
    pub async fn fetch<D: Dispatch<T> + ?Sized>(&self, dispatch: &D) {
        let ctx = context_for::<T, D>(&self.name, dispatch);
        run_fetch(ctx, &self.types, &*self.fetch, dispatch).await
    }
}

impl<T> fmt::Debug for ResourceBundle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceBundle")
            .field("name", &self.name)
            .field("types", &self.types)
            .field("policy", &self.policy)
            .field("persist_actions", &self.persist_actions)
            .finish_non_exhaustive()
    }
}

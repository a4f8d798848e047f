//! Fetch capability, dispatch seam, and the fetch orchestrator.
//!
//! # Orchestration
//!
//! ```text
//! run_fetch()
//!     │
//!     ├─► dispatch(START)
//!     │
//!     ├─► capability.fetch(ctx).await ┬─► Ok(payload)  ─► dispatch(SUCCESS)
//!     │                               ├─► Err(failure) ─► dispatch(ERROR)
//!     │                               └─► panic        ─► dispatch(ERROR)
//!     ▼
//!  resolves (never rejects)
//! ```
//!
//! The orchestrator never retries. Retry cadence comes from the refetch
//! decision plus whatever driver polls it.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::action::{Action, ActionBody, ActionTypes};
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::error::{FailureKind, FetchFailure};
use crate::state::Payload;
use crate::store::Store;

/// The async operation that produces a resource's payload.
///
/// # Example
///
/// ```ignore
/// struct LoadPosts {
///     client: reqwest::Client,
/// }
///
/// #[async_trait]
/// impl Fetch<Vec<Post>> for LoadPosts {
///     async fn fetch(&self, ctx: FetchContext) -> Result<Vec<Post>, FetchFailure> {
///         let token = ctx.data_of::<Session>("session").map(|s| s.token);
///         let res = self.client.get(URL).bearer_auth(token.unwrap_or_default()).send().await;
///         Ok(res.map_err(anyhow::Error::from)?.json().await.map_err(anyhow::Error::from)?)
///     }
/// }
/// ```
#[async_trait]
pub trait Fetch<T>: Send + Sync + 'static {
    async fn fetch(&self, ctx: FetchContext) -> Result<T, FetchFailure>;
}

/// Closure adapter for [`Fetch`]; see [`fetch_fn`].
pub struct FetchFn<F> {
    f: F,
}

/// Wrap an async closure as a fetch capability.
///
/// ```ignore
/// let capability = fetch_fn(|_ctx| async { Ok(json!({"name": "henrik"})) });
/// ```
pub fn fetch_fn<F, Fut>(f: F) -> FetchFn<F>
where
    F: Fn(FetchContext) -> Fut,
{
    FetchFn { f }
}

#[async_trait]
impl<T, F, Fut> Fetch<T> for FetchFn<F>
where
    T: Send + 'static,
    F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchFailure>> + Send + 'static,
{
    async fn fetch(&self, ctx: FetchContext) -> Result<T, FetchFailure> {
        (self.f)(ctx).await
    }
}

impl<F> fmt::Debug for FetchFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchFn").finish_non_exhaustive()
    }
}

/// What a fetch capability can see when it runs.
///
/// When the fetch was dispatched into a [`Store`], the context carries that
/// store, so the capability can read other resources (a session token, the id
/// of a parent resource) and dispatch actions of its own. The store's clock
/// and connectivity are sampled when the attempt starts.
///
/// A detached context (fetch dispatched somewhere other than a store) has no
/// store, samples the system clock, and reports online.
#[derive(Clone)]
pub struct FetchContext {
    resource: String,
    fetch_id: FetchId,
    now: Timestamp,
    online: bool,
    store: Option<Store>,
}

impl FetchContext {
    /// Context for a fetch running against `store`.
    pub(crate) fn for_store(resource: &str, store: &Store) -> Self {
        Self {
            resource: resource.to_string(),
            fetch_id: FetchId::new(),
            now: store.now(),
            online: store.is_online(),
            store: Some(store.clone()),
        }
    }

    /// Context for a fetch with no store behind its dispatch.
    pub fn detached(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            fetch_id: FetchId::new(),
            now: SystemClock.now(),
            online: true,
            store: None,
        }
    }

    /// Name of the resource being fetched.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Id of this attempt, as logged by the orchestrator.
    pub fn fetch_id(&self) -> FetchId {
        self.fetch_id
    }

    /// Time at which the attempt started.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Connectivity at the time the attempt started.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// The store the fetch was dispatched into, if any.
    pub fn store(&self) -> Option<&Store> {
        self.store.as_ref()
    }

    /// Current data of another resource in the same store.
    ///
    /// `None` when detached, when no resource has that name or payload type,
    /// or when it has no data yet.
    pub fn data_of<U: Payload>(&self, name: &str) -> Option<U> {
        self.store.as_ref()?.resource::<U>(name).ok()?.data()
    }

    /// Dispatch an action into the store. Returns whether any resource
    /// recognized it; always `false` when detached.
    pub fn dispatch<U: Payload>(&self, action: Action<U>) -> bool {
        match &self.store {
            Some(store) => store.dispatch(action),
            None => false,
        }
    }
}

impl fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchContext")
            .field("resource", &self.resource)
            .field("fetch_id", &self.fetch_id)
            .field("now", &self.now)
            .field("online", &self.online)
            .field("detached", &self.store.is_none())
            .finish()
    }
}

/// Where actions go: a store, a recording stub, or anything else that
/// applies them in order.
pub trait Dispatch<T>: Send + Sync {
    fn dispatch(&self, action: Action<T>);

    /// The store behind this dispatch, if any. Handed to fetch capabilities
    /// through [`FetchContext`].
    fn store(&self) -> Option<&Store> {
        None
    }
}

/// Closure adapter for [`Dispatch`]; see [`dispatch_fn`].
pub struct DispatchFn<F> {
    f: F,
}

/// Wrap a closure as a [`Dispatch`]. The resulting dispatch has no store.
pub fn dispatch_fn<F>(f: F) -> DispatchFn<F> {
    DispatchFn { f }
}

impl<T, F> Dispatch<T> for DispatchFn<F>
where
    F: Fn(Action<T>) + Send + Sync,
{
    fn dispatch(&self, action: Action<T>) {
        (self.f)(action)
    }
}

impl<T, D: Dispatch<T> + ?Sized> Dispatch<T> for &D {
    fn dispatch(&self, action: Action<T>) {
        (**self).dispatch(action)
    }

    fn store(&self) -> Option<&Store> {
        (**self).store()
    }
}

/// Identifies one fetch attempt in logs.
///
/// Attempts are not tracked in state; a late resolution of an older attempt
/// is applied like any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchId(Uuid);

impl FetchId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FetchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FetchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context for a fetch of `resource` dispatched through `dispatch`.
pub(crate) fn context_for<T, D>(resource: &str, dispatch: &D) -> FetchContext
where
    D: Dispatch<T> + ?Sized,
{
    match dispatch.store() {
        Some(store) => FetchContext::for_store(resource, store),
        None => FetchContext::detached(resource),
    }
}

/// Run one fetch attempt: START, await the capability, SUCCESS or ERROR.
///
/// Resolves once the final action has been dispatched. A panicking
/// capability is reported as a transient failure.
pub(crate) async fn run_fetch<T, C, D>(
    ctx: FetchContext,
    types: &ActionTypes,
    capability: &C,
    dispatch: &D,
) where
    C: Fetch<T> + ?Sized,
    D: Dispatch<T> + ?Sized,
{
    let resource = ctx.resource().to_string();
    let fetch_id = ctx.fetch_id();
    debug!(resource = %resource, %fetch_id, "fetch started");
    dispatch.dispatch(Action::empty(types.start.clone()));

    let outcome = match AssertUnwindSafe(capability.fetch(ctx)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic_info) => {
            let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            error!(
                resource = %resource,
                %fetch_id,
                panic = %panic_msg,
                "fetch capability panicked"
            );
            Err(FetchFailure::transient(format!("fetch capability panicked: {panic_msg}")))
        }
    };

    match outcome {
        Ok(payload) => {
            debug!(resource = %resource, %fetch_id, "fetch succeeded");
            dispatch.dispatch(Action::new(
                types.success.clone(),
                ActionBody::Success {
                    payload,
                    merge: false,
                },
            ));
        }
        Err(failure) => {
            let kind = FailureKind::from(&failure);
            match kind {
                FailureKind::Permanent => {
                    error!(resource = %resource, %fetch_id, %kind, error = %failure, "fetch failed")
                }
                FailureKind::Transient => {
                    warn!(resource = %resource, %fetch_id, %kind, error = %failure, "fetch failed")
                }
            }
            dispatch.dispatch(Action::new(
                types.error.clone(),
                ActionBody::Error { error: failure },
            ));
        }
    }
}

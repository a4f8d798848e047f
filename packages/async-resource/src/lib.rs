//! # async-resource
//!
//! Lifecycle state machine and refetch decisions for remotely-fetched
//! resources held in a client-side state container.
//!
//! ## Core Concepts
//!
//! A resource separates **what is known** from **what to do next**:
//! - [`ResourceState`] = what is known (data, loading flag, failure history)
//! - [`RefetchDecision`] = what to do next, derived on demand from the state,
//!   the current time, and connectivity
//!
//! State only changes through four actions: START, SUCCESS, ERROR and
//! MAKE_STALE. The [`ResourceBundle`] reduces them purely; the fetch
//! orchestrator produces them from an async [`Fetch`] capability.
//!
//! ## Architecture
//!
//! ```text
//! Host driver (timer, UI event)
//!     │
//!     ▼ fetch_if_needed()
//! ResourceHandle ──► refetch_decision(state, now, online)
//!     │                    │
//!     │                    └─► false ─► nothing to do
//!     ▼ true
//! fetch orchestrator
//!     │
//!     ├─► dispatch(START)
//!     ├─► Fetch::fetch(ctx).await
//!     └─► dispatch(SUCCESS | ERROR)
//!                │
//!                ▼
//!             Store ─► every bundle.reduce(state, action, now)
//!                │
//!                └─► ActionBus ─► subscribers (UI, persistence)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Reduction is pure** - `now` is passed in, never read inside the reducer
//! 2. **Unknown actions are ignored** - every action is broadcast to every resource
//! 3. **SUCCESS resets failures** - clears failure times, permanent flag, stale mark
//! 4. **Loading blocks refetch** - no second fetch is suggested while one is in flight
//! 5. **Fetch futures resolve** - a failure or panic becomes an ERROR action
//!
//! ## Example
//!
//! ```ignore
//! use async_resource::{fetch_fn, FetchFailure, ResourceConfig, Store};
//! use serde_json::{json, Value};
//!
//! let user = ResourceConfig::new()
//!     .name("user")
//!     .action_namespace("FETCH_USER")
//!     .fetch(fetch_fn(|_| async { Ok::<_, FetchFailure>(json!({"name": "henrik"})) }))
//!     .build()?;
//!
//! let store = Store::builder().with_resource(user).build()?;
//! let user = store.resource::<Value>("user")?;
//!
//! if let Some(fetch) = user.fetch_if_needed() {
//!     tokio::spawn(fetch);
//! }
//! ```
//!
//! ## What This Is Not
//!
//! - A query cache with eviction
//! - A retry scheduler (the host polls the decision)
//! - A persistence layer (it only names which actions are worth persisting)

// Core modules
mod action;
mod bundle;
mod bus;
mod clock;
mod config;
mod connectivity;
mod error;
mod fetch;
mod merge;
mod query;
mod state;
mod store;

// Testing utilities (feature-gated)
#[cfg(feature = "testing")]
pub mod testing;

// Scenario tests (test-only)
#[cfg(test)]
mod scenario_tests;

// Re-export state types
pub use state::{Payload, ResourceState, Transition};

// Re-export action types
pub use action::{Action, ActionBody, ActionKind, ActionTypes, BundleNames};

// Re-export bundle and configuration
pub use bundle::ResourceBundle;
pub use config::ResourceConfig;

// Re-export query types
pub use query::{
    is_stale, is_waiting_to_retry, last_error, refetch_decision, should_refetch,
    RefetchDecision, RefetchPolicy, DEFAULT_RETRY_AFTER, DEFAULT_STALE_AGE,
};

// Re-export fetch types
pub use fetch::{dispatch_fn, fetch_fn, Dispatch, DispatchFn, Fetch, FetchContext, FetchFn, FetchId};

// Re-export error types
pub use error::{ConfigurationError, FetchFailure, StoreError};

// Re-export providers
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use connectivity::{AlwaysOnline, Connectivity, OnlineFlag};
pub use merge::Merge;

// Re-export store types
pub use store::{ResourceHandle, Revision, Store, StoreBuilder};

// Re-export bus types
pub use bus::{ActionBus, ActionEnvelope, CorrelationId};

// Re-export commonly used external types
pub use async_trait::async_trait;

//! A host store that owns the state of many resources.
//!
//! The store is the glue a host application needs around bundles: it keeps
//! one state slot per registered resource, broadcasts every dispatched action
//! to every slot, and publishes what happened on an [`ActionBus`].
//!
//! # Dispatch
//!
//! ```text
//! store.dispatch(action)
//!     │
//!     ├─► now = clock.now()             (sampled once)
//!     │
//!     ├─► for each slot:
//!     │       try_reduce(state, action, now)
//!     │         ├─► Some(next) ─► replace state, bump revision
//!     │         └─► None       ─► untouched
//!     │
//!     └─► bus.publish(envelope)
//! ```
//!
//! Dispatches are serialized, so for every resource the application order is
//! the dispatch order.
//!
//! # Example
//!
//! ```ignore
//! let store = Store::builder()
//!     .with_resource(user_bundle)
//!     .with_resource(posts_bundle)
//!     .build()?;
//!
//! let user = store.resource::<Value>("user")?;
//! if let Some(fetch) = user.fetch_if_needed() {
//!     tokio::spawn(fetch);
//! }
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, trace};

use crate::action::Action;
use crate::bundle::ResourceBundle;
use crate::bus::{ActionBus, ActionEnvelope, CorrelationId};
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::connectivity::{AlwaysOnline, Connectivity};
use crate::error::StoreError;
use crate::fetch::Dispatch;
use crate::query::RefetchDecision;
use crate::state::{Payload, ResourceState};

// =============================================================================
// Revision
// =============================================================================

/// Number of recognized actions applied to a resource.
///
/// Ignored actions do not advance it, so two reads with the same revision
/// saw the same state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(pub u64);

impl Revision {
    /// No action applied yet.
    pub const NONE: Revision = Revision(0);

    /// The revision after this one.
    pub fn next(self) -> Self {
        Revision(self.0.saturating_add(1))
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "r{}", self.0)
        }
    }
}

// =============================================================================
// Slots
// =============================================================================

struct Entry<T> {
    state: ResourceState<T>,
    revision: Revision,
}

struct Slot<T> {
    bundle: ResourceBundle<T>,
    entry: RwLock<Entry<T>>,
}

impl<T: Payload> Slot<T> {
    fn new(bundle: ResourceBundle<T>) -> Self {
        let state = bundle.initial_state();
        Self {
            bundle,
            entry: RwLock::new(Entry {
                state,
                revision: Revision::NONE,
            }),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Entry<T>) -> R) -> R {
        let entry = self.entry.read().unwrap_or_else(PoisonError::into_inner);
        f(&entry)
    }
}

/// Type-erased slot so one store can hold resources of different payload
/// types.
trait AnySlot: Send + Sync {
    fn name(&self) -> &str;

    fn payload_type(&self) -> TypeId;

    fn persist_actions(&self) -> &[String];

    /// Apply a type-erased `Action<T>`. Returns the new revision if the
    /// action was recognized.
    fn apply_any(&self, action: &dyn Any, now: Timestamp) -> Option<Revision>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Payload> AnySlot for Slot<T> {
    fn name(&self) -> &str {
        self.bundle.name()
    }

    fn payload_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn persist_actions(&self) -> &[String] {
        self.bundle.persist_actions()
    }

    fn apply_any(&self, action: &dyn Any, now: Timestamp) -> Option<Revision> {
        let action = action.downcast_ref::<Action<T>>()?;
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        let next = self.bundle.try_reduce(&entry.state, action, now)?;
        entry.state = next;
        entry.revision = entry.revision.next();
        Some(entry.revision)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// =============================================================================
// Store
// =============================================================================

struct StoreInner {
    slots: Vec<Arc<dyn AnySlot>>,
    dispatch_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn Connectivity>,
    bus: ActionBus,
    persist_actions: Vec<String>,
}

/// Shared handle to the resource states. Clones point at the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Start building a store.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Apply `action` to every resource and publish it.
    ///
    /// Returns whether any resource recognized the action.
    pub fn dispatch<T: Payload>(&self, action: Action<T>) -> bool {
        self.dispatch_correlated(CorrelationId::new(), action)
    }

    /// Like [`dispatch`](Self::dispatch), with the correlation id placed on the
    /// published envelope.
    pub fn dispatch_correlated<T: Payload>(&self, cid: CorrelationId, action: Action<T>) -> bool {
        let _serialized = self
            .inner
            .dispatch_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let now = self.inner.clock.now();
        let mut recognized = false;
        for slot in &self.inner.slots {
            if let Some(revision) = slot.apply_any(&action, now) {
                recognized = true;
                debug!(
                    resource = slot.name(),
                    action = %action.action_type,
                    %revision,
                    %now,
                    %cid,
                    "action applied"
                );
            }
        }
        if !recognized {
            trace!(action = %action.action_type, %cid, "no resource recognized action");
        }

        self.inner
            .bus
            .publish(ActionEnvelope::new(cid, action, recognized));
        recognized
    }

    /// Typed view of the resource registered under `name`.
    pub fn resource<T: Payload>(&self, name: &str) -> Result<ResourceHandle<T>, StoreError> {
        let slot = self
            .inner
            .slots
            .iter()
            .find(|slot| slot.name() == name)
            .ok_or_else(|| StoreError::UnknownResource {
                name: name.to_string(),
            })?;

        let mismatch = || StoreError::PayloadMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
        };
        if slot.payload_type() != TypeId::of::<T>() {
            return Err(mismatch());
        }
        let slot = Arc::clone(slot)
            .into_any()
            .downcast::<Slot<T>>()
            .map_err(|_| mismatch())?;

        Ok(ResourceHandle {
            store: self.clone(),
            slot,
        })
    }

    /// Names of the registered resources, in registration order.
    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.inner.slots.iter().map(|slot| slot.name())
    }

    /// Union of every resource's persistence allow-list.
    pub fn persist_actions(&self) -> &[String] {
        &self.inner.persist_actions
    }

    /// Current time from the store's clock.
    pub fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    /// Current answer from the store's connectivity provider.
    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    /// The bus every dispatched action is published on.
    pub fn bus(&self) -> &ActionBus {
        &self.inner.bus
    }
}

impl<T: Payload> Dispatch<T> for Store {
    fn dispatch(&self, action: Action<T>) {
        Store::dispatch(self, action);
    }

    fn store(&self) -> Option<&Store> {
        Some(self)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("resources", &self.resource_names().collect::<Vec<_>>())
            .field("persist_actions", &self.inner.persist_actions)
            .field("bus", &self.inner.bus)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Store`].
///
/// Defaults to the system clock, always-online connectivity, and a fresh bus.
pub struct StoreBuilder {
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn Connectivity>,
    bus: ActionBus,
    slots: Vec<Arc<dyn AnySlot>>,
}

impl StoreBuilder {
    /// Empty builder with the system clock and always-online connectivity.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            connectivity: Arc::new(AlwaysOnline),
            bus: ActionBus::new(),
            slots: Vec::new(),
        }
    }

    /// Replace the clock.
    pub fn with_clock<C: Clock>(self, clock: C) -> Self {
        self.with_clock_arc(Arc::new(clock))
    }

    /// Share a clock the host keeps driving, e.g. an `Arc<ManualClock>`.
    pub fn with_clock_arc(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the connectivity provider.
    pub fn with_connectivity<C: Connectivity>(self, connectivity: C) -> Self {
        self.with_connectivity_arc(Arc::new(connectivity))
    }

    /// Share a connectivity provider the host keeps updating.
    pub fn with_connectivity_arc(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Use an existing bus instead of creating a new one.
    pub fn with_bus(mut self, bus: ActionBus) -> Self {
        self.bus = bus;
        self
    }

    /// Register a resource. Resources receive actions in registration order.
    pub fn with_resource<T: Payload>(mut self, bundle: ResourceBundle<T>) -> Self {
        self.slots.push(Arc::new(Slot::new(bundle)));
        self
    }

    /// Fails if two resources share a name.
    pub fn build(self) -> Result<Store, StoreError> {
        for (i, slot) in self.slots.iter().enumerate() {
            if self.slots[..i].iter().any(|earlier| earlier.name() == slot.name()) {
                return Err(StoreError::DuplicateResource {
                    name: slot.name().to_string(),
                });
            }
        }

        let mut persist_actions: Vec<String> = Vec::new();
        for action_type in self.slots.iter().flat_map(|slot| slot.persist_actions()) {
            if !persist_actions.contains(action_type) {
                persist_actions.push(action_type.clone());
            }
        }

        debug!(
            resources = self.slots.len(),
            persist_actions = persist_actions.len(),
            "store built"
        );

        Ok(Store {
            inner: Arc::new(StoreInner {
                slots: self.slots,
                dispatch_lock: Mutex::new(()),
                clock: self.clock,
                connectivity: self.connectivity,
                bus: self.bus,
                persist_actions,
            }),
        })
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Resource handle
// =============================================================================

/// Typed view of one resource in a [`Store`].
///
/// Queries evaluate against the store's clock and connectivity at the time
/// of the call.
pub struct ResourceHandle<T> {
    store: Store,
    slot: Arc<Slot<T>>,
}

impl<T> ResourceHandle<T> {
    /// The resource's name.
    pub fn name(&self) -> &str {
        self.slot.bundle.name()
    }

    /// The bundle registered under this name.
    pub fn bundle(&self) -> &ResourceBundle<T> {
        &self.slot.bundle
    }

    /// The store this handle reads from.
    pub fn store(&self) -> &Store {
        &self.store
    }
}

impl<T: Payload> ResourceHandle<T> {
    /// Copy of the current state.
    pub fn raw(&self) -> ResourceState<T> {
        self.slot.read(|entry| entry.state.clone())
    }

    /// Copy of the current data, if any fetch has succeeded.
    pub fn data(&self) -> Option<T> {
        self.slot.read(|entry| entry.state.data.clone())
    }

    /// Bumped on every recognized action.
    pub fn revision(&self) -> Revision {
        self.slot.read(|entry| entry.revision)
    }

    /// Whether a fetch is in flight.
    pub fn is_loading(&self) -> bool {
        self.slot.read(|entry| entry.state.is_loading)
    }

    /// Whether the latest failure was marked permanent.
    pub fn failed_permanently(&self) -> bool {
        self.slot.read(|entry| entry.state.failed_permanently)
    }

    /// The manual stale mark.
    pub fn is_marked_stale(&self) -> bool {
        self.slot.read(|entry| entry.state.stale)
    }

    /// Time of the most recent failure since the last success.
    pub fn last_error(&self) -> Option<Timestamp> {
        self.slot.read(|entry| entry.state.last_error())
    }

    /// Time-based staleness at the store's current time.
    pub fn is_stale(&self) -> bool {
        let now = self.store.now();
        self.slot.read(|entry| self.slot.bundle.select_is_stale(&entry.state, now))
    }

    /// Whether the last failure is still inside the retry window.
    pub fn is_waiting_to_retry(&self) -> bool {
        let now = self.store.now();
        self.slot
            .read(|entry| self.slot.bundle.select_is_waiting_to_retry(&entry.state, now))
    }

    /// The refetch decision at the store's current time and connectivity.
    pub fn refetch_decision(&self) -> RefetchDecision {
        let now = self.store.now();
        let online = self.store.is_online();
        self.slot.read(|entry| {
            self.slot
                .bundle
                .select_refetch_decision(&entry.state, now, online)
        })
    }

    /// Shorthand for `refetch_decision().should_refetch()`.
    pub fn should_refetch(&self) -> bool {
        self.refetch_decision().should_refetch()
    }

    /// Dispatch MAKE_STALE for this resource.
    pub fn mark_as_stale(&self) {
        self.store.dispatch(self.slot.bundle.mark_as_stale());
    }

    /// One fetch attempt against the store.
    ///
    /// The future owns what it needs, so it can be spawned. The capability's
    /// [`FetchContext`](crate::FetchContext) carries this store.
    pub fn fetch(&self) -> impl Future<Output = ()> + Send + 'static {
        let store = self.store.clone();
        let slot = Arc::clone(&self.slot);
        async move { slot.bundle.fetch(&store).await }
    }

    /// The fetch future if the refetch decision says yes, otherwise `None`.
    pub fn fetch_if_needed(&self) -> Option<impl Future<Output = ()> + Send + 'static> {
        let decision = self.refetch_decision();
        if decision.should_refetch() {
            debug!(resource = self.name(), %decision, "refetch needed");
            Some(self.fetch())
        } else {
            trace!(resource = self.name(), %decision, "refetch skipped");
            None
        }
    }
}

impl<T> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("name", &self.slot.bundle.name())
            .finish_non_exhaustive()
    }
}

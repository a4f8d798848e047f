//! Broadcast bus for applied actions.
//!
//! After the store has reduced an action into every resource, it publishes
//! an [`ActionEnvelope`] here. Subscribers are observers: UI refresh hooks,
//! persistence writers, audit logs. They cannot change what was applied.
//!
//! # Guarantees
//!
//! - **At-most-once delivery**: Slow receivers may miss envelopes
//! - **In-memory only**: Envelopes are not persisted
//! - **No replay**: Lagged receivers get `RecvError::Lagged`
//! - **Dispatch order**: Envelopes arrive in the order actions were applied

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::action::Action;

/// Default channel capacity for the action bus.
const DEFAULT_CAPACITY: usize = 1024;

/// Correlation ID attached to every published envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Sentinel for envelopes that were not correlated.
    pub const NONE: Self = Self(Uuid::nil());

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_none(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// An applied action as seen by bus subscribers.
#[derive(Clone)]
pub struct ActionEnvelope {
    pub cid: CorrelationId,
    /// Namespaced identifier, e.g. `FETCH_USER_SUCCESS`.
    pub action_type: Arc<str>,
    /// Whether any resource recognized the action.
    pub recognized: bool,
    /// Type ID of the `Action<T>` payload.
    pub type_id: TypeId,
    pub payload: Arc<dyn Any + Send + Sync>,
}

impl ActionEnvelope {
    pub fn new<T: Send + Sync + 'static>(
        cid: CorrelationId,
        action: Action<T>,
        recognized: bool,
    ) -> Self {
        Self {
            cid,
            action_type: Arc::from(action.action_type.as_str()),
            recognized,
            type_id: TypeId::of::<Action<T>>(),
            payload: Arc::new(action),
        }
    }

    /// Downcast to the typed action, if it carries payloads of type `T`.
    pub fn action<T: 'static>(&self) -> Option<&Action<T>> {
        self.payload.downcast_ref()
    }

    /// Whether the action type appears in a persistence allow-list.
    pub fn is_persistable<S: AsRef<str>>(&self, allow_list: &[S]) -> bool {
        allow_list
            .iter()
            .any(|allowed| allowed.as_ref() == &*self.action_type)
    }
}

impl fmt::Debug for ActionEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionEnvelope")
            .field("cid", &self.cid)
            .field("action_type", &self.action_type)
            .field("recognized", &self.recognized)
            .finish_non_exhaustive()
    }
}

/// Broadcast channel of applied actions.
///
/// Clones share the same channel.
#[derive(Clone)]
pub struct ActionBus {
    sender: broadcast::Sender<ActionEnvelope>,
}

impl ActionBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// The capacity determines how many envelopes can be buffered before
    /// slow receivers start lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an envelope. Returns the number of receivers reached.
    pub fn publish(&self, envelope: ActionEnvelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Envelopes published before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ActionEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ActionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActionBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    use crate::action::ActionBody;

    fn success(payload: Value) -> Action<Value> {
        Action::new(
            "FETCH_USER_SUCCESS",
            ActionBody::Success {
                payload,
                merge: false,
            },
        )
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = ActionBus::new();
        let mut receiver = bus.subscribe();

        let cid = CorrelationId::new();
        bus.publish(ActionEnvelope::new(cid, success(json!(42)), true));

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.cid, cid);
        assert_eq!(&*envelope.action_type, "FETCH_USER_SUCCESS");
        assert!(envelope.recognized);
        assert_eq!(
            envelope.action::<Value>().and_then(|a| a.payload()),
            Some(&json!(42))
        );
    }

    #[tokio::test]
    async fn test_wrong_payload_type_does_not_downcast() {
        let bus = ActionBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(ActionEnvelope::new(
            CorrelationId::new(),
            success(json!(1)),
            true,
        ));

        let envelope = receiver.recv().await.unwrap();
        assert!(envelope.action::<String>().is_none());
        assert_eq!(envelope.type_id, TypeId::of::<Action<Value>>());
    }

    #[tokio::test]
    async fn test_publish_returns_receiver_count() {
        let bus = ActionBus::new();
        let envelope = || ActionEnvelope::new(CorrelationId::new(), success(json!(1)), true);

        assert_eq!(bus.publish(envelope()), 0);

        let _r1 = bus.subscribe();
        assert_eq!(bus.publish(envelope()), 1);

        let _r2 = bus.subscribe();
        assert_eq!(bus.publish(envelope()), 2);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_envelopes() {
        let bus = ActionBus::new();
        bus.publish(ActionEnvelope::new(
            CorrelationId::new(),
            Action::<Value>::empty("FETCH_USER_START"),
            true,
        ));

        let mut receiver = bus.subscribe();
        bus.publish(ActionEnvelope::new(
            CorrelationId::new(),
            success(json!(2)),
            true,
        ));

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(&*envelope.action_type, "FETCH_USER_SUCCESS");
    }

    #[test]
    fn test_is_persistable() {
        let envelope = ActionEnvelope::new(CorrelationId::NONE, success(json!(1)), true);
        assert!(envelope.is_persistable(&["FETCH_USER_SUCCESS"]));
        assert!(!envelope.is_persistable(&["FETCH_POSTS_SUCCESS".to_string()]));
    }

    #[test]
    fn test_correlation_display() {
        assert_eq!(CorrelationId::NONE.to_string(), "NONE");
        assert_ne!(CorrelationId::new().to_string(), "NONE");
    }

    #[test]
    fn test_debug_impl() {
        let bus = ActionBus::new();
        let _r1 = bus.subscribe();
        let debug_str = format!("{:?}", bus);
        assert!(debug_str.contains("ActionBus"));
        assert!(debug_str.contains("subscriber_count"));
    }
}

//! Event bus bridge (C8): lets external hooks observe or mutate gameplay packets before they are
//! forwarded, without the state machine knowing anything about how a hook is implemented.
//!
//! Hooks are duck-typed in the system this proxy is modelled on — a handler can return a bool, a
//! string or a mapping, and each event interprets the return differently. [`EventOutcome`] makes
//! that explicit as a tagged variant instead of threading dynamic types through the state machine;
//! §4.5 documents, per event, which of the four variants are meaningful.

use crate::protocol::packets::Slot;
use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

/// The result of firing an event through the bus.
///
/// Not every event interprets every variant — `player.dig` only ever looks at `Allow`/`Deny`,
/// while `player.rawMessage` also accepts `Replace`/`Patch`. See §4.5 for the per-event table.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Forward the triggering packet unchanged.
    Allow,
    /// Drop the triggering packet.
    Deny,
    /// Replace a single canonical field (documented per event) with this string.
    Replace(String),
    /// Merge these fields into the event payload, field-wise.
    Patch(Map<String, Value>),
}

impl EventOutcome {
    pub fn is_denied(&self) -> bool {
        matches!(self, EventOutcome::Deny)
    }
}

/// A read-only snapshot of the player that triggered an event, handed to hooks instead of direct
/// access to [`crate::session::Session`] fields.
#[derive(Debug, Clone)]
pub struct Player {
    pub username: String,
    pub uuid: Uuid,
    pub gamemode: i32,
    held_item: Option<Slot>,
}

impl Player {
    pub fn new(username: String, uuid: Uuid, gamemode: i32) -> Self {
        Self {
            username,
            uuid,
            gamemode,
            held_item: None,
        }
    }

    pub fn with_held_item(mut self, item: Option<Slot>) -> Self {
        self.held_item = item;
        self
    }

    pub fn get_held_item(&self) -> Option<&Slot> {
        self.held_item.as_ref()
    }

    /// Builds the minimal JSON chat component vanilla clients accept for a plain string message.
    pub fn chat_payload(message: &str) -> Value {
        Value::Object(Map::from_iter([(
            "text".to_string(),
            Value::String(message.to_string()),
        )]))
    }
}

/// Registered hooks observe gameplay events by name; the bus asks each in turn and folds their
/// answers (first `Deny`/`Replace`/`Patch` wins, matching how a single plugin hook would be
/// consulted in the system this models).
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn fire(&self, event: &str, player: &Player, payload: Map<String, Value>)
        -> EventOutcome;
}

/// The default bus: every event is allowed. Used when no plugin hooks are registered.
#[derive(Debug, Default)]
pub struct NoopEventBus;

#[async_trait]
impl EventBus for NoopEventBus {
    async fn fire(
        &self,
        _event: &str,
        _player: &Player,
        _payload: Map<String, Value>,
    ) -> EventOutcome {
        EventOutcome::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyEverything;

    #[async_trait]
    impl EventBus for DenyEverything {
        async fn fire(
            &self,
            _event: &str,
            _player: &Player,
            _payload: Map<String, Value>,
        ) -> EventOutcome {
            EventOutcome::Deny
        }
    }

    #[tokio::test]
    async fn noop_bus_always_allows() {
        let bus = NoopEventBus;
        let player = Player::new("Notch".to_string(), Uuid::nil(), 0);
        let outcome = bus.fire("player.dig", &player, Map::new()).await;
        assert_eq!(outcome, EventOutcome::Allow);
    }

    #[tokio::test]
    async fn denying_bus_reports_denied() {
        let bus = DenyEverything;
        let player = Player::new("Notch".to_string(), Uuid::nil(), 0);
        let outcome = bus.fire("player.slotClick", &player, Map::new()).await;
        assert!(outcome.is_denied());
    }

    #[test]
    fn chat_payload_wraps_plain_text() {
        let payload = Player::chat_payload("hello");
        assert_eq!(payload["text"], Value::String("hello".to_string()));
    }
}

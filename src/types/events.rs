//! Events emitted by a running session.
//!
//! The dispatcher hands decoded traffic to registered handlers through the
//! `Event` sum. Handlers run on the message queue worker and must not block.

use std::sync::RwLock;

use crate::error::ErrorKind;
use crate::proto::e2e;
use crate::types::Jid;

/// Emitted once the Noise handshake finishes and the stream is live.
#[derive(Debug, Clone)]
pub struct Connected {
    /// Identity of this connect; late callbacks from an older connect
    /// carry a different id and are discarded.
    pub session_id: uuid::Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectReason {
    /// Close requested locally.
    Requested,
    /// The transport failed or the peer went away.
    TransportError(String),
    /// The handshake failed before the stream came up.
    HandshakeFailure(String),
}

#[derive(Debug, Clone)]
pub struct Disconnected {
    pub reason: DisconnectReason,
}

/// Delivery metadata for a decrypted message.
#[derive(Debug, Clone)]
pub struct MessageInfo {
    pub id: String,
    /// Device Jid of the sending device.
    pub sender: Jid,
    /// Chat the message belongs to (sender for 1:1, group Jid for groups).
    pub chat: Jid,
    pub is_from_me: bool,
    pub is_group: bool,
    pub timestamp: i64,
    pub push_name: Option<String>,
}

/// A fully decrypted inbound message.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub info: MessageInfo,
    pub message: e2e::Message,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptType {
    Delivered,
    Read,
    ReadSelf,
    Played,
    Sender,
    Inactive,
    Retry,
}

impl ReceiptType {
    pub fn from_wire(s: Option<&str>) -> Self {
        match s {
            Some("read") => ReceiptType::Read,
            Some("read-self") => ReceiptType::ReadSelf,
            Some("played") => ReceiptType::Played,
            Some("sender") => ReceiptType::Sender,
            Some("inactive") => ReceiptType::Inactive,
            Some("retry") => ReceiptType::Retry,
            _ => ReceiptType::Delivered,
        }
    }

    pub fn as_wire(&self) -> Option<&'static str> {
        match self {
            ReceiptType::Delivered => None,
            ReceiptType::Read => Some("read"),
            ReceiptType::ReadSelf => Some("read-self"),
            ReceiptType::Played => Some("played"),
            ReceiptType::Sender => Some("sender"),
            ReceiptType::Inactive => Some("inactive"),
            ReceiptType::Retry => Some("retry"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReceiptEvent {
    pub message_ids: Vec<String>,
    pub chat: Jid,
    pub sender: Jid,
    pub receipt_type: ReceiptType,
    pub timestamp: i64,
}

/// A chat surfaced by a history sync payload.
#[derive(Debug, Clone)]
pub struct NewChat {
    pub jid: Jid,
    pub name: Option<String>,
    pub last_message_time: i64,
}

/// Emitted when a history sync chunk set is finalized (push-name chunk
/// received or the idle window elapsed).
#[derive(Debug, Clone)]
pub struct HistorySyncFinished {
    pub chunks: u32,
}

/// A chat/contact/setting action carried by an app-state mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatAction {
    Mute { muted: bool, end: i64 },
    Pin(bool),
    Star { message_id: String, starred: bool },
    Archive(bool),
    PushName(String),
}

/// An applied app-state mutation, fired on both remote patches and the
/// local pull-loopback after a push.
#[derive(Debug, Clone)]
pub struct ChatActionEvent {
    pub chat: Option<Jid>,
    pub action: ChatAction,
    /// True when this apply came from a snapshot replay rather than an
    /// incremental patch.
    pub from_full_sync: bool,
}

/// Non-fatal and fatal failures surfaced to the embedder.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub detail: String,
}

/// Everything a session can report.
#[derive(Debug, Clone)]
pub enum Event {
    Connected(Connected),
    Disconnected(Disconnected),
    Message(MessageEvent),
    Receipt(ReceiptEvent),
    NewChat(NewChat),
    HistorySyncFinished(HistorySyncFinished),
    ChatAction(ChatActionEvent),
    Error(ErrorEvent),
}

/// Registered event callback.
pub type EventHandler = Box<dyn Fn(Event) + Send + Sync>;

/// Handler registry shared between the dispatcher and its workers.
#[derive(Default)]
pub struct EventHandlers {
    handlers: RwLock<Vec<EventHandler>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, handler: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.handlers.write().unwrap().push(Box::new(handler));
    }

    pub fn emit(&self, event: Event) {
        for handler in self.handlers.read().unwrap().iter() {
            handler(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_receipt_type_wire_mapping() {
        assert_eq!(ReceiptType::from_wire(Some("read")), ReceiptType::Read);
        assert_eq!(ReceiptType::from_wire(None), ReceiptType::Delivered);
        assert_eq!(ReceiptType::Read.as_wire(), Some("read"));
        assert_eq!(ReceiptType::Delivered.as_wire(), None);
    }

    #[test]
    fn test_handlers_fan_out() {
        let handlers = EventHandlers::new();
        let seen = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let seen = seen.clone();
            handlers.register(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }
        handlers.emit(Event::Disconnected(Disconnected {
            reason: DisconnectReason::Requested,
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}

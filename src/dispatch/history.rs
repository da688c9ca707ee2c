//! History sync assembly.
//!
//! The primary streams chat history to a fresh companion as a sequence of
//! zlib-deflated chunks referenced from protocol messages. Conversations
//! surface as `NewChat` events; the stream finalizes on a push-name chunk
//! or after an idle window with no further chunks.

use std::io::Read;
use std::sync::Arc;

use log::debug;
use prost::Message as ProstMessage;

use crate::error::{Error, Result};
use crate::proto::e2e::{history_sync_type, HistorySync};
use crate::types::{Event, EventHandlers, HistorySyncFinished, Jid, NewChat};

/// Inflate and decode one history chunk.
pub fn parse_history_blob(data: &[u8]) -> Result<HistorySync> {
    let mut inflated = Vec::new();
    flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut inflated)
        .map_err(|e| Error::Protocol(format!("history chunk zlib: {}", e)))?;
    Ok(HistorySync::decode(inflated.as_slice())?)
}

/// Deflate a history payload (scripted peers and loopback tests).
pub fn build_history_blob(sync: &HistorySync) -> Vec<u8> {
    use std::io::Write;
    let mut deflater =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    deflater
        .write_all(&sync.encode_to_vec())
        .expect("vec write cannot fail");
    deflater.finish().expect("vec write cannot fail")
}

/// Tracks one history sync stream across chunks.
pub struct HistoryAssembler {
    handlers: Arc<EventHandlers>,
    chunks: u32,
    finalized: bool,
}

impl HistoryAssembler {
    pub fn new(handlers: Arc<EventHandlers>) -> Self {
        Self {
            handlers,
            chunks: 0,
            finalized: false,
        }
    }

    /// Feed one decoded chunk: fires `NewChat` per conversation and
    /// finalizes on the trailing push-name chunk.
    pub fn on_chunk(&mut self, sync: &HistorySync) {
        if self.finalized {
            debug!("history chunk after finalization; restarting stream");
            self.finalized = false;
            self.chunks = 0;
        }
        self.chunks += 1;

        for conversation in &sync.conversations {
            let Some(jid) = conversation.id.as_deref().and_then(|s| s.parse::<Jid>().ok())
            else {
                continue;
            };
            self.handlers.emit(Event::NewChat(NewChat {
                jid,
                name: conversation.name.clone(),
                last_message_time: conversation.last_msg_timestamp.unwrap_or(0) as i64,
            }));
        }

        if sync.sync_type == Some(history_sync_type::PUSH_NAME) {
            self.finalize();
        }
    }

    /// Idle-window expiry with no further chunks.
    pub fn on_idle(&mut self) {
        if !self.finalized && self.chunks > 0 {
            self.finalize();
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn finalize(&mut self) {
        self.finalized = true;
        self.handlers.emit(Event::HistorySyncFinished(HistorySyncFinished {
            chunks: self.chunks,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::e2e::Conversation;
    use std::sync::Mutex;

    fn sync_with_conversations(n: usize, sync_type: i32) -> HistorySync {
        HistorySync {
            sync_type: Some(sync_type),
            conversations: (0..n)
                .map(|i| Conversation {
                    id: Some(format!("{}@s.whatsapp.net", 1000 + i)),
                    name: Some(format!("chat {}", i)),
                    last_msg_timestamp: Some(1_700_000_000 + i as u64),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn capture() -> (Arc<EventHandlers>, Arc<Mutex<Vec<Event>>>) {
        let handlers = Arc::new(EventHandlers::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        handlers.register(move |e| sink.lock().unwrap().push(e));
        (handlers, seen)
    }

    #[test]
    fn test_blob_roundtrip() {
        let sync = sync_with_conversations(2, history_sync_type::RECENT);
        let parsed = parse_history_blob(&build_history_blob(&sync)).unwrap();
        assert_eq!(parsed, sync);
    }

    #[test]
    fn test_five_conversations_fire_five_chats() {
        let (handlers, seen) = capture();
        let mut assembler = HistoryAssembler::new(handlers);
        assembler.on_chunk(&sync_with_conversations(5, history_sync_type::INITIAL_BOOTSTRAP));

        let events = seen.lock().unwrap();
        let chats = events
            .iter()
            .filter(|e| matches!(e, Event::NewChat(_)))
            .count();
        assert_eq!(chats, 5);
        assert!(!assembler.is_finalized());
    }

    #[test]
    fn test_push_name_chunk_finalizes() {
        let (handlers, seen) = capture();
        let mut assembler = HistoryAssembler::new(handlers);
        assembler.on_chunk(&sync_with_conversations(3, history_sync_type::RECENT));
        assembler.on_chunk(&sync_with_conversations(0, history_sync_type::PUSH_NAME));

        assert!(assembler.is_finalized());
        let events = seen.lock().unwrap();
        match events.last().unwrap() {
            Event::HistorySyncFinished(done) => assert_eq!(done.chunks, 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_idle_finalizes_once() {
        let (handlers, seen) = capture();
        let mut assembler = HistoryAssembler::new(handlers);
        assembler.on_chunk(&sync_with_conversations(1, history_sync_type::RECENT));
        assembler.on_idle();
        assembler.on_idle();

        let finishes = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::HistorySyncFinished(_)))
            .count();
        assert_eq!(finishes, 1);
    }

    #[test]
    fn test_idle_without_chunks_is_silent() {
        let (handlers, seen) = capture();
        let mut assembler = HistoryAssembler::new(handlers);
        assembler.on_idle();
        assert!(seen.lock().unwrap().is_empty());
    }
}

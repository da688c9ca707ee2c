//! Core of the WhatsApp end-to-end encrypted messaging protocol.
//!
//! The crate realizes a full session from an unauthenticated transport up
//! to a bidirectional stream of decrypted application messages:
//!
//! - [`transport`]: length-prefixed frames over WebSocket or raw TCP
//! - [`crypto`] + [`socket`]: the Noise XX handshake and the symmetric
//!   frame ciphers it splits into
//! - [`binary`]: the binary node codec carried inside frames
//! - [`signal`]: X3DH, double-ratchet and sender-key encryption
//! - [`appstate`]: the LTHash-based app-state CRDT and its sync engine
//! - [`dispatch`]: the session dispatcher tying the layers together
//!
//! Persistence, media transfer and the high-level fluent API live outside
//! this crate, behind the traits in [`store`].

pub mod appstate;
pub mod binary;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod proto;
pub mod signal;
pub mod socket;
pub mod store;
pub mod transport;
pub mod types;

pub use config::{ClientProfile, Config};
pub use dispatch::Session;
pub use error::{Error, ErrorKind, Result};
pub use store::{Device, MemoryStore};
pub use types::{Event, EventHandlers, Jid};

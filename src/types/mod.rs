//! Core protocol types: addresses and session events.

mod events;
mod jid;

pub use events::*;
pub use jid::*;

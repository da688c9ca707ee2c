//! The Signal protocol subset the service uses: X3DH key agreement, the
//! double ratchet for 1:1 traffic and sender keys for groups.

mod address;
mod group;
mod ratchet;
mod session;
mod store;

pub use address::SignalAddress;
pub use group::{parse_distribution, serialize_distribution, SenderKeyName, SenderKeyRecord};
pub use ratchet::{ChainKey, MessageKeys, RootKey};
pub use session::{
    parse_prekey_message, OutgoingKind, OutgoingMessage, PreKeyBundle, SessionState, SignalError,
    MAX_SKIPPED_KEYS, VERSION_BYTE,
};
pub use store::{SignalSessionStore, PREKEY_REFILL_THRESHOLD};

//! App-state key material.
//!
//! The primary device issues 32-byte sync keys addressed by a 6-byte key
//! id; each key HKDF-expands into the five derived keys the mutation and
//! MAC pipeline consumes.

use crate::crypto::hkdf;

/// Domain-separation info for the expansion.
const EXPAND_INFO: &[u8] = b"WhatsApp Mutation Keys";

/// Length of a key id.
pub const KEY_ID_LENGTH: usize = 6;

/// One shared sync key as distributed in a key-share protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct AppStateSyncKey {
    pub key_id: Vec<u8>,
    pub key_data: [u8; 32],
    pub timestamp: i64,
}

/// The five derived keys of one sync key.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedAppStateKeys {
    pub index: [u8; 32],
    pub value_encryption: [u8; 32],
    pub value_mac: [u8; 32],
    pub snapshot_mac: [u8; 32],
    pub patch_mac: [u8; 32],
}

/// Expand a sync key's 32 bytes of material into the derived key set.
pub fn expand_app_state_keys(key_data: &[u8; 32]) -> ExpandedAppStateKeys {
    let okm = hkdf::derive(None, key_data, EXPAND_INFO, 160);
    let slice = |i: usize| -> [u8; 32] { okm[i * 32..(i + 1) * 32].try_into().unwrap() };
    ExpandedAppStateKeys {
        index: slice(0),
        value_encryption: slice(1),
        value_mac: slice(2),
        snapshot_mac: slice(3),
        patch_mac: slice(4),
    }
}

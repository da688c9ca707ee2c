//! Per-collection CRDT state and the MAC formulas guarding it.
//!
//! `HashState` is the authoritative mutation set: the running LTHash, the
//! monotonically increasing version and the index→value-MAC map. Every
//! patch and snapshot is validated against these MACs before it may touch
//! the state.

use std::collections::HashMap;

use crate::appstate::lthash::{self, LtHash, LTHASH_SIZE};
use crate::crypto::mac::{hmac_sha256, hmac_sha512};

/// The five synchronized collections, in pull order.
pub const ALL_COLLECTIONS: [&str; 5] = [
    "critical_block",
    "critical_unblock_low",
    "regular_high",
    "regular_low",
    "regular",
];

/// App-state errors. MAC mismatches reset the collection and retry; the
/// rest surface as protocol errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppStateError {
    #[error("removal for an index with no previous value")]
    MissingPreviousValue,
    #[error("no app state sync key {0}")]
    KeyNotFound(String),
    #[error("patch mac mismatch")]
    PatchMacMismatch,
    #[error("snapshot mac mismatch")]
    SnapshotMacMismatch,
    #[error("content mac mismatch")]
    ContentMacMismatch,
    #[error("malformed value blob")]
    BadValueBlob,
    #[error("malformed mutation: {0}")]
    BadMutation(String),
    #[error("stale patch version {got}, local already at {local}")]
    StalePatch { got: u64, local: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Set,
    Remove,
}

impl Operation {
    pub fn wire_value(&self) -> i32 {
        match self {
            Operation::Set => crate::proto::sync::syncd_operation::SET,
            Operation::Remove => crate::proto::sync::syncd_operation::REMOVE,
        }
    }

    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            v if v == crate::proto::sync::syncd_operation::SET => Some(Operation::Set),
            v if v == crate::proto::sync::syncd_operation::REMOVE => Some(Operation::Remove),
            _ => None,
        }
    }

    /// The byte mixed into content MACs. Matches the wire enum offset by
    /// one, as the original clients compute it.
    pub fn mac_byte(&self) -> u8 {
        (self.wire_value() + 1) as u8
    }
}

/// One validated mutation in MAC space.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub operation: Operation,
    pub index_mac: Vec<u8>,
    pub value_mac: Vec<u8>,
}

/// Per-collection CRDT snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct HashState {
    pub version: u64,
    pub hash: LtHash,
    pub index_value_map: HashMap<Vec<u8>, Vec<u8>>,
}

impl Default for HashState {
    fn default() -> Self {
        Self {
            version: 0,
            hash: [0u8; LTHASH_SIZE],
            index_value_map: HashMap::new(),
        }
    }
}

impl HashState {
    /// Fold a batch of mutations into the hash and the index map. A SET on
    /// an existing index first folds the previous value out.
    pub fn update_hash(&mut self, mutations: &[Mutation]) -> Result<(), AppStateError> {
        for mutation in mutations {
            if let Some(previous) = self.index_value_map.get(&mutation.index_mac) {
                let expanded = lthash::expand(&[&mutation.index_mac, previous]);
                lthash::sub(&mut self.hash, &expanded);
            } else if mutation.operation == Operation::Remove {
                return Err(AppStateError::MissingPreviousValue);
            }

            match mutation.operation {
                Operation::Set => {
                    let expanded = lthash::expand(&[&mutation.index_mac, &mutation.value_mac]);
                    lthash::add(&mut self.hash, &expanded);
                    self.index_value_map
                        .insert(mutation.index_mac.clone(), mutation.value_mac.clone());
                }
                Operation::Remove => {
                    self.index_value_map.remove(&mutation.index_mac);
                }
            }
        }
        Ok(())
    }

    /// The snapshot MAC binding hash, version and collection name.
    pub fn snapshot_mac(&self, name: &str, snapshot_mac_key: &[u8; 32]) -> [u8; 32] {
        hmac_sha256(
            snapshot_mac_key,
            &[&self.hash, &self.version.to_be_bytes(), name.as_bytes()],
        )
    }
}

/// Value MAC: HMAC-SHA512 over the operation byte, the key id, the
/// encrypted blob and the key-id length, truncated to 32 bytes.
pub fn content_mac(
    operation: Operation,
    encrypted: &[u8],
    key_id: &[u8],
    value_mac_key: &[u8; 32],
) -> [u8; 32] {
    let length = (key_id.len() as u64 + 1).to_be_bytes();
    let full = hmac_sha512(
        value_mac_key,
        &[&[operation.mac_byte()], key_id, encrypted, &length],
    );
    full[..32].try_into().expect("sha512 output is 64 bytes")
}

/// Patch MAC: chains the patch's snapshot MAC with every value MAC, the
/// version and the collection name.
pub fn patch_mac(
    snapshot_mac: &[u8],
    value_macs: &[&[u8]],
    version: u64,
    name: &str,
    patch_mac_key: &[u8; 32],
) -> [u8; 32] {
    let mut parts: Vec<&[u8]> = Vec::with_capacity(value_macs.len() + 3);
    parts.push(snapshot_mac);
    parts.extend_from_slice(value_macs);
    let version_bytes = version.to_be_bytes();
    parts.push(&version_bytes);
    parts.push(name.as_bytes());
    hmac_sha256(patch_mac_key, &parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(index: &[u8], value: &[u8]) -> Mutation {
        Mutation {
            operation: Operation::Set,
            index_mac: index.to_vec(),
            value_mac: value.to_vec(),
        }
    }

    fn remove(index: &[u8], value: &[u8]) -> Mutation {
        Mutation {
            operation: Operation::Remove,
            index_mac: index.to_vec(),
            value_mac: value.to_vec(),
        }
    }

    #[test]
    fn test_set_then_remove_restores_empty_hash() {
        let mut state = HashState::default();
        state.update_hash(&[set(b"idx", b"val")]).unwrap();
        assert_ne!(state.hash, [0u8; LTHASH_SIZE]);
        state.update_hash(&[remove(b"idx", b"val")]).unwrap();
        assert_eq!(state.hash, [0u8; LTHASH_SIZE]);
        assert!(state.index_value_map.is_empty());
    }

    #[test]
    fn test_non_conflicting_mutations_commute() {
        let mut ab = HashState::default();
        ab.update_hash(&[set(b"a", b"1"), set(b"b", b"2")]).unwrap();
        let mut ba = HashState::default();
        ba.update_hash(&[set(b"b", b"2"), set(b"a", b"1")]).unwrap();
        assert_eq!(ab.hash, ba.hash);
        assert_eq!(ab.index_value_map, ba.index_value_map);
    }

    #[test]
    fn test_overwrite_folds_out_previous_value() {
        let mut direct = HashState::default();
        direct.update_hash(&[set(b"idx", b"new")]).unwrap();

        let mut overwritten = HashState::default();
        overwritten
            .update_hash(&[set(b"idx", b"old"), set(b"idx", b"new")])
            .unwrap();

        assert_eq!(direct.hash, overwritten.hash);
        assert_eq!(direct.index_value_map, overwritten.index_value_map);
    }

    #[test]
    fn test_remove_without_previous_value_is_rejected() {
        let mut state = HashState::default();
        assert_eq!(
            state.update_hash(&[remove(b"ghost", b"x")]),
            Err(AppStateError::MissingPreviousValue)
        );
    }

    #[test]
    fn test_snapshot_mac_binds_all_inputs() {
        let key = [0x42; 32];
        let mut state = HashState::default();
        let empty = state.snapshot_mac("regular", &key);
        assert_ne!(empty, state.snapshot_mac("regular_low", &key));

        state.version = 1;
        assert_ne!(empty, state.snapshot_mac("regular", &key));
    }

    #[test]
    fn test_content_mac_depends_on_operation() {
        let key = [7; 32];
        let a = content_mac(Operation::Set, b"blob", b"keyid0", &key);
        let b = content_mac(Operation::Remove, b"blob", b"keyid0", &key);
        assert_ne!(a, b);
    }
}

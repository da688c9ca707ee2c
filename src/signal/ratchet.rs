//! Key schedules for the double ratchet: root key, chain keys and the
//! per-message key material they expand to.

use crate::crypto::{hkdf, mac::hmac_sha256, KeyPair};

const MESSAGE_KEY_SEED: &[u8] = &[0x01];
const CHAIN_KEY_SEED: &[u8] = &[0x02];
const RATCHET_INFO: &[u8] = b"WhisperRatchet";
const TEXT_INFO: &[u8] = b"WhisperText";
const MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";

/// The DH-ratchet root key.
#[derive(Debug, Clone, PartialEq)]
pub struct RootKey(pub [u8; 32]);

impl RootKey {
    /// One DH ratchet turn: derive the next root key and a fresh chain.
    pub fn ratchet(&self, dh_output: &[u8; 32]) -> (RootKey, ChainKey) {
        let (root, chain) = hkdf::derive_pair(Some(&self.0), dh_output, RATCHET_INFO);
        (RootKey(root), ChainKey::new(chain, 0))
    }
}

/// A symmetric ratchet chain: advances one step per message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainKey {
    pub key: [u8; 32],
    pub index: u32,
}

impl ChainKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    /// The chain one step forward.
    pub fn next(&self) -> ChainKey {
        ChainKey::new(hmac_sha256(&self.key, &[CHAIN_KEY_SEED]), self.index + 1)
    }

    /// Key material for the message at this chain position.
    pub fn message_keys(&self) -> MessageKeys {
        let seed = hmac_sha256(&self.key, &[MESSAGE_KEY_SEED]);
        MessageKeys::derive(&seed, self.index)
    }
}

/// Expanded per-message material: CBC key, MAC key and IV.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageKeys {
    pub cipher_key: [u8; 32],
    pub mac_key: [u8; 32],
    pub iv: [u8; 16],
    pub counter: u32,
}

impl MessageKeys {
    fn derive(seed: &[u8; 32], counter: u32) -> Self {
        let okm = hkdf::derive(None, seed, MESSAGE_KEYS_INFO, 80);
        let mut cipher_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        let mut iv = [0u8; 16];
        cipher_key.copy_from_slice(&okm[..32]);
        mac_key.copy_from_slice(&okm[32..64]);
        iv.copy_from_slice(&okm[64..80]);
        Self {
            cipher_key,
            mac_key,
            iv,
            counter,
        }
    }
}

/// X3DH agreement, initiator side. The shared secret concatenates a
/// discontinuity block with the three (optionally four) DH outputs.
pub fn x3dh_initiator(
    our_identity: &KeyPair,
    our_base: &KeyPair,
    their_identity: &[u8; 32],
    their_signed_prekey: &[u8; 32],
    their_one_time: Option<&[u8; 32]>,
) -> (RootKey, ChainKey) {
    let mut secrets = Vec::with_capacity(32 * 5);
    secrets.extend_from_slice(&[0xFF; 32]);
    secrets.extend_from_slice(&our_identity.dh(their_signed_prekey));
    secrets.extend_from_slice(&our_base.dh(their_identity));
    secrets.extend_from_slice(&our_base.dh(their_signed_prekey));
    if let Some(one_time) = their_one_time {
        secrets.extend_from_slice(&our_base.dh(one_time));
    }
    let (root, chain) = hkdf::derive_pair(None, &secrets, TEXT_INFO);
    (RootKey(root), ChainKey::new(chain, 0))
}

/// X3DH agreement, responder side: mirrors the initiator's DH order.
pub fn x3dh_responder(
    our_identity: &KeyPair,
    our_signed_prekey: &KeyPair,
    our_one_time: Option<&KeyPair>,
    their_identity: &[u8; 32],
    their_base: &[u8; 32],
) -> (RootKey, ChainKey) {
    let mut secrets = Vec::with_capacity(32 * 5);
    secrets.extend_from_slice(&[0xFF; 32]);
    secrets.extend_from_slice(&our_signed_prekey.dh(their_identity));
    secrets.extend_from_slice(&our_identity.dh(their_base));
    secrets.extend_from_slice(&our_signed_prekey.dh(their_base));
    if let Some(one_time) = our_one_time {
        secrets.extend_from_slice(&one_time.dh(their_base));
    }
    let (root, chain) = hkdf::derive_pair(None, &secrets, TEXT_INFO);
    (RootKey(root), ChainKey::new(chain, 0))
}

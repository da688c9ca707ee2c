//! Sender-key records for group encryption.
//!
//! Each `(group, sender device)` pair owns one symmetric ratchet seeded by
//! a distribution message and an ed25519 signing key. Group payloads are
//! `version ‖ protobuf ‖ signature[64]`.

use std::collections::VecDeque;

use prost::Message as ProstMessage;
use rand::Rng;

use crate::crypto::{cbc_decrypt, cbc_encrypt, mac::hmac_sha256, verify_signature, KeyPair};
use crate::proto::e2e::{SenderKeyDistributionMessage, SenderKeyMessage};
use crate::signal::session::{SignalError, MAX_SKIPPED_KEYS, VERSION_BYTE};
use crate::signal::SignalAddress;

const MESSAGE_SEED: &[u8] = &[0x01];
const CHAIN_SEED: &[u8] = &[0x02];
/// ed25519 signature length appended to every sender-key message.
const SIGNATURE_LENGTH: usize = 64;

/// Identifies one sender's ratchet within one group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderKeyName {
    pub group_id: String,
    pub sender: SignalAddress,
}

impl SenderKeyName {
    pub fn new(group_id: impl Into<String>, sender: SignalAddress) -> Self {
        Self {
            group_id: group_id.into(),
            sender,
        }
    }
}

impl std::fmt::Display for SenderKeyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.group_id, self.sender)
    }
}

/// Wire form of a distribution message: version byte plus protobuf.
pub fn serialize_distribution(message: &SenderKeyDistributionMessage) -> Vec<u8> {
    let mut wire = Vec::with_capacity(1 + message.encoded_len());
    wire.push(VERSION_BYTE);
    message.encode(&mut wire).expect("vec write cannot fail");
    wire
}

/// Parse a distribution message, tolerating the bare protobuf form.
pub fn parse_distribution(wire: &[u8]) -> Result<SenderKeyDistributionMessage, SignalError> {
    let body = match wire.first() {
        Some(&VERSION_BYTE) => &wire[1..],
        Some(_) => wire,
        None => return Err(SignalError::InvalidMessage("empty distribution".into())),
    };
    SenderKeyDistributionMessage::decode(body)
        .map_err(|e| SignalError::InvalidMessage(e.to_string()))
}

/// Key material for one chain iteration.
#[derive(Debug, Clone, PartialEq)]
struct SenderMessageKey {
    iteration: u32,
    cipher_key: [u8; 32],
    iv: [u8; 16],
}

fn derive_message_key(chain_key: &[u8; 32], iteration: u32) -> SenderMessageKey {
    let cipher_key = hmac_sha256(chain_key, &[MESSAGE_SEED]);
    let iv_full = hmac_sha256(chain_key, &[CHAIN_SEED]);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&iv_full[..16]);
    SenderMessageKey {
        iteration,
        cipher_key,
        iv,
    }
}

fn next_chain_key(chain_key: &[u8; 32]) -> [u8; 32] {
    hmac_sha256(chain_key, &[CHAIN_SEED])
}

/// Per-(group, sender) ratchet record.
#[derive(Debug, Clone)]
pub struct SenderKeyRecord {
    pub id: u32,
    chain_key: [u8; 32],
    iteration: u32,
    signing_public: [u8; 32],
    signing_private: Option<[u8; 32]>,
    skipped: VecDeque<SenderMessageKey>,
}

impl SenderKeyRecord {
    /// Create the local sending record for a group we post to.
    pub fn new_own() -> Self {
        let signing = KeyPair::generate();
        let mut chain_key = [0u8; 32];
        rand::thread_rng().fill(&mut chain_key);
        Self {
            id: rand::thread_rng().gen(),
            chain_key,
            iteration: 0,
            signing_public: signing.ed_public(),
            signing_private: Some(signing.private),
            skipped: VecDeque::new(),
        }
    }

    /// Install a remote sender's record from its distribution message.
    pub fn from_distribution(message: &SenderKeyDistributionMessage) -> Result<Self, SignalError> {
        let chain_key: [u8; 32] = message
            .chain_key
            .as_deref()
            .ok_or_else(|| SignalError::InvalidMessage("distribution missing chain key".into()))?
            .try_into()
            .map_err(|_| SignalError::InvalidMessage("bad chain key length".into()))?;
        let signing_public: [u8; 32] = message
            .signing_key
            .as_deref()
            .ok_or_else(|| SignalError::InvalidMessage("distribution missing signing key".into()))?
            .try_into()
            .map_err(|_| SignalError::InvalidMessage("bad signing key length".into()))?;
        Ok(Self {
            id: message.id.unwrap_or(0),
            chain_key,
            iteration: message.iteration.unwrap_or(0),
            signing_public,
            signing_private: None,
            skipped: VecDeque::new(),
        })
    }

    /// The distribution message announcing this record's current state.
    pub fn distribution(&self) -> SenderKeyDistributionMessage {
        SenderKeyDistributionMessage {
            id: Some(self.id),
            iteration: Some(self.iteration),
            chain_key: Some(self.chain_key.to_vec()),
            signing_key: Some(self.signing_public.to_vec()),
        }
    }

    /// Encrypt one group payload, ratcheting the chain.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SignalError> {
        let signing_private = self
            .signing_private
            .ok_or_else(|| SignalError::InvalidMessage("record is receive-only".into()))?;

        let keys = derive_message_key(&self.chain_key, self.iteration);
        let ciphertext = cbc_encrypt(&keys.cipher_key, &keys.iv, plaintext)
            .map_err(|e| SignalError::Cipher(e.to_string()))?;

        let body = SenderKeyMessage {
            id: Some(self.id),
            iteration: Some(self.iteration),
            ciphertext: Some(ciphertext),
        };
        let mut wire = Vec::with_capacity(1 + body.encoded_len() + SIGNATURE_LENGTH);
        wire.push(VERSION_BYTE);
        body.encode(&mut wire)
            .map_err(|e| SignalError::InvalidMessage(e.to_string()))?;

        let signer = KeyPair::from_private_key(signing_private);
        let signature = signer.sign(&wire);
        wire.extend_from_slice(&signature);

        self.chain_key = next_chain_key(&self.chain_key);
        self.iteration += 1;
        Ok(wire)
    }

    /// Decrypt one group payload: verify the signature, fast-forward to the
    /// claimed iteration (retaining up to the skipped-key bound), decrypt.
    pub fn decrypt(&mut self, wire: &[u8]) -> Result<Vec<u8>, SignalError> {
        if wire.len() < 1 + SIGNATURE_LENGTH {
            return Err(SignalError::InvalidMessage("short sender key message".into()));
        }
        if wire[0] != VERSION_BYTE {
            return Err(SignalError::InvalidMessage(format!(
                "unsupported version byte 0x{:02x}",
                wire[0]
            )));
        }
        let (body, signature) = wire.split_at(wire.len() - SIGNATURE_LENGTH);
        let signature: [u8; 64] = signature.try_into().expect("split at 64");
        if !verify_signature(&self.signing_public, body, &signature) {
            return Err(SignalError::BadSenderKeySignature);
        }

        let message = SenderKeyMessage::decode(&body[1..])
            .map_err(|e| SignalError::InvalidMessage(e.to_string()))?;
        if message.id.unwrap_or(0) != self.id {
            return Err(SignalError::InvalidMessage("sender key id mismatch".into()));
        }
        let iteration = message
            .iteration
            .ok_or_else(|| SignalError::InvalidMessage("missing iteration".into()))?;
        let ciphertext = message
            .ciphertext
            .as_deref()
            .ok_or_else(|| SignalError::InvalidMessage("missing ciphertext".into()))?;

        let keys = self.message_key_for(iteration)?;
        cbc_decrypt(&keys.cipher_key, &keys.iv, ciphertext)
            .map_err(|_| SignalError::Cipher("group decrypt failed".into()))
    }

    fn message_key_for(&mut self, iteration: u32) -> Result<SenderMessageKey, SignalError> {
        if iteration < self.iteration {
            return match self.skipped.iter().position(|k| k.iteration == iteration) {
                Some(i) => Ok(self.skipped.remove(i).expect("position is in range")),
                None => Err(SignalError::DuplicateMessage),
            };
        }
        if (iteration - self.iteration) as usize > MAX_SKIPPED_KEYS {
            return Err(SignalError::CounterTooFarAhead);
        }

        while self.iteration < iteration {
            if self.skipped.len() >= MAX_SKIPPED_KEYS {
                self.skipped.pop_front();
            }
            self.skipped
                .push_back(derive_message_key(&self.chain_key, self.iteration));
            self.chain_key = next_chain_key(&self.chain_key);
            self.iteration += 1;
        }
        let keys = derive_message_key(&self.chain_key, self.iteration);
        self.chain_key = next_chain_key(&self.chain_key);
        self.iteration += 1;
        Ok(keys)
    }

    #[cfg(test)]
    pub(crate) fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked_records() -> (SenderKeyRecord, SenderKeyRecord) {
        let own = SenderKeyRecord::new_own();
        let remote = SenderKeyRecord::from_distribution(&own.distribution()).unwrap();
        (own, remote)
    }

    #[test]
    fn test_group_roundtrip_in_order() {
        let (mut own, mut remote) = linked_records();
        for i in 0..5u8 {
            let wire = own.encrypt(&[i; 10]).unwrap();
            assert_eq!(remote.decrypt(&wire).unwrap(), vec![i; 10]);
        }
    }

    #[test]
    fn test_out_of_order_and_replay() {
        let (mut own, mut remote) = linked_records();
        let first = own.encrypt(b"first").unwrap();
        let second = own.encrypt(b"second").unwrap();

        assert_eq!(remote.decrypt(&second).unwrap(), b"second");
        assert_eq!(remote.decrypt(&first).unwrap(), b"first");
        assert_eq!(remote.decrypt(&first), Err(SignalError::DuplicateMessage));
    }

    #[test]
    fn test_signature_tamper_rejected() {
        let (mut own, mut remote) = linked_records();
        let mut wire = own.encrypt(b"payload").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x80;
        assert_eq!(remote.decrypt(&wire), Err(SignalError::BadSenderKeySignature));
    }

    #[test]
    fn test_receive_only_record_cannot_send() {
        let (_, mut remote) = linked_records();
        assert!(remote.encrypt(b"nope").is_err());
    }

    #[test]
    fn test_fast_forward_bounds_skipped_keys() {
        let (mut own, mut remote) = linked_records();
        let mut kept = None;
        for i in 0..1500u32 {
            let wire = own.encrypt(format!("m{}", i).as_bytes()).unwrap();
            if i == 1499 {
                kept = Some(wire);
            }
        }
        assert_eq!(remote.decrypt(&kept.unwrap()).unwrap(), b"m1499");
        assert_eq!(remote.skipped_key_count(), 1499);
        assert!(remote.skipped_key_count() <= MAX_SKIPPED_KEYS);
    }

    #[test]
    fn test_distribution_snapshot_mid_stream() {
        // A member joining later receives the current chain state and can
        // only read forward from there.
        let mut own = SenderKeyRecord::new_own();
        let early = own.encrypt(b"before join").unwrap();
        let mut late_joiner = SenderKeyRecord::from_distribution(&own.distribution()).unwrap();

        let after = own.encrypt(b"after join").unwrap();
        assert_eq!(late_joiner.decrypt(&after).unwrap(), b"after join");
        assert_eq!(late_joiner.decrypt(&early), Err(SignalError::DuplicateMessage));
    }
}

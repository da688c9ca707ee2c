//! Double-ratchet session state for 1:1 encryption.
//!
//! A session is built either from a fetched prekey bundle (outbound first
//! message) or from an inbound `pkmsg`. Message bodies are
//! `version ‖ protobuf ‖ MAC[8]`, with per-message keys expanded from the
//! current chain position.

use std::collections::VecDeque;

use prost::Message as ProstMessage;

use crate::crypto::{
    cbc_decrypt, cbc_encrypt, mac::hmac_sha256, prefix_public, strip_public, KeyPair, PreKey,
    SignedPreKey,
};
use crate::proto::e2e::{PreKeySignalMessage, SignalMessage};
use crate::signal::ratchet::{x3dh_initiator, x3dh_responder, ChainKey, MessageKeys, RootKey};

/// Upper bound of retained out-of-order message keys per chain.
pub const MAX_SKIPPED_KEYS: usize = 2000;
/// Archived receiving chains kept for late messages from old ratchets.
pub const MAX_RECEIVER_CHAINS: usize = 5;
/// Wire version byte: protocol version 3 in both nibbles.
pub const VERSION_BYTE: u8 = 0x33;
/// Length of the truncated message MAC.
pub const MAC_LENGTH: usize = 8;

/// Errors from the Signal layer. All are scoped to a single message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalError {
    #[error("malformed signal message: {0}")]
    InvalidMessage(String),
    #[error("message counter already consumed")]
    DuplicateMessage,
    #[error("message mac does not verify")]
    MacFailure,
    #[error("prekey signature does not verify")]
    InvalidSignature,
    #[error("no session for address")]
    NoSession,
    #[error("message counter too far ahead")]
    CounterTooFarAhead,
    #[error("sender key signature does not verify")]
    BadSenderKeySignature,
    #[error("cipher failure: {0}")]
    Cipher(String),
}

/// A remote device's published bundle, fetched before the first outbound
/// message. The verification key travels with the DH identity.
#[derive(Debug, Clone)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub identity_key: [u8; 32],
    pub identity_ed: [u8; 32],
    pub signed_prekey_id: u32,
    pub signed_prekey_public: [u8; 32],
    pub signed_prekey_signature: [u8; 64],
    pub one_time_prekey_id: Option<u32>,
    pub one_time_prekey: Option<[u8; 32]>,
}

/// Prekey ids advertised on outbound messages until the peer answers.
#[derive(Debug, Clone)]
pub struct PendingPreKey {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: [u8; 32],
    pub registration_id: u32,
}

#[derive(Debug, Clone)]
struct ReceiverChain {
    ratchet_key: [u8; 32],
    chain: ChainKey,
    skipped: VecDeque<MessageKeys>,
}

impl ReceiverChain {
    fn new(ratchet_key: [u8; 32], chain: ChainKey) -> Self {
        Self {
            ratchet_key,
            chain,
            skipped: VecDeque::new(),
        }
    }
}

/// What an encryption produced: a session-establishing `pkmsg` or a plain
/// `msg`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub kind: OutgoingKind,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingKind {
    PreKey,
    Whisper,
}

impl OutgoingKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            OutgoingKind::PreKey => "pkmsg",
            OutgoingKind::Whisper => "msg",
        }
    }
}

/// Per-remote-device double-ratchet record.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub their_identity: [u8; 32],
    root_key: RootKey,
    sender_ratchet: KeyPair,
    sender_chain: ChainKey,
    previous_counter: u32,
    receiver_chains: VecDeque<ReceiverChain>,
    pending_prekey: Option<PendingPreKey>,
}

impl SessionState {
    /// Build the initiator session from a fetched bundle. Verifies the
    /// signed prekey signature before any DH happens.
    pub fn new_outbound(
        our_identity: &KeyPair,
        registration_id: u32,
        bundle: &PreKeyBundle,
    ) -> Result<Self, SignalError> {
        if !SignedPreKey::verify(
            &bundle.signed_prekey_public,
            &bundle.signed_prekey_signature,
            &bundle.identity_ed,
        ) {
            return Err(SignalError::InvalidSignature);
        }

        let base = KeyPair::generate();
        let (root, incoming_chain) = x3dh_initiator(
            our_identity,
            &base,
            &bundle.identity_key,
            &bundle.signed_prekey_public,
            bundle.one_time_prekey.as_ref(),
        );

        // First sending ratchet turn against their signed prekey.
        let sender_ratchet = KeyPair::generate();
        let (root, sender_chain) = root.ratchet(&sender_ratchet.dh(&bundle.signed_prekey_public));

        let mut receiver_chains = VecDeque::new();
        receiver_chains.push_front(ReceiverChain::new(bundle.signed_prekey_public, incoming_chain));

        Ok(Self {
            their_identity: bundle.identity_key,
            root_key: root,
            sender_ratchet,
            sender_chain,
            previous_counter: 0,
            receiver_chains,
            pending_prekey: Some(PendingPreKey {
                pre_key_id: bundle.one_time_prekey_id,
                signed_pre_key_id: bundle.signed_prekey_id,
                base_key: base.public,
                registration_id,
            }),
        })
    }

    /// Build the responder session from an inbound `pkmsg` header.
    pub fn new_inbound(
        our_identity: &KeyPair,
        our_signed_prekey: &SignedPreKey,
        our_one_time: Option<&PreKey>,
        their_identity: [u8; 32],
        their_base: [u8; 32],
    ) -> Self {
        let (root, chain) = x3dh_responder(
            our_identity,
            &our_signed_prekey.key_pair,
            our_one_time.map(|p| &p.key_pair),
            &their_identity,
            &their_base,
        );
        Self {
            their_identity,
            root_key: root,
            sender_ratchet: our_signed_prekey.key_pair.clone(),
            sender_chain: chain,
            previous_counter: 0,
            receiver_chains: VecDeque::new(),
            pending_prekey: None,
        }
    }

    /// Whether the next outbound message will advertise prekeys. Only the
    /// first message of an outbound-built session does.
    pub fn has_pending_prekey(&self) -> bool {
        self.pending_prekey.is_some()
    }

    /// Encrypt one payload, advancing the sending chain.
    pub fn encrypt(
        &mut self,
        our_identity: &KeyPair,
        plaintext: &[u8],
    ) -> Result<OutgoingMessage, SignalError> {
        let keys = self.sender_chain.message_keys();
        let ciphertext = cbc_encrypt(&keys.cipher_key, &keys.iv, plaintext)
            .map_err(|e| SignalError::Cipher(e.to_string()))?;

        let body = SignalMessage {
            ratchet_key: Some(prefix_public(&self.sender_ratchet.public)),
            counter: Some(keys.counter),
            previous_counter: Some(self.previous_counter),
            ciphertext: Some(ciphertext),
        };

        let mut serialized = Vec::with_capacity(body.encoded_len() + 1 + MAC_LENGTH);
        serialized.push(VERSION_BYTE);
        body.encode(&mut serialized)
            .map_err(|e| SignalError::InvalidMessage(e.to_string()))?;
        let tag = message_mac(
            &keys.mac_key,
            &our_identity.public,
            &self.their_identity,
            &serialized,
        );
        serialized.extend_from_slice(&tag);

        self.sender_chain = self.sender_chain.next();

        match self.pending_prekey.take() {
            Some(pending) => {
                let envelope = PreKeySignalMessage {
                    pre_key_id: pending.pre_key_id,
                    base_key: Some(prefix_public(&pending.base_key)),
                    identity_key: Some(prefix_public(&our_identity.public)),
                    message: Some(serialized),
                    registration_id: Some(pending.registration_id),
                    signed_pre_key_id: Some(pending.signed_pre_key_id),
                };
                let mut data = Vec::with_capacity(envelope.encoded_len() + 1);
                data.push(VERSION_BYTE);
                envelope
                    .encode(&mut data)
                    .map_err(|e| SignalError::InvalidMessage(e.to_string()))?;
                Ok(OutgoingMessage {
                    kind: OutgoingKind::PreKey,
                    data,
                })
            }
            None => Ok(OutgoingMessage {
                kind: OutgoingKind::Whisper,
                data: serialized,
            }),
        }
    }

    /// Decrypt one `msg` body. State only commits when the whole pipeline
    /// (ratchet, MAC, cipher) succeeds, so a forged message cannot corrupt
    /// the session.
    pub fn decrypt(
        &mut self,
        our_identity: &KeyPair,
        wire: &[u8],
    ) -> Result<Vec<u8>, SignalError> {
        let mut trial = self.clone();
        let plaintext = trial.decrypt_inner(our_identity, wire)?;
        // The peer has our session now; stop advertising prekeys.
        trial.pending_prekey = None;
        *self = trial;
        Ok(plaintext)
    }

    fn decrypt_inner(
        &mut self,
        our_identity: &KeyPair,
        wire: &[u8],
    ) -> Result<Vec<u8>, SignalError> {
        if wire.len() < 1 + MAC_LENGTH {
            return Err(SignalError::InvalidMessage("short message".into()));
        }
        if wire[0] != VERSION_BYTE {
            return Err(SignalError::InvalidMessage(format!(
                "unsupported version byte 0x{:02x}",
                wire[0]
            )));
        }
        let (body, received_mac) = wire.split_at(wire.len() - MAC_LENGTH);
        let message = SignalMessage::decode(&body[1..])
            .map_err(|e| SignalError::InvalidMessage(e.to_string()))?;

        let ratchet_key = strip_public(
            message
                .ratchet_key
                .as_deref()
                .ok_or_else(|| SignalError::InvalidMessage("missing ratchet key".into()))?,
        )
        .ok_or_else(|| SignalError::InvalidMessage("bad ratchet key".into()))?;
        let counter = message
            .counter
            .ok_or_else(|| SignalError::InvalidMessage("missing counter".into()))?;
        let ciphertext = message
            .ciphertext
            .as_deref()
            .ok_or_else(|| SignalError::InvalidMessage("missing ciphertext".into()))?;

        let chain_index = self.receiver_chain_for(&ratchet_key)?;
        let keys = Self::chain_keys_at(&mut self.receiver_chains[chain_index], counter)?;

        let expected = message_mac(&keys.mac_key, &self.their_identity, &our_identity.public, body);
        if !crate::crypto::mac::mac_matches(&expected, received_mac) {
            return Err(SignalError::MacFailure);
        }

        cbc_decrypt(&keys.cipher_key, &keys.iv, ciphertext)
            .map_err(|_| SignalError::Cipher("message decrypt failed".into()))
    }

    /// Index of the receiver chain for this ratchet key, performing a DH
    /// ratchet step when the key is new.
    fn receiver_chain_for(&mut self, ratchet_key: &[u8; 32]) -> Result<usize, SignalError> {
        if let Some(i) = self
            .receiver_chains
            .iter()
            .position(|c| &c.ratchet_key == ratchet_key)
        {
            return Ok(i);
        }

        // New remote ratchet key: turn the receiving side, then refresh our
        // sending ratchet against it.
        let (root, recv_chain) = self.root_key.ratchet(&self.sender_ratchet.dh(ratchet_key));
        let new_sender = KeyPair::generate();
        let (root, send_chain) = root.ratchet(&new_sender.dh(ratchet_key));

        self.root_key = root;
        self.previous_counter = self.sender_chain.index;
        self.sender_ratchet = new_sender;
        self.sender_chain = send_chain;

        self.receiver_chains
            .push_front(ReceiverChain::new(*ratchet_key, recv_chain));
        self.receiver_chains.truncate(MAX_RECEIVER_CHAINS);
        Ok(0)
    }

    /// Message keys for `counter` in the given chain, fast-forwarding and
    /// retaining skipped keys (FIFO, bounded) as needed.
    fn chain_keys_at(chain: &mut ReceiverChain, counter: u32) -> Result<MessageKeys, SignalError> {
        if counter < chain.chain.index {
            // Late message: only valid if its key was skipped earlier.
            return match chain.skipped.iter().position(|k| k.counter == counter) {
                Some(i) => Ok(chain.skipped.remove(i).expect("position is in range")),
                None => Err(SignalError::DuplicateMessage),
            };
        }
        if (counter - chain.chain.index) as usize > MAX_SKIPPED_KEYS {
            return Err(SignalError::CounterTooFarAhead);
        }

        while chain.chain.index < counter {
            if chain.skipped.len() >= MAX_SKIPPED_KEYS {
                chain.skipped.pop_front();
            }
            chain.skipped.push_back(chain.chain.message_keys());
            chain.chain = chain.chain.next();
        }
        let keys = chain.chain.message_keys();
        chain.chain = chain.chain.next();
        Ok(keys)
    }

    #[cfg(test)]
    pub(crate) fn skipped_key_count(&self) -> usize {
        self.receiver_chains.iter().map(|c| c.skipped.len()).sum()
    }
}

/// Truncated MAC over both identities and the versioned body.
fn message_mac(
    mac_key: &[u8; 32],
    sender_identity: &[u8; 32],
    receiver_identity: &[u8; 32],
    body: &[u8],
) -> [u8; MAC_LENGTH] {
    let full = hmac_sha256(
        mac_key,
        &[
            &prefix_public(sender_identity),
            &prefix_public(receiver_identity),
            body,
        ],
    );
    full[..MAC_LENGTH].try_into().expect("mac is 32 bytes")
}

/// Parse an inbound `pkmsg` into its parts.
pub struct ParsedPreKeyMessage {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: [u8; 32],
    pub identity_key: [u8; 32],
    pub message: Vec<u8>,
}

pub fn parse_prekey_message(wire: &[u8]) -> Result<ParsedPreKeyMessage, SignalError> {
    if wire.len() < 2 {
        return Err(SignalError::InvalidMessage("short prekey message".into()));
    }
    if wire[0] != VERSION_BYTE {
        return Err(SignalError::InvalidMessage(format!(
            "unsupported version byte 0x{:02x}",
            wire[0]
        )));
    }
    let envelope = PreKeySignalMessage::decode(&wire[1..])
        .map_err(|e| SignalError::InvalidMessage(e.to_string()))?;
    Ok(ParsedPreKeyMessage {
        pre_key_id: envelope.pre_key_id,
        signed_pre_key_id: envelope
            .signed_pre_key_id
            .ok_or_else(|| SignalError::InvalidMessage("missing signed prekey id".into()))?,
        base_key: strip_public(
            envelope
                .base_key
                .as_deref()
                .ok_or_else(|| SignalError::InvalidMessage("missing base key".into()))?,
        )
        .ok_or_else(|| SignalError::InvalidMessage("bad base key".into()))?,
        identity_key: strip_public(
            envelope
                .identity_key
                .as_deref()
                .ok_or_else(|| SignalError::InvalidMessage("missing identity key".into()))?,
        )
        .ok_or_else(|| SignalError::InvalidMessage("bad identity key".into()))?,
        message: envelope
            .message
            .ok_or_else(|| SignalError::InvalidMessage("missing inner message".into()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Peer {
        identity: KeyPair,
        session: SessionState,
    }

    /// A linked Alice/Bob pair with sessions already established.
    fn linked_pair() -> (Peer, Peer) {
        let alice_identity = KeyPair::generate();
        let bob_identity = KeyPair::generate();
        let bob_signed = SignedPreKey::new(1, &bob_identity);
        let bob_one_time = PreKey::new(31);

        let bundle = PreKeyBundle {
            registration_id: 777,
            identity_key: bob_identity.public,
            identity_ed: bob_identity.ed_public(),
            signed_prekey_id: bob_signed.key_id,
            signed_prekey_public: bob_signed.key_pair.public,
            signed_prekey_signature: bob_signed.signature,
            one_time_prekey_id: Some(bob_one_time.key_id),
            one_time_prekey: Some(bob_one_time.key_pair.public),
        };

        let mut alice_session =
            SessionState::new_outbound(&alice_identity, 111, &bundle).unwrap();
        let first = alice_session.encrypt(&alice_identity, b"bootstrap").unwrap();
        assert_eq!(first.kind, OutgoingKind::PreKey);

        let parsed = parse_prekey_message(&first.data).unwrap();
        assert_eq!(parsed.pre_key_id, Some(31));
        let mut bob_session = SessionState::new_inbound(
            &bob_identity,
            &bob_signed,
            Some(&bob_one_time),
            parsed.identity_key,
            parsed.base_key,
        );
        let plaintext = bob_session.decrypt(&bob_identity, &parsed.message).unwrap();
        assert_eq!(plaintext, b"bootstrap");

        (
            Peer {
                identity: alice_identity,
                session: alice_session,
            },
            Peer {
                identity: bob_identity,
                session: bob_session,
            },
        )
    }

    #[test]
    fn test_prekey_bootstrap_and_two_way_traffic() {
        let (mut alice, mut bob) = linked_pair();

        // Bob replies; the DH ratchet turns on Alice's side.
        let reply = bob.session.encrypt(&bob.identity, b"hi alice").unwrap();
        assert_eq!(reply.kind, OutgoingKind::Whisper);
        assert_eq!(
            alice.session.decrypt(&alice.identity, &reply.data).unwrap(),
            b"hi alice"
        );

        // And back again.
        let second = alice.session.encrypt(&alice.identity, b"hi bob").unwrap();
        assert_eq!(second.kind, OutgoingKind::Whisper);
        assert_eq!(
            bob.session.decrypt(&bob.identity, &second.data).unwrap(),
            b"hi bob"
        );
    }

    #[test]
    fn test_prekey_advertisement_stops_after_first_send() {
        let (mut alice, _bob) = linked_pair();
        // The bootstrap consumed the pending prekey; every later message
        // is a plain msg.
        assert!(!alice.session.has_pending_prekey());
        let next = alice.session.encrypt(&alice.identity, b"x").unwrap();
        assert_eq!(next.kind, OutgoingKind::Whisper);
    }

    #[test]
    fn test_out_of_order_delivery_uses_skipped_keys() {
        let (mut alice, mut bob) = linked_pair();

        let m1 = alice.session.encrypt(&alice.identity, b"one").unwrap();
        let m2 = alice.session.encrypt(&alice.identity, b"two").unwrap();
        let m3 = alice.session.encrypt(&alice.identity, b"three").unwrap();

        // Deliver 3, then 1, then 2.
        assert_eq!(bob.session.decrypt(&bob.identity, &m3.data).unwrap(), b"three");
        assert_eq!(bob.session.decrypt(&bob.identity, &m1.data).unwrap(), b"one");
        assert_eq!(bob.session.decrypt(&bob.identity, &m2.data).unwrap(), b"two");
    }

    #[test]
    fn test_replay_is_dropped_as_duplicate() {
        let (mut alice, mut bob) = linked_pair();
        let msg = alice.session.encrypt(&alice.identity, b"once").unwrap();
        bob.session.decrypt(&bob.identity, &msg.data).unwrap();
        assert_eq!(
            bob.session.decrypt(&bob.identity, &msg.data),
            Err(SignalError::DuplicateMessage)
        );
    }

    #[test]
    fn test_tampered_mac_rejected_without_state_change() {
        let (mut alice, mut bob) = linked_pair();
        let msg = alice.session.encrypt(&alice.identity, b"payload").unwrap();
        let mut tampered = msg.data.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert_eq!(
            bob.session.decrypt(&bob.identity, &tampered),
            Err(SignalError::MacFailure)
        );
        // The untampered copy still decrypts: state was not consumed.
        assert_eq!(
            bob.session.decrypt(&bob.identity, &msg.data).unwrap(),
            b"payload"
        );
    }

    #[test]
    fn test_skipped_key_bound_holds_across_a_2001_message_gap() {
        let (mut alice, mut bob) = linked_pair();

        let first = alice.session.encrypt(&alice.identity, b"#0").unwrap();
        for _ in 1..2000 {
            alice.session.encrypt(&alice.identity, b"skipped").unwrap();
        }
        let last = alice.session.encrypt(&alice.identity, b"#2000").unwrap();

        assert_eq!(bob.session.decrypt(&bob.identity, &first.data).unwrap(), b"#0");
        assert_eq!(bob.session.decrypt(&bob.identity, &last.data).unwrap(), b"#2000");
        assert!(bob.session.skipped_key_count() <= MAX_SKIPPED_KEYS);
    }

    #[test]
    fn test_bad_bundle_signature_rejected() {
        let alice_identity = KeyPair::generate();
        let bob_identity = KeyPair::generate();
        let bob_signed = SignedPreKey::new(1, &bob_identity);
        let mut signature = bob_signed.signature;
        signature[0] ^= 0xff;

        let bundle = PreKeyBundle {
            registration_id: 1,
            identity_key: bob_identity.public,
            identity_ed: bob_identity.ed_public(),
            signed_prekey_id: 1,
            signed_prekey_public: bob_signed.key_pair.public,
            signed_prekey_signature: signature,
            one_time_prekey_id: None,
            one_time_prekey: None,
        };
        assert_eq!(
            SessionState::new_outbound(&alice_identity, 1, &bundle).err(),
            Some(SignalError::InvalidSignature)
        );
    }
}

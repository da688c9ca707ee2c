//! Curve25519 key material: DH keypairs, prekeys and signatures.
//!
//! Identity keys sign with the ed25519 form derived from the same 32-byte
//! secret, so a bundle publishes both the DH public and the verification
//! public (the XEdDSA trick of deriving one from the other is not available
//! in the dalek crates).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

/// Prefix byte identifying a DJB-curve public key on the wire.
pub const DJB_TYPE: u8 = 0x05;

/// An X25519 keypair.
#[derive(Clone)]
pub struct KeyPair {
    /// Public key (32 bytes).
    pub public: [u8; 32],
    /// Private key (32 bytes).
    pub private: [u8; 32],
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let mut private = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut private);

        // Clamp per the Curve25519 spec.
        private[0] &= 248;
        private[31] &= 127;
        private[31] |= 64;

        Self::from_private_key(private)
    }

    /// Rebuild a keypair from a stored private key.
    pub fn from_private_key(private: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret);
        Self {
            public: *public.as_bytes(),
            private,
        }
    }

    /// X25519 Diffie-Hellman agreement with a remote public key.
    pub fn dh(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(self.private);
        let shared = secret.diffie_hellman(&PublicKey::from(*their_public));
        *shared.as_bytes()
    }

    /// The ed25519 verification key corresponding to this keypair's secret.
    /// Published alongside the DH public wherever signatures must verify.
    pub fn ed_public(&self) -> [u8; 32] {
        SigningKey::from_bytes(&self.private)
            .verifying_key()
            .to_bytes()
    }

    /// Sign a message with the ed25519 form of this keypair.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signing = SigningKey::from_bytes(&self.private);
        signing.sign(message).to_bytes()
    }

    /// The wire form of the public key: DJB type byte + 32 key bytes.
    pub fn public_prefixed(&self) -> Vec<u8> {
        prefix_public(&self.public)
    }
}

/// Verify an ed25519 signature against a published verification key.
pub fn verify_signature(ed_public: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(ed_public) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(signature)).is_ok()
}

/// Prefix a raw public key with the DJB type byte.
pub fn prefix_public(public: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(33);
    out.push(DJB_TYPE);
    out.extend_from_slice(public);
    out
}

/// Strip the DJB type byte from a wire-form public key.
pub fn strip_public(wire: &[u8]) -> Option<[u8; 32]> {
    match wire.len() {
        33 if wire[0] == DJB_TYPE => wire[1..].try_into().ok(),
        32 => wire.try_into().ok(),
        _ => None,
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public))
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// A one-time prekey: consumed at most once by a remote session build.
#[derive(Debug, Clone)]
pub struct PreKey {
    pub key_pair: KeyPair,
    pub key_id: u32,
}

impl PreKey {
    pub fn new(key_id: u32) -> Self {
        Self {
            key_pair: KeyPair::generate(),
            key_id,
        }
    }
}

/// A signed prekey: rotated per registration, signature checked against the
/// issuer's identity on session build.
#[derive(Debug, Clone)]
pub struct SignedPreKey {
    pub key_pair: KeyPair,
    pub key_id: u32,
    pub signature: [u8; 64],
}

impl SignedPreKey {
    /// Generate a signed prekey under the given identity.
    pub fn new(key_id: u32, identity: &KeyPair) -> Self {
        let key_pair = KeyPair::generate();
        let signature = identity.sign(&prefix_public(&key_pair.public));
        Self {
            key_pair,
            key_id,
            signature,
        }
    }

    /// Verify this prekey's signature against an identity's published
    /// verification key.
    pub fn verify(public: &[u8; 32], signature: &[u8; 64], issuer_ed: &[u8; 32]) -> bool {
        verify_signature(issuer_ed, &prefix_public(public), signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dh_agreement() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        assert_eq!(alice.dh(&bob.public), bob.dh(&alice.public));
    }

    #[test]
    fn test_keypair_rebuild() {
        let kp = KeyPair::generate();
        let again = KeyPair::from_private_key(kp.private);
        assert_eq!(kp.public, again.public);
    }

    #[test]
    fn test_sign_verify() {
        let identity = KeyPair::generate();
        let sig = identity.sign(b"prekey bytes");
        assert!(verify_signature(&identity.ed_public(), b"prekey bytes", &sig));
        assert!(!verify_signature(&identity.ed_public(), b"other bytes", &sig));
    }

    #[test]
    fn test_signed_prekey_verifies() {
        let identity = KeyPair::generate();
        let spk = SignedPreKey::new(1, &identity);
        assert!(SignedPreKey::verify(
            &spk.key_pair.public,
            &spk.signature,
            &identity.ed_public()
        ));
    }

    #[test]
    fn test_public_prefix_roundtrip() {
        let kp = KeyPair::generate();
        let wire = kp.public_prefixed();
        assert_eq!(wire.len(), 33);
        assert_eq!(strip_public(&wire), Some(kp.public));
        assert_eq!(strip_public(&kp.public), Some(kp.public));
        assert_eq!(strip_public(&wire[..20]), None);
    }
}

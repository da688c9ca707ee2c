//! Noise `XX` handshake state for the transport bootstrap.
//!
//! The protocol name, DH curve, hash and AEAD are fixed by the service:
//! `Noise_XX_25519_AESGCM_SHA256`. The 4-byte routing header is mixed in as
//! the prologue, then the three XX messages run `e / e,ee,s,es / s,se` with
//! an encrypted user payload on the final message.

use sha2::{Digest, Sha256};

use crate::crypto::{hkdf, Cipher, KeyPair};

/// Noise protocol name, padded to the 32 bytes the hash initializer needs.
pub const NOISE_PROTOCOL_NAME: &[u8] = b"Noise_XX_25519_AESGCM_SHA256\0\0\0\0";

/// Handshake errors. All of them are fatal for the connection attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NoiseError {
    #[error("handshake message too short")]
    MessageTooShort,
    #[error("handshake decryption failed")]
    DecryptFailed,
    #[error("handshake encryption failed")]
    EncryptFailed,
    #[error("remote key has invalid length")]
    InvalidKeyLength,
    #[error("handshake step out of order")]
    OutOfOrder,
}

/// Initiator-side handshake state machine.
pub struct NoiseHandshake {
    hash: [u8; 32],
    chaining_key: [u8; 32],
    cipher: Option<Cipher>,
    local_static: KeyPair,
    local_ephemeral: KeyPair,
    remote_ephemeral: Option<[u8; 32]>,
    remote_static: Option<[u8; 32]>,
}

impl NoiseHandshake {
    /// Initialize with a prologue (the routing header) and the device's
    /// static Noise keypair. An ephemeral keypair is generated internally.
    pub fn new(prologue: &[u8], local_static: KeyPair) -> Self {
        Self::with_ephemeral(prologue, local_static, KeyPair::generate())
    }

    /// Like [`NoiseHandshake::new`] but with a caller-provided ephemeral,
    /// which makes the whole transcript deterministic.
    pub fn with_ephemeral(prologue: &[u8], local_static: KeyPair, ephemeral: KeyPair) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(NOISE_PROTOCOL_NAME);
        let hash: [u8; 32] = hasher.finalize().into();

        let mut state = Self {
            hash,
            chaining_key: hash,
            cipher: None,
            local_static,
            local_ephemeral: ephemeral,
            remote_ephemeral: None,
            remote_static: None,
        };
        state.mix_hash(prologue);
        state
    }

    /// First message (`-> e`): mixes and returns the ephemeral public key.
    pub fn start(&mut self) -> [u8; 32] {
        let e = self.local_ephemeral.public;
        self.mix_hash(&e);
        e
    }

    /// Second message (`<- e, ee, s, es`). Returns the decrypted server
    /// payload; the caller discards it after certificate-level checks.
    pub fn read_server_hello(
        &mut self,
        server_ephemeral: &[u8],
        static_ciphertext: &[u8],
        payload_ciphertext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        let server_ephemeral: [u8; 32] = server_ephemeral
            .try_into()
            .map_err(|_| NoiseError::InvalidKeyLength)?;
        self.remote_ephemeral = Some(server_ephemeral);
        self.mix_hash(&server_ephemeral);

        // ee
        let dh = self.local_ephemeral.dh(&server_ephemeral);
        self.mix_key(&dh);

        let server_static = self.decrypt_and_hash(static_ciphertext)?;
        let server_static: [u8; 32] = server_static
            .as_slice()
            .try_into()
            .map_err(|_| NoiseError::InvalidKeyLength)?;
        self.remote_static = Some(server_static);

        // es
        let dh = self.local_ephemeral.dh(&server_static);
        self.mix_key(&dh);

        self.decrypt_and_hash(payload_ciphertext)
    }

    /// Third message (`-> s, se`): returns the encrypted static key and the
    /// encrypted user payload, in wire order.
    pub fn write_client_finish(&mut self, payload: &[u8]) -> Result<(Vec<u8>, Vec<u8>), NoiseError> {
        let server_ephemeral = self.remote_ephemeral.ok_or(NoiseError::OutOfOrder)?;

        let local_static_public = self.local_static.public;
        let static_ciphertext = self.encrypt_and_hash(&local_static_public)?;

        // se
        let dh = self.local_static.dh(&server_ephemeral);
        self.mix_key(&dh);

        let payload_ciphertext = self.encrypt_and_hash(payload)?;
        Ok((static_ciphertext, payload_ciphertext))
    }

    /// Split the symmetric state into `(write, read)` transport ciphers.
    /// Both counters start at zero, per direction.
    pub fn finish(self) -> Result<(Cipher, Cipher), NoiseError> {
        if self.remote_static.is_none() {
            return Err(NoiseError::OutOfOrder);
        }
        let (write_key, read_key) = hkdf::derive_pair(Some(&self.chaining_key), &[], b"");
        Ok((Cipher::new(write_key), Cipher::new(read_key)))
    }

    /// The server's static key, available after the second message.
    pub fn remote_static(&self) -> Option<[u8; 32]> {
        self.remote_static
    }

    fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    /// MixKey: ratchet the chaining key and install a fresh cipher whose
    /// nonce counter restarts at zero.
    fn mix_key(&mut self, input: &[u8]) {
        let (chaining_key, cipher_key) = hkdf::derive_pair(Some(&self.chaining_key), input, b"");
        self.chaining_key = chaining_key;
        self.cipher = Some(Cipher::new(cipher_key));
    }

    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let hash = self.hash;
        let cipher = self.cipher.as_mut().ok_or(NoiseError::OutOfOrder)?;
        let ciphertext = cipher
            .encrypt(plaintext, &hash)
            .map_err(|_| NoiseError::EncryptFailed)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if ciphertext.len() < 16 {
            return Err(NoiseError::MessageTooShort);
        }
        let hash = self.hash;
        let cipher = self.cipher.as_mut().ok_or(NoiseError::OutOfOrder)?;
        let plaintext = cipher
            .decrypt(ciphertext, &hash)
            .map_err(|_| NoiseError::DecryptFailed)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }
}

/// Server-side counterpart, used by the crate's tests to drive a scripted
/// peer through the same transcript.
pub struct NoiseResponder {
    hash: [u8; 32],
    chaining_key: [u8; 32],
    cipher: Option<Cipher>,
    local_static: KeyPair,
    local_ephemeral: KeyPair,
    remote_ephemeral: Option<[u8; 32]>,
    remote_static: Option<[u8; 32]>,
}

impl NoiseResponder {
    pub fn new(prologue: &[u8], local_static: KeyPair, ephemeral: KeyPair) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(NOISE_PROTOCOL_NAME);
        let hash: [u8; 32] = hasher.finalize().into();
        let mut state = Self {
            hash,
            chaining_key: hash,
            cipher: None,
            local_static,
            local_ephemeral: ephemeral,
            remote_ephemeral: None,
            remote_static: None,
        };
        state.mix_hash(prologue);
        state
    }

    /// Consume `-> e`, produce `<- e, ee, s, es` parts.
    pub fn accept(
        &mut self,
        client_ephemeral: &[u8],
        payload: &[u8],
    ) -> Result<([u8; 32], Vec<u8>, Vec<u8>), NoiseError> {
        let client_ephemeral: [u8; 32] = client_ephemeral
            .try_into()
            .map_err(|_| NoiseError::InvalidKeyLength)?;
        self.remote_ephemeral = Some(client_ephemeral);
        self.mix_hash(&client_ephemeral);

        let e = self.local_ephemeral.public;
        self.mix_hash(&e);

        let dh = self.local_ephemeral.dh(&client_ephemeral);
        self.mix_key(&dh);

        let local_static_public = self.local_static.public;
        let static_ciphertext = self.encrypt_and_hash(&local_static_public)?;

        let dh = self.local_static.dh(&client_ephemeral);
        self.mix_key(&dh);

        let payload_ciphertext = self.encrypt_and_hash(payload)?;
        Ok((e, static_ciphertext, payload_ciphertext))
    }

    /// Consume `-> s, se`, returning the client's decrypted payload.
    pub fn read_client_finish(
        &mut self,
        static_ciphertext: &[u8],
        payload_ciphertext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        let client_static = self.decrypt_and_hash(static_ciphertext)?;
        let client_static: [u8; 32] = client_static
            .as_slice()
            .try_into()
            .map_err(|_| NoiseError::InvalidKeyLength)?;
        self.remote_static = Some(client_static);

        let dh = self.local_ephemeral.dh(&client_static);
        self.mix_key(&dh);

        self.decrypt_and_hash(payload_ciphertext)
    }

    /// Split into `(write, read)` from the responder's perspective.
    pub fn finish(self) -> Result<(Cipher, Cipher), NoiseError> {
        if self.remote_static.is_none() {
            return Err(NoiseError::OutOfOrder);
        }
        let (client_write, client_read) = hkdf::derive_pair(Some(&self.chaining_key), &[], b"");
        // Mirror of the initiator split.
        Ok((Cipher::new(client_read), Cipher::new(client_write)))
    }

    fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    fn mix_key(&mut self, input: &[u8]) {
        let (chaining_key, cipher_key) = hkdf::derive_pair(Some(&self.chaining_key), input, b"");
        self.chaining_key = chaining_key;
        self.cipher = Some(Cipher::new(cipher_key));
    }

    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let hash = self.hash;
        let cipher = self.cipher.as_mut().ok_or(NoiseError::OutOfOrder)?;
        let ciphertext = cipher
            .encrypt(plaintext, &hash)
            .map_err(|_| NoiseError::EncryptFailed)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if ciphertext.len() < 16 {
            return Err(NoiseError::MessageTooShort);
        }
        let hash = self.hash;
        let cipher = self.cipher.as_mut().ok_or(NoiseError::OutOfOrder)?;
        let plaintext = cipher
            .decrypt(ciphertext, &hash)
            .map_err(|_| NoiseError::DecryptFailed)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROLOGUE: &[u8] = b"WA\x06\x03";

    fn run_handshake() -> (Cipher, Cipher, Cipher, Cipher) {
        let client_static = KeyPair::generate();
        let server_static = KeyPair::generate();

        let mut client = NoiseHandshake::new(PROLOGUE, client_static);
        let mut server = NoiseResponder::new(PROLOGUE, server_static, KeyPair::generate());

        let e = client.start();
        let (se, static_ct, payload_ct) = server.accept(&e, b"server payload").unwrap();
        let payload = client.read_server_hello(&se, &static_ct, &payload_ct).unwrap();
        assert_eq!(payload, b"server payload");

        let (cs_ct, cp_ct) = client.write_client_finish(b"client payload").unwrap();
        let client_payload = server.read_client_finish(&cs_ct, &cp_ct).unwrap();
        assert_eq!(client_payload, b"client payload");

        let (cw, cr) = client.finish().unwrap();
        let (sw, sr) = server.finish().unwrap();
        (cw, cr, sw, sr)
    }

    #[test]
    fn test_full_handshake_and_transport_keys() {
        let (mut client_write, mut client_read, mut server_write, mut server_read) =
            run_handshake();

        let ct = client_write.encrypt(b"to server", &[]).unwrap();
        assert_eq!(server_read.decrypt(&ct, &[]).unwrap(), b"to server");

        let ct = server_write.encrypt(b"to client", &[]).unwrap();
        assert_eq!(client_read.decrypt(&ct, &[]).unwrap(), b"to client");
    }

    #[test]
    fn test_transcript_is_deterministic() {
        let static_key = KeyPair::from_private_key([0x11; 32]);
        let ephemeral = KeyPair::from_private_key([0x22; 32]);

        let mut a = NoiseHandshake::with_ephemeral(
            PROLOGUE,
            KeyPair::from_private_key(static_key.private),
            KeyPair::from_private_key(ephemeral.private),
        );
        let mut b = NoiseHandshake::with_ephemeral(PROLOGUE, static_key, ephemeral);
        assert_eq!(a.start(), b.start());
    }

    #[test]
    fn test_finish_before_exchange_fails() {
        let hs = NoiseHandshake::new(PROLOGUE, KeyPair::generate());
        assert!(hs.finish().is_err());
    }

    #[test]
    fn test_tampered_static_ciphertext_fails() {
        let mut client = NoiseHandshake::new(PROLOGUE, KeyPair::generate());
        let mut server = NoiseResponder::new(PROLOGUE, KeyPair::generate(), KeyPair::generate());

        let e = client.start();
        let (se, mut static_ct, payload_ct) = server.accept(&e, b"").unwrap();
        static_ct[0] ^= 0xff;
        assert_eq!(
            client.read_server_hello(&se, &static_ct, &payload_ct),
            Err(NoiseError::DecryptFailed)
        );
    }
}

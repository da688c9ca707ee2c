//! Symmetric ciphers: the counter-nonce AES-256-GCM used for transport
//! frames, and the AES-256-CBC used inside Signal messages and app-state
//! values.

use aes::Aes256;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Cipher errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CipherError {
    #[error("invalid key")]
    InvalidKey,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    /// The 64-bit frame counter ran out. The session must terminate rather
    /// than reuse a nonce.
    #[error("nonce counter exhausted")]
    NonceExhausted,
}

/// AES-256-GCM with a 96-bit counter nonce, one instance per direction.
pub struct Cipher {
    key: [u8; 32],
    counter: u64,
}

impl Cipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key, counter: 0 }
    }

    /// Encrypt under the next counter nonce.
    pub fn encrypt(&mut self, plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = self.next_nonce()?;
        self.encrypt_with_nonce(plaintext, &nonce, ad)
    }

    /// Decrypt under the next counter nonce.
    pub fn decrypt(&mut self, ciphertext: &[u8], ad: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = self.next_nonce()?;
        self.decrypt_with_nonce(ciphertext, &nonce, ad)
    }

    pub fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; 12],
        ad: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::InvalidKey)?;
        cipher
            .encrypt(
                Nonce::from_slice(nonce),
                aes_gcm::aead::Payload { msg: plaintext, aad: ad },
            )
            .map_err(|_| CipherError::EncryptionFailed)
    }

    pub fn decrypt_with_nonce(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; 12],
        ad: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::InvalidKey)?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                aes_gcm::aead::Payload { msg: ciphertext, aad: ad },
            )
            .map_err(|_| CipherError::DecryptionFailed)
    }

    /// Next 96-bit nonce: 4 zero bytes then the counter big-endian.
    fn next_nonce(&mut self) -> Result<[u8; 12], CipherError> {
        let mut nonce = [0u8; 12];
        nonce[4..].copy_from_slice(&self.counter.to_be_bytes());
        self.counter = self.counter.checked_add(1).ok_or(CipherError::NonceExhausted)?;
        Ok(nonce)
    }

    #[cfg(test)]
    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

/// AES-256-CBC encrypt with PKCS#7 padding.
pub fn cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let enc = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| CipherError::InvalidKey)?;
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// AES-256-CBC decrypt with PKCS#7 padding.
pub fn cbc_decrypt(key: &[u8; 32], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let dec = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| CipherError::InvalidKey)?;
    dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcm_roundtrip() {
        let key = [0xab; 32];
        let mut sender = Cipher::new(key);
        let mut receiver = Cipher::new(key);

        for frame in [&b"first frame"[..], b"second frame", b""] {
            let ct = sender.encrypt(frame, &[]).unwrap();
            assert_eq!(receiver.decrypt(&ct, &[]).unwrap(), frame);
        }
    }

    #[test]
    fn test_gcm_wrong_ad_fails() {
        let mut cipher = Cipher::new([0xab; 32]);
        let ct = cipher.encrypt(b"payload", b"right ad").unwrap();
        cipher.reset();
        assert!(cipher.decrypt(&ct, b"wrong ad").is_err());
    }

    #[test]
    fn test_gcm_nonces_advance() {
        let mut cipher = Cipher::new([1u8; 32]);
        let a = cipher.encrypt(b"same", &[]).unwrap();
        let b = cipher.encrypt(b"same", &[]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_counter_exhaustion_is_fatal() {
        let mut cipher = Cipher::new([2u8; 32]);
        cipher.counter = u64::MAX - 1;
        cipher.encrypt(b"last", &[]).unwrap();
        assert_eq!(
            cipher.encrypt(b"overflow", &[]).unwrap_err(),
            CipherError::NonceExhausted
        );
    }

    #[test]
    fn test_cbc_roundtrip() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        let ct = cbc_encrypt(&key, &iv, b"cbc plaintext").unwrap();
        assert_ne!(&ct[..], b"cbc plaintext");
        assert_eq!(cbc_decrypt(&key, &iv, &ct).unwrap(), b"cbc plaintext");
    }

    #[test]
    fn test_cbc_bad_padding_fails() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        let mut ct = cbc_encrypt(&key, &iv, b"cbc plaintext").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xff;
        assert!(cbc_decrypt(&key, &iv, &ct).is_err());
    }
}

//! HKDF-SHA256, used by the Noise handshake, the Signal key schedules and
//! the app-state key expansion.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HKDF-Extract: collapse input key material into a pseudorandom key.
/// A missing salt is treated as 32 zero bytes.
pub fn extract(salt: Option<&[u8]>, ikm: &[u8]) -> [u8; 32] {
    let salt = salt.unwrap_or(&[0u8; 32]);
    let mut mac = HmacSha256::new_from_slice(salt).expect("hmac accepts any key length");
    mac.update(ikm);
    mac.finalize().into_bytes().into()
}

/// HKDF-Expand: stretch a pseudorandom key to `length` output bytes.
pub fn expand(prk: &[u8; 32], info: &[u8], length: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(length);
    let mut block: Vec<u8> = Vec::new();
    let mut counter = 1u8;

    while output.len() < length {
        let mut mac = HmacSha256::new_from_slice(prk).expect("hmac accepts any key length");
        mac.update(&block);
        mac.update(info);
        mac.update(&[counter]);
        block = mac.finalize().into_bytes().to_vec();

        let take = block.len().min(length - output.len());
        output.extend_from_slice(&block[..take]);
        counter += 1;
    }

    output
}

/// Extract-then-expand in one call.
pub fn derive(salt: Option<&[u8]>, ikm: &[u8], info: &[u8], length: usize) -> Vec<u8> {
    expand(&extract(salt, ikm), info, length)
}

/// Split a 64-byte derivation into two 32-byte keys, the shape every ratchet
/// step in this crate uses.
pub fn derive_pair(salt: Option<&[u8]>, ikm: &[u8], info: &[u8]) -> ([u8; 32], [u8; 32]) {
    let okm = derive(salt, ikm, info, 64);
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    (first, second)
}

//! Cryptographic primitives shared by the handshake, the Signal layer and
//! the app-state engine.

mod cipher;
pub mod hkdf;
mod keypair;
pub mod mac;
mod noise;

pub use cipher::{cbc_decrypt, cbc_encrypt, Cipher, CipherError};
pub use keypair::{
    prefix_public, strip_public, verify_signature, KeyPair, PreKey, SignedPreKey, DJB_TYPE,
};
pub use noise::{NoiseError, NoiseHandshake, NoiseResponder, NOISE_PROTOCOL_NAME};

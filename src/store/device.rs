//! The local device: long-term key material and registration identity.

use crate::crypto::{KeyPair, SignedPreKey};
use crate::types::Jid;

/// Everything this device needs to authenticate and encrypt.
#[derive(Debug, Clone)]
pub struct Device {
    /// Static Noise keypair for the transport handshake.
    pub noise_key: KeyPair,
    /// Long-term Signal identity keypair.
    pub identity_key: KeyPair,
    /// Current signed prekey, rotated per registration.
    pub signed_prekey: SignedPreKey,
    /// 14-bit registration id.
    pub registration_id: u32,
    /// Our Jid once registered; `None` drives the registration payload.
    pub jid: Option<Jid>,
    /// Display name pushed to peers.
    pub push_name: Option<String>,
}

impl Device {
    /// A fresh, unregistered device with newly generated keys.
    pub fn new() -> Self {
        let identity_key = KeyPair::generate();
        let signed_prekey = SignedPreKey::new(1, &identity_key);
        Self {
            noise_key: KeyPair::generate(),
            identity_key,
            signed_prekey,
            registration_id: rand::random::<u32>() & 0x3FFF,
            jid: None,
            push_name: None,
        }
    }

    /// Whether the device holds a server-assigned identity.
    pub fn is_registered(&self) -> bool {
        self.jid.is_some()
    }

    /// The device Jid, if registered.
    pub fn jid(&self) -> Option<&Jid> {
        self.jid.as_ref()
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

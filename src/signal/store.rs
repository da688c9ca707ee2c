//! Session management over the persistence layer.
//!
//! Wraps the raw ratchet records with per-peer locking (the double ratchet
//! is not reentrant), identity pinning, one-time prekey consumption and
//! the sender-key record lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::crypto::KeyPair;
use crate::proto::e2e::SenderKeyDistributionMessage;
use crate::signal::group::{SenderKeyName, SenderKeyRecord};
use crate::signal::session::{
    parse_prekey_message, OutgoingMessage, PreKeyBundle, SessionState, SignalError,
};
use crate::signal::SignalAddress;
use crate::store::{Device, KeyStore, PreKeyProvider, StoreError};

/// Pool level that triggers a refill callback.
pub const PREKEY_REFILL_THRESHOLD: usize = 5;

impl From<StoreError> for SignalError {
    fn from(e: StoreError) -> Self {
        SignalError::Cipher(format!("store: {}", e))
    }
}

/// The Signal session store: all 1:1 and group cryptography behind one
/// façade keyed by addresses.
pub struct SignalSessionStore {
    store: Arc<dyn KeyStore>,
    identity: KeyPair,
    registration_id: u32,
    signed_prekey: crate::crypto::SignedPreKey,
    prekey_provider: Option<Arc<dyn PreKeyProvider>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SignalSessionStore {
    pub fn new(device: &Device, store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            identity: device.identity_key.clone(),
            registration_id: device.registration_id,
            signed_prekey: device.signed_prekey.clone(),
            prekey_provider: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_prekey_provider(mut self, provider: Arc<dyn PreKeyProvider>) -> Self {
        self.prekey_provider = Some(provider);
        self
    }

    /// Our identity's public halves, for bundle publication.
    pub fn identity_public(&self) -> ([u8; 32], [u8; 32]) {
        (self.identity.public, self.identity.ed_public())
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn has_session(&self, address: &SignalAddress) -> bool {
        self.store.has_session(address).unwrap_or(false)
    }

    /// Build an outbound session from a fetched bundle. No-op if a session
    /// already exists.
    pub async fn create_session(
        &self,
        address: &SignalAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), SignalError> {
        let lock = self.lock_for(&address.to_string());
        let _guard = lock.lock().await;

        if self.store.has_session(address)? {
            return Ok(());
        }
        if !self.store.is_trusted_identity(address, &bundle.identity_key)? {
            warn!("refusing session with {}: identity changed", address);
            return Err(SignalError::InvalidSignature);
        }

        let session = SessionState::new_outbound(&self.identity, self.registration_id, bundle)?;
        self.store.put_identity(address, bundle.identity_key)?;
        self.store.put_session(address, session)?;
        debug!("created outbound session with {}", address);
        Ok(())
    }

    /// Encrypt a payload for one device. The session must exist.
    pub async fn encrypt(
        &self,
        address: &SignalAddress,
        plaintext: &[u8],
    ) -> Result<OutgoingMessage, SignalError> {
        let lock = self.lock_for(&address.to_string());
        let _guard = lock.lock().await;

        let mut session = self
            .store
            .get_session(address)?
            .ok_or(SignalError::NoSession)?;
        let outgoing = session.encrypt(&self.identity, plaintext)?;
        self.store.put_session(address, session)?;
        Ok(outgoing)
    }

    /// Decrypt an inbound `msg`.
    pub async fn decrypt_whisper(
        &self,
        address: &SignalAddress,
        wire: &[u8],
    ) -> Result<Vec<u8>, SignalError> {
        let lock = self.lock_for(&address.to_string());
        let _guard = lock.lock().await;

        let mut session = self
            .store
            .get_session(address)?
            .ok_or(SignalError::NoSession)?;
        let plaintext = session.decrypt(&self.identity, wire)?;
        self.store.put_session(address, session)?;
        Ok(plaintext)
    }

    /// Decrypt an inbound `pkmsg`, creating the session when the advertised
    /// base key is new. Consumed one-time prekeys are deleted, and the
    /// refill hook fires when the pool drains.
    pub async fn decrypt_prekey(
        &self,
        address: &SignalAddress,
        wire: &[u8],
    ) -> Result<Vec<u8>, SignalError> {
        let lock = self.lock_for(&address.to_string());
        let _guard = lock.lock().await;

        let parsed = parse_prekey_message(wire)?;

        // An established session decrypts the inner message directly; the
        // prekey header is only replayed transport noise at that point.
        if let Some(mut session) = self.store.get_session(address)? {
            if session.their_identity == parsed.identity_key {
                let plaintext = session.decrypt(&self.identity, &parsed.message)?;
                self.store.put_session(address, session)?;
                return Ok(plaintext);
            }
        }

        if !self
            .store
            .is_trusted_identity(address, &parsed.identity_key)?
        {
            warn!("refusing prekey message from {}: identity changed", address);
            return Err(SignalError::InvalidSignature);
        }
        if parsed.signed_pre_key_id != self.signed_prekey.key_id {
            return Err(SignalError::InvalidMessage(format!(
                "unknown signed prekey id {}",
                parsed.signed_pre_key_id
            )));
        }

        let one_time = match parsed.pre_key_id {
            Some(id) => {
                let taken = self.store.take_prekey(id)?;
                if taken.is_none() {
                    return Err(SignalError::InvalidMessage(format!(
                        "one-time prekey {} already consumed",
                        id
                    )));
                }
                self.maybe_refill();
                taken
            }
            None => None,
        };

        let mut session = SessionState::new_inbound(
            &self.identity,
            &self.signed_prekey,
            one_time.as_ref(),
            parsed.identity_key,
            parsed.base_key,
        );
        let plaintext = session.decrypt(&self.identity, &parsed.message)?;
        self.store.put_identity(address, parsed.identity_key)?;
        self.store.put_session(address, session)?;
        debug!("created inbound session with {}", address);
        Ok(plaintext)
    }

    fn maybe_refill(&self) {
        if let Some(provider) = &self.prekey_provider {
            if let Ok(count) = self.store.prekey_count() {
                if count < PREKEY_REFILL_THRESHOLD {
                    provider.refill(count);
                }
            }
        }
    }

    // -- Sender keys --------------------------------------------------------

    /// Our own sending record for a group, created on first use. Returns
    /// the distribution message to fan out when the record is fresh.
    pub async fn sender_key_distribution(
        &self,
        name: &SenderKeyName,
    ) -> Result<(SenderKeyDistributionMessage, bool), SignalError> {
        let key = name.to_string();
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        match self.store.get_sender_key(&key)? {
            Some(record) => Ok((record.distribution(), false)),
            None => {
                let record = SenderKeyRecord::new_own();
                let distribution = record.distribution();
                self.store.put_sender_key(&key, record)?;
                debug!("created sender key for {}", key);
                Ok((distribution, true))
            }
        }
    }

    /// Install a remote sender's record from its distribution message.
    pub async fn process_sender_key_distribution(
        &self,
        name: &SenderKeyName,
        message: &SenderKeyDistributionMessage,
    ) -> Result<(), SignalError> {
        let key = name.to_string();
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let record = SenderKeyRecord::from_distribution(message)?;
        self.store.put_sender_key(&key, record)?;
        Ok(())
    }

    /// Encrypt a group payload under our sending record.
    pub async fn group_encrypt(
        &self,
        name: &SenderKeyName,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, SignalError> {
        let key = name.to_string();
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let mut record = self
            .store
            .get_sender_key(&key)?
            .ok_or(SignalError::NoSession)?;
        let wire = record.encrypt(plaintext)?;
        self.store.put_sender_key(&key, record)?;
        Ok(wire)
    }

    /// Decrypt a group payload under the sender's record.
    pub async fn group_decrypt(
        &self,
        name: &SenderKeyName,
        wire: &[u8],
    ) -> Result<Vec<u8>, SignalError> {
        let key = name.to_string();
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let mut record = self
            .store
            .get_sender_key(&key)?
            .ok_or(SignalError::NoSession)?;
        let plaintext = record.decrypt(wire)?;
        self.store.put_sender_key(&key, record)?;
        Ok(plaintext)
    }
}

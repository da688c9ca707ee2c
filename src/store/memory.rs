//! In-memory store. The default for tests and short-lived sessions; real
//! deployments persist through their own `KeyStore` implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::appstate::{AppStateSyncKey, HashState};
use crate::crypto::PreKey;
use crate::signal::{SenderKeyRecord, SessionState, SignalAddress};
use crate::store::{
    AppStateStore, BlobStore, IdentityStore, PreKeyStore, SenderKeyStore, SessionStore,
    StoreError, StoreResult,
};

#[derive(Default)]
pub struct MemoryStore {
    identities: RwLock<HashMap<String, [u8; 32]>>,
    sessions: RwLock<HashMap<String, SessionState>>,
    prekeys: RwLock<HashMap<u32, PreKey>>,
    sender_keys: RwLock<HashMap<String, SenderKeyRecord>>,
    app_state: RwLock<HashMap<String, HashState>>,
    app_state_keys: RwLock<HashMap<Vec<u8>, AppStateSyncKey>>,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a downloadable blob (tests and loopback peers).
    pub fn insert_blob(&self, direct_path: impl Into<String>, data: Vec<u8>) {
        self.blobs.write().unwrap().insert(direct_path.into(), data);
    }
}

fn poisoned(_: impl std::fmt::Debug) -> StoreError {
    StoreError::Backend("lock poisoned".into())
}

impl IdentityStore for MemoryStore {
    fn put_identity(&self, address: &SignalAddress, key: [u8; 32]) -> StoreResult<()> {
        self.identities
            .write()
            .map_err(poisoned)?
            .insert(address.to_string(), key);
        Ok(())
    }

    fn get_identity(&self, address: &SignalAddress) -> StoreResult<Option<[u8; 32]>> {
        Ok(self
            .identities
            .read()
            .map_err(poisoned)?
            .get(&address.to_string())
            .copied())
    }

    fn is_trusted_identity(&self, address: &SignalAddress, key: &[u8; 32]) -> StoreResult<bool> {
        Ok(match self.get_identity(address)? {
            Some(pinned) => &pinned == key,
            None => true,
        })
    }
}

impl SessionStore for MemoryStore {
    fn get_session(&self, address: &SignalAddress) -> StoreResult<Option<SessionState>> {
        Ok(self
            .sessions
            .read()
            .map_err(poisoned)?
            .get(&address.to_string())
            .cloned())
    }

    fn has_session(&self, address: &SignalAddress) -> StoreResult<bool> {
        Ok(self
            .sessions
            .read()
            .map_err(poisoned)?
            .contains_key(&address.to_string()))
    }

    fn put_session(&self, address: &SignalAddress, session: SessionState) -> StoreResult<()> {
        self.sessions
            .write()
            .map_err(poisoned)?
            .insert(address.to_string(), session);
        Ok(())
    }

    fn delete_session(&self, address: &SignalAddress) -> StoreResult<()> {
        self.sessions
            .write()
            .map_err(poisoned)?
            .remove(&address.to_string());
        Ok(())
    }
}

impl PreKeyStore for MemoryStore {
    fn get_prekey(&self, id: u32) -> StoreResult<Option<PreKey>> {
        Ok(self.prekeys.read().map_err(poisoned)?.get(&id).cloned())
    }

    fn put_prekey(&self, prekey: PreKey) -> StoreResult<()> {
        self.prekeys
            .write()
            .map_err(poisoned)?
            .insert(prekey.key_id, prekey);
        Ok(())
    }

    fn take_prekey(&self, id: u32) -> StoreResult<Option<PreKey>> {
        Ok(self.prekeys.write().map_err(poisoned)?.remove(&id))
    }

    fn prekey_count(&self) -> StoreResult<usize> {
        Ok(self.prekeys.read().map_err(poisoned)?.len())
    }
}

impl SenderKeyStore for MemoryStore {
    fn get_sender_key(&self, name: &str) -> StoreResult<Option<SenderKeyRecord>> {
        Ok(self.sender_keys.read().map_err(poisoned)?.get(name).cloned())
    }

    fn put_sender_key(&self, name: &str, record: SenderKeyRecord) -> StoreResult<()> {
        self.sender_keys
            .write()
            .map_err(poisoned)?
            .insert(name.to_string(), record);
        Ok(())
    }
}

impl AppStateStore for MemoryStore {
    fn get_app_state_version(&self, name: &str) -> StoreResult<HashState> {
        Ok(self
            .app_state
            .read()
            .map_err(poisoned)?
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    fn put_app_state_version(&self, name: &str, state: HashState) -> StoreResult<()> {
        self.app_state
            .write()
            .map_err(poisoned)?
            .insert(name.to_string(), state);
        Ok(())
    }

    fn get_app_state_sync_key(&self, key_id: &[u8]) -> StoreResult<Option<AppStateSyncKey>> {
        Ok(self
            .app_state_keys
            .read()
            .map_err(poisoned)?
            .get(key_id)
            .cloned())
    }

    fn put_app_state_sync_key(&self, key: AppStateSyncKey) -> StoreResult<()> {
        self.app_state_keys
            .write()
            .map_err(poisoned)?
            .insert(key.key_id.clone(), key);
        Ok(())
    }

    fn get_latest_app_state_sync_key(&self) -> StoreResult<Option<AppStateSyncKey>> {
        Ok(self
            .app_state_keys
            .read()
            .map_err(poisoned)?
            .values()
            .max_by_key(|k| k.timestamp)
            .cloned())
    }
}

impl BlobStore for MemoryStore {
    fn download(&self, direct_path: &str, _media_key: &[u8]) -> StoreResult<Vec<u8>> {
        self.blobs
            .read()
            .map_err(poisoned)?
            .get(direct_path)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_pinning() {
        let store = MemoryStore::new();
        let addr = SignalAddress::new("123", 0);
        // Trust on first use.
        assert!(store.is_trusted_identity(&addr, &[1; 32]).unwrap());
        store.put_identity(&addr, [1; 32]).unwrap();
        assert!(store.is_trusted_identity(&addr, &[1; 32]).unwrap());
        assert!(!store.is_trusted_identity(&addr, &[2; 32]).unwrap());
    }

    #[test]
    fn test_prekey_consumed_once() {
        let store = MemoryStore::new();
        store.put_prekey(PreKey::new(5)).unwrap();
        assert_eq!(store.prekey_count().unwrap(), 1);
        assert!(store.take_prekey(5).unwrap().is_some());
        assert!(store.take_prekey(5).unwrap().is_none());
        assert_eq!(store.prekey_count().unwrap(), 0);
    }

    #[test]
    fn test_app_state_defaults_to_empty() {
        let store = MemoryStore::new();
        let state = store.get_app_state_version("regular").unwrap();
        assert_eq!(state.version, 0);
        assert!(state.index_value_map.is_empty());
    }

    #[test]
    fn test_latest_sync_key_by_timestamp() {
        let store = MemoryStore::new();
        for (id, ts) in [(vec![1; 6], 100), (vec![2; 6], 300), (vec![3; 6], 200)] {
            store
                .put_app_state_sync_key(AppStateSyncKey {
                    key_id: id,
                    key_data: [0; 32],
                    timestamp: ts,
                })
                .unwrap();
        }
        let latest = store.get_latest_app_state_sync_key().unwrap().unwrap();
        assert_eq!(latest.key_id, vec![2; 6]);
    }
}

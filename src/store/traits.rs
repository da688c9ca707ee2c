//! Persistence interfaces consumed by the core.
//!
//! The on-disk format is the embedder's concern; the core stores and loads
//! typed records through these traits. Implementations must be cheap to
//! call from async context (no blocking I/O on the hot path).

use crate::appstate::{AppStateSyncKey, HashState};
use crate::signal::{SenderKeyRecord, SessionState, SignalAddress};
use crate::crypto::PreKey;

/// Store failures, surfaced as `Error::Store`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Remote identity keys, for trust-on-first-use pinning.
pub trait IdentityStore: Send + Sync {
    fn put_identity(&self, address: &SignalAddress, key: [u8; 32]) -> StoreResult<()>;
    fn get_identity(&self, address: &SignalAddress) -> StoreResult<Option<[u8; 32]>>;
    /// First use is trusted; afterwards the pinned key must match.
    fn is_trusted_identity(&self, address: &SignalAddress, key: &[u8; 32]) -> StoreResult<bool>;
}

/// Double-ratchet sessions, keyed by `(user, device)`.
pub trait SessionStore: Send + Sync {
    fn get_session(&self, address: &SignalAddress) -> StoreResult<Option<SessionState>>;
    fn has_session(&self, address: &SignalAddress) -> StoreResult<bool>;
    fn put_session(&self, address: &SignalAddress, session: SessionState) -> StoreResult<()>;
    fn delete_session(&self, address: &SignalAddress) -> StoreResult<()>;
}

/// One-time prekey pool.
pub trait PreKeyStore: Send + Sync {
    fn get_prekey(&self, id: u32) -> StoreResult<Option<PreKey>>;
    fn put_prekey(&self, prekey: PreKey) -> StoreResult<()>;
    /// Consume: fetch and delete in one step, so a prekey is used at most
    /// once.
    fn take_prekey(&self, id: u32) -> StoreResult<Option<PreKey>>;
    fn prekey_count(&self) -> StoreResult<usize>;
}

/// Called when the one-time pool drains below its threshold; the embedder
/// generates and uploads a fresh batch.
pub trait PreKeyProvider: Send + Sync {
    fn refill(&self, current_count: usize);
}

/// Sender-key records per `(group, sender device)`.
pub trait SenderKeyStore: Send + Sync {
    fn get_sender_key(&self, name: &str) -> StoreResult<Option<SenderKeyRecord>>;
    fn put_sender_key(&self, name: &str, record: SenderKeyRecord) -> StoreResult<()>;
}

/// Per-collection CRDT state and the shared sync keys.
pub trait AppStateStore: Send + Sync {
    fn get_app_state_version(&self, name: &str) -> StoreResult<HashState>;
    fn put_app_state_version(&self, name: &str, state: HashState) -> StoreResult<()>;
    fn get_app_state_sync_key(&self, key_id: &[u8]) -> StoreResult<Option<AppStateSyncKey>>;
    fn put_app_state_sync_key(&self, key: AppStateSyncKey) -> StoreResult<()>;
    /// The newest key by share timestamp, used for pushes.
    fn get_latest_app_state_sync_key(&self) -> StoreResult<Option<AppStateSyncKey>>;
}

/// Opaque blob fetch/upload, e.g. app-state snapshots and history chunks.
/// Media transfer itself is out of core scope.
pub trait BlobStore: Send + Sync {
    fn download(&self, direct_path: &str, media_key: &[u8]) -> StoreResult<Vec<u8>>;
}

/// The full persistence surface the core consumes.
pub trait KeyStore:
    IdentityStore + SessionStore + PreKeyStore + SenderKeyStore + AppStateStore
{
}

impl<T> KeyStore for T where
    T: IdentityStore + SessionStore + PreKeyStore + SenderKeyStore + AppStateStore
{
}

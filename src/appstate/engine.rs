//! The app-state synchronization engine.
//!
//! Pulls download the server's authoritative view per collection
//! (snapshot plus ordered patches, MAC-checked at every step); pushes
//! upload locally composed patches and then replay them through the same
//! event path a remote apply takes. A MAC mismatch wipes the collection
//! and re-pulls from a snapshot, up to three attempts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use prost::Message as ProstMessage;

use crate::appstate::keys::{expand_app_state_keys, ExpandedAppStateKeys};
use crate::appstate::patch::{
    action_event, decrypt_mutation, encrypt_mutation, DecodedMutation,
};
use crate::appstate::state::{patch_mac, AppStateError, HashState, Mutation, Operation};
use crate::appstate::AppStateSyncKey;
use crate::binary::Node;
use crate::dispatch::request::{iq, IqSender};
use crate::error::{Error, Result};
use crate::proto::e2e::AppStateSyncKeyShare;
use crate::proto::sync::{
    ExternalBlobReference, KeyId, SyncActionData, SyncdMutation, SyncdPatch, SyncdSnapshot,
    SyncdVersion,
};
use crate::store::{BlobStore, KeyStore};
use crate::types::{EventHandlers, Event, Jid};

/// Per-collection retry budget for MAC mismatches.
pub const MAX_PULL_ATTEMPTS: u32 = 3;

const APP_STATE_XMLNS: &str = "w:sync:app:state";

fn appstate_err(e: AppStateError) -> Error {
    match e {
        AppStateError::PatchMacMismatch
        | AppStateError::SnapshotMacMismatch
        | AppStateError::ContentMacMismatch => Error::MacMismatch(e.to_string()),
        other => Error::Protocol(other.to_string()),
    }
}

fn is_mac_error(e: &AppStateError) -> bool {
    matches!(
        e,
        AppStateError::PatchMacMismatch
            | AppStateError::SnapshotMacMismatch
            | AppStateError::ContentMacMismatch
    )
}

/// One collection's slice of a pull response.
pub struct PatchList {
    pub name: String,
    pub has_more_patches: bool,
    pub snapshot: Option<SyncdSnapshot>,
    pub patches: Vec<SyncdPatch>,
}

/// What a processed pull response asks for next.
#[derive(Debug, Default, PartialEq)]
pub struct PullOutcome {
    /// Collections that failed a MAC check and were reset; re-pull them.
    pub retry: Vec<String>,
    /// Collections whose server side has more patches queued.
    pub more: Vec<String>,
}

impl PullOutcome {
    pub fn next_collections(&self) -> Vec<String> {
        let mut next = self.retry.clone();
        next.extend(self.more.iter().cloned());
        next
    }
}

pub struct AppStateEngine {
    store: Arc<dyn KeyStore>,
    blobs: Arc<dyn BlobStore>,
    handlers: Arc<EventHandlers>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl AppStateEngine {
    pub fn new(
        store: Arc<dyn KeyStore>,
        blobs: Arc<dyn BlobStore>,
        handlers: Arc<EventHandlers>,
    ) -> Self {
        Self {
            store,
            blobs,
            handlers,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn expanded_keys(&self, key_id: &[u8]) -> std::result::Result<ExpandedAppStateKeys, AppStateError> {
        let key = self
            .store
            .get_app_state_sync_key(key_id)
            .map_err(|e| AppStateError::BadMutation(e.to_string()))?
            .ok_or_else(|| AppStateError::KeyNotFound(hex::encode(key_id)))?;
        Ok(expand_app_state_keys(&key.key_data))
    }

    /// Store the keys from an `APP_STATE_SYNC_KEY_SHARE` peer message.
    pub fn handle_key_share(&self, share: &AppStateSyncKeyShare) -> Result<usize> {
        let mut stored = 0;
        for key in &share.keys {
            let (Some(id), Some(data)) = (&key.key_id, &key.key_data) else {
                continue;
            };
            let (Some(id), Some(data)) = (&id.key_id, &data.key_data) else {
                continue;
            };
            let Ok(key_data) = <[u8; 32]>::try_from(data.as_slice()) else {
                warn!("ignoring app state key with bad length {}", data.len());
                continue;
            };
            self.store
                .put_app_state_sync_key(AppStateSyncKey {
                    key_id: id.clone(),
                    key_data,
                    timestamp: key.key_data.as_ref().and_then(|d| d.timestamp).unwrap_or(0),
                })
                .map_err(|e| Error::Store(e.to_string()))?;
            stored += 1;
        }
        debug!("stored {} app state sync keys", stored);
        Ok(stored)
    }

    // -- Pull ---------------------------------------------------------------

    /// The `<iq>` requesting the given collections from their local
    /// versions. A collection at version 0 asks for a snapshot.
    pub fn build_pull_query(&self, collections: &[&str]) -> Result<Node> {
        let mut sync = Node::new("sync");
        for name in collections {
            let state = self
                .store
                .get_app_state_version(name)
                .map_err(|e| Error::Store(e.to_string()))?;
            sync.add_child(
                Node::new("collection")
                    .attr("name", *name)
                    .attr("version", state.version as i64)
                    .attr("return_snapshot", state.version == 0),
            );
        }
        Ok(iq("set", APP_STATE_XMLNS, Some(&crate::types::SERVER_JID)).child(sync))
    }

    /// Split a pull reply into per-collection patch lists, resolving
    /// external snapshot blobs.
    pub fn parse_pull_response(&self, response: &Node) -> Result<Vec<PatchList>> {
        let sync = response
            .child_by_tag("sync")
            .ok_or_else(|| Error::Protocol("sync response without <sync>".into()))?;

        let mut lists = Vec::new();
        for collection in sync.children_by_tag("collection") {
            let name = collection
                .attr_str("name")
                .ok_or_else(|| Error::Protocol("collection without name".into()))?
                .to_string();
            let has_more_patches = collection.attr_bool("has_more_patches").unwrap_or(false);

            let snapshot = match collection
                .child_by_tag("snapshot")
                .and_then(|n| n.content_bytes())
            {
                Some(bytes) => {
                    let reference = ExternalBlobReference::decode(bytes)?;
                    let blob = self
                        .blobs
                        .download(
                            reference.direct_path.as_deref().unwrap_or_default(),
                            reference.media_key.as_deref().unwrap_or_default(),
                        )
                        .map_err(|e| Error::Store(format!("snapshot download: {}", e)))?;
                    Some(SyncdSnapshot::decode(blob.as_slice())?)
                }
                None => None,
            };

            let mut patches = Vec::new();
            let patch_parent = collection.child_by_tag("patches").unwrap_or(collection);
            for patch in patch_parent.children_by_tag("patch") {
                if let Some(bytes) = patch.content_bytes() {
                    patches.push(SyncdPatch::decode(bytes)?);
                }
            }

            lists.push(PatchList {
                name,
                has_more_patches,
                snapshot,
                patches,
            });
        }
        Ok(lists)
    }

    /// Apply one collection's lists against persisted state, firing chat
    /// action events for every applied mutation.
    fn apply_patch_list(&self, list: &PatchList) -> std::result::Result<(), AppStateError> {
        let store_err = |e: crate::store::StoreError| AppStateError::BadMutation(e.to_string());

        let mut state;
        let mut events: Vec<DecodedMutation> = Vec::new();
        let from_full_sync = list.snapshot.is_some();

        match &list.snapshot {
            Some(snapshot) => {
                state = HashState::default();
                let key_id = snapshot
                    .key_id
                    .as_ref()
                    .and_then(|k| k.id.as_deref())
                    .ok_or_else(|| AppStateError::BadMutation("snapshot without key id".into()))?
                    .to_vec();
                let keys = self.expanded_keys(&key_id)?;

                state.version = snapshot
                    .version
                    .as_ref()
                    .and_then(|v| v.version)
                    .unwrap_or(0);
                let mut mutations = Vec::with_capacity(snapshot.records.len());
                for record in &snapshot.records {
                    let record_key = record
                        .key_id
                        .as_ref()
                        .and_then(|k| k.id.as_deref())
                        .unwrap_or(&key_id);
                    let record_keys = if record_key == key_id.as_slice() {
                        keys.clone()
                    } else {
                        self.expanded_keys(record_key)?
                    };
                    let decoded =
                        decrypt_mutation(Operation::Set, record, &record_keys, record_key)?;
                    mutations.push(decoded.mutation.clone());
                    events.push(decoded);
                }
                state.update_hash(&mutations)?;

                let expected = state.snapshot_mac(&list.name, &keys.snapshot_mac);
                let received = snapshot.mac.as_deref().unwrap_or_default();
                if !crate::crypto::mac::mac_matches(&expected, received) {
                    return Err(AppStateError::SnapshotMacMismatch);
                }
            }
            None => {
                state = self
                    .store
                    .get_app_state_version(&list.name)
                    .map_err(store_err)?;
            }
        }

        for patch in &list.patches {
            let version = patch.version.as_ref().and_then(|v| v.version).unwrap_or(0);
            if version <= state.version {
                debug!(
                    "skipping already-applied patch v{} for {} (local v{})",
                    version, list.name, state.version
                );
                continue;
            }

            let key_id = patch
                .key_id
                .as_ref()
                .and_then(|k| k.id.as_deref())
                .ok_or_else(|| AppStateError::BadMutation("patch without key id".into()))?
                .to_vec();
            let keys = self.expanded_keys(&key_id)?;

            // Patch MAC chains the snapshot MAC with every value MAC.
            let value_macs: Vec<&[u8]> = patch
                .mutations
                .iter()
                .filter_map(|m| m.record.as_ref())
                .filter_map(|r| r.value.as_ref())
                .filter_map(|v| v.blob.as_deref())
                .map(|blob| &blob[blob.len().saturating_sub(32)..])
                .collect();
            let snapshot_mac = patch.snapshot_mac.as_deref().unwrap_or_default();
            let expected = patch_mac(
                snapshot_mac,
                &value_macs,
                version,
                &list.name,
                &keys.patch_mac,
            );
            if !crate::crypto::mac::mac_matches(&expected, patch.patch_mac.as_deref().unwrap_or_default()) {
                return Err(AppStateError::PatchMacMismatch);
            }

            let mut mutations: Vec<Mutation> = Vec::with_capacity(patch.mutations.len());
            for wire in &patch.mutations {
                let operation = Operation::from_wire(wire.operation.unwrap_or(0))
                    .ok_or_else(|| AppStateError::BadMutation("unknown operation".into()))?;
                let record = wire
                    .record
                    .as_ref()
                    .ok_or_else(|| AppStateError::BadMutation("mutation without record".into()))?;
                let record_key = record
                    .key_id
                    .as_ref()
                    .and_then(|k| k.id.as_deref())
                    .unwrap_or(&key_id);
                let record_keys = if record_key == key_id.as_slice() {
                    keys.clone()
                } else {
                    self.expanded_keys(record_key)?
                };
                let decoded = decrypt_mutation(operation, record, &record_keys, record_key)?;
                mutations.push(decoded.mutation.clone());
                events.push(decoded);
            }

            state.update_hash(&mutations)?;
            state.version = version;

            // The patch's snapshot MAC covers the state after this apply.
            let expected = state.snapshot_mac(&list.name, &keys.snapshot_mac);
            if !crate::crypto::mac::mac_matches(&expected, snapshot_mac) {
                return Err(AppStateError::SnapshotMacMismatch);
            }
        }

        self.store
            .put_app_state_version(&list.name, state)
            .map_err(store_err)?;

        for decoded in &events {
            if let Some(event) = action_event(decoded, from_full_sync) {
                self.handlers.emit(Event::ChatAction(event));
            }
        }
        Ok(())
    }

    /// Process one pull reply: apply every collection, resetting and
    /// scheduling a retry on MAC mismatch. Errors out only when a
    /// collection exhausts its attempts.
    pub fn process_pull_response(&self, response: &Node) -> Result<PullOutcome> {
        let mut outcome = PullOutcome::default();
        for list in self.parse_pull_response(response)? {
            match self.apply_patch_list(&list) {
                Ok(()) => {
                    self.attempts.lock().unwrap().remove(&list.name);
                    if list.has_more_patches {
                        outcome.more.push(list.name);
                    }
                }
                Err(e) if is_mac_error(&e) => {
                    let attempt = {
                        let mut attempts = self.attempts.lock().unwrap();
                        let attempt = attempts.entry(list.name.clone()).or_insert(0);
                        *attempt += 1;
                        *attempt
                    };
                    warn!(
                        "mac mismatch on {} (attempt {}): {}; resetting collection",
                        list.name, attempt, e
                    );
                    self.store
                        .put_app_state_version(&list.name, HashState::default())
                        .map_err(|se| Error::Store(se.to_string()))?;
                    if attempt >= MAX_PULL_ATTEMPTS {
                        self.attempts.lock().unwrap().remove(&list.name);
                        return Err(appstate_err(e));
                    }
                    outcome.retry.push(list.name);
                }
                Err(e) => return Err(appstate_err(e)),
            }
        }
        Ok(outcome)
    }

    /// Full pull loop for a set of collections, driving queries until no
    /// retry or continuation remains.
    pub async fn pull(&self, sender: &IqSender, collections: &[&str]) -> Result<()> {
        let mut pending: Vec<String> = collections.iter().map(|s| s.to_string()).collect();
        while !pending.is_empty() {
            let names: Vec<&str> = pending.iter().map(String::as_str).collect();
            let query = self.build_pull_query(&names)?;
            let response = sender.send_iq(query).await?;
            let outcome = self.process_pull_response(&response)?;
            pending = outcome.next_collections();
        }
        Ok(())
    }

    // -- Push ---------------------------------------------------------------

    /// Compose a one-patch upload for `actions` against the collection's
    /// current state. Returns the iq to send, the state to persist on
    /// success and the loopback events to fire.
    pub fn build_push_patch(
        &self,
        name: &str,
        actions: &[(Operation, SyncActionData)],
    ) -> Result<(Node, HashState, Vec<DecodedMutation>)> {
        let state = self
            .store
            .get_app_state_version(name)
            .map_err(|e| Error::Store(e.to_string()))?;
        let version = state.version + 1;

        let key = self
            .store
            .get_latest_app_state_sync_key()
            .map_err(|e| Error::Store(e.to_string()))?
            .ok_or_else(|| Error::Protocol("no app state sync key to push with".into()))?;
        let keys = expand_app_state_keys(&key.key_data);

        let mut wire_mutations: Vec<SyncdMutation> = Vec::with_capacity(actions.len());
        let mut mutations: Vec<Mutation> = Vec::with_capacity(actions.len());
        let mut decoded: Vec<DecodedMutation> = Vec::with_capacity(actions.len());
        for (operation, data) in actions {
            let (wire, mutation) =
                encrypt_mutation(*operation, data, &keys, &key.key_id).map_err(appstate_err)?;
            let index: Vec<String> =
                serde_json::from_slice(data.index.as_deref().unwrap_or_default())
                    .map_err(|e| Error::Protocol(format!("action index json: {}", e)))?;
            decoded.push(DecodedMutation {
                operation: *operation,
                index,
                data: data.clone(),
                mutation: mutation.clone(),
            });
            wire_mutations.push(wire);
            mutations.push(mutation);
        }

        let mut new_state = state.clone();
        new_state.update_hash(&mutations).map_err(appstate_err)?;
        new_state.version = version;

        let snapshot_mac = new_state.snapshot_mac(name, &keys.snapshot_mac);
        let value_macs: Vec<&[u8]> = mutations.iter().map(|m| m.value_mac.as_slice()).collect();
        let patch_mac_bytes = patch_mac(&snapshot_mac, &value_macs, version, name, &keys.patch_mac);

        let patch = SyncdPatch {
            version: Some(SyncdVersion {
                version: Some(version),
            }),
            mutations: wire_mutations,
            snapshot_mac: Some(snapshot_mac.to_vec()),
            patch_mac: Some(patch_mac_bytes.to_vec()),
            key_id: Some(KeyId {
                id: Some(key.key_id.clone()),
            }),
            ..Default::default()
        };

        let node = iq("set", APP_STATE_XMLNS, Some(&crate::types::SERVER_JID)).child(
            Node::new("sync").child(
                Node::new("collection")
                    .attr("name", name)
                    .attr("version", state.version as i64)
                    .attr("return_snapshot", false)
                    .child(Node::new("patch").bytes(patch.encode_to_vec())),
            ),
        );
        Ok((node, new_state, decoded))
    }

    /// Push local actions: upload, persist, then fire the same events a
    /// remote apply of this patch would (pull-loopback).
    pub async fn push(
        &self,
        sender: &IqSender,
        name: &str,
        actions: &[(Operation, SyncActionData)],
    ) -> Result<()> {
        let (node, new_state, decoded) = self.build_push_patch(name, actions)?;
        let reply = sender.send_iq(node).await?;
        if reply.attr_str("type") == Some("error") {
            return Err(Error::Protocol(format!(
                "app state push rejected for {}",
                name
            )));
        }
        self.store
            .put_app_state_version(name, new_state)
            .map_err(|e| Error::Store(e.to_string()))?;
        for mutation in &decoded {
            if let Some(event) = action_event(mutation, false) {
                self.handlers.emit(Event::ChatAction(event));
            }
        }
        Ok(())
    }
}

/// Convenience: the mute push used by chat settings.
pub fn mute_actions(chat: &Jid, muted: bool, end: i64, now: i64) -> Vec<(Operation, SyncActionData)> {
    vec![(
        Operation::Set,
        crate::appstate::patch::mute_action(chat, muted, end, now),
    )]
}

/// Strip helper used in tests and loopback flows: the patch bytes inside a
/// push iq.
pub fn patch_bytes_of_push(node: &Node) -> Option<Vec<u8>> {
    node.descendant(&["sync", "collection", "patch"])
        .and_then(|n| n.content_bytes())
        .map(|b| b.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appstate::patch::mute_action;
    use crate::store::MemoryStore;
    use crate::store::AppStateStore;
    use crate::types::{ChatAction, Event};
    use std::sync::Mutex as StdMutex;

    const KEY_ID: [u8; 6] = [0, 0, 0, 0, 0, 9];

    fn seeded_engine() -> (AppStateEngine, Arc<MemoryStore>, Arc<EventHandlers>, Arc<StdMutex<Vec<Event>>>) {
        let store = Arc::new(MemoryStore::new());
        store
            .put_app_state_sync_key(AppStateSyncKey {
                key_id: KEY_ID.to_vec(),
                key_data: [0x21; 32],
                timestamp: 1000,
            })
            .unwrap();

        let handlers = Arc::new(EventHandlers::new());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        handlers.register(move |event| sink.lock().unwrap().push(event));

        let engine = AppStateEngine::new(store.clone(), store.clone(), handlers.clone());
        (engine, store, handlers, seen)
    }

    fn chat() -> Jid {
        "123@s.whatsapp.net".parse().unwrap()
    }

    /// Wrap a patch built by a "remote primary" into a pull reply node.
    fn pull_reply_with_patch(name: &str, patch_bytes: Vec<u8>, has_more: bool) -> Node {
        Node::new("iq").attr("type", "result").child(
            Node::new("sync").child(
                Node::new("collection")
                    .attr("name", name)
                    .attr("has_more_patches", has_more)
                    .child(Node::new("patches").child(Node::new("patch").bytes(patch_bytes))),
            ),
        )
    }

    #[test]
    fn test_push_composes_version_one_patch_with_loopback_events() {
        let (engine, _store, _handlers, _seen) = seeded_engine();
        let actions = mute_actions(&chat(), true, 0, 1_700_000_000);

        let (node, new_state, decoded) = engine
            .build_push_patch("regular_high", &actions)
            .unwrap();

        assert_eq!(new_state.version, 1);
        assert_eq!(decoded.len(), 1);

        let patch = SyncdPatch::decode(patch_bytes_of_push(&node).unwrap().as_slice()).unwrap();
        assert_eq!(patch.version.unwrap().version, Some(1));
        assert_eq!(patch.mutations.len(), 1);
        assert_eq!(patch.key_id.unwrap().id.unwrap(), KEY_ID.to_vec());

        let event = action_event(&decoded[0], false).unwrap();
        assert_eq!(event.chat, Some(chat()));
        assert_eq!(event.action, ChatAction::Mute { muted: true, end: 0 });
    }

    #[test]
    fn test_pull_applies_remote_patch_and_fires_mute() {
        // The "primary device" composes the patch with the shared key...
        let (primary, primary_store, _h, _s) = seeded_engine();
        let actions = mute_actions(&chat(), true, 0, 1_700_000_000);
        let (node, primary_state, _) = primary.build_push_patch("regular_high", &actions).unwrap();
        primary_store
            .put_app_state_version("regular_high", primary_state)
            .unwrap();

        // ...and this companion pulls it.
        let (companion, store, _handlers, seen) = seeded_engine();
        let reply = pull_reply_with_patch(
            "regular_high",
            patch_bytes_of_push(&node).unwrap(),
            false,
        );
        let outcome = companion.process_pull_response(&reply).unwrap();
        assert_eq!(outcome, PullOutcome::default());

        let state = store.get_app_state_version("regular_high").unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(state.index_value_map.len(), 1);

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::ChatAction(e) => {
                assert_eq!(e.action, ChatAction::Mute { muted: true, end: 0 });
                assert!(!e.from_full_sync);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_second_apply_is_rejected_by_version_and_hash_is_unchanged() {
        let (primary, _ps, _h, _s) = seeded_engine();
        let actions = mute_actions(&chat(), true, 0, 1);
        let (node, _, _) = primary.build_push_patch("regular", &actions).unwrap();
        let reply = pull_reply_with_patch("regular", patch_bytes_of_push(&node).unwrap(), false);

        let (companion, store, _handlers, seen) = seeded_engine();
        companion.process_pull_response(&reply).unwrap();
        let after_first = store.get_app_state_version("regular").unwrap();

        companion.process_pull_response(&reply).unwrap();
        let after_second = store.get_app_state_version("regular").unwrap();

        assert_eq!(after_first.hash[..], after_second.hash[..]);
        assert_eq!(after_first.version, after_second.version);
        // No second round of events either.
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_mac_mismatch_resets_collection_and_schedules_retry() {
        let (primary, _ps, _h, _s) = seeded_engine();
        let actions = mute_actions(&chat(), true, 0, 1);
        let (node, _, _) = primary.build_push_patch("regular_low", &actions).unwrap();
        let mut patch =
            SyncdPatch::decode(patch_bytes_of_push(&node).unwrap().as_slice()).unwrap();
        // Corrupt the patch MAC.
        patch.patch_mac = Some(vec![0u8; 32]);
        let reply = pull_reply_with_patch("regular_low", patch.encode_to_vec(), false);

        let (companion, store, _handlers, seen) = seeded_engine();
        let outcome = companion.process_pull_response(&reply).unwrap();
        assert_eq!(outcome.retry, vec!["regular_low".to_string()]);
        assert_eq!(store.get_app_state_version("regular_low").unwrap().version, 0);
        assert!(seen.lock().unwrap().is_empty());

        // Second and third failures exhaust the budget.
        companion.process_pull_response(&reply).unwrap();
        let fatal = companion.process_pull_response(&reply);
        assert!(matches!(fatal, Err(Error::MacMismatch(_))));
    }

    #[test]
    fn test_mac_recovery_succeeds_on_retry_without_surfaced_error() {
        let (primary, _ps, _h, _s) = seeded_engine();
        let actions = mute_actions(&chat(), true, 0, 1);
        let (node, _, _) = primary.build_push_patch("critical_block", &actions).unwrap();
        let good_bytes = patch_bytes_of_push(&node).unwrap();

        let mut bad = SyncdPatch::decode(good_bytes.as_slice()).unwrap();
        bad.snapshot_mac = Some(vec![0u8; 32]);
        // Recompute nothing: the patch MAC now disagrees with the body.

        let (companion, store, _handlers, _seen) = seeded_engine();
        let bad_reply =
            pull_reply_with_patch("critical_block", bad.encode_to_vec(), false);
        let outcome = companion.process_pull_response(&bad_reply).unwrap();
        assert_eq!(outcome.retry.len(), 1);

        // Server answers the retry with the intact patch.
        let good_reply = pull_reply_with_patch("critical_block", good_bytes, false);
        let outcome = companion.process_pull_response(&good_reply).unwrap();
        assert_eq!(outcome, PullOutcome::default());
        assert_eq!(
            store.get_app_state_version("critical_block").unwrap().version,
            1
        );
    }

    #[test]
    fn test_has_more_patches_requests_continuation() {
        let (primary, _ps, _h, _s) = seeded_engine();
        let actions = mute_actions(&chat(), true, 0, 1);
        let (node, _, _) = primary.build_push_patch("regular", &actions).unwrap();
        let reply = pull_reply_with_patch("regular", patch_bytes_of_push(&node).unwrap(), true);

        let (companion, _store, _handlers, _seen) = seeded_engine();
        let outcome = companion.process_pull_response(&reply).unwrap();
        assert_eq!(outcome.more, vec!["regular".to_string()]);
        assert_eq!(outcome.next_collections(), vec!["regular".to_string()]);
    }

    #[test]
    fn test_pull_query_requests_snapshot_only_at_version_zero() {
        let (engine, store, _handlers, _seen) = seeded_engine();
        let mut advanced = HashState::default();
        advanced.version = 7;
        store.put_app_state_version("regular", advanced).unwrap();

        let query = engine
            .build_pull_query(&["regular", "regular_low"])
            .unwrap();
        let sync = query.child_by_tag("sync").unwrap();
        let collections = sync.children_by_tag("collection");
        let regular = collections
            .iter()
            .find(|c| c.attr_str("name") == Some("regular"))
            .unwrap();
        assert_eq!(regular.attr_bool("return_snapshot"), Some(false));
        assert_eq!(regular.attr_int("version"), Some(7));
        let fresh = collections
            .iter()
            .find(|c| c.attr_str("name") == Some("regular_low"))
            .unwrap();
        assert_eq!(fresh.attr_bool("return_snapshot"), Some(true));
    }

    #[test]
    fn test_key_share_stores_keys() {
        let (engine, store, _handlers, _seen) = seeded_engine();
        let share = AppStateSyncKeyShare {
            keys: vec![crate::proto::e2e::AppStateSyncKey {
                key_id: Some(crate::proto::e2e::AppStateSyncKeyId {
                    key_id: Some(vec![7; 6]),
                }),
                key_data: Some(crate::proto::e2e::AppStateSyncKeyData {
                    key_data: Some(vec![0x55; 32]),
                    fingerprint: None,
                    timestamp: Some(2000),
                }),
            }],
        };
        assert_eq!(engine.handle_key_share(&share).unwrap(), 1);
        // Newest by timestamp wins for pushes.
        let latest = store.get_latest_app_state_sync_key().unwrap().unwrap();
        assert_eq!(latest.key_id, vec![7; 6]);
    }
}

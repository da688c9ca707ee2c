//! Mutation and patch codecs: the bridge between wire records and the
//! validated MAC-space mutations the CRDT folds in.
//!
//! A record's value blob is `IV ‖ AES-256-CBC ciphertext ‖ value MAC[32]`;
//! its index blob is the HMAC of the mutation's JSON index. Both MACs are
//! checked before a mutation may touch local state.

use prost::Message as ProstMessage;
use rand::RngCore;

use crate::appstate::keys::ExpandedAppStateKeys;
use crate::appstate::state::{content_mac, AppStateError, Mutation, Operation};
use crate::crypto::{cbc_decrypt, cbc_encrypt, mac};
use crate::proto::sync::{
    KeyId, SyncActionData, SyncActionValue, SyncdIndex, SyncdMutation, SyncdRecord, SyncdValue,
};
use crate::types::{ChatAction, ChatActionEvent, Jid};

/// Trailing MAC length inside a value blob.
const VALUE_MAC_LENGTH: usize = 32;
const IV_LENGTH: usize = 16;

/// A mutation decrypted back to its action payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMutation {
    pub operation: Operation,
    pub index: Vec<String>,
    pub data: SyncActionData,
    pub mutation: Mutation,
}

/// Decrypt and authenticate one wire record.
pub fn decrypt_mutation(
    operation: Operation,
    record: &SyncdRecord,
    keys: &ExpandedAppStateKeys,
    key_id: &[u8],
) -> Result<DecodedMutation, AppStateError> {
    let index_mac = record
        .index
        .as_ref()
        .and_then(|i| i.blob.clone())
        .ok_or_else(|| AppStateError::BadMutation("record missing index".into()))?;
    let blob = record
        .value
        .as_ref()
        .and_then(|v| v.blob.as_deref())
        .ok_or_else(|| AppStateError::BadMutation("record missing value".into()))?;

    if blob.len() < IV_LENGTH + VALUE_MAC_LENGTH {
        return Err(AppStateError::BadValueBlob);
    }
    let (content, value_mac) = blob.split_at(blob.len() - VALUE_MAC_LENGTH);

    let expected = content_mac(operation, content, key_id, &keys.value_mac);
    if !mac::mac_matches(&expected, value_mac) {
        return Err(AppStateError::ContentMacMismatch);
    }

    let iv: [u8; IV_LENGTH] = content[..IV_LENGTH].try_into().expect("checked length");
    let plaintext = cbc_decrypt(&keys.value_encryption, &iv, &content[IV_LENGTH..])
        .map_err(|_| AppStateError::BadValueBlob)?;
    let data = SyncActionData::decode(plaintext.as_slice())
        .map_err(|e| AppStateError::BadMutation(e.to_string()))?;

    // The index MAC must match the decrypted index.
    let index_bytes = data.index.as_deref().unwrap_or_default();
    let computed_index_mac = mac::hmac_sha256(&keys.index, &[index_bytes]);
    if !mac::mac_matches(&computed_index_mac, &index_mac) {
        return Err(AppStateError::BadMutation("index mac mismatch".into()));
    }

    let index: Vec<String> = serde_json::from_slice(index_bytes)
        .map_err(|e| AppStateError::BadMutation(format!("index json: {}", e)))?;

    Ok(DecodedMutation {
        operation,
        index,
        data: data.clone(),
        mutation: Mutation {
            operation,
            index_mac,
            value_mac: value_mac.to_vec(),
        },
    })
}

/// Encrypt one action into a wire record plus its MAC-space mutation.
pub fn encrypt_mutation(
    operation: Operation,
    data: &SyncActionData,
    keys: &ExpandedAppStateKeys,
    key_id: &[u8],
) -> Result<(SyncdMutation, Mutation), AppStateError> {
    let index_bytes = data.index.as_deref().unwrap_or_default();
    let index_mac = mac::hmac_sha256(&keys.index, &[index_bytes]);

    let mut iv = [0u8; IV_LENGTH];
    rand::thread_rng().fill_bytes(&mut iv);
    let ciphertext = cbc_encrypt(&keys.value_encryption, &iv, &data.encode_to_vec())
        .map_err(|_| AppStateError::BadValueBlob)?;

    let mut content = Vec::with_capacity(IV_LENGTH + ciphertext.len());
    content.extend_from_slice(&iv);
    content.extend_from_slice(&ciphertext);
    let value_mac = content_mac(operation, &content, key_id, &keys.value_mac);

    let mut blob = content;
    blob.extend_from_slice(&value_mac);

    let record = SyncdRecord {
        index: Some(SyncdIndex {
            blob: Some(index_mac.to_vec()),
        }),
        value: Some(SyncdValue { blob: Some(blob) }),
        key_id: Some(KeyId {
            id: Some(key_id.to_vec()),
        }),
    };
    Ok((
        SyncdMutation {
            operation: Some(operation.wire_value()),
            record: Some(record),
        },
        Mutation {
            operation,
            index_mac: index_mac.to_vec(),
            value_mac: value_mac.to_vec(),
        },
    ))
}

// ---------------------------------------------------------------------------
// Action builders and the event mapping
// ---------------------------------------------------------------------------

fn action_data(index: Vec<&str>, value: SyncActionValue, version: i32) -> SyncActionData {
    SyncActionData {
        index: Some(serde_json::to_vec(&index).expect("string array serializes")),
        value: Some(value),
        padding: Some(Vec::new()),
        version: Some(version),
    }
}

/// `["mute", chat]`
pub fn mute_action(chat: &Jid, muted: bool, end: i64, timestamp: i64) -> SyncActionData {
    action_data(
        vec!["mute", &chat.to_string()],
        SyncActionValue {
            timestamp: Some(timestamp),
            mute_action: Some(crate::proto::sync::MuteAction {
                muted: Some(muted),
                mute_end_timestamp: Some(end),
            }),
            ..Default::default()
        },
        2,
    )
}

/// `["pin_v1", chat]`
pub fn pin_action(chat: &Jid, pinned: bool, timestamp: i64) -> SyncActionData {
    action_data(
        vec!["pin_v1", &chat.to_string()],
        SyncActionValue {
            timestamp: Some(timestamp),
            pin_action: Some(crate::proto::sync::PinAction {
                pinned: Some(pinned),
            }),
            ..Default::default()
        },
        5,
    )
}

/// `["star", chat, message id, "1"]`
pub fn star_action(chat: &Jid, message_id: &str, starred: bool, timestamp: i64) -> SyncActionData {
    action_data(
        vec!["star", &chat.to_string(), message_id, "1"],
        SyncActionValue {
            timestamp: Some(timestamp),
            star_action: Some(crate::proto::sync::StarAction {
                starred: Some(starred),
            }),
            ..Default::default()
        },
        2,
    )
}

/// `["archive", chat]`
pub fn archive_action(chat: &Jid, archived: bool, timestamp: i64) -> SyncActionData {
    action_data(
        vec!["archive", &chat.to_string()],
        SyncActionValue {
            timestamp: Some(timestamp),
            archive_chat_action: Some(crate::proto::sync::ArchiveChatAction {
                archived: Some(archived),
            }),
            ..Default::default()
        },
        3,
    )
}

/// `["setting_pushName"]`
pub fn push_name_setting(name: &str, timestamp: i64) -> SyncActionData {
    action_data(
        vec!["setting_pushName"],
        SyncActionValue {
            timestamp: Some(timestamp),
            push_name_setting: Some(crate::proto::sync::PushNameSetting {
                name: Some(name.to_string()),
            }),
            ..Default::default()
        },
        1,
    )
}

/// Map a decoded mutation to the chat-action event the embedder sees. A
/// REMOVE or an unknown action type maps to nothing.
pub fn action_event(decoded: &DecodedMutation, from_full_sync: bool) -> Option<ChatActionEvent> {
    if decoded.operation != Operation::Set {
        return None;
    }
    let kind = decoded.index.first()?.as_str();
    let chat: Option<Jid> = decoded.index.get(1).and_then(|s| s.parse().ok());
    let value = decoded.data.value.as_ref()?;

    let action = match kind {
        "mute" => {
            let mute = value.mute_action.as_ref()?;
            ChatAction::Mute {
                muted: mute.muted.unwrap_or(false),
                end: mute.mute_end_timestamp.unwrap_or(0),
            }
        }
        "pin_v1" => ChatAction::Pin(value.pin_action.as_ref()?.pinned.unwrap_or(false)),
        "star" => ChatAction::Star {
            message_id: decoded.index.get(2)?.clone(),
            starred: value.star_action.as_ref()?.starred.unwrap_or(false),
        },
        "archive" => {
            ChatAction::Archive(value.archive_chat_action.as_ref()?.archived.unwrap_or(false))
        }
        "setting_pushName" => {
            ChatAction::PushName(value.push_name_setting.as_ref()?.name.clone().unwrap_or_default())
        }
        _ => return None,
    };

    Some(ChatActionEvent {
        chat,
        action,
        from_full_sync,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appstate::keys::expand_app_state_keys;

    fn keys() -> ExpandedAppStateKeys {
        expand_app_state_keys(&[0x33; 32])
    }

    #[test]
    fn test_mutation_roundtrip() {
        let chat: Jid = "123@s.whatsapp.net".parse().unwrap();
        let data = mute_action(&chat, true, 0, 1_700_000_000);
        let key_id = [0, 0, 0, 0, 0, 1];

        let (wire, mutation) = encrypt_mutation(Operation::Set, &data, &keys(), &key_id).unwrap();
        let decoded = decrypt_mutation(
            Operation::Set,
            wire.record.as_ref().unwrap(),
            &keys(),
            &key_id,
        )
        .unwrap();

        assert_eq!(decoded.index, vec!["mute", "123@s.whatsapp.net"]);
        assert_eq!(decoded.mutation, mutation);
        assert_eq!(decoded.data.value, data.value);
    }

    #[test]
    fn test_tampered_value_blob_fails_content_mac() {
        let chat: Jid = "123@s.whatsapp.net".parse().unwrap();
        let data = pin_action(&chat, true, 1);
        let key_id = [0, 0, 0, 0, 0, 2];
        let (mut wire, _) = encrypt_mutation(Operation::Set, &data, &keys(), &key_id).unwrap();

        let blob = wire
            .record
            .as_mut()
            .unwrap()
            .value
            .as_mut()
            .unwrap()
            .blob
            .as_mut()
            .unwrap();
        blob[20] ^= 0xff;

        assert_eq!(
            decrypt_mutation(Operation::Set, wire.record.as_ref().unwrap(), &keys(), &key_id),
            Err(AppStateError::ContentMacMismatch)
        );
    }

    #[test]
    fn test_wrong_operation_fails_content_mac() {
        let chat: Jid = "9@s.whatsapp.net".parse().unwrap();
        let data = archive_action(&chat, true, 7);
        let key_id = [1; 6];
        let (wire, _) = encrypt_mutation(Operation::Set, &data, &keys(), &key_id).unwrap();
        assert_eq!(
            decrypt_mutation(Operation::Remove, wire.record.as_ref().unwrap(), &keys(), &key_id),
            Err(AppStateError::ContentMacMismatch)
        );
    }

    #[test]
    fn test_action_event_mapping() {
        let chat: Jid = "5551@s.whatsapp.net".parse().unwrap();
        let data = star_action(&chat, "ABCD", true, 10);
        let key_id = [2; 6];
        let (wire, _) = encrypt_mutation(Operation::Set, &data, &keys(), &key_id).unwrap();
        let decoded =
            decrypt_mutation(Operation::Set, wire.record.as_ref().unwrap(), &keys(), &key_id)
                .unwrap();

        let event = action_event(&decoded, false).unwrap();
        assert_eq!(event.chat, Some(chat));
        assert_eq!(
            event.action,
            ChatAction::Star {
                message_id: "ABCD".into(),
                starred: true
            }
        );
    }
}

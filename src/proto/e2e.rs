//! Protobuf schema for end-to-end encrypted payloads: the Signal wire
//! messages carried inside `<enc>` nodes and the application `Message`
//! their plaintexts decode to.

use prost::Message as ProstMessage;

// ---------------------------------------------------------------------------
// Signal wire messages
// ---------------------------------------------------------------------------

/// Double-ratchet message body (`<enc type="msg">`, after the version byte).
#[derive(Clone, PartialEq, ProstMessage)]
pub struct SignalMessage {
    #[prost(bytes, optional, tag = "1")]
    pub ratchet_key: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "2")]
    pub counter: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub previous_counter: Option<u32>,
    #[prost(bytes, optional, tag = "4")]
    pub ciphertext: Option<Vec<u8>>,
}

/// Session-establishing message (`<enc type="pkmsg">`) wrapping a
/// [`SignalMessage`] and advertising the consumed prekey ids.
#[derive(Clone, PartialEq, ProstMessage)]
pub struct PreKeySignalMessage {
    #[prost(uint32, optional, tag = "1")]
    pub pre_key_id: Option<u32>,
    #[prost(bytes, optional, tag = "2")]
    pub base_key: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "3")]
    pub identity_key: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "4")]
    pub message: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "5")]
    pub registration_id: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub signed_pre_key_id: Option<u32>,
}

/// Group message body (`<enc type="skmsg">`, before the trailing signature).
#[derive(Clone, PartialEq, ProstMessage)]
pub struct SenderKeyMessage {
    #[prost(uint32, optional, tag = "1")]
    pub id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub iteration: Option<u32>,
    #[prost(bytes, optional, tag = "3")]
    pub ciphertext: Option<Vec<u8>>,
}

/// Sender-key bootstrap, distributed to every recipient device over 1:1
/// sessions before the first group message.
#[derive(Clone, PartialEq, ProstMessage)]
pub struct SenderKeyDistributionMessage {
    #[prost(uint32, optional, tag = "1")]
    pub id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub iteration: Option<u32>,
    #[prost(bytes, optional, tag = "3")]
    pub chain_key: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "4")]
    pub signing_key: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// Application message
// ---------------------------------------------------------------------------

/// The decrypted application message. Content variants are decoded once
/// from protobuf; downstream matches on the populated field.
#[derive(Clone, PartialEq, ProstMessage)]
pub struct Message {
    #[prost(string, optional, tag = "1")]
    pub conversation: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub sender_key_distribution_message: Option<SenderKeyDistributionHolder>,
    #[prost(message, optional, tag = "12")]
    pub protocol_message: Option<ProtocolMessage>,
    #[prost(message, optional, tag = "31")]
    pub device_sent_message: Option<DeviceSentMessage>,
}

impl Message {
    /// Convenience constructor for a plain text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            conversation: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Carrier for an embedded serialized [`SenderKeyDistributionMessage`].
#[derive(Clone, PartialEq, ProstMessage)]
pub struct SenderKeyDistributionHolder {
    #[prost(string, optional, tag = "1")]
    pub group_id: Option<String>,
    #[prost(bytes, optional, tag = "2")]
    pub axolotl_sender_key_distribution_message: Option<Vec<u8>>,
}

/// Wrapper a companion receives for messages the primary sent elsewhere.
#[derive(Clone, PartialEq, ProstMessage)]
pub struct DeviceSentMessage {
    #[prost(string, optional, tag = "1")]
    pub destination_jid: Option<String>,
    #[prost(message, optional, boxed, tag = "2")]
    pub message: Option<Box<Message>>,
}

/// Peer-to-peer control message between own devices.
#[derive(Clone, PartialEq, ProstMessage)]
pub struct ProtocolMessage {
    #[prost(int32, optional, tag = "2")]
    pub r#type: Option<i32>,
    #[prost(message, optional, tag = "6")]
    pub history_sync_notification: Option<HistorySyncNotification>,
    #[prost(message, optional, tag = "7")]
    pub app_state_sync_key_share: Option<AppStateSyncKeyShare>,
}

pub mod protocol_message_type {
    pub const REVOKE: i32 = 0;
    pub const APP_STATE_SYNC_KEY_SHARE: i32 = 5;
    pub const HISTORY_SYNC_NOTIFICATION: i32 = 6;
}

// ---------------------------------------------------------------------------
// App-state key distribution
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ProstMessage)]
pub struct AppStateSyncKeyShare {
    #[prost(message, repeated, tag = "1")]
    pub keys: Vec<AppStateSyncKey>,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct AppStateSyncKey {
    #[prost(message, optional, tag = "1")]
    pub key_id: Option<AppStateSyncKeyId>,
    #[prost(message, optional, tag = "2")]
    pub key_data: Option<AppStateSyncKeyData>,
}

/// 6-byte key id issued by the primary device.
#[derive(Clone, PartialEq, ProstMessage)]
pub struct AppStateSyncKeyId {
    #[prost(bytes, optional, tag = "1")]
    pub key_id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct AppStateSyncKeyData {
    #[prost(bytes, optional, tag = "1")]
    pub key_data: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub fingerprint: Option<AppStateSyncKeyFingerprint>,
    #[prost(int64, optional, tag = "3")]
    pub timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct AppStateSyncKeyFingerprint {
    #[prost(uint32, optional, tag = "1")]
    pub raw_id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub current_index: Option<u32>,
    #[prost(uint32, repeated, tag = "3")]
    pub device_indexes: Vec<u32>,
}

// ---------------------------------------------------------------------------
// History sync
// ---------------------------------------------------------------------------

/// Notification that a history chunk is ready; the blob reference resolves
/// through the `BlobStore` and inflates to a [`HistorySync`].
#[derive(Clone, PartialEq, ProstMessage)]
pub struct HistorySyncNotification {
    #[prost(bytes, optional, tag = "1")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "2")]
    pub file_length: Option<u64>,
    #[prost(bytes, optional, tag = "3")]
    pub media_key: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "4")]
    pub file_enc_sha256: Option<Vec<u8>>,
    #[prost(string, optional, tag = "5")]
    pub direct_path: Option<String>,
    #[prost(int32, optional, tag = "6")]
    pub sync_type: Option<i32>,
    #[prost(uint32, optional, tag = "7")]
    pub chunk_order: Option<u32>,
}

pub mod history_sync_type {
    pub const INITIAL_BOOTSTRAP: i32 = 0;
    pub const INITIAL_STATUS_V3: i32 = 1;
    pub const FULL: i32 = 2;
    pub const RECENT: i32 = 3;
    pub const PUSH_NAME: i32 = 4;
}

/// Inflated history payload.
#[derive(Clone, PartialEq, ProstMessage)]
pub struct HistorySync {
    #[prost(int32, optional, tag = "1")]
    pub sync_type: Option<i32>,
    #[prost(message, repeated, tag = "2")]
    pub conversations: Vec<Conversation>,
    #[prost(uint32, optional, tag = "5")]
    pub chunk_order: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub progress: Option<u32>,
    #[prost(message, repeated, tag = "7")]
    pub pushnames: Vec<Pushname>,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct Conversation {
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "20")]
    pub name: Option<String>,
    #[prost(uint64, optional, tag = "9")]
    pub last_msg_timestamp: Option<u64>,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct Pushname {
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub pushname: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_roundtrip() {
        let msg = Message::text("hello");
        let decoded = Message::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.conversation.as_deref(), Some("hello"));
    }

    #[test]
    fn test_prekey_message_roundtrip() {
        let msg = PreKeySignalMessage {
            pre_key_id: Some(42),
            base_key: Some(vec![5; 33]),
            identity_key: Some(vec![5; 33]),
            message: Some(vec![1, 2, 3]),
            registration_id: Some(0x1FFF),
            signed_pre_key_id: Some(1),
        };
        let decoded = PreKeySignalMessage::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_nested_device_sent_message() {
        let inner = Message::text("forwarded to self");
        let outer = Message {
            device_sent_message: Some(DeviceSentMessage {
                destination_jid: Some("123@s.whatsapp.net".into()),
                message: Some(Box::new(inner.clone())),
            }),
            ..Default::default()
        };
        let decoded = Message::decode(outer.encode_to_vec().as_slice()).unwrap();
        assert_eq!(*decoded.device_sent_message.unwrap().message.unwrap(), inner);
    }
}

//! Protobuf schema for app-state synchronization: patches, snapshots,
//! records and the action values mutations decrypt to.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct SyncdVersion {
    #[prost(uint64, optional, tag = "1")]
    pub version: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct KeyId {
    #[prost(bytes, optional, tag = "1")]
    pub id: Option<Vec<u8>>,
}

/// Index half of a record: the HMAC of the mutation's JSON index.
#[derive(Clone, PartialEq, Message)]
pub struct SyncdIndex {
    #[prost(bytes, optional, tag = "1")]
    pub blob: Option<Vec<u8>>,
}

/// Value half of a record: `IV ‖ AES-256-CBC ciphertext ‖ value MAC`.
#[derive(Clone, PartialEq, Message)]
pub struct SyncdValue {
    #[prost(bytes, optional, tag = "1")]
    pub blob: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncdRecord {
    #[prost(message, optional, tag = "1")]
    pub index: Option<SyncdIndex>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<SyncdValue>,
    #[prost(message, optional, tag = "3")]
    pub key_id: Option<KeyId>,
}

pub mod syncd_operation {
    pub const SET: i32 = 0;
    pub const REMOVE: i32 = 1;
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncdMutation {
    #[prost(int32, optional, tag = "1")]
    pub operation: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub record: Option<SyncdRecord>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncdPatch {
    #[prost(message, optional, tag = "1")]
    pub version: Option<SyncdVersion>,
    #[prost(message, repeated, tag = "2")]
    pub mutations: Vec<SyncdMutation>,
    #[prost(message, optional, tag = "3")]
    pub external_mutations: Option<ExternalBlobReference>,
    #[prost(bytes, optional, tag = "4")]
    pub snapshot_mac: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "5")]
    pub patch_mac: Option<Vec<u8>>,
    #[prost(message, optional, tag = "6")]
    pub key_id: Option<KeyId>,
    #[prost(uint32, optional, tag = "8")]
    pub device_index: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncdSnapshot {
    #[prost(message, optional, tag = "1")]
    pub version: Option<SyncdVersion>,
    #[prost(message, repeated, tag = "2")]
    pub records: Vec<SyncdRecord>,
    #[prost(bytes, optional, tag = "3")]
    pub mac: Option<Vec<u8>>,
    #[prost(message, optional, tag = "4")]
    pub key_id: Option<KeyId>,
}

/// Reference to an out-of-band blob (snapshots, large mutation sets),
/// fetched through the `BlobStore` collaborator.
#[derive(Clone, PartialEq, Message)]
pub struct ExternalBlobReference {
    #[prost(bytes, optional, tag = "1")]
    pub media_key: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    pub direct_path: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub handle: Option<String>,
    #[prost(uint64, optional, tag = "4")]
    pub file_size_bytes: Option<u64>,
    #[prost(bytes, optional, tag = "5")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "6")]
    pub file_enc_sha256: Option<Vec<u8>>,
}

/// Plaintext of a mutation value: the JSON index it keys on, the action
/// value, the version it was composed at, and reserved padding.
#[derive(Clone, PartialEq, Message)]
pub struct SyncActionData {
    #[prost(bytes, optional, tag = "1")]
    pub index: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<SyncActionValue>,
    #[prost(bytes, optional, tag = "3")]
    pub padding: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "4")]
    pub version: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncActionValue {
    #[prost(int64, optional, tag = "1")]
    pub timestamp: Option<i64>,
    #[prost(message, optional, tag = "2")]
    pub star_action: Option<StarAction>,
    #[prost(message, optional, tag = "4")]
    pub mute_action: Option<MuteAction>,
    #[prost(message, optional, tag = "5")]
    pub pin_action: Option<PinAction>,
    #[prost(message, optional, tag = "7")]
    pub push_name_setting: Option<PushNameSetting>,
    #[prost(message, optional, tag = "17")]
    pub archive_chat_action: Option<ArchiveChatAction>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StarAction {
    #[prost(bool, optional, tag = "1")]
    pub starred: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MuteAction {
    #[prost(bool, optional, tag = "1")]
    pub muted: Option<bool>,
    #[prost(int64, optional, tag = "2")]
    pub mute_end_timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PinAction {
    #[prost(bool, optional, tag = "1")]
    pub pinned: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PushNameSetting {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ArchiveChatAction {
    #[prost(bool, optional, tag = "1")]
    pub archived: Option<bool>,
}

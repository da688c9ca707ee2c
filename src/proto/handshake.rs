//! Protobuf schema for the Noise handshake envelope and the user payload
//! carried inside `ClientFinish`. Field tags must match the published
//! schema exactly for interoperability.

use prost::Message;

/// Envelope for the three handshake messages.
#[derive(Clone, PartialEq, Message)]
pub struct HandshakeMessage {
    #[prost(message, optional, tag = "2")]
    pub client_hello: Option<ClientHello>,
    #[prost(message, optional, tag = "3")]
    pub server_hello: Option<ServerHello>,
    #[prost(message, optional, tag = "4")]
    pub client_finish: Option<ClientFinish>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientHello {
    #[prost(bytes, optional, tag = "1")]
    pub ephemeral: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ServerHello {
    #[prost(bytes, optional, tag = "1")]
    pub ephemeral: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "2")]
    pub r#static: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "3")]
    pub payload: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientFinish {
    #[prost(bytes, optional, tag = "1")]
    pub r#static: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "2")]
    pub payload: Option<Vec<u8>>,
}

/// User-identity payload: a registration bundle for unregistered clients,
/// or a session-resume username/device for registered ones.
#[derive(Clone, PartialEq, Message)]
pub struct ClientPayload {
    #[prost(uint64, optional, tag = "1")]
    pub username: Option<u64>,
    #[prost(bool, optional, tag = "3")]
    pub passive: Option<bool>,
    #[prost(message, optional, tag = "5")]
    pub user_agent: Option<UserAgent>,
    #[prost(message, optional, tag = "6")]
    pub web_info: Option<WebInfo>,
    #[prost(string, optional, tag = "7")]
    pub push_name: Option<String>,
    #[prost(int32, optional, tag = "9")]
    pub session_id: Option<i32>,
    #[prost(bool, optional, tag = "10")]
    pub short_connect: Option<bool>,
    #[prost(int32, optional, tag = "12")]
    pub connect_type: Option<i32>,
    #[prost(int32, optional, tag = "13")]
    pub connect_reason: Option<i32>,
    #[prost(uint32, optional, tag = "16")]
    pub connect_attempt_count: Option<u32>,
    #[prost(uint32, optional, tag = "18")]
    pub device: Option<u32>,
    #[prost(message, optional, tag = "19")]
    pub device_pairing_data: Option<DevicePairingData>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UserAgent {
    #[prost(int32, optional, tag = "1")]
    pub platform: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub app_version: Option<AppVersion>,
    #[prost(int32, optional, tag = "3")]
    pub release_channel: Option<i32>,
    #[prost(string, optional, tag = "4")]
    pub mcc_mnc: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub os_version: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub device: Option<String>,
    #[prost(string, optional, tag = "8")]
    pub locale: Option<String>,
    #[prost(string, optional, tag = "15")]
    pub manufacturer: Option<String>,
    #[prost(string, optional, tag = "16")]
    pub os_build_number: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AppVersion {
    #[prost(uint32, optional, tag = "1")]
    pub primary: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub secondary: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub tertiary: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WebInfo {
    #[prost(string, optional, tag = "2")]
    pub version: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub web_sub_platform: Option<i32>,
}

/// Registration bundle fields; every `e_*` value is length-prefixed or
/// type-tagged exactly as the service expects.
#[derive(Clone, PartialEq, Message)]
pub struct DevicePairingData {
    #[prost(bytes, optional, tag = "1")]
    pub e_regid: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "2")]
    pub e_keytype: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "3")]
    pub e_ident: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "4")]
    pub e_skey_id: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "5")]
    pub e_skey_val: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "6")]
    pub e_skey_sig: Option<Vec<u8>>,
}

pub mod platform {
    pub const ANDROID: i32 = 0;
    pub const IOS: i32 = 1;
    pub const WEB: i32 = 14;
}

pub mod connect_type {
    pub const CELLULAR_UNKNOWN: i32 = 0;
    pub const WIFI: i32 = 1;
}

pub mod connect_reason {
    pub const PUSH: i32 = 0;
    pub const USER_ACTIVATED: i32 = 1;
}

fn base_payload(platform_id: i32) -> ClientPayload {
    ClientPayload {
        passive: Some(false),
        user_agent: Some(UserAgent {
            platform: Some(platform_id),
            app_version: Some(AppVersion {
                primary: Some(2),
                secondary: Some(3000),
                tertiary: Some(1012170356),
            }),
            release_channel: Some(0),
            mcc_mnc: Some("000000".to_string()),
            os_version: Some("10.15.7".to_string()),
            device: Some("Desktop".to_string()),
            locale: Some("en".to_string()),
            manufacturer: None,
            os_build_number: None,
        }),
        web_info: Some(WebInfo {
            version: Some("2.3000.1012170356".to_string()),
            web_sub_platform: Some(0),
        }),
        connect_type: Some(connect_type::WIFI),
        connect_reason: Some(connect_reason::USER_ACTIVATED),
        connect_attempt_count: Some(0),
        short_connect: Some(true),
        session_id: Some(rand::random()),
        ..Default::default()
    }
}

/// Registration payload for a client with no stored Jid yet.
pub fn registration_payload(
    registration_id: u32,
    identity_public: &[u8; 32],
    signed_prekey_id: u32,
    signed_prekey_public: &[u8; 32],
    signed_prekey_signature: &[u8; 64],
) -> ClientPayload {
    let mut e_ident = Vec::with_capacity(33);
    e_ident.push(crate::crypto::DJB_TYPE);
    e_ident.extend_from_slice(identity_public);

    let mut e_skey_val = Vec::with_capacity(33);
    e_skey_val.push(crate::crypto::DJB_TYPE);
    e_skey_val.extend_from_slice(signed_prekey_public);

    let mut payload = base_payload(platform::WEB);
    payload.device_pairing_data = Some(DevicePairingData {
        e_regid: Some(registration_id.to_be_bytes().to_vec()),
        e_keytype: Some(vec![crate::crypto::DJB_TYPE]),
        e_ident: Some(e_ident),
        e_skey_id: Some(signed_prekey_id.to_be_bytes()[1..].to_vec()),
        e_skey_val: Some(e_skey_val),
        e_skey_sig: Some(signed_prekey_signature.to_vec()),
    });
    payload
}

/// Session-resume payload for a registered client.
pub fn login_payload(username: u64, device: u16) -> ClientPayload {
    let mut payload = base_payload(platform::WEB);
    payload.username = Some(username);
    payload.device = Some(device as u32);
    payload.passive = Some(true);
    payload
}

//! Fan-out discovery: usync device enumeration and prekey bundle fetch.
//!
//! Before encrypting to an address the sender enumerates the target users'
//! devices, then fetches bundles for any device it has no session with.

use crate::binary::Node;
use crate::crypto::strip_public;
use crate::dispatch::request::{iq, RequestRouter};
use crate::error::{Error, Result};
use crate::signal::PreKeyBundle;
use crate::types::Jid;

/// The device-enumeration query for a set of users.
pub fn build_device_query(users: &[Jid]) -> Node {
    let mut list = Node::new("list");
    for user in users {
        list.add_child(Node::new("user").attr("jid", user.to_primary()));
    }
    let usync = Node::new("usync")
        .attr("sid", RequestRouter::next_id())
        .attr("mode", "query")
        .attr("last", "true")
        .attr("index", "0")
        .attr("context", "message")
        .child(Node::new("query").child(Node::new("devices").attr("version", "2")))
        .child(list);
    iq("get", "usync", Some(&crate::types::SERVER_JID)).child(usync)
}

/// Extract `(user, device)` tuples from a usync reply.
pub fn parse_device_response(response: &Node) -> Result<Vec<Jid>> {
    let list = response
        .descendant(&["usync", "list"])
        .ok_or_else(|| Error::Protocol("usync reply without list".into()))?;

    let mut devices = Vec::new();
    for user in list.children_by_tag("user") {
        let jid = user
            .attr_jid("jid")
            .ok_or_else(|| Error::Protocol("usync user without jid".into()))?;
        let device_list = match user.descendant(&["devices", "device-list"]) {
            Some(node) => node,
            None => {
                // A user with no advertised devices still has its primary.
                devices.push(jid.to_primary());
                continue;
            }
        };
        for device in device_list.children_by_tag("device") {
            let id = device
                .attr_int("id")
                .ok_or_else(|| Error::Protocol("device without id".into()))?;
            devices.push(Jid::device(jid.user.clone(), 0, id as u16));
        }
    }
    Ok(devices)
}

/// Fan-out policy: skip the device we are running on; include our own
/// primary only when `exclude_self` is false. Other users' devices always
/// participate.
pub fn fan_out_targets(own: &Jid, devices: &[Jid], exclude_self: bool) -> Vec<Jid> {
    devices
        .iter()
        .filter(|candidate| {
            if candidate.user != own.user {
                return true;
            }
            if candidate.device == own.device {
                return false;
            }
            if candidate.device == 0 {
                return !exclude_self;
            }
            true
        })
        .cloned()
        .collect()
}

/// The prekey-bundle fetch for a set of devices.
pub fn build_prekey_query(devices: &[Jid]) -> Node {
    let mut key = Node::new("key");
    for device in devices {
        key.add_child(Node::new("user").attr("jid", device.clone()));
    }
    iq("get", "encrypt", Some(&crate::types::SERVER_JID)).child(key)
}

fn bytes_of(node: &Node, path: &[&str]) -> Result<Vec<u8>> {
    node.descendant(path)
        .and_then(|n| n.content_bytes())
        .map(|b| b.to_vec())
        .ok_or_else(|| Error::Protocol(format!("bundle missing {}", path.join("/"))))
}

fn key32(bytes: &[u8], what: &str) -> Result<[u8; 32]> {
    strip_public(bytes).ok_or_else(|| Error::Protocol(format!("bundle {} has bad length", what)))
}

fn be_u32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32)
}

/// Parse one `<user>` entry of a prekey reply into a bundle.
pub fn parse_prekey_bundle(user: &Node) -> Result<(Jid, PreKeyBundle)> {
    let jid = user
        .attr_jid("jid")
        .ok_or_else(|| Error::Protocol("bundle user without jid".into()))?;

    let registration_id = be_u32(&bytes_of(user, &["registration"])?);
    let identity_key = key32(&bytes_of(user, &["identity"])?, "identity")?;
    let identity_ed: [u8; 32] = bytes_of(user, &["edkey"])?
        .as_slice()
        .try_into()
        .map_err(|_| Error::Protocol("bundle edkey has bad length".into()))?;

    let signed_prekey_id = be_u32(&bytes_of(user, &["skey", "id"])?);
    let signed_prekey_public = key32(&bytes_of(user, &["skey", "value"])?, "skey")?;
    let signed_prekey_signature: [u8; 64] = bytes_of(user, &["skey", "signature"])?
        .as_slice()
        .try_into()
        .map_err(|_| Error::Protocol("bundle signature has bad length".into()))?;

    let (one_time_prekey_id, one_time_prekey) = match user.child_by_tag("key") {
        Some(key) => (
            Some(be_u32(&bytes_of(key, &["id"])?)),
            Some(key32(&bytes_of(key, &["value"])?, "prekey")?),
        ),
        None => (None, None),
    };

    Ok((
        jid,
        PreKeyBundle {
            registration_id,
            identity_key,
            identity_ed,
            signed_prekey_id,
            signed_prekey_public,
            signed_prekey_signature,
            one_time_prekey_id,
            one_time_prekey,
        },
    ))
}

/// Parse a full prekey reply: one bundle per `<user>`.
pub fn parse_prekey_response(response: &Node) -> Result<Vec<(Jid, PreKeyBundle)>> {
    let list = response
        .child_by_tag("list")
        .or_else(|| response.child_by_tag("key"))
        .ok_or_else(|| Error::Protocol("prekey reply without list".into()))?;
    list.children_by_tag("user")
        .into_iter()
        .map(parse_prekey_bundle)
        .collect()
}

/// Build the `<user>` entry a scripted peer answers a prekey query with.
/// Lives here so tests and loopback servers compose replies the same way
/// the parser expects.
pub fn build_prekey_bundle_node(jid: &Jid, bundle: &PreKeyBundle) -> Node {
    let mut user = Node::new("user")
        .attr("jid", jid.clone())
        .child(Node::new("registration").bytes(bundle.registration_id.to_be_bytes().to_vec()))
        .child(Node::new("identity").bytes(crate::crypto::prefix_public(&bundle.identity_key)))
        .child(Node::new("edkey").bytes(bundle.identity_ed.to_vec()))
        .child(
            Node::new("skey")
                .child(Node::new("id").bytes(bundle.signed_prekey_id.to_be_bytes()[1..].to_vec()))
                .child(
                    Node::new("value")
                        .bytes(crate::crypto::prefix_public(&bundle.signed_prekey_public)),
                )
                .child(Node::new("signature").bytes(bundle.signed_prekey_signature.to_vec())),
        );
    if let (Some(id), Some(public)) = (bundle.one_time_prekey_id, bundle.one_time_prekey) {
        user.add_child(
            Node::new("key")
                .child(Node::new("id").bytes(id.to_be_bytes()[1..].to_vec()))
                .child(Node::new("value").bytes(crate::crypto::prefix_public(&public))),
        );
    }
    user
}

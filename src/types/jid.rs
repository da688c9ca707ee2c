//! Jid: the identity triple `(user, device, server)`.
//!
//! Two normalized forms matter to the protocol: the primary Jid
//! (`device == 0`) used in participant lists, and the device Jid
//! (`device > 0`) used for per-session encryption. Companion devices
//! always carry a nonzero device part.

use std::fmt;
use std::str::FromStr;

/// Known servers.
pub mod servers {
    /// Regular users.
    pub const WHATSAPP: &str = "s.whatsapp.net";
    /// Groups.
    pub const GROUP: &str = "g.us";
    /// Broadcast lists and the status feed.
    pub const BROADCAST: &str = "broadcast";
    /// Legacy user addressing.
    pub const USER: &str = "c.us";
    /// Companion (hidden-user) addressing.
    pub const COMPANION: &str = "lid";
}

/// Internal id of a message, as carried in node attributes.
pub type MessageId = String;

/// A protocol address: user, optional agent/device parts, and server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Jid {
    pub user: String,
    pub agent: u8,
    pub device: u16,
    pub server: String,
}

impl Jid {
    /// A primary Jid (`device == 0`) on the given server.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
            ..Default::default()
        }
    }

    /// A device Jid for a specific companion or primary device.
    pub fn device(user: impl Into<String>, agent: u8, device: u16) -> Self {
        let server = if agent == 1 {
            servers::COMPANION
        } else {
            servers::WHATSAPP
        };
        Self {
            user: user.into(),
            agent: if agent == 1 { 0 } else { agent },
            device,
            server: server.to_string(),
        }
    }

    /// The status broadcast feed.
    pub fn status_broadcast() -> Self {
        Jid::new("status", servers::BROADCAST)
    }

    /// Strips agent and device, yielding the primary form.
    pub fn to_primary(&self) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server.clone(),
            ..Default::default()
        }
    }

    /// Whether this is a device Jid (`device > 0`).
    pub fn is_device(&self) -> bool {
        self.device > 0
    }

    pub fn is_group(&self) -> bool {
        self.server == servers::GROUP
    }

    pub fn is_broadcast_list(&self) -> bool {
        self.server == servers::BROADCAST && self.user != "status"
    }

    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
    }

    /// The user part of the Signal address for this Jid. Companion-server
    /// users are disambiguated with an agent suffix so they never collide
    /// with the primary namespace.
    pub fn signal_user(&self) -> String {
        if self.server == servers::COMPANION {
            format!("{}_1", self.user)
        } else if self.agent != 0 {
            format!("{}_{}", self.user, self.agent)
        } else {
            self.user.clone()
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.agent > 0 {
            write!(f, "{}.{}:{}@{}", self.user, self.agent, self.device, self.server)
        } else if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else if !self.user.is_empty() {
            write!(f, "{}@{}", self.user, self.server)
        } else {
            write!(f, "{}", self.server)
        }
    }
}

/// Error produced when a Jid string does not parse.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to parse jid: {0}")]
pub struct JidParseError(pub String);

impl FromStr for Jid {
    type Err = JidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user_part, server) = match s.split_once('@') {
            Some((u, srv)) => (u, srv),
            None => return Ok(Jid::new("", s)),
        };

        let mut jid = Jid {
            user: user_part.to_string(),
            server: server.to_string(),
            ..Default::default()
        };

        if let Some((user, rest)) = user_part.split_once('.') {
            // user.agent:device@server
            jid.user = user.to_string();
            let (agent, device) = match rest.split_once(':') {
                Some((a, d)) => (a, Some(d)),
                None => (rest, None),
            };
            jid.agent = agent
                .parse()
                .map_err(|_| JidParseError(format!("bad agent in {:?}", s)))?;
            if let Some(d) = device {
                jid.device = d
                    .parse()
                    .map_err(|_| JidParseError(format!("bad device in {:?}", s)))?;
            }
        } else if let Some((user, device)) = user_part.split_once(':') {
            // user:device@server
            jid.user = user.to_string();
            jid.device = device
                .parse()
                .map_err(|_| JidParseError(format!("bad device in {:?}", s)))?;
        }

        Ok(jid)
    }
}

lazy_static::lazy_static! {
    /// The bare server Jid, used as the `to` of stream-level stanzas.
    pub static ref SERVER_JID: Jid = Jid::new("", servers::WHATSAPP);
    pub static ref GROUP_SERVER_JID: Jid = Jid::new("", servers::GROUP);
    pub static ref BROADCAST_SERVER_JID: Jid = Jid::new("", servers::BROADCAST);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primary() {
        let jid: Jid = "1234567890@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.server, servers::WHATSAPP);
        assert_eq!(jid.device, 0);
        assert!(!jid.is_device());
    }

    #[test]
    fn test_parse_device() {
        let jid: Jid = "1234567890:3@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.device, 3);
        assert!(jid.is_device());
        assert_eq!(jid.to_primary(), "1234567890@s.whatsapp.net".parse().unwrap());
    }

    #[test]
    fn test_parse_agent_device() {
        let jid: Jid = "1234567890.2:7@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.agent, 2);
        assert_eq!(jid.device, 7);
        assert_eq!(jid.to_string(), "1234567890.2:7@s.whatsapp.net");
    }

    #[test]
    fn test_display_roundtrip() {
        for raw in [
            "1234567890@s.whatsapp.net",
            "1234567890:2@s.whatsapp.net",
            "12345-67890@g.us",
            "status@broadcast",
        ] {
            let jid: Jid = raw.parse().unwrap();
            assert_eq!(jid.to_string(), raw);
        }
    }

    #[test]
    fn test_signal_user_disambiguation() {
        let primary: Jid = "123@s.whatsapp.net".parse().unwrap();
        let companion: Jid = "123@lid".parse().unwrap();
        assert_eq!(primary.signal_user(), "123");
        assert_eq!(companion.signal_user(), "123_1");
    }

    #[test]
    fn test_group_detection() {
        let group: Jid = "12345-67890@g.us".parse().unwrap();
        assert!(group.is_group());
        assert!(Jid::status_broadcast().server == servers::BROADCAST);
    }
}

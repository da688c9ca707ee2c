//! Signal addresses: the `(user, device)` pair sessions are keyed by.

use std::fmt;

use crate::types::Jid;

/// Address of one remote device's session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalAddress {
    name: String,
    device_id: u32,
}

impl SignalAddress {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl fmt::Display for SignalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.device_id)
    }
}

impl From<&Jid> for SignalAddress {
    fn from(jid: &Jid) -> Self {
        SignalAddress::new(jid.signal_user(), jid.device as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::servers;

    #[test]
    fn test_address_from_jid() {
        let jid: Jid = "123:2@s.whatsapp.net".parse().unwrap();
        let addr = SignalAddress::from(&jid);
        assert_eq!(addr.name(), "123");
        assert_eq!(addr.device_id(), 2);
        assert_eq!(addr.to_string(), "123:2");
    }

    #[test]
    fn test_companion_namespace_is_distinct() {
        let primary = SignalAddress::from(&Jid::new("123", servers::WHATSAPP));
        let hidden = SignalAddress::from(&Jid::new("123", servers::COMPANION));
        assert_ne!(primary, hidden);
    }
}

// ── Bus topic layout ──
//
//   <prefix>/devices/<device>/entity/<entity>/set     commands in
//   <prefix>/devices/<device>/entity/<entity>/state   state out (retained)
//   <prefix>/seen_nodes                               all gateways
//   <prefix>/gateway/<name>/seen_nodes                one gateway
//   homeassistant/<component>/<device>_<entity>/config

use crate::model::EntityKey;

const ROLE: &str = "entity";
const DISCOVERY_PREFIX: &str = "homeassistant";

/// Direction of an entity topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Set,
    State,
}

impl Channel {
    fn suffix(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::State => "state",
        }
    }
}

/// Topic builder and parser bound to one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn command(&self, key: &EntityKey) -> String {
        self.entity(key, Channel::Set)
    }

    pub fn state(&self, key: &EntityKey) -> String {
        self.entity(key, Channel::State)
    }

    fn entity(&self, key: &EntityKey, channel: Channel) -> String {
        format!(
            "{}/devices/{}/{ROLE}/{}/{}",
            self.prefix,
            key.device,
            key.entity,
            channel.suffix()
        )
    }

    pub fn seen_nodes(&self) -> String {
        format!("{}/seen_nodes", self.prefix)
    }

    pub fn gateway_seen_nodes(&self, gateway: &str) -> String {
        format!("{}/gateway/{gateway}/seen_nodes", self.prefix)
    }

    pub fn discovery(component: &str, key: &EntityKey) -> String {
        format!(
            "{DISCOVERY_PREFIX}/{component}/{}_{}/config",
            key.device, key.entity
        )
    }

    /// Split an entity topic into its key and channel. Anything else,
    /// including topics under a different prefix, yields `None`.
    pub fn parse(&self, topic: &str) -> Option<(EntityKey, Channel)> {
        let rest = topic.strip_prefix(self.prefix.as_str())?.strip_prefix("/devices/")?;
        let mut parts = rest.split('/');
        let (Some(device), Some(ROLE), Some(entity), Some(channel), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return None;
        };

        let channel = match channel {
            "set" => Channel::Set,
            "state" => Channel::State,
            _ => return None,
        };
        if device.is_empty() || entity.is_empty() {
            return None;
        }
        Some((EntityKey::new(device, entity), channel))
    }
}

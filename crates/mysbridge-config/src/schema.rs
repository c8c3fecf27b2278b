// ── File schema ──
//
// Mirrors the on-disk document. Every section is defaulted field by
// field so a sparse file (or a handful of environment variables) is
// enough to describe a gateway.

use std::collections::BTreeMap;
use std::time::Duration;

use mysbridge_core::EntityKind;
use serde::{Deserialize, Serialize};

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,

    /// Physical gateways keyed by name.
    pub mysensors: BTreeMap<String, GatewaySection>,

    pub mqtt: MqttSection,

    pub adapter: AdapterSection,

    pub devices: Vec<DeviceSection>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            mysensors: BTreeMap::new(),
            mqtt: MqttSection::default(),
            adapter: AdapterSection::default(),
            devices: Vec::new(),
        }
    }
}

// ── Gateways ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Ethernet,
    #[serde(alias = "serial")]
    Rs485,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewaySection {
    pub transport: TransportKind,
    pub ethernet: EthernetSection,
    pub rs485: SerialSection,
    pub gateway: NodeSection,
    pub tcp_service: PassthroughSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EthernetSection {
    pub host: String,
    pub port: u16,
}

impl Default for EthernetSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5003,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialSection {
    pub device: String,
    pub baud_rate: u32,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: mysbridge_proto::DEFAULT_BAUD_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeSection {
    pub node_id_range: NodeIdRange,
    #[serde(with = "humantime_duration")]
    pub version_request_period: Duration,
    pub random_id_assignment: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            node_id_range: NodeIdRange::default(),
            version_request_period: Duration::from_secs(5),
            random_id_assignment: false,
        }
    }
}

/// Wider than `u8` so out-of-range values reach validation instead of
/// failing as a type error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeIdRange {
    pub start: u16,
    pub end: u16,
}

impl Default for NodeIdRange {
    fn default() -> Self {
        Self { start: 1, end: 254 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PassthroughSection {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

// ── Broker ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttSection {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(with = "humantime_duration")]
    pub keep_alive: Duration,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker: String::new(),
            port: 1883,
            client_id: "ms-mqtt-adapter".into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        }
    }
}

// ── Adapter ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdapterSection {
    pub topic_prefix: String,
    pub homeassistant_discovery: bool,
    pub optimistic: bool,
    pub request_ack: bool,
    pub sync: SyncSection,
}

impl Default for AdapterSection {
    fn default() -> Self {
        Self {
            topic_prefix: "ms-mqtt-adapter".into(),
            homeassistant_discovery: true,
            optimistic: false,
            request_ack: true,
            sync: SyncSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncSection {
    pub enabled: bool,
    #[serde(with = "humantime_duration")]
    pub period: Duration,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            enabled: false,
            period: Duration::from_secs(30),
        }
    }
}

// ── Devices ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceSection {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub node_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_ack: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hw_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_area: Option<String>,
    #[serde(default)]
    pub entities: Vec<EntitySection>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EntitySection {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub child_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<u8>,
    pub entity_type: EntityKind,
    /// Protocol name such as `V_PERCENTAGE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
}

// ── Durations ───────────────────────────────────────────────────────

/// `5s`, `2m 30s` and friends; bare integers are seconds.
mod humantime_duration {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => humantime::parse_duration(text.trim()).map_err(D::Error::custom),
        }
    }
}

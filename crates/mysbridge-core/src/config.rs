// ── Runtime bridge configuration ──
//
// These types describe the gateways, the bus connection and the device
// catalogue the bridge runs with. They are fully defaulted and validated
// before they get here: `mysbridge-config` reads the file and hands in a
// `BridgeConfig`. Core never touches disk.

use std::ops::RangeInclusive;
use std::time::Duration;

use mysbridge_proto::VariableType;

use crate::model::{EntityKind, EntityKey};

/// Gateway name used when a device does not name one.
pub const DEFAULT_GATEWAY: &str = "default";

/// Everything the bridge needs to run.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub gateways: Vec<GatewayConfig>,
    pub bus: BusConfig,
    pub adapter: AdapterConfig,
    pub devices: Vec<DeviceConfig>,
}

// ── Gateways ─────────────────────────────────────────────────────────

/// How to reach one physical gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkConfig {
    Ethernet { host: String, port: u16 },
    Serial { device: String, baud_rate: u32 },
}

/// Node id allocation policy for `ID_REQUEST`s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdAssignment {
    /// Lowest free id in the range.
    #[default]
    Sequential,
    /// Uniform draw from the free ids in the range.
    Random,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub name: String,
    pub link: LinkConfig,
    /// Ids this gateway may hand out. Always within `1..=254`.
    pub node_ids: RangeInclusive<u8>,
    pub assignment: IdAssignment,
    /// Period of the `I_VERSION` heartbeat.
    pub version_request_period: Duration,
    /// Port of the passthrough listener, if enabled.
    pub passthrough_port: Option<u16>,
}

impl GatewayConfig {
    pub fn ethernet(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            link: LinkConfig::Ethernet {
                host: host.into(),
                port,
            },
            node_ids: 1..=254,
            assignment: IdAssignment::Sequential,
            version_request_period: Duration::from_secs(5),
            passthrough_port: None,
        }
    }
}

// ── Message bus ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".into(),
            port: 1883,
            client_id: "ms-mqtt-adapter".into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        }
    }
}

// ── Adapter behaviour ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub topic_prefix: String,
    pub discovery: bool,
    /// Global optimistic default; entity and device settings override it.
    pub optimistic: bool,
    /// Global ack-request default; device settings override it.
    pub request_ack: bool,
    pub sync: SyncConfig,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "ms-mqtt-adapter".into(),
            discovery: true,
            optimistic: false,
            request_ack: true,
            sync: SyncConfig::default(),
        }
    }
}

/// Periodic resend of last-known actuator state. Off unless configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub enabled: bool,
    pub period: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period: Duration::from_secs(30),
        }
    }
}

// ── Devices & entities ───────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    pub node_id: u8,
    /// Gateway name; `None` means [`DEFAULT_GATEWAY`].
    pub gateway: Option<String>,
    pub optimistic: Option<bool>,
    pub request_ack: Option<bool>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    pub hw_version: Option<String>,
    pub suggested_area: Option<String>,
    pub entities: Vec<EntityConfig>,
}

impl DeviceConfig {
    pub fn gateway_name(&self) -> &str {
        self.gateway.as_deref().unwrap_or(DEFAULT_GATEWAY)
    }

    pub fn key(&self, entity: &EntityConfig) -> EntityKey {
        EntityKey::new(&self.id, &entity.id)
    }

    /// Node id an entity lives on: its own override, else the device's.
    pub fn node_for(&self, entity: &EntityConfig) -> u8 {
        entity.node_id.unwrap_or(self.node_id)
    }

    /// Ack-request flag for commands to this device.
    pub fn request_ack(&self, adapter: &AdapterConfig) -> bool {
        self.request_ack.unwrap_or(adapter.request_ack)
    }
}

#[derive(Debug, Clone)]
pub struct EntityConfig {
    pub id: String,
    pub name: String,
    pub child_id: u8,
    pub node_id: Option<u8>,
    pub kind: EntityKind,
    pub variable: Option<VariableType>,
    pub read_only: Option<bool>,
    pub write_only: Option<bool>,
    pub optimistic: Option<bool>,
    pub initial_value: Option<String>,
    pub unit_of_measurement: Option<String>,
    pub state_class: Option<String>,
    pub device_class: Option<String>,
    pub icon: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub step: Option<f64>,
    pub options: Vec<String>,
    pub payload_on: Option<String>,
    pub payload_off: Option<String>,
}

impl EntityConfig {
    /// A minimal entity of `kind` on `child_id`; everything else defaulted.
    pub fn new(id: impl Into<String>, kind: EntityKind, child_id: u8) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            child_id,
            node_id: None,
            kind,
            variable: None,
            read_only: None,
            write_only: None,
            optimistic: None,
            initial_value: None,
            unit_of_measurement: None,
            state_class: None,
            device_class: None,
            icon: None,
            min_value: None,
            max_value: None,
            step: None,
            options: Vec::new(),
            payload_on: None,
            payload_off: None,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.unwrap_or_else(|| self.kind.default_read_only())
    }

    pub fn is_write_only(&self) -> bool {
        self.write_only.unwrap_or(false)
    }

    pub fn can_receive_commands(&self) -> bool {
        !self.is_read_only()
    }

    pub fn can_report_state(&self) -> bool {
        !self.is_write_only()
    }

    /// Wire variable type: explicit override, else the kind's default.
    pub fn variable_type(&self) -> VariableType {
        self.variable.unwrap_or_else(|| self.kind.default_variable())
    }

    pub fn initial_value(&self) -> &str {
        self.initial_value
            .as_deref()
            .unwrap_or_else(|| self.kind.default_initial_value())
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit_of_measurement
            .as_deref()
            .or_else(|| self.kind.default_unit())
    }

    pub fn state_class(&self) -> Option<&str> {
        self.state_class
            .as_deref()
            .or_else(|| self.kind.default_state_class())
    }
}

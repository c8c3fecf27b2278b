// ── Entity model ──
//
// Home-automation facing entity kinds and the per-kind defaults that
// decide how an entity maps onto the sensor network: its variable type,
// whether it accepts commands, which payloads it accepts, and how it is
// advertised.

use std::fmt;

use mysbridge_proto::VariableType;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Every entity type a device may declare.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    // Actuators
    Switch,
    Light,
    Dimmer,
    Cover,
    Text,
    Number,
    Select,
    Climate,
    RgbLight,
    RgbwLight,

    // Generic sensors
    Sensor,
    BinarySensor,

    // Typed numeric sensors
    Temperature,
    Humidity,
    Battery,
    Voltage,
    Current,
    Pressure,
    Level,
    Percentage,
    Weight,
    Distance,
    LightLevel,
    Watt,
    Kwh,
    Flow,
    Volume,
    Ph,
    Orp,
    Ec,
    Var,
    Va,
    PowerFactor,
    Custom,
    Position,
    Uv,
    Rain,
    Rainrate,
    Wind,
    Gust,
    Direction,
    Impedance,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Whether entities of this kind are read-only unless configured otherwise.
    pub fn default_read_only(self) -> bool {
        matches!(self, Self::Sensor | Self::BinarySensor)
    }

    pub fn is_binary(self) -> bool {
        self == Self::BinarySensor
    }

    /// The variable type carried by this kind on the wire when the entity
    /// does not name one explicitly.
    pub fn default_variable(self) -> VariableType {
        match self {
            Self::Switch | Self::Light | Self::BinarySensor => VariableType::Status,
            Self::Dimmer | Self::Number | Self::Battery | Self::Percentage => {
                VariableType::Percentage
            }
            Self::Cover => VariableType::Up,
            Self::Text | Self::Select => VariableType::Text,
            Self::Climate => VariableType::HvacSetpointHeat,
            Self::RgbLight => VariableType::Rgb,
            Self::RgbwLight => VariableType::Rgbw,
            Self::Sensor | Self::Custom => VariableType::Custom,
            Self::Temperature => VariableType::Temp,
            Self::Humidity => VariableType::Hum,
            Self::Voltage => VariableType::Voltage,
            Self::Current => VariableType::Current,
            Self::Pressure => VariableType::Pressure,
            Self::Level => VariableType::Level,
            Self::Weight => VariableType::Weight,
            Self::Distance => VariableType::Distance,
            Self::LightLevel => VariableType::LightLevel,
            Self::Watt => VariableType::Watt,
            Self::Kwh => VariableType::Kwh,
            Self::Flow => VariableType::Flow,
            Self::Volume => VariableType::Volume,
            Self::Ph => VariableType::Ph,
            Self::Orp => VariableType::Orp,
            Self::Ec => VariableType::Ec,
            Self::Var => VariableType::Var,
            Self::Va => VariableType::Va,
            Self::PowerFactor => VariableType::PowerFactor,
            Self::Position => VariableType::Position,
            Self::Uv => VariableType::Uv,
            Self::Rain => VariableType::Rain,
            Self::Rainrate => VariableType::Rainrate,
            Self::Wind => VariableType::Wind,
            Self::Gust => VariableType::Gust,
            Self::Direction => VariableType::Direction,
            Self::Impedance => VariableType::Impedance,
        }
    }

    /// Whether a bus command payload is acceptable for this kind.
    pub fn accepts_payload(self, payload: &str) -> bool {
        match self {
            Self::Switch | Self::Light => matches!(payload, "0" | "1" | "ON" | "OFF"),
            Self::Cover => matches!(payload, "UP" | "DOWN" | "STOP" | "OPEN" | "CLOSE"),
            _ => true,
        }
    }

    /// Discovery component this kind is advertised as.
    pub fn component(self, read_only: bool) -> &'static str {
        match self {
            Self::Switch => "switch",
            Self::Light | Self::Dimmer | Self::RgbLight | Self::RgbwLight => "light",
            Self::Text if read_only => "sensor",
            Self::Text => "text",
            Self::Number => "number",
            Self::Select => "select",
            Self::Cover => "cover",
            Self::BinarySensor => "binary_sensor",
            _ => "sensor",
        }
    }

    /// Unit of measurement when the entity does not set one.
    pub fn default_unit(self) -> Option<&'static str> {
        Some(match self {
            Self::Temperature => "°C",
            Self::Humidity | Self::Battery | Self::Percentage | Self::Level => "%",
            Self::Voltage => "V",
            Self::Current => "A",
            Self::Pressure => "hPa",
            Self::Weight => "kg",
            Self::Distance => "m",
            Self::LightLevel => "lx",
            Self::Watt => "W",
            Self::Kwh => "kWh",
            Self::Flow => "m³/h",
            Self::Volume => "m³",
            _ => return None,
        })
    }

    /// State class when the entity does not set one.
    pub fn default_state_class(self) -> Option<&'static str> {
        match self {
            Self::Kwh | Self::Volume => Some("total_increasing"),
            Self::Temperature
            | Self::Humidity
            | Self::Battery
            | Self::Percentage
            | Self::Level
            | Self::Voltage
            | Self::Current
            | Self::Pressure
            | Self::Weight
            | Self::Distance
            | Self::LightLevel
            | Self::Watt
            | Self::Flow => Some("measurement"),
            _ => None,
        }
    }

    /// Initial state published before any device report, for entities that
    /// publish one.
    pub fn default_initial_value(self) -> &'static str {
        match self {
            Self::Text | Self::Select | Self::Sensor => "",
            _ => "0",
        }
    }
}

// ── EntityKey ────────────────────────────────────────────────────────

/// Identifies one entity across the whole bridge: `(device id, entity id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub device: String,
    pub entity: String,
}

impl EntityKey {
    pub fn new(device: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            entity: entity.into(),
        }
    }

    /// Stable identifier used as the discovery `unique_id`.
    pub fn unique_id(&self) -> String {
        format!("{}_{}_entity", self.device, self.entity)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.entity)
    }
}

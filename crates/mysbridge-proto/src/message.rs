// ── MySensors serial protocol codec ──
//
// One message per line: `node;child;kind;ack;subtype;payload`.
// Pure and synchronous; transports call `Message::parse` on every line
// they read and `Message::to_line` on every message they write.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{EnumString, FromRepr, IntoStaticStr};

use crate::error::ParseError;

/// Node id a fresh node uses before the controller hands it one.
pub const UNASSIGNED_NODE_ID: u8 = 0;

/// Broadcast / auto-assign node id. Never tracked as a real node.
pub const BROADCAST_NODE_ID: u8 = 255;

/// Child id used by node-level (internal) messages.
pub const NODE_CHILD_ID: u8 = 255;

const FIELD_COUNT: usize = 6;

// ── Enumerations ────────────────────────────────────────────────────

/// Command field of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[repr(u8)]
pub enum MessageKind {
    Presentation = 0,
    Set = 1,
    Req = 2,
    Internal = 3,
    Stream = 4,
}

/// Subtypes of [`MessageKind::Internal`] messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u8)]
pub enum InternalType {
    BatteryLevel = 0,
    Time = 1,
    Version = 2,
    IdRequest = 3,
    IdResponse = 4,
    InclusionMode = 5,
    Config = 6,
    FindParent = 7,
    FindParentResponse = 8,
    LogMessage = 9,
    Children = 10,
    SketchName = 11,
    SketchVersion = 12,
    Reboot = 13,
    GatewayReady = 14,
}

/// Subtypes of [`MessageKind::Presentation`] messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u8)]
pub enum SensorType {
    Door = 0,
    Motion = 1,
    Smoke = 2,
    Binary = 3,
    Dimmer = 4,
    Cover = 5,
    Temp = 6,
    Hum = 7,
    Baro = 8,
    Wind = 9,
    Rain = 10,
    Uv = 11,
    Weight = 12,
    Power = 13,
    Heater = 14,
    Distance = 15,
    LightLevel = 16,
    ArduinoNode = 17,
    ArduinoRepeaterNode = 18,
    Lock = 19,
    Ir = 20,
    Water = 21,
    AirQuality = 22,
    Custom = 23,
    Dust = 24,
    SceneController = 25,
    RgbLight = 26,
    RgbwLight = 27,
    ColorSensor = 28,
    Hvac = 29,
    Multimeter = 30,
    Sprinkler = 31,
    WaterLeak = 32,
    Sound = 33,
    Vibration = 34,
    Moisture = 35,
    Info = 36,
    Gas = 37,
    Gps = 38,
    WaterQuality = 39,
}

/// Subtypes of [`MessageKind::Set`] and [`MessageKind::Req`] messages.
///
/// Configuration refers to these by their protocol names (`"V_STATUS"`),
/// see [`VariableType::from_name`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(try_from = "String", into = "String")]
#[repr(u8)]
pub enum VariableType {
    Temp = 0,
    Hum = 1,
    Status = 2,
    Percentage = 3,
    Pressure = 4,
    Forecast = 5,
    Rain = 6,
    Rainrate = 7,
    Wind = 8,
    Gust = 9,
    Direction = 10,
    Uv = 11,
    Weight = 12,
    Distance = 13,
    Impedance = 14,
    Armed = 15,
    Tripped = 16,
    Watt = 17,
    Kwh = 18,
    SceneOn = 19,
    SceneOff = 20,
    HvacFlowState = 21,
    HvacSpeed = 22,
    LightLevel = 23,
    Var1 = 24,
    Var2 = 25,
    Var3 = 26,
    Var4 = 27,
    Var5 = 28,
    Up = 29,
    Down = 30,
    Stop = 31,
    IrSend = 32,
    IrReceive = 33,
    Flow = 34,
    Volume = 35,
    LockStatus = 36,
    Level = 37,
    Voltage = 38,
    Current = 39,
    Rgb = 40,
    Rgbw = 41,
    Id = 42,
    UnitPrefix = 43,
    HvacSetpointCool = 44,
    HvacSetpointHeat = 45,
    HvacFlowMode = 46,
    Text = 47,
    Custom = 48,
    Position = 49,
    IrRecord = 50,
    Ph = 51,
    Orp = 52,
    Ec = 53,
    Var = 54,
    Va = 55,
    PowerFactor = 56,
}

impl VariableType {
    /// Look up a variable type by its protocol name, e.g. `"V_STATUS"`.
    pub fn from_name(name: &str) -> Option<Self> {
        name.strip_prefix("V_").and_then(|rest| rest.parse().ok())
    }

    /// Protocol name, e.g. `"V_STATUS"`.
    pub fn name(self) -> String {
        let short: &'static str = self.into();
        format!("V_{short}")
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<String> for VariableType {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_name(&value)
            .ok_or_else(|| ParseError::new(format!("unknown variable type '{value}'")))
    }
}

impl From<VariableType> for String {
    fn from(value: VariableType) -> Self {
        value.name()
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

// ── Message ─────────────────────────────────────────────────────────

/// A single decoded wire message.
///
/// `sub_type` is kept raw; its meaning depends on `kind` and is exposed
/// through [`internal_type`](Self::internal_type),
/// [`variable_type`](Self::variable_type) and
/// [`sensor_type`](Self::sensor_type).
///
/// A message is valid for the wire when its payload contains neither `;`
/// nor a line break. For every valid message `m`,
/// `Message::parse(&m.to_line()) == Ok(m)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    pub node_id: u8,
    pub child_id: u8,
    pub kind: MessageKind,
    pub ack: bool,
    pub sub_type: u8,
    pub payload: String,
}

impl Message {
    /// Decode one wire line. Trailing CR/LF are ignored.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.split(';').collect();
        let [node, child, kind, ack, sub_type, payload] = fields.as_slice() else {
            return Err(ParseError::new(format!(
                "expected {FIELD_COUNT} fields, got {}",
                fields.len()
            )));
        };

        let kind_code = parse_field(kind, "message kind")?;
        let kind = MessageKind::from_repr(kind_code)
            .ok_or_else(|| ParseError::new(format!("unknown message kind {kind_code}")))?;

        Ok(Self {
            node_id: parse_field(node, "node id")?,
            child_id: parse_field(child, "child id")?,
            kind,
            ack: *ack == "1",
            sub_type: parse_field(sub_type, "sub type")?,
            payload: (*payload).to_owned(),
        })
    }

    /// Encode as a wire line, without the trailing newline.
    pub fn to_line(&self) -> String {
        self.to_string()
    }

    /// A `SET` for `variable` on `node_id`/`child_id`, no ack requested.
    pub fn set(node_id: u8, child_id: u8, variable: VariableType, payload: impl Into<String>) -> Self {
        Self::set_with_ack(node_id, child_id, variable, payload, false)
    }

    /// A `SET` with an explicit ack flag. Requesting an ack makes the node
    /// echo the value back, which is what confirms commanded state.
    pub fn set_with_ack(
        node_id: u8,
        child_id: u8,
        variable: VariableType,
        payload: impl Into<String>,
        ack: bool,
    ) -> Self {
        Self {
            node_id,
            child_id,
            kind: MessageKind::Set,
            ack,
            sub_type: variable.code(),
            payload: payload.into(),
        }
    }

    pub fn req(node_id: u8, child_id: u8, variable: VariableType) -> Self {
        Self {
            node_id,
            child_id,
            kind: MessageKind::Req,
            ack: false,
            sub_type: variable.code(),
            payload: String::new(),
        }
    }

    /// A node-level internal message (child id 255).
    pub fn internal(node_id: u8, internal: InternalType, payload: impl Into<String>) -> Self {
        Self {
            node_id,
            child_id: NODE_CHILD_ID,
            kind: MessageKind::Internal,
            ack: false,
            sub_type: internal as u8,
            payload: payload.into(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.kind == MessageKind::Set
    }

    pub fn is_req(&self) -> bool {
        self.kind == MessageKind::Req
    }

    pub fn is_internal(&self) -> bool {
        self.kind == MessageKind::Internal
    }

    pub fn internal_type(&self) -> Option<InternalType> {
        InternalType::from_repr(self.sub_type)
    }

    pub fn variable_type(&self) -> Option<VariableType> {
        VariableType::from_repr(self.sub_type)
    }

    pub fn sensor_type(&self) -> Option<SensorType> {
        SensorType::from_repr(self.sub_type)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{};{};{}",
            self.node_id,
            self.child_id,
            self.kind as u8,
            if self.ack { "1" } else { "0" },
            self.sub_type,
            self.payload
        )
    }
}

impl FromStr for Message {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_field(raw: &str, what: &str) -> Result<u8, ParseError> {
    raw.parse()
        .map_err(|e| ParseError::new(format!("invalid {what} '{raw}': {e}")))
}

// ── Tests ────────────────────────────────────────────────────────────

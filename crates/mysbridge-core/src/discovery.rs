// ── Home-automation discovery payloads ──
//
// One retained JSON config per entity, published under
// `homeassistant/<component>/<device>_<entity>/config`. Pure mapping from
// the device catalogue; nothing here talks to the bus.

use serde::Serialize;

use crate::config::{AdapterConfig, DeviceConfig, EntityConfig};
use crate::model::EntityKind;
use crate::topics::Topics;

/// A discovery config ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryMessage {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Serialize)]
struct DeviceBlock<'a> {
    identifiers: [&'a str; 1],
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    manufacturer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sw_version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hw_version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggested_area: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct EntityPayload<'a> {
    name: &'a str,
    unique_id: String,
    state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_topic: Option<String>,
    device: DeviceBlock<'a>,

    #[serde(skip_serializing_if = "Option::is_none")]
    payload_on: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_off: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_open: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_close: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_stop: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_mireds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_mireds: Option<f64>,
    #[serde(skip_serializing_if = "no_options")]
    options: &'a [String],

    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a str>,

    qos: u8,
    retain: bool,
    optimistic: bool,
}

impl<'a> EntityPayload<'a> {
    fn new(
        topics: &Topics,
        adapter: &AdapterConfig,
        device: &'a DeviceConfig,
        entity: &'a EntityConfig,
    ) -> Self {
        let key = device.key(entity);
        Self {
            name: &entity.name,
            unique_id: key.unique_id(),
            state_topic: topics.state(&key),
            command_topic: entity.can_receive_commands().then(|| topics.command(&key)),
            device: DeviceBlock {
                identifiers: [device.id.as_str()],
                name: &device.name,
                manufacturer: device.manufacturer.as_deref(),
                model: device.model.as_deref(),
                sw_version: device.sw_version.as_deref(),
                hw_version: device.hw_version.as_deref(),
                suggested_area: device.suggested_area.as_deref(),
            },
            payload_on: None,
            payload_off: None,
            payload_open: None,
            payload_close: None,
            payload_stop: None,
            min: None,
            max: None,
            step: None,
            min_mireds: None,
            max_mireds: None,
            options: &[],
            unit_of_measurement: None,
            state_class: None,
            device_class: entity.device_class.as_deref(),
            icon: entity.icon.as_deref(),
            qos: 0,
            retain: true,
            // Entity setting, else the global one. Device-level optimism
            // affects command handling only.
            optimistic: entity.optimistic.unwrap_or(adapter.optimistic),
        }
    }

    fn with_kind_fields(mut self, entity: &'a EntityConfig) -> Self {
        match entity.kind {
            EntityKind::Switch | EntityKind::Light | EntityKind::BinarySensor => {
                self.payload_on = Some(entity.payload_on.as_deref().unwrap_or("1"));
                self.payload_off = Some(entity.payload_off.as_deref().unwrap_or("0"));
            }
            EntityKind::Dimmer => {
                self.min_mireds = entity.min_value;
                self.max_mireds = entity.max_value;
            }
            EntityKind::Number => {
                self.min = entity.min_value;
                self.max = entity.max_value;
                self.step = entity.step;
                self.unit_of_measurement = entity.unit_of_measurement.as_deref();
            }
            EntityKind::Select => self.options = &entity.options,
            EntityKind::Cover => {
                self.payload_open = Some("OPEN");
                self.payload_close = Some("CLOSE");
                self.payload_stop = Some("STOP");
            }
            EntityKind::Text
            | EntityKind::Climate
            | EntityKind::RgbLight
            | EntityKind::RgbwLight => {}
            _ => {
                self.unit_of_measurement = entity.unit();
                self.state_class = entity.state_class();
            }
        }
        self
    }
}

fn no_options(options: &&[String]) -> bool {
    options.is_empty()
}

/// Discovery component an entity is advertised as.
pub fn component(entity: &EntityConfig) -> &'static str {
    entity.kind.component(entity.is_read_only())
}

/// Build the discovery config for one entity.
pub fn entity_discovery(
    topics: &Topics,
    adapter: &AdapterConfig,
    device: &DeviceConfig,
    entity: &EntityConfig,
) -> Result<DiscoveryMessage, serde_json::Error> {
    let payload = EntityPayload::new(topics, adapter, device, entity).with_kind_fields(entity);
    Ok(DiscoveryMessage {
        topic: Topics::discovery(component(entity), &device.key(entity)),
        payload: serde_json::to_string(&payload)?,
    })
}

/// Discovery configs for every entity of every device, in catalogue order.
pub fn discovery_messages(
    topics: &Topics,
    adapter: &AdapterConfig,
    devices: &[DeviceConfig],
) -> Result<Vec<DiscoveryMessage>, serde_json::Error> {
    devices
        .iter()
        .flat_map(|device| device.entities.iter().map(move |entity| (device, entity)))
        .map(|(device, entity)| entity_discovery(topics, adapter, device, entity))
        .collect()
}

/// The state an entity starts with when the bus holds none for it.
///
/// Read-only sensors other than binary ones wait for device data, and
/// write-only entities never report state.
pub fn initial_state(entity: &EntityConfig) -> Option<&str> {
    if !entity.can_report_state() {
        return None;
    }
    if entity.is_read_only() && !entity.kind.is_binary() {
        return None;
    }
    Some(entity.initial_value())
}

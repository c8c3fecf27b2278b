// ── Normalization, validation, and translation ──
//
// Turns a deserialized `Config` into the runtime `BridgeConfig`. Every
// rule here is fatal at startup; the first violation wins.

use std::collections::{HashMap, HashSet};

use mysbridge_core::{
    AdapterConfig, BridgeConfig, BusConfig, DEFAULT_GATEWAY, DeviceConfig, EntityConfig,
    GatewayConfig, IdAssignment, LinkConfig, SyncConfig,
};
use mysbridge_proto::VariableType;
use tracing::info;

use crate::ConfigError;
use crate::schema::{Config, DeviceSection, EntitySection, GatewaySection, TransportKind};

const NODE_ID_MIN: u16 = 1;
const NODE_ID_MAX: u16 = 254;

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

impl Config {
    /// Apply rewrites that depend on the document as a whole.
    ///
    /// A lone gateway not called `default` is renamed to it, and devices
    /// that named it follow along.
    pub fn normalize(&mut self) {
        if self.mysensors.len() != 1 || self.mysensors.contains_key(DEFAULT_GATEWAY) {
            return;
        }
        let Some((old, section)) = self.mysensors.pop_first() else {
            return;
        };
        info!(from = %old, to = DEFAULT_GATEWAY, "renaming lone gateway");
        self.mysensors.insert(DEFAULT_GATEWAY.into(), section);
        for device in &mut self.devices {
            if device.gateway.as_deref() == Some(old.as_str()) {
                device.gateway = Some(DEFAULT_GATEWAY.into());
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mysensors.is_empty() {
            return Err(invalid("mysensors", "at least one gateway is required"));
        }

        let mut passthrough_ports: HashMap<u16, &str> = HashMap::new();
        for (name, section) in &self.mysensors {
            validate_gateway(name, section)?;

            if section.tcp_service.enabled {
                let field = format!("mysensors.{name}.tcp_service.port");
                let port = match section.tcp_service.port {
                    Some(port) if port != 0 => port,
                    _ => return Err(invalid(field, "required when tcp_service is enabled")),
                };
                if let Some(other) = passthrough_ports.insert(port, name) {
                    return Err(invalid(
                        field,
                        format!("port {port} is already used by gateway '{other}'"),
                    ));
                }
            }
        }

        if self.mqtt.broker.trim().is_empty() {
            return Err(invalid("mqtt.broker", "broker is required"));
        }

        self.validate_devices()
    }

    fn validate_devices(&self) -> Result<(), ConfigError> {
        let mut device_ids = HashSet::new();
        // (gateway, node, child) -> entity owning it as a writer
        let mut writers: HashMap<(&str, u8, u8), String> = HashMap::new();

        for (i, device) in self.devices.iter().enumerate() {
            let path = format!("devices[{i}]");
            if device.id.trim().is_empty() {
                return Err(invalid(format!("{path}.id"), "device id is required"));
            }
            if !device_ids.insert(device.id.as_str()) {
                return Err(invalid(
                    format!("{path}.id"),
                    format!("duplicate device id '{}'", device.id),
                ));
            }

            let gateway = device.gateway.as_deref().unwrap_or(DEFAULT_GATEWAY);
            if !self.mysensors.contains_key(gateway) {
                return Err(invalid(
                    format!("{path}.gateway"),
                    format!("unknown gateway '{gateway}'"),
                ));
            }

            let mut entity_ids = HashSet::new();
            for (j, entity) in device.entities.iter().enumerate() {
                let path = format!("{path}.entities[{j}]");
                if entity.id.trim().is_empty() {
                    return Err(invalid(format!("{path}.id"), "entity id is required"));
                }
                if !entity_ids.insert(entity.id.as_str()) {
                    return Err(invalid(
                        format!("{path}.id"),
                        format!("duplicate entity id '{}' in device '{}'", entity.id, device.id),
                    ));
                }
                variable_override(entity, &path)?;

                let read_only = entity
                    .read_only
                    .unwrap_or_else(|| entity.entity_type.default_read_only());
                if read_only {
                    continue;
                }
                let node = entity.node_id.unwrap_or(device.node_id);
                let owner = format!("{}/{}", device.id, entity.id);
                if let Some(existing) = writers.insert((gateway, node, entity.child_id), owner) {
                    return Err(invalid(
                        path,
                        format!(
                            "address {gateway}:{node}:{} is already written by '{existing}'",
                            entity.child_id
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Validate and translate into the runtime configuration.
    pub fn to_bridge_config(&self) -> Result<BridgeConfig, ConfigError> {
        self.validate()?;

        let gateways = self
            .mysensors
            .iter()
            .map(|(name, section)| gateway_config(name, section))
            .collect::<Result<Vec<_>, _>>()?;

        let devices = self
            .devices
            .iter()
            .enumerate()
            .map(|(i, device)| device_config(i, device))
            .collect::<Result<Vec<_>, _>>()?;

        let bus = BusConfig {
            broker: self.mqtt.broker.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            keep_alive: self.mqtt.keep_alive,
        };

        let adapter = AdapterConfig {
            topic_prefix: self.adapter.topic_prefix.clone(),
            discovery: self.adapter.homeassistant_discovery,
            optimistic: self.adapter.optimistic,
            request_ack: self.adapter.request_ack,
            sync: SyncConfig {
                enabled: self.adapter.sync.enabled,
                period: self.adapter.sync.period,
            },
        };

        Ok(BridgeConfig {
            gateways,
            bus,
            adapter,
            devices,
        })
    }
}

// ── Gateways ────────────────────────────────────────────────────────

fn validate_gateway(name: &str, section: &GatewaySection) -> Result<(), ConfigError> {
    match section.transport {
        TransportKind::Ethernet => {
            if section.ethernet.host.trim().is_empty() {
                return Err(invalid(
                    format!("mysensors.{name}.ethernet.host"),
                    "host is required for the ethernet transport",
                ));
            }
            if section.ethernet.port == 0 {
                return Err(invalid(
                    format!("mysensors.{name}.ethernet.port"),
                    "port must be non-zero",
                ));
            }
        }
        TransportKind::Rs485 => {
            if section.rs485.device.trim().is_empty() {
                return Err(invalid(
                    format!("mysensors.{name}.rs485.device"),
                    "device path is required for the rs485 transport",
                ));
            }
        }
    }

    let range = section.gateway.node_id_range;
    let field = format!("mysensors.{name}.gateway.node_id_range");
    if range.start < NODE_ID_MIN || range.end > NODE_ID_MAX {
        return Err(invalid(
            field,
            format!("must lie within {NODE_ID_MIN}..={NODE_ID_MAX}, got {}..={}", range.start, range.end),
        ));
    }
    if range.start > range.end {
        return Err(invalid(
            field,
            format!("start {} is greater than end {}", range.start, range.end),
        ));
    }
    Ok(())
}

fn node_id(value: u16, field: &str) -> Result<u8, ConfigError> {
    u8::try_from(value).map_err(|_| invalid(field, format!("{value} is not a valid node id")))
}

fn gateway_config(name: &str, section: &GatewaySection) -> Result<GatewayConfig, ConfigError> {
    let link = match section.transport {
        TransportKind::Ethernet => LinkConfig::Ethernet {
            host: section.ethernet.host.clone(),
            port: section.ethernet.port,
        },
        TransportKind::Rs485 => LinkConfig::Serial {
            device: section.rs485.device.clone(),
            baud_rate: section.rs485.baud_rate,
        },
    };

    let field = format!("mysensors.{name}.gateway.node_id_range");
    let range = section.gateway.node_id_range;
    let assignment = if section.gateway.random_id_assignment {
        IdAssignment::Random
    } else {
        IdAssignment::Sequential
    };

    Ok(GatewayConfig {
        name: name.to_owned(),
        link,
        node_ids: node_id(range.start, &field)?..=node_id(range.end, &field)?,
        assignment,
        version_request_period: section.gateway.version_request_period,
        passthrough_port: section
            .tcp_service
            .enabled
            .then_some(section.tcp_service.port)
            .flatten(),
    })
}

// ── Devices ─────────────────────────────────────────────────────────

fn variable_override(
    entity: &EntitySection,
    path: &str,
) -> Result<Option<VariableType>, ConfigError> {
    entity
        .variable_type
        .as_deref()
        .map(|name| {
            VariableType::from_name(name).ok_or_else(|| {
                invalid(
                    format!("{path}.variable_type"),
                    format!("unknown variable type '{name}'"),
                )
            })
        })
        .transpose()
}

fn device_config(index: usize, device: &DeviceSection) -> Result<DeviceConfig, ConfigError> {
    let entities = device
        .entities
        .iter()
        .enumerate()
        .map(|(j, entity)| {
            let path = format!("devices[{index}].entities[{j}]");
            Ok(EntityConfig {
                id: entity.id.clone(),
                name: entity.name.clone().unwrap_or_else(|| entity.id.clone()),
                child_id: entity.child_id,
                node_id: entity.node_id,
                kind: entity.entity_type,
                variable: variable_override(entity, &path)?,
                read_only: entity.read_only,
                write_only: entity.write_only,
                optimistic: entity.optimistic,
                initial_value: entity.initial_value.clone(),
                unit_of_measurement: entity.unit_of_measurement.clone(),
                state_class: entity.state_class.clone(),
                device_class: entity.device_class.clone(),
                icon: entity.icon.clone(),
                min_value: entity.min_value,
                max_value: entity.max_value,
                step: entity.step,
                options: entity.options.clone(),
                payload_on: entity.payload_on.clone(),
                payload_off: entity.payload_off.clone(),
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(DeviceConfig {
        id: device.id.clone(),
        name: device.name.clone().unwrap_or_else(|| device.id.clone()),
        node_id: device.node_id,
        gateway: device.gateway.clone(),
        optimistic: device.optimistic,
        request_ack: device.request_ack,
        manufacturer: device.manufacturer.clone(),
        model: device.model.clone(),
        sw_version: device.sw_version.clone(),
        hw_version: device.hw_version.clone(),
        suggested_area: device.suggested_area.clone(),
        entities,
    })
}

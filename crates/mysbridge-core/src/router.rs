// ── Router ──
//
// Maps device addresses `(gateway, node, child)` to entities and back.
// Bindings are built once from configuration and never change, so the
// router needs no locking.
//
// Inbound, a device SET updates at most one relay-like entity (the first
// matching binding wins) plus every matching sensor-like entity.
// Outbound, an entity resolves to its gateway's transport and address.

use std::collections::HashMap;
use std::sync::Arc;

use mysbridge_proto::{Message, Transport, VariableType};
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::model::{EntityKey, EntityKind};
use crate::reconcile::Consistency;

// ── Bindings ─────────────────────────────────────────────────────────

/// How a sensor-like binding interprets device values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorClass {
    /// Any SET on the address is taken as the state.
    Binary,
    /// Only SETs carrying the binding's variable type count.
    Numeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingRole {
    /// Write-capable actuator; one per address.
    Relay,
    /// Read-only input; any number may share an address.
    Sensor(SensorClass),
}

/// One entity's place on the sensor network.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityBinding {
    pub key: EntityKey,
    pub name: String,
    pub gateway: String,
    pub node_id: u8,
    pub child_id: u8,
    pub kind: EntityKind,
    pub variable: VariableType,
    pub role: BindingRole,
    /// Accepts bus commands.
    pub writable: bool,
    /// Reports device state to the bus.
    pub readable: bool,
    pub consistency: Consistency,
    pub request_ack: bool,
}

impl EntityBinding {
    pub fn is_relay(&self) -> bool {
        self.role == BindingRole::Relay
    }

    pub fn matches_address(&self, gateway: &str, node_id: u8, child_id: u8) -> bool {
        self.node_id == node_id && self.child_id == child_id && self.gateway == gateway
    }

    /// Whether a device SET on this binding's address carries its state.
    fn accepts(&self, message: &Message) -> bool {
        match self.role {
            BindingRole::Relay | BindingRole::Sensor(SensorClass::Numeric) => {
                message.sub_type == self.variable.code()
            }
            BindingRole::Sensor(SensorClass::Binary) => true,
        }
    }
}

/// Flatten the device catalogue into bindings, in configuration order.
pub fn bindings_from_config(config: &BridgeConfig) -> Vec<EntityBinding> {
    let adapter = &config.adapter;
    config
        .devices
        .iter()
        .flat_map(|device| {
            device.entities.iter().map(move |entity| {
                let writable = entity.can_receive_commands();
                let role = if writable {
                    BindingRole::Relay
                } else if entity.kind.is_binary() {
                    BindingRole::Sensor(SensorClass::Binary)
                } else {
                    BindingRole::Sensor(SensorClass::Numeric)
                };
                let optimistic = entity
                    .optimistic
                    .or(device.optimistic)
                    .unwrap_or(adapter.optimistic);

                EntityBinding {
                    key: device.key(entity),
                    name: entity.name.clone(),
                    gateway: device.gateway_name().to_owned(),
                    node_id: device.node_for(entity),
                    child_id: entity.child_id,
                    kind: entity.kind,
                    variable: entity.variable_type(),
                    role,
                    writable,
                    readable: entity.can_report_state(),
                    consistency: Consistency::from_optimistic(optimistic),
                    request_ack: device.request_ack(adapter),
                }
            })
        })
        .collect()
}

// ── Dispatch result ──────────────────────────────────────────────────

/// Entities whose state a device message updates.
#[derive(Debug, Default)]
pub struct Dispatch<'a> {
    pub relay: Option<&'a EntityBinding>,
    pub sensors: Vec<&'a EntityBinding>,
}

impl<'a> Dispatch<'a> {
    pub fn is_empty(&self) -> bool {
        self.relay.is_none() && self.sensors.is_empty()
    }

    /// Every updated binding, relay first.
    pub fn updated(&self) -> impl Iterator<Item = &'a EntityBinding> + '_ {
        self.relay.into_iter().chain(self.sensors.iter().copied())
    }
}

// ── Router ───────────────────────────────────────────────────────────

pub struct Router {
    bindings: Vec<EntityBinding>,
    index: HashMap<EntityKey, usize>,
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl Router {
    pub fn new(bindings: Vec<EntityBinding>, transports: HashMap<String, Arc<dyn Transport>>) -> Self {
        let index = bindings
            .iter()
            .enumerate()
            .map(|(i, b)| (b.key.clone(), i))
            .collect();
        Self {
            bindings,
            index,
            transports,
        }
    }

    pub fn bindings(&self) -> &[EntityBinding] {
        &self.bindings
    }

    pub fn binding(&self, key: &EntityKey) -> Option<&EntityBinding> {
        self.index.get(key).and_then(|i| self.bindings.get(*i))
    }

    pub fn transport(&self, gateway: &str) -> Option<&Arc<dyn Transport>> {
        self.transports.get(gateway)
    }

    /// Match a device message from `gateway` against the bindings.
    ///
    /// Only SET messages update state. Bindings that do not report state
    /// are skipped.
    pub fn dispatch(&self, gateway: &str, message: &Message) -> Dispatch<'_> {
        if !message.is_set() {
            return Dispatch::default();
        }

        let at_address = |b: &&EntityBinding| {
            b.readable && b.matches_address(gateway, message.node_id, message.child_id)
        };

        let relay = self
            .bindings
            .iter()
            .filter(at_address)
            .find(|b| b.is_relay() && b.accepts(message));

        let sensors = self
            .bindings
            .iter()
            .filter(at_address)
            .filter(|b| !b.is_relay() && b.accepts(message))
            .collect();

        let dispatch = Dispatch { relay, sensors };
        if dispatch.is_empty() {
            debug!(
                gateway,
                node_id = message.node_id,
                child_id = message.child_id,
                "no entity bound to message"
            );
        }
        dispatch
    }

    /// The relay-like binding a device REQ asks about, if any.
    pub fn requested(&self, gateway: &str, message: &Message) -> Option<&EntityBinding> {
        if !message.is_req() {
            return None;
        }
        self.bindings.iter().find(|b| {
            b.is_relay()
                && b.matches_address(gateway, message.node_id, message.child_id)
                && b.accepts(message)
        })
    }

    /// Resolve a write-capable entity to its binding and transport.
    pub fn resolve(&self, key: &EntityKey) -> Result<(&EntityBinding, &Arc<dyn Transport>), CoreError> {
        let binding = self.binding(key).ok_or_else(|| CoreError::UnknownEntity {
            device: key.device.clone(),
            entity: key.entity.clone(),
        })?;
        if !binding.writable {
            return Err(CoreError::ReadOnlyEntity {
                device: key.device.clone(),
                entity: key.entity.clone(),
            });
        }
        let transport = self
            .transports
            .get(&binding.gateway)
            .ok_or_else(|| CoreError::UnknownGateway {
                name: binding.gateway.clone(),
            })?;
        Ok((binding, transport))
    }

    /// Send `value` to the entity's device as a SET. Returns the message sent.
    pub async fn send_command(&self, key: &EntityKey, value: &str) -> Result<Message, CoreError> {
        let (binding, transport) = self.resolve(key)?;
        let message = Message::set_with_ack(
            binding.node_id,
            binding.child_id,
            binding.variable,
            value,
            binding.request_ack,
        );
        transport.send(&message).await?;
        debug!(gateway = %binding.gateway, entity = %key, %message, "command sent");
        Ok(message)
    }

    /// Send a raw message through a named gateway.
    pub async fn send_to_gateway(&self, gateway: &str, message: &Message) -> Result<(), CoreError> {
        let transport = self
            .transports
            .get(gateway)
            .ok_or_else(|| CoreError::UnknownGateway {
                name: gateway.to_owned(),
            })?;
        transport.send(message).await?;
        Ok(())
    }
}

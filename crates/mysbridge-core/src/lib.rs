//! Gateway runtime for mysbridge.
//!
//! Bridges one or more MySensors gateways to an MQTT broker:
//!
//! - [`Gateway`] owns a node-id address space and answers internal
//!   protocol requests.
//! - [`Router`] maps `(gateway, node, child)` addresses to entities and
//!   back.
//! - [`StateReconciler`] keeps bus-visible entity state consistent with
//!   the devices under optimistic or confirmed consistency.
//! - [`Bridge`] wires them to the transports, the [`MessageBus`] and the
//!   passthrough listeners, and runs the background tasks.
//!
//! Configuration arrives as a fully validated [`BridgeConfig`]; this crate
//! never reads files.

pub mod bridge;
pub mod bus;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod model;
pub mod passthrough;
pub mod reconcile;
pub mod router;
pub mod topics;

pub use bridge::Bridge;
pub use bus::{BusMessage, MessageBus, MqttBus};
pub use config::{
    AdapterConfig, BridgeConfig, BusConfig, DEFAULT_GATEWAY, DeviceConfig, EntityConfig,
    GatewayConfig, IdAssignment, LinkConfig, SyncConfig,
};
pub use error::CoreError;
pub use gateway::{Gateway, Handled, NodeRegistry, aggregate_seen_nodes, format_node_list};
pub use model::{EntityKey, EntityKind};
pub use passthrough::Passthrough;
pub use reconcile::{Consistency, StateReconciler, SyncReport};
pub use router::{BindingRole, Dispatch, EntityBinding, Router, SensorClass, bindings_from_config};
pub use topics::{Channel, Topics};

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MemoryBus, MemoryTransport, bridge_config, device, settle, transport_map};
use mysbridge_core::{
    Bridge, BridgeConfig, CoreError, EntityConfig, EntityKey, EntityKind, MessageBus,
};
use mysbridge_proto::{Phase, Transport};

const LAMP_SET: &str = "ms/devices/hall/entity/lamp/set";
const LAMP_STATE: &str = "ms/devices/hall/entity/lamp/state";
const TEMP_STATE: &str = "ms/devices/hall/entity/temp/state";
const DOOR_STATE: &str = "ms/devices/hall/entity/door/state";

struct Harness {
    bridge: Bridge,
    transport: Arc<MemoryTransport>,
    bus: Arc<MemoryBus>,
}

fn hall() -> BridgeConfig {
    bridge_config(
        &["default"],
        vec![device(
            "hall",
            3,
            vec![
                EntityConfig::new("lamp", EntityKind::Switch, 1),
                EntityConfig {
                    read_only: Some(true),
                    ..EntityConfig::new("temp", EntityKind::Temperature, 2)
                },
                EntityConfig::new("door", EntityKind::BinarySensor, 3),
            ],
        )],
    )
}

impl Harness {
    fn transport_is_up(&self) -> bool {
        self.transport.is_connected()
    }
}

fn harness(config: BridgeConfig) -> Harness {
    let transport = MemoryTransport::new("default");
    let bus = MemoryBus::new();
    let handle: Arc<dyn MessageBus> = Arc::clone(&bus) as Arc<dyn MessageBus>;
    let bridge =
        Bridge::with_links(config, transport_map(&[("default", &transport)]), handle).unwrap();
    Harness {
        bridge,
        transport,
        bus,
    }
}

async fn started(config: BridgeConfig) -> Harness {
    let h = harness(config);
    h.bridge.start().await.unwrap();
    h
}

#[tokio::test(start_paused = true)]
async fn startup_connects_and_announces_everything() {
    let h = started(hall()).await;

    assert!(h.transport_is_up());
    assert!(h.bus.is_connected());
    assert!(
        h.bridge
            .connection_states()
            .iter()
            .all(|(_, state)| state.phase == Phase::Connected)
    );

    assert_eq!(
        h.bus.subscriptions(),
        vec![LAMP_SET, LAMP_STATE, TEMP_STATE, DOOR_STATE]
    );

    let discovery: Vec<_> = h
        .bus
        .published()
        .into_iter()
        .filter(|p| p.topic.starts_with("homeassistant/"))
        .map(|p| p.topic)
        .collect();
    assert_eq!(
        discovery,
        vec![
            "homeassistant/switch/hall_lamp/config",
            "homeassistant/sensor/hall_temp/config",
            "homeassistant/binary_sensor/hall_door/config",
        ]
    );

    // Numeric sensors wait for the device.
    assert_eq!(h.bus.payloads(LAMP_STATE), vec!["0"]);
    assert_eq!(h.bus.payloads(DOOR_STATE), vec!["0"]);
    assert!(h.bus.payloads(TEMP_STATE).is_empty());

    assert_eq!(h.bus.last("ms/seen_nodes").as_deref(), Some(""));
    assert_eq!(h.bus.last("ms/gateway/default/seen_nodes").as_deref(), Some(""));
    assert!(h.transport.sent().iter().any(|m| m.to_line() == "0;255;3;0;2;"));

    h.bridge.shutdown().await;
    assert!(!h.transport_is_up());
    assert!(!h.bus.is_connected());
}

#[tokio::test(start_paused = true)]
async fn device_reports_become_entity_state() {
    let h = started(hall()).await;

    h.transport.inject("3;2;1;0;0;21.5");
    h.transport.inject("3;1;1;0;2;1");
    settle().await;

    assert_eq!(h.bus.last(TEMP_STATE).as_deref(), Some("21.5"));
    assert_eq!(h.bus.last(LAMP_STATE).as_deref(), Some("1"));
    assert_eq!(h.bus.last("ms/seen_nodes").as_deref(), Some("3"));
    assert_eq!(h.bus.last("ms/gateway/default/seen_nodes").as_deref(), Some("3"));

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn bus_commands_reach_the_device() {
    let h = started(hall()).await;
    h.transport.clear();
    h.bus.clear();

    h.bus.inject(LAMP_SET, "1", false);
    h.bus.inject(LAMP_SET, "sideways", false);
    settle().await;

    assert_eq!(h.transport.sent_lines(), vec!["3;1;1;1;2;1"]);
    // Confirmed mode: no state until the device echoes.
    assert!(h.bus.payloads(LAMP_STATE).is_empty());

    h.transport.inject("3;1;1;0;2;1");
    settle().await;
    assert_eq!(h.bus.payloads(LAMP_STATE), vec!["1"]);

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retained_state_replaces_initial_state_and_feeds_sync() {
    let mut config = hall();
    config.adapter.sync.enabled = true;
    config.adapter.sync.period = Duration::from_secs(30);
    let h = harness(config);

    h.bus.inject(LAMP_STATE, "1", true);
    h.bus.inject(DOOR_STATE, "", true);
    h.bridge.start().await.unwrap();
    settle().await;

    // The retained lamp state survives; the cleared door state does not.
    assert!(h.bus.payloads(LAMP_STATE).is_empty());
    assert_eq!(h.bus.payloads(DOOR_STATE), vec!["0"]);
    assert_eq!(
        h.bridge.reconciler().get(&EntityKey::new("hall", "lamp")).as_deref(),
        Some("1")
    );

    // The startup sync pass pushed the retained value to the device.
    assert_eq!(h.transport.sent_lines(), vec!["3;1;1;1;2;1"]);

    h.transport.clear();
    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(h.transport.sent_lines(), vec!["3;1;1;1;2;1"]);

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn id_request_is_answered_and_published() {
    let h = started(hall()).await;
    h.transport.clear();

    h.transport.inject("255;255;3;0;3;");
    settle().await;

    assert_eq!(h.transport.sent_lines(), vec!["255;255;3;0;4;1"]);
    assert_eq!(h.bus.last("ms/gateway/default/seen_nodes").as_deref(), Some("1"));

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn device_request_restores_actuator_state() {
    let h = started(hall()).await;
    h.transport.clear();

    h.transport.inject("3;1;2;0;2;");
    settle().await;

    // Initial state "0" is the last known value.
    assert_eq!(h.transport.sent_lines(), vec!["3;1;1;0;2;0"]);

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn dropped_link_is_reconnected_by_the_monitor() {
    let h = started(hall()).await;

    h.transport.drop_link();
    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;

    assert!(h.transport_is_up());
    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn start_runs_only_once() {
    let h = started(hall()).await;
    let err = h.bridge.start().await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyRunning));
    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_startup_retries() {
    let h = harness(hall());
    h.transport.refuse_connections(true);
    let token = h.bridge.cancellation();

    let bridge = h.bridge.clone();
    let startup = tokio::spawn(async move { bridge.start().await });
    tokio::time::sleep(Duration::from_secs(60)).await;
    token.cancel();

    let err = startup.await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
    assert!(!h.transport_is_up());
}

#[test]
fn missing_transport_is_an_unknown_gateway() {
    let bus: Arc<dyn MessageBus> = MemoryBus::new();
    let Err(err) = Bridge::with_links(hall(), transport_map(&[]), bus) else {
        panic!("bridge built without a transport");
    };
    assert!(matches!(err, CoreError::UnknownGateway { ref name } if name == "default"));
}

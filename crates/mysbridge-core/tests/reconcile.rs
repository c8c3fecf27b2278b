#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use common::{MemoryBus, MemoryTransport, bridge_config, device, transport_map};
use mysbridge_core::{
    BridgeConfig, CoreError, EntityBinding, EntityConfig, EntityKey, EntityKind, MessageBus, Router,
    StateReconciler, SyncReport, Topics, bindings_from_config,
};
use mysbridge_proto::Message;
use tokio_test::assert_ok;

const LAMP_STATE: &str = "ms/devices/hall/entity/lamp/state";
const FAN_STATE: &str = "ms/devices/hall/entity/fan/state";

struct Fixture {
    transport: Arc<MemoryTransport>,
    bus: Arc<MemoryBus>,
    router: Arc<Router>,
    reconciler: StateReconciler,
}

impl Fixture {
    fn new(config: &BridgeConfig) -> Self {
        let transport = MemoryTransport::connected("default");
        let bus = MemoryBus::new();
        let router = Arc::new(Router::new(
            bindings_from_config(config),
            transport_map(&[("default", &transport)]),
        ));
        let handle: Arc<dyn MessageBus> = Arc::clone(&bus) as Arc<dyn MessageBus>;
        let reconciler = StateReconciler::new(Arc::clone(&router), handle, Topics::new("ms"));
        Self {
            transport,
            bus,
            router,
            reconciler,
        }
    }

    fn binding(&self, entity: &str) -> EntityBinding {
        self.router
            .binding(&EntityKey::new("hall", entity))
            .unwrap()
            .clone()
    }
}

/// `lamp` is optimistic, `fan` waits for confirmation, `temp` is a sensor.
fn hall_config() -> BridgeConfig {
    bridge_config(
        &["default"],
        vec![device(
            "hall",
            3,
            vec![
                EntityConfig {
                    optimistic: Some(true),
                    ..EntityConfig::new("lamp", EntityKind::Switch, 1)
                },
                EntityConfig::new("fan", EntityKind::Switch, 2),
                EntityConfig {
                    read_only: Some(true),
                    ..EntityConfig::new("temp", EntityKind::Temperature, 3)
                },
            ],
        )],
    )
}

#[tokio::test]
async fn optimistic_command_publishes_state_before_any_echo() {
    let f = Fixture::new(&hall_config());
    let key = EntityKey::new("hall", "lamp");

    let sent = f.reconciler.handle_command(&key, "1").await.unwrap();

    assert_eq!(sent.to_line(), "3;1;1;1;2;1");
    assert_eq!(f.bus.payloads(LAMP_STATE), vec!["1"]);
    assert!(f.bus.published().iter().all(|p| p.retain));
    assert_eq!(f.reconciler.get(&key).as_deref(), Some("1"));
}

#[tokio::test]
async fn confirmed_command_waits_for_device() {
    let f = Fixture::new(&hall_config());
    let key = EntityKey::new("hall", "fan");

    assert_ok!(f.reconciler.handle_command(&key, "1").await);
    assert_eq!(f.transport.sent_lines(), vec!["3;2;1;1;2;1"]);
    assert!(f.bus.payloads(FAN_STATE).is_empty());
    assert_eq!(f.reconciler.get(&key), None);

    assert_ok!(f.reconciler.apply_device_state(&f.binding("fan"), "1").await);
    assert_eq!(f.bus.payloads(FAN_STATE), vec!["1"]);
    assert_eq!(f.reconciler.get(&key).as_deref(), Some("1"));
}

#[tokio::test]
async fn device_level_optimism_applies_to_its_entities() {
    let mut config = hall_config();
    config.devices[0].optimistic = Some(true);
    let f = Fixture::new(&config);

    f.reconciler
        .handle_command(&EntityKey::new("hall", "fan"), "ON")
        .await
        .unwrap();
    assert_eq!(f.bus.payloads(FAN_STATE), vec!["ON"]);
}

#[tokio::test]
async fn invalid_and_read_only_commands_send_nothing() {
    let f = Fixture::new(&hall_config());

    let err = f
        .reconciler
        .handle_command(&EntityKey::new("hall", "lamp"), "toggle")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidPayload { .. }));

    let err = f
        .reconciler
        .handle_command(&EntityKey::new("hall", "temp"), "1")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ReadOnlyEntity { .. }));

    assert!(f.transport.sent().is_empty());
    assert!(f.bus.published().is_empty());
}

#[tokio::test]
async fn sync_pass_resends_known_values_of_writable_entities() {
    let f = Fixture::new(&hall_config());

    f.reconciler
        .handle_command(&EntityKey::new("hall", "lamp"), "1")
        .await
        .unwrap();
    f.reconciler
        .apply_device_state(&f.binding("temp"), "19.5")
        .await
        .unwrap();
    f.transport.clear();

    let report = f.reconciler.sync_pass().await;

    assert_eq!(report, SyncReport { sent: 1, failed: 0 });
    assert_eq!(f.transport.sent_lines(), vec!["3;1;1;1;2;1"]);
}

#[tokio::test]
async fn sync_pass_counts_failures_when_link_is_down() {
    let f = Fixture::new(&hall_config());
    f.reconciler.seed(&EntityKey::new("hall", "fan"), "0");
    f.transport.drop_link();

    let report = f.reconciler.sync_pass().await;
    assert_eq!(report, SyncReport { sent: 0, failed: 1 });
}

#[tokio::test]
async fn seeding_skips_empty_unknown_and_invalid_payloads() {
    let f = Fixture::new(&hall_config());

    assert!(!f.reconciler.seed(&EntityKey::new("hall", "lamp"), ""));
    assert!(!f.reconciler.seed(&EntityKey::new("hall", "lamp"), "maybe"));
    assert!(!f.reconciler.seed(&EntityKey::new("garage", "door"), "1"));
    assert!(f.reconciler.seed(&EntityKey::new("hall", "lamp"), "OFF"));

    assert_eq!(f.reconciler.snapshot().len(), 1);
    assert!(f.bus.published().is_empty());
}

#[tokio::test]
async fn initial_state_does_not_override_retained_state() {
    let f = Fixture::new(&hall_config());
    let lamp = EntityKey::new("hall", "lamp");
    let fan = EntityKey::new("hall", "fan");
    f.reconciler.seed(&lamp, "1");

    assert!(!f.reconciler.initialize(&lamp, "0").await.unwrap());
    assert!(f.reconciler.initialize(&fan, "0").await.unwrap());

    assert!(f.bus.payloads(LAMP_STATE).is_empty());
    assert_eq!(f.bus.payloads(FAN_STATE), vec!["0"]);
    assert_eq!(f.reconciler.get(&lamp).as_deref(), Some("1"));
}

#[tokio::test]
async fn device_request_is_answered_with_last_known_value() {
    let f = Fixture::new(&hall_config());
    let fan = f.binding("fan");

    assert_eq!(f.reconciler.answer_request(&fan).await.unwrap(), None);

    f.reconciler.seed(&fan.key, "1");
    let reply = f.reconciler.answer_request(&fan).await.unwrap().unwrap();

    assert_eq!(reply, Message::parse("3;2;1;0;2;1").unwrap());
    assert_eq!(f.transport.sent_lines(), vec!["3;2;1;0;2;1"]);
}

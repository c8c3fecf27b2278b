#![allow(clippy::unwrap_used)]

mod common;

use common::{MemoryTransport, bridge_config, device, transport_map};
use mysbridge_core::{
    BindingRole, CoreError, EntityConfig, EntityKey, EntityKind, Router, SensorClass,
    bindings_from_config,
};
use mysbridge_proto::{Message, VariableType};

fn keys<'a>(bindings: impl Iterator<Item = &'a mysbridge_core::EntityBinding>) -> Vec<String> {
    bindings.map(|b| b.key.to_string()).collect()
}

fn shared_address_config() -> mysbridge_core::BridgeConfig {
    bridge_config(
        &["default"],
        vec![
            device(
                "hall",
                3,
                vec![
                    EntityConfig::new("relay", EntityKind::Switch, 1),
                    EntityConfig::new("contact", EntityKind::BinarySensor, 1),
                    EntityConfig {
                        read_only: Some(true),
                        ..EntityConfig::new("temp", EntityKind::Temperature, 1)
                    },
                ],
            ),
            device(
                "panel",
                3,
                vec![EntityConfig {
                    read_only: Some(true),
                    ..EntityConfig::new("mirror", EntityKind::Temperature, 1)
                }],
            ),
        ],
    )
}

#[test]
fn roles_follow_capabilities() {
    let bindings = bindings_from_config(&shared_address_config());
    let roles: Vec<_> = bindings.iter().map(|b| b.role).collect();
    assert_eq!(
        roles,
        vec![
            BindingRole::Relay,
            BindingRole::Sensor(SensorClass::Binary),
            BindingRole::Sensor(SensorClass::Numeric),
            BindingRole::Sensor(SensorClass::Numeric),
        ]
    );
}

#[test]
fn status_set_updates_relay_and_binary_sensor() {
    let transport = MemoryTransport::connected("default");
    let router = Router::new(
        bindings_from_config(&shared_address_config()),
        transport_map(&[("default", &transport)]),
    );

    let message = Message::parse("3;1;1;0;2;1").unwrap();
    let dispatch = router.dispatch("default", &message);

    assert_eq!(dispatch.relay.unwrap().key, EntityKey::new("hall", "relay"));
    assert_eq!(keys(dispatch.sensors.iter().copied()), vec!["hall/contact"]);
}

#[test]
fn numeric_set_updates_every_matching_sensor_across_devices() {
    let router = Router::new(bindings_from_config(&shared_address_config()), transport_map(&[]));

    let message = Message::set(3, 1, VariableType::Temp, "21.5");
    let dispatch = router.dispatch("default", &message);

    assert!(dispatch.relay.is_none());
    assert_eq!(
        keys(dispatch.updated()),
        vec!["hall/contact", "hall/temp", "panel/mirror"]
    );
}

#[test]
fn first_relay_on_an_address_wins() {
    let config = bridge_config(
        &["default"],
        vec![
            device("a", 5, vec![EntityConfig::new("one", EntityKind::Light, 2)]),
            device("b", 5, vec![EntityConfig::new("two", EntityKind::Switch, 2)]),
        ],
    );
    let router = Router::new(bindings_from_config(&config), transport_map(&[]));

    let dispatch = router.dispatch("default", &Message::parse("5;2;1;0;2;0").unwrap());
    assert_eq!(keys(dispatch.updated()), vec!["a/one"]);
}

#[test]
fn relay_ignores_other_variable_types() {
    let router = Router::new(bindings_from_config(&shared_address_config()), transport_map(&[]));
    let dispatch = router.dispatch("default", &Message::set(3, 1, VariableType::Watt, "40"));
    assert!(dispatch.relay.is_none());
}

#[test]
fn dispatch_is_gateway_aware() {
    let router = Router::new(bindings_from_config(&shared_address_config()), transport_map(&[]));
    let dispatch = router.dispatch("attic", &Message::parse("3;1;1;0;2;1").unwrap());
    assert!(dispatch.is_empty());
}

#[test]
fn only_set_messages_dispatch() {
    let router = Router::new(bindings_from_config(&shared_address_config()), transport_map(&[]));
    let presentation = Message::parse("3;1;0;0;3;").unwrap();
    assert!(router.dispatch("default", &presentation).is_empty());
}

#[test]
fn write_only_entities_never_report() {
    let config = bridge_config(
        &["default"],
        vec![device(
            "door",
            7,
            vec![EntityConfig {
                write_only: Some(true),
                ..EntityConfig::new("strike", EntityKind::Switch, 1)
            }],
        )],
    );
    let router = Router::new(bindings_from_config(&config), transport_map(&[]));
    assert!(router.dispatch("default", &Message::parse("7;1;1;0;2;1").unwrap()).is_empty());
}

#[test]
fn requests_match_relays_only() {
    let router = Router::new(bindings_from_config(&shared_address_config()), transport_map(&[]));

    let request = Message::req(3, 1, VariableType::Status);
    assert_eq!(
        router.requested("default", &request).unwrap().key,
        EntityKey::new("hall", "relay")
    );

    let temp_request = Message::req(3, 1, VariableType::Temp);
    assert!(router.requested("default", &temp_request).is_none());
}

#[tokio::test]
async fn command_goes_to_the_entity_gateway() {
    let default = MemoryTransport::connected("default");
    let attic = MemoryTransport::connected("attic");
    let mut remote = device("roof", 9, vec![EntityConfig::new("fan", EntityKind::Switch, 4)]);
    remote.gateway = Some("attic".into());
    let config = bridge_config(&["default", "attic"], vec![remote]);
    let router = Router::new(
        bindings_from_config(&config),
        transport_map(&[("default", &default), ("attic", &attic)]),
    );

    let sent = router
        .send_command(&EntityKey::new("roof", "fan"), "1")
        .await
        .unwrap();

    assert_eq!(sent.to_line(), "9;4;1;1;2;1");
    assert_eq!(attic.sent_lines(), vec!["9;4;1;1;2;1"]);
    assert!(default.sent().is_empty());
}

#[tokio::test]
async fn unknown_gateway_fails_without_sending() {
    let default = MemoryTransport::connected("default");
    let mut orphan = device("shed", 2, vec![EntityConfig::new("light", EntityKind::Light, 1)]);
    orphan.gateway = Some("garden".into());
    let config = bridge_config(&["default"], vec![orphan]);
    let router = Router::new(
        bindings_from_config(&config),
        transport_map(&[("default", &default)]),
    );

    let err = router
        .send_command(&EntityKey::new("shed", "light"), "1")
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::UnknownGateway { ref name } if name == "garden"));
    assert!(default.sent().is_empty());
}

#[tokio::test]
async fn read_only_and_unknown_entities_are_rejected() {
    let transport = MemoryTransport::connected("default");
    let router = Router::new(
        bindings_from_config(&shared_address_config()),
        transport_map(&[("default", &transport)]),
    );

    let err = router
        .send_command(&EntityKey::new("hall", "contact"), "1")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ReadOnlyEntity { .. }));

    let err = router
        .send_command(&EntityKey::new("hall", "nope"), "1")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownEntity { .. }));
    assert!(transport.sent().is_empty());
}

#![allow(clippy::unwrap_used)]

mod common;

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::Arc;

use common::MemoryTransport;
use mysbridge_core::{
    CoreError, Gateway, GatewayConfig, IdAssignment, aggregate_seen_nodes, format_node_list,
};
use mysbridge_proto::{InternalType, Message, Transport};

fn gateway(
    name: &str,
    range: RangeInclusive<u8>,
    assignment: IdAssignment,
) -> (Gateway, Arc<MemoryTransport>) {
    let transport = MemoryTransport::connected(name);
    let config = GatewayConfig {
        node_ids: range,
        assignment,
        ..GatewayConfig::ethernet(name, "127.0.0.1", 5003)
    };
    let link: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
    (Gateway::new(&config, link), transport)
}

fn id_request() -> Message {
    Message::internal(255, InternalType::IdRequest, "")
}

#[tokio::test]
async fn id_requests_get_sequential_ids() {
    let (gw, transport) = gateway("default", 1..=5, IdAssignment::Sequential);

    for expected in 1..=3u8 {
        let handled = gw.handle_message(&id_request()).await.unwrap();
        assert_eq!(handled.assigned, Some(expected));
    }

    assert_eq!(
        transport.sent_lines(),
        vec!["255;255;3;0;4;1", "255;255;3;0;4;2", "255;255;3;0;4;3"]
    );
    assert_eq!(gw.seen_nodes(), vec![1, 2, 3]);
}

#[tokio::test]
async fn sequential_assignment_skips_seen_ids() {
    let (gw, _transport) = gateway("default", 1..=5, IdAssignment::Sequential);
    gw.handle_message(&Message::parse("1;0;1;0;0;20").unwrap()).await.unwrap();
    gw.handle_message(&Message::parse("2;0;1;0;0;20").unwrap()).await.unwrap();

    let handled = gw.handle_message(&id_request()).await.unwrap();
    assert_eq!(handled.assigned, Some(3));
}

#[tokio::test]
async fn random_assignment_draws_from_free_ids() {
    let (gw, _transport) = gateway("default", 1..=5, IdAssignment::Random);
    gw.track_node(1);
    gw.track_node(2);

    let mut drawn = HashSet::new();
    for _ in 0..3 {
        drawn.insert(gw.assign_node_id().unwrap());
    }
    assert_eq!(drawn, HashSet::from([3, 4, 5]));

    let err = gw.assign_node_id().unwrap_err();
    assert!(matches!(err, CoreError::NoAvailableIds { start: 1, end: 5, .. }));
}

#[tokio::test]
async fn exhausted_range_sends_nothing() {
    let (gw, transport) = gateway("default", 1..=1, IdAssignment::Sequential);
    gw.track_node(1);

    let err = gw.handle_message(&id_request()).await.unwrap_err();
    assert!(matches!(err, CoreError::NoAvailableIds { .. }));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn time_request_is_answered_with_epoch_seconds() {
    let (gw, transport) = gateway("default", 1..=254, IdAssignment::Sequential);

    gw.handle_message(&Message::internal(7, InternalType::Time, ""))
        .await
        .unwrap();

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    let reply = &sent[0];
    assert_eq!((reply.node_id, reply.child_id), (7, 255));
    assert_eq!(reply.internal_type(), Some(InternalType::Time));
    let now: i64 = reply.payload.parse().unwrap();
    assert!((now - chrono::Utc::now().timestamp()).abs() <= 5);
}

#[tokio::test]
async fn placeholder_ids_are_never_tracked() {
    let (gw, _transport) = gateway("default", 1..=254, IdAssignment::Sequential);
    for line in ["0;0;3;0;14;", "255;255;3;0;11;sketch", "0;1;1;0;2;1"] {
        let handled = gw.handle_message(&Message::parse(line).unwrap()).await.unwrap();
        assert!(handled.discovered.is_empty());
    }
    assert!(gw.seen_nodes().is_empty());
}

#[tokio::test]
async fn seen_nodes_keep_discovery_order() {
    let (gw, _transport) = gateway("default", 1..=254, IdAssignment::Sequential);
    for node in [9, 4, 9, 12, 4] {
        gw.handle_message(&Message::parse(&format!("{node};1;1;0;0;20")).unwrap())
            .await
            .unwrap();
    }
    assert_eq!(gw.seen_nodes(), vec![9, 4, 12]);
    assert_eq!(format_node_list(&gw.seen_nodes()), "4,9,12");
}

#[tokio::test]
async fn two_gateways_seeing_the_same_node() {
    let (a, _ta) = gateway("a", 1..=254, IdAssignment::Sequential);
    let (b, _tb) = gateway("b", 1..=254, IdAssignment::Sequential);
    let message = Message::parse("3;1;1;0;2;1").unwrap();

    a.handle_message(&message).await.unwrap();
    b.handle_message(&message).await.unwrap();
    b.track_node(8);

    assert_eq!(a.seen_nodes(), vec![3]);
    assert_eq!(b.seen_nodes(), vec![3, 8]);
    assert_eq!(aggregate_seen_nodes([&a, &b]), vec![3, 8]);
}

#[tokio::test]
async fn version_request_targets_the_gateway_node() {
    let (gw, transport) = gateway("default", 1..=254, IdAssignment::Sequential);
    gw.send_version_request().await.unwrap();
    let lines: Vec<_> = transport.sent().iter().map(Message::to_line).collect();
    assert_eq!(lines, vec!["0;255;3;0;2;"]);
}

#[tokio::test]
async fn send_failure_surfaces_as_link_error() {
    let (gw, transport) = gateway("default", 1..=254, IdAssignment::Sequential);
    transport.drop_link();

    let err = gw.send_version_request().await.unwrap_err();
    assert!(err.is_connection_level());
}

#[tokio::test]
async fn undelivered_id_response_frees_the_id() {
    let (gw, transport) = gateway("default", 1..=254, IdAssignment::Sequential);
    transport.drop_link();

    let err = gw.handle_message(&id_request()).await.unwrap_err();
    assert!(err.is_connection_level());
    assert!(gw.seen_nodes().is_empty());

    transport.connect().await.unwrap();
    let handled = gw.handle_message(&id_request()).await.unwrap();
    assert_eq!(handled.assigned, Some(1));
    assert_eq!(transport.sent_lines(), vec!["255;255;3;0;4;1"]);
}

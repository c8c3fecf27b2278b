// Shared in-memory doubles for the transport and the message bus.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use mysbridge_core::{
    AdapterConfig, BridgeConfig, BusConfig, BusMessage, CoreError, DeviceConfig, EntityConfig,
    GatewayConfig, MessageBus,
};
use mysbridge_proto::{Error, LinkState, Message, Transport};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

// ── Transport double ─────────────────────────────────────────────────

pub struct MemoryTransport {
    name: String,
    state: watch::Sender<LinkState>,
    refuse: AtomicBool,
    sent: Mutex<Vec<Message>>,
    inbox_tx: mpsc::Sender<Message>,
    inbox_rx: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl MemoryTransport {
    pub fn new(name: &str) -> Arc<Self> {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (inbox_tx, inbox_rx) = mpsc::channel(100);
        Arc::new(Self {
            name: name.to_owned(),
            state,
            refuse: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
        })
    }

    /// A transport that is already up, for tests that skip `connect`.
    pub fn connected(name: &str) -> Arc<Self> {
        let transport = Self::new(name);
        transport.state.send_replace(LinkState::Connected);
        transport
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn drop_link(&self) {
        self.state.send_replace(LinkState::Disconnected);
    }

    /// Queue a line as if the gateway had sent it.
    pub fn inject(&self, line: &str) {
        self.inbox_tx.try_send(Message::parse(line).unwrap()).unwrap();
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent lines, excluding version heartbeats.
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(Message::to_line)
            .filter(|line| line != "0;255;3;0;2;")
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Error::Connect {
                    target: self.name.clone(),
                    reason: "refused".into(),
                });
            }
            self.state.send_replace(LinkState::Connected);
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.state.send_replace(LinkState::Disconnected);
            Ok(())
        })
    }

    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            if !self.is_connected() {
                return Err(Error::NotConnected {
                    link: self.name.clone(),
                });
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        })
    }

    fn receive(&self) -> Result<ReceiverStream<Message>, Error> {
        self.inbox_rx
            .lock()
            .unwrap()
            .take()
            .map(ReceiverStream::new)
            .ok_or_else(|| Error::ReceiverTaken {
                link: self.name.clone(),
            })
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == LinkState::Connected
    }

    fn state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }
}

// ── Bus double ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

pub struct MemoryBus {
    connected: AtomicBool,
    published: Mutex<Vec<Publication>>,
    subscriptions: Mutex<Vec<String>>,
    inbox_tx: mpsc::Sender<BusMessage>,
    inbox_rx: Mutex<Option<mpsc::Receiver<BusMessage>>>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        let (inbox_tx, inbox_rx) = mpsc::channel(256);
        Arc::new(Self {
            connected: AtomicBool::new(false),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
        })
    }

    /// Deliver a message as if the broker had sent it.
    pub fn inject(&self, topic: &str, payload: &str, retained: bool) {
        self.inbox_tx
            .try_send(BusMessage {
                topic: topic.to_owned(),
                payload: payload.to_owned(),
                retained,
            })
            .unwrap();
    }

    pub fn published(&self) -> Vec<Publication> {
        self.published.lock().unwrap().clone()
    }

    /// Payloads published to `topic`, oldest first.
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload)
            .collect()
    }

    pub fn last(&self, topic: &str) -> Option<String> {
        self.payloads(topic).pop()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

impl MessageBus for MemoryBus {
    fn connect(&self) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(async move {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(async move {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: &'a str,
        retain: bool,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            self.published.lock().unwrap().push(Publication {
                topic: topic.to_owned(),
                payload: payload.to_owned(),
                retain,
            });
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, filter: &'a str) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            self.subscriptions.lock().unwrap().push(filter.to_owned());
            Ok(())
        })
    }

    fn incoming(&self) -> Result<ReceiverStream<BusMessage>, CoreError> {
        self.inbox_rx
            .lock()
            .unwrap()
            .take()
            .map(ReceiverStream::new)
            .ok_or_else(|| CoreError::Bus {
                message: "inbound stream already taken".into(),
            })
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

pub fn device(id: &str, node_id: u8, entities: Vec<EntityConfig>) -> DeviceConfig {
    DeviceConfig {
        id: id.into(),
        name: id.into(),
        node_id,
        entities,
        ..DeviceConfig::default()
    }
}

/// A configuration with one ethernet gateway per name and the given
/// devices. Sync is off unless a test turns it on.
pub fn bridge_config(gateways: &[&str], devices: Vec<DeviceConfig>) -> BridgeConfig {
    BridgeConfig {
        gateways: gateways
            .iter()
            .map(|name| GatewayConfig::ethernet(*name, "127.0.0.1", 5003))
            .collect(),
        bus: BusConfig::default(),
        adapter: AdapterConfig {
            topic_prefix: "ms".into(),
            sync: mysbridge_core::SyncConfig {
                enabled: false,
                period: Duration::from_secs(30),
            },
            ..AdapterConfig::default()
        },
        devices,
    }
}

pub fn transport_map(
    transports: &[(&str, &Arc<MemoryTransport>)],
) -> HashMap<String, Arc<dyn Transport>> {
    transports
        .iter()
        .map(|(name, transport)| {
            let transport: Arc<dyn Transport> = Arc::clone(*transport) as Arc<dyn Transport>;
            ((*name).to_owned(), transport)
        })
        .collect()
}

/// Let every ready task run to completion.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

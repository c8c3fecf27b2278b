// ── MQTT bus client ──
//
// rumqttc drives the protocol from an event loop that must be polled
// continuously. Each `connect` builds a fresh client and event loop, spawns
// the poll task, and waits for the CONNACK. When the event loop reports an
// error the session ends and the link is marked down; the supervisor's
// liveness monitor calls `connect` again.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, Publish, QoS,
    SubscribeFilter,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BUS_INBOUND_CAPACITY, BusMessage, MessageBus};
use crate::config::BusConfig;
use crate::error::CoreError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_CHANNEL_CAPACITY: usize = 64;
/// Filters per SUBSCRIBE packet when restoring subscriptions.
const SUBSCRIBE_BATCH: usize = 32;

pub struct MqttBus {
    inner: Arc<MqttInner>,
}

struct MqttInner {
    config: BusConfig,
    client: Mutex<Option<AsyncClient>>,
    connected: watch::Sender<bool>,
    session: Mutex<Option<CancellationToken>>,
    subscriptions: Mutex<Vec<String>>,
    inbox_tx: mpsc::Sender<BusMessage>,
    inbox_rx: Mutex<Option<mpsc::Receiver<BusMessage>>>,
}

impl MqttBus {
    pub fn new(config: BusConfig) -> Self {
        let (connected, _) = watch::channel(false);
        let (inbox_tx, inbox_rx) = mpsc::channel(BUS_INBOUND_CAPACITY);
        Self {
            inner: Arc::new(MqttInner {
                config,
                client: Mutex::new(None),
                connected,
                session: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                inbox_tx,
                inbox_rx: Mutex::new(Some(inbox_rx)),
            }),
        }
    }

    fn options(&self) -> MqttOptions {
        let config = &self.inner.config;
        let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }
        options
    }

    fn client(&self) -> Result<AsyncClient, CoreError> {
        self.inner
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| CoreError::Bus {
                message: "not connected".into(),
            })
    }

    fn end_session(&self) {
        let previous = self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            previous.cancel();
        }
        self.inner.connected.send_replace(false);
    }

    async fn open(&self) -> Result<(), CoreError> {
        self.end_session();

        let (client, event_loop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);
        let session = CancellationToken::new();
        *self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        *self.inner.client.lock().unwrap_or_else(PoisonError::into_inner) = Some(client.clone());

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(poll_loop(
            Arc::clone(&self.inner),
            client,
            event_loop,
            session.clone(),
            ready_tx,
        ));

        let broker = format!("{}:{}", self.inner.config.broker, self.inner.config.port);
        match tokio::time::timeout(CONNECT_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                info!(%broker, "connected to MQTT broker");
                Ok(())
            }
            Ok(Ok(Err(reason))) => {
                session.cancel();
                Err(CoreError::Bus {
                    message: format!("cannot connect to {broker}: {reason}"),
                })
            }
            Ok(Err(_)) => {
                session.cancel();
                Err(CoreError::Bus {
                    message: format!("connection to {broker} ended before CONNACK"),
                })
            }
            Err(_) => {
                session.cancel();
                Err(CoreError::BusTimeout {
                    operation: "connect",
                    timeout_secs: CONNECT_TIMEOUT.as_secs(),
                })
            }
        }
    }

    async fn close(&self) -> Result<(), CoreError> {
        let client = self
            .inner
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(client) = client {
            if let Err(e) = client.try_disconnect() {
                debug!(error = %e, "MQTT disconnect request not delivered");
            }
        }
        self.end_session();
        Ok(())
    }

    async fn send(&self, topic: &str, payload: &str, retain: bool) -> Result<(), CoreError> {
        let client = self.client()?;
        tokio::time::timeout(
            OPERATION_TIMEOUT,
            client.publish(topic, QoS::AtMostOnce, retain, payload.as_bytes().to_vec()),
        )
        .await
        .map_err(|_| CoreError::BusTimeout {
            operation: "publish",
            timeout_secs: OPERATION_TIMEOUT.as_secs(),
        })?
        .map_err(|e| CoreError::Bus {
            message: format!("publish to {topic} failed: {e}"),
        })?;
        debug!(topic, payload, retain, "MQTT TX");
        Ok(())
    }

    async fn add_subscription(&self, filter: &str) -> Result<(), CoreError> {
        {
            let mut subscriptions = self
                .inner
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !subscriptions.iter().any(|s| s == filter) {
                subscriptions.push(filter.to_owned());
            }
        }

        if !self.is_connected() {
            // Restored on the next CONNACK.
            return Ok(());
        }

        let client = self.client()?;
        tokio::time::timeout(OPERATION_TIMEOUT, client.subscribe(filter, QoS::AtMostOnce))
            .await
            .map_err(|_| CoreError::BusTimeout {
                operation: "subscribe",
                timeout_secs: OPERATION_TIMEOUT.as_secs(),
            })?
            .map_err(|e| CoreError::Bus {
                message: format!("subscribe to {filter} failed: {e}"),
            })?;
        debug!(filter, "subscribed");
        Ok(())
    }
}

impl MessageBus for MqttBus {
    fn connect(&self) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(self.open())
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(self.close())
    }

    fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: &'a str,
        retain: bool,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(self.send(topic, payload, retain))
    }

    fn subscribe<'a>(&'a self, filter: &'a str) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(self.add_subscription(filter))
    }

    fn incoming(&self) -> Result<ReceiverStream<BusMessage>, CoreError> {
        self.inner
            .inbox_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(ReceiverStream::new)
            .ok_or_else(|| CoreError::Bus {
                message: "inbound stream already taken".into(),
            })
    }
}

// ── Event loop ───────────────────────────────────────────────────────

async fn poll_loop(
    inner: Arc<MqttInner>,
    client: AsyncClient,
    mut event_loop: EventLoop,
    session: CancellationToken,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut ready = Some(ready);

    loop {
        tokio::select! {
            biased;
            () = session.cancelled() => break,
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        inner.connected.send_replace(true);
                        // The request channel only drains while this loop polls.
                        tokio::spawn(restore_subscriptions(
                            Arc::clone(&inner),
                            client.clone(),
                            session.clone(),
                        ));
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Ok(()));
                        }
                    } else {
                        let reason = format!("broker refused connection: {:?}", ack.code);
                        warn!(%reason, "MQTT connect rejected");
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Err(reason));
                        }
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    deliver(&inner, publish);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT connection lost");
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(Err(e.to_string()));
                    }
                    break;
                }
            }
        }
    }

    // Only the live session may mark the link down.
    if !session.is_cancelled() {
        session.cancel();
        inner.connected.send_replace(false);
    }
    debug!("MQTT event loop exiting");
}

/// Queue an incoming publish for the bridge. A full queue drops the
/// newest message; returns whether it was queued.
fn deliver(inner: &MqttInner, publish: Publish) -> bool {
    let message = BusMessage {
        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
        topic: publish.topic,
        retained: publish.retain,
    };
    debug!(topic = %message.topic, payload = %message.payload, "MQTT RX");
    match inner.inbox_tx.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(message)) => {
            warn!(topic = %message.topic, "bus inbound queue full, dropping message");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

fn subscription_batches(filters: &[String]) -> Vec<Vec<SubscribeFilter>> {
    filters
        .chunks(SUBSCRIBE_BATCH)
        .map(|chunk| {
            chunk
                .iter()
                .map(|filter| SubscribeFilter::new(filter.clone(), QoS::AtMostOnce))
                .collect()
        })
        .collect()
}

/// Re-issue every stored subscription after a CONNACK. Returns the number
/// of filters queued.
async fn restore_subscriptions(
    inner: Arc<MqttInner>,
    client: AsyncClient,
    session: CancellationToken,
) -> usize {
    let filters = inner
        .subscriptions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    let mut queued = 0;
    for batch in subscription_batches(&filters) {
        let len = batch.len();
        tokio::select! {
            biased;
            () = session.cancelled() => break,
            result = client.subscribe_many(batch) => match result {
                Ok(()) => queued += len,
                Err(e) => {
                    warn!(error = %e, filters = len, "failed to restore subscriptions");
                    break;
                }
            }
        }
    }
    debug!(queued, total = filters.len(), "subscriptions restored");
    queued
}

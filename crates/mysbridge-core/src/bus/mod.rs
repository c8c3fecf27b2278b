// ── Message bus ──
//
// The publish/subscribe side of the bridge. `MessageBus` is object-safe so
// the bridge can run against the MQTT client in production and an
// in-memory double in tests.

mod mqtt;

use futures_util::future::BoxFuture;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::CoreError;

pub use mqtt::MqttBus;

/// Capacity of the inbound bus message queue.
pub const BUS_INBOUND_CAPACITY: usize = 256;

/// One message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
    /// Delivered from the broker's retained store rather than live.
    pub retained: bool,
}

pub trait MessageBus: Send + Sync {
    /// Connect and wait for the broker to accept the session.
    fn connect(&self) -> BoxFuture<'_, Result<(), CoreError>>;

    fn disconnect(&self) -> BoxFuture<'_, Result<(), CoreError>>;

    fn is_connected(&self) -> bool;

    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: &'a str,
        retain: bool,
    ) -> BoxFuture<'a, Result<(), CoreError>>;

    /// Subscribe to `filter`. Subscriptions are restored after every
    /// reconnect.
    fn subscribe<'a>(&'a self, filter: &'a str) -> BoxFuture<'a, Result<(), CoreError>>;

    /// Take the inbound message stream. Only one consumer may take it.
    fn incoming(&self) -> Result<ReceiverStream<BusMessage>, CoreError>;
}

// mysbridge-proto: MySensors serial protocol codec, gateway transports, and
// connection supervision.

pub mod error;
pub mod message;
pub mod retry;
pub mod transport;

pub use error::{Error, ParseError};
pub use message::{
    BROADCAST_NODE_ID, InternalType, Message, MessageKind, NODE_CHILD_ID, SensorType,
    UNASSIGNED_NODE_ID, VariableType,
};
pub use retry::{
    ConnectionState, Phase, RetryError, RetryPolicy, Supervisor, retry_with_backoff,
};
pub use transport::{
    DEFAULT_BAUD_RATE, EthernetTransport, INBOUND_CAPACITY, LinkState, SerialTransport, Transport,
};

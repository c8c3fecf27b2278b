// ── Gateway transports ──
//
// A transport carries MySensors wire lines between the bridge and one
// physical gateway. Two concrete links exist: a TCP socket to an Ethernet
// gateway and a serial device. Both share `LinkCore` for state tracking
// and the bounded inbound queue.

mod ethernet;
mod serial;

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use crate::message::Message;

pub use ethernet::EthernetTransport;
pub use serial::{DEFAULT_BAUD_RATE, SerialTransport};

/// Capacity of each transport's inbound queue. When full, the newest
/// message is dropped.
pub const INBOUND_CAPACITY: usize = 100;

// ── Trait ────────────────────────────────────────────────────────────

/// A bidirectional line-oriented link to one gateway.
///
/// Implementations are shared behind `Arc<dyn Transport>` between the
/// supervisor, the inbound pump, and the router, so every method takes
/// `&self`.
pub trait Transport: Send + Sync {
    /// Human-readable link name for logs.
    fn name(&self) -> &str;

    /// Open the link and start the read loop. Replaces any previous session.
    fn connect(&self) -> BoxFuture<'_, Result<(), Error>>;

    /// Close the link. Idempotent.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), Error>>;

    /// Write one message. Fails with [`Error::NotConnected`] when the link
    /// is down; a write failure marks the link disconnected.
    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), Error>>;

    /// Take the inbound message stream. Only one consumer may take it; the
    /// stream survives reconnects.
    fn receive(&self) -> Result<ReceiverStream<Message>, Error>;

    fn is_connected(&self) -> bool;

    /// Watch the link state.
    fn state(&self) -> watch::Receiver<LinkState>;
}

// ── LinkState ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

// ── LinkCore ─────────────────────────────────────────────────────────

/// State shared by every concrete transport: the link state, the inbound
/// queue, and the cancellation token of the current read session.
pub(crate) struct LinkCore {
    name: String,
    state: watch::Sender<LinkState>,
    inbox_tx: mpsc::Sender<Message>,
    inbox_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    session: Mutex<Option<CancellationToken>>,
}

impl LinkCore {
    pub(crate) fn new(name: impl Into<String>) -> Arc<Self> {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOUND_CAPACITY);
        Arc::new(Self {
            name: name.into(),
            state,
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            session: Mutex::new(None),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_connected(&self) -> bool {
        *self.state.borrow() == LinkState::Connected
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub(crate) fn take_receiver(&self) -> Result<ReceiverStream<Message>, Error> {
        self.inbox_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(ReceiverStream::new)
            .ok_or_else(|| Error::ReceiverTaken {
                link: self.name.clone(),
            })
    }

    /// Start a new read session, cancelling the previous one if any.
    pub(crate) fn begin_session(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        token
    }

    /// Cancel the current session and mark the link disconnected.
    pub(crate) fn end_session(&self) {
        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            previous.cancel();
        }
        self.set_state(LinkState::Disconnected);
    }

    /// Called by a read loop whose link died underneath it. Only the
    /// current session may flip the state, so a stale loop racing a fresh
    /// connect cannot mark the new link down.
    pub(crate) fn session_lost(&self, session: &CancellationToken) {
        if session.is_cancelled() {
            return;
        }
        session.cancel();
        self.set_state(LinkState::Disconnected);
    }

    /// Decode one raw line and enqueue it.
    ///
    /// Empty lines are skipped silently. Undecodable lines are logged and
    /// skipped. When the queue is full the new message is dropped.
    pub(crate) fn deliver_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let message = match Message::parse(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(link = %self.name, line, error = %e, "discarding undecodable line");
                return;
            }
        };

        debug!(link = %self.name, %message, "received");
        match self.inbox_tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(link = %self.name, %message, "inbound queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(link = %self.name, "inbound queue closed");
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

// ── Passthrough listener ──
//
// A line-oriented TCP service per gateway for debugging and legacy
// controllers. Every message received from the gateway is broadcast to
// all clients; every parsable line a client sends is forwarded to the
// gateway's transport.

use std::net::SocketAddr;
use std::sync::Arc;

use mysbridge_proto::{Message, Transport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;

/// Lines buffered per client before a slow client starts skipping.
const BROADCAST_CAPACITY: usize = 100;

pub struct Passthrough {
    gateway: String,
    port: u16,
    lines: broadcast::Sender<String>,
}

impl Passthrough {
    pub fn new(gateway: impl Into<String>, port: u16) -> Self {
        let (lines, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            gateway: gateway.into(),
            port,
            lines,
        }
    }

    pub fn gateway(&self) -> &str {
        &self.gateway
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.lines.receiver_count()
    }

    /// Send a device message to every connected client.
    pub fn broadcast(&self, message: &Message) {
        // No receivers just means no clients.
        let _ = self.lines.send(message.to_line());
    }

    /// Bind the listening socket on all interfaces.
    pub async fn bind(&self) -> Result<TcpListener, CoreError> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|source| CoreError::Listen {
                gateway: self.gateway.clone(),
                port: self.port,
                source,
            })?;
        info!(gateway = %self.gateway, port = self.port, "passthrough listener started");
        Ok(listener)
    }

    /// Accept clients until cancelled.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(gateway = %self.gateway, %peer, "passthrough client connected");
                        tokio::spawn(handle_client(
                            self.gateway.clone(),
                            stream,
                            peer,
                            self.lines.subscribe(),
                            Arc::clone(&transport),
                            cancel.child_token(),
                        ));
                    }
                    Err(e) => warn!(gateway = %self.gateway, error = %e, "passthrough accept failed"),
                }
            }
        }
        debug!(gateway = %self.gateway, "passthrough listener stopped");
    }
}

async fn handle_client(
    gateway: String,
    stream: TcpStream,
    peer: SocketAddr,
    mut lines: broadcast::Receiver<String>,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            outbound = lines.recv() => match outbound {
                Ok(line) => {
                    let mut bytes = line.into_bytes();
                    bytes.push(b'\n');
                    if let Err(e) = writer.write_all(&bytes).await {
                        debug!(gateway = %gateway, %peer, error = %e, "passthrough write failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(gateway = %gateway, %peer, skipped, "passthrough client lagging, lines skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            read = reader.next_line() => match read {
                Ok(None) => break,
                Ok(Some(line)) => forward_line(&gateway, peer, line.trim(), transport.as_ref()).await,
                Err(e) => {
                    debug!(gateway = %gateway, %peer, error = %e, "passthrough read failed");
                    break;
                }
            },
        }
    }

    info!(gateway = %gateway, %peer, "passthrough client disconnected");
}

async fn forward_line(gateway: &str, peer: SocketAddr, line: &str, transport: &dyn Transport) {
    if line.is_empty() {
        return;
    }
    let message = match Message::parse(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(gateway, %peer, raw = line, error = %e, "ignoring malformed passthrough line");
            return;
        }
    };
    debug!(gateway, %peer, %message, "passthrough RX");
    if let Err(e) = transport.send(&message).await {
        warn!(gateway, %peer, error = %e, "failed to forward passthrough message");
    }
}

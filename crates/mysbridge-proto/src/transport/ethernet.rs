// ── Ethernet gateway link ──
//
// One TCP connection to host:port. The read half feeds a line loop, the
// write half sits behind an async mutex so concurrent senders serialize.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{LinkCore, LinkState, Transport};
use crate::error::Error;
use crate::message::Message;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EthernetTransport {
    core: Arc<LinkCore>,
    host: String,
    port: u16,
    connect_timeout: Duration,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl EthernetTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            core: LinkCore::new(format!("tcp://{host}:{port}")),
            host,
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            writer: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn open(&self) -> Result<(), Error> {
        let target = self.target();
        self.core.set_state(LinkState::Connecting);

        let stream =
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&target)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    self.core.set_state(LinkState::Disconnected);
                    return Err(Error::Connect {
                        target,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    self.core.set_state(LinkState::Disconnected);
                    return Err(Error::ConnectTimeout {
                        target,
                        timeout_secs: self.connect_timeout.as_secs(),
                    });
                }
            };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);

        let session = self.core.begin_session();
        self.core.set_state(LinkState::Connected);
        tokio::spawn(read_loop(Arc::clone(&self.core), read_half, session));

        info!(link = %self.core.name(), "ethernet gateway connected");
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.core.end_session();
        if let Some(mut writer) = self.writer.lock().await.take() {
            // Peer may already be gone; nothing useful to do with the error.
            let _ = writer.shutdown().await;
        }
        Ok(())
    }

    async fn write(&self, message: &Message) -> Result<(), Error> {
        if !self.core.is_connected() {
            return Err(Error::NotConnected {
                link: self.core.name().to_owned(),
            });
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(Error::NotConnected {
                link: self.core.name().to_owned(),
            });
        };

        let mut line = message.to_line();
        line.push('\n');

        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(link = %self.core.name(), error = %e, "write failed, marking link down");
            *guard = None;
            self.core.end_session();
            return Err(Error::Io(e));
        }

        debug!(link = %self.core.name(), %message, "sent");
        Ok(())
    }
}

impl Transport for EthernetTransport {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn connect(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.close().await?;
            self.open().await
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(self.close())
    }

    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(self.write(message))
    }

    fn receive(&self) -> Result<ReceiverStream<Message>, Error> {
        self.core.take_receiver()
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    fn state(&self) -> watch::Receiver<LinkState> {
        self.core.subscribe()
    }
}

// ── Read loop ────────────────────────────────────────────────────────

async fn read_loop(core: Arc<LinkCore>, read_half: OwnedReadHalf, session: CancellationToken) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::with_capacity(128);

    loop {
        buf.clear();
        tokio::select! {
            biased;
            () = session.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => {
                    info!(link = %core.name(), "connection closed by gateway");
                    core.session_lost(&session);
                    break;
                }
                Ok(_) => core.deliver_line(&String::from_utf8_lossy(&buf)),
                Err(e) => {
                    warn!(link = %core.name(), error = %e, "read failed");
                    core.session_lost(&session);
                    break;
                }
            }
        }
    }

    debug!(link = %core.name(), "read loop exiting");
}

// ── Serial gateway link ──
//
// The serialport crate is blocking, so the port is opened and written on
// the blocking pool and read from a dedicated blocking task that polls the
// session token between read timeouts.

use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio::sync::watch;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{LinkCore, LinkState, Transport};
use crate::error::Error;
use crate::message::Message;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

pub struct SerialTransport {
    core: Arc<LinkCore>,
    path: String,
    baud_rate: u32,
    read_timeout: Duration,
    port: SharedPort,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        let path = path.into();
        Self {
            core: LinkCore::new(format!("serial://{path}")),
            path,
            baud_rate,
            read_timeout: DEFAULT_READ_TIMEOUT,
            port: Arc::new(Mutex::new(None)),
        }
    }

    async fn open(&self) -> Result<(), Error> {
        if !Path::new(&self.path).exists() {
            return Err(Error::DeviceNotFound {
                path: self.path.clone(),
            });
        }

        self.core.set_state(LinkState::Connecting);

        let path = self.path.clone();
        let baud_rate = self.baud_rate;
        let read_timeout = self.read_timeout;
        let opened = tokio::task::spawn_blocking(move || {
            serialport::new(&path, baud_rate)
                .data_bits(DataBits::Eight)
                .stop_bits(StopBits::One)
                .parity(Parity::None)
                .flow_control(FlowControl::None)
                .timeout(read_timeout)
                .open()
        })
        .await
        .map_err(|e| Error::Io(io::Error::other(e)));

        let port = match opened {
            Ok(Ok(port)) => port,
            Ok(Err(e)) => {
                self.core.set_state(LinkState::Disconnected);
                return Err(Error::Serial(e));
            }
            Err(e) => {
                self.core.set_state(LinkState::Disconnected);
                return Err(e);
            }
        };

        let reader = match port.try_clone() {
            Ok(reader) => reader,
            Err(e) => {
                self.core.set_state(LinkState::Disconnected);
                return Err(Error::Serial(e));
            }
        };

        *self.port.lock().unwrap_or_else(PoisonError::into_inner) = Some(port);

        let session = self.core.begin_session();
        self.core.set_state(LinkState::Connected);

        let core = Arc::clone(&self.core);
        tokio::task::spawn_blocking(move || read_loop(&core, reader, &session));

        info!(link = %self.core.name(), baud_rate, "serial gateway connected");
        Ok(())
    }

    fn close(&self) {
        self.core.end_session();
        self.port
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    async fn write(&self, message: &Message) -> Result<(), Error> {
        if !self.core.is_connected() {
            return Err(Error::NotConnected {
                link: self.core.name().to_owned(),
            });
        }

        let mut line = message.to_line();
        line.push('\n');

        let port = Arc::clone(&self.port);
        let written = tokio::task::spawn_blocking(move || {
            let mut guard = port.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_mut() {
                Some(port) => port
                    .write_all(line.as_bytes())
                    .and_then(|()| port.flush())
                    .map(|()| true),
                None => Ok(false),
            }
        })
        .await
        .map_err(io::Error::other)
        .and_then(|r| r);

        match written {
            Ok(true) => {
                debug!(link = %self.core.name(), %message, "sent");
                Ok(())
            }
            Ok(false) => Err(Error::NotConnected {
                link: self.core.name().to_owned(),
            }),
            Err(e) => {
                warn!(link = %self.core.name(), error = %e, "write failed, marking link down");
                self.close();
                Err(Error::Io(e))
            }
        }
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn connect(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.close();
            self.open().await
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.close();
            Ok(())
        })
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

/// Blocking line reader. A read timeout is not an error; it just gives the
/// loop a chance to notice cancellation. Bytes read before a timeout stay
/// in `buf` and are completed by the next read.
fn read_loop(core: &LinkCore, port: Box<dyn SerialPort>, session: &CancellationToken) {
    let mut reader = BufReader::new(port);
    let mut buf = Vec::with_capacity(128);

    while !session.is_cancelled() {
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                info!(link = %core.name(), "serial device closed");
                core.session_lost(session);
                break;
            }
            Ok(_) => {
                core.deliver_line(&String::from_utf8_lossy(&buf));
                buf.clear();
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {}
            Err(e) => {
                warn!(link = %core.name(), error = %e, "serial read failed");
                core.session_lost(session);
                break;
            }
        }
    }

    debug!(link = %core.name(), "serial read loop exiting");
}

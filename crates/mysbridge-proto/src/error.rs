use thiserror::Error;

/// A wire line that could not be decoded into a [`Message`](crate::Message).
///
/// Always recoverable: read loops log it and move on to the next line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid message: {reason}")]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Top-level error type for the `mysbridge-proto` crate.
///
/// Covers codec failures and every transport failure mode. Connection-level
/// variants are what the reconnect supervisor retries on.
#[derive(Debug, Error)]
pub enum Error {
    // ── Codec ───────────────────────────────────────────────────────
    #[error(transparent)]
    Parse(#[from] ParseError),

    // ── Connection ──────────────────────────────────────────────────
    /// `send` was called while the link is not in the `Connected` phase.
    #[error("not connected to {link}")]
    NotConnected { link: String },

    /// The connect attempt did not complete within its deadline.
    #[error("connection to {target} timed out after {timeout_secs}s")]
    ConnectTimeout { target: String, timeout_secs: u64 },

    /// The peer refused or reset the connection attempt.
    #[error("cannot connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    /// The serial device node is missing.
    #[error("serial device does not exist: {path}")]
    DeviceNotFound { path: String },

    // ── I/O ─────────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The inbound stream has already been handed to another consumer.
    #[error("inbound stream for {link} was already taken")]
    ReceiverTaken { link: String },
}

impl Error {
    /// Returns `true` if this error drops the link and should be healed by
    /// reconnecting rather than surfaced to the caller.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::NotConnected { .. }
                | Self::ConnectTimeout { .. }
                | Self::Connect { .. }
                | Self::DeviceNotFound { .. }
                | Self::Io(_)
                | Self::Serial(_)
        )
    }
}

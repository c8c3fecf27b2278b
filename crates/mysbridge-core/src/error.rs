// ── Core error types ──
//
// Errors surfaced by the gateway runtime. Link-level failures from
// `mysbridge-proto` pass through unchanged as `Link`; everything else is
// expressed in terms of gateways, entities and the bus.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Addressing ───────────────────────────────────────────────────
    #[error("no gateway named '{name}' is configured")]
    UnknownGateway { name: String },

    #[error("no entity '{entity}' on device '{device}'")]
    UnknownEntity { device: String, entity: String },

    #[error("entity {device}/{entity} is read-only")]
    ReadOnlyEntity { device: String, entity: String },

    #[error("payload '{payload}' is not valid for {kind} entity {device}/{entity}")]
    InvalidPayload {
        device: String,
        entity: String,
        kind: String,
        payload: String,
    },

    // ── Node ids ─────────────────────────────────────────────────────
    #[error("gateway '{gateway}' has no free node id in {start}..={end}")]
    NoAvailableIds { gateway: String, start: u8, end: u8 },

    // ── Message bus ──────────────────────────────────────────────────
    #[error("message bus error: {message}")]
    Bus { message: String },

    #[error("message bus {operation} timed out after {timeout_secs}s")]
    BusTimeout {
        operation: &'static str,
        timeout_secs: u64,
    },

    // ── Passthrough ──────────────────────────────────────────────────
    #[error("cannot listen on port {port} for gateway '{gateway}': {source}")]
    Listen {
        gateway: String,
        port: u16,
        source: std::io::Error,
    },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("operation cancelled")]
    Cancelled,

    #[error("startup failed for {connection}: {reason}")]
    Startup { connection: String, reason: String },

    #[error("bridge is already running")]
    AlreadyRunning,

    // ── Link-layer errors (pass-through) ─────────────────────────────
    #[error(transparent)]
    Link(#[from] mysbridge_proto::Error),
}

impl CoreError {
    /// Returns `true` when the failure is healed by reconnecting.
    pub fn is_connection_level(&self) -> bool {
        match self {
            Self::Link(e) => e.is_connection_level(),
            Self::Bus { .. } | Self::BusTimeout { .. } => true,
            _ => false,
        }
    }
}

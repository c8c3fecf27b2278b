//! CLI error types with miette diagnostics.
//!
//! Maps configuration and runtime errors into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use mysbridge_config::ConfigError;
use mysbridge_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(mysbridge::no_config),
        help(
            "Pass the file with --config <path>, or create config.yaml in the\n\
             working directory."
        )
    )]
    NoConfig { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(mysbridge::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(
        code(mysbridge::config),
        help("Check the file syntax and any MYSBRIDGE_* environment variables.")
    )]
    Config(ConfigError),

    // ── Runtime ──────────────────────────────────────────────────────

    #[error("Could not connect to {connection}: {reason}")]
    #[diagnostic(
        code(mysbridge::connection_failed),
        help("Check that the gateway and the MQTT broker are reachable.")
    )]
    ConnectionFailed { connection: String, reason: String },

    #[error("Cannot listen on port {port} for gateway '{gateway}'")]
    #[diagnostic(
        code(mysbridge::port_in_use),
        help("Pick another mysensors.{gateway}.tcp_service.port or stop the other listener.")
    )]
    PortInUse {
        gateway: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(mysbridge::runtime))]
    Core(CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::Config(_) => exit_code::USAGE,
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::PortInUse { .. } => exit_code::CONFLICT,
            Self::Core(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => Self::NoConfig {
                path: path.display().to_string(),
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Io(source) => Self::Io(source),
            other => Self::Config(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Startup { connection, reason } => Self::ConnectionFailed { connection, reason },
            CoreError::Listen {
                gateway,
                port,
                source,
            } => Self::PortInUse {
                gateway,
                port,
                source,
            },
            other => Self::Core(other),
        }
    }
}

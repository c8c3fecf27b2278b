//! Configuration for the mysbridge daemon.
//!
//! A YAML or TOML document (picked by file extension) layered over
//! built-in defaults and `MYSBRIDGE_*` environment variables, validated,
//! and translated into `mysbridge_core::BridgeConfig`.

mod resolve;
mod schema;

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use thiserror::Error;

pub use schema::{
    AdapterSection, Config, DeviceSection, EntitySection, EthernetSection, GatewaySection,
    MqttSection, NodeIdRange, NodeSection, PassthroughSection, SerialSection, SyncSection,
    TransportKind,
};

/// Environment variable prefix; nested keys are separated by `__`,
/// e.g. `MYSBRIDGE_MQTT__BROKER`.
pub const ENV_PREFIX: &str = "MYSBRIDGE_";

/// Config file used when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to render config as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to render config as TOML: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── File format ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Toml,
}

impl FileFormat {
    /// `.toml` files are TOML; anything else is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────────

/// The provider stack for `path`: defaults, then the file, then the
/// environment.
pub fn figment(path: &Path) -> Figment {
    let base = Figment::new().merge(Serialized::defaults(Config::default()));
    let base = match FileFormat::from_path(path) {
        FileFormat::Toml => base.merge(Toml::file(path)),
        FileFormat::Yaml => base.merge(Yaml::file(path)),
    };
    base.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Extract, normalize and validate a configuration from any provider
/// stack.
pub fn from_figment(figment: &Figment) -> Result<Config, ConfigError> {
    let mut config: Config = figment.extract()?;
    config.normalize();
    config.validate()?;
    Ok(config)
}

/// Load and validate the configuration at `path`.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    from_figment(&figment(path))
}

// ── Rendering ───────────────────────────────────────────────────────

/// Serialize the effective configuration with the password masked.
pub fn render(config: &Config, format: FileFormat) -> Result<String, ConfigError> {
    let mut shown = config.clone();
    if shown.mqtt.password.is_some() {
        shown.mqtt.password = Some("********".into());
    }
    Ok(match format {
        FileFormat::Yaml => serde_yaml::to_string(&shown)?,
        FileFormat::Toml => toml::to_string_pretty(&shown)?,
    })
}

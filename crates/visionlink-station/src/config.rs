//! Station configuration.
//!
//! Values are layered with figment: built-in defaults, then an optional TOML
//! file, then environment variables prefixed `VISIONLINK_` with `__`
//! separating sections.
//!
//! ```toml
//! [plc]
//! host = "192.168.1.10"
//! connection_type = "op"
//! db = 4
//!
//! [cycle]
//! confidence_floor = 0.1
//! fallback_class = 2
//! ```
//!
//! The same host can be set with `VISIONLINK_PLC__HOST=192.168.1.10`.

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use visionlink_core::catalog::DEFAULT_CLASS_NAMES;
use visionlink_core::constants::{
    DEFAULT_CONFIDENCE_FLOOR, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_DB, DEFAULT_FALLBACK_CLASS,
    DEFAULT_IO_TIMEOUT_MS, DEFAULT_MAX_RETRIES, DEFAULT_PLC_HOST, DEFAULT_PLC_PORT,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_RACK, DEFAULT_RECONNECT_INTERVAL_MS,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_SLOT, DEFAULT_TRIGGER_WINDOW_MS,
};
use visionlink_core::{ClassCatalog, ClassId};
use visionlink_hardware::mock::{MockPlc, MockPlcHandle};
use visionlink_hardware::{AnyTransport, Endpoint, S7Client, Timeouts};
use visionlink_protocol::ConnectionType;

use crate::cycle::CyclePolicy;
use crate::link::{DeviceLink, RetryPolicy};
use crate::registers::RegisterProtocol;
use crate::station::PollSettings;
use crate::{Result, StationError};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "VISIONLINK_";

/// Which controller transport the station drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// S7 over ISO-on-TCP.
    #[default]
    S7,
    /// In-memory controller simulation.
    Mock,
}

/// Controller endpoint and transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcConfig {
    pub host: String,
    pub port: u16,
    pub rack: u16,
    pub slot: u16,
    pub connection_type: ConnectionType,
    pub db: u16,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    pub transport: TransportKind,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_PLC_HOST.to_string(),
            port: DEFAULT_PLC_PORT,
            rack: DEFAULT_RACK,
            slot: DEFAULT_SLOT,
            connection_type: ConnectionType::Op,
            db: DEFAULT_DB,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            transport: TransportKind::default(),
        }
    }
}

/// Write retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

/// Decision and handshake settings for inspection cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub confidence_floor: f32,
    /// Class reported when nothing clears the floor.
    pub fallback_class: u16,
    /// Class reported with the idle fallback when capture fails.
    pub capture_fallback_class: u16,
    pub trigger_window_ms: u64,
    /// Read the registers back after each result write.
    pub confirm_writes: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            fallback_class: DEFAULT_FALLBACK_CLASS,
            capture_fallback_class: DEFAULT_FALLBACK_CLASS,
            trigger_window_ms: DEFAULT_TRIGGER_WINDOW_MS,
            confirm_writes: false,
        }
    }
}

/// Poll loop timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub reconnect_interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Complete station configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub plc: PlcConfig,
    pub link: LinkConfig,
    pub cycle: CycleConfig,
    pub poll: PollConfig,
    /// Class names in id order; position `i` names class id `i + 1`.
    pub classes: Vec<String>,
    pub logging: LoggingConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            plc: PlcConfig::default(),
            link: LinkConfig::default(),
            cycle: CycleConfig::default(),
            poll: PollConfig::default(),
            classes: DEFAULT_CLASS_NAMES.iter().map(|n| n.to_string()).collect(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StationConfig {
    /// Layered configuration sources without extracting them.
    ///
    /// An explicit `path` must exist; without one, `visionlink.toml` in the
    /// working directory is used when present.
    ///
    /// # Errors
    /// Returns `StationError::InvalidConfig` when `path` does not exist.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match path {
            Some(path) if !path.exists() => {
                return Err(StationError::invalid_config(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                let local = Path::new("visionlink.toml");
                if local.exists() {
                    figment = figment.merge(Toml::file(local));
                }
            }
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load and validate configuration from all sources.
    ///
    /// # Errors
    /// Returns an error if a source cannot be parsed or the merged values
    /// fail [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(path)?)
    }

    /// Extract and validate configuration from prepared sources.
    ///
    /// # Errors
    /// Returns an error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with a TOML document.
    ///
    /// # Errors
    /// Returns an error if the document does not parse or validate.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml)),
        )
    }

    /// Check values that serde cannot.
    ///
    /// # Errors
    /// Returns `StationError::InvalidConfig` naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.plc.host.trim().is_empty() {
            return Err(StationError::invalid_config("plc.host must not be empty"));
        }
        if self.plc.connect_timeout_ms == 0 || self.plc.io_timeout_ms == 0 {
            return Err(StationError::invalid_config("plc timeouts must be positive"));
        }
        if self.link.max_retries == 0 {
            return Err(StationError::invalid_config(
                "link.max_retries must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.cycle.confidence_floor) {
            return Err(StationError::invalid_config(format!(
                "cycle.confidence_floor must be within [0, 1], got {}",
                self.cycle.confidence_floor
            )));
        }
        if self.poll.interval_ms == 0 {
            return Err(StationError::invalid_config(
                "poll.interval_ms must be positive",
            ));
        }

        let catalog = self.catalog()?;
        for (key, id) in [
            ("cycle.fallback_class", self.cycle.fallback_class),
            ("cycle.capture_fallback_class", self.cycle.capture_fallback_class),
        ] {
            let known = ClassId::new(id).is_ok_and(|id| catalog.contains(id));
            if !known {
                return Err(StationError::invalid_config(format!(
                    "{key} must name one of the {} configured classes, got {id}",
                    catalog.len()
                )));
            }
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.plc.host.clone(),
            port: self.plc.port,
            rack: self.plc.rack,
            slot: self.plc.slot,
            connection_type: self.plc.connection_type,
            db: self.plc.db,
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(self.plc.connect_timeout_ms),
            io: Duration::from_millis(self.plc.io_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.link.max_retries,
            retry_delay: Duration::from_millis(self.link.retry_delay_ms),
        }
    }

    /// # Errors
    /// Returns `StationError::Core` if a fallback class id is invalid.
    pub fn cycle_policy(&self) -> Result<CyclePolicy> {
        Ok(CyclePolicy {
            confidence_floor: self.cycle.confidence_floor,
            fallback_class: ClassId::new(self.cycle.fallback_class)?,
            capture_fallback_class: ClassId::new(self.cycle.capture_fallback_class)?,
            trigger_window: Duration::from_millis(self.cycle.trigger_window_ms),
            max_retries: self.link.max_retries,
        })
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(self.poll.interval_ms),
            reconnect_interval: Duration::from_millis(self.poll.reconnect_interval_ms),
        }
    }

    /// # Errors
    /// Returns `StationError::Core` if the class list is empty or blank.
    pub fn catalog(&self) -> Result<ClassCatalog> {
        Ok(ClassCatalog::new(self.classes.iter().cloned())?)
    }

    /// Build the handshake protocol over the configured transport.
    ///
    /// With the mock transport the handle playing the controller side is
    /// returned as well. Nothing is connected yet.
    pub fn register_protocol(&self) -> (RegisterProtocol, Option<MockPlcHandle>) {
        let (transport, handle) = match self.plc.transport {
            TransportKind::S7 => (
                AnyTransport::S7(S7Client::new(self.endpoint(), self.timeouts())),
                None,
            ),
            TransportKind::Mock => {
                let (plc, handle) = MockPlc::new(self.plc.db);
                (AnyTransport::Mock(plc), Some(handle))
            }
        };

        let link = DeviceLink::new(self.endpoint(), transport, self.retry_policy());
        let registers = RegisterProtocol::new(Arc::new(link))
            .with_write_confirmation(self.cycle.confirm_writes);
        (registers, handle)
    }
}

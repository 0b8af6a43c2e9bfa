//! Shared types for controller endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use visionlink_core::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_DB, DEFAULT_IO_TIMEOUT_MS, DEFAULT_PLC_HOST,
    DEFAULT_PLC_PORT, DEFAULT_RACK, DEFAULT_SLOT,
};
use visionlink_protocol::ConnectionType;

/// Where the controller lives and which data block holds the registers.
///
/// Immutable once a link has been built around it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub rack: u16,
    pub slot: u16,
    pub connection_type: ConnectionType,
    pub db: u16,
}

impl Endpoint {
    /// Endpoint on the default port with the default rack, slot and block.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_db(mut self, db: u16) -> Self {
        self.db = db;
        self
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_PLC_HOST.to_string(),
            port: DEFAULT_PLC_PORT,
            rack: DEFAULT_RACK,
            slot: DEFAULT_SLOT,
            connection_type: ConnectionType::Op,
            db: DEFAULT_DB,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} rack {} slot {} ({}) DB{}",
            self.host, self.port, self.rack, self.slot, self.connection_type, self.db
        )
    }
}

/// Socket timeouts for a controller session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect plus COTP and S7 handshakes.
    pub connect: Duration,
    /// One request/response exchange.
    pub io: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            io: Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
        }
    }
}

//! Device link: the station's single connection to the controller.
//!
//! `DeviceLink` owns the transport and turns every device-level failure into
//! a state flag plus a diagnostic string. Callers see `bool`/`Option` results
//! and never a `HardwareError`.
//!
//! ```text
//!                  connect() ok
//!  Disconnected ───────────────────► Connected
//!       ▲   │ connect() err              │ read error / writes exhausted
//!       │   ▼                            ▼
//!       └── Faulted ◄────────────────────┘
//!  disconnect()        connect() ok ──► Connected
//! ```
//!
//! Every transport call runs under one async mutex, held for that call only.
//! Reads and writes from concurrent callers interleave between calls but
//! never within one. Retry delays are spent outside the lock.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use visionlink_core::clamp_word;
use visionlink_core::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, WORD_SIZE};
use visionlink_hardware::traits::PlcTransport;
use visionlink_hardware::{AnyTransport, Endpoint, HardwareError};

/// Connection state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connected,
    /// The last handshake or I/O call failed; `connect()` recovers.
    Faulted,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::Faulted => write!(f, "faulted"),
        }
    }
}

/// State plus the most recent diagnostic, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub state: LinkState,
    pub last_error: Option<String>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            last_error: None,
        }
    }
}

/// Bounded retry settings for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per write, the first one included.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Serialized access to one controller data block.
///
/// # Examples
///
/// ```
/// use visionlink_hardware::{AnyTransport, Endpoint};
/// use visionlink_hardware::mock::MockPlc;
/// use visionlink_station::link::{DeviceLink, LinkState, RetryPolicy};
///
/// #[tokio::main]
/// async fn main() {
///     let (plc, handle) = MockPlc::new(4);
///     let link = DeviceLink::new(Endpoint::default(), AnyTransport::Mock(plc), RetryPolicy::default());
///
///     assert!(link.connect().await);
///     handle.set_word(0, 1);
///     assert_eq!(link.read_word(0).await, Some(1));
///
///     assert!(link.write_word(2, 70_000, 3).await);
///     assert_eq!(handle.word(2), i16::MAX);
///     assert_eq!(link.state(), LinkState::Connected);
/// }
/// ```
#[derive(Debug)]
pub struct DeviceLink {
    endpoint: Endpoint,
    transport_name: &'static str,
    transport: Mutex<AnyTransport>,
    policy: RetryPolicy,
    status: watch::Sender<LinkStatus>,
}

impl DeviceLink {
    /// Wrap a transport. The link starts `Disconnected`; nothing is dialled.
    pub fn new(endpoint: Endpoint, transport: AnyTransport, policy: RetryPolicy) -> Self {
        let (status, _) = watch::channel(LinkStatus::default());
        Self {
            endpoint,
            transport_name: transport.name(),
            transport: Mutex::new(transport),
            policy,
            status,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Short name of the wrapped transport (`s7`, `mock`).
    pub fn transport_name(&self) -> &'static str {
        self.transport_name
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn state(&self) -> LinkState {
        self.status.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Diagnostic from the most recent failure, kept across reconnects.
    pub fn last_error(&self) -> Option<String> {
        self.status.borrow().last_error.clone()
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    /// Establish the session unless it is already up.
    ///
    /// Returns `true` when connected afterwards. While `Connected` the
    /// transport is not touched.
    pub async fn connect(&self) -> bool {
        let mut transport = self.transport.lock().await;
        // Checked under the lock so concurrent callers handshake once.
        if self.state() == LinkState::Connected {
            return true;
        }

        if transport.is_connected()
            && let Err(e) = transport.disconnect().await
        {
            debug!(error = %e, "Discarding stale session failed");
        }

        match transport.connect().await {
            Ok(()) => {
                drop(transport);
                self.status.send_modify(|status| status.state = LinkState::Connected);
                info!(endpoint = %self.endpoint, transport = self.transport_name, "Controller link established");
                true
            }
            Err(e) => {
                drop(transport);
                self.fault(format!("connect to {} failed: {e}", self.endpoint));
                false
            }
        }
    }

    /// Tear the session down. Always leaves the link `Disconnected`.
    pub async fn disconnect(&self) {
        let mut transport = self.transport.lock().await;
        if transport.is_connected()
            && let Err(e) = transport.disconnect().await
        {
            warn!(error = %e, "Controller disconnect reported an error");
        }
        drop(transport);

        let was = self.state();
        self.status.send_modify(|status| status.state = LinkState::Disconnected);
        if was != LinkState::Disconnected {
            info!(endpoint = %self.endpoint, "Controller link closed");
        }
    }

    /// `true` when connected, otherwise one `connect()` attempt.
    pub async fn ensure_connected(&self) -> bool {
        self.is_connected() || self.connect().await
    }

    /// Read one word. `None` on failure, with the link marked `Faulted`.
    pub async fn read_word(&self, offset: u16) -> Option<i16> {
        self.read_word_at(offset).await.map(|(word, _)| word)
    }

    /// Read one word together with the instant the transport returned it.
    pub async fn read_word_at(&self, offset: u16) -> Option<(i16, Instant)> {
        let (words, at) = self.read_words_at(offset, 1).await?;
        words.first().map(|word| (*word, at))
    }

    /// Read `count` consecutive words starting at `offset`.
    pub async fn read_words(&self, offset: u16, count: u16) -> Option<Vec<i16>> {
        self.read_words_at(offset, count).await.map(|(words, _)| words)
    }

    /// Read `count` consecutive words and the instant the transport returned
    /// them.
    ///
    /// The instant is taken while the transport lock is still held, so it
    /// orders against every other transport call the same way the calls
    /// themselves are ordered.
    pub async fn read_words_at(&self, offset: u16, count: u16) -> Option<(Vec<i16>, Instant)> {
        let Some(len) = count.checked_mul(WORD_SIZE as u16).filter(|len| *len > 0) else {
            self.fault(format!("cannot read {count} words"));
            return None;
        };

        let (result, at) = {
            let mut transport = self.transport.lock().await;
            let result = if self.state() != LinkState::Connected {
                Err(HardwareError::disconnected(self.endpoint.to_string()))
            } else {
                transport.db_read(self.endpoint.db, offset, len).await
            };
            (result, Instant::now())
        };

        match result {
            Ok(raw) if raw.len() == usize::from(len) => Some((
                raw.chunks_exact(WORD_SIZE)
                    .map(|word| i16::from_be_bytes([word[0], word[1]]))
                    .collect(),
                at,
            )),
            Ok(raw) => {
                self.fault(format!(
                    "read of DB{}.DBB{offset} returned {} bytes, expected {len}",
                    self.endpoint.db,
                    raw.len()
                ));
                None
            }
            Err(e) => {
                self.fault(format!("read of DB{}.DBB{offset} failed: {e}", self.endpoint.db));
                None
            }
        }
    }

    /// Write one word, clamping `value` into the signed 16-bit range.
    pub async fn write_word(&self, offset: u16, value: i64, max_retries: u32) -> bool {
        let word = clamp_word(value);
        if i64::from(word) != value {
            debug!(offset, value, clamped = word, "Clamped register value");
        }
        self.write_words(offset, &word.to_be_bytes(), max_retries).await
    }

    /// Write raw bytes starting at `offset` in one transport call.
    ///
    /// Failed attempts are repeated up to `max_retries` attempts in total,
    /// `retry_delay` apart. When every attempt fails the link becomes
    /// `Faulted`. With `max_retries == 0` nothing is attempted.
    pub async fn write_words(&self, offset: u16, bytes: &[u8], max_retries: u32) -> bool {
        let db = self.endpoint.db;
        if max_retries == 0 {
            self.fault(format!("write to DB{db}.DBB{offset} allowed no attempts"));
            return false;
        }

        let mut last_error = String::new();
        for attempt in 1..=max_retries {
            let result = {
                let mut transport = self.transport.lock().await;
                if self.state() != LinkState::Connected {
                    drop(transport);
                    self.fault(format!(
                        "write to DB{db}.DBB{offset} while link {}",
                        self.state()
                    ));
                    return false;
                }
                transport.db_write(db, offset, bytes).await
            };

            match result {
                Ok(()) => {
                    if attempt > 1 {
                        info!(db, offset, attempt, "Write succeeded after retry");
                    }
                    return true;
                }
                Err(e) => {
                    warn!(db, offset, attempt, max_retries, error = %e, "Write attempt failed");
                    last_error = e.to_string();
                }
            }

            if attempt < max_retries {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        self.fault(format!(
            "write to DB{db}.DBB{offset} failed after {max_retries} attempts: {last_error}"
        ));
        false
    }

    fn fault(&self, message: String) {
        let was = self.state();
        if was == LinkState::Faulted {
            debug!(error = %message, "Controller link still faulted");
        } else {
            error!(endpoint = %self.endpoint, was = %was, error = %message, "Controller link faulted");
        }
        self.status.send_replace(LinkStatus {
            state: LinkState::Faulted,
            last_error: Some(message),
        });
    }
}

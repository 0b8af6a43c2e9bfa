//! Mock controller for testing and development.
//!
//! `MockPlc` keeps one data block in memory and answers reads and writes the
//! way a controller would, including item-level refusals for unknown blocks
//! and out-of-range addresses. The paired [`MockPlcHandle`] plays the
//! controller side: it sets registers, injects failures and inspects what the
//! station wrote.

use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use visionlink_core::constants::{
    RESULT_OFFSET, STATUS_DONE, STATUS_IDLE, STATUS_OFFSET, STATUS_TRIGGERED,
};
use visionlink_protocol::{ProtocolError, ReturnCode};

use crate::traits::PlcTransport;
use crate::{HardwareError, Result};

/// Size of the simulated data block in bytes.
pub const MOCK_DB_SIZE: usize = 64;

/// One `db_write` call as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub db: u16,
    pub offset: u16,
    pub data: Bytes,
}

#[derive(Debug)]
struct PlcState {
    memory: Vec<u8>,
    session_open: bool,
    refuse_connections: bool,
    pending_read_failures: u32,
    pending_write_failures: u32,
    latency: Duration,
    handshakes: u32,
    reads: u32,
    write_attempts: u32,
    writes: Vec<WriteRecord>,
}

impl Default for PlcState {
    fn default() -> Self {
        Self {
            memory: vec![0; MOCK_DB_SIZE],
            session_open: false,
            refuse_connections: false,
            pending_read_failures: 0,
            pending_write_failures: 0,
            latency: Duration::ZERO,
            handshakes: 0,
            reads: 0,
            write_attempts: 0,
            writes: Vec::new(),
        }
    }
}

fn lock(state: &Mutex<PlcState>) -> MutexGuard<'_, PlcState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn checked_range(
    offset: u16,
    len: usize,
) -> std::result::Result<std::ops::Range<usize>, ReturnCode> {
    let start = usize::from(offset);
    let end = start + len;
    if end > MOCK_DB_SIZE {
        return Err(ReturnCode::ADDRESS_OUT_OF_RANGE);
    }
    Ok(start..end)
}

/// Mock controller transport.
///
/// # Examples
///
/// ```
/// use visionlink_hardware::mock::MockPlc;
/// use visionlink_hardware::traits::PlcTransport;
///
/// #[tokio::main]
/// async fn main() -> visionlink_hardware::Result<()> {
///     let (mut plc, handle) = MockPlc::new(4);
///     plc.connect().await?;
///
///     plc.db_write(4, 0, &[0x00, 0x02, 0x00, 0x05]).await?;
///     assert_eq!(handle.word(0), 2);
///     assert_eq!(handle.word(2), 5);
///     assert_eq!(handle.writes().len(), 1);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockPlc {
    db: u16,
    state: Arc<Mutex<PlcState>>,
}

impl MockPlc {
    /// Create a mock controller serving data block `db`.
    ///
    /// Returns the transport and a handle controlling the simulated device.
    pub fn new(db: u16) -> (Self, MockPlcHandle) {
        let state = Arc::new(Mutex::new(PlcState::default()));
        let plc = Self {
            db,
            state: Arc::clone(&state),
        };
        (plc, MockPlcHandle { db, state })
    }

    fn latency(&self) -> Duration {
        lock(&self.state).latency
    }

    async fn simulate_latency(&self) {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_session(&self, state: &PlcState) -> Result<()> {
        if !state.session_open {
            return Err(HardwareError::disconnected(format!("mock PLC DB{}", self.db)));
        }
        Ok(())
    }

    fn check_db(&self, db: u16) -> Result<()> {
        if db != self.db {
            return Err(ProtocolError::ItemFailed(ReturnCode::OBJECT_MISSING).into());
        }
        Ok(())
    }
}

impl PlcTransport for MockPlc {
    async fn connect(&mut self) -> Result<()> {
        self.simulate_latency().await;
        let mut state = lock(&self.state);
        state.session_open = false;
        if state.refuse_connections {
            return Err(HardwareError::communication("connection refused by mock PLC"));
        }
        state.handshakes += 1;
        state.session_open = true;
        debug!(handshakes = state.handshakes, "Mock PLC session opened");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        lock(&self.state).session_open = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).session_open
    }

    async fn db_read(&mut self, db: u16, offset: u16, len: u16) -> Result<Bytes> {
        self.simulate_latency().await;
        let mut state = lock(&self.state);
        self.check_session(&state)?;
        state.reads += 1;

        if state.pending_read_failures > 0 {
            state.pending_read_failures -= 1;
            return Err(HardwareError::communication("injected read failure"));
        }
        self.check_db(db)?;
        let range = checked_range(offset, usize::from(len)).map_err(ProtocolError::ItemFailed)?;
        Ok(Bytes::copy_from_slice(&state.memory[range]))
    }

    async fn db_write(&mut self, db: u16, offset: u16, data: &[u8]) -> Result<()> {
        self.simulate_latency().await;
        let mut state = lock(&self.state);
        self.check_session(&state)?;
        state.write_attempts += 1;

        if state.pending_write_failures > 0 {
            state.pending_write_failures -= 1;
            return Err(HardwareError::communication("injected write failure"));
        }
        self.check_db(db)?;
        let range = checked_range(offset, data.len()).map_err(ProtocolError::ItemFailed)?;
        state.memory[range].copy_from_slice(data);
        state.writes.push(WriteRecord {
            db,
            offset,
            data: Bytes::copy_from_slice(data),
        });
        Ok(())
    }
}

/// Handle for controlling a mock controller.
///
/// Cloneable; every clone drives the same simulated device.
#[derive(Debug, Clone)]
pub struct MockPlcHandle {
    db: u16,
    state: Arc<Mutex<PlcState>>,
}

impl MockPlcHandle {
    /// Data block served by the mock.
    pub fn db(&self) -> u16 {
        self.db
    }

    /// Set a big-endian word at `offset`.
    ///
    /// # Panics
    /// Panics if the word does not fit into the simulated block.
    pub fn set_word(&self, offset: u16, value: i16) {
        let start = usize::from(offset);
        lock(&self.state).memory[start..start + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// Read the big-endian word at `offset`.
    ///
    /// # Panics
    /// Panics if the word does not fit into the simulated block.
    pub fn word(&self, offset: u16) -> i16 {
        let start = usize::from(offset);
        let state = lock(&self.state);
        i16::from_be_bytes([state.memory[start], state.memory[start + 1]])
    }

    /// Make the next `count` reads fail with a communication error.
    pub fn fail_next_reads(&self, count: u32) {
        lock(&self.state).pending_read_failures = count;
    }

    /// Make the next `count` writes fail with a communication error.
    pub fn fail_next_writes(&self, count: u32) {
        lock(&self.state).pending_write_failures = count;
    }

    /// Refuse (or accept again) connection attempts.
    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.state).refuse_connections = refuse;
    }

    /// Delay every transport call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    /// Close the session from the controller side.
    pub fn drop_session(&self) {
        lock(&self.state).session_open = false;
    }

    pub fn is_session_open(&self) -> bool {
        lock(&self.state).session_open
    }

    /// Successful handshakes performed so far.
    pub fn handshake_count(&self) -> u32 {
        lock(&self.state).handshakes
    }

    /// Read calls received while a session was open, failed ones included.
    pub fn read_count(&self) -> u32 {
        lock(&self.state).reads
    }

    /// Write calls received while a session was open, failed ones included.
    pub fn write_attempts(&self) -> u32 {
        lock(&self.state).write_attempts
    }

    /// Successful writes in arrival order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.state).writes.clone()
    }

    /// Play the controller side of the handshake until cancelled.
    ///
    /// Every `part_interval` the simulated line either presents a new part
    /// (status 0 -> 1) or, once the station has answered with status 2,
    /// consumes the result and re-arms (status 2 -> 0).
    pub async fn run_line(self, part_interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(part_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.word(STATUS_OFFSET) {
                STATUS_IDLE => {
                    debug!("Simulated line presents a part");
                    self.set_word(STATUS_OFFSET, STATUS_TRIGGERED);
                }
                STATUS_DONE => {
                    info!(result = self.word(RESULT_OFFSET), "Simulated line consumed result");
                    self.set_word(STATUS_OFFSET, STATUS_IDLE);
                }
                _ => {}
            }
        }
    }
}

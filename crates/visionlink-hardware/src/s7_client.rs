//! S7 client over ISO-on-TCP.
//!
//! Opens a TCP connection to the controller, performs the COTP connection
//! handshake and the S7 setup-communication exchange, then serves
//! byte-addressed data block reads and writes.
//!
//! # Architecture
//!
//! ```text
//! DeviceLink
//!     │
//!     └─> AnyTransport::S7
//!             │
//!             └─> S7Client ───(TCP :102)───> Controller
//!                    │
//!                    └─> TpktCodec (framing) -> COTP DT -> S7 PDU
//! ```
//!
//! # Design Principles
//!
//! - **No automatic retry**: the device link owns the retry policy.
//! - **Single session**: one outstanding request at a time, matched by PDU
//!   reference.
//! - **Fail closed**: any socket, timeout or framing error drops the session,
//!   so the next call reports `Disconnected` until `connect()` succeeds.
//!   Item-level refusals (unknown block, address out of range) keep it open.
//!
//! # Example Usage
//!
//! ```no_run
//! use visionlink_hardware::{Endpoint, S7Client, Timeouts};
//! use visionlink_hardware::traits::PlcTransport;
//!
//! # async fn example() -> visionlink_hardware::Result<()> {
//! let mut client = S7Client::new(Endpoint::new("192.168.1.10"), Timeouts::default());
//! client.connect().await?;
//!
//! let status = client.db_read(4, 0, 2).await?;
//! client.db_write(4, 0, &[0x00, 0x02, 0x00, 0x04]).await?;
//!
//! client.disconnect().await?;
//! # let _ = status;
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};
use visionlink_protocol::{
    CotpPdu, DbAddress, ProtocolError, Request, Response, S7Pdu, TpktCodec, Tsap, cotp,
    cotp::DEFAULT_TPDU_SIZE,
    s7::{DEFAULT_PDU_LENGTH, READ_RESPONSE_OVERHEAD, WRITE_REQUEST_OVERHEAD},
};

use crate::traits::PlcTransport;
use crate::types::{Endpoint, Timeouts};
use crate::{HardwareError, Result};

/// Source reference sent in the COTP connection request.
const LOCAL_REFERENCE: u16 = 0x0001;

type Transport = Framed<TcpStream, TpktCodec>;

/// S7 client for one controller.
pub struct S7Client {
    endpoint: Endpoint,
    timeouts: Timeouts,
    requested_pdu_length: u16,

    /// Framed TCP stream (None if not connected)
    framed: Option<Transport>,

    /// PDU length granted by the controller during setup communication
    pdu_length: u16,

    next_ref: u16,
}

impl S7Client {
    /// Create a client. No connection is made until `connect()`.
    pub fn new(endpoint: Endpoint, timeouts: Timeouts) -> Self {
        debug!("Creating S7 client for {}", endpoint);

        Self {
            endpoint,
            timeouts,
            requested_pdu_length: DEFAULT_PDU_LENGTH,
            framed: None,
            pdu_length: 0,
            next_ref: 0,
        }
    }

    /// Override the PDU length requested during setup communication.
    pub fn with_pdu_length(mut self, pdu_length: u16) -> Self {
        self.requested_pdu_length = pdu_length;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// PDU length granted by the controller, while connected.
    pub fn negotiated_pdu_length(&self) -> Option<u16> {
        self.framed.as_ref().map(|_| self.pdu_length)
    }

    fn next_pdu_ref(&mut self) -> u16 {
        self.next_ref = self.next_ref.wrapping_add(1);
        self.next_ref
    }

    fn not_connected(&self) -> HardwareError {
        HardwareError::disconnected(format!("S7 controller {}", self.endpoint))
    }

    async fn open(&self) -> Result<(Transport, u16)> {
        let host = self.endpoint.host.as_str();
        let port = self.endpoint.port;
        let limit = self.timeouts.connect;

        let stream = match tokio::time::timeout(limit, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("Connection to {}:{} failed: {}", host, port, e);
                return Err(e.into());
            }
            Err(_) => {
                warn!("Connection timeout after {}ms", limit.as_millis());
                return Err(HardwareError::timeout(limit.as_millis() as u64));
            }
        };

        // The register protocol exchanges tiny frames on a latency budget;
        // Nagle would hold them back.
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {} - latency may be impacted", e);
        }

        let mut framed = Framed::new(stream, TpktCodec::new());

        let request = CotpPdu::ConnectionRequest {
            src_ref: LOCAL_REFERENCE,
            src_tsap: Tsap::LOCAL,
            dst_tsap: Tsap::remote(
                self.endpoint.connection_type,
                self.endpoint.rack,
                self.endpoint.slot,
            ),
            tpdu_size: DEFAULT_TPDU_SIZE,
        };
        send_frame(&mut framed, request.encode(), limit).await?;

        match CotpPdu::decode(recv_frame(&mut framed, limit).await?)? {
            CotpPdu::ConnectionConfirm { src_ref, .. } => {
                trace!(remote_ref = src_ref, "COTP connection confirmed");
            }
            other => {
                return Err(ProtocolError::UnexpectedPdu {
                    expected: "COTP CC",
                    actual: other.kind().to_string(),
                }
                .into());
            }
        }

        let setup = S7Pdu::setup_communication(0, self.requested_pdu_length);
        send_frame(&mut framed, cotp::data(&setup), limit).await?;

        let pdu_length = match cotp::parse_data(recv_frame(&mut framed, limit).await?)? {
            S7Pdu::AckData {
                response: Response::SetupCommunication { pdu_length, .. },
                ..
            } => pdu_length,
            S7Pdu::Rejected { class, code, .. } => {
                return Err(ProtocolError::Rejected { class, code }.into());
            }
            other => {
                return Err(ProtocolError::UnexpectedPdu {
                    expected: "setup-communication ack",
                    actual: other.kind().to_string(),
                }
                .into());
            }
        };

        Ok((framed, pdu_length))
    }

    /// Send one job and wait for its acknowledgement.
    async fn exchange(&mut self, request: Request) -> Result<Response> {
        let pdu_ref = self.next_pdu_ref();
        let limit = self.timeouts.io;
        let Some(framed) = self.framed.as_mut() else {
            return Err(self.not_connected());
        };

        let result = round_trip(framed, S7Pdu::Job { pdu_ref, request }, limit).await;

        if let Err(e) = &result {
            if e.breaks_connection() {
                warn!("Dropping S7 session to {}: {}", self.endpoint, e);
                self.framed = None;
            }
        }
        result
    }

    fn check_pdu_size(&self, requested: usize) -> Result<()> {
        if requested > usize::from(self.pdu_length) {
            return Err(ProtocolError::PduTooLarge {
                requested,
                negotiated: self.pdu_length,
            }
            .into());
        }
        Ok(())
    }
}

impl PlcTransport for S7Client {
    async fn connect(&mut self) -> Result<()> {
        if self.framed.is_some() {
            self.disconnect().await?;
        }

        info!("Connecting to S7 controller at {}", self.endpoint);
        let (framed, pdu_length) = self.open().await?;

        info!(pdu_length, "Connected to {}", self.endpoint);
        self.framed = Some(framed);
        self.pdu_length = pdu_length;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut framed) = self.framed.take() {
            info!("Closing connection to {}", self.endpoint);

            let flush_timeout = Duration::from_millis(500);
            match tokio::time::timeout(flush_timeout, framed.flush()).await {
                Ok(Ok(())) => debug!("Flush completed successfully"),
                Ok(Err(e)) => warn!("Error flushing during close: {}", e),
                Err(_) => warn!(
                    "Flush timeout during close ({}ms)",
                    flush_timeout.as_millis()
                ),
            }

            let mut stream = framed.into_inner();
            let shutdown_timeout = Duration::from_millis(500);
            match tokio::time::timeout(shutdown_timeout, stream.shutdown()).await {
                Ok(Ok(())) => debug!("Shutdown completed successfully"),
                Ok(Err(e)) => warn!("Error during shutdown: {}", e),
                Err(_) => warn!(
                    "Shutdown timeout during close ({}ms)",
                    shutdown_timeout.as_millis()
                ),
            }
        }
        self.pdu_length = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    async fn db_read(&mut self, db: u16, offset: u16, len: u16) -> Result<Bytes> {
        if !self.is_connected() {
            return Err(self.not_connected());
        }
        self.check_pdu_size(usize::from(len) + READ_RESPONSE_OVERHEAD)?;

        trace!(db, offset, len, "db_read");
        match self
            .exchange(Request::ReadVar(DbAddress::new(db, offset, len)))
            .await?
        {
            Response::ReadVar(Ok(data)) if data.len() == usize::from(len) => Ok(data),
            Response::ReadVar(Ok(data)) => Err(HardwareError::invalid_data(format!(
                "requested {len} bytes from DB{db}.DBB{offset}, got {}",
                data.len()
            ))),
            Response::ReadVar(Err(code)) => Err(ProtocolError::ItemFailed(code).into()),
            other => Err(ProtocolError::UnexpectedPdu {
                expected: "read-var ack",
                actual: format!("{other:?}"),
            }
            .into()),
        }
    }

    async fn db_write(&mut self, db: u16, offset: u16, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(self.not_connected());
        }
        self.check_pdu_size(data.len() + WRITE_REQUEST_OVERHEAD)?;
        let len = u16::try_from(data.len())
            .map_err(|_| HardwareError::invalid_data("write payload exceeds 65535 bytes"))?;

        trace!(db, offset, len, "db_write");
        let request = Request::WriteVar {
            address: DbAddress::new(db, offset, len),
            data: Bytes::copy_from_slice(data),
        };
        match self.exchange(request).await? {
            Response::WriteVar(code) if code.is_success() => Ok(()),
            Response::WriteVar(code) => Err(ProtocolError::ItemFailed(code).into()),
            other => Err(ProtocolError::UnexpectedPdu {
                expected: "write-var ack",
                actual: format!("{other:?}"),
            }
            .into()),
        }
    }
}

impl Drop for S7Client {
    fn drop(&mut self) {
        if self.framed.is_some() {
            debug!("S7Client dropped while connected - connection will be closed");
        }
    }
}

impl std::fmt::Debug for S7Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S7Client")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.framed.is_some())
            .field("pdu_length", &self.pdu_length)
            .finish()
    }
}

async fn send_frame(framed: &mut Transport, frame: Bytes, limit: Duration) -> Result<()> {
    match tokio::time::timeout(limit, framed.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Failed to send frame: {}", e);
            Err(e.into())
        }
        Err(_) => {
            warn!("Send timeout after {}ms", limit.as_millis());
            Err(HardwareError::timeout(limit.as_millis() as u64))
        }
    }
}

async fn recv_frame(framed: &mut Transport, limit: Duration) -> Result<Bytes> {
    match tokio::time::timeout(limit, framed.next()).await {
        Ok(Some(Ok(frame))) => Ok(frame),
        Ok(Some(Err(e))) => {
            error!("Failed to decode frame: {}", e);
            Err(e.into())
        }
        Ok(None) => {
            warn!("Connection closed by controller");
            Err(HardwareError::communication("controller closed connection"))
        }
        Err(_) => {
            warn!("Receive timeout after {}ms", limit.as_millis());
            Err(HardwareError::timeout(limit.as_millis() as u64))
        }
    }
}

async fn round_trip(framed: &mut Transport, job: S7Pdu, limit: Duration) -> Result<Response> {
    let pdu_ref = job.pdu_ref();
    send_frame(framed, cotp::data(&job), limit).await?;

    match cotp::parse_data(recv_frame(framed, limit).await?)? {
        S7Pdu::AckData {
            pdu_ref: reply_ref,
            response,
        } if reply_ref == pdu_ref => Ok(response),
        S7Pdu::Rejected { class, code, .. } => Err(ProtocolError::Rejected { class, code }.into()),
        other => Err(ProtocolError::UnexpectedPdu {
            expected: "ack-data for the outstanding job",
            actual: format!("{} (ref {})", other.kind(), other.pdu_ref()),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_endpoint() -> Endpoint {
        // RFC 5737 TEST-NET-1, never routed
        Endpoint::new("192.0.2.1").with_port(9999)
    }

    #[test]
    fn test_client_creation() {
        let client = S7Client::new(Endpoint::default(), Timeouts::default());
        assert!(!client.is_connected());
        assert_eq!(client.negotiated_pdu_length(), None);
        assert_eq!(client.endpoint().port, 102);
    }

    #[tokio::test]
    async fn test_read_without_connect() {
        let mut client = S7Client::new(Endpoint::default(), Timeouts::default());
        let result = client.db_read(4, 0, 2).await;
        assert!(matches!(result, Err(HardwareError::Disconnected { .. })));
    }

    #[tokio::test]
    async fn test_write_without_connect() {
        let mut client = S7Client::new(Endpoint::default(), Timeouts::default());
        let result = client.db_write(4, 0, &[0, 2, 0, 4]).await;
        assert!(matches!(result, Err(HardwareError::Disconnected { .. })));
    }

    #[tokio::test]
    async fn test_connection_timeout() {
        let timeouts = Timeouts {
            connect: Duration::from_millis(100),
            io: Duration::from_millis(100),
        };
        let mut client = S7Client::new(unreachable_endpoint(), timeouts);

        let result = client.connect().await;
        assert!(matches!(
            result,
            Err(HardwareError::Timeout { .. }) | Err(HardwareError::Io(_))
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_multiple_disconnect_calls() {
        let mut client = S7Client::new(Endpoint::default(), Timeouts::default());
        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
    }
}

//! Integration tests for S7Client
//!
//! A minimal controller runs on a local TCP listener and speaks the
//! TPKT/COTP/S7 stack from `visionlink-protocol`, so the client exercises
//! real sockets, handshakes and timeouts.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use visionlink_hardware::traits::PlcTransport;
use visionlink_hardware::{Endpoint, HardwareError, S7Client, Timeouts};
use visionlink_protocol::{
    CotpPdu, ProtocolError, Request, Response, ReturnCode, S7Pdu, TpktCodec, cotp,
};

const DB: u16 = 4;
const GRANTED_PDU: u16 = 240;

/// Behaviour switches for the test controller.
#[derive(Clone, Copy, Default)]
struct ServerOptions {
    /// Never answer read jobs.
    stall_reads: bool,
    /// Answer jobs with a mismatching PDU reference.
    wrong_reference: bool,
}

type Memory = Arc<Mutex<Vec<u8>>>;

async fn serve_session(stream: TcpStream, memory: Memory, options: ServerOptions) {
    let mut framed = Framed::new(stream, TpktCodec::new());

    // COTP handshake
    let Some(Ok(frame)) = framed.next().await else { return };
    let CotpPdu::ConnectionRequest { src_ref, .. } = CotpPdu::decode(frame).unwrap() else {
        return;
    };
    let confirm = CotpPdu::ConnectionConfirm {
        dst_ref: src_ref,
        src_ref: 0x4401,
        tpdu_size: Some(1024),
    };
    framed.send(confirm.encode()).await.unwrap();

    while let Some(Ok(frame)) = framed.next().await {
        let S7Pdu::Job { pdu_ref, request } = cotp::parse_data(frame).unwrap() else {
            return;
        };
        let reply_ref = if options.wrong_reference {
            pdu_ref.wrapping_add(100)
        } else {
            pdu_ref
        };

        let response = match request {
            Request::SetupCommunication {
                max_amq_calling,
                max_amq_called,
                pdu_length,
            } => Response::SetupCommunication {
                max_amq_calling,
                max_amq_called,
                pdu_length: pdu_length.min(GRANTED_PDU),
            },
            Request::ReadVar(address) => {
                if options.stall_reads {
                    continue;
                }
                if address.db != DB {
                    Response::ReadVar(Err(ReturnCode::OBJECT_MISSING))
                } else {
                    let memory = memory.lock().unwrap();
                    let start = usize::from(address.offset);
                    let data = &memory[start..start + usize::from(address.len)];
                    Response::ReadVar(Ok(Bytes::copy_from_slice(data)))
                }
            }
            Request::WriteVar { address, data } => {
                let mut memory = memory.lock().unwrap();
                let start = usize::from(address.offset);
                memory[start..start + data.len()].copy_from_slice(&data);
                Response::WriteVar(ReturnCode::SUCCESS)
            }
        };

        let ack = S7Pdu::AckData {
            pdu_ref: if matches!(response, Response::SetupCommunication { .. }) {
                pdu_ref
            } else {
                reply_ref
            },
            response,
        };
        framed.send(cotp::data(&ack)).await.unwrap();
    }
}

/// Start a controller accepting any number of sessions.
async fn start_controller(options: ServerOptions) -> (Endpoint, Memory) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let memory: Memory = Arc::new(Mutex::new(vec![0u8; 32]));

    let shared = Arc::clone(&memory);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_session(stream, Arc::clone(&shared), options));
        }
    });

    let endpoint = Endpoint::new(addr.ip().to_string()).with_port(addr.port());
    (endpoint, memory)
}

fn short_timeouts() -> Timeouts {
    Timeouts {
        connect: Duration::from_millis(1000),
        io: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn test_full_session_lifecycle() {
    let (endpoint, memory) = start_controller(ServerOptions::default()).await;
    memory.lock().unwrap()[..2].copy_from_slice(&[0x00, 0x01]);

    let mut client = S7Client::new(endpoint, short_timeouts());
    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(client.negotiated_pdu_length(), Some(GRANTED_PDU));

    let status = client.db_read(DB, 0, 2).await.unwrap();
    assert_eq!(&status[..], &[0x00, 0x01]);

    client.db_write(DB, 0, &[0x00, 0x02, 0x00, 0x04]).await.unwrap();
    assert_eq!(&memory.lock().unwrap()[..4], &[0x00, 0x02, 0x00, 0x04]);

    client.disconnect().await.unwrap();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_reconnect_replaces_session() {
    let (endpoint, _memory) = start_controller(ServerOptions::default()).await;

    let mut client = S7Client::new(endpoint, short_timeouts());
    client.connect().await.unwrap();
    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert!(client.db_read(DB, 0, 2).await.is_ok());
}

#[tokio::test]
async fn test_missing_block_keeps_session() {
    let (endpoint, _memory) = start_controller(ServerOptions::default()).await;

    let mut client = S7Client::new(endpoint, short_timeouts());
    client.connect().await.unwrap();

    let err = client.db_read(99, 0, 2).await.unwrap_err();
    assert!(matches!(
        err,
        HardwareError::Protocol(ProtocolError::ItemFailed(ReturnCode::OBJECT_MISSING))
    ));
    assert!(client.is_connected());
    assert!(client.db_read(DB, 0, 2).await.is_ok());
}

#[tokio::test]
async fn test_oversized_request_rejected_locally() {
    let (endpoint, _memory) = start_controller(ServerOptions::default()).await;

    let mut client = S7Client::new(endpoint, short_timeouts());
    client.connect().await.unwrap();

    let payload = vec![0u8; usize::from(GRANTED_PDU)];
    let err = client.db_write(DB, 0, &payload).await.unwrap_err();
    assert!(matches!(
        err,
        HardwareError::Protocol(ProtocolError::PduTooLarge { .. })
    ));
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_read_timeout_drops_session() {
    let options = ServerOptions {
        stall_reads: true,
        ..ServerOptions::default()
    };
    let (endpoint, _memory) = start_controller(options).await;

    let mut client = S7Client::new(endpoint, short_timeouts());
    client.connect().await.unwrap();

    let err = client.db_read(DB, 0, 2).await.unwrap_err();
    assert!(matches!(err, HardwareError::Timeout { .. }));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_mismatched_reference_drops_session() {
    let options = ServerOptions {
        wrong_reference: true,
        ..ServerOptions::default()
    };
    let (endpoint, _memory) = start_controller(options).await;

    let mut client = S7Client::new(endpoint, short_timeouts());
    client.connect().await.unwrap();

    let err = client.db_read(DB, 0, 2).await.unwrap_err();
    assert!(matches!(
        err,
        HardwareError::Protocol(ProtocolError::UnexpectedPdu { .. })
    ));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_connection_refused() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let endpoint = Endpoint::new(addr.ip().to_string()).with_port(addr.port());
    let mut client = S7Client::new(endpoint, short_timeouts());

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, HardwareError::Io(_)));
    assert!(!client.is_connected());
}

//! S7 communication over ISO-on-TCP (RFC 1006).
//!
//! This crate implements the subset of the S7 protocol a vision station needs
//! to share registers with a controller: connection setup, PDU length
//! negotiation, and byte-addressed reads and writes inside one data block.
//!
//! # Layering
//!
//! ```text
//! TCP stream
//!   └─ TPKT   (version 3, 16-bit length)           -> TpktCodec
//!        └─ COTP (CR / CC / DT)                     -> CotpPdu
//!             └─ S7 PDU (job / ack-data)            -> S7Pdu
//! ```
//!
//! Every PDU type encodes and decodes in both directions, so the same crate
//! drives the client and the controller simulators used in tests.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use tokio_util::codec::{Decoder, Encoder};
//! use visionlink_protocol::{DbAddress, Request, S7Pdu, TpktCodec, cotp};
//!
//! let job = S7Pdu::Job {
//!     pdu_ref: 1,
//!     request: Request::ReadVar(DbAddress::new(4, 0, 2)),
//! };
//!
//! let mut codec = TpktCodec::new();
//! let mut wire = BytesMut::new();
//! codec.encode(cotp::data(&job), &mut wire).unwrap();
//!
//! let payload = codec.decode(&mut wire).unwrap().unwrap();
//! assert_eq!(cotp::parse_data(payload).unwrap(), job);
//! ```

pub mod cotp;
pub mod error;
pub mod s7;
pub mod tpkt;

pub use cotp::{ConnectionType, CotpPdu, Tsap};
pub use error::{ProtocolError, Result};
pub use s7::{DbAddress, Request, Response, ReturnCode, S7Pdu};
pub use tpkt::TpktCodec;

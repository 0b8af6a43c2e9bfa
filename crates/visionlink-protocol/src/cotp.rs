//! ISO 8073 connection-oriented transport (COTP) PDUs.
//!
//! Only the three PDU kinds an S7 session uses are supported:
//!
//! | Code | PDU | Direction |
//! |------|-----|-----------|
//! | `0xE0` | Connection Request (CR) | client -> controller |
//! | `0xD0` | Connection Confirm (CC) | controller -> client |
//! | `0xF0` | Data (DT) | both |
//!
//! The controller selects the communication resource from the destination
//! TSAP, which encodes the connection type together with rack and slot.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{ProtocolError, Result, s7::S7Pdu};

const PDU_CONNECTION_REQUEST: u8 = 0xE0;
const PDU_CONNECTION_CONFIRM: u8 = 0xD0;
const PDU_DATA: u8 = 0xF0;

const PARAM_TPDU_SIZE: u8 = 0xC0;
const PARAM_SRC_TSAP: u8 = 0xC1;
const PARAM_DST_TSAP: u8 = 0xC2;

/// End-of-transmission flag in a DT PDU.
const DATA_EOT: u8 = 0x80;

/// Default TPDU size requested in the connection request.
pub const DEFAULT_TPDU_SIZE: u16 = 1024;

/// Connection resource requested from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionType {
    /// Programming device.
    Pg,
    /// Operator panel (HMI).
    Op,
    /// Basic S7 communication.
    S7Basic,
}

impl ConnectionType {
    /// The selector byte placed in the high byte of the remote TSAP.
    pub fn code(&self) -> u8 {
        match self {
            Self::Pg => 0x01,
            Self::Op => 0x02,
            Self::S7Basic => 0x03,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pg => write!(f, "PG"),
            Self::Op => write!(f, "OP"),
            Self::S7Basic => write!(f, "S7-Basic"),
        }
    }
}

/// Transport service access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tsap(pub u16);

impl Tsap {
    /// TSAP used by the station side of the connection.
    pub const LOCAL: Tsap = Tsap(0x0100);

    /// Remote TSAP addressing a CPU by connection type, rack and slot.
    ///
    /// ```
    /// use visionlink_protocol::{ConnectionType, Tsap};
    ///
    /// assert_eq!(Tsap::remote(ConnectionType::Op, 0, 1), Tsap(0x0201));
    /// assert_eq!(Tsap::remote(ConnectionType::Pg, 0, 2), Tsap(0x0102));
    /// ```
    pub fn remote(connection_type: ConnectionType, rack: u16, slot: u16) -> Self {
        let rack_slot = ((rack & 0x07) << 5) | (slot & 0x1F);
        Tsap((u16::from(connection_type.code()) << 8) | rack_slot)
    }
}

/// A COTP PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CotpPdu {
    ConnectionRequest {
        src_ref: u16,
        src_tsap: Tsap,
        dst_tsap: Tsap,
        tpdu_size: u16,
    },
    ConnectionConfirm {
        dst_ref: u16,
        src_ref: u16,
        tpdu_size: Option<u16>,
    },
    Data {
        last: bool,
        payload: Bytes,
    },
}

impl CotpPdu {
    /// Short name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionRequest { .. } => "COTP CR",
            Self::ConnectionConfirm { .. } => "COTP CC",
            Self::Data { .. } => "COTP DT",
        }
    }

    /// Serialize into the bytes carried inside a TPKT frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        match self {
            Self::ConnectionRequest {
                src_ref,
                src_tsap,
                dst_tsap,
                tpdu_size,
            } => {
                buf.put_u8(17);
                buf.put_u8(PDU_CONNECTION_REQUEST);
                buf.put_u16(0x0000);
                buf.put_u16(*src_ref);
                buf.put_u8(0x00);
                buf.put_slice(&[PARAM_TPDU_SIZE, 1, tpdu_size_code(*tpdu_size)]);
                buf.put_slice(&[PARAM_SRC_TSAP, 2]);
                buf.put_u16(src_tsap.0);
                buf.put_slice(&[PARAM_DST_TSAP, 2]);
                buf.put_u16(dst_tsap.0);
            }
            Self::ConnectionConfirm {
                dst_ref,
                src_ref,
                tpdu_size,
            } => {
                buf.put_u8(if tpdu_size.is_some() { 9 } else { 6 });
                buf.put_u8(PDU_CONNECTION_CONFIRM);
                buf.put_u16(*dst_ref);
                buf.put_u16(*src_ref);
                buf.put_u8(0x00);
                if let Some(size) = tpdu_size {
                    buf.put_slice(&[PARAM_TPDU_SIZE, 1, tpdu_size_code(*size)]);
                }
            }
            Self::Data { last, payload } => {
                buf.put_u8(2);
                buf.put_u8(PDU_DATA);
                buf.put_u8(if *last { DATA_EOT } else { 0x00 });
                buf.put_slice(payload);
            }
        }
        buf.freeze()
    }

    /// Parse the payload of a TPKT frame.
    pub fn decode(bytes: Bytes) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(ProtocolError::truncated("COTP PDU", bytes.len(), 2));
        }

        let header_len = usize::from(bytes[0]) + 1;
        if bytes.len() < header_len {
            return Err(ProtocolError::truncated("COTP PDU", bytes.len(), header_len));
        }

        match bytes[1] & 0xF0 {
            PDU_DATA => {
                if header_len < 3 {
                    return Err(ProtocolError::truncated("COTP DT", header_len, 3));
                }
                Ok(Self::Data {
                    last: bytes[2] & DATA_EOT != 0,
                    payload: bytes.slice(header_len..),
                })
            }
            code @ (PDU_CONNECTION_REQUEST | PDU_CONNECTION_CONFIRM) => {
                if header_len < 7 {
                    return Err(ProtocolError::truncated("COTP CR/CC", header_len, 7));
                }
                let dst_ref = u16::from_be_bytes([bytes[2], bytes[3]]);
                let src_ref = u16::from_be_bytes([bytes[4], bytes[5]]);
                let params = Params::parse(&bytes[7..header_len])?;

                if code == PDU_CONNECTION_REQUEST {
                    Ok(Self::ConnectionRequest {
                        src_ref,
                        src_tsap: params.src_tsap.ok_or_else(|| {
                            ProtocolError::malformed("COTP CR", "missing source TSAP")
                        })?,
                        dst_tsap: params.dst_tsap.ok_or_else(|| {
                            ProtocolError::malformed("COTP CR", "missing destination TSAP")
                        })?,
                        tpdu_size: params.tpdu_size.unwrap_or(DEFAULT_TPDU_SIZE),
                    })
                } else {
                    Ok(Self::ConnectionConfirm {
                        dst_ref,
                        src_ref,
                        tpdu_size: params.tpdu_size,
                    })
                }
            }
            other => Err(ProtocolError::malformed(
                "COTP PDU",
                format!("unsupported PDU code {other:#04x}"),
            )),
        }
    }
}

#[derive(Debug, Default)]
struct Params {
    tpdu_size: Option<u16>,
    src_tsap: Option<Tsap>,
    dst_tsap: Option<Tsap>,
}

impl Params {
    fn parse(mut raw: &[u8]) -> Result<Self> {
        let mut params = Params::default();
        while raw.len() >= 2 {
            let (code, len) = (raw[0], usize::from(raw[1]));
            let value = raw.get(2..2 + len).ok_or_else(|| {
                ProtocolError::malformed("COTP parameter", "value overruns header")
            })?;
            match (code, value) {
                (PARAM_TPDU_SIZE, [size_code]) => {
                    params.tpdu_size = 1u16.checked_shl(u32::from(*size_code));
                }
                (PARAM_SRC_TSAP, [hi, lo]) => {
                    params.src_tsap = Some(Tsap(u16::from_be_bytes([*hi, *lo])));
                }
                (PARAM_DST_TSAP, [hi, lo]) => {
                    params.dst_tsap = Some(Tsap(u16::from_be_bytes([*hi, *lo])));
                }
                _ => {}
            }
            raw = &raw[2 + len..];
        }
        Ok(params)
    }
}

fn tpdu_size_code(size: u16) -> u8 {
    size.max(128).next_power_of_two().trailing_zeros() as u8
}

/// Wrap an S7 PDU into a single, final COTP data PDU.
pub fn data(pdu: &S7Pdu) -> Bytes {
    CotpPdu::Data {
        last: true,
        payload: pdu.encode(),
    }
    .encode()
}

/// Unwrap an S7 PDU from a COTP data PDU.
pub fn parse_data(bytes: Bytes) -> Result<S7Pdu> {
    match CotpPdu::decode(bytes)? {
        CotpPdu::Data { payload, .. } => S7Pdu::decode(payload),
        other => Err(ProtocolError::unexpected("COTP DT", other.kind())),
    }
}

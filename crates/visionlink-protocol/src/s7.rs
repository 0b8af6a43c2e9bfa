//! S7 protocol data units.
//!
//! An S7 PDU is a fixed header followed by a parameter block and a data
//! block:
//!
//! ```text
//! +------+--------+----------+---------+-----------+----------+---------------+
//! | 0x32 | ROSCTR | reserved | PDU ref | param len | data len | [err cls/code]|
//! +------+--------+----------+---------+-----------+----------+---------------+
//!   1B      1B        2B        2B         2B          2B       ack-data only
//! ```
//!
//! Supported functions: setup communication (`0xF0`), read var (`0x04`) and
//! write var (`0x05`), each with exactly one item addressed in a data block.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{ProtocolError, Result};

/// Protocol identifier, first byte of every S7 PDU.
pub const PROTOCOL_ID: u8 = 0x32;

const ROSCTR_JOB: u8 = 0x01;
const ROSCTR_ACK: u8 = 0x02;
const ROSCTR_ACK_DATA: u8 = 0x03;

const FN_SETUP_COMMUNICATION: u8 = 0xF0;
const FN_READ_VAR: u8 = 0x04;
const FN_WRITE_VAR: u8 = 0x05;

/// Variable specification, length of the address part, syntax id ANY.
const ITEM_HEAD: [u8; 3] = [0x12, 0x0A, 0x10];
const ITEM_LEN: usize = 12;

/// Item transport size: byte.
const ITEM_TS_BYTE: u8 = 0x02;

/// Data transport sizes.
const DATA_TS_NULL: u8 = 0x00;
const DATA_TS_BIT: u8 = 0x03;
const DATA_TS_BYTE_WORD_DWORD: u8 = 0x04;
const DATA_TS_INTEGER: u8 = 0x05;
const DATA_TS_REAL: u8 = 0x07;
const DATA_TS_OCTET_STRING: u8 = 0x09;

/// Memory area code for data blocks.
pub const AREA_DB: u8 = 0x84;

const JOB_HEADER_LEN: usize = 10;
const ACK_HEADER_LEN: usize = 12;

/// Bytes a read-var reply spends outside the payload.
pub const READ_RESPONSE_OVERHEAD: usize = ACK_HEADER_LEN + 2 + 4;

/// Bytes a write-var job spends outside the payload.
pub const WRITE_REQUEST_OVERHEAD: usize = JOB_HEADER_LEN + 2 + ITEM_LEN + 4;

/// PDU length requested during setup communication.
pub const DEFAULT_PDU_LENGTH: u16 = 480;

/// Byte range inside a data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DbAddress {
    pub db: u16,
    pub offset: u16,
    pub len: u16,
}

impl DbAddress {
    pub fn new(db: u16, offset: u16, len: u16) -> Self {
        Self { db, offset, len }
    }

    fn encode(&self, buf: &mut BytesMut) {
        let bit_address = u32::from(self.offset) << 3;
        buf.put_slice(&ITEM_HEAD);
        buf.put_u8(ITEM_TS_BYTE);
        buf.put_u16(self.len);
        buf.put_u16(self.db);
        buf.put_u8(AREA_DB);
        buf.put_slice(&bit_address.to_be_bytes()[1..]);
    }

    fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < ITEM_LEN {
            return Err(ProtocolError::truncated("S7 item", raw.len(), ITEM_LEN));
        }
        if raw[..3] != ITEM_HEAD {
            return Err(ProtocolError::malformed(
                "S7 item",
                format!("unsupported variable specification {:02X?}", &raw[..3]),
            ));
        }
        if raw[3] != ITEM_TS_BYTE {
            return Err(ProtocolError::malformed(
                "S7 item",
                format!("unsupported transport size {:#04x}", raw[3]),
            ));
        }
        if raw[8] != AREA_DB {
            return Err(ProtocolError::malformed(
                "S7 item",
                format!("unsupported memory area {:#04x}", raw[8]),
            ));
        }

        let bit_address = u32::from_be_bytes([0, raw[9], raw[10], raw[11]]);
        if bit_address & 0x07 != 0 {
            return Err(ProtocolError::malformed(
                "S7 item",
                "bit-level addresses are not supported",
            ));
        }
        let offset = u16::try_from(bit_address >> 3)
            .map_err(|_| ProtocolError::malformed("S7 item", "byte offset out of range"))?;

        Ok(Self {
            db: u16::from_be_bytes([raw[6], raw[7]]),
            offset,
            len: u16::from_be_bytes([raw[4], raw[5]]),
        })
    }
}

impl fmt::Display for DbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DB{}.DBB{}[{}]", self.db, self.offset, self.len)
    }
}

/// Per-item return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReturnCode(pub u8);

impl ReturnCode {
    pub const SUCCESS: ReturnCode = ReturnCode(0xFF);
    pub const HARDWARE_FAULT: ReturnCode = ReturnCode(0x01);
    pub const ACCESS_DENIED: ReturnCode = ReturnCode(0x03);
    pub const ADDRESS_OUT_OF_RANGE: ReturnCode = ReturnCode(0x05);
    pub const TYPE_NOT_SUPPORTED: ReturnCode = ReturnCode(0x06);
    pub const TYPE_INCONSISTENT: ReturnCode = ReturnCode(0x07);
    pub const OBJECT_MISSING: ReturnCode = ReturnCode(0x0A);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match *self {
            Self::SUCCESS => "success",
            Self::HARDWARE_FAULT => "hardware fault",
            Self::ACCESS_DENIED => "access denied",
            Self::ADDRESS_OUT_OF_RANGE => "address out of range",
            Self::TYPE_NOT_SUPPORTED => "data type not supported",
            Self::TYPE_INCONSISTENT => "data type inconsistent",
            Self::OBJECT_MISSING => "object does not exist",
            _ => "unknown return code",
        };
        write!(f, "{text} ({:#04x})", self.0)
    }
}

/// Job issued by the station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    SetupCommunication {
        max_amq_calling: u16,
        max_amq_called: u16,
        pdu_length: u16,
    },
    ReadVar(DbAddress),
    WriteVar { address: DbAddress, data: Bytes },
}

/// Acknowledgement returned by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    SetupCommunication {
        max_amq_calling: u16,
        max_amq_called: u16,
        pdu_length: u16,
    },
    ReadVar(std::result::Result<Bytes, ReturnCode>),
    WriteVar(ReturnCode),
}

/// A complete S7 PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7Pdu {
    Job { pdu_ref: u16, request: Request },
    AckData { pdu_ref: u16, response: Response },
    /// Acknowledgement with a non-zero error class in the header.
    Rejected { pdu_ref: u16, class: u8, code: u8 },
}

impl S7Pdu {
    /// Setup-communication job requesting `pdu_length`.
    pub fn setup_communication(pdu_ref: u16, pdu_length: u16) -> Self {
        Self::Job {
            pdu_ref,
            request: Request::SetupCommunication {
                max_amq_calling: 1,
                max_amq_called: 1,
                pdu_length,
            },
        }
    }

    pub fn pdu_ref(&self) -> u16 {
        match self {
            Self::Job { pdu_ref, .. }
            | Self::AckData { pdu_ref, .. }
            | Self::Rejected { pdu_ref, .. } => *pdu_ref,
        }
    }

    /// Short name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Job { request, .. } => match request {
                Request::SetupCommunication { .. } => "setup-communication job",
                Request::ReadVar(_) => "read-var job",
                Request::WriteVar { .. } => "write-var job",
            },
            Self::AckData { response, .. } => match response {
                Response::SetupCommunication { .. } => "setup-communication ack",
                Response::ReadVar(_) => "read-var ack",
                Response::WriteVar(_) => "write-var ack",
            },
            Self::Rejected { .. } => "rejected ack",
        }
    }

    /// Serialize into the payload of a COTP data PDU.
    pub fn encode(&self) -> Bytes {
        let mut param = BytesMut::with_capacity(16);
        let mut data = BytesMut::new();

        let (rosctr, pdu_ref, error) = match self {
            Self::Job { pdu_ref, request } => {
                encode_request(request, &mut param, &mut data);
                (ROSCTR_JOB, *pdu_ref, None)
            }
            Self::AckData { pdu_ref, response } => {
                encode_response(response, &mut param, &mut data);
                (ROSCTR_ACK_DATA, *pdu_ref, Some((0, 0)))
            }
            Self::Rejected {
                pdu_ref,
                class,
                code,
            } => (ROSCTR_ACK_DATA, *pdu_ref, Some((*class, *code))),
        };

        let mut buf = BytesMut::with_capacity(ACK_HEADER_LEN + param.len() + data.len());
        buf.put_u8(PROTOCOL_ID);
        buf.put_u8(rosctr);
        buf.put_u16(0x0000);
        buf.put_u16(pdu_ref);
        buf.put_u16(param.len() as u16);
        buf.put_u16(data.len() as u16);
        if let Some((class, code)) = error {
            buf.put_u8(class);
            buf.put_u8(code);
        }
        buf.put_slice(&param);
        buf.put_slice(&data);
        buf.freeze()
    }

    /// Parse an S7 PDU.
    pub fn decode(bytes: Bytes) -> Result<Self> {
        if bytes.len() < JOB_HEADER_LEN {
            return Err(ProtocolError::truncated("S7 header", bytes.len(), JOB_HEADER_LEN));
        }
        if bytes[0] != PROTOCOL_ID {
            return Err(ProtocolError::malformed(
                "S7 header",
                format!("protocol id {:#04x}", bytes[0]),
            ));
        }

        let rosctr = bytes[1];
        let pdu_ref = u16::from_be_bytes([bytes[4], bytes[5]]);
        let param_len = usize::from(u16::from_be_bytes([bytes[6], bytes[7]]));
        let data_len = usize::from(u16::from_be_bytes([bytes[8], bytes[9]]));

        let header_len = match rosctr {
            ROSCTR_JOB => JOB_HEADER_LEN,
            ROSCTR_ACK | ROSCTR_ACK_DATA => ACK_HEADER_LEN,
            other => {
                return Err(ProtocolError::malformed(
                    "S7 header",
                    format!("unsupported ROSCTR {other:#04x}"),
                ));
            }
        };

        let total = header_len + param_len + data_len;
        if bytes.len() < total {
            return Err(ProtocolError::truncated("S7 PDU", bytes.len(), total));
        }

        if header_len == ACK_HEADER_LEN && (bytes[10] != 0 || bytes[11] != 0) {
            return Ok(Self::Rejected {
                pdu_ref,
                class: bytes[10],
                code: bytes[11],
            });
        }

        let param = &bytes[header_len..header_len + param_len];
        let data = bytes.slice(header_len + param_len..total);

        match rosctr {
            ROSCTR_JOB => Ok(Self::Job {
                pdu_ref,
                request: decode_request(param, &data)?,
            }),
            ROSCTR_ACK_DATA => Ok(Self::AckData {
                pdu_ref,
                response: decode_response(param, &data)?,
            }),
            _ => Err(ProtocolError::unexpected("S7 ack-data", "bare ack")),
        }
    }
}

fn encode_request(request: &Request, param: &mut BytesMut, data: &mut BytesMut) {
    match request {
        Request::SetupCommunication {
            max_amq_calling,
            max_amq_called,
            pdu_length,
        } => encode_setup(param, *max_amq_calling, *max_amq_called, *pdu_length),
        Request::ReadVar(address) => {
            param.put_u8(FN_READ_VAR);
            param.put_u8(1);
            address.encode(param);
        }
        Request::WriteVar {
            address,
            data: payload,
        } => {
            param.put_u8(FN_WRITE_VAR);
            param.put_u8(1);
            address.encode(param);
            data.put_u8(0x00);
            data.put_u8(DATA_TS_BYTE_WORD_DWORD);
            data.put_u16((payload.len() * 8) as u16);
            data.put_slice(payload);
        }
    }
}

fn encode_response(response: &Response, param: &mut BytesMut, data: &mut BytesMut) {
    match response {
        Response::SetupCommunication {
            max_amq_calling,
            max_amq_called,
            pdu_length,
        } => encode_setup(param, *max_amq_calling, *max_amq_called, *pdu_length),
        Response::ReadVar(result) => {
            param.put_u8(FN_READ_VAR);
            param.put_u8(1);
            match result {
                Ok(payload) => {
                    data.put_u8(ReturnCode::SUCCESS.0);
                    data.put_u8(DATA_TS_BYTE_WORD_DWORD);
                    data.put_u16((payload.len() * 8) as u16);
                    data.put_slice(payload);
                }
                Err(code) => {
                    data.put_u8(code.0);
                    data.put_u8(DATA_TS_NULL);
                    data.put_u16(0);
                }
            }
        }
        Response::WriteVar(code) => {
            param.put_u8(FN_WRITE_VAR);
            param.put_u8(1);
            data.put_u8(code.0);
        }
    }
}

fn encode_setup(param: &mut BytesMut, calling: u16, called: u16, pdu_length: u16) {
    param.put_u8(FN_SETUP_COMMUNICATION);
    param.put_u8(0x00);
    param.put_u16(calling);
    param.put_u16(called);
    param.put_u16(pdu_length);
}

fn decode_setup(param: &[u8]) -> Result<(u16, u16, u16)> {
    if param.len() < 8 {
        return Err(ProtocolError::truncated("setup-communication", param.len(), 8));
    }
    Ok((
        u16::from_be_bytes([param[2], param[3]]),
        u16::from_be_bytes([param[4], param[5]]),
        u16::from_be_bytes([param[6], param[7]]),
    ))
}

fn single_item_count(param: &[u8], what: &'static str) -> Result<()> {
    match param.get(1) {
        Some(1) => Ok(()),
        Some(n) => Err(ProtocolError::malformed(
            what,
            format!("{n} items, only single-item requests are supported"),
        )),
        None => Err(ProtocolError::truncated(what, param.len(), 2)),
    }
}

fn decode_request(param: &[u8], data: &Bytes) -> Result<Request> {
    match param.first() {
        Some(&FN_SETUP_COMMUNICATION) => {
            let (max_amq_calling, max_amq_called, pdu_length) = decode_setup(param)?;
            Ok(Request::SetupCommunication {
                max_amq_calling,
                max_amq_called,
                pdu_length,
            })
        }
        Some(&FN_READ_VAR) => {
            single_item_count(param, "read-var job")?;
            Ok(Request::ReadVar(DbAddress::decode(&param[2..])?))
        }
        Some(&FN_WRITE_VAR) => {
            single_item_count(param, "write-var job")?;
            let address = DbAddress::decode(&param[2..])?;
            let payload = decode_data_item(data, "write-var data")?;
            Ok(Request::WriteVar {
                address,
                data: payload,
            })
        }
        Some(other) => Err(ProtocolError::malformed(
            "S7 job",
            format!("unsupported function {other:#04x}"),
        )),
        None => Err(ProtocolError::truncated("S7 job parameters", 0, 1)),
    }
}

fn decode_response(param: &[u8], data: &Bytes) -> Result<Response> {
    match param.first() {
        Some(&FN_SETUP_COMMUNICATION) => {
            let (max_amq_calling, max_amq_called, pdu_length) = decode_setup(param)?;
            Ok(Response::SetupCommunication {
                max_amq_calling,
                max_amq_called,
                pdu_length,
            })
        }
        Some(&FN_READ_VAR) => {
            single_item_count(param, "read-var ack")?;
            let code = ReturnCode(
                *data
                    .first()
                    .ok_or_else(|| ProtocolError::truncated("read-var data", 0, 1))?,
            );
            if !code.is_success() {
                return Ok(Response::ReadVar(Err(code)));
            }
            Ok(Response::ReadVar(Ok(decode_data_item(data, "read-var data")?)))
        }
        Some(&FN_WRITE_VAR) => {
            single_item_count(param, "write-var ack")?;
            let code = data
                .first()
                .ok_or_else(|| ProtocolError::truncated("write-var data", 0, 1))?;
            Ok(Response::WriteVar(ReturnCode(*code)))
        }
        Some(other) => Err(ProtocolError::malformed(
            "S7 ack-data",
            format!("unsupported function {other:#04x}"),
        )),
        None => Err(ProtocolError::truncated("S7 ack-data parameters", 0, 1)),
    }
}

/// Decode `[return code | reserved, transport size, length, payload]`.
fn decode_data_item(data: &Bytes, what: &'static str) -> Result<Bytes> {
    if data.len() < 4 {
        return Err(ProtocolError::truncated(what, data.len(), 4));
    }
    let length = usize::from(u16::from_be_bytes([data[2], data[3]]));
    let byte_len = match data[1] {
        DATA_TS_BIT | DATA_TS_BYTE_WORD_DWORD | DATA_TS_INTEGER => length.div_ceil(8),
        DATA_TS_REAL | DATA_TS_OCTET_STRING => length,
        other => {
            return Err(ProtocolError::malformed(
                what,
                format!("unsupported transport size {other:#04x}"),
            ));
        }
    };
    if data.len() < 4 + byte_len {
        return Err(ProtocolError::truncated(what, data.len(), 4 + byte_len));
    }
    Ok(data.slice(4..4 + byte_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_var_job_wire_format() {
        let job = S7Pdu::Job {
            pdu_ref: 1,
            request: Request::ReadVar(DbAddress::new(4, 0, 2)),
        };

        assert_eq!(
            &job.encode()[..],
            &[
                0x32, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x0E, 0x00, 0x00, // header
                0x04, 0x01, // read var, one item
                0x12, 0x0A, 0x10, 0x02, 0x00, 0x02, 0x00, 0x04, 0x84, 0x00, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn test_write_var_job_wire_format() {
        let job = S7Pdu::Job {
            pdu_ref: 2,
            request: Request::WriteVar {
                address: DbAddress::new(4, 0, 4),
                data: Bytes::from_static(&[0x00, 0x02, 0x00, 0x04]),
            },
        };

        assert_eq!(
            &job.encode()[..],
            &[
                0x32, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x0E, 0x00, 0x08, // header
                0x05, 0x01, // write var, one item
                0x12, 0x0A, 0x10, 0x02, 0x00, 0x04, 0x00, 0x04, 0x84, 0x00, 0x00, 0x00,
                0x00, 0x04, 0x00, 0x20, 0x00, 0x02, 0x00, 0x04, // data
            ]
        );
    }

    #[test]
    fn test_item_address_is_in_bits() {
        let job = S7Pdu::Job {
            pdu_ref: 3,
            request: Request::ReadVar(DbAddress::new(12, 2, 2)),
        };
        let bytes = job.encode();
        assert_eq!(&bytes[bytes.len() - 3..], &[0x00, 0x00, 0x10]);
        assert_eq!(S7Pdu::decode(bytes).unwrap(), job);
    }

    #[test]
    fn test_decode_read_var_ack() {
        let raw = Bytes::from_static(&[
            0x32, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0x06, 0x00, 0x00, // header
            0x04, 0x01, // read var, one item
            0xFF, 0x04, 0x00, 0x10, 0x00, 0x01, // success, 16 bits
        ]);

        assert_eq!(
            S7Pdu::decode(raw).unwrap(),
            S7Pdu::AckData {
                pdu_ref: 1,
                response: Response::ReadVar(Ok(Bytes::from_static(&[0x00, 0x01]))),
            }
        );
    }

    #[test]
    fn test_decode_read_var_ack_item_error() {
        let ack = S7Pdu::AckData {
            pdu_ref: 9,
            response: Response::ReadVar(Err(ReturnCode::OBJECT_MISSING)),
        };
        assert_eq!(S7Pdu::decode(ack.encode()).unwrap(), ack);
    }

    #[test]
    fn test_decode_write_var_ack() {
        let raw = Bytes::from_static(&[
            0x32, 0x03, 0x00, 0x00, 0x00, 0x02, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, //
            0x05, 0x01, 0xFF,
        ]);
        assert_eq!(
            S7Pdu::decode(raw).unwrap(),
            S7Pdu::AckData {
                pdu_ref: 2,
                response: Response::WriteVar(ReturnCode::SUCCESS),
            }
        );
    }

    #[test]
    fn test_decode_setup_communication_ack() {
        let raw = Bytes::from_static(&[
            0x32, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, //
            0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0xF0,
        ]);
        assert_eq!(
            S7Pdu::decode(raw).unwrap(),
            S7Pdu::AckData {
                pdu_ref: 0,
                response: Response::SetupCommunication {
                    max_amq_calling: 1,
                    max_amq_called: 1,
                    pdu_length: 240,
                },
            }
        );
    }

    #[test]
    fn test_decode_rejected_header() {
        let raw = Bytes::from_static(&[
            0x32, 0x03, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x85, 0x00,
        ]);
        assert_eq!(
            S7Pdu::decode(raw).unwrap(),
            S7Pdu::Rejected {
                pdu_ref: 5,
                class: 0x85,
                code: 0x00,
            }
        );
    }

    #[test]
    fn test_decode_truncated_body() {
        let raw = Bytes::from_static(&[
            0x32, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x0E, 0x00, 0x00, 0x04, 0x01,
        ]);
        assert!(matches!(
            S7Pdu::decode(raw),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_multi_item_read() {
        let mut raw = BytesMut::new();
        raw.put_slice(&[0x32, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x1A, 0x00, 0x00]);
        raw.put_slice(&[FN_READ_VAR, 2]);
        DbAddress::new(4, 0, 2).encode(&mut raw);
        DbAddress::new(4, 2, 2).encode(&mut raw);

        assert!(matches!(
            S7Pdu::decode(raw.freeze()),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_protocol_id() {
        let raw = Bytes::from_static(&[0x33, 0x01, 0, 0, 0, 1, 0, 0, 0, 0]);
        assert!(matches!(
            S7Pdu::decode(raw),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_return_code_display() {
        assert_eq!(ReturnCode::SUCCESS.to_string(), "success (0xff)");
        assert_eq!(
            ReturnCode::ADDRESS_OUT_OF_RANGE.to_string(),
            "address out of range (0x05)"
        );
    }

    #[test]
    fn test_overheads() {
        assert_eq!(READ_RESPONSE_OVERHEAD, 18);
        assert_eq!(WRITE_REQUEST_OVERHEAD, 28);
    }
}

//! Property-based tests for S7 PDU encoding.
//!
//! Every job and acknowledgement the station exchanges must survive the full
//! TPKT/COTP/S7 stack unchanged, and arbitrary input must never panic the
//! decoders.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};
use visionlink_protocol::{
    CotpPdu, DbAddress, Request, Response, ReturnCode, S7Pdu, TpktCodec, cotp,
};

/// Strategy for byte ranges inside a data block.
fn db_address() -> impl Strategy<Value = DbAddress> {
    (1u16..=999, 0u16..=8191, 1u16..=64).prop_map(|(db, offset, len)| DbAddress::new(db, offset, len))
}

/// Strategy for register payloads.
fn payload() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 1..=64).prop_map(Bytes::from)
}

fn request() -> impl Strategy<Value = Request> {
    prop_oneof![
        (1u16..=8, 1u16..=8, 240u16..=960).prop_map(|(calling, called, pdu_length)| {
            Request::SetupCommunication {
                max_amq_calling: calling,
                max_amq_called: called,
                pdu_length,
            }
        }),
        db_address().prop_map(Request::ReadVar),
        (db_address(), payload()).prop_map(|(address, data)| Request::WriteVar { address, data }),
    ]
}

fn response() -> impl Strategy<Value = Response> {
    prop_oneof![
        payload().prop_map(|data| Response::ReadVar(Ok(data))),
        prop_oneof![
            Just(ReturnCode::OBJECT_MISSING),
            Just(ReturnCode::ADDRESS_OUT_OF_RANGE),
            Just(ReturnCode::ACCESS_DENIED),
        ]
        .prop_map(|code| Response::ReadVar(Err(code))),
        any::<u8>().prop_map(|code| Response::WriteVar(ReturnCode(code))),
    ]
}

fn through_stack(pdu: &S7Pdu) -> S7Pdu {
    let mut codec = TpktCodec::new();
    let mut wire = BytesMut::new();
    codec.encode(cotp::data(pdu), &mut wire).unwrap();
    let frame = codec.decode(&mut wire).unwrap().unwrap();
    assert!(wire.is_empty());
    cotp::parse_data(frame).unwrap()
}

proptest! {
    #[test]
    fn prop_jobs_survive_stack(pdu_ref in any::<u16>(), request in request()) {
        let job = S7Pdu::Job { pdu_ref, request };
        prop_assert_eq!(through_stack(&job), job);
    }

    #[test]
    fn prop_acks_survive_stack(pdu_ref in any::<u16>(), response in response()) {
        let ack = S7Pdu::AckData { pdu_ref, response };
        prop_assert_eq!(through_stack(&ack), ack);
    }

    #[test]
    fn prop_write_length_matches_payload(address in db_address(), data in payload()) {
        let len = data.len();
        let job = S7Pdu::Job { pdu_ref: 1, request: Request::WriteVar { address, data } };
        // 10 header + 14 params + 4 data header
        prop_assert_eq!(job.encode().len(), 28 + len);
    }

    #[test]
    fn prop_s7_decode_never_panics(raw in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = S7Pdu::decode(Bytes::from(raw));
    }

    #[test]
    fn prop_cotp_decode_never_panics(raw in prop::collection::vec(any::<u8>(), 0..40)) {
        let _ = CotpPdu::decode(Bytes::from(raw));
    }

    #[test]
    fn prop_tpkt_decode_never_panics(raw in prop::collection::vec(any::<u8>(), 0..64)) {
        let mut codec = TpktCodec::new();
        let mut buf = BytesMut::from(&raw[..]);
        let _ = codec.decode(&mut buf);
    }
}

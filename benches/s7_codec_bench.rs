//! Benchmarks for the TPKT/COTP/S7 encode and decode path.
//!
//! The poll loop issues one read job every 50 ms; these numbers show how
//! little of that budget the codec consumes.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench s7_codec_bench
//! ```

use bytes::{Bytes, BytesMut};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};
use visionlink_protocol::{DbAddress, Request, Response, S7Pdu, TpktCodec, cotp};

fn read_job() -> S7Pdu {
    S7Pdu::Job {
        pdu_ref: 1,
        request: Request::ReadVar(DbAddress::new(4, 0, 2)),
    }
}

fn write_job() -> S7Pdu {
    S7Pdu::Job {
        pdu_ref: 2,
        request: Request::WriteVar {
            address: DbAddress::new(4, 0, 4),
            data: Bytes::from_static(&[0x00, 0x02, 0x00, 0x04]),
        },
    }
}

fn read_ack_frame() -> BytesMut {
    let ack = S7Pdu::AckData {
        pdu_ref: 1,
        response: Response::ReadVar(Ok(Bytes::from_static(&[0x00, 0x01]))),
    };
    let mut wire = BytesMut::new();
    TpktCodec::new().encode(cotp::data(&ack), &mut wire).unwrap();
    wire
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    for (name, pdu) in [("read_job", read_job()), ("write_job", write_job())] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut codec = TpktCodec::new();
                let mut buffer = BytesMut::new();
                codec.encode(cotp::data(black_box(&pdu)), &mut buffer).unwrap();
                black_box(buffer);
            });
        });
    }

    group.finish();
}

fn bench_decode_read_ack(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    let frame = read_ack_frame();
    group.bench_function("read_ack", |b| {
        b.iter(|| {
            let mut codec = TpktCodec::new();
            let mut buffer = frame.clone();
            let payload = codec.decode(&mut buffer).unwrap().unwrap();
            black_box(cotp::parse_data(payload).unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode_read_ack);
criterion_main!(benches);

//! Decoder and registry benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use indi_core::{dispatch, IndiElement, Registry, StreamDecoder};

const EXPOSURE_UPDATE: &[u8] = b"<setNumberVector device=\"CCD Simulator\" name=\"CCD_EXPOSURE\" state=\"Busy\" timeout=\"60\" timestamp=\"2024-03-01T21:04:11\">\n    <oneNumber name=\"CCD_EXPOSURE_VALUE\">\n0.5\n    </oneNumber>\n</setNumberVector>\n";

const EXPOSURE_DEFINITION: &[u8] = b"<defNumberVector device=\"CCD Simulator\" name=\"CCD_EXPOSURE\" label=\"Expose\" group=\"Main Control\" state=\"Idle\" perm=\"rw\" timeout=\"60\">\n    <defNumber name=\"CCD_EXPOSURE_VALUE\" label=\"Duration (s)\" format=\"%5.2f\" min=\"0.01\" max=\"3600\" step=\"1\">\n1\n    </defNumber>\n</defNumberVector>\n";

fn decode_benchmark(c: &mut Criterion) {
    c.bench_function("decode_set_number_vector", |b| {
        let mut decoder = StreamDecoder::new();
        b.iter(|| black_box(decoder.feed(black_box(EXPOSURE_UPDATE))))
    });

    c.bench_function("decode_set_number_vector_bytewise", |b| {
        let mut decoder = StreamDecoder::new();
        b.iter(|| {
            let mut count = 0;
            for byte in EXPOSURE_UPDATE.chunks(1) {
                count += decoder.feed(black_box(byte)).len();
            }
            black_box(count)
        })
    });
}

fn dispatch_benchmark(c: &mut Criterion) {
    let mut decoder = StreamDecoder::new();
    let definition = decoder.feed(EXPOSURE_DEFINITION).remove(0);
    let update = decoder.feed(EXPOSURE_UPDATE).remove(0);

    c.bench_function("dispatch_update", |b| {
        let mut registry = Registry::new();
        let mut events = Vec::new();
        dispatch(&mut registry, &definition, &mut events).unwrap();
        b.iter(|| {
            events.clear();
            dispatch(&mut registry, black_box(&update), &mut events).unwrap();
        })
    });
}

fn encode_benchmark(c: &mut Criterion) {
    c.bench_function("encode_new_number_vector", |b| {
        b.iter(|| {
            black_box(
                IndiElement::new_number_vector(
                    "CCD Simulator",
                    "CCD_EXPOSURE",
                    [("CCD_EXPOSURE_VALUE", black_box(2.5))],
                )
                .encode_line(),
            )
        })
    });
}

criterion_group!(benches, decode_benchmark, dispatch_benchmark, encode_benchmark);
criterion_main!(benches);

//! Performance benchmarks for the CallBridge Gateway audio path
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use base64::prelude::*;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;
use tokio::time::Instant;

use callbridge_gateway::core::audio::{
    FRAME_BYTES, FrameChunker, FrameScheduler, decode, decode_base64, encode, resample,
};
use callbridge_gateway::handlers::telephony::messages::{
    TelephonyIncomingMessage, TelephonyOutgoingMessage,
};

/// One second of speech-like PCM at the given rate
fn speech(sample_rate: usize) -> Vec<i16> {
    (0..sample_rate)
        .map(|i| ((i as f32 * 0.07).sin() * 8000.0) as i16)
        .collect()
}

/// Benchmark mu-law decode and encode
fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    group.measurement_time(Duration::from_secs(5));

    let frame = [0x55u8; FRAME_BYTES];
    group.throughput(Throughput::Bytes(FRAME_BYTES as u64));
    group.bench_function("decode_frame", |b| {
        b.iter(|| decode(black_box(&frame)));
    });

    let second = speech(8000);
    group.throughput(Throughput::Elements(second.len() as u64));
    group.bench_function("encode_one_second", |b| {
        b.iter(|| encode(black_box(&second)));
    });

    let chunks: Vec<Vec<i16>> = second.chunks(333).map(<[i16]>::to_vec).collect();
    group.bench_function("chunker_uneven_input", |b| {
        b.iter(|| {
            let mut chunker = FrameChunker::new();
            let mut frames = 0;
            for pcm in &chunks {
                frames += chunker.push(black_box(pcm)).len();
            }
            frames + usize::from(chunker.flush().is_some())
        });
    });

    group.finish();
}

/// Benchmark rate conversion between telephony and backend rates
fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");
    group.measurement_time(Duration::from_secs(5));

    for (from, to) in [(8000u32, 24000u32), (24000, 8000), (16000, 8000), (22050, 8000)] {
        let input = speech(from as usize);
        group.throughput(Throughput::Elements(input.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("one_second", format!("{from}_to_{to}")),
            &input,
            |b, pcm| {
                b.iter(|| resample(black_box(pcm), from, to));
            },
        );
    }

    group.finish();
}

/// Benchmark the inbound frame gate at nominal and flooded rates
fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");
    group.measurement_time(Duration::from_secs(5));

    for (name, spacing_us) in [("nominal", 20_000u64), ("flood", 1_000)] {
        group.throughput(Throughput::Elements(1000));
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut scheduler = FrameScheduler::new("bench", 50, 1.2);
                let start = Instant::now();
                for i in 0..1000u64 {
                    black_box(scheduler.offer(start + Duration::from_micros(i * spacing_us)));
                }
                scheduler.stop()
            });
        });
    }

    group.finish();
}

/// Benchmark carrier message parsing and serialization
fn bench_telephony_messages(c: &mut Criterion) {
    let mut group = c.benchmark_group("telephony_messages");
    group.measurement_time(Duration::from_secs(5));

    let payload = BASE64_STANDARD.encode([0x7Fu8; FRAME_BYTES]);
    let media = format!(r#"{{"event":"media","payload":"{payload}"}}"#);
    let start = r#"{"event":"start","call_id":"CA-1","direction":"inbound","metadata":{"business_id":"acme","from":"+972501234567","to":"+97231234567","campaign":"spring"}}"#;

    group.throughput(Throughput::Bytes(media.len() as u64));
    group.bench_function("parse_media", |b| {
        b.iter(|| {
            let _: Result<TelephonyIncomingMessage, _> = serde_json::from_str(black_box(&media));
        });
    });

    group.bench_function("parse_media_and_decode", |b| {
        b.iter(|| {
            if let Ok(TelephonyIncomingMessage::Media { payload }) =
                serde_json::from_str::<TelephonyIncomingMessage>(black_box(&media))
            {
                let wire = decode_base64(&payload).unwrap_or_default();
                black_box(decode(&wire).ok());
            }
        });
    });

    group.throughput(Throughput::Bytes(start.len() as u64));
    group.bench_function("parse_start", |b| {
        b.iter(|| {
            let _: Result<TelephonyIncomingMessage, _> = serde_json::from_str(black_box(start));
        });
    });

    let outgoing = TelephonyOutgoingMessage::Media {
        call_id: "CA-1".to_string(),
        payload,
    };
    group.bench_function("serialize_media", |b| {
        b.iter(|| serde_json::to_string(black_box(&outgoing)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_codec,
    bench_resample,
    bench_scheduler,
    bench_telephony_messages,
);
criterion_main!(benches);

//! Performance benchmarks for the worker hot path.

#[path = "../tests/common/mod.rs"]
mod common;

use common::{commit_frame, Created, ALICE};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use skyalert::notify::markdown_to_richtext;
use skyalert::{Frame, OpsByType, WatchSnapshot};
use skyalert::{ReplySetting, Watch};

fn frame_with_posts(count: usize) -> Vec<u8> {
    let rkeys: Vec<String> = (0..count).map(|i| format!("3k{:06}", i)).collect();
    let records: Vec<Created<'_>> = rkeys
        .iter()
        .map(|rkey| Created::Post {
            rkey,
            text: "a fairly ordinary post about the weather and a link https://example.com/x",
        })
        .collect();
    commit_frame(20, ALICE, &records)
}

/// Benchmark frame decoding with varying ops per commit
fn bench_commit_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_decode");

    for ops in [1, 10, 50, 200] {
        let frame = frame_with_posts(ops);
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::new("ops", ops), &frame, |b, frame| {
            b.iter(|| {
                let Frame::Commit(commit) = Frame::decode(black_box(frame)).unwrap() else {
                    unreachable!()
                };
                black_box(OpsByType::from_commit(&commit).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark the header peek intake does for every frame
fn bench_peek_header(c: &mut Criterion) {
    let frame = frame_with_posts(10);
    c.bench_function("peek_header", |b| {
        b.iter(|| black_box(Frame::peek_header(black_box(&frame)).unwrap()));
    });
}

/// Benchmark watch lookup against snapshot size
fn bench_watch_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("watch_lookup");

    for subjects in [100, 10_000, 100_000] {
        let watches: Vec<Watch> = (0..subjects)
            .map(|i| Watch {
                subject_did: format!("did:plc:subject{}", i),
                subject_handle: String::new(),
                receiver_did: format!("did:plc:receiver{}", i % 97),
                receiver_handle: String::new(),
                reposts_allowed: i % 2 == 0,
            })
            .collect();
        let settings: Vec<ReplySetting> = Vec::new();
        let snapshot = WatchSnapshot::new(watches, settings);

        group.bench_with_input(
            BenchmarkId::new("subjects", subjects),
            &snapshot,
            |b, snapshot| {
                b.iter(|| {
                    black_box(snapshot.watches_for(black_box("did:plc:subject42")).count());
                    black_box(snapshot.watches_for(black_box("did:plc:nobody")).count());
                });
            },
        );
    }

    group.finish();
}

fn bench_richtext(c: &mut Criterion) {
    let message = "[alice](https://bsky.app/profile/did:plc:alice) said - \
                   [click to view](https://bsky.app/profile/did:plc:alice/post/3k): \
                   \"see https://example.com/a and https://example.org/b\" [has images]";
    c.bench_function("markdown_to_richtext", |b| {
        b.iter(|| black_box(markdown_to_richtext(black_box(message))));
    });
}

criterion_group!(
    benches,
    bench_commit_decode,
    bench_peek_header,
    bench_watch_lookup,
    bench_richtext,
);
criterion_main!(benches);

//! Benchmark tests for lumen-core operations
//!
//! Run with: cargo bench -p lumen-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

use lumen_core::bandwidth::{Clock, SlidingPercentile, DEFAULT_MAX_WEIGHT};
use lumen_core::builder::{select_variants, DefaultDecoderCapabilities};
use lumen_core::config::DecoderProfile;
use lumen_core::manifest::{HlsParser, ManifestParser, Variant};
use lumen_core::{BandwidthEstimate, BandwidthEstimator, Resolution, TransferListener};

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct StepClock(AtomicU64);

impl Clock for StepClock {
    fn elapsed_ms(&self) -> u64 {
        // Every reading advances 50 ms so each transfer produces a sample
        self.0.fetch_add(50, Ordering::Relaxed)
    }
}

fn create_test_variants(count: usize) -> Vec<Variant> {
    let tiers = [
        (Resolution::new(426, 240), "avc1.42c015"),
        (Resolution::new(640, 360), "avc1.4d401e"),
        (Resolution::new(1280, 720), "avc1.64001f"),
        (Resolution::new(1920, 1080), "avc1.640028"),
        (Resolution::new(3840, 2160), "hvc1.2.4.L153"),
    ];
    (0..count)
        .map(|i| {
            let (resolution, codec) = tiers[i % tiers.len()];
            Variant {
                uri: Url::parse(&format!("https://cdn.example.com/v{}/index.m3u8", i)).unwrap(),
                bandwidth: 400_000 + i as u64 * 350_000,
                codecs: Some(format!("{},mp4a.40.2", codec)),
                resolution: Some(resolution),
                frame_rate: Some(30.0),
            }
        })
        .collect()
}

fn create_master_playlist(variants: usize) -> String {
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:4\n");
    playlist.push_str(
        "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English\",\
         LANGUAGE=\"en\",URI=\"audio/en.m3u8\"\n",
    );
    for i in 0..variants {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION=1280x720,\
             CODECS=\"avc1.64001f,mp4a.40.2\",AUDIO=\"aud\"\nv{}/index.m3u8\n",
            400_000 + i * 350_000,
            i
        ));
    }
    playlist
}

fn create_media_playlist(segments: usize) -> String {
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n");
    for i in 0..segments {
        playlist.push_str(&format!("#EXTINF:6.000,\nseg{}.ts\n", i));
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

// ============================================================================
// Bandwidth Benchmarks
// ============================================================================

fn bench_sliding_percentile(c: &mut Criterion) {
    let mut group = c.benchmark_group("sliding_percentile");

    for samples in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("add_and_median", samples),
            &samples,
            |b, &samples| {
                b.iter(|| {
                    let mut window = SlidingPercentile::new(DEFAULT_MAX_WEIGHT);
                    for i in 0..samples {
                        window.add_sample(((i % 40) + 10) as u32, (i * 1000) as f64);
                    }
                    black_box(window.percentile(0.5))
                });
            },
        );
    }

    group.finish();
}

fn bench_estimator_transfers(c: &mut Criterion) {
    c.bench_function("estimator_transfer_cycle", |b| {
        let estimator =
            BandwidthEstimator::with_clock(Arc::new(StepClock::default()), DEFAULT_MAX_WEIGHT);
        b.iter(|| {
            estimator.on_transfer_start();
            estimator.on_bytes_transferred(black_box(188 * 1024));
            estimator.on_transfer_end();
            black_box(estimator.estimate())
        });
    });
}

// ============================================================================
// Build Benchmarks
// ============================================================================

fn bench_variant_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("variant_selection");
    let capabilities = DefaultDecoderCapabilities::new(DecoderProfile::default());

    for count in [4, 16, 64] {
        let variants = create_test_variants(count);
        group.bench_with_input(BenchmarkId::new("with_estimate", count), &variants, |b, variants| {
            b.iter(|| {
                select_variants(
                    black_box(variants),
                    &capabilities,
                    BandwidthEstimate::Bitrate(3_000_000),
                )
            });
        });
    }

    group.finish();
}

fn bench_manifest_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hls_parsing");
    let parser = HlsParser::new();
    let base = Url::parse("https://cdn.example.com/show/master.m3u8").unwrap();

    for variants in [4, 16] {
        let playlist = create_master_playlist(variants);
        group.bench_with_input(BenchmarkId::new("master", variants), &playlist, |b, playlist| {
            b.iter(|| parser.parse(&base, black_box(playlist.as_bytes())))
        });
    }

    for segments in [100, 1000] {
        let playlist = create_media_playlist(segments);
        group.bench_with_input(BenchmarkId::new("media", segments), &playlist, |b, playlist| {
            b.iter(|| parser.parse(&base, black_box(playlist.as_bytes())))
        });
    }

    group.finish();
}

criterion_group!(
    bandwidth_benches,
    bench_sliding_percentile,
    bench_estimator_transfers,
);

criterion_group!(
    build_benches,
    bench_variant_selection,
    bench_manifest_parsing,
);

criterion_main!(bandwidth_benches, build_benches);

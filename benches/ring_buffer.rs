use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use syncplay::audio::ring_buffer::{interleave, sample_ring};
use syncplay::audio::AudioFormat;

const BLOCK_FRAMES: usize = 1024;

fn planes(channels: usize) -> Vec<Vec<f32>> {
    (0..channels)
        .map(|c| (0..BLOCK_FRAMES).map(|i| ((i + c) as f32 * 0.001).sin()).collect())
        .collect()
}

fn bench_interleave(c: &mut Criterion) {
    let mut group = c.benchmark_group("interleave");
    for channels in [1usize, 2, 6] {
        let planes = planes(channels);
        let refs: Vec<&[f32]> = planes.iter().map(Vec::as_slice).collect();
        let mut output = vec![0.0f32; BLOCK_FRAMES * channels];

        group.throughput(Throughput::Elements((BLOCK_FRAMES * channels) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(channels), &channels, |b, _| {
            b.iter(|| interleave(black_box(&refs), 0, BLOCK_FRAMES * channels, &mut output, 0))
        });
    }
    group.finish();
}

fn bench_write_render(c: &mut Criterion) {
    let format = AudioFormat { sample_rate: 48_000, channels: 2 };
    let planes = planes(format.channels);
    let refs: Vec<&[f32]> = planes.iter().map(Vec::as_slice).collect();
    // Odd capacity so writes keep crossing the wrap point
    let (mut producer, mut consumer) = sample_ring(format, 3 * BLOCK_FRAMES + 7);
    let mut out = vec![0.0f32; BLOCK_FRAMES * format.channels];

    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Elements((BLOCK_FRAMES * format.channels) as u64));
    group.bench_function("write_then_render_stereo_block", |b| {
        b.iter(|| {
            producer.write_interleaved(black_box(&refs), BLOCK_FRAMES);
            consumer.render(&mut out)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_interleave, bench_write_render);
criterion_main!(benches);

//! Benchmarks for index resolution, cropping and stitching.
//!
//! Run with: cargo bench --package patch-grid --bench stitch_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array4;
use patch_grid::{
    GridAlignment, GridIndexManager, GridSize, OverlapMode, PaddingMode, PatchCropper,
    StitchConfig, StitchEngine, TilingMode,
};
use split_common::DataShape;
use test_utils::{numbered_patch_batch, to_tchw, two_stain_volume};

fn manager(size: usize, grid: usize, patch: usize) -> GridIndexManager {
    GridIndexManager::new(
        DataShape::new(4, size, size, 2),
        GridSize::square(grid),
        patch,
        GridAlignment::Center,
        TilingMode::ShiftBoundary,
    )
    .unwrap()
}

// =============================================================================
// INDEX RESOLUTION BENCHMARKS
// =============================================================================

fn bench_hwt_from_idx(c: &mut Criterion) {
    let mut group = c.benchmark_group("hwt_from_idx");
    let manager = manager(1024, 32, 64);
    group.throughput(Throughput::Elements(manager.grid_count() as u64));

    group.bench_function("all_indices", |b| {
        b.iter(|| {
            for idx in 0..manager.grid_count() {
                black_box(manager.hwt_from_idx(black_box(idx), None).unwrap());
            }
        });
    });

    group.bench_function("round_trip", |b| {
        b.iter(|| {
            for idx in 0..manager.grid_count() {
                let loc = manager.hwt_from_idx(idx, None).unwrap();
                black_box(manager.idx_from_hw(loc.row, loc.col, loc.t, None).unwrap());
            }
        });
    });

    group.finish();
}

// =============================================================================
// CROPPING BENCHMARKS
// =============================================================================

fn bench_crop(c: &mut Criterion) {
    let mut group = c.benchmark_group("crop");
    let volume = to_tchw(two_stain_volume(4, 512, 512, 3).view());

    let paddings = [
        (PaddingMode::Constant(0.0), "constant"),
        (PaddingMode::Reflect, "reflect"),
        (PaddingMode::Edge, "edge"),
    ];

    for (padding, name) in paddings {
        let manager = GridIndexManager::new(
            DataShape::new(4, 512, 512, 2),
            GridSize::square(32),
            64,
            GridAlignment::Center,
            TilingMode::PadBoundary,
        )
        .unwrap();
        let mut cropper = PatchCropper::new(64, padding);
        group.throughput(Throughput::Elements(manager.grid_count() as u64));
        group.bench_with_input(BenchmarkId::new("pad_boundary", name), &manager, |b, manager| {
            b.iter(|| {
                for idx in 0..manager.grid_count() {
                    black_box(cropper.crop_index(volume.view(), manager, idx).unwrap());
                }
            });
        });
    }

    group.finish();
}

// =============================================================================
// STITCHING BENCHMARKS
// =============================================================================

fn bench_stitch(c: &mut Criterion) {
    let mut group = c.benchmark_group("stitch");

    for (grid, patch) in [(64, 64), (32, 64), (16, 64)] {
        let manager = manager(512, grid, patch);
        let batch: Array4<f32> = numbered_patch_batch(manager.grid_count(), 2, patch, 0.0);
        group.throughput(Throughput::Elements(manager.grid_count() as u64));

        for overlap in [OverlapMode::OwnedCell, OverlapMode::Average] {
            let engine = StitchEngine::new(StitchConfig {
                overlap,
                ..StitchConfig::default()
            });
            let id = BenchmarkId::new(format!("{:?}", overlap), format!("g{}_p{}", grid, patch));
            group.bench_with_input(id, &batch, |b, batch| {
                b.iter(|| black_box(engine.stitch_batch(batch.view(), &manager).unwrap()));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_hwt_from_idx, bench_crop, bench_stitch);
criterion_main!(benches);

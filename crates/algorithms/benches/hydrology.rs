//! Benchmarks for the catchment pipeline stages

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cuenca_algorithms::hydrology::{
    correct_terrain, delineate, extract_streams, resolve_pour_points, route, Pipeline,
    PipelineParams, TerrainCorrectionParams,
};
use cuenca_core::{CancellationToken, GeoTransform, Raster};

/// Bowl with a pit in the centre, tilted so it spills over the south edge
fn create_basin_dem(size: usize) -> Raster<f64> {
    let mut dem = Raster::new(size, size);
    dem.set_transform(GeoTransform::new(0.0, size as f64 * 10.0, 10.0, -10.0));
    let center = size as f64 / 2.0;
    for row in 0..size {
        for col in 0..size {
            let dx = col as f64 - center;
            let dy = row as f64 - center;
            let dist = (dx * dx + dy * dy).sqrt();
            let tilt = (size - row) as f64 * 0.2;
            // Small noise to avoid exact ties
            let noise = ((row * 7 + col * 13) % 17) as f64 * 0.01;
            dem.set(row, col, dist + tilt + noise).unwrap();
        }
    }
    dem
}

fn bench_correct_terrain(c: &mut Criterion) {
    let mut group = c.benchmark_group("hydrology/correct_terrain");
    let params = TerrainCorrectionParams::default();
    let cancel = CancellationToken::new();
    for size in [128, 256, 512, 1024] {
        let dem = create_basin_dem(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| correct_terrain(black_box(&dem), &params, &cancel).unwrap())
        });
    }
    group.finish();
}

fn bench_route(c: &mut Criterion) {
    let mut group = c.benchmark_group("hydrology/route");
    let cancel = CancellationToken::new();
    for size in [256, 512, 1024, 2048] {
        let dem = create_basin_dem(size);
        let corrected = correct_terrain(&dem, &TerrainCorrectionParams::default(), &cancel).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| route(black_box(&corrected), &cancel).unwrap())
        });
    }
    group.finish();
}

fn bench_delineate(c: &mut Criterion) {
    let mut group = c.benchmark_group("hydrology/delineate");
    let cancel = CancellationToken::new();
    for size in [256, 512, 1024] {
        let dem = create_basin_dem(size);
        let corrected = correct_terrain(&dem, &TerrainCorrectionParams::default(), &cancel).unwrap();
        let routing = route(&corrected, &cancel).unwrap();
        let network = extract_streams(&routing.accumulation, &routing.direction, 200).unwrap();
        let points = resolve_pour_points(&network);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| delineate(black_box(&points), &routing.direction, &cancel).unwrap())
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("hydrology/pipeline");
    group.sample_size(10);
    for size in [256, 512, 1024] {
        let dem = create_basin_dem(size);
        let pipeline = Pipeline::new(PipelineParams {
            threshold: 200,
            ..Default::default()
        });
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| pipeline.run(black_box(&dem)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_correct_terrain,
    bench_route,
    bench_delineate,
    bench_pipeline
);
criterion_main!(benches);

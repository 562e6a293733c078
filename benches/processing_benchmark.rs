use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use geo::polygon;
use ndarray::Array2;
use precip_zonal::models::{AdminPolygon, BoundarySet, GridGeometry, GriddedField, TimeCube};
use precip_zonal::processors::{SpatialResampler, TemporalAligner, WeightCache, ZonalAggregator};
use std::sync::Arc;

// Square regions tiling a 0.25 degree grid over lon 14..24, lat 8..18
fn create_test_boundaries(per_side: usize) -> BoundarySet {
    let size = 10.0 / per_side as f64;
    let mut polygons = Vec::with_capacity(per_side * per_side);
    for i in 0..per_side {
        for j in 0..per_side {
            let x0 = 14.0 + i as f64 * size;
            let y0 = 8.0 + j as f64 * size;
            let (x1, y1) = (x0 + size, y0 + size);
            polygons.push(AdminPolygon::from_polygon(
                format!("TD{:02}{:02}", i, j),
                2,
                polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0)],
            ));
        }
    }
    BoundarySet::new(polygons).unwrap()
}

fn create_test_grid() -> Arc<GridGeometry> {
    Arc::new(GridGeometry::new("EPSG:4326", 14.0, 18.0, 0.25, 0.25, 40, 40).unwrap())
}

// Three-hourly fields with a smooth spatial gradient
fn create_test_cube(days: i64) -> TimeCube {
    let grid = create_test_grid();
    let start = NaiveDate::from_ymd_opt(2023, 7, 1)
        .unwrap()
        .and_hms_opt(3, 0, 0)
        .unwrap();
    let fields = (0..days * 8)
        .map(|i| {
            let values = Array2::from_shape_fn((40, 40), |(r, c)| {
                0.001 * (r as f64 + c as f64) + 0.0001 * i as f64
            });
            GriddedField::new(start + Duration::hours(3 * i), grid.clone(), values).unwrap()
        })
        .collect();
    TimeCube::new("tp", grid, fields).unwrap()
}

fn benchmark_weight_computation(c: &mut Criterion) {
    let grid = create_test_grid().upsampled(2);
    let mut group = c.benchmark_group("weight_computation");

    for &per_side in &[2, 5, 10] {
        let boundaries = create_test_boundaries(per_side);
        group.bench_with_input(
            BenchmarkId::new("regions", per_side * per_side),
            &boundaries,
            |b, boundaries| {
                b.iter(|| {
                    let key = WeightCache::key_for(&grid, boundaries);
                    let matrix = WeightCache::compute(key, &grid, boundaries);
                    black_box(matrix.len())
                })
            },
        );
    }
    group.finish();
}

fn benchmark_temporal_alignment(c: &mut Criterion) {
    let cube = create_test_cube(30);

    c.bench_function("temporal_alignment", |b| {
        b.iter(|| {
            let aligned = TemporalAligner::new().align(&cube).unwrap();
            black_box(aligned.cube.len())
        })
    });
}

fn benchmark_zonal_aggregation(c: &mut Criterion) {
    let daily = TemporalAligner::new().align(&create_test_cube(30)).unwrap().cube;
    let fine = SpatialResampler::new().resample(&daily, 2).unwrap();
    let boundaries = create_test_boundaries(5);
    let cache = WeightCache::new();
    let matrix = cache.get_or_compute(fine.grid(), &boundaries);

    let mut group = c.benchmark_group("zonal_aggregation");
    for &chunk_size in &[1, 8, 32] {
        group.bench_with_input(
            BenchmarkId::new("chunk_size", chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                let aggregator = ZonalAggregator::new().with_chunk_size(chunk_size);
                b.iter(|| {
                    let table = aggregator.aggregate(&fine, &matrix).unwrap();
                    black_box(table.len())
                })
            },
        );
    }

    // same statistics without holding the upsampled cube
    let aggregator = ZonalAggregator::new();
    group.bench_function("upsampled_view", |b| {
        b.iter(|| {
            let table = aggregator.aggregate_upsampled(&daily, 2, &matrix).unwrap();
            black_box(table.len())
        })
    });
    group.finish();
}

fn benchmark_cached_weights(c: &mut Criterion) {
    let grid = create_test_grid();
    let boundaries = create_test_boundaries(5);
    let cache = WeightCache::new();
    cache.get_or_compute(&grid, &boundaries);

    c.bench_function("cached_weight_lookup", |b| {
        b.iter(|| black_box(cache.get_or_compute(&grid, &boundaries).len()))
    });
}

criterion_group!(
    benches,
    benchmark_weight_computation,
    benchmark_temporal_alignment,
    benchmark_zonal_aggregation,
    benchmark_cached_weights
);
criterion_main!(benches);

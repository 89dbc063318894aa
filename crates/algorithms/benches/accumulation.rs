//! Benchmarks for accumulation and FCPG creation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fcpg_algorithms::accumulation::{accumulate_flow, accumulate_parameter};
use fcpg_algorithms::d8::D8Format;
use fcpg_algorithms::fcpg::{make_fcpg, FcpgOptions};
use fcpg_core::{GeoTransform, Raster, RasterBands};

/// ESRI comb network: every row drains east into the last column, which
/// drains south and leaves the grid at the bottom-right corner
fn create_comb_fdr(size: usize) -> Raster<u8> {
    let mut fdr = Raster::filled(size, size, 1u8);
    fdr.set_transform(GeoTransform::new(0.0, size as f64, 1.0, -1.0));
    fdr.set_nodata(Some(255));
    for row in 0..size {
        fdr.set(row, size - 1, 4).unwrap();
    }
    fdr
}

fn create_parameter(size: usize, months: usize) -> RasterBands {
    let bands = (0..months)
        .map(|m| {
            let mut r = Raster::new(size, size);
            r.set_transform(GeoTransform::new(0.0, size as f64, 1.0, -1.0));
            for row in 0..size {
                for col in 0..size {
                    r.set(row, col, ((row * 7 + col * 13 + m) % 50) as f64).unwrap();
                }
            }
            (format!("m{m:02}"), r)
        })
        .collect();
    RasterBands::from_bands(bands).unwrap()
}

fn bench_accumulate_flow(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulation/flow");
    for size in [256, 512, 1024, 2048] {
        let fdr = create_comb_fdr(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| accumulate_flow(black_box(&fdr), D8Format::Esri, None, None).unwrap())
        });
    }
    group.finish();
}

fn bench_accumulate_parameter(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulation/parameter_12_bands");
    for size in [256, 512, 1024] {
        let fdr = create_comb_fdr(size);
        let param = create_parameter(size, 12);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| accumulate_parameter(black_box(&fdr), D8Format::Esri, black_box(&param), None).unwrap())
        });
    }
    group.finish();
}

fn bench_make_fcpg(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulation/make_fcpg");
    for size in [512, 1024, 2048] {
        let fdr = create_comb_fdr(size);
        let fac = accumulate_flow(&fdr, D8Format::Esri, None, None).unwrap();
        let accum = accumulate_parameter(&fdr, D8Format::Esri, &create_parameter(size, 1), None).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| make_fcpg(black_box(&accum), black_box(&fac), &FcpgOptions::default()).unwrap())
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_accumulate_flow,
    bench_accumulate_parameter,
    bench_make_fcpg
);
criterion_main!(benches);

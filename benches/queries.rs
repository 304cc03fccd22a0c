use std::sync::Arc;

use cellbin::{BoundingBox, QueryScratch, StaticCellLocator, TriangleMesh};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const N_CELLS: usize = 100_000;
const BUCKET_SIZES: [usize; 4] = [2, 5, 10, 25];

fn random_soup(n: usize, seed: u64) -> TriangleMesh {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points = Vec::with_capacity(3 * n);
    let mut triangles = Vec::with_capacity(n);
    for _ in 0..n {
        let c: [f64; 3] = [
            rng.gen_range(0.0..100.0),
            rng.gen_range(0.0..100.0),
            rng.gen_range(0.0..100.0),
        ];
        let base = points.len();
        for _ in 0..3 {
            points.push([
                c[0] + rng.gen_range(-0.5..0.5),
                c[1] + rng.gen_range(-0.5..0.5),
                c[2] + rng.gen_range(-0.5..0.5),
            ]);
        }
        triangles.push([base, base + 1, base + 2]);
    }
    TriangleMesh::new(points, triangles)
}

fn random_points(n: usize, seed: u64) -> Vec<[f64; 3]> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            [
                rng.gen_range(-10.0..110.0),
                rng.gen_range(-10.0..110.0),
                rng.gen_range(-10.0..110.0),
            ]
        })
        .collect()
}

// Bucket size trades build memory against per-query candidate counts;
// sweep it for the closest-point workload.
fn benchmark_closest_point(c: &mut Criterion) {
    let mesh = Arc::new(random_soup(N_CELLS, 1));
    let queries = random_points(1000, 2);

    let mut group = c.benchmark_group("closest_point");
    for &bucket in &BUCKET_SIZES {
        let mut loc = StaticCellLocator::new(Arc::clone(&mesh));
        loc.set_number_of_cells_per_bucket(bucket);
        loc.build_locator();

        group.bench_with_input(BenchmarkId::new("bucket", bucket), &bucket, |b, _| {
            let mut scratch = QueryScratch::new();
            b.iter(|| {
                for x in &queries {
                    black_box(loc.find_closest_point(x, &mut scratch));
                }
            });
        });
    }
    group.finish();
}

fn benchmark_lines_and_regions(c: &mut Criterion) {
    let mesh = Arc::new(random_soup(N_CELLS, 1));
    let mut loc = StaticCellLocator::new(Arc::clone(&mesh));
    loc.build_locator();

    let p1s = random_points(1000, 3);
    let p2s = random_points(1000, 4);

    let mut group = c.benchmark_group("queries");
    group.bench_function("intersect_with_line", |b| {
        let mut scratch = QueryScratch::new();
        b.iter(|| {
            for (p1, p2) in p1s.iter().zip(&p2s) {
                black_box(loc.intersect_with_line(p1, p2, 1e-10, &mut scratch));
            }
        });
    });

    group.bench_function("cells_within_bounds", |b| {
        let mut scratch = QueryScratch::new();
        let mut out = Vec::new();
        b.iter(|| {
            for p in &p1s {
                let bbox = BoundingBox::new(*p, [p[0] + 5.0, p[1] + 5.0, p[2] + 5.0]);
                loc.find_cells_within_bounds(&bbox, &mut scratch, &mut out);
                black_box(out.len());
            }
        });
    });

    group.bench_function("cells_along_plane", |b| {
        let mut scratch = QueryScratch::new();
        let mut out = Vec::new();
        b.iter(|| {
            for p in p1s.iter().take(100) {
                loc.find_cells_along_plane(p, &[1.0, 2.0, 3.0], 1e-10, &mut scratch, &mut out);
                black_box(out.len());
            }
        });
    });
    group.finish();
}

criterion_group!(benches, benchmark_closest_point, benchmark_lines_and_regions);
criterion_main!(benches);

use std::sync::Arc;

use approx::assert_relative_eq;
use cellbin::{BoundingBox, DataSet, QueryScratch, StaticCellLocator, TriangleMesh};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random triangle soup in the `[0, 10]^3` box: small triangles scattered
/// around random centers, so cells land in many different bins.
fn random_soup(n: usize, seed: u64) -> TriangleMesh {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points = Vec::with_capacity(3 * n);
    let mut triangles = Vec::with_capacity(n);
    for _ in 0..n {
        let c: [f64; 3] = [
            rng.gen_range(0.0..10.0),
            rng.gen_range(0.0..10.0),
            rng.gen_range(0.0..10.0),
        ];
        let base = points.len();
        for _ in 0..3 {
            points.push([
                c[0] + rng.gen_range(-0.4..0.4),
                c[1] + rng.gen_range(-0.4..0.4),
                c[2] + rng.gen_range(-0.4..0.4),
            ]);
        }
        triangles.push([base, base + 1, base + 2]);
    }
    TriangleMesh::new(points, triangles)
}

fn brute_force_closest(mesh: &TriangleMesh, x: &[f64; 3]) -> f64 {
    (0..mesh.num_cells())
        .map(|id| mesh.cell_closest_point(id, x).dist2)
        .fold(f64::INFINITY, f64::min)
}

#[test]
fn test_closest_point_equals_brute_force() {
    let mesh = Arc::new(random_soup(500, 7));
    let mut loc = StaticCellLocator::new(Arc::clone(&mesh));
    loc.build_locator();

    let mut rng = StdRng::seed_from_u64(13);
    let mut scratch = QueryScratch::new();
    for _ in 0..50 {
        // queries inside the box and well outside it
        let x: [f64; 3] = [
            rng.gen_range(-3.0..13.0),
            rng.gen_range(-3.0..13.0),
            rng.gen_range(-3.0..13.0),
        ];
        let want = brute_force_closest(&mesh, &x);
        let got = loc.find_closest_point(&x, &mut scratch).unwrap();
        assert_relative_eq!(got.dist2, want, max_relative = 1e-12);
    }
}

#[test]
fn test_radius_query_agrees_with_unbounded() {
    let mesh = Arc::new(random_soup(200, 21));
    let mut loc = StaticCellLocator::new(Arc::clone(&mesh));
    loc.build_locator();

    let mut rng = StdRng::seed_from_u64(22);
    let mut scratch = QueryScratch::new();
    for _ in 0..30 {
        let x: [f64; 3] = [
            rng.gen_range(-2.0..12.0),
            rng.gen_range(-2.0..12.0),
            rng.gen_range(-2.0..12.0),
        ];
        let full = loc.find_closest_point(&x, &mut scratch).unwrap();
        let radius = rng.gen_range(0.1..4.0);
        match loc.find_closest_point_within_radius(&x, radius, &mut scratch) {
            Some(cp) => {
                assert!(full.dist2 <= radius * radius + 1e-12);
                assert_relative_eq!(cp.dist2, full.dist2, max_relative = 1e-12);
            }
            None => assert!(full.dist2 > radius * radius),
        }
    }
}

#[test]
fn test_cells_within_bounds_equals_brute_force() {
    let mesh = Arc::new(random_soup(300, 3));
    let mut loc = StaticCellLocator::new(Arc::clone(&mesh));
    loc.build_locator();

    let mut rng = StdRng::seed_from_u64(4);
    let mut scratch = QueryScratch::new();
    let mut out = Vec::new();
    for _ in 0..20 {
        let a: [f64; 3] = [
            rng.gen_range(0.0..10.0),
            rng.gen_range(0.0..10.0),
            rng.gen_range(0.0..10.0),
        ];
        let side = rng.gen_range(0.5..4.0);
        let bbox = BoundingBox::new(a, [a[0] + side, a[1] + side, a[2] + side]);

        loc.find_cells_within_bounds(&bbox, &mut scratch, &mut out);
        let mut got = out.clone();
        got.sort_unstable();

        let want: Vec<usize> = (0..mesh.num_cells())
            .filter(|&id| mesh.cell_bounds(id).overlaps(&bbox))
            .collect();
        assert_eq!(got, want);
    }
}

#[test]
fn test_cells_along_plane_equals_brute_force() {
    let mesh = Arc::new(random_soup(300, 11));
    let mut loc = StaticCellLocator::new(Arc::clone(&mesh));
    loc.build_locator();

    let mut scratch = QueryScratch::new();
    let mut out = Vec::new();
    // non-unit, non-axis-aligned normals are the interesting case
    let planes = [
        ([5.0, 5.0, 5.0], [1.0, 0.0, 0.0]),
        ([5.0, 5.0, 5.0], [2.0, -3.0, 1.0]),
        ([2.0, 8.0, 4.0], [0.5, 0.5, 0.5]),
    ];
    for (origin, normal) in planes {
        loc.find_cells_along_plane(&origin, &normal, 1e-10, &mut scratch, &mut out);
        let mut got = out.clone();
        got.sort_unstable();
        assert!(got.windows(2).all(|w| w[0] != w[1]), "duplicate cell ids");

        let want: Vec<usize> = (0..mesh.num_cells())
            .filter(|&id| mesh.cell_intersects_plane(id, &origin, &normal, 1e-10))
            .collect();
        assert_eq!(got, want);
    }
}

#[test]
fn test_shallow_copy_answers_match() {
    let mesh = Arc::new(random_soup(200, 31));
    let mut a = StaticCellLocator::new(Arc::clone(&mesh));
    a.build_locator();
    let mut b = StaticCellLocator::new(Arc::clone(&mesh));
    assert!(b.shallow_copy(&a));

    let mut rng = StdRng::seed_from_u64(32);
    let mut scratch = QueryScratch::new();
    for _ in 0..20 {
        let x: [f64; 3] = [
            rng.gen_range(-1.0..11.0),
            rng.gen_range(-1.0..11.0),
            rng.gen_range(-1.0..11.0),
        ];
        let ra = a.find_closest_point(&x, &mut scratch).unwrap();
        let rb = b.find_closest_point(&x, &mut scratch).unwrap();
        assert_eq!(ra.cell_id, rb.cell_id);
        assert_eq!(ra.dist2, rb.dist2);
    }
}

#[test]
fn test_outlier_cell_is_indexed() {
    let mut mesh = random_soup(50, 41);
    // park one triangle far outside the original box
    mesh.set_point(0, [100.0, 100.0, 100.0]);
    mesh.set_point(1, [101.0, 100.0, 100.0]);
    mesh.set_point(2, [100.0, 101.0, 100.0]);
    let mesh = Arc::new(mesh);

    let mut loc = StaticCellLocator::new(Arc::clone(&mesh));
    loc.build_locator();
    let mut scratch = QueryScratch::new();
    let got = loc
        .find_closest_point(&[100.2, 100.2, 100.0], &mut scratch)
        .unwrap();
    assert_eq!(got.cell_id, 0);
    assert!(got.dist2 < 1.0);
}

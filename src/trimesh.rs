//! Indexed triangle-surface dataset.
//!
//! A minimal concrete [`DataSet`] for exercising the locator: indexed
//! triangles with exact closest-point, segment-intersection and
//! plane-intersection routines, plus a cylinder-surface generator.

use crate::bounds::BoundingBox;
use crate::dataset::{next_mod_stamp, CellClosest, DataSet, SegmentHit};

/// An indexed triangle surface. Each cell is one triangle.
#[derive(Clone, Debug)]
pub struct TriangleMesh {
    points: Vec<[f64; 3]>,
    triangles: Vec<[usize; 3]>,
    mod_stamp: u64,
}

impl TriangleMesh {
    pub fn new(points: Vec<[f64; 3]>, triangles: Vec<[usize; 3]>) -> Self {
        Self {
            points,
            triangles,
            mod_stamp: next_mod_stamp(),
        }
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn point(&self, id: usize) -> [f64; 3] {
        self.points[id]
    }

    pub fn triangle(&self, cell_id: usize) -> [usize; 3] {
        self.triangles[cell_id]
    }

    /// Move a point. Bumps the modification stamp so a built locator over
    /// this mesh reports stale.
    pub fn set_point(&mut self, id: usize, p: [f64; 3]) {
        self.points[id] = p;
        self.mod_stamp = next_mod_stamp();
    }

    fn vertices(&self, cell_id: usize) -> [[f64; 3]; 3] {
        let [a, b, c] = self.triangles[cell_id];
        [self.points[a], self.points[b], self.points[c]]
    }

    /// Closed cylindrical surface with its axis along y, matching the usual
    /// cylinder-source layout: `resolution` side facets, two rings of side
    /// points, and (optionally) triangle-fan caps.
    pub fn cylinder(
        resolution: usize,
        center: [f64; 3],
        radius: f64,
        height: f64,
        capped: bool,
    ) -> Self {
        let res = resolution.max(3);
        let y_top = center[1] + 0.5 * height;
        let y_bot = center[1] - 0.5 * height;

        let mut points = Vec::with_capacity(2 * res + 2);
        for i in 0..res {
            let a = 2.0 * std::f64::consts::PI * (i as f64) / (res as f64);
            let (s, c) = a.sin_cos();
            points.push([center[0] + radius * c, y_top, center[2] + radius * s]);
        }
        for i in 0..res {
            let a = 2.0 * std::f64::consts::PI * (i as f64) / (res as f64);
            let (s, c) = a.sin_cos();
            points.push([center[0] + radius * c, y_bot, center[2] + radius * s]);
        }

        let mut triangles = Vec::with_capacity(4 * res);
        for i in 0..res {
            let j = (i + 1) % res;
            // side quad (top_i, top_j, bot_j, bot_i) split in two
            triangles.push([i, j, res + j]);
            triangles.push([i, res + j, res + i]);
        }

        if capped {
            let top_center = points.len();
            points.push([center[0], y_top, center[2]]);
            let bot_center = points.len();
            points.push([center[0], y_bot, center[2]]);
            for i in 0..res {
                let j = (i + 1) % res;
                triangles.push([top_center, i, j]);
                triangles.push([bot_center, res + j, res + i]);
            }
        }

        Self::new(points, triangles)
    }
}

impl DataSet for TriangleMesh {
    fn num_cells(&self) -> usize {
        self.triangles.len()
    }

    fn bounds(&self) -> BoundingBox {
        BoundingBox::from_points(&self.points)
    }

    fn cell_bounds(&self, cell_id: usize) -> BoundingBox {
        BoundingBox::from_points(&self.vertices(cell_id))
    }

    fn mod_stamp(&self) -> u64 {
        self.mod_stamp
    }

    fn cell_closest_point(&self, cell_id: usize, x: &[f64; 3]) -> CellClosest {
        let [a, b, c] = self.vertices(cell_id);
        let (point, inside) = closest_point_on_triangle(x, &a, &b, &c);
        CellClosest {
            point,
            dist2: dist2(x, &point),
            sub_id: 0,
            inside,
        }
    }

    fn cell_intersect_segment(
        &self,
        cell_id: usize,
        p1: &[f64; 3],
        p2: &[f64; 3],
        tol: f64,
    ) -> Option<SegmentHit> {
        let [a, b, c] = self.vertices(cell_id);
        segment_triangle_intersect(p1, p2, &a, &b, &c, tol)
    }

    fn cell_intersects_plane(
        &self,
        cell_id: usize,
        origin: &[f64; 3],
        normal: &[f64; 3],
        tol: f64,
    ) -> bool {
        let verts = self.vertices(cell_id);
        let mut above = false;
        let mut below = false;
        for v in &verts {
            let d = (v[0] - origin[0]) * normal[0]
                + (v[1] - origin[1]) * normal[1]
                + (v[2] - origin[2]) * normal[2];
            if d.abs() <= tol {
                return true;
            }
            if d > 0.0 {
                above = true;
            } else {
                below = true;
            }
        }
        above && below
    }
}

fn dist2(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Closest point on triangle `(a, b, c)` to `p`, after Ericson's
/// "Real-Time Collision Detection". The flag is true when the closest point
/// lies in the face interior rather than on an edge or vertex.
pub fn closest_point_on_triangle(
    p: &[f64; 3],
    a: &[f64; 3],
    b: &[f64; 3],
    c: &[f64; 3],
) -> ([f64; 3], bool) {
    let ab = sub(b, a);
    let ac = sub(c, a);
    let ap = sub(p, a);

    let d1 = dot(&ab, &ap);
    let d2 = dot(&ac, &ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (*a, false);
    }

    let bp = sub(p, b);
    let d3 = dot(&ab, &bp);
    let d4 = dot(&ac, &bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (*b, false);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (
            [a[0] + ab[0] * v, a[1] + ab[1] * v, a[2] + ab[2] * v],
            false,
        );
    }

    let cp = sub(p, c);
    let d5 = dot(&ab, &cp);
    let d6 = dot(&ac, &cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (*c, false);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (
            [a[0] + ac[0] * w, a[1] + ac[1] * w, a[2] + ac[2] * w],
            false,
        );
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        let bc = sub(c, b);
        return (
            [b[0] + bc[0] * w, b[1] + bc[1] * w, b[2] + bc[2] * w],
            false,
        );
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (
        [
            a[0] + ab[0] * v + ac[0] * w,
            a[1] + ab[1] * v + ac[1] * w,
            a[2] + ab[2] * v + ac[2] * w,
        ],
        true,
    )
}

/// Möller–Trumbore restricted to the segment `p1..p2` (`t` in `[0, 1]`).
/// `tol` is barycentric slack so grazing hits along shared edges register.
pub fn segment_triangle_intersect(
    p1: &[f64; 3],
    p2: &[f64; 3],
    a: &[f64; 3],
    b: &[f64; 3],
    c: &[f64; 3],
    tol: f64,
) -> Option<SegmentHit> {
    const PARALLEL_EPS: f64 = 1e-14;

    let dir = sub(p2, p1);
    let e1 = sub(b, a);
    let e2 = sub(c, a);

    let h = cross(&dir, &e2);
    let det = dot(&e1, &h);
    if det.abs() < PARALLEL_EPS {
        return None;
    }

    let inv = 1.0 / det;
    let s = sub(p1, a);
    let u = inv * dot(&s, &h);
    if u < -tol || u > 1.0 + tol {
        return None;
    }

    let q = cross(&s, &e1);
    let v = inv * dot(&dir, &q);
    if v < -tol || u + v > 1.0 + tol {
        return None;
    }

    let t = inv * dot(&e2, &q);
    if !(0.0..=1.0).contains(&t) {
        return None;
    }

    Some(SegmentHit {
        t,
        point: [
            p1[0] + dir[0] * t,
            p1[1] + dir[1] * t,
            p1[2] + dir[2] * t,
        ],
        pcoords: [u, v, 0.0],
        sub_id: 0,
    })
}

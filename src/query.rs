//! Read-only query algorithms over a built bin structure.
//!
//! Every query walks bins in a traversal order suited to its geometry
//! (expanding rings for closest point, a DDA voxel walk for lines, clamped
//! ranges for boxes, a whole-grid sweep for planes) and hands candidate
//! cells to the dataset's exact geometry routines. Candidates reached via
//! several overlapping bins are tested once, tracked by per-call epoch
//! marks in a [`QueryScratch`].

use crate::binner::{BinIndex, CsrTable, Grid};
use crate::bounds::BoundingBox;
use crate::dataset::{DataSet, SegmentHit};

/// Result of a closest-point query.
#[derive(Clone, Copy, Debug)]
pub struct ClosestPoint {
    pub cell_id: usize,
    pub sub_id: usize,
    /// Closest point on the winning cell.
    pub point: [f64; 3],
    /// Squared distance to `point`.
    pub dist2: f64,
    /// Whether the query point evaluates as inside the winning cell.
    pub inside: bool,
}

/// One line-cell intersection, in segment parameter order.
#[derive(Clone, Copy, Debug)]
pub struct LineHit {
    pub t: f64,
    pub point: [f64; 3],
    pub pcoords: [f64; 3],
    pub sub_id: usize,
    pub cell_id: usize,
}

/// Per-call scratch. Queries mutate it freely, so concurrent callers need
/// one scratch each; the locator state itself stays shared and immutable.
#[derive(Debug, Default)]
pub struct QueryScratch {
    marks: Vec<u64>,
    stamp: u64,
    seg_hits: Vec<SegmentHit>,
}

impl QueryScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh query over `num_cells` cells: bump the epoch so all
    /// previous marks become stale without clearing the array.
    fn begin(&mut self, num_cells: usize) {
        self.stamp += 1;
        if self.marks.len() < num_cells {
            self.marks.resize(num_cells, 0);
        }
    }

    /// Mark a cell as tested; returns false when it already was.
    fn claim(&mut self, cell_id: usize) -> bool {
        if self.marks[cell_id] == self.stamp {
            false
        } else {
            self.marks[cell_id] = self.stamp;
            true
        }
    }
}

/// Borrowed view of everything a query needs, monomorphized per bin-id
/// width so inner loops stay free of dynamic dispatch.
pub(crate) struct QueryEngine<'a, I, D> {
    pub grid: &'a Grid,
    pub table: &'a CsrTable<I>,
    pub cell_bounds: &'a [BoundingBox],
    pub dataset: &'a D,
}

impl<'a, I: BinIndex, D: DataSet> QueryEngine<'a, I, D> {
    /// Expanding-ring closest-point search. `radius` bounds the accepted
    /// distance; `None` searches the whole grid. Returns the global
    /// minimum, matching a brute-force scan.
    pub fn find_closest_point(
        &self,
        x: &[f64; 3],
        radius: Option<f64>,
        scratch: &mut QueryScratch,
    ) -> Option<ClosestPoint> {
        let num_cells = self.cell_bounds.len();
        if num_cells == 0 {
            return None;
        }
        scratch.begin(num_cells);

        let limit2 = radius.map_or(f64::INFINITY, |r| r * r);
        let origin = self.grid.point_ijk(x);
        let div = self.grid.divisions;
        let max_level = (0..3)
            .map(|a| origin[a].max(div[a] - 1 - origin[a]))
            .max()
            .unwrap_or(0);

        let mut best: Option<ClosestPoint> = None;
        let mut best_d2 = f64::INFINITY;

        for level in 0..=max_level {
            // Bins at ring `level` and beyond lie outside the box covered
            // by rings 0..level; once even that box's exterior is farther
            // than the current best (or the radius), the search is done.
            if level > 0 {
                let d = self.covered_exit_distance(x, &origin, level - 1);
                if d * d > best_d2.min(limit2) {
                    break;
                }
            }
            self.visit_ring(&origin, level, |bin_ijk| {
                let bin_box = self.grid.bin_bounds(bin_ijk);
                if bin_box.distance2_to_point(x) > best_d2.min(limit2) {
                    return;
                }
                for id in self.table.bin_cells(self.grid.bin_index(bin_ijk)) {
                    let cell_id = id.as_usize();
                    if !scratch.claim(cell_id) {
                        continue;
                    }
                    if self.cell_bounds[cell_id].distance2_to_point(x) > best_d2.min(limit2) {
                        continue;
                    }
                    let c = self.dataset.cell_closest_point(cell_id, x);
                    if c.dist2 <= limit2 && c.dist2 < best_d2 {
                        best_d2 = c.dist2;
                        best = Some(ClosestPoint {
                            cell_id,
                            sub_id: c.sub_id,
                            point: c.point,
                            dist2: c.dist2,
                            inside: c.inside,
                        });
                    }
                }
            });
        }
        best
    }

    /// Minimum distance from `x` to any point outside the world box covered
    /// by bins within Chebyshev distance `level` of `origin`. Zero when `x`
    /// lies outside that box (no pruning possible).
    fn covered_exit_distance(&self, x: &[f64; 3], origin: &[usize; 3], level: usize) -> f64 {
        let g = &self.grid.bounds;
        let mut d = f64::INFINITY;
        for a in 0..3 {
            let lo = g.min[a] + (origin[a] as f64 - level as f64) * self.grid.h[a];
            let hi = g.min[a] + (origin[a] as f64 + level as f64 + 1.0) * self.grid.h[a];
            if x[a] < lo || x[a] > hi {
                return 0.0;
            }
            d = d.min(x[a] - lo).min(hi - x[a]);
        }
        d
    }

    /// Visit every in-grid bin at exactly Chebyshev distance `level` from
    /// `origin`.
    fn visit_ring(&self, origin: &[usize; 3], level: usize, mut f: impl FnMut([usize; 3])) {
        let div = self.grid.divisions;
        let l = level as isize;
        let o = [origin[0] as isize, origin[1] as isize, origin[2] as isize];
        for dk in -l..=l {
            let k = o[2] + dk;
            if k < 0 || k >= div[2] as isize {
                continue;
            }
            for dj in -l..=l {
                let j = o[1] + dj;
                if j < 0 || j >= div[1] as isize {
                    continue;
                }
                // interior of the shell only when both outer offsets are
                // interior; then x must sit on the shell
                let on_shell_jk = dk.abs() == l || dj.abs() == l;
                let mut di = -l;
                while di <= l {
                    let i = o[0] + di;
                    if i >= 0 && i < div[0] as isize && (on_shell_jk || di.abs() == l) {
                        f([i as usize, j as usize, k as usize]);
                    }
                    // skip the shell interior along x in one jump
                    if !on_shell_jk && di == -l {
                        di = l;
                    } else {
                        di += 1;
                    }
                }
            }
        }
    }

    /// First intersection of the segment `p1..p2`, walking bins in
    /// increasing `t` so the search stops as soon as no later bin can beat
    /// the best hit.
    pub fn intersect_with_line(
        &self,
        p1: &[f64; 3],
        p2: &[f64; 3],
        tol: f64,
        scratch: &mut QueryScratch,
    ) -> Option<LineHit> {
        let mut best: Option<LineHit> = None;
        self.walk_line(p1, p2, scratch, |engine, scratch, bin, exit_t| {
            for id in engine.table.bin_cells(bin) {
                let cell_id = id.as_usize();
                if !scratch.claim(cell_id) {
                    continue;
                }
                if let Some(hit) = engine.dataset.cell_intersect_segment(cell_id, p1, p2, tol) {
                    if best.as_ref().is_none_or(|b| hit.t < b.t) {
                        best = Some(LineHit {
                            t: hit.t,
                            point: hit.point,
                            pcoords: hit.pcoords,
                            sub_id: hit.sub_id,
                            cell_id,
                        });
                    }
                }
            }
            // later bins are entered at t >= exit_t; a best at or below it
            // cannot be beaten
            best.as_ref().is_some_and(|b| b.t <= exit_t)
        });
        best
    }

    /// Every intersection along the segment, sorted by ascending `t`. Each
    /// cell is tested once but may contribute several genuine hits.
    pub fn intersect_with_line_all(
        &self,
        p1: &[f64; 3],
        p2: &[f64; 3],
        tol: f64,
        scratch: &mut QueryScratch,
        out: &mut Vec<LineHit>,
    ) {
        out.clear();
        let mut hits = std::mem::take(&mut scratch.seg_hits);
        self.walk_line(p1, p2, scratch, |engine, scratch, bin, _exit_t| {
            for id in engine.table.bin_cells(bin) {
                let cell_id = id.as_usize();
                if !scratch.claim(cell_id) {
                    continue;
                }
                hits.clear();
                engine
                    .dataset
                    .cell_intersect_segment_all(cell_id, p1, p2, tol, &mut hits);
                for h in &hits {
                    out.push(LineHit {
                        t: h.t,
                        point: h.point,
                        pcoords: h.pcoords,
                        sub_id: h.sub_id,
                        cell_id,
                    });
                }
            }
            false
        });
        scratch.seg_hits = hits;
        out.sort_unstable_by(|a, b| a.t.total_cmp(&b.t));
    }

    /// DDA walk over the bins the segment passes through, in increasing
    /// `t`. The visitor receives the flattened bin id and the `t` at which
    /// the segment leaves that bin, and returns true to stop early.
    fn walk_line(
        &self,
        p1: &[f64; 3],
        p2: &[f64; 3],
        scratch: &mut QueryScratch,
        mut visit: impl FnMut(&Self, &mut QueryScratch, usize, f64) -> bool,
    ) {
        let num_cells = self.cell_bounds.len();
        if num_cells == 0 {
            return;
        }
        let Some((t_in, t_out)) = self.grid.bounds.clip_segment(p1, p2) else {
            return;
        };
        scratch.begin(num_cells);

        // nudge the entry point off bin faces so the walk starts in the bin
        // the segment actually enters
        let t_start = t_in + (t_out - t_in) * 1e-12;
        let start = [
            p1[0] + (p2[0] - p1[0]) * t_start,
            p1[1] + (p2[1] - p1[1]) * t_start,
            p1[2] + (p2[2] - p1[2]) * t_start,
        ];
        let mut ijk = self.grid.point_ijk(&start);

        let dir = [p2[0] - p1[0], p2[1] - p1[1], p2[2] - p1[2]];
        let mut step = [0isize; 3];
        let mut t_next = [f64::INFINITY; 3];
        let mut t_delta = [f64::INFINITY; 3];
        for a in 0..3 {
            if dir[a].abs() > f64::EPSILON {
                step[a] = if dir[a] > 0.0 { 1 } else { -1 };
                t_delta[a] = (self.grid.h[a] / dir[a]).abs();
                let boundary = self.grid.bounds.min[a]
                    + (ijk[a] as f64 + if dir[a] > 0.0 { 1.0 } else { 0.0 }) * self.grid.h[a];
                t_next[a] = (boundary - p1[a]) / dir[a];
            }
        }

        loop {
            let exit_t = t_next[0].min(t_next[1]).min(t_next[2]).min(t_out);
            if visit(self, scratch, self.grid.bin_index(ijk), exit_t) {
                return;
            }

            let axis = if t_next[0] < t_next[1] {
                if t_next[0] < t_next[2] { 0 } else { 2 }
            } else if t_next[1] < t_next[2] {
                1
            } else {
                2
            };
            if t_next[axis] > t_out {
                return;
            }
            let next = ijk[axis] as isize + step[axis];
            if next < 0 || next >= self.grid.divisions[axis] as isize {
                return;
            }
            ijk[axis] = next as usize;
            t_next[axis] += t_delta[axis];
        }
    }

    /// Cells whose cached bounding box overlaps `bbox`: bin membership is
    /// the coarse superset, the cached-bounds overlap is the precise
    /// filter.
    pub fn find_cells_within_bounds(
        &self,
        bbox: &BoundingBox,
        scratch: &mut QueryScratch,
        out: &mut Vec<usize>,
    ) {
        out.clear();
        let num_cells = self.cell_bounds.len();
        if num_cells == 0 || !bbox.is_valid() {
            return;
        }
        scratch.begin(num_cells);

        let (lo, hi) = self.grid.box_ijk_range(bbox);
        for k in lo[2]..=hi[2] {
            for j in lo[1]..=hi[1] {
                for i in lo[0]..=hi[0] {
                    for id in self.table.bin_cells(self.grid.bin_index([i, j, k])) {
                        let cell_id = id.as_usize();
                        if scratch.claim(cell_id) && self.cell_bounds[cell_id].overlaps(bbox) {
                            out.push(cell_id);
                        }
                    }
                }
            }
        }
    }

    /// Cells cut by the plane through `origin` with normal `normal`.
    /// Candidate bins are those whose box straddles the plane or comes
    /// within `tol` of it; output order follows the flattened bin sweep.
    pub fn find_cells_along_plane(
        &self,
        origin: &[f64; 3],
        normal: &[f64; 3],
        tol: f64,
        scratch: &mut QueryScratch,
        out: &mut Vec<usize>,
    ) {
        out.clear();
        let num_cells = self.cell_bounds.len();
        let norm2 = normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2];
        if num_cells == 0 || norm2 <= 0.0 {
            return;
        }
        scratch.begin(num_cells);

        let inv = 1.0 / norm2.sqrt();
        let n = [normal[0] * inv, normal[1] * inv, normal[2] * inv];
        // a bin straddles the plane iff the distance from its center is at
        // most the box's projection radius onto the normal; equivalent to
        // the mixed-corner-sign test
        let r = 0.5
            * (n[0].abs() * self.grid.h[0]
                + n[1].abs() * self.grid.h[1]
                + n[2].abs() * self.grid.h[2]);

        for bin in 0..self.grid.num_bins() {
            let bb = self.grid.bin_bounds(self.grid.bin_ijk(bin));
            let center = [
                0.5 * (bb.min[0] + bb.max[0]),
                0.5 * (bb.min[1] + bb.max[1]),
                0.5 * (bb.min[2] + bb.max[2]),
            ];
            let d = (center[0] - origin[0]) * n[0]
                + (center[1] - origin[1]) * n[1]
                + (center[2] - origin[2]) * n[2];
            if d.abs() > r + tol {
                continue;
            }
            for id in self.table.bin_cells(bin) {
                let cell_id = id.as_usize();
                if scratch.claim(cell_id)
                    && self.dataset.cell_intersects_plane(cell_id, origin, &n, tol)
                {
                    out.push(cell_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binner::{partition, BinTable};
    use crate::dataset::DataSet;
    use crate::trimesh::TriangleMesh;

    fn engine_parts(mesh: &TriangleMesh, div: [usize; 3]) -> (Grid, BinTable, Vec<BoundingBox>) {
        let cache: Vec<BoundingBox> = (0..mesh.num_cells()).map(|i| mesh.cell_bounds(i)).collect();
        let grid = Grid::new(mesh.bounds(), div);
        let table = partition(&cache, &grid);
        (grid, table, cache)
    }

    fn quad_strip(n: usize) -> TriangleMesh {
        // n unit quads (2n triangles) in the z = 0 plane along x
        let mut points = Vec::new();
        let mut tris = Vec::new();
        for i in 0..=n {
            points.push([i as f64, 0.0, 0.0]);
            points.push([i as f64, 1.0, 0.0]);
        }
        for i in 0..n {
            let a = 2 * i;
            tris.push([a, a + 2, a + 3]);
            tris.push([a, a + 3, a + 1]);
        }
        TriangleMesh::new(points, tris)
    }

    #[test]
    fn test_ring_visits_whole_grid_once() {
        let mesh = quad_strip(4);
        let (grid, table, cache) = engine_parts(&mesh, [4, 2, 1]);
        let BinTable::Small(table) = table else {
            unreachable!()
        };
        let engine = QueryEngine {
            grid: &grid,
            table: &table,
            cell_bounds: &cache,
            dataset: &mesh,
        };

        let origin = [1usize, 0, 0];
        let mut seen = std::collections::HashSet::new();
        for level in 0..=4 {
            engine.visit_ring(&origin, level, |ijk| {
                assert!(seen.insert(ijk), "bin {ijk:?} visited twice");
            });
        }
        assert_eq!(seen.len(), grid.num_bins());
    }

    #[test]
    fn test_closest_point_matches_brute_force() {
        let mesh = quad_strip(8);
        let (grid, table, cache) = engine_parts(&mesh, [6, 2, 1]);
        let BinTable::Small(table) = table else {
            unreachable!()
        };
        let engine = QueryEngine {
            grid: &grid,
            table: &table,
            cell_bounds: &cache,
            dataset: &mesh,
        };
        let mut scratch = QueryScratch::new();

        for x in [
            [0.1, 0.5, 2.0],
            [4.0, -3.0, 1.0],
            [8.5, 0.5, -0.25],
            [-2.0, 2.0, 0.0],
        ] {
            let got = engine
                .find_closest_point(&x, None, &mut scratch)
                .expect("non-empty mesh");
            let want = (0..mesh.num_cells())
                .map(|c| mesh.cell_closest_point(c, &x).dist2)
                .fold(f64::INFINITY, f64::min);
            assert!(
                (got.dist2 - want).abs() <= 1e-12 * want.max(1.0),
                "point {x:?}: {} vs {}",
                got.dist2,
                want
            );
        }
    }

    #[test]
    fn test_closest_point_radius_bound() {
        let mesh = quad_strip(4);
        let (grid, table, cache) = engine_parts(&mesh, [4, 1, 1]);
        let BinTable::Small(table) = table else {
            unreachable!()
        };
        let engine = QueryEngine {
            grid: &grid,
            table: &table,
            cell_bounds: &cache,
            dataset: &mesh,
        };
        let mut scratch = QueryScratch::new();

        let x = [2.0, 0.5, 3.0]; // exactly 3 above the strip
        assert!(engine.find_closest_point(&x, Some(2.0), &mut scratch).is_none());
        let hit = engine
            .find_closest_point(&x, Some(3.5), &mut scratch)
            .unwrap();
        assert!((hit.dist2 - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_line_walk_hits_in_order() {
        let mesh = quad_strip(6);
        let (grid, table, cache) = engine_parts(&mesh, [6, 1, 1]);
        let BinTable::Small(table) = table else {
            unreachable!()
        };
        let engine = QueryEngine {
            grid: &grid,
            table: &table,
            cell_bounds: &cache,
            dataset: &mesh,
        };
        let mut scratch = QueryScratch::new();

        // descending diagonal pierces the strip once
        let p1 = [0.3, 0.25, 1.0];
        let p2 = [5.3, 0.25, -1.0];
        let single = engine
            .intersect_with_line(&p1, &p2, 0.0, &mut scratch)
            .expect("must hit the strip");
        let mut all = Vec::new();
        engine.intersect_with_line_all(&p1, &p2, 0.0, &mut scratch, &mut all);
        assert!(!all.is_empty());
        assert!((single.t - all[0].t).abs() < 1e-12);
        assert_eq!(single.cell_id, all[0].cell_id);
        for w in all.windows(2) {
            assert!(w[0].t <= w[1].t);
        }
    }

    #[test]
    fn test_line_misses_grid() {
        let mesh = quad_strip(2);
        let (grid, table, cache) = engine_parts(&mesh, [2, 1, 1]);
        let BinTable::Small(table) = table else {
            unreachable!()
        };
        let engine = QueryEngine {
            grid: &grid,
            table: &table,
            cell_bounds: &cache,
            dataset: &mesh,
        };
        let mut scratch = QueryScratch::new();
        assert!(engine
            .intersect_with_line(&[0.0, 5.0, 5.0], &[1.0, 5.0, 5.0], 0.0, &mut scratch)
            .is_none());
    }

    #[test]
    fn test_cells_within_bounds_exact_set() {
        let mesh = quad_strip(10);
        let (grid, table, cache) = engine_parts(&mesh, [5, 2, 1]);
        let BinTable::Small(table) = table else {
            unreachable!()
        };
        let engine = QueryEngine {
            grid: &grid,
            table: &table,
            cell_bounds: &cache,
            dataset: &mesh,
        };
        let mut scratch = QueryScratch::new();

        let bbox = BoundingBox::new([2.5, 0.25, -1.0], [4.5, 0.75, 1.0]);
        let mut got = Vec::new();
        engine.find_cells_within_bounds(&bbox, &mut scratch, &mut got);
        got.sort_unstable();

        let want: Vec<usize> = (0..mesh.num_cells())
            .filter(|&c| cache[c].overlaps(&bbox))
            .collect();
        assert_eq!(got, want);
    }

    #[test]
    fn test_cells_along_plane() {
        let mesh = quad_strip(10);
        let (grid, table, cache) = engine_parts(&mesh, [5, 2, 1]);
        let BinTable::Small(table) = table else {
            unreachable!()
        };
        let engine = QueryEngine {
            grid: &grid,
            table: &table,
            cell_bounds: &cache,
            dataset: &mesh,
        };
        let mut scratch = QueryScratch::new();

        // plane x = 3.5 cuts the strip
        let mut got = Vec::new();
        engine.find_cells_along_plane(&[3.5, 0.0, 0.0], &[2.0, 0.0, 0.0], 1e-9, &mut scratch, &mut got);
        let mut sorted = got.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), got.len(), "no duplicate cell ids");

        let want: Vec<usize> = (0..mesh.num_cells())
            .filter(|&c| mesh.cell_intersects_plane(c, &[3.5, 0.0, 0.0], &[1.0, 0.0, 0.0], 1e-9))
            .collect();
        got.sort_unstable();
        assert_eq!(got, want);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

use crate::bounds::BoundingBox;

static STAMP_CLOCK: AtomicU64 = AtomicU64::new(1);

/// Next tick of the process-wide modification clock. Datasets and locators
/// draw stamps from the same clock so build times and dataset modification
/// times are directly comparable.
pub fn next_mod_stamp() -> u64 {
    STAMP_CLOCK.fetch_add(1, Ordering::Relaxed)
}

/// Result of an exact closest-point query against a single cell.
#[derive(Clone, Copy, Debug)]
pub struct CellClosest {
    /// Closest point on the cell.
    pub point: [f64; 3],
    /// Squared distance from the query point to `point`.
    pub dist2: f64,
    /// Sub-cell (facet) index for composite cells; 0 for simple cells.
    pub sub_id: usize,
    /// Whether the query point evaluates as inside the cell.
    pub inside: bool,
}

/// A single segment-cell intersection.
#[derive(Clone, Copy, Debug)]
pub struct SegmentHit {
    /// Parametric position along the segment, in `[0, 1]`.
    pub t: f64,
    /// Intersection point in world space.
    pub point: [f64; 3],
    /// Parametric coordinates of the hit within the cell.
    pub pcoords: [f64; 3],
    /// Sub-cell (facet) index for composite cells; 0 for simple cells.
    pub sub_id: usize,
}

/// The collaborator contract the locator consumes: an unstructured
/// collection of cells with cached-free access to per-cell bounds and exact
/// per-cell geometry routines.
///
/// The locator never copies cell geometry; it stores cell ids only and calls
/// back into the dataset for every conclusive geometric test. Implementors
/// must bump [`DataSet::mod_stamp`] on any mutation so a built locator can
/// detect staleness.
pub trait DataSet: Send + Sync {
    /// Number of cells in the dataset.
    fn num_cells(&self) -> usize;

    /// Bounding box of the whole dataset, used to size the grid.
    fn bounds(&self) -> BoundingBox;

    /// Bounding box of a single cell. Degenerate (zero-volume) boxes are
    /// legitimate; inverted or NaN boxes mark cells to skip.
    fn cell_bounds(&self, cell_id: usize) -> BoundingBox;

    /// Monotonic modification stamp; compared against the locator's build
    /// time to detect "dataset changed since last build".
    fn mod_stamp(&self) -> u64;

    /// Exact closest point on the cell to `x`.
    fn cell_closest_point(&self, cell_id: usize, x: &[f64; 3]) -> CellClosest;

    /// First intersection of the segment `p1..p2` with the cell, smallest
    /// `t` first, or `None`. `tol` widens the test to tolerate grazing hits.
    fn cell_intersect_segment(
        &self,
        cell_id: usize,
        p1: &[f64; 3],
        p2: &[f64; 3],
        tol: f64,
    ) -> Option<SegmentHit>;

    /// All intersections of the segment with the cell, appended to `out` in
    /// no particular order. A concave or composite cell may produce several
    /// genuine hits. The default forwards to the single-hit routine.
    fn cell_intersect_segment_all(
        &self,
        cell_id: usize,
        p1: &[f64; 3],
        p2: &[f64; 3],
        tol: f64,
        out: &mut Vec<SegmentHit>,
    ) {
        if let Some(hit) = self.cell_intersect_segment(cell_id, p1, p2, tol) {
            out.push(hit);
        }
    }

    /// Whether the cell is cut by the plane through `origin` with normal
    /// `normal`, within distance tolerance `tol`.
    fn cell_intersects_plane(
        &self,
        cell_id: usize,
        origin: &[f64; 3],
        normal: &[f64; 3],
        tol: f64,
    ) -> bool;
}

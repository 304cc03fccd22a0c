//! Locator facade: build lifecycle, configuration, and the public query
//! surface.

use std::sync::Arc;

use rayon::prelude::*;

use crate::binner::{
    compute_divisions, partition, shrink_to_limit, BinTable, Grid, DEFAULT_CELLS_PER_BUCKET,
};
use crate::bounds::BoundingBox;
use crate::dataset::{next_mod_stamp, DataSet};
use crate::query::{ClosestPoint, LineHit, QueryEngine, QueryScratch};

/// The immutable product of a build: bounds cache, grid, and bin table.
/// Shared (and aliased by shallow copies) behind an `Arc`; never mutated
/// after construction, so concurrent queries need no locks.
#[derive(Debug)]
struct BuiltStructure {
    grid: Grid,
    table: BinTable,
    cell_bounds: Vec<BoundingBox>,
    num_cells: usize,
}

/// Static, bulk-built binned cell locator.
///
/// `build_locator` hashes every cell's bounding box into a uniform grid;
/// the four query families then walk bins in traversal order and defer
/// conclusive geometry to the dataset. The built structure is immutable:
/// any number of threads may query a built locator concurrently, each with
/// its own [`QueryScratch`]. Rebuild after mutating the dataset; querying
/// a stale structure yields undefined (though memory-safe) results.
pub struct StaticCellLocator<D> {
    dataset: Arc<D>,
    automatic: bool,
    divisions: [usize; 3],
    cells_per_bucket: usize,
    max_buckets: usize,
    config_stamp: u64,
    build_time: u64,
    built: Option<Arc<BuiltStructure>>,
}

macro_rules! with_engine {
    ($self:expr, $built:expr, |$engine:ident| $body:expr) => {
        match &$built.table {
            BinTable::Small(table) => {
                let $engine = QueryEngine {
                    grid: &$built.grid,
                    table,
                    cell_bounds: &$built.cell_bounds,
                    dataset: &*$self.dataset,
                };
                $body
            }
            BinTable::Large(table) => {
                let $engine = QueryEngine {
                    grid: &$built.grid,
                    table,
                    cell_bounds: &$built.cell_bounds,
                    dataset: &*$self.dataset,
                };
                $body
            }
        }
    };
}

impl<D: DataSet> StaticCellLocator<D> {
    pub fn new(dataset: Arc<D>) -> Self {
        Self {
            dataset,
            automatic: true,
            divisions: [50, 50, 50],
            cells_per_bucket: DEFAULT_CELLS_PER_BUCKET,
            max_buckets: usize::MAX,
            config_stamp: next_mod_stamp(),
            build_time: 0,
            built: None,
        }
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Compute divisions from the dataset (default) instead of using the
    /// manually set ones.
    pub fn set_automatic(&mut self, automatic: bool) {
        if self.automatic != automatic {
            self.automatic = automatic;
            self.config_stamp = next_mod_stamp();
        }
    }

    pub fn automatic(&self) -> bool {
        self.automatic
    }

    /// Manual grid divisions; each axis is clamped to at least 1.
    pub fn set_divisions(&mut self, divisions: [usize; 3]) {
        let divisions = divisions.map(|n| n.max(1));
        if self.divisions != divisions {
            self.divisions = divisions;
            self.config_stamp = next_mod_stamp();
        }
    }

    /// Divisions of the built grid, or the configured ones before a build.
    pub fn divisions(&self) -> [usize; 3] {
        self.built
            .as_ref()
            .map_or(self.divisions, |b| b.grid.divisions)
    }

    /// Target average bin occupancy for automatic sizing; clamped to >= 1.
    pub fn set_number_of_cells_per_bucket(&mut self, n: usize) {
        let n = n.max(1);
        if self.cells_per_bucket != n {
            self.cells_per_bucket = n;
            self.config_stamp = next_mod_stamp();
        }
    }

    pub fn number_of_cells_per_bucket(&self) -> usize {
        self.cells_per_bucket
    }

    /// Upper bound on the total bin count; clamped to >= 1.
    pub fn set_max_number_of_buckets(&mut self, n: usize) {
        let n = n.max(1);
        if self.max_buckets != n {
            self.max_buckets = n;
            self.config_stamp = next_mod_stamp();
        }
    }

    pub fn max_number_of_buckets(&self) -> usize {
        self.max_buckets
    }

    /// Whether the built bin table uses 64-bit ids. False before a build.
    pub fn large_ids(&self) -> bool {
        self.built.as_ref().is_some_and(|b| b.table.large_ids())
    }

    /// Stamp of the last completed build; 0 when never built.
    pub fn build_time(&self) -> u64 {
        self.build_time
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Build the search structure. A no-op when already built and neither
    /// the locator configuration nor the dataset changed since.
    pub fn build_locator(&mut self) {
        if self.built.is_some()
            && self.build_time > self.config_stamp
            && self.build_time > self.dataset.mod_stamp()
        {
            return;
        }
        self.force_build_locator();
    }

    /// Build unconditionally, bypassing the staleness check.
    pub fn force_build_locator(&mut self) {
        let num_cells = self.dataset.num_cells();
        let bounds = self.dataset.bounds();

        // zero cells or useless bounds: degrade to an empty 1x1x1 grid so
        // queries report "not found" instead of faulting
        let (grid, cell_bounds) = if num_cells == 0 || !bounds.is_valid() {
            (
                Grid::new(BoundingBox::new([0.0; 3], [1.0; 3]), [1, 1, 1]),
                Vec::new(),
            )
        } else {
            let cell_bounds: Vec<BoundingBox> = (0..num_cells)
                .into_par_iter()
                .map(|i| self.dataset.cell_bounds(i))
                .collect();
            let divisions = if self.automatic {
                compute_divisions(&bounds, num_cells, self.cells_per_bucket, self.max_buckets)
            } else {
                let mut d = self.divisions;
                shrink_to_limit(&mut d, &[0, 1, 2], self.max_buckets);
                d
            };
            (Grid::new(bounds, divisions), cell_bounds)
        };

        let table = partition(&cell_bounds, &grid);
        self.built = Some(Arc::new(BuiltStructure {
            grid,
            table,
            cell_bounds,
            num_cells,
        }));
        self.build_time = next_mod_stamp();
    }

    /// Drop the built structure, returning the locator to its empty state.
    pub fn free_search_structure(&mut self) {
        self.built = None;
        self.build_time = 0;
    }

    /// Alias `other`'s built structure instead of rebuilding. Requires
    /// `other` to be built and this locator's dataset to have the same
    /// cell count; returns false (leaving self untouched) otherwise.
    pub fn shallow_copy(&mut self, other: &Self) -> bool {
        let Some(built) = other.built.as_ref() else {
            return false;
        };
        if built.num_cells != self.dataset.num_cells() {
            return false;
        }
        self.automatic = other.automatic;
        self.divisions = other.divisions;
        self.cells_per_bucket = other.cells_per_bucket;
        self.max_buckets = other.max_buckets;
        self.built = Some(Arc::clone(built));
        self.config_stamp = next_mod_stamp();
        self.build_time = next_mod_stamp();
        true
    }

    /// Closest point on any cell to `x`, equal to a brute-force scan of
    /// every cell. `None` when unbuilt or the dataset has no cells.
    pub fn find_closest_point(
        &self,
        x: &[f64; 3],
        scratch: &mut QueryScratch,
    ) -> Option<ClosestPoint> {
        let built = self.built.as_ref()?;
        with_engine!(self, built, |engine| engine
            .find_closest_point(x, None, scratch))
    }

    /// Closest point within `radius` of `x`, or `None` when no cell comes
    /// that close.
    pub fn find_closest_point_within_radius(
        &self,
        x: &[f64; 3],
        radius: f64,
        scratch: &mut QueryScratch,
    ) -> Option<ClosestPoint> {
        let built = self.built.as_ref()?;
        with_engine!(self, built, |engine| engine
            .find_closest_point(x, Some(radius), scratch))
    }

    /// First (smallest `t`) intersection of the segment `p1..p2` with any
    /// cell.
    pub fn intersect_with_line(
        &self,
        p1: &[f64; 3],
        p2: &[f64; 3],
        tol: f64,
        scratch: &mut QueryScratch,
    ) -> Option<LineHit> {
        let built = self.built.as_ref()?;
        with_engine!(self, built, |engine| engine
            .intersect_with_line(p1, p2, tol, scratch))
    }

    /// Every intersection along the segment, ascending in `t`. Cells are
    /// tested once each but may contribute several hits.
    pub fn intersect_with_line_all(
        &self,
        p1: &[f64; 3],
        p2: &[f64; 3],
        tol: f64,
        scratch: &mut QueryScratch,
        out: &mut Vec<LineHit>,
    ) {
        out.clear();
        let Some(built) = self.built.as_ref() else {
            return;
        };
        with_engine!(self, built, |engine| engine
            .intersect_with_line_all(p1, p2, tol, scratch, out));
    }

    /// Ids of cells whose cached bounding box overlaps `bbox`.
    pub fn find_cells_within_bounds(
        &self,
        bbox: &BoundingBox,
        scratch: &mut QueryScratch,
        out: &mut Vec<usize>,
    ) {
        out.clear();
        let Some(built) = self.built.as_ref() else {
            return;
        };
        with_engine!(self, built, |engine| engine
            .find_cells_within_bounds(bbox, scratch, out));
    }

    /// Ids of cells cut by the plane through `origin` with normal
    /// `normal`, in deterministic bin-sweep order.
    pub fn find_cells_along_plane(
        &self,
        origin: &[f64; 3],
        normal: &[f64; 3],
        tol: f64,
        scratch: &mut QueryScratch,
        out: &mut Vec<usize>,
    ) {
        out.clear();
        let Some(built) = self.built.as_ref() else {
            return;
        };
        with_engine!(self, built, |engine| engine
            .find_cells_along_plane(origin, normal, tol, scratch, out));
    }

    /// Diagnostic wireframe of the occupied bins: one box (8 corners, 12
    /// edges) per bin that holds at least one cell. Edge indices refer to
    /// the returned point list.
    pub fn generate_representation(&self) -> (Vec<[f64; 3]>, Vec<[usize; 2]>) {
        const BOX_EDGES: [[usize; 2]; 12] = [
            [0, 1],
            [2, 3],
            [4, 5],
            [6, 7],
            [0, 2],
            [1, 3],
            [4, 6],
            [5, 7],
            [0, 4],
            [1, 5],
            [2, 6],
            [3, 7],
        ];

        let mut points = Vec::new();
        let mut edges = Vec::new();
        let Some(built) = self.built.as_ref() else {
            return (points, edges);
        };

        for bin in 0..built.grid.num_bins() {
            let occupied = match &built.table {
                BinTable::Small(t) => !t.bin_cells(bin).is_empty(),
                BinTable::Large(t) => !t.bin_cells(bin).is_empty(),
            };
            if !occupied {
                continue;
            }
            let base = points.len();
            let bb = built.grid.bin_bounds(built.grid.bin_ijk(bin));
            points.extend_from_slice(&bb.corners());
            for e in &BOX_EDGES {
                edges.push([base + e[0], base + e[1]]);
            }
        }
        (points, edges)
    }
}

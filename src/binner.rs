//! Uniform-grid binning of cell bounding boxes.
//!
//! The binner decides the grid resolution from the dataset bounds and cell
//! count, then assigns every cell to each bin its bounding box overlaps.
//! The assignment is a CSR-style table built with a parallel count pass,
//! an exclusive offset scan, and a parallel fill pass driven by per-bin
//! atomic cursors. Bin tables use `u32` ids unless the dataset is large
//! enough to need `u64`.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::bounds::BoundingBox;

/// Default target average bin occupancy when sizing the grid automatically.
pub const DEFAULT_CELLS_PER_BUCKET: usize = 10;

/// Uniform grid geometry: bounds, divisions, and bin widths.
#[derive(Clone, Copy, Debug)]
pub struct Grid {
    pub bounds: BoundingBox,
    pub divisions: [usize; 3],
    pub h: [f64; 3],
}

impl Grid {
    /// Build a grid over `bounds` with the given divisions. Degenerate axes
    /// are inflated so every bin has positive width and point coordinates
    /// always map to a bin.
    pub fn new(mut bounds: BoundingBox, divisions: [usize; 3]) -> Self {
        let divisions = divisions.map(|n| n.max(1));
        let longest = (0..3).map(|i| bounds.length(i)).fold(0.0, f64::max);
        let slack = if longest > 0.0 { 1e-3 * longest } else { 0.5 };
        for i in 0..3 {
            if bounds.length(i) <= 0.0 {
                bounds.min[i] -= slack;
                bounds.max[i] += slack;
            }
        }
        let h = [
            bounds.length(0) / divisions[0] as f64,
            bounds.length(1) / divisions[1] as f64,
            bounds.length(2) / divisions[2] as f64,
        ];
        Self {
            bounds,
            divisions,
            h,
        }
    }

    pub fn num_bins(&self) -> usize {
        self.divisions[0] * self.divisions[1] * self.divisions[2]
    }

    /// Flattened bin id, x varying fastest.
    pub fn bin_index(&self, ijk: [usize; 3]) -> usize {
        ijk[0] + ijk[1] * self.divisions[0] + ijk[2] * self.divisions[0] * self.divisions[1]
    }

    pub fn bin_ijk(&self, bin: usize) -> [usize; 3] {
        let nxy = self.divisions[0] * self.divisions[1];
        let k = bin / nxy;
        let r = bin % nxy;
        [r % self.divisions[0], r / self.divisions[0], k]
    }

    fn axis_index(&self, axis: usize, v: f64) -> usize {
        if self.h[axis] <= 0.0 {
            return 0;
        }
        let i = ((v - self.bounds.min[axis]) / self.h[axis]).floor();
        (i.max(0.0) as usize).min(self.divisions[axis] - 1)
    }

    /// Bin containing a point, clamped to the grid extents for points that
    /// lie outside the bounds.
    pub fn point_ijk(&self, x: &[f64; 3]) -> [usize; 3] {
        [
            self.axis_index(0, x[0]),
            self.axis_index(1, x[1]),
            self.axis_index(2, x[2]),
        ]
    }

    /// Inclusive clamped range of bins overlapped by a box. A box touching
    /// a bin boundary registers in both adjoining bins; over-inclusion is
    /// preferred to missed candidates.
    pub fn box_ijk_range(&self, b: &BoundingBox) -> ([usize; 3], [usize; 3]) {
        (
            [
                self.axis_index(0, b.min[0]),
                self.axis_index(1, b.min[1]),
                self.axis_index(2, b.min[2]),
            ],
            [
                self.axis_index(0, b.max[0]),
                self.axis_index(1, b.max[1]),
                self.axis_index(2, b.max[2]),
            ],
        )
    }

    /// World-space box of one bin.
    pub fn bin_bounds(&self, ijk: [usize; 3]) -> BoundingBox {
        let min = [
            self.bounds.min[0] + ijk[0] as f64 * self.h[0],
            self.bounds.min[1] + ijk[1] as f64 * self.h[1],
            self.bounds.min[2] + ijk[2] as f64 * self.h[2],
        ];
        BoundingBox::new(
            min,
            [min[0] + self.h[0], min[1] + self.h[1], min[2] + self.h[2]],
        )
    }
}

/// Grid divisions for `num_cells` cells in `bounds`: total bins near
/// `num_cells / cells_per_bucket`, spread over the axes proportionally to
/// side length, product capped at `max_buckets`, every axis at least 1.
/// Degenerate axes get a single division; zero cells collapse to 1x1x1.
pub fn compute_divisions(
    bounds: &BoundingBox,
    num_cells: usize,
    cells_per_bucket: usize,
    max_buckets: usize,
) -> [usize; 3] {
    let max_buckets = max_buckets.max(1);
    let cells_per_bucket = cells_per_bucket.max(1);

    let lengths = [bounds.length(0), bounds.length(1), bounds.length(2)];
    let live: Vec<usize> = (0..3).filter(|&i| lengths[i] > 0.0).collect();
    if num_cells == 0 || live.is_empty() {
        return [1, 1, 1];
    }

    let target = (num_cells / cells_per_bucket).clamp(1, max_buckets);

    // Distribute target bins across the non-degenerate axes in proportion
    // to their side lengths: n_i = l_i * (target / prod(l))^(1/k).
    let volume: f64 = live.iter().map(|&i| lengths[i]).product();
    let factor = (target as f64 / volume).powf(1.0 / live.len() as f64);

    let mut ndivs = [1usize; 3];
    for &i in &live {
        ndivs[i] = ((lengths[i] * factor).round() as usize).max(1);
    }

    shrink_to_limit(&mut ndivs, &live, max_buckets);
    ndivs
}

/// Proportionally shrink divisions until their product fits `max_buckets`,
/// preserving the aspect ratio of the `live` axes and never dropping an
/// axis below 1.
pub(crate) fn shrink_to_limit(ndivs: &mut [usize; 3], live: &[usize], max_buckets: usize) {
    let max_buckets = max_buckets.max(1);
    loop {
        let product = ndivs[0] * ndivs[1] * ndivs[2];
        if product <= max_buckets {
            break;
        }
        let scale = (max_buckets as f64 / product as f64).powf(1.0 / live.len().max(1) as f64);
        let mut shrunk = false;
        for &i in live {
            let n = ((ndivs[i] as f64 * scale).floor() as usize).max(1);
            if n < ndivs[i] {
                ndivs[i] = n;
                shrunk = true;
            }
        }
        if !shrunk {
            // all shrinkable axes already at 1 except possibly one; trim it
            match live.iter().copied().max_by_key(|&i| ndivs[i]) {
                Some(i) if ndivs[i] > 1 => ndivs[i] -= 1,
                _ => break,
            }
        }
    }
}

/// Integer type used for bin offsets and stored cell ids. Monomorphized for
/// `u32` and `u64`; the narrow type roughly halves bin-table memory and is
/// used whenever counts permit.
pub trait BinIndex: Copy + Send + Sync + 'static {
    type Atomic: Send + Sync;

    fn from_usize(v: usize) -> Self;
    fn as_usize(self) -> usize;
    fn atomic_zeros(n: usize) -> Vec<Self::Atomic>;
    fn atomic_store(slot: &Self::Atomic, v: Self);
    fn unwrap_atomics(v: Vec<Self::Atomic>) -> Vec<Self>;
}

impl BinIndex for u32 {
    type Atomic = AtomicU32;

    fn from_usize(v: usize) -> Self {
        v as u32
    }

    fn as_usize(self) -> usize {
        self as usize
    }

    fn atomic_zeros(n: usize) -> Vec<AtomicU32> {
        (0..n).map(|_| AtomicU32::new(0)).collect()
    }

    fn atomic_store(slot: &AtomicU32, v: u32) {
        slot.store(v, Ordering::Relaxed);
    }

    fn unwrap_atomics(v: Vec<AtomicU32>) -> Vec<u32> {
        v.into_iter().map(AtomicU32::into_inner).collect()
    }
}

impl BinIndex for u64 {
    type Atomic = AtomicU64;

    fn from_usize(v: usize) -> Self {
        v as u64
    }

    fn as_usize(self) -> usize {
        self as usize
    }

    fn atomic_zeros(n: usize) -> Vec<AtomicU64> {
        (0..n).map(|_| AtomicU64::new(0)).collect()
    }

    fn atomic_store(slot: &AtomicU64, v: u64) {
        slot.store(v, Ordering::Relaxed);
    }

    fn unwrap_atomics(v: Vec<AtomicU64>) -> Vec<u64> {
        v.into_iter().map(AtomicU64::into_inner).collect()
    }
}

/// CSR bin table: `offsets[b]..offsets[b+1]` indexes the cell ids whose
/// bounding box overlaps bin `b`. Immutable once built.
#[derive(Clone, Debug)]
pub struct CsrTable<I> {
    pub offsets: Vec<I>,
    pub cell_ids: Vec<I>,
}

impl<I: BinIndex> CsrTable<I> {
    pub fn bin_cells(&self, bin: usize) -> &[I] {
        let lo = self.offsets[bin].as_usize();
        let hi = self.offsets[bin + 1].as_usize();
        &self.cell_ids[lo..hi]
    }

    pub fn num_entries(&self) -> usize {
        self.cell_ids.len()
    }
}

/// Bin table with the id width chosen at build time.
#[derive(Clone, Debug)]
pub enum BinTable {
    Small(CsrTable<u32>),
    Large(CsrTable<u64>),
}

impl BinTable {
    pub fn large_ids(&self) -> bool {
        matches!(self, Self::Large(_))
    }

    pub fn num_entries(&self) -> usize {
        match self {
            Self::Small(t) => t.num_entries(),
            Self::Large(t) => t.num_entries(),
        }
    }
}

fn for_each_overlapped_bin(grid: &Grid, b: &BoundingBox, mut f: impl FnMut(usize)) {
    let (lo, hi) = grid.box_ijk_range(b);
    for k in lo[2]..=hi[2] {
        for j in lo[1]..=hi[1] {
            for i in lo[0]..=hi[0] {
                f(grid.bin_index([i, j, k]));
            }
        }
    }
}

/// Assign every cell to the bins its cached bounding box overlaps.
///
/// Count pass and fill pass run in parallel over cells; the exclusive scan
/// between them is serial. Cells with inverted or NaN bounds contribute to
/// no bin. The rayon fork-join barrier orders the three phases.
pub fn partition(bounds_cache: &[BoundingBox], grid: &Grid) -> BinTable {
    let num_bins = grid.num_bins();

    let counts: Vec<AtomicUsize> = (0..num_bins).map(|_| AtomicUsize::new(0)).collect();
    bounds_cache.par_iter().for_each(|b| {
        if b.is_valid() {
            for_each_overlapped_bin(grid, b, |bin| {
                counts[bin].fetch_add(1, Ordering::Relaxed);
            });
        }
    });

    let counts: Vec<usize> = counts.into_iter().map(AtomicUsize::into_inner).collect();
    let total: usize = counts.iter().sum();

    let large = bounds_cache.len() >= u32::MAX as usize
        || num_bins >= u32::MAX as usize
        || total >= u32::MAX as usize;
    if large {
        BinTable::Large(fill::<u64>(bounds_cache, grid, &counts, total))
    } else {
        BinTable::Small(fill::<u32>(bounds_cache, grid, &counts, total))
    }
}

fn fill<I: BinIndex>(
    bounds_cache: &[BoundingBox],
    grid: &Grid,
    counts: &[usize],
    total: usize,
) -> CsrTable<I> {
    // exclusive scan
    let mut offsets = Vec::with_capacity(counts.len() + 1);
    let mut running = 0usize;
    for &c in counts {
        offsets.push(I::from_usize(running));
        running += c;
    }
    offsets.push(I::from_usize(running));

    // per-bin write cursors start at each bin's offset; fetch_add claims a
    // slot without locking
    let cursors: Vec<AtomicUsize> = offsets[..counts.len()]
        .iter()
        .map(|o| AtomicUsize::new(o.as_usize()))
        .collect();
    let slots = I::atomic_zeros(total);

    bounds_cache.par_iter().enumerate().for_each(|(cell_id, b)| {
        if b.is_valid() {
            for_each_overlapped_bin(grid, b, |bin| {
                let s = cursors[bin].fetch_add(1, Ordering::Relaxed);
                I::atomic_store(&slots[s], I::from_usize(cell_id));
            });
        }
    });

    CsrTable {
        offsets,
        cell_ids: I::unwrap_atomics(slots),
    }
}

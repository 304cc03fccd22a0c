//! # cellbin
//!
//! `cellbin` is a Rust library for fast spatial queries over unstructured
//! cell collections. It bins every cell's bounding box into a uniform grid
//! in one parallel pass, then answers closest-point, line-intersection,
//! box-overlap, and plane-cut queries by walking only the bins a query can
//! touch.
//!
//! ## Features
//!
//! - **Static bulk build**: the whole structure is built in one shot with
//!   `rayon`, not incrementally; rebuilds are cheap enough to redo after
//!   dataset edits.
//! - **Immutable queries**: a built locator is never mutated by queries, so
//!   any number of threads can query it concurrently, each with its own
//!   [`QueryScratch`].
//! - **Compact bin table**: cell ids are stored as `u32` whenever the input
//!   fits, halving memory for the common case.
//! - **Pluggable geometry**: any type implementing [`DataSet`] can be
//!   indexed; [`TriangleMesh`] ships as the reference implementation.
//!
//! ## Main Interface
//!
//! The primary entry point is [`StaticCellLocator`]: construct it over an
//! `Arc`-shared dataset, call [`StaticCellLocator::build_locator`], then
//! query.

mod binner;
mod bounds;
mod dataset;
mod locator;
mod query;
mod trimesh;

pub use binner::compute_divisions;
pub use binner::BinTable;
pub use binner::CsrTable;
pub use binner::Grid;
pub use binner::DEFAULT_CELLS_PER_BUCKET;
pub use bounds::BoundingBox;
pub use dataset::next_mod_stamp;
pub use dataset::CellClosest;
pub use dataset::DataSet;
pub use dataset::SegmentHit;
pub use locator::StaticCellLocator;
pub use query::ClosestPoint;
pub use query::LineHit;
pub use query::QueryScratch;
pub use trimesh::closest_point_on_triangle;
pub use trimesh::segment_triangle_intersect;
pub use trimesh::TriangleMesh;

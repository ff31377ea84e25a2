//! The slicing algebra.
//!
//! User-facing fancy indexers — integers, floats on a scale, labels,
//! datetimes on a time grid — are normalized into canonical per-dimension
//! integer bounds, and from there mapped onto the tile grid of a virtual
//! array in both directions (read gather / write scatter).
//!
//! The pieces:
//!  - [`Bounds`]: a half-open N-dimensional region, the canonical form.
//!  - [`Indexer`] / [`IndexExpr`]: the fancy indexers and their
//!    normalization into a [`SubsetSpec`].
//!  - [`TilePlan`]: the lazy, deterministic enumeration of the tiles a
//!    subset touches, with per-tile inner bounds and outer placements.

mod bounds;
mod indexer;
mod tile_plan;

pub use bounds::{
    Bounds, BoundsOutOfShapeError, ContiguousSpans, IncompatibleDimensionalityError,
};
pub use indexer::{
    DimensionDescription, DimensionSelection, IndexError, IndexExpr, Indexer, SubsetSpec,
};
pub use tile_plan::{TilePlan, TilePlanIterator, TileSlot};

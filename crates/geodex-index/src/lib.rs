//! # geodex-index
//!
//! Bounding volumes and a spatial-temporal index for geo-referenced tiles.
//!
//! Every source file is registered with a [`BoundingVolume`] spanning
//! `(x, y, t)`. The [`SpatialIndex`] answers "which entries overlap this
//! volume" with an R-tree candidate search followed by an exact half-open
//! intersection test.
//!
//! ## Example
//!
//! ```
//! use geodex_index::{BoundingVolume, SpatialIndex};
//!
//! let mut index = SpatialIndex::new();
//! index.insert(0, BoundingVolume::spatial(0.0, 1.0, 0.0, 1.0)?, "a.tif")?;
//! index.insert(1, BoundingVolume::spatial(1.0, 2.0, 0.0, 1.0)?, "b.tif")?;
//!
//! let hits = index.query(&BoundingVolume::spatial(0.5, 1.5, 0.25, 0.75)?);
//! assert_eq!(hits.len(), 2);
//! # Ok::<(), geodex_index::GeoIndexError>(())
//! ```

mod bounds;
mod error;
mod index;

pub use bounds::{BoundingVolume, TIME_MAX, TIME_MIN};
pub use error::GeoIndexError;
pub use index::{IndexEntry, SpatialIndex};

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, GeoIndexError>;

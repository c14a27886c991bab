//! # geodex-raster
//!
//! Raster access for geodex: opening GeoTIFF sources, reconciling them to a
//! common reference system and resolution, and compositing the sources hit
//! by a query into a single [`Sample`].
//!
//! ## Overview
//!
//! - [`GeoTiffReader`] opens a file's header; pixels are decoded per window,
//!   touching only the strips or tiles the window overlaps.
//! - [`SourceCache`] keeps a bounded number of handles open (LRU).
//! - [`FileResolver`] settles the [`TargetGrid`] from the first registered file
//!   and resamples sources onto query grids through a [`WarpedView`].
//! - [`Compositor`] paints windows in order, later sources winning.
//! - [`SampleTransform`]s post-process samples ([`NodataCheck`], [`RemapClasses`]).
//!
//! ## Example
//!
//! ```no_run
//! use geodex_index::BoundingVolume;
//! use geodex_raster::{CachePolicy, Compositor, FileResolver, GeoTiffReader, PixelGrid, SourceCache};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let resolver = FileResolver::new(SourceCache::new(CachePolicy::default(), Arc::new(GeoTiffReader)));
//! let path = Path::new("tiles/m_3807537_ne_18_1_20130924.tif");
//! resolver.register(path)?;
//!
//! let target = resolver.target().expect("registered");
//! let query = BoundingVolume::spatial(0.0, 256.0, 0.0, 256.0).expect("valid");
//! let grid = PixelGrid::for_query(target.crs, &query, target.res);
//! let mosaic = Compositor::default().composite(&resolver, &grid, [path]);
//! # Ok::<(), geodex_raster::RasterError>(())
//! ```

mod cache;
mod compositor;
mod crs;
mod error;
pub mod geotiff;
mod resolver;
mod sample;
mod source;
mod transform;
mod transforms;
mod warp;

pub use cache::{CachePolicy, CacheStats, SourceCache, DEFAULT_CACHE_CAPACITY};
pub use compositor::{Compositor, Mosaic};
pub use crs::{Crs, Reprojector};
pub use error::RasterError;
pub use geotiff::GeoTiffReader;
pub use resolver::{FileResolver, TargetGrid};
pub use sample::{Sample, SampleField};
pub use source::{PixelReader, PixelRect, RasterMeta, RasterReader, RasterSource};
pub use transform::GeoTransform;
pub use transforms::{Compose, NodataCheck, RemapClasses, SampleTransform};
pub use warp::{footprint, Extent, PixelGrid, WarpedView, Window};

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;

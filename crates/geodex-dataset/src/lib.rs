//! # geodex-dataset
//!
//! Directories of geo-referenced raster tiles exposed as queryable datasets.
//!
//! A [`RasterDataset`] scans its root once at construction, registering every
//! matching file in a spatial-temporal index. Queries return a [`Sample`]
//! composited from all files overlapping the query volume. Datasets compose
//! with [`intersect`] and [`unite`] into a [`GeoDataset`] tree.
//!
//! ## Example
//!
//! ```no_run
//! use geodex_dataset::{intersect, RasterDataset};
//! use geodex_index::BoundingVolume;
//!
//! let naip = RasterDataset::builder("data").categories(["naip"]).build()?;
//! let lc = RasterDataset::builder("data")
//!     .categories(["lc"])
//!     .is_image(false)
//!     .crs(naip.crs())
//!     .res(naip.res())
//!     .build()?;
//!
//! let both = intersect(naip, lc)?;
//! let b = both.bounds();
//! let sample = both.get(&BoundingVolume::spatial(b.minx(), b.minx() + 64.0, b.miny(), b.miny() + 64.0)?)?;
//! assert!(sample.image.is_some() && sample.mask.is_some());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! [`Sample`]: geodex_raster::Sample

mod composite;
mod config;
mod error;
mod labels;
mod raster;
mod scan;
mod verify;

pub use composite::{intersect, unite, GeoDataset};
pub use config::{Catalog, DatasetConfig};
pub use error::{ConfigError, DatasetError, FetchError};
pub use labels::{LabelConfig, LabeledDataset, LabeledDatasetBuilder};
pub use raster::{RasterDataset, RasterDatasetBuilder};
pub use scan::{
    parse_date_range, FilenameGlob, FilenameRegex, ScanOptions, ScanReport, SkippedFile,
};
pub use verify::{
    sha256_file, ArchiveSpec, ArchiveVerifier, Fetcher, HttpFetcher, NoVerify, Verifier,
};

/// Result type for dataset operations.
pub type Result<T> = std::result::Result<T, DatasetError>;

//! Error types for datasets.

use geodex_index::{BoundingVolume, GeoIndexError};
use geodex_raster::{Crs, RasterError};
use std::path::PathBuf;
use thiserror::Error;

/// Invalid or contradictory dataset settings, reported at construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Two options cannot be used together.
    #[error("Incompatible options `{first}` and `{second}`: {message}")]
    IncompatibleOptions {
        first: &'static str,
        second: &'static str,
        message: String,
    },

    /// Category not present in the dataset catalog.
    #[error("Unknown category `{category}` (known: {})", .known.join(", "))]
    UnknownCategory { category: String, known: Vec<String> },

    /// An option has a value outside its domain.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Composed datasets must share a reference system.
    #[error("Datasets have different CRS: {left} vs {right}")]
    CrsMismatch { left: Crs, right: Crs },

    /// Composed datasets must share a resolution.
    #[error("Datasets have different resolutions: {left} vs {right}")]
    ResolutionMismatch { left: f64, right: f64 },

    /// Intersected datasets do not overlap.
    #[error("Datasets do not overlap: {left} and {right}")]
    NoOverlap {
        left: BoundingVolume,
        right: BoundingVolume,
    },
}

/// Failures downloading or unpacking dataset archives.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request error.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("Failed to download {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    /// Archive format the fetcher cannot unpack.
    #[error("Unsupported archive format: {}", .0.display())]
    UnsupportedArchive(PathBuf),

    /// Zip archive could not be read.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error writing or extracting.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when building or querying a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Nothing usable under the dataset root.
    #[error("Dataset not found in `root={}`: {reason}", .root.display())]
    NotFound { root: PathBuf, reason: String },

    /// A file failed its integrity check.
    #[error("Dataset found, but corrupted: {} failed checksum", .path.display())]
    Corrupted { path: PathBuf },

    /// Index construction error.
    #[error("Index error: {0}")]
    Index(#[from] GeoIndexError),

    /// The query intersected no readable source.
    #[error("Query {query} not found in index")]
    QueryNotFound { query: BoundingVolume },

    /// Raster access error.
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DatasetError {
    /// True for a query miss, which composite datasets tolerate.
    pub fn is_query_miss(&self) -> bool {
        matches!(self, DatasetError::QueryNotFound { .. })
    }
}

//! Error types for raster access.

use crate::Crs;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when opening, reprojecting or reading rasters.
#[derive(Debug, Error)]
pub enum RasterError {
    /// I/O error reading a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding or encoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing or malformed georeferencing.
    #[error("Invalid GeoTIFF {path}: {reason}")]
    InvalidGeoTiff {
        /// File being read.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// Unsupported sample type in the TIFF file.
    #[error("Unsupported TIFF data type: {0}")]
    UnsupportedDataType(String),

    /// CRS string could not be parsed.
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    /// No transformation between two reference systems, or it produced
    /// non-finite coordinates.
    #[error("Cannot reproject from {from} to {to}: {reason}")]
    Reprojection {
        /// Source CRS.
        from: Crs,
        /// Target CRS.
        to: Crs,
        /// Why reprojection failed.
        reason: String,
    },

    /// Array shapes disagree.
    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        found: Vec<usize>,
    },

    /// Band count the GeoTIFF writer cannot encode.
    #[error("Cannot write {0} bands")]
    UnsupportedBandCount(usize),
}

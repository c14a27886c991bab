//! Error types for the index crate.

use thiserror::Error;

/// Errors that can occur when building or querying an index.
#[derive(Debug, Error)]
pub enum GeoIndexError {
    /// An entry with this key already exists.
    #[error("Duplicate index key: {key}")]
    DuplicateKey {
        /// The colliding key.
        key: u64,
    },

    /// Bounds are inverted or not a number.
    #[error("Invalid bounding volume: {0}")]
    InvalidVolume(String),
}

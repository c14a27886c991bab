//! Metric declarations for geodex.
//!
//! Every metric emitted by the indexing and sample-assembly crates is declared
//! here as a [`Metric`] constant so names are never typed twice. The
//! `metrics` crate is re-exported; install any recorder in the host process
//! to collect the values.
//!
//! # Example
//!
//! ```rust
//! use geodex_metrics::metric_defs;
//!
//! metrics::counter!(metric_defs::FILES_INDEXED.name).increment(1);
//! metrics::counter!(
//!     metric_defs::FILES_SKIPPED.name,
//!     "reason" => metric_defs::skip_reason::BOUNDS
//! )
//! .increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// A metric name with the metadata handed to the recorder.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Unit,
}

impl Metric {
    pub const fn counter(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description,
            unit: Unit::Count,
        }
    }

    pub const fn gauge(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description,
            unit: Unit::Count,
        }
    }

    pub const fn histogram(name: &'static str, description: &'static str, unit: Unit) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description,
            unit,
        }
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Gauge => describe_gauge!(self.name, self.unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.description),
        }
    }
}

/// All metric definitions.
pub mod metric_defs {
    use super::{Metric, Unit};

    // Directory scan

    pub const FILES_INDEXED: Metric =
        Metric::counter("geodex.scan.files_indexed", "Files inserted into a dataset index");

    /// Files matched by the name filters but left out of the index, labelled
    /// with a [`skip_reason`].
    pub const FILES_SKIPPED: Metric = Metric::counter(
        "geodex.scan.files_skipped",
        "Files skipped during a directory scan, by reason (footprint, bounds)",
    );

    /// Values of the `reason` label on [`FILES_SKIPPED`].
    pub mod skip_reason {
        /// The header could not be read or reprojected.
        pub const FOOTPRINT: &str = "footprint";
        /// The footprint or date range is not a valid volume.
        pub const BOUNDS: &str = "bounds";

        pub const ALL: &[&str] = &[FOOTPRINT, BOUNDS];
    }

    pub const SCAN_DURATION: Metric = Metric::histogram(
        "geodex.scan.duration_ms",
        "Directory scan time in milliseconds",
        Unit::Milliseconds,
    );

    // Queries

    pub const QUERIES: Metric =
        Metric::counter("geodex.query.count", "Queries answered with a sample");

    pub const QUERY_MISSES: Metric = Metric::counter(
        "geodex.query.misses",
        "Queries that intersected no readable source",
    );

    pub const QUERY_SOURCES: Metric = Metric::histogram(
        "geodex.query.sources",
        "Sources painted into one sample",
        Unit::Count,
    );

    pub const SOURCE_READ_FAILURES: Metric = Metric::counter(
        "geodex.query.read_failures",
        "Sources that failed to read at query time",
    );

    pub const QUERY_DURATION: Metric = Metric::histogram(
        "geodex.query.duration_us",
        "Sample assembly time in microseconds",
        Unit::Microseconds,
    );

    // Handle cache

    pub const CACHE_HITS: Metric = Metric::counter("geodex.cache.hits", "Raster handle cache hits");

    /// A miss opens the file.
    pub const CACHE_MISSES: Metric =
        Metric::counter("geodex.cache.misses", "Raster handle cache misses");

    pub const CACHE_EVICTIONS: Metric = Metric::counter(
        "geodex.cache.evictions",
        "Raster handles evicted from the cache",
    );

    pub const CACHE_OPEN_HANDLES: Metric = Metric::gauge(
        "geodex.cache.open_handles",
        "Raster handles currently held by the cache",
    );

    pub const ALL: &[&Metric] = &[
        &FILES_INDEXED,
        &FILES_SKIPPED,
        &SCAN_DURATION,
        &QUERIES,
        &QUERY_MISSES,
        &QUERY_SOURCES,
        &SOURCE_READ_FAILURES,
        &QUERY_DURATION,
        &CACHE_HITS,
        &CACHE_MISSES,
        &CACHE_EVICTIONS,
        &CACHE_OPEN_HANDLES,
    ];
}

/// Register descriptions for every metric in [`metric_defs::ALL`].
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

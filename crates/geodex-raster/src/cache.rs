//! Bounded cache of open raster handles.

use crate::source::{RasterReader, RasterSource};
use crate::Result;
use geodex_metrics::metric_defs;
use lru::LruCache;
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Default number of handles kept open.
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// How many handles a dataset keeps open between queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Open the file on every access.
    Disabled,
    /// Keep up to this many handles, evicting the least recently used.
    Bounded(NonZeroUsize),
}

impl CachePolicy {
    /// Bounded policy, or `Disabled` for a capacity of zero.
    pub fn with_capacity(capacity: usize) -> Self {
        NonZeroUsize::new(capacity).map_or(CachePolicy::Disabled, CachePolicy::Bounded)
    }

    pub fn capacity(&self) -> usize {
        match self {
            CachePolicy::Disabled => 0,
            CachePolicy::Bounded(n) => n.get(),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

/// Counters describing cache behaviour since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub opens: u64,
    pub evictions: u64,
}

struct CacheState {
    handles: Option<LruCache<PathBuf, Arc<RasterSource>>>,
    stats: CacheStats,
}

/// LRU cache of [`RasterSource`] handles keyed by path.
///
/// Handles hold headers and open decoders, never decoded pixels, so memory
/// is bounded by the capacity. Evicting a handle closes its file once no
/// caller still holds the `Arc`.
pub struct SourceCache {
    policy: CachePolicy,
    reader: Arc<dyn RasterReader>,
    state: Mutex<CacheState>,
}

impl fmt::Debug for SourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCache")
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .finish()
    }
}

impl SourceCache {
    pub fn new(policy: CachePolicy, reader: Arc<dyn RasterReader>) -> Self {
        let handles = match policy {
            CachePolicy::Disabled => None,
            CachePolicy::Bounded(capacity) => Some(LruCache::new(capacity)),
        };
        Self {
            policy,
            reader,
            state: Mutex::new(CacheState {
                handles,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Get the handle for `path`, opening it on a miss.
    pub fn get(&self, path: &Path) -> Result<Arc<RasterSource>> {
        let mut state = self.state.lock();

        if let Some(handles) = state.handles.as_mut() {
            if let Some(source) = handles.get(path) {
                let source = Arc::clone(source);
                state.stats.hits += 1;
                metrics::counter!(metric_defs::CACHE_HITS.name).increment(1);
                return Ok(source);
            }
        }

        state.stats.misses += 1;
        metrics::counter!(metric_defs::CACHE_MISSES.name).increment(1);

        let source = Arc::new(self.reader.open(path)?);
        state.stats.opens += 1;
        trace!(path = %path.display(), "Opened raster handle");

        let mut evicted = false;
        let mut open = 0;
        if let Some(handles) = state.handles.as_mut() {
            if let Some((old, _)) = handles.push(path.to_path_buf(), Arc::clone(&source)) {
                trace!(path = %old.display(), "Evicted raster handle");
                evicted = true;
            }
            open = handles.len();
        }
        if evicted {
            state.stats.evictions += 1;
            metrics::counter!(metric_defs::CACHE_EVICTIONS.name).increment(1);
        }
        metrics::gauge!(metric_defs::CACHE_OPEN_HANDLES.name).set(open as f64);

        Ok(source)
    }

    /// Check whether `path` is held, without touching recency.
    pub fn contains(&self, path: &Path) -> bool {
        self.state
            .lock()
            .handles
            .as_ref()
            .is_some_and(|handles| handles.contains(path))
    }

    /// Number of handles currently held.
    pub fn len(&self) -> usize {
        self.state.lock().handles.as_ref().map_or(0, |handles| handles.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Drop all held handles.
    pub fn clear(&self) {
        if let Some(handles) = self.state.lock().handles.as_mut() {
            handles.clear();
        }
        metrics::gauge!(metric_defs::CACHE_OPEN_HANDLES.name).set(0.0);
    }
}

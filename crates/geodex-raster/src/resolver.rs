//! Resolving index hits to readable, reprojected sources.

use crate::cache::SourceCache;
use crate::warp::{self, Extent, PixelGrid, WarpedView, Window};
use crate::{Crs, Result};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// The common grid every source is reconciled to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetGrid {
    pub crs: Crs,
    /// Pixel size in target CRS units.
    pub res: f64,
}

/// Opens sources through a [`SourceCache`] and presents them in the
/// target grid.
///
/// The target grid is settled once. Explicit settings win; anything left
/// unset is taken from the first file that registers successfully.
#[derive(Debug)]
pub struct FileResolver {
    cache: SourceCache,
    crs: Option<Crs>,
    res: Option<f64>,
    target: OnceLock<TargetGrid>,
}

impl FileResolver {
    pub fn new(cache: SourceCache) -> Self {
        Self {
            cache,
            crs: None,
            res: None,
            target: OnceLock::new(),
        }
    }

    /// Fix the target CRS instead of taking it from the first file.
    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    /// Fix the target resolution instead of deriving it from the first file.
    pub fn with_res(mut self, res: f64) -> Self {
        self.res = Some(res);
        self
    }

    /// The settled target grid, `None` until a file has registered.
    pub fn target(&self) -> Option<TargetGrid> {
        self.target.get().copied()
    }

    pub fn cache(&self) -> &SourceCache {
        &self.cache
    }

    /// Open `path` and compute its footprint in the target CRS.
    ///
    /// The first successful call settles the target grid. A file whose
    /// extent cannot be reprojected fails without affecting the target.
    pub fn register(&self, path: &Path) -> Result<Extent> {
        let source = self.cache.get(path)?;
        let meta = source.meta();
        let crs = self
            .target()
            .map(|t| t.crs)
            .or(self.crs)
            .unwrap_or(meta.crs);
        let footprint = warp::footprint(meta, crs)?;

        let target = self.target.get_or_init(|| {
            let res = self
                .res
                .unwrap_or_else(|| (footprint.1 - footprint.0) / meta.width as f64);
            debug!(crs = %crs, res, path = %path.display(), "Target grid settled");
            TargetGrid { crs, res }
        });
        if target.crs != crs {
            // Another registration settled the target first.
            return warp::footprint(meta, target.crs);
        }

        Ok(footprint)
    }

    /// Resample the part of `path` that covers `grid`.
    pub fn read_window(&self, path: &Path, grid: &PixelGrid) -> Result<Option<Window>> {
        let source = self.cache.get(path)?;
        WarpedView::new(source, grid.crs)?.read(grid)
    }
}

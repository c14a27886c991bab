//! Painting resolved windows into one output array.

use crate::resolver::FileResolver;
use crate::warp::{PixelGrid, Window};
use crate::{Crs, GeoTransform};
use geodex_metrics::metric_defs;
use ndarray::{s, Array3, Zip};
use std::path::Path;
use tracing::{trace, warn};

/// The merged pixels for one query.
#[derive(Debug, Clone)]
pub struct Mosaic {
    /// `(bands, rows, cols)` on the output grid.
    pub data: Array3<f32>,
    pub crs: Crs,
    pub transform: GeoTransform,
    /// Sources that contributed at least one pixel.
    pub sources: usize,
}

/// Merges sources onto a grid, later sources overwriting earlier ones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compositor {
    nodata: f32,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Compositor {
    /// Compositor whose uncovered pixels hold `nodata`.
    pub fn new(nodata: f32) -> Self {
        Self { nodata }
    }

    pub fn nodata(&self) -> f32 {
        self.nodata
    }

    /// Read every path onto `grid` and paint them in the given order.
    ///
    /// Sources that fail to read are logged and skipped. Returns `None` when
    /// nothing was painted.
    pub fn composite<'a, I>(&self, resolver: &FileResolver, grid: &PixelGrid, paths: I) -> Option<Mosaic>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut windows = Vec::new();
        for path in paths {
            match resolver.read_window(path, grid) {
                Ok(Some(window)) => windows.push(window),
                Ok(None) => trace!(path = %path.display(), "Source has no pixels in query"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read source, skipping");
                    metrics::counter!(metric_defs::SOURCE_READ_FAILURES.name).increment(1);
                }
            }
        }
        self.paint(grid, &windows)
    }

    /// Paint pre-read windows in order.
    pub fn paint(&self, grid: &PixelGrid, windows: &[Window]) -> Option<Mosaic> {
        let bands = windows.iter().map(|w| w.data.dim().0).max()?;
        let mut data = Array3::from_elem((bands, grid.rows, grid.cols), self.nodata);

        for window in windows {
            let (window_bands, rows, cols) = window.data.dim();
            let rows_span = window.row_off..window.row_off + rows;
            let cols_span = window.col_off..window.col_off + cols;
            for band in 0..window_bands {
                let mut target = data.slice_mut(s![band, rows_span.clone(), cols_span.clone()]);
                Zip::from(&mut target)
                    .and(window.data.slice(s![band, .., ..]))
                    .and(&window.valid)
                    .for_each(|out, &value, &valid| {
                        if valid {
                            *out = value;
                        }
                    });
            }
        }

        Some(Mosaic {
            data,
            crs: grid.crs,
            transform: grid.transform,
            sources: windows.len(),
        })
    }
}

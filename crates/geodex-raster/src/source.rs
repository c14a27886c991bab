//! Opened raster resources.

use crate::{Crs, GeoTransform, RasterError, Result};
use ndarray::{s, Array3};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};

/// Header information read when a raster is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMeta {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Number of bands.
    pub bands: usize,
    /// Native coordinate reference system.
    pub crs: Crs,
    /// Native pixel-to-map transform.
    pub transform: GeoTransform,
    /// Pixels equal to this value carry no observation.
    pub nodata: Option<f32>,
}

impl RasterMeta {
    /// Native bounds `(minx, maxx, miny, maxy)`.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.width, self.height)
    }

    /// Native pixel size `(x, y)`.
    pub fn resolution(&self) -> (f64, f64) {
        self.transform.resolution()
    }

    /// The rectangle covering every pixel.
    pub fn full_rect(&self) -> PixelRect {
        PixelRect::new(0, 0, self.height, self.width)
    }
}

/// A block of pixels in a raster's native grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub row_off: usize,
    pub col_off: usize,
    pub rows: usize,
    pub cols: usize,
}

impl PixelRect {
    pub fn new(row_off: usize, col_off: usize, rows: usize, cols: usize) -> Self {
        Self {
            row_off,
            col_off,
            rows,
            cols,
        }
    }

    /// Smallest rectangle holding the inclusive corners `(row, col)`.
    pub fn spanning(min: (usize, usize), max: (usize, usize)) -> Self {
        Self::new(min.0, min.1, max.0 + 1 - min.0, max.1 + 1 - min.1)
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.rows
    }

    pub fn col_end(&self) -> usize {
        self.col_off + self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

/// Decodes windows of one raster's pixels.
pub trait PixelReader: Send {
    /// Pixels `(bands, rect.rows, rect.cols)` of a rectangle already checked
    /// to lie inside the raster.
    fn read_window(&mut self, rect: PixelRect) -> Result<Array3<f32>>;
}

enum Pixels {
    Reader(Mutex<Box<dyn PixelReader>>),
    Memory(Array3<f32>),
}

/// An open raster handle.
///
/// Opening reads only the header. Pixel data is decoded per window on every
/// [`RasterSource::read_window`] call and never retained, so a handle costs
/// its header plus whatever the reader keeps open. A failed read leaves the
/// handle usable.
pub struct RasterSource {
    path: PathBuf,
    meta: RasterMeta,
    pixels: Pixels,
}

impl fmt::Debug for RasterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterSource")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .field("in_memory", &matches!(self.pixels, Pixels::Memory(_)))
            .finish()
    }
}

impl RasterSource {
    /// Create a handle that decodes through `reader`.
    pub fn new(path: impl Into<PathBuf>, meta: RasterMeta, reader: Box<dyn PixelReader>) -> Self {
        Self {
            path: path.into(),
            meta,
            pixels: Pixels::Reader(Mutex::new(reader)),
        }
    }

    /// Create a handle around pixels that are already in memory.
    pub fn in_memory(path: impl Into<PathBuf>, meta: RasterMeta, pixels: Array3<f32>) -> Self {
        Self {
            path: path.into(),
            meta,
            pixels: Pixels::Memory(pixels),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &RasterMeta {
        &self.meta
    }

    /// Pixels `(bands, rows, cols)` of `rect`.
    pub fn read_window(&self, rect: PixelRect) -> Result<Array3<f32>> {
        if rect.row_end() > self.meta.height || rect.col_end() > self.meta.width {
            return Err(RasterError::ShapeMismatch {
                expected: vec![self.meta.height, self.meta.width],
                found: vec![rect.row_end(), rect.col_end()],
            });
        }

        let data = match &self.pixels {
            Pixels::Memory(pixels) => pixels
                .slice(s![.., rect.row_off..rect.row_end(), rect.col_off..rect.col_end()])
                .to_owned(),
            Pixels::Reader(reader) => reader.lock().read_window(rect)?,
        };

        let expected = (self.meta.bands, rect.rows, rect.cols);
        if data.dim() != expected {
            return Err(RasterError::ShapeMismatch {
                expected: vec![expected.0, expected.1, expected.2],
                found: data.shape().to_vec(),
            });
        }
        Ok(data)
    }

    /// Every pixel of the raster.
    pub fn read_all(&self) -> Result<Array3<f32>> {
        self.read_window(self.meta.full_rect())
    }
}

/// Opens raster files.
///
/// The default implementation is [`crate::GeoTiffReader`]; tests and
/// alternative formats plug in their own.
pub trait RasterReader: Send + Sync {
    /// Open `path`, reading at least its header.
    fn open(&self, path: &Path) -> Result<RasterSource>;
}

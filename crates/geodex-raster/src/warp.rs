//! Presenting a source in a target reference system.

use crate::source::{PixelRect, RasterMeta, RasterSource};
use crate::{Crs, GeoTransform, Reprojector, Result};
use geodex_index::BoundingVolume;
use ndarray::{Array2, Array3};
use std::sync::Arc;

/// Relative slack when converting an extent to a whole number of pixels.
const PIXEL_COUNT_EPSILON: f64 = 1e-9;

/// Map-space bounds `(minx, maxx, miny, maxy)`.
pub type Extent = (f64, f64, f64, f64);

/// Bounds of a source's native extent expressed in `target`.
pub fn footprint(meta: &RasterMeta, target: Crs) -> Result<Extent> {
    let (minx, maxx, miny, maxy) = meta.bounds();
    Reprojector::new(meta.crs, target)?.transform_bounds(minx, maxx, miny, maxy)
}

/// A north-up output grid in the target reference system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelGrid {
    pub crs: Crs,
    pub transform: GeoTransform,
    pub cols: usize,
    pub rows: usize,
}

impl PixelGrid {
    /// The grid covering the spatial part of `query` at `res`.
    ///
    /// Each dimension is `max(1, floor(extent / res))` pixels and the origin
    /// is the query's top-left corner.
    pub fn for_query(crs: Crs, query: &BoundingVolume, res: f64) -> Self {
        let count = |extent: f64| {
            let n = extent / res;
            ((n + n.abs() * PIXEL_COUNT_EPSILON).floor() as usize).max(1)
        };
        Self {
            crs,
            transform: GeoTransform::north_up(query.minx(), query.maxy(), res, res),
            cols: count(query.width()),
            rows: count(query.height()),
        }
    }

    pub fn extent(&self) -> Extent {
        self.transform.bounds(self.cols, self.rows)
    }
}

/// Pixels of one source resampled onto part of a [`PixelGrid`].
#[derive(Debug, Clone)]
pub struct Window {
    /// Values `(bands, rows, cols)`.
    pub data: Array3<f32>,
    /// `true` where the source has an observation.
    pub valid: Array2<bool>,
    /// Offset of the window in the grid.
    pub row_off: usize,
    pub col_off: usize,
    /// Transform of the window's top-left pixel.
    pub transform: GeoTransform,
}

/// A source viewed through a reprojection into a target CRS.
#[derive(Debug, Clone)]
pub struct WarpedView {
    source: Arc<RasterSource>,
    to_native: Reprojector,
    footprint: Extent,
}

impl WarpedView {
    pub fn new(source: Arc<RasterSource>, target: Crs) -> Result<Self> {
        let footprint = footprint(source.meta(), target)?;
        let to_native = Reprojector::new(target, source.meta().crs)?;
        Ok(Self {
            source,
            to_native,
            footprint,
        })
    }

    pub fn source(&self) -> &RasterSource {
        &self.source
    }

    /// Bounds of the source in the target CRS.
    pub fn footprint(&self) -> Extent {
        self.footprint
    }

    /// Nearest-neighbour resample onto `grid`, sampling at pixel centres.
    ///
    /// Only the block of source pixels under the grid is decoded. Returns
    /// `None` when no grid pixel lands on an observed source pixel.
    pub fn read(&self, grid: &PixelGrid) -> Result<Option<Window>> {
        let Some((row_range, col_range)) = self.covered_cells(grid) else {
            return Ok(None);
        };

        let meta = self.source.meta();
        let Some(to_pixel) = meta.transform.inverse() else {
            return Ok(None);
        };

        // (grid row, grid col) -> (source row, source col)
        let mut hits = Vec::new();
        let mut min = (usize::MAX, usize::MAX);
        let mut max = (0, 0);
        for (r, row) in row_range.clone().enumerate() {
            for (c, col) in col_range.clone().enumerate() {
                let (x, y) = grid.transform.apply(col as f64 + 0.5, row as f64 + 0.5);
                // Centres outside the projection's domain are simply not covered.
                let Ok((nx, ny)) = self.to_native.transform(x, y) else {
                    continue;
                };
                let (fc, fr) = to_pixel.apply(nx, ny);
                if fc < 0.0 || fr < 0.0 {
                    continue;
                }
                let (sc, sr) = (fc.floor() as usize, fr.floor() as usize);
                if sc >= meta.width || sr >= meta.height {
                    continue;
                }
                min = (min.0.min(sr), min.1.min(sc));
                max = (max.0.max(sr), max.1.max(sc));
                hits.push((r, c, sr, sc));
            }
        }
        if hits.is_empty() {
            return Ok(None);
        }

        let rect = PixelRect::spanning(min, max);
        let pixels = self.source.read_window(rect)?;

        let mut data = Array3::zeros((meta.bands, row_range.len(), col_range.len()));
        let mut valid = Array2::from_elem((row_range.len(), col_range.len()), false);
        let mut any = false;
        for (r, c, sr, sc) in hits {
            let (wr, wc) = (sr - rect.row_off, sc - rect.col_off);
            let mut observed = false;
            for band in 0..meta.bands {
                let value = pixels[[band, wr, wc]];
                data[[band, r, c]] = value;
                observed |= !is_nodata(value, meta.nodata);
            }
            if observed {
                valid[[r, c]] = true;
                any = true;
            }
        }

        if !any {
            return Ok(None);
        }
        Ok(Some(Window {
            data,
            valid,
            row_off: row_range.start,
            col_off: col_range.start,
            transform: grid.transform.offset(col_range.start, row_range.start),
        }))
    }

    /// Grid rows and columns whose pixels may touch the footprint.
    fn covered_cells(
        &self,
        grid: &PixelGrid,
    ) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
        let (fminx, fmaxx, fminy, fmaxy) = self.footprint;
        let inverse = grid.transform.inverse()?;
        let (c0, r0) = inverse.apply(fminx, fmaxy);
        let (c1, r1) = inverse.apply(fmaxx, fminy);

        let clamp = |v: f64, n: usize| v.max(0.0).min(n as f64) as usize;
        let cols = clamp(c0.min(c1).floor(), grid.cols)..clamp(c0.max(c1).ceil(), grid.cols);
        let rows = clamp(r0.min(r1).floor(), grid.rows)..clamp(r0.max(r1).ceil(), grid.rows);
        if cols.is_empty() || rows.is_empty() {
            return None;
        }
        Some((rows, cols))
    }
}

fn is_nodata(value: f32, nodata: Option<f32>) -> bool {
    match nodata {
        Some(nd) if nd.is_nan() => value.is_nan(),
        Some(nd) => value == nd,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn source(origin_x: f64, origin_y: f64, pixels: Array3<f32>, nodata: Option<f32>) -> Arc<RasterSource> {
        let (bands, height, width) = pixels.dim();
        let meta = RasterMeta {
            width,
            height,
            bands,
            crs: Crs::WEB_MERCATOR,
            transform: GeoTransform::north_up(origin_x, origin_y, 1.0, 1.0),
            nodata,
        };
        Arc::new(RasterSource::in_memory("mem.tif", meta, pixels))
    }

    #[test]
    fn test_grid_for_query() {
        let q = BoundingVolume::spatial(0.0, 3.0, 0.0, 2.5).unwrap();
        let grid = PixelGrid::for_query(Crs::WGS84, &q, 0.1);
        assert_eq!((grid.cols, grid.rows), (30, 25));
        assert_eq!(grid.transform.apply(0.0, 0.0), (0.0, 2.5));

        let tiny = BoundingVolume::spatial(0.0, 0.01, 0.0, 0.01).unwrap();
        let grid = PixelGrid::for_query(Crs::WGS84, &tiny, 1.0);
        assert_eq!((grid.cols, grid.rows), (1, 1));
    }

    #[test]
    fn test_identity_read_places_window() {
        let pixels = Array3::from_shape_fn((1, 2, 2), |(_, r, c)| (1 + r * 2 + c) as f32);
        let view = WarpedView::new(source(2.0, 4.0, pixels, None), Crs::WEB_MERCATOR).unwrap();

        let q = BoundingVolume::spatial(0.0, 4.0, 0.0, 4.0).unwrap();
        let grid = PixelGrid::for_query(Crs::WEB_MERCATOR, &q, 1.0);
        let window = view.read(&grid).unwrap().unwrap();

        assert_eq!((window.row_off, window.col_off), (0, 2));
        assert_eq!(window.data.dim(), (1, 2, 2));
        assert_eq!(window.data[[0, 0, 0]], 1.0);
        assert_eq!(window.data[[0, 1, 1]], 4.0);
        assert!(window.valid.iter().all(|&v| v));
        assert_eq!(window.transform.apply(0.0, 0.0), (2.0, 4.0));
    }

    /// Records the rectangles it is asked for.
    struct Recording {
        rects: Arc<parking_lot::Mutex<Vec<PixelRect>>>,
    }

    impl crate::PixelReader for Recording {
        fn read_window(&mut self, rect: PixelRect) -> Result<Array3<f32>> {
            self.rects.lock().push(rect);
            Ok(Array3::from_shape_fn((1, rect.rows, rect.cols), |(_, r, c)| {
                ((rect.row_off + r) * 100 + rect.col_off + c) as f32
            }))
        }
    }

    #[test]
    fn test_read_decodes_only_the_covered_block() {
        let rects = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let meta = RasterMeta {
            width: 100,
            height: 100,
            bands: 1,
            crs: Crs::WEB_MERCATOR,
            transform: GeoTransform::north_up(0.0, 100.0, 1.0, 1.0),
            nodata: None,
        };
        let source = RasterSource::new("big.tif", meta, Box::new(Recording { rects: rects.clone() }));
        let view = WarpedView::new(Arc::new(source), Crs::WEB_MERCATOR).unwrap();

        // Rows 10..14 and cols 20..23 of the source.
        let q = BoundingVolume::spatial(20.0, 23.0, 86.0, 90.0).unwrap();
        let window = view
            .read(&PixelGrid::for_query(Crs::WEB_MERCATOR, &q, 1.0))
            .unwrap()
            .unwrap();

        assert_eq!(rects.lock().as_slice(), &[PixelRect::new(10, 20, 4, 3)]);
        assert_eq!(window.data.dim(), (1, 4, 3));
        assert_eq!(window.data[[0, 0, 0]], 1020.0);
        assert_eq!(window.data[[0, 3, 2]], 1322.0);
    }

    #[test]
    fn test_read_outside_is_none() {
        let view = WarpedView::new(
            source(100.0, 100.0, Array3::ones((1, 2, 2)), None),
            Crs::WEB_MERCATOR,
        )
        .unwrap();
        let grid = PixelGrid::for_query(
            Crs::WEB_MERCATOR,
            &BoundingVolume::spatial(0.0, 4.0, 0.0, 4.0).unwrap(),
            1.0,
        );
        assert!(view.read(&grid).unwrap().is_none());
    }

    #[test]
    fn test_nodata_pixels_not_valid() {
        let mut pixels = Array3::ones((1, 2, 2));
        pixels[[0, 0, 0]] = -1.0;
        let view = WarpedView::new(source(0.0, 2.0, pixels, Some(-1.0)), Crs::WEB_MERCATOR).unwrap();
        let grid = PixelGrid::for_query(
            Crs::WEB_MERCATOR,
            &BoundingVolume::spatial(0.0, 2.0, 0.0, 2.0).unwrap(),
            1.0,
        );
        let window = view.read(&grid).unwrap().unwrap();
        assert!(!window.valid[[0, 0]]);
        assert!(window.valid[[1, 1]]);

        let all_nodata = WarpedView::new(
            source(0.0, 2.0, Array3::from_elem((1, 2, 2), -1.0), Some(-1.0)),
            Crs::WEB_MERCATOR,
        )
        .unwrap();
        assert!(all_nodata.read(&grid).unwrap().is_none());
    }

    #[test]
    fn test_footprint_in_other_crs() {
        let meta = RasterMeta {
            width: 10,
            height: 10,
            bands: 1,
            crs: Crs::WGS84,
            transform: GeoTransform::north_up(0.0, 1.0, 0.1, 0.1),
            nodata: None,
        };
        let (minx, maxx, miny, maxy) = footprint(&meta, Crs::WEB_MERCATOR).unwrap();
        assert_relative_eq!(minx, 0.0, epsilon = 1e-6);
        assert_relative_eq!(maxx, 111_319.490_793, max_relative = 1e-9);
        assert_relative_eq!(miny, 0.0, epsilon = 1e-6);
        assert!(maxy > 111_000.0 && maxy < 112_000.0);

        assert!(footprint(&meta, Crs::from_epsg(32618)).is_err());
    }
}

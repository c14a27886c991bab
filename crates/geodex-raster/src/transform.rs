//! Affine transforms between pixel and map coordinates.

use serde::{Deserialize, Serialize};

/// Affine mapping from pixel `(col, row)` to map `(x, y)`:
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// North-up rasters have `b == d == 0` and a negative `e`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    /// North-up transform with origin at the top-left corner.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            a: pixel_width,
            b: 0.0,
            c: origin_x,
            d: 0.0,
            e: -pixel_height,
            f: origin_y,
        }
    }

    /// Build from a GeoTIFF tiepoint and pixel scale.
    ///
    /// The tiepoint maps raster position `(i, j)` to model `(x, y)`.
    pub fn from_tiepoint(i: f64, j: f64, x: f64, y: f64, scale_x: f64, scale_y: f64) -> Self {
        Self::north_up(x - i * scale_x, y + j * scale_y, scale_x, scale_y)
    }

    /// Build from the first two rows of a GeoTIFF `ModelTransformationTag` matrix.
    pub fn from_model_transformation(m: &[f64]) -> Option<Self> {
        if m.len() < 8 {
            return None;
        }
        Some(Self {
            a: m[0],
            b: m[1],
            c: m[3],
            d: m[4],
            e: m[5],
            f: m[7],
        })
    }

    /// Map pixel coordinates to map coordinates.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// Inverse mapping, `None` for a singular transform.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let a = self.e / det;
        let b = -self.b / det;
        let d = -self.d / det;
        let e = self.a / det;
        Some(Self {
            a,
            b,
            c: -(a * self.c + b * self.f),
            d,
            e,
            f: -(d * self.c + e * self.f),
        })
    }

    /// Pixel size as `(width, height)`, both positive.
    pub fn resolution(&self) -> (f64, f64) {
        (
            (self.a * self.a + self.d * self.d).sqrt(),
            (self.b * self.b + self.e * self.e).sqrt(),
        )
    }

    /// Map-space bounds `(minx, maxx, miny, maxy)` of a `cols x rows` raster.
    pub fn bounds(&self, cols: usize, rows: usize) -> (f64, f64, f64, f64) {
        let (w, h) = (cols as f64, rows as f64);
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(w, 0.0),
            self.apply(0.0, h),
            self.apply(w, h),
        ];
        corners.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
            |acc, &(x, y)| (acc.0.min(x), acc.1.max(x), acc.2.min(y), acc.3.max(y)),
        )
    }

    /// The transform of a sub-window starting at `(col_off, row_off)`.
    pub fn offset(&self, col_off: usize, row_off: usize) -> Self {
        let (c, f) = self.apply(col_off as f64, row_off as f64);
        Self { c, f, ..*self }
    }

    /// Export as the six GDAL-ordered coefficients `[c, a, b, f, d, e]`.
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }
}

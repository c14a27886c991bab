//! The record returned for one query.

use crate::{Crs, GeoTransform, RasterError, Result};
use geodex_index::BoundingVolume;
use ndarray::{concatenate, Array2, Array3, ArrayView2, ArrayViewMut2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Which array a dataset populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleField {
    /// Multi-band imagery, `(bands, rows, cols)`.
    Image,
    /// Single-band labels, `(rows, cols)`.
    Mask,
}

/// Pixel data for a query, on the target grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image: Option<Array3<f32>>,
    pub mask: Option<Array2<f32>>,
    pub crs: Crs,
    /// Transform of the top-left output pixel.
    pub transform: GeoTransform,
    /// The query that produced this sample.
    pub bounds: BoundingVolume,
}

impl Sample {
    /// Build a sample holding `data` as `field`. Masks keep band 0.
    pub fn new(
        field: SampleField,
        data: Array3<f32>,
        crs: Crs,
        transform: GeoTransform,
        bounds: BoundingVolume,
    ) -> Self {
        let (image, mask) = match field {
            SampleField::Image => (Some(data), None),
            SampleField::Mask => (None, Some(data.index_axis_move(Axis(0), 0))),
        };
        Self {
            image,
            mask,
            crs,
            transform,
            bounds,
        }
    }

    /// Populated fields in declaration order.
    pub fn fields(&self) -> Vec<SampleField> {
        let mut fields = Vec::with_capacity(2);
        if self.image.is_some() {
            fields.push(SampleField::Image);
        }
        if self.mask.is_some() {
            fields.push(SampleField::Mask);
        }
        fields
    }

    /// `(rows, cols)` of the populated arrays.
    pub fn shape(&self) -> Option<(usize, usize)> {
        if let Some(image) = &self.image {
            let (_, rows, cols) = image.dim();
            return Some((rows, cols));
        }
        self.mask.as_ref().map(|m| m.dim())
    }

    /// Combine with a sample of the same grid.
    ///
    /// Images stack along the band axis; a mask in `other` replaces ours.
    pub fn merge(self, other: Sample) -> Result<Sample> {
        if let (Some(a), Some(b)) = (self.shape(), other.shape()) {
            if a != b {
                return Err(RasterError::ShapeMismatch {
                    expected: vec![a.0, a.1],
                    found: vec![b.0, b.1],
                });
            }
        }

        let image = match (self.image, other.image) {
            (Some(a), Some(b)) => Some(concatenate(Axis(0), &[a.view(), b.view()]).map_err(|_| {
                RasterError::ShapeMismatch {
                    expected: a.shape().to_vec(),
                    found: b.shape().to_vec(),
                }
            })?),
            (a, b) => a.or(b),
        };

        Ok(Sample {
            image,
            mask: other.mask.or(self.mask),
            crs: self.crs,
            transform: self.transform,
            bounds: self.bounds,
        })
    }

    /// Lay `other`, a sample of the same grid and fields, over this one.
    ///
    /// A pixel of `other` wins wherever any of its bands differs from
    /// `nodata`; elsewhere this sample shows through. Band counts are kept.
    pub fn overlay(mut self, other: Sample, nodata: f32) -> Result<Sample> {
        let Some((rows, cols)) = other.shape() else {
            return Ok(self);
        };
        if let Some(shape) = self.shape() {
            if shape != (rows, cols) {
                return Err(RasterError::ShapeMismatch {
                    expected: vec![shape.0, shape.1],
                    found: vec![rows, cols],
                });
            }
        }

        let is_data = |v: f32| if nodata.is_nan() { !v.is_nan() } else { v != nodata };
        let mut observed = Array2::from_elem((rows, cols), false);
        if let Some(image) = &other.image {
            for band in image.axis_iter(Axis(0)) {
                Zip::from(&mut observed)
                    .and(&band)
                    .for_each(|o, &v| *o |= is_data(v));
            }
        }
        if let Some(mask) = &other.mask {
            Zip::from(&mut observed)
                .and(mask)
                .for_each(|o, &v| *o |= is_data(v));
        }

        self.image = match (self.image, other.image) {
            (Some(mut below), Some(above)) => {
                if below.dim() != above.dim() {
                    return Err(RasterError::ShapeMismatch {
                        expected: below.shape().to_vec(),
                        found: above.shape().to_vec(),
                    });
                }
                for (b, a) in below.axis_iter_mut(Axis(0)).zip(above.axis_iter(Axis(0))) {
                    paint(b, a, &observed);
                }
                Some(below)
            }
            (below, above) => below.or(above),
        };
        self.mask = match (self.mask, other.mask) {
            (Some(mut below), Some(above)) => {
                paint(below.view_mut(), above.view(), &observed);
                Some(below)
            }
            (below, above) => below.or(above),
        };
        Ok(self)
    }
}

/// `above` where `observed`, else `below`.
fn paint(mut below: ArrayViewMut2<f32>, above: ArrayView2<f32>, observed: &Array2<bool>) {
    Zip::from(&mut below)
        .and(&above)
        .and(observed)
        .for_each(|b, &a, &o| {
            if o {
                *b = a;
            }
        });
}

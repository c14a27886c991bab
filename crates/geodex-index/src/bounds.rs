//! Axis-aligned bounding volumes in space and time.

use crate::{GeoIndexError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Lower time bound used for sources without a parsed timestamp.
pub const TIME_MIN: f64 = 0.0;

/// Upper time bound used for sources without a parsed timestamp.
pub const TIME_MAX: f64 = i64::MAX as f64;

/// An immutable box in `(x, y, t)`.
///
/// Bounds are interpreted as half-open intervals `[min, max)` on every axis,
/// so two tiles that share an edge do not intersect. A volume with zero width
/// on any axis is valid but degenerate: it never intersects anything, not even
/// itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "[f64; 6]", into = "[f64; 6]")]
pub struct BoundingVolume {
    minx: f64,
    maxx: f64,
    miny: f64,
    maxy: f64,
    mint: f64,
    maxt: f64,
}

impl BoundingVolume {
    /// Create a new bounding volume.
    ///
    /// Fails if any value is NaN or if a lower bound exceeds its upper bound.
    pub fn new(minx: f64, maxx: f64, miny: f64, maxy: f64, mint: f64, maxt: f64) -> Result<Self> {
        for (axis, lo, hi) in [("x", minx, maxx), ("y", miny, maxy), ("t", mint, maxt)] {
            if lo.is_nan() || hi.is_nan() {
                return Err(GeoIndexError::InvalidVolume(format!("{axis} bound is NaN")));
            }
            if lo > hi {
                return Err(GeoIndexError::InvalidVolume(format!(
                    "min{axis} {lo} is greater than max{axis} {hi}"
                )));
            }
        }

        Ok(Self {
            minx,
            maxx,
            miny,
            maxy,
            mint,
            maxt,
        })
    }

    /// Create a spatial volume that spans all of time.
    pub fn spatial(minx: f64, maxx: f64, miny: f64, maxy: f64) -> Result<Self> {
        Self::new(minx, maxx, miny, maxy, TIME_MIN, TIME_MAX)
    }

    pub fn minx(&self) -> f64 {
        self.minx
    }

    pub fn maxx(&self) -> f64 {
        self.maxx
    }

    pub fn miny(&self) -> f64 {
        self.miny
    }

    pub fn maxy(&self) -> f64 {
        self.maxy
    }

    pub fn mint(&self) -> f64 {
        self.mint
    }

    pub fn maxt(&self) -> f64 {
        self.maxt
    }

    /// Spatial width (x extent).
    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    /// Spatial height (y extent).
    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// Temporal extent.
    pub fn duration(&self) -> f64 {
        self.maxt - self.mint
    }

    /// Spatial area of the volume.
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// True if any axis has zero width.
    pub fn is_degenerate(&self) -> bool {
        self.minx >= self.maxx || self.miny >= self.maxy || self.mint >= self.maxt
    }

    /// Check whether two volumes overlap with non-zero measure on every axis.
    pub fn intersects(&self, other: &BoundingVolume) -> bool {
        if self.is_degenerate() || other.is_degenerate() {
            return false;
        }

        self.minx < other.maxx
            && other.minx < self.maxx
            && self.miny < other.maxy
            && other.miny < self.maxy
            && self.mint < other.maxt
            && other.mint < self.maxt
    }

    /// Compute the overlapping volume, if any.
    pub fn intersection(&self, other: &BoundingVolume) -> Option<BoundingVolume> {
        if !self.intersects(other) {
            return None;
        }

        Some(BoundingVolume {
            minx: self.minx.max(other.minx),
            maxx: self.maxx.min(other.maxx),
            miny: self.miny.max(other.miny),
            maxy: self.maxy.min(other.maxy),
            mint: self.mint.max(other.mint),
            maxt: self.maxt.min(other.maxt),
        })
    }

    /// Spatial area of the overlap with `other`, zero when disjoint.
    pub fn intersection_area(&self, other: &BoundingVolume) -> f64 {
        self.intersection(other).map_or(0.0, |v| v.area())
    }

    /// Smallest volume containing both inputs.
    pub fn union(&self, other: &BoundingVolume) -> BoundingVolume {
        BoundingVolume {
            minx: self.minx.min(other.minx),
            maxx: self.maxx.max(other.maxx),
            miny: self.miny.min(other.miny),
            maxy: self.maxy.max(other.maxy),
            mint: self.mint.min(other.mint),
            maxt: self.maxt.max(other.maxt),
        }
    }

    /// True if `other` lies entirely within this volume.
    pub fn contains(&self, other: &BoundingVolume) -> bool {
        self.minx <= other.minx
            && other.maxx <= self.maxx
            && self.miny <= other.miny
            && other.maxy <= self.maxy
            && self.mint <= other.mint
            && other.maxt <= self.maxt
    }

    /// Corners as `([minx, miny, mint], [maxx, maxy, maxt])`.
    pub fn corners(&self) -> ([f64; 3], [f64; 3]) {
        (
            [self.minx, self.miny, self.mint],
            [self.maxx, self.maxy, self.maxt],
        )
    }

    fn as_array(&self) -> [f64; 6] {
        [self.minx, self.maxx, self.miny, self.maxy, self.mint, self.maxt]
    }
}

impl PartialEq for BoundingVolume {
    fn eq(&self, other: &Self) -> bool {
        self.as_array() == other.as_array()
    }
}

// NaN is rejected at construction, so equality is total.
impl Eq for BoundingVolume {}

impl Hash for BoundingVolume {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in self.as_array() {
            // -0.0 == 0.0 must hash identically
            let value = if value == 0.0 { 0.0 } else { value };
            value.to_bits().hash(state);
        }
    }
}

impl fmt::Display for BoundingVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(x: {}..{}, y: {}..{}, t: {}..{})",
            self.minx, self.maxx, self.miny, self.maxy, self.mint, self.maxt
        )
    }
}

impl TryFrom<[f64; 6]> for BoundingVolume {
    type Error = GeoIndexError;

    fn try_from(v: [f64; 6]) -> Result<Self> {
        Self::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }
}

impl From<BoundingVolume> for [f64; 6] {
    fn from(v: BoundingVolume) -> Self {
        v.as_array()
    }
}

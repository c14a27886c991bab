//! Intersections and unions of datasets.

use crate::raster::RasterDataset;
use crate::{ConfigError, DatasetError, Result};
use geodex_index::BoundingVolume;
use geodex_raster::{Compose, Crs, Sample, SampleTransform};

/// Relative tolerance when comparing dataset resolutions.
const RES_TOLERANCE: f64 = 1e-9;

/// A dataset or a composition of datasets.
///
/// Composite nodes keep their children and answer queries by delegating;
/// no merged index is ever built.
#[derive(Debug)]
pub enum GeoDataset {
    Leaf(RasterDataset),
    /// Samples only where both children have data.
    Intersection {
        left: Box<GeoDataset>,
        right: Box<GeoDataset>,
        bounds: BoundingVolume,
    },
    /// Samples wherever either child has data, the right child drawn over
    /// the left.
    Union {
        left: Box<GeoDataset>,
        right: Box<GeoDataset>,
        bounds: BoundingVolume,
    },
    /// Post-processes every sample of `inner`.
    Transformed {
        inner: Box<GeoDataset>,
        transforms: Compose,
    },
}

impl From<RasterDataset> for GeoDataset {
    fn from(dataset: RasterDataset) -> Self {
        GeoDataset::Leaf(dataset)
    }
}

fn check_compatible(left: &GeoDataset, right: &GeoDataset) -> Result<()> {
    if left.crs() != right.crs() {
        return Err(ConfigError::CrsMismatch {
            left: left.crs(),
            right: right.crs(),
        }
        .into());
    }
    let (a, b) = (left.res(), right.res());
    if (a - b).abs() > RES_TOLERANCE * a.abs().max(b.abs()) {
        return Err(ConfigError::ResolutionMismatch { left: a, right: b }.into());
    }
    Ok(())
}

/// Compose two datasets so queries return both where they overlap.
///
/// Both must share CRS and resolution and their bounds must intersect.
pub fn intersect(left: impl Into<GeoDataset>, right: impl Into<GeoDataset>) -> Result<GeoDataset> {
    let (left, right) = (left.into(), right.into());
    check_compatible(&left, &right)?;
    let bounds = left
        .bounds()
        .intersection(&right.bounds())
        .ok_or_else(|| ConfigError::NoOverlap {
            left: left.bounds(),
            right: right.bounds(),
        })?;
    Ok(GeoDataset::Intersection {
        left: Box::new(left),
        right: Box::new(right),
        bounds,
    })
}

/// Compose two datasets so queries return whichever has data.
///
/// Both must share CRS and resolution.
pub fn unite(left: impl Into<GeoDataset>, right: impl Into<GeoDataset>) -> Result<GeoDataset> {
    let (left, right) = (left.into(), right.into());
    check_compatible(&left, &right)?;
    let bounds = left.bounds().union(&right.bounds());
    Ok(GeoDataset::Union {
        left: Box::new(left),
        right: Box::new(right),
        bounds,
    })
}

impl GeoDataset {
    /// Apply `transform` to every sample this dataset returns, after any
    /// transforms already attached.
    pub fn with_transform(self, transform: impl SampleTransform + 'static) -> GeoDataset {
        match self {
            GeoDataset::Transformed { inner, transforms } => GeoDataset::Transformed {
                inner,
                transforms: transforms.then(transform),
            },
            other => GeoDataset::Transformed {
                inner: Box::new(other),
                transforms: Compose::new().then(transform),
            },
        }
    }

    /// Sample for `query`.
    ///
    /// An intersection needs both children to answer and combines their
    /// fields. A union overlays the children that answer, keeping the band
    /// count, and fails only when neither does.
    pub fn get(&self, query: &BoundingVolume) -> Result<Sample> {
        match self {
            GeoDataset::Leaf(dataset) => dataset.get(query),
            GeoDataset::Intersection {
                left,
                right,
                bounds,
            } => {
                if !query.intersects(bounds) {
                    return Err(DatasetError::QueryNotFound { query: *query });
                }
                let a = left.get(query)?;
                let b = right.get(query)?;
                Ok(a.merge(b)?)
            }
            GeoDataset::Union { left, right, .. } => {
                let a = optional(left.get(query))?;
                let b = optional(right.get(query))?;
                match (a, b) {
                    (Some(a), Some(b)) => Ok(a.overlay(b, right.nodata())?),
                    (Some(s), None) | (None, Some(s)) => Ok(s),
                    (None, None) => Err(DatasetError::QueryNotFound { query: *query }),
                }
            }
            GeoDataset::Transformed { inner, transforms } => Ok(transforms.apply(inner.get(query)?)),
        }
    }

    pub fn bounds(&self) -> BoundingVolume {
        match self {
            GeoDataset::Leaf(dataset) => dataset.bounds(),
            GeoDataset::Intersection { bounds, .. } | GeoDataset::Union { bounds, .. } => *bounds,
            GeoDataset::Transformed { inner, .. } => inner.bounds(),
        }
    }

    pub fn crs(&self) -> Crs {
        match self {
            GeoDataset::Leaf(dataset) => dataset.crs(),
            GeoDataset::Intersection { left, .. } | GeoDataset::Union { left, .. } => left.crs(),
            GeoDataset::Transformed { inner, .. } => inner.crs(),
        }
    }

    pub fn res(&self) -> f64 {
        match self {
            GeoDataset::Leaf(dataset) => dataset.res(),
            GeoDataset::Intersection { left, .. } | GeoDataset::Union { left, .. } => left.res(),
            GeoDataset::Transformed { inner, .. } => inner.res(),
        }
    }

    /// Value of uncovered pixels in the rightmost leaf.
    pub fn nodata(&self) -> f32 {
        match self {
            GeoDataset::Leaf(dataset) => dataset.nodata(),
            GeoDataset::Intersection { right, .. } | GeoDataset::Union { right, .. } => {
                right.nodata()
            }
            GeoDataset::Transformed { inner, .. } => inner.nodata(),
        }
    }

    /// Leaf datasets, left to right.
    pub fn leaves(&self) -> Vec<&RasterDataset> {
        match self {
            GeoDataset::Leaf(dataset) => vec![dataset],
            GeoDataset::Intersection { left, right, .. } | GeoDataset::Union { left, right, .. } => {
                let mut leaves = left.leaves();
                leaves.extend(right.leaves());
                leaves
            }
            GeoDataset::Transformed { inner, .. } => inner.leaves(),
        }
    }

    /// Files indexed across all leaves.
    pub fn len(&self) -> usize {
        self.leaves().iter().map(|leaf| leaf.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turn a query miss into `None`, keeping real failures.
fn optional(result: Result<Sample>) -> Result<Option<Sample>> {
    match result {
        Ok(sample) => Ok(Some(sample)),
        Err(e) if e.is_query_miss() => Ok(None),
        Err(e) => Err(e),
    }
}

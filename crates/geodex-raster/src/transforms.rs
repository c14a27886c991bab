//! Post-processing applied to every sample a dataset returns.

use crate::sample::Sample;
use ndarray::{Array2, Array3};
use std::fmt;
use std::sync::Arc;

/// A step applied to each sample after compositing.
pub trait SampleTransform: Send + Sync + fmt::Debug {
    fn apply(&self, sample: Sample) -> Sample;
}

/// Replaces samples smaller than `size` with a constant patch.
///
/// Queries near the edge of coverage can produce arrays smaller than the
/// patch size a model expects; those become a `(C, size, size)` image and a
/// `(size, size)` mask filled with `fill`. Both fields are always produced,
/// with a single-band image when the sample had none.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodataCheck {
    pub size: usize,
    pub fill: f32,
}

impl NodataCheck {
    pub fn new(size: usize) -> Self {
        Self { size, fill: 0.0 }
    }

    pub fn with_fill(mut self, fill: f32) -> Self {
        self.fill = fill;
        self
    }

    fn undersized(&self, rows: usize, cols: usize) -> bool {
        rows < self.size || cols < self.size
    }
}

impl SampleTransform for NodataCheck {
    fn apply(&self, mut sample: Sample) -> Sample {
        let image_small = sample.image.as_ref().is_some_and(|image| {
            let (_, rows, cols) = image.dim();
            self.undersized(rows, cols)
        });
        let mask_small = sample
            .mask
            .as_ref()
            .is_some_and(|mask| self.undersized(mask.nrows(), mask.ncols()));

        if image_small || mask_small {
            let bands = sample.image.as_ref().map_or(1, |image| image.dim().0);
            sample.image = Some(Array3::from_elem((bands, self.size, self.size), self.fill));
            sample.mask = Some(Array2::from_elem((self.size, self.size), self.fill));
        }
        sample
    }
}

/// Rewrites mask values through a lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct RemapClasses {
    mapping: Vec<(f32, f32)>,
}

impl RemapClasses {
    pub fn new(mapping: impl IntoIterator<Item = (f32, f32)>) -> Self {
        Self {
            mapping: mapping.into_iter().collect(),
        }
    }

    /// Collapse the 7-class land cover scheme to 5 classes.
    ///
    /// Both impervious classes (5, 6) merge into class 4 and the no-data
    /// code 15 becomes 0.
    pub fn five_class() -> Self {
        Self::new([(5.0, 4.0), (6.0, 4.0), (15.0, 0.0)])
    }

    fn lookup(&self, value: f32) -> f32 {
        self.mapping
            .iter()
            .find(|(from, _)| *from == value)
            .map_or(value, |(_, to)| *to)
    }
}

impl SampleTransform for RemapClasses {
    fn apply(&self, mut sample: Sample) -> Sample {
        if let Some(mask) = sample.mask.as_mut() {
            mask.mapv_inplace(|v| self.lookup(v));
        }
        sample
    }
}

/// Applies transforms in order.
#[derive(Debug, Clone, Default)]
pub struct Compose {
    steps: Vec<Arc<dyn SampleTransform>>,
}

impl Compose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, step: impl SampleTransform + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn push(&mut self, step: Arc<dyn SampleTransform>) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl SampleTransform for Compose {
    fn apply(&self, sample: Sample) -> Sample {
        self.steps.iter().fold(sample, |s, step| step.apply(s))
    }
}

//! Image plus land-cover label datasets.

use crate::composite::{intersect, GeoDataset};
use crate::raster::RasterDataset;
use crate::verify::{NoVerify, Verifier};
use crate::{ConfigError, Result};
use geodex_index::BoundingVolume;
use geodex_raster::{CachePolicy, Crs, NodataCheck, RasterReader, RemapClasses, Sample};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

fn default_class_set() -> u8 {
    5
}

fn default_image_layer() -> String {
    "naip".to_string()
}

fn default_label_layer() -> String {
    "lc".to_string()
}

fn default_prior_layer() -> String {
    "prior".to_string()
}

/// Which labels accompany the imagery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelConfig {
    /// Number of land-cover classes, 5 or 7.
    #[serde(default = "default_class_set")]
    pub class_set: u8,
    /// Use pre-generated prior labels instead of the high-resolution ones.
    #[serde(default)]
    pub use_prior_labels: bool,
    #[serde(default = "default_image_layer")]
    pub image_layer: String,
    #[serde(default = "default_label_layer")]
    pub label_layer: String,
    #[serde(default = "default_prior_layer")]
    pub prior_layer: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            class_set: default_class_set(),
            use_prior_labels: false,
            image_layer: default_image_layer(),
            label_layer: default_label_layer(),
            prior_layer: default_prior_layer(),
        }
    }
}

impl LabelConfig {
    pub fn new(class_set: u8, use_prior_labels: bool) -> Self {
        Self {
            class_set,
            use_prior_labels,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !matches!(self.class_set, 5 | 7) {
            return Err(ConfigError::InvalidValue {
                field: "class_set",
                reason: format!("{} is not a supported class set (5 or 7)", self.class_set),
            });
        }
        if self.use_prior_labels && self.class_set != 5 {
            return Err(ConfigError::IncompatibleOptions {
                first: "use_prior_labels",
                second: "class_set",
                message: "The pre-generated prior labels are only valid for the 5 class set of labels"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Directory holding the mask layer.
    pub fn mask_layer(&self) -> &str {
        if self.use_prior_labels {
            &self.prior_layer
        } else {
            &self.label_layer
        }
    }
}

/// Imagery intersected with a label layer.
#[derive(Debug)]
pub struct LabeledDataset {
    inner: GeoDataset,
    labels: LabelConfig,
}

impl LabeledDataset {
    pub fn builder(root: impl Into<PathBuf>, labels: LabelConfig) -> LabeledDatasetBuilder {
        LabeledDatasetBuilder {
            root: root.into(),
            labels,
            filename_glob: None,
            crs: None,
            res: None,
            cache: CachePolicy::default(),
            reader: None,
            patch_size: None,
            verifier: Arc::new(NoVerify),
        }
    }

    /// Image and mask for `query`.
    pub fn get(&self, query: &BoundingVolume) -> Result<Sample> {
        self.inner.get(query)
    }

    pub fn bounds(&self) -> BoundingVolume {
        self.inner.bounds()
    }

    pub fn labels(&self) -> &LabelConfig {
        &self.labels
    }

    pub fn dataset(&self) -> &GeoDataset {
        &self.inner
    }

    pub fn into_inner(self) -> GeoDataset {
        self.inner
    }
}

/// Builder for [`LabeledDataset`].
pub struct LabeledDatasetBuilder {
    root: PathBuf,
    labels: LabelConfig,
    filename_glob: Option<String>,
    crs: Option<Crs>,
    res: Option<f64>,
    cache: CachePolicy,
    reader: Option<Arc<dyn RasterReader>>,
    patch_size: Option<usize>,
    verifier: Arc<dyn Verifier>,
}

impl std::fmt::Debug for LabeledDatasetBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabeledDatasetBuilder")
            .field("root", &self.root)
            .field("labels", &self.labels)
            .field("patch_size", &self.patch_size)
            .finish()
    }
}

impl LabeledDatasetBuilder {
    pub fn filename_glob(mut self, glob: impl Into<String>) -> Self {
        self.filename_glob = Some(glob.into());
        self
    }

    pub fn crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    pub fn res(mut self, res: f64) -> Self {
        self.res = Some(res);
        self
    }

    /// Cache policy for each layer.
    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = policy;
        self
    }

    pub fn reader(mut self, reader: Arc<dyn RasterReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Replace samples smaller than `size` with zero patches.
    pub fn patch_size(mut self, size: usize) -> Self {
        self.patch_size = Some(size);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Validate the label options, then build both layers on one grid.
    pub fn build(self) -> Result<LabeledDataset> {
        self.labels.validate()?;
        self.verifier.verify(&self.root)?;

        let mut image = RasterDataset::builder(&self.root)
            .categories([self.labels.image_layer.as_str()])
            .cache(self.cache);
        if let Some(glob) = &self.filename_glob {
            image = image.filename_glob(glob.as_str());
        }
        if let Some(crs) = self.crs {
            image = image.crs(crs);
        }
        if let Some(res) = self.res {
            image = image.res(res);
        }
        if let Some(reader) = &self.reader {
            image = image.reader(Arc::clone(reader));
        }
        let image = image.build()?;

        // The mask layer is reconciled to the image grid.
        let mut mask = RasterDataset::builder(&self.root)
            .categories([self.labels.mask_layer()])
            .is_image(false)
            .crs(image.crs())
            .res(image.res())
            .cache(self.cache);
        if let Some(glob) = &self.filename_glob {
            mask = mask.filename_glob(glob.as_str());
        }
        if let Some(reader) = &self.reader {
            mask = mask.reader(Arc::clone(reader));
        }
        if self.labels.class_set == 5 && !self.labels.use_prior_labels {
            mask = mask.transform(RemapClasses::five_class());
        }
        let mask = mask.build()?;

        info!(
            root = %self.root.display(),
            images = image.len(),
            masks = mask.len(),
            mask_layer = self.labels.mask_layer(),
            "Labeled dataset ready"
        );
        // Undersized patches are replaced once both layers are combined.
        let mut inner = intersect(image, mask)?;
        if let Some(size) = self.patch_size {
            inner = inner.with_transform(NodataCheck::new(size));
        }
        Ok(LabeledDataset {
            inner,
            labels: self.labels,
        })
    }
}

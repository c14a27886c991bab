//! YAML dataset configuration.
//!
//! ```yaml
//! root: data/chesapeake
//! filename_glob: "*.tif"
//! filename_regex: "m_\\d+_(?P<date>\\d{8})"
//! res: 1.0
//! cache_capacity: 64
//! labels:
//!   class_set: 5
//! catalog:
//!   categories: [naip, lc, prior]
//!   expected: [naip, lc]
//!   archives:
//!     - filename: naip.tif.gz
//!       url: https://example.com/naip.tif.gz
//! ```

use crate::composite::GeoDataset;
use crate::labels::{LabelConfig, LabeledDataset};
use crate::raster::{RasterDataset, RasterDatasetBuilder};
use crate::scan::{FilenameGlob, FilenameRegex};
use crate::verify::{ArchiveSpec, ArchiveVerifier, HttpFetcher, NoVerify, Verifier};
use crate::{ConfigError, Result};
use chrono::format::{Item, StrftimeItems};
use geodex_raster::{CachePolicy, Crs, NodataCheck, DEFAULT_CACHE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn default_glob() -> String {
    "*".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

/// Known contents of a dataset and where to get them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    /// Valid category names; empty accepts any.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Paths under the root that must exist after verification.
    #[serde(default)]
    pub expected: Vec<PathBuf>,
    #[serde(default)]
    pub archives: Vec<ArchiveSpec>,
}

/// Settings for one dataset, or a labeled pair when `labels` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_glob")]
    pub filename_glob: String,
    #[serde(default)]
    pub filename_regex: Option<String>,
    #[serde(default)]
    pub date_format: Option<String>,
    #[serde(default)]
    pub crs: Option<Crs>,
    #[serde(default)]
    pub res: Option<f64>,
    #[serde(default = "default_true")]
    pub is_image: bool,
    #[serde(default)]
    pub nodata: f32,
    /// Open handles kept per dataset; 0 disables caching.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default)]
    pub patch_size: Option<usize>,
    #[serde(default)]
    pub labels: Option<LabelConfig>,
    #[serde(default)]
    pub catalog: Catalog,
    #[serde(default)]
    pub download: bool,
    #[serde(default)]
    pub checksum: bool,
}

impl DatasetConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            categories: Vec::new(),
            filename_glob: default_glob(),
            filename_regex: None,
            date_format: None,
            crs: None,
            res: None,
            is_image: true,
            nodata: 0.0,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            patch_size: None,
            labels: None,
            catalog: Catalog::default(),
            download: false,
            checksum: false,
        }
    }

    /// Parse and validate.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !self.catalog.categories.is_empty() {
            if let Some(unknown) = self
                .categories
                .iter()
                .find(|c| !self.catalog.categories.contains(c))
            {
                return Err(ConfigError::UnknownCategory {
                    category: unknown.clone(),
                    known: self.catalog.categories.clone(),
                });
            }
        }

        if self.filename_glob.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "filename_glob",
                reason: "pattern is empty".to_string(),
            });
        }
        FilenameGlob::new(&self.filename_glob)?;
        if let Some(regex) = &self.filename_regex {
            FilenameRegex::new(regex)?;
        }

        if let Some(format) = &self.date_format {
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                return Err(ConfigError::InvalidValue {
                    field: "date_format",
                    reason: format!("`{format}` is not a valid chrono format"),
                });
            }
        }

        if let Some(res) = self.res {
            if !(res.is_finite() && res > 0.0) {
                return Err(ConfigError::InvalidValue {
                    field: "res",
                    reason: format!("{res} is not a positive resolution"),
                });
            }
        }

        if self.patch_size == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "patch_size",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.download && self.catalog.archives.iter().all(|a| a.url.is_none()) {
            return Err(ConfigError::IncompatibleOptions {
                first: "download",
                second: "catalog.archives",
                message: "downloading requires at least one archive with a url".to_string(),
            });
        }

        if let Some(labels) = &self.labels {
            labels.validate()?;
            self.validate_labeled()?;
        }
        Ok(())
    }

    /// A labeled config picks its own layers, fields and fill values.
    fn validate_labeled(&self) -> std::result::Result<(), ConfigError> {
        let fixed = |second: &'static str, message: &str| {
            Err(ConfigError::IncompatibleOptions {
                first: "labels",
                second,
                message: message.to_string(),
            })
        };
        if !self.categories.is_empty() {
            return fixed("categories", "layers are named by labels.image_layer, label_layer and prior_layer");
        }
        if self.filename_regex.is_some() {
            return fixed("filename_regex", "labeled layers are filtered by filename_glob only");
        }
        if self.date_format.is_some() {
            return fixed("date_format", "labeled layers carry no dates");
        }
        if !self.is_image {
            return fixed("is_image", "the image layer is always imagery and the label layers masks");
        }
        if self.nodata != 0.0 {
            return fixed("nodata", "labeled layers fill uncovered pixels with 0");
        }
        Ok(())
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy::with_capacity(self.cache_capacity)
    }

    /// The verifier described by the catalog.
    pub fn verifier(&self) -> Result<Arc<dyn Verifier>> {
        if self.catalog.expected.is_empty() {
            return Ok(Arc::new(NoVerify));
        }
        let fetcher = Arc::new(HttpFetcher::new()?);
        let verifier = ArchiveVerifier::new(self.catalog.expected.iter().cloned())
            .with_archives(self.catalog.archives.clone())
            .with_checksum(self.checksum);
        let verifier = if self.download {
            verifier.with_download(fetcher)
        } else {
            verifier.with_fetcher(fetcher)
        };
        Ok(Arc::new(verifier))
    }

    /// A builder for a single (unlabeled) dataset.
    pub fn builder(&self) -> Result<RasterDatasetBuilder> {
        self.validate()?;
        let mut builder = RasterDataset::builder(&self.root)
            .categories(self.categories.iter().cloned())
            .filename_glob(self.filename_glob.as_str())
            .is_image(self.is_image)
            .nodata(self.nodata)
            .cache(self.cache_policy())
            .verifier(self.verifier()?);
        if let Some(regex) = &self.filename_regex {
            builder = builder.filename_regex(regex.as_str());
        }
        if let Some(format) = &self.date_format {
            builder = builder.date_format(format.as_str());
        }
        if let Some(crs) = self.crs {
            builder = builder.crs(crs);
        }
        if let Some(res) = self.res {
            builder = builder.res(res);
        }
        if let Some(size) = self.patch_size {
            builder = builder.transform(NodataCheck::new(size));
        }
        Ok(builder)
    }

    /// Build the configured dataset.
    pub fn build(&self) -> Result<GeoDataset> {
        let Some(labels) = &self.labels else {
            return Ok(GeoDataset::Leaf(self.builder()?.build()?));
        };

        self.validate()?;
        let mut builder = LabeledDataset::builder(&self.root, labels.clone())
            .filename_glob(self.filename_glob.as_str())
            .cache(self.cache_policy())
            .verifier(self.verifier()?);
        if let Some(crs) = self.crs {
            builder = builder.crs(crs);
        }
        if let Some(res) = self.res {
            builder = builder.res(res);
        }
        if let Some(size) = self.patch_size {
            builder = builder.patch_size(size);
        }
        Ok(builder.build()?.into_inner())
    }
}

//! A directory of GeoTIFF tiles queried by bounding volume.

use crate::scan::{self, FilenameGlob, FilenameRegex, ScanOptions, ScanReport};
use crate::verify::{NoVerify, Verifier};
use crate::{ConfigError, DatasetError, Result};
use geodex_index::{BoundingVolume, SpatialIndex};
use geodex_metrics::metric_defs;
use geodex_raster::{
    CachePolicy, CacheStats, Compose, Compositor, Crs, FileResolver, GeoTiffReader, PixelGrid,
    RasterReader, Sample, SampleField, SampleTransform, SourceCache, TargetGrid,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// An indexed collection of raster files sharing one target grid.
///
/// Construction verifies the root, scans it once and indexes every usable
/// file. Queries composite the intersecting files, in index order, onto a
/// grid at the dataset's CRS and resolution.
///
/// # Example
///
/// ```no_run
/// use geodex_dataset::RasterDataset;
/// use geodex_index::BoundingVolume;
///
/// let naip = RasterDataset::builder("data/naip")
///     .filename_glob("m_*.tif")
///     .date_format("%Y%m%d")
///     .build()?;
///
/// let b = naip.bounds();
/// let query = BoundingVolume::spatial(b.minx(), b.minx() + 256.0, b.miny(), b.miny() + 256.0)?;
/// let sample = naip.get(&query)?;
/// println!("{:?}", sample.image.map(|i| i.dim()));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct RasterDataset {
    root: PathBuf,
    index: SpatialIndex<PathBuf>,
    bounds: BoundingVolume,
    resolver: FileResolver,
    target: TargetGrid,
    compositor: Compositor,
    field: SampleField,
    transforms: Compose,
    report: ScanReport,
}

impl RasterDataset {
    pub fn builder(root: impl Into<PathBuf>) -> RasterDatasetBuilder {
        RasterDatasetBuilder::new(root)
    }

    /// Composite every file intersecting `query`.
    ///
    /// Fails with [`DatasetError::QueryNotFound`] when no indexed file
    /// intersects the query or none of them could be read.
    pub fn get(&self, query: &BoundingVolume) -> Result<Sample> {
        let start = Instant::now();

        let hits = self.index.query(query);
        if hits.is_empty() {
            return Err(self.miss(query));
        }

        let grid = PixelGrid::for_query(self.target.crs, query, self.target.res);
        let paths = hits.iter().map(|entry| entry.payload.as_path());
        let Some(mosaic) = self.compositor.composite(&self.resolver, &grid, paths) else {
            return Err(self.miss(query));
        };

        debug!(%query, hits = hits.len(), painted = mosaic.sources, "Query composited");
        metrics::counter!(metric_defs::QUERIES.name).increment(1);
        metrics::histogram!(metric_defs::QUERY_SOURCES.name).record(mosaic.sources as f64);

        let sample = Sample::new(self.field, mosaic.data, mosaic.crs, mosaic.transform, *query);
        let sample = self.transforms.apply(sample);

        metrics::histogram!(metric_defs::QUERY_DURATION.name)
            .record(start.elapsed().as_secs_f64() * 1e6);
        Ok(sample)
    }

    fn miss(&self, query: &BoundingVolume) -> DatasetError {
        metrics::counter!(metric_defs::QUERY_MISSES.name).increment(1);
        DatasetError::QueryNotFound { query: *query }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Union of all indexed footprints.
    pub fn bounds(&self) -> BoundingVolume {
        self.bounds
    }

    pub fn crs(&self) -> Crs {
        self.target.crs
    }

    pub fn res(&self) -> f64 {
        self.target.res
    }

    pub fn target(&self) -> TargetGrid {
        self.target
    }

    pub fn field(&self) -> SampleField {
        self.field
    }

    /// Value of pixels no file covers.
    pub fn nodata(&self) -> f32 {
        self.compositor.nodata()
    }

    /// Number of indexed files.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Indexed files with their volumes, in key order.
    pub fn files(&self) -> impl Iterator<Item = (&Path, &BoundingVolume)> {
        self.index
            .iter()
            .map(|entry| (entry.payload.as_path(), &entry.volume))
    }

    pub fn scan_report(&self) -> &ScanReport {
        &self.report
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.resolver.cache().stats()
    }
}

/// Builder for [`RasterDataset`].
pub struct RasterDatasetBuilder {
    root: PathBuf,
    scan: ScanOptions,
    glob: String,
    regex: Option<String>,
    crs: Option<Crs>,
    res: Option<f64>,
    field: SampleField,
    nodata: f32,
    cache: CachePolicy,
    reader: Arc<dyn RasterReader>,
    transforms: Compose,
    verifier: Arc<dyn Verifier>,
}

impl std::fmt::Debug for RasterDatasetBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterDatasetBuilder")
            .field("root", &self.root)
            .field("scan", &self.scan)
            .field("glob", &self.glob)
            .field("regex", &self.regex)
            .field("crs", &self.crs)
            .field("res", &self.res)
            .field("field", &self.field)
            .field("cache", &self.cache)
            .finish()
    }
}

impl RasterDatasetBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scan: ScanOptions::default(),
            glob: "*".to_string(),
            regex: None,
            crs: None,
            res: None,
            field: SampleField::Image,
            nodata: 0.0,
            cache: CachePolicy::default(),
            reader: Arc::new(GeoTiffReader),
            transforms: Compose::new(),
            verifier: Arc::new(NoVerify),
        }
    }

    /// Sub-directories of the root to scan.
    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scan.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    /// Shell pattern file names must match; checked by [`build`](Self::build).
    pub fn filename_glob(mut self, glob: impl Into<String>) -> Self {
        self.glob = glob.into();
        self
    }

    /// Regular expression file names must match from the start. A `date`
    /// group, when present, is where [`date_format`](Self::date_format)
    /// is applied.
    pub fn filename_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }

    /// chrono format of the acquisition date in file names, e.g. `%Y%m%d`.
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.scan.date_format = Some(format.into());
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

    /// `true` returns imagery, `false` returns a single-band mask.
    pub fn is_image(mut self, is_image: bool) -> Self {
        self.field = if is_image {
            SampleField::Image
        } else {
            SampleField::Mask
        };
        self
    }

    /// Fill value for output pixels no source covers.
    pub fn nodata(mut self, nodata: f32) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = policy;
        self
    }

    pub fn reader(mut self, reader: Arc<dyn RasterReader>) -> Self {
        self.reader = reader;
        self
    }

    /// Append a transform applied to every sample.
    pub fn transform(mut self, transform: impl SampleTransform + 'static) -> Self {
        self.transforms = self.transforms.then(transform);
        self
    }

    pub fn transforms(mut self, transforms: Compose) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Verify, scan and index the root.
    pub fn build(mut self) -> Result<RasterDataset> {
        self.scan.filename_glob = FilenameGlob::new(&self.glob)?;
        self.scan.filename_regex = self.regex.as_deref().map(FilenameRegex::new).transpose()?;
        if let Some(res) = self.res {
            if !(res.is_finite() && res > 0.0) {
                return Err(ConfigError::InvalidValue {
                    field: "res",
                    reason: format!("{res} is not a positive resolution"),
                }
                .into());
            }
        }

        self.verifier.verify(&self.root)?;

        let mut resolver = FileResolver::new(SourceCache::new(self.cache, self.reader));
        if let Some(crs) = self.crs {
            resolver = resolver.with_crs(crs);
        }
        if let Some(res) = self.res {
            resolver = resolver.with_res(res);
        }

        let (index, report) = scan::scan(&self.root, &self.scan, &resolver)?;
        let (Some(bounds), Some(target)) = (index.bounds(), resolver.target()) else {
            return Err(DatasetError::NotFound {
                root: self.root,
                reason: "no indexable files".to_string(),
            });
        };

        Ok(RasterDataset {
            root: self.root,
            index,
            bounds,
            resolver,
            target,
            compositor: Compositor::new(self.nodata),
            field: self.field,
            transforms: self.transforms,
            report,
        })
    }
}

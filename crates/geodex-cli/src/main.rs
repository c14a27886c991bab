//! geodex CLI - index a tile directory and composite samples from it.
//!
//! ```text
//! geodex index --root data/naip --glob "m_*.tif"
//! geodex query --config chesapeake.yaml --bbox 0,256,0,256 --output sample.tif
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use geodex_dataset::{DatasetConfig, GeoDataset, SkippedFile};
use geodex_index::{BoundingVolume, TIME_MAX, TIME_MIN};
use geodex_raster::{geotiff, Crs, Sample};
use ndarray::Axis;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "geodex")]
#[command(about = "Index and query directories of geo-referenced raster tiles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a dataset and print its extent as JSON
    Index {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Composite the files intersecting a bounding box
    Query {
        #[command(flatten)]
        source: SourceArgs,

        /// Spatial bounds as minx,maxx,miny,maxy in the dataset CRS
        #[arg(long, value_delimiter = ',', num_args = 4, allow_hyphen_values = true)]
        bbox: Vec<f64>,

        /// Time bounds as mint,maxt in seconds since the epoch
        #[arg(long, value_delimiter = ',', num_args = 2)]
        time: Option<Vec<f64>>,

        /// Write the sample to a GeoTIFF
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// YAML dataset configuration
    #[arg(long, conflicts_with = "root")]
    config: Option<PathBuf>,

    /// Directory of raster files
    #[arg(long, required_unless_present = "config")]
    root: Option<PathBuf>,

    /// Sub-directories of the root to scan
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,

    /// File name pattern (`*`, `?` and `[...]` classes)
    #[arg(long, default_value = "*")]
    glob: String,

    /// Regex file names must match from the start; a `date` group holds the date
    #[arg(long)]
    regex: Option<String>,

    /// chrono format of dates embedded in file names, e.g. %Y%m%d
    #[arg(long)]
    date_format: Option<String>,

    /// Target CRS, e.g. EPSG:3857 (default: first file's)
    #[arg(long)]
    crs: Option<Crs>,

    /// Target resolution in CRS units (default: first file's)
    #[arg(long)]
    res: Option<f64>,

    /// Treat files as single-band masks
    #[arg(long)]
    mask: bool,

    /// Open file handles to keep; 0 disables caching
    #[arg(long, default_value = "128")]
    cache: usize,
}

impl SourceArgs {
    fn load(&self) -> Result<GeoDataset> {
        let config = match (&self.config, &self.root) {
            (Some(path), _) => DatasetConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            (None, Some(root)) => {
                let mut config = DatasetConfig::new(root);
                config.categories = self.categories.clone();
                config.filename_glob = self.glob.clone();
                config.filename_regex = self.regex.clone();
                config.date_format = self.date_format.clone();
                config.crs = self.crs;
                config.res = self.res;
                config.is_image = !self.mask;
                config.cache_capacity = self.cache;
                config
            }
            (None, None) => bail!("either --config or --root is required"),
        };

        let start = Instant::now();
        let dataset = config.build()?;
        info!(
            files = dataset.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dataset indexed"
        );
        Ok(dataset)
    }
}

#[derive(Serialize)]
struct IndexSummary<'a> {
    bounds: BoundingVolume,
    crs: Crs,
    res: f64,
    files: usize,
    skipped: Vec<&'a SkippedFile>,
}

#[derive(Serialize)]
struct QuerySummary {
    bounds: BoundingVolume,
    crs: Crs,
    /// GDAL-ordered geotransform of the top-left pixel.
    transform: [f64; 6],
    image: Option<(usize, usize, usize)>,
    mask: Option<(usize, usize)>,
    output: Option<PathBuf>,
}

fn index(dataset: &GeoDataset) -> Result<()> {
    let summary = IndexSummary {
        bounds: dataset.bounds(),
        crs: dataset.crs(),
        res: dataset.res(),
        files: dataset.len(),
        skipped: dataset
            .leaves()
            .into_iter()
            .flat_map(|leaf| &leaf.scan_report().skipped)
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn write_sample(sample: &Sample, path: &Path) -> Result<()> {
    let data = match (&sample.image, &sample.mask) {
        (Some(image), _) => image.clone(),
        (None, Some(mask)) => mask.clone().insert_axis(Axis(0)),
        (None, None) => bail!("sample has no data to write"),
    };
    geotiff::write(path, &data, &sample.transform, sample.crs, None)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn query(
    dataset: &GeoDataset,
    bbox: &[f64],
    time: Option<&[f64]>,
    output: Option<PathBuf>,
) -> Result<()> {
    let (mint, maxt) = match time {
        Some(&[mint, maxt]) => (mint, maxt),
        _ => (TIME_MIN, TIME_MAX),
    };
    let &[minx, maxx, miny, maxy] = bbox else {
        bail!("--bbox needs exactly four values");
    };
    let volume = BoundingVolume::new(minx, maxx, miny, maxy, mint, maxt)?;

    let start = Instant::now();
    let sample = dataset.get(&volume)?;
    info!(
        %volume,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Sample composited"
    );

    if let Some(path) = &output {
        write_sample(&sample, path)?;
    }

    let summary = QuerySummary {
        bounds: sample.bounds,
        crs: sample.crs,
        transform: sample.transform.to_gdal(),
        image: sample.image.as_ref().map(|image| image.dim()),
        mask: sample.mask.as_ref().map(|mask| mask.dim()),
        output,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("geodex=info")),
        )
        .with_writer(std::io::stderr)
        .init();
    geodex_metrics::describe_metrics();

    let cli = Cli::parse();
    match cli.command {
        Command::Index { source } => index(&source.load()?),
        Command::Query {
            source,
            bbox,
            time,
            output,
        } => query(&source.load()?, &bbox, time.as_deref(), output),
    }
}

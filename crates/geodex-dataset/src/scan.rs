//! One-time directory scan that fills a dataset index.

use crate::{ConfigError, DatasetError, Result};
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use geodex_index::{BoundingVolume, SpatialIndex, TIME_MAX, TIME_MIN};
use geodex_metrics::metric_defs;
use geodex_raster::FileResolver;
use glob::Pattern;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Shell-style file name pattern: `*`, `?` and `[...]` classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameGlob(Pattern);

impl FilenameGlob {
    pub fn new(pattern: &str) -> std::result::Result<Self, ConfigError> {
        Pattern::new(pattern)
            .map(Self)
            .map_err(|e| ConfigError::InvalidValue {
                field: "filename_glob",
                reason: format!("`{pattern}`: {e}"),
            })
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Match a whole file name.
    pub fn matches(&self, name: &str) -> bool {
        self.0.matches(name)
    }
}

impl Default for FilenameGlob {
    fn default() -> Self {
        Self(Pattern::new("*").unwrap_or_default())
    }
}

/// Regular expression a file name must match from its first character.
///
/// A capture group named `date` narrows where the date is read from.
#[derive(Debug, Clone)]
pub struct FilenameRegex {
    source: String,
    regex: Regex,
}

impl FilenameRegex {
    pub fn new(pattern: &str) -> std::result::Result<Self, ConfigError> {
        let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|e| ConfigError::InvalidValue {
            field: "filename_regex",
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// `None` when `name` does not match; otherwise the `date` capture, if any.
    pub fn date_token<'a>(&self, name: &'a str) -> Option<Option<&'a str>> {
        let captures = self.regex.captures(name)?;
        Some(captures.name("date").map(|m| m.as_str()))
    }
}

/// Length of the period a date format describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Granularity {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl Granularity {
    fn of(format: &str) -> Self {
        let has = |codes: &[&str]| codes.iter().any(|c| format.contains(c));
        if has(&["%S", "%T", "%s"]) {
            Granularity::Second
        } else if has(&["%M", "%R"]) {
            Granularity::Minute
        } else if has(&["%H", "%I"]) {
            Granularity::Hour
        } else if has(&["%d", "%e", "%j", "%F", "%D"]) {
            Granularity::Day
        } else if has(&["%m", "%b", "%B", "%h"]) {
            Granularity::Month
        } else {
            Granularity::Year
        }
    }

    fn end_of(&self, start: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Granularity::Year => start.checked_add_months(Months::new(12)),
            Granularity::Month => start.checked_add_months(Months::new(1)),
            Granularity::Day => start.checked_add_signed(Duration::days(1)),
            Granularity::Hour => start.checked_add_signed(Duration::hours(1)),
            Granularity::Minute => start.checked_add_signed(Duration::minutes(1)),
            Granularity::Second => start.checked_add_signed(Duration::seconds(1)),
        }
    }
}

fn parse_start(token: &str, format: &str, granularity: Granularity) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(token, format) {
        return Some(dt);
    }
    // Missing fields default to the start of the period.
    let date = match granularity {
        Granularity::Year => NaiveDate::parse_from_str(&format!("{token}-01-01"), &format!("{format}-%m-%d")),
        Granularity::Month => NaiveDate::parse_from_str(&format!("{token}-01"), &format!("{format}-%d")),
        _ => NaiveDate::parse_from_str(token, format),
    };
    date.ok().map(|d| d.and_time(NaiveTime::MIN))
}

/// Time span `[start, end)` in seconds since the Unix epoch for the date
/// embedded in `filename`.
///
/// The whole stem is tried first, then each `_`, `-` or `.` separated token.
/// A format without day or month fields covers the whole month or year.
pub fn parse_date_range(filename: &str, format: &str) -> Option<(f64, f64)> {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let granularity = Granularity::of(format);

    let start = std::iter::once(stem)
        .chain(stem.split(['_', '-', '.']))
        .filter(|token| !token.is_empty())
        // Short numeric tokens such as `18` also parse as years.
        .find_map(|token| parse_start(token, format, granularity).filter(|dt| dt.year() >= 1000))?;
    let end = granularity.end_of(start)?;

    Some((
        start.and_utc().timestamp() as f64,
        end.and_utc().timestamp() as f64,
    ))
}

/// A matched file that was not indexed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a directory scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    /// Files inserted into the index.
    pub indexed: usize,
    /// Files matched by the glob but left out, in scan order.
    pub skipped: Vec<SkippedFile>,
}

/// What a scan looks for.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Sub-directories of the root to walk; empty walks the root itself.
    pub categories: Vec<String>,
    pub filename_glob: FilenameGlob,
    /// Further filter on file names, optionally capturing the date.
    pub filename_regex: Option<FilenameRegex>,
    /// chrono format of a date embedded in file names.
    pub date_format: Option<String>,
}

/// Walk `root`, register every matching file with `resolver` and index its
/// footprint.
///
/// Files are visited in path order and keyed by visit order, so the index
/// (and compositing priority) is stable for a fixed directory tree. Files
/// that fail to open or reproject are recorded in the report and skipped.
pub fn scan(
    root: &Path,
    options: &ScanOptions,
    resolver: &FileResolver,
) -> Result<(SpatialIndex<PathBuf>, ScanReport)> {
    let start = Instant::now();
    let mut index = SpatialIndex::new();
    let mut report = ScanReport::default();

    let dirs: Vec<PathBuf> = if options.categories.is_empty() {
        vec![root.to_path_buf()]
    } else {
        options.categories.iter().map(|c| root.join(c)).collect()
    };

    let mut key = 0u64;
    for dir in dirs {
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Category directory missing, skipping");
            continue;
        }

        let entries = WalkDir::new(&dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Unreadable directory entry");
                    None
                }
            });

        for entry in entries {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if !options.filename_glob.matches(name) {
                continue;
            }
            let date_token = match &options.filename_regex {
                Some(regex) => match regex.date_token(name) {
                    Some(token) => token,
                    None => continue,
                },
                None => None,
            };
            let path = entry.path();

            let footprint = match resolver.register(path) {
                Ok(footprint) => footprint,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping file");
                    metrics::counter!(
                        metric_defs::FILES_SKIPPED.name,
                        "reason" => metric_defs::skip_reason::FOOTPRINT
                    )
                    .increment(1);
                    report.skipped.push(SkippedFile {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let (mint, maxt) = match options.date_format.as_deref() {
                Some(format) => parse_date_range(date_token.unwrap_or(name), format).unwrap_or_else(|| {
                    debug!(path = %path.display(), format, "No date in file name");
                    (TIME_MIN, TIME_MAX)
                }),
                None => (TIME_MIN, TIME_MAX),
            };

            let (minx, maxx, miny, maxy) = footprint;
            let volume = match BoundingVolume::new(minx, maxx, miny, maxy, mint, maxt) {
                Ok(volume) => volume,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping file with invalid bounds");
                    metrics::counter!(
                        metric_defs::FILES_SKIPPED.name,
                        "reason" => metric_defs::skip_reason::BOUNDS
                    )
                    .increment(1);
                    report.skipped.push(SkippedFile {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            debug!(path = %path.display(), key, %volume, "Indexed file");
            index.insert(key, volume, path.to_path_buf())?;
            key += 1;
            report.indexed += 1;
            metrics::counter!(metric_defs::FILES_INDEXED.name).increment(1);
        }
    }

    let elapsed = start.elapsed();
    metrics::histogram!(metric_defs::SCAN_DURATION.name).record(elapsed.as_secs_f64() * 1000.0);

    if index.is_empty() {
        return Err(DatasetError::NotFound {
            root: root.to_path_buf(),
            reason: format!("no files matching `{}`", options.filename_glob.as_str()),
        });
    }

    info!(
        root = %root.display(),
        indexed = report.indexed,
        skipped = report.skipped.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Scan complete"
    );
    Ok((index, report))
}

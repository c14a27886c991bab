//! Making sure a dataset is present on disk before it is scanned.

use crate::error::FetchError;
use crate::{DatasetError, Result};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Timeout for a single archive download.
const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Checks, and if possible repairs, a dataset root before scanning.
pub trait Verifier: Send + Sync + fmt::Debug {
    fn verify(&self, root: &Path) -> Result<()>;
}

/// Accepts any root; the scan reports an empty one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVerify;

impl Verifier for NoVerify {
    fn verify(&self, _root: &Path) -> Result<()> {
        Ok(())
    }
}

/// Downloads and unpacks archives.
pub trait Fetcher: Send + Sync + fmt::Debug {
    /// Download `url` to `dest`.
    fn download(&self, url: &str, dest: &Path) -> std::result::Result<(), FetchError>;

    /// Unpack `archive` next to itself, returning the files written.
    fn extract(&self, archive: &Path) -> std::result::Result<Vec<PathBuf>, FetchError>;
}

/// Blocking HTTP downloads with gzip and zip extraction.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher").finish()
    }
}

impl HttpFetcher {
    pub fn new() -> std::result::Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn download(&self, url: &str, dest: &Path) -> std::result::Result<(), FetchError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(url, dest = %dest.display(), "Downloading");
        let mut response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        // Interrupted downloads stay under the `.part` name.
        let partial = dest.with_extension("part");
        let mut file = BufWriter::new(File::create(&partial)?);
        let bytes = response.copy_to(&mut file)?;
        drop(file);
        fs::rename(&partial, dest)?;
        debug!(url, bytes, "Download complete");
        Ok(())
    }

    fn extract(&self, archive: &Path) -> std::result::Result<Vec<PathBuf>, FetchError> {
        match archive.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => extract_gzip(archive),
            Some("zip") => extract_zip(archive),
            _ => Err(FetchError::UnsupportedArchive(archive.to_path_buf())),
        }
    }
}

fn extract_gzip(archive: &Path) -> std::result::Result<Vec<PathBuf>, FetchError> {
    let output = archive.with_extension("");
    let mut decoder = GzDecoder::new(BufReader::new(File::open(archive)?));
    let mut writer = BufWriter::new(File::create(&output)?);
    io::copy(&mut decoder, &mut writer)?;
    debug!(archive = %archive.display(), output = %output.display(), "Extracted");
    Ok(vec![output])
}

/// Unpacks every entry into the archive's directory. Entries whose names
/// would escape that directory are skipped.
fn extract_zip(archive: &Path) -> std::result::Result<Vec<PathBuf>, FetchError> {
    let dir = archive.parent().unwrap_or_else(|| Path::new("."));
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
    let mut written = Vec::new();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(name) = entry.enclosed_name() else {
            warn!(archive = %archive.display(), entry = entry.name(), "Skipping unsafe entry");
            continue;
        };
        let output = dir.join(name);
        if entry.is_dir() {
            fs::create_dir_all(&output)?;
            continue;
        }
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&output)?);
        io::copy(&mut entry, &mut writer)?;
        written.push(output);
    }

    debug!(archive = %archive.display(), files = written.len(), "Extracted");
    Ok(written)
}

/// One downloadable archive of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSpec {
    /// File name under the dataset root.
    pub filename: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Hex-encoded SHA-256 of the archive.
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Hex SHA-256 digest of a file.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut reader = BufReader::new(File::open(path)?);
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Verifies expected files, extracting or downloading archives as needed.
///
/// 1. All expected paths present: done.
/// 2. Archives already under the root are checked and extracted.
/// 3. Otherwise archives are downloaded, if allowed.
#[derive(Debug, Clone)]
pub struct ArchiveVerifier {
    expected: Vec<PathBuf>,
    archives: Vec<ArchiveSpec>,
    download: bool,
    checksum: bool,
    fetcher: Option<Arc<dyn Fetcher>>,
}

impl ArchiveVerifier {
    /// Verifier requiring `expected` paths (relative to the root).
    pub fn new<I, P>(expected: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            expected: expected.into_iter().map(Into::into).collect(),
            archives: Vec::new(),
            download: false,
            checksum: false,
            fetcher: None,
        }
    }

    pub fn with_archives(mut self, archives: Vec<ArchiveSpec>) -> Self {
        self.archives = archives;
        self
    }

    /// Allow downloading missing archives through `fetcher`.
    pub fn with_download(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.download = true;
        self.fetcher = Some(fetcher);
        self
    }

    /// Use `fetcher` for extraction without enabling downloads.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_checksum(mut self, checksum: bool) -> Self {
        self.checksum = checksum;
        self
    }

    fn complete(&self, root: &Path) -> bool {
        self.expected.iter().all(|p| root.join(p).exists())
    }

    fn check(&self, archive: &Path, spec: &ArchiveSpec) -> Result<()> {
        let Some(expected) = spec.sha256.as_deref().filter(|_| self.checksum) else {
            return Ok(());
        };
        let actual = sha256_file(archive)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(DatasetError::Corrupted {
                path: archive.to_path_buf(),
            });
        }
        Ok(())
    }

    fn unpack(&self, archive: &Path) -> Result<()> {
        match &self.fetcher {
            Some(fetcher) => {
                fetcher.extract(archive)?;
                Ok(())
            }
            None => Err(FetchError::UnsupportedArchive(archive.to_path_buf()).into()),
        }
    }
}

impl Verifier for ArchiveVerifier {
    fn verify(&self, root: &Path) -> Result<()> {
        if self.complete(root) {
            return Ok(());
        }

        let mut extracted = false;
        for spec in &self.archives {
            let archive = root.join(&spec.filename);
            if archive.exists() {
                self.check(&archive, spec)?;
                self.unpack(&archive)?;
                extracted = true;
            }
        }
        if extracted && self.complete(root) {
            return Ok(());
        }

        let fetcher = match (&self.fetcher, self.download) {
            (Some(fetcher), true) => fetcher,
            _ => {
                return Err(DatasetError::NotFound {
                    root: root.to_path_buf(),
                    reason: "files missing and download disabled".to_string(),
                })
            }
        };

        for spec in &self.archives {
            let archive = root.join(&spec.filename);
            if archive.exists() {
                continue;
            }
            let Some(url) = spec.url.as_deref() else {
                continue;
            };
            fetcher.download(url, &archive)?;
            self.check(&archive, spec)?;
            self.unpack(&archive)?;
        }

        if self.complete(root) {
            Ok(())
        } else {
            Err(DatasetError::NotFound {
                root: root.to_path_buf(),
                reason: "files still missing after download".to_string(),
            })
        }
    }
}

//! Fetch the measurement archive and extract it into the data directory.
//!
//! The archive is identified by an opaque file id. It is downloaded once
//! into a cache directory and unpacked into the configured data directory.
//! There is no retry: a failed request aborts with the HTTP status or
//! transport error.

use crate::error::{CasiError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default download endpoint; the file id is appended as `id=<file_id>`.
pub const DEFAULT_BASE_URL: &str = "https://drive.google.com/uc?export=download";

/// Where the archive comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSource {
    /// Opaque file id of the remote archive.
    pub file_id: String,
    /// Download endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Connect and read timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Cache directory for the downloaded archive (defaults to the user cache).
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl ArchiveSource {
    pub fn new(file_id: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            cache_dir: None,
        }
    }

    /// Download URL for the archive.
    pub fn url(&self) -> String {
        let sep = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{}id={}", self.base_url, sep, self.file_id)
    }

    /// Path of the cached archive.
    pub fn archive_path(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(default_cache_dir)
            .join(format!("{}.zip", self.file_id))
    }
}

/// Result of fetching and extracting the archive.
#[derive(Debug, Clone)]
pub struct FetchedArchive {
    /// Cached archive path.
    pub archive: PathBuf,
    /// Directory the archive was extracted into.
    pub data_dir: PathBuf,
    /// Extracted files.
    pub files: Vec<PathBuf>,
    /// Whether this call downloaded the archive (false when cached).
    pub downloaded: bool,
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ldpsa-casi")
        .join("archives")
}

/// Download (unless cached or `force`) and extract the archive into `data_dir`.
pub fn fetch_archive(source: &ArchiveSource, data_dir: &Path, force: bool) -> Result<FetchedArchive> {
    if source.file_id.trim().is_empty() {
        return Err(CasiError::InvalidParameter(
            "archive file id is empty".to_string(),
        ));
    }

    let archive = source.archive_path();
    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent)?;
    }

    let downloaded = force || !archive.exists();
    if downloaded {
        log::info!("Downloading {}", source.url());
        let bytes = download(&source.url(), Duration::from_secs(source.timeout_secs))?;
        check_archive_bytes(&bytes)?;
        fs::write(&archive, &bytes)?;
        log::info!("Saved {} bytes to {}", bytes.len(), archive.display());
    } else {
        log::info!("Using cached archive {}", archive.display());
    }

    let files = extract_archive(&archive, data_dir)?;
    log::info!("Extracted {} files into {}", files.len(), data_dir.display());

    Ok(FetchedArchive {
        archive,
        data_dir: data_dir.to_path_buf(),
        files,
        downloaded,
    })
}

fn download(url: &str, timeout: Duration) -> Result<Vec<u8>> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .build();

    let response = match agent.get(url).call() {
        Ok(resp) => resp,
        Err(ureq::Error::Status(code, _)) => {
            return Err(CasiError::Fetch(format!(
                "download failed with http status {}",
                code
            )))
        }
        Err(ureq::Error::Transport(err)) => {
            return Err(CasiError::Fetch(format!("transport error: {}", err)))
        }
    };

    let mut bytes = Vec::new();
    response.into_reader().read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Reject empty downloads and HTML pages served in place of the archive.
fn check_archive_bytes(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(CasiError::Fetch("downloaded file is empty".to_string()));
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
    let head = head.trim_start();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return Err(CasiError::Fetch(
            "received an HTML page instead of a zip archive; check the file id".to_string(),
        ));
    }
    Ok(())
}

/// Extract every regular file of a zip archive below `dest`.
///
/// Entries whose names would escape `dest` are skipped.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    fs::create_dir_all(dest)?;

    let mut files = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            log::warn!("Skipping archive entry with unsafe name '{}'", entry.name());
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        files.push(target);
    }

    files.sort();
    Ok(files)
}

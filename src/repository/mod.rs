// src/repository/mod.rs

//! Sync repositories and package downloading
//!
//! This module provides functionality for:
//! - Holding the package snapshot of each configured sync repository
//! - Refreshing repository databases (`-Sy`) with mirror fallback
//! - Downloading files with retry support
//! - Verifying file checksums

pub mod parsers;

use crate::error::{Error, Result};
use crate::packages::PackageRecord;
use crate::version;
use parsers::RepositoryParser;
use parsers::arch::ArchParser;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Suffix of partially downloaded files
const PARTIAL_SUFFIX: &str = ".part";

/// Something that can place the contents of a URL at a local path
///
/// Implementations must leave `dest` untouched on failure.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

impl<T: Fetcher + ?Sized> Fetcher for &T {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        (**self).fetch(url, dest)
    }
}

/// HTTP client wrapper with retry support
pub struct RepositoryClient {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl RepositoryClient {
    /// Create a new repository client
    ///
    /// Failed attempts are retried up to `max_retries` times in total with a
    /// linearly growing delay.
    pub fn new(max_retries: u32, retry_delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: max_retries.max(1),
            retry_delay,
        })
    }

    /// Download a file to the specified path with retry support
    pub fn download_file(&self, url: &str, dest_path: &Path) -> Result<()> {
        debug!("Downloading {} to {}", url, dest_path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        let temp_path = partial_path(dest_path);

        if let Some(local) = url.strip_prefix("file://") {
            fs::copy(local, &temp_path)
                .map_err(|e| Error::DownloadError(format!("Failed to copy {}: {}", local, e)))?;
            return finish_download(&temp_path, dest_path);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(mut response) => {
                    if !response.status().is_success() {
                        return Err(Error::DownloadError(format!(
                            "HTTP {} from {}",
                            response.status(),
                            url
                        )));
                    }

                    // Write to temporary file first
                    let mut file = File::create(&temp_path).map_err(|e| {
                        Error::IoError(format!("Failed to create file {}: {}", temp_path.display(), e))
                    })?;

                    if let Err(e) = io::copy(&mut response, &mut file) {
                        let _ = fs::remove_file(&temp_path);
                        return Err(Error::DownloadError(format!(
                            "Failed to write data from {}: {}",
                            url, e
                        )));
                    }

                    return finish_download(&temp_path, dest_path);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed to download {} after {} attempts: {}",
                            url, attempt, e
                        )));
                    }
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(self.retry_delay * attempt);
                }
            }
        }
    }
}

impl Fetcher for RepositoryClient {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        self.download_file(url, dest)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Atomic rename from the partial file to its final destination
fn finish_download(temp_path: &Path, dest_path: &Path) -> Result<()> {
    fs::rename(temp_path, dest_path).map_err(|e| {
        Error::IoError(format!(
            "Failed to move {} to {}: {}",
            temp_path.display(),
            dest_path.display(),
            e
        ))
    })?;

    debug!("Successfully downloaded to {}", dest_path.display());
    Ok(())
}

/// Try each URL in order until one succeeds
///
/// Returns the URL that was used.
pub fn fetch_from_mirrors(fetcher: &dyn Fetcher, urls: &[String], dest: &Path) -> Result<String> {
    let mut failures = Vec::new();

    for url in urls {
        match fetcher.fetch(url, dest) {
            Ok(()) => return Ok(url.clone()),
            Err(e) => {
                warn!("Mirror failed: {}", e);
                failures.push(e.to_string());
            }
        }
    }

    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if failures.is_empty() {
        return Err(Error::DownloadError(format!("no servers configured for {}", name)));
    }
    Err(Error::DownloadError(format!(
        "{} could not be retrieved from any mirror: {}",
        name,
        failures.join("; ")
    )))
}

/// Compute the SHA-256 of a file as lowercase hex
pub fn compute_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open file for checksum: {}", e)))?;

    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| Error::IoError(format!("Failed to read file for checksum: {}", e)))?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify file checksum matches expected value
pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    debug!("Verifying checksum for {}", path.display());

    let actual = compute_sha256(path)?;

    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    debug!("Checksum verified: {}", expected);
    Ok(())
}

/// A configured sync repository and its package snapshot
#[derive(Debug, Clone, Default)]
pub struct SyncRepository {
    pub name: String,
    /// Server base URLs in preference order, `$repo`/`$arch` already expanded
    pub servers: Vec<String>,
    pub sig_level: Option<String>,
    pub packages: Vec<PackageRecord>,
}

impl SyncRepository {
    pub fn new(name: String, servers: Vec<String>, sig_level: Option<String>) -> Self {
        Self {
            name,
            servers,
            sig_level,
            packages: Vec::new(),
        }
    }

    /// Path of this repository's database inside the sync directory
    pub fn database_path(&self, sync_dir: &Path) -> PathBuf {
        sync_dir.join(format!("{}.db", self.name))
    }

    /// Candidate download URLs for a file published by this repository
    pub fn urls_for(&self, filename: &str) -> Vec<String> {
        self.servers
            .iter()
            .map(|server| format!("{}/{}", server.trim_end_matches('/'), filename))
            .collect()
    }

    /// Replace the snapshot with the packages of the on-disk database
    ///
    /// A repository that was never refreshed has an empty snapshot.
    pub fn load(&mut self, sync_dir: &Path) -> Result<()> {
        let path = self.database_path(sync_dir);
        if !path.exists() {
            warn!(
                "database file for '{}' does not exist (use '-Sy' to download)",
                self.name
            );
            self.packages.clear();
            return Ok(());
        }

        let data = fs::read(&path)?;
        let parser = ArchParser::new(self.name.clone());
        let mut packages = parser.parse_database(&data)?;
        packages.sort_by(|a, b| a.name.cmp(&b.name));

        debug!("Loaded {} packages from {}", packages.len(), path.display());
        self.packages = packages;
        Ok(())
    }

    /// Look up a package by exact name
    ///
    /// If a database lists a name twice the newest version wins.
    pub fn find(&self, name: &str) -> Option<&PackageRecord> {
        self.packages
            .iter()
            .filter(|p| p.name == name)
            .max_by(|a, b| version::compare(&a.version, &b.version))
    }
}

/// Download fresh databases for every repository (`-Sy`)
///
/// Each repository is replaced wholesale: the new file is written next to
/// the old one and renamed over it, then the snapshot is reloaded.
pub fn refresh(repos: &mut [SyncRepository], sync_dir: &Path, fetcher: &dyn Fetcher) -> Result<usize> {
    fs::create_dir_all(sync_dir)?;

    let mut refreshed = 0;
    for repo in repos.iter_mut() {
        if repo.servers.is_empty() {
            warn!("no servers configured for repository '{}', skipping", repo.name);
            continue;
        }
        info!("synchronizing package database {}", repo.name);

        let dest = repo.database_path(sync_dir);
        let urls = repo.urls_for(&format!("{}.db", repo.name));
        let used = fetch_from_mirrors(fetcher, &urls, &dest)?;
        debug!("{} retrieved from {}", repo.name, used);

        repo.load(sync_dir)?;
        refreshed += 1;
    }

    Ok(refreshed)
}

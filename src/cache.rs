// src/cache.rs

//! Package cache pruning (`-Sc`, `-Scc`)

use crate::catalog::Catalog;
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name, version and architecture encoded in an archive file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub name: String,
    pub version: String,
    pub architecture: String,
}

impl ArchiveName {
    /// Parse `name-pkgver-pkgrel-arch.pkg.tar[.ext]`
    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, _) = file_name.split_once(".pkg.tar")?;
        let mut parts = stem.rsplitn(4, '-');
        let architecture = parts.next()?;
        let pkgrel = parts.next()?;
        let pkgver = parts.next()?;
        let name = parts.next()?;
        if name.is_empty() || pkgver.is_empty() || pkgrel.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            version: format!("{}-{}", pkgver, pkgrel),
            architecture: architecture.to_string(),
        })
    }
}

/// What a cache clean would do
#[derive(Debug, Default)]
pub struct CachePlan {
    pub keep: Vec<PathBuf>,
    pub remove: Vec<PathBuf>,
    /// Bytes freed by removing `remove`
    pub reclaimed: u64,
}

fn is_package_file(name: &str) -> bool {
    name.contains(".pkg.tar")
}

/// Decide which cached archives to delete
///
/// With `all` every archive goes. Otherwise an archive stays when it is the
/// installed version of its package or the newest version any repository
/// offers. Signatures follow their archive; partial downloads always go.
pub fn classify(cachedir: &Path, catalog: &Catalog, all: bool) -> Result<CachePlan> {
    let mut plan = CachePlan::default();
    if !cachedir.is_dir() {
        debug!("cache directory {} does not exist", cachedir.display());
        return Ok(plan);
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(cachedir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    for path in entries {
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if !is_package_file(&file_name) {
            continue;
        }

        let archive_name = file_name.strip_suffix(".sig").unwrap_or(&file_name);
        let keep = if all || archive_name.ends_with(".part") {
            false
        } else {
            match ArchiveName::parse(archive_name) {
                Some(parsed) => is_current(catalog, &parsed),
                None => {
                    warn!("{}: unrecognized archive name, keeping it", file_name);
                    true
                }
            }
        };

        if keep {
            plan.keep.push(path);
        } else {
            plan.reclaimed += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            plan.remove.push(path);
        }
    }

    Ok(plan)
}

fn is_current(catalog: &Catalog, archive: &ArchiveName) -> bool {
    let installed = catalog
        .local
        .get(&archive.name)
        .is_some_and(|p| p.version == archive.version);
    let latest = catalog
        .latest_sync(&archive.name)
        .is_some_and(|p| p.version == archive.version);
    installed || latest
}

/// Outcome of `apply`
#[derive(Debug, Default)]
pub struct CleanReport {
    pub removed: usize,
    pub freed: u64,
    /// Files that could not be deleted
    pub failed: Vec<PathBuf>,
}

/// Delete what `classify` selected
pub fn apply(plan: &CachePlan) -> Result<CleanReport> {
    let mut report = CleanReport::default();
    for path in &plan.remove {
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        match fs::remove_file(path) {
            Ok(()) => {
                report.removed += 1;
                report.freed += size;
            }
            Err(e) => {
                warn!("could not remove {}: {}", path.display(), e);
                report.failed.push(path.clone());
            }
        }
    }
    Ok(report)
}

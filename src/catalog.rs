// src/catalog.rs

//! Read-only view over the sync repositories and the installed packages
//!
//! A catalog is a snapshot taken at the start of an invocation. Nothing in it
//! changes while the resolver and planner work on it.

use crate::context::Context;
use crate::db::models;
use crate::error::Result;
use crate::packages::arch::ArchPackage;
use crate::packages::{PackageFormat, PackageRecord};
use crate::repository::SyncRepository;
use crate::version::{self, Dependency};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Installed packages plus the reverse file index
#[derive(Debug, Clone, Default)]
pub struct LocalDatabase {
    packages: BTreeMap<String, PackageRecord>,
    owners: HashMap<String, String>,
}

impl LocalDatabase {
    pub fn from_records(records: Vec<PackageRecord>) -> Self {
        let mut db = Self::default();
        for record in records {
            for path in record.payload_files() {
                db.owners.insert(path.to_string(), record.name.clone());
            }
            db.packages.insert(record.name.clone(), record);
        }
        db
    }

    /// Snapshot the local database
    pub fn load(conn: &Connection) -> Result<Self> {
        let records = models::load_all(conn)?;
        debug!("Loaded {} installed packages", records.len());
        Ok(Self::from_records(records))
    }

    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.get(name)
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Installed packages ordered by name
    pub fn packages(&self) -> impl Iterator<Item = &PackageRecord> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Package owning a regular file, by absolute path
    pub fn owner(&self, path: &str) -> Option<&str> {
        self.owners.get(path).map(String::as_str)
    }

    /// Installed packages satisfying a relation, ordered by name
    pub fn providers<'a>(&'a self, dep: &'a Dependency) -> impl Iterator<Item = &'a PackageRecord> {
        self.packages.values().filter(move |p| version::satisfies(p, dep))
    }
}

/// A package archive named on the command line (`-U`)
#[derive(Debug, Clone)]
pub struct LocalArchive {
    pub path: PathBuf,
    pub record: PackageRecord,
}

impl LocalArchive {
    /// Read an archive's metadata
    pub fn open(path: &Path) -> Result<Self> {
        let package = ArchPackage::parse(path)?;
        let mut record = package.to_record();
        record.repository = None;
        Ok(Self {
            path: path.to_path_buf(),
            record,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Sync repositories in configuration order
    pub repos: Vec<SyncRepository>,
    pub local: LocalDatabase,
    pub archives: Vec<LocalArchive>,
    /// Names `-Su` must not upgrade (`IgnorePkg`)
    pub ignored: Vec<String>,
}

impl Catalog {
    pub fn new(repos: Vec<SyncRepository>, local: LocalDatabase) -> Self {
        Self {
            repos,
            local,
            archives: Vec::new(),
            ignored: Vec::new(),
        }
    }

    /// Snapshot the context's repositories and the local database
    pub fn load(ctx: &Context, conn: &Connection) -> Result<Self> {
        let mut catalog = Self::new(ctx.repositories.clone(), LocalDatabase::load(conn)?);
        catalog.ignored = ctx.ignore_pkg.clone();
        Ok(catalog)
    }

    /// Add package archives given on the command line
    pub fn with_archives(mut self, paths: &[PathBuf]) -> Result<Self> {
        for path in paths {
            self.archives.push(LocalArchive::open(path)?);
        }
        Ok(self)
    }

    pub fn repository(&self, name: &str) -> Option<&SyncRepository> {
        self.repos.iter().find(|r| r.name == name)
    }

    /// Sync package by exact name; earlier repositories win
    pub fn find_sync(&self, name: &str) -> Option<&PackageRecord> {
        self.repos.iter().find_map(|repo| repo.find(name))
    }

    /// Sync package by exact name inside one repository
    pub fn find_in_repo(&self, repo: &str, name: &str) -> Option<&PackageRecord> {
        self.repository(repo).and_then(|r| r.find(name))
    }

    /// Every sync package, repository by repository
    pub fn sync_packages(&self) -> impl Iterator<Item = &PackageRecord> {
        self.repos.iter().flat_map(|r| r.packages.iter())
    }

    /// Whether any enabled repository lists this name
    pub fn in_any_repo(&self, name: &str) -> bool {
        self.find_sync(name).is_some()
    }

    /// Highest version of a name across all repositories
    pub fn latest_sync(&self, name: &str) -> Option<&PackageRecord> {
        self.sync_packages()
            .filter(|p| p.name == name)
            .max_by(|a, b| version::compare(&a.version, &b.version))
    }

    /// Sync package satisfying a relation
    ///
    /// A package carrying the exact name wins; otherwise the provider with
    /// the lexically smallest name is chosen so plans are reproducible.
    pub fn find_provider(&self, dep: &Dependency) -> Option<&PackageRecord> {
        if let Some(exact) = self.find_sync(&dep.name) {
            if version::satisfies(exact, dep) {
                return Some(exact);
            }
        }

        let mut providers: Vec<&PackageRecord> = self
            .sync_packages()
            .filter(|p| p.name != dep.name && version::satisfies(p, dep))
            .collect();
        // Stable sort keeps repository order among equal names
        providers.sort_by(|a, b| a.name.cmp(&b.name));
        providers.into_iter().next()
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.iter().any(|i| i == name)
    }

    /// Archive given on the command line, by path
    pub fn archive(&self, path: &Path) -> Option<&LocalArchive> {
        self.archives.iter().find(|a| a.path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, version: &str) -> PackageRecord {
        PackageRecord::new(name.to_string(), version.to_string())
    }

    fn repo(name: &str, packages: Vec<PackageRecord>) -> SyncRepository {
        let mut repo = SyncRepository::new(name.to_string(), vec![], None);
        repo.packages = packages;
        repo
    }

    #[test]
    fn test_reverse_file_index() {
        let mut vim = record("vim", "9.1-1");
        vim.files = vec!["/usr/".to_string(), "/usr/bin/vim".to_string()];
        let db = LocalDatabase::from_records(vec![vim]);

        assert_eq!(db.owner("/usr/bin/vim"), Some("vim"));
        assert_eq!(db.owner("/usr/"), None);
        assert!(db.is_installed("vim"));
    }

    #[test]
    fn test_first_repository_wins() {
        let catalog = Catalog::new(
            vec![
                repo("testing", vec![record("vim", "9.2-1")]),
                repo("extra", vec![record("vim", "9.1-1")]),
            ],
            LocalDatabase::default(),
        );

        assert_eq!(catalog.find_sync("vim").unwrap().version, "9.2-1");
        assert_eq!(catalog.find_in_repo("extra", "vim").unwrap().version, "9.1-1");
        assert!(catalog.find_in_repo("core", "vim").is_none());
    }

    #[test]
    fn test_provider_selection_is_lexical() {
        let mut zsh = record("zsh", "5.9-1");
        zsh.provides = vec![Dependency::parse("sh")];
        let mut dash = record("dash", "0.5-1");
        dash.provides = vec![Dependency::parse("sh")];

        let catalog = Catalog::new(
            vec![repo("extra", vec![zsh]), repo("core", vec![dash])],
            LocalDatabase::default(),
        );

        assert_eq!(catalog.find_provider(&Dependency::parse("sh")).unwrap().name, "dash");
        assert!(catalog.find_provider(&Dependency::parse("sh>=1")).is_none());
    }

    #[test]
    fn test_exact_name_preferred_over_provider() {
        let mut busybox = record("busybox", "1.36-1");
        busybox.provides = vec![Dependency::parse("bash=5.2")];
        let catalog = Catalog::new(
            vec![repo("core", vec![busybox, record("bash", "5.2.037-1")])],
            LocalDatabase::default(),
        );

        assert_eq!(catalog.find_provider(&Dependency::parse("bash")).unwrap().name, "bash");
    }

    #[test]
    fn test_latest_sync_across_repos() {
        let catalog = Catalog::new(
            vec![
                repo("core", vec![record("zlib", "1.3-1")]),
                repo("testing", vec![record("zlib", "1.3.1-1")]),
            ],
            LocalDatabase::default(),
        );
        assert_eq!(catalog.latest_sync("zlib").unwrap().version, "1.3.1-1");
    }
}

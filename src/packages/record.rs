// src/packages/record.rs

//! The package record shared by every catalog

use crate::version::Dependency;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Why a package is installed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallReason {
    #[default]
    Explicit,
    Dependency,
}

impl InstallReason {
    pub fn as_str(&self) -> &str {
        match self {
            InstallReason::Explicit => "explicit",
            InstallReason::Dependency => "dependency",
        }
    }
}

impl FromStr for InstallReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "explicit" => Ok(InstallReason::Explicit),
            "dependency" => Ok(InstallReason::Dependency),
            _ => Err(format!("Invalid install reason: {}", s)),
        }
    }
}

/// Metadata for one package version
///
/// Records are snapshots: a commit writes new rows, it never edits a record
/// someone else is holding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub architecture: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub licenses: Vec<String>,
    pub groups: Vec<String>,
    pub depends: Vec<Dependency>,
    pub optdepends: Vec<String>,
    pub provides: Vec<Dependency>,
    pub conflicts: Vec<Dependency>,
    pub replaces: Vec<Dependency>,
    /// Config files saved as `.pacsave` on removal (relative to root)
    pub backup: Vec<String>,
    pub download_size: u64,
    pub installed_size: u64,
    /// Sync repository name; `None` for local-only packages
    pub repository: Option<String>,
    /// Archive file name inside the repository
    pub filename: Option<String>,
    pub sha256: Option<String>,
    pub reason: InstallReason,
    /// Absolute paths; directories end with `/`
    pub files: Vec<String>,
    /// Contents of the package's `.INSTALL` script
    pub scriptlet: Option<String>,
    pub install_date: Option<String>,
}

impl PackageRecord {
    /// Create a record with only name and version set
    pub fn new(name: String, version: String) -> Self {
        Self {
            name,
            version,
            ..Default::default()
        }
    }

    /// Name of the archive for this version in a package cache
    pub fn archive_name(&self) -> String {
        match &self.filename {
            Some(filename) => filename.clone(),
            None => format!(
                "{}-{}-{}.pkg.tar.zst",
                self.name,
                self.version,
                self.architecture.as_deref().unwrap_or("any")
            ),
        }
    }

    /// Regular files and links, without directory entries
    pub fn payload_files(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .map(String::as_str)
            .filter(|path| !path.ends_with('/'))
    }

    /// `name-version`, as shown in reports
    pub fn display_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

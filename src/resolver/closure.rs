// src/resolver/closure.rs

//! Resolution result data structures

use crate::packages::PackageRecord;
use std::fmt;
use std::path::PathBuf;

/// Where the archive for an incoming package comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// A sync repository, by name
    Repository(String),
    /// A package file named on the command line
    File(PathBuf),
}

/// Why a package is part of the closure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Named on the command line
    Explicit,
    /// Pulled in to satisfy a dependency of the named package
    DependencyOf(String),
    /// Newer version found by `-Su`
    Upgrade,
    /// Takes the place of the named installed package
    Replaces(String),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Explicit => write!(f, "explicit target"),
            Origin::DependencyOf(name) => write!(f, "dependency of {}", name),
            Origin::Upgrade => write!(f, "system upgrade"),
            Origin::Replaces(name) => write!(f, "replaces {}", name),
        }
    }
}

/// A package to install or upgrade
#[derive(Debug, Clone)]
pub struct ClosureEntry {
    pub record: PackageRecord,
    pub source: PackageSource,
    pub origin: Origin,
}

/// Why a package is being removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOrigin {
    Explicit,
    /// `-Rs`: a dependency nothing needs any more
    Unneeded,
    /// Superseded by the named incoming package
    ReplacedBy(String),
}

#[derive(Debug, Clone)]
pub struct Removal {
    pub record: PackageRecord,
    pub origin: RemovalOrigin,
}

/// Everything an operation adds and removes
#[derive(Debug, Clone, Default)]
pub struct Closure {
    /// In the order packages were added
    pub installs: Vec<ClosureEntry>,
    pub removals: Vec<Removal>,
}

impl Closure {
    pub fn is_empty(&self) -> bool {
        self.installs.is_empty() && self.removals.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ClosureEntry> {
        self.installs.iter().find(|e| e.record.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_removed(&self, name: &str) -> bool {
        self.removals.iter().any(|r| r.record.name == name)
    }

    pub(crate) fn add(&mut self, record: PackageRecord, source: PackageSource, origin: Origin) {
        self.installs.push(ClosureEntry {
            record,
            source,
            origin,
        });
    }

    pub(crate) fn remove(&mut self, record: PackageRecord, origin: RemovalOrigin) {
        if !self.is_removed(&record.name) {
            self.removals.push(Removal { record, origin });
        }
    }
}

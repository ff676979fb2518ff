// src/request.rs

//! The structured operation request built once per invocation
//!
//! Each operation carries only the options that are legal for it, so an
//! `--overwrite` on a query cannot even be expressed.

use crate::packages::InstallReason;
use std::path::PathBuf;

/// How to resolve a leftover transaction journal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverMode {
    /// Undo the interrupted step, then apply the remaining ones
    Resume,
    /// Undo every step the interrupted transaction started
    Rollback,
}

/// Options shared by every operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalFlags {
    /// `--test` / `--dry-run`
    pub simulate: bool,
    pub noconfirm: bool,
    pub root: Option<PathBuf>,
    pub dbpath: Option<PathBuf>,
    pub cachedir: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub recover: Option<RecoverMode>,
    pub debug: bool,
}

/// Options of operations that install packages (`-S`, `-U`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// 1: skip dependency expansion, 2: also ignore version constraints
    pub nodeps: u8,
    pub noscriptlet: bool,
    pub needed: bool,
    /// Glob patterns matched against absolute paths
    pub overwrite: Vec<String>,
    /// `--asdeps` / `--asexplicit`
    pub reason: Option<InstallReason>,
}

/// What a `-S` invocation does after an optional refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Install targets and/or upgrade the system; both may be empty for a
    /// bare `-Sy`
    Install {
        targets: Vec<String>,
        sysupgrade: bool,
        options: InstallOptions,
    },
    Search(Vec<String>),
    Info(Vec<String>),
    /// `-Sc` (`all == false`) or `-Scc`
    CleanCache { all: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOperation {
    pub refresh: bool,
    pub action: SyncAction,
}

/// `-Q` variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOperation {
    /// Installed packages, optionally restricted to the named ones
    List(Vec<String>),
    Info(Vec<String>),
    Search(Vec<String>),
    Files(Vec<String>),
    Foreign,
    Owner(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOperation {
    pub targets: Vec<String>,
    /// `-s`: also remove dependencies nothing needs any more
    pub recursive: bool,
    /// `-n`: do not keep `.pacsave` copies of backup files
    pub nosave: bool,
    pub nodeps: u8,
    pub noscriptlet: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInstallOperation {
    pub paths: Vec<PathBuf>,
    pub options: InstallOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Sync(SyncOperation),
    Query(QueryOperation),
    Remove(RemoveOperation),
    FileInstall(FileInstallOperation),
    /// List past transactions
    History,
}

impl Operation {
    /// Whether the operation can change the local database or the root
    pub fn is_mutating(&self) -> bool {
        match self {
            Operation::Sync(sync) => match &sync.action {
                SyncAction::Install { .. } | SyncAction::CleanCache { .. } => true,
                SyncAction::Search(_) | SyncAction::Info(_) => sync.refresh,
            },
            Operation::Remove(_) | Operation::FileInstall(_) => true,
            Operation::Query(_) | Operation::History => false,
        }
    }

    /// Install options, for operations that install packages
    pub fn install_options(&self) -> Option<&InstallOptions> {
        match self {
            Operation::Sync(SyncOperation {
                action: SyncAction::Install { options, .. },
                ..
            }) => Some(options),
            Operation::FileInstall(op) => Some(&op.options),
            _ => None,
        }
    }

    /// `--nodeps` count of the operation
    pub fn nodeps(&self) -> u8 {
        match self {
            Operation::Remove(op) => op.nodeps,
            _ => self.install_options().map(|o| o.nodeps).unwrap_or(0),
        }
    }

    /// Whether package scriptlets should be skipped
    pub fn noscriptlet(&self) -> bool {
        match self {
            Operation::Remove(op) => op.noscriptlet,
            _ => self.install_options().map(|o| o.noscriptlet).unwrap_or(false),
        }
    }
}

/// A fully validated invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub operation: Operation,
    pub flags: GlobalFlags,
}

impl OperationRequest {
    pub fn new(operation: Operation, flags: GlobalFlags) -> Self {
        Self { operation, flags }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutating_classification() {
        let search = Operation::Sync(SyncOperation {
            refresh: false,
            action: SyncAction::Search(vec!["vim".to_string()]),
        });
        assert!(!search.is_mutating());

        let install = Operation::Sync(SyncOperation {
            refresh: false,
            action: SyncAction::Install {
                targets: vec!["vim".to_string()],
                sysupgrade: false,
                options: InstallOptions::default(),
            },
        });
        assert!(install.is_mutating());
        assert!(!Operation::Query(QueryOperation::Foreign).is_mutating());
    }

    #[test]
    fn test_option_accessors() {
        let remove = Operation::Remove(RemoveOperation {
            targets: vec!["vim".to_string()],
            recursive: true,
            nosave: false,
            nodeps: 2,
            noscriptlet: true,
        });
        assert_eq!(remove.nodeps(), 2);
        assert!(remove.noscriptlet());
        assert!(remove.install_options().is_none());
    }
}

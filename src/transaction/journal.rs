// src/transaction/journal.rs

//! Write-ahead journal for commits
//!
//! The journal exists only while a commit is running. Each step is marked
//! started before the first mutation and completed after its database update.
//! Files a step displaces are moved into the backup area first, so every
//! started step can be undone.

use crate::error::{Error, Result};
use crate::packages::PackageRecord;
use crate::transaction::planner::StepKind;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Started,
    Completed,
}

/// A file moved out of the way by a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Absolute package path (`/etc/foo.conf`)
    pub path: String,
    /// Location inside the backup area, relative to it
    pub stored: PathBuf,
}

/// A regular file whose ownership a step takes from another package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTransfer {
    pub path: String,
    pub previous_owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalStep {
    pub kind: StepKind,
    pub name: String,
    /// Installed record before the step
    pub before: Option<PackageRecord>,
    /// Installed record after the step
    pub after: Option<PackageRecord>,
    /// Archive to extract, for installs and upgrades
    pub archive: Option<PathBuf>,
    pub state: StepState,
    /// Paths the step writes; deleted on rollback
    pub created: Vec<String>,
    pub backups: Vec<BackupEntry>,
    /// Handed back to their previous owners on rollback
    #[serde(default)]
    pub transfers: Vec<OwnershipTransfer>,
}

impl JournalStep {
    pub fn new(
        kind: StepKind,
        before: Option<PackageRecord>,
        after: Option<PackageRecord>,
        archive: Option<PathBuf>,
    ) -> Self {
        let name = after
            .as_ref()
            .or(before.as_ref())
            .map(|r| r.name.clone())
            .unwrap_or_default();
        Self {
            kind,
            name,
            before,
            after,
            archive,
            state: StepState::Pending,
            created: Vec::new(),
            backups: Vec::new(),
            transfers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    pub started_at: String,
    pub changeset_id: Option<i64>,
    pub noscriptlet: bool,
    pub nosave: bool,
    pub steps: Vec<JournalStep>,
    #[serde(skip)]
    path: PathBuf,
    #[serde(skip)]
    backup_dir: PathBuf,
}

impl Journal {
    /// Start a journal and write it out before anything is touched
    pub fn create(
        path: &Path,
        backup_dir: &Path,
        steps: Vec<JournalStep>,
        changeset_id: Option<i64>,
        noscriptlet: bool,
        nosave: bool,
    ) -> Result<Self> {
        if path.exists() {
            return Err(Error::InterruptedTransaction(path.to_path_buf()));
        }
        fs::create_dir_all(backup_dir)?;

        let journal = Self {
            started_at: chrono::Utc::now().to_rfc3339(),
            changeset_id,
            noscriptlet,
            nosave,
            steps,
            path: path.to_path_buf(),
            backup_dir: backup_dir.to_path_buf(),
        };
        journal.save()?;
        debug!("journal started at {}", path.display());
        Ok(journal)
    }

    /// Read a leftover journal, if any
    pub fn load(path: &Path, backup_dir: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        let mut journal: Journal = serde_json::from_str(&content).map_err(|e| {
            Error::ParseError(format!("corrupt transaction journal {}: {}", path.display(), e))
        })?;
        journal.path = path.to_path_buf();
        journal.backup_dir = backup_dir.to_path_buf();
        Ok(Some(journal))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably replace the journal file
    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::IoError(format!("failed to serialize journal: {}", e)))?;

        let tmp = self.path.with_extension("journal.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&content)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn set_state(&mut self, index: usize, state: StepState) -> Result<()> {
        if let Some(step) = self.steps.get_mut(index) {
            step.state = state;
        }
        self.save()
    }

    /// Move a file out of the way of step `index`
    ///
    /// Returns false when there was nothing at `path`.
    pub fn displace(&mut self, index: usize, root: &Path, path: &str) -> Result<bool> {
        let relative = path.trim_start_matches('/');
        let source = root.join(relative);
        let is_file = fs::symlink_metadata(&source).is_ok_and(|m| !m.is_dir());
        if !is_file {
            return Ok(false);
        }

        let stored = PathBuf::from(index.to_string()).join(relative);
        let target = self.backup_dir.join(&stored);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        // Record first: a crash after the move must still find the file
        if let Some(step) = self.steps.get_mut(index) {
            step.backups.push(BackupEntry {
                path: path.to_string(),
                stored: stored.clone(),
            });
        }
        self.save()?;

        move_file(&source, &target)?;
        Ok(true)
    }

    /// Where step `index` moved the file at `path`, if it did
    pub fn backup_of(&self, index: usize, path: &str) -> Option<PathBuf> {
        self.steps
            .get(index)?
            .backups
            .iter()
            .rev()
            .find(|b| b.path == path)
            .map(|b| self.backup_dir.join(&b.stored))
    }

    /// Put every displaced file of step `index` back
    pub fn restore(&self, index: usize, root: &Path) -> Result<()> {
        let Some(step) = self.steps.get(index) else {
            return Ok(());
        };

        for backup in step.backups.iter().rev() {
            let stored = self.backup_dir.join(&backup.stored);
            // Recorded but never moved
            if fs::symlink_metadata(&stored).is_err() {
                continue;
            }
            let target = root.join(backup.path.trim_start_matches('/'));
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            if fs::symlink_metadata(&target).is_ok_and(|m| !m.is_dir()) {
                fs::remove_file(&target)?;
            }
            move_file(&stored, &target)?;
        }
        Ok(())
    }

    /// The transaction finished or was fully undone
    pub fn finish(self) -> Result<()> {
        if self.backup_dir.exists() {
            fs::remove_dir_all(&self.backup_dir)?;
        }
        fs::remove_file(&self.path)?;
        debug!("journal {} cleared", self.path.display());
        Ok(())
    }
}

/// Rename, falling back to copy and delete across filesystems
fn move_file(source: &Path, target: &Path) -> Result<()> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }

    let meta = fs::symlink_metadata(source)?;
    if meta.file_type().is_symlink() {
        let link = fs::read_link(source)?;
        std::os::unix::fs::symlink(link, target)?;
    } else {
        fs::copy(source, target)?;
    }
    fs::remove_file(source)?;
    Ok(())
}

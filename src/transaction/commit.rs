// src/transaction/commit.rs

//! Applying and undoing journaled steps
//!
//! Used by a normal commit and by `--recover`.

use crate::db::{self, models};
use crate::error::{Error, Result};
use crate::packages::arch::ArchPackage;
use crate::packages::{PackageFormat, PackageRecord};
use crate::scriptlet::{self, Hook, ScriptletRunner};
use crate::transaction::journal::{Journal, OwnershipTransfer, StepState};
use crate::transaction::planner::StepKind;
use rusqlite::Connection;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Suffix of backup files kept when their package is removed
pub const PACSAVE_SUFFIX: &str = ".pacsave";

/// Suffix of new default config files that would replace a local one
pub const PACNEW_SUFFIX: &str = ".pacnew";

pub struct Committer<'a> {
    pub root: &'a Path,
    pub scriptlets: &'a dyn ScriptletRunner,
}

impl<'a> Committer<'a> {
    pub fn new(root: &'a Path, scriptlets: &'a dyn ScriptletRunner) -> Self {
        Self { root, scriptlets }
    }

    /// Apply every step that has not completed, in order
    ///
    /// On failure the failing step stays `Started` and the journal is kept.
    pub fn apply_all(&self, journal: &mut Journal, conn: &mut Connection) -> Result<()> {
        for index in 0..journal.steps.len() {
            if journal.steps[index].state == StepState::Completed {
                continue;
            }
            let name = journal.steps[index].name.clone();
            self.apply(journal, index, conn).map_err(|e| Error::CommitFailure {
                package: name,
                reason: e.to_string(),
                journal: journal.path().to_path_buf(),
            })?;
        }
        Ok(())
    }

    /// Apply one step: scriptlets, files, then the database
    pub fn apply(&self, journal: &mut Journal, index: usize, conn: &mut Connection) -> Result<()> {
        let step = journal.steps[index].clone();
        let noscriptlet = journal.noscriptlet;
        debug!("applying {} {}", step.kind.as_str(), step.name);

        match step.kind {
            StepKind::Remove => {
                let Some(before) = &step.before else {
                    return Err(Error::InitError(format!("remove step {} without record", step.name)));
                };
                let saves = if journal.nosave {
                    Vec::new()
                } else {
                    self.pacsave_candidates(before)
                };
                journal.steps[index].created = saves.iter().map(|p| pacsave_path(p)).collect();
                journal.set_state(index, StepState::Started)?;

                let script = if noscriptlet { None } else { before.scriptlet.as_deref() };
                scriptlet::run_hook(self.scriptlets, script, Hook::PreRemove, &[&before.version], self.root)?;

                for path in &saves {
                    let source = self.root.join(path.trim_start_matches('/'));
                    let target = self.root.join(pacsave_path(path).trim_start_matches('/'));
                    fs::copy(&source, &target)?;
                    warn!("{} saved as {}", path, target.display());
                }
                for path in before.payload_files() {
                    journal.displace(index, self.root, path)?;
                }
                self.prune_directories(conn, before, &HashSet::new())?;

                scriptlet::run_hook(self.scriptlets, script, Hook::PostRemove, &[&before.version], self.root)?;
            }
            StepKind::Install | StepKind::Upgrade => {
                let (Some(after), Some(archive)) = (&step.after, &step.archive) else {
                    return Err(Error::InitError(format!("install step {} without archive", step.name)));
                };
                let package = ArchPackage::parse(archive)?;
                let preserved = self.preserved_configs(step.before.as_ref(), after);
                let mut created: Vec<String> = after.payload_files().map(String::from).collect();
                created.extend(preserved.iter().map(|p| pacnew_path(p)));
                journal.steps[index].created = created;
                journal.steps[index].transfers = foreign_owners(conn, &step.name, after)?;
                journal.set_state(index, StepState::Started)?;

                let script = if noscriptlet { None } else { after.scriptlet.as_deref() };
                let (pre, post, args) = match &step.before {
                    Some(before) => (
                        Hook::PreUpgrade,
                        Hook::PostUpgrade,
                        vec![after.version.as_str(), before.version.as_str()],
                    ),
                    None => (Hook::PreInstall, Hook::PostInstall, vec![after.version.as_str()]),
                };
                scriptlet::run_hook(self.scriptlets, script, pre, &args, self.root)?;

                let incoming: HashSet<&str> = after.payload_files().collect();
                for path in &incoming {
                    journal.displace(index, self.root, path)?;
                }
                for path in &preserved {
                    journal.displace(index, self.root, &pacnew_path(path))?;
                }
                if let Some(before) = &step.before {
                    for path in before.payload_files().filter(|p| !incoming.contains(p)) {
                        journal.displace(index, self.root, path)?;
                    }
                    let kept: HashSet<&str> = after.files.iter().map(String::as_str).collect();
                    self.prune_directories(conn, before, &kept)?;
                }

                package.extract_to(self.root)?;
                for path in &preserved {
                    self.keep_local_config(journal, index, path)?;
                }

                scriptlet::run_hook(self.scriptlets, script, post, &args, self.root)?;
            }
        }

        let changeset_id = journal.changeset_id;
        db::transaction(conn, |tx| {
            write_records(tx, &step.name, step.after.as_ref(), changeset_id)?;
            if let Some(id) = changeset_id {
                models::ChangesetEntry::delete_for(tx, id, &step.name)?;
                models::ChangesetEntry::new(
                    id,
                    step.kind.as_str(),
                    step.name.clone(),
                    step.before.as_ref().map(|r| r.version.clone()),
                    step.after.as_ref().map(|r| r.version.clone()),
                )
                .insert(tx)?;
            }
            Ok(())
        })?;

        journal.set_state(index, StepState::Completed)?;
        info!("{} {}", step.kind.as_str(), step.name);
        Ok(())
    }

    /// Undo a started or completed step
    pub fn undo(&self, journal: &mut Journal, index: usize, conn: &mut Connection) -> Result<()> {
        let step = journal.steps[index].clone();
        if step.state == StepState::Pending {
            return Ok(());
        }
        debug!("undoing {} {}", step.kind.as_str(), step.name);

        for path in step.created.iter().rev() {
            let target = self.root.join(path.trim_start_matches('/'));
            if fs::symlink_metadata(&target).is_ok_and(|m| !m.is_dir()) {
                fs::remove_file(&target)?;
            }
        }
        journal.restore(index, self.root)?;

        if let Some(after) = &step.after {
            let kept: HashSet<&str> = step
                .before
                .iter()
                .flat_map(|b| b.files.iter().map(String::as_str))
                .collect();
            remove_empty_dirs(self.root, after.files.iter().filter(|d| !kept.contains(d.as_str())));
        }

        let changeset_id = journal.changeset_id;
        db::transaction(conn, |tx| {
            write_records(tx, &step.name, step.before.as_ref(), None)?;
            return_ownership(tx, &step.transfers)?;
            if let Some(id) = changeset_id {
                models::ChangesetEntry::delete_for(tx, id, &step.name)?;
            }
            Ok(())
        })?;

        journal.set_state(index, StepState::Pending)?;
        info!("reverted {} {}", step.kind.as_str(), step.name);
        Ok(())
    }

    /// Backup files present on disk that should survive a removal
    fn pacsave_candidates(&self, record: &PackageRecord) -> Vec<String> {
        record
            .backup
            .iter()
            .map(|b| format!("/{}", b.trim_start_matches('/')))
            .filter(|p| self.root.join(p.trim_start_matches('/')).is_file())
            .collect()
    }

    /// Backup files of an upgrade that exist on disk and stay in place
    fn preserved_configs(&self, before: Option<&PackageRecord>, after: &PackageRecord) -> Vec<String> {
        let Some(before) = before else {
            return Vec::new();
        };
        after
            .backup
            .iter()
            .map(|b| format!("/{}", b.trim_start_matches('/')))
            .filter(|p| before.files.contains(p) && after.files.contains(p))
            .filter(|p| self.root.join(p.trim_start_matches('/')).is_file())
            .collect()
    }

    /// Put the local copy of a config file back after extraction
    ///
    /// A differing packaged version is kept next to it as `.pacnew`.
    fn keep_local_config(&self, journal: &Journal, index: usize, path: &str) -> Result<()> {
        let Some(local) = journal.backup_of(index, path) else {
            return Ok(());
        };
        let target = self.root.join(path.trim_start_matches('/'));
        let packaged = fs::read(&target).ok();
        if packaged.is_some_and(|content| fs::read(&local).is_ok_and(|l| l != content)) {
            let pacnew = pacnew_path(path);
            fs::rename(&target, self.root.join(pacnew.trim_start_matches('/')))?;
            warn!("{} installed as {}", path, pacnew);
        }
        fs::copy(&local, &target)?;
        Ok(())
    }

    /// Remove directories of `record` that no other package lists and that
    /// are now empty
    fn prune_directories(&self, conn: &Connection, record: &PackageRecord, keep: &HashSet<&str>) -> Result<()> {
        let mut candidates = Vec::new();
        for dir in record.files.iter().filter(|f| f.ends_with('/')) {
            if keep.contains(dir.as_str()) {
                continue;
            }
            if models::FileEntry::count_owners(conn, dir)? <= 1 {
                candidates.push(dir);
            }
        }
        remove_empty_dirs(self.root, candidates.into_iter());
        Ok(())
    }
}

fn pacsave_path(path: &str) -> String {
    format!("{}{}", path, PACSAVE_SUFFIX)
}

fn pacnew_path(path: &str) -> String {
    format!("{}{}", path, PACNEW_SUFFIX)
}

/// Regular files of `record` currently owned by some other package
fn foreign_owners(conn: &Connection, name: &str, record: &PackageRecord) -> Result<Vec<OwnershipTransfer>> {
    let mut transfers = Vec::new();
    for path in record.payload_files() {
        if let Some(owner) = models::FileEntry::find_owner(conn, path)? {
            if owner != name {
                transfers.push(OwnershipTransfer {
                    path: path.to_string(),
                    previous_owner: owner,
                });
            }
        }
    }
    Ok(transfers)
}

/// Give files taken by an undone step back to packages still installed
fn return_ownership(conn: &Connection, transfers: &[OwnershipTransfer]) -> Result<()> {
    for transfer in transfers {
        if models::FileEntry::find_owner(conn, &transfer.path)?.is_some() {
            continue;
        }
        let owner_id = models::Package::find_by_name(conn, &transfer.previous_owner)?.and_then(|p| p.id);
        if let Some(id) = owner_id {
            debug!("{} returned to {}", transfer.path, transfer.previous_owner);
            models::FileEntry::new(transfer.path.clone(), id).insert(conn)?;
        }
    }
    Ok(())
}

/// Deepest first; non-empty directories stay
fn remove_empty_dirs<'p>(root: &Path, dirs: impl Iterator<Item = &'p String>) {
    let mut dirs: Vec<&String> = dirs.filter(|d| d.ends_with('/')).collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.len()));
    for dir in dirs {
        let _ = fs::remove_dir(root.join(dir.trim_start_matches('/')));
    }
}

/// Replace whatever is recorded under `name` with `record`
///
/// Regular files claimed by `record` are taken from their previous owners,
/// which only happens for paths cleared by `--overwrite`.
fn write_records(
    conn: &Connection,
    name: &str,
    record: Option<&PackageRecord>,
    changeset_id: Option<i64>,
) -> Result<()> {
    models::delete_by_name(conn, name)?;
    if let Some(record) = record {
        for path in record.payload_files() {
            if let Some(owner) = models::FileEntry::find_owner(conn, path)? {
                warn!("{} now owns {} (was {})", record.name, path, owner);
                models::FileEntry::delete(conn, path)?;
            }
        }
        models::save_record(conn, record, changeset_id)?;
    }
    Ok(())
}

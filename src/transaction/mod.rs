// src/transaction/mod.rs

//! Transaction execution
//!
//! The engine walks one invocation through
//! `Idle -> Locked -> Downloading -> Verifying -> Staging -> Committed`,
//! or ends in `Aborted`. It is the only component that changes the local
//! database, the package cache or the target root. Everything up to staging
//! is side-effect free for the system; only the commit needs the journal.

pub mod commit;
pub mod journal;
pub mod lock;
pub mod planner;

pub use commit::Committer;
pub use journal::{Journal, JournalStep, OwnershipTransfer, StepState};
pub use lock::TransactionLock;
pub use planner::{
    FileConflict, PlanError, PlanIssue, PlanStep, StepKind, TransactionPlan, plan,
};

use crate::catalog::Catalog;
use crate::context::Context;
use crate::db::models::{Changeset, ChangesetStatus};
use crate::error::{Error, Result};
use crate::packages::arch::ArchPackage;
use crate::packages::{PackageFormat, PackageRecord};
use crate::repository::{self, Fetcher};
use crate::request::RecoverMode;
use crate::resolver::PackageSource;
use crate::scriptlet::{ScriptletRunner, ShellRunner};
use crate::ui::{self, Confirm};
use rayon::prelude::*;
use rusqlite::Connection;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Locked,
    Downloading,
    Verifying,
    Staging,
    Committed,
    Aborted,
}

/// Integrity check of a fetched archive
pub trait Verifier: Send + Sync {
    fn verify(&self, record: &PackageRecord, archive: &Path) -> Result<()>;
}

/// Compares an archive with the SHA-256 its repository lists
#[derive(Debug, Default)]
pub struct Sha256Verifier;

impl Verifier for Sha256Verifier {
    fn verify(&self, record: &PackageRecord, archive: &Path) -> Result<()> {
        match &record.sha256 {
            Some(expected) => repository::verify_checksum(archive, expected).map_err(|e| {
                Error::IntegrityFailure {
                    name: record.name.clone(),
                    reason: e.to_string(),
                }
            }),
            None => {
                warn!("{}: no checksum available, skipping verification", record.name);
                Ok(())
            }
        }
    }
}

/// Per-invocation knobs of the engine
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Validate everything, change nothing
    pub simulate: bool,
    pub noscriptlet: bool,
    /// Do not keep `.pacsave` copies of removed backup files
    pub nosave: bool,
    /// Patterns of file conflicts to overwrite
    pub overwrite: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NothingToDo,
    /// Everything validated; nothing was changed
    Simulated { steps: usize },
    Committed { changeset_id: i64, steps: usize },
}

/// A step ready for commit, with the archive it extracts
struct StagedStep {
    step: PlanStep,
    archive: Option<PathBuf>,
}

pub struct TransactionEngine<'a> {
    ctx: &'a Context,
    fetcher: Box<dyn Fetcher + 'a>,
    verifier: Box<dyn Verifier + 'a>,
    confirm: Box<dyn Confirm + 'a>,
    scriptlets: Box<dyn ScriptletRunner + 'a>,
    interrupted: Arc<AtomicBool>,
    state: TransactionState,
    lock: Option<TransactionLock>,
}

impl<'a> TransactionEngine<'a> {
    /// An idle engine with SHA-256 verification and shell scriptlets
    pub fn new(ctx: &'a Context, fetcher: Box<dyn Fetcher + 'a>, confirm: Box<dyn Confirm + 'a>) -> Self {
        Self {
            ctx,
            fetcher,
            verifier: Box::new(Sha256Verifier),
            confirm,
            scriptlets: Box::new(ShellRunner),
            interrupted: Arc::new(AtomicBool::new(false)),
            state: TransactionState::Idle,
            lock: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Box<dyn Verifier + 'a>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_scriptlets(mut self, scriptlets: Box<dyn ScriptletRunner + 'a>) -> Self {
        self.scriptlets = scriptlets;
        self
    }

    /// Share the flag a signal handler sets on Ctrl-C
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn transition(&mut self, next: TransactionState) {
        debug!("transaction state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn abort(&mut self) {
        self.transition(TransactionState::Aborted);
        self.lock = None;
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    /// Take the database lock and settle any interrupted transaction
    ///
    /// A simulation takes no lock but still refuses to run on top of an
    /// unfinished commit.
    pub fn begin(&mut self, conn: &mut Connection, recover: Option<RecoverMode>, simulate: bool) -> Result<()> {
        if self.state != TransactionState::Idle {
            return Err(Error::InitError("transaction already started".to_string()));
        }

        let journal_path = self.ctx.journal_path();
        if simulate {
            if journal_path.exists() {
                self.abort();
                return Err(Error::InterruptedTransaction(journal_path));
            }
            debug!("simulation: database lock not taken");
            self.transition(TransactionState::Locked);
            return Ok(());
        }

        match TransactionLock::acquire(&self.ctx.lock_path()) {
            Ok(lock) => self.lock = Some(lock),
            Err(e) => {
                self.abort();
                return Err(e);
            }
        }
        self.transition(TransactionState::Locked);

        if journal_path.exists() {
            let mode = match recover {
                Some(mode) => Some(mode),
                None => self.confirm.choose_recovery(&journal_path)?,
            };
            match mode {
                Some(mode) => {
                    if let Err(e) = self.recover(conn, mode) {
                        self.abort();
                        return Err(e);
                    }
                }
                None => {
                    self.abort();
                    return Err(Error::InterruptedTransaction(journal_path));
                }
            }
        } else if recover.is_some() {
            info!("no interrupted transaction to recover");
        }

        Ok(())
    }

    /// Resolve a leftover journal
    fn recover(&mut self, conn: &mut Connection, mode: RecoverMode) -> Result<()> {
        let Some(mut journal) = Journal::load(&self.ctx.journal_path(), &self.ctx.journal_backup_dir())? else {
            return Ok(());
        };
        info!("recovering interrupted transaction from {} ({:?})", journal.started_at, mode);

        fs::create_dir_all(&self.ctx.root)?;
        let committer = Committer::new(&self.ctx.root, self.scriptlets.as_ref());
        let status = match mode {
            RecoverMode::Rollback => {
                for index in (0..journal.steps.len()).rev() {
                    committer.undo(&mut journal, index, conn)?;
                }
                ChangesetStatus::RolledBack
            }
            RecoverMode::Resume => {
                for index in 0..journal.steps.len() {
                    if journal.steps[index].state == StepState::Started {
                        committer.undo(&mut journal, index, conn)?;
                    }
                }
                committer.apply_all(&mut journal, conn)?;
                ChangesetStatus::Applied
            }
        };

        if let Some(id) = journal.changeset_id {
            if let Some(mut changeset) = Changeset::find_by_id(conn, id)? {
                changeset.update_status(conn, status)?;
            }
        }
        journal.finish()?;
        info!("recovery complete");
        Ok(())
    }

    /// Run a plan from `Locked` to a terminal state
    ///
    /// The lock is released whatever the outcome.
    pub fn execute(
        &mut self,
        plan: &TransactionPlan,
        catalog: &Catalog,
        conn: &mut Connection,
        options: &ExecuteOptions,
    ) -> Result<Outcome> {
        if self.state != TransactionState::Locked {
            return Err(Error::InitError(format!(
                "cannot execute a transaction in state {:?}",
                self.state
            )));
        }

        let result = self.run(plan, catalog, conn, options);
        match &result {
            Ok(Outcome::NothingToDo) | Ok(Outcome::Committed { .. }) => {
                self.transition(TransactionState::Committed);
                self.lock = None;
            }
            _ => self.abort(),
        }
        result
    }

    fn run(
        &mut self,
        plan: &TransactionPlan,
        catalog: &Catalog,
        conn: &mut Connection,
        options: &ExecuteOptions,
    ) -> Result<Outcome> {
        if plan.is_empty() {
            println!(" there is nothing to do");
            return Ok(Outcome::NothingToDo);
        }

        print!("{}", ui::render_plan(plan));
        if !options.simulate {
            let question = if plan.installs().next().is_none() {
                "Do you want to remove these packages?"
            } else {
                "Proceed with installation?"
            };
            if !self.confirm.confirm(question)? {
                return Err(Error::Cancelled);
            }
        }
        self.check_interrupt()?;

        self.transition(TransactionState::Downloading);
        // Simulated downloads never reach the real cache
        let scratch = if options.simulate { Some(TempDir::new()?) } else { None };
        let download_dir = match &scratch {
            Some(dir) => dir.path().to_path_buf(),
            None => self.ctx.cachedir.clone(),
        };
        let archives = self.download(plan, catalog, &download_dir)?;
        self.check_interrupt()?;

        self.transition(TransactionState::Verifying);
        let staged = self.verify(plan, catalog, &archives, options)?;
        self.check_interrupt()?;

        self.transition(TransactionState::Staging);
        if options.simulate {
            info!("simulation complete, no changes were made");
            return Ok(Outcome::Simulated { steps: staged.len() });
        }
        self.check_interrupt()?;

        let steps = staged.len();
        let changeset_id = self.commit(staged, conn, options)?;
        Ok(Outcome::Committed { changeset_id, steps })
    }

    /// Fetch every repository archive not already cached
    ///
    /// Returns the archive path per package name. Any failure fails the
    /// whole stage.
    fn download(&self, plan: &TransactionPlan, catalog: &Catalog, dir: &Path) -> Result<HashMap<String, PathBuf>> {
        let mut archives = HashMap::new();
        let mut pending = Vec::new();

        for step in plan.installs() {
            let Some(PackageSource::Repository(repo)) = &step.source else {
                continue;
            };
            let filename = step.record.archive_name();
            let cached = self.ctx.cachedir.join(&filename);
            if cached.is_file() {
                debug!("{} found in cache", filename);
                archives.insert(step.record.name.clone(), cached);
                continue;
            }

            let urls = catalog
                .repository(repo)
                .map(|r| r.urls_for(&filename))
                .unwrap_or_default();
            pending.push((step.record.name.clone(), urls, dir.join(&filename)));
        }

        if pending.is_empty() {
            return Ok(archives);
        }

        fs::create_dir_all(dir)?;
        info!("retrieving {} packages", pending.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.ctx.parallel_downloads.max(1))
            .build()
            .map_err(|e| Error::InitError(format!("failed to start download pool: {}", e)))?;

        let fetcher: &dyn Fetcher = self.fetcher.as_ref();
        let interrupted = &self.interrupted;
        let results: Vec<(String, Result<PathBuf>)> = pool.install(|| {
            pending
                .par_iter()
                .map(|(name, urls, dest)| {
                    if interrupted.load(Ordering::SeqCst) {
                        return (name.clone(), Err(Error::Interrupted));
                    }
                    let result = repository::fetch_from_mirrors(fetcher, urls, dest).map(|url| {
                        debug!("{} downloaded from {}", name, url);
                        dest.clone()
                    });
                    (name.clone(), result)
                })
                .collect()
        });

        let mut failures = Vec::new();
        for (name, result) in results {
            match result {
                Ok(path) => {
                    archives.insert(name, path);
                }
                Err(Error::Interrupted) => return Err(Error::Interrupted),
                Err(e) => failures.push(e.to_string()),
            }
        }

        if !failures.is_empty() {
            return Err(Error::DownloadError(failures.join("\n")));
        }
        Ok(archives)
    }

    /// Check every archive and rebuild the steps from archive metadata
    fn verify(
        &self,
        plan: &TransactionPlan,
        catalog: &Catalog,
        archives: &HashMap<String, PathBuf>,
        options: &ExecuteOptions,
    ) -> Result<Vec<StagedStep>> {
        let mut staged = Vec::with_capacity(plan.steps.len());

        for step in &plan.steps {
            let archive = match &step.source {
                None => {
                    staged.push(StagedStep {
                        step: step.clone(),
                        archive: None,
                    });
                    continue;
                }
                Some(PackageSource::File(path)) => path.clone(),
                Some(PackageSource::Repository(_)) => {
                    let path = archives.get(&step.record.name).ok_or_else(|| {
                        Error::DownloadError(format!("{} was not downloaded", step.record.name))
                    })?;
                    if let Err(e) = self.verifier.verify(&step.record, path) {
                        // A corrupt archive must not be reused from the cache;
                        // a simulation leaves the cache as it found it
                        if !options.simulate && path.starts_with(&self.ctx.cachedir) {
                            warn!("removing corrupt archive {}", path.display());
                            if let Err(remove_err) = fs::remove_file(path) {
                                warn!("could not remove {}: {}", path.display(), remove_err);
                            }
                        }
                        return Err(e);
                    }
                    path.clone()
                }
            };

            let record = archive_record(&step.record, &archive)?;
            staged.push(StagedStep {
                step: PlanStep {
                    record,
                    ..step.clone()
                },
                archive: Some(archive),
            });
        }

        // The planner only saw repository file lists
        let steps: Vec<PlanStep> = staged.iter().map(|s| s.step.clone()).collect();
        let patterns = planner::compile_overwrite(&options.overwrite);
        let (rejected, _) = planner::find_file_conflicts(&steps, &catalog.local, &self.ctx.root, &patterns);
        if !rejected.is_empty() {
            return Err(PlanError {
                issues: rejected.into_iter().map(PlanIssue::FileConflict).collect(),
            }
            .into());
        }

        debug!("verified {} steps", staged.len());
        Ok(staged)
    }

    /// Apply staged steps under a journal and record the changeset
    fn commit(&mut self, staged: Vec<StagedStep>, conn: &mut Connection, options: &ExecuteOptions) -> Result<i64> {
        let description = describe(&staged);
        let mut changeset = Changeset::new(description);
        let changeset_id = changeset.insert(conn)?;

        let steps = staged
            .into_iter()
            .map(|s| match s.step.kind {
                StepKind::Remove => JournalStep::new(StepKind::Remove, Some(s.step.record), None, None),
                kind => JournalStep::new(kind, s.step.previous, Some(s.step.record), s.archive),
            })
            .collect();

        let mut journal = match Journal::create(
            &self.ctx.journal_path(),
            &self.ctx.journal_backup_dir(),
            steps,
            Some(changeset_id),
            options.noscriptlet,
            options.nosave,
        ) {
            Ok(journal) => journal,
            Err(e) => {
                changeset.update_status(conn, ChangesetStatus::RolledBack)?;
                return Err(e);
            }
        };

        info!("committing transaction {}", changeset_id);
        fs::create_dir_all(&self.ctx.root)?;

        let committer = Committer::new(&self.ctx.root, self.scriptlets.as_ref());
        committer.apply_all(&mut journal, conn)?;

        changeset.update_status(conn, ChangesetStatus::Applied)?;
        journal.finish()?;
        Ok(changeset_id)
    }
}

/// The record to commit, taken from the archive itself
///
/// Name and version must match what was planned. Repository bookkeeping and
/// the planned install reason are kept.
fn archive_record(planned: &PackageRecord, archive: &Path) -> Result<PackageRecord> {
    let integrity = |reason: String| Error::IntegrityFailure {
        name: planned.name.clone(),
        reason,
    };

    let package = ArchPackage::parse(archive).map_err(|e| integrity(e.to_string()))?;
    if package.name() != planned.name || package.version() != planned.version {
        return Err(integrity(format!(
            "archive contains {}-{}, expected {}",
            package.name(),
            package.version(),
            planned.display_name()
        )));
    }

    let mut record = package.to_record();
    record.reason = planned.reason;
    record.repository = planned.repository.clone();
    record.sha256 = planned.sha256.clone();
    record.download_size = planned.download_size;
    if planned.filename.is_some() {
        record.filename = planned.filename.clone();
    }
    if record.installed_size == 0 {
        record.installed_size = planned.installed_size;
    }
    Ok(record)
}

/// One-line changeset description
fn describe(staged: &[StagedStep]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for kind in [StepKind::Install, StepKind::Upgrade, StepKind::Remove] {
        let names: Vec<&str> = staged
            .iter()
            .filter(|s| s.step.kind == kind)
            .map(|s| s.step.record.name.as_str())
            .collect();
        if !names.is_empty() {
            parts.push(format!("{} {}", kind.as_str(), names.join(" ")));
        }
    }
    parts.join("; ")
}

// src/transaction/planner.rs

//! Transaction planning
//!
//! Validates a resolved closure and orders it into steps. Nothing here
//! touches the filesystem except read-only existence and free-space checks.

use crate::catalog::{Catalog, LocalDatabase};
use crate::context::Context;
use crate::packages::{InstallReason, PackageRecord};
use crate::request::{InstallOptions, Operation};
use crate::resolver::{Closure, ClosureEntry, Origin, PackageSource};
use crate::version;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Install,
    /// Replaces an installed package of the same name (also reinstall and
    /// downgrade)
    Upgrade,
    Remove,
}

impl StepKind {
    pub fn as_str(&self) -> &str {
        match self {
            StepKind::Install => "install",
            StepKind::Upgrade => "upgrade",
            StepKind::Remove => "remove",
        }
    }
}

/// One ordered action of a plan
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub kind: StepKind,
    /// Incoming record (install reason assigned) or the record being removed
    pub record: PackageRecord,
    /// Installed record an upgrade replaces
    pub previous: Option<PackageRecord>,
    /// Archive origin for installs and upgrades
    pub source: Option<PackageSource>,
}

/// A path claimed by an incoming package that is already taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConflict {
    pub path: String,
    pub package: String,
    /// Other claimant; `None` when the file exists on disk unowned
    pub owner: Option<String>,
}

impl fmt::Display for FileConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{}: {} exists in both '{}' and '{}'", self.package, self.path, self.package, owner),
            None => write!(f, "{}: {} exists in filesystem", self.package, self.path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanIssue {
    FileConflict(FileConflict),
    InsufficientSpace {
        mount: PathBuf,
        needed: u64,
        available: u64,
    },
    DependencyCycle(Vec<String>),
}

impl fmt::Display for PlanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanIssue::FileConflict(conflict) => write!(f, "{}", conflict),
            PlanIssue::InsufficientSpace {
                mount,
                needed,
                available,
            } => write!(
                f,
                "not enough free disk space on {}: {} bytes needed, {} available",
                mount.display(),
                needed,
                available
            ),
            PlanIssue::DependencyCycle(names) => {
                write!(f, "dependency cycle between {}", names.join(", "))
            }
        }
    }
}

/// Every reason a plan was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to commit transaction:\n{}", format_issues(.issues))]
pub struct PlanError {
    pub issues: Vec<PlanIssue>,
}

fn format_issues(issues: &[PlanIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!(":: {}", issue))
        .collect::<Vec<_>>()
        .join("\n")
}

/// An ordered, validated transaction
#[derive(Debug, Clone, Default)]
pub struct TransactionPlan {
    /// Removals first (dependents before their dependencies), then installs
    /// and upgrades (dependencies before their dependents)
    pub steps: Vec<PlanStep>,
    /// Conflicts that `--overwrite` patterns allow
    pub overwrites: Vec<FileConflict>,
    /// Targets dropped by `--needed`
    pub skipped: Vec<String>,
    pub download_size: u64,
    pub install_size_delta: i64,
}

impl TransactionPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn installs(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| s.kind != StepKind::Remove)
    }

    pub fn removals(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| s.kind == StepKind::Remove)
    }
}

/// Turn a closure into an ordered plan, or report every problem with it
pub fn plan(
    closure: &Closure,
    operation: &Operation,
    catalog: &Catalog,
    ctx: &Context,
) -> Result<TransactionPlan, PlanError> {
    let default_options = InstallOptions::default();
    let options = operation.install_options().unwrap_or(&default_options);
    let local = &catalog.local;
    let mut issues = Vec::new();

    let (entries, skipped) = apply_needed(closure, local, options.needed);
    for name in &skipped {
        warn!("{} is up to date -- skipping", name);
    }

    let mut steps = Vec::new();

    let removals: Vec<PackageRecord> = closure.removals.iter().map(|r| r.record.clone()).collect();
    for record in order_removals(&removals) {
        steps.push(PlanStep {
            kind: StepKind::Remove,
            record,
            previous: None,
            source: None,
        });
    }

    match order_installs(&entries) {
        Ok(ordered) => {
            for entry in ordered {
                let previous = local.get(&entry.record.name).cloned();
                let mut record = entry.record.clone();
                record.reason = assign_reason(entry, previous.as_ref(), options, local);
                if let PackageSource::File(_) = entry.source {
                    record.download_size = 0;
                }
                steps.push(PlanStep {
                    kind: if previous.is_some() {
                        StepKind::Upgrade
                    } else {
                        StepKind::Install
                    },
                    record,
                    previous,
                    source: Some(entry.source.clone()),
                });
            }
        }
        Err(cycle) => issues.push(PlanIssue::DependencyCycle(cycle)),
    }

    let patterns = compile_overwrite(&options.overwrite);
    let (conflicts, overwrites) = find_file_conflicts(&steps, local, &ctx.root, &patterns);
    issues.extend(conflicts.into_iter().map(PlanIssue::FileConflict));

    let download_size = steps
        .iter()
        .filter(|s| matches!(s.source, Some(PackageSource::Repository(_))))
        .filter(|s| !ctx.cachedir.join(s.record.archive_name()).exists())
        .map(|s| s.record.download_size)
        .sum();
    let install_size_delta = size_delta(&steps);

    if ctx.check_space && install_size_delta > 0 {
        if let Some(issue) = check_space(&ctx.root, install_size_delta as u64) {
            issues.push(issue);
        }
    }

    if !issues.is_empty() {
        return Err(PlanError { issues });
    }

    debug!(
        "planned {} steps, download {} bytes, size delta {} bytes",
        steps.len(),
        download_size,
        install_size_delta
    );

    Ok(TransactionPlan {
        steps,
        overwrites,
        skipped,
        download_size,
        install_size_delta,
    })
}

/// `--needed`: drop explicit targets that are already up to date
///
/// Dependencies are then recomputed from what is kept: a dependency stays
/// while some kept package needs it and nothing kept or installed satisfies
/// the relation instead.
fn apply_needed<'a>(
    closure: &'a Closure,
    local: &LocalDatabase,
    needed: bool,
) -> (Vec<&'a ClosureEntry>, Vec<String>) {
    let entries = &closure.installs;
    let skipped: BTreeSet<&str> = if needed {
        entries
            .iter()
            .filter(|e| e.origin == Origin::Explicit)
            .filter(|e| {
                local.get(&e.record.name).is_some_and(|installed| {
                    version::compare(&installed.version, &e.record.version) != Ordering::Less
                })
            })
            .map(|e| e.record.name.as_str())
            .collect()
    } else {
        BTreeSet::new()
    };
    if skipped.is_empty() {
        return (entries.iter().collect(), Vec::new());
    }

    let mut kept: BTreeSet<&str> = entries
        .iter()
        .filter(|e| !matches!(e.origin, Origin::DependencyOf(_)))
        .map(|e| e.record.name.as_str())
        .filter(|name| !skipped.contains(name))
        .collect();

    loop {
        let mut added: Vec<&str> = Vec::new();
        for entry in entries.iter().filter(|e| kept.contains(e.record.name.as_str())) {
            for dep in &entry.record.depends {
                let in_kept = entries
                    .iter()
                    .any(|e| kept.contains(e.record.name.as_str()) && version::satisfies(&e.record, dep));
                let installed = local.providers(dep).any(|p| {
                    !kept.contains(p.name.as_str()) && !added.contains(&p.name.as_str()) && !closure.is_removed(&p.name)
                });
                if in_kept || installed {
                    continue;
                }
                let provider = entries.iter().find(|e| {
                    let name = e.record.name.as_str();
                    !kept.contains(name) && !skipped.contains(name) && version::satisfies(&e.record, dep)
                });
                if let Some(provider) = provider {
                    let name = provider.record.name.as_str();
                    if !added.contains(&name) {
                        added.push(name);
                    }
                }
            }
        }
        if added.is_empty() {
            break;
        }
        kept.extend(added);
    }

    let kept_entries = entries
        .iter()
        .filter(|e| kept.contains(e.record.name.as_str()))
        .collect();
    (kept_entries, skipped.into_iter().map(String::from).collect())
}

fn assign_reason(
    entry: &ClosureEntry,
    previous: Option<&PackageRecord>,
    options: &InstallOptions,
    local: &LocalDatabase,
) -> InstallReason {
    match &entry.origin {
        Origin::Explicit => options.reason.unwrap_or(InstallReason::Explicit),
        // Never demote an explicitly installed package
        Origin::DependencyOf(_) => match previous {
            Some(p) if p.reason == InstallReason::Explicit => InstallReason::Explicit,
            _ => InstallReason::Dependency,
        },
        Origin::Upgrade => previous.map(|p| p.reason).unwrap_or_default(),
        Origin::Replaces(old) => local.get(old).map(|p| p.reason).unwrap_or_default(),
    }
}

/// Kahn's algorithm with a name-ordered ready set
///
/// Returns the names left in a cycle on failure.
fn order_installs<'a>(entries: &[&'a ClosureEntry]) -> Result<Vec<&'a ClosureEntry>, Vec<String>> {
    let by_name: BTreeMap<&str, &'a ClosureEntry> = entries
        .iter()
        .map(|e| (e.record.name.as_str(), *e))
        .collect();

    // dependency -> dependents
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut indegree: BTreeMap<&str, usize> = by_name.keys().map(|n| (*n, 0)).collect();

    for (name, entry) in &by_name {
        let mut seen = HashSet::new();
        for dep in &entry.record.depends {
            for (other, candidate) in &by_name {
                if other == name || !version::satisfies(&candidate.record, dep) {
                    continue;
                }
                if seen.insert(*other) {
                    dependents.entry(*other).or_default().push(*name);
                    if let Some(count) = indegree.get_mut(name) {
                        *count += 1;
                    }
                }
            }
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut ordered = Vec::with_capacity(by_name.len());

    while let Some(name) = ready.pop_first() {
        ordered.push(by_name[name]);
        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(count) = indegree.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if ordered.len() < by_name.len() {
        let placed: HashSet<&str> = ordered.iter().map(|e| e.record.name.as_str()).collect();
        let cycle = by_name
            .keys()
            .filter(|n| !placed.contains(*n))
            .map(|n| n.to_string())
            .collect();
        return Err(cycle);
    }

    Ok(ordered)
}

/// Dependents before their dependencies; cycles are broken by name
fn order_removals(records: &[PackageRecord]) -> Vec<PackageRecord> {
    let mut remaining: BTreeMap<&str, &PackageRecord> =
        records.iter().map(|r| (r.name.as_str(), r)).collect();
    let mut ordered = Vec::with_capacity(records.len());

    while !remaining.is_empty() {
        // A package can go once nothing else still queued depends on it
        let next = remaining
            .iter()
            .find(|(name, record)| {
                !remaining.iter().any(|(other, candidate)| {
                    other != *name
                        && candidate
                            .depends
                            .iter()
                            .any(|d| version::satisfies(record, d))
                })
            })
            .map(|(name, _)| *name);

        let name = match next {
            Some(name) => name,
            None => {
                let first = remaining.keys().next().copied().unwrap_or_default();
                warn!("dependency cycle among packages being removed, breaking at {}", first);
                first
            }
        };

        if let Some(record) = remaining.remove(name) {
            ordered.push(record.clone());
        }
    }

    ordered
}

/// Parse `--overwrite` globs; invalid ones are reported and ignored
pub fn compile_overwrite(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!("invalid --overwrite pattern '{}': {}", p, e);
                None
            }
        })
        .collect()
}

fn overwrite_allows(patterns: &[Pattern], path: &str) -> bool {
    let relative = path.trim_start_matches('/');
    patterns
        .iter()
        .any(|p| p.matches(path) || p.matches(relative))
}

/// File ownership conflicts of the install steps
///
/// Returns `(rejected, allowed)` where `allowed` are those covered by an
/// overwrite pattern.
pub fn find_file_conflicts(
    steps: &[PlanStep],
    local: &LocalDatabase,
    root: &Path,
    patterns: &[Pattern],
) -> (Vec<FileConflict>, Vec<FileConflict>) {
    let removing: HashSet<&str> = steps
        .iter()
        .filter(|s| s.kind == StepKind::Remove)
        .map(|s| s.record.name.as_str())
        .collect();
    let incoming: HashMap<&str, &PackageRecord> = steps
        .iter()
        .filter(|s| s.kind != StepKind::Remove)
        .map(|s| (s.record.name.as_str(), &s.record))
        .collect();

    let mut claimed: HashMap<&str, &str> = HashMap::new();
    let mut rejected = Vec::new();
    let mut allowed = Vec::new();

    for step in steps.iter().filter(|s| s.kind != StepKind::Remove) {
        let name = step.record.name.as_str();

        for path in step.record.payload_files() {
            let owner = if let Some(other) = claimed.get(path) {
                Some(Some(other.to_string()))
            } else {
                match local.owner(path) {
                    Some(owner) if owner == name || removing.contains(owner) => None,
                    // An upgrade that drops the path releases it
                    Some(owner) => match incoming.get(owner) {
                        Some(_) => None,
                        None => Some(Some(owner.to_string())),
                    },
                    None => {
                        let on_disk = root.join(path.trim_start_matches('/'));
                        match fs::symlink_metadata(&on_disk) {
                            Ok(meta) if !meta.is_dir() => Some(None),
                            _ => None,
                        }
                    }
                }
            };
            claimed.entry(path).or_insert(name);

            if let Some(owner) = owner {
                let conflict = FileConflict {
                    path: path.to_string(),
                    package: name.to_string(),
                    owner,
                };
                if overwrite_allows(patterns, path) {
                    info!("overwriting {} as requested", path);
                    allowed.push(conflict);
                } else {
                    rejected.push(conflict);
                }
            }
        }
    }

    (rejected, allowed)
}

/// Net change of installed size
fn size_delta(steps: &[PlanStep]) -> i64 {
    steps
        .iter()
        .map(|step| match step.kind {
            StepKind::Install => step.record.installed_size as i64,
            StepKind::Upgrade => {
                step.record.installed_size as i64
                    - step.previous.as_ref().map_or(0, |p| p.installed_size as i64)
            }
            StepKind::Remove => -(step.record.installed_size as i64),
        })
        .sum()
}

/// Free-space validation against the filesystem holding `root`
fn check_space(root: &Path, needed: u64) -> Option<PlanIssue> {
    // The root may not exist yet when bootstrapping a new system
    let mount = root.ancestors().find(|p| p.exists())?.to_path_buf();
    match fs2::available_space(&mount) {
        Ok(available) if available < needed => Some(PlanIssue::InsufficientSpace {
            mount,
            needed,
            available,
        }),
        Ok(_) => None,
        Err(e) => {
            warn!("could not determine free space on {}: {}", mount.display(), e);
            None
        }
    }
}

// src/resolver/mod.rs

//! Dependency resolution
//!
//! Turns an operation into the closure of packages to add and remove. The
//! resolver only reads the catalog; every problem it finds is collected and
//! reported together.

mod closure;

pub use closure::{Closure, ClosureEntry, Origin, PackageSource, Removal, RemovalOrigin};

use crate::catalog::Catalog;
use crate::packages::{InstallReason, PackageRecord};
use crate::request::{Operation, SyncAction};
use crate::version::{self, Dependency};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A single reason resolution failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionIssue {
    TargetNotFound(String),
    DependencyMissing { name: String, required_by: String },
    PackageConflict { a: String, b: String },
    HasDependents { name: String, dependents: Vec<String> },
}

impl fmt::Display for ResolutionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionIssue::TargetNotFound(target) => write!(f, "target not found: {}", target),
            ResolutionIssue::DependencyMissing { name, required_by } => {
                write!(f, "unable to satisfy dependency '{}' required by {}", name, required_by)
            }
            ResolutionIssue::PackageConflict { a, b } => {
                write!(f, "{} and {} are in conflict", a, b)
            }
            ResolutionIssue::HasDependents { name, dependents } => {
                write!(f, "removing {} breaks dependency of {}", name, dependents.join(", "))
            }
        }
    }
}

/// Every issue found while resolving
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to prepare transaction:\n{}", format_issues(.issues))]
pub struct ResolutionError {
    pub issues: Vec<ResolutionIssue>,
}

fn format_issues(issues: &[ResolutionIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!(":: {}", issue))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compute the closure of an operation
///
/// Operations that never change the system resolve to an empty closure.
pub fn resolve(operation: &Operation, catalog: &Catalog) -> Result<Closure, ResolutionError> {
    let mut resolver = Resolver::new(catalog, operation.nodeps());

    match operation {
        Operation::Sync(sync) => {
            if let SyncAction::Install {
                targets,
                sysupgrade,
                ..
            } = &sync.action
            {
                resolver.resolve_install(&[], targets, *sysupgrade);
            }
        }
        Operation::FileInstall(op) => resolver.resolve_install(&op.paths, &[], false),
        Operation::Remove(op) => resolver.resolve_remove(&op.targets, op.recursive),
        Operation::Query(_) | Operation::History => {}
    }

    resolver.finish()
}

struct Resolver<'a> {
    catalog: &'a Catalog,
    nodeps: u8,
    closure: Closure,
    issues: Vec<ResolutionIssue>,
}

impl<'a> Resolver<'a> {
    fn new(catalog: &'a Catalog, nodeps: u8) -> Self {
        Self {
            catalog,
            nodeps,
            closure: Closure::default(),
            issues: Vec::new(),
        }
    }

    fn finish(self) -> Result<Closure, ResolutionError> {
        if self.issues.is_empty() {
            debug!(
                "resolved {} installs and {} removals",
                self.closure.installs.len(),
                self.closure.removals.len()
            );
            Ok(self.closure)
        } else {
            Err(ResolutionError {
                issues: self.issues,
            })
        }
    }

    fn issue(&mut self, issue: ResolutionIssue) {
        if !self.issues.contains(&issue) {
            self.issues.push(issue);
        }
    }

    /// The relation as checked under the current `--nodeps` level
    fn effective(&self, dep: &Dependency) -> Dependency {
        if self.nodeps >= 2 {
            dep.name_only()
        } else {
            dep.clone()
        }
    }

    fn satisfied_in_closure(&self, dep: &Dependency) -> bool {
        self.closure
            .installs
            .iter()
            .any(|e| version::satisfies(&e.record, dep))
    }

    /// Satisfied by an installed package that stays as it is
    fn satisfied_by_kept(&self, dep: &Dependency) -> bool {
        self.catalog
            .local
            .providers(dep)
            .any(|p| !self.closure.contains(&p.name) && !self.closure.is_removed(&p.name))
    }

    fn resolve_install(&mut self, files: &[PathBuf], targets: &[String], sysupgrade: bool) {
        for path in files {
            match self.catalog.archive(path) {
                Some(archive) => {
                    if !self.closure.contains(&archive.record.name) {
                        self.closure.add(
                            archive.record.clone(),
                            PackageSource::File(archive.path.clone()),
                            Origin::Explicit,
                        );
                    }
                }
                None => self.issue(ResolutionIssue::TargetNotFound(path.display().to_string())),
            }
        }

        for target in targets {
            self.add_target(target);
        }

        if sysupgrade {
            self.add_upgrades();
            self.add_replacements();
        }

        if self.nodeps == 0 {
            self.expand();
        }

        self.check_conflicts();

        if self.nodeps == 0 {
            self.check_final_state();
        }
    }

    /// Look up `name`, `name<op>version` or `repo/name`
    fn add_target(&mut self, target: &str) {
        let (repo, spec) = match target.split_once('/') {
            Some((repo, spec)) => (Some(repo), spec),
            None => (None, target),
        };
        let dep = Dependency::parse(spec);

        let found = match repo {
            Some(repo) => self
                .catalog
                .find_in_repo(repo, &dep.name)
                .filter(|p| version::satisfies(p, &dep)),
            None => self.catalog.find_provider(&dep),
        };

        match found {
            Some(record) => {
                if self.closure.contains(&record.name) {
                    return;
                }
                if record.name != dep.name {
                    info!("{} is provided by {}", dep.name, record.name);
                }
                self.closure.add(
                    record.clone(),
                    PackageSource::Repository(record.repository.clone().unwrap_or_default()),
                    Origin::Explicit,
                );
            }
            None => self.issue(ResolutionIssue::TargetNotFound(target.to_string())),
        }
    }

    /// `-Su`: strictly newer versions of installed packages
    fn add_upgrades(&mut self) {
        let catalog = self.catalog;
        for installed in catalog.local.packages() {
            if self.closure.contains(&installed.name) {
                continue;
            }
            let Some(candidate) = catalog.find_sync(&installed.name) else {
                continue;
            };
            if version::compare(&candidate.version, &installed.version) != Ordering::Greater {
                continue;
            }
            if catalog.is_ignored(&installed.name) {
                warn!(
                    "{}: ignoring package upgrade ({} => {})",
                    installed.name, installed.version, candidate.version
                );
                continue;
            }

            self.closure.add(
                candidate.clone(),
                PackageSource::Repository(candidate.repository.clone().unwrap_or_default()),
                Origin::Upgrade,
            );
        }
    }

    /// `-Su`: sync packages declaring that they replace installed ones
    fn add_replacements(&mut self) {
        let catalog = self.catalog;
        let names: BTreeSet<&str> = catalog
            .sync_packages()
            .filter(|p| !p.replaces.is_empty())
            .map(|p| p.name.as_str())
            .collect();

        for name in names {
            if catalog.local.is_installed(name) || catalog.is_ignored(name) {
                continue;
            }
            let Some(candidate) = catalog.find_sync(name) else {
                continue;
            };

            let replaced: Vec<&PackageRecord> = catalog
                .local
                .packages()
                .filter(|p| version::replaces(candidate, p) && !catalog.is_ignored(&p.name))
                .collect();
            let Some(first) = replaced.first() else {
                continue;
            };

            info!("{} replaces {}", candidate.name, first.name);
            if !self.closure.contains(&candidate.name) {
                self.closure.add(
                    candidate.clone(),
                    PackageSource::Repository(candidate.repository.clone().unwrap_or_default()),
                    Origin::Replaces(first.name.clone()),
                );
            }
            for old in replaced {
                self.closure.installs.retain(|e| e.record.name != old.name);
                self.closure
                    .remove(old.clone(), RemovalOrigin::ReplacedBy(candidate.name.clone()));
            }
        }
    }

    /// Breadth-first dependency expansion, one level at a time in name order
    fn expand(&mut self) {
        let mut level: BTreeSet<String> = self
            .closure
            .installs
            .iter()
            .map(|e| e.record.name.clone())
            .collect();

        while !level.is_empty() {
            let mut next = BTreeSet::new();

            for name in &level {
                let Some(entry) = self.closure.get(name) else {
                    continue;
                };
                let depends = entry.record.depends.clone();

                for dep in &depends {
                    let dep = self.effective(dep);
                    if self.satisfied_in_closure(&dep) || self.satisfied_by_kept(&dep) {
                        continue;
                    }

                    match self.catalog.find_provider(&dep) {
                        Some(provider)
                            if !self.closure.contains(&provider.name)
                                && !self.closure.is_removed(&provider.name) =>
                        {
                            debug!("pulling in {} for {} ({})", provider.name, name, dep);
                            self.closure.add(
                                provider.clone(),
                                PackageSource::Repository(
                                    provider.repository.clone().unwrap_or_default(),
                                ),
                                Origin::DependencyOf(name.clone()),
                            );
                            next.insert(provider.name.clone());
                        }
                        _ => self.issue(ResolutionIssue::DependencyMissing {
                            name: dep.to_string(),
                            required_by: name.clone(),
                        }),
                    }
                }
            }

            level = next;
        }
    }

    fn check_conflicts(&mut self) {
        let incoming: Vec<PackageRecord> = self
            .closure
            .installs
            .iter()
            .map(|e| e.record.clone())
            .collect();

        for (i, a) in incoming.iter().enumerate() {
            for b in &incoming[i + 1..] {
                if version::conflicts_with(a, b) {
                    self.conflict(&a.name, &b.name);
                }
            }
        }

        let catalog = self.catalog;
        for new in &incoming {
            for installed in catalog.local.packages() {
                if installed.name == new.name
                    || self.closure.contains(&installed.name)
                    || self.closure.is_removed(&installed.name)
                {
                    continue;
                }
                if !version::conflicts_with(new, installed) {
                    continue;
                }

                if version::replaces(new, installed) {
                    info!("{} replaces conflicting package {}", new.name, installed.name);
                    self.closure
                        .remove(installed.clone(), RemovalOrigin::ReplacedBy(new.name.clone()));
                } else {
                    self.conflict(&new.name, &installed.name);
                }
            }
        }
    }

    fn conflict(&mut self, a: &str, b: &str) {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        self.issue(ResolutionIssue::PackageConflict {
            a: a.to_string(),
            b: b.to_string(),
        });
    }

    /// Every dependency of the resulting system must still be met
    ///
    /// Installed packages whose dependencies were already broken before this
    /// operation are not reported.
    fn check_final_state(&mut self) {
        let entries: Vec<(String, Vec<Dependency>)> = self
            .closure
            .installs
            .iter()
            .map(|e| (e.record.name.clone(), e.record.depends.clone()))
            .collect();

        for (name, depends) in entries {
            for dep in &depends {
                let dep = self.effective(dep);
                if !self.satisfied_in_closure(&dep) && !self.satisfied_by_kept(&dep) {
                    self.issue(ResolutionIssue::DependencyMissing {
                        name: dep.to_string(),
                        required_by: name.clone(),
                    });
                }
            }
        }

        let catalog = self.catalog;
        for installed in catalog.local.packages() {
            if self.closure.contains(&installed.name) || self.closure.is_removed(&installed.name) {
                continue;
            }
            for dep in &installed.depends {
                let dep = self.effective(dep);
                let before = catalog.local.providers(&dep).next().is_some();
                if before && !self.satisfied_in_closure(&dep) && !self.satisfied_by_kept(&dep) {
                    self.issue(ResolutionIssue::DependencyMissing {
                        name: dep.to_string(),
                        required_by: installed.name.clone(),
                    });
                }
            }
        }
    }

    fn resolve_remove(&mut self, targets: &[String], recursive: bool) {
        let catalog = self.catalog;

        for target in targets {
            match catalog.local.get(target) {
                Some(record) => self.closure.remove(record.clone(), RemovalOrigin::Explicit),
                None => self.issue(ResolutionIssue::TargetNotFound(target.clone())),
            }
        }

        if recursive {
            self.remove_unneeded();
        }

        if self.nodeps == 0 {
            self.check_dependents();
        }
    }

    /// Whether a package still kept installed depends on `candidate`
    fn required_by_kept(&self, candidate: &PackageRecord) -> bool {
        self.catalog.local.packages().any(|p| {
            p.name != candidate.name
                && !self.closure.is_removed(&p.name)
                && p.depends
                    .iter()
                    .any(|d| version::satisfies(candidate, &self.effective(d)))
        })
    }

    /// `-Rs`: drop dependency-reason packages nothing needs, to a fixed point
    fn remove_unneeded(&mut self) {
        let catalog = self.catalog;

        loop {
            let mut candidates = BTreeSet::new();
            for removal in &self.closure.removals {
                for dep in &removal.record.depends {
                    let dep = self.effective(dep);
                    for provider in catalog.local.providers(&dep) {
                        if provider.reason == InstallReason::Dependency
                            && !self.closure.is_removed(&provider.name)
                        {
                            candidates.insert(provider.name.clone());
                        }
                    }
                }
            }

            let mut changed = false;
            for name in candidates {
                let Some(record) = catalog.local.get(&name) else {
                    continue;
                };
                if !self.required_by_kept(record) {
                    debug!("{} is no longer needed", name);
                    self.closure.remove(record.clone(), RemovalOrigin::Unneeded);
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }
    }

    fn check_dependents(&mut self) {
        let catalog = self.catalog;
        let removed: Vec<PackageRecord> = self
            .closure
            .removals
            .iter()
            .map(|r| r.record.clone())
            .collect();

        for target in &removed {
            let dependents: Vec<String> = catalog
                .local
                .packages()
                .filter(|p| !self.closure.is_removed(&p.name))
                .filter(|p| {
                    p.depends.iter().any(|d| {
                        let d = self.effective(d);
                        version::satisfies(target, &d) && !self.satisfied_by_kept(&d)
                    })
                })
                .map(|p| p.name.clone())
                .collect();

            if !dependents.is_empty() {
                self.issue(ResolutionIssue::HasDependents {
                    name: target.name.clone(),
                    dependents,
                });
            }
        }
    }
}

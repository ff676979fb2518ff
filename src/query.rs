// src/query.rs

//! Read-only queries over a catalog snapshot
//!
//! Nothing here takes the lock or touches the filesystem. Results are ordered
//! by package name.

use crate::catalog::Catalog;
use crate::packages::PackageRecord;
use crate::ui;
use crate::version::Dependency;
use std::fmt::Write;
use std::path::Path;

/// Records found by name, plus the names that matched nothing
#[derive(Debug, Default)]
pub struct Lookup<'a> {
    pub found: Vec<&'a PackageRecord>,
    pub missing: Vec<String>,
}

/// Owner of one queried path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership<'a> {
    pub path: String,
    /// Every package listing the path; directories may have several
    pub owners: Vec<&'a str>,
}

/// Installed packages; all of them when `names` is empty
pub fn list_installed<'a>(catalog: &'a Catalog, names: &[String]) -> Lookup<'a> {
    if names.is_empty() {
        return Lookup {
            found: catalog.local.packages().collect(),
            missing: Vec::new(),
        };
    }
    lookup_local(catalog, names)
}

pub fn lookup_local<'a>(catalog: &'a Catalog, names: &[String]) -> Lookup<'a> {
    let mut lookup = Lookup::default();
    for name in names {
        match catalog.local.get(name) {
            Some(record) => lookup.found.push(record),
            None => lookup.missing.push(name.clone()),
        }
    }
    lookup
}

/// Sync records by `name` or `repo/name`
pub fn lookup_sync<'a>(catalog: &'a Catalog, names: &[String]) -> Lookup<'a> {
    let mut lookup = Lookup::default();
    for target in names {
        let found = match target.split_once('/') {
            Some((repo, name)) => catalog.find_in_repo(repo, name),
            None => catalog.find_sync(target),
        };
        match found {
            Some(record) => lookup.found.push(record),
            None => lookup.missing.push(target.clone()),
        }
    }
    lookup
}

/// Every term must appear in the name or description, ignoring case
fn matches_terms(record: &PackageRecord, terms: &[String]) -> bool {
    let name = record.name.to_lowercase();
    let description = record.description.as_deref().unwrap_or("").to_lowercase();
    terms.iter().all(|term| {
        let term = term.to_lowercase();
        name.contains(&term) || description.contains(&term)
    })
}

pub fn search_installed<'a>(catalog: &'a Catalog, terms: &[String]) -> Vec<&'a PackageRecord> {
    catalog
        .local
        .packages()
        .filter(|p| matches_terms(p, terms))
        .collect()
}

/// Sync search; equal names keep repository order
pub fn search_sync<'a>(catalog: &'a Catalog, terms: &[String]) -> Vec<&'a PackageRecord> {
    let mut hits: Vec<&PackageRecord> = catalog
        .sync_packages()
        .filter(|p| matches_terms(p, terms))
        .collect();
    hits.sort_by(|a, b| a.name.cmp(&b.name));
    hits
}

/// `(package, path)` pairs of the named installed packages
pub fn owned_files<'a>(catalog: &'a Catalog, names: &[String]) -> (Vec<(&'a str, &'a str)>, Vec<String>) {
    let lookup = list_installed(catalog, names);
    let files = lookup
        .found
        .iter()
        .flat_map(|record| record.files.iter().map(|f| (record.name.as_str(), f.as_str())))
        .collect();
    (files, lookup.missing)
}

/// Installed packages no enabled repository knows about
pub fn foreign(catalog: &Catalog) -> Vec<&PackageRecord> {
    catalog
        .local
        .packages()
        .filter(|p| !catalog.in_any_repo(&p.name))
        .collect()
}

/// Reverse file index lookup
///
/// Paths may be given with or without the alternate root in front; a
/// directory is matched with or without its trailing slash.
pub fn owners<'a>(catalog: &'a Catalog, root: &Path, paths: &[String]) -> Vec<Ownership<'a>> {
    paths
        .iter()
        .map(|input| {
            let path = package_path(root, input);
            let mut owners: Vec<&str> = catalog.local.owner(&path).into_iter().collect();
            if owners.is_empty() {
                let dir = format!("{}/", path.trim_end_matches('/'));
                owners = catalog
                    .local
                    .packages()
                    .filter(|p| p.files.iter().any(|f| *f == dir))
                    .map(|p| p.name.as_str())
                    .collect();
            }
            Ownership { path, owners }
        })
        .collect()
}

/// The absolute in-package form of a queried path
fn package_path(root: &Path, input: &str) -> String {
    let path = Path::new(input);
    let relative = match path.strip_prefix(root) {
        Ok(rest) if root != Path::new("/") => rest.to_string_lossy().to_string(),
        _ => input.trim_start_matches('/').to_string(),
    };
    format!("/{}", relative)
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.join("  ")
    }
}

fn join_relations(items: &[Dependency]) -> String {
    let items: Vec<String> = items.iter().map(|d| d.to_string()).collect();
    join_or_none(&items)
}

/// Detailed package report (`-Qi`, `-Si`)
pub fn format_info(record: &PackageRecord, installed: bool) -> String {
    let mut out = String::new();
    let mut line = |label: &str, value: String| {
        let _ = writeln!(out, "{:<16}: {}", label, value);
    };

    if !installed {
        line("Repository", record.repository.clone().unwrap_or_else(|| "local".to_string()));
    }
    line("Name", record.name.clone());
    line("Version", record.version.clone());
    line("Description", record.description.clone().unwrap_or_else(|| "None".to_string()));
    line("Architecture", record.architecture.clone().unwrap_or_else(|| "any".to_string()));
    line("URL", record.url.clone().unwrap_or_else(|| "None".to_string()));
    line("Licenses", join_or_none(&record.licenses));
    line("Groups", join_or_none(&record.groups));
    line("Provides", join_relations(&record.provides));
    line("Depends On", join_relations(&record.depends));
    line("Optional Deps", join_or_none(&record.optdepends));
    line("Conflicts With", join_relations(&record.conflicts));
    line("Replaces", join_relations(&record.replaces));
    if installed {
        line("Installed Size", ui::format_size(record.installed_size));
        line("Install Date", record.install_date.clone().unwrap_or_else(|| "Unknown".to_string()));
        let reason = match record.reason {
            crate::packages::InstallReason::Explicit => "Explicitly installed",
            crate::packages::InstallReason::Dependency => "Installed as a dependency for another package",
        };
        line("Install Reason", reason.to_string());
        line("Install Script", if record.scriptlet.is_some() { "Yes" } else { "No" }.to_string());
    } else {
        line("Download Size", ui::format_size(record.download_size));
        line("Installed Size", ui::format_size(record.installed_size));
    }
    out
}

// src/version.rs

//! Version ordering and package relation matching
//!
//! Versions follow the `epoch:pkgver-pkgrel` scheme. Epochs are compared
//! first, then pkgver segment by segment, then pkgrel when both sides carry
//! one. Dependencies, provides, conflicts and replaces entries all share the
//! `name[op version]` syntax and are represented by [`Dependency`].

use crate::packages::PackageRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Compare two full version strings
pub fn compare(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let (epoch1, ver1, rel1) = split_evr(a);
    let (epoch2, ver2, rel2) = split_evr(b);

    let mut ord = compare_segments(epoch1, epoch2);
    if ord == Ordering::Equal {
        ord = compare_segments(ver1, ver2);
    }
    if ord == Ordering::Equal
        && let (Some(rel1), Some(rel2)) = (rel1, rel2)
    {
        ord = compare_segments(rel1, rel2);
    }
    ord
}

/// Split `epoch:pkgver-pkgrel` into its parts; a missing epoch reads as "0"
fn split_evr(evr: &str) -> (&str, &str, Option<&str>) {
    let digits = evr.bytes().take_while(u8::is_ascii_digit).count();

    let (epoch, rest) = if evr.as_bytes().get(digits) == Some(&b':') {
        let epoch = &evr[..digits];
        (if epoch.is_empty() { "0" } else { epoch }, &evr[digits + 1..])
    } else {
        ("0", evr)
    };

    match rest.rfind('-') {
        Some(pos) => (epoch, &rest[..pos], Some(&rest[pos + 1..])),
        None => (epoch, rest, None),
    }
}

/// Segment-wise comparison of a single version component
///
/// Runs of digits compare numerically, runs of letters lexically. A numeric
/// run beats an alphabetic one at the same position, and a trailing
/// alphabetic run sorts lower than nothing at all (`1.0a < 1.0`).
fn compare_segments(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let one = a.as_bytes();
    let two = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < one.len() && j < two.len() {
        let (sep_i, sep_j) = (i, j);
        while i < one.len() && !one[i].is_ascii_alphanumeric() {
            i += 1;
        }
        while j < two.len() && !two[j].is_ascii_alphanumeric() {
            j += 1;
        }
        if i >= one.len() || j >= two.len() {
            break;
        }

        // Differing separator runs decide the comparison
        if i - sep_i != j - sep_j {
            return (i - sep_i).cmp(&(j - sep_j));
        }

        let (start_i, start_j) = (i, j);
        let numeric = one[i].is_ascii_digit();
        if numeric {
            while i < one.len() && one[i].is_ascii_digit() {
                i += 1;
            }
            while j < two.len() && two[j].is_ascii_digit() {
                j += 1;
            }
        } else {
            while i < one.len() && one[i].is_ascii_alphabetic() {
                i += 1;
            }
            while j < two.len() && two[j].is_ascii_alphabetic() {
                j += 1;
            }
        }

        let seg1 = &a[start_i..i];
        let seg2 = &b[start_j..j];

        if seg2.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if numeric {
            let n1 = seg1.trim_start_matches('0');
            let n2 = seg2.trim_start_matches('0');
            n1.len().cmp(&n2.len()).then_with(|| n1.cmp(n2))
        } else {
            seg1.cmp(seg2)
        };

        if ord != Ordering::Equal {
            return ord;
        }
    }

    let rest1 = &one[i..];
    let rest2 = &two[j..];

    if rest1.is_empty() && rest2.is_empty() {
        return Ordering::Equal;
    }

    let two_newer = match (rest1.first(), rest2.first()) {
        (None, Some(c)) => !c.is_ascii_alphabetic(),
        (Some(c), _) => c.is_ascii_alphabetic(),
        (None, None) => false,
    };

    if two_newer {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Comparison operator of a versioned relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintOp {
    Eq,
    Ge,
    Le,
    Gt,
    Lt,
}

impl ConstraintOp {
    pub fn as_str(&self) -> &str {
        match self {
            ConstraintOp::Eq => "=",
            ConstraintOp::Ge => ">=",
            ConstraintOp::Le => "<=",
            ConstraintOp::Gt => ">",
            ConstraintOp::Lt => "<",
        }
    }
}

/// Operator plus version, e.g. `>=2.34`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionConstraint {
    pub op: ConstraintOp,
    pub version: String,
}

impl VersionConstraint {
    /// Check whether a concrete version meets this constraint
    pub fn matches(&self, version: &str) -> bool {
        let ord = compare(version, &self.version);
        match self.op {
            ConstraintOp::Eq => ord == Ordering::Equal,
            ConstraintOp::Ge => ord != Ordering::Less,
            ConstraintOp::Le => ord != Ordering::Greater,
            ConstraintOp::Gt => ord == Ordering::Greater,
            ConstraintOp::Lt => ord == Ordering::Less,
        }
    }
}

/// A `name[op version]` relation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub constraint: Option<VersionConstraint>,
}

impl Dependency {
    /// Unversioned relation on a bare name
    pub fn unversioned(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
        }
    }

    /// Parse strings like `glibc>=2.34`, `sh` or `python: for scripts`
    pub fn parse(spec: &str) -> Self {
        // Optional dependencies carry a trailing description
        let spec = match spec.split_once(": ") {
            Some((head, _)) => head,
            None => spec,
        }
        .trim();

        let Some(pos) = spec.find(['<', '>', '=']) else {
            return Self::unversioned(spec);
        };

        let (name, rest) = spec.split_at(pos);
        let (op, version) = if let Some(v) = rest.strip_prefix(">=") {
            (ConstraintOp::Ge, v)
        } else if let Some(v) = rest.strip_prefix("<=") {
            (ConstraintOp::Le, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (ConstraintOp::Eq, v)
        } else if let Some(v) = rest.strip_prefix('>') {
            (ConstraintOp::Gt, v)
        } else {
            (ConstraintOp::Lt, &rest[1..])
        };

        Self {
            name: name.trim().to_string(),
            constraint: Some(VersionConstraint {
                op,
                version: version.trim().to_string(),
            }),
        }
    }

    /// The same relation with its version requirement dropped
    pub fn name_only(&self) -> Self {
        Self::unversioned(self.name.clone())
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(c) => write!(f, "{}{}{}", self.name, c.op.as_str(), c.version),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Check a record's own name/version or any of its provides against `dep`
///
/// A provides entry without a version only satisfies unversioned relations.
pub fn satisfies(record: &PackageRecord, dep: &Dependency) -> bool {
    if record.name == dep.name
        && dep
            .constraint
            .as_ref()
            .is_none_or(|c| c.matches(&record.version))
    {
        return true;
    }

    record.provides.iter().any(|provided| {
        provided.name == dep.name
            && match (&dep.constraint, &provided.constraint) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(wanted), Some(have)) => wanted.matches(&have.version),
            }
    })
}

/// Whether either package declares a conflict against the other
pub fn conflicts_with(a: &PackageRecord, b: &PackageRecord) -> bool {
    if a.name == b.name {
        return false;
    }
    a.conflicts.iter().any(|c| satisfies(b, c)) || b.conflicts.iter().any(|c| satisfies(a, c))
}

/// Whether `replacer` declares that it replaces `installed`
pub fn replaces(replacer: &PackageRecord, installed: &PackageRecord) -> bool {
    replacer.name != installed.name && replacer.replaces.iter().any(|r| satisfies(installed, r))
}

// src/packages/traits.rs

//! Common traits for package archive readers

use crate::error::Result;
use crate::packages::PackageRecord;
use crate::version::Dependency;
use std::path::Path;

/// Metadata about a file within a package
#[derive(Debug, Clone)]
pub struct PackageFile {
    /// Absolute path; directories end with `/`
    pub path: String,
    pub size: i64,
    pub mode: i32,
    pub is_dir: bool,
}

/// Common interface for installable package archives
pub trait PackageFormat {
    /// Parse a package file from the given path
    fn parse(path: &Path) -> Result<Self>
    where
        Self: Sized;

    /// Get the package name
    fn name(&self) -> &str;

    /// Get the package version
    fn version(&self) -> &str;

    /// Get the package architecture (e.g., "x86_64", "any")
    fn architecture(&self) -> Option<&str>;

    /// Get the package summary/description
    fn description(&self) -> Option<&str>;

    /// Get the list of files in the package
    fn files(&self) -> &[PackageFile];

    /// Get the list of runtime dependencies
    fn dependencies(&self) -> &[Dependency];

    /// Install/remove hook script shipped with the package
    fn scriptlet(&self) -> Option<&str>;

    /// Write the package payload below `root`
    ///
    /// Returns the absolute (root-relative) paths of the regular files and
    /// links written.
    fn extract_to(&self, root: &Path) -> Result<Vec<String>>;

    /// Convert this package to a catalog record
    fn to_record(&self) -> PackageRecord;
}

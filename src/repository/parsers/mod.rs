// src/repository/parsers/mod.rs

//! Repository metadata parsers
//!
//! A sync repository is published as a single database file. Parsers turn
//! the raw (possibly compressed) bytes of that file into package records.

pub mod arch;

use crate::error::Result;
use crate::packages::PackageRecord;

/// Repository metadata parser trait
pub trait RepositoryParser {
    /// Parse a downloaded repository database
    ///
    /// Returns every package the database lists, tagged with the
    /// repository it came from.
    fn parse_database(&self, data: &[u8]) -> Result<Vec<PackageRecord>>;
}

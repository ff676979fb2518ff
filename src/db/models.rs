// src/db/models.rs

//! Data models for local database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.
//! `save_record`/`load_all` translate between rows and `PackageRecord`.

use crate::error::{Error, Result};
use crate::packages::{InstallReason, PackageRecord};
use crate::version::Dependency;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

/// An installed package row
#[derive(Debug, Clone)]
pub struct Package {
    pub id: Option<i64>,
    pub name: String,
    pub version: String,
    pub architecture: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub repository: Option<String>,
    pub filename: Option<String>,
    pub sha256: Option<String>,
    pub download_size: i64,
    pub installed_size: i64,
    pub reason: InstallReason,
    pub scriptlet: Option<String>,
    pub installed_at: Option<String>,
    pub installed_by_changeset_id: Option<i64>,
}

const PACKAGE_COLUMNS: &str = "id, name, version, architecture, description, url, repository, \
     filename, sha256, download_size, installed_size, reason, scriptlet, installed_at, \
     installed_by_changeset_id";

impl Package {
    /// Build a row from a record
    pub fn from_record(record: &PackageRecord) -> Self {
        Self {
            id: None,
            name: record.name.clone(),
            version: record.version.clone(),
            architecture: record.architecture.clone(),
            description: record.description.clone(),
            url: record.url.clone(),
            repository: record.repository.clone(),
            filename: record.filename.clone(),
            sha256: record.sha256.clone(),
            download_size: record.download_size as i64,
            installed_size: record.installed_size as i64,
            reason: record.reason,
            scriptlet: record.scriptlet.clone(),
            installed_at: None,
            installed_by_changeset_id: None,
        }
    }

    /// Insert this package into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (name, version, architecture, description, url, repository,
                                   filename, sha256, download_size, installed_size, reason,
                                   scriptlet, installed_by_changeset_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                &self.name,
                &self.version,
                &self.architecture,
                &self.description,
                &self.url,
                &self.repository,
                &self.filename,
                &self.sha256,
                self.download_size,
                self.installed_size,
                self.reason.as_str(),
                &self.scriptlet,
                &self.installed_by_changeset_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a package by name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE name = ?1",
            PACKAGE_COLUMNS
        ))?;

        let package = stmt.query_row([name], Self::from_row).optional()?;

        Ok(package)
    }

    /// List all installed packages ordered by name
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages ORDER BY name",
            PACKAGE_COLUMNS
        ))?;

        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Change the install reason of a package
    pub fn set_reason(conn: &Connection, name: &str, reason: InstallReason) -> Result<()> {
        let updated = conn.execute(
            "UPDATE packages SET reason = ?1 WHERE name = ?2",
            params![reason.as_str(), name],
        )?;
        if updated == 0 {
            return Err(Error::NotFoundError(format!("package '{}' is not installed", name)));
        }
        Ok(())
    }

    /// Delete a package by ID; relations and files cascade
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Convert a database row to a Package
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let reason_str: String = row.get(11)?;
        let reason = reason_str
            .parse::<InstallReason>()
            .map_err(|e| conversion_error(11, e))?;

        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            version: row.get(2)?,
            architecture: row.get(3)?,
            description: row.get(4)?,
            url: row.get(5)?,
            repository: row.get(6)?,
            filename: row.get(7)?,
            sha256: row.get(8)?,
            download_size: row.get(9)?,
            installed_size: row.get(10)?,
            reason,
            scriptlet: row.get(12)?,
            installed_at: row.get(13)?,
            installed_by_changeset_id: row.get(14)?,
        })
    }
}

/// Kind of a list-valued package attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Depends,
    OptDepends,
    Provides,
    Conflicts,
    Replaces,
    Backup,
    License,
    Group,
}

impl RelationKind {
    pub fn as_str(&self) -> &str {
        match self {
            RelationKind::Depends => "depends",
            RelationKind::OptDepends => "optdepends",
            RelationKind::Provides => "provides",
            RelationKind::Conflicts => "conflicts",
            RelationKind::Replaces => "replaces",
            RelationKind::Backup => "backup",
            RelationKind::License => "license",
            RelationKind::Group => "group",
        }
    }
}

impl FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "depends" => Ok(RelationKind::Depends),
            "optdepends" => Ok(RelationKind::OptDepends),
            "provides" => Ok(RelationKind::Provides),
            "conflicts" => Ok(RelationKind::Conflicts),
            "replaces" => Ok(RelationKind::Replaces),
            "backup" => Ok(RelationKind::Backup),
            "license" => Ok(RelationKind::License),
            "group" => Ok(RelationKind::Group),
            _ => Err(format!("Invalid relation kind: {}", s)),
        }
    }
}

/// One entry of a package's relation lists
#[derive(Debug, Clone)]
pub struct Relation {
    pub id: Option<i64>,
    pub package_id: i64,
    pub kind: RelationKind,
    pub value: String,
}

impl Relation {
    pub fn new(package_id: i64, kind: RelationKind, value: String) -> Self {
        Self {
            id: None,
            package_id,
            kind,
            value,
        }
    }

    /// Insert this relation into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO relations (package_id, kind, value) VALUES (?1, ?2, ?3)",
            params![self.package_id, self.kind.as_str(), &self.value],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// All relations of a package, in insertion order
    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, kind, value FROM relations WHERE package_id = ?1 ORDER BY id",
        )?;

        let relations = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(relations)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind_str: String = row.get(2)?;
        let kind = kind_str
            .parse::<RelationKind>()
            .map_err(|e| conversion_error(2, e))?;

        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            kind,
            value: row.get(3)?,
        })
    }
}

/// A path in the file ownership index
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: Option<i64>,
    pub path: String,
    pub is_dir: bool,
    pub package_id: i64,
}

impl FileEntry {
    /// Create a new FileEntry; paths ending in `/` are directories
    pub fn new(path: String, package_id: i64) -> Self {
        let is_dir = path.ends_with('/');
        Self {
            id: None,
            path,
            is_dir,
            package_id,
        }
    }

    /// Insert this file into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO files (path, is_dir, package_id) VALUES (?1, ?2, ?3)",
            params![&self.path, self.is_dir, self.package_id],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Files owned by a package, ordered by path
    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, path, is_dir, package_id FROM files WHERE package_id = ?1 ORDER BY path",
        )?;

        let files = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    /// Name of the package owning a regular file
    pub fn find_owner(conn: &Connection, path: &str) -> Result<Option<String>> {
        let owner = conn
            .query_row(
                "SELECT p.name FROM files f JOIN packages p ON p.id = f.package_id
                 WHERE f.path = ?1 AND f.is_dir = 0",
                [path],
                |row| row.get(0),
            )
            .optional()?;

        Ok(owner)
    }

    /// Drop the ownership entry for a regular file
    pub fn delete(conn: &Connection, path: &str) -> Result<()> {
        conn.execute("DELETE FROM files WHERE path = ?1 AND is_dir = 0", [path])?;
        Ok(())
    }

    /// Number of installed packages listing a path (files or directories)
    pub fn count_owners(conn: &Connection, path: &str) -> Result<i64> {
        let count = conn.query_row("SELECT COUNT(*) FROM files WHERE path = ?1", [path], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            path: row.get(1)?,
            is_dir: row.get(2)?,
            package_id: row.get(3)?,
        })
    }
}

/// Changeset status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangesetStatus {
    Pending,
    Applied,
    RolledBack,
}

impl ChangesetStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ChangesetStatus::Pending => "pending",
            ChangesetStatus::Applied => "applied",
            ChangesetStatus::RolledBack => "rolled_back",
        }
    }
}

impl FromStr for ChangesetStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChangesetStatus::Pending),
            "applied" => Ok(ChangesetStatus::Applied),
            "rolled_back" => Ok(ChangesetStatus::RolledBack),
            _ => Err(format!("Invalid changeset status: {}", s)),
        }
    }
}

/// A Changeset records one committed transaction
#[derive(Debug, Clone)]
pub struct Changeset {
    pub id: Option<i64>,
    pub description: String,
    pub status: ChangesetStatus,
    pub created_at: Option<String>,
    pub applied_at: Option<String>,
    pub rolled_back_at: Option<String>,
}

impl Changeset {
    /// Create a new Changeset
    pub fn new(description: String) -> Self {
        Self {
            id: None,
            description,
            status: ChangesetStatus::Pending,
            created_at: None,
            applied_at: None,
            rolled_back_at: None,
        }
    }

    /// Insert this changeset into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO changesets (description, status) VALUES (?1, ?2)",
            params![&self.description, self.status.as_str()],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a changeset by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, description, status, created_at, applied_at, rolled_back_at
             FROM changesets WHERE id = ?1",
        )?;

        let changeset = stmt.query_row([id], Self::from_row).optional()?;

        Ok(changeset)
    }

    /// List all changesets, newest first
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, description, status, created_at, applied_at, rolled_back_at
             FROM changesets ORDER BY id DESC",
        )?;

        let changesets = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(changesets)
    }

    /// Update changeset status
    pub fn update_status(&mut self, conn: &Connection, new_status: ChangesetStatus) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::InitError("Cannot update changeset without ID".to_string()))?;

        let timestamp_field = match new_status {
            ChangesetStatus::Applied => "applied_at",
            ChangesetStatus::RolledBack => "rolled_back_at",
            _ => "",
        };

        if !timestamp_field.is_empty() {
            conn.execute(
                &format!(
                    "UPDATE changesets SET status = ?1, {} = CURRENT_TIMESTAMP WHERE id = ?2",
                    timestamp_field
                ),
                params![new_status.as_str(), id],
            )?;
        } else {
            conn.execute(
                "UPDATE changesets SET status = ?1 WHERE id = ?2",
                params![new_status.as_str(), id],
            )?;
        }

        self.status = new_status;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status_str: String = row.get(2)?;
        let status = status_str
            .parse::<ChangesetStatus>()
            .map_err(|e| conversion_error(2, e))?;

        Ok(Self {
            id: Some(row.get(0)?),
            description: row.get(1)?,
            status,
            created_at: row.get(3)?,
            applied_at: row.get(4)?,
            rolled_back_at: row.get(5)?,
        })
    }
}

/// One package-level action inside a changeset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetEntry {
    pub id: Option<i64>,
    pub changeset_id: i64,
    /// `install`, `upgrade` or `remove`
    pub action: String,
    pub package: String,
    pub old_version: Option<String>,
    pub new_version: Option<String>,
}

impl ChangesetEntry {
    pub fn new(
        changeset_id: i64,
        action: &str,
        package: String,
        old_version: Option<String>,
        new_version: Option<String>,
    ) -> Self {
        Self {
            id: None,
            changeset_id,
            action: action.to_string(),
            package,
            old_version,
            new_version,
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO changeset_entries (changeset_id, action, package, old_version, new_version)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.changeset_id,
                &self.action,
                &self.package,
                &self.old_version,
                &self.new_version,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Forget what a changeset did to one package
    pub fn delete_for(conn: &Connection, changeset_id: i64, package: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM changeset_entries WHERE changeset_id = ?1 AND package = ?2",
            params![changeset_id, package],
        )?;
        Ok(())
    }

    pub fn find_by_changeset(conn: &Connection, changeset_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, changeset_id, action, package, old_version, new_version
             FROM changeset_entries WHERE changeset_id = ?1 ORDER BY id",
        )?;

        let entries = stmt
            .query_map([changeset_id], |row| {
                Ok(Self {
                    id: Some(row.get(0)?),
                    changeset_id: row.get(1)?,
                    action: row.get(2)?,
                    package: row.get(3)?,
                    old_version: row.get(4)?,
                    new_version: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

/// Persist a record with its relations and files
///
/// Fails if a package of the same name is installed or one of its regular
/// files is already owned.
pub fn save_record(conn: &Connection, record: &PackageRecord, changeset_id: Option<i64>) -> Result<i64> {
    let mut package = Package::from_record(record);
    package.installed_by_changeset_id = changeset_id;
    let package_id = package.insert(conn)?;

    let dependency_lists = [
        (RelationKind::Depends, &record.depends),
        (RelationKind::Provides, &record.provides),
        (RelationKind::Conflicts, &record.conflicts),
        (RelationKind::Replaces, &record.replaces),
    ];
    for (kind, list) in dependency_lists {
        for dep in list {
            Relation::new(package_id, kind, dep.to_string()).insert(conn)?;
        }
    }

    let string_lists = [
        (RelationKind::OptDepends, &record.optdepends),
        (RelationKind::Backup, &record.backup),
        (RelationKind::License, &record.licenses),
        (RelationKind::Group, &record.groups),
    ];
    for (kind, list) in string_lists {
        for value in list {
            Relation::new(package_id, kind, value.clone()).insert(conn)?;
        }
    }

    for path in &record.files {
        FileEntry::new(path.clone(), package_id).insert(conn)?;
    }

    Ok(package_id)
}

fn assemble(conn: &Connection, package: Package) -> Result<PackageRecord> {
    let id = package
        .id
        .ok_or_else(|| Error::InitError("package row without id".to_string()))?;

    let mut record = PackageRecord::new(package.name, package.version);
    record.architecture = package.architecture;
    record.description = package.description;
    record.url = package.url;
    record.repository = package.repository;
    record.filename = package.filename;
    record.sha256 = package.sha256;
    record.download_size = package.download_size.max(0) as u64;
    record.installed_size = package.installed_size.max(0) as u64;
    record.reason = package.reason;
    record.scriptlet = package.scriptlet;
    record.install_date = package.installed_at;

    for relation in Relation::find_by_package(conn, id)? {
        match relation.kind {
            RelationKind::Depends => record.depends.push(Dependency::parse(&relation.value)),
            RelationKind::Provides => record.provides.push(Dependency::parse(&relation.value)),
            RelationKind::Conflicts => record.conflicts.push(Dependency::parse(&relation.value)),
            RelationKind::Replaces => record.replaces.push(Dependency::parse(&relation.value)),
            RelationKind::OptDepends => record.optdepends.push(relation.value),
            RelationKind::Backup => record.backup.push(relation.value),
            RelationKind::License => record.licenses.push(relation.value),
            RelationKind::Group => record.groups.push(relation.value),
        }
    }

    record.files = FileEntry::find_by_package(conn, id)?
        .into_iter()
        .map(|f| f.path)
        .collect();

    Ok(record)
}

/// Load one installed package as a record
pub fn load_record(conn: &Connection, name: &str) -> Result<Option<PackageRecord>> {
    match Package::find_by_name(conn, name)? {
        Some(package) => Ok(Some(assemble(conn, package)?)),
        None => Ok(None),
    }
}

/// Load every installed package, ordered by name
pub fn load_all(conn: &Connection) -> Result<Vec<PackageRecord>> {
    Package::list_all(conn)?
        .into_iter()
        .map(|package| assemble(conn, package))
        .collect()
}

/// Remove an installed package with its relations and files
///
/// Returns false when nothing was installed under that name.
pub fn delete_by_name(conn: &Connection, name: &str) -> Result<bool> {
    match Package::find_by_name(conn, name)? {
        Some(Package { id: Some(id), .. }) => {
            Package::delete(conn, id)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        schema::migrate(&conn).unwrap();
        (temp_file, conn)
    }

    fn sample_record() -> PackageRecord {
        let mut record = PackageRecord::new("curl".to_string(), "8.5.0-1".to_string());
        record.architecture = Some("x86_64".to_string());
        record.description = Some("command line tool and library for transferring data".to_string());
        record.repository = Some("core".to_string());
        record.depends = vec![Dependency::parse("openssl>=3.0"), Dependency::parse("zlib")];
        record.provides = vec![Dependency::parse("libcurl.so=4-64")];
        record.optdepends = vec!["ca-certificates: TLS roots".to_string()];
        record.backup = vec!["etc/curlrc".to_string()];
        record.reason = InstallReason::Dependency;
        record.files = vec![
            "/usr/".to_string(),
            "/usr/bin/".to_string(),
            "/usr/bin/curl".to_string(),
        ];
        record
    }

    #[test]
    fn test_save_and_load_record() {
        let (_temp, conn) = create_test_db();
        let record = sample_record();

        let id = save_record(&conn, &record, None).unwrap();
        assert!(id > 0);

        let loaded = load_record(&conn, "curl").unwrap().unwrap();
        assert_eq!(loaded.version, "8.5.0-1");
        assert_eq!(loaded.reason, InstallReason::Dependency);
        assert_eq!(loaded.depends, record.depends);
        assert_eq!(loaded.provides, record.provides);
        assert_eq!(loaded.optdepends, record.optdepends);
        assert_eq!(loaded.backup, record.backup);
        assert_eq!(loaded.files, record.files);
        assert!(loaded.install_date.is_some());
    }

    #[test]
    fn test_duplicate_file_owner_rejected() {
        let (_temp, conn) = create_test_db();
        save_record(&conn, &sample_record(), None).unwrap();

        let mut other = PackageRecord::new("curl-git".to_string(), "8.6.0-1".to_string());
        other.files = vec!["/usr/".to_string(), "/usr/bin/curl".to_string()];
        assert!(save_record(&conn, &other, None).is_err());
    }

    #[test]
    fn test_find_owner_and_cascade_delete() {
        let (_temp, conn) = create_test_db();
        save_record(&conn, &sample_record(), None).unwrap();

        assert_eq!(
            FileEntry::find_owner(&conn, "/usr/bin/curl").unwrap(),
            Some("curl".to_string())
        );
        // Directories are never reported as owned
        assert_eq!(FileEntry::find_owner(&conn, "/usr/bin/").unwrap(), None);

        assert!(delete_by_name(&conn, "curl").unwrap());
        assert!(!delete_by_name(&conn, "curl").unwrap());
        assert_eq!(FileEntry::find_owner(&conn, "/usr/bin/curl").unwrap(), None);

        let relations: i64 = conn
            .query_row("SELECT COUNT(*) FROM relations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(relations, 0);
    }

    #[test]
    fn test_set_reason() {
        let (_temp, conn) = create_test_db();
        save_record(&conn, &sample_record(), None).unwrap();

        Package::set_reason(&conn, "curl", InstallReason::Explicit).unwrap();
        let loaded = load_record(&conn, "curl").unwrap().unwrap();
        assert_eq!(loaded.reason, InstallReason::Explicit);

        assert!(Package::set_reason(&conn, "wget", InstallReason::Explicit).is_err());
    }

    #[test]
    fn test_load_all_sorted_by_name() {
        let (_temp, conn) = create_test_db();
        for name in ["zsh", "bash", "fish"] {
            save_record(&conn, &PackageRecord::new(name.to_string(), "1.0-1".to_string()), None)
                .unwrap();
        }

        let names: Vec<String> = load_all(&conn).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["bash", "fish", "zsh"]);
    }

    #[test]
    fn test_changeset_crud() {
        let (_temp, conn) = create_test_db();

        let mut changeset = Changeset::new("install curl".to_string());
        let id = changeset.insert(&conn).unwrap();
        assert_eq!(changeset.status, ChangesetStatus::Pending);

        ChangesetEntry::new(id, "install", "curl".to_string(), None, Some("8.5.0-1".to_string()))
            .insert(&conn)
            .unwrap();

        changeset.update_status(&conn, ChangesetStatus::Applied).unwrap();
        let updated = Changeset::find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(updated.status, ChangesetStatus::Applied);
        assert!(updated.applied_at.is_some());

        let entries = ChangesetEntry::find_by_changeset(&conn, id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].package, "curl");

        assert_eq!(Changeset::list_all(&conn).unwrap().len(), 1);
    }
}

// src/db/schema.rs

//! Database schema definitions and migrations for the local package database
//!
//! This module defines the SQLite schema for installed packages, their
//! relations, the file ownership index and transaction history, and provides
//! a migration system to evolve the schema over time.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        debug!("Schema is up to date");
        return Ok(());
    }

    // Apply migrations in order
    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::InitError(format!(
            "Unknown migration version: {}",
            version
        ))),
    }
}

/// Initial schema - Version 1
///
/// Creates the core tables:
/// - packages: one row per installed package
/// - relations: dependency, provides, conflicts, replaces and other lists
/// - files: the file ownership index
/// - changesets: committed transactions
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        -- Installed packages: at most one version per name
        CREATE TABLE packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            version TEXT NOT NULL,
            architecture TEXT,
            description TEXT,
            url TEXT,
            repository TEXT,
            filename TEXT,
            sha256 TEXT,
            download_size INTEGER NOT NULL DEFAULT 0,
            installed_size INTEGER NOT NULL DEFAULT 0,
            reason TEXT NOT NULL CHECK(reason IN ('explicit', 'dependency')),
            scriptlet TEXT,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            installed_by_changeset_id INTEGER,
            FOREIGN KEY (installed_by_changeset_id) REFERENCES changesets(id) ON DELETE SET NULL
        );

        CREATE INDEX idx_packages_reason ON packages(reason);

        -- Relations: every list-valued attribute of a package
        CREATE TABLE relations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('depends', 'optdepends', 'provides', 'conflicts',
                                              'replaces', 'backup', 'license', 'group')),
            value TEXT NOT NULL,
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_relations_package_id ON relations(package_id);
        CREATE INDEX idx_relations_kind_value ON relations(kind, value);

        -- Files: reverse index from absolute path to owning package.
        -- Directories may be shared, regular files may not.
        CREATE TABLE files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL,
            is_dir INTEGER NOT NULL DEFAULT 0,
            package_id INTEGER NOT NULL,
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX idx_files_path_owner ON files(path) WHERE is_dir = 0;
        CREATE INDEX idx_files_path ON files(path);
        CREATE INDEX idx_files_package_id ON files(package_id);

        -- Changesets: committed (or rolled back) transactions
        CREATE TABLE changesets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('pending', 'applied', 'rolled_back')),
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            applied_at TEXT,
            rolled_back_at TEXT
        );

        CREATE INDEX idx_changesets_status ON changesets(status);
        CREATE INDEX idx_changesets_created_at ON changesets(created_at);
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}

/// Schema Version 2: per-package history
///
/// Records each install, upgrade and removal a changeset performed
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        CREATE TABLE changeset_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            changeset_id INTEGER NOT NULL,
            action TEXT NOT NULL CHECK(action IN ('install', 'upgrade', 'remove')),
            package TEXT NOT NULL,
            old_version TEXT,
            new_version TEXT,
            FOREIGN KEY (changeset_id) REFERENCES changesets(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_changeset_entries_changeset ON changeset_entries(changeset_id);
        CREATE INDEX idx_changeset_entries_package ON changeset_entries(package);
        ",
    )?;

    info!("Schema version 2 applied successfully");
    Ok(())
}

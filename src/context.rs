// src/context.rs

//! The explicit per-invocation context
//!
//! Every component receives paths and policy from here instead of reading
//! process-wide state.

use crate::config::{self, PacmanConfig};
use crate::db;
use crate::error::Result;
use crate::repository::SyncRepository;
use crate::request::GlobalFlags;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default bound on concurrent downloads
pub const DEFAULT_PARALLEL_DOWNLOADS: usize = 5;

/// Default number of attempts per URL
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay between attempts; attempt `n` waits `n` times this
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Context {
    pub root: PathBuf,
    pub dbpath: PathBuf,
    pub cachedir: PathBuf,
    pub architecture: String,
    pub repositories: Vec<SyncRepository>,
    pub ignore_pkg: Vec<String>,
    pub parallel_downloads: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub check_space: bool,
}

/// Re-anchor an absolute configured path below an alternate root
fn below_root(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

impl Context {
    /// A context with default policy and no repositories
    pub fn new(root: PathBuf, dbpath: PathBuf, cachedir: PathBuf) -> Self {
        Self {
            root,
            dbpath,
            cachedir,
            architecture: config::resolve_architecture("auto"),
            repositories: Vec::new(),
            ignore_pkg: Vec::new(),
            parallel_downloads: DEFAULT_PARALLEL_DOWNLOADS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            check_space: false,
        }
    }

    /// Combine the configuration file with command line overrides
    ///
    /// With `--root` and no explicit `--dbpath`/`--cachedir`, the configured
    /// database and cache paths are taken relative to the new root.
    pub fn from_config(config: &PacmanConfig, flags: &GlobalFlags) -> Self {
        let root = flags
            .root
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.root_dir));
        let rerooted = flags.root.is_some();

        let dbpath = match &flags.dbpath {
            Some(path) => path.clone(),
            None if rerooted => below_root(&root, &config.db_path),
            None => PathBuf::from(&config.db_path),
        };
        let cachedir = match &flags.cachedir {
            Some(path) => path.clone(),
            None if rerooted => below_root(&root, &config.cache_dir),
            None => PathBuf::from(&config.cache_dir),
        };

        let architecture = config::resolve_architecture(&config.architecture);
        let repositories = config
            .repositories
            .iter()
            .map(|repo| {
                let servers = repo
                    .servers
                    .iter()
                    .map(|s| config::expand_server_url(s, &repo.name, &architecture))
                    .collect();
                SyncRepository::new(
                    repo.name.clone(),
                    servers,
                    repo.sig_level.clone().or_else(|| config.sig_level.clone()),
                )
            })
            .collect();

        let context = Self {
            root,
            dbpath,
            cachedir,
            architecture,
            repositories,
            ignore_pkg: config.ignore_pkg.clone(),
            parallel_downloads: config.parallel_downloads.max(1),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            check_space: config.check_space,
        };

        debug!(
            "context: root={} dbpath={} cachedir={} arch={} repos={}",
            context.root.display(),
            context.dbpath.display(),
            context.cachedir.display(),
            context.architecture,
            context.repositories.len()
        );
        context
    }

    /// Directory holding the sync repository databases
    pub fn sync_dir(&self) -> PathBuf {
        self.dbpath.join("sync")
    }

    pub fn local_db_path(&self) -> PathBuf {
        db::local_db_path(&self.dbpath)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dbpath.join("db.lck")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dbpath.join("transaction.journal")
    }

    /// Where files displaced by a commit are kept until it finishes
    pub fn journal_backup_dir(&self) -> PathBuf {
        self.dbpath.join("journal.d")
    }

    /// Map an absolute package path (`/usr/bin/x`) below the root
    pub fn rooted(&self, path: &str) -> PathBuf {
        below_root(&self.root, path)
    }

    /// Open the local database, creating it on first use
    pub fn open_local_db(&self) -> Result<Connection> {
        db::open_or_init(&self.local_db_path().to_string_lossy())
    }

    /// Load every repository snapshot from the sync directory
    pub fn load_repositories(&mut self) -> Result<()> {
        let sync_dir = self.sync_dir();
        for repo in &mut self.repositories {
            repo.load(&sync_dir)?;
        }
        Ok(())
    }

    /// Whether this invocation targets the running system
    pub fn is_live_system(&self) -> bool {
        self.root == Path::new("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoConfig;

    fn sample_config() -> PacmanConfig {
        PacmanConfig {
            architecture: "x86_64".to_string(),
            parallel_downloads: 0,
            repositories: vec![RepoConfig {
                name: "core".to_string(),
                servers: vec!["https://m.example/$repo/os/$arch".to_string()],
                sig_level: None,
            }],
            sig_level: Some("Required".to_string()),
            ..PacmanConfig::default()
        }
    }

    #[test]
    fn test_defaults_follow_config() {
        let ctx = Context::from_config(&sample_config(), &GlobalFlags::default());
        assert_eq!(ctx.root, PathBuf::from("/"));
        assert_eq!(ctx.dbpath, PathBuf::from("/var/lib/pacman"));
        assert_eq!(ctx.parallel_downloads, 1);
        assert!(ctx.is_live_system());
        assert_eq!(
            ctx.repositories[0].servers,
            vec!["https://m.example/core/os/x86_64".to_string()]
        );
        assert_eq!(ctx.repositories[0].sig_level.as_deref(), Some("Required"));
    }

    #[test]
    fn test_alternate_root_moves_paths() {
        let flags = GlobalFlags {
            root: Some(PathBuf::from("/mnt")),
            cachedir: Some(PathBuf::from("/tmp/cache")),
            ..GlobalFlags::default()
        };
        let ctx = Context::from_config(&sample_config(), &flags);
        assert_eq!(ctx.dbpath, PathBuf::from("/mnt/var/lib/pacman"));
        assert_eq!(ctx.cachedir, PathBuf::from("/tmp/cache"));
        assert_eq!(ctx.rooted("/usr/bin/vim"), PathBuf::from("/mnt/usr/bin/vim"));
        assert_eq!(ctx.lock_path(), PathBuf::from("/mnt/var/lib/pacman/db.lck"));
        assert!(!ctx.is_live_system());
    }
}

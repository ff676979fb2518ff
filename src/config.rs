// src/config.rs

//! pacman.conf parsing
//!
//! Reads the `[options]` section and one section per sync repository.
//! `Include` lines pull servers from a mirrorlist file.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pacman.conf";

/// A `[repo]` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    pub name: String,
    /// Raw server URLs; `$repo` and `$arch` are expanded by the context
    pub servers: Vec<String>,
    pub sig_level: Option<String>,
}

/// Parsed configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacmanConfig {
    pub root_dir: String,
    pub db_path: String,
    pub cache_dir: String,
    /// `auto` resolves to the host architecture
    pub architecture: String,
    pub sig_level: Option<String>,
    pub parallel_downloads: usize,
    pub check_space: bool,
    pub ignore_pkg: Vec<String>,
    pub log_file: Option<String>,
    pub repositories: Vec<RepoConfig>,
}

impl Default for PacmanConfig {
    fn default() -> Self {
        Self {
            root_dir: "/".to_string(),
            db_path: "/var/lib/pacman".to_string(),
            cache_dir: "/var/cache/pacman/pkg".to_string(),
            architecture: "auto".to_string(),
            sig_level: None,
            parallel_downloads: 5,
            check_space: false,
            ignore_pkg: Vec::new(),
            log_file: None,
            repositories: Vec::new(),
        }
    }
}

impl PacmanConfig {
    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!("{} not found, using default settings", path.display());
            Ok(Self::default())
        }
    }

    /// Parse configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut current_repo: Option<RepoConfig> = None;
        let mut in_options = false;

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            let line_no = index + 1;

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                let Some(section) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) else {
                    return Err(Error::ConfigError(format!(
                        "line {}: malformed section header '{}'",
                        line_no, line
                    )));
                };

                if let Some(repo) = current_repo.take() {
                    config.push_repository(repo);
                }

                in_options = section == "options";
                if !in_options {
                    current_repo = Some(RepoConfig {
                        name: section.to_string(),
                        servers: Vec::new(),
                        sig_level: None,
                    });
                }
                continue;
            }

            let (key, value) = match line.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (line, None),
            };

            if in_options {
                config.apply_option(key, value, line_no)?;
            } else if let Some(repo) = current_repo.as_mut() {
                match (key, value) {
                    ("Server", Some(v)) => repo.servers.push(v.to_string()),
                    ("Include", Some(v)) => repo.servers.extend(parse_mirrorlist(Path::new(v))?),
                    ("SigLevel", Some(v)) => repo.sig_level = Some(v.to_string()),
                    ("Usage", _) => {}
                    _ => debug!("line {}: ignoring '{}' in [{}]", line_no, key, repo.name),
                }
            } else {
                return Err(Error::ConfigError(format!(
                    "line {}: '{}' outside of any section",
                    line_no, key
                )));
            }
        }

        if let Some(repo) = current_repo {
            config.push_repository(repo);
        }

        Ok(config)
    }

    fn apply_option(&mut self, key: &str, value: Option<&str>, line_no: usize) -> Result<()> {
        let require = |value: Option<&str>| {
            value.map(str::to_string).ok_or_else(|| {
                Error::ConfigError(format!("line {}: '{}' requires a value", line_no, key))
            })
        };

        match key {
            "RootDir" => self.root_dir = require(value)?,
            "DBPath" => self.db_path = require(value)?,
            "CacheDir" => self.cache_dir = require(value)?,
            "Architecture" => {
                // Several architectures may be listed; the first is the native one
                let arch = require(value)?;
                self.architecture = arch
                    .split_whitespace()
                    .next()
                    .unwrap_or("auto")
                    .to_string();
            }
            "SigLevel" => self.sig_level = Some(require(value)?),
            "LogFile" => self.log_file = Some(require(value)?),
            "ParallelDownloads" => {
                let raw = require(value)?;
                self.parallel_downloads = raw.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(
                    || {
                        Error::ConfigError(format!(
                            "line {}: invalid ParallelDownloads '{}'",
                            line_no, raw
                        ))
                    },
                )?;
            }
            "IgnorePkg" => self
                .ignore_pkg
                .extend(require(value)?.split_whitespace().map(str::to_string)),
            "CheckSpace" => self.check_space = true,
            _ => debug!("line {}: ignoring option '{}'", line_no, key),
        }
        Ok(())
    }

    fn push_repository(&mut self, repo: RepoConfig) {
        if repo.servers.is_empty() {
            warn!("repository '{}' has no servers, skipping", repo.name);
            return;
        }
        self.repositories.push(repo);
    }
}

/// Collect `Server = ...` lines from a mirrorlist file
fn parse_mirrorlist(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::ConfigError(format!("Failed to read mirrorlist {}: {}", path.display(), e))
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| key.trim() == "Server")
        .map(|(_, value)| value.trim().to_string())
        .collect())
}

/// Resolve `auto` to the architecture of the running host
pub fn resolve_architecture(configured: &str) -> String {
    if configured == "auto" {
        std::env::consts::ARCH.to_string()
    } else {
        configured.to_string()
    }
}

/// Substitute `$repo` and `$arch` in a server URL
pub fn expand_server_url(server: &str, repo_name: &str, arch: &str) -> String {
    server
        .replace("$repo", repo_name)
        .replace("$arch_v3", &format!("{}_v3", arch))
        .replace("$arch_v4", &format!("{}_v4", arch))
        .replace("$arch", arch)
}

// tests/common/mod.rs

//! Shared fixtures: real package archives, a local mirror and scripted
//! collaborators

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use rustpack::commands::{self, Session};
use rustpack::context::Context;
use rustpack::repository::{self, Fetcher, SyncRepository};
use rustpack::request::{OperationRequest, RecoverMode};
use rustpack::scriptlet::{Hook, ScriptletRunner};
use rustpack::ui::Confirm;
use rustpack::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A package to build as a `.pkg.tar.gz`
#[derive(Debug, Clone)]
pub struct Pkg {
    pub name: String,
    pub version: String,
    pub depends: Vec<String>,
    pub conflicts: Vec<String>,
    pub replaces: Vec<String>,
    pub provides: Vec<String>,
    pub backup: Vec<String>,
    /// Root-relative path and content
    pub files: Vec<(String, String)>,
    pub scriptlet: Option<String>,
}

impl Pkg {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            depends: Vec::new(),
            conflicts: Vec::new(),
            replaces: Vec::new(),
            provides: Vec::new(),
            backup: Vec::new(),
            files: Vec::new(),
            scriptlet: None,
        }
    }

    pub fn depends(mut self, dep: &str) -> Self {
        self.depends.push(dep.to_string());
        self
    }

    pub fn conflicts(mut self, name: &str) -> Self {
        self.conflicts.push(name.to_string());
        self
    }

    pub fn replaces(mut self, name: &str) -> Self {
        self.replaces.push(name.to_string());
        self
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), content.to_string()));
        self
    }

    pub fn backup(mut self, path: &str) -> Self {
        self.backup.push(path.to_string());
        self
    }

    pub fn scriptlet(mut self, script: &str) -> Self {
        self.scriptlet = Some(script.to_string());
        self
    }

    pub fn filename(&self) -> String {
        format!("{}-{}-any.pkg.tar.gz", self.name, self.version)
    }

    /// Parent directories of every file, shallowest first
    fn directories(&self) -> Vec<String> {
        let mut dirs = BTreeSet::new();
        for (path, _) in &self.files {
            let parts: Vec<&str> = path.split('/').collect();
            for depth in 1..parts.len() {
                dirs.insert(parts[..depth].join("/"));
            }
        }
        dirs.into_iter().collect()
    }

    fn pkginfo(&self) -> String {
        let mut info = format!(
            "pkgname = {}\npkgver = {}\npkgdesc = {} test package\narch = any\nsize = {}\n",
            self.name,
            self.version,
            self.name,
            self.files.iter().map(|(_, c)| c.len()).sum::<usize>()
        );
        for (key, values) in [
            ("depend", &self.depends),
            ("conflict", &self.conflicts),
            ("replaces", &self.replaces),
            ("provides", &self.provides),
            ("backup", &self.backup),
        ] {
            for value in values {
                info.push_str(&format!("{} = {}\n", key, value));
            }
        }
        info
    }

    /// Write the archive into `dir`
    pub fn build(&self, dir: &Path) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(self.filename());
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

        append_file(&mut builder, ".PKGINFO", self.pkginfo().as_bytes());
        if let Some(script) = &self.scriptlet {
            append_file(&mut builder, ".INSTALL", script.as_bytes());
        }
        for dir in self.directories() {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, &dir, std::io::empty()).unwrap();
        }
        for (file_path, content) in &self.files {
            append_file(&mut builder, file_path, content.as_bytes());
        }

        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    /// `desc` and `files` entries for a repository database
    fn db_entries(&self, archive: &Path) -> Vec<(String, String)> {
        let mut desc = format!(
            "%FILENAME%\n{}\n\n%NAME%\n{}\n\n%VERSION%\n{}\n\n%DESC%\n{} test package\n\n\
             %CSIZE%\n{}\n\n%ISIZE%\n{}\n\n%SHA256SUM%\n{}\n\n%ARCH%\nany\n",
            self.filename(),
            self.name,
            self.version,
            self.name,
            fs::metadata(archive).unwrap().len(),
            self.files.iter().map(|(_, c)| c.len()).sum::<usize>(),
            repository::compute_sha256(archive).unwrap()
        );
        for (key, values) in [
            ("DEPENDS", &self.depends),
            ("CONFLICTS", &self.conflicts),
            ("REPLACES", &self.replaces),
            ("PROVIDES", &self.provides),
            ("BACKUP", &self.backup),
        ] {
            if !values.is_empty() {
                desc.push_str(&format!("\n%{}%\n{}\n", key, values.join("\n")));
            }
        }

        let mut files = String::from("%FILES%\n");
        for dir in self.directories() {
            files.push_str(&format!("{}/\n", dir));
        }
        for (path, _) in &self.files {
            files.push_str(&format!("{}\n", path));
        }

        let dir = format!("{}-{}", self.name, self.version);
        vec![(format!("{}/desc", dir), desc), (format!("{}/files", dir), files)]
    }
}

fn append_file<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, data).unwrap();
}

/// Copies `url` (a local path) to `dest`
#[derive(Default)]
pub struct LocalFetcher {
    pub calls: Mutex<Vec<String>>,
}

impl Fetcher for LocalFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(url.to_string());
        if !Path::new(url).is_file() {
            return Err(Error::DownloadError(format!("{} not found", url)));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(url, dest)?;
        Ok(())
    }
}

/// Answers questions from a script; an exhausted script reads as EOF
pub struct Scripted {
    answers: Mutex<VecDeque<bool>>,
    recovery: Option<RecoverMode>,
    pub asked: Mutex<Vec<String>>,
}

impl Scripted {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            recovery: None,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn with_recovery(mut self, mode: RecoverMode) -> Self {
        self.recovery = Some(mode);
        self
    }

    pub fn questions(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl Confirm for Scripted {
    fn confirm(&self, question: &str) -> Result<bool> {
        self.asked.lock().unwrap().push(question.to_string());
        Ok(self.answers.lock().unwrap().pop_front().unwrap_or(false))
    }

    fn choose_recovery(&self, _journal: &Path) -> Result<Option<RecoverMode>> {
        Ok(self.recovery)
    }
}

/// Records hook calls; pre-hooks of scripts containing `FAIL` fail until
/// the runner is healed
#[derive(Default)]
pub struct RecordingRunner {
    pub calls: Mutex<Vec<String>>,
    healed: AtomicBool,
}

impl RecordingRunner {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn heal(&self) {
        self.healed.store(true, Ordering::SeqCst);
    }
}

impl ScriptletRunner for RecordingRunner {
    fn run(&self, script: &str, hook: Hook, args: &[&str], _root: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", hook.function(), args.join(" ")));
        if hook.is_pre() && script.contains("FAIL") && !self.healed.load(Ordering::SeqCst) {
            return Err(Error::IoError(format!("{} exited with status 1", hook.function())));
        }
        Ok(())
    }
}

/// A target root, database, cache and mirror under one temporary directory
pub struct Fixture {
    pub dir: TempDir,
    pub fetcher: LocalFetcher,
    pub runner: RecordingRunner,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for sub in ["root", "db", "cache", "mirror"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        Self {
            dir,
            fetcher: LocalFetcher::default(),
            runner: RecordingRunner::default(),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    pub fn dbpath(&self) -> PathBuf {
        self.dir.path().join("db")
    }

    pub fn cachedir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn mirror(&self) -> PathBuf {
        self.dir.path().join("mirror")
    }

    /// Build the archives into the mirror and publish `core.db` there
    pub fn publish(&self, packages: &[Pkg]) {
        let mut entries = Vec::new();
        for pkg in packages {
            let archive = pkg.build(&self.mirror());
            entries.extend(pkg.db_entries(&archive));
        }

        let file = File::create(self.mirror().join("core.db")).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (path, content) in &entries {
            append_file(&mut builder, path, content.as_bytes());
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    /// Publish and install the database into the sync directory, as `-Sy` would
    pub fn publish_synced(&self, packages: &[Pkg]) {
        self.publish(packages);
        let sync = self.dbpath().join("sync");
        fs::create_dir_all(&sync).unwrap();
        fs::copy(self.mirror().join("core.db"), sync.join("core.db")).unwrap();
    }

    pub fn context(&self) -> Context {
        let mut ctx = Context::new(self.root(), self.dbpath(), self.cachedir());
        ctx.repositories = vec![SyncRepository::new(
            "core".to_string(),
            vec![self.mirror().to_string_lossy().to_string()],
            None,
        )];
        ctx.parallel_downloads = 2;
        ctx.load_repositories().unwrap();
        ctx
    }

    pub fn session<'a>(&'a self, confirm: &'a dyn Confirm) -> Session<'a> {
        Session {
            fetcher: &self.fetcher,
            confirm,
            scriptlets: &self.runner,
            interrupted: Arc::new(AtomicBool::new(false)),
            require_root: false,
        }
    }

    /// Run a command line against this fixture
    pub fn run(&self, args: &[&str], confirm: &dyn Confirm) -> Result<()> {
        let request = parse(args);
        let mut ctx = self.context();
        commands::run(&request, &mut ctx, &self.session(confirm))
    }

    pub fn root_file(&self, path: &str) -> PathBuf {
        self.root().join(path.trim_start_matches('/'))
    }

    pub fn read_root(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.root_file(path)).ok()
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dbpath().join("transaction.journal")
    }

    pub fn installed(&self) -> BTreeMap<String, rustpack::packages::PackageRecord> {
        let path = self.dbpath().join("local.db");
        if !path.exists() {
            return BTreeMap::new();
        }
        let conn = rustpack::db::open(&path.to_string_lossy()).unwrap();
        rustpack::db::models::load_all(&conn)
            .unwrap()
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect()
    }

    /// Every file below `dir` with its content
    pub fn snapshot(&self, dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let Ok(entries) = fs::read_dir(&current) else {
                continue;
            };
            for entry in entries {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    files.insert(path.clone(), Vec::new());
                    pending.push(path);
                } else {
                    files.insert(path.clone(), fs::read(&path).unwrap_or_default());
                }
            }
        }
        files
    }
}

pub fn parse(args: &[&str]) -> OperationRequest {
    let mut full = vec!["rustpack"];
    full.extend_from_slice(args);
    rustpack::cli::parse_request(full).unwrap()
}

// src/packages/arch.rs

//! Arch Linux package format parser
//!
//! Parses .pkg.tar.zst, .pkg.tar.xz and .pkg.tar.gz packages, extracting
//! metadata from .PKGINFO and the install scriptlet from .INSTALL

use crate::error::{Error, Result};
use crate::packages::traits::{PackageFile, PackageFormat};
use crate::packages::PackageRecord;
use crate::version::Dependency;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::debug;
use xz2::read::XzDecoder;

/// Archive members that describe the package rather than belong to it
const METADATA_ENTRIES: &[&str] = &[".PKGINFO", ".MTREE", ".BUILDINFO", ".INSTALL", ".CHANGELOG"];

/// Arch Linux package representation
#[derive(Debug)]
pub struct ArchPackage {
    package_path: PathBuf,
    name: String,
    version: String,
    architecture: Option<String>,
    description: Option<String>,
    files: Vec<PackageFile>,
    dependencies: Vec<Dependency>,
    optional_deps: Vec<String>,
    provides: Vec<Dependency>,
    conflicts: Vec<Dependency>,
    replaces: Vec<Dependency>,
    backup: Vec<String>,
    installed_size: u64,
    scriptlet: Option<String>,
    // Additional Arch-specific metadata
    url: Option<String>,
    licenses: Vec<String>,
    groups: Vec<String>,
    packager: Option<String>,
    build_date: Option<String>,
}

impl ArchPackage {
    /// Detect compression format from file extension, then magic bytes
    fn detect_compression(path: &Path) -> Result<CompressionFormat> {
        let name = path.to_string_lossy();
        if name.ends_with(".tar.zst") {
            return Ok(CompressionFormat::Zstd);
        } else if name.ends_with(".tar.xz") {
            return Ok(CompressionFormat::Xz);
        } else if name.ends_with(".tar.gz") {
            return Ok(CompressionFormat::Gzip);
        } else if name.ends_with(".tar") {
            return Ok(CompressionFormat::None);
        }

        let mut file = File::open(path)
            .map_err(|e| Error::InitError(format!("Failed to open package file: {}", e)))?;
        let mut magic = [0u8; 6];
        let read = file.read(&mut magic)?;
        Ok(CompressionFormat::from_magic(&magic[..read]))
    }

    /// Open and decompress the package archive
    fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
        let file = File::open(path)
            .map_err(|e| Error::InitError(format!("Failed to open package file: {}", e)))?;

        let compression = Self::detect_compression(path)?;

        let reader: Box<dyn Read> = match compression {
            CompressionFormat::Zstd => {
                let decoder = zstd::Decoder::new(file)
                    .map_err(|e| Error::InitError(format!("Failed to create zstd decoder: {}", e)))?;
                Box::new(decoder)
            }
            CompressionFormat::Xz => Box::new(XzDecoder::new(file)),
            CompressionFormat::Gzip => Box::new(GzDecoder::new(file)),
            CompressionFormat::None => Box::new(file),
        };

        Ok(Archive::new(reader))
    }

    /// Parse .PKGINFO file content
    fn parse_pkginfo(content: &str) -> Result<PkgInfo> {
        let mut info = PkgInfo::default();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // Parse key = value pairs
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();

                match key {
                    "pkgname" => info.name = Some(value.to_string()),
                    "pkgver" => info.version = Some(value.to_string()),
                    "pkgdesc" => info.description = Some(value.to_string()),
                    "url" => info.url = Some(value.to_string()),
                    "builddate" => info.build_date = Some(value.to_string()),
                    "packager" => info.packager = Some(value.to_string()),
                    "size" => info.size = value.parse().ok(),
                    "arch" => info.architecture = Some(value.to_string()),
                    "license" => info.licenses.push(value.to_string()),
                    "group" => info.groups.push(value.to_string()),
                    "depend" => info.dependencies.push(value.to_string()),
                    "optdepend" => info.optional_deps.push(value.to_string()),
                    "provides" => info.provides.push(value.to_string()),
                    "conflict" => info.conflicts.push(value.to_string()),
                    "replaces" => info.replaces.push(value.to_string()),
                    "backup" => info.backup.push(value.to_string()),
                    _ => {} // Ignore unknown keys
                }
            }
        }

        Ok(info)
    }

    /// Read the archive once, collecting .PKGINFO, .INSTALL and the file list
    fn scan_archive(path: &Path) -> Result<(Option<String>, Option<String>, Vec<PackageFile>)> {
        let mut archive = Self::open_archive(path)?;
        let mut pkginfo = None;
        let mut scriptlet = None;
        let mut files = Vec::new();

        for entry in archive
            .entries()
            .map_err(|e| Error::InitError(format!("Failed to read archive entries: {}", e)))?
        {
            let mut entry =
                entry.map_err(|e| Error::InitError(format!("Failed to read archive entry: {}", e)))?;

            let entry_path = entry
                .path()
                .map_err(|e| Error::InitError(format!("Failed to get entry path: {}", e)))?
                .to_string_lossy()
                .to_string();

            match entry_path.as_str() {
                ".PKGINFO" => {
                    let mut content = String::new();
                    entry
                        .read_to_string(&mut content)
                        .map_err(|e| Error::InitError(format!("Failed to read .PKGINFO: {}", e)))?;
                    pkginfo = Some(content);
                    continue;
                }
                ".INSTALL" => {
                    let mut content = String::new();
                    entry
                        .read_to_string(&mut content)
                        .map_err(|e| Error::InitError(format!("Failed to read .INSTALL: {}", e)))?;
                    scriptlet = Some(content);
                    continue;
                }
                p if METADATA_ENTRIES.contains(&p) => continue,
                _ => {}
            }

            let is_dir = entry.header().entry_type().is_dir();
            let size = entry
                .header()
                .size()
                .map_err(|e| Error::InitError(format!("Failed to get file size: {}", e)))?;
            let mode = entry
                .header()
                .mode()
                .map_err(|e| Error::InitError(format!("Failed to get file mode: {}", e)))?;

            let trimmed = entry_path.trim_start_matches("./").trim_end_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            let path = if is_dir {
                format!("/{}/", trimmed)
            } else {
                format!("/{}", trimmed)
            };

            files.push(PackageFile {
                path,
                size: size as i64,
                mode: mode as i32,
                is_dir,
            });
        }

        Ok((pkginfo, scriptlet, files))
    }

    fn parse_relations(values: &[String]) -> Vec<Dependency> {
        values.iter().map(|v| Dependency::parse(v)).collect()
    }

    /// Path of the archive this package was read from
    pub fn path(&self) -> &Path {
        &self.package_path
    }

    /// Get upstream URL
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Get package licenses
    pub fn licenses(&self) -> &[String] {
        &self.licenses
    }

    /// Get package groups
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Get packager information
    pub fn packager(&self) -> Option<&str> {
        self.packager.as_deref()
    }

    /// Get build date
    pub fn build_date(&self) -> Option<&str> {
        self.build_date.as_deref()
    }
}

/// Package compression format
#[derive(Debug, PartialEq, Eq)]
enum CompressionFormat {
    Zstd,
    Xz,
    Gzip,
    None,
}

impl CompressionFormat {
    fn from_magic(magic: &[u8]) -> Self {
        if magic.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
            CompressionFormat::Zstd
        } else if magic.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]) {
            CompressionFormat::Xz
        } else if magic.starts_with(&[0x1F, 0x8B]) {
            CompressionFormat::Gzip
        } else {
            CompressionFormat::None
        }
    }
}

/// Parsed .PKGINFO metadata
#[derive(Default)]
struct PkgInfo {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    url: Option<String>,
    architecture: Option<String>,
    build_date: Option<String>,
    packager: Option<String>,
    size: Option<u64>,
    licenses: Vec<String>,
    groups: Vec<String>,
    dependencies: Vec<String>,
    optional_deps: Vec<String>,
    provides: Vec<String>,
    conflicts: Vec<String>,
    replaces: Vec<String>,
    backup: Vec<String>,
}

impl PackageFormat for ArchPackage {
    fn parse(path: &Path) -> Result<Self> {
        debug!("Parsing Arch package: {}", path.display());

        let (pkginfo_content, scriptlet, files) = Self::scan_archive(path)?;

        let pkginfo_content = pkginfo_content
            .ok_or_else(|| Error::ParseError("No .PKGINFO file found in package".to_string()))?;

        let pkginfo = Self::parse_pkginfo(&pkginfo_content)?;

        let name = pkginfo
            .name
            .ok_or_else(|| Error::ParseError("Package name not found in .PKGINFO".to_string()))?;

        let version = pkginfo
            .version
            .ok_or_else(|| Error::ParseError("Package version not found in .PKGINFO".to_string()))?;

        debug!(
            "Parsed Arch package: {} version {} ({} files, {} dependencies)",
            name,
            version,
            files.len(),
            pkginfo.dependencies.len()
        );

        Ok(Self {
            package_path: path.to_path_buf(),
            name,
            version,
            architecture: pkginfo.architecture,
            description: pkginfo.description,
            files,
            dependencies: Self::parse_relations(&pkginfo.dependencies),
            optional_deps: pkginfo.optional_deps,
            provides: Self::parse_relations(&pkginfo.provides),
            conflicts: Self::parse_relations(&pkginfo.conflicts),
            replaces: Self::parse_relations(&pkginfo.replaces),
            backup: pkginfo.backup,
            installed_size: pkginfo.size.unwrap_or(0),
            scriptlet,
            url: pkginfo.url,
            licenses: pkginfo.licenses,
            groups: pkginfo.groups,
            packager: pkginfo.packager,
            build_date: pkginfo.build_date,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn architecture(&self) -> Option<&str> {
        self.architecture.as_deref()
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn files(&self) -> &[PackageFile] {
        &self.files
    }

    fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    fn scriptlet(&self) -> Option<&str> {
        self.scriptlet.as_deref()
    }

    fn extract_to(&self, root: &Path) -> Result<Vec<String>> {
        debug!(
            "Extracting {} into {}",
            self.package_path.display(),
            root.display()
        );

        let mut archive = Self::open_archive(&self.package_path)?;
        let mut written = Vec::new();

        for entry in archive
            .entries()
            .map_err(|e| Error::InitError(format!("Failed to read archive: {}", e)))?
        {
            let mut entry =
                entry.map_err(|e| Error::InitError(format!("Failed to read entry: {}", e)))?;

            let entry_path = entry
                .path()
                .map_err(|e| Error::InitError(format!("Failed to get entry path: {}", e)))?
                .into_owned();

            let relative = entry_path.strip_prefix("./").unwrap_or(&entry_path).to_path_buf();
            let relative_str = relative.to_string_lossy().trim_end_matches('/').to_string();

            if relative_str.is_empty() || METADATA_ENTRIES.contains(&relative_str.as_str()) {
                continue;
            }

            if relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(Error::ParseError(format!(
                    "Refusing unsafe archive path: {}",
                    relative.display()
                )));
            }

            let target = root.join(&relative);

            if entry.header().entry_type().is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            if fs::symlink_metadata(&target).is_ok() {
                fs::remove_file(&target)?;
            }

            entry.unpack(&target).map_err(|e| {
                Error::IoError(format!("Failed to write {}: {}", target.display(), e))
            })?;

            written.push(format!("/{}", relative_str));
        }

        debug!("Extracted {} files from {}", written.len(), self.name);
        Ok(written)
    }

    fn to_record(&self) -> PackageRecord {
        let mut record = PackageRecord::new(self.name.clone(), self.version.clone());

        record.architecture = self.architecture.clone();
        record.description = self.description.clone();
        record.url = self.url.clone();
        record.licenses = self.licenses.clone();
        record.groups = self.groups.clone();
        record.depends = self.dependencies.clone();
        record.optdepends = self.optional_deps.clone();
        record.provides = self.provides.clone();
        record.conflicts = self.conflicts.clone();
        record.replaces = self.replaces.clone();
        record.backup = self.backup.clone();
        record.installed_size = self.installed_size;
        record.files = self.files.iter().map(|f| f.path.clone()).collect();
        record.scriptlet = self.scriptlet.clone();
        record.filename = self
            .package_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string());

        record
    }
}

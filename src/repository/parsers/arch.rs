// src/repository/parsers/arch.rs

//! Arch Linux repository metadata parser
//!
//! Parses Arch Linux `<repo>.db` files: tarballs holding one directory per
//! package with `desc`, `depends` and `files` entries in a text format with
//! %FIELD% markers.

use super::RepositoryParser;
use crate::error::{Error, Result};
use crate::packages::PackageRecord;
use crate::version::Dependency;
use flate2::read::GzDecoder;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use tar::Archive;
use tracing::{debug, warn};
use xz2::read::XzDecoder;

/// Arch Linux repository parser
pub struct ArchParser {
    /// Repository name (e.g., "core", "extra")
    repo_name: String,
}

type Fields = HashMap<String, Vec<String>>;

impl ArchParser {
    /// Create a new Arch Linux parser for a specific repository
    pub fn new(repo_name: String) -> Self {
        Self { repo_name }
    }

    /// Decompress the database (handles .gz, .xz, .zst or a plain tar)
    fn decompress_database(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() > 262 && &data[257..262] == b"ustar" {
            debug!("Database is an uncompressed tarball");
            return Ok(data.to_vec());
        }

        // Try gzip first
        let mut gz = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        if gz.read_to_end(&mut decompressed).is_ok() && !decompressed.is_empty() {
            debug!("Decompressed gzip database");
            return Ok(decompressed);
        }

        // Try xz
        let mut xz = XzDecoder::new(data);
        let mut decompressed = Vec::new();
        if xz.read_to_end(&mut decompressed).is_ok() && !decompressed.is_empty() {
            debug!("Decompressed xz database");
            return Ok(decompressed);
        }

        // If neither worked, try zstd
        match zstd::decode_all(data) {
            Ok(decompressed) => {
                debug!("Decompressed zstd database");
                Ok(decompressed)
            }
            Err(e) => Err(Error::ParseError(format!(
                "Failed to decompress database (tried gz, xz, zstd): {}",
                e
            ))),
        }
    }

    /// Parse a desc-style file into its fields
    fn parse_desc_file(&self, content: &str, fields: &mut Fields) {
        let mut current_field: Option<String> = None;

        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.len() > 2 && trimmed.starts_with('%') && trimmed.ends_with('%') {
                let field = trimmed[1..trimmed.len() - 1].to_string();
                fields.entry(field.clone()).or_default();
                current_field = Some(field);
            } else if !trimmed.is_empty() {
                if let Some(field) = &current_field {
                    fields.entry(field.clone()).or_default().push(trimmed.to_string());
                }
            }
        }
    }

    fn first(fields: &Fields, key: &str) -> Option<String> {
        fields.get(key).and_then(|v| v.first()).cloned()
    }

    fn list(fields: &Fields, key: &str) -> Vec<String> {
        fields.get(key).cloned().unwrap_or_default()
    }

    fn relations(fields: &Fields, key: &str) -> Vec<Dependency> {
        fields
            .get(key)
            .map(|values| values.iter().map(|v| Dependency::parse(v)).collect())
            .unwrap_or_default()
    }

    /// Build a record from the merged fields of one package directory
    fn build_record(&self, dir: &str, fields: &Fields) -> Result<PackageRecord> {
        let name = Self::first(fields, "NAME")
            .ok_or_else(|| Error::ParseError(format!("Missing %NAME% field in {}", dir)))?;
        let version = Self::first(fields, "VERSION")
            .ok_or_else(|| Error::ParseError(format!("Missing %VERSION% field in {}", dir)))?;

        let mut record = PackageRecord::new(name, version);
        record.architecture = Self::first(fields, "ARCH");
        record.description = Self::first(fields, "DESC");
        record.url = Self::first(fields, "URL");
        record.licenses = Self::list(fields, "LICENSE");
        record.groups = Self::list(fields, "GROUPS");
        record.filename = Self::first(fields, "FILENAME");
        record.sha256 = Self::first(fields, "SHA256SUM");
        record.download_size = Self::first(fields, "CSIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        record.installed_size = Self::first(fields, "ISIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        record.depends = Self::relations(fields, "DEPENDS");
        record.optdepends = Self::list(fields, "OPTDEPENDS");
        record.provides = Self::relations(fields, "PROVIDES");
        record.conflicts = Self::relations(fields, "CONFLICTS");
        record.replaces = Self::relations(fields, "REPLACES");
        record.backup = Self::list(fields, "BACKUP");
        record.files = Self::list(fields, "FILES")
            .into_iter()
            .map(|path| format!("/{}", path.trim_start_matches('/')))
            .collect();
        record.repository = Some(self.repo_name.clone());

        Ok(record)
    }
}

impl RepositoryParser for ArchParser {
    fn parse_database(&self, data: &[u8]) -> Result<Vec<PackageRecord>> {
        debug!("Parsing Arch repository database: {}", self.repo_name);

        let decompressed = self.decompress_database(data)?;
        let mut archive = Archive::new(decompressed.as_slice());

        // desc, depends and files entries of one package share a directory
        let mut by_dir: BTreeMap<String, Fields> = BTreeMap::new();

        for entry in archive.entries()? {
            let mut entry = entry
                .map_err(|e| Error::ParseError(format!("Failed to read tarball entry: {}", e)))?;

            let path = entry
                .path()
                .map_err(|e| Error::ParseError(format!("Invalid path in tarball: {}", e)))?
                .to_string_lossy()
                .to_string();

            let Some((dir, file)) = path.trim_start_matches("./").rsplit_once('/') else {
                continue;
            };
            if !matches!(file, "desc" | "depends" | "files") {
                continue;
            }

            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|e| Error::ParseError(format!("Failed to read {}: {}", path, e)))?;

            let fields = by_dir.entry(dir.to_string()).or_default();
            self.parse_desc_file(&content, fields);
        }

        let mut packages = Vec::with_capacity(by_dir.len());
        for (dir, fields) in &by_dir {
            if !fields.contains_key("NAME") {
                warn!("Skipping {}/{}: no desc entry", self.repo_name, dir);
                continue;
            }
            packages.push(self.build_record(dir, fields)?);
        }

        debug!(
            "Parsed {} packages from repository {}",
            packages.len(),
            self.repo_name
        );
        Ok(packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn build_db(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_parse_desc_file() {
        let parser = ArchParser::new("core".to_string());
        let content = "%NAME%\nbash\n\n%VERSION%\n5.2.037-1\n\n%DESC%\nThe GNU Bourne Again shell\n";

        let mut fields = Fields::new();
        parser.parse_desc_file(content, &mut fields);

        assert_eq!(fields.get("NAME"), Some(&vec!["bash".to_string()]));
        assert_eq!(fields.get("VERSION"), Some(&vec!["5.2.037-1".to_string()]));
        assert_eq!(
            fields.get("DESC"),
            Some(&vec!["The GNU Bourne Again shell".to_string()])
        );
    }

    #[test]
    fn test_parse_database_merges_entries() {
        let data = build_db(&[
            (
                "bash-5.2.037-1/desc",
                "%FILENAME%\nbash-5.2.037-1-x86_64.pkg.tar.zst\n\n%NAME%\nbash\n\n\
                 %VERSION%\n5.2.037-1\n\n%CSIZE%\n1800000\n\n%ISIZE%\n9000000\n\n\
                 %SHA256SUM%\nabc123\n\n%ARCH%\nx86_64\n\n%PROVIDES%\nsh\n",
            ),
            (
                "bash-5.2.037-1/depends",
                "%DEPENDS%\nreadline>=7.0\nglibc\n\n%OPTDEPENDS%\nbash-completion: completions\n",
            ),
            ("bash-5.2.037-1/files", "%FILES%\nusr/\nusr/bin/\nusr/bin/bash\n"),
            (
                "glibc-2.40-1/desc",
                "%NAME%\nglibc\n\n%VERSION%\n2.40-1\n\n%DEPENDS%\nlinux-api-headers>=4.10\n",
            ),
        ]);

        let parser = ArchParser::new("core".to_string());
        let packages = parser.parse_database(&data).unwrap();
        assert_eq!(packages.len(), 2);

        let bash = &packages[0];
        assert_eq!(bash.name, "bash");
        assert_eq!(bash.repository.as_deref(), Some("core"));
        assert_eq!(bash.download_size, 1_800_000);
        assert_eq!(bash.installed_size, 9_000_000);
        assert_eq!(bash.sha256.as_deref(), Some("abc123"));
        assert_eq!(bash.depends.len(), 2);
        assert_eq!(bash.depends[0].to_string(), "readline>=7.0");
        assert_eq!(bash.provides[0].name, "sh");
        assert_eq!(bash.optdepends, vec!["bash-completion: completions".to_string()]);
        assert!(bash.files.contains(&"/usr/bin/bash".to_string()));

        // Dependencies stored inside desc, as newer databases do
        assert_eq!(packages[1].depends[0].name, "linux-api-headers");
    }

    #[test]
    fn test_missing_version_is_an_error() {
        let data = build_db(&[("broken-1/desc", "%NAME%\nbroken\n")]);
        let parser = ArchParser::new("core".to_string());
        assert!(matches!(parser.parse_database(&data), Err(Error::ParseError(_))));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let parser = ArchParser::new("core".to_string());
        assert!(parser.parse_database(b"definitely not a database").is_err());
    }
}

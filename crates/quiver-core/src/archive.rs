//! Artifact archives.
//!
//! Every artifact travels as a zip with a `metadata.toml` descriptor at its
//! root. This module checks zip-ness, reads the descriptor, packs exploded
//! directories, and unpacks archives for installers.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ArchiveError;
use crate::model::{ArtifactType, Dependency};

/// Descriptor file required at the archive root.
pub const METADATA_FILE: &str = "metadata.toml";

/// Parsed `metadata.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArtifactMetadata {
    pub name: String,
    pub version: String,

    #[serde(rename = "type")]
    pub kind: ArtifactType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub clients: Vec<String>,

    /// Dependency versions here are constraints (`>=1.0,<2.0`).
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl ArtifactMetadata {
    pub fn parse(content: &str) -> Result<Self, ArchiveError> {
        toml::from_str(content).map_err(|e| ArchiveError::InvalidMetadata(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ArchiveError> {
        toml::to_string(self).map_err(|e| ArchiveError::InvalidMetadata(e.to_string()))
    }
}

/// Whether `bytes` is a readable zip with at least one entry.
pub fn is_valid_archive(bytes: &[u8]) -> bool {
    match ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => !archive.is_empty(),
        Err(_) => false,
    }
}

/// Read and parse the root `metadata.toml`.
pub fn read_metadata(bytes: &[u8]) -> Result<ArtifactMetadata, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut file = match archive.by_name(METADATA_FILE) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ArchiveError::MissingMetadata(METADATA_FILE))
        }
        Err(e) => return Err(e.into()),
    };

    let mut content = String::new();
    file.read_to_string(&mut content)?;
    ArtifactMetadata::parse(&content)
}

/// Zip a directory tree. Entries are sorted and timestamps fixed so the same
/// tree always produces the same bytes. `.git` directories are skipped.
pub fn archive_directory(dir: &Path) -> Result<Vec<u8>, ArchiveError> {
    if !dir.is_dir() {
        return Err(ArchiveError::MissingDirectory(dir.to_path_buf()));
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| ArchiveError::Io(std::io::Error::other(e.to_string())))?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", rel), opts)?;
        } else if entry.file_type().is_file() {
            zip.start_file(rel, opts)?;
            let bytes = std::fs::read(entry.path())?;
            zip.write_all(&bytes)?;
        }
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

/// Build an archive from in-memory `(name, content)` entries.
pub fn archive_entries<'a, I>(entries: I) -> Result<Vec<u8>, ArchiveError>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, content) in entries {
        zip.start_file(name, opts)?;
        zip.write_all(content)?;
    }
    Ok(zip.finish()?.into_inner())
}

/// Unpack `bytes` into `dest`. Entries escaping `dest` are rejected.
pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<usize, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut written = 0;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let Some(rel) = file.enclosed_name() else {
            return Err(ArchiveError::NotZip(format!(
                "entry '{}' escapes the archive root",
                file.name()
            )));
        };
        let out_path = dest.join(rel);

        if file.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        std::fs::write(&out_path, &buf)?;
        written += 1;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const METADATA: &str = r#"
name = "code-review"
version = "1.2.0"
type = "skill"
clients = ["claude"]

[[dependencies]]
name = "style-guide"
version = ">=1.0"
"#;

    #[test]
    fn test_read_metadata() {
        let bytes =
            archive_entries([(METADATA_FILE, METADATA.as_bytes()), ("SKILL.md", b"# hi".as_slice())])
                .unwrap();
        assert!(is_valid_archive(&bytes));

        let meta = read_metadata(&bytes).unwrap();
        assert_eq!(meta.name, "code-review");
        assert_eq!(meta.kind, ArtifactType::Skill);
        assert_eq!(meta.dependencies[0].version.as_deref(), Some(">=1.0"));
    }

    #[test]
    fn test_missing_metadata() {
        let bytes = archive_entries([("README.md", b"x".as_slice())]).unwrap();
        assert!(matches!(
            read_metadata(&bytes),
            Err(ArchiveError::MissingMetadata(_))
        ));
    }

    #[test]
    fn test_garbage_is_not_an_archive() {
        assert!(!is_valid_archive(b"definitely not a zip"));
        assert!(!is_valid_archive(&[]));
        assert!(matches!(
            read_metadata(b"garbage"),
            Err(ArchiveError::NotZip(_))
        ));
    }

    #[test]
    fn test_archive_directory_is_deterministic() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), METADATA).unwrap();
        std::fs::create_dir_all(dir.path().join("prompts/nested")).unwrap();
        std::fs::write(dir.path().join("prompts/nested/a.md"), "a").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();

        let first = archive_directory(dir.path()).unwrap();
        let second = archive_directory(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(read_metadata(&first).unwrap().name, "code-review");

        let out = TempDir::new().unwrap();
        let written = extract_archive(&first, out.path()).unwrap();
        assert_eq!(written, 2);
        assert!(out.path().join("prompts/nested/a.md").exists());
        assert!(!out.path().join(".git").exists());
    }

    #[test]
    fn test_archive_missing_directory() {
        let dir = TempDir::new().unwrap();
        let err = archive_directory(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ArchiveError::MissingDirectory(_)));
    }
}

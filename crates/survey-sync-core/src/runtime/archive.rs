// crates/survey-sync-core/src/runtime/archive.rs
// ============================================================================
// Module: Survey Sync Archives
// Description: Zip codecs for form, resource, and submitted-data archives.
// Purpose: Read and write zip payloads with size caps and traversal rejection.
// Dependencies: zip
// ============================================================================

//! ## Overview
//! Four archive shapes cross the wire:
//! - form archives carry a single `<formId>.json` definition;
//! - resource archives are extracted into the resource directory;
//! - submitted-data archives carry `data.json` and are built on the device;
//! - bootstrap bundles carry form definitions next to nested resource archives.
//!
//! Archive contents are untrusted. Entry sizes are capped and entries whose
//! path would escape the destination directory are rejected before anything
//! is written.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::path::Path;

use thiserror::Error;
use zip::CompressionMethod;
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::FileOptions;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum decompressed size of a single archive entry.
pub const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// Maximum number of entries accepted in one archive.
pub const MAX_ENTRIES: usize = 4096;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Archive codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    /// The archive is malformed or lacks a required entry.
    #[error("invalid archive: {0}")]
    Invalid(String),
    /// An entry path escapes the destination directory.
    #[error("archive entry escapes destination: {0}")]
    Traversal(String),
    /// An entry exceeds the size cap.
    #[error("archive entry too large: {0}")]
    TooLarge(String),
    /// Filesystem failure while extracting.
    #[error("archive io error: {0}")]
    Io(String),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Invalid(err.to_string())
    }
}

// ============================================================================
// SECTION: Reading
// ============================================================================

/// Opens an in-memory archive, enforcing the entry count cap.
fn open(bytes: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>, ArchiveError> {
    let archive = ZipArchive::new(Cursor::new(bytes))?;
    if archive.len() > MAX_ENTRIES {
        return Err(ArchiveError::TooLarge(format!(
            "{} entries (max {MAX_ENTRIES})",
            archive.len()
        )));
    }
    Ok(archive)
}

/// Reads one entry fully, enforcing the size cap.
fn read_capped(entry: &mut zip::read::ZipFile<'_>) -> Result<Vec<u8>, ArchiveError> {
    let name = entry.name().to_string();
    if entry.size() > MAX_ENTRY_BYTES {
        return Err(ArchiveError::TooLarge(name));
    }
    let mut buf = Vec::new();
    entry
        .by_ref()
        .take(MAX_ENTRY_BYTES + 1)
        .read_to_end(&mut buf)
        .map_err(|err| ArchiveError::Invalid(format!("{name}: {err}")))?;
    if u64::try_from(buf.len()).unwrap_or(u64::MAX) > MAX_ENTRY_BYTES {
        return Err(ArchiveError::TooLarge(name));
    }
    Ok(buf)
}

/// Returns the contents of the entry whose file name is `entry_name`.
///
/// Directory prefixes inside the archive are ignored.
///
/// # Errors
///
/// Returns [`ArchiveError::Invalid`] when the archive is malformed or the
/// entry is missing.
pub fn read_entry(bytes: &[u8], entry_name: &str) -> Result<Vec<u8>, ArchiveError> {
    let mut archive = open(bytes)?;
    for index in 0 .. archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let matches = Path::new(entry.name())
            .file_name()
            .is_some_and(|name| name.to_str() == Some(entry_name));
        if matches {
            return read_capped(&mut entry);
        }
    }
    Err(ArchiveError::Invalid(format!("missing entry: {entry_name}")))
}

/// Returns every file entry as `(file name, contents)` in archive order.
///
/// Directory entries are skipped and directory prefixes are dropped from the
/// returned names.
///
/// # Errors
///
/// Returns [`ArchiveError`] when the archive is malformed or an entry
/// exceeds the size cap.
pub fn read_files(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ArchiveError> {
    let mut archive = open(bytes)?;
    let mut files = Vec::with_capacity(archive.len());
    for index in 0 .. archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = Path::new(entry.name())
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
        else {
            continue;
        };
        files.push((name, read_capped(&mut entry)?));
    }
    Ok(files)
}

/// Extracts every entry of an archive below `destination`.
///
/// All entry paths are checked before any file is written, so a rejected
/// archive leaves the destination untouched. Returns the number of files
/// written.
///
/// # Errors
///
/// Returns [`ArchiveError::Traversal`] when an entry escapes the destination.
pub fn extract(bytes: &[u8], destination: &Path) -> Result<usize, ArchiveError> {
    let mut archive = open(bytes)?;
    for index in 0 .. archive.len() {
        let entry = archive.by_index(index)?;
        if entry.enclosed_name().is_none() {
            return Err(ArchiveError::Traversal(entry.name().to_string()));
        }
    }
    fs::create_dir_all(destination).map_err(|err| ArchiveError::Io(err.to_string()))?;
    let mut written = 0;
    for index in 0 .. archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(ArchiveError::Traversal(entry.name().to_string()));
        };
        let target = destination.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| ArchiveError::Io(err.to_string()))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| ArchiveError::Io(err.to_string()))?;
        }
        let contents = read_capped(&mut entry)?;
        fs::write(&target, contents).map_err(|err| ArchiveError::Io(err.to_string()))?;
        written += 1;
    }
    Ok(written)
}

// ============================================================================
// SECTION: Writing
// ============================================================================

/// Builds a deflate-compressed archive from named entries.
///
/// # Errors
///
/// Returns [`ArchiveError::Invalid`] when an entry cannot be written.
pub fn build(entries: &[(&str, &[u8])]) -> Result<Vec<u8>, ArchiveError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, contents) in entries {
        writer.start_file(*name, options)?;
        writer.write_all(contents).map_err(|err| ArchiveError::Io(err.to_string()))?;
    }
    Ok(writer.finish()?.into_inner())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    #[test]
    fn entries_are_found_by_file_name() {
        let bytes =
            build(&[("forms/f1.json", b"{}".as_slice()), ("other.txt", b"x".as_slice())]).unwrap();
        assert_eq!(read_entry(&bytes, "f1.json").unwrap(), b"{}".as_slice());
        assert!(matches!(read_entry(&bytes, "f2.json"), Err(ArchiveError::Invalid(_))));
    }

    #[test]
    fn file_listing_drops_prefixes_and_keeps_order() {
        let bytes =
            build(&[("bundle/b.json", b"{}".as_slice()), ("a.zip", b"zz".as_slice())]).unwrap();
        let files = read_files(&bytes).unwrap();
        assert_eq!(files, vec![
            ("b.json".to_string(), b"{}".to_vec()),
            ("a.zip".to_string(), b"zz".to_vec()),
        ]);
    }

    #[test]
    fn extraction_rejects_traversal_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let bytes =
            build(&[("ok.txt", b"fine".as_slice()), ("../escape.txt", b"bad".as_slice())])
                .unwrap();
        let err = extract(&bytes, &dir.path().join("res")).unwrap_err();
        assert!(matches!(err, ArchiveError::Traversal(_)));
        assert!(!dir.path().join("res").join("ok.txt").exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn extraction_writes_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let bytes =
            build(&[("cascade/a.sqlite", b"db".as_slice()), ("b.txt", b"b".as_slice())]).unwrap();
        assert_eq!(extract(&bytes, dir.path()).unwrap(), 2);
        let extracted = fs::read(dir.path().join("cascade").join("a.sqlite")).unwrap();
        assert_eq!(extracted, b"db".as_slice());
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(read_entry(b"not a zip", "x"), Err(ArchiveError::Invalid(_))));
    }
}

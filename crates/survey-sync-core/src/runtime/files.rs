// crates/survey-sync-core/src/runtime/files.rs
// ============================================================================
// Module: Survey Sync Local Files
// Description: Directory-backed artifact files and a free-space probe.
// Purpose: Implement the local file seams over plain directories.
// Dependencies: crate::interfaces, crate::runtime::archive, fs2, tempfile
// ============================================================================

//! ## Overview
//! [`DirectoryFiles`] stores submitted-data archives, media files, and
//! extracted resources in three directories. Artifact lookups accept plain
//! filenames only. Data archives are written through a temp file in the same
//! directory and renamed into place so readers never observe partial content.
//! [`FsStorageProbe`] reports free space on the artifact volume via `fs2`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;

use crate::core::ArtifactKind;
use crate::core::ResourceId;
use crate::core::artifact::is_plain_filename;
use crate::interfaces::FileStore;
use crate::interfaces::FileStoreError;
use crate::interfaces::StorageProbe;
use crate::runtime::archive;
use crate::runtime::archive::ArchiveError;

// ============================================================================
// SECTION: Directory Files
// ============================================================================

/// Directory-backed local files.
#[derive(Debug, Clone)]
pub struct DirectoryFiles {
    /// Directory for submitted-data archives.
    data_dir: PathBuf,
    /// Directory for photos and videos.
    media_dir: PathBuf,
    /// Directory for extracted resources.
    resource_dir: PathBuf,
}

impl DirectoryFiles {
    /// Creates the store, creating missing directories.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError::Io`] when a directory cannot be created.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        media_dir: impl Into<PathBuf>,
        resource_dir: impl Into<PathBuf>,
    ) -> Result<Self, FileStoreError> {
        let files = Self {
            data_dir: data_dir.into(),
            media_dir: media_dir.into(),
            resource_dir: resource_dir.into(),
        };
        for dir in [&files.data_dir, &files.media_dir, &files.resource_dir] {
            fs::create_dir_all(dir).map_err(|err| map_io(dir, &err))?;
        }
        Ok(files)
    }

    /// Returns the submitted-data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the media directory.
    #[must_use]
    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Returns the resource directory.
    #[must_use]
    pub fn resource_dir(&self) -> &Path {
        &self.resource_dir
    }

    /// Resolves the path of an artifact, rejecting non-plain filenames.
    fn artifact_path(&self, kind: ArtifactKind, filename: &str) -> Result<PathBuf, FileStoreError> {
        if !is_plain_filename(filename) {
            return Err(FileStoreError::Invalid(format!("not a plain filename: {filename}")));
        }
        let dir = if kind.is_media() { &self.media_dir } else { &self.data_dir };
        Ok(dir.join(filename))
    }
}

impl FileStore for DirectoryFiles {
    fn read_artifact(&self, kind: ArtifactKind, filename: &str) -> Result<Vec<u8>, FileStoreError> {
        let path = self.artifact_path(kind, filename)?;
        fs::read(&path).map_err(|err| map_io(&path, &err))
    }

    fn artifact_exists(&self, kind: ArtifactKind, filename: &str) -> Result<bool, FileStoreError> {
        let path = self.artifact_path(kind, filename)?;
        path.try_exists().map_err(|err| map_io(&path, &err))
    }

    fn write_data_archive(&self, filename: &str, bytes: &[u8]) -> Result<(), FileStoreError> {
        let path = self.artifact_path(ArtifactKind::DataArchive, filename)?;
        let mut temp =
            NamedTempFile::new_in(&self.data_dir).map_err(|err| map_io(&self.data_dir, &err))?;
        temp.write_all(bytes).map_err(|err| map_io(&path, &err))?;
        temp.as_file().sync_all().map_err(|err| map_io(&path, &err))?;
        temp.persist(&path).map_err(|err| map_io(&path, &err.error))?;
        Ok(())
    }

    fn install_resource(
        &self,
        resource: &ResourceId,
        archive_bytes: &[u8],
    ) -> Result<(), FileStoreError> {
        archive::extract(archive_bytes, &self.resource_dir).map(|_| ()).map_err(|err| match err {
            ArchiveError::Io(message) => FileStoreError::Io(format!("{resource}: {message}")),
            other => FileStoreError::Invalid(format!("{resource}: {other}")),
        })
    }
}

/// Maps an I/O error to a file store error.
fn map_io(path: &Path, err: &io::Error) -> FileStoreError {
    let message = format!("{}: {err}", path.display());
    match err.kind() {
        io::ErrorKind::NotFound => FileStoreError::NotFound(message),
        io::ErrorKind::StorageFull => FileStoreError::StorageFull(message),
        _ => FileStoreError::Io(message),
    }
}

// ============================================================================
// SECTION: Storage Probe
// ============================================================================

/// Free-space probe for the volume holding a directory.
#[derive(Debug, Clone)]
pub struct FsStorageProbe {
    /// Directory on the probed volume.
    path: PathBuf,
}

impl FsStorageProbe {
    /// Creates a probe for the volume holding `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }
}

impl StorageProbe for FsStorageProbe {
    fn available_bytes(&self) -> Result<u64, FileStoreError> {
        fs2::available_space(&self.path).map_err(|err| map_io(&self.path, &err))
    }
}

/// Probe reporting a fixed amount of free space.
#[derive(Debug, Clone, Copy)]
pub struct FixedStorageProbe(pub u64);

impl StorageProbe for FixedStorageProbe {
    fn available_bytes(&self) -> Result<u64, FileStoreError> {
        Ok(self.0)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

// crates/survey-sync-core/src/core/artifact.rs
// ============================================================================
// Module: Survey Sync Artifacts
// Description: Extension-based classification of transmitted files.
// Purpose: Derive destination keys, visibility, and notify actions deterministically.
// Dependencies: crate::core::hashing, serde
// ============================================================================

//! ## Overview
//! Every transmission references an artifact by filename. The extension alone
//! decides where the artifact is stored, whether it is publicly readable, and
//! which "file available" action announces it. Unknown extensions have no
//! classification and are skipped by the pipeline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::HashDigest;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Remote directory for submitted data archives.
pub const DATA_ARCHIVE_DIR: &str = "devicezip";
/// Remote directory for photos and videos.
pub const MEDIA_DIR: &str = "images";

// ============================================================================
// SECTION: Notify Actions
// ============================================================================

/// Action kind sent with the "file available" notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyAction {
    /// A submitted-data archive is ready for processing.
    Submit,
    /// A media file is available.
    Image,
}

impl NotifyAction {
    /// Returns the wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Image => "image",
        }
    }
}

// ============================================================================
// SECTION: Artifact Kinds
// ============================================================================

/// Classification of an artifact by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Zipped submission data.
    DataArchive,
    /// JPEG photo.
    Jpeg,
    /// PNG photo.
    Png,
    /// MP4 video.
    Video,
}

impl ArtifactKind {
    /// Classifies a filename by extension (case-insensitive).
    #[must_use]
    pub fn classify(filename: &str) -> Option<Self> {
        let (_, extension) = filename.rsplit_once('.')?;
        let kind = match extension.to_ascii_lowercase().as_str() {
            "zip" => Self::DataArchive,
            "jpg" | "jpeg" => Self::Jpeg,
            "png" => Self::Png,
            "mp4" => Self::Video,
            _ => return None,
        };
        Some(kind)
    }

    /// Returns true for artifacts readable without credentials.
    #[must_use]
    pub const fn is_public(self) -> bool {
        !matches!(self, Self::DataArchive)
    }

    /// Returns the remote directory for this kind.
    #[must_use]
    pub const fn directory(self) -> &'static str {
        match self {
            Self::DataArchive => DATA_ARCHIVE_DIR,
            Self::Jpeg | Self::Png | Self::Video => MEDIA_DIR,
        }
    }

    /// Returns the notify action announcing this kind.
    #[must_use]
    pub const fn action(self) -> NotifyAction {
        match self {
            Self::DataArchive => NotifyAction::Submit,
            Self::Jpeg | Self::Png | Self::Video => NotifyAction::Image,
        }
    }

    /// Returns the MIME content type.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::DataArchive => "application/zip",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Video => "video/mp4",
        }
    }

    /// Returns true for media files stored in the media directory.
    #[must_use]
    pub const fn is_media(self) -> bool {
        !matches!(self, Self::DataArchive)
    }
}

/// Returns true when `filename` is a single, non-traversing path segment.
#[must_use]
pub fn is_plain_filename(filename: &str) -> bool {
    !filename.is_empty()
        && filename != "."
        && filename != ".."
        && !filename.contains(['/', '\\', '\0'])
}

/// Returns the remote destination key for a classified artifact.
#[must_use]
pub fn destination_key(kind: ArtifactKind, filename: &str) -> String {
    format!("{}/{filename}", kind.directory())
}

// ============================================================================
// SECTION: Resolved Artifacts
// ============================================================================

/// Artifact ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    /// Local filename.
    pub filename: String,
    /// Extension classification.
    pub kind: ArtifactKind,
    /// Raw content.
    pub bytes: Vec<u8>,
    /// Content checksum.
    pub checksum: HashDigest,
    /// Remote destination key.
    pub destination_key: String,
}

impl ResolvedArtifact {
    /// Builds a resolved artifact from its content.
    #[must_use]
    pub fn new(filename: &str, kind: ArtifactKind, bytes: Vec<u8>) -> Self {
        let checksum = HashDigest::of(&bytes);
        Self {
            filename: filename.to_string(),
            kind,
            destination_key: destination_key(kind, filename),
            bytes,
            checksum,
        }
    }

    /// Returns the MIME content type.
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        self.kind.content_type()
    }

    /// Returns true when the artifact is publicly readable.
    #[must_use]
    pub const fn is_public(&self) -> bool {
        self.kind.is_public()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archives_are_private_submissions() {
        let kind = ArtifactKind::classify("abc-123.zip");
        assert_eq!(kind, Some(ArtifactKind::DataArchive));
        let kind = ArtifactKind::DataArchive;
        assert!(!kind.is_public());
        assert_eq!(kind.action(), NotifyAction::Submit);
        assert_eq!(destination_key(kind, "abc-123.zip"), "devicezip/abc-123.zip");
    }

    #[test]
    fn media_is_public_and_announced_as_image() {
        for name in ["photo.JPG", "photo.png", "clip.mp4"] {
            let kind = ArtifactKind::classify(name).unwrap_or(ArtifactKind::DataArchive);
            assert!(kind.is_public(), "{name}");
            assert_eq!(kind.action(), NotifyAction::Image);
            assert_eq!(kind.directory(), MEDIA_DIR);
        }
    }

    #[test]
    fn unknown_extensions_are_unclassified() {
        assert_eq!(ArtifactKind::classify("notes.txt"), None);
        assert_eq!(ArtifactKind::classify("no-extension"), None);
    }

    #[test]
    fn plain_filenames_reject_traversal() {
        assert!(is_plain_filename("a.zip"));
        assert!(!is_plain_filename("../a.zip"));
        assert!(!is_plain_filename("dir/a.zip"));
        assert!(!is_plain_filename(""));
    }
}

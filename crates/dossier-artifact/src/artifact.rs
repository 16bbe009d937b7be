//! Dossier artifacts
//!
//! An [`Artifact`] is one file produced for a plan: its relative
//! [`ArtifactPath`], an [`ArtifactKind`] and the exact bytes written.
//! Artifacts are immutable once built; regeneration produces a new set.

use crate::hash::{ContentHash, HashAlgorithm};
use crate::path::ArtifactPath;
use std::fmt::{self, Display, Formatter};

/// Kind of artifact within a dossier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Human-readable dossier document
    Markdown,
    /// Machine-readable plan manifest
    JsonManifest,
    /// Rendered chart (SVG)
    Chart,
    /// Geographic data or map
    Geo,
    /// Timeline events
    Timeline,
    /// Anything else
    Other,
}

impl ArtifactKind {
    /// Stable identifier used in manifests
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::JsonManifest => "json-manifest",
            Self::Chart => "chart",
            Self::Geo => "geo",
            Self::Timeline => "timeline",
            Self::Other => "other",
        }
    }
}

impl Display for ArtifactKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A produced file and its bytes
///
/// # Invariants
/// - `size()` always equals `content().len()`
/// - Never mutated after construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    path: ArtifactPath,
    kind: ArtifactKind,
    content: Vec<u8>,
}

impl Artifact {
    /// Create new artifact
    #[must_use]
    pub fn new(path: ArtifactPath, kind: ArtifactKind, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path,
            kind,
            content: content.into(),
        }
    }

    /// Path relative to the plan directory
    #[inline]
    #[must_use]
    pub fn path(&self) -> &ArtifactPath {
        &self.path
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Byte size of the content
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    /// Digest of the content under `algorithm`
    #[must_use]
    pub fn hash(&self, algorithm: HashAlgorithm) -> ContentHash {
        ContentHash::compute(algorithm, &self.content)
    }

    /// Lightweight reference without content
    #[must_use]
    pub fn to_ref(&self) -> ArtifactRef {
        ArtifactRef {
            path: self.path.clone(),
            kind: self.kind,
            size: self.size(),
        }
    }
}

/// Reference to a written artifact (no content)
///
/// This is what the generator reports back and what signing consumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ArtifactRef {
    pub path: ArtifactPath,
    pub kind: ArtifactKind,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_and_hash_track_content() {
        let artifact = Artifact::new(
            ArtifactPath::file("plan.md").unwrap(),
            ArtifactKind::Markdown,
            "# Dossier\n",
        );
        assert_eq!(artifact.size(), 10);
        assert_eq!(
            artifact.hash(HashAlgorithm::Sha256),
            ContentHash::compute(HashAlgorithm::Sha256, b"# Dossier\n")
        );
    }

    #[test]
    fn to_ref_drops_content() {
        let artifact = Artifact::new(
            "assets/plan_geo.json".parse().unwrap(),
            ArtifactKind::Geo,
            b"{}".to_vec(),
        );
        let reference = artifact.to_ref();
        assert_eq!(reference.path.to_string(), "assets/plan_geo.json");
        assert_eq!(reference.kind, ArtifactKind::Geo);
        assert_eq!(reference.size, 2);
    }

    #[test]
    fn kind_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ArtifactKind::JsonManifest).unwrap(),
            "\"json-manifest\""
        );
        let kind: ArtifactKind = serde_json::from_str("\"timeline\"").unwrap();
        assert_eq!(kind, ArtifactKind::Timeline);
        assert_eq!(ArtifactKind::JsonManifest.to_string(), "json-manifest");
    }
}

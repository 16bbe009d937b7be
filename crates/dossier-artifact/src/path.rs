//! Relative artifact paths
//!
//! Provides [`ArtifactPath`] for addressing files inside a plan-scoped
//! artifact directory. Paths are always relative, `/`-separated and free of
//! `.`/`..` segments, so joining one onto a plan directory can never escape it.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Path of an artifact relative to its plan directory
///
/// # Examples
/// - `dossier-us-ca-01h.md`
/// - `assets/dossier-us-ca-01h_geo.json`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactPath(Vec<String>);

impl ArtifactPath {
    /// Single-segment path (a file directly in the plan directory)
    ///
    /// # Errors
    /// Returns error if the segment is empty or contains a separator
    pub fn file(name: impl Into<String>) -> Result<Self, PathError> {
        let name = name.into();
        validate_segment(&name)?;
        Ok(Self(vec![name]))
    }

    /// Append a segment, returning new path
    ///
    /// # Errors
    /// Returns error if the segment is invalid
    pub fn child(&self, segment: impl Into<String>) -> Result<Self, PathError> {
        let segment = segment.into();
        validate_segment(&segment)?;
        let mut new = self.clone();
        new.0.push(segment);
        Ok(new)
    }

    /// Get path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Final segment (the file name)
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.last().map_or("", String::as_str)
    }

    /// Resolve against a base directory
    #[must_use]
    pub fn to_fs_path(&self, base: &Path) -> PathBuf {
        let mut out = base.to_path_buf();
        for seg in &self.0 {
            out.push(seg);
        }
        out
    }

    /// Build from a filesystem path relative to `base`
    ///
    /// # Errors
    /// Returns error if `full` is not under `base` or contains
    /// non-UTF-8 or parent components
    pub fn from_fs_path(base: &Path, full: &Path) -> Result<Self, PathError> {
        let relative = full
            .strip_prefix(base)
            .map_err(|_| PathError::OutsideBase(full.display().to_string()))?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(os) => {
                    let seg = os
                        .to_str()
                        .ok_or_else(|| PathError::NonUtf8(full.display().to_string()))?;
                    validate_segment(seg)?;
                    segments.push(seg.to_string());
                }
                _ => return Err(PathError::InvalidSegment(relative.display().to_string())),
            }
        }
        if segments.is_empty() {
            return Err(PathError::EmptyPath);
        }
        Ok(Self(segments))
    }
}

fn validate_segment(seg: &str) -> Result<(), PathError> {
    if seg.is_empty() {
        return Err(PathError::EmptySegment);
    }
    if seg == "." || seg == ".." || seg.contains(['/', '\\', '\0']) {
        return Err(PathError::InvalidSegment(seg.to_string()));
    }
    Ok(())
}

impl Display for ArtifactPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl FromStr for ArtifactPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PathError::EmptyPath);
        }
        if s.starts_with('/') {
            return Err(PathError::Absolute(s.to_string()));
        }
        let segments: Vec<String> = s
            .split('/')
            .map(|seg| validate_segment(seg).map(|()| seg.to_string()))
            .collect::<Result<_, _>>()?;
        Ok(Self(segments))
    }
}

impl serde::Serialize for ArtifactPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ArtifactPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors related to artifact paths
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// Empty path
    #[error("artifact path is empty")]
    EmptyPath,

    /// Empty segment in path
    #[error("artifact path contains empty segment")]
    EmptySegment,

    /// Segment is `.`, `..` or contains a separator
    #[error("invalid artifact path segment: {0}")]
    InvalidSegment(String),

    /// Absolute paths are not allowed
    #[error("artifact path must be relative: {0}")]
    Absolute(String),

    /// Path does not live under the plan directory
    #[error("path is outside the artifact directory: {0}")]
    OutsideBase(String),

    /// Path is not valid UTF-8
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_and_display() {
        let path: ArtifactPath = "assets/plan_geo.json".parse().unwrap();
        assert_eq!(path.segments(), &["assets", "plan_geo.json"]);
        assert_eq!(path.file_name(), "plan_geo.json");
        assert_eq!(path.to_string(), "assets/plan_geo.json");
    }

    #[test]
    fn rejects_traversal_and_absolute() {
        assert!(matches!("../x".parse::<ArtifactPath>(), Err(PathError::InvalidSegment(_))));
        assert!(matches!("a/./b".parse::<ArtifactPath>(), Err(PathError::InvalidSegment(_))));
        assert!(matches!("/etc/passwd".parse::<ArtifactPath>(), Err(PathError::Absolute(_))));
        assert!(matches!("a//b".parse::<ArtifactPath>(), Err(PathError::EmptySegment)));
        assert!(matches!("".parse::<ArtifactPath>(), Err(PathError::EmptyPath)));
    }

    #[test]
    fn child_builds_nested_path() {
        let path = ArtifactPath::file("assets").unwrap().child("chart.svg").unwrap();
        assert_eq!(path.to_string(), "assets/chart.svg");
        assert!(ArtifactPath::file("a/b").is_err());
    }

    #[test]
    fn fs_round_trip() {
        let base = Path::new("/data/dossiers/plan-1");
        let path: ArtifactPath = "assets/map.svg".parse().unwrap();
        let full = path.to_fs_path(base);
        assert_eq!(full, PathBuf::from("/data/dossiers/plan-1/assets/map.svg"));
        assert_eq!(ArtifactPath::from_fs_path(base, &full).unwrap(), path);
    }

    #[test]
    fn from_fs_path_rejects_outside_base() {
        let result = ArtifactPath::from_fs_path(Path::new("/a"), Path::new("/b/file"));
        assert!(matches!(result, Err(PathError::OutsideBase(_))));
    }

    #[test]
    fn serde_as_string() {
        let path: ArtifactPath = "x/y.md".parse().unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"x/y.md\"");
        let back: ArtifactPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<ArtifactPath>("\"../escape\"").is_err());
    }

    proptest! {
        #[test]
        fn resolved_paths_stay_under_base(segs in proptest::collection::vec("[A-Za-z0-9_.-]{1,12}", 1..4)) {
            let raw = segs.join("/");
            if let Ok(path) = raw.parse::<ArtifactPath>() {
                let base = Path::new("/base");
                prop_assert!(path.to_fs_path(base).starts_with(base));
                prop_assert_eq!(path.to_string(), raw);
            }
        }
    }
}

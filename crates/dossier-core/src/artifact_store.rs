//! Plan directory layout on disk
//!
//! ```text
//! <root>/
//!   <planId>/                     visible artifact set
//!   .staging/<planId>-<ulid>/     set being written
//!   .archive/<planId>/<ulid>/     superseded sets
//! ```
//!
//! A set becomes visible only through [`StagedSet::commit`]. Dropping an
//! uncommitted [`StagedSet`] removes its staging directory, so a failed or
//! cancelled generation never leaves partial output behind.

use crate::error::StorageError;
use crate::types::PlanId;
use dossier_artifact::{Artifact, ArtifactPath};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use ulid::Ulid;

const STAGING_DIR: &str = ".staging";
const ARCHIVE_DIR: &str = ".archive";

/// Root of all plan directories
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    archive_previous: bool,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, archive_previous: bool) -> Self {
        Self {
            root: root.into(),
            archive_previous,
        }
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Visible directory of a plan
    #[must_use]
    pub fn plan_dir(&self, plan_id: &PlanId) -> PathBuf {
        self.root.join(plan_id.as_str())
    }

    /// Directory holding archived sets of a plan
    #[must_use]
    pub fn archive_dir(&self, plan_id: &PlanId) -> PathBuf {
        self.root.join(ARCHIVE_DIR).join(plan_id.as_str())
    }

    /// Artifact path relative to the root (`<planId>/<path>`)
    ///
    /// # Errors
    /// Returns error if the plan id is not a valid path segment
    pub fn root_relative(
        &self,
        plan_id: &PlanId,
        path: &ArtifactPath,
    ) -> Result<ArtifactPath, StorageError> {
        let mut out = ArtifactPath::file(plan_id.as_str())?;
        for segment in path.segments() {
            out = out.child(segment.clone())?;
        }
        Ok(out)
    }

    /// Write `artifacts` into a fresh staging directory
    ///
    /// # Errors
    /// Returns error on any filesystem failure; the staging directory is
    /// removed when the returned error drops the partial set
    pub async fn stage(
        &self,
        plan_id: &PlanId,
        artifacts: &[Artifact],
    ) -> Result<StagedSet, StorageError> {
        let dir = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}-{}", plan_id, Ulid::new().to_string().to_ascii_lowercase()));
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        let staged = StagedSet {
            dir,
            target: self.plan_dir(plan_id),
            archive: self.archive_previous.then(|| self.archive_dir(plan_id)),
            committed: false,
        };
        for artifact in artifacts {
            let path = artifact.path().to_fs_path(&staged.dir);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::io(parent, e))?;
            }
            fs::write(&path, artifact.content())
                .await
                .map_err(|e| StorageError::io(&path, e))?;
        }
        debug!(plan_id = %plan_id, dir = %staged.dir.display(), files = artifacts.len(), "artifact set staged");
        Ok(staged)
    }
}

/// A complete artifact set waiting to replace the visible one
#[derive(Debug)]
pub struct StagedSet {
    dir: PathBuf,
    target: PathBuf,
    archive: Option<PathBuf>,
    committed: bool,
}

impl StagedSet {
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Archive (or remove) the current set and move this one into place
    ///
    /// # Errors
    /// Returns error if a rename or removal fails
    pub async fn commit(mut self) -> Result<PathBuf, StorageError> {
        if fs::try_exists(&self.target)
            .await
            .map_err(|e| StorageError::io(&self.target, e))?
        {
            match &self.archive {
                Some(archive_root) => {
                    fs::create_dir_all(archive_root)
                        .await
                        .map_err(|e| StorageError::io(archive_root, e))?;
                    let archived =
                        archive_root.join(Ulid::new().to_string().to_ascii_lowercase());
                    fs::rename(&self.target, &archived)
                        .await
                        .map_err(|e| StorageError::io(&self.target, e))?;
                    info!(archived = %archived.display(), "previous artifact set archived");
                }
                None => fs::remove_dir_all(&self.target)
                    .await
                    .map_err(|e| StorageError::io(&self.target, e))?,
            }
        }
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        fs::rename(&self.dir, &self.target)
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for StagedSet {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(dir = %self.dir.display(), error = %e, "failed to discard staging directory");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_artifact::ArtifactKind;

    fn artifact(path: &str, body: &str) -> Artifact {
        Artifact::new(path.parse().unwrap(), ArtifactKind::Other, body.as_bytes())
    }

    #[tokio::test]
    async fn commit_makes_set_visible_and_archives_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), true);
        let plan_id = PlanId::parse("dossier-gb-1").unwrap();

        let first = store
            .stage(&plan_id, &[artifact("a.md", "one"), artifact("assets/x.svg", "<svg/>")])
            .await
            .unwrap();
        let visible = first.commit().await.unwrap();
        assert_eq!(visible, store.plan_dir(&plan_id));
        assert_eq!(std::fs::read_to_string(visible.join("assets/x.svg")).unwrap(), "<svg/>");

        let second = store.stage(&plan_id, &[artifact("a.md", "two")]).await.unwrap();
        second.commit().await.unwrap();
        assert_eq!(std::fs::read_to_string(visible.join("a.md")).unwrap(), "two");
        assert!(!visible.join("assets").exists());

        let archived: Vec<_> = std::fs::read_dir(store.archive_dir(&plan_id))
            .unwrap()
            .collect();
        assert_eq!(archived.len(), 1);
        let old = archived[0].as_ref().unwrap().path();
        assert_eq!(std::fs::read_to_string(old.join("a.md")).unwrap(), "one");
    }

    #[tokio::test]
    async fn dropped_set_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), false);
        let plan_id = PlanId::parse("dossier-jp-1").unwrap();
        let staged = store.stage(&plan_id, &[artifact("a.md", "x")]).await.unwrap();
        let staging = staged.dir().to_path_buf();
        assert!(staging.exists());
        drop(staged);
        assert!(!staging.exists());
        assert!(!store.plan_dir(&plan_id).exists());
    }

    #[test]
    fn root_relative_prefixes_plan_dir() {
        let store = ArtifactStore::new("/data", true);
        let plan_id = PlanId::parse("dossier-nz-1").unwrap();
        let path = store
            .root_relative(&plan_id, &"assets/m.svg".parse().unwrap())
            .unwrap();
        assert_eq!(path.to_string(), "dossier-nz-1/assets/m.svg");
    }
}

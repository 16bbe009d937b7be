//! Signature manifests
//!
//! [`SignatureService::sign`] hashes every artifact a generation reported and
//! writes `<planId>.signatures.json` next to them. [`SignatureService::verify`]
//! re-hashes the files listed there and reports per-artifact status plus any
//! files that appeared on disk without being signed.
//!
//! Files are streamed through the hasher in fixed-size chunks. Verification
//! only reads, so any number of verifications may run concurrently.

use crate::clock::Clock;
use crate::config::GeneratorConfig;
use crate::error::{DossierError, Result, StorageError};
use crate::types::{PlanId, Timestamp};
use dossier_artifact::{
    ArtifactKind, ArtifactPath, ArtifactRef, ContentHash, ContentHasher, HashAlgorithm, PathError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Version tag written into every signature manifest
pub const SIGNATURE_SCHEMA_VERSION: &str = "dossier_signatures.v1";

/// `<planId>.signatures.json`
///
/// # Errors
/// Returns error if the plan id is not a valid file name
pub fn manifest_file(plan_id: &PlanId) -> Result<ArtifactPath, PathError> {
    ArtifactPath::file(format!("{plan_id}.signatures.json"))
}

/// One signed artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub path: ArtifactPath,
    pub kind: ArtifactKind,
    pub hash: ContentHash,
    pub size: u64,
}

/// Persisted record of what was signed, in reported order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureManifest {
    pub schema_version: String,
    pub plan_id: PlanId,
    pub algorithm: HashAlgorithm,
    pub generated_at: Timestamp,
    pub artifacts: Vec<SignatureEntry>,
}

impl SignatureManifest {
    /// Paths covered by this manifest
    #[must_use]
    pub fn paths(&self) -> BTreeSet<&ArtifactPath> {
        self.artifacts.iter().map(|e| &e.path).collect()
    }
}

/// Outcome of checking one signed artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Verified,
    Mismatch,
    Missing,
}

/// Per-artifact verification record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactVerification {
    pub path: ArtifactPath,
    pub kind: ArtifactKind,
    pub expected_hash: ContentHash,
    /// `None` when the file is missing
    pub actual_hash: Option<ContentHash>,
    pub expected_size: u64,
    pub actual_size: Option<u64>,
    pub status: ArtifactStatus,
}

/// Aggregate verification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Every artifact verified and nothing unexpected on disk
    Verified,
    Attention,
}

/// Result of re-checking a plan directory against its signature manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub plan_id: PlanId,
    pub algorithm: HashAlgorithm,
    pub checked_at: Timestamp,
    pub artifacts: Vec<ArtifactVerification>,
    /// Files in the plan directory that the manifest does not cover
    pub anomalies: Vec<String>,
    pub status: ReportStatus,
}

impl VerificationReport {
    #[inline]
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.status == ReportStatus::Verified
    }

    /// Artifacts that did not verify
    pub fn failures(&self) -> impl Iterator<Item = &ArtifactVerification> {
        self.artifacts
            .iter()
            .filter(|a| a.status != ArtifactStatus::Verified)
    }

    /// Number of artifacts with `status`
    #[must_use]
    pub fn count(&self, status: ArtifactStatus) -> usize {
        self.artifacts.iter().filter(|a| a.status == status).count()
    }
}

/// Signs and verifies plan directories under one artifact root
#[derive(Debug, Clone)]
pub struct SignatureService {
    root: PathBuf,
    algorithm: HashAlgorithm,
    chunk_bytes: usize,
    clock: Arc<dyn Clock>,
}

impl SignatureService {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, algorithm: HashAlgorithm, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            algorithm,
            chunk_bytes: 1024 * 1024,
            clock,
        }
    }

    /// Service sharing the generator's root, algorithm and chunk size
    #[must_use]
    pub fn from_config(config: &GeneratorConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.artifact_root.clone(), config.hash_algorithm, clock)
            .with_chunk_bytes(config.hash_chunk_bytes)
    }

    /// With streaming read size (minimum 1 byte)
    #[must_use]
    pub fn with_chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = bytes.max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn plan_dir(&self, plan_id: &PlanId) -> PathBuf {
        self.root.join(plan_id.as_str())
    }

    /// Hash every reported artifact and persist the manifest beside them.
    ///
    /// Artifact paths are relative to the plan directory. Returns the
    /// manifest and its path relative to the plan directory.
    ///
    /// # Errors
    /// - [`DossierError::MissingArtifact`] if a reported file is absent
    /// - [`StorageError::SizeMismatch`] if a reported size is wrong
    /// - [`StorageError`] on any other IO failure
    pub async fn sign(
        &self,
        plan_id: &PlanId,
        artifacts: &[ArtifactRef],
    ) -> Result<(SignatureManifest, ArtifactPath)> {
        let plan_dir = self.plan_dir(plan_id);
        let mut entries = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let path = artifact.path.to_fs_path(&plan_dir);
            let Some((hash, size)) =
                hash_file(&path, self.algorithm, self.chunk_bytes).await?
            else {
                return Err(DossierError::MissingArtifact {
                    plan_id: plan_id.clone(),
                    path: artifact.path.clone(),
                });
            };
            if size != artifact.size {
                return Err(StorageError::SizeMismatch {
                    path: artifact.path.clone(),
                    reported: artifact.size,
                    actual: size,
                }
                .into());
            }
            entries.push(SignatureEntry {
                path: artifact.path.clone(),
                kind: artifact.kind,
                hash,
                size,
            });
        }

        let manifest = SignatureManifest {
            schema_version: SIGNATURE_SCHEMA_VERSION.to_string(),
            plan_id: plan_id.clone(),
            algorithm: self.algorithm,
            generated_at: self.clock.now(),
            artifacts: entries,
        };
        let file = manifest_file(plan_id).map_err(StorageError::from)?;
        let mut bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        bytes.push(b'\n');
        write_atomic(&file.to_fs_path(&plan_dir), &bytes).await?;

        info!(
            plan_id = %plan_id,
            algorithm = %self.algorithm,
            artifacts = manifest.artifacts.len(),
            "signature manifest written"
        );
        Ok((manifest, file))
    }

    /// Verify the plan's manifest at its conventional location
    ///
    /// # Errors
    /// See [`verify_manifest`](Self::verify_manifest)
    pub async fn verify(&self, plan_id: &PlanId) -> Result<VerificationReport> {
        let file = manifest_file(plan_id).map_err(StorageError::from)?;
        let relative = ArtifactPath::file(plan_id.as_str())
            .and_then(|p| p.child(file.file_name()))
            .map_err(StorageError::from)?;
        self.verify_manifest(plan_id, &relative).await
    }

    /// Verify against the manifest at `manifest_path` (relative to the root).
    ///
    /// Artifact paths in the manifest resolve against the manifest's
    /// directory. Never writes.
    ///
    /// # Errors
    /// - [`DossierError::NotFound`] if the manifest file does not exist
    /// - [`StorageError::Corrupt`] if it cannot be parsed or names another plan
    pub async fn verify_manifest(
        &self,
        plan_id: &PlanId,
        manifest_path: &ArtifactPath,
    ) -> Result<VerificationReport> {
        let manifest_fs = manifest_path.to_fs_path(&self.root);
        let raw = match fs::read(&manifest_fs).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DossierError::NotFound(format!(
                    "signature manifest {manifest_path} for plan {plan_id}"
                )))
            }
            Err(e) => return Err(StorageError::io(&manifest_fs, e).into()),
        };
        let manifest: SignatureManifest = serde_json::from_slice(&raw).map_err(|e| {
            StorageError::Corrupt(format!("signature manifest {manifest_path}: {e}"))
        })?;
        if &manifest.plan_id != plan_id {
            return Err(StorageError::Corrupt(format!(
                "signature manifest {manifest_path} belongs to plan {}",
                manifest.plan_id
            ))
            .into());
        }

        let dir = manifest_fs
            .parent()
            .map_or_else(|| self.root.clone(), Path::to_path_buf);
        let mut artifacts = Vec::with_capacity(manifest.artifacts.len());
        for entry in &manifest.artifacts {
            let fs_path = entry.path.to_fs_path(&dir);
            let actual = hash_file(&fs_path, manifest.algorithm, self.chunk_bytes).await?;
            let status = match actual {
                None => ArtifactStatus::Missing,
                Some((hash, _)) if hash == entry.hash => ArtifactStatus::Verified,
                Some(_) => ArtifactStatus::Mismatch,
            };
            if status != ArtifactStatus::Verified {
                warn!(plan_id = %plan_id, path = %entry.path, status = ?status, "artifact failed verification");
            }
            artifacts.push(ArtifactVerification {
                path: entry.path.clone(),
                kind: entry.kind,
                expected_hash: entry.hash,
                actual_hash: actual.map(|(h, _)| h),
                expected_size: entry.size,
                actual_size: actual.map(|(_, s)| s),
                status,
            });
        }

        let mut known: BTreeSet<String> =
            manifest.paths().into_iter().map(ToString::to_string).collect();
        known.insert(manifest_path.file_name().to_string());
        let anomalies: Vec<String> = list_files(&dir)
            .await?
            .into_iter()
            .filter(|p| !known.contains(p))
            .collect();
        for anomaly in &anomalies {
            warn!(plan_id = %plan_id, path = %anomaly, "unsigned file in plan directory");
        }

        let status = if anomalies.is_empty()
            && artifacts.iter().all(|a| a.status == ArtifactStatus::Verified)
        {
            ReportStatus::Verified
        } else {
            ReportStatus::Attention
        };
        debug!(plan_id = %plan_id, status = ?status, "verification finished");

        Ok(VerificationReport {
            plan_id: plan_id.clone(),
            algorithm: manifest.algorithm,
            checked_at: self.clock.now(),
            artifacts,
            anomalies,
            status,
        })
    }
}

/// Stream `path` through the hasher; `None` if the file does not exist
async fn hash_file(
    path: &Path,
    algorithm: HashAlgorithm,
    chunk_bytes: usize,
) -> Result<Option<(ContentHash, u64)>, StorageError> {
    let mut file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    let mut hasher = ContentHasher::new(algorithm);
    let mut buf = vec![0u8; chunk_bytes];
    let mut size = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok(Some((hasher.finalize(), size)))
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}.tmp",
        Ulid::new().to_string().to_ascii_lowercase()
    ));
    fs::write(&tmp, bytes)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

/// Every regular file under `dir`, as sorted `/`-separated relative paths
async fn list_files(dir: &Path) -> Result<Vec<String>, StorageError> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = match fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(StorageError::io(&current, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&current, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StorageError::io(&path, e))?;
            if file_type.is_dir() {
                stack.push(path);
            } else {
                let relative = path.strip_prefix(dir).unwrap_or(&path);
                let display: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(display.join("/"));
            }
        }
    }
    out.sort();
    Ok(out)
}

//! Integrity checks for completed plans

use crate::error::{DossierError, Result};
use crate::signatures::{SignatureService, VerificationReport};
use crate::store::PlanStore;
use crate::types::PlanId;
use std::sync::Arc;
use tracing::info;

/// Resolves a plan to its signature manifest and verifies it
#[derive(Debug, Clone)]
pub struct VerificationService {
    store: Arc<dyn PlanStore>,
    signer: Arc<SignatureService>,
}

impl VerificationService {
    #[must_use]
    pub fn new(store: Arc<dyn PlanStore>, signer: Arc<SignatureService>) -> Self {
        Self { store, signer }
    }

    /// Re-hash the plan's artifacts against its signature manifest
    ///
    /// # Errors
    /// - [`DossierError::NotFound`] if the plan is unknown, was never signed,
    ///   or its manifest file is gone
    /// - [`StorageError`](crate::error::StorageError) if the manifest is corrupt
    pub async fn verify(&self, plan_id: &PlanId) -> Result<VerificationReport> {
        let record = self
            .store
            .get(plan_id)?
            .ok_or_else(|| DossierError::plan_not_found(plan_id))?;
        let manifest = record.outputs.signature_path.ok_or_else(|| {
            DossierError::NotFound(format!(
                "signature manifest for plan {plan_id} (status {})",
                record.status
            ))
        })?;
        let report = self.signer.verify_manifest(plan_id, &manifest).await?;
        info!(
            plan_id = %plan_id,
            status = ?report.status,
            anomalies = report.anomalies.len(),
            "plan verified"
        );
        Ok(report)
    }
}

//! Testing utilities for the dossier workspace
//!
//! Shared case fixtures and a fully wired pipeline over a temporary
//! artifact root.

#![allow(missing_docs)]

use chrono::{Duration, TimeZone, Utc};
use dossier_artifact::HashAlgorithm;
use dossier_core::config::{BundlePolicy, GeneratorConfig, QueueConfig};
use dossier_core::types::Timestamp;
use dossier_core::{
    BundleBuilder, Case, Clock, DossierGenerator, FixedClock, InMemoryCaseSource, InMemoryPlanStore,
    PlanStore, QueueProcessor, SignatureService, SqlitePlanStore, UsdAmount, VerificationService,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Reference "now" used by every fixture
pub fn fixed_now() -> Timestamp {
    Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
}

/// Case reported `days_ago` days before [`fixed_now`]
pub fn case(id: &str, jurisdiction: &str, dollars: u64, days_ago: i64) -> Case {
    Case::new(
        id,
        jurisdiction,
        UsdAmount::from_dollars(dollars),
        fixed_now() - Duration::days(days_ago),
    )
}

/// Three recent US-CA cases of $60k, $120k and $5k
pub fn scenario_cases() -> Vec<Case> {
    vec![
        case("case-60k", "US-CA", 60_000, 3),
        case("case-120k", "US-CA", 120_000, 5),
        case("case-5k", "US-CA", 5_000, 1),
    ]
}

/// Default policy with a $50k threshold and 30-day window
pub fn scenario_policy() -> BundlePolicy {
    BundlePolicy::default()
        .with_min_loss_usd(50_000)
        .with_recency_days(30)
}

/// Every pipeline component wired over one temporary artifact root
pub struct Pipeline {
    pub dir: TempDir,
    pub root: PathBuf,
    pub clock: Arc<FixedClock>,
    pub store: Arc<dyn PlanStore>,
    pub builder: BundleBuilder,
    pub generator: Arc<DossierGenerator>,
    pub signer: Arc<SignatureService>,
    pub processor: Arc<QueueProcessor>,
    pub verifier: VerificationService,
}

impl Pipeline {
    /// Pipeline over an in-process store
    pub fn in_memory(cases: Vec<Case>) -> Self {
        Self::with_store(cases, Arc::new(InMemoryPlanStore::new()), None)
    }

    /// Pipeline over a SQLite store inside the temporary directory
    pub fn sqlite(cases: Vec<Case>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = SqlitePlanStore::open(&dir.path().join("plans.db")).unwrap();
        Self::with_store(cases, Arc::new(store), Some(dir))
    }

    fn with_store(cases: Vec<Case>, store: Arc<dyn PlanStore>, dir: Option<TempDir>) -> Self {
        let dir = dir.unwrap_or_else(|| tempfile::tempdir().unwrap());
        let root = dir.path().join("dossiers");
        let clock = Arc::new(FixedClock::new(fixed_now()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let config = GeneratorConfig::default()
            .with_artifact_root(&root)
            .with_hash_algorithm(HashAlgorithm::Sha256);
        let generator = Arc::new(DossierGenerator::new(
            Arc::new(InMemoryCaseSource::from_cases(cases)),
            config.clone(),
            dyn_clock.clone(),
        ));
        let signer = Arc::new(SignatureService::from_config(&config, dyn_clock.clone()));
        let builder = BundleBuilder::new(store.clone(), scenario_policy(), dyn_clock.clone());
        let processor = Arc::new(QueueProcessor::new(
            store.clone(),
            generator.clone(),
            signer.clone(),
            QueueConfig::default().with_backoff(1, 5),
            dyn_clock,
        ));
        let verifier = VerificationService::new(store.clone(), signer.clone());

        Self {
            dir,
            root,
            clock,
            store,
            builder,
            generator,
            signer,
            processor,
            verifier,
        }
    }
}

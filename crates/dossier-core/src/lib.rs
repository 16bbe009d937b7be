//! Dossier Core - evidence dossier pipeline
//!
//! Selects qualifying cases into jurisdiction-scoped plans, renders each plan
//! into a markdown dossier with a JSON manifest and visual assets, signs the
//! artifact set and later verifies it has not been altered:
//!
//! ```text
//! BundleBuilder ──▶ PlanStore ──▶ QueueProcessor ──▶ DossierGenerator
//!                                      │                    │
//!                                      ▼                    ▼
//!                             SignatureService ◀── artifact set on disk
//!                                      ▲
//!                           VerificationService
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use dossier_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(cases: Vec<Case>) -> dossier_core::Result<()> {
//! let config = DossierConfig::new();
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let store = open_store(&config.store)?;
//!
//! let builder = BundleBuilder::new(store.clone(), config.bundle.clone(), clock.clone());
//! let outcome = builder.build_and_enqueue(&cases)?;
//! println!("enqueued {} plans", outcome.enqueued.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod artifact_store;
pub mod bundle;
pub mod cases;
pub mod clock;
pub mod config;
pub mod error;
pub mod generator;
pub mod queue;
pub mod signatures;
pub mod state_machine;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod verification;

pub use bundle::{BundleBuilder, BundleOutcome, Exclusion, ExclusionReason};
pub use cases::{CaseSource, DossierContext, InMemoryCaseSource, ReviewNote};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{DossierConfig, GroupingRule, StoreConfig};
pub use error::{
    ConfigError, DossierError, RenderError, Result, StorageError, ValidationError,
};
pub use generator::{DossierGenerator, GenerationResult};
pub use queue::{
    ExecutionContext, ExecutionRecord, ExecutionRegistry, ExecutionStatus, PlanOutcome,
    ProcessRequest, QueueProcessor,
};
pub use signatures::{
    ArtifactStatus, ReportStatus, SignatureManifest, SignatureService, VerificationReport,
};
pub use store::{open_store, InMemoryPlanStore, PlanStore, SqlitePlanStore};
pub use types::{
    Case, CaseId, DossierPlan, ExecutionId, Indicator, IndicatorKind, Jurisdiction,
    JurisdictionFocus, PlanId, PlanQuery, PlanRecord, PlanStatus, UsdAmount,
};
pub use verification::VerificationService;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the dossier pipeline
    pub use crate::{
        open_store, BundleBuilder, Case, Clock, DossierConfig, DossierGenerator, DossierPlan,
        ExecutionContext, PlanId, PlanStatus, PlanStore, ProcessRequest, QueueProcessor,
        SignatureService, SystemClock, VerificationService,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

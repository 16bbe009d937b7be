//! Plan store: the shared, multi-writer queue of dossier plans
//!
//! Every status change goes through [`PlanStore::transition`], which applies
//! a [`Transition`] atomically. Claims are compare-and-swap on `pending`;
//! the loser observes [`DossierError::ConcurrencyConflict`].

mod memory;
mod sqlite;

pub use memory::InMemoryPlanStore;
pub use sqlite::SqlitePlanStore;

use crate::config::StoreConfig;
use crate::error::{DossierError, Result};
use crate::state_machine::{is_requeueable, validate_transition};
use crate::types::{PlanId, PlanOutputs, PlanQuery, PlanRecord, PlanStatus, Timestamp};
use std::fmt::Debug;
use std::sync::Arc;

/// A status change applied atomically to one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// pending → processing
    Claim,
    /// Count a failed attempt; stays processing
    RecordAttempt { error: String },
    /// processing → completed
    Complete {
        outputs: PlanOutputs,
        warnings: Vec<String>,
    },
    /// processing → failed
    Fail { error: String },
    /// processing → pending (timeout or cancellation)
    Release,
    /// failed | completed → pending (operator)
    Requeue,
}

impl Transition {
    /// Operation name used in logs
    fn label(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::RecordAttempt { .. } => "record_attempt",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Release => "release",
            Self::Requeue => "requeue",
        }
    }
}

/// Apply `transition` to `record` in place.
///
/// Shared by every store so the rules live in one place.
///
/// # Errors
/// - [`DossierError::ConcurrencyConflict`] when a claim finds a non-pending
///   record or an attempt is recorded on a record no longer processing
/// - [`DossierError::IllegalTransition`] for any other disallowed move
pub(crate) fn apply_transition(
    record: &mut PlanRecord,
    transition: Transition,
    now: Timestamp,
) -> Result<()> {
    let plan_id = record.plan_id().clone();
    let from = record.status;
    match transition {
        Transition::Claim => {
            if from != PlanStatus::Pending {
                return Err(DossierError::ConcurrencyConflict {
                    plan_id,
                    expected: PlanStatus::Pending,
                    actual: from,
                });
            }
            record.status = PlanStatus::Processing;
        }
        Transition::RecordAttempt { error } => {
            if from != PlanStatus::Processing {
                return Err(DossierError::ConcurrencyConflict {
                    plan_id,
                    expected: PlanStatus::Processing,
                    actual: from,
                });
            }
            record.attempts = record.attempts.saturating_add(1);
            record.last_error = Some(error);
        }
        Transition::Complete { outputs, warnings } => {
            validate_transition(&plan_id, from, PlanStatus::Completed)?;
            record.status = PlanStatus::Completed;
            record.outputs = outputs;
            record.warnings = warnings;
            record.last_error = None;
        }
        Transition::Fail { error } => {
            validate_transition(&plan_id, from, PlanStatus::Failed)?;
            record.status = PlanStatus::Failed;
            record.last_error = Some(error);
        }
        Transition::Release => {
            if from != PlanStatus::Processing {
                return Err(DossierError::IllegalTransition {
                    plan_id,
                    from,
                    to: PlanStatus::Pending,
                });
            }
            record.status = PlanStatus::Pending;
        }
        Transition::Requeue => {
            if !is_requeueable(from) {
                return Err(DossierError::IllegalTransition {
                    plan_id,
                    from,
                    to: PlanStatus::Pending,
                });
            }
            validate_transition(&plan_id, from, PlanStatus::Pending)?;
            record.status = PlanStatus::Pending;
            record.attempts = 0;
            record.last_error = None;
        }
    }
    record.updated_at = now;
    Ok(())
}

/// Persistent queue of plan records
///
/// Implementations must make [`transition`](Self::transition) atomic with
/// respect to every other writer of the same store.
pub trait PlanStore: Send + Sync + Debug {
    /// Persist a new pending record
    ///
    /// # Errors
    /// - [`ValidationError::DuplicateBundle`](crate::error::ValidationError::DuplicateBundle)
    ///   if a plan with the same fingerprint exists
    /// - [`ValidationError::Malformed`](crate::error::ValidationError::Malformed)
    ///   if the plan id is taken
    fn insert(&self, record: PlanRecord) -> Result<()>;

    /// Record by id
    ///
    /// # Errors
    /// Returns error on storage failure
    fn get(&self, plan_id: &PlanId) -> Result<Option<PlanRecord>>;

    /// Records matching `query`, most recently updated first
    ///
    /// # Errors
    /// Returns error on storage failure
    fn list(&self, query: &PlanQuery) -> Result<Vec<PlanRecord>>;

    /// Up to `limit` pending records, oldest queued first
    ///
    /// # Errors
    /// Returns error on storage failure
    fn pending(&self, limit: usize) -> Result<Vec<PlanRecord>>;

    /// Apply `transition` atomically and return the updated record
    ///
    /// # Errors
    /// - [`DossierError::NotFound`] if the plan is unknown
    /// - see [`apply_transition`] for status errors
    fn transition(&self, plan_id: &PlanId, transition: Transition, now: Timestamp)
        -> Result<PlanRecord>;

    /// Exclusive pending → processing claim
    ///
    /// # Errors
    /// [`DossierError::ConcurrencyConflict`] if another worker won
    fn claim(&self, plan_id: &PlanId, now: Timestamp) -> Result<PlanRecord> {
        self.transition(plan_id, Transition::Claim, now)
    }

    /// # Errors
    /// Returns error if the plan is not processing
    fn record_attempt_failure(
        &self,
        plan_id: &PlanId,
        error: &str,
        now: Timestamp,
    ) -> Result<PlanRecord> {
        self.transition(
            plan_id,
            Transition::RecordAttempt {
                error: error.to_string(),
            },
            now,
        )
    }

    /// # Errors
    /// Returns error if the plan is not processing
    fn complete(
        &self,
        plan_id: &PlanId,
        outputs: PlanOutputs,
        warnings: Vec<String>,
        now: Timestamp,
    ) -> Result<PlanRecord> {
        self.transition(plan_id, Transition::Complete { outputs, warnings }, now)
    }

    /// # Errors
    /// Returns error if the plan is not processing
    fn fail(&self, plan_id: &PlanId, error: &str, now: Timestamp) -> Result<PlanRecord> {
        self.transition(
            plan_id,
            Transition::Fail {
                error: error.to_string(),
            },
            now,
        )
    }

    /// # Errors
    /// Returns error if the plan is not processing
    fn release(&self, plan_id: &PlanId, now: Timestamp) -> Result<PlanRecord> {
        self.transition(plan_id, Transition::Release, now)
    }

    /// # Errors
    /// Returns error unless the plan is failed or completed
    fn requeue(&self, plan_id: &PlanId, now: Timestamp) -> Result<PlanRecord> {
        self.transition(plan_id, Transition::Requeue, now)
    }
}

/// Open the store selected by `config`
///
/// # Errors
/// Returns error if the SQLite database cannot be opened
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn PlanStore>> {
    Ok(match config {
        StoreConfig::Memory => Arc::new(InMemoryPlanStore::new()),
        StoreConfig::Sqlite { path } => Arc::new(SqlitePlanStore::open(path)?),
    })
}

fn not_found(plan_id: &PlanId, transition: &Transition) -> DossierError {
    tracing::debug!(plan_id = %plan_id, op = transition.label(), "plan not found");
    DossierError::plan_not_found(plan_id)
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every store must share; run against each backend.

    use super::*;
    use crate::error::ValidationError;
    use crate::types::{CaseId, DossierPlan, JurisdictionFocus, RationaleTag, UsdAmount};
    use chrono::{Duration, TimeZone, Utc};

    pub(crate) fn t(minutes: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    pub(crate) fn record(jurisdiction: &str, cases: &[&str], queued: i64) -> PlanRecord {
        let j: crate::types::Jurisdiction = jurisdiction.into();
        let plan = DossierPlan::new(
            PlanId::generate(&j.slug()),
            cases.iter().map(|c| CaseId::new(*c)).collect(),
            JurisdictionFocus::Single { jurisdiction: j },
            RationaleTag::HighLossJurisdiction,
            "test bundle",
            t(0),
            UsdAmount::from_dollars(100_000),
        )
        .unwrap();
        PlanRecord::pending(plan, vec!["w".into()], t(queued))
    }

    pub(crate) fn insert_get_and_dedup(store: &dyn PlanStore) {
        let rec = record("US-CA", &["a", "b"], 0);
        let id = rec.plan_id().clone();
        store.insert(rec.clone()).unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap(), rec);

        let dup = record("US-CA", &["b", "a"], 1);
        match store.insert(dup) {
            Err(DossierError::Validation(ValidationError::DuplicateBundle { existing })) => {
                assert_eq!(existing, id);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert!(store.get(&PlanId::parse("dossier-none").unwrap()).unwrap().is_none());
    }

    pub(crate) fn pending_is_oldest_first(store: &dyn PlanStore) {
        let late = record("GB", &["g1"], 10);
        let early = record("US-NY", &["n1"], 1);
        let middle = record("US-TX", &["t1"], 5);
        for r in [&late, &early, &middle] {
            store.insert(r.clone()).unwrap();
        }
        let pending: Vec<PlanId> = store
            .pending(2)
            .unwrap()
            .into_iter()
            .map(|r| r.plan_id().clone())
            .collect();
        assert_eq!(pending, vec![early.plan_id().clone(), middle.plan_id().clone()]);
    }

    pub(crate) fn lifecycle(store: &dyn PlanStore) {
        let rec = record("US-CA", &["x"], 0);
        let id = rec.plan_id().clone();
        store.insert(rec).unwrap();

        let claimed = store.claim(&id, t(1)).unwrap();
        assert_eq!(claimed.status, PlanStatus::Processing);
        assert!(matches!(
            store.claim(&id, t(2)),
            Err(DossierError::ConcurrencyConflict { .. })
        ));

        let attempted = store.record_attempt_failure(&id, "disk full", t(2)).unwrap();
        assert_eq!(attempted.attempts, 1);
        assert_eq!(attempted.last_error.as_deref(), Some("disk full"));

        let failed = store.fail(&id, "disk full", t(3)).unwrap();
        assert_eq!(failed.status, PlanStatus::Failed);
        assert!(store.pending(10).unwrap().is_empty());
        assert!(matches!(
            store.release(&id, t(4)),
            Err(DossierError::IllegalTransition { .. })
        ));

        let requeued = store.requeue(&id, t(4)).unwrap();
        assert_eq!(requeued.status, PlanStatus::Pending);
        assert_eq!(requeued.attempts, 0);
        assert!(requeued.last_error.is_none());

        store.claim(&id, t(5)).unwrap();
        let outputs = PlanOutputs {
            artifacts: vec!["p/p.md".parse().unwrap()],
            manifest_path: Some("p/p.json".parse().unwrap()),
            signature_path: Some("p/p.signatures.json".parse().unwrap()),
        };
        let done = store
            .complete(&id, outputs.clone(), vec!["w".into(), "new".into()], t(6))
            .unwrap();
        assert_eq!(done.status, PlanStatus::Completed);
        assert_eq!(done.outputs, outputs);
        assert_eq!(done.updated_at, t(6));
        assert_eq!(store.get(&id).unwrap().unwrap(), done);

        assert!(matches!(
            store.requeue(&PlanId::parse("dossier-missing").unwrap(), t(7)),
            Err(DossierError::NotFound(_))
        ));
    }

    pub(crate) fn release_returns_to_pending(store: &dyn PlanStore) {
        let rec = record("NG", &["n"], 0);
        let id = rec.plan_id().clone();
        store.insert(rec).unwrap();
        store.claim(&id, t(1)).unwrap();
        let released = store.release(&id, t(2)).unwrap();
        assert_eq!(released.status, PlanStatus::Pending);
        assert_eq!(store.pending(5).unwrap().len(), 1);
        assert!(matches!(
            store.requeue(&id, t(3)),
            Err(DossierError::IllegalTransition { .. })
        ));
    }

    pub(crate) fn list_filters(store: &dyn PlanStore) {
        let ca = record("US-CA", &["c1"], 0);
        let gb = record("GB", &["g1"], 1);
        store.insert(ca.clone()).unwrap();
        store.insert(gb.clone()).unwrap();
        store.claim(gb.plan_id(), t(2)).unwrap();
        store.fail(gb.plan_id(), "boom", t(3)).unwrap();

        let all = store.list(&PlanQuery::new()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].plan_id(), gb.plan_id());

        let failed = store
            .list(&PlanQuery::new().with_status(PlanStatus::Failed))
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("boom"));

        let ca_only = store.list(&PlanQuery::new().with_jurisdiction("us-ca")).unwrap();
        assert_eq!(ca_only.len(), 1);
        assert_eq!(ca_only[0].plan_id(), ca.plan_id());

        assert_eq!(store.list(&PlanQuery::new().with_limit(1)).unwrap().len(), 1);
    }
}

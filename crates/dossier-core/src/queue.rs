//! Queue processing
//!
//! [`QueueProcessor::run`] drains up to `batch_size` pending plans, oldest
//! first and one at a time. Each plan is claimed, generated, signed and then
//! completed or failed:
//!
//! ```text
//! pending ──claim──▶ processing ──▶ completed
//!    ▲                   │    └───▶ failed ──requeue──┐
//!    └──release (timeout, cancel)                     │
//!    └────────────────────────────────────────────────┘
//! ```
//!
//! A run is described by an [`ExecutionContext`] (id and cancellation) and
//! reported through an [`ExecutionRecord`], mirrored into the
//! [`ExecutionRegistry`] after every plan so pollers can follow progress.

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::error::{DossierError, Result, StorageError, ValidationError};
use crate::generator::DossierGenerator;
use crate::signatures::SignatureService;
use crate::store::PlanStore;
use crate::telemetry;
use crate::types::{ExecutionId, PlanId, PlanOutputs, PlanRecord, PlanStatus, Timestamp};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Parameters of one processing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    /// Overrides the configured batch size
    pub batch_size: Option<usize>,
    /// Log what would be processed without claiming anything
    pub dry_run: bool,
    /// Process only this plan, requeueing it first if it failed
    pub plan_id: Option<PlanId>,
}

impl ProcessRequest {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// With dry-run flag
    #[inline]
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Restrict the run to one plan
    #[inline]
    #[must_use]
    pub fn for_plan(mut self, plan_id: PlanId) -> Self {
        self.plan_id = Some(plan_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Finished,
    Cancelled,
    /// The run itself aborted (store failure, unknown plan)
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEventKind {
    Started,
    Finished,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub kind: ExecutionEventKind,
    pub at: Timestamp,
    pub detail: String,
}

/// What happened to one plan during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanOutcome {
    Completed { attempts: u32, warnings: usize },
    Failed { attempts: u32, error: String },
    /// Another worker owned the plan
    Skipped { reason: String },
    /// Claim handed back to the queue (attempt timed out or run cancelled)
    Released { reason: String },
    DryRun,
}

/// Per-outcome tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub released: usize,
    pub dry_run: usize,
}

impl ExecutionCounts {
    fn record(&mut self, outcome: &PlanOutcome) {
        self.processed += 1;
        match outcome {
            PlanOutcome::Completed { .. } => self.completed += 1,
            PlanOutcome::Failed { .. } => self.failed += 1,
            PlanOutcome::Skipped { .. } => self.skipped += 1,
            PlanOutcome::Released { .. } => self.released += 1,
            PlanOutcome::DryRun => self.dry_run += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResult {
    pub plan_id: PlanId,
    #[serde(flatten)]
    pub outcome: PlanOutcome,
}

/// Observable state of one processing run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub dry_run: bool,
    pub batch_size: usize,
    pub events: Vec<ExecutionEvent>,
    pub counts: ExecutionCounts,
    pub plans: Vec<PlanResult>,
    pub error: Option<String>,
}

impl ExecutionRecord {
    fn start(execution_id: ExecutionId, dry_run: bool, batch_size: usize, now: Timestamp) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Running,
            dry_run,
            batch_size,
            events: vec![ExecutionEvent {
                kind: ExecutionEventKind::Started,
                at: now,
                detail: format!("batch_size={batch_size} dry_run={dry_run}"),
            }],
            counts: ExecutionCounts::default(),
            plans: Vec::new(),
            error: None,
        }
    }

    fn push(&mut self, plan_id: PlanId, outcome: PlanOutcome) {
        self.counts.record(&outcome);
        self.plans.push(PlanResult { plan_id, outcome });
    }

    fn finish(&mut self, cancelled: bool, now: Timestamp) {
        let (status, kind) = if cancelled {
            (ExecutionStatus::Cancelled, ExecutionEventKind::Cancelled)
        } else {
            (ExecutionStatus::Finished, ExecutionEventKind::Finished)
        };
        self.status = status;
        self.events.push(ExecutionEvent {
            kind,
            at: now,
            detail: format!(
                "processed={} completed={} failed={} skipped={} released={} dry_run={}",
                self.counts.processed,
                self.counts.completed,
                self.counts.failed,
                self.counts.skipped,
                self.counts.released,
                self.counts.dry_run
            ),
        });
    }

    fn abort(&mut self, err: &DossierError, now: Timestamp) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(err.to_string());
        self.events.push(ExecutionEvent {
            kind: ExecutionEventKind::Failed,
            at: now,
            detail: err.to_string(),
        });
    }

    /// Whether the run has stopped
    #[inline]
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status != ExecutionStatus::Running
    }

    /// When the run stopped; `None` while it is still running
    #[must_use]
    pub fn finished_at(&self) -> Option<Timestamp> {
        if self.is_done() {
            self.events.last().map(|e| e.at)
        } else {
            None
        }
    }

    /// Outcome recorded for `plan_id`
    #[must_use]
    pub fn outcome(&self, plan_id: &PlanId) -> Option<&PlanOutcome> {
        self.plans
            .iter()
            .find(|p| &p.plan_id == plan_id)
            .map(|p| &p.outcome)
    }
}

/// Trigger side of a run's cancellation signal
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Identity and cancellation signal passed into a run
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    id: ExecutionId,
    cancel: watch::Receiver<bool>,
}

impl ExecutionContext {
    /// Fresh context and the handle that cancels it
    #[must_use]
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                id: ExecutionId::new(),
                cancel: rx,
            },
            CancelHandle(tx),
        )
    }

    /// Context that can never be cancelled
    #[must_use]
    pub fn detached() -> Self {
        Self::cancellable().0
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancellation is requested; never if the handle is gone
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Finished runs kept by [`ExecutionRegistry::new`]
pub const DEFAULT_RETAINED_RUNS: usize = 256;

/// Execution records by id, for pollers
///
/// Running records are always kept. Finished ones are capped at
/// `retained` (oldest evicted first) and can be pruned by age.
#[derive(Debug)]
pub struct ExecutionRegistry {
    records: DashMap<ExecutionId, ExecutionRecord>,
    cancels: DashMap<ExecutionId, CancelHandle>,
    retained: usize,
}

impl Default for ExecutionRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_RUNS)
    }
}

impl ExecutionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry keeping at most `retained` finished runs
    #[must_use]
    pub fn with_retention(retained: usize) -> Self {
        Self {
            records: DashMap::new(),
            cancels: DashMap::new(),
            retained,
        }
    }

    /// Drop finished runs that stopped before `older_than`; returns how many
    pub fn prune_finished(&self, older_than: Timestamp) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| !matches!(record.finished_at(), Some(at) if at < older_than));
        let pruned = before.saturating_sub(self.records.len());
        if pruned > 0 {
            debug!(pruned, "finished executions pruned");
        }
        pruned
    }

    fn evict_beyond_retention(&self) {
        let mut finished: Vec<(Timestamp, ExecutionId)> = self
            .records
            .iter()
            .filter_map(|r| r.value().finished_at().map(|at| (at, *r.key())))
            .collect();
        if finished.len() <= self.retained {
            return;
        }
        finished.sort_by_key(|(at, id)| (*at, id.0));
        let excess = finished.len() - self.retained;
        for (_, id) in finished.into_iter().take(excess) {
            self.records.remove(&id);
        }
    }

    /// Snapshot of a run
    #[must_use]
    pub fn get(&self, id: &ExecutionId) -> Option<ExecutionRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// Every known run, oldest first
    #[must_use]
    pub fn list(&self) -> Vec<ExecutionRecord> {
        let mut all: Vec<ExecutionRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|r| r.execution_id.0);
        all
    }

    /// Request cancellation; `false` if the run is unknown or already done
    pub fn cancel(&self, id: &ExecutionId) -> bool {
        match self.cancels.get(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    fn put(&self, record: ExecutionRecord) {
        let done = record.is_done();
        self.records.insert(record.execution_id, record);
        if done {
            self.evict_beyond_retention();
        }
    }

    fn register_cancel(&self, id: ExecutionId, handle: CancelHandle) {
        self.cancels.insert(id, handle);
    }

    fn forget_cancel(&self, id: &ExecutionId) {
        self.cancels.remove(id);
    }
}

/// Drains the plan store through generation and signing
pub struct QueueProcessor {
    store: Arc<dyn PlanStore>,
    generator: Arc<DossierGenerator>,
    signer: Arc<SignatureService>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<ExecutionRegistry>,
}

impl std::fmt::Debug for QueueProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QueueProcessor {
    #[must_use]
    pub fn new(
        store: Arc<dyn PlanStore>,
        generator: Arc<DossierGenerator>,
        signer: Arc<SignatureService>,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            generator,
            signer,
            config,
            clock,
            registry: Arc::new(ExecutionRegistry::new()),
        }
    }

    /// Share an existing registry
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ExecutionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    /// Start a run on the tokio runtime and return its id at once
    #[must_use]
    pub fn spawn(self: &Arc<Self>, request: ProcessRequest) -> ExecutionId {
        let (ctx, cancel) = ExecutionContext::cancellable();
        let id = ctx.id();
        let batch_size = request.batch_size.unwrap_or(self.config.batch_size);
        self.registry
            .put(ExecutionRecord::start(id, request.dry_run, batch_size, self.clock.now()));
        self.registry.register_cancel(id, cancel);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run(request, ctx).await {
                error!(execution_id = %id, error = %e, "queue run failed");
            }
        });
        id
    }

    /// Process one batch.
    ///
    /// # Errors
    /// - [`ValidationError::Malformed`] for a zero batch size
    /// - [`DossierError::NotFound`] if `request.plan_id` is unknown
    /// - store failures; per-plan generation errors are recorded as outcomes
    pub async fn run(&self, request: ProcessRequest, ctx: ExecutionContext) -> Result<ExecutionRecord> {
        let batch_size = request.batch_size.unwrap_or(self.config.batch_size);
        let id = ctx.id();
        let mut record = ExecutionRecord::start(id, request.dry_run, batch_size, self.clock.now());
        self.registry.put(record.clone());
        info!(execution_id = %id, batch_size, dry_run = request.dry_run, "queue run started");

        let result = self.run_batch(&request, batch_size, &ctx, &mut record).await;
        self.registry.forget_cancel(&id);
        if let Err(e) = result {
            record.abort(&e, self.clock.now());
            self.registry.put(record);
            return Err(e);
        }

        record.finish(ctx.is_cancelled(), self.clock.now());
        self.registry.put(record.clone());
        info!(
            execution_id = %id,
            status = ?record.status,
            processed = record.counts.processed,
            completed = record.counts.completed,
            failed = record.counts.failed,
            skipped = record.counts.skipped,
            "queue run finished"
        );
        Ok(record)
    }

    async fn run_batch(
        &self,
        request: &ProcessRequest,
        batch_size: usize,
        ctx: &ExecutionContext,
        record: &mut ExecutionRecord,
    ) -> Result<()> {
        if batch_size == 0 {
            return Err(ValidationError::Malformed("batch_size must be at least 1".into()).into());
        }
        let candidates = match &request.plan_id {
            Some(plan_id) => vec![self.targeted(plan_id, request.dry_run)?],
            None => self.store.pending(batch_size)?,
        };
        debug!(execution_id = %ctx.id(), candidates = candidates.len(), "batch selected");

        for candidate in candidates {
            if ctx.is_cancelled() {
                info!(execution_id = %ctx.id(), "run cancelled; remaining plans left pending");
                break;
            }
            let plan_id = candidate.plan_id().clone();
            let outcome = if request.dry_run {
                dry_run(&candidate)
            } else {
                self.process(&candidate, ctx).await?
            };
            record.push(plan_id, outcome);
            self.registry.put(record.clone());
        }
        Ok(())
    }

    fn targeted(&self, plan_id: &PlanId, dry_run: bool) -> Result<PlanRecord> {
        let record = self
            .store
            .get(plan_id)?
            .ok_or_else(|| DossierError::plan_not_found(plan_id))?;
        if record.status == PlanStatus::Failed && !dry_run {
            info!(plan_id = %plan_id, "failed plan requeued for reprocessing");
            return self.store.requeue(plan_id, self.clock.now());
        }
        Ok(record)
    }

    async fn process(&self, candidate: &PlanRecord, ctx: &ExecutionContext) -> Result<PlanOutcome> {
        let plan_id = candidate.plan_id();
        let claimed = match self.store.claim(plan_id, self.clock.now()) {
            Ok(claimed) => claimed,
            Err(DossierError::ConcurrencyConflict { actual, .. }) => {
                debug!(plan_id = %plan_id, status = %actual, "claim lost");
                return Ok(PlanOutcome::Skipped {
                    reason: format!("plan is {actual}"),
                });
            }
            Err(e) => return Err(e),
        };
        debug!(plan_id = %plan_id, attempts = claimed.attempts, "plan claimed");
        let jurisdiction = claimed.plan.focus().key();

        loop {
            let attempt = tokio::time::timeout(self.config.attempt_timeout(), self.attempt(&claimed));
            let result = tokio::select! {
                biased;
                () = ctx.cancelled() => None,
                result = attempt => Some(result),
            };
            let Some(result) = result else {
                return self.release(plan_id, "run cancelled");
            };

            let err = match result {
                Ok(Ok((outputs, warnings))) => {
                    let count = warnings.len();
                    let done = match self.store.complete(plan_id, outputs, warnings, self.clock.now()) {
                        Ok(done) => done,
                        Err(e) => return settle_conflict(plan_id, e),
                    };
                    telemetry::record_generation_success(plan_id, &jurisdiction);
                    info!(plan_id = %plan_id, warnings = count, "plan completed");
                    return Ok(PlanOutcome::Completed {
                        attempts: done.attempts + 1,
                        warnings: count,
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => DossierError::Timeout {
                    duration_ms: self.config.attempt_timeout_ms,
                },
            };

            let message = err.to_string();
            let updated = match self
                .store
                .record_attempt_failure(plan_id, &message, self.clock.now())
            {
                Ok(updated) => updated,
                Err(e) => return settle_conflict(plan_id, e),
            };
            let exhausted = updated.attempts >= self.config.max_attempts;

            if !err.is_retryable() || exhausted {
                return self.fail(plan_id, &jurisdiction, message, updated.attempts);
            }
            if matches!(err, DossierError::Timeout { .. }) {
                return self.release(plan_id, &message);
            }

            let delay = self.config.backoff_for(updated.attempts);
            warn!(
                plan_id = %plan_id,
                attempt = updated.attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %message,
                "attempt failed; retrying"
            );
            tokio::select! {
                biased;
                () = ctx.cancelled() => return self.release(plan_id, "run cancelled"),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Generate, sign and describe the outputs of one attempt
    async fn attempt(&self, record: &PlanRecord) -> Result<(PlanOutputs, Vec<String>)> {
        let generation = self
            .generator
            .generate_with_warnings(&record.plan, &record.warnings)
            .await?;
        self.signer
            .sign(&generation.plan_id, &generation.artifacts)
            .await?;
        let outputs = generation.plan_outputs().map_err(StorageError::from)?;
        Ok((outputs, generation.warnings))
    }

    fn release(&self, plan_id: &PlanId, reason: &str) -> Result<PlanOutcome> {
        match self.store.release(plan_id, self.clock.now()) {
            Ok(_) => {
                warn!(plan_id = %plan_id, reason, "claim released");
                Ok(PlanOutcome::Released {
                    reason: reason.to_string(),
                })
            }
            Err(e) => settle_conflict(plan_id, e),
        }
    }

    fn fail(&self, plan_id: &PlanId, jurisdiction: &str, error: String, attempts: u32) -> Result<PlanOutcome> {
        if let Err(e) = self.store.fail(plan_id, &error, self.clock.now()) {
            return settle_conflict(plan_id, e);
        }
        telemetry::record_generation_failure(plan_id, jurisdiction);
        warn!(plan_id = %plan_id, attempts, error = %error, "plan failed");
        Ok(PlanOutcome::Failed { attempts, error })
    }
}

fn dry_run(candidate: &PlanRecord) -> PlanOutcome {
    info!(
        plan_id = %candidate.plan_id(),
        status = %candidate.status,
        cases = candidate.plan.case_ids().len(),
        focus = %candidate.plan.focus().label(),
        "dry run: plan would be processed"
    );
    PlanOutcome::DryRun
}

/// Status races with another writer end this worker's interest in the plan
fn settle_conflict(plan_id: &PlanId, err: DossierError) -> Result<PlanOutcome> {
    match err {
        DossierError::ConcurrencyConflict { .. } | DossierError::IllegalTransition { .. } => {
            warn!(plan_id = %plan_id, error = %err, "plan changed by another writer");
            Ok(PlanOutcome::Skipped {
                reason: err.to_string(),
            })
        }
        other => Err(other),
    }
}

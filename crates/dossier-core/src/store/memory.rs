//! In-process plan store

use super::{apply_transition, not_found, PlanStore, Transition};
use crate::error::{Result, ValidationError};
use crate::types::{BundleFingerprint, PlanId, PlanQuery, PlanRecord, PlanStatus, Timestamp};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<PlanId, (u64, PlanRecord)>,
    fingerprints: HashMap<BundleFingerprint, PlanId>,
    next_seq: u64,
}

/// Plan store guarded by a single mutex
///
/// Suitable for tests and single-process deployments; every operation
/// holds the lock for its full duration, which makes claims atomic.
#[derive(Debug, Default)]
pub struct InMemoryPlanStore {
    inner: Mutex<Inner>,
}

impl InMemoryPlanStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PlanStore for InMemoryPlanStore {
    fn insert(&self, record: PlanRecord) -> Result<()> {
        let mut guard = self.inner.lock();
        if let Some(existing) = guard.fingerprints.get(&record.fingerprint) {
            return Err(ValidationError::DuplicateBundle {
                existing: existing.clone(),
            }
            .into());
        }
        if guard.records.contains_key(record.plan_id()) {
            return Err(ValidationError::Malformed(format!(
                "plan {} already exists",
                record.plan_id()
            ))
            .into());
        }
        let seq = guard.next_seq;
        guard.next_seq += 1;
        guard
            .fingerprints
            .insert(record.fingerprint.clone(), record.plan_id().clone());
        guard.records.insert(record.plan_id().clone(), (seq, record));
        Ok(())
    }

    fn get(&self, plan_id: &PlanId) -> Result<Option<PlanRecord>> {
        Ok(self.inner.lock().records.get(plan_id).map(|(_, r)| r.clone()))
    }

    fn list(&self, query: &PlanQuery) -> Result<Vec<PlanRecord>> {
        let guard = self.inner.lock();
        let mut rows: Vec<&(u64, PlanRecord)> = guard
            .records
            .values()
            .filter(|(_, r)| query.matches(r))
            .collect();
        rows.sort_by(|(sa, a), (sb, b)| b.updated_at.cmp(&a.updated_at).then(sb.cmp(sa)));
        Ok(rows
            .into_iter()
            .take(query.limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn pending(&self, limit: usize) -> Result<Vec<PlanRecord>> {
        let guard = self.inner.lock();
        let mut rows: Vec<&(u64, PlanRecord)> = guard
            .records
            .values()
            .filter(|(_, r)| r.status == PlanStatus::Pending)
            .collect();
        rows.sort_by(|(sa, a), (sb, b)| a.queued_at.cmp(&b.queued_at).then(sa.cmp(sb)));
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn transition(
        &self,
        plan_id: &PlanId,
        transition: Transition,
        now: Timestamp,
    ) -> Result<PlanRecord> {
        let mut guard = self.inner.lock();
        let Some((_, record)) = guard.records.get_mut(plan_id) else {
            return Err(not_found(plan_id, &transition));
        };
        // Work on a copy so a rejected transition leaves the record untouched.
        let mut updated = record.clone();
        apply_transition(&mut updated, transition, now)?;
        *record = updated.clone();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use std::sync::Arc;

    #[test]
    fn insert_get_and_dedup() {
        contract::insert_get_and_dedup(&InMemoryPlanStore::new());
    }

    #[test]
    fn pending_is_oldest_first() {
        contract::pending_is_oldest_first(&InMemoryPlanStore::new());
    }

    #[test]
    fn lifecycle() {
        contract::lifecycle(&InMemoryPlanStore::new());
    }

    #[test]
    fn release_returns_to_pending() {
        contract::release_returns_to_pending(&InMemoryPlanStore::new());
    }

    #[test]
    fn list_filters() {
        contract::list_filters(&InMemoryPlanStore::new());
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let store = Arc::new(InMemoryPlanStore::new());
        let rec = contract::record("US-CA", &["a"], 0);
        let id = rec.plan_id().clone();
        store.insert(rec).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || store.claim(&id, contract::t(1)).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}

//! SQLite-backed plan store
//!
//! One row per plan. The immutable plan, its warnings and outputs are stored
//! as JSON; status, attempts and timestamps are plain columns so the queue
//! can be polled with an index. Every write runs in an `IMMEDIATE`
//! transaction and updates with `WHERE status = <observed>`, so two
//! processes sharing the file never both win a claim.

use super::{apply_transition, not_found, PlanStore, Transition};
use crate::error::{DossierError, Result, StorageError, ValidationError};
use crate::types::{
    BundleFingerprint, DossierPlan, PlanId, PlanOutputs, PlanQuery, PlanRecord, PlanStatus,
    Timestamp,
};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

pub const STORE_SCHEMA_VERSION: &str = "dossier_plans.v1";

const SELECT_COLUMNS: &str = "plan_id, fingerprint, status, plan, warnings, last_error, \
     attempts, queued_at, updated_at, outputs";

/// Plan store persisted in a SQLite database file
#[derive(Debug)]
pub struct SqlitePlanStore {
    conn: Mutex<Connection>,
}

impl SqlitePlanStore {
    /// Open (or create) the database at `path`
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or carries another schema
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let conn = Connection::open(path).map_err(StorageError::from)?;
        Self::init(conn)
    }

    /// Private in-memory database, for tests
    ///
    /// # Errors
    /// Returns error if SQLite cannot allocate the database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(StorageError::from)?;
        conn.execute_batch(
            r"
BEGIN;
CREATE TABLE IF NOT EXISTS meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dossier_plans (
  plan_id TEXT PRIMARY KEY,
  fingerprint TEXT NOT NULL UNIQUE,
  status TEXT NOT NULL,
  plan TEXT NOT NULL,
  warnings TEXT NOT NULL,
  last_error TEXT NULL,
  attempts INTEGER NOT NULL,
  queued_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  outputs TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS dossier_plans_status_idx ON dossier_plans(status, queued_at);
INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', 'dossier_plans.v1');
COMMIT;
",
        )
        .map_err(StorageError::from)?;

        let version: String = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        if version != STORE_SCHEMA_VERSION {
            return Err(StorageError::Corrupt(format!(
                "unsupported plan store schema '{version}'"
            ))
            .into());
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn encode_ts(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_ts(raw: &str) -> Result<Timestamp> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp '{raw}': {e}")).into())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Corrupt(e.to_string()).into())
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::Corrupt(format!("column {column}: {e}")).into())
}

struct RawRow {
    fingerprint: String,
    status: String,
    plan: String,
    warnings: String,
    last_error: Option<String>,
    attempts: i64,
    queued_at: String,
    updated_at: String,
    outputs: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            fingerprint: row.get(1)?,
            status: row.get(2)?,
            plan: row.get(3)?,
            warnings: row.get(4)?,
            last_error: row.get(5)?,
            attempts: row.get(6)?,
            queued_at: row.get(7)?,
            updated_at: row.get(8)?,
            outputs: row.get(9)?,
        })
    }

    fn decode(self) -> Result<PlanRecord> {
        let plan: DossierPlan = from_json(&self.plan, "plan")?;
        let status: PlanStatus = self.status.parse()?;
        let attempts = u32::try_from(self.attempts)
            .map_err(|_| StorageError::Corrupt(format!("attempts {}", self.attempts)))?;
        let outputs: PlanOutputs = from_json(&self.outputs, "outputs")?;
        Ok(PlanRecord {
            plan,
            fingerprint: BundleFingerprint::from_stored(self.fingerprint),
            status,
            warnings: from_json(&self.warnings, "warnings")?,
            last_error: self.last_error,
            attempts,
            queued_at: decode_ts(&self.queued_at)?,
            updated_at: decode_ts(&self.updated_at)?,
            outputs,
        })
    }
}

fn fetch(conn: &Connection, plan_id: &PlanId) -> Result<Option<PlanRecord>> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM dossier_plans WHERE plan_id = ?1");
    let raw = conn
        .query_row(&sql, params![plan_id.as_str()], RawRow::from_row)
        .optional()
        .map_err(StorageError::from)?;
    raw.map(RawRow::decode).transpose()
}

fn collect(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<PlanRecord>> {
    let mut stmt = conn.prepare(sql).map_err(StorageError::from)?;
    let rows = stmt
        .query_map(args, RawRow::from_row)
        .map_err(StorageError::from)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(StorageError::from)?.decode()?);
    }
    Ok(out)
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl PlanStore for SqlitePlanStore {
    fn insert(&self, record: PlanRecord) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT plan_id FROM dossier_plans WHERE fingerprint = ?1",
                params![record.fingerprint.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        if let Some(existing) = existing {
            return Err(ValidationError::DuplicateBundle {
                existing: PlanId::parse(existing)?,
            }
            .into());
        }
        if fetch(&tx, record.plan_id())?.is_some() {
            return Err(ValidationError::Malformed(format!(
                "plan {} already exists",
                record.plan_id()
            ))
            .into());
        }

        tx.execute(
            "INSERT INTO dossier_plans (plan_id, fingerprint, status, plan, warnings, last_error, \
             attempts, queued_at, updated_at, outputs) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.plan_id().as_str(),
                record.fingerprint.as_str(),
                record.status.as_str(),
                to_json(&record.plan)?,
                to_json(&record.warnings)?,
                record.last_error,
                i64::from(record.attempts),
                encode_ts(record.queued_at),
                encode_ts(record.updated_at),
                to_json(&record.outputs)?,
            ],
        )
        .map_err(StorageError::from)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn get(&self, plan_id: &PlanId) -> Result<Option<PlanRecord>> {
        let conn = self.conn.lock();
        fetch(&conn, plan_id)
    }

    fn list(&self, query: &PlanQuery) -> Result<Vec<PlanRecord>> {
        let conn = self.conn.lock();
        let status = query.status.map(|s| s.as_str());
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM dossier_plans \
             WHERE (?1 IS NULL OR status = ?1) \
             ORDER BY updated_at DESC, rowid DESC"
        );
        // Jurisdiction lives inside the plan JSON, so that filter runs here.
        let rows = collect(&conn, &sql, params![status])?;
        Ok(rows
            .into_iter()
            .filter(|r| query.matches(r))
            .take(query.limit)
            .collect())
    }

    fn pending(&self, limit: usize) -> Result<Vec<PlanRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM dossier_plans \
             WHERE status = 'pending' \
             ORDER BY queued_at ASC, rowid ASC \
             LIMIT ?1"
        );
        collect(&conn, &sql, params![sql_limit(limit)])
    }

    fn transition(
        &self,
        plan_id: &PlanId,
        transition: Transition,
        now: Timestamp,
    ) -> Result<PlanRecord> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let Some(mut record) = fetch(&tx, plan_id)? else {
            return Err(not_found(plan_id, &transition));
        };
        let observed = record.status;
        apply_transition(&mut record, transition, now)?;

        let changed = tx
            .execute(
                "UPDATE dossier_plans \
                 SET status = ?1, warnings = ?2, last_error = ?3, attempts = ?4, \
                     updated_at = ?5, outputs = ?6 \
                 WHERE plan_id = ?7 AND status = ?8",
                params![
                    record.status.as_str(),
                    to_json(&record.warnings)?,
                    record.last_error,
                    i64::from(record.attempts),
                    encode_ts(record.updated_at),
                    to_json(&record.outputs)?,
                    plan_id.as_str(),
                    observed.as_str(),
                ],
            )
            .map_err(StorageError::from)?;
        if changed != 1 {
            let actual = fetch(&tx, plan_id)?.map_or(observed, |r| r.status);
            return Err(DossierError::ConcurrencyConflict {
                plan_id: plan_id.clone(),
                expected: observed,
                actual,
            });
        }
        tx.commit().map_err(StorageError::from)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use std::sync::Arc;

    fn store() -> SqlitePlanStore {
        SqlitePlanStore::open_in_memory().unwrap()
    }

    #[test]
    fn insert_get_and_dedup() {
        contract::insert_get_and_dedup(&store());
    }

    #[test]
    fn pending_is_oldest_first() {
        contract::pending_is_oldest_first(&store());
    }

    #[test]
    fn lifecycle() {
        contract::lifecycle(&store());
    }

    #[test]
    fn release_returns_to_pending() {
        contract::release_returns_to_pending(&store());
    }

    #[test]
    fn list_filters() {
        contract::list_filters(&store());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");
        let rec = contract::record("US-FL", &["f1", "f2"], 0);
        let id = rec.plan_id().clone();
        {
            let store = SqlitePlanStore::open(&path).unwrap();
            store.insert(rec.clone()).unwrap();
            store.claim(&id, contract::t(1)).unwrap();
        }
        let reopened = SqlitePlanStore::open(&path).unwrap();
        let loaded = reopened.get(&id).unwrap().unwrap();
        assert_eq!(loaded.status, PlanStatus::Processing);
        assert_eq!(loaded.plan, rec.plan);
        assert_eq!(loaded.queued_at, rec.queued_at);
    }

    #[test]
    fn claims_across_connections_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let seed = SqlitePlanStore::open(&path).unwrap();
        let rec = contract::record("US-WA", &["w1"], 0);
        let id = rec.plan_id().clone();
        seed.insert(rec).unwrap();

        let stores: Vec<Arc<SqlitePlanStore>> = (0..4)
            .map(|_| Arc::new(SqlitePlanStore::open(&path).unwrap()))
            .collect();
        let handles: Vec<_> = stores
            .into_iter()
            .map(|store| {
                let id = id.clone();
                std::thread::spawn(move || store.claim(&id, contract::t(1)))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, DossierError::ConcurrencyConflict { .. })));
    }

    #[test]
    fn corrupt_rows_surface_as_storage_errors() {
        let store = store();
        let rec = contract::record("JP", &["j1"], 0);
        let id = rec.plan_id().clone();
        store.insert(rec).unwrap();
        store
            .conn
            .lock()
            .execute(
                "UPDATE dossier_plans SET plan = '{' WHERE plan_id = ?1",
                params![id.as_str()],
            )
            .unwrap();
        assert!(matches!(
            store.get(&id),
            Err(DossierError::Storage(StorageError::Corrupt(_)))
        ));
    }
}

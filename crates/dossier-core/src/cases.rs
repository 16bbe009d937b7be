//! Case input boundary
//!
//! The search engine that supplies candidates lives outside this crate; the
//! pipeline only sees it through [`CaseSource`]. [`DossierContext`] is the
//! per-plan snapshot the generator renders from.

use crate::error::{RenderError, StorageError};
use crate::types::{Case, CaseId, DossierPlan};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Reviewer notes attached to a case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewNote {
    pub summary: String,
    #[serde(default)]
    pub reviewer: Option<String>,
}

/// Read-only lookup of case snapshots and their structured context
pub trait CaseSource: Send + Sync {
    /// Case snapshot by id
    ///
    /// # Errors
    /// Returns [`RenderError::Context`] if the backing source is unavailable
    fn case(&self, id: &CaseId) -> Result<Option<Case>, RenderError>;

    /// Structured record for the case, if one was extracted
    ///
    /// # Errors
    /// Returns [`RenderError::Context`] if the backing source is unavailable
    fn structured_record(&self, _id: &CaseId) -> Result<Option<serde_json::Value>, RenderError> {
        Ok(None)
    }

    /// Analyst review for the case
    ///
    /// # Errors
    /// Returns [`RenderError::Context`] if the backing source is unavailable
    fn review(&self, _id: &CaseId) -> Result<Option<ReviewNote>, RenderError> {
        Ok(None)
    }
}

/// JSON snapshot format accepted by [`InMemoryCaseSource::from_json_file`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseSnapshot {
    pub cases: Vec<Case>,
    pub structured: BTreeMap<CaseId, serde_json::Value>,
    pub reviews: BTreeMap<CaseId, ReviewNote>,
}

/// Case source backed by in-process maps
#[derive(Debug, Default, Clone)]
pub struct InMemoryCaseSource {
    cases: HashMap<CaseId, Case>,
    structured: HashMap<CaseId, serde_json::Value>,
    reviews: HashMap<CaseId, ReviewNote>,
}

impl InMemoryCaseSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of cases
    #[must_use]
    pub fn from_cases(cases: impl IntoIterator<Item = Case>) -> Self {
        let mut source = Self::new();
        for case in cases {
            source.insert(case);
        }
        source
    }

    /// Load a [`CaseSnapshot`] JSON file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_json_file(path: &Path) -> Result<Self, StorageError> {
        let raw = std::fs::read(path).map_err(|e| StorageError::io(path, e))?;
        let snapshot: CaseSnapshot = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))?;
        Ok(Self::from_snapshot(snapshot))
    }

    #[must_use]
    pub fn from_snapshot(snapshot: CaseSnapshot) -> Self {
        let mut source = Self::from_cases(snapshot.cases);
        source.structured.extend(snapshot.structured);
        source.reviews.extend(snapshot.reviews);
        source
    }

    pub fn insert(&mut self, case: Case) {
        self.cases.insert(case.id.clone(), case);
    }

    pub fn insert_structured(&mut self, id: CaseId, record: serde_json::Value) {
        self.structured.insert(id, record);
    }

    pub fn insert_review(&mut self, id: CaseId, review: ReviewNote) {
        self.reviews.insert(id, review);
    }

    /// All cases, ordered by id
    #[must_use]
    pub fn cases(&self) -> Vec<Case> {
        let mut all: Vec<Case> = self.cases.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

impl CaseSource for InMemoryCaseSource {
    fn case(&self, id: &CaseId) -> Result<Option<Case>, RenderError> {
        Ok(self.cases.get(id).cloned())
    }

    fn structured_record(&self, id: &CaseId) -> Result<Option<serde_json::Value>, RenderError> {
        Ok(self.structured.get(id).cloned())
    }

    fn review(&self, id: &CaseId) -> Result<Option<ReviewNote>, RenderError> {
        Ok(self.reviews.get(id).cloned())
    }
}

/// Resolved context for one case of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseContext {
    pub case_id: CaseId,
    pub case: Option<Case>,
    pub structured_record: Option<serde_json::Value>,
    pub review: Option<ReviewNote>,
    pub warnings: Vec<String>,
}

/// Context for every case in a plan, in plan order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DossierContext {
    pub cases: Vec<CaseContext>,
    /// De-duplicated warnings in first-seen order
    pub warnings: Vec<String>,
}

impl DossierContext {
    /// Resolve context for every case in `plan`
    ///
    /// Missing snapshots, structured records or reviews become warnings.
    ///
    /// # Errors
    /// Propagates [`RenderError::Context`] from the source
    pub fn load(source: &dyn CaseSource, plan: &DossierPlan) -> Result<Self, RenderError> {
        let mut cases = Vec::with_capacity(plan.case_ids().len());
        let mut warnings = Vec::new();
        for case_id in plan.case_ids() {
            let case = source.case(case_id)?;
            let structured_record = source.structured_record(case_id)?;
            let review = source.review(case_id)?;

            let mut case_warnings = Vec::new();
            match &case {
                None => case_warnings.push(format!("No case snapshot found for case {case_id}")),
                Some(c) if c.loss_amount.is_zero() => case_warnings.push(format!(
                    "Case {case_id} reports zero loss and is included for linkage only"
                )),
                Some(_) => {}
            }
            if structured_record.is_none() {
                case_warnings.push(format!("No structured record found for case {case_id}"));
            }
            if review.is_none() {
                case_warnings.push(format!("No review metadata found for case {case_id}"));
            }
            for warning in &case_warnings {
                push_unique(&mut warnings, warning.clone());
            }
            cases.push(CaseContext {
                case_id: case_id.clone(),
                case,
                structured_record,
                review,
                warnings: case_warnings,
            });
        }
        Ok(Self { cases, warnings })
    }

    /// Snapshots that were found, in plan order
    pub fn resolved_cases(&self) -> impl Iterator<Item = &Case> {
        self.cases.iter().filter_map(|c| c.case.as_ref())
    }

    /// Context entry for `id`
    #[must_use]
    pub fn get(&self, id: &CaseId) -> Option<&CaseContext> {
        self.cases.iter().find(|c| &c.case_id == id)
    }
}

pub(crate) fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

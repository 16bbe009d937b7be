//! Aggregate statistics for a plan

use crate::cases::DossierContext;
use crate::types::{Case, CaseId, DossierPlan, Indicator, Jurisdiction, JurisdictionFocus, Timestamp, UsdAmount};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// How many resolved cases carry an indicator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorFrequency {
    pub indicator: String,
    pub count: usize,
}

/// Figures computed from a plan and its resolved case snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAnalysis {
    pub case_count: usize,
    pub resolved_count: usize,
    pub total_loss: UsdAmount,
    pub loss_by_jurisdiction: BTreeMap<Jurisdiction, UsdAmount>,
    /// Cases sharing an indicator with a case from another jurisdiction
    pub cross_border_cases: Vec<CaseId>,
    pub earliest: Option<Timestamp>,
    pub latest: Option<Timestamp>,
    /// Most frequent indicators, highest count first, ties by name
    pub top_indicators: Vec<IndicatorFrequency>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

impl PlanAnalysis {
    /// Analyse `plan` against the snapshots resolved in `context`
    #[must_use]
    pub fn compute(plan: &DossierPlan, context: &DossierContext, top_indicators: usize) -> Self {
        let cases: Vec<&Case> = context.resolved_cases().collect();

        let mut loss_by_jurisdiction: BTreeMap<Jurisdiction, UsdAmount> = BTreeMap::new();
        for case in &cases {
            let entry = loss_by_jurisdiction
                .entry(case.jurisdiction.clone())
                .or_default();
            *entry = *entry + case.loss_amount;
        }

        let per_case: Vec<BTreeSet<Indicator>> = cases
            .iter()
            .map(|c| {
                c.indicators
                    .iter()
                    .filter(|i| !i.is_blank())
                    .map(Indicator::normalized)
                    .collect()
            })
            .collect();

        let mut frequency: HashMap<&Indicator, usize> = HashMap::new();
        let mut holders: HashMap<&Indicator, BTreeSet<&Jurisdiction>> = HashMap::new();
        for (case, indicators) in cases.iter().zip(&per_case) {
            for indicator in indicators {
                *frequency.entry(indicator).or_default() += 1;
                holders.entry(indicator).or_default().insert(&case.jurisdiction);
            }
        }

        let cross_border_cases = cases
            .iter()
            .zip(&per_case)
            .filter(|(_, indicators)| {
                indicators
                    .iter()
                    .any(|i| holders.get(i).is_some_and(|j| j.len() > 1))
            })
            .map(|(case, _)| case.id.clone())
            .collect();

        let mut ranked: Vec<IndicatorFrequency> = frequency
            .into_iter()
            .map(|(indicator, count)| IndicatorFrequency {
                indicator: indicator.to_string(),
                count,
            })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.indicator.cmp(&b.indicator)));
        ranked.truncate(top_indicators);

        let mut warnings = Vec::new();
        if let JurisdictionFocus::CrossBorder {
            shared_indicators, ..
        } = plan.focus()
        {
            let resolved = shared_indicators
                .iter()
                .filter(|i| {
                    let key = i.normalized();
                    per_case.iter().filter(|set| set.contains(&key)).count() >= 2
                })
                .count();
            if resolved < shared_indicators.len() {
                warnings.push(format!(
                    "Only {resolved} of {} shared indicators resolved from case snapshots",
                    shared_indicators.len()
                ));
            }
        }

        Self {
            case_count: plan.case_ids().len(),
            resolved_count: cases.len(),
            total_loss: plan.total_loss(),
            loss_by_jurisdiction,
            cross_border_cases,
            earliest: cases.iter().map(|c| c.timestamp).min(),
            latest: cases.iter().map(|c| c.timestamp).max(),
            top_indicators: ranked,
            warnings,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_cross_border(&self, id: &CaseId) -> bool {
        self.cross_border_cases.contains(id)
    }
}

//! Bundle builder
//!
//! Applies the acceptance policy to candidate cases, groups the survivors
//! into [`DossierPlan`]s and persists them as pending records.
//!
//! Grouping is deterministic for a given input and clock: eligible cases are
//! ordered by `(timestamp, id)` before grouping and chunking, so the same
//! candidates always produce the same case sets (plan ids are fresh ULIDs).

use crate::clock::Clock;
use crate::config::{BundlePolicy, GroupingRule};
use crate::error::{DossierError, Result, ValidationError};
use crate::store::PlanStore;
use crate::telemetry;
use crate::types::{
    Case, CaseId, DossierPlan, Indicator, Jurisdiction, JurisdictionFocus, PlanId, PlanRecord,
    RationaleTag, Timestamp, UsdAmount,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use tracing::{debug, info};

/// Why a candidate was left out of every plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    BelowLossThreshold {
        loss: UsdAmount,
        minimum: UsdAmount,
    },
    OutsideRecencyWindow {
        age_days: i64,
        window_days: u32,
    },
}

impl Display for ExclusionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::BelowLossThreshold { loss, minimum } => {
                write!(f, "reported loss {loss} is below the {minimum} minimum")
            }
            Self::OutsideRecencyWindow {
                age_days,
                window_days,
            } => write!(
                f,
                "case is {age_days} days old, outside the {window_days}-day window"
            ),
        }
    }
}

/// A rejected candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub case_id: CaseId,
    pub jurisdiction: Jurisdiction,
    pub reason: ExclusionReason,
}

impl Exclusion {
    /// Warning attached to plans that cover this case's jurisdiction
    #[must_use]
    pub fn warning(&self) -> String {
        format!("Case {} excluded: {}", self.case_id, self.reason)
    }
}

/// A plan produced by [`BundleBuilder::plan`] but not yet persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedPlan {
    pub plan: DossierPlan,
    pub warnings: Vec<String>,
}

/// Result of grouping without side effects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleDraft {
    pub plans: Vec<ProposedPlan>,
    pub exclusions: Vec<Exclusion>,
    /// Eligible cases whose group fell below `min_cases_per_plan`, or that
    /// link to no other jurisdiction under `cross_border_only`
    pub ungrouped: Vec<CaseId>,
}

/// A proposed plan skipped because an identical bundle is already queued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDuplicate {
    pub case_ids: Vec<CaseId>,
    pub rationale_tag: RationaleTag,
    pub existing: PlanId,
}

/// Result of [`BundleBuilder::build_and_enqueue`]
///
/// An outcome with no plans is valid; callers that require at least one
/// plan use [`require_plans`](Self::require_plans).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleOutcome {
    pub enqueued: Vec<PlanRecord>,
    pub duplicates: Vec<SkippedDuplicate>,
    pub exclusions: Vec<Exclusion>,
    pub ungrouped: Vec<CaseId>,
}

impl BundleOutcome {
    /// Ids of the enqueued plans
    #[must_use]
    pub fn plan_ids(&self) -> Vec<PlanId> {
        self.enqueued.iter().map(|r| r.plan_id().clone()).collect()
    }

    /// # Errors
    /// [`ValidationError::NoEligibleCases`] when nothing was enqueued
    pub fn require_plans(self) -> Result<Self> {
        if self.enqueued.is_empty() {
            return Err(ValidationError::NoEligibleCases.into());
        }
        Ok(self)
    }
}

/// Selects qualifying cases and enqueues dossier plans
#[derive(Debug)]
pub struct BundleBuilder {
    store: Arc<dyn PlanStore>,
    policy: BundlePolicy,
    clock: Arc<dyn Clock>,
}

impl BundleBuilder {
    #[must_use]
    pub fn new(store: Arc<dyn PlanStore>, policy: BundlePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> &BundlePolicy {
        &self.policy
    }

    /// Group `cases` into proposed plans without touching the store
    ///
    /// # Errors
    /// [`ValidationError::Malformed`] if a case id appears twice in the input
    pub fn plan(&self, cases: &[Case]) -> Result<BundleDraft> {
        let now = self.clock.now();
        let mut seen = HashSet::with_capacity(cases.len());
        if let Some(dup) = cases.iter().find(|c| !seen.insert(&c.id)) {
            return Err(ValidationError::Malformed(format!("candidate {} listed twice", dup.id)).into());
        }

        let (mut eligible, exclusions) = self.partition(cases, now);
        eligible.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let mut draft = BundleDraft {
            exclusions,
            ..BundleDraft::default()
        };
        let chunk_size = self.policy.max_cases_per_plan.max(1);
        let groups = match self.policy.grouping {
            GroupingRule::PerJurisdiction => per_jurisdiction(&eligible),
            GroupingRule::Global => global(&eligible),
            GroupingRule::CrossBorder => {
                let (mut linked, rest) = cross_border(&eligible, chunk_size);
                if self.policy.cross_border_only {
                    draft.ungrouped.extend(rest.iter().map(|c| c.id.clone()));
                } else {
                    linked.extend(per_jurisdiction(&rest));
                }
                linked
            }
        };
        for group in groups {
            for chunk in group.cases.chunks(chunk_size) {
                if chunk.len() < self.policy.min_cases_per_plan {
                    draft.ungrouped.extend(chunk.iter().map(|c| c.id.clone()));
                    continue;
                }
                let plan = build_plan(&group, chunk, now)?;
                let warnings = draft
                    .exclusions
                    .iter()
                    .filter(|ex| {
                        matches!(plan.focus(), JurisdictionFocus::Global)
                            || plan.focus().covers(&ex.jurisdiction)
                    })
                    .map(Exclusion::warning)
                    .collect();
                draft.plans.push(ProposedPlan { plan, warnings });
            }
        }
        Ok(draft)
    }

    /// Group `cases` and persist every new plan as pending
    ///
    /// Plans whose case set and rationale match an existing record are
    /// reported in [`BundleOutcome::duplicates`] instead of failing the run.
    ///
    /// # Errors
    /// - [`ValidationError::Malformed`] for duplicate candidate ids
    /// - storage errors from the plan store
    pub fn build_and_enqueue(&self, cases: &[Case]) -> Result<BundleOutcome> {
        let draft = self.plan(cases)?;
        let now = self.clock.now();
        let mut outcome = BundleOutcome {
            exclusions: draft.exclusions,
            ungrouped: draft.ungrouped,
            ..BundleOutcome::default()
        };

        for proposed in draft.plans {
            let record = PlanRecord::pending(proposed.plan, proposed.warnings, now);
            match self.store.insert(record.clone()) {
                Ok(()) => {
                    let key = record.plan.focus().key();
                    telemetry::record_plan_enqueued(&key);
                    info!(
                        plan_id = %record.plan_id(),
                        jurisdiction = %key,
                        cases = record.plan.case_ids().len(),
                        "dossier plan enqueued"
                    );
                    outcome.enqueued.push(record);
                }
                Err(DossierError::Validation(ValidationError::DuplicateBundle { existing })) => {
                    debug!(existing = %existing, "identical bundle already queued");
                    outcome.duplicates.push(SkippedDuplicate {
                        case_ids: record.plan.case_ids().to_vec(),
                        rationale_tag: record.plan.rationale_tag(),
                        existing,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            enqueued = outcome.enqueued.len(),
            duplicates = outcome.duplicates.len(),
            excluded = outcome.exclusions.len(),
            ungrouped = outcome.ungrouped.len(),
            "bundle run finished"
        );
        Ok(outcome)
    }

    fn partition<'a>(&self, cases: &'a [Case], now: Timestamp) -> (Vec<&'a Case>, Vec<Exclusion>) {
        let minimum = self.policy.min_loss();
        let window = self.policy.recency_window();
        let mut eligible = Vec::new();
        let mut exclusions = Vec::new();
        for case in cases {
            let age = now - case.timestamp;
            let reason = if case.loss_amount < minimum {
                Some(ExclusionReason::BelowLossThreshold {
                    loss: case.loss_amount,
                    minimum,
                })
            } else if age > window {
                Some(ExclusionReason::OutsideRecencyWindow {
                    age_days: age.num_days(),
                    window_days: self.policy.recency_days,
                })
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    debug!(case_id = %case.id, %reason, "candidate excluded");
                    exclusions.push(Exclusion {
                        case_id: case.id.clone(),
                        jurisdiction: case.jurisdiction.clone(),
                        reason,
                    });
                }
                None => eligible.push(case),
            }
        }
        (eligible, exclusions)
    }
}

/// Cases sharing one focus, in `(timestamp, id)` order
struct Group<'a> {
    focus: JurisdictionFocus,
    tag: RationaleTag,
    cases: Vec<&'a Case>,
}

fn per_jurisdiction<'a>(eligible: &[&'a Case]) -> Vec<Group<'a>> {
    let mut buckets: BTreeMap<Jurisdiction, Vec<&'a Case>> = BTreeMap::new();
    for &case in eligible {
        buckets.entry(case.jurisdiction.clone()).or_default().push(case);
    }
    buckets
        .into_iter()
        .map(|(jurisdiction, cases)| Group {
            focus: JurisdictionFocus::Single { jurisdiction },
            tag: RationaleTag::HighLossJurisdiction,
            cases,
        })
        .collect()
}

fn global<'a>(eligible: &[&'a Case]) -> Vec<Group<'a>> {
    if eligible.is_empty() {
        return Vec::new();
    }
    vec![Group {
        focus: JurisdictionFocus::Global,
        tag: RationaleTag::GlobalAggregate,
        cases: eligible.to_vec(),
    }]
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn indicator_keys(case: &Case) -> BTreeSet<Indicator> {
    case.indicators
        .iter()
        .filter(|i| !i.is_blank())
        .map(Indicator::normalized)
        .collect()
}

/// Link cases through shared indicators.
///
/// Each linked component is cut into connected chunks of at most `max_cases`;
/// chunks spanning two or more jurisdictions become cross-border groups. The
/// remaining cases are returned for the caller to group per jurisdiction.
fn cross_border<'a>(eligible: &[&'a Case], max_cases: usize) -> (Vec<Group<'a>>, Vec<&'a Case>) {
    let keys: Vec<BTreeSet<Indicator>> = eligible.iter().map(|c| indicator_keys(c)).collect();
    let mut parent: Vec<usize> = (0..eligible.len()).collect();
    let mut first_seen: HashMap<&Indicator, usize> = HashMap::new();
    for (idx, case_keys) in keys.iter().enumerate() {
        for key in case_keys {
            match first_seen.get(key) {
                Some(&other) => {
                    let (a, b) = (find(&mut parent, idx), find(&mut parent, other));
                    if a != b {
                        parent[a.max(b)] = a.min(b);
                    }
                }
                None => {
                    first_seen.insert(key, idx);
                }
            }
        }
    }

    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for idx in 0..eligible.len() {
        let root = find(&mut parent, idx);
        components.entry(root).or_default().push(idx);
    }

    let mut groups = Vec::new();
    let mut rest = Vec::new();
    for members in components.into_values() {
        for chunk in connected_chunks(&members, &keys, max_cases) {
            let cases: Vec<&'a Case> = chunk.iter().map(|&i| eligible[i]).collect();
            let jurisdictions = distinct_jurisdictions(&cases);
            let linking = linking_indicators(&cases);
            if jurisdictions.len() >= 2 && !linking.is_empty() {
                groups.push(Group {
                    focus: JurisdictionFocus::CrossBorder {
                        jurisdictions,
                        shared_indicators: linking,
                    },
                    tag: RationaleTag::SharedIndicators,
                    cases,
                });
            } else {
                rest.extend(cases);
            }
        }
    }
    rest.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    (groups, rest)
}

/// Split one component into chunks that stay connected through shared
/// indicators. Seeds are taken oldest first and grown breadth-first.
fn connected_chunks(
    members: &[usize],
    keys: &[BTreeSet<Indicator>],
    max_cases: usize,
) -> Vec<Vec<usize>> {
    let mut assigned = vec![false; members.len()];
    let mut chunks = Vec::new();
    for seed in 0..members.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut chunk = vec![seed];
        let mut queue = VecDeque::from([seed]);
        while let Some(current) = queue.pop_front() {
            for next in 0..members.len() {
                if chunk.len() >= max_cases {
                    break;
                }
                if !assigned[next] && !keys[members[current]].is_disjoint(&keys[members[next]]) {
                    assigned[next] = true;
                    chunk.push(next);
                    queue.push_back(next);
                }
            }
        }
        chunk.sort_unstable();
        chunks.push(chunk.into_iter().map(|i| members[i]).collect());
    }
    chunks
}

fn distinct_jurisdictions(cases: &[&Case]) -> Vec<Jurisdiction> {
    cases
        .iter()
        .map(|c| c.jurisdiction.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Normalised indicators held by cases in at least two jurisdictions
fn linking_indicators(cases: &[&Case]) -> Vec<Indicator> {
    let mut holders: BTreeMap<Indicator, BTreeSet<&Jurisdiction>> = BTreeMap::new();
    for case in cases {
        for key in indicator_keys(case) {
            holders.entry(key).or_default().insert(&case.jurisdiction);
        }
    }
    holders
        .into_iter()
        .filter(|(_, jurisdictions)| jurisdictions.len() >= 2)
        .map(|(indicator, _)| indicator)
        .collect()
}

fn build_plan(group: &Group<'_>, chunk: &[&Case], now: Timestamp) -> Result<DossierPlan> {
    let focus = group.focus.clone();
    let rationale = rationale_for(&focus, chunk.len());
    let total_loss: UsdAmount = chunk.iter().map(|c| c.loss_amount).sum();
    let plan = DossierPlan::new(
        PlanId::generate(&focus.slug()),
        chunk.iter().map(|c| c.id.clone()).collect(),
        focus,
        group.tag,
        rationale,
        now,
        total_loss,
    )?;
    Ok(plan)
}

fn rationale_for(focus: &JurisdictionFocus, case_count: usize) -> String {
    match focus {
        JurisdictionFocus::Global => {
            "Global dossier: high-loss cases aggregated across jurisdictions".to_string()
        }
        JurisdictionFocus::CrossBorder {
            jurisdictions,
            shared_indicators,
        } => {
            let codes: Vec<&str> = jurisdictions.iter().map(Jurisdiction::as_str).collect();
            let links: Vec<String> = shared_indicators.iter().map(ToString::to_string).collect();
            format!(
                "Cross-border dossier: {} linked by shared indicators {}",
                codes.join(", "),
                links.join(", ")
            )
        }
        JurisdictionFocus::Single { jurisdiction } if case_count == 1 => {
            format!("Single jurisdiction ({jurisdiction}) dossier")
        }
        JurisdictionFocus::Single { jurisdiction } => {
            format!("{jurisdiction} dossier ({case_count} cases, shared entities)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::InMemoryPlanStore;
    use crate::types::{IndicatorKind, PlanStatus};
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    fn case(id: &str, jurisdiction: &str, dollars: u64, days_ago: i64) -> Case {
        Case::new(
            id,
            jurisdiction,
            UsdAmount::from_dollars(dollars),
            now() - Duration::days(days_ago),
        )
    }

    fn wallet(value: &str) -> Indicator {
        Indicator::new(IndicatorKind::Wallet, value)
    }

    fn builder(policy: BundlePolicy) -> (BundleBuilder, Arc<InMemoryPlanStore>) {
        let store = Arc::new(InMemoryPlanStore::new());
        let builder = BundleBuilder::new(
            Arc::clone(&store) as Arc<dyn PlanStore>,
            policy,
            Arc::new(FixedClock::new(now())),
        );
        (builder, store)
    }

    #[test]
    fn high_loss_cases_bundle_with_exclusion_warning() {
        let (builder, store) = builder(BundlePolicy::default());
        let cases = vec![
            case("c-60k", "US-CA", 60_000, 3),
            case("c-120k", "US-CA", 120_000, 1),
            case("c-5k", "US-CA", 5_000, 2),
        ];
        let outcome = builder.build_and_enqueue(&cases).unwrap();

        assert_eq!(outcome.enqueued.len(), 1);
        let record = &outcome.enqueued[0];
        assert_eq!(
            record.plan.case_ids(),
            &[CaseId::new("c-60k"), CaseId::new("c-120k")]
        );
        assert_eq!(record.plan.total_loss(), UsdAmount::from_dollars(180_000));
        assert_eq!(record.plan.rationale(), "US-CA dossier (2 cases, shared entities)");
        assert_eq!(record.status, PlanStatus::Pending);
        assert_eq!(record.warnings.len(), 1);
        assert!(record.warnings[0].starts_with("Case c-5k excluded"));
        assert!(record.plan_id().as_str().starts_with("dossier-us-ca-"));

        assert_eq!(outcome.exclusions.len(), 1);
        assert!(matches!(
            outcome.exclusions[0].reason,
            ExclusionReason::BelowLossThreshold { .. }
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn boundaries_are_inclusive() {
        let (builder, _) = builder(BundlePolicy::default());
        let draft = builder
            .plan(&[case("edge", "GB", 50_000, 30), case("old", "GB", 90_000, 31)])
            .unwrap();
        assert_eq!(draft.plans.len(), 1);
        assert_eq!(draft.plans[0].plan.case_ids(), &[CaseId::new("edge")]);
        assert_eq!(
            draft.plans[0].plan.rationale(),
            "Single jurisdiction (GB) dossier"
        );
        assert_eq!(
            draft.exclusions[0].reason,
            ExclusionReason::OutsideRecencyWindow {
                age_days: 31,
                window_days: 30
            }
        );
    }

    #[test]
    fn exclusion_warnings_stay_in_their_jurisdiction() {
        let (builder, _) = builder(BundlePolicy::default());
        let draft = builder
            .plan(&[
                case("ca", "US-CA", 70_000, 1),
                case("ny", "US-NY", 70_000, 1),
                case("ny-small", "US-NY", 10, 1),
            ])
            .unwrap();
        let by_key: HashMap<String, &ProposedPlan> = draft
            .plans
            .iter()
            .map(|p| (p.plan.focus().key(), p))
            .collect();
        assert!(by_key["US-CA"].warnings.is_empty());
        assert_eq!(by_key["US-NY"].warnings.len(), 1);
    }

    #[test]
    fn large_groups_are_chunked_and_small_tails_dropped() {
        let policy = BundlePolicy::default()
            .with_max_cases_per_plan(2)
            .with_min_cases_per_plan(2);
        let (builder, _) = builder(policy);
        let cases: Vec<Case> = (0..5)
            .map(|i| case(&format!("tx-{i}"), "US-TX", 80_000, 10 - i))
            .collect();
        let draft = builder.plan(&cases).unwrap();
        assert_eq!(draft.plans.len(), 2);
        assert_eq!(
            draft.plans[0].plan.case_ids(),
            &[CaseId::new("tx-0"), CaseId::new("tx-1")]
        );
        assert_eq!(draft.ungrouped, vec![CaseId::new("tx-4")]);
    }

    #[test]
    fn shared_indicators_link_across_borders() {
        let policy = BundlePolicy::default().with_grouping(GroupingRule::CrossBorder);
        let (builder, _) = builder(policy);
        let cases = vec![
            case("ca", "US-CA", 75_000, 2).with_indicator(wallet("0xABC")),
            case("gb", "GB", 65_000, 1).with_indicator(wallet(" 0xabc ")),
            case("ny", "US-NY", 90_000, 1).with_indicator(wallet("0xdef")),
            case("blank", "NG", 90_000, 1).with_indicator(wallet("  ")),
        ];
        let draft = builder.plan(&cases).unwrap();
        assert_eq!(draft.plans.len(), 3);

        let cross = &draft.plans[0].plan;
        assert_eq!(cross.rationale_tag(), RationaleTag::SharedIndicators);
        assert_eq!(
            cross.focus(),
            &JurisdictionFocus::CrossBorder {
                jurisdictions: vec!["GB".into(), "US-CA".into()],
                shared_indicators: vec![wallet("0xabc")],
            }
        );
        assert_eq!(
            cross.rationale(),
            "Cross-border dossier: GB, US-CA linked by shared indicators wallet:0xabc"
        );
        assert!(cross.plan_id().as_str().starts_with("dossier-cross-border-"));

        let singles: Vec<String> = draft.plans[1..]
            .iter()
            .map(|p| p.plan.focus().key())
            .collect();
        assert_eq!(singles, vec!["NG".to_string(), "US-NY".to_string()]);
    }

    #[test]
    fn chained_component_splits_along_shared_indicators() {
        let policy = BundlePolicy::default()
            .with_grouping(GroupingRule::CrossBorder)
            .with_max_cases_per_plan(2);
        let (builder, _) = builder(policy);
        let cases = vec![
            case("a", "US-CA", 75_000, 3).with_indicator(wallet("w1")),
            case("c", "JP", 75_000, 2).with_indicator(wallet("w2")),
            case("b", "GB", 75_000, 1)
                .with_indicator(wallet("w1"))
                .with_indicator(wallet("w2")),
        ];
        let draft = builder.plan(&cases).unwrap();
        assert_eq!(draft.plans.len(), 2);

        let cross = &draft.plans[0].plan;
        assert_eq!(cross.case_ids(), &[CaseId::new("a"), CaseId::new("b")]);
        assert_eq!(
            cross.focus(),
            &JurisdictionFocus::CrossBorder {
                jurisdictions: vec!["GB".into(), "US-CA".into()],
                shared_indicators: vec![wallet("w1")],
            }
        );
        assert_eq!(
            cross.rationale(),
            "Cross-border dossier: GB, US-CA linked by shared indicators wallet:w1"
        );

        let single = &draft.plans[1].plan;
        assert_eq!(single.case_ids(), &[CaseId::new("c")]);
        assert_eq!(
            single.focus(),
            &JurisdictionFocus::Single {
                jurisdiction: "JP".into()
            }
        );
    }

    #[test]
    fn cross_border_only_leaves_unlinked_cases_ungrouped() {
        let policy = BundlePolicy::default()
            .with_grouping(GroupingRule::CrossBorder)
            .with_cross_border_only(true);
        let (builder, _) = builder(policy);
        let cases = vec![
            case("ca", "US-CA", 75_000, 2).with_indicator(wallet("0xabc")),
            case("gb", "GB", 65_000, 1).with_indicator(wallet("0xabc")),
            case("ca-2", "US-CA", 80_000, 1).with_indicator(wallet("0xdef")),
            case("ca-3", "US-CA", 80_000, 1).with_indicator(wallet("0xdef")),
        ];
        let draft = builder.plan(&cases).unwrap();
        assert_eq!(draft.plans.len(), 1);
        assert!(draft.plans[0].plan.focus().is_cross_border());
        assert_eq!(
            draft.ungrouped,
            vec![CaseId::new("ca-2"), CaseId::new("ca-3")]
        );
    }

    #[test]
    fn global_rule_makes_one_bundle() {
        let policy = BundlePolicy::default().with_grouping(GroupingRule::Global);
        let (builder, _) = builder(policy);
        let draft = builder
            .plan(&[
                case("a", "US-CA", 75_000, 2),
                case("b", "JP", 65_000, 1),
                case("c", "JP", 1, 1),
            ])
            .unwrap();
        assert_eq!(draft.plans.len(), 1);
        let proposed = &draft.plans[0];
        assert_eq!(proposed.plan.focus(), &JurisdictionFocus::Global);
        assert_eq!(proposed.warnings.len(), 1);
        assert!(proposed.plan.plan_id().as_str().starts_with("dossier-global-"));
    }

    #[test]
    fn rebundling_same_cases_is_deduplicated() {
        let (builder, store) = builder(BundlePolicy::default());
        let cases = vec![case("a", "AU", 75_000, 2), case("b", "AU", 55_000, 1)];
        let first = builder.build_and_enqueue(&cases).unwrap();
        let second = builder.build_and_enqueue(&cases).unwrap();
        assert_eq!(first.enqueued.len(), 1);
        assert!(second.enqueued.is_empty());
        assert_eq!(second.duplicates.len(), 1);
        assert_eq!(&second.duplicates[0].existing, first.enqueued[0].plan_id());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_result_is_valid_but_can_be_required() {
        let (builder, _) = builder(BundlePolicy::default());
        let outcome = builder
            .build_and_enqueue(&[case("small", "US-FL", 100, 1)])
            .unwrap();
        assert!(outcome.enqueued.is_empty());
        assert!(matches!(
            outcome.require_plans(),
            Err(DossierError::Validation(ValidationError::NoEligibleCases))
        ));
    }

    #[test]
    fn duplicate_candidates_are_rejected() {
        let (builder, _) = builder(BundlePolicy::default());
        let result = builder.plan(&[case("a", "IE", 75_000, 1), case("a", "IE", 75_000, 1)]);
        assert!(matches!(
            result,
            Err(DossierError::Validation(ValidationError::Malformed(_)))
        ));
    }

    proptest! {
        #[test]
        fn plans_only_hold_eligible_cases_once(
            specs in proptest::collection::vec((0usize..4, 0u64..200_000, 0i64..60, 0usize..3), 0..20)
        ) {
            let regions = ["US-CA", "GB", "JP", "NG"];
            let cases: Vec<Case> = specs
                .iter()
                .enumerate()
                .map(|(i, (r, loss, age, w))| {
                    case(&format!("p{i}"), regions[*r], *loss, *age)
                        .with_indicator(wallet(&format!("w{w}")))
                })
                .collect();
            let policy = BundlePolicy::default()
                .with_grouping(GroupingRule::CrossBorder)
                .with_max_cases_per_plan(3);
            let (builder, _) = builder(policy.clone());
            let draft = builder.plan(&cases).unwrap();

            let mut seen = HashSet::new();
            for proposed in &draft.plans {
                for id in proposed.plan.case_ids() {
                    prop_assert!(seen.insert(id.clone()));
                    let c = cases.iter().find(|c| &c.id == id).unwrap();
                    prop_assert!(c.loss_amount >= policy.min_loss());
                    prop_assert!(now() - c.timestamp <= policy.recency_window());
                }
            }
            prop_assert_eq!(seen.len() + draft.exclusions.len() + draft.ungrouped.len(), cases.len());
        }

        #[test]
        fn cross_border_plans_only_name_indicators_their_cases_share(
            specs in proptest::collection::vec((0usize..4, 0usize..4, 0usize..4), 0..16),
            max_cases in 1usize..4,
        ) {
            let regions = ["US-CA", "GB", "JP", "NG"];
            let cases: Vec<Case> = specs
                .iter()
                .enumerate()
                .map(|(i, (r, w1, w2))| {
                    case(&format!("p{i}"), regions[*r], 90_000, 1 + (i as i64 % 20))
                        .with_indicator(wallet(&format!("w{w1}")))
                        .with_indicator(wallet(&format!("w{w2}")))
                })
                .collect();
            let policy = BundlePolicy::default()
                .with_grouping(GroupingRule::CrossBorder)
                .with_max_cases_per_plan(max_cases);
            let (builder, _) = builder(policy);
            let draft = builder.plan(&cases).unwrap();

            for proposed in &draft.plans {
                let plan = &proposed.plan;
                prop_assert!(plan.case_ids().len() <= max_cases);
                if let JurisdictionFocus::CrossBorder { jurisdictions, shared_indicators } = plan.focus() {
                    prop_assert!(jurisdictions.len() >= 2);
                    prop_assert!(!shared_indicators.is_empty());
                    let members: Vec<&Case> = plan
                        .case_ids()
                        .iter()
                        .filter_map(|id| cases.iter().find(|c| &c.id == id))
                        .collect();
                    for indicator in shared_indicators {
                        let holders: BTreeSet<&Jurisdiction> = members
                            .iter()
                            .filter(|c| indicator_keys(c).contains(indicator))
                            .map(|c| &c.jurisdiction)
                            .collect();
                        prop_assert!(holders.len() >= 2);
                    }
                }
            }
        }
    }
}

//! Core types for the dossier pipeline
//!
//! Defines the fundamental types shared by every stage:
//! - Identifiers (plans, cases, executions)
//! - Jurisdictions, money and indicators
//! - Candidate cases and immutable dossier plans
//! - Plan status and the persisted plan record

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use dossier_artifact::ArtifactPath;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;
use ulid::Ulid;

/// UTC timestamp used everywhere in the pipeline
pub type Timestamp = DateTime<Utc>;

/// Plan identifier of the form `dossier-<jurisdiction-slug>-<ulid>`
///
/// Used as a directory name, so only `[A-Za-z0-9._-]` is accepted and the
/// first character may not be `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlanId(String);

impl PlanId {
    /// Generate a fresh identifier for a bundle scoped by `slug`
    #[must_use]
    pub fn generate(slug: &str) -> Self {
        Self(format!(
            "dossier-{}-{}",
            slug,
            Ulid::new().to_string().to_ascii_lowercase()
        ))
    }

    /// Parse and validate an existing identifier
    ///
    /// # Errors
    /// Returns error if the identifier is empty or unsafe as a directory name
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(raw))
        } else {
            Err(ValidationError::Malformed(format!("invalid plan id '{raw}'")))
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PlanId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PlanId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PlanId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<PlanId> for String {
    fn from(value: PlanId) -> Self {
        value.0
    }
}

/// External case identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(String);

impl CaseId {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CaseId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CaseId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Unique queue execution identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Ulid);

impl ExecutionId {
    /// Generate new execution ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ExecutionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static SLUG_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid"));

/// Jurisdiction code, normalised to upper case (`US-CA`, `GB`, `GLOBAL`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Jurisdiction(String);

impl Jurisdiction {
    /// Placeholder used when a case carries no jurisdiction
    pub const UNKNOWN: &'static str = "UNKNOWN";

    /// Normalise a raw jurisdiction code
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Self(Self::UNKNOWN.to_string())
        } else {
            Self(trimmed.to_ascii_uppercase())
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Country-level prefix (`US` for `US-CA`)
    #[must_use]
    pub fn region(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }

    /// Lower-case slug safe for identifiers and file names
    #[must_use]
    pub fn slug(&self) -> String {
        slugify(&self.0)
    }
}

/// Collapse anything outside `[a-z0-9]` into single dashes
#[must_use]
pub fn slugify(raw: &str) -> String {
    let lowered = raw.to_ascii_lowercase();
    let slug = SLUG_SEPARATORS.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug.to_string()
    }
}

impl Display for Jurisdiction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Jurisdiction {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for Jurisdiction {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Jurisdiction> for String {
    fn from(value: Jurisdiction) -> Self {
        value.0
    }
}

/// Fixed-point USD amount in cents
///
/// Serialized as an integer number of cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsdAmount(u64);

impl UsdAmount {
    pub const ZERO: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Whole dollars, saturating on overflow
    #[inline]
    #[must_use]
    pub const fn from_dollars(dollars: u64) -> Self {
        Self(dollars.saturating_mul(100))
    }

    #[inline]
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Approximate dollar value for chart scaling only
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Whole dollars with thousands separators, e.g. `$60,000`
    #[must_use]
    pub fn whole_dollars(&self) -> String {
        format!("${}", group_thousands(self.0 / 100))
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

impl Display for UsdAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", group_thousands(self.0 / 100), self.0 % 100)
    }
}

impl Add for UsdAmount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sum for UsdAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a UsdAmount> for UsdAmount {
    fn sum<I: Iterator<Item = &'a UsdAmount>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Indicator category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Wallet,
    Agent,
    Dataset,
    Email,
    Phone,
    Domain,
    Other,
}

impl IndicatorKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Wallet => "wallet",
            Self::Agent => "agent",
            Self::Dataset => "dataset",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Domain => "domain",
            Self::Other => "other",
        }
    }
}

/// Tagged indicator value attached to a case
///
/// Two indicators are the same link when their kinds match and their values
/// match after trimming and lower-casing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Indicator {
    pub kind: IndicatorKind,
    pub value: String,
}

impl Indicator {
    #[must_use]
    pub fn new(kind: IndicatorKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// Comparison form of this indicator
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            kind: self.kind,
            value: self.value.trim().to_lowercase(),
        }
    }

    /// Whether the value is blank after trimming
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.value.trim().is_empty()
    }
}

impl Display for Indicator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}

/// Candidate case supplied by the case source (read-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub jurisdiction: Jurisdiction,
    pub loss_amount: UsdAmount,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub indicators: Vec<Indicator>,
}

impl Case {
    #[must_use]
    pub fn new(
        id: impl Into<CaseId>,
        jurisdiction: impl Into<Jurisdiction>,
        loss_amount: UsdAmount,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            jurisdiction: jurisdiction.into(),
            loss_amount,
            timestamp,
            tags: Vec::new(),
            indicators: Vec::new(),
        }
    }

    /// With indicator
    #[must_use]
    pub fn with_indicator(mut self, indicator: Indicator) -> Self {
        self.indicators.push(indicator);
        self
    }

    /// With classification tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

impl From<String> for CaseId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Jurisdictional scope of a plan
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum JurisdictionFocus {
    /// All cases share one jurisdiction
    Single { jurisdiction: Jurisdiction },
    /// Cases from several jurisdictions linked through shared indicators
    CrossBorder {
        jurisdictions: Vec<Jurisdiction>,
        shared_indicators: Vec<Indicator>,
    },
    /// Aggregated across all jurisdictions
    Global,
}

impl JurisdictionFocus {
    /// Slug embedded in plan identifiers
    #[must_use]
    pub fn slug(&self) -> String {
        match self {
            Self::Single { jurisdiction } => jurisdiction.slug(),
            Self::CrossBorder { .. } => "cross-border".to_string(),
            Self::Global => "global".to_string(),
        }
    }

    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Single { jurisdiction } => jurisdiction.to_string(),
            Self::CrossBorder { jurisdictions, .. } => {
                let codes: Vec<&str> = jurisdictions.iter().map(Jurisdiction::as_str).collect();
                format!("Cross-border ({})", codes.join(", "))
            }
            Self::Global => "Global".to_string(),
        }
    }

    /// Key used for metrics labels and listing filters
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Single { jurisdiction } => jurisdiction.to_string(),
            Self::CrossBorder { .. } => "CROSS-BORDER".to_string(),
            Self::Global => "GLOBAL".to_string(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_cross_border(&self) -> bool {
        matches!(self, Self::CrossBorder { .. })
    }

    /// Whether a listing filter on `jurisdiction` should include this focus
    #[must_use]
    pub fn covers(&self, jurisdiction: &Jurisdiction) -> bool {
        match self {
            Self::Single { jurisdiction: own } => own == jurisdiction,
            Self::CrossBorder { jurisdictions, .. } => jurisdictions.contains(jurisdiction),
            Self::Global => jurisdiction.as_str() == "GLOBAL",
        }
    }
}

/// Why a set of cases was bundled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RationaleTag {
    /// High-loss recent cases in one jurisdiction
    HighLossJurisdiction,
    /// Cases linked across borders by shared indicators
    SharedIndicators,
    /// High-loss cases aggregated across all jurisdictions
    GlobalAggregate,
}

impl RationaleTag {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HighLossJurisdiction => "high-loss-jurisdiction",
            Self::SharedIndicators => "shared-indicators",
            Self::GlobalAggregate => "global-aggregate",
        }
    }
}

impl Display for RationaleTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digest of a plan's sorted case set and rationale, used for dedup
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleFingerprint(String);

impl BundleFingerprint {
    /// Compute from a case set and rationale tag (order-insensitive)
    #[must_use]
    pub fn compute<'a>(cases: impl IntoIterator<Item = &'a CaseId>, tag: RationaleTag) -> Self {
        let mut ids: Vec<&str> = cases.into_iter().map(CaseId::as_str).collect();
        ids.sort_unstable();
        ids.dedup();
        let mut hasher = Sha256::new();
        for id in ids {
            hasher.update(id.as_bytes());
            hasher.update([0]);
        }
        hasher.update(tag.as_str().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Rebuild from a stored value
    #[must_use]
    pub fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Immutable dossier blueprint
///
/// # Invariants
/// - `case_ids` is non-empty and free of duplicates
/// - Never modified after creation; re-bundling produces a new plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DossierPlan {
    plan_id: PlanId,
    case_ids: Vec<CaseId>,
    focus: JurisdictionFocus,
    rationale_tag: RationaleTag,
    rationale: String,
    created_at: Timestamp,
    total_loss: UsdAmount,
}

impl DossierPlan {
    /// Create new plan
    ///
    /// # Errors
    /// Returns [`ValidationError::EmptyCaseSet`] when `case_ids` is empty and
    /// [`ValidationError::Malformed`] when it contains duplicates or a
    /// cross-border focus names no shared indicator
    pub fn new(
        plan_id: PlanId,
        case_ids: Vec<CaseId>,
        focus: JurisdictionFocus,
        rationale_tag: RationaleTag,
        rationale: impl Into<String>,
        created_at: Timestamp,
        total_loss: UsdAmount,
    ) -> Result<Self, ValidationError> {
        if case_ids.is_empty() {
            return Err(ValidationError::EmptyCaseSet);
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = case_ids.iter().find(|id| !seen.insert(*id)) {
            return Err(ValidationError::Malformed(format!(
                "case {dup} listed twice"
            )));
        }
        if let JurisdictionFocus::CrossBorder {
            shared_indicators, ..
        } = &focus
        {
            if shared_indicators.is_empty() {
                return Err(ValidationError::Malformed(
                    "cross-border plan names no shared indicator".into(),
                ));
            }
        }
        Ok(Self {
            plan_id,
            case_ids,
            focus,
            rationale_tag,
            rationale: rationale.into(),
            created_at,
            total_loss,
        })
    }

    #[inline]
    #[must_use]
    pub fn plan_id(&self) -> &PlanId {
        &self.plan_id
    }

    #[inline]
    #[must_use]
    pub fn case_ids(&self) -> &[CaseId] {
        &self.case_ids
    }

    #[inline]
    #[must_use]
    pub fn focus(&self) -> &JurisdictionFocus {
        &self.focus
    }

    #[inline]
    #[must_use]
    pub fn rationale_tag(&self) -> RationaleTag {
        self.rationale_tag
    }

    #[inline]
    #[must_use]
    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    #[inline]
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    #[inline]
    #[must_use]
    pub fn total_loss(&self) -> UsdAmount {
        self.total_loss
    }

    /// Dedup fingerprint of this plan
    #[must_use]
    pub fn fingerprint(&self) -> BundleFingerprint {
        BundleFingerprint::compute(&self.case_ids, self.rationale_tag)
    }
}

/// Plan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PlanStatus {
    pub const ALL: [Self; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl Display for PlanStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ValidationError::Malformed(format!("unknown status '{other}'"))),
        }
    }
}

/// Locations of a completed plan's outputs, relative to the artifact root
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanOutputs {
    /// Every generated artifact (markdown, JSON manifest, assets)
    pub artifacts: Vec<ArtifactPath>,
    /// The JSON manifest
    pub manifest_path: Option<ArtifactPath>,
    /// The signature manifest
    pub signature_path: Option<ArtifactPath>,
}

/// Persisted envelope around an immutable plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub plan: DossierPlan,
    pub fingerprint: BundleFingerprint,
    pub status: PlanStatus,
    pub warnings: Vec<String>,
    pub last_error: Option<String>,
    pub attempts: u32,
    pub queued_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub outputs: PlanOutputs,
}

impl PlanRecord {
    /// Fresh pending record
    #[must_use]
    pub fn pending(plan: DossierPlan, warnings: Vec<String>, now: Timestamp) -> Self {
        let fingerprint = plan.fingerprint();
        Self {
            plan,
            fingerprint,
            status: PlanStatus::Pending,
            warnings,
            last_error: None,
            attempts: 0,
            queued_at: now,
            updated_at: now,
            outputs: PlanOutputs::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn plan_id(&self) -> &PlanId {
        self.plan.plan_id()
    }
}

/// Plan listing filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanQuery {
    pub status: Option<PlanStatus>,
    pub jurisdiction: Option<Jurisdiction>,
    pub limit: usize,
}

impl PlanQuery {
    /// Default row limit
    pub const DEFAULT_LIMIT: usize = 50;

    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With status filter
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: PlanStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// With jurisdiction filter
    #[inline]
    #[must_use]
    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<Jurisdiction>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    /// With row limit
    #[inline]
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether `record` passes the status and jurisdiction filters
    #[must_use]
    pub fn matches(&self, record: &PlanRecord) -> bool {
        self.status.map_or(true, |s| s == record.status)
            && self
                .jurisdiction
                .as_ref()
                .map_or(true, |j| record.plan.focus().covers(j))
    }
}

impl Default for PlanQuery {
    fn default() -> Self {
        Self {
            status: None,
            jurisdiction: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn plan_id_format_and_validation() {
        let id = PlanId::generate("us-ca");
        assert!(id.as_str().starts_with("dossier-us-ca-"));
        assert_eq!(id.as_str().len(), "dossier-us-ca-".len() + 26);
        assert!(PlanId::parse("../etc").is_err());
        assert!(PlanId::parse("").is_err());
        assert!(PlanId::parse("a/b").is_err());
        assert!(PlanId::parse("dossier-gb-01").is_ok());
    }

    #[test]
    fn plan_ids_are_unique() {
        assert_ne!(PlanId::generate("gb"), PlanId::generate("gb"));
    }

    #[test]
    fn jurisdiction_normalises() {
        let j = Jurisdiction::new(" us-ca ");
        assert_eq!(j.as_str(), "US-CA");
        assert_eq!(j.region(), "US");
        assert_eq!(j.slug(), "us-ca");
        assert_eq!(Jurisdiction::new("").as_str(), Jurisdiction::UNKNOWN);
        assert_eq!(slugify("Cross Border / EU"), "cross-border-eu");
        assert_eq!(slugify("***"), "unknown");
    }

    #[test]
    fn usd_display() {
        assert_eq!(UsdAmount::from_dollars(60_000).to_string(), "$60,000.00");
        assert_eq!(UsdAmount::from_cents(123_456_789).to_string(), "$1,234,567.89");
        assert_eq!(UsdAmount::from_cents(5).to_string(), "$0.05");
        assert_eq!(UsdAmount::from_dollars(180_000).whole_dollars(), "$180,000");
        let total: UsdAmount = [UsdAmount::from_dollars(1), UsdAmount::from_dollars(2)]
            .iter()
            .sum();
        assert_eq!(total, UsdAmount::from_dollars(3));
    }

    #[test]
    fn indicator_normalization() {
        let a = Indicator::new(IndicatorKind::Wallet, "  0xABC ");
        let b = Indicator::new(IndicatorKind::Wallet, "0xabc");
        assert_eq!(a.normalized(), b.normalized());
        assert_ne!(
            a.normalized(),
            Indicator::new(IndicatorKind::Email, "0xabc").normalized()
        );
    }

    #[test]
    fn plan_rejects_empty_and_duplicate_cases() {
        let focus = JurisdictionFocus::Global;
        let empty = DossierPlan::new(
            PlanId::generate("global"),
            vec![],
            focus.clone(),
            RationaleTag::GlobalAggregate,
            "r",
            ts(),
            UsdAmount::ZERO,
        );
        assert!(matches!(empty, Err(ValidationError::EmptyCaseSet)));

        let dup = DossierPlan::new(
            PlanId::generate("global"),
            vec![CaseId::new("a"), CaseId::new("a")],
            focus,
            RationaleTag::GlobalAggregate,
            "r",
            ts(),
            UsdAmount::ZERO,
        );
        assert!(matches!(dup, Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn cross_border_plan_must_name_a_shared_indicator() {
        let unlinked = DossierPlan::new(
            PlanId::generate("cross-border"),
            vec![CaseId::new("a"), CaseId::new("b")],
            JurisdictionFocus::CrossBorder {
                jurisdictions: vec!["JP".into(), "US-CA".into()],
                shared_indicators: vec![],
            },
            RationaleTag::SharedIndicators,
            "r",
            ts(),
            UsdAmount::ZERO,
        );
        assert!(matches!(unlinked, Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn fingerprint_ignores_order_and_id() {
        let a = BundleFingerprint::compute(
            &[CaseId::new("c2"), CaseId::new("c1")],
            RationaleTag::HighLossJurisdiction,
        );
        let b = BundleFingerprint::compute(
            &[CaseId::new("c1"), CaseId::new("c2")],
            RationaleTag::HighLossJurisdiction,
        );
        let c = BundleFingerprint::compute(
            &[CaseId::new("c1"), CaseId::new("c2")],
            RationaleTag::SharedIndicators,
        );
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn focus_serializes_tagged() {
        let focus = JurisdictionFocus::CrossBorder {
            jurisdictions: vec!["US-CA".into(), "GB".into()],
            shared_indicators: vec![Indicator::new(IndicatorKind::Wallet, "0xabc")],
        };
        let json = serde_json::to_value(&focus).unwrap();
        assert_eq!(json["mode"], "cross_border");
        assert!(focus.covers(&"GB".into()));
        assert!(!focus.covers(&"US-NY".into()));
        assert_eq!(focus.slug(), "cross-border");
        assert_eq!(focus.label(), "Cross-border (US-CA, GB)");
    }

    #[test]
    fn status_round_trip() {
        for status in PlanStatus::ALL {
            assert_eq!(status.as_str().parse::<PlanStatus>().unwrap(), status);
        }
        assert!("leased".parse::<PlanStatus>().is_err());
    }

    #[test]
    fn query_matches_filters() {
        let plan = DossierPlan::new(
            PlanId::generate("us-ca"),
            vec![CaseId::new("a")],
            JurisdictionFocus::Single {
                jurisdiction: "US-CA".into(),
            },
            RationaleTag::HighLossJurisdiction,
            "r",
            ts(),
            UsdAmount::from_dollars(60_000),
        )
        .unwrap();
        let record = PlanRecord::pending(plan, vec![], ts());
        assert!(PlanQuery::new().matches(&record));
        assert!(PlanQuery::new()
            .with_status(PlanStatus::Pending)
            .with_jurisdiction("us-ca")
            .matches(&record));
        assert!(!PlanQuery::new().with_status(PlanStatus::Failed).matches(&record));
        assert!(!PlanQuery::new().with_jurisdiction("GB").matches(&record));
    }
}

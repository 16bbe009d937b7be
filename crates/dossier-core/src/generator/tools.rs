//! Deterministic analysis tools run during generation
//!
//! Each [`DossierTool`] turns the plan, its context and analysis into a JSON
//! payload. A failing tool is recorded in [`ToolResults::errors`] with a
//! warning; it never aborts generation.

use super::analysis::PlanAnalysis;
use super::visuals::VisualAssets;
use crate::cases::{push_unique, DossierContext};
use crate::error::RenderError;
use crate::types::DossierPlan;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::warn;

/// Everything a tool may read
#[derive(Debug, Clone, Copy)]
pub struct ToolInput<'a> {
    pub plan: &'a DossierPlan,
    pub context: &'a DossierContext,
    pub analysis: &'a PlanAnalysis,
    pub assets: &'a VisualAssets,
}

/// Payload produced by one tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub payload: Value,
    pub warnings: Vec<String>,
}

impl ToolOutput {
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            warnings: Vec::new(),
        }
    }
}

/// A pluggable analysis step
pub trait DossierTool: Send + Sync + Debug {
    /// Stable name; keys the output in the manifest
    fn name(&self) -> &'static str;

    /// # Errors
    /// Returns [`RenderError`] if the tool cannot produce its payload
    fn run(&self, input: &ToolInput<'_>) -> Result<ToolOutput, RenderError>;
}

/// Aggregated tool results, keyed by tool name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResults {
    pub outputs: BTreeMap<String, Value>,
    pub warnings: Vec<String>,
    pub errors: BTreeMap<String, String>,
}

impl ToolResults {
    #[must_use]
    pub fn output(&self, tool: &str) -> Option<&Value> {
        self.outputs.get(tool)
    }
}

/// Ordered set of tools
#[derive(Debug, Clone)]
pub struct ToolSuite {
    tools: Vec<Arc<dyn DossierTool>>,
}

impl Default for ToolSuite {
    fn default() -> Self {
        Self::standard(30)
    }
}

impl ToolSuite {
    /// The built-in tools; `timeline_limit` caps synthesized events
    #[must_use]
    pub fn standard(timeline_limit: usize) -> Self {
        Self {
            tools: vec![
                Arc::new(GeoReasoner),
                Arc::new(TimelineSynthesizer {
                    limit: timeline_limit,
                }),
                Arc::new(EntityGraph),
                Arc::new(ChartCatalog),
                Arc::new(NarrativeSummary),
            ],
        }
    }

    #[must_use]
    pub fn new(tools: Vec<Arc<dyn DossierTool>>) -> Self {
        Self { tools }
    }

    /// Run every tool in order, collecting payloads, errors and warnings
    #[must_use]
    pub fn run(&self, input: &ToolInput<'_>) -> ToolResults {
        let mut results = ToolResults::default();
        for tool in &self.tools {
            match tool.run(input) {
                Ok(output) => {
                    for warning in output.warnings {
                        push_unique(&mut results.warnings, warning);
                    }
                    results.outputs.insert(tool.name().to_string(), output.payload);
                }
                Err(e) => {
                    warn!(tool = tool.name(), error = %e, "dossier tool failed");
                    results.errors.insert(tool.name().to_string(), e.to_string());
                    push_unique(&mut results.warnings, format!("{} failed: {e}", tool.name()));
                }
            }
        }
        results
    }
}

fn ranked<K: Ord + Clone>(counts: &BTreeMap<K, usize>, top: usize) -> Vec<(K, usize)> {
    let mut pairs: Vec<(K, usize)> = counts.iter().map(|(k, n)| (k.clone(), *n)).collect();
    // BTreeMap order breaks ties by key
    pairs.sort_by(|a, b| b.1.cmp(&a.1));
    pairs.truncate(top);
    pairs
}

/// Jurisdiction mix and cross-border hints
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoReasoner;

impl DossierTool for GeoReasoner {
    fn name(&self) -> &'static str {
        "geo_reasoner"
    }

    fn run(&self, input: &ToolInput<'_>) -> Result<ToolOutput, RenderError> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for case in input.context.resolved_cases() {
            *counts.entry(case.jurisdiction.to_string()).or_default() += 1;
        }
        let primary: Vec<String> = ranked(&counts, 5).into_iter().map(|(j, _)| j).collect();
        Ok(ToolOutput::new(json!({
            "jurisdiction_counts": counts,
            "primary_regions": primary,
            "cross_border_cases": input.analysis.cross_border_cases,
        })))
    }
}

/// Time-ordered events with a one-line summary per case
#[derive(Debug, Clone, Copy)]
pub struct TimelineSynthesizer {
    pub limit: usize,
}

impl DossierTool for TimelineSynthesizer {
    fn name(&self) -> &'static str {
        "timeline_synthesizer"
    }

    fn run(&self, input: &ToolInput<'_>) -> Result<ToolOutput, RenderError> {
        let mut events: Vec<(_, Value)> = input
            .context
            .cases
            .iter()
            .filter_map(|ctx| ctx.case.as_ref().map(|case| (ctx, case)))
            .map(|(ctx, case)| {
                let summary = match &ctx.review {
                    Some(review) if !review.summary.trim().is_empty() => review.summary.clone(),
                    _ if !case.indicators.is_empty() => {
                        let preview: Vec<String> = case
                            .indicators
                            .iter()
                            .take(2)
                            .map(ToString::to_string)
                            .collect();
                        format!("Linked indicators: {}", preview.join(", "))
                    }
                    _ => format!("Loss recorded: {}", case.loss_amount),
                };
                (
                    (case.timestamp, case.id.clone()),
                    json!({
                        "timestamp": case.timestamp.to_rfc3339(),
                        "case_id": case.id,
                        "summary": summary,
                        "loss_amount": case.loss_amount.to_string(),
                    }),
                )
            })
            .collect();
        events.sort_by(|a, b| a.0.cmp(&b.0));
        events.truncate(self.limit);

        let mut output = ToolOutput::new(json!({
            "events": events.into_iter().map(|(_, e)| e).collect::<Vec<_>>(),
        }));
        if output.payload["events"].as_array().is_some_and(Vec::is_empty) {
            output
                .warnings
                .push("No resolved cases were available for the timeline".to_string());
        }
        Ok(output)
    }
}

/// Indicator → case adjacency for overlap visualisation
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityGraph;

impl DossierTool for EntityGraph {
    fn name(&self) -> &'static str {
        "entity_graph"
    }

    fn run(&self, input: &ToolInput<'_>) -> Result<ToolOutput, RenderError> {
        let mut adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for case in input.context.resolved_cases() {
            for indicator in case.indicators.iter().filter(|i| !i.is_blank()) {
                adjacency
                    .entry(indicator.normalized().to_string())
                    .or_default()
                    .insert(case.id.to_string());
            }
        }
        let counts: BTreeMap<String, usize> = adjacency
            .iter()
            .map(|(entity, cases)| (entity.clone(), cases.len()))
            .collect();
        let clusters: Vec<Value> = ranked(&counts, 5)
            .into_iter()
            .map(|(entity, count)| json!({ "entity": entity, "count": count }))
            .collect();
        Ok(ToolOutput::new(json!({
            "entities": adjacency,
            "entity_count": adjacency.len(),
            "top_clusters": clusters,
        })))
    }
}

/// Exposes the rendered visual assets to the document
#[derive(Debug, Clone, Copy, Default)]
pub struct ChartCatalog;

impl DossierTool for ChartCatalog {
    fn name(&self) -> &'static str {
        "chart_renderer"
    }

    fn run(&self, input: &ToolInput<'_>) -> Result<ToolOutput, RenderError> {
        Ok(ToolOutput::new(serde_json::to_value(input.assets.summary())?))
    }
}

/// Deterministic narrative paragraph and recommendation
#[derive(Debug, Clone, Copy, Default)]
pub struct NarrativeSummary;

impl NarrativeSummary {
    fn summary(input: &ToolInput<'_>) -> String {
        let date = |ts: Option<crate::types::Timestamp>| {
            ts.map_or_else(|| "unknown".to_string(), |t| t.format("%Y-%m-%d").to_string())
        };
        format!(
            "{} high-loss cases tied to {} generated {} in reported loss between {} and {}.",
            input.analysis.case_count,
            input.plan.focus().label(),
            input.analysis.total_loss.whole_dollars(),
            date(input.analysis.earliest),
            date(input.analysis.latest),
        )
    }
}

impl DossierTool for NarrativeSummary {
    fn name(&self) -> &'static str {
        "narrative_report"
    }

    fn run(&self, input: &ToolInput<'_>) -> Result<ToolOutput, RenderError> {
        let cross_border = input.plan.focus().is_cross_border();
        let recommendation = if cross_border {
            "Escalate to cross-border task force with immediate signature verification."
        } else {
            "Share dossier with regional investigators and request subpoena follow-up."
        };
        Ok(ToolOutput::new(json!({
            "summary": Self::summary(input),
            "risk_level": if cross_border { "elevated" } else { "standard" },
            "recommendation": recommendation,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::{InMemoryCaseSource, ReviewNote};
    use crate::types::{
        Case, CaseId, Indicator, IndicatorKind, JurisdictionFocus, PlanId, RationaleTag,
        Timestamp, UsdAmount,
    };
    use chrono::{TimeZone, Utc};

    #[derive(Debug)]
    struct Broken;

    impl DossierTool for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn run(&self, _input: &ToolInput<'_>) -> Result<ToolOutput, RenderError> {
            Err(RenderError::Context("index offline".into()))
        }
    }

    fn ts(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 2, day, 0, 0, 0).unwrap()
    }

    fn fixture() -> (DossierPlan, DossierContext) {
        let mut source = InMemoryCaseSource::from_cases([
            Case::new("late", "US-CA", UsdAmount::from_dollars(60_000), ts(9))
                .with_indicator(Indicator::new(IndicatorKind::Wallet, "0xaa"))
                .with_indicator(Indicator::new(IndicatorKind::Agent, "bot-7"))
                .with_indicator(Indicator::new(IndicatorKind::Email, "e@x.io")),
            Case::new("early", "US-CA", UsdAmount::from_dollars(120_000), ts(2))
                .with_indicator(Indicator::new(IndicatorKind::Wallet, "0xAA")),
            Case::new("bare", "US-CA", UsdAmount::from_dollars(50_000), ts(5)),
        ]);
        source.insert_review(
            CaseId::new("early"),
            ReviewNote {
                summary: "Romance scam confirmed".into(),
                reviewer: Some("analyst-2".into()),
            },
        );
        let plan = DossierPlan::new(
            PlanId::parse("dossier-us-ca-t").unwrap(),
            vec!["late".into(), "early".into(), "bare".into()],
            JurisdictionFocus::Single {
                jurisdiction: "US-CA".into(),
            },
            RationaleTag::HighLossJurisdiction,
            "r",
            ts(10),
            UsdAmount::from_dollars(230_000),
        )
        .unwrap();
        let context = DossierContext::load(&source, &plan).unwrap();
        (plan, context)
    }

    fn run_suite(suite: &ToolSuite) -> ToolResults {
        let (plan, context) = fixture();
        let analysis = PlanAnalysis::compute(&plan, &context, 10);
        let assets = VisualAssets::default();
        suite.run(&ToolInput {
            plan: &plan,
            context: &context,
            analysis: &analysis,
            assets: &assets,
        })
    }

    #[test]
    fn standard_tools_produce_payloads() {
        let results = run_suite(&ToolSuite::default());
        assert!(results.errors.is_empty());
        assert_eq!(results.outputs.len(), 5);
        assert_eq!(
            results.output("chart_renderer").unwrap()["timeline_chart"],
            serde_json::Value::Null
        );

        let geo = results.output("geo_reasoner").unwrap();
        assert_eq!(geo["jurisdiction_counts"]["US-CA"], 3);
        assert_eq!(geo["primary_regions"][0], "US-CA");

        let events = results.output("timeline_synthesizer").unwrap()["events"]
            .as_array()
            .unwrap()
            .clone();
        let order: Vec<&str> = events.iter().map(|e| e["case_id"].as_str().unwrap()).collect();
        assert_eq!(order, vec!["early", "bare", "late"]);
        assert_eq!(events[0]["summary"], "Romance scam confirmed");
        assert_eq!(events[1]["summary"], "Loss recorded: $50,000.00");
        assert_eq!(events[2]["summary"], "Linked indicators: wallet:0xaa, agent:bot-7");

        let graph = results.output("entity_graph").unwrap();
        assert_eq!(graph["entity_count"], 3);
        assert_eq!(graph["top_clusters"][0]["entity"], "wallet:0xaa");
        assert_eq!(graph["top_clusters"][0]["count"], 2);

        let narrative = results.output("narrative_report").unwrap();
        assert_eq!(
            narrative["summary"],
            "3 high-loss cases tied to US-CA generated $230,000 in reported loss between 2025-02-02 and 2025-02-09."
        );
        assert_eq!(narrative["risk_level"], "standard");
    }

    #[test]
    fn failing_tool_is_recorded_not_fatal() {
        let suite = ToolSuite::new(vec![Arc::new(Broken), Arc::new(GeoReasoner)]);
        let results = run_suite(&suite);
        assert_eq!(
            results.errors.get("broken").map(String::as_str),
            Some("case context unavailable: index offline")
        );
        assert_eq!(
            results.warnings,
            vec!["broken failed: case context unavailable: index offline".to_string()]
        );
        assert!(results.output("geo_reasoner").is_some());
    }

    #[test]
    fn timeline_limit_caps_events() {
        let results = run_suite(&ToolSuite::standard(1));
        let events = results.output("timeline_synthesizer").unwrap()["events"]
            .as_array()
            .unwrap()
            .len();
        assert_eq!(events, 1);
    }
}

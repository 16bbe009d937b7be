//! Markdown rendering
//!
//! Rendering is a pure function of [`RenderInput`]: the same input always
//! yields the same bytes. Dates inside the document come from the plan's
//! creation time, never from a clock.

use super::analysis::PlanAnalysis;
use super::tools::ToolResults;
use super::visuals::AssetSummary;
use crate::cases::DossierContext;
use crate::error::RenderError;
use crate::types::DossierPlan;
use std::fmt::Write as _;

/// Everything the renderer may read
#[derive(Debug, Clone)]
pub struct RenderInput {
    pub plan: DossierPlan,
    pub context: DossierContext,
    pub analysis: PlanAnalysis,
    pub tools: ToolResults,
    pub assets: AssetSummary,
    /// Warnings collected before rendering, listed in the appendix
    pub warnings: Vec<String>,
}

/// Rendered document plus rendering warnings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMarkdown {
    pub markdown: String,
    pub warnings: Vec<String>,
    /// Names of the sections that produced output, in order
    pub sections: Vec<String>,
}

/// Turns a plan and its context into a markdown document
#[cfg_attr(test, mockall::automock)]
pub trait DossierRenderer: Send + Sync {
    /// # Errors
    /// Returns [`RenderError`] if the document cannot be produced
    fn render(&self, input: &RenderInput) -> Result<RenderedMarkdown, RenderError>;
}

/// Named document section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Cover,
    Analysis,
    Timeline,
    Entities,
    Appendix,
}

impl Section {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cover => "cover",
            Self::Analysis => "analysis",
            Self::Timeline => "timeline",
            Self::Entities => "entities",
            Self::Appendix => "appendix",
        }
    }

    fn render(self, input: &RenderInput) -> String {
        match self {
            Self::Cover => cover(input),
            Self::Analysis => analysis(input),
            Self::Timeline => timeline(input),
            Self::Entities => entities(input),
            Self::Appendix => appendix(input),
        }
    }
}

/// A section and whether its absence is worth a warning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionSpec {
    pub section: Section,
    pub required: bool,
}

impl SectionSpec {
    #[must_use]
    pub const fn required(section: Section) -> Self {
        Self {
            section,
            required: true,
        }
    }

    #[must_use]
    pub const fn optional(section: Section) -> Self {
        Self {
            section,
            required: false,
        }
    }
}

/// Default renderer: composes sections in order, joined by blank lines
#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    sections: Vec<SectionSpec>,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self {
            sections: vec![
                SectionSpec::required(Section::Cover),
                SectionSpec::required(Section::Analysis),
                SectionSpec::optional(Section::Timeline),
                SectionSpec::optional(Section::Entities),
                SectionSpec::required(Section::Appendix),
            ],
        }
    }
}

impl MarkdownRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a custom section list
    #[must_use]
    pub fn with_sections(sections: Vec<SectionSpec>) -> Self {
        Self { sections }
    }
}

impl DossierRenderer for MarkdownRenderer {
    fn render(&self, input: &RenderInput) -> Result<RenderedMarkdown, RenderError> {
        let mut parts = Vec::with_capacity(self.sections.len());
        let mut sections = Vec::new();
        let mut warnings = Vec::new();
        for spec in &self.sections {
            let rendered = spec.section.render(input);
            let trimmed = rendered.trim();
            if trimmed.is_empty() {
                if spec.required {
                    warnings.push(format!(
                        "Section '{}' produced empty output",
                        spec.section.name()
                    ));
                }
                continue;
            }
            parts.push(trimmed.to_string());
            sections.push(spec.section.name().to_string());
        }
        if parts.is_empty() {
            return Err(RenderError::Section {
                section: "document".into(),
                message: "no section produced output".into(),
            });
        }
        let mut markdown = parts.join("\n\n");
        markdown.push('\n');
        Ok(RenderedMarkdown {
            markdown,
            warnings,
            sections,
        })
    }
}

/// Escape a value for use inside a table cell
fn cell(raw: &str) -> String {
    raw.replace('|', "\\|").replace('\n', " ")
}

fn cover(input: &RenderInput) -> String {
    let plan = &input.plan;
    let mut out = String::new();
    let _ = writeln!(out, "# Evidence Dossier: {}", plan.plan_id());
    out.push('\n');
    let _ = writeln!(out, "- **Focus:** {}", plan.focus().label());
    let _ = writeln!(out, "- **Rationale:** {}", plan.rationale());
    let _ = writeln!(out, "- **Rationale tag:** `{}`", plan.rationale_tag());
    let _ = writeln!(
        out,
        "- **Prepared:** {}",
        plan.created_at().format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(out, "- **Cases:** {}", plan.case_ids().len());
    let _ = writeln!(out, "- **Total reported loss:** {}", plan.total_loss());
    out
}

fn analysis(input: &RenderInput) -> String {
    let analysis: &PlanAnalysis = &input.analysis;
    let mut out = String::from("## Analysis\n\n");
    if let Some(summary) = input
        .tools
        .output("narrative_report")
        .and_then(|n| n["summary"].as_str())
    {
        let _ = writeln!(out, "{summary}\n");
    }
    if let Some(recommendation) = input
        .tools
        .output("narrative_report")
        .and_then(|n| n["recommendation"].as_str())
    {
        let _ = writeln!(out, "**Recommendation:** {recommendation}\n");
    }

    if !analysis.loss_by_jurisdiction.is_empty() {
        out.push_str("| Jurisdiction | Reported loss |\n|---|---:|\n");
        for (jurisdiction, loss) in &analysis.loss_by_jurisdiction {
            let _ = writeln!(out, "| {} | {loss} |", cell(jurisdiction.as_str()));
        }
        out.push('\n');
    }

    let cross: Vec<&str> = analysis.cross_border_cases.iter().map(|c| c.as_str()).collect();
    let _ = writeln!(
        out,
        "**Cross-border cases:** {}\n",
        if cross.is_empty() {
            "none identified".to_string()
        } else {
            cross.join(", ")
        }
    );

    if !analysis.top_indicators.is_empty() {
        out.push_str("### Top indicators\n\n");
        for freq in &analysis.top_indicators {
            let noun = if freq.count == 1 { "case" } else { "cases" };
            let _ = writeln!(out, "- `{}` ({} {noun})", freq.indicator, freq.count);
        }
    }
    out
}

fn timeline(input: &RenderInput) -> String {
    let Some(events) = input
        .tools
        .output("timeline_synthesizer")
        .and_then(|t| t["events"].as_array())
        .filter(|e| !e.is_empty())
    else {
        return String::new();
    };
    let mut out = String::from("## Timeline\n\n| Date | Case | Summary | Loss |\n|---|---|---|---:|\n");
    for event in events {
        let date = event["timestamp"].as_str().unwrap_or_default();
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            cell(date.get(..10).unwrap_or(date)),
            cell(event["case_id"].as_str().unwrap_or_default()),
            cell(event["summary"].as_str().unwrap_or_default()),
            cell(event["loss_amount"].as_str().unwrap_or_default()),
        );
    }
    out
}

fn entities(input: &RenderInput) -> String {
    let Some(entities) = input
        .tools
        .output("entity_graph")
        .and_then(|g| g["entities"].as_object())
        .filter(|e| !e.is_empty())
    else {
        return String::new();
    };
    let mut out = String::from("## Linked Entities\n\n");
    for (entity, cases) in entities {
        let ids: Vec<&str> = cases
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        let _ = writeln!(out, "- `{entity}`: {}", ids.join(", "));
    }
    out
}

fn appendix(input: &RenderInput) -> String {
    let mut out = String::from("## Appendix\n\n### Cases\n\n");
    out.push_str("| Case | Jurisdiction | Loss | Recorded | Review |\n|---|---|---:|---|---|\n");
    for ctx in &input.context.cases {
        let review = ctx
            .review
            .as_ref()
            .map_or("n/a", |r| r.summary.as_str());
        match &ctx.case {
            Some(case) => {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} |",
                    cell(case.id.as_str()),
                    cell(case.jurisdiction.as_str()),
                    case.loss_amount,
                    case.timestamp.format("%Y-%m-%d"),
                    cell(review),
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "| {} | unresolved | n/a | n/a | {} |",
                    cell(ctx.case_id.as_str()),
                    cell(review)
                );
            }
        }
    }

    let assets = [
        ("Loss timeline chart", &input.assets.timeline_chart),
        ("GeoJSON", &input.assets.geojson),
        ("Geo map", &input.assets.geo_map),
        ("Timeline events", &input.assets.timeline_events),
    ];
    if assets.iter().any(|(_, p)| p.is_some()) {
        out.push_str("\n### Assets\n\n");
        for (label, path) in assets {
            if let Some(path) = path {
                let _ = writeln!(out, "- {label}: `{path}`");
            }
        }
    }

    if !input.warnings.is_empty() {
        out.push_str("\n### Warnings\n\n");
        for warning in &input.warnings {
            let _ = writeln!(out, "- {warning}");
        }
    }

    if !input.tools.errors.is_empty() {
        out.push_str("\n### Tool errors\n\n");
        for (tool, error) in &input.tools.errors {
            let _ = writeln!(out, "- `{tool}`: {error}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::{InMemoryCaseSource, ReviewNote};
    use crate::generator::tools::{ToolInput, ToolSuite};
    use crate::generator::visuals::VisualAssets;
    use crate::types::{Case, CaseId, JurisdictionFocus, PlanId, RationaleTag, UsdAmount};
    use chrono::{TimeZone, Utc};
    use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag};

    fn input() -> RenderInput {
        let created = Utc.with_ymd_and_hms(2025, 7, 4, 15, 30, 0).unwrap();
        let mut source = InMemoryCaseSource::from_cases([
            Case::new("a|1", "US-TX", UsdAmount::from_dollars(60_000), created),
            Case::new("b", "US-TX", UsdAmount::from_dollars(75_000), created),
        ]);
        source.insert_review(
            CaseId::new("b"),
            ReviewNote {
                summary: "Invoice fraud".into(),
                reviewer: None,
            },
        );
        let plan = DossierPlan::new(
            PlanId::parse("dossier-us-tx-r").unwrap(),
            vec!["a|1".into(), "b".into()],
            JurisdictionFocus::Single {
                jurisdiction: "US-TX".into(),
            },
            RationaleTag::HighLossJurisdiction,
            "US-TX dossier (2 cases, shared entities)",
            created,
            UsdAmount::from_dollars(135_000),
        )
        .unwrap();
        let context = DossierContext::load(&source, &plan).unwrap();
        let analysis = PlanAnalysis::compute(&plan, &context, 10);
        let assets = VisualAssets::default();
        let tools = ToolSuite::default().run(&ToolInput {
            plan: &plan,
            context: &context,
            analysis: &analysis,
            assets: &assets,
        });
        RenderInput {
            warnings: context.warnings.clone(),
            plan,
            context,
            analysis,
            tools,
            assets: assets.summary(),
        }
    }

    fn headings(markdown: &str) -> Vec<(HeadingLevel, String)> {
        let mut out = Vec::new();
        let mut current: Option<HeadingLevel> = None;
        for event in Parser::new_ext(markdown, Options::ENABLE_TABLES) {
            match event {
                Event::Start(Tag::Heading { level, .. }) => current = Some(level),
                Event::Text(text) => {
                    if let Some(level) = current.take() {
                        out.push((level, text.to_string()));
                    }
                }
                _ => {}
            }
        }
        out
    }

    #[test]
    fn document_structure() {
        let rendered = MarkdownRenderer::new().render(&input()).unwrap();
        assert_eq!(rendered.sections, vec!["cover", "analysis", "timeline", "appendix"]);
        assert!(rendered.warnings.is_empty());

        let found = headings(&rendered.markdown);
        assert_eq!(found[0], (HeadingLevel::H1, "Evidence Dossier: dossier-us-tx-r".to_string()));
        let h2: Vec<&str> = found
            .iter()
            .filter(|(l, _)| *l == HeadingLevel::H2)
            .map(|(_, t)| t.as_str())
            .collect();
        assert_eq!(h2, vec!["Analysis", "Timeline", "Appendix"]);

        let tables = Parser::new_ext(&rendered.markdown, Options::ENABLE_TABLES)
            .filter(|e| matches!(e, Event::Start(Tag::Table(_))))
            .count();
        assert_eq!(tables, 3);
        assert!(rendered.markdown.contains("a\\|1"));
        assert!(rendered.markdown.contains("2025-07-04 15:30 UTC"));
        assert!(rendered.markdown.contains("No structured record found for case b"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let renderer = MarkdownRenderer::new();
        let input = input();
        assert_eq!(
            renderer.render(&input).unwrap(),
            renderer.render(&input).unwrap()
        );
    }

    #[test]
    fn empty_required_section_warns() {
        let renderer = MarkdownRenderer::with_sections(vec![
            SectionSpec::required(Section::Cover),
            SectionSpec::required(Section::Entities),
        ]);
        let rendered = renderer.render(&input()).unwrap();
        assert_eq!(rendered.sections, vec!["cover"]);
        assert_eq!(
            rendered.warnings,
            vec!["Section 'entities' produced empty output".to_string()]
        );
    }

    #[test]
    fn nothing_to_render_is_an_error() {
        let renderer = MarkdownRenderer::with_sections(vec![SectionSpec::optional(Section::Entities)]);
        assert!(matches!(
            renderer.render(&input()),
            Err(RenderError::Section { .. })
        ));
    }
}

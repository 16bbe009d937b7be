//! Auxiliary visual assets: loss timeline chart, GeoJSON, geo map, timeline events
//!
//! Everything is rendered to text (SVG / JSON) so output bytes depend only on
//! the plan and its case snapshots.

use super::asset_path;
use crate::cases::DossierContext;
use crate::error::RenderError;
use crate::types::{Case, DossierPlan, Jurisdiction};
use dossier_artifact::{Artifact, ArtifactKind, ArtifactPath};
use serde::Serialize;
use serde_json::json;
use std::fmt::Write as _;

use super::analysis::PlanAnalysis;

/// Approximate centroids as `(lat, lon)`
const CENTROIDS: &[(&str, (f64, f64))] = &[
    ("GLOBAL", (0.0, 0.0)),
    ("US", (39.50, -98.35)),
    ("US-CA", (36.77, -119.42)),
    ("US-NY", (42.95, -75.53)),
    ("US-TX", (31.00, -99.00)),
    ("US-FL", (27.77, -81.69)),
    ("US-WA", (47.40, -121.49)),
    ("US-IL", (40.63, -89.39)),
    ("US-NJ", (40.15, -74.70)),
    ("CA", (56.13, -106.35)),
    ("MX", (23.63, -102.55)),
    ("GB", (55.38, -3.44)),
    ("IE", (53.41, -8.24)),
    ("AU", (-25.27, 133.77)),
    ("NZ", (-41.61, 172.82)),
    ("NG", (9.08, 8.68)),
    ("ZA", (-30.56, 22.94)),
    ("BR", (-14.24, -51.93)),
    ("PH", (12.88, 121.77)),
    ("IN", (20.59, 78.96)),
    ("CN", (35.86, 104.19)),
    ("JP", (36.20, 138.25)),
];

const CHART_WIDTH: f64 = 900.0;
const CHART_HEIGHT: f64 = 420.0;
const CHART_MARGIN: f64 = 60.0;
const MAP_WIDTH: f64 = 960.0;
const MAP_HEIGHT: f64 = 480.0;
const MAP_MARGIN: f64 = 40.0;
const MATCH_COLOUR: &str = "#3dd598";
const CROSS_BORDER_COLOUR: &str = "#ffd166";

/// Centroid for a jurisdiction, falling back to its country prefix
#[must_use]
pub fn resolve_coordinates(jurisdiction: &Jurisdiction) -> Option<(f64, f64)> {
    let lookup = |key: &str| {
        CENTROIDS
            .iter()
            .find(|(code, _)| *code == key)
            .map(|(_, coord)| *coord)
    };
    lookup(jurisdiction.as_str()).or_else(|| lookup(jurisdiction.region()))
}

fn project_x(lon: f64, width: f64) -> f64 {
    (lon + 180.0) / 360.0 * width
}

fn project_y(lat: f64, height: f64) -> f64 {
    (90.0 - lat) / 180.0 * height
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Assets rendered for one plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisualAssets {
    pub artifacts: Vec<Artifact>,
    pub timeline_chart: Option<ArtifactPath>,
    pub geojson: Option<ArtifactPath>,
    pub geo_map: Option<ArtifactPath>,
    pub timeline_events: Option<ArtifactPath>,
    pub warnings: Vec<String>,
}

/// Manifest view of [`VisualAssets`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetSummary {
    pub timeline_chart: Option<ArtifactPath>,
    pub geojson: Option<ArtifactPath>,
    pub geo_map: Option<ArtifactPath>,
    pub timeline_events: Option<ArtifactPath>,
    pub warnings: Vec<String>,
}

impl VisualAssets {
    #[must_use]
    pub fn summary(&self) -> AssetSummary {
        AssetSummary {
            timeline_chart: self.timeline_chart.clone(),
            geojson: self.geojson.clone(),
            geo_map: self.geo_map.clone(),
            timeline_events: self.timeline_events.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

/// Render every visual asset for `plan`
///
/// # Errors
/// Returns error if an asset path or JSON payload cannot be built
pub fn render_assets(
    plan: &DossierPlan,
    context: &DossierContext,
    analysis: &PlanAnalysis,
) -> Result<VisualAssets, RenderError> {
    let mut ordered: Vec<&Case> = context.resolved_cases().collect();
    ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

    let mut assets = VisualAssets::default();
    let plan_id = plan.plan_id().as_str();

    match loss_timeline_svg(&ordered) {
        Ok(svg) => {
            let path = asset_path(plan_id, "loss_timeline.svg")?;
            assets.timeline_chart = Some(path.clone());
            assets.artifacts.push(Artifact::new(path, ArtifactKind::Chart, svg));
        }
        Err(warning) => assets.warnings.push(warning),
    }

    let mut mapped = Vec::new();
    for case in &ordered {
        match resolve_coordinates(&case.jurisdiction) {
            Some((lat, lon)) => mapped.push((*case, lat, lon)),
            None => assets.warnings.push(format!(
                "No coordinates available for jurisdiction {}",
                case.jurisdiction
            )),
        }
    }
    if mapped.is_empty() {
        assets
            .warnings
            .push("Geo map skipped because no case coordinates were resolved".to_string());
    } else {
        let features: Vec<serde_json::Value> = mapped
            .iter()
            .map(|(case, lat, lon)| {
                json!({
                    "type": "Feature",
                    "properties": {
                        "case_id": case.id,
                        "jurisdiction": case.jurisdiction,
                        "loss_amount": case.loss_amount.to_string(),
                        "cross_border": analysis.is_cross_border(&case.id),
                    },
                    "geometry": { "type": "Point", "coordinates": [lon, lat] },
                })
            })
            .collect();
        let geojson = json!({ "type": "FeatureCollection", "features": features });
        let path = asset_path(plan_id, "geo.json")?;
        assets.geojson = Some(path.clone());
        assets.artifacts.push(Artifact::new(
            path,
            ArtifactKind::Geo,
            serde_json::to_vec_pretty(&geojson)?,
        ));

        let path = asset_path(plan_id, "geo_map.svg")?;
        assets.geo_map = Some(path.clone());
        assets
            .artifacts
            .push(Artifact::new(path, ArtifactKind::Geo, geo_map_svg(&mapped, analysis)));
    }

    if !ordered.is_empty() {
        let events: Vec<serde_json::Value> = ordered
            .iter()
            .map(|case| {
                json!({
                    "timestamp": case.timestamp.to_rfc3339(),
                    "case_id": case.id,
                    "jurisdiction": case.jurisdiction,
                    "loss_amount": case.loss_amount.to_string(),
                })
            })
            .collect();
        let path = asset_path(plan_id, "timeline.json")?;
        assets.timeline_events = Some(path.clone());
        assets.artifacts.push(Artifact::new(
            path,
            ArtifactKind::Timeline,
            serde_json::to_vec_pretty(&json!({ "plan_id": plan_id, "events": events }))?,
        ));
    }

    Ok(assets)
}

/// Bar per case in time order; `Err` carries the skip warning
fn loss_timeline_svg(ordered: &[&Case]) -> Result<String, String> {
    if ordered.is_empty() {
        return Err("No cases available for loss timeline chart".to_string());
    }
    let max_loss = ordered.iter().map(|c| c.loss_amount.as_f64()).fold(0.0, f64::max);
    if max_loss <= 0.0 {
        return Err(
            "Loss timeline chart skipped because all cases have zero reported loss".to_string(),
        );
    }

    let usable_width = CHART_WIDTH - CHART_MARGIN * 2.0;
    let usable_height = CHART_HEIGHT - CHART_MARGIN * 2.0;
    let baseline = CHART_HEIGHT - CHART_MARGIN;
    #[allow(clippy::cast_precision_loss)]
    let bar_width = usable_width / ordered.len() as f64;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{CHART_WIDTH}" height="{CHART_HEIGHT}" viewBox="0 0 {CHART_WIDTH} {CHART_HEIGHT}">"#
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = writeln!(
        svg,
        r##"<line x1="{CHART_MARGIN}" y1="{CHART_MARGIN}" x2="{CHART_MARGIN}" y2="{baseline}" stroke="#1f2933" stroke-width="2"/>"##
    );
    let _ = writeln!(
        svg,
        r##"<line x1="{CHART_MARGIN}" y1="{baseline}" x2="{:.1}" y2="{baseline}" stroke="#1f2933" stroke-width="2"/>"##,
        CHART_WIDTH - CHART_MARGIN
    );
    let _ = writeln!(
        svg,
        r##"<text x="{CHART_MARGIN}" y="25" fill="#111111">Loss per accepted case (USD)</text>"##
    );
    for (index, case) in ordered.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let x0 = CHART_MARGIN + index as f64 * bar_width + bar_width * 0.15;
        let height = case.loss_amount.as_f64() / max_loss * usable_height;
        let y0 = baseline - height;
        let _ = writeln!(
            svg,
            r##"<rect x="{x0:.1}" y="{y0:.1}" width="{:.1}" height="{height:.1}" fill="#ff6b35"/>"##,
            bar_width * 0.7
        );
        let _ = writeln!(
            svg,
            r##"<text x="{:.1}" y="{:.1}" fill="#4b5563">{}</text>"##,
            x0 - 5.0,
            baseline + 18.0,
            case.timestamp.format("%m-%d")
        );
        let _ = writeln!(
            svg,
            r##"<text x="{x0:.1}" y="{:.1}" fill="#111111">{}</text>"##,
            y0 - 6.0,
            case.loss_amount.whole_dollars()
        );
    }
    svg.push_str("</svg>\n");
    Ok(svg)
}

fn geo_map_svg(mapped: &[(&Case, f64, f64)], analysis: &PlanAnalysis) -> String {
    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{MAP_WIDTH}" height="{MAP_HEIGHT}" viewBox="0 0 {MAP_WIDTH} {MAP_HEIGHT}">"#
    );
    let _ = writeln!(svg, r##"<rect width="100%" height="100%" fill="#041c32"/>"##);
    for lon in (-120..=180).step_by(60) {
        let x = project_x(f64::from(lon), MAP_WIDTH);
        let _ = writeln!(
            svg,
            r##"<line x1="{x:.1}" y1="0" x2="{x:.1}" y2="{MAP_HEIGHT}" stroke="#0f2d44"/>"##
        );
    }
    for lat in (-60..=90).step_by(30) {
        let y = project_y(f64::from(lat), MAP_HEIGHT);
        let _ = writeln!(
            svg,
            r##"<line x1="0" y1="{y:.1}" x2="{MAP_WIDTH}" y2="{y:.1}" stroke="#0f2d44"/>"##
        );
    }
    let _ = writeln!(
        svg,
        r##"<text x="{MAP_MARGIN}" y="25" fill="#ffffff">Approximate case locations</text>"##
    );
    let legend_y = MAP_HEIGHT - MAP_MARGIN;
    let _ = writeln!(
        svg,
        r#"<text x="{MAP_MARGIN}" y="{legend_y}" fill="{MATCH_COLOUR}">&#9679; Jurisdiction match</text>"#
    );
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="{legend_y}" fill="{CROSS_BORDER_COLOUR}">&#9679; Cross-border</text>"#,
        MAP_MARGIN + 220.0
    );
    for (case, lat, lon) in mapped {
        let x = project_x(*lon, MAP_WIDTH);
        let y = project_y(*lat, MAP_HEIGHT);
        let colour = if analysis.is_cross_border(&case.id) {
            CROSS_BORDER_COLOUR
        } else {
            MATCH_COLOUR
        };
        let _ = writeln!(
            svg,
            r##"<circle cx="{x:.1}" cy="{y:.1}" r="7" fill="{colour}" stroke="#02111b"/>"##
        );
        let _ = writeln!(
            svg,
            r##"<text x="{:.1}" y="{:.1}" fill="#e5e7eb">{} ({})</text>"##,
            x + 8.0,
            y + 4.0,
            escape(case.jurisdiction.as_str()),
            case.loss_amount.whole_dollars()
        );
    }
    svg.push_str("</svg>\n");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::InMemoryCaseSource;
    use crate::types::{CaseId, JurisdictionFocus, PlanId, RationaleTag, Timestamp, UsdAmount};
    use chrono::{TimeZone, Utc};

    fn ts(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 4, day, 0, 0, 0).unwrap()
    }

    fn render(cases: Vec<Case>) -> VisualAssets {
        let ids: Vec<CaseId> = cases.iter().map(|c| c.id.clone()).collect();
        let source = InMemoryCaseSource::from_cases(cases);
        let plan = DossierPlan::new(
            PlanId::parse("dossier-test-01").unwrap(),
            ids,
            JurisdictionFocus::Global,
            RationaleTag::GlobalAggregate,
            "r",
            ts(30),
            UsdAmount::ZERO,
        )
        .unwrap();
        let context = DossierContext::load(&source, &plan).unwrap();
        let analysis = PlanAnalysis::compute(&plan, &context, 10);
        render_assets(&plan, &context, &analysis).unwrap()
    }

    #[test]
    fn centroid_lookup_falls_back_to_country() {
        assert_eq!(resolve_coordinates(&"US-CA".into()), Some((36.77, -119.42)));
        assert_eq!(resolve_coordinates(&"US-OR".into()), Some((39.50, -98.35)));
        assert_eq!(resolve_coordinates(&"ZZ".into()), None);
    }

    #[test]
    fn renders_all_assets_under_assets_dir() {
        let assets = render(vec![
            Case::new("b", "GB", UsdAmount::from_dollars(60_000), ts(2)),
            Case::new("a", "US-NY", UsdAmount::from_dollars(120_000), ts(1)),
        ]);
        let paths: Vec<String> = assets.artifacts.iter().map(|a| a.path().to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "assets/dossier-test-01_loss_timeline.svg",
                "assets/dossier-test-01_geo.json",
                "assets/dossier-test-01_geo_map.svg",
                "assets/dossier-test-01_timeline.json",
            ]
        );
        assert!(assets.warnings.is_empty());

        let chart = String::from_utf8(assets.artifacts[0].content().to_vec()).unwrap();
        let first = chart.find("04-01").unwrap();
        let second = chart.find("04-02").unwrap();
        assert!(first < second);
        assert!(chart.contains("$120,000"));

        let geo: serde_json::Value = serde_json::from_slice(assets.artifacts[1].content()).unwrap();
        assert_eq!(geo["features"][0]["geometry"]["coordinates"][0], -75.53);
    }

    #[test]
    fn zero_losses_and_unknown_places_warn() {
        let assets = render(vec![Case::new("z", "ZZ", UsdAmount::ZERO, ts(1))]);
        assert_eq!(
            assets.warnings,
            vec![
                "Loss timeline chart skipped because all cases have zero reported loss",
                "No coordinates available for jurisdiction ZZ",
                "Geo map skipped because no case coordinates were resolved",
            ]
        );
        assert!(assets.timeline_chart.is_none());
        assert!(assets.geo_map.is_none());
        assert_eq!(assets.artifacts.len(), 1);
        assert_eq!(assets.artifacts[0].kind(), ArtifactKind::Timeline);
    }
}

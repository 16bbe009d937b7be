//! Dossier generation
//!
//! Turns a [`DossierPlan`] into its artifact set:
//!
//! ```text
//! <planId>/
//!   <planId>.md                    rendered dossier
//!   <planId>.json                  machine-readable manifest
//!   assets/<planId>_*.svg|json     charts, geo and timeline data
//! ```
//!
//! The pipeline is context → analysis → visuals → tools → render. Only the
//! manifest's `generated_at` comes from the clock, so the same plan and the
//! same case snapshots always produce the same bytes otherwise.

pub mod analysis;
pub mod template;
pub mod tools;
pub mod visuals;

use crate::artifact_store::ArtifactStore;
use crate::cases::{push_unique, CaseSource, DossierContext};
use crate::clock::Clock;
use crate::config::GeneratorConfig;
use crate::error::{RenderError, Result};
use crate::signatures;
use crate::types::{DossierPlan, PlanId, PlanOutputs, Timestamp};
use analysis::PlanAnalysis;
use dossier_artifact::{Artifact, ArtifactKind, ArtifactPath, ArtifactRef, HashAlgorithm, PathError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use template::{DossierRenderer, MarkdownRenderer, RenderInput};
use tools::{ToolInput, ToolResults, ToolSuite};
use tracing::{debug, info, warn};
use visuals::AssetSummary;

/// Version tag written into every JSON manifest
pub const MANIFEST_SCHEMA_VERSION: &str = "dossier_manifest.v1";

/// `assets/<planId>_<suffix>`
pub(crate) fn asset_path(plan_id: &str, suffix: &str) -> Result<ArtifactPath, PathError> {
    ArtifactPath::file("assets")?.child(format!("{plan_id}_{suffix}"))
}

/// What a successful generation produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub plan_id: PlanId,
    /// Visible plan directory
    pub plan_dir: PathBuf,
    /// Every written artifact, paths relative to `plan_dir`
    pub artifacts: Vec<ArtifactRef>,
    pub markdown_path: ArtifactPath,
    pub manifest_path: ArtifactPath,
    /// Where the signature manifest for this set belongs
    pub signature_path: ArtifactPath,
    /// Inherited plan warnings followed by everything raised while generating
    pub warnings: Vec<String>,
    pub sections: Vec<String>,
}

impl GenerationResult {
    /// Output locations relative to the artifact root, for the plan record
    ///
    /// # Errors
    /// Returns error if a path cannot be prefixed with the plan directory
    pub fn plan_outputs(&self) -> Result<PlanOutputs, PathError> {
        let prefix = |path: &ArtifactPath| -> Result<ArtifactPath, PathError> {
            path.segments()
                .iter()
                .try_fold(ArtifactPath::file(self.plan_id.as_str())?, |acc, seg| {
                    acc.child(seg.clone())
                })
        };
        Ok(PlanOutputs {
            artifacts: self
                .artifacts
                .iter()
                .map(|a| prefix(&a.path))
                .collect::<Result<_, _>>()?,
            manifest_path: Some(prefix(&self.manifest_path)?),
            signature_path: Some(prefix(&self.signature_path)?),
        })
    }
}

#[derive(Serialize)]
struct ManifestEntry<'a> {
    path: &'a ArtifactPath,
    kind: ArtifactKind,
}

#[derive(Serialize)]
struct SignatureLocation<'a> {
    path: &'a ArtifactPath,
    algorithm: HashAlgorithm,
}

#[derive(Serialize)]
struct JsonManifest<'a> {
    schema_version: &'static str,
    plan_id: &'a PlanId,
    generated_at: Timestamp,
    plan: &'a DossierPlan,
    warnings: &'a [String],
    analysis: &'a PlanAnalysis,
    context: &'a DossierContext,
    tools: &'a ToolResults,
    assets: &'a AssetSummary,
    sections: &'a [String],
    artifacts: Vec<ManifestEntry<'a>>,
    signature_manifest: SignatureLocation<'a>,
}

/// Renders plans into staged, atomically committed artifact sets
pub struct DossierGenerator {
    cases: Arc<dyn CaseSource>,
    renderer: Arc<dyn DossierRenderer>,
    tools: ToolSuite,
    artifacts: ArtifactStore,
    config: GeneratorConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DossierGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DossierGenerator")
            .field("artifacts", &self.artifacts)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl DossierGenerator {
    /// Generator with the default markdown renderer and tool suite
    #[must_use]
    pub fn new(cases: Arc<dyn CaseSource>, config: GeneratorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cases,
            renderer: Arc::new(MarkdownRenderer::new()),
            tools: ToolSuite::standard(config.timeline_event_limit),
            artifacts: ArtifactStore::new(config.artifact_root.clone(), config.archive_previous),
            config,
            clock,
        }
    }

    /// With a different renderer
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn DossierRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// With a different tool suite
    #[must_use]
    pub fn with_tools(mut self, tools: ToolSuite) -> Self {
        self.tools = tools;
        self
    }

    #[inline]
    #[must_use]
    pub fn artifact_store(&self) -> &ArtifactStore {
        &self.artifacts
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate without inherited warnings
    ///
    /// # Errors
    /// See [`generate_with_warnings`](Self::generate_with_warnings)
    pub async fn generate(&self, plan: &DossierPlan) -> Result<GenerationResult> {
        self.generate_with_warnings(plan, &[]).await
    }

    /// Render, stage and commit the full artifact set for `plan`.
    ///
    /// `inherited` (usually the plan record's warnings) is listed first in
    /// the document and the manifest.
    ///
    /// # Errors
    /// - [`RenderError`] if context lookup, rendering or serialization fails
    /// - [`StorageError`](crate::error::StorageError) if the set cannot be
    ///   written; nothing becomes visible in that case
    pub async fn generate_with_warnings(
        &self,
        plan: &DossierPlan,
        inherited: &[String],
    ) -> Result<GenerationResult> {
        let plan_id = plan.plan_id();
        let context = DossierContext::load(self.cases.as_ref(), plan)?;
        let analysis = PlanAnalysis::compute(plan, &context, self.config.top_indicators);
        let assets = visuals::render_assets(plan, &context, &analysis)?;
        let tools = self.tools.run(&ToolInput {
            plan,
            context: &context,
            analysis: &analysis,
            assets: &assets,
        });

        let mut warnings = Vec::new();
        for warning in inherited
            .iter()
            .chain(&context.warnings)
            .chain(&analysis.warnings)
            .chain(&assets.warnings)
            .chain(&tools.warnings)
        {
            push_unique(&mut warnings, warning.clone());
        }

        let asset_summary = assets.summary();
        let input = RenderInput {
            plan: plan.clone(),
            context,
            analysis,
            tools,
            assets: asset_summary,
            warnings: warnings.clone(),
        };
        let rendered = self.renderer.render(&input)?;
        for warning in rendered.warnings {
            push_unique(&mut warnings, warning);
        }

        let markdown_path = ArtifactPath::file(format!("{plan_id}.md")).map_err(RenderError::from)?;
        let manifest_path =
            ArtifactPath::file(format!("{plan_id}.json")).map_err(RenderError::from)?;
        let signature_path = signatures::manifest_file(plan_id).map_err(RenderError::from)?;

        let mut entries = vec![
            ManifestEntry {
                path: &markdown_path,
                kind: ArtifactKind::Markdown,
            },
            ManifestEntry {
                path: &manifest_path,
                kind: ArtifactKind::JsonManifest,
            },
        ];
        entries.extend(assets.artifacts.iter().map(|a| ManifestEntry {
            path: a.path(),
            kind: a.kind(),
        }));

        let manifest = JsonManifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            plan_id,
            generated_at: self.clock.now(),
            plan,
            warnings: &warnings,
            analysis: &input.analysis,
            context: &input.context,
            tools: &input.tools,
            assets: &input.assets,
            sections: &rendered.sections,
            artifacts: entries,
            signature_manifest: SignatureLocation {
                path: &signature_path,
                algorithm: self.config.hash_algorithm,
            },
        };
        let mut manifest_bytes = serde_json::to_vec_pretty(&manifest).map_err(RenderError::from)?;
        manifest_bytes.push(b'\n');

        let mut set = Vec::with_capacity(assets.artifacts.len() + 2);
        set.push(Artifact::new(
            markdown_path.clone(),
            ArtifactKind::Markdown,
            rendered.markdown,
        ));
        set.push(Artifact::new(
            manifest_path.clone(),
            ArtifactKind::JsonManifest,
            manifest_bytes,
        ));
        set.extend(assets.artifacts);

        let staged = self.artifacts.stage(plan_id, &set).await?;
        debug!(plan_id = %plan_id, staging = %staged.dir().display(), "artifacts staged");
        let plan_dir = staged.commit().await?;

        if !warnings.is_empty() {
            warn!(plan_id = %plan_id, count = warnings.len(), "dossier generated with warnings");
        }
        info!(
            plan_id = %plan_id,
            artifacts = set.len(),
            dir = %plan_dir.display(),
            "dossier generated"
        );

        Ok(GenerationResult {
            plan_id: plan_id.clone(),
            plan_dir,
            artifacts: set.iter().map(Artifact::to_ref).collect(),
            markdown_path,
            manifest_path,
            signature_path,
            warnings,
            sections: rendered.sections,
        })
    }
}

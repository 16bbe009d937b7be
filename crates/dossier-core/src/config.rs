//! Pipeline configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! [bundle]
//! min_loss_usd = 50000
//! recency_days = 30
//! grouping = "cross_border"
//!
//! [queue]
//! batch_size = 5
//! max_attempts = 3
//!
//! [store]
//! backend = "sqlite"
//! path = "data/dossier_queue.db"
//! ```

use crate::error::ConfigError;
use crate::types::UsdAmount;
use dossier_artifact::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DossierConfig {
    pub bundle: BundlePolicy,
    pub generator: GeneratorConfig,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
}

impl DossierConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With bundle policy
    #[inline]
    #[must_use]
    pub fn with_bundle(mut self, bundle: BundlePolicy) -> Self {
        self.bundle = bundle;
        self
    }

    /// With generator settings
    #[inline]
    #[must_use]
    pub fn with_generator(mut self, generator: GeneratorConfig) -> Self {
        self.generator = generator;
        self
    }

    /// With queue settings
    #[inline]
    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// With store backend
    #[inline]
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Returns error if the TOML is malformed or a value is out of range
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    /// Returns the first violated constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bundle.validate()?;
        self.generator.validate()?;
        self.queue.validate()
    }
}

/// How eligible cases are grouped into plans
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingRule {
    /// One bundle per jurisdiction
    #[default]
    PerJurisdiction,
    /// Link cases across jurisdictions by shared indicators, rest per jurisdiction
    CrossBorder,
    /// Everything in one bundle
    Global,
}

/// Acceptance policy and grouping knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlePolicy {
    /// Minimum loss in whole US dollars
    pub min_loss_usd: u64,
    /// Rolling recency window
    pub recency_days: u32,
    pub grouping: GroupingRule,
    /// Larger groups are split into chunks of this size
    pub max_cases_per_plan: usize,
    /// Groups smaller than this produce no plan
    pub min_cases_per_plan: usize,
    /// Under cross-border grouping, leave unlinked cases ungrouped instead of
    /// bundling them per jurisdiction
    pub cross_border_only: bool,
}

impl BundlePolicy {
    /// Minimum loss threshold
    #[inline]
    #[must_use]
    pub fn min_loss(&self) -> UsdAmount {
        UsdAmount::from_dollars(self.min_loss_usd)
    }

    /// Recency window as a chrono duration
    #[inline]
    #[must_use]
    pub fn recency_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.recency_days))
    }

    /// With minimum loss
    #[inline]
    #[must_use]
    pub fn with_min_loss_usd(mut self, dollars: u64) -> Self {
        self.min_loss_usd = dollars;
        self
    }

    /// With recency window
    #[inline]
    #[must_use]
    pub fn with_recency_days(mut self, days: u32) -> Self {
        self.recency_days = days;
        self
    }

    /// With grouping rule
    #[inline]
    #[must_use]
    pub fn with_grouping(mut self, grouping: GroupingRule) -> Self {
        self.grouping = grouping;
        self
    }

    /// With chunk size
    #[inline]
    #[must_use]
    pub fn with_max_cases_per_plan(mut self, max: usize) -> Self {
        self.max_cases_per_plan = max;
        self
    }

    /// With minimum group size
    #[inline]
    #[must_use]
    pub fn with_min_cases_per_plan(mut self, min: usize) -> Self {
        self.min_cases_per_plan = min;
        self
    }

    /// Only bundle cases linked across jurisdictions
    #[inline]
    #[must_use]
    pub fn with_cross_border_only(mut self, only: bool) -> Self {
        self.cross_border_only = only;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cross_border_only && self.grouping != GroupingRule::CrossBorder {
            return Err(ConfigError::Invalid {
                field: "bundle.cross_border_only",
                reason: "requires grouping = \"cross_border\"".into(),
            });
        }
        if self.min_cases_per_plan == 0 {
            return Err(ConfigError::Invalid {
                field: "bundle.min_cases_per_plan",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_cases_per_plan < self.min_cases_per_plan {
            return Err(ConfigError::Invalid {
                field: "bundle.max_cases_per_plan",
                reason: format!(
                    "{} is below min_cases_per_plan {}",
                    self.max_cases_per_plan, self.min_cases_per_plan
                ),
            });
        }
        Ok(())
    }
}

impl Default for BundlePolicy {
    fn default() -> Self {
        Self {
            min_loss_usd: 50_000,
            recency_days: 30,
            grouping: GroupingRule::PerJurisdiction,
            max_cases_per_plan: 5,
            min_cases_per_plan: 1,
            cross_border_only: false,
        }
    }
}

/// Rendering and artifact settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Directory that holds one sub-directory per plan
    pub artifact_root: PathBuf,
    pub hash_algorithm: HashAlgorithm,
    /// Read size used when streaming files through the hasher
    pub hash_chunk_bytes: usize,
    /// Keep the previous artifact set under `.archive/` on regeneration
    pub archive_previous: bool,
    /// Number of shared indicators listed in the analysis
    pub top_indicators: usize,
    /// Maximum events emitted by the timeline synthesizer
    pub timeline_event_limit: usize,
}

impl GeneratorConfig {
    /// With artifact root
    #[inline]
    #[must_use]
    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = root.into();
        self
    }

    /// With hash algorithm
    #[inline]
    #[must_use]
    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// With streaming chunk size
    #[inline]
    #[must_use]
    pub fn with_hash_chunk_bytes(mut self, bytes: usize) -> Self {
        self.hash_chunk_bytes = bytes;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.hash_chunk_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "generator.hash_chunk_bytes",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("data/reports/dossiers"),
            hash_algorithm: HashAlgorithm::Sha256,
            hash_chunk_bytes: 1024 * 1024,
            archive_previous: true,
            top_indicators: 10,
            timeline_event_limit: 30,
        }
    }
}

/// Queue processing and retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub batch_size: usize,
    /// Attempts per plan before it is marked failed
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Wall-clock budget for one generate-and-sign attempt
    pub attempt_timeout_ms: u64,
}

impl QueueConfig {
    /// With batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// With retry budget
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// With backoff curve
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_max_ms = max_ms;
        self
    }

    /// With per-attempt timeout
    #[inline]
    #[must_use]
    pub fn with_attempt_timeout_ms(mut self, ms: u64) -> Self {
        self.attempt_timeout_ms = ms;
        self
    }

    /// Delay before retrying after `attempt` (1-based) failed
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_ms);
        Duration::from_millis(delay)
    }

    #[inline]
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "queue.batch_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "queue.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid {
                field: "queue.backoff_base_ms",
                reason: "exceeds backoff_max_ms".into(),
            });
        }
        if self.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "queue.attempt_timeout_ms",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_attempts: 3,
            backoff_base_ms: 250,
            backoff_max_ms: 10_000,
            attempt_timeout_ms: 300_000,
        }
    }
}

/// Plan store backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-process store (single worker, tests)
    #[default]
    Memory,
    /// SQLite file shared between workers
    Sqlite { path: PathBuf },
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_yields_defaults() {
        let config = DossierConfig::from_toml_str("").unwrap();
        assert_eq!(config, DossierConfig::default());
        assert_eq!(config.bundle.min_loss(), UsdAmount::from_dollars(50_000));
        assert_eq!(config.bundle.max_cases_per_plan, 5);
        assert_eq!(config.generator.hash_chunk_bytes, 1024 * 1024);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.store, StoreConfig::Memory);
    }

    #[test]
    fn parses_sections() {
        let raw = r#"
            [bundle]
            min_loss_usd = 75000
            grouping = "cross_border"

            [generator]
            hash_algorithm = "blake3"

            [queue]
            batch_size = 10

            [store]
            backend = "sqlite"
            path = "/var/lib/dossier/queue.db"

            [telemetry]
            format = "json"
        "#;
        let config = DossierConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.bundle.min_loss_usd, 75_000);
        assert_eq!(config.bundle.recency_days, 30);
        assert_eq!(config.bundle.grouping, GroupingRule::CrossBorder);
        assert_eq!(config.generator.hash_algorithm, HashAlgorithm::Blake3);
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(
            config.store,
            StoreConfig::Sqlite {
                path: PathBuf::from("/var/lib/dossier/queue.db")
            }
        );
        assert_eq!(config.telemetry.format, LogFormat::Json);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = DossierConfig::from_toml_str("[queue]\nbatch_size = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "queue.batch_size",
                ..
            }
        ));
        let err = DossierConfig::from_toml_str(
            "[bundle]\nmin_cases_per_plan = 3\nmax_cases_per_plan = 2",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        let err = DossierConfig::from_toml_str("[bundle]\ncross_border_only = true").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "bundle.cross_border_only",
                ..
            }
        ));
        let linked = DossierConfig::from_toml_str(
            "[bundle]\ngrouping = \"cross_border\"\ncross_border_only = true",
        )
        .unwrap();
        assert!(linked.bundle.cross_border_only);
        assert!(matches!(
            DossierConfig::from_toml_str("[queue\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let queue = QueueConfig::default().with_backoff(100, 1_000);
        assert_eq!(queue.backoff_for(1), Duration::from_millis(100));
        assert_eq!(queue.backoff_for(2), Duration::from_millis(200));
        assert_eq!(queue.backoff_for(3), Duration::from_millis(400));
        assert_eq!(queue.backoff_for(10), Duration::from_millis(1_000));
        assert_eq!(queue.backoff_for(200), Duration::from_millis(1_000));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dossier.toml");
        std::fs::write(&path, "[queue]\nmax_attempts = 5\n").unwrap();
        assert_eq!(DossierConfig::load(&path).unwrap().queue.max_attempts, 5);
        assert!(matches!(
            DossierConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}

//! Gate configuration, read from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. `GateConfig::compile` validates the whole tree and
//! produces the compiled form the orchestrator runs with.

use folio_kernel::boundary::{BoundaryPatternSet, BoundaryPatterns};
use folio_kernel::coverage::{CoverageThresholds, ReferenceFilter};
use folio_kernel::structure::StructureRules;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub coverage: CoverageConfig,
    pub boundary: BoundaryPatternSet,
    pub structure: StructureRules,
    pub retry: RetryConfig,
    pub visual: VisualConfig,
    pub completeness: CoverageThresholds,
    pub assembly: AssemblyConfig,
    pub pool: PoolConfig,
    pub warn: WarnPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    pub pass_above: f64,
    pub warn_at_or_above: f64,
    pub confirm_at_or_above: f64,
    pub excess_above: f64,
    /// Reference lines matching any of these (after trimming) are dropped
    /// before tokenizing.
    pub ignore_line_patterns: Vec<String>,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        let thresholds = CoverageThresholds::default();
        Self {
            pass_above: thresholds.pass_above,
            warn_at_or_above: thresholds.warn_at_or_above,
            confirm_at_or_above: thresholds.confirm_at_or_above,
            excess_above: thresholds.excess_above,
            ignore_line_patterns: vec![r"^\d+$".to_string()],
        }
    }
}

impl CoverageConfig {
    pub fn thresholds(&self) -> CoverageThresholds {
        CoverageThresholds {
            pass_above: self.pass_above,
            warn_at_or_above: self.warn_at_or_above,
            confirm_at_or_above: self.confirm_at_or_above,
            excess_above: self.excess_above,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Regenerations per page, not counting the initial content.
    pub max_attempts: u32,
    pub generation_timeout_ms: u64,
    /// Cap on listed items in specific feedback.
    pub feedback_max_items: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            generation_timeout_ms: 120_000,
            feedback_max_items: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub pass_at_or_above: f64,
    pub warn_at_or_above: f64,
    pub judgment_timeout_ms: u64,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            pass_at_or_above: 85.0,
            warn_at_or_above: 60.0,
            judgment_timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub container_class: String,
    pub content_class: String,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            container_class: "page-container".to_string(),
            content_class: "page-content".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// 0 means available parallelism.
    pub workers: usize,
}

impl PoolConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarnPolicy {
    /// Minor warns (mild coverage shortfall, missing closing marker) are
    /// confirmed by policy instead of an operator.
    pub auto_confirm_minor: bool,
}

impl Default for WarnPolicy {
    fn default() -> Self {
        Self {
            auto_confirm_minor: true,
        }
    }
}

/// Validated configuration with patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub coverage: CoverageThresholds,
    pub reference_filter: ReferenceFilter,
    pub boundary: BoundaryPatterns,
    pub structure: StructureRules,
    pub retry: RetryConfig,
    pub visual: VisualConfig,
    pub completeness: CoverageThresholds,
    pub assembly: AssemblyConfig,
    pub workers: usize,
    pub warn: WarnPolicy,
}

impl CompiledConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.retry.generation_timeout_ms)
    }

    pub fn judgment_timeout(&self) -> Duration {
        Duration::from_millis(self.visual.judgment_timeout_ms)
    }
}

impl GateConfig {
    pub fn from_toml_str(text: &str, source: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source_err| ConfigError::ParseToml {
            path: source.to_string(),
            source: source_err,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text, &path.display().to_string())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.compile().map(|_| ())
    }

    pub fn compile(&self) -> Result<CompiledConfig, ConfigError> {
        let coverage = self.coverage.thresholds();
        coverage.validate("coverage")?;
        self.completeness.validate("completeness")?;
        self.structure.validate()?;
        let boundary = self.boundary.compile()?;
        let reference_filter = ReferenceFilter::new(&self.coverage.ignore_line_patterns)?;

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.generation_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "retry.generation_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.retry.feedback_max_items == 0 {
            return Err(ConfigError::invalid(
                "retry.feedback_max_items",
                "must be at least 1",
            ));
        }

        let visual = &self.visual;
        let in_range = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);
        if !in_range(visual.pass_at_or_above)
            || !in_range(visual.warn_at_or_above)
            || visual.warn_at_or_above > visual.pass_at_or_above
        {
            return Err(ConfigError::invalid(
                "visual",
                format!(
                    "thresholds must satisfy 0 <= warn ({}) <= pass ({}) <= 100",
                    visual.warn_at_or_above, visual.pass_at_or_above
                ),
            ));
        }
        if visual.judgment_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "visual.judgment_timeout_ms",
                "must be greater than 0",
            ));
        }

        for (field, class) in [
            ("assembly.container_class", &self.assembly.container_class),
            ("assembly.content_class", &self.assembly.content_class),
        ] {
            if class.trim().is_empty() || class.chars().any(|c| c.is_whitespace() || c == '"') {
                return Err(ConfigError::invalid(field, "must be a single class name"));
            }
        }

        Ok(CompiledConfig {
            coverage,
            reference_filter,
            boundary,
            structure: self.structure.clone(),
            retry: self.retry.clone(),
            visual: self.visual.clone(),
            completeness: self.completeness.clone(),
            assembly: self.assembly.clone(),
            workers: self.pool.effective_workers(),
            warn: self.warn.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_the_default_config() {
        let config = GateConfig::from_toml_str("", "<inline>").expect("parse");
        assert_eq!(config, GateConfig::default());
        let compiled = config.compile().expect("defaults compile");
        assert_eq!(compiled.retry.max_attempts, 3);
        assert_eq!(compiled.generation_timeout(), Duration::from_secs(120));
        assert!(compiled.warn.auto_confirm_minor);
        assert!(compiled.workers >= 1);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = GateConfig::from_toml_str(
            r#"
[coverage]
pass_above = 98
ignore_line_patterns = ["^Page \\d+$"]

[structure]
allowed_heading_skips = [[1, 3]]

[retry]
max_attempts = 5
"#,
            "<inline>",
        )
        .expect("parse");
        assert_eq!(config.coverage.pass_above, 98.0);
        assert_eq!(config.coverage.warn_at_or_above, 95.0);
        assert_eq!(config.structure.allowed_heading_skips, vec![[1, 3]]);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.generation_timeout_ms, 120_000);
        config.validate().expect("valid");
    }

    #[test]
    fn rendered_default_parses_back() {
        let rendered = GateConfig::default().to_toml_string().expect("render");
        assert!(rendered.contains("[coverage]"));
        assert!(rendered.contains("[warn]"));
        let parsed = GateConfig::from_toml_str(&rendered, "<rendered>").expect("parse rendered");
        assert_eq!(parsed, GateConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected_before_any_gate_runs() {
        let zero_attempts = GateConfig::from_toml_str("[retry]\nmax_attempts = 0\n", "<inline>")
            .expect("parse");
        assert!(matches!(
            zero_attempts.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "retry.max_attempts"
        ));

        let unordered = GateConfig::from_toml_str("[coverage]\nwarn_at_or_above = 99.5\n", "<inline>")
            .expect("parse");
        assert!(matches!(unordered.validate(), Err(ConfigError::Kernel(_))));

        let bad_regex = GateConfig::from_toml_str("[coverage]\nignore_line_patterns = [\"(\"]\n", "<inline>")
            .expect("parse");
        assert!(matches!(bad_regex.validate(), Err(ConfigError::Kernel(_))));

        let visual = GateConfig::from_toml_str("[visual]\nwarn_at_or_above = 90\n", "<inline>")
            .expect("parse");
        assert!(matches!(visual.validate(), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn mistyped_value_is_a_parse_error() {
        let err = GateConfig::from_toml_str("[retry]\nmax_attempts = \"three\"\n", "gate.toml")
            .expect_err("type mismatch");
        assert!(err.to_string().starts_with("invalid toml at gate.toml"));
    }
}

//! Coverage of generated page text against trusted reference text.
//!
//! `ratio = generated_count / reference_count * 100` over word tokens with
//! multiset semantics. The ratio alone decides the band; the token diff is
//! carried for diagnostics and regeneration feedback.

use crate::error::KernelError;
use crate::token::{token_counts, tokenize};
use crate::verdict::{Verdict, WarnLevel};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raised when there is nothing to measure coverage against.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoverageError {
    #[error("reference text has no word tokens; coverage is undefined")]
    MissingReference,
}

/// Token-level difference between reference and generated text.
///
/// Values are the unmatched multiplicity: a token appearing 3 times in the
/// reference and once in the generated text shows up in `missing` with 2.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDiff {
    #[serde(default)]
    pub missing: BTreeMap<String, usize>,
    #[serde(default)]
    pub extra: BTreeMap<String, usize>,
}

impl TokenDiff {
    pub fn between(reference: &[String], generated: &[String]) -> Self {
        let reference_counts = token_counts(reference);
        let generated_counts = token_counts(generated);

        let mut missing = BTreeMap::new();
        for (token, &count) in &reference_counts {
            let matched = generated_counts.get(token).copied().unwrap_or(0);
            if count > matched {
                missing.insert(token.clone(), count - matched);
            }
        }

        let mut extra = BTreeMap::new();
        for (token, &count) in &generated_counts {
            let matched = reference_counts.get(token).copied().unwrap_or(0);
            if count > matched {
                extra.insert(token.clone(), count - matched);
            }
        }

        Self { missing, extra }
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }

    pub fn missing_total(&self) -> usize {
        self.missing.values().sum()
    }

    pub fn extra_total(&self) -> usize {
        self.extra.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub reference_count: usize,
    pub generated_count: usize,
    /// Percentage; 100.0 means equal token counts.
    pub ratio: f64,
    pub diff: TokenDiff,
}

/// Compute coverage of `generated` against `reference`.
///
/// Pure and deterministic. An empty reference is an error rather than a
/// division by zero; an empty generated text is simply ratio 0.
pub fn compute_coverage(reference: &str, generated: &str) -> Result<CoverageReport, CoverageError> {
    let reference_tokens = tokenize(reference);
    let generated_tokens = tokenize(generated);
    compute_coverage_tokens(&reference_tokens, &generated_tokens)
}

pub fn compute_coverage_tokens(
    reference: &[String],
    generated: &[String],
) -> Result<CoverageReport, CoverageError> {
    if reference.is_empty() {
        return Err(CoverageError::MissingReference);
    }
    let ratio = generated.len() as f64 / reference.len() as f64 * 100.0;
    Ok(CoverageReport {
        reference_count: reference.len(),
        generated_count: generated.len(),
        ratio,
        diff: TokenDiff::between(reference, generated),
    })
}

/// Classification of a coverage ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageBand {
    /// Above the pass line, not above the excess line.
    Exact,
    /// Small shortfall; warn.
    Minor,
    /// Larger shortfall; warn and require an operator.
    Major,
    /// Too little content.
    Deficit,
    /// More content than the reference: hallucinated or duplicated text.
    Excess,
}

impl CoverageBand {
    pub fn verdict(self) -> Verdict {
        match self {
            Self::Exact => Verdict::Pass,
            Self::Minor | Self::Major => Verdict::Warn,
            Self::Deficit | Self::Excess => Verdict::Fail,
        }
    }

    pub fn warn_level(self) -> Option<WarnLevel> {
        match self {
            Self::Minor => Some(WarnLevel::Minor),
            Self::Major => Some(WarnLevel::Major),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Deficit => "deficit",
            Self::Excess => "excess",
        }
    }
}

/// Band edges, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageThresholds {
    pub pass_above: f64,
    pub warn_at_or_above: f64,
    pub confirm_at_or_above: f64,
    pub excess_above: f64,
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            pass_above: 99.0,
            warn_at_or_above: 95.0,
            confirm_at_or_above: 85.0,
            excess_above: 100.0,
        }
    }
}

impl CoverageThresholds {
    pub fn classify(&self, ratio: f64) -> CoverageBand {
        if ratio > self.excess_above {
            CoverageBand::Excess
        } else if ratio > self.pass_above {
            CoverageBand::Exact
        } else if ratio >= self.warn_at_or_above {
            CoverageBand::Minor
        } else if ratio >= self.confirm_at_or_above {
            CoverageBand::Major
        } else {
            CoverageBand::Deficit
        }
    }

    /// Edges must be strictly ordered: confirm < warn <= pass < excess.
    pub fn validate(&self, field: &str) -> Result<(), KernelError> {
        let ordered = self.confirm_at_or_above < self.warn_at_or_above
            && self.warn_at_or_above <= self.pass_above
            && self.pass_above < self.excess_above;
        let finite = [
            self.pass_above,
            self.warn_at_or_above,
            self.confirm_at_or_above,
            self.excess_above,
        ]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0);
        if ordered && finite {
            Ok(())
        } else {
            Err(KernelError::InvalidConfig {
                field: field.to_string(),
                message: format!(
                    "thresholds must satisfy 0 <= confirm ({}) < warn ({}) <= pass ({}) < excess ({})",
                    self.confirm_at_or_above,
                    self.warn_at_or_above,
                    self.pass_above,
                    self.excess_above
                ),
            })
        }
    }
}

/// Drops reference lines that never belong in generated content:
/// running headers, footers, bare page numbers.
#[derive(Debug, Clone, Default)]
pub struct ReferenceFilter {
    patterns: Vec<Regex>,
}

impl ReferenceFilter {
    pub fn new(patterns: &[String]) -> Result<Self, KernelError> {
        let compiled = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| KernelError::InvalidPattern {
                    field: "coverage.ignore_line_patterns".to_string(),
                    pattern: p.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns: compiled })
    }

    pub fn apply(&self, reference: &str) -> String {
        if self.patterns.is_empty() {
            return reference.to_string();
        }
        reference
            .lines()
            .filter(|line| {
                let trimmed = line.trim();
                !self.patterns.iter().any(|re| re.is_match(trimmed))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

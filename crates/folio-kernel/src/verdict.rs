//! Per-page verdicts.
//!
//! A verdict is the worst of its constituent checks. A structural failure,
//! a boundary leak and a missing reference force `Fail` whatever the
//! coverage says; the leak and the missing reference also mark the page as
//! not worth regenerating, since no new content can fix them.

use crate::boundary::BoundaryReport;
use crate::coverage::{CoverageBand, CoverageError, CoverageReport, CoverageThresholds};
use crate::finding::{FailureClass, Finding, sort_findings};
use crate::structure::{StructuralError, StructureReport};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Ordered so that the worst verdict is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl Verdict {
    pub fn worst(verdicts: impl IntoIterator<Item = Verdict>) -> Verdict {
        verdicts.into_iter().max().unwrap_or(Verdict::Pass)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much confirmation a `Warn` needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    /// May be confirmed by policy.
    Minor,
    /// Needs an operator.
    Major,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVerdict {
    pub verdict: Verdict,
    /// `None` when coverage could not be computed.
    pub coverage_ratio: Option<f64>,
    pub band: Option<CoverageBand>,
    pub warn_level: Option<WarnLevel>,
    pub requires_confirmation: bool,
    /// Failed regardless of coverage.
    pub fatal: bool,
    /// A regeneration could plausibly fix the failure.
    pub retryable: bool,
    #[serde(default)]
    pub missing: BTreeMap<String, usize>,
    #[serde(default)]
    pub extra: BTreeMap<String, usize>,
    #[serde(default)]
    pub structural_errors: Vec<StructuralError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<BoundaryReport>,
    pub findings: Vec<Finding>,
}

impl PageVerdict {
    /// Verdict for a page whose content never arrived, e.g. a generation
    /// timeout.
    pub fn failed(finding: Finding) -> Self {
        Self {
            verdict: Verdict::Fail,
            coverage_ratio: None,
            band: None,
            warn_level: None,
            requires_confirmation: false,
            fatal: false,
            retryable: true,
            missing: BTreeMap::new(),
            extra: BTreeMap::new(),
            structural_errors: Vec::new(),
            boundary: None,
            findings: vec![finding],
        }
    }

    pub fn has_class(&self, class: FailureClass) -> bool {
        self.findings.iter().any(|f| f.class == class)
    }

    /// Ids of the warning findings a confirmation has to cover.
    pub fn warning_ids(&self) -> Vec<String> {
        self.findings
            .iter()
            .filter(|f| !f.is_error())
            .map(|f| f.finding_id.clone())
            .collect()
    }
}

/// Combine coverage, boundary and structure results for one page.
pub fn build_verdict(
    scope: &str,
    coverage: &Result<CoverageReport, CoverageError>,
    thresholds: &CoverageThresholds,
    boundary: Option<&BoundaryReport>,
    structure: &StructureReport,
) -> PageVerdict {
    let mut findings = Vec::new();
    let mut verdicts = Vec::new();
    let mut warn_levels = Vec::new();
    let mut fatal = false;
    let mut retryable = true;

    let (coverage_ratio, band, missing, extra) = match coverage {
        Ok(report) => {
            let band = thresholds.classify(report.ratio);
            verdicts.push(band.verdict());
            warn_levels.extend(band.warn_level());
            if let Some(finding) = coverage_finding(scope, report, band, thresholds) {
                findings.push(finding);
            }
            (
                Some(report.ratio),
                Some(band),
                report.diff.missing.clone(),
                report.diff.extra.clone(),
            )
        }
        Err(CoverageError::MissingReference) => {
            verdicts.push(Verdict::Fail);
            fatal = true;
            retryable = false;
            findings.push(Finding::error(
                FailureClass::MissingReference,
                scope,
                CoverageError::MissingReference.to_string(),
            ));
            (None, None, BTreeMap::new(), BTreeMap::new())
        }
    };

    if let Some(report) = boundary {
        verdicts.push(report.status);
        for finding in &report.findings {
            match finding.class {
                FailureClass::BoundaryLeak => {
                    fatal = true;
                    retryable = false;
                }
                FailureClass::BoundaryMissingClosing => warn_levels.push(WarnLevel::Minor),
                _ => {}
            }
        }
        findings.extend(report.findings.iter().cloned());
    }

    if !structure.passed() {
        verdicts.push(Verdict::Fail);
        fatal = true;
        for error in &structure.errors {
            let mut finding = Finding::error(FailureClass::StructuralError, scope, error.message.clone())
                .with_code(error.code);
            if let Some(location) = error.location {
                finding = finding.with_location(location.to_string());
            }
            findings.push(finding);
        }
    }

    let verdict = Verdict::worst(verdicts);
    sort_findings(&mut findings);
    PageVerdict {
        verdict,
        coverage_ratio,
        band,
        warn_level: if verdict == Verdict::Warn {
            warn_levels.into_iter().max()
        } else {
            None
        },
        requires_confirmation: verdict == Verdict::Warn,
        fatal,
        retryable: verdict == Verdict::Fail && retryable,
        missing,
        extra,
        structural_errors: structure.errors.clone(),
        boundary: boundary.cloned(),
        findings,
    }
}

fn coverage_finding(
    scope: &str,
    report: &CoverageReport,
    band: CoverageBand,
    thresholds: &CoverageThresholds,
) -> Option<Finding> {
    let details = json!({
        "ratio": report.ratio,
        "band": band.as_str(),
        "referenceCount": report.reference_count,
        "generatedCount": report.generated_count,
        "missingTotal": report.diff.missing_total(),
        "extraTotal": report.diff.extra_total(),
    });
    let finding = match band {
        CoverageBand::Exact => return None,
        CoverageBand::Excess => Finding::error(
            FailureClass::CoverageExcess,
            scope,
            format!(
                "coverage {:.2}% exceeds {:.2}%: {} extra token(s) not in the reference",
                report.ratio,
                thresholds.excess_above,
                report.diff.extra_total()
            ),
        ),
        CoverageBand::Deficit => Finding::error(
            FailureClass::CoverageDeficit,
            scope,
            format!(
                "coverage {:.2}% is below {:.2}%: {} reference token(s) missing",
                report.ratio,
                thresholds.confirm_at_or_above,
                report.diff.missing_total()
            ),
        ),
        CoverageBand::Minor | CoverageBand::Major => Finding::warning(
            FailureClass::CoverageShortfall,
            scope,
            format!(
                "coverage {:.2}% is in the {} warn band (pass needs > {:.2}%): {} reference token(s) missing",
                report.ratio,
                band.as_str(),
                thresholds.pass_above,
                report.diff.missing_total()
            ),
        ),
    };
    Some(finding.with_details(details))
}

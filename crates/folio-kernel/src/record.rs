//! Page, attempt, gate and unit records.
//!
//! These are the projections the ledger rebuilds from its event history.
//! The invariant helpers here are the single place the gating rules are
//! written down; the orchestrator and the ledger replay both call them.

use crate::coverage::TokenDiff;
use crate::feedback::Feedback;
use crate::finding::Finding;
use crate::verdict::{PageVerdict, Verdict, WarnLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Scope string used in findings for a page: `<unit>/page-NNNN`.
pub fn page_scope(unit_id: &str, page: u32) -> String {
    format!("{unit_id}/page-{page:04}")
}

/// Scope string used in findings for a gate: `<unit>/<gate>`.
pub fn gate_scope(unit_id: &str, gate: GateId) -> String {
    format!("{unit_id}/{gate}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    Pending,
    Verified,
    Finalized,
    Blocked,
}

/// Unit lifecycle. Linear apart from the two holding states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    ExtractionReady,
    PerPageVerification,
    BoundaryValidation,
    PreConsolidationCheck,
    Consolidated,
    PostConsolidationStructuralCheck,
    ExternalVisualJudgment,
    FinalCompletenessCheck,
    Released,
    /// Halted on a `Warn` nobody has confirmed yet.
    AwaitingConfirmation,
    Blocked,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Blocked)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExtractionReady => "extraction_ready",
            Self::PerPageVerification => "per_page_verification",
            Self::BoundaryValidation => "boundary_validation",
            Self::PreConsolidationCheck => "pre_consolidation_check",
            Self::Consolidated => "consolidated",
            Self::PostConsolidationStructuralCheck => "post_consolidation_structural_check",
            Self::ExternalVisualJudgment => "external_visual_judgment",
            Self::FinalCompletenessCheck => "final_completeness_check",
            Self::Released => "released",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Blocked => "blocked",
        }
    }
}

impl Display for UnitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gates in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateId {
    PerPageVerification,
    BoundaryValidation,
    PreConsolidation,
    PostConsolidationStructure,
    ExternalVisualJudgment,
    FinalCompleteness,
}

impl GateId {
    pub const ALL: [GateId; 6] = [
        GateId::PerPageVerification,
        GateId::BoundaryValidation,
        GateId::PreConsolidation,
        GateId::PostConsolidationStructure,
        GateId::ExternalVisualJudgment,
        GateId::FinalCompleteness,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerPageVerification => "per_page_verification",
            Self::BoundaryValidation => "boundary_validation",
            Self::PreConsolidation => "pre_consolidation",
            Self::PostConsolidationStructure => "post_consolidation_structure",
            Self::ExternalVisualJudgment => "external_visual_judgment",
            Self::FinalCompleteness => "final_completeness",
        }
    }

    /// The unit state while this gate runs.
    pub fn state(self) -> UnitState {
        match self {
            Self::PerPageVerification => UnitState::PerPageVerification,
            Self::BoundaryValidation => UnitState::BoundaryValidation,
            Self::PreConsolidation => UnitState::PreConsolidationCheck,
            Self::PostConsolidationStructure => UnitState::PostConsolidationStructuralCheck,
            Self::ExternalVisualJudgment => UnitState::ExternalVisualJudgment,
            Self::FinalCompleteness => UnitState::FinalCompletenessCheck,
        }
    }
}

impl Display for GateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GateId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|g| g.as_str()).collect();
                format!("unknown gate `{s}` (expected one of: {})", known.join(", "))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pass,
    Warn,
    Fail,
    Pending,
}

impl From<Verdict> for GateStatus {
    fn from(value: Verdict) -> Self {
        match value {
            Verdict::Pass => Self::Pass,
            Verdict::Warn => Self::Warn,
            Verdict::Fail => Self::Fail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub gate_id: GateId,
    pub unit_id: String,
    pub status: GateStatus,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_level: Option<WarnLevel>,
    /// Who confirmed a `Warn`: an operator name or `policy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_by: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl GateResult {
    pub fn new(gate_id: GateId, unit_id: impl Into<String>, status: GateStatus) -> Self {
        Self {
            gate_id,
            unit_id: unit_id.into(),
            status,
            metrics: BTreeMap::new(),
            findings: Vec::new(),
            warn_level: None,
            confirmed_by: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    /// The next gate may run: `Pass`, or a confirmed `Warn`.
    pub fn permits_advance(&self) -> bool {
        match self.status {
            GateStatus::Pass => true,
            GateStatus::Warn => self.confirmed_by.is_some(),
            GateStatus::Fail | GateStatus::Pending => false,
        }
    }

    pub fn warning_ids(&self) -> Vec<String> {
        self.findings
            .iter()
            .filter(|f| !f.is_error())
            .map(|f| f.finding_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    /// 1-based; strictly increasing per page.
    pub attempt_number: u32,
    pub feedback: Feedback,
    pub result_verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_ratio: Option<f64>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_digest: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(
        attempt_number: u32,
        feedback: Feedback,
        verdict: &PageVerdict,
        artifact_digest: Option<String>,
    ) -> Self {
        Self {
            attempt_number,
            feedback,
            result_verdict: verdict.verdict,
            coverage_ratio: verdict.coverage_ratio,
            findings: verdict.findings.clone(),
            artifact_digest,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub unit_id: String,
    pub page_index: u32,
    pub reference_tokens: Vec<String>,
    pub generated_tokens: Vec<String>,
    pub coverage_ratio: Option<f64>,
    pub diff: TokenDiff,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_level: Option<WarnLevel>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    pub state: PageState,
    pub finalized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_digest: Option<String>,
}

impl PageRecord {
    pub fn new(unit_id: impl Into<String>, page_index: u32) -> Self {
        Self {
            unit_id: unit_id.into(),
            page_index,
            reference_tokens: Vec::new(),
            generated_tokens: Vec::new(),
            coverage_ratio: None,
            diff: TokenDiff::default(),
            verdict: Verdict::Fail,
            warn_level: None,
            findings: Vec::new(),
            attempts: Vec::new(),
            state: PageState::Pending,
            finalized: false,
            confirmed_by: None,
            artifact_digest: None,
        }
    }

    /// Take the result of a verification pass. Clears any confirmation:
    /// new content needs its own.
    pub fn apply_verdict(&mut self, verdict: &PageVerdict) {
        self.coverage_ratio = verdict.coverage_ratio;
        self.diff = TokenDiff {
            missing: verdict.missing.clone(),
            extra: verdict.extra.clone(),
        };
        self.verdict = verdict.verdict;
        self.warn_level = verdict.warn_level;
        self.findings = verdict.findings.clone();
        self.confirmed_by = None;
        if self.state != PageState::Blocked {
            self.state = PageState::Verified;
            self.finalized = false;
        }
    }

    /// The most recent verdict is `Pass`, or a confirmed `Warn`.
    pub fn can_finalize(&self) -> bool {
        match self.verdict {
            Verdict::Pass => true,
            Verdict::Warn => self.confirmed_by.is_some(),
            Verdict::Fail => false,
        }
    }

    pub fn last_attempt(&self) -> u32 {
        self.attempts.last().map(|a| a.attempt_number).unwrap_or(0)
    }

    pub fn is_blocked(&self) -> bool {
        self.state == PageState::Blocked
    }
}

/// Reference to an opaque consolidated artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub digest: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRecord {
    pub unit_id: String,
    pub unit_number: u32,
    pub first_page: u32,
    pub last_page: u32,
    pub ordered_pages: Vec<PageRecord>,
    /// Latest run's gate results, in gate order.
    pub gate_results: Vec<GateResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidated_artifact: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_verdict: Option<Verdict>,
    pub state: UnitState,
}

impl UnitRecord {
    pub fn new(unit_id: impl Into<String>, unit_number: u32, first_page: u32, last_page: u32) -> Self {
        Self {
            unit_id: unit_id.into(),
            unit_number,
            first_page,
            last_page,
            ordered_pages: Vec::new(),
            gate_results: Vec::new(),
            consolidated_artifact: None,
            overall_verdict: None,
            state: UnitState::ExtractionReady,
        }
    }

    pub fn page(&self, index: u32) -> Option<&PageRecord> {
        self.ordered_pages.iter().find(|p| p.page_index == index)
    }

    pub fn page_mut(&mut self, index: u32) -> Option<&mut PageRecord> {
        self.ordered_pages.iter_mut().find(|p| p.page_index == index)
    }

    /// Every gate before the last recorded one permits advance, and gates
    /// appear in strictly increasing order.
    pub fn gate_order_holds(&self) -> bool {
        let ordered = self
            .gate_results
            .windows(2)
            .all(|pair| pair[0].gate_id < pair[1].gate_id);
        let predecessors_ok = match self.gate_results.split_last() {
            Some((_, earlier)) => earlier.iter().all(GateResult::permits_advance),
            None => true,
        };
        ordered && predecessors_ok
    }

    /// Pages run from `first_page` to `last_page` without gaps.
    pub fn pages_contiguous(&self) -> bool {
        let expected = self.last_page.checked_sub(self.first_page).map(|d| d as usize + 1);
        expected == Some(self.ordered_pages.len())
            && self
                .ordered_pages
                .iter()
                .zip(self.first_page..)
                .all(|(page, index)| page.page_index == index)
    }

    pub fn all_pages_finalized(&self) -> bool {
        !self.ordered_pages.is_empty() && self.ordered_pages.iter().all(|p| p.finalized)
    }

    /// A consolidated artifact may exist only once every page is final and
    /// the pre-consolidation gate permits advance.
    pub fn may_consolidate(&self) -> bool {
        self.all_pages_finalized()
            && self
                .gate_results
                .iter()
                .any(|g| g.gate_id == GateId::PreConsolidation && g.permits_advance())
    }
}

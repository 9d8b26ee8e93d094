//! Run reports: per-page verdict reports, the unit report and its
//! diagnostic bundle. Everything here is derived from a replayed
//! `UnitRecord`, so a report is the same whether it comes from the run that
//! produced the state or from a later read of the ledger.

use folio_kernel::finding::{FailureClass, Finding, sort_findings};
use folio_kernel::record::{
    ArtifactRef, AttemptRecord, GateId, GateResult, GateStatus, PageRecord, PageState, UnitRecord,
    UnitState,
};
use folio_kernel::verdict::{Verdict, WarnLevel};
use folio_ledger::ConfirmTarget;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Process exit status for a unit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Released = 0,
    NeedsConfirmation = 1,
    Blocked = 2,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn of(state: UnitState) -> Self {
        match state {
            UnitState::Released => Self::Released,
            UnitState::Blocked => Self::Blocked,
            _ => Self::NeedsConfirmation,
        }
    }

    /// Worst status across several units.
    pub fn worst(statuses: impl IntoIterator<Item = ExitStatus>) -> Self {
        statuses
            .into_iter()
            .max_by_key(|s| s.code())
            .unwrap_or(Self::Released)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReport {
    pub unit_id: String,
    pub page_index: u32,
    pub coverage_ratio: Option<f64>,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_level: Option<WarnLevel>,
    pub state: PageState,
    pub missing_tokens: BTreeMap<String, usize>,
    pub extra_tokens: BTreeMap<String, usize>,
    pub structural_errors: Vec<Finding>,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_by: Option<String>,
    pub attempt_history: Vec<AttemptRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_digest: Option<String>,
}

impl PageReport {
    pub fn from_record(record: &PageRecord) -> Self {
        Self {
            unit_id: record.unit_id.clone(),
            page_index: record.page_index,
            coverage_ratio: record.coverage_ratio,
            verdict: record.verdict,
            warn_level: record.warn_level,
            state: record.state,
            missing_tokens: record.diff.missing.clone(),
            extra_tokens: record.diff.extra.clone(),
            structural_errors: record
                .findings
                .iter()
                .filter(|f| f.class == FailureClass::StructuralError)
                .cloned()
                .collect(),
            findings: record.findings.clone(),
            confirmed_by: record.confirmed_by.clone(),
            attempt_history: record.attempts.clone(),
            artifact_digest: record.artifact_digest.clone(),
        }
    }

    fn awaits_confirmation(&self) -> bool {
        self.state == PageState::Verified && self.verdict == Verdict::Warn && self.confirmed_by.is_none()
    }
}

/// A warn that halts the unit until someone confirms it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    pub target: ConfirmTarget,
    pub finding_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_level: Option<WarnLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticBundle {
    /// Findings that keep the unit from release, deduplicated and sorted.
    pub findings: Vec<Finding>,
    pub blocked_pages: Vec<u32>,
    pub awaiting_confirmation: Vec<ConfirmationRequest>,
    /// Unit-level problems no regeneration can fix.
    pub manual_intervention: Vec<String>,
}

impl DiagnosticBundle {
    pub fn from_record(unit: &UnitRecord) -> Self {
        let mut bundle = Self::default();
        let mut seen = BTreeSet::new();
        let mut keep = |bundle: &mut Self, finding: &Finding| {
            if seen.insert(finding.finding_id.clone()) {
                bundle.findings.push(finding.clone());
            }
        };

        for page in &unit.ordered_pages {
            let report = PageReport::from_record(page);
            if page.is_blocked() {
                bundle.blocked_pages.push(page.page_index);
                for finding in &page.findings {
                    keep(&mut bundle, finding);
                }
            } else if report.awaits_confirmation() {
                let ids: Vec<String> = page
                    .findings
                    .iter()
                    .filter(|f| !f.is_error())
                    .map(|f| f.finding_id.clone())
                    .collect();
                for finding in page.findings.iter().filter(|f| !f.is_error()) {
                    keep(&mut bundle, finding);
                }
                bundle.awaiting_confirmation.push(ConfirmationRequest {
                    target: ConfirmTarget::Page {
                        page: page.page_index,
                    },
                    finding_ids: ids,
                    warn_level: page.warn_level,
                });
            }
        }

        for gate in &unit.gate_results {
            match gate.status {
                GateStatus::Fail => {
                    for finding in &gate.findings {
                        keep(&mut bundle, finding);
                    }
                }
                GateStatus::Warn if gate.confirmed_by.is_none() => {
                    for finding in gate.findings.iter().filter(|f| !f.is_error()) {
                        keep(&mut bundle, finding);
                    }
                    if gate.gate_id != GateId::PerPageVerification {
                        bundle.awaiting_confirmation.push(ConfirmationRequest {
                            target: ConfirmTarget::Gate { gate: gate.gate_id },
                            finding_ids: gate.warning_ids(),
                            warn_level: gate.warn_level,
                        });
                    }
                }
                _ => {}
            }
        }

        bundle.manual_intervention = bundle
            .findings
            .iter()
            .filter(|f| f.class.is_unit_fatal())
            .map(|f| format!("{}: {}", f.class, f.message))
            .collect();
        if !bundle.blocked_pages.is_empty() {
            bundle.manual_intervention.push(format!(
                "pages {:?} are blocked; fix them by hand or reset their ledger streams",
                bundle.blocked_pages
            ));
        }
        sort_findings(&mut bundle.findings);
        bundle
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
            && self.blocked_pages.is_empty()
            && self.awaiting_confirmation.is_empty()
            && self.manual_intervention.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitReport {
    pub unit_id: String,
    pub run_id: String,
    pub unit_number: u32,
    pub first_page: u32,
    pub last_page: u32,
    pub state: UnitState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_verdict: Option<Verdict>,
    pub gate_results: Vec<GateResult>,
    pub pages: Vec<PageReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidated_artifact: Option<ArtifactRef>,
    pub diagnostics: DiagnosticBundle,
    /// The run stopped on cancellation; a later run resumes it.
    pub cancelled: bool,
    pub exit: ExitStatus,
}

impl UnitReport {
    pub fn from_record(unit: &UnitRecord, run_id: impl Into<String>, cancelled: bool) -> Self {
        Self {
            unit_id: unit.unit_id.clone(),
            run_id: run_id.into(),
            unit_number: unit.unit_number,
            first_page: unit.first_page,
            last_page: unit.last_page,
            state: unit.state,
            overall_verdict: unit.overall_verdict,
            gate_results: unit.gate_results.clone(),
            pages: unit.ordered_pages.iter().map(PageReport::from_record).collect(),
            consolidated_artifact: unit.consolidated_artifact.clone(),
            diagnostics: DiagnosticBundle::from_record(unit),
            cancelled,
            exit: ExitStatus::of(unit.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warn_page(unit: &str, page: u32, confirmed: Option<&str>) -> PageRecord {
        let mut record = PageRecord::new(unit, page);
        record.verdict = Verdict::Warn;
        record.warn_level = Some(WarnLevel::Major);
        record.state = PageState::Verified;
        record.findings = vec![Finding::warning(
            FailureClass::CoverageShortfall,
            format!("{unit}/page-{page:04}"),
            "coverage 90.00% is in the major warn band",
        )];
        record.confirmed_by = confirmed.map(str::to_string);
        record
    }

    #[test]
    fn exit_status_follows_unit_state() {
        assert_eq!(ExitStatus::of(UnitState::Released).code(), 0);
        assert_eq!(ExitStatus::of(UnitState::AwaitingConfirmation).code(), 1);
        assert_eq!(ExitStatus::of(UnitState::PerPageVerification).code(), 1);
        assert_eq!(ExitStatus::of(UnitState::Blocked).code(), 2);
        assert_eq!(
            ExitStatus::worst([ExitStatus::Released, ExitStatus::Blocked, ExitStatus::NeedsConfirmation]),
            ExitStatus::Blocked
        );
        assert_eq!(ExitStatus::worst(Vec::<ExitStatus>::new()), ExitStatus::Released);
    }

    #[test]
    fn unconfirmed_warn_pages_become_confirmation_requests() {
        let mut unit = UnitRecord::new("u1", 1, 1, 2);
        unit.ordered_pages = vec![warn_page("u1", 1, Some("ana")), warn_page("u1", 2, None)];
        unit.state = UnitState::AwaitingConfirmation;

        let bundle = DiagnosticBundle::from_record(&unit);
        assert_eq!(bundle.awaiting_confirmation.len(), 1);
        assert_eq!(bundle.awaiting_confirmation[0].target, ConfirmTarget::Page { page: 2 });
        assert_eq!(bundle.findings.len(), 1);
        assert!(bundle.blocked_pages.is_empty());
        assert!(bundle.manual_intervention.is_empty());
    }

    #[test]
    fn unit_fatal_gate_findings_ask_for_manual_intervention() {
        let mut unit = UnitRecord::new("u2", 2, 10, 15);
        let mut gate = GateResult::new(GateId::BoundaryValidation, "u2", GateStatus::Fail);
        gate.findings.push(Finding::error(
            FailureClass::BoundaryLeak,
            "u2/page-0015",
            "last page of unit 2 contains the opening of unit 3 at 9:1",
        ));
        unit.gate_results.push(gate);
        unit.state = UnitState::Blocked;

        let report = UnitReport::from_record(&unit, "run-1", false);
        assert_eq!(report.exit, ExitStatus::Blocked);
        assert_eq!(report.diagnostics.manual_intervention.len(), 1);
        assert!(report.diagnostics.manual_intervention[0].starts_with("boundary_leak: "));
    }
}

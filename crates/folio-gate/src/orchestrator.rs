//! Gate orchestrator: drives one unit through the gates in order.
//!
//! ```text
//! per_page_verification ─▶ boundary_validation ─▶ pre_consolidation
//!        (fan-out)                                      │ consolidate
//!                                                       ▼
//! final_completeness ◀─ external_visual_judgment ◀─ post_consolidation_structure
//! ```
//!
//! A gate that fails halts the unit in `Blocked`; an unconfirmed warn halts
//! it in `AwaitingConfirmation`. Every decision is appended to the ledger
//! before the next one is taken, so a later run resumes from whatever the
//! ledger holds.

use folio_kernel::boundary::PagePosition;
use folio_kernel::coverage::{CoverageBand, CoverageError, compute_coverage_tokens};
use folio_kernel::finding::{FailureClass, Finding, content_digest, sort_findings};
use folio_kernel::markup::extract_text;
use folio_kernel::record::{
    ArtifactRef, AttemptRecord, GateId, GateResult, GateStatus, PageRecord, UnitRecord, UnitState,
    gate_scope, page_scope,
};
use folio_kernel::structure::validate_structure;
use folio_kernel::token::tokenize;
use folio_kernel::verdict::{PageVerdict, Verdict, WarnLevel};
use folio_ledger::{
    ConfirmTarget, Ledger, LedgerAction, LedgerEvent, LedgerKey, ORCHESTRATOR_ACTOR, POLICY_ACTOR,
    UnitDeclaration, confirmations, covering_actor, latest_verification, new_run_id, replay_page,
    replay_unit, unit_declaration, validate_unit_id,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::blocking::append_event;
use crate::cancel::CancelToken;
use crate::collab::{
    Assembler, CollaboratorError, GenerationService, ReferenceProvider, VisualJudgmentService,
    WrapAssembler,
};
use crate::config::CompiledConfig;
use crate::error::GateError;
use crate::report::UnitReport;
use crate::retry::{PageOutcome, PageProgress, RetryController};
use crate::verify::PageContext;

/// A unit to run: its id, its number in the document, and its page range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSpec {
    pub unit_id: String,
    pub unit_number: u32,
    pub first_page: u32,
    pub last_page: u32,
}

impl UnitSpec {
    pub fn new(unit_id: impl Into<String>, unit_number: u32, first_page: u32, last_page: u32) -> Self {
        Self {
            unit_id: unit_id.into(),
            unit_number,
            first_page,
            last_page,
        }
    }

    pub fn pages(&self) -> RangeInclusive<u32> {
        self.first_page..=self.last_page
    }

    pub fn position(&self, page: u32) -> PagePosition {
        PagePosition::of(page, self.first_page, self.last_page)
    }

    fn declaration(&self) -> UnitDeclaration {
        UnitDeclaration {
            unit_number: self.unit_number,
            first_page: self.first_page,
            last_page: self.last_page,
        }
    }

    fn validate(&self) -> Result<(), GateError> {
        validate_unit_id(&self.unit_id)?;
        if self.first_page > self.last_page {
            return Err(GateError::InvalidPageRange {
                unit_id: self.unit_id.clone(),
                first_page: self.first_page,
                last_page: self.last_page,
            });
        }
        Ok(())
    }
}

/// External services a run depends on. Without an explicit assembler the
/// orchestrator uses a `WrapAssembler` built from `[assembly]`.
#[derive(Clone)]
pub struct Collaborators {
    pub reference: Arc<dyn ReferenceProvider>,
    pub generator: Arc<dyn GenerationService>,
    pub judge: Arc<dyn VisualJudgmentService>,
    pub assembler: Option<Arc<dyn Assembler>>,
}

impl Collaborators {
    pub fn new(
        reference: Arc<dyn ReferenceProvider>,
        generator: Arc<dyn GenerationService>,
        judge: Arc<dyn VisualJudgmentService>,
    ) -> Self {
        Self {
            reference,
            generator,
            judge,
            assembler: None,
        }
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn Assembler>) -> Self {
        self.assembler = Some(assembler);
        self
    }
}

struct Shared {
    config: Arc<CompiledConfig>,
    ledger: Arc<dyn Ledger>,
    reference: Arc<dyn ReferenceProvider>,
    generator: Arc<dyn GenerationService>,
    judge: Arc<dyn VisualJudgmentService>,
    assembler: Arc<dyn Assembler>,
    /// Page workers across every unit in flight.
    pool: Arc<Semaphore>,
}

#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(config: CompiledConfig, ledger: Arc<dyn Ledger>, collaborators: Collaborators) -> Self {
        let assembler = collaborators.assembler.unwrap_or_else(|| {
            Arc::new(WrapAssembler::new(
                config.assembly.container_class.clone(),
                config.assembly.content_class.clone(),
            ))
        });
        let pool = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                ledger,
                reference: collaborators.reference,
                generator: collaborators.generator,
                judge: collaborators.judge,
                assembler,
                pool,
            }),
        }
    }

    pub fn config(&self) -> &CompiledConfig {
        &self.shared.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.shared.ledger
    }

    /// Run one unit as far as the gates allow. Resumes from the ledger:
    /// finalized pages are kept, blocked pages stay blocked, recorded
    /// attempts count toward the bound and recorded confirmations hold.
    pub async fn run_unit(&self, spec: &UnitSpec, cancel: &CancelToken) -> Result<UnitReport, GateError> {
        spec.validate()?;
        let ledger = self.shared.ledger.as_ref();
        let run_id = new_run_id();

        match unit_declaration(ledger, &spec.unit_id)? {
            None => {
                let declared = LedgerEvent::new(
                    &run_id,
                    &spec.unit_id,
                    ORCHESTRATOR_ACTOR,
                    LedgerAction::UnitDeclared {
                        unit_number: spec.unit_number,
                        first_page: spec.first_page,
                        last_page: spec.last_page,
                    },
                );
                append_event(&self.shared.ledger, declared).await?;
            }
            Some(existing) if existing != spec.declaration() => {
                return Err(GateError::ConflictingDeclaration {
                    unit_id: spec.unit_id.clone(),
                });
            }
            Some(_) => {}
        }

        let existing = replay_unit(ledger, &spec.unit_id)?;
        if existing.state.is_terminal() {
            info!(unit = %spec.unit_id, state = existing.state.as_str(), "unit already settled");
            return Ok(UnitReport::from_record(&existing, run_id, false));
        }

        info!(
            unit = %spec.unit_id,
            run = %run_id,
            pages = spec.pages().count(),
            resume_from = existing.state.as_str(),
            "unit run started"
        );
        let mut run = UnitRun {
            shared: Arc::clone(&self.shared),
            spec: spec.clone(),
            run_id,
            state: existing.state,
        };
        let cancelled = run.drive(cancel).await?;

        let record = replay_unit(ledger, &spec.unit_id)?;
        info!(
            unit = %spec.unit_id,
            state = record.state.as_str(),
            cancelled,
            "unit run finished"
        );
        Ok(UnitReport::from_record(&record, run.run_id, cancelled))
    }

    /// Run independent units concurrently. Results come back in input
    /// order; page workers share one pool across all units.
    pub async fn run_units(
        &self,
        specs: Vec<UnitSpec>,
        cancel: &CancelToken,
    ) -> Vec<Result<UnitReport, GateError>> {
        let mut seen = BTreeSet::new();
        let handles: Vec<_> = specs
            .into_iter()
            .map(|spec| {
                let duplicate = !seen.insert(spec.unit_id.clone());
                let orchestrator = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if duplicate {
                        return Err(GateError::DuplicateUnit(spec.unit_id));
                    }
                    orchestrator.run_unit(&spec, &cancel).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(
                handle
                    .await
                    .unwrap_or_else(|err| Err(GateError::Worker(err.to_string()))),
            );
        }
        results
    }
}

enum Flow {
    Advance,
    Halt(UnitState),
}

/// State of one `run_unit` call.
struct UnitRun {
    shared: Arc<Shared>,
    spec: UnitSpec,
    run_id: String,
    state: UnitState,
}

impl UnitRun {
    /// Returns whether the run stopped on cancellation.
    async fn drive(&mut self, cancel: &CancelToken) -> Result<bool, GateError> {
        let mut consolidated: Option<String> = None;
        for gate in GateId::ALL {
            if cancel.is_cancelled() {
                info!(unit = %self.spec.unit_id, gate = %gate, "run cancelled before gate");
                return Ok(true);
            }
            self.transition(gate.state()).await?;

            let (result, confirmable) = match gate {
                GateId::PerPageVerification => match self.per_page_verification(cancel).await? {
                    Some(result) => (result, false),
                    None => return Ok(true),
                },
                GateId::BoundaryValidation => (self.boundary_validation()?, true),
                GateId::PreConsolidation => (self.pre_consolidation()?, true),
                GateId::PostConsolidationStructure => {
                    (self.post_consolidation_structure(consolidated_text(&consolidated)?), true)
                }
                GateId::ExternalVisualJudgment => (
                    self.external_visual_judgment(consolidated_text(&consolidated)?)
                        .await,
                    true,
                ),
                GateId::FinalCompleteness => {
                    (self.final_completeness(consolidated_text(&consolidated)?)?, true)
                }
            };

            if let Flow::Halt(state) = self.conclude(result, confirmable).await? {
                self.transition(state).await?;
                return Ok(false);
            }

            if gate == GateId::PreConsolidation {
                self.transition(UnitState::Consolidated).await?;
                consolidated = Some(self.consolidate().await?);
            }
        }
        self.transition(UnitState::Released).await?;
        Ok(false)
    }

    /// Apply stored or policy confirmation to a warn, record the result
    /// and decide whether the unit moves on.
    async fn conclude(&mut self, mut result: GateResult, confirmable: bool) -> Result<Flow, GateError> {
        let gate = result.gate_id;
        if confirmable && result.status == GateStatus::Warn && result.confirmed_by.is_none() {
            let warning_ids = result.warning_ids();
            let mut history = self
                .shared
                .ledger
                .history(&LedgerKey::Gate(self.spec.unit_id.clone(), gate))?;
            // The last page's own confirmation covers the same missing-closing id.
            if gate == GateId::BoundaryValidation {
                history.extend(
                    self.shared
                        .ledger
                        .history(&LedgerKey::Page(self.spec.unit_id.clone(), self.spec.last_page))?,
                );
            }
            if let Some(actor) = covering_actor(&confirmations(&history), &warning_ids) {
                result.confirmed_by = Some(actor);
            } else if result.warn_level == Some(WarnLevel::Minor)
                && self.shared.config.warn.auto_confirm_minor
            {
                self.record(
                    POLICY_ACTOR,
                    LedgerAction::WarnConfirmed {
                        target: ConfirmTarget::Gate { gate },
                        finding_ids: warning_ids,
                        note: Some("minor warn confirmed by policy".to_string()),
                    },
                )
                .await?;
                result.confirmed_by = Some(POLICY_ACTOR.to_string());
            }
        }

        let advance = result.permits_advance();
        let halt = match result.status {
            GateStatus::Warn => UnitState::AwaitingConfirmation,
            _ => UnitState::Blocked,
        };
        if advance {
            info!(
                unit = %self.spec.unit_id,
                gate = %gate,
                status = ?result.status,
                confirmed_by = result.confirmed_by.as_deref().unwrap_or("-"),
                "gate passed"
            );
        } else {
            warn!(
                unit = %self.spec.unit_id,
                gate = %gate,
                status = ?result.status,
                findings = result.findings.len(),
                "gate halted unit"
            );
        }
        self.record(
            ORCHESTRATOR_ACTOR,
            LedgerAction::GateRecorded {
                result: Box::new(result),
            },
        )
        .await?;
        Ok(if advance { Flow::Advance } else { Flow::Halt(halt) })
    }

    async fn per_page_verification(&self, cancel: &CancelToken) -> Result<Option<GateResult>, GateError> {
        let retry = RetryController::new(
            Arc::clone(&self.shared.config),
            Arc::clone(&self.shared.generator),
            Arc::clone(&self.shared.ledger),
            self.run_id.clone(),
        );

        let mut tasks = JoinSet::new();
        for page in self.spec.pages() {
            let shared = Arc::clone(&self.shared);
            let retry = retry.clone();
            let spec = self.spec.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = Arc::clone(&shared.pool)
                    .acquire_owned()
                    .await
                    .map_err(|err| GateError::Worker(err.to_string()))?;
                let outcome = process_page(&shared, &retry, &spec, page, &cancel).await?;
                Ok::<_, GateError>((page, outcome))
            });
        }

        let mut outcomes = BTreeMap::new();
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((page, outcome))) => {
                    outcomes.insert(page, outcome);
                }
                Ok(Err(err)) => {
                    failure.get_or_insert(err);
                }
                Err(err) => {
                    failure.get_or_insert(GateError::Worker(err.to_string()));
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }
        if outcomes.values().any(|o| matches!(o, PageOutcome::Cancelled)) {
            info!(unit = %self.spec.unit_id, "per-page verification cancelled");
            return Ok(None);
        }

        let unit = replay_unit(self.shared.ledger.as_ref(), &self.spec.unit_id)?;
        Ok(Some(per_page_result(&unit)))
    }

    fn boundary_validation(&self) -> Result<GateResult, GateError> {
        let spec = &self.spec;
        let mut result = GateResult::new(GateId::BoundaryValidation, &spec.unit_id, GateStatus::Pass);
        let first = self.final_artifact(spec.first_page)?;
        let last = self.final_artifact(spec.last_page)?;
        let (Some(first), Some(last)) = (first, last) else {
            result.status = GateStatus::Fail;
            result.findings.push(Finding::error(
                FailureClass::PagesNotFinalized,
                gate_scope(&spec.unit_id, GateId::BoundaryValidation),
                "first or last page has no verified artifact",
            ));
            return Ok(result);
        };

        let patterns = &self.shared.config.boundary;
        let opening = patterns.check_opening(
            &page_scope(&spec.unit_id, spec.first_page),
            &first,
            spec.unit_number,
        );
        let closing = patterns.check_closing(
            &page_scope(&spec.unit_id, spec.last_page),
            &last,
            spec.unit_number,
        );

        result.status = Verdict::worst([opening.status, closing.status]).into();
        if result.status == GateStatus::Warn {
            result.warn_level = Some(WarnLevel::Minor);
        }
        let flag = |b: Option<bool>| if b == Some(true) { 1.0 } else { 0.0 };
        result = result
            .with_metric("opening_found", flag(opening.opening_found))
            .with_metric("closing_found", flag(closing.closing_found))
            .with_metric("leak", if closing.has_leak() { 1.0 } else { 0.0 });
        if let Some(leak) = &closing.leak {
            warn!(
                unit = %spec.unit_id,
                page = spec.last_page,
                next_unit = leak.number,
                at = %leak.location,
                "next unit opening leaked into last page"
            );
        }
        result.findings = opening.findings;
        result.findings.extend(closing.findings);
        sort_findings(&mut result.findings);
        Ok(result)
    }

    fn pre_consolidation(&self) -> Result<GateResult, GateError> {
        let spec = &self.spec;
        let scope = gate_scope(&spec.unit_id, GateId::PreConsolidation);
        let unit = replay_unit(self.shared.ledger.as_ref(), &spec.unit_id)?;
        let mut result = GateResult::new(GateId::PreConsolidation, &spec.unit_id, GateStatus::Pass);

        let present: BTreeSet<u32> = unit.ordered_pages.iter().map(|p| p.page_index).collect();
        let gaps: Vec<u32> = spec.pages().filter(|p| !present.contains(p)).collect();
        if !gaps.is_empty() || !unit.pages_contiguous() {
            result.findings.push(
                Finding::error(
                    FailureClass::PageSequenceGap,
                    &scope,
                    format!("pages {}..={} are not contiguous", spec.first_page, spec.last_page),
                )
                .with_details(json!({ "missingPages": gaps })),
            );
        }

        let unfinalized: Vec<u32> = unit
            .ordered_pages
            .iter()
            .filter(|p| !p.finalized)
            .map(|p| p.page_index)
            .collect();
        if !unfinalized.is_empty() {
            result.findings.push(
                Finding::error(
                    FailureClass::PagesNotFinalized,
                    &scope,
                    format!("{} page(s) are not finalized", unfinalized.len()),
                )
                .with_details(json!({ "pages": unfinalized })),
            );
        }

        let finalized = unit.ordered_pages.iter().filter(|p| p.finalized).count();
        result = result
            .with_metric("pages_expected", spec.pages().count() as f64)
            .with_metric("pages_finalized", finalized as f64);
        if !result.findings.is_empty() {
            result.status = GateStatus::Fail;
        }
        Ok(result)
    }

    async fn consolidate(&self) -> Result<String, GateError> {
        let spec = &self.spec;
        let mut pages = Vec::new();
        for page in spec.pages() {
            let artifact = self
                .final_artifact(page)?
                .ok_or_else(|| GateError::MissingArtifact {
                    unit_id: spec.unit_id.clone(),
                    page,
                })?;
            pages.push((page, artifact));
        }
        let artifact = self
            .shared
            .assembler
            .consolidate(&spec.unit_id, &pages)
            .await
            .map_err(|source| GateError::Assembly {
                unit_id: spec.unit_id.clone(),
                source,
            })?;
        let reference = ArtifactRef {
            digest: content_digest(&artifact),
            bytes: artifact.len(),
        };
        info!(unit = %spec.unit_id, digest = %reference.digest, bytes = reference.bytes, "unit consolidated");
        self.record(
            ORCHESTRATOR_ACTOR,
            LedgerAction::UnitConsolidated {
                artifact: reference,
            },
        )
        .await?;
        Ok(artifact)
    }

    fn post_consolidation_structure(&self, artifact: &str) -> GateResult {
        let gate = GateId::PostConsolidationStructure;
        let scope = gate_scope(&self.spec.unit_id, gate);
        let report = validate_structure(artifact, &self.shared.config.structure);
        let mut result = GateResult::new(gate, &self.spec.unit_id, GateStatus::Pass)
            .with_metric("structural_errors", report.errors.len() as f64);
        for error in &report.errors {
            let mut finding = Finding::error(FailureClass::StructuralError, &scope, error.message.clone())
                .with_code(error.code);
            if let Some(location) = error.location {
                finding = finding.with_location(location.to_string());
            }
            result.findings.push(finding);
        }
        if !report.passed() {
            result.status = GateStatus::Fail;
        }
        sort_findings(&mut result.findings);
        result
    }

    async fn external_visual_judgment(&self, artifact: &str) -> GateResult {
        let gate = GateId::ExternalVisualJudgment;
        let scope = gate_scope(&self.spec.unit_id, gate);
        let config = &self.shared.config;
        let limit = config.judgment_timeout();
        let mut result = GateResult::new(gate, &self.spec.unit_id, GateStatus::Pass);

        let judged = tokio::time::timeout(limit, self.shared.judge.score(&self.spec.unit_id, artifact)).await;
        let judgment = match judged {
            Ok(Ok(judgment)) => judgment,
            Ok(Err(err)) => {
                warn!(unit = %self.spec.unit_id, error = %err, "visual judgment failed");
                result.status = GateStatus::Fail;
                result
                    .findings
                    .push(Finding::error(FailureClass::ExternalJudgmentFailed, &scope, err.to_string()));
                return result;
            }
            Err(_) => {
                warn!(
                    unit = %self.spec.unit_id,
                    timeout_ms = limit.as_millis() as u64,
                    "visual judgment timed out"
                );
                result.status = GateStatus::Fail;
                result.findings.push(Finding::error(
                    FailureClass::ExternalJudgmentTimeout,
                    &scope,
                    format!("visual judgment exceeded {} ms", limit.as_millis()),
                ));
                return result;
            }
        };

        let score = judgment.score;
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            result.status = GateStatus::Fail;
            result.findings.push(Finding::error(
                FailureClass::ExternalJudgmentFailed,
                &scope,
                format!("visual score {score} is outside [0, 100]"),
            ));
            return result;
        }

        result = result.with_metric("visual_score", score);
        let details = json!({
            "score": score,
            "rationale": judgment.rationale,
            "passAtOrAbove": config.visual.pass_at_or_above,
            "warnAtOrAbove": config.visual.warn_at_or_above,
        });
        if score >= config.visual.pass_at_or_above {
            debug!(unit = %self.spec.unit_id, score, "visual judgment passed");
        } else if score >= config.visual.warn_at_or_above {
            result.status = GateStatus::Warn;
            result.warn_level = Some(WarnLevel::Major);
            result.findings.push(
                Finding::warning(
                    FailureClass::VisualMismatch,
                    &scope,
                    format!(
                        "visual score {score:.1} is below {:.1}",
                        config.visual.pass_at_or_above
                    ),
                )
                .with_details(details),
            );
        } else {
            result.status = GateStatus::Fail;
            result.findings.push(
                Finding::error(
                    FailureClass::VisualMismatch,
                    &scope,
                    format!(
                        "visual score {score:.1} is below the warn floor {:.1}",
                        config.visual.warn_at_or_above
                    ),
                )
                .with_details(details),
            );
        }
        result
    }

    fn final_completeness(&self, artifact: &str) -> Result<GateResult, GateError> {
        let gate = GateId::FinalCompleteness;
        let scope = gate_scope(&self.spec.unit_id, gate);
        let unit = replay_unit(self.shared.ledger.as_ref(), &self.spec.unit_id)?;
        let mut result = GateResult::new(gate, &self.spec.unit_id, GateStatus::Pass);

        if !unit.all_pages_finalized() {
            result.findings.push(Finding::error(
                FailureClass::PagesNotFinalized,
                &scope,
                "a page lost its finalized state before release",
            ));
        }

        let reference: Vec<String> = unit
            .ordered_pages
            .iter()
            .flat_map(|p| p.reference_tokens.iter().cloned())
            .collect();
        let generated = tokenize(&extract_text(artifact));
        match compute_coverage_tokens(&reference, &generated) {
            Ok(report) => {
                let thresholds = &self.shared.config.completeness;
                let band = thresholds.classify(report.ratio);
                result = result
                    .with_metric("coverage_ratio", report.ratio)
                    .with_metric("reference_tokens", report.reference_count as f64)
                    .with_metric("generated_tokens", report.generated_count as f64);
                let details = json!({
                    "band": band.as_str(),
                    "missingTotal": report.diff.missing_total(),
                    "extraTotal": report.diff.extra_total(),
                    "missing": report.diff.missing,
                    "extra": report.diff.extra,
                });
                let message = format!("unit coverage {:.2}% is in the {} band", report.ratio, band.as_str());
                match band {
                    CoverageBand::Exact => {}
                    CoverageBand::Minor | CoverageBand::Major => {
                        result.warn_level = band.warn_level();
                        result.findings.push(
                            Finding::warning(FailureClass::CompletenessShortfall, &scope, message)
                                .with_details(details),
                        );
                    }
                    CoverageBand::Deficit => result.findings.push(
                        Finding::error(FailureClass::CompletenessDeficit, &scope, message)
                            .with_details(details),
                    ),
                    CoverageBand::Excess => result.findings.push(
                        Finding::error(FailureClass::CompletenessExcess, &scope, message)
                            .with_details(details),
                    ),
                }
            }
            Err(CoverageError::MissingReference) => {
                result.findings.push(Finding::error(
                    FailureClass::CompletenessDeficit,
                    &scope,
                    CoverageError::MissingReference.to_string(),
                ));
            }
        }

        result.status = if result.findings.iter().any(Finding::is_error) {
            GateStatus::Fail
        } else if result.findings.is_empty() {
            GateStatus::Pass
        } else {
            GateStatus::Warn
        };
        if result.status != GateStatus::Warn {
            result.warn_level = None;
        }
        sort_findings(&mut result.findings);
        Ok(result)
    }

    fn final_artifact(&self, page: u32) -> Result<Option<String>, GateError> {
        let history = self
            .shared
            .ledger
            .history(&LedgerKey::Page(self.spec.unit_id.clone(), page))?;
        Ok(latest_verification(&history).map(|v| v.artifact.clone()))
    }

    async fn transition(&mut self, to: UnitState) -> Result<(), GateError> {
        if self.state == to {
            return Ok(());
        }
        debug!(
            unit = %self.spec.unit_id,
            from = self.state.as_str(),
            to = to.as_str(),
            "unit state"
        );
        self.record(
            ORCHESTRATOR_ACTOR,
            LedgerAction::UnitStateChanged {
                from: self.state,
                to,
            },
        )
        .await?;
        self.state = to;
        Ok(())
    }

    async fn record(&self, actor: &str, action: LedgerAction) -> Result<(), GateError> {
        append_event(
            &self.shared.ledger,
            LedgerEvent::new(&self.run_id, &self.spec.unit_id, actor, action),
        )
        .await
    }
}

fn consolidated_text(consolidated: &Option<String>) -> Result<&str, GateError> {
    consolidated.as_deref().ok_or_else(|| GateError::Worker(
        "consolidated artifact missing after pre-consolidation".to_string(),
    ))
}

/// Verify one page from wherever the ledger left it.
async fn process_page(
    shared: &Shared,
    retry: &RetryController,
    spec: &UnitSpec,
    page: u32,
    cancel: &CancelToken,
) -> Result<PageOutcome, GateError> {
    let history = shared
        .ledger
        .history(&LedgerKey::Page(spec.unit_id.clone(), page))?;
    let record = replay_page(&spec.unit_id, page, &history);
    if record.is_blocked() {
        debug!(unit = %spec.unit_id, page, "page already blocked");
        return Ok(PageOutcome::Blocked {
            findings: record.findings,
        });
    }
    if record.finalized {
        return Ok(PageOutcome::Finalized {
            confirmed_by: record.confirmed_by,
        });
    }
    if cancel.is_cancelled() {
        return Ok(PageOutcome::Cancelled);
    }

    let reference = match shared.reference.page_text(&spec.unit_id, page).await {
        Ok(text) => Ok(text),
        Err(CollaboratorError::NotFound(what)) => {
            warn!(unit = %spec.unit_id, page, missing = %what, "reference text not found");
            Err(format!("reference text not found: {what}"))
        }
        Err(source) => {
            return Err(GateError::Reference {
                unit_id: spec.unit_id.clone(),
                page,
                source,
            });
        }
    };
    let ctx = PageContext::new(
        &spec.unit_id,
        spec.unit_number,
        page,
        spec.position(page),
        reference.as_deref().unwrap_or_default(),
        &shared.config,
    );
    if !ctx.has_reference() {
        let message = reference
            .err()
            .unwrap_or_else(|| CoverageError::MissingReference.to_string());
        let finding = Finding::error(FailureClass::MissingReference, ctx.scope(), message);
        return retry.block(&ctx, vec![finding]).await;
    }

    let verdict = match resume_verdict(&ctx, &record, &history) {
        Some(verdict) => {
            debug!(unit = %spec.unit_id, page, attempts = record.attempts.len(), "resuming page");
            verdict
        }
        None => retry.initial(&ctx).await?,
    };
    let progress = PageProgress {
        verdict,
        attempts: record.attempts,
    };
    retry
        .drive_page(&ctx, progress, &confirmations(&history), cancel)
        .await
}

/// The verdict a page last stood at, if anything was recorded. An attempt
/// newer than the last verification produced no content.
fn resume_verdict(
    ctx: &PageContext,
    record: &PageRecord,
    history: &[LedgerEvent],
) -> Option<PageVerdict> {
    let verified = latest_verification(history);
    match (verified, record.attempts.last()) {
        (Some(v), Some(last)) if last.attempt_number > v.attempt => Some(empty_attempt_verdict(ctx, last)),
        (Some(v), _) => Some(v.verdict.clone()),
        (None, Some(last)) => Some(empty_attempt_verdict(ctx, last)),
        (None, None) => None,
    }
}

fn empty_attempt_verdict(ctx: &PageContext, attempt: &AttemptRecord) -> PageVerdict {
    let mut verdict = PageVerdict::failed(Finding::error(
        FailureClass::GenerationFailed,
        ctx.scope(),
        "generation produced no content",
    ));
    if !attempt.findings.is_empty() {
        verdict.findings = attempt.findings.clone();
    }
    verdict
}

/// Aggregate page outcomes into the per-page gate result. A warn here is
/// confirmed page by page, never at the gate.
fn per_page_result(unit: &UnitRecord) -> GateResult {
    let pages = &unit.ordered_pages;
    let mut result = GateResult::new(GateId::PerPageVerification, &unit.unit_id, GateStatus::Pass);

    let blocked: Vec<&PageRecord> = pages.iter().filter(|p| p.is_blocked()).collect();
    let warned: Vec<&PageRecord> = pages
        .iter()
        .filter(|p| !p.is_blocked() && p.verdict == Verdict::Warn)
        .collect();
    let awaiting = warned.iter().filter(|p| !p.finalized).count();

    for page in &blocked {
        result.findings.extend(page.findings.iter().cloned());
    }
    for page in &warned {
        result
            .findings
            .extend(page.findings.iter().filter(|f| !f.is_error()).cloned());
    }
    sort_findings(&mut result.findings);

    if !blocked.is_empty() {
        result.status = GateStatus::Fail;
    } else if !warned.is_empty() {
        result.status = GateStatus::Warn;
        result.warn_level = warned.iter().filter_map(|p| p.warn_level).max();
        if awaiting == 0 {
            let confirmers: BTreeSet<&str> = warned
                .iter()
                .filter_map(|p| p.confirmed_by.as_deref())
                .collect();
            result.confirmed_by = Some(confirmers.into_iter().collect::<Vec<_>>().join(","));
        }
    }

    let ratios: Vec<f64> = pages.iter().filter_map(|p| p.coverage_ratio).collect();
    let attempts: usize = pages.iter().map(|p| p.attempts.len()).sum();
    result = result
        .with_metric("pages", pages.len() as f64)
        .with_metric("finalized", pages.iter().filter(|p| p.finalized).count() as f64)
        .with_metric("blocked", blocked.len() as f64)
        .with_metric("awaiting_confirmation", awaiting as f64)
        .with_metric("attempts", attempts as f64);
    if !ratios.is_empty() {
        let min = ratios.iter().copied().fold(f64::INFINITY, f64::min);
        let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
        result = result
            .with_metric("min_coverage", min)
            .with_metric("mean_coverage", mean);
    }
    result
}

//! Rebuild unit and page records from ledger history.
//!
//! Replay is a pure fold over the streams: the same history always yields
//! the same `UnitRecord`.

use chrono::{DateTime, Utc};
use folio_kernel::record::{GateResult, GateStatus, PageRecord, PageState, UnitRecord, UnitState};
use folio_kernel::verdict::Verdict;
use std::collections::BTreeMap;

use crate::event::{LedgerAction, LedgerEvent, PageVerification};
use crate::jsonl::gate_keys;
use crate::ledger::{Ledger, LedgerError, LedgerKey};

/// Declared shape of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitDeclaration {
    pub unit_number: u32,
    pub first_page: u32,
    pub last_page: u32,
}

/// A recorded `warn_confirmed` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub actor: String,
    pub finding_ids: Vec<String>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl Confirmation {
    /// Confirms every id in `warning_ids`. A confirmation never covers a
    /// warning it has not seen, so new warnings need a new confirmation.
    pub fn covers(&self, warning_ids: &[String]) -> bool {
        !warning_ids.is_empty() && warning_ids.iter().all(|id| self.finding_ids.contains(id))
    }
}

pub fn confirmations(history: &[LedgerEvent]) -> Vec<Confirmation> {
    history
        .iter()
        .filter_map(|event| match &event.action {
            LedgerAction::WarnConfirmed {
                finding_ids, note, ..
            } => Some(Confirmation {
                actor: event.actor.clone(),
                finding_ids: finding_ids.clone(),
                note: note.clone(),
                occurred_at: event.occurred_at,
            }),
            _ => None,
        })
        .collect()
}

/// Actor of the most recent confirmation covering `warning_ids`.
pub fn covering_actor(confirmations: &[Confirmation], warning_ids: &[String]) -> Option<String> {
    confirmations
        .iter()
        .rev()
        .find(|c| c.covers(warning_ids))
        .map(|c| c.actor.clone())
}

/// The last verification recorded in a page stream.
pub fn latest_verification(history: &[LedgerEvent]) -> Option<&PageVerification> {
    history.iter().rev().find_map(|event| match &event.action {
        LedgerAction::PageVerified { verification, .. } => Some(verification.as_ref()),
        _ => None,
    })
}

pub fn unit_declaration<L: Ledger + ?Sized>(
    ledger: &L,
    unit_id: &str,
) -> Result<Option<UnitDeclaration>, LedgerError> {
    let history = ledger.history(&LedgerKey::Unit(unit_id.to_string()))?;
    Ok(history.iter().find_map(|event| match event.action {
        LedgerAction::UnitDeclared {
            unit_number,
            first_page,
            last_page,
        } => Some(UnitDeclaration {
            unit_number,
            first_page,
            last_page,
        }),
        _ => None,
    }))
}

/// Fold one page stream into a `PageRecord`.
pub fn replay_page(unit_id: &str, page: u32, history: &[LedgerEvent]) -> PageRecord {
    let mut record = PageRecord::new(unit_id, page);
    for event in history {
        match &event.action {
            LedgerAction::PageVerified { verification, .. } => {
                record.reference_tokens = verification.reference_tokens.clone();
                record.generated_tokens = verification.generated_tokens.clone();
                record.artifact_digest = Some(verification.artifact_digest.clone());
                record.apply_verdict(&verification.verdict);
            }
            LedgerAction::AttemptRecorded { attempt, .. } => {
                record.attempts.push(attempt.as_ref().clone());
            }
            LedgerAction::PageFinalized { .. } => {
                if record.state != PageState::Blocked {
                    record.state = PageState::Finalized;
                    record.finalized = true;
                }
            }
            LedgerAction::PageBlocked { findings, .. } => {
                record.state = PageState::Blocked;
                record.finalized = false;
                for finding in findings {
                    if !record.findings.contains(finding) {
                        record.findings.push(finding.clone());
                    }
                }
            }
            _ => {}
        }
    }
    if record.verdict == Verdict::Warn {
        let warning_ids: Vec<String> = record
            .findings
            .iter()
            .filter(|f| !f.is_error())
            .map(|f| f.finding_id.clone())
            .collect();
        record.confirmed_by = covering_actor(&confirmations(history), &warning_ids);
    }
    record
}

/// Rebuild the full projection of a unit.
pub fn replay_unit<L: Ledger + ?Sized>(ledger: &L, unit_id: &str) -> Result<UnitRecord, LedgerError> {
    let unit_history = ledger.history(&LedgerKey::Unit(unit_id.to_string()))?;
    let declaration = unit_history
        .iter()
        .find_map(|event| match event.action {
            LedgerAction::UnitDeclared {
                unit_number,
                first_page,
                last_page,
            } => Some((unit_number, first_page, last_page)),
            _ => None,
        })
        .ok_or_else(|| LedgerError::UnknownUnit(unit_id.to_string()))?;

    let (unit_number, first_page, last_page) = declaration;
    let mut unit = UnitRecord::new(unit_id, unit_number, first_page, last_page);

    for event in &unit_history {
        match &event.action {
            LedgerAction::UnitStateChanged { to, .. } => unit.state = *to,
            LedgerAction::UnitConsolidated { artifact } => {
                unit.consolidated_artifact = Some(artifact.clone());
            }
            _ => {}
        }
    }

    for page in first_page..=last_page {
        let history = ledger.history(&LedgerKey::Page(unit_id.to_string(), page))?;
        if !history.is_empty() {
            unit.ordered_pages.push(replay_page(unit_id, page, &history));
        }
    }

    unit.gate_results = latest_run_gates(ledger, unit_id)?;
    unit.overall_verdict = overall_verdict(&unit);
    Ok(unit)
}

/// Gate results from the most recent run that recorded any, one per gate,
/// in gate order, with later confirmations applied.
fn latest_run_gates<L: Ledger + ?Sized>(
    ledger: &L,
    unit_id: &str,
) -> Result<Vec<GateResult>, LedgerError> {
    let mut recorded: Vec<(DateTime<Utc>, String, GateResult)> = Vec::new();
    let mut gate_confirmations = BTreeMap::new();
    for key in gate_keys(unit_id) {
        let history = ledger.history(&key)?;
        if let LedgerKey::Gate(_, gate) = &key {
            gate_confirmations.insert(*gate, confirmations(&history));
        }
        for event in history {
            if let LedgerAction::GateRecorded { result } = event.action {
                recorded.push((event.occurred_at, event.run_id, *result));
            }
        }
    }

    let Some(latest_run) = recorded
        .iter()
        .max_by_key(|(at, _, _)| *at)
        .map(|(_, run, _)| run.clone())
    else {
        return Ok(Vec::new());
    };

    let mut by_gate = BTreeMap::new();
    for (_, run, result) in recorded {
        if run == latest_run {
            by_gate.insert(result.gate_id, result);
        }
    }

    Ok(by_gate
        .into_values()
        .map(|mut result| {
            if result.status == GateStatus::Warn
                && result.confirmed_by.is_none()
                && let Some(found) = gate_confirmations.get(&result.gate_id)
            {
                result.confirmed_by = covering_actor(found, &result.warning_ids());
            }
            result
        })
        .collect())
}

fn overall_verdict(unit: &UnitRecord) -> Option<Verdict> {
    match unit.state {
        UnitState::Released => Some(Verdict::worst(
            unit.gate_results
                .iter()
                .map(|g| if g.status == GateStatus::Warn { Verdict::Warn } else { Verdict::Pass }),
        )),
        UnitState::Blocked => Some(Verdict::Fail),
        UnitState::AwaitingConfirmation => Some(Verdict::Warn),
        _ => None,
    }
}

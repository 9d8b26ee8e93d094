//! Operator confirmation of warns.
//!
//! A confirmation names the warning findings it covers. The next run
//! finalizes the page or advances past the gate; content that changes in
//! the meantime carries new findings and needs a new confirmation.

use folio_kernel::record::{GateId, GateStatus, PageState};
use folio_kernel::verdict::Verdict;
use folio_ledger::{
    ConfirmTarget, Ledger, LedgerAction, LedgerError, LedgerEvent, LedgerKey, ORCHESTRATOR_ACTOR,
    POLICY_ACTOR, new_run_id, replay_page, replay_unit, unit_declaration,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::GateError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationReceipt {
    pub unit_id: String,
    pub target: ConfirmTarget,
    pub actor: String,
    pub finding_ids: Vec<String>,
}

pub fn confirm_page_warn(
    ledger: &dyn Ledger,
    unit_id: &str,
    page: u32,
    operator: &str,
    note: Option<String>,
) -> Result<ConfirmationReceipt, GateError> {
    check_operator(operator)?;
    if unit_declaration(ledger, unit_id)?.is_none() {
        return Err(LedgerError::UnknownUnit(unit_id.to_string()).into());
    }
    let target = ConfirmTarget::Page { page };
    let history = ledger.history(&LedgerKey::Page(unit_id.to_string(), page))?;
    let record = replay_page(unit_id, page, &history);
    let nothing = |reason: String| GateError::NothingToConfirm {
        target: format!("{unit_id} page {page}"),
        reason,
    };

    match record.state {
        PageState::Pending => return Err(nothing("page has not been verified".to_string())),
        PageState::Blocked => return Err(nothing("page is blocked".to_string())),
        PageState::Finalized => return Err(nothing("page is already finalized".to_string())),
        PageState::Verified => {}
    }
    if record.verdict != Verdict::Warn {
        return Err(nothing(format!("latest verdict is {}", record.verdict.as_str())));
    }
    if let Some(actor) = &record.confirmed_by {
        return Err(nothing(format!("already confirmed by {actor}")));
    }

    let finding_ids: Vec<String> = record
        .findings
        .iter()
        .filter(|f| !f.is_error())
        .map(|f| f.finding_id.clone())
        .collect();
    append_confirmation(ledger, unit_id, target, operator, finding_ids, note)
}

pub fn confirm_gate_warn(
    ledger: &dyn Ledger,
    unit_id: &str,
    gate: GateId,
    operator: &str,
    note: Option<String>,
) -> Result<ConfirmationReceipt, GateError> {
    check_operator(operator)?;
    let target = ConfirmTarget::Gate { gate };
    let nothing = |reason: &str| GateError::NothingToConfirm {
        target: format!("{unit_id} gate {gate}"),
        reason: reason.to_string(),
    };
    if gate == GateId::PerPageVerification {
        return Err(nothing("per-page warns are confirmed page by page"));
    }

    let unit = replay_unit(ledger, unit_id)?;
    let result = unit
        .gate_results
        .iter()
        .find(|g| g.gate_id == gate)
        .ok_or_else(|| GateError::NoGateResult {
            unit_id: unit_id.to_string(),
            gate,
        })?;
    if result.status != GateStatus::Warn {
        return Err(nothing("latest result is not a warn"));
    }
    if result.confirmed_by.is_some() {
        return Err(nothing("already confirmed"));
    }
    append_confirmation(ledger, unit_id, target, operator, result.warning_ids(), note)
}

fn check_operator(operator: &str) -> Result<(), GateError> {
    let operator = operator.trim();
    if operator.is_empty() || operator == POLICY_ACTOR || operator == ORCHESTRATOR_ACTOR {
        return Err(GateError::ReservedActor(operator.to_string()));
    }
    Ok(())
}

fn append_confirmation(
    ledger: &dyn Ledger,
    unit_id: &str,
    target: ConfirmTarget,
    operator: &str,
    finding_ids: Vec<String>,
    note: Option<String>,
) -> Result<ConfirmationReceipt, GateError> {
    let operator = operator.trim();
    ledger.record(LedgerEvent::new(
        new_run_id(),
        unit_id,
        operator,
        LedgerAction::WarnConfirmed {
            target,
            finding_ids: finding_ids.clone(),
            note,
        },
    ))?;
    info!(unit = %unit_id, target = ?target, operator, findings = finding_ids.len(), "warn confirmed");
    Ok(ConfirmationReceipt {
        unit_id: unit_id.to_string(),
        target,
        actor: operator.to_string(),
        finding_ids,
    })
}

//! Ledger event envelope.
//!
//! `folio.ledger.event.v1` is one JSON line per state change. The envelope
//! names the unit, the run that produced the event and the actor; the
//! flattened `action` carries the payload.

use chrono::{DateTime, Utc};
use folio_kernel::record::{ArtifactRef, AttemptRecord, GateId, GateResult, UnitState};
use folio_kernel::verdict::{PageVerdict, Verdict};
use folio_kernel::{Finding, content_digest};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::LedgerKey;

pub const LEDGER_EVENT_SCHEMA: &str = "folio.ledger.event.v1";

/// Actor recorded for confirmations granted by configuration.
pub const POLICY_ACTOR: &str = "policy";
/// Actor recorded for events the orchestrator emits itself.
pub const ORCHESTRATOR_ACTOR: &str = "orchestrator";

fn default_schema() -> String {
    LEDGER_EVENT_SCHEMA.to_string()
}

/// What a `warn_confirmed` event confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfirmTarget {
    Page { page: u32 },
    Gate { gate: GateId },
}

/// One page verification: the artifact that was checked and its verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVerification {
    /// 0 for the initial content, otherwise the regeneration attempt.
    pub attempt: u32,
    pub verdict: PageVerdict,
    pub artifact: String,
    pub artifact_digest: String,
    pub reference_tokens: Vec<String>,
    pub generated_tokens: Vec<String>,
}

impl PageVerification {
    pub fn new(
        attempt: u32,
        verdict: PageVerdict,
        artifact: String,
        reference_tokens: Vec<String>,
        generated_tokens: Vec<String>,
    ) -> Self {
        let artifact_digest = content_digest(&artifact);
        Self {
            attempt,
            verdict,
            artifact,
            artifact_digest,
            reference_tokens,
            generated_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LedgerAction {
    UnitDeclared {
        unit_number: u32,
        first_page: u32,
        last_page: u32,
    },
    UnitStateChanged {
        from: UnitState,
        to: UnitState,
    },
    PageVerified {
        page: u32,
        verification: Box<PageVerification>,
    },
    AttemptRecorded {
        page: u32,
        attempt: Box<AttemptRecord>,
    },
    PageFinalized {
        page: u32,
        verdict: Verdict,
    },
    PageBlocked {
        page: u32,
        findings: Vec<Finding>,
    },
    WarnConfirmed {
        target: ConfirmTarget,
        /// Warning finding ids the confirmation covers.
        finding_ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    GateRecorded {
        result: Box<GateResult>,
    },
    UnitConsolidated {
        artifact: ArtifactRef,
    },
}

impl LedgerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnitDeclared { .. } => "unit_declared",
            Self::UnitStateChanged { .. } => "unit_state_changed",
            Self::PageVerified { .. } => "page_verified",
            Self::AttemptRecorded { .. } => "attempt_recorded",
            Self::PageFinalized { .. } => "page_finalized",
            Self::PageBlocked { .. } => "page_blocked",
            Self::WarnConfirmed { .. } => "warn_confirmed",
            Self::GateRecorded { .. } => "gate_recorded",
            Self::UnitConsolidated { .. } => "unit_consolidated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub event_id: String,
    pub run_id: String,
    pub unit_id: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actor: String,
    #[serde(flatten)]
    pub action: LedgerAction,
}

impl LedgerEvent {
    pub fn new(
        run_id: impl Into<String>,
        unit_id: impl Into<String>,
        actor: impl Into<String>,
        action: LedgerAction,
    ) -> Self {
        Self {
            schema: LEDGER_EVENT_SCHEMA.to_string(),
            event_id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            unit_id: unit_id.into(),
            occurred_at: Utc::now(),
            actor: actor.into(),
            action,
        }
    }

    /// The key this event is filed under.
    pub fn key(&self) -> LedgerKey {
        let unit = self.unit_id.clone();
        match &self.action {
            LedgerAction::UnitDeclared { .. }
            | LedgerAction::UnitStateChanged { .. }
            | LedgerAction::UnitConsolidated { .. } => LedgerKey::Unit(unit),
            LedgerAction::PageVerified { page, .. }
            | LedgerAction::AttemptRecorded { page, .. }
            | LedgerAction::PageFinalized { page, .. }
            | LedgerAction::PageBlocked { page, .. } => LedgerKey::Page(unit, *page),
            LedgerAction::WarnConfirmed { target, .. } => match target {
                ConfirmTarget::Page { page } => LedgerKey::Page(unit, *page),
                ConfirmTarget::Gate { gate } => LedgerKey::Gate(unit, *gate),
            },
            LedgerAction::GateRecorded { result } => LedgerKey::Gate(unit, result.gate_id),
        }
    }
}

/// New run identifier.
pub fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_kernel::record::GateStatus;

    #[test]
    fn envelope_flattens_action_tag() {
        let event = LedgerEvent::new(
            "run-1",
            "u2",
            ORCHESTRATOR_ACTOR,
            LedgerAction::PageFinalized {
                page: 4,
                verdict: Verdict::Pass,
            },
        );
        let value = serde_json::to_value(&event).expect("event serializes");
        assert_eq!(value["schema"], LEDGER_EVENT_SCHEMA);
        assert_eq!(value["action"], "page_finalized");
        assert_eq!(value["page"], 4);
        assert_eq!(value["verdict"], "pass");

        let back: LedgerEvent = serde_json::from_value(value).expect("event parses");
        assert_eq!(back, event);
    }

    #[test]
    fn events_file_under_their_keys() {
        let gate = LedgerEvent::new(
            "run-1",
            "u2",
            ORCHESTRATOR_ACTOR,
            LedgerAction::GateRecorded {
                result: Box::new(GateResult::new(GateId::PreConsolidation, "u2", GateStatus::Pass)),
            },
        );
        assert_eq!(gate.key(), LedgerKey::Gate("u2".to_string(), GateId::PreConsolidation));

        let confirm = LedgerEvent::new(
            "run-1",
            "u2",
            "ana",
            LedgerAction::WarnConfirmed {
                target: ConfirmTarget::Page { page: 7 },
                finding_ids: vec!["f1_x".to_string()],
                note: None,
            },
        );
        assert_eq!(confirm.key(), LedgerKey::Page("u2".to_string(), 7));
    }
}

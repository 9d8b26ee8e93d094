//! # folio-ledger
//!
//! Append-only audit trail for verification runs.
//!
//! This crate provides:
//! - the `folio.ledger.event.v1` envelope and its actions
//! - the `Ledger` trait with JSONL and in-memory implementations
//! - replay of event streams into `UnitRecord` / `PageRecord` projections
//!
//! It does not decide anything: gates and retries live in `folio-gate`.
//!
//! ## Data model
//!
//! ```text
//! JSONL streams (one file per unit / page / gate key)
//!     │  append-only, per-file lock
//! LedgerEvent history
//!     │  replay (pure fold)
//! UnitRecord { pages, attempts, gate results, state }
//! ```

pub mod event;
pub mod jsonl;
pub mod ledger;
pub mod lock;
pub mod memory;
pub mod replay;

pub use event::{
    ConfirmTarget, LEDGER_EVENT_SCHEMA, LedgerAction, LedgerEvent, ORCHESTRATOR_ACTOR, POLICY_ACTOR,
    PageVerification, new_run_id,
};
pub use jsonl::{
    JsonlLedger, encode_event, gate_keys, read_events, read_events_from_path, validate_unit_id,
};
pub use ledger::{Ledger, LedgerError, LedgerKey};
pub use lock::lock_path;
pub use memory::MemoryLedger;
pub use replay::{
    Confirmation, UnitDeclaration, confirmations, covering_actor, latest_verification,
    replay_page, replay_unit, unit_declaration,
};

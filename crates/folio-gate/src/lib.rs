//! Gate orchestration for generated page content.
//!
//! This crate drives units through the six gates: per-page verification
//! with bounded regeneration, boundary validation, pre-consolidation,
//! post-consolidation structure, external visual judgment and final
//! completeness. Collaborators (reference text, generation, visual
//! judgment, assembly) are traits; every decision is appended to a
//! `folio_ledger::Ledger` so runs can be resumed and audited.

mod blocking;
pub mod cancel;
pub mod collab;
pub mod config;
pub mod confirm;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod verify;

pub use cancel::CancelToken;
pub use collab::{
    Assembler, CollaboratorError, GenerationService, Judgment, ReferenceProvider,
    VisualJudgmentService, WrapAssembler,
};
pub use config::{
    AssemblyConfig, CompiledConfig, CoverageConfig, GateConfig, PoolConfig, RetryConfig,
    VisualConfig, WarnPolicy,
};
pub use confirm::{ConfirmationReceipt, confirm_gate_warn, confirm_page_warn};
pub use error::{ConfigError, GateError};
pub use orchestrator::{Collaborators, Orchestrator, UnitSpec};
pub use report::{ConfirmationRequest, DiagnosticBundle, ExitStatus, PageReport, UnitReport};
pub use retry::{PageOutcome, RetryController};
pub use verify::{PageContext, verify_page};

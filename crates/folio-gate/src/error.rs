use folio_kernel::KernelError;
use folio_kernel::record::GateId;
use folio_ledger::LedgerError;
use thiserror::Error;

use crate::collab::CollaboratorError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid toml at {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("invalid config value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Faults that stop a run. Verification failures are not errors: they are
/// findings recorded in the ledger.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("invalid page range for unit {unit_id}: {first_page}..={last_page}")]
    InvalidPageRange {
        unit_id: String,
        first_page: u32,
        last_page: u32,
    },

    #[error("unit {unit_id} is already declared with a different shape")]
    ConflictingDeclaration { unit_id: String },

    #[error("assembler failed for unit {unit_id}: {source}")]
    Assembly {
        unit_id: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("reference text for unit {unit_id} page {page} could not be read: {source}")]
    Reference {
        unit_id: String,
        page: u32,
        #[source]
        source: CollaboratorError,
    },

    #[error("nothing to confirm for {target}: {reason}")]
    NothingToConfirm { target: String, reason: String },

    #[error("operator name `{0}` is empty or reserved")]
    ReservedActor(String),

    #[error("gate {gate} has no recorded result for unit {unit_id}")]
    NoGateResult { unit_id: String, gate: GateId },

    #[error("unit {unit_id} page {page} has no verified artifact")]
    MissingArtifact { unit_id: String, page: u32 },

    #[error("unit {0} appears more than once in one batch")]
    DuplicateUnit(String),

    #[error("page worker failed: {0}")]
    Worker(String),
}

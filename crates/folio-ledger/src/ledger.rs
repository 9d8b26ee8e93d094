//! The append-only ledger contract.

use folio_kernel::record::GateId;
use std::fmt::{Display, Formatter};

use crate::event::LedgerEvent;

/// One append stream. Streams never contend with each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LedgerKey {
    Unit(String),
    Page(String, u32),
    Gate(String, GateId),
}

impl LedgerKey {
    pub fn unit_id(&self) -> &str {
        match self {
            Self::Unit(unit) | Self::Page(unit, _) | Self::Gate(unit, _) => unit,
        }
    }
}

impl Display for LedgerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unit(unit) => write!(f, "{unit}"),
            Self::Page(unit, page) => write!(f, "{unit}/page-{page:04}"),
            Self::Gate(unit, gate) => write!(f, "{unit}/{gate}"),
        }
    }
}

/// Errors from ledger storage.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{path}: I/O error: {message}")]
    Io { path: String, message: String },

    #[error("{path}: line {line}: parse error: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("corrupted substrate: {0}")]
    Corrupt(String),

    #[error("{path}: line {line}: unsupported event schema `{schema}`")]
    UnsupportedSchema {
        path: String,
        line: usize,
        schema: String,
    },

    #[error("ledger lock busy: {lock_path}")]
    LockBusy { lock_path: String },

    #[error("invalid unit id `{0}`: use letters, digits, `.`, `_` or `-`")]
    InvalidUnitId(String),

    #[error("event for unit `{event_unit}` cannot be filed under {key}")]
    KeyMismatch { key: String, event_unit: String },

    #[error("unit `{0}` has never been declared")]
    UnknownUnit(String),

    #[error("unit `{unit_id}` is already declared with a different page range")]
    ConflictingDeclaration { unit_id: String },
}

impl LedgerError {
    pub(crate) fn io(path: impl Display, err: impl Display) -> Self {
        Self::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Append-only event storage keyed by unit, page and gate.
///
/// There is no update or delete: the audit trail is the state.
/// Implementations must accept concurrent appends to distinct keys.
pub trait Ledger: Send + Sync {
    fn append(&self, key: &LedgerKey, event: LedgerEvent) -> Result<(), LedgerError>;

    /// Events under `key` in append order; empty when nothing was recorded.
    fn history(&self, key: &LedgerKey) -> Result<Vec<LedgerEvent>, LedgerError>;

    /// Page keys recorded for `unit_id`, ordered by page.
    fn page_keys(&self, unit_id: &str) -> Result<Vec<LedgerKey>, LedgerError>;

    /// Declared units, sorted.
    fn units(&self) -> Result<Vec<String>, LedgerError>;

    /// Append under the key the event belongs to.
    fn record(&self, event: LedgerEvent) -> Result<(), LedgerError> {
        let key = event.key();
        self.append(&key, event)
    }
}

pub(crate) fn check_key(key: &LedgerKey, event: &LedgerEvent) -> Result<(), LedgerError> {
    if key.unit_id() != event.unit_id {
        return Err(LedgerError::KeyMismatch {
            key: key.to_string(),
            event_unit: event.unit_id.clone(),
        });
    }
    Ok(())
}

//! Error types for kernel configuration.
//!
//! Verification outcomes are never errors: a failing page is a `Finding`
//! inside a verdict. These variants cover rule sets that cannot be built.

/// Errors raised while compiling patterns or validating rule sets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// A configured regular expression does not compile or lacks a
    /// required capture group.
    #[error("invalid {field} pattern `{pattern}`: {message}")]
    InvalidPattern {
        field: String,
        pattern: String,
        message: String,
    },

    /// A configured value is out of range or inconsistent.
    #[error("invalid {field}: {message}")]
    InvalidConfig { field: String, message: String },
}

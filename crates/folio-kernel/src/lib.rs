//! # Folio Kernel
//!
//! Verification of generated page content against trusted reference text.
//! A page is accepted only when it covers the reference without adding to
//! it, carries the boundary markers its position in the unit requires, and
//! is structurally well formed.
//!
//! Everything here is pure and synchronous: no I/O, no clocks except record
//! timestamps, no logging.
//!
//! ## Architecture
//!
//! ```text
//! token / markup        ← word tokens, markup lexer, visible text
//!     │
//! coverage              ← ratio + multiset diff, bands
//! boundary              ← unit opening / closing / leak patterns
//! structure             ← nesting, headings, required markers
//!     │
//! verdict               ← worst-of page verdict + findings
//!     │
//! feedback              ← narrowing regeneration feedback
//! record                ← page / attempt / gate / unit records
//! ```

pub mod boundary;
pub mod coverage;
pub mod error;
pub mod feedback;
pub mod finding;
pub mod markup;
pub mod record;
pub mod structure;
pub mod token;
pub mod verdict;

pub use boundary::{BoundaryPatternSet, BoundaryPatterns, BoundaryReport, PagePosition, TitleMatch};
pub use coverage::{
    CoverageBand, CoverageError, CoverageReport, CoverageThresholds, ReferenceFilter, TokenDiff,
    compute_coverage,
};
pub use error::KernelError;
pub use feedback::{Feedback, FeedbackScope, build_feedback};
pub use finding::{FailureClass, Finding, Severity, content_digest, sort_findings};
pub use markup::{Position, extract_text, inner_of_class};
pub use record::{
    ArtifactRef, AttemptRecord, GateId, GateResult, GateStatus, PageRecord, PageState, UnitRecord,
    UnitState, gate_scope, page_scope,
};
pub use structure::{
    MarkerSelector, StructuralCode, StructuralError, StructureReport, StructureRules,
    StructureStatus, validate_structure,
};
pub use token::tokenize;
pub use verdict::{PageVerdict, Verdict, WarnLevel, build_verdict};

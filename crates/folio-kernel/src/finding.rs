//! Typed diagnostics with deterministic identifiers.
//!
//! Every failure or warning the kernel and the gates produce is a `Finding`.
//! Two runs that observe the same failure at the same place produce the same
//! `finding_id`, so reports can be diffed across reruns.
//!
//! Algorithm:
//! 1. Build the canonical key `{schema, class, code, scope, location, detail}`;
//!    `detail` is the message for coded findings that carry no location, so
//!    two missing markers in one scope stay distinct
//! 2. Serialize it as compact JSON with sorted keys
//! 3. `finding_id = "f1_" || base32hex_lower(SHA256(keyBytes))`

use crate::structure::StructuralCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};

/// Error taxonomy for pages, gates, and units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    MissingReference,
    GenerationTimeout,
    GenerationFailed,
    CoverageExcess,
    CoverageDeficit,
    /// Coverage inside a warn band.
    CoverageShortfall,
    BoundaryMissingOpening,
    BoundaryMissingClosing,
    BoundaryLeak,
    StructuralError,
    RetryExhausted,
    PagesNotFinalized,
    PageSequenceGap,
    ExternalJudgmentTimeout,
    ExternalJudgmentFailed,
    VisualMismatch,
    CompletenessExcess,
    CompletenessDeficit,
    CompletenessShortfall,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingReference => "missing_reference",
            Self::GenerationTimeout => "generation_timeout",
            Self::GenerationFailed => "generation_failed",
            Self::CoverageExcess => "coverage_excess",
            Self::CoverageDeficit => "coverage_deficit",
            Self::CoverageShortfall => "coverage_shortfall",
            Self::BoundaryMissingOpening => "boundary_missing_opening",
            Self::BoundaryMissingClosing => "boundary_missing_closing",
            Self::BoundaryLeak => "boundary_leak",
            Self::StructuralError => "structural_error",
            Self::RetryExhausted => "retry_exhausted",
            Self::PagesNotFinalized => "pages_not_finalized",
            Self::PageSequenceGap => "page_sequence_gap",
            Self::ExternalJudgmentTimeout => "external_judgment_timeout",
            Self::ExternalJudgmentFailed => "external_judgment_failed",
            Self::VisualMismatch => "visual_mismatch",
            Self::CompletenessExcess => "completeness_excess",
            Self::CompletenessDeficit => "completeness_deficit",
            Self::CompletenessShortfall => "completeness_shortfall",
        }
    }

    /// Unit-level failures with no automatic remedy.
    pub fn is_unit_fatal(self) -> bool {
        matches!(
            self,
            Self::BoundaryLeak | Self::ExternalJudgmentTimeout | Self::ExternalJudgmentFailed
        )
    }
}

impl Display for FailureClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Deterministic identifier; see module docs.
    pub finding_id: String,
    pub class: FailureClass,
    /// Sub-code for structural errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<StructuralCode>,
    pub severity: Severity,
    /// What the finding is about, e.g. `unit-02/page-0015`.
    pub scope: String,
    pub message: String,
    /// Where inside the scope, e.g. `12:5`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Class-specific machine-readable details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Finding {
    pub fn new(
        class: FailureClass,
        severity: Severity,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut finding = Self {
            finding_id: String::new(),
            class,
            code: None,
            severity,
            scope: scope.into(),
            message: message.into(),
            location: None,
            details: None,
        };
        finding.refresh_id();
        finding
    }

    pub fn error(class: FailureClass, scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(class, Severity::Error, scope, message)
    }

    pub fn warning(
        class: FailureClass,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(class, Severity::Warning, scope, message)
    }

    pub fn with_code(mut self, code: StructuralCode) -> Self {
        self.code = Some(code);
        self.refresh_id();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self.refresh_id();
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    fn refresh_id(&mut self) {
        let detail = match (self.code, &self.location) {
            (Some(_), None) => Some(self.message.as_str()),
            _ => None,
        };
        self.finding_id = compute_finding_id(
            self.class,
            self.code,
            &self.scope,
            self.location.as_deref(),
            detail,
        );
    }

    fn sort_key(&self) -> (FailureClass, &str, &str, &str) {
        (
            self.class,
            &self.scope,
            self.location.as_deref().unwrap_or(""),
            &self.finding_id,
        )
    }
}

/// Sort findings into their canonical report order and drop exact repeats.
pub fn sort_findings(findings: &mut Vec<Finding>) {
    findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    findings.dedup_by(|a, b| a.finding_id == b.finding_id && a.message == b.message);
}

pub fn compute_finding_id(
    class: FailureClass,
    code: Option<StructuralCode>,
    scope: &str,
    location: Option<&str>,
    detail: Option<&str>,
) -> String {
    // serde_json::Map keeps keys sorted without `preserve_order`, so compact
    // serialization is already canonical for this flat key.
    let mut key = serde_json::Map::new();
    key.insert("schema".to_string(), Value::Number(1.into()));
    key.insert("class".to_string(), Value::String(class.as_str().to_string()));
    key.insert(
        "code".to_string(),
        code.map(|c| Value::String(c.as_str().to_string()))
            .unwrap_or(Value::Null),
    );
    key.insert("scope".to_string(), Value::String(scope.to_string()));
    key.insert(
        "location".to_string(),
        location
            .map(|l| Value::String(l.to_string()))
            .unwrap_or(Value::Null),
    );
    key.insert(
        "detail".to_string(),
        detail
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
    );
    let bytes = serde_json::to_vec(&Value::Object(key)).unwrap_or_default();
    let hash = Sha256::digest(&bytes);
    format!("f1_{}", base32hex_lower(&hash))
}

/// Content digest used for artifact references: `sha256:<hex>`.
pub fn content_digest(content: &str) -> String {
    let hash = Sha256::digest(content.as_bytes());
    let hex: String = hash.iter().map(|b| format!("{b:02x}")).collect();
    format!("sha256:{hex}")
}

/// RFC 4648 base32hex, lowercase, unpadded.
fn base32hex_lower(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuv";
    let mut out = String::with_capacity(data.len() * 8 / 5 + 1);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finding_id_is_deterministic() {
        let a = Finding::error(FailureClass::CoverageDeficit, "u1/page-0001", "low");
        let b = Finding::error(FailureClass::CoverageDeficit, "u1/page-0001", "different text");
        assert_eq!(a.finding_id, b.finding_id);
        assert!(a.finding_id.starts_with("f1_"));
    }

    #[test]
    fn finding_id_tracks_location_and_code() {
        let base = Finding::error(FailureClass::StructuralError, "u1/page-0001", "x");
        let located = base.clone().with_location("3:1");
        let coded = located.clone().with_code(StructuralCode::EmptyMarker);
        assert_ne!(base.finding_id, located.finding_id);
        assert_ne!(located.finding_id, coded.finding_id);
    }

    #[test]
    fn unlocated_structural_findings_in_one_scope_do_not_collide() {
        let scope = "ch01/page-0002";
        let container = Finding::error(FailureClass::StructuralError, scope, "required marker .page-container is missing")
            .with_code(StructuralCode::MissingRequiredMarker);
        let content = Finding::error(FailureClass::StructuralError, scope, "required marker .page-content is missing")
            .with_code(StructuralCode::MissingRequiredMarker);
        assert_ne!(container.finding_id, content.finding_id);

        let mut findings = vec![container.clone(), content, container];
        sort_findings(&mut findings);
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn sort_orders_by_class_then_scope() {
        let mut findings = vec![
            Finding::error(FailureClass::StructuralError, "u1/page-0002", "b"),
            Finding::error(FailureClass::CoverageDeficit, "u1/page-0003", "a"),
            Finding::error(FailureClass::StructuralError, "u1/page-0001", "c"),
        ];
        sort_findings(&mut findings);
        assert_eq!(findings[0].class, FailureClass::CoverageDeficit);
        assert_eq!(findings[1].scope, "u1/page-0001");
        assert_eq!(findings[2].scope, "u1/page-0002");
    }

    #[test]
    fn base32hex_uses_lowercase_alphabet() {
        let encoded = base32hex_lower(&Sha256::digest(b""));
        assert_eq!(encoded.len(), 52);
        assert!(
            encoded
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='v').contains(&c))
        );
    }

    #[test]
    fn content_digest_is_hex_sha256() {
        assert_eq!(
            content_digest(""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}

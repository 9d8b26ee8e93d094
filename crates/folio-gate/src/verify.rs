//! One verification pass over one page artifact.

use folio_kernel::boundary::PagePosition;
use folio_kernel::coverage::compute_coverage_tokens;
use folio_kernel::markup::extract_text;
use folio_kernel::record::page_scope;
use folio_kernel::structure::validate_structure;
use folio_kernel::token::tokenize;
use folio_kernel::verdict::build_verdict;
use folio_ledger::PageVerification;

use crate::config::CompiledConfig;

/// What a page is verified against.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub unit_id: String,
    pub unit_number: u32,
    pub page: u32,
    pub position: PagePosition,
    /// Filtered reference text, tokenized. Empty when the page has no
    /// reference.
    pub reference_tokens: Vec<String>,
}

impl PageContext {
    pub fn new(
        unit_id: &str,
        unit_number: u32,
        page: u32,
        position: PagePosition,
        reference_text: &str,
        config: &CompiledConfig,
    ) -> Self {
        let filtered = config.reference_filter.apply(reference_text);
        Self {
            unit_id: unit_id.to_string(),
            unit_number,
            page,
            position,
            reference_tokens: tokenize(&filtered),
        }
    }

    pub fn scope(&self) -> String {
        page_scope(&self.unit_id, self.page)
    }

    pub fn has_reference(&self) -> bool {
        !self.reference_tokens.is_empty()
    }
}

/// Coverage, boundary and structure for one artifact. First pages get the
/// opening check; last pages get the closing and next-unit leak checks, so a
/// leak stops the page before coverage drives it into another attempt.
pub fn verify_page(
    config: &CompiledConfig,
    ctx: &PageContext,
    artifact: String,
    attempt: u32,
) -> PageVerification {
    let scope = ctx.scope();
    let generated_tokens = tokenize(&extract_text(&artifact));
    let coverage = compute_coverage_tokens(&ctx.reference_tokens, &generated_tokens);
    let boundary = (ctx.position.is_first() || ctx.position.is_last()).then(|| {
        config
            .boundary
            .check_boundaries(&scope, ctx.position, &artifact, ctx.unit_number)
    });
    let structure = validate_structure(&artifact, &config.structure);
    let verdict = build_verdict(&scope, &coverage, &config.coverage, boundary.as_ref(), &structure);
    PageVerification::new(
        attempt,
        verdict,
        artifact,
        ctx.reference_tokens.clone(),
        generated_tokens,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use folio_kernel::finding::FailureClass;
    use folio_kernel::verdict::{Verdict, WarnLevel};

    fn config() -> CompiledConfig {
        GateConfig::default().compile().expect("defaults")
    }

    fn wrap(body: &str) -> String {
        format!(
            "<div class=\"page-container\"><main class=\"page-content\">{body}</main></div>"
        )
    }

    #[test]
    fn page_numbers_in_reference_are_filtered_out() {
        let config = config();
        let ctx = PageContext::new(
            "u1",
            1,
            2,
            PagePosition::Interior,
            "12\nThe quick brown fox\n",
            &config,
        );
        assert_eq!(ctx.reference_tokens, vec!["the", "quick", "brown", "fox"]);

        let verification = verify_page(&config, &ctx, wrap("<p>The quick brown fox</p>"), 0);
        assert_eq!(verification.verdict.verdict, Verdict::Pass);
        assert_eq!(verification.attempt, 0);
        assert!(verification.artifact_digest.starts_with("sha256:"));
    }

    #[test]
    fn first_page_without_opening_fails_and_is_retryable() {
        let config = config();
        let ctx = PageContext::new("u1", 3, 10, PagePosition::First, "Scope of duties", &config);
        let verification = verify_page(&config, &ctx, wrap("<p>Scope of duties</p>"), 0);
        let verdict = &verification.verdict;
        assert_eq!(verdict.verdict, Verdict::Fail);
        assert!(verdict.has_class(FailureClass::BoundaryMissingOpening));
        assert!(verdict.retryable);
    }

    #[test]
    fn last_page_with_summary_passes() {
        let config = config();
        let ctx = PageContext::new("u1", 3, 12, PagePosition::Last, "Key points\nLast words", &config);
        let verification = verify_page(&config, &ctx, wrap("<h2>Key points</h2><p>Last words</p>"), 0);
        assert_eq!(verification.verdict.verdict, Verdict::Pass);
        let boundary = verification.verdict.boundary.as_ref().expect("closing checked");
        assert_eq!(boundary.closing_found, Some(true));
        assert_eq!(boundary.opening_found, None);
    }

    #[test]
    fn last_page_without_summary_is_a_minor_warn() {
        let config = config();
        let ctx = PageContext::new("u1", 3, 12, PagePosition::Last, "Last words", &config);
        let verification = verify_page(&config, &ctx, wrap("<p>Last words</p>"), 0);
        let verdict = &verification.verdict;
        assert_eq!(verdict.verdict, Verdict::Warn);
        assert_eq!(verdict.warn_level, Some(WarnLevel::Minor));
        assert!(verdict.has_class(FailureClass::BoundaryMissingClosing));
    }

    #[test]
    fn leak_on_last_page_is_fatal_even_when_coverage_overshoots() {
        let config = config();
        let ctx = PageContext::new("u1", 1, 3, PagePosition::Last, "Key points\nfoxes are quick", &config);
        let artifact = wrap(
            "<h2>Key points</h2><p>foxes are quick</p>\
             <h1>Chapter 2 Next Things</h1><p>leaked body text</p>",
        );
        let verification = verify_page(&config, &ctx, artifact, 0);
        let verdict = &verification.verdict;
        assert_eq!(verdict.verdict, Verdict::Fail);
        assert!(verdict.has_class(FailureClass::BoundaryLeak));
        assert!(verdict.has_class(FailureClass::CoverageExcess));
        assert!(verdict.fatal);
        assert!(!verdict.retryable);
    }

    #[test]
    fn blank_reference_is_missing() {
        let config = config();
        let ctx = PageContext::new("u1", 1, 4, PagePosition::Interior, "  \n7\n", &config);
        assert!(!ctx.has_reference());
        let verification = verify_page(&config, &ctx, wrap("<p>anything</p>"), 0);
        assert!(verification.verdict.has_class(FailureClass::MissingReference));
        assert!(!verification.verdict.retryable);
    }
}

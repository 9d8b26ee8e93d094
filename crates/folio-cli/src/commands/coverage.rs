use crate::support::{
    compile_config_or_exit, fail, print_json_or_exit, print_token_block, read_text_or_exit,
    verdict_exit_code,
};
use folio_kernel::coverage::compute_coverage_tokens;
use folio_kernel::markup::extract_text;
use folio_kernel::token::tokenize;
use serde_json::json;

pub fn run(reference: String, generated: String, config: Option<String>, json_output: bool) {
    let config = compile_config_or_exit(config.as_deref());
    let reference_text = read_text_or_exit(&reference, "reference text");
    let artifact = read_text_or_exit(&generated, "generated artifact");

    let reference_tokens = tokenize(&config.reference_filter.apply(&reference_text));
    let generated_tokens = tokenize(&extract_text(&artifact));
    let report = compute_coverage_tokens(&reference_tokens, &generated_tokens)
        .unwrap_or_else(|e| fail(format!("{e}: {reference}")));
    let band = config.coverage.classify(report.ratio);
    let verdict = band.verdict();

    if json_output {
        let payload = json!({
            "reference": reference,
            "generated": generated,
            "referenceCount": report.reference_count,
            "generatedCount": report.generated_count,
            "ratio": report.ratio,
            "band": band.as_str(),
            "verdict": verdict,
            "warnLevel": band.warn_level(),
            "missing": report.diff.missing,
            "extra": report.diff.extra,
        });
        print_json_or_exit(&payload, "coverage");
    } else {
        println!("folio coverage");
        println!("  Reference: {reference} ({} tokens)", report.reference_count);
        println!("  Generated: {generated} ({} tokens)", report.generated_count);
        println!("  Coverage: {:.2}% ({})", report.ratio, band.as_str());
        println!("  Verdict: {verdict}");
        print_token_block("Missing tokens", &report.diff.missing);
        print_token_block("Extra tokens", &report.diff.extra);
    }
    std::process::exit(verdict_exit_code(verdict));
}

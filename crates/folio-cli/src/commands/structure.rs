use crate::support::{
    SAMPLE_LIMIT, compile_config_or_exit, print_json_or_exit, print_sample_block,
    read_text_or_exit, sample_with_truncation,
};
use folio_kernel::structure::validate_structure;

pub fn run(artifact: String, config: Option<String>, json_output: bool) {
    let config = compile_config_or_exit(config.as_deref());
    let content = read_text_or_exit(&artifact, "artifact");
    let report = validate_structure(&content, &config.structure);

    if json_output {
        print_json_or_exit(&report, "structure");
    } else {
        println!("folio structure");
        println!("  Artifact: {artifact}");
        println!("  Status: {}", if report.passed() { "pass" } else { "fail" });
        let lines: Vec<String> = report
            .errors
            .iter()
            .map(|e| match e.location {
                Some(at) => format!("{at} {}: {}", e.code, e.message),
                None => format!("{}: {}", e.code, e.message),
            })
            .collect();
        let (sample, truncated) = sample_with_truncation(lines, SAMPLE_LIMIT);
        print_sample_block("Errors", &sample, truncated);
    }
    std::process::exit(if report.passed() { 0 } else { 2 });
}

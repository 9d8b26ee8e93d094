use crate::support::{
    compile_config_or_exit, print_json_or_exit, read_text_or_exit, verdict_exit_code, yes_no,
};
use folio_kernel::boundary::PagePosition;

pub fn run(
    artifact: String,
    position: PagePosition,
    unit_number: u32,
    config: Option<String>,
    json_output: bool,
) {
    let config = compile_config_or_exit(config.as_deref());
    let content = read_text_or_exit(&artifact, "artifact");
    let report = config
        .boundary
        .check_boundaries(&artifact, position, &content, unit_number);

    if json_output {
        print_json_or_exit(&report, "boundary");
    } else {
        println!("folio boundary");
        println!("  Artifact: {artifact}");
        println!("  Unit number: {unit_number}");
        if let Some(found) = report.opening_found {
            println!("  Opening found: {}", yes_no(found));
        }
        if let Some(found) = report.closing_found {
            println!("  Closing found: {}", yes_no(found));
        }
        if let Some(leak) = &report.leak {
            println!("  Leak: opening of unit {} at {}", leak.number, leak.location);
        }
        println!("  Status: {}", report.status);
        for finding in &report.findings {
            println!("    - {}: {}", finding.class, finding.message);
        }
    }
    std::process::exit(verdict_exit_code(report.status));
}

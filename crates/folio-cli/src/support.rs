use folio_gate::{CompiledConfig, ExitStatus, GateConfig};
use folio_kernel::verdict::Verdict;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code for bad input or infrastructure faults.
pub const EXIT_ERROR: i32 = 2;
pub const SAMPLE_LIMIT: usize = 25;

pub fn init_tracing(verbose: bool) {
    let default = if verbose { "folio=debug" } else { "folio=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

pub fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    std::process::exit(EXIT_ERROR);
}

pub fn load_config_or_exit(path: Option<&str>) -> GateConfig {
    let Some(path) = path else {
        return GateConfig::default();
    };
    GateConfig::load(Path::new(path)).unwrap_or_else(|e| fail(e))
}

pub fn compile_config_or_exit(path: Option<&str>) -> CompiledConfig {
    load_config_or_exit(path)
        .compile()
        .unwrap_or_else(|e| fail(e))
}

pub fn read_text_or_exit(path: &str, label: &str) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| fail(format!("failed to read {label} at {path}: {e}")))
}

pub fn print_json_or_exit<T: Serialize>(value: &T, label: &str) {
    let rendered = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| fail(format!("failed to render {label} json: {e}")));
    println!("{rendered}");
}

/// Parse an inclusive page range: `12-18`, or `7` for a single page.
pub fn parse_pages(raw: &str) -> Result<(u32, u32), String> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid page number `{}` in `{raw}`: {e}", s.trim()))
    };
    let (first, last) = match raw.split_once('-') {
        Some((a, b)) => (parse(a)?, parse(b)?),
        None => {
            let page = parse(raw)?;
            (page, page)
        }
    };
    if first > last {
        return Err(format!("page range `{raw}` runs backwards"));
    }
    Ok((first, last))
}

pub fn exit_with(status: ExitStatus) -> ! {
    std::process::exit(status.code());
}

pub fn verdict_exit_code(verdict: Verdict) -> i32 {
    match verdict {
        Verdict::Pass => 0,
        Verdict::Warn => 1,
        Verdict::Fail => 2,
    }
}

pub fn sample_with_truncation<T>(items: Vec<T>, limit: usize) -> (Vec<T>, usize) {
    let total = items.len();
    let sample: Vec<T> = items.into_iter().take(limit).collect();
    let truncated = total.saturating_sub(sample.len());
    (sample, truncated)
}

pub fn print_sample_block(header: &str, items: &[String], truncated: usize) {
    if items.is_empty() {
        return;
    }

    println!("  {header} (showing up to {}):", items.len());
    for item in items {
        println!("    - {item}");
    }
    if truncated > 0 {
        println!("    - ... and {truncated} more");
    }
}

/// Token counts as `token x N`, most frequent first.
pub fn print_token_block(header: &str, tokens: &BTreeMap<String, usize>) {
    let mut entries: Vec<(&String, &usize)> = tokens.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let lines: Vec<String> = entries
        .into_iter()
        .map(|(token, count)| format!("{token} x{count}"))
        .collect();
    let (sample, truncated) = sample_with_truncation(lines, SAMPLE_LIMIT);
    print_sample_block(header, &sample, truncated);
}

pub fn runtime_or_exit() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| fail(format!("failed to create tokio runtime: {e}")))
}

pub fn yes_no(ok: bool) -> &'static str {
    if ok { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_ranges_parse_inclusive() {
        assert_eq!(parse_pages("12-18"), Ok((12, 18)));
        assert_eq!(parse_pages(" 3 - 3 "), Ok((3, 3)));
        assert_eq!(parse_pages("7"), Ok((7, 7)));
        assert!(parse_pages("9-4").is_err());
        assert!(parse_pages("a-4").is_err());
    }
}

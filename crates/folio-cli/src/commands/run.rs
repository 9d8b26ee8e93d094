use crate::support::{
    compile_config_or_exit, exit_with, fail, parse_pages, print_json_or_exit, runtime_or_exit,
};
use crate::workspace::{FileReferences, Workspace, WorkspaceGenerator, WorkspaceJudge};
use folio_gate::{CancelToken, Collaborators, Orchestrator, UnitReport, UnitSpec};
use folio_ledger::{JsonlLedger, Ledger};
use std::sync::Arc;
use tracing::warn;

pub struct Args {
    pub workspace: String,
    pub unit: String,
    pub unit_number: u32,
    pub pages: String,
    pub generator_cmd: Option<String>,
    pub judge_cmd: Option<String>,
    pub config: Option<String>,
    pub json: bool,
}

pub fn run(args: Args) {
    let (first_page, last_page) = parse_pages(&args.pages).unwrap_or_else(|e| fail(e));
    let config = compile_config_or_exit(args.config.as_deref());
    let workspace = Workspace::new(&args.workspace);
    let ledger: Arc<dyn Ledger> = Arc::new(JsonlLedger::new(workspace.ledger_root()));
    let collaborators = Collaborators::new(
        Arc::new(FileReferences::new(workspace.clone())),
        Arc::new(WorkspaceGenerator::new(workspace.clone(), args.generator_cmd)),
        Arc::new(WorkspaceJudge::new(workspace.clone(), args.judge_cmd)),
    );
    let orchestrator = Orchestrator::new(config, ledger, collaborators);
    let spec = UnitSpec::new(args.unit, args.unit_number, first_page, last_page);

    let cancel = CancelToken::new();
    let runtime = runtime_or_exit();
    let report = runtime
        .block_on(async {
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted; stopping at the next gate");
                    interrupt.cancel();
                }
            });
            orchestrator.run_unit(&spec, &cancel).await
        })
        .unwrap_or_else(|e| fail(e));

    if args.json {
        print_json_or_exit(&report, "run");
    } else {
        print_report(&report, workspace.root().display());
    }
    exit_with(report.exit);
}

fn print_report(report: &UnitReport, workspace: impl std::fmt::Display) {
    println!("folio run {}", report.unit_id);
    println!("  Workspace: {workspace}");
    println!("  Pages: {}-{}", report.first_page, report.last_page);
    println!("  State: {}", report.state);
    if report.cancelled {
        println!("  Cancelled: yes (rerun to resume)");
    }
    println!("  Gates:");
    for gate in &report.gate_results {
        match &gate.confirmed_by {
            Some(actor) => println!("    - {}: {:?} (confirmed by {actor})", gate.gate_id, gate.status),
            None => println!("    - {}: {:?}", gate.gate_id, gate.status),
        }
    }
    println!("  Pages:");
    for page in &report.pages {
        let ratio = page
            .coverage_ratio
            .map(|r| format!("{r:.2}%"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "    - page {}: {:?} {} coverage {ratio}, {} attempt(s)",
            page.page_index,
            page.state,
            page.verdict,
            page.attempt_history.len()
        );
    }

    let diagnostics = &report.diagnostics;
    for request in &diagnostics.awaiting_confirmation {
        println!(
            "  Awaiting confirmation: {} ({} finding(s))",
            serde_json::to_string(&request.target).unwrap_or_default(),
            request.finding_ids.len()
        );
    }
    for finding in &diagnostics.findings {
        println!("  Finding {}: {} [{}]", finding.class, finding.message, finding.scope);
    }
    for action in &diagnostics.manual_intervention {
        println!("  Manual intervention: {action}");
    }
}

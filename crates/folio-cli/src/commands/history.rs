use crate::support::{fail, print_json_or_exit};
use crate::workspace::Workspace;
use folio_ledger::{JsonlLedger, Ledger, LedgerKey, replay_unit};
use serde_json::json;

pub fn run(workspace: String, unit: String, json_output: bool) {
    let workspace = Workspace::new(&workspace);
    let ledger = JsonlLedger::new(workspace.ledger_root());
    let record = replay_unit(&ledger, &unit).unwrap_or_else(|e| fail(e));
    let unit_events = ledger
        .history(&LedgerKey::Unit(unit.clone()))
        .unwrap_or_else(|e| fail(e));

    if json_output {
        let transitions: Vec<_> = unit_events
            .iter()
            .map(|e| json!({ "at": e.occurred_at, "run": e.run_id, "action": e.action.as_str() }))
            .collect();
        print_json_or_exit(&json!({ "unit": record, "unitEvents": transitions }), "history");
        return;
    }

    println!("folio history {unit}");
    println!("  Pages: {}-{}", record.first_page, record.last_page);
    println!("  State: {}", record.state);
    if let Some(artifact) = &record.consolidated_artifact {
        println!("  Consolidated: {} ({} bytes)", artifact.digest, artifact.bytes);
    }
    println!("  Unit events:");
    for event in &unit_events {
        println!("    - {} {} ({})", event.occurred_at.to_rfc3339(), event.action.as_str(), event.run_id);
    }
    println!("  Pages:");
    for page in &record.ordered_pages {
        println!(
            "    - page {}: {:?} {}, {} attempt(s){}",
            page.page_index,
            page.state,
            page.verdict,
            page.attempts.len(),
            page.confirmed_by
                .as_deref()
                .map(|a| format!(", confirmed by {a}"))
                .unwrap_or_default()
        );
    }
    println!("  Gates (latest run):");
    for gate in &record.gate_results {
        println!("    - {}: {:?}", gate.gate_id, gate.status);
    }
}

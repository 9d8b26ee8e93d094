use crate::support::{fail, print_json_or_exit};
use crate::workspace::Workspace;
use folio_gate::{confirm_gate_warn, confirm_page_warn};
use folio_kernel::record::GateId;
use folio_ledger::JsonlLedger;

pub struct Args {
    pub workspace: String,
    pub unit: String,
    pub page: Option<u32>,
    pub gate: Option<String>,
    pub operator: String,
    pub note: Option<String>,
    pub json: bool,
}

pub fn run(args: Args) {
    let workspace = Workspace::new(&args.workspace);
    let ledger = JsonlLedger::new(workspace.ledger_root());

    let receipt = match (args.page, args.gate.as_deref()) {
        (Some(page), None) => confirm_page_warn(&ledger, &args.unit, page, &args.operator, args.note),
        (None, Some(gate)) => {
            let gate: GateId = gate.parse().unwrap_or_else(|e: String| fail(e));
            confirm_gate_warn(&ledger, &args.unit, gate, &args.operator, args.note)
        }
        _ => fail("pass exactly one of --page or --gate"),
    }
    .unwrap_or_else(|e| fail(e));

    if args.json {
        print_json_or_exit(&receipt, "confirm");
        return;
    }
    println!("folio confirm {}", receipt.unit_id);
    println!(
        "  Target: {}",
        serde_json::to_string(&receipt.target).unwrap_or_default()
    );
    println!("  Operator: {}", receipt.actor);
    println!("  Findings covered: {}", receipt.finding_ids.len());
    println!("  Rerun `folio run` to continue the unit.");
}

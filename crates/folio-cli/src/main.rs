//! Folio CLI: the `folio` command.

mod cli;
mod commands;
mod support;
mod workspace;

use clap::Parser;
use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    support::init_tracing(cli.verbose);

    match cli.command {
        Commands::Coverage {
            reference,
            generated,
            config,
            json,
        } => commands::coverage::run(reference, generated, config, json),

        Commands::Structure {
            artifact,
            config,
            json,
        } => commands::structure::run(artifact, config, json),

        Commands::Boundary {
            artifact,
            position,
            unit_number,
            config,
            json,
        } => commands::boundary::run(artifact, position.into(), unit_number, config, json),

        Commands::Run {
            workspace,
            unit,
            unit_number,
            pages,
            generator_cmd,
            judge_cmd,
            config,
            json,
        } => commands::run::run(commands::run::Args {
            workspace,
            unit,
            unit_number,
            pages,
            generator_cmd,
            judge_cmd,
            config,
            json,
        }),

        Commands::Confirm {
            workspace,
            unit,
            page,
            gate,
            operator,
            note,
            json,
        } => commands::confirm::run(commands::confirm::Args {
            workspace,
            unit,
            page,
            gate,
            operator,
            note,
            json,
        }),

        Commands::History {
            workspace,
            unit,
            json,
        } => commands::history::run(workspace, unit, json),

        Commands::InitConfig {
            path,
            force,
            config,
            json,
        } => commands::init_config::run(path, force, config, json),
    }
}

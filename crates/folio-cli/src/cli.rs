use clap::{Parser, Subcommand, ValueEnum};
use folio_kernel::boundary::PagePosition;

#[derive(Parser)]
#[command(
    name = "folio",
    about = "Folio: coverage, boundary and structure gates for generated page content",
    version
)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Measure token coverage of a generated page against its reference text
    Coverage {
        /// Trusted reference text
        #[arg(long)]
        reference: String,

        /// Generated page artifact
        #[arg(long)]
        generated: String,

        /// Gate configuration (TOML)
        #[arg(long)]
        config: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the structure of an artifact
    Structure {
        /// Artifact to validate
        artifact: String,

        /// Gate configuration (TOML)
        #[arg(long)]
        config: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check unit boundary markers on a page
    Boundary {
        /// Page artifact to check
        artifact: String,

        /// Where the page sits in its unit
        #[arg(long, value_enum)]
        position: PositionArg,

        /// Number of the unit the page belongs to
        #[arg(long)]
        unit_number: u32,

        /// Gate configuration (TOML)
        #[arg(long)]
        config: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one unit through every gate
    Run {
        /// Workspace holding reference/, generated/ and the ledger
        #[arg(long, default_value = ".")]
        workspace: String,

        /// Unit identifier
        #[arg(long)]
        unit: String,

        /// Unit number used by boundary checks
        #[arg(long)]
        unit_number: u32,

        /// Inclusive page range, e.g. `12-18`
        #[arg(long)]
        pages: String,

        /// Shell command that regenerates a page (feedback JSON on stdin)
        #[arg(long)]
        generator_cmd: Option<String>,

        /// Shell command that scores the consolidated unit (artifact on stdin)
        #[arg(long)]
        judge_cmd: Option<String>,

        /// Gate configuration (TOML)
        #[arg(long)]
        config: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Confirm a warn on a page or a gate
    Confirm {
        /// Workspace holding the ledger
        #[arg(long, default_value = ".")]
        workspace: String,

        /// Unit identifier
        #[arg(long)]
        unit: String,

        /// Page whose warn is confirmed
        #[arg(long, conflicts_with = "gate", required_unless_present = "gate")]
        page: Option<u32>,

        /// Gate whose warn is confirmed (e.g. `external_visual_judgment`)
        #[arg(long)]
        gate: Option<String>,

        /// Name recorded as the confirming actor
        #[arg(long)]
        operator: String,

        /// Free-form note stored with the confirmation
        #[arg(long)]
        note: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay the ledger of a unit
    History {
        /// Workspace holding the ledger
        #[arg(long, default_value = ".")]
        workspace: String,

        /// Unit identifier
        #[arg(long)]
        unit: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write the default gate configuration as TOML
    InitConfig {
        /// Destination file
        path: String,

        /// Replace an existing file
        #[arg(long)]
        force: bool,

        /// Gate configuration (TOML) to start from instead of the defaults
        #[arg(long)]
        config: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PositionArg {
    First,
    Interior,
    Last,
    Only,
}

impl From<PositionArg> for PagePosition {
    fn from(value: PositionArg) -> Self {
        match value {
            PositionArg::First => Self::First,
            PositionArg::Interior => Self::Interior,
            PositionArg::Last => Self::Last,
            PositionArg::Only => Self::Only,
        }
    }
}

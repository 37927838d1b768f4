use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use meshvault_config::ExtraFileDecision;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "meshvault", version)]
#[command(about = "Import, deduplicate and consolidate a library of 3D models", long_about = None)]
pub struct Cli {
    /// Configuration file; defaults to meshvault.toml in the platform config directory
    #[arg(long, short, global = true, env = "MESHVAULT_CONFIG")]
    pub config: Option<PathBuf>,
    /// More logging (-v debug, -vv trace); MESHVAULT_LOG takes precedence
    #[arg(long, short, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import files and directories into the library
    Import(ImportArgs),
    /// List import batches deferred from earlier imports
    Pending,
    /// Import the next pending batch
    Resume(ResumeArgs),
    /// Fold an existing folder tree into the library layout
    #[command(subcommand)]
    Consolidate(ConsolidateCommand),
    /// Decide what consolidation does with files that are not models
    #[command(subcommand)]
    Policy(PolicyCommand),
    /// Manage the thumbnail cache
    #[command(subcommand)]
    Thumbnails(ThumbnailCommand),
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Args)]
pub struct PlacementArgs {
    /// Library root receiving organized files; defaults to the first configured root
    #[arg(long, short)]
    pub root: Option<PathBuf>,
    /// Reference files where they are instead of copying them into the library
    #[arg(long)]
    pub in_place: bool,
    /// Skip thumbnail generation
    #[arg(long)]
    pub no_thumbnails: bool,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Files or directories; directories are searched recursively
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    #[command(flatten)]
    pub placement: PlacementArgs,
}

#[derive(Debug, Args)]
pub struct ResumeArgs {
    /// Keep going until no batch is pending
    #[arg(long)]
    pub all: bool,
    #[command(flatten)]
    pub placement: PlacementArgs,
}

#[derive(Debug, Subcommand)]
pub enum ConsolidateCommand {
    /// Build a plan without touching any file
    Plan {
        /// Folder tree to consolidate
        source: PathBuf,
        /// Library root; defaults to the first configured root
        #[arg(long, short)]
        root: Option<PathBuf>,
        /// Where to save the plan
        #[arg(long, short, default_value = "consolidation-plan.json")]
        output: PathBuf,
    },
    /// Execute (or resume) a saved plan
    Run {
        plan: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
pub enum PolicyCommand {
    /// Record a decision for an extension such as `.pdf`
    Set { extension: String, decision: DecisionArg },
    /// Forget the decision for an extension
    Forget { extension: String },
    /// List recorded decisions
    List,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DecisionArg {
    /// Move into the library's Misc folder
    Misc,
    /// Leave the file where it is
    Leave,
}
impl From<DecisionArg> for ExtraFileDecision {
    fn from(value: DecisionArg) -> Self {
        match value {
            DecisionArg::Misc => Self::MoveToMisc,
            DecisionArg::Leave => Self::LeaveInPlace,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ThumbnailCommand {
    /// Delete cached thumbnails of models no longer in the catalog
    Cleanup,
}

mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, run::RunArgs, waves::WavesArgs, BatchExit};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "batchwave",
    about = "Run an LLM command over many items with checkpoints, resume, and dependency waves",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .batchwave/ or .git/)
    #[arg(long, global = true, env = "BATCHWAVE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a prompt template over every item of a manifest
    Run(RunArgs),

    /// Show a run's checkpoint or final summary (omit the name to list runs)
    Status { name: Option<String> },

    /// Remove a run's checkpoint and summary
    Clear { name: String },

    /// Print the dependency-wave plan for a task snapshot
    Plan {
        /// Task snapshot (JSON array, or object with a `tasks` array)
        #[arg(long)]
        tasks: PathBuf,
    },

    /// Plan a task snapshot and run it wave by wave
    Waves(WavesArgs),

    /// Inspect and validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run(_) | Commands::Waves(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    // Logs go to stderr; stdout carries results (and JSON with --json).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Run(args) => cmd::run::run(&root, args, cli.json),
        Commands::Status { name } => cmd::status::run(&root, name.as_deref(), cli.json),
        Commands::Clear { name } => cmd::clear::run(&root, &name, cli.json),
        Commands::Plan { tasks } => cmd::plan::run(&tasks, cli.json),
        Commands::Waves(args) => cmd::waves::run(&root, args, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        if let Some(exit) = e.downcast_ref::<BatchExit>() {
            eprintln!("{exit}");
            std::process::exit(exit.exit_code());
        }
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

//! # sldsim
//!
//! CLI for the furnace switchboard state-propagation engine.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sldsim_common::persist::MemoryStore;
use sldsim_common::NodeId;
use sldsim_model::{build_switchboard, furnace_model, load_models, Model};
use sldsim_runner::{
    parse_script, Command, CommandOutcome, JournalEntry, JsonFileStore, NodeView, RunnerError,
    Switchboard, SwitchboardSnapshot, SwitchboardStats,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// CLI Configuration
// ============================================================================

/// sldsim - furnace switchboard single-line diagram simulator
#[derive(Parser, Debug)]
#[command(name = "sldsim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mount a switchboard, run a command script and print the result
    Run(RunConfig),
    /// Apply commands against a persisted state file
    Apply(ApplyConfig),
    /// Print node views
    View(ViewConfig),
    /// Print the validated topology
    Topology(TopologyArgs),
}

/// Topology selection shared by every command.
#[derive(Parser, Debug)]
pub struct TopologyArgs {
    /// Topology YAML files, merged in order (default: built-in furnace topology)
    #[arg(short, long = "topology")]
    pub topologies: Vec<PathBuf>,
}

/// What `run` prints.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RunOutput {
    /// Final snapshot, journal and statistics.
    Full,
    /// Statistics only.
    Stats,
    /// One outcome per command.
    Outcomes,
}

/// Configuration for `run`
#[derive(Parser, Debug)]
pub struct RunConfig {
    /// Command script (one command per line, `#` comments)
    pub script: PathBuf,

    #[command(flatten)]
    pub topology: TopologyArgs,

    /// Persisted state file to mount on (default: start from an empty store)
    #[arg(short, long)]
    pub state: Option<PathBuf>,

    /// Output selection
    #[arg(long, value_enum, default_value = "full")]
    pub output: RunOutput,

    /// Write output to a file instead of stdout
    #[arg(short = 'o', long = "out")]
    pub out: Option<PathBuf>,
}

/// Configuration for `apply`
#[derive(Parser, Debug)]
pub struct ApplyConfig {
    /// Persisted state file (created if missing)
    #[arg(short, long)]
    pub state: PathBuf,

    #[command(flatten)]
    pub topology: TopologyArgs,

    /// Commands, e.g. "supply on" "toggle IGBT-Conv1.left"
    #[arg(required = true)]
    pub commands: Vec<String>,
}

/// Configuration for `view`
#[derive(Parser, Debug)]
pub struct ViewConfig {
    /// Persisted state file (default: empty store)
    #[arg(short, long)]
    pub state: Option<PathBuf>,

    #[command(flatten)]
    pub topology: TopologyArgs,

    /// Only show these nodes
    pub nodes: Vec<String>,
}

// ============================================================================
// Output
// ============================================================================

#[derive(Serialize)]
struct RunReport<'a> {
    outcomes: &'a [CommandOutcome],
    snapshot: SwitchboardSnapshot,
    journal: &'a [JournalEntry],
    stats: &'a SwitchboardStats,
}

fn load_topology(args: &TopologyArgs) -> Result<Model, RunnerError> {
    if args.topologies.is_empty() {
        return Ok(furnace_model()?);
    }
    let paths: Vec<&Path> = args.topologies.iter().map(|p| p.as_path()).collect();
    Ok(load_models(&paths)?)
}

fn mount(topology: &TopologyArgs, state: Option<&Path>) -> Result<Switchboard, RunnerError> {
    let model = load_topology(topology)?;
    let built = build_switchboard(&model)?;
    let board = match state {
        Some(path) => Switchboard::mount(built, JsonFileStore::open(path)?),
        None => Switchboard::mount(built, MemoryStore::new()),
    };
    Ok(board)
}

fn apply_all(
    board: &mut Switchboard,
    commands: &[Command],
) -> Result<Vec<CommandOutcome>, RunnerError> {
    commands.iter().map(|c| board.apply(c)).collect()
}

fn write_json<T: Serialize>(value: &T, out: Option<&Path>) -> Result<(), RunnerError> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{}", json),
    }
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn run_command(config: RunConfig) -> Result<(), RunnerError> {
    let script = std::fs::read_to_string(&config.script)?;
    let commands = parse_script(&script)?;
    let mut board = mount(&config.topology, config.state.as_deref())?;
    let outcomes = apply_all(&mut board, &commands)?;
    info!(commands = outcomes.len(), "script finished");

    let out = config.out.as_deref();
    match config.output {
        RunOutput::Full => write_json(
            &RunReport {
                outcomes: &outcomes,
                snapshot: board.snapshot(),
                journal: board.journal(),
                stats: board.stats(),
            },
            out,
        ),
        RunOutput::Stats => write_json(board.stats(), out),
        RunOutput::Outcomes => write_json(&outcomes, out),
    }
}

fn apply_command(config: ApplyConfig) -> Result<(), RunnerError> {
    let commands = config
        .commands
        .iter()
        .map(|c| c.parse())
        .collect::<Result<Vec<Command>, RunnerError>>()?;
    let mut board = mount(&config.topology, Some(config.state.as_path()))?;
    let outcomes = apply_all(&mut board, &commands)?;
    write_json(&outcomes, None)
}

fn view_command(config: ViewConfig) -> Result<(), RunnerError> {
    let board = mount(&config.topology, config.state.as_deref())?;
    let views: Vec<NodeView> = if config.nodes.is_empty() {
        board.views()
    } else {
        config
            .nodes
            .iter()
            .map(|n| board.view(&NodeId::new(n.as_str())))
            .collect::<Result<_, _>>()?
    };
    write_json(&views, None)
}

fn topology_command(args: TopologyArgs) -> Result<(), RunnerError> {
    let model = load_topology(&args)?;
    let built = build_switchboard(&model)?;
    write_json(&built.node_infos, None)
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), RunnerError> {
    // Initialize tracing subscriber with RUST_LOG env filter
    // Default to "warn" level if RUST_LOG is not set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(config) => run_command(config)?,
        Commands::Apply(config) => apply_command(config)?,
        Commands::View(config) => view_command(config)?,
        Commands::Topology(args) => topology_command(args)?,
    }

    Ok(())
}

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "prepcheck",
    version,
    about = "Prepared-statement cache correctness checks across MySQL versions"
)]
pub struct Cli {
    /// log output format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the cache-boundary scenario over every target/policy pair
    Run(RunArgs),
    /// Write a sample config
    Init(InitArgs),
    /// Show recently stored results
    History(HistoryArgs),
    Version,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProvisionerKind {
    /// MySQL containers via the local Docker daemon
    Container,
    /// in-process engine, no Docker needed
    Memory,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// defaults to ./prepcheck.yaml, or built-in defaults when that is absent
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// reject unknown config keys instead of warning
    #[arg(long)]
    pub strict: bool,

    #[arg(long, value_enum, default_value_t = ProvisionerKind::Container, env = "PREPCHECK_PROVISIONER")]
    pub provisioner: ProvisionerKind,

    /// image reference, e.g. docker.io/mysql:8.0.29 (repeatable; overrides config)
    #[arg(long = "target")]
    pub targets: Vec<String>,

    /// enabled|disabled (repeatable; overrides config)
    #[arg(long = "policy")]
    pub policies: Vec<String>,

    /// keep instances alive across runs
    #[arg(long)]
    pub reuse: bool,

    #[arg(long)]
    pub parallel: Option<usize>,

    /// inject a fault into the memory engine (stale-plan-reuse)
    #[arg(long = "fault")]
    pub faults: Vec<String>,

    /// write the run artifacts as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// write a JUnit XML report
    #[arg(long)]
    pub junit: Option<PathBuf>,

    #[arg(long, default_value = ".prepcheck/prepcheck.db")]
    pub db: PathBuf,

    /// do not record the run
    #[arg(long, conflicts_with = "db")]
    pub no_db: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "prepcheck.yaml")]
    pub config: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct HistoryArgs {
    #[arg(long, default_value = ".prepcheck/prepcheck.db")]
    pub db: PathBuf,

    #[arg(long, default_value = "stmt_cache")]
    pub suite: String,

    #[arg(long, default_value_t = 20)]
    pub limit: u32,

    /// print rows as JSON lines
    #[arg(long)]
    pub json: bool,
}

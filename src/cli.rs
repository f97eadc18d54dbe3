use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "maestro",
    about = "Orchestration backend for an agentic-chat platform",
    version
)]
pub struct Cli {
    /// Log to stderr at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the orchestrator and scheduler (the default).
    Run,
    /// Print the effective settings as JSON and exit.
    ShowConfig,
    /// Generate a fresh base64 master key for MAESTRO_ENCRYPTION_MASTER_KEY.
    GenerateKey,
}

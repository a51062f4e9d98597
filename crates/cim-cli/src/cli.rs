use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use cim_types::{ActorId, MergeLogId};

#[derive(Parser)]
#[command(
    name = "cim",
    about = "Client identity merge engine -- fold duplicate client records into one",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP merge server
    Serve(ServeArgs),
    /// Merge duplicate clients in a fixture
    Merge(MergeArgs),
    /// Reverse a logged merge in a fixture
    Undo(UndoArgs),
    /// Verify every organization's audit chain in a fixture
    VerifyLog(VerifyLogArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// TOML server configuration
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct MergeArgs {
    /// JSON fixture holding clients, tables, role grants, and audit entries
    #[arg(long)]
    pub fixture: PathBuf,
    /// JSON merge request
    #[arg(long)]
    pub request: PathBuf,
    /// Acting staff member
    #[arg(long)]
    pub actor: ActorId,
    /// Write the resulting state back to the fixture
    #[arg(long)]
    pub write: bool,
}

#[derive(Args)]
pub struct UndoArgs {
    #[arg(long)]
    pub fixture: PathBuf,
    /// Merge log to reverse
    #[arg(long)]
    pub log: MergeLogId,
    #[arg(long)]
    pub actor: ActorId,
    #[arg(long)]
    pub write: bool,
}

#[derive(Args)]
pub struct VerifyLogArgs {
    #[arg(long)]
    pub fixture: PathBuf,
}

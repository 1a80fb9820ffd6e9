use std::process::ExitCode;

use clap::{Parser, Subcommand};

use scriptorium::commands::run::RunArgs;
use scriptorium::commands::status::StatusArgs;
use scriptorium::commands::worktrees::WorktreesArgs;
use scriptorium::error::Error;

#[derive(Debug, Parser)]
#[command(
    name = "scriptorium",
    version,
    about = "Agent-orchestration daemon driving coding agents through a git-native planning and merge workflow"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the orchestration loop
    Run(RunArgs),
    /// Show plan-branch status
    Status(StatusArgs),
    /// List in-progress ticket worktrees
    Worktrees(WorktreesArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => args.execute(),
        Commands::Status(args) => args.execute(),
        Commands::Worktrees(args) => args.execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(err) = e.downcast_ref::<Error>() {
                eprintln!("error: {err}");
                err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}

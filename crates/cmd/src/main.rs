// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cmd::commands::query::{self, FindArgs, ListArgs, StatArgs};
use cmd::commands::queue::{self, QmCommand};
use cmd::commands::{load_settings, queue_admin, rpc_client};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "nlds-admin")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Settings file, `~/.nlds-admin-config` when not given
    #[arg(long, global = true, env = "NLDS_ADMIN_CONFIG")]
    config: Option<PathBuf>,
    /// Seconds to wait for the catalog or monitor to answer
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// List holdings
    List(ListArgs),
    /// Find and list files
    Find(FindArgs),
    /// List transactions and their state
    Stat(StatArgs),
    /// Manipulate messages waiting on a queue
    #[command(subcommand)]
    Qm(QmCommand),
}

async fn run(cli: Cli) -> Result<String> {
    if let Commands::Qm(QmCommand::Load(args)) = &cli.command {
        return queue::load_command(args).await;
    }

    let settings = load_settings(cli.config.as_deref())?;
    match &cli.command {
        Commands::List(args) => {
            let rpc = rpc_client(&settings, cli.timeout)?;
            let result = query::list_command(&rpc, args).await;
            finish(rpc.close().await, result)
        }
        Commands::Find(args) => {
            let rpc = rpc_client(&settings, cli.timeout)?;
            let result = query::find_command(&rpc, args).await;
            finish(rpc.close().await, result)
        }
        Commands::Stat(args) => {
            let rpc = rpc_client(&settings, cli.timeout)?;
            let result = query::stat_command(&rpc, args).await;
            finish(rpc.close().await, result)
        }
        Commands::Qm(command) => {
            let admin = queue_admin(&settings, command.queue())?;
            let result = queue::run(&admin, command).await;
            finish(admin.close().await, result)
        }
    }
}

/// The command's result wins over a failure to close the connection
fn finish(closed: rabbit::Result<()>, result: Result<String>) -> Result<String> {
    if let Err(e) = closed {
        let err = e.to_string();
        diagnostics::warn!("Closing the broker connection failed: {err}", err: err.as_str());
    }
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    diagnostics::init_diagnostics();

    let cli = Cli::parse();
    let output = run(cli).await?;
    print!("{output}");
    Ok(())
}

//! Command-line interface.

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::control::ControlPlane;

#[derive(Parser)]
#[command(name = "ralph", version, about = "Drive AI coding agents through an iterative, validation-gated loop")]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the control plane (HTTP + websocket on 127.0.0.1:4242 by default)
    Serve,
    /// List the registered agent adapters and whether each CLI is installed
    Agents,
}

pub async fn execute(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Serve => {
            let control = ControlPlane::new(config)?;
            crate::server::serve(control).await?;
            Ok(())
        }
        Command::Agents => {
            let subprocess = crate::subprocess::SubprocessManager::production();
            let agents = crate::agent::AgentRegistry::with_options(config.agent_options.clone());
            for name in agents.names() {
                let adapter = agents.get(name)?;
                let installed = agents.is_installed(name, &subprocess).await?;
                println!(
                    "{:<10} {:<14} {}",
                    name,
                    adapter.display_name(),
                    if installed { "installed" } else { "not installed" }
                );
            }
            Ok(())
        }
    }
}

//! Command-line interface

use clap::{Parser, Subcommand};
use std::fmt;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "redundancy-agent", version)]
#[command(about = "Drive a redundant router through its keepalived role")]
pub struct Cli {
    /// Agent settings (YAML); searched in the standard locations if omitted.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Router state file, overriding the settings.
    #[arg(long, value_name = "FILE")]
    pub state: Option<PathBuf>,

    /// Interface inventory, overriding the settings.
    #[arg(long, value_name = "FILE")]
    pub inventory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Reconcile keepalived/conntrackd with the redundancy flag.
    Set,
    /// Take over the virtual addresses (keepalived notify_master).
    Master,
    /// Release the virtual addresses (keepalived notify_backup).
    Backup,
    /// Enter the degraded state (keepalived notify_fault).
    Fault,
    /// Stop the daemons and remove the rendered configuration.
    Disable,
    /// Print the recorded state as JSON.
    Status,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Set => "set",
            Command::Master => "master",
            Command::Backup => "backup",
            Command::Fault => "fault",
            Command::Disable => "disable",
            Command::Status => "status",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_paths_and_command() {
        let cli = Cli::try_parse_from([
            "redundancy-agent",
            "--config",
            "/etc/redundancy/agent.yaml",
            "--state",
            "/tmp/state.json",
            "master",
        ])
        .unwrap();

        assert_eq!(cli.command, Command::Master);
        assert_eq!(cli.state, Some(PathBuf::from("/tmp/state.json")));
        assert!(cli.inventory.is_none());
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["redundancy-agent", "promote"]).is_err());
    }
}

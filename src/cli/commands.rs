//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - create: start a new run in a repository
//! - list/show: inspect runs
//! - verify/teardown: run the configured scripts
//! - gate/ack: promotion check and attention acknowledgement

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// runctl - isolated per-task runs with verification and teardown
#[derive(Parser, Debug)]
#[command(name = "runctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a run with its own worktree, branch and session
    Create {
        /// Run name (unique among active runs of the repository)
        name: String,

        /// Repository to create the run in
        #[arg(short, long, default_value = ".")]
        repo: PathBuf,
    },

    /// List runs
    List {
        /// Only runs of this repo ID
        #[arg(long)]
        repo_id: Option<String>,

        /// Include archived runs
        #[arg(short, long)]
        all: bool,
    },

    /// Show a run's metadata, latest records and events
    Show {
        /// Run name, ID or ID prefix
        id: String,
    },

    /// Run the verify script for a run
    Verify {
        /// Run name, ID or ID prefix
        id: String,
    },

    /// Tear a run down and archive it
    Teardown {
        /// Run name, ID or ID prefix
        id: String,
    },

    /// Check whether a run may be promoted
    Gate {
        /// Run name, ID or ID prefix
        id: String,
    },

    /// Acknowledge and clear a run's attention flag
    Ack {
        /// Run name, ID or ID prefix
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["runctl"]).is_err());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["runctl", "-v", "list"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["runctl", "list", "-c", "/path/to/runctl.yml"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/runctl.yml")));
    }

    #[test]
    fn test_create_defaults_repo_to_cwd() {
        let cli = Cli::try_parse_from(["runctl", "create", "fix-login"]).unwrap();
        match cli.command {
            Commands::Create { name, repo } => {
                assert_eq!(name, "fix-login");
                assert_eq!(repo, PathBuf::from("."));
            }
            _ => panic!("Expected create command"),
        }
    }

    #[test]
    fn test_list_flags() {
        let cli = Cli::try_parse_from(["runctl", "list", "--all", "--repo-id", "abc"]).unwrap();
        match cli.command {
            Commands::List { repo_id, all } => {
                assert!(all);
                assert_eq!(repo_id.as_deref(), Some("abc"));
            }
            _ => panic!("Expected list command"),
        }
    }

    #[test]
    fn test_id_commands() {
        for sub in ["show", "verify", "teardown", "gate", "ack"] {
            let cli = Cli::try_parse_from(["runctl", sub, "3f9a"]).unwrap();
            let id = match cli.command {
                Commands::Show { id }
                | Commands::Verify { id }
                | Commands::Teardown { id }
                | Commands::Gate { id }
                | Commands::Ack { id } => id,
                _ => panic!("Expected id command for {}", sub),
            };
            assert_eq!(id, "3f9a");
        }
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use sastsync::config::DEFAULT_CONFIG_FILE;
use sastsync::context::DEFAULT_CONTEXT_FILE;

/// Drive static scans through their lifecycle and keep the issue tracker in
/// sync with the flaws they find
#[derive(Parser)]
#[command(name = "sastsync", version)]
pub struct Cli {
    /// Branch to act for (default: the checked-out git branch)
    #[arg(short, long, global = true)]
    pub branch: Option<String>,

    /// Read the prior context from stdin and print the result as JSON
    #[arg(long, global = true)]
    pub console: bool,

    /// Configuration document holding the branch segments
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Where the execution context is persisted between invocations
    #[arg(long, global = true, default_value = DEFAULT_CONTEXT_FILE)]
    pub output: PathBuf,

    /// Scan service API key id
    #[arg(long, global = true, env = "VERACODE_API_KEY_ID", hide_env_values = true)]
    pub vid: Option<String>,

    /// Scan service API key secret
    #[arg(long, global = true, env = "VERACODE_API_KEY_SECRET", hide_env_values = true)]
    pub vkey: Option<String>,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a build, upload the artifacts and begin the scan
    Start {
        /// Scan name for the `param` naming policy
        #[arg(long)]
        name: Option<String>,

        /// Sandbox name for the `param` naming policy
        #[arg(long)]
        sandbox: Option<String>,
    },

    /// Wait for a build's results and aggregate its report
    Results {
        /// Build to wait for instead of the one in the context
        #[arg(long)]
        build_id: Option<String>,

        /// Sandbox name for the `param` naming policy
        #[arg(long)]
        sandbox: Option<String>,
    },

    /// Reconcile aggregated flaws with the issue tracker
    Tickets {
        /// Print the planned actions without touching any tickets
        #[arg(long)]
        dry_run: bool,
    },

    /// Start, wait for results and sync tickets in one go
    Run {
        /// Scan name for the `param` naming policy
        #[arg(long)]
        name: Option<String>,

        /// Sandbox name for the `param` naming policy
        #[arg(long)]
        sandbox: Option<String>,

        /// Plan ticket changes without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Add a placeholder segment to the configuration document
    Skeleton {
        /// Branch pattern for the new segment
        #[arg(default_value = ".*")]
        pattern: String,
    },

    /// Summarise a saved detailed report without contacting the service
    Report {
        /// Detailed report as XML or JSON
        #[arg(short, long)]
        file: PathBuf,

        /// Print the aggregated report as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Command {
    /// Whether the command begins from an empty context rather than the
    /// persisted one.
    pub fn starts_fresh(&self) -> bool {
        matches!(self, Command::Start { .. } | Command::Run { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "sastsync",
            "results",
            "--build-id",
            "77",
            "--branch",
            "main",
            "--console",
        ])
        .unwrap();
        assert_eq!(cli.branch.as_deref(), Some("main"));
        assert!(cli.console);
        assert!(matches!(cli.command, Command::Results { build_id: Some(ref b), .. } if b == "77"));
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["sastsync", "skeleton"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(cli.output, PathBuf::from(DEFAULT_CONTEXT_FILE));
        assert!(matches!(cli.command, Command::Skeleton { ref pattern } if pattern == ".*"));
    }

    #[test]
    fn start_and_run_begin_fresh() {
        let start = Cli::try_parse_from(["sastsync", "start"]).unwrap();
        let tickets = Cli::try_parse_from(["sastsync", "tickets", "--dry-run"]).unwrap();
        assert!(start.command.starts_fresh());
        assert!(!tickets.command.starts_fresh());
    }
}

//! CLI arguments for the `allocator` binary.

use {
    clap::{Parser, Subcommand},
    std::path::PathBuf,
};

/// Runs one allocation step over a snapshot of the competition state
#[derive(Parser, Debug)]
#[command(version)]
pub struct Arguments {
    #[arg(long, env, default_value = "warn,allocator=debug,allocation=debug")]
    pub log_filter: String,

    /// At which log level logs should be printed to stderr instead of stdout.
    #[arg(long, env)]
    pub log_stderr_threshold: Option<tracing::Level>,

    /// Whether to use JSON format for the logs.
    #[arg(long, env, default_value = "false")]
    pub use_json_logs: bool,

    /// Path to the allocation configuration file in TOML format. Defaults
    /// apply to everything it doesn't set.
    #[arg(long, env)]
    pub config: Option<PathBuf>,

    /// JSON snapshot of rounds, accounts, targets, submissions and bids.
    #[arg(long, env)]
    pub snapshot: PathBuf,

    /// Where to write the state after the command ran. Nothing is written
    /// when absent.
    #[arg(long, env)]
    pub output: Option<PathBuf>,

    /// Seed for tie-breaks and fallback picks. Random when absent.
    #[arg(long, env)]
    pub seed: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Clears the bids of an active round and charges the winners.
    AllocateRound {
        #[arg(long)]
        round: i64,

        /// Losing bidders of a submission auction get their own unclaimed
        /// work back first.
        #[arg(long)]
        prefer_own_submission: bool,
    },
    /// Clears a completed round again, replacing its results.
    ReallocateRound {
        #[arg(long)]
        round: i64,

        #[arg(long)]
        prefer_own_submission: bool,
    },
    /// Assigns balanced review tasks for the submissions of a round.
    AllocateReviews {
        #[arg(long)]
        round: i64,

        /// Reviews per reviewer and per submission. Falls back to the
        /// configuration.
        #[arg(long)]
        tasks_per_reviewer: Option<u32>,
    },
}

impl std::fmt::Display for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            log_filter,
            log_stderr_threshold,
            use_json_logs,
            config,
            snapshot,
            output,
            seed,
            command,
        } = self;

        writeln!(f, "log_filter: {log_filter}")?;
        writeln!(f, "log_stderr_threshold: {log_stderr_threshold:?}")?;
        writeln!(f, "use_json_logs: {use_json_logs}")?;
        writeln!(f, "config: {config:?}")?;
        writeln!(f, "snapshot: {}", snapshot.display())?;
        writeln!(f, "output: {output:?}")?;
        writeln!(f, "seed: {seed:?}")?;
        writeln!(f, "command: {command:?}")?;
        Ok(())
    }
}

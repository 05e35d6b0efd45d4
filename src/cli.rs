use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mailpilot", version, about = "Autopilot triage for a desktop mailbox: quick rules, AI classification, folder routing, aging sweeps", disable_help_subcommand = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create config files with commented defaults
    Init {
        /// Overwrite existing config files
        #[arg(long)]
        force: bool,
    },

    /// Run one autopilot pass over unprocessed messages
    Run {
        /// Show what would happen without executing anything
        #[arg(long)]
        dry_run: bool,

        /// Maximum messages to process this pass
        #[arg(long)]
        limit: Option<usize>,

        /// Per-message output (-v), plus flush/cache detail (-vv)
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,

        /// Prompt for missing destination folders
        #[arg(long, conflicts_with = "auto_create")]
        interactive: bool,

        /// Create missing destination folders without prompting
        #[arg(long)]
        auto_create: bool,

        /// AI provider override (claude, openai, ollama)
        #[arg(long)]
        provider: Option<String>,

        /// Process only this account
        #[arg(long)]
        account: Option<String>,

        /// Keep running batches; Ctrl-C stops after the current one
        #[arg(long)]
        continuous: bool,
    },

    /// List queued actions awaiting approval
    Queue {
        /// Filter by status
        #[arg(long, default_value = "pending")]
        status: String,

        /// Maximum rows to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Approve and execute a queued action
    Approve {
        /// Pending action id (see 'mailpilot queue')
        id: i64,
    },

    /// Reject a queued action
    Reject {
        /// Pending action id
        id: i64,
    },

    /// Execute actions whose destination folders now exist
    RetryFolders,

    /// Watch inboxes and trigger scans on new mail or elapsed time
    Watch {
        /// Seconds between inbox count checks
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Minutes after a scan before the next scheduled scan
        #[arg(long)]
        post_scan_interval: Option<u64>,

        /// Show what would happen without executing anything
        #[arg(long)]
        dry_run: bool,

        /// Per-scan output (-v), plus poll detail (-vv)
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,

        /// Create missing destination folders without prompting
        #[arg(long)]
        auto_create: bool,

        /// Skip the immediate scan on startup
        #[arg(long)]
        no_startup_scan: bool,

        /// AI provider override (claude, openai, ollama)
        #[arg(long)]
        provider: Option<String>,
    },

    /// Show configuration and processing statistics
    Status,

    /// Show the action audit log
    History {
        /// Maximum entries to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Clear stored state
    Reset {
        /// Clear watcher ownership and baselines
        #[arg(long)]
        watcher: bool,

        /// Clear the processed ledger
        #[arg(long)]
        processed: bool,

        /// Clear cached mailbox lists
        #[arg(long)]
        cache: bool,

        /// Clear everything above
        #[arg(long)]
        all: bool,
    },

    /// Set how missing folders are handled for an account
    SetFolderPolicy {
        /// Account name
        account: String,

        /// auto_create, interactive, or queue
        policy: String,
    },
}

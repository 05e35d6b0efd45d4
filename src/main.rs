use anyhow::Result;
use clap::Parser;

use mailpilot::cli::{Cli, Commands};
use mailpilot::autopilot::{self, watcher, RunArgs};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => mailpilot::init::run(force),
        Commands::Run {
            dry_run,
            limit,
            verbose,
            interactive,
            auto_create,
            provider,
            account,
            continuous,
        } => autopilot::run_cmd(RunArgs {
            dry_run,
            limit,
            verbose,
            interactive,
            auto_create,
            provider,
            account,
            continuous,
        }),
        Commands::Queue { status, limit } => mailpilot::approval::queue_cmd(&status, limit),
        Commands::Approve { id } => mailpilot::approval::approve_cmd(id),
        Commands::Reject { id } => mailpilot::approval::reject_cmd(id),
        Commands::RetryFolders => autopilot::retry_folders_cmd(),
        Commands::Watch {
            poll_interval,
            post_scan_interval,
            dry_run,
            verbose,
            auto_create,
            no_startup_scan,
            provider,
        } => watcher::run(watcher::WatchOptions {
            poll_interval,
            post_scan_interval,
            dry_run,
            verbose,
            auto_create,
            no_startup_scan,
            provider,
        }),
        Commands::Status => mailpilot::status::status_cmd(),
        Commands::History { limit } => mailpilot::status::history_cmd(limit),
        Commands::Reset {
            watcher,
            processed,
            cache,
            all,
        } => mailpilot::status::reset_cmd(watcher, processed, cache, all),
        Commands::SetFolderPolicy { account, policy } => {
            mailpilot::config::settings::set_folder_policy_cmd(&account, &policy)
        }
    }
}

//! Autopilot processing: decision pipeline, folder resolution, mutation
//! buffering, aging sweeps, and the hybrid watcher.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod aging;
pub mod buffer;
pub mod context;
pub mod engine;
pub mod folders;
pub mod rules;
pub mod types;
pub mod watcher;

use crate::ai::build_provider;
use crate::bridge::{OsaCalendarClient, OsaMailClient, OsaReminderClient};
use crate::config::autopilot::load_autopilot_config;
use crate::config::settings::load_config;
use crate::resolve;
use crate::store::Store;
use engine::{Engine, RunOptions};
use types::RunResult;

/// Build the engine and its collaborators, then run `f` against it.
pub fn with_engine<T>(
    provider_override: Option<&str>,
    f: impl FnOnce(&Engine) -> Result<T>,
) -> Result<T> {
    let config = load_config(None)?;
    let Some(autopilot) = load_autopilot_config(&resolve::autopilot_yaml())? else {
        bail!(
            "No autopilot config at {}. Run 'mailpilot init' first.",
            resolve::autopilot_yaml().display()
        );
    };
    let store = Store::open(&resolve::database_file())?;
    let ai = build_provider(&config.settings, provider_override)?;
    let mail = OsaMailClient::new();
    let calendar = OsaCalendarClient::new();
    let reminders = OsaReminderClient::new();
    let engine = Engine {
        config: &config,
        autopilot: &autopilot,
        store: &store,
        ai: ai.as_ref(),
        mail: &mail,
        calendar: &calendar,
        reminders: &reminders,
    };
    f(&engine)
}

#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub verbose: u8,
    pub interactive: bool,
    pub auto_create: bool,
    pub provider: Option<String>,
    pub account: Option<String>,
    pub continuous: bool,
}

fn run_single_pass(args: &RunArgs) -> Result<RunResult> {
    with_engine(args.provider.as_deref(), |engine| {
        if !engine.autopilot.enabled {
            bail!("Autopilot is disabled in autopilot.yaml");
        }
        if !engine.ai.is_available() {
            bail!(
                "AI provider '{}' is not available. Check its API key or host.",
                engine.ai.name()
            );
        }
        engine.run(&RunOptions {
            dry_run: args.dry_run,
            limit: args.limit,
            verbose: args.verbose,
            interactive: args.interactive,
            auto_create: args.auto_create,
            account: args.account.clone(),
            direct_moves: false,
        })
    })
}

fn print_report(result: &RunResult) {
    let marker = if result.dry_run { " [dry run]" } else { "" };
    println!(
        "\nPass complete{}: {} fetched, {} executed, {} queued, {} skipped, {} errors ({:.1}s)",
        marker,
        result.emails_fetched,
        result.actions_executed,
        result.actions_queued,
        result.emails_skipped,
        result.errors,
        result.duration_seconds(),
    );
    if let Some(aging) = &result.aging {
        println!(
            "Aging: {} moved to review, {} purged from review, {} removed by retention, {} errors",
            aging.moved_to_review,
            aging.deleted_from_review,
            aging.retention_deleted,
            aging.errors,
        );
    }
}

/// mailpilot run [--continuous] [--dry-run] ...
#[tokio::main]
pub async fn run_cmd(args: RunArgs) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    if args.continuous {
        let stop_clone = stop.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            println!("\nStopping after current batch...");
            stop_clone.store(true, Ordering::Relaxed);
        });
        println!("Continuous mode: Ctrl-C stops after the current batch.\n");
    }

    loop {
        let pass_args = args.clone();
        let result = tokio::task::spawn_blocking(move || run_single_pass(&pass_args)).await??;
        print_report(&result);

        if !args.continuous || stop.load(Ordering::Relaxed) {
            break;
        }
        if result.emails_fetched == 0 {
            // Nothing new; don't hammer the host between batches.
            tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        }
    }
    Ok(())
}

/// mailpilot retry-folders
pub fn retry_folders_cmd() -> Result<()> {
    with_engine(None, |engine| engine.retry_pending_folders())
}

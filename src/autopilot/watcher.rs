//! Hybrid watcher — event-driven (message-count deltas) plus interval-based
//! scan scheduling, with crash-recovery state and single-instance ownership.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ai::build_provider;
use crate::autopilot::engine::{Engine, RunOptions};
use crate::autopilot::types::RunResult;
use crate::bridge::{MailClient, OsaCalendarClient, OsaMailClient, OsaReminderClient};
use crate::config::autopilot::{load_autopilot_config, AutopilotConfig};
use crate::config::settings::{load_config, Config};
use crate::resolve;
use crate::store::Store;

pub const STATE_LAST_COUNTS: &str = "last_inbox_counts";
pub const STATE_LAST_SCAN: &str = "last_scan_completed";
pub const STATE_WATCHER_PID: &str = "watcher_pid";

/// Why a scan fires. Count deltas outrank the elapsed interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    NewMessages(String),
    Interval,
}

impl Trigger {
    pub fn reason(&self) -> &'static str {
        match self {
            Trigger::NewMessages(_) => "new_messages",
            Trigger::Interval => "interval",
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            Trigger::NewMessages(details) => Some(details),
            Trigger::Interval => None,
        }
    }
}

/// Decide whether a scan should run.
///
/// Keys are "account:mailbox". Priority 1: any count increased since the
/// baseline. Priority 2: the post-scan interval elapsed (or no scan is
/// recorded at all).
pub fn decide_trigger(
    previous: &BTreeMap<String, u32>,
    current: &BTreeMap<String, u32>,
    last_scan: Option<DateTime<Utc>>,
    post_scan_interval: Duration,
) -> Option<Trigger> {
    for (key, count) in current {
        let before = previous.get(key).copied().unwrap_or(0);
        if *count > before {
            let diff = count - before;
            let location = key.replacen(':', "/", 1);
            return Some(Trigger::NewMessages(format!(
                "{} new message(s) in {}",
                diff, location
            )));
        }
    }

    match last_scan {
        None => Some(Trigger::Interval),
        Some(completed) if Utc::now() - completed >= post_scan_interval => {
            Some(Trigger::Interval)
        }
        Some(_) => None,
    }
}

fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // Signal 0 probes existence without delivering anything. EPERM still
    // means the process exists, just owned by someone else.
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Refuse to start when a live watcher already owns the state. Stale or
/// unparseable pids are treated as unowned.
pub fn check_stale_watcher(store: &Store) -> Result<()> {
    let Some(stored) = store.get_watcher_state(STATE_WATCHER_PID)? else {
        return Ok(());
    };
    let Ok(pid) = stored.parse::<i32>() else {
        return Ok(());
    };
    if pid != std::process::id() as i32 && pid_alive(pid) {
        bail!(
            "Another watcher appears to be running (PID {}). \
             If this is wrong, run 'mailpilot reset --watcher'.",
            pid
        );
    }
    Ok(())
}

struct WatchState {
    last_counts: BTreeMap<String, u32>,
    last_scan: Option<DateTime<Utc>>,
}

fn restore_state(store: &Store) -> WatchState {
    let last_counts = store
        .get_watcher_state(STATE_LAST_COUNTS)
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    let last_scan = store
        .get_watcher_state(STATE_LAST_SCAN)
        .ok()
        .flatten()
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc));
    WatchState {
        last_counts,
        last_scan,
    }
}

fn persist_state(store: &Store, state: &WatchState) {
    if let Ok(counts) = serde_json::to_string(&state.last_counts) {
        let _ = store.set_watcher_state(STATE_LAST_COUNTS, &counts);
    }
    if let Some(last_scan) = state.last_scan {
        let _ = store.set_watcher_state(STATE_LAST_SCAN, &last_scan.to_rfc3339());
    }
    let _ = store.set_watcher_state(STATE_WATCHER_PID, &std::process::id().to_string());
}

fn monitored_accounts(
    autopilot: &AutopilotConfig,
    config: &Config,
    mail: &dyn MailClient,
    verbose: u8,
) -> Vec<String> {
    if let Some(accounts) = &autopilot.accounts {
        if !accounts.is_empty() {
            return accounts.clone();
        }
    }
    match mail.list_accounts() {
        Ok(list) => list
            .into_iter()
            .filter(|a| a.enabled)
            .map(|a| a.name)
            .filter(|name| {
                config
                    .accounts
                    .get(name)
                    .map(|c| c.enabled)
                    .unwrap_or(true)
            })
            .collect(),
        Err(e) => {
            if verbose >= 2 {
                eprintln!("Warning: failed to list accounts: {}", e);
            }
            vec![]
        }
    }
}

fn read_counts(
    mail: &dyn MailClient,
    accounts: &[String],
    mailboxes: &[String],
    verbose: u8,
) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for account in accounts {
        for mailbox in mailboxes {
            match mail.message_count(account, mailbox) {
                Ok(count) => {
                    counts.insert(format!("{}:{}", account, mailbox), count);
                }
                Err(e) => {
                    if verbose >= 2 {
                        eprintln!(
                            "Warning: failed to get count for {}/{}: {}",
                            account, mailbox, e
                        );
                    }
                }
            }
        }
    }
    counts
}

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub poll_interval: Option<u64>,
    pub post_scan_interval: Option<u64>,
    pub dry_run: bool,
    pub verbose: u8,
    pub auto_create: bool,
    pub no_startup_scan: bool,
    pub provider: Option<String>,
}

/// One poll tick: read counts, maybe trigger a scan, persist state.
fn poll_tick(
    config: &Config,
    autopilot: &AutopilotConfig,
    opts: &WatchOptions,
    post_scan_interval: Duration,
    mut state: WatchState,
    force_reason: Option<&str>,
) -> WatchState {
    let store = match Store::open(&resolve::database_file()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Watcher: cannot open store: {}", e);
            return state;
        }
    };
    let mail = OsaMailClient::new();
    let accounts = monitored_accounts(autopilot, config, &mail, opts.verbose);
    let current = read_counts(&mail, &accounts, &autopilot.mailboxes, opts.verbose);

    let trigger = if let Some(reason) = force_reason {
        Some((reason.to_string(), None))
    } else {
        decide_trigger(
            &state.last_counts,
            &current,
            state.last_scan,
            post_scan_interval,
        )
        .map(|t| (t.reason().to_string(), t.details().map(str::to_string)))
    };

    let Some((reason, details)) = trigger else {
        return state;
    };

    if opts.verbose >= 1 {
        let timestamp = Utc::now().format("%H:%M:%S");
        match &details {
            Some(details) => println!("[{}] Triggering scan ({}): {}", timestamp, reason, details),
            None => println!("[{}] Triggering scan ({})", timestamp, reason),
        }
    }

    // Baseline BEFORE the scan, refreshed again after (messages move).
    state.last_counts = current;

    match run_scan(config, autopilot, &store, opts) {
        Ok(result) => {
            if opts.verbose >= 1 {
                println!(
                    "Scan complete: {} processed, {} skipped, {} errors",
                    result.emails_processed, result.emails_skipped, result.errors
                );
            }
        }
        Err(e) => {
            eprintln!("Scan error: {}", e);
        }
    }

    state.last_scan = Some(Utc::now());
    state.last_counts = read_counts(&mail, &accounts, &autopilot.mailboxes, opts.verbose);
    persist_state(&store, &state);
    state
}

fn run_scan(
    config: &Config,
    autopilot: &AutopilotConfig,
    store: &Store,
    opts: &WatchOptions,
) -> Result<RunResult> {
    let ai = build_provider(&config.settings, opts.provider.as_deref())?;
    let mail = OsaMailClient::new();
    let calendar = OsaCalendarClient::new();
    let reminders = OsaReminderClient::new();
    let engine = Engine {
        config,
        autopilot,
        store,
        ai: ai.as_ref(),
        mail: &mail,
        calendar: &calendar,
        reminders: &reminders,
    };
    engine.run(&RunOptions {
        dry_run: opts.dry_run,
        verbose: opts.verbose,
        auto_create: opts.auto_create,
        ..Default::default()
    })
}

/// mailpilot watch [--poll-interval N] [--post-scan-interval N]
#[tokio::main]
pub async fn run(opts: WatchOptions) -> Result<()> {
    let config = load_config(None)?;
    let Some(autopilot) = load_autopilot_config(&resolve::autopilot_yaml())? else {
        bail!(
            "No autopilot config at {}. Run 'mailpilot init' first.",
            resolve::autopilot_yaml().display()
        );
    };

    let poll_interval = opts
        .poll_interval
        .unwrap_or(config.settings.poll_interval_seconds);
    let post_scan_interval = Duration::minutes(
        opts.post_scan_interval
            .unwrap_or(config.settings.post_scan_interval_minutes) as i64,
    );

    let store = Store::open(&resolve::database_file())?;
    check_stale_watcher(&store)?;

    let mut state = restore_state(&store);
    persist_state(&store, &state);

    println!(
        "Watcher started (poll every {}s, interval {}m)",
        poll_interval,
        post_scan_interval.num_minutes()
    );
    if opts.dry_run {
        println!("DRY RUN MODE - no actions will be executed");
    }
    println!("Press Ctrl-C to stop\n");

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        println!("\nReceived signal, shutting down...");
        shutdown_clone.store(true, Ordering::Relaxed);
    });

    let startup_scan = config.settings.watcher_startup_scan && !opts.no_startup_scan;
    let mut first_tick = true;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        // Run the tick in a blocking context; an in-flight scan finishes
        // even if shutdown is requested meanwhile.
        let tick_config = config.clone();
        let tick_autopilot = autopilot.clone();
        let tick_opts = opts.clone();
        let force = if first_tick && startup_scan {
            Some("startup")
        } else {
            None
        };
        first_tick = false;
        let force_owned = force.map(str::to_string);

        state = tokio::task::spawn_blocking(move || {
            poll_tick(
                &tick_config,
                &tick_autopilot,
                &tick_opts,
                post_scan_interval,
                state,
                force_owned.as_deref(),
            )
        })
        .await?;

        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        tokio::time::sleep(tokio::time::Duration::from_secs(poll_interval)).await;
    }

    println!("Watcher stopped");
    Ok(())
}

//! Status, history and reset commands.

use anyhow::Result;

use crate::config::autopilot::load_autopilot_config;
use crate::config::settings::load_config;
use crate::resolve;
use crate::store::Store;

/// mailpilot status
pub fn status_cmd() -> Result<()> {
    let settings_path = resolve::settings_toml();
    let autopilot_path = resolve::autopilot_yaml();

    println!(
        "Settings:  {} {}",
        if settings_path.exists() { "ok" } else { "missing" },
        settings_path.display()
    );
    println!(
        "Autopilot: {} {}",
        if autopilot_path.exists() { "ok" } else { "missing" },
        autopilot_path.display()
    );

    let config = load_config(None)?;
    println!("Provider:  {}", config.settings.ai_provider);
    println!(
        "Thresholds: confidence {:.2}, outbound {:.2}",
        config.settings.confidence_threshold, config.settings.outbound_confidence_threshold
    );

    if let Some(autopilot) = load_autopilot_config(&autopilot_path)? {
        println!(
            "Mailboxes: {} / accounts: {}",
            autopilot.mailboxes.join(", "),
            autopilot
                .accounts
                .as_ref()
                .map(|a| a.join(", "))
                .unwrap_or_else(|| "(all enabled)".to_string())
        );
        println!(
            "Quick rules: {}, aging: {}",
            autopilot.quick_rules.len(),
            if autopilot.aging.enabled { "on" } else { "off" }
        );
    }

    let store = Store::open(&resolve::database_file())?;
    let stats = store.get_stats()?;
    println!(
        "\nProcessed: {} total (last: {})",
        stats.processed_total,
        stats.last_processed.as_deref().unwrap_or("never")
    );
    println!("Pending approvals: {}", stats.pending_count);

    let pending_folders = store.get_pending_folders(None)?;
    if !pending_folders.is_empty() {
        println!("\nFolders awaiting creation:");
        for pf in pending_folders {
            println!(
                "  {} ({}) - {} message(s), first queued {}",
                pf.folder, pf.account, pf.message_count, pf.first_queued
            );
        }
    }

    if !stats.actions_7d.is_empty() {
        println!("\nActions (last 7 days):");
        for (action, count) in stats.actions_7d {
            println!("  {:<24} {}", action, count);
        }
    }
    Ok(())
}

/// mailpilot history [--limit N]
pub fn history_cmd(limit: usize) -> Result<()> {
    let store = Store::open(&resolve::database_file())?;
    let entries = store.get_audit_log(limit)?;
    if entries.is_empty() {
        println!("No actions recorded.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {:<22} {:<10} {}",
            entry.timestamp, entry.action, entry.source, entry.message_id
        );
    }
    Ok(())
}

/// mailpilot reset [--watcher] [--processed] [--cache] [--all]
pub fn reset_cmd(watcher: bool, processed: bool, cache: bool, all: bool) -> Result<()> {
    if !(watcher || processed || cache || all) {
        println!("Nothing to reset. Pass --watcher, --processed, --cache or --all.");
        return Ok(());
    }
    let store = Store::open(&resolve::database_file())?;
    if watcher || all {
        store.clear_watcher_state()?;
        println!("Watcher state cleared.");
    }
    if processed || all {
        let removed = store.clear_processed()?;
        println!(
            "Processed ledger cleared ({} record(s)). Next run re-analyzes these messages.",
            removed
        );
    }
    if cache || all {
        let removed = store.clear_mailbox_cache(None)?;
        println!("Mailbox cache cleared ({} account(s)).", removed);
    }
    Ok(())
}

//! Approval queue commands: list, approve, reject.

use anyhow::Result;

use crate::autopilot::with_engine;
use crate::resolve;
use crate::store::Store;
use crate::util::truncate;

/// mailpilot queue [--status STATUS] [--limit N]
pub fn queue_cmd(status: &str, limit: usize) -> Result<()> {
    let store = Store::open(&resolve::database_file())?;
    let rows = store.get_pending_actions(status, limit)?;

    if rows.is_empty() {
        println!("No {} actions.", status);
        return Ok(());
    }

    println!("{} {} action(s):\n", rows.len(), status);
    for row in &rows {
        let folder_note = match (&row.pending_folder, &row.pending_account) {
            (Some(folder), Some(account)) => format!("  [waiting on '{}' ({})]", folder, account),
            _ => String::new(),
        };
        println!(
            "  #{:<4} {:>4.0}%  {}  {}{}",
            row.id,
            row.confidence * 100.0,
            row.decision.action.name(),
            truncate(&row.email_summary, 60),
            folder_note,
        );
        if !row.reasoning.is_empty() {
            println!("        {}", truncate(&row.reasoning, 100));
        }
    }
    println!("\nUse 'mailpilot approve <id>' or 'mailpilot reject <id>'.");
    Ok(())
}

/// mailpilot approve ID
pub fn approve_cmd(id: i64) -> Result<()> {
    with_engine(None, |engine| {
        let result = engine.execute_pending_action(id)?;
        if result.success {
            println!(
                "Approved #{}: {} executed.",
                id,
                result.action.as_deref().unwrap_or("action")
            );
        } else {
            println!(
                "Could not execute #{}: {}",
                id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(())
    })
}

/// mailpilot reject ID
pub fn reject_cmd(id: i64) -> Result<()> {
    let store = Store::open(&resolve::database_file())?;
    if store.update_pending_status(id, "rejected")? {
        println!("Rejected #{}.", id);
    } else {
        println!("No pending action #{}.", id);
    }
    Ok(())
}

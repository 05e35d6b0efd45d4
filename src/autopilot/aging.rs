//! Aging/retention sweep — three phases run after each pipeline pass.
//!
//! 1. Stale inbox messages relocate to the review folder.
//! 2. Stale review-folder messages are soft-deleted.
//! 3. Per-folder retention rules soft-delete old messages.
//!
//! Each message is handled independently: one failure never aborts the
//! remainder of the sweep.

use chrono::{Duration, Utc};
use std::collections::HashMap;

use crate::autopilot::folders::mailbox_list;
use crate::autopilot::types::AgingResult;
use crate::bridge::mail::{MailClient, LOCAL_ACCOUNT_KEY};
use crate::config::autopilot::AgingConfig;
use crate::store::Store;

const REVIEW_FETCH_LIMIT: usize = 200;

pub struct SweepParams<'a> {
    pub aging: &'a AgingConfig,
    /// Accounts the pass covered; phases 2 and 3 walk these.
    pub accounts: &'a [String],
    pub main_account: Option<&'a str>,
    pub cache_ttl_minutes: i64,
    pub dry_run: bool,
    pub verbose: u8,
}

pub fn run_sweep(store: &Store, mail: &dyn MailClient, params: &SweepParams) -> AgingResult {
    let mut result = AgingResult::default();
    if !params.aging.enabled {
        return result;
    }

    relocate_stale_inbox(store, mail, params, &mut result);

    let sweep_accounts: Vec<String> = match params.main_account {
        Some(main) => vec![main.to_string()],
        None => params.accounts.to_vec(),
    };

    purge_stale_review(mail, params, &sweep_accounts, &mut result);
    purge_retention_folders(mail, params, &sweep_accounts, &mut result);

    result
}

/// Phase 1: first-seen records older than the threshold, still in the inbox.
fn relocate_stale_inbox(
    store: &Store,
    mail: &dyn MailClient,
    params: &SweepParams,
    result: &mut AgingResult,
) {
    let stale = match store.get_stale_inbox_emails(params.aging.stale_inbox_days) {
        Ok(stale) => stale,
        Err(e) => {
            eprintln!("Aging: failed to read first-seen records: {}", e);
            result.errors += 1;
            return;
        }
    };
    if stale.is_empty() {
        return;
    }

    // One review folder per target account, created on demand. A creation
    // failure is counted once and the account's messages are skipped.
    let mut review_ready: HashMap<String, bool> = HashMap::new();

    for record in stale {
        let message = match mail.fetch_message(&record.message_id) {
            Ok(Some(message)) => message,
            Ok(None) => {
                // Message is gone; tracking is no longer needed.
                let _ = store.remove_first_seen(&record.message_id);
                continue;
            }
            Err(e) => {
                if params.verbose >= 2 {
                    eprintln!("Aging: failed to fetch {}: {}", record.message_id, e);
                }
                result.errors += 1;
                continue;
            }
        };

        if !message.mailbox.eq_ignore_ascii_case("INBOX") {
            // Left the inbox by other means
            let _ = store.remove_first_seen(&record.message_id);
            continue;
        }

        let review_account = params
            .main_account
            .unwrap_or(&message.account)
            .to_string();

        let ready = *review_ready
            .entry(review_account.clone())
            .or_insert_with(|| {
                ensure_review_folder(store, mail, params, &review_account)
                    .map_err(|e| {
                        eprintln!(
                            "Aging: cannot prepare '{}' on {}: {}",
                            params.aging.review_folder, review_account, e
                        );
                    })
                    .is_ok()
            });
        if !ready {
            result.errors += 1;
            continue;
        }

        if params.dry_run {
            result.moved_to_review += 1;
            continue;
        }

        match mail.move_message(
            &message.id,
            &params.aging.review_folder,
            Some(&review_account),
            Some((&message.mailbox, &message.account)),
        ) {
            Ok(()) => {
                let _ = store.remove_first_seen(&record.message_id);
                result.moved_to_review += 1;
            }
            Err(e) if e.is_stale_reference() => {
                let _ = store.remove_first_seen(&record.message_id);
            }
            Err(e) => {
                if params.verbose >= 1 {
                    eprintln!("Aging: failed to move {}: {}", record.message_id, e);
                }
                result.errors += 1;
            }
        }
    }
}

fn ensure_review_folder(
    store: &Store,
    mail: &dyn MailClient,
    params: &SweepParams,
    account: &str,
) -> anyhow::Result<()> {
    let existing = mailbox_list(store, mail, account, params.cache_ttl_minutes)?;
    if existing
        .iter()
        .any(|name| name.eq_ignore_ascii_case(&params.aging.review_folder))
    {
        return Ok(());
    }
    if params.dry_run {
        return Ok(());
    }
    if account == LOCAL_ACCOUNT_KEY {
        mail.create_local_mailbox(&params.aging.review_folder)?;
    } else {
        mail.create_mailbox(&params.aging.review_folder, account)?;
    }
    let mut updated = existing;
    updated.push(params.aging.review_folder.clone());
    store.set_cached_mailboxes(account, &updated)?;
    Ok(())
}

/// Phase 2: review-folder messages past the purge threshold.
fn purge_stale_review(
    mail: &dyn MailClient,
    params: &SweepParams,
    accounts: &[String],
    result: &mut AgingResult,
) {
    let cutoff = Utc::now() - Duration::days(params.aging.review_purge_days as i64);
    for account in accounts {
        let messages = match mail.fetch_messages(
            &params.aging.review_folder,
            Some(account),
            REVIEW_FETCH_LIMIT,
            false,
        ) {
            Ok(messages) => messages,
            Err(e) => {
                if params.verbose >= 2 {
                    eprintln!(
                        "Aging: cannot list '{}' on {}: {}",
                        params.aging.review_folder, account, e
                    );
                }
                continue;
            }
        };
        for message in messages {
            let Some(received) = message.date_received else {
                continue;
            };
            if received >= cutoff {
                continue;
            }
            if params.dry_run {
                result.deleted_from_review += 1;
                continue;
            }
            match mail.delete_message(&message.id, Some((&message.mailbox, &message.account))) {
                Ok(()) => result.deleted_from_review += 1,
                Err(e) if e.is_stale_reference() => {}
                Err(e) => {
                    if params.verbose >= 1 {
                        eprintln!("Aging: failed to delete {}: {}", message.id, e);
                    }
                    result.errors += 1;
                }
            }
        }
    }
}

/// Phase 3: per-folder retention rules.
fn purge_retention_folders(
    mail: &dyn MailClient,
    params: &SweepParams,
    accounts: &[String],
    result: &mut AgingResult,
) {
    for rule in &params.aging.retention {
        let cutoff = Utc::now() - Duration::days(rule.days as i64);
        for account in accounts {
            let messages =
                match mail.fetch_messages(&rule.folder, Some(account), REVIEW_FETCH_LIMIT, false) {
                    Ok(messages) => messages,
                    Err(e) => {
                        if params.verbose >= 2 {
                            eprintln!("Aging: cannot list '{}' on {}: {}", rule.folder, account, e);
                        }
                        continue;
                    }
                };
            for message in messages {
                let Some(received) = message.date_received else {
                    continue;
                };
                if received >= cutoff {
                    continue;
                }
                if params.dry_run {
                    result.retention_deleted += 1;
                    continue;
                }
                match mail.delete_message(&message.id, Some((&message.mailbox, &message.account))) {
                    Ok(()) => result.retention_deleted += 1,
                    Err(e) if e.is_stale_reference() => {}
                    Err(e) => {
                        if params.verbose >= 1 {
                            eprintln!("Aging: failed to delete {}: {}", message.id, e);
                        }
                        result.errors += 1;
                    }
                }
            }
        }
    }
}

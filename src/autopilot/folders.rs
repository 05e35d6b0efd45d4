//! Folder resolver — decides, for a missing destination folder, whether to
//! proceed, create, prompt, or queue.

use anyhow::Result;
use std::io::Write;

use crate::autopilot::types::FolderPolicy;
use crate::bridge::mail::{MailClient, LOCAL_ACCOUNT_KEY};
use crate::store::Store;
use crate::util::find_similar_name;

const SIMILARITY_THRESHOLD: f64 = 0.6;

/// Outcome of resolving a destination folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderOutcome {
    /// Folder exists (or was created); the canonical name to use.
    Ready { folder: String },
    /// Policy queue: the caller writes a durable folder-pending row.
    Queue,
    /// Interactive skip.
    Skip,
}

/// Cached mailbox list for an account, refreshed from the host on miss.
pub fn mailbox_list(
    store: &Store,
    mail: &dyn MailClient,
    account: &str,
    cache_ttl_minutes: i64,
) -> Result<Vec<String>> {
    if let Some(cached) = store.get_cached_mailboxes(account, cache_ttl_minutes)? {
        return Ok(cached);
    }
    let mailboxes = if account == LOCAL_ACCOUNT_KEY {
        mail.list_local_mailboxes()?
    } else {
        mail.list_mailboxes(account)?
    };
    store.set_cached_mailboxes(account, &mailboxes)?;
    Ok(mailboxes)
}

fn create_folder(
    store: &Store,
    mail: &dyn MailClient,
    folder: &str,
    account: &str,
    mut existing: Vec<String>,
) -> Result<()> {
    if account == LOCAL_ACCOUNT_KEY {
        mail.create_local_mailbox(folder)?;
    } else {
        mail.create_mailbox(folder, account)?;
    }
    existing.push(folder.to_string());
    store.set_cached_mailboxes(account, &existing)?;
    Ok(())
}

/// Resolve `folder` on `account` under the effective policy.
///
/// Deterministic given (folder, cached list, policy), except for the
/// interactive prompt path.
pub fn resolve_folder(
    store: &Store,
    mail: &dyn MailClient,
    folder: &str,
    account: &str,
    policy: FolderPolicy,
    cache_ttl_minutes: i64,
) -> Result<FolderOutcome> {
    let existing = mailbox_list(store, mail, account, cache_ttl_minutes)?;

    // Case-insensitive existence check; keep the host's canonical casing.
    if let Some(hit) = existing
        .iter()
        .find(|name| name.eq_ignore_ascii_case(folder))
    {
        return Ok(FolderOutcome::Ready {
            folder: hit.clone(),
        });
    }

    match policy {
        FolderPolicy::AutoCreate => {
            create_folder(store, mail, folder, account, existing)?;
            println!("  Created folder '{}' on {}", folder, account);
            Ok(FolderOutcome::Ready {
                folder: folder.to_string(),
            })
        }
        FolderPolicy::Interactive => {
            let suggestion = find_similar_name(folder, &existing, SIMILARITY_THRESHOLD);
            match prompt_choice(folder, account, suggestion.as_deref())? {
                InteractiveChoice::UseExisting(name) => Ok(FolderOutcome::Ready { folder: name }),
                InteractiveChoice::Create => {
                    create_folder(store, mail, folder, account, existing)?;
                    Ok(FolderOutcome::Ready {
                        folder: folder.to_string(),
                    })
                }
                InteractiveChoice::Skip => Ok(FolderOutcome::Skip),
            }
        }
        FolderPolicy::Queue => Ok(FolderOutcome::Queue),
    }
}

enum InteractiveChoice {
    UseExisting(String),
    Create,
    Skip,
}

fn prompt_choice(
    folder: &str,
    account: &str,
    suggestion: Option<&str>,
) -> Result<InteractiveChoice> {
    println!("Folder '{}' does not exist on {}.", folder, account);
    if let Some(suggestion) = suggestion {
        print!("  [u]se '{}' / [c]reate '{}' / [s]kip? ", suggestion, folder);
    } else {
        print!("  [c]reate '{}' / [s]kip? ", folder);
    }
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    match (input.trim().to_lowercase().as_str(), suggestion) {
        ("u", Some(s)) => Ok(InteractiveChoice::UseExisting(s.to_string())),
        ("c", _) => Ok(InteractiveChoice::Create),
        _ => Ok(InteractiveChoice::Skip),
    }
}

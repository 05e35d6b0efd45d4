//! Aging/retention sweep tests.

mod common;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use common::{make_email, MockMail};
use mailpilot::autopilot::aging::{run_sweep, SweepParams};
use mailpilot::config::autopilot::{AgingConfig, RetentionRule};
use mailpilot::store::Store;

fn aging_config() -> AgingConfig {
    AgingConfig {
        enabled: true,
        stale_inbox_days: 0,
        review_folder: "Needs Review".to_string(),
        review_purge_days: 0,
        retention: vec![],
    }
}

fn params<'a>(aging: &'a AgingConfig, accounts: &'a [String]) -> SweepParams<'a> {
    SweepParams {
        aging,
        accounts,
        main_account: None,
        cache_ttl_minutes: 60,
        dry_run: false,
        verbose: 0,
    }
}

#[test]
fn test_disabled_sweep_does_nothing() {
    let store = Store::in_memory().unwrap();
    let mail = MockMail::new();
    let mut aging = aging_config();
    aging.enabled = false;
    let accounts = vec!["Work".to_string()];

    store.track_first_seen("1", "INBOX", "Work").unwrap();
    let result = run_sweep(&store, &mail, &params(&aging, &accounts));
    assert_eq!(result.moved_to_review, 0);
    assert!(mail.moved.borrow().is_empty());
}

#[test]
fn test_stale_inbox_message_moves_to_review() {
    let store = Store::in_memory().unwrap();
    let mail = MockMail::new();
    let aging = aging_config();
    let accounts = vec!["Work".to_string()];

    mail.serve(make_email("1", "x@y.z", "Forgotten"));
    store.track_first_seen("1", "INBOX", "Work").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(1100));

    let result = run_sweep(&store, &mail, &params(&aging, &accounts));

    assert_eq!(result.moved_to_review, 1);
    assert_eq!(result.errors, 0);
    // Review folder created on demand (not in the default mock set)
    assert!(mail
        .created_folders
        .borrow()
        .contains(&("Needs Review".to_string(), "Work".to_string())));
    assert_eq!(
        mail.moved.borrow().as_slice(),
        &[(
            "1".to_string(),
            "Needs Review".to_string(),
            Some("Work".to_string())
        )]
    );
    // First-seen tracking removed after the move
    std::thread::sleep(std::time::Duration::from_millis(1100));
    assert!(store.get_stale_inbox_emails(0).unwrap().is_empty());
}

#[test]
fn test_message_that_left_inbox_is_untracked_not_moved() {
    let store = Store::in_memory().unwrap();
    let mail = MockMail::new();
    let aging = aging_config();
    let accounts = vec!["Work".to_string()];

    let mut email = make_email("2", "x@y.z", "Filed already");
    email.mailbox = "Receipts".to_string();
    mail.serve(email);
    store.track_first_seen("2", "INBOX", "Work").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(1100));

    let result = run_sweep(&store, &mail, &params(&aging, &accounts));

    assert_eq!(result.moved_to_review, 0);
    assert!(mail.moved.borrow().is_empty());
    std::thread::sleep(std::time::Duration::from_millis(1100));
    assert!(store.get_stale_inbox_emails(0).unwrap().is_empty());
}

#[test]
fn test_vanished_message_does_not_abort_sweep() {
    let store = Store::in_memory().unwrap();
    let mail = MockMail::new();
    let aging = aging_config();
    let accounts = vec!["Work".to_string()];

    // "ghost" has no host message; "3" is a real stale inbox message
    store.track_first_seen("ghost", "INBOX", "Work").unwrap();
    mail.serve(make_email("3", "x@y.z", "Still here"));
    store.track_first_seen("3", "INBOX", "Work").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(1100));

    let result = run_sweep(&store, &mail, &params(&aging, &accounts));

    assert_eq!(result.moved_to_review, 1);
    assert_eq!(result.errors, 0);
}

#[test]
fn test_stale_review_purge() {
    let store = Store::in_memory().unwrap();
    let mail = MockMail::new();
    let aging = aging_config();
    let accounts = vec!["Work".to_string()];

    let mut old = make_email("4", "x@y.z", "Reviewed never");
    old.mailbox = "Needs Review".to_string();
    old.date_received = Some(Utc::now() - Duration::days(3));
    mail.serve(old);

    let mut fresh = make_email("5", "x@y.z", "Just arrived");
    fresh.mailbox = "Needs Review".to_string();
    fresh.date_received = Some(Utc::now() + Duration::hours(1));
    mail.serve(fresh);

    let result = run_sweep(&store, &mail, &params(&aging, &accounts));

    assert_eq!(result.deleted_from_review, 1);
    assert_eq!(mail.deleted.borrow().as_slice(), &["4".to_string()]);
}

#[test]
fn test_retention_rules_per_folder() {
    let store = Store::in_memory().unwrap();
    let mail = MockMail::new();
    let mut aging = aging_config();
    aging.retention = vec![RetentionRule {
        folder: "Newsletters".to_string(),
        days: 30,
    }];
    let accounts = vec!["Work".to_string()];

    let mut old = make_email("6", "news@x.com", "Old digest");
    old.mailbox = "Newsletters".to_string();
    old.date_received = Some(Utc::now() - Duration::days(45));
    mail.serve(old);

    let mut recent = make_email("7", "news@x.com", "Recent digest");
    recent.mailbox = "Newsletters".to_string();
    recent.date_received = Some(Utc::now() - Duration::days(5));
    mail.serve(recent);

    let result = run_sweep(&store, &mail, &params(&aging, &accounts));

    assert_eq!(result.retention_deleted, 1);
    assert_eq!(mail.deleted.borrow().as_slice(), &["6".to_string()]);
}

#[test]
fn test_dry_run_counts_without_mutating() {
    let store = Store::in_memory().unwrap();
    let mail = MockMail::new();
    let aging = aging_config();
    let accounts = vec!["Work".to_string()];

    mail.serve(make_email("8", "x@y.z", "Would move"));
    store.track_first_seen("8", "INBOX", "Work").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(1100));

    let mut p = params(&aging, &accounts);
    p.dry_run = true;
    let result = run_sweep(&store, &mail, &p);

    assert_eq!(result.moved_to_review, 1);
    assert!(mail.moved.borrow().is_empty());
    assert!(mail.created_folders.borrow().is_empty());
}

//! Store contract tests: ledger, pending queues, counters, first-seen,
//! cache, watcher state, audit log.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;

use mailpilot::autopilot::types::{ActionSpec, Decision};
use mailpilot::store::Store;

fn decision(folder: &str) -> Decision {
    Decision::new(
        ActionSpec::Move {
            folder: folder.to_string(),
            account: None,
        },
        0.8,
        "because",
    )
    .unwrap()
}

#[test]
fn test_ledger_last_write_wins() {
    let store = Store::in_memory().unwrap();
    store
        .mark_processed("m1", "INBOX", "Work", "s", "x@y.z", &json!({"action": "ignore"}), 0.9)
        .unwrap();
    store
        .mark_processed("m1", "INBOX", "Work", "s", "x@y.z", &json!({"action": "move"}), 0.7)
        .unwrap();

    assert!(store.is_processed("m1").unwrap());
    assert_eq!(store.processed_count().unwrap(), 1);
}

#[test]
fn test_processed_ids_window() {
    let store = Store::in_memory().unwrap();
    for i in 0..5 {
        store
            .mark_processed(
                &format!("m{i}"),
                "INBOX",
                "Work",
                "s",
                "x@y.z",
                &json!({"action": "ignore"}),
                0.9,
            )
            .unwrap();
    }
    let ids = store.get_processed_ids(3).unwrap();
    assert_eq!(ids.len(), 3);
    let all = store.get_processed_ids(100).unwrap();
    assert_eq!(all.len(), 5);
}

#[test]
fn test_failure_counters_monotonic_until_reset() {
    let store = Store::in_memory().unwrap();

    assert_eq!(store.get_rule_failures("m", "ai_classification").unwrap(), 0);
    for expected in 1..=3u32 {
        let count = store
            .increment_rule_failure("m", "ai_classification", "boom")
            .unwrap();
        assert_eq!(count, expected);
    }

    // Another stage for the same message is independent
    assert_eq!(store.get_rule_failures("m", "content_loading").unwrap(), 0);

    store.clear_rule_failures("m", "ai_classification").unwrap();
    assert_eq!(store.get_rule_failures("m", "ai_classification").unwrap(), 0);

    // Counting restarts from one
    let count = store
        .increment_rule_failure("m", "ai_classification", "boom")
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn test_clear_all_failures_for_message() {
    let store = Store::in_memory().unwrap();
    store.increment_rule_failure("m", "a", "x").unwrap();
    store.increment_rule_failure("m", "b", "x").unwrap();
    store.increment_rule_failure("other", "a", "x").unwrap();

    store.clear_all_failures_for("m").unwrap();
    assert_eq!(store.get_rule_failures("m", "a").unwrap(), 0);
    assert_eq!(store.get_rule_failures("m", "b").unwrap(), 0);
    assert_eq!(store.get_rule_failures("other", "a").unwrap(), 1);
}

#[test]
fn test_one_outstanding_pending_row_per_message() {
    let store = Store::in_memory().unwrap();

    store
        .add_pending_action("m1", "x: s", &decision("A"), "r1")
        .unwrap();
    assert_eq!(store.pending_count().unwrap(), 1);

    // A folder-pending row replaces the plain pending row
    store
        .add_pending_folder_action("m1", "x: s", &decision("B"), "r2", "B", "Work")
        .unwrap();
    assert_eq!(store.pending_count().unwrap(), 1);

    let folders = store.get_pending_folders(None).unwrap();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].folder, "B");

    // And the other way around
    store
        .add_pending_action("m1", "x: s", &decision("C"), "r3")
        .unwrap();
    assert_eq!(store.pending_count().unwrap(), 1);
    assert!(store.get_pending_folders(None).unwrap().is_empty());
}

#[test]
fn test_pending_row_roundtrips_decision() {
    let store = Store::in_memory().unwrap();
    let original = decision("Receipts");
    let id = store
        .add_pending_action("m1", "x: s", &original, "why")
        .unwrap();

    let row = store.get_pending_action(id).unwrap().unwrap();
    assert_eq!(row.decision, original);
    assert_eq!(row.status, "pending");
    assert_eq!(row.message_id, "m1");

    assert!(store.update_pending_status(id, "approved").unwrap());
    let row = store.get_pending_action(id).unwrap().unwrap();
    assert_eq!(row.status, "approved");
    assert_eq!(store.pending_count().unwrap(), 0);
}

#[test]
fn test_actions_for_folder_and_removal() {
    let store = Store::in_memory().unwrap();
    store
        .add_pending_folder_action("m1", "a: s", &decision("X"), "r", "X", "Work")
        .unwrap();
    store
        .add_pending_folder_action("m2", "b: s", &decision("X"), "r", "X", "Work")
        .unwrap();
    store
        .add_pending_folder_action("m3", "c: s", &decision("Y"), "r", "Y", "Home")
        .unwrap();

    let rows = store.get_actions_for_folder("X", "Work").unwrap();
    assert_eq!(rows.len(), 2);

    let folders = store.get_pending_folders(Some("Work")).unwrap();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].message_count, 2);

    assert!(store.remove_pending_action(rows[0].id).unwrap());
    assert_eq!(store.get_actions_for_folder("X", "Work").unwrap().len(), 1);
}

#[test]
fn test_first_seen_tracking() {
    let store = Store::in_memory().unwrap();
    store.track_first_seen("m1", "INBOX", "Work").unwrap();

    // Nothing is stale yet with a generous threshold
    assert!(store.get_stale_inbox_emails(30).unwrap().is_empty());

    // if-new keeps the original timestamp, replace refreshes it
    store.track_first_seen_if_new("m1", "INBOX", "Work").unwrap();

    store.remove_first_seen("m1").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(1100));
    store.track_first_seen("m1", "INBOX", "Work").unwrap();
    // Re-inserted after removal: a fresh timestamp, so still not stale
    assert!(store.get_stale_inbox_emails(30).unwrap().is_empty());
}

#[test]
fn test_stale_inbox_query_with_zero_threshold() {
    let store = Store::in_memory().unwrap();
    store.track_first_seen("m1", "INBOX", "Work").unwrap();
    // With the second-granularity timestamps, anything written in a prior
    // second is older than a zero-day cutoff
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let stale = store.get_stale_inbox_emails(0).unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].message_id, "m1");
    assert_eq!(stale[0].account, "Work");
}

#[test]
fn test_mailbox_cache_ttl() {
    let store = Store::in_memory().unwrap();
    let boxes = vec!["INBOX".to_string(), "Archive".to_string()];
    store.set_cached_mailboxes("Work", &boxes).unwrap();

    assert_eq!(store.get_cached_mailboxes("Work", 60).unwrap(), Some(boxes));
    assert_eq!(store.get_cached_mailboxes("Other", 60).unwrap(), None);

    std::thread::sleep(std::time::Duration::from_millis(1100));
    // TTL of zero minutes: the entry written in a prior second has expired
    assert_eq!(store.get_cached_mailboxes("Work", 0).unwrap(), None);

    assert_eq!(store.clear_mailbox_cache(None).unwrap(), 1);
}

#[test]
fn test_watcher_state_roundtrip() {
    let store = Store::in_memory().unwrap();
    assert_eq!(store.get_watcher_state("watcher_pid").unwrap(), None);

    store.set_watcher_state("watcher_pid", "1234").unwrap();
    store.set_watcher_state("watcher_pid", "5678").unwrap();
    assert_eq!(
        store.get_watcher_state("watcher_pid").unwrap().as_deref(),
        Some("5678")
    );

    store.clear_watcher_state().unwrap();
    assert_eq!(store.get_watcher_state("watcher_pid").unwrap(), None);
}

#[test]
fn test_audit_log_and_stats() {
    let store = Store::in_memory().unwrap();
    store
        .log_action("m1", "move", "autopilot", Some(&json!({"folder": "X"})))
        .unwrap();
    store.log_action("m2", "delete", "autopilot", None).unwrap();

    let entries = store.get_audit_log(10).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|e| e.action == "move"
        && e.details.as_ref().map(|d| d["folder"] == "X").unwrap_or(false)));

    let stats = store.get_stats().unwrap();
    assert_eq!(stats.actions_7d.len(), 2);
}

#[test]
fn test_pim_links() {
    let store = Store::in_memory().unwrap();
    assert!(!store.has_pim_link("m1", "reminder").unwrap());

    store.add_pim_link("m1", "reminder").unwrap();
    assert!(store.has_pim_link("m1", "reminder").unwrap());
    assert!(!store.has_pim_link("m1", "event").unwrap());

    // Idempotent
    store.add_pim_link("m1", "reminder").unwrap();
    assert!(store.has_pim_link("m1", "reminder").unwrap());
}

#[test]
fn test_cleanup_old_records() {
    let store = Store::in_memory().unwrap();
    store
        .mark_processed("old", "INBOX", "Work", "s", "x", &json!({"action": "ignore"}), 0.9)
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(1100));

    // Zero-day retention removes anything from a prior second
    let removed = store.cleanup_old_records(0).unwrap();
    assert_eq!(removed, 1);
    assert!(!store.is_processed("old").unwrap());

    // Generous retention keeps fresh rows
    store
        .mark_processed("new", "INBOX", "Work", "s", "x", &json!({"action": "ignore"}), 0.9)
        .unwrap();
    assert_eq!(store.cleanup_old_records(30).unwrap(), 0);
    assert!(store.is_processed("new").unwrap());
}

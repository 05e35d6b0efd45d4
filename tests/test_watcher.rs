//! Watcher single-instance enforcement tests. Trigger decisions are covered
//! by unit tests next to `decide_trigger`.

mod common;

use mailpilot::autopilot::watcher::{check_stale_watcher, STATE_WATCHER_PID};
use mailpilot::store::Store;

#[test]
fn test_no_recorded_owner_is_fine() {
    let store = Store::in_memory().unwrap();
    assert!(check_stale_watcher(&store).is_ok());
}

#[test]
fn test_own_pid_is_fine() {
    let store = Store::in_memory().unwrap();
    store
        .set_watcher_state(STATE_WATCHER_PID, &std::process::id().to_string())
        .unwrap();
    assert!(check_stale_watcher(&store).is_ok());
}

#[test]
fn test_dead_pid_is_reclaimed() {
    let store = Store::in_memory().unwrap();
    // A pid at the top of the valid range is effectively never live
    store
        .set_watcher_state(STATE_WATCHER_PID, "2000000000")
        .unwrap();
    assert!(check_stale_watcher(&store).is_ok());
}

#[test]
fn test_garbage_pid_is_reclaimed() {
    let store = Store::in_memory().unwrap();
    store
        .set_watcher_state(STATE_WATCHER_PID, "not-a-pid")
        .unwrap();
    assert!(check_stale_watcher(&store).is_ok());
}

#[test]
fn test_live_foreign_pid_refuses() {
    let store = Store::in_memory().unwrap();
    // pid 1 always exists
    store.set_watcher_state(STATE_WATCHER_PID, "1").unwrap();
    let err = check_stale_watcher(&store).unwrap_err();
    assert!(err.to_string().contains("Another watcher"));
}

//! Scripting-bridge adapters for the host applications.
//!
//! Everything above this layer sees only the adapter traits and the small
//! error vocabulary below, never the scripting mechanism itself.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use thiserror::Error;

pub mod calendar;
pub mod mail;
pub mod reminders;

pub use calendar::{CalendarClient, EventDraft, OsaCalendarClient};
pub use mail::{MailClient, OsaMailClient};
pub use reminders::{OsaReminderClient, ReminderClient, ReminderDraft};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{0} is not running")]
    NotRunning(String),

    #[error("script timed out after {0}s")]
    Timeout(u64),

    #[error("stale message reference: {0}")]
    StaleReference(String),

    #[error("script failed: {0}")]
    Script(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Stale references mean the message already left its mailbox; callers
    /// recover these as success rather than retrying forever.
    pub fn is_stale_reference(&self) -> bool {
        matches!(self, BridgeError::StaleReference(_))
    }
}

/// Patterns in osascript stderr that mean the referenced message is gone.
const STALE_SIGNATURES: &[&str] = &[
    "invalid index",
    "-1719",
    "can't get message",
    "doesn't understand",
];

/// Patterns that mean the target application is not running.
const NOT_RUNNING_SIGNATURES: &[&str] = &["isn't running", "-600", "not running"];

/// Classify an osascript failure into the adapter error vocabulary.
pub fn classify_script_error(app: &str, stderr: &str) -> BridgeError {
    let lower = stderr.to_lowercase();
    if NOT_RUNNING_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return BridgeError::NotRunning(app.to_string());
    }
    if STALE_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return BridgeError::StaleReference(stderr.trim().to_string());
    }
    BridgeError::Script(stderr.trim().to_string())
}

/// Escape a string for inclusion in a double-quoted AppleScript literal.
pub fn escape_script_string(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Run an osascript snippet, returning trimmed stdout.
///
/// The child is killed if it exceeds `timeout_secs`; the host apps are known
/// to wedge on large mailboxes.
pub fn run_osascript(app: &str, script: &str, timeout_secs: u64) -> Result<String, BridgeError> {
    let mut child = Command::new("osascript")
        .arg("-e")
        .arg(script)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdout = child.stdout.take().expect("stdout piped");
    let mut stderr = child.stderr.take().expect("stderr piped");

    let (tx, rx) = mpsc::channel();
    let reader = std::thread::spawn(move || {
        let mut out = String::new();
        let mut err = String::new();
        let _ = stdout.read_to_string(&mut out);
        let _ = stderr.read_to_string(&mut err);
        let _ = tx.send((out, err));
    });

    let (out, err) = match rx.recv_timeout(Duration::from_secs(timeout_secs)) {
        Ok(streams) => streams,
        Err(_) => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = reader.join();
            return Err(BridgeError::Timeout(timeout_secs));
        }
    };
    let status = child.wait()?;
    let _ = reader.join();

    if !status.success() {
        return Err(classify_script_error(app, &err));
    }
    Ok(out.trim_end_matches('\n').to_string())
}

/// Desktop notification (best-effort).
pub fn notify(title: &str, body: &str) {
    #[cfg(target_os = "macos")]
    {
        let _ = Command::new("osascript")
            .arg("-e")
            .arg(format!(
                "display notification \"{}\" with title \"{}\"",
                escape_script_string(body),
                escape_script_string(title)
            ))
            .output();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = Command::new("notify-send").arg(title).arg(body).output();
    }
}

//! Reminders adapter: reminder creation and the open-reminders snapshot.

use chrono::{DateTime, Utc};

use super::{escape_script_string, run_osascript, BridgeError};

const APP: &str = "Reminders";
const RECORD_SEP: &str = "\x1e";

/// A reminder to create, already validated by the decision model.
#[derive(Debug, Clone)]
pub struct ReminderDraft {
    pub title: String,
    pub due: Option<DateTime<Utc>>,
    pub list: Option<String>,
    pub notes: Option<String>,
}

pub trait ReminderClient {
    fn list_lists(&self) -> Result<Vec<String>, BridgeError>;
    fn create_reminder(&self, draft: &ReminderDraft) -> Result<(), BridgeError>;
    fn complete_reminder(&self, title: &str) -> Result<(), BridgeError>;
    /// Titles of incomplete reminders, for situational context.
    fn open_reminders(&self) -> Result<Vec<String>, BridgeError>;
}

pub struct OsaReminderClient {
    timeout_secs: u64,
}

impl OsaReminderClient {
    pub fn new() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl Default for OsaReminderClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReminderClient for OsaReminderClient {
    fn list_lists(&self) -> Result<Vec<String>, BridgeError> {
        let script = r#"
        tell application "Reminders"
            set output to ""
            set RS to (ASCII character 30)
            repeat with lst in lists
                if output is not "" then set output to output & RS
                set output to output & name of lst
            end repeat
            return output
        end tell
        "#;
        let result = run_osascript(APP, script, self.timeout_secs)?;
        if result.is_empty() {
            return Ok(vec![]);
        }
        Ok(result.split(RECORD_SEP).map(str::to_string).collect())
    }

    fn create_reminder(&self, draft: &ReminderDraft) -> Result<(), BridgeError> {
        let list = draft.list.as_deref().unwrap_or("Reminders");
        let mut props = format!("name:\"{}\"", escape_script_string(&draft.title));
        if let Some(due) = &draft.due {
            props.push_str(&format!(
                ", due date:date \"{}\"",
                due.format("%B %-d, %Y %I:%M:%S %p")
            ));
        }
        if let Some(notes) = &draft.notes {
            props.push_str(&format!(", body:\"{}\"", escape_script_string(notes)));
        }
        let script = format!(
            r#"
        tell application "Reminders"
            tell list "{}"
                make new reminder with properties {{{}}}
            end tell
        end tell
        "#,
            escape_script_string(list),
            props,
        );
        run_osascript(APP, &script, self.timeout_secs)?;
        Ok(())
    }

    fn complete_reminder(&self, title: &str) -> Result<(), BridgeError> {
        let script = format!(
            r#"
        tell application "Reminders"
            set rem to first reminder whose name is "{}" and completed is false
            set completed of rem to true
        end tell
        "#,
            escape_script_string(title)
        );
        run_osascript(APP, &script, self.timeout_secs)?;
        Ok(())
    }

    fn open_reminders(&self) -> Result<Vec<String>, BridgeError> {
        let script = r#"
        tell application "Reminders"
            set output to ""
            set RS to (ASCII character 30)
            repeat with rem in (reminders whose completed is false)
                if output is not "" then set output to output & RS
                set output to output & name of rem
            end repeat
            return output
        end tell
        "#;
        let result = run_osascript(APP, script, self.timeout_secs)?;
        if result.is_empty() {
            return Ok(vec![]);
        }
        Ok(result.split(RECORD_SEP).map(str::to_string).collect())
    }
}

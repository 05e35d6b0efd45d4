//! Calendar adapter: event creation and the upcoming-events snapshot.

use chrono::{DateTime, Utc};

use super::{escape_script_string, run_osascript, BridgeError};

const APP: &str = "Calendar";
const RECORD_SEP: &str = "\x1e";

/// An event to create, already validated by the decision model.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub calendar: Option<String>,
    pub all_day: bool,
}

pub trait CalendarClient {
    fn list_calendars(&self) -> Result<Vec<String>, BridgeError>;
    fn create_event(&self, draft: &EventDraft) -> Result<(), BridgeError>;
    /// Summaries of events in the next `days` days, for situational context.
    fn upcoming_events(&self, days: u32) -> Result<Vec<String>, BridgeError>;
}

pub struct OsaCalendarClient {
    timeout_secs: u64,
}

impl OsaCalendarClient {
    pub fn new() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl Default for OsaCalendarClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a date as an AppleScript `date "..."` constructor argument.
fn script_date(dt: &DateTime<Utc>) -> String {
    dt.format("%B %-d, %Y %I:%M:%S %p").to_string()
}

impl CalendarClient for OsaCalendarClient {
    fn list_calendars(&self) -> Result<Vec<String>, BridgeError> {
        let script = r#"
        tell application "Calendar"
            set output to ""
            set RS to (ASCII character 30)
            repeat with cal in calendars
                if output is not "" then set output to output & RS
                set output to output & name of cal
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

    fn create_event(&self, draft: &EventDraft) -> Result<(), BridgeError> {
        let calendar = draft.calendar.as_deref().unwrap_or("Calendar");
        let end = draft
            .end
            .unwrap_or_else(|| draft.start + chrono::Duration::hours(1));
        let all_day = if draft.all_day {
            ", allday event:true"
        } else {
            ""
        };
        let script = format!(
            r#"
        tell application "Calendar"
            tell calendar "{}"
                make new event with properties {{summary:"{}", start date:date "{}", end date:date "{}"{}}}
            end tell
        end tell
        "#,
            escape_script_string(calendar),
            escape_script_string(&draft.summary),
            script_date(&draft.start),
            script_date(&end),
            all_day,
        );
        run_osascript(APP, &script, self.timeout_secs)?;
        Ok(())
    }

    fn upcoming_events(&self, days: u32) -> Result<Vec<String>, BridgeError> {
        let script = format!(
            r#"
        tell application "Calendar"
            set output to ""
            set RS to (ASCII character 30)
            set nowDate to current date
            set endDate to nowDate + ({days} * days)
            repeat with cal in calendars
                repeat with ev in (events of cal whose start date >= nowDate and start date <= endDate)
                    if output is not "" then set output to output & RS
                    set output to output & (summary of ev) & " (" & (start date of ev as string) & ")"
                end repeat
            end repeat
            return output
        end tell
        "#
        );
        let result = run_osascript(APP, &script, self.timeout_secs)?;
        if result.is_empty() {
            return Ok(vec![]);
        }
        Ok(result.split(RECORD_SEP).map(str::to_string).collect())
    }
}

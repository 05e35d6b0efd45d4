//! Best-effort situational context from the calendar and reminders apps.
//!
//! Lookup failures are swallowed: the snapshot is advisory, never required.

use crate::bridge::{CalendarClient, ReminderClient};

const UPCOMING_DAYS: u32 = 7;
const MAX_ITEMS: usize = 10;

/// Assemble a short context block for classification prompts, or None if
/// nothing is available.
pub fn situational_context(
    calendar: &dyn CalendarClient,
    reminders: &dyn ReminderClient,
) -> Option<String> {
    let mut sections = Vec::new();

    if let Ok(events) = calendar.upcoming_events(UPCOMING_DAYS) {
        if !events.is_empty() {
            let lines: Vec<&str> = events.iter().take(MAX_ITEMS).map(String::as_str).collect();
            sections.push(format!("Upcoming events:\n- {}", lines.join("\n- ")));
        }
    }

    if let Ok(open) = reminders.open_reminders() {
        if !open.is_empty() {
            let lines: Vec<&str> = open.iter().take(MAX_ITEMS).map(String::as_str).collect();
            sections.push(format!("Open reminders:\n- {}", lines.join("\n- ")));
        }
    }

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

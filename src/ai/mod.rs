//! AI provider interface and decision parsing.
//!
//! Providers return free text that should contain one JSON object in the
//! flat wire shape below; `decision_from_text` turns it into a validated
//! `Decision` or a malformed-response error the pipeline can retry.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::autopilot::types::{ActionSpec, Decision, SecondaryAction};
use crate::bridge::mail::EmailMessage;
use crate::config::settings::Settings;
use crate::util::truncate;

pub mod claude;
pub mod ollama;
pub mod openai;

pub use claude::ClaudeProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("rate limited")]
    RateLimited,

    #[error("http error: {0}")]
    Http(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Map a ureq failure onto the provider error vocabulary.
pub(crate) fn map_http_error(err: ureq::Error) -> AiError {
    match err {
        ureq::Error::Status(401 | 403, _) => AiError::AuthFailed,
        ureq::Error::Status(429, _) => AiError::RateLimited,
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            AiError::Http(format!("status {}: {}", code, truncate(&body, 200)))
        }
        ureq::Error::Transport(t) => AiError::Http(t.to_string()),
    }
}

/// Abstract AI provider.
pub trait AiProvider {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Classify using natural-language handling instructions (autopilot).
    fn autopilot_classify(
        &self,
        email: &EmailMessage,
        instructions: &str,
    ) -> Result<Decision, AiError>;

    /// Classify with optional free-form context (manual classification).
    fn classify(&self, email: &EmailMessage, context: Option<&str>) -> Result<Decision, AiError>;

    /// Generate reply text from a template and optional context.
    fn generate_reply(
        &self,
        email: &EmailMessage,
        template: &str,
        context: Option<&str>,
    ) -> Result<String, AiError>;
}

/// Build the provider named in settings (or the CLI override).
pub fn build_provider(
    settings: &Settings,
    override_name: Option<&str>,
) -> anyhow::Result<Box<dyn AiProvider>> {
    let name = override_name.unwrap_or(&settings.ai_provider);
    match name {
        "claude" => {
            let key = non_empty(&settings.anthropic_api_key)
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                .unwrap_or_default();
            Ok(Box::new(ClaudeProvider::new(key, settings.claude_model.clone())))
        }
        "openai" => {
            let key = non_empty(&settings.openai_api_key)
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .unwrap_or_default();
            Ok(Box::new(OpenAiProvider::new(key, settings.openai_model.clone())))
        }
        "ollama" => Ok(Box::new(OllamaProvider::new(
            settings.ollama_host.clone(),
            settings.ollama_model.clone(),
        ))),
        other => anyhow::bail!("unknown AI provider: {other} (expected claude/openai/ollama)"),
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// The flat JSON shape providers are asked to produce.
pub(crate) const DECISION_SCHEMA: &str = r#"Respond with exactly one JSON object:
{
  "action": "move|delete|archive|mark_read|mark_unread|flag|unflag|reply|forward|create_reminder|create_event|ignore",
  "confidence": 0.0-1.0,
  "reasoning": "one sentence",
  "category": "optional label",
  "target_folder": "for move",
  "target_account": "optional, for cross-account moves",
  "reply_content": "for reply",
  "forward_to": ["addresses", "for forward"],
  "reminder_name": "for create_reminder",
  "reminder_due": "ISO datetime, optional",
  "reminder_list": "optional",
  "event_summary": "for create_event",
  "event_start": "ISO datetime, for create_event",
  "event_end": "ISO datetime, optional",
  "event_calendar": "optional",
  "event_all_day": false,
  "secondary_action": "optional: move|archive|mark_read|mark_unread|flag|unflag",
  "secondary_folder": "for secondary move"
}"#;

/// Render an email for the classification prompt.
pub(crate) fn format_email(email: &EmailMessage) -> String {
    let body = email.content.as_deref().unwrap_or("(body not loaded)");
    format!(
        "From: {}\nTo: {}\nSubject: {}\nDate: {}\nMailbox: {} ({})\n\n{}",
        email.sender,
        email.recipients.join(", "),
        email.subject,
        email
            .date_received
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string()),
        email.mailbox,
        email.account,
        truncate(body, 2000),
    )
}

/// Pull the first JSON object out of a model response, tolerating prose
/// and code fences around it.
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "null")
        .map(str::to_string)
}

fn date_field(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    let raw = str_field(value, key)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        let naive = date.and_hms_opt(9, 0, 0)?;
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}

/// Parse a provider response into a validated Decision.
pub fn decision_from_text(text: &str) -> Result<Decision, AiError> {
    let value = extract_json(text)
        .ok_or_else(|| AiError::MalformedResponse(format!("no JSON object in: {}", truncate(text, 120))))?;
    decision_from_value(&value)
}

pub fn decision_from_value(value: &Value) -> Result<Decision, AiError> {
    let action_name = str_field(value, "action")
        .ok_or_else(|| AiError::MalformedResponse("missing action".to_string()))?;
    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| AiError::MalformedResponse("missing confidence".to_string()))?;
    let reasoning = str_field(value, "reasoning").unwrap_or_default();

    let action = match action_name.as_str() {
        "move" => ActionSpec::Move {
            folder: str_field(value, "target_folder")
                .ok_or_else(|| AiError::MalformedResponse("move without target_folder".to_string()))?,
            account: str_field(value, "target_account"),
        },
        "delete" => ActionSpec::Delete,
        "archive" => ActionSpec::Archive,
        "mark_read" => ActionSpec::MarkRead,
        "mark_unread" => ActionSpec::MarkUnread,
        "flag" => ActionSpec::Flag,
        "unflag" => ActionSpec::Unflag,
        "reply" => ActionSpec::Reply {
            body: str_field(value, "reply_content")
                .ok_or_else(|| AiError::MalformedResponse("reply without reply_content".to_string()))?,
        },
        "forward" => {
            let to: Vec<String> = value
                .get("forward_to")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            ActionSpec::Forward { to }
        }
        "create_reminder" => ActionSpec::CreateReminder {
            title: str_field(value, "reminder_name").ok_or_else(|| {
                AiError::MalformedResponse("create_reminder without reminder_name".to_string())
            })?,
            due: date_field(value, "reminder_due"),
            list: str_field(value, "reminder_list"),
        },
        "create_event" => ActionSpec::CreateEvent {
            summary: str_field(value, "event_summary").ok_or_else(|| {
                AiError::MalformedResponse("create_event without event_summary".to_string())
            })?,
            start: date_field(value, "event_start").ok_or_else(|| {
                AiError::MalformedResponse("create_event without parseable event_start".to_string())
            })?,
            end: date_field(value, "event_end"),
            calendar: str_field(value, "event_calendar"),
            all_day: value
                .get("event_all_day")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        },
        "ignore" => ActionSpec::Ignore,
        other => {
            return Err(AiError::MalformedResponse(format!("unknown action: {other}")));
        }
    };

    let mut decision = Decision::new(action, confidence, reasoning)
        .map_err(|e| AiError::MalformedResponse(e.to_string()))?;

    if let Some(category) = str_field(value, "category") {
        decision = decision.with_category(category);
    }

    // Secondary actions outside the allowed set are dropped, not errors.
    if let Some(secondary_name) = str_field(value, "secondary_action") {
        let secondary = match secondary_name.as_str() {
            "move" => str_field(value, "secondary_folder")
                .map(|folder| SecondaryAction::Move { folder }),
            "archive" => Some(SecondaryAction::Archive),
            "mark_read" => Some(SecondaryAction::MarkRead),
            "mark_unread" => Some(SecondaryAction::MarkUnread),
            "flag" => Some(SecondaryAction::Flag),
            "unflag" => Some(SecondaryAction::Unflag),
            _ => None,
        };
        if let Some(secondary) = secondary {
            decision = decision
                .with_secondary(secondary)
                .map_err(|e| AiError::MalformedResponse(e.to_string()))?;
        }
    }

    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autopilot::types::ActionSpec;

    #[test]
    fn test_extract_json_from_fenced_response() {
        let text = "Here you go:\n```json\n{\"action\": \"ignore\", \"confidence\": 0.9, \"reasoning\": \"x\"}\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value["action"], "ignore");
    }

    #[test]
    fn test_decision_from_text_move() {
        let text = r#"{"action":"move","confidence":0.85,"reasoning":"ci noise","target_folder":"GitHub","secondary_action":"mark_read"}"#;
        let decision = decision_from_text(text).unwrap();
        assert_eq!(decision.target_folder(), Some("GitHub"));
        assert_eq!(decision.confidence, 0.85);
        assert_eq!(
            decision.secondary,
            Some(SecondaryAction::MarkRead)
        );
    }

    #[test]
    fn test_decision_from_text_move_without_folder_is_malformed() {
        let text = r#"{"action":"move","confidence":0.85,"reasoning":"x"}"#;
        assert!(matches!(
            decision_from_text(text),
            Err(AiError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_decision_from_text_no_json() {
        assert!(matches!(
            decision_from_text("I think you should archive it."),
            Err(AiError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_disallowed_secondary_dropped() {
        let text = r#"{"action":"ignore","confidence":0.9,"reasoning":"x","secondary_action":"delete"}"#;
        let decision = decision_from_text(text).unwrap();
        assert!(decision.secondary.is_none());
    }

    #[test]
    fn test_create_event_requires_start() {
        let text = r#"{"action":"create_event","confidence":0.9,"reasoning":"x","event_summary":"Standup"}"#;
        assert!(decision_from_text(text).is_err());

        let ok = r#"{"action":"create_event","confidence":0.9,"reasoning":"x","event_summary":"Standup","event_start":"2026-03-01T10:00:00Z"}"#;
        let decision = decision_from_text(ok).unwrap();
        assert!(matches!(decision.action, ActionSpec::CreateEvent { .. }));
    }

    #[test]
    fn test_date_field_formats() {
        let v: Value =
            serde_json::json!({"d1": "2026-03-01T10:00:00Z", "d2": "2026-03-01 10:00", "d3": "2026-03-01"});
        assert!(date_field(&v, "d1").is_some());
        assert!(date_field(&v, "d2").is_some());
        assert!(date_field(&v, "d3").is_some());
        assert!(date_field(&v, "missing").is_none());
    }
}

//! Autopilot data types: decisions, policies, per-message and per-run results.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Policy for decisions below the confidence threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LowConfidenceAction {
    FlagForReview,
    Skip,
    #[default]
    QueueForApproval,
}

/// Policy for outbound actions (reply/forward).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutboundPolicy {
    RequireApproval,
    #[default]
    AllowHighConfidence,
    FullAutopilot,
}

/// Per-account policy for missing destination folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FolderPolicy {
    AutoCreate,
    Interactive,
    /// Never silently create structure.
    #[default]
    Queue,
}

impl std::str::FromStr for FolderPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto_create" => Ok(FolderPolicy::AutoCreate),
            "interactive" => Ok(FolderPolicy::Interactive),
            "queue" => Ok(FolderPolicy::Queue),
            other => bail!("unknown folder policy: {other} (expected auto_create/interactive/queue)"),
        }
    }
}

/// The action a decision prescribes, with its action-specific payload.
///
/// Payloads live in the variant so an invalid combination (a move without a
/// folder, a reply without a body) cannot be constructed past `validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionSpec {
    Move {
        folder: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account: Option<String>,
    },
    Delete,
    Archive,
    MarkRead,
    MarkUnread,
    Flag,
    Unflag,
    Reply {
        body: String,
    },
    Forward {
        to: Vec<String>,
    },
    CreateReminder {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        due: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        list: Option<String>,
    },
    CreateEvent {
        summary: String,
        start: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        calendar: Option<String>,
        #[serde(default)]
        all_day: bool,
    },
    Ignore,
}

impl ActionSpec {
    fn validate(&self) -> Result<()> {
        match self {
            ActionSpec::Move { folder, .. } if folder.trim().is_empty() => {
                bail!("move action requires a target folder")
            }
            ActionSpec::Reply { body } if body.trim().is_empty() => {
                bail!("reply action requires body text")
            }
            ActionSpec::Forward { to } if to.is_empty() => {
                bail!("forward action requires at least one recipient")
            }
            ActionSpec::CreateReminder { title, .. } if title.trim().is_empty() => {
                bail!("create_reminder action requires a title")
            }
            ActionSpec::CreateEvent { summary, .. } if summary.trim().is_empty() => {
                bail!("create_event action requires a summary")
            }
            _ => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionSpec::Move { .. } => "move",
            ActionSpec::Delete => "delete",
            ActionSpec::Archive => "archive",
            ActionSpec::MarkRead => "mark_read",
            ActionSpec::MarkUnread => "mark_unread",
            ActionSpec::Flag => "flag",
            ActionSpec::Unflag => "unflag",
            ActionSpec::Reply { .. } => "reply",
            ActionSpec::Forward { .. } => "forward",
            ActionSpec::CreateReminder { .. } => "create_reminder",
            ActionSpec::CreateEvent { .. } => "create_event",
            ActionSpec::Ignore => "ignore",
        }
    }
}

/// A bounded follow-up action executed after a successful primary.
///
/// Reply, forward and delete are not representable here: a secondary never
/// sends mail or destroys it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SecondaryAction {
    Move { folder: String },
    Archive,
    MarkRead,
    MarkUnread,
    Flag,
    Unflag,
}

impl SecondaryAction {
    fn validate(&self) -> Result<()> {
        if let SecondaryAction::Move { folder } = self {
            if folder.trim().is_empty() {
                bail!("secondary move requires a target folder");
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            SecondaryAction::Move { .. } => "move",
            SecondaryAction::Archive => "archive",
            SecondaryAction::MarkRead => "mark_read",
            SecondaryAction::MarkUnread => "mark_unread",
            SecondaryAction::Flag => "flag",
            SecondaryAction::Unflag => "unflag",
        }
    }
}

/// A classification outcome for one message.
///
/// Immutable after construction except for folder substitution applied by
/// the folder resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(flatten)]
    pub action: ActionSpec,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<SecondaryAction>,
}

impl Decision {
    pub fn new(action: ActionSpec, confidence: f64, reasoning: impl Into<String>) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            bail!("confidence must be in [0, 1], got {confidence}");
        }
        action.validate()?;
        Ok(Self {
            action,
            confidence,
            reasoning: reasoning.into(),
            category: None,
            secondary: None,
        })
    }

    pub fn with_secondary(mut self, secondary: SecondaryAction) -> Result<Self> {
        secondary.validate()?;
        self.secondary = Some(secondary);
        Ok(self)
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn is_outbound(&self) -> bool {
        matches!(
            self.action,
            ActionSpec::Reply { .. } | ActionSpec::Forward { .. }
        )
    }

    pub fn is_pim_action(&self) -> bool {
        matches!(
            self.action,
            ActionSpec::CreateReminder { .. } | ActionSpec::CreateEvent { .. }
        )
    }

    /// Archiving is not an AI-initiated action: a proposed archive primary
    /// becomes ignore, and a proposed archive secondary is dropped.
    pub fn demote_archive(mut self) -> Self {
        if matches!(self.action, ActionSpec::Archive) {
            self.action = ActionSpec::Ignore;
        }
        if matches!(self.secondary, Some(SecondaryAction::Archive)) {
            self.secondary = None;
        }
        self
    }

    pub fn target_folder(&self) -> Option<&str> {
        match &self.action {
            ActionSpec::Move { folder, .. } => Some(folder),
            _ => None,
        }
    }

    pub fn target_account(&self) -> Option<&str> {
        match &self.action {
            ActionSpec::Move { account, .. } => account.as_deref(),
            _ => None,
        }
    }

    /// Folder substitution applied by the resolver (interactive use-existing).
    pub fn substitute_folder(&mut self, new_folder: &str) {
        if let ActionSpec::Move { folder, .. } = &mut self.action {
            *folder = new_folder.to_string();
        }
    }

    pub fn substitute_secondary_folder(&mut self, new_folder: &str) {
        if let Some(SecondaryAction::Move { folder }) = &mut self.secondary {
            *folder = new_folder.to_string();
        }
    }
}

/// Outcome of handling one message. Reporting only, never persisted.
#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub message_id: String,
    pub success: bool,
    pub action: Option<String>,
    pub target_folder: Option<String>,
    pub skipped: bool,
    pub queued: bool,
    pub reason: Option<String>,
    pub error: Option<String>,
    pub rule_matched: Option<String>,
}

impl ProcessResult {
    pub fn success(message_id: &str, action: &str, reason: impl Into<String>) -> Self {
        Self {
            message_id: message_id.to_string(),
            success: true,
            action: Some(action.to_string()),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn skipped(message_id: &str, reason: impl Into<String>) -> Self {
        Self {
            message_id: message_id.to_string(),
            skipped: true,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn queued(message_id: &str, reason: impl Into<String>) -> Self {
        Self {
            message_id: message_id.to_string(),
            queued: true,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn failed(message_id: &str, error: impl Into<String>) -> Self {
        Self {
            message_id: message_id.to_string(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Summary of one autopilot pass.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub emails_fetched: usize,
    pub emails_processed: usize,
    pub emails_skipped: usize,
    pub actions_executed: usize,
    pub actions_queued: usize,
    pub errors: usize,
    pub dry_run: bool,
    pub aging: Option<AgingResult>,
}

impl RunResult {
    pub fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            started_at,
            completed_at: started_at,
            emails_fetched: 0,
            emails_processed: 0,
            emails_skipped: 0,
            actions_executed: 0,
            actions_queued: 0,
            errors: 0,
            dry_run,
            aging: None,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.completed_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Summary of the aging/retention sweep.
#[derive(Debug, Clone, Default)]
pub struct AgingResult {
    pub moved_to_review: usize,
    pub deleted_from_review: usize,
    pub retention_deleted: usize,
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_rejects_bad_confidence() {
        assert!(Decision::new(ActionSpec::Ignore, 1.2, "x").is_err());
        assert!(Decision::new(ActionSpec::Ignore, -0.1, "x").is_err());
    }

    #[test]
    fn test_decision_rejects_empty_move_folder() {
        let action = ActionSpec::Move {
            folder: "  ".to_string(),
            account: None,
        };
        assert!(Decision::new(action, 0.9, "x").is_err());
    }

    #[test]
    fn test_decision_rejects_empty_forward() {
        assert!(Decision::new(ActionSpec::Forward { to: vec![] }, 0.9, "x").is_err());
    }

    #[test]
    fn test_demote_archive_primary_and_secondary() {
        let decision = Decision::new(ActionSpec::Archive, 0.9, "newsletter")
            .unwrap()
            .with_secondary(SecondaryAction::Archive)
            .unwrap()
            .demote_archive();
        assert_eq!(decision.action, ActionSpec::Ignore);
        assert!(decision.secondary.is_none());
    }

    #[test]
    fn test_demote_archive_leaves_other_actions() {
        let decision = Decision::new(
            ActionSpec::Move {
                folder: "Receipts".to_string(),
                account: None,
            },
            0.8,
            "receipt",
        )
        .unwrap()
        .with_secondary(SecondaryAction::MarkRead)
        .unwrap()
        .demote_archive();
        assert_eq!(decision.action.name(), "move");
        assert_eq!(decision.secondary, Some(SecondaryAction::MarkRead));
    }

    #[test]
    fn test_decision_json_roundtrip() {
        let decision = Decision::new(
            ActionSpec::Move {
                folder: "GitHub".to_string(),
                account: Some("Work".to_string()),
            },
            0.85,
            "ci noise",
        )
        .unwrap()
        .with_secondary(SecondaryAction::MarkRead)
        .unwrap();

        let json = serde_json::to_string(&decision).unwrap();
        let back: Decision = serde_json::from_str(&json).unwrap();
        assert_eq!(back, decision);
        // Flat wire shape: the action tag is a top-level field
        assert!(json.contains("\"action\":\"move\""));
    }

    #[test]
    fn test_substitute_folder() {
        let mut decision = Decision::new(
            ActionSpec::Move {
                folder: "Marketting".to_string(),
                account: None,
            },
            0.8,
            "promo",
        )
        .unwrap();
        decision.substitute_folder("Marketing");
        assert_eq!(decision.target_folder(), Some("Marketing"));
    }

    #[test]
    fn test_is_outbound() {
        let reply = Decision::new(
            ActionSpec::Reply {
                body: "thanks".to_string(),
            },
            0.9,
            "ack",
        )
        .unwrap();
        assert!(reply.is_outbound());
        let ignore = Decision::new(ActionSpec::Ignore, 0.9, "x").unwrap();
        assert!(!ignore.is_outbound());
    }
}

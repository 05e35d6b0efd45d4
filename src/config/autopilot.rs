//! Autopilot configuration — parse autopilot.yaml (instructions, quick
//! rules, aging/retention policy).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Deterministic actions a quick rule may run, in listed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Delete,
    Move,
    Archive,
    MarkRead,
    Flag,
    Ignore,
}

/// Match predicates for a quick rule.
///
/// Kinds are ANDed together; patterns within a kind are ORed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleMatch {
    #[serde(default)]
    pub sender_contains: Vec<String>,
    #[serde(default)]
    pub sender_domain: Vec<String>,
    #[serde(default)]
    pub subject_contains: Vec<String>,
    #[serde(default)]
    pub body_contains: Vec<String>,
    #[serde(default)]
    pub header_contains: Vec<String>,
}

impl RuleMatch {
    pub fn needs_content(&self) -> bool {
        !self.body_contains.is_empty() || !self.header_contains.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.sender_contains.is_empty()
            && self.sender_domain.is_empty()
            && self.subject_contains.is_empty()
            && self.body_contains.is_empty()
            && self.header_contains.is_empty()
    }
}

/// A deterministic rule evaluated before AI classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickRule {
    pub name: String,
    #[serde(rename = "match")]
    pub matcher: RuleMatch,
    pub actions: Vec<RuleAction>,
    #[serde(default)]
    pub folder: Option<String>,
}

/// One per-folder retention rule for the aging sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionRule {
    pub folder: String,
    pub days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_stale_inbox_days")]
    pub stale_inbox_days: u32,
    #[serde(default = "default_review_folder")]
    pub review_folder: String,
    #[serde(default = "default_review_purge_days")]
    pub review_purge_days: u32,
    #[serde(default)]
    pub retention: Vec<RetentionRule>,
}

fn default_stale_inbox_days() -> u32 {
    14
}
fn default_review_folder() -> String {
    "Needs Review".to_string()
}
fn default_review_purge_days() -> u32 {
    7
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stale_inbox_days: default_stale_inbox_days(),
            review_folder: default_review_folder(),
            review_purge_days: default_review_purge_days(),
            retention: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopilotConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub instructions: String,
    #[serde(default = "default_mailboxes")]
    pub mailboxes: Vec<String>,
    #[serde(default)]
    pub accounts: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_senders: Vec<String>,
    #[serde(default)]
    pub exclude_subjects: Vec<String>,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    /// Central account for move/archive targets. When set, moves from other
    /// accounts land on this account's folders.
    #[serde(default)]
    pub main_account: Option<String>,
    #[serde(default)]
    pub quick_rules: Vec<QuickRule>,
    #[serde(default)]
    pub aging: AgingConfig,
}

fn default_enabled() -> bool {
    true
}
fn default_mailboxes() -> Vec<String> {
    vec!["INBOX".to_string()]
}
fn default_max_age_days() -> u32 {
    7
}

/// Wrapper so the file can nest everything under an `autopilot:` key.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    autopilot: AutopilotConfig,
}

/// Load autopilot.yaml. Returns None if the file doesn't exist.
pub fn load_autopilot_config(path: &Path) -> Result<Option<AutopilotConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    // Accept both `autopilot:`-nested and top-level layouts.
    if let Ok(wrapped) = serde_yaml::from_str::<ConfigFile>(&content) {
        return Ok(Some(wrapped.autopilot));
    }
    let config: AutopilotConfig = serde_yaml::from_str(&content)?;
    Ok(Some(config))
}

pub fn save_autopilot_config(path: &Path, config: &AutopilotConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    #[derive(Serialize)]
    struct Wrapper<'a> {
        autopilot: &'a AutopilotConfig,
    }
    let yaml = serde_yaml::to_string(&Wrapper { autopilot: config })?;
    std::fs::write(path, yaml)?;
    Ok(())
}

pub const DEFAULT_INSTRUCTIONS: &str = "\
Handle my email according to these preferences:

## Newsletters and Marketing
- Newsletters and digests: mark as read, leave in inbox
- Unsubscribe confirmations: delete

## Notifications
- CI/CD and repository notifications: move to \"GitHub\" folder
- Calendar invites: leave in inbox, flag if it's a new meeting request

## Automated/Transactional
- Order confirmations and shipping notices: move to \"Receipts\" folder
- Password reset emails: leave in inbox (security sensitive)

## Default Behavior
- When uncertain about an email's category: leave in inbox (ignore action)
- Express confidence honestly - use lower confidence when unsure
- Never delete personal emails or anything that looks unique or important
";

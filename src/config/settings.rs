//! Settings and per-account configuration — parse .mailpilot.toml.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::autopilot::types::{FolderPolicy, LowConfidenceAction, OutboundPolicy};
use crate::resolve;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_provider")]
    pub ai_provider: String,

    // Provider settings. API keys may also come from the environment.
    #[serde(default)]
    pub anthropic_api_key: String,
    #[serde(default = "default_claude_model")]
    pub claude_model: String,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_ollama_host")]
    pub ollama_host: String,
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default)]
    pub low_confidence_action: LowConfidenceAction,
    #[serde(default)]
    pub outbound_policy: OutboundPolicy,
    #[serde(default = "default_outbound_confidence_threshold")]
    pub outbound_confidence_threshold: f64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,
    #[serde(default = "default_rate_limit_delay")]
    pub rate_limit_delay_secs: f64,
    #[serde(default = "default_cache_ttl")]
    pub mailbox_cache_ttl_minutes: i64,
    #[serde(default = "default_ledger_retention")]
    pub ledger_retention_days: u32,

    // Watcher settings (hybrid trigger mode)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_post_scan_interval")]
    pub post_scan_interval_minutes: u64,
    #[serde(default = "default_startup_scan")]
    pub watcher_startup_scan: bool,
}

fn default_provider() -> String {
    "claude".to_string()
}
fn default_claude_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o".to_string()
}
fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_model() -> String {
    "llama3.2".to_string()
}
fn default_confidence_threshold() -> f64 {
    0.7
}
fn default_outbound_confidence_threshold() -> f64 {
    0.9
}
fn default_batch_size() -> usize {
    50
}
fn default_flush_batch_size() -> usize {
    10
}
fn default_rate_limit_delay() -> f64 {
    1.0
}
fn default_cache_ttl() -> i64 {
    60
}
fn default_ledger_retention() -> u32 {
    90
}
fn default_poll_interval() -> u64 {
    30
}
fn default_post_scan_interval() -> u64 {
    10
}
fn default_startup_scan() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ai_provider: default_provider(),
            anthropic_api_key: String::new(),
            claude_model: default_claude_model(),
            openai_api_key: String::new(),
            openai_model: default_openai_model(),
            ollama_host: default_ollama_host(),
            ollama_model: default_ollama_model(),
            confidence_threshold: default_confidence_threshold(),
            low_confidence_action: LowConfidenceAction::default(),
            outbound_policy: OutboundPolicy::default(),
            outbound_confidence_threshold: default_outbound_confidence_threshold(),
            batch_size: default_batch_size(),
            flush_batch_size: default_flush_batch_size(),
            rate_limit_delay_secs: default_rate_limit_delay(),
            mailbox_cache_ttl_minutes: default_cache_ttl(),
            ledger_retention_days: default_ledger_retention(),
            poll_interval_seconds: default_poll_interval(),
            post_scan_interval_minutes: default_post_scan_interval(),
            watcher_startup_scan: default_startup_scan(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub folder_policy: FolderPolicy,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            folder_policy: FolderPolicy::default(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub accounts: HashMap<String, AccountConfig>,
}

/// Load .mailpilot.toml from a given path or the resolved location.
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.map(PathBuf::from).unwrap_or_else(resolve::settings_toml);
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

/// Effective folder policy for an account, default queue when unconfigured.
impl Config {
    pub fn folder_policy(&self, account: &str) -> FolderPolicy {
        self.accounts
            .get(account)
            .map(|a| a.folder_policy)
            .unwrap_or_default()
    }
}

/// Set an account's folder_policy in .mailpilot.toml.
///
/// Uses toml_edit for format-preserving edits. Creates the account table
/// if it doesn't exist yet.
pub fn set_folder_policy(account: &str, policy: FolderPolicy, path: Option<&Path>) -> Result<()> {
    let path = path.map(PathBuf::from).unwrap_or_else(resolve::settings_toml);
    let content = if path.exists() {
        std::fs::read_to_string(&path)?
    } else {
        String::new()
    };
    let mut doc = content.parse::<toml_edit::DocumentMut>()?;

    let policy_str = match policy {
        FolderPolicy::AutoCreate => "auto_create",
        FolderPolicy::Interactive => "interactive",
        FolderPolicy::Queue => "queue",
    };

    if doc.get("accounts").is_none() {
        doc["accounts"] = toml_edit::table();
    }
    let accounts = doc["accounts"]
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("[accounts] is not a table"))?;
    if !accounts.contains_key(account) {
        accounts.insert(account, toml_edit::table());
    }
    accounts[account]["folder_policy"] = toml_edit::value(policy_str);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, doc.to_string())?;
    Ok(())
}

/// CLI: mailpilot set-folder-policy ACCOUNT POLICY
pub fn set_folder_policy_cmd(account: &str, policy: &str) -> Result<()> {
    let policy: FolderPolicy = policy.parse()?;
    set_folder_policy(account, policy, None)?;
    println!("Set folder policy for '{}' to {:?}", account, policy);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let config = load_config(Some(Path::new("/nonexistent/.mailpilot.toml"))).unwrap();
        assert_eq!(config.settings.confidence_threshold, 0.7);
        assert_eq!(config.settings.batch_size, 50);
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [settings]
            ai_provider = "ollama"
            confidence_threshold = 0.8
            low_confidence_action = "skip"
            outbound_policy = "require_approval"

            [accounts.Work]
            folder_policy = "auto_create"

            [accounts.Personal]
            enabled = false
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.settings.ai_provider, "ollama");
        assert_eq!(config.settings.confidence_threshold, 0.8);
        assert_eq!(
            config.settings.low_confidence_action,
            LowConfidenceAction::Skip
        );
        assert_eq!(
            config.folder_policy("Work"),
            FolderPolicy::AutoCreate
        );
        assert_eq!(config.folder_policy("Unknown"), FolderPolicy::Queue);
        assert!(!config.accounts["Personal"].enabled);
    }

    #[test]
    fn test_set_folder_policy_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".mailpilot.toml");
        std::fs::write(&path, "[settings]\nconfidence_threshold = 0.75\n").unwrap();

        set_folder_policy("iCloud", FolderPolicy::Interactive, Some(&path)).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.folder_policy("iCloud"), FolderPolicy::Interactive);
        // Format-preserving: the existing setting survives
        assert_eq!(config.settings.confidence_threshold, 0.75);
    }
}

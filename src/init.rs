//! Initialize mailpilot configuration files.

use anyhow::{bail, Result};

use crate::resolve;

const SETTINGS_TEMPLATE: &str = r#"# mailpilot settings
[settings]
# AI provider: claude, openai, or ollama
ai_provider = "claude"
# claude_model = "claude-haiku-4-5-20251001"
# API keys can also come from ANTHROPIC_API_KEY / OPENAI_API_KEY

# Decisions below this confidence follow low_confidence_action
confidence_threshold = 0.7
# flag_for_review | skip | queue_for_approval
low_confidence_action = "queue_for_approval"

# Policy for reply/forward: require_approval | allow_high_confidence | full_autopilot
outbound_policy = "allow_high_confidence"
outbound_confidence_threshold = 0.9

batch_size = 50
flush_batch_size = 10
rate_limit_delay_secs = 1.0

# Watcher
poll_interval_seconds = 30
post_scan_interval_minutes = 10
watcher_startup_scan = true

# Per-account folder handling: auto_create | interactive | queue
# [accounts.iCloud]
# folder_policy = "queue"
"#;

const AUTOPILOT_TEMPLATE: &str = r#"autopilot:
  enabled: true

  instructions: |
    Handle my email according to these preferences:

    ## Newsletters and Marketing
    - Newsletters and digests: mark as read, leave in inbox
    - Unsubscribe confirmations: delete

    ## Notifications
    - CI/CD and repository notifications: move to "GitHub" folder
    - Calendar invites: leave in inbox, flag if it's a new meeting request

    ## Automated/Transactional
    - Order confirmations and shipping notices: move to "Receipts" folder
    - Password reset emails: leave in inbox (security sensitive)

    ## Default Behavior
    - When uncertain about an email's category: leave in inbox (ignore action)
    - Express confidence honestly - use lower confidence when unsure
    - Never delete personal emails or anything that looks unique or important

  mailboxes: [INBOX]
  # accounts: [iCloud]          # omit to process all enabled accounts
  # main_account: iCloud        # central account for move/archive targets
  max_age_days: 7

  exclude_senders: []
  exclude_subjects: []

  # Deterministic rules evaluated before the AI, first match wins.
  quick_rules:
    - name: billing-noise
      match:
        sender_contains: ["noreply@billing"]
      actions: [mark_read, archive]

  aging:
    enabled: false
    stale_inbox_days: 14
    review_folder: "Needs Review"
    review_purge_days: 7
    retention: []
    # retention:
    #   - folder: Newsletters
    #     days: 30
"#;

/// mailpilot init [--force]
pub fn run(force: bool) -> Result<()> {
    let dir = resolve::config_dir();
    std::fs::create_dir_all(&dir)?;

    let settings_path = resolve::settings_toml();
    if settings_path.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            settings_path.display()
        );
    }
    std::fs::write(&settings_path, SETTINGS_TEMPLATE)?;
    println!("Created {}", settings_path.display());

    let autopilot_path = resolve::autopilot_yaml();
    if autopilot_path.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            autopilot_path.display()
        );
    }
    std::fs::write(&autopilot_path, AUTOPILOT_TEMPLATE)?;
    println!("Created {}", autopilot_path.display());

    println!("\nNext steps:");
    println!("  1. Edit the instructions in {}", autopilot_path.display());
    println!("  2. mailpilot run --dry-run -v");
    Ok(())
}

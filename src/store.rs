//! SQLite store for autopilot state: processed ledger, pending queues,
//! failure counters, first-seen tracking, mailbox cache, watcher state,
//! audit log.

use anyhow::Result;
use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;

use crate::autopilot::types::Decision;

const SCHEMA: &str = r#"
-- Which messages have been handled, and how
CREATE TABLE IF NOT EXISTS processed_emails (
  message_id TEXT PRIMARY KEY,
  mailbox TEXT NOT NULL,
  account TEXT NOT NULL,
  subject TEXT,
  sender TEXT,
  processed_at TEXT NOT NULL,
  action_taken TEXT NOT NULL,
  confidence REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_processed_at ON processed_emails(processed_at);

-- Actions awaiting approval, or blocked on a missing folder
CREATE TABLE IF NOT EXISTS pending_actions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  message_id TEXT NOT NULL,
  email_summary TEXT NOT NULL,
  proposed_action TEXT NOT NULL,
  confidence REAL NOT NULL,
  reasoning TEXT NOT NULL,
  created_at TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'pending',
  resolved_at TEXT,
  pending_folder TEXT,
  pending_account TEXT,
  action_type TEXT NOT NULL DEFAULT 'general'
);
CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_actions(status);
CREATE INDEX IF NOT EXISTS idx_pending_folder
  ON pending_actions(pending_folder, pending_account)
  WHERE pending_folder IS NOT NULL;

-- Retryable failure counters per (message, stage)
CREATE TABLE IF NOT EXISTS rule_failures (
  message_id TEXT NOT NULL,
  stage TEXT NOT NULL,
  failures INTEGER NOT NULL DEFAULT 0,
  last_error TEXT,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (message_id, stage)
);

-- When each inbox message was first observed (drives aging)
CREATE TABLE IF NOT EXISTS email_first_seen (
  message_id TEXT PRIMARY KEY,
  mailbox TEXT NOT NULL,
  account TEXT NOT NULL,
  first_seen_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_first_seen_at ON email_first_seen(first_seen_at);

-- Mailbox name lists per account (host enumeration is slow)
CREATE TABLE IF NOT EXISTS mailbox_cache (
  account TEXT PRIMARY KEY,
  mailboxes TEXT NOT NULL,
  cached_at TEXT NOT NULL
);

-- Watcher crash-recovery state
CREATE TABLE IF NOT EXISTS watcher_state (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

-- Audit trail of executed actions
CREATE TABLE IF NOT EXISTS audit_log (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  message_id TEXT NOT NULL,
  action TEXT NOT NULL,
  source TEXT NOT NULL,
  timestamp TEXT NOT NULL,
  details TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);

-- One PIM artifact (reminder/event) per message, across passes
CREATE TABLE IF NOT EXISTS pim_links (
  message_id TEXT NOT NULL,
  kind TEXT NOT NULL,
  created_at TEXT NOT NULL,
  PRIMARY KEY (message_id, kind)
);
"#;

/// Current time as a uniform RFC3339 string (lexicographic == chronological).
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn cutoff_ts(days: i64) -> String {
    (Utc::now() - Duration::days(days)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A pending-approval or folder-pending row.
#[derive(Debug, Clone)]
pub struct PendingRow {
    pub id: i64,
    pub message_id: String,
    pub email_summary: String,
    pub decision: Decision,
    pub confidence: f64,
    pub reasoning: String,
    pub created_at: String,
    pub status: String,
    pub pending_folder: Option<String>,
    pub pending_account: Option<String>,
}

/// Aggregate over folder-pending rows for one (folder, account).
#[derive(Debug, Clone)]
pub struct PendingFolder {
    pub folder: String,
    pub account: String,
    pub message_count: usize,
    pub first_queued: String,
}

#[derive(Debug, Clone)]
pub struct FirstSeen {
    pub message_id: String,
    pub mailbox: String,
    pub account: String,
    pub first_seen_at: String,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub message_id: String,
    pub action: String,
    pub source: String,
    pub timestamp: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub processed_total: usize,
    pub pending_count: usize,
    pub last_processed: Option<String>,
    pub actions_7d: Vec<(String, usize)>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // --- Processed ledger ---

    pub fn mark_processed(
        &self,
        message_id: &str,
        mailbox: &str,
        account: &str,
        subject: &str,
        sender: &str,
        action: &serde_json::Value,
        confidence: f64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO processed_emails
             (message_id, mailbox, account, subject, sender, processed_at, action_taken, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message_id,
                mailbox,
                account,
                crate::util::truncate(subject, 100),
                crate::util::truncate(sender, 100),
                now_ts(),
                action.to_string(),
                confidence,
            ],
        )?;
        Ok(())
    }

    pub fn is_processed(&self, message_id: &str) -> Result<bool> {
        let row: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM processed_emails WHERE message_id = ?1",
                params![message_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    pub fn get_processed_ids(&self, limit: usize) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id FROM processed_emails ORDER BY processed_at DESC LIMIT ?1",
        )?;
        let ids = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn processed_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM processed_emails", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remove ledger rows older than the retention period. Returns rows removed.
    pub fn cleanup_old_records(&self, retention_days: u32) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM processed_emails WHERE processed_at < ?1",
            params![cutoff_ts(retention_days as i64)],
        )?;
        Ok(removed)
    }

    pub fn clear_processed(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM processed_emails", [])?;
        Ok(removed)
    }

    // --- Pending actions ---

    /// Queue a decision for approval. Any prior pending row for the message
    /// is replaced; a message has at most one outstanding pending row.
    pub fn add_pending_action(
        &self,
        message_id: &str,
        email_summary: &str,
        decision: &Decision,
        reasoning: &str,
    ) -> Result<i64> {
        self.remove_pending_for_message(message_id)?;
        self.conn.execute(
            "INSERT INTO pending_actions
             (message_id, email_summary, proposed_action, confidence, reasoning, created_at, status, action_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 'general')",
            params![
                message_id,
                email_summary,
                serde_json::to_string(decision)?,
                decision.confidence,
                reasoning,
                now_ts(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Queue a decision blocked on a folder that doesn't exist yet.
    pub fn add_pending_folder_action(
        &self,
        message_id: &str,
        email_summary: &str,
        decision: &Decision,
        reasoning: &str,
        pending_folder: &str,
        pending_account: &str,
    ) -> Result<i64> {
        self.remove_pending_for_message(message_id)?;
        self.conn.execute(
            "INSERT INTO pending_actions
             (message_id, email_summary, proposed_action, confidence, reasoning, created_at,
              status, pending_folder, pending_account, action_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, 'folder_pending')",
            params![
                message_id,
                email_summary,
                serde_json::to_string(decision)?,
                decision.confidence,
                reasoning,
                now_ts(),
                pending_folder,
                pending_account,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn remove_pending_for_message(&self, message_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM pending_actions WHERE message_id = ?1 AND status = 'pending'",
            params![message_id],
        )?;
        Ok(())
    }

    fn row_to_pending(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<PendingRow>> {
        let raw: String = row.get("proposed_action")?;
        let decision = match serde_json::from_str::<Decision>(&raw) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("Warning: skipping pending row with bad decision JSON: {}", e);
                return Ok(None);
            }
        };
        Ok(Some(PendingRow {
            id: row.get("id")?,
            message_id: row.get("message_id")?,
            email_summary: row.get("email_summary")?,
            decision,
            confidence: row.get("confidence")?,
            reasoning: row.get("reasoning")?,
            created_at: row.get("created_at")?,
            status: row.get("status")?,
            pending_folder: row.get("pending_folder")?,
            pending_account: row.get("pending_account")?,
        }))
    }

    pub fn get_pending_actions(&self, status: &str, limit: usize) -> Result<Vec<PendingRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, message_id, email_summary, proposed_action, confidence, reasoning,
                    created_at, status, pending_folder, pending_account
             FROM pending_actions WHERE status = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![status, limit as i64], Self::row_to_pending)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().flatten().collect())
    }

    pub fn get_pending_action(&self, action_id: i64) -> Result<Option<PendingRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, message_id, email_summary, proposed_action, confidence, reasoning,
                        created_at, status, pending_folder, pending_account
                 FROM pending_actions WHERE id = ?1",
                params![action_id],
                Self::row_to_pending,
            )
            .optional()?;
        Ok(row.flatten())
    }

    pub fn update_pending_status(&self, action_id: i64, status: &str) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE pending_actions SET status = ?1, resolved_at = ?2 WHERE id = ?3",
            params![status, now_ts(), action_id],
        )?;
        Ok(updated > 0)
    }

    pub fn remove_pending_action(&self, action_id: i64) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM pending_actions WHERE id = ?1",
            params![action_id],
        )?;
        Ok(removed > 0)
    }

    pub fn pending_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pending_actions WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Whether a message has any outstanding pending row.
    pub fn has_pending_for_message(&self, message_id: &str) -> Result<bool> {
        let row: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM pending_actions WHERE message_id = ?1 AND status = 'pending'",
                params![message_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    /// Distinct folders awaiting creation, with how many actions each blocks.
    pub fn get_pending_folders(&self, account: Option<&str>) -> Result<Vec<PendingFolder>> {
        let mut sql = String::from(
            "SELECT pending_folder, pending_account, COUNT(*), MIN(created_at)
             FROM pending_actions
             WHERE status = 'pending' AND pending_folder IS NOT NULL",
        );
        if account.is_some() {
            sql.push_str(" AND pending_account = ?1");
        }
        sql.push_str(" GROUP BY pending_folder, pending_account ORDER BY MIN(created_at)");

        let mut stmt = self.conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<PendingFolder> {
            Ok(PendingFolder {
                folder: row.get(0)?,
                account: row.get(1)?,
                message_count: row.get::<_, i64>(2)? as usize,
                first_queued: row.get(3)?,
            })
        };
        let rows = match account {
            Some(acct) => stmt
                .query_map(params![acct], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    pub fn get_actions_for_folder(&self, folder: &str, account: &str) -> Result<Vec<PendingRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, message_id, email_summary, proposed_action, confidence, reasoning,
                    created_at, status, pending_folder, pending_account
             FROM pending_actions
             WHERE status = 'pending' AND pending_folder = ?1 AND pending_account = ?2
             ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![folder, account], Self::row_to_pending)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().flatten().collect())
    }

    // --- Failure counters ---

    /// Record a retryable stage failure. Returns the new count.
    pub fn increment_rule_failure(
        &self,
        message_id: &str,
        stage: &str,
        error: &str,
    ) -> Result<u32> {
        self.conn.execute(
            "INSERT INTO rule_failures (message_id, stage, failures, last_error, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(message_id, stage) DO UPDATE SET
               failures = failures + 1,
               last_error = excluded.last_error,
               updated_at = excluded.updated_at",
            params![message_id, stage, error, now_ts()],
        )?;
        let count: i64 = self.conn.query_row(
            "SELECT failures FROM rule_failures WHERE message_id = ?1 AND stage = ?2",
            params![message_id, stage],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    pub fn get_rule_failures(&self, message_id: &str, stage: &str) -> Result<u32> {
        let count: Option<i64> = self
            .conn
            .query_row(
                "SELECT failures FROM rule_failures WHERE message_id = ?1 AND stage = ?2",
                params![message_id, stage],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0) as u32)
    }

    pub fn clear_rule_failures(&self, message_id: &str, stage: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM rule_failures WHERE message_id = ?1 AND stage = ?2",
            params![message_id, stage],
        )?;
        Ok(())
    }

    pub fn clear_all_failures_for(&self, message_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM rule_failures WHERE message_id = ?1",
            params![message_id],
        )?;
        Ok(())
    }

    // --- First seen (inbox aging) ---

    /// Record when a message was first observed. Insert-or-replace so a
    /// message moved back into the inbox gets a fresh timestamp instead of
    /// immediately aging out.
    pub fn track_first_seen(&self, message_id: &str, mailbox: &str, account: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO email_first_seen (message_id, mailbox, account, first_seen_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![message_id, mailbox, account, now_ts()],
        )?;
        Ok(())
    }

    /// Like `track_first_seen` but keeps an existing timestamp.
    pub fn track_first_seen_if_new(
        &self,
        message_id: &str,
        mailbox: &str,
        account: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO email_first_seen (message_id, mailbox, account, first_seen_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![message_id, mailbox, account, now_ts()],
        )?;
        Ok(())
    }

    pub fn get_stale_inbox_emails(&self, stale_days: u32) -> Result<Vec<FirstSeen>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, mailbox, account, first_seen_at
             FROM email_first_seen
             WHERE first_seen_at < ?1
             ORDER BY first_seen_at ASC",
        )?;
        let rows = stmt
            .query_map(params![cutoff_ts(stale_days as i64)], |row| {
                Ok(FirstSeen {
                    message_id: row.get(0)?,
                    mailbox: row.get(1)?,
                    account: row.get(2)?,
                    first_seen_at: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn remove_first_seen(&self, message_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM email_first_seen WHERE message_id = ?1",
            params![message_id],
        )?;
        Ok(())
    }

    // --- Mailbox cache ---

    pub fn get_cached_mailboxes(
        &self,
        account: &str,
        max_age_minutes: i64,
    ) -> Result<Option<Vec<String>>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT mailboxes, cached_at FROM mailbox_cache WHERE account = ?1",
                params![account],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((mailboxes, cached_at)) = row else {
            return Ok(None);
        };
        let fresh_after = (Utc::now() - Duration::minutes(max_age_minutes))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        if cached_at < fresh_after {
            return Ok(None); // Cache expired
        }
        Ok(serde_json::from_str(&mailboxes).ok())
    }

    pub fn set_cached_mailboxes(&self, account: &str, mailboxes: &[String]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO mailbox_cache (account, mailboxes, cached_at)
             VALUES (?1, ?2, ?3)",
            params![account, serde_json::to_string(mailboxes)?, now_ts()],
        )?;
        Ok(())
    }

    pub fn clear_mailbox_cache(&self, account: Option<&str>) -> Result<usize> {
        let removed = match account {
            Some(acct) => self.conn.execute(
                "DELETE FROM mailbox_cache WHERE account = ?1",
                params![acct],
            )?,
            None => self.conn.execute("DELETE FROM mailbox_cache", [])?,
        };
        Ok(removed)
    }

    // --- Watcher state ---

    pub fn get_watcher_state(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM watcher_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_watcher_state(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO watcher_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn clear_watcher_state(&self) -> Result<()> {
        self.conn.execute("DELETE FROM watcher_state", [])?;
        Ok(())
    }

    // --- Audit log ---

    pub fn log_action(
        &self,
        message_id: &str,
        action: &str,
        source: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO audit_log (message_id, action, source, timestamp, details)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message_id,
                action,
                source,
                now_ts(),
                details.map(|d| d.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn get_audit_log(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, action, source, timestamp, details
             FROM audit_log ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let details: Option<String> = row.get(4)?;
                Ok(AuditEntry {
                    message_id: row.get(0)?,
                    action: row.get(1)?,
                    source: row.get(2)?,
                    timestamp: row.get(3)?,
                    details: details.and_then(|d| serde_json::from_str(&d).ok()),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- PIM links ---

    pub fn add_pim_link(&self, message_id: &str, kind: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO pim_links (message_id, kind, created_at)
             VALUES (?1, ?2, ?3)",
            params![message_id, kind, now_ts()],
        )?;
        Ok(())
    }

    pub fn has_pim_link(&self, message_id: &str, kind: &str) -> Result<bool> {
        let row: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM pim_links WHERE message_id = ?1 AND kind = ?2",
                params![message_id, kind],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    // --- Statistics ---

    pub fn get_stats(&self) -> Result<StoreStats> {
        let processed_total = self.processed_count()?;
        let pending_count = self.pending_count()?;
        let last_processed: Option<String> = self.conn.query_row(
            "SELECT MAX(processed_at) FROM processed_emails",
            [],
            |row| row.get(0),
        )?;
        let mut stmt = self.conn.prepare(
            "SELECT action, COUNT(*) FROM audit_log
             WHERE timestamp > ?1 GROUP BY action ORDER BY COUNT(*) DESC",
        )?;
        let actions_7d = stmt
            .query_map(params![cutoff_ts(7)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(StoreStats {
            processed_total,
            pending_count,
            last_processed,
            actions_7d,
        })
    }
}

//! Mail client adapter: message fetch, move, delete, flag, reply, forward.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;

use super::{escape_script_string, run_osascript, BridgeError};
use crate::util::truncate;

const APP: &str = "Mail";

// ASCII control character for parsing script output.
// Virtually never found in mailbox names, preventing parse errors.
const RECORD_SEP: &str = "\x1e";

// Field/record separators for message payloads.
const FIELD_SEP: &str = ":::";
const MSG_SEP: &str = "|||";

/// Virtual provider mailboxes that can't be referenced directly by name.
pub const VIRTUAL_MAILBOXES: &[&str] = &["All Mail", "[Gmail]/All Mail", "Important", "Starred"];

/// Sentinel account meaning local "on my machine" mailbox routing.
/// When used as a target account, moves carry no account qualifier.
pub const LOCAL_ACCOUNT_KEY: &str = "__local__";

#[derive(Debug, Clone)]
pub struct MailAccount {
    pub name: String,
    pub enabled: bool,
}

/// A message as seen by the host mail client.
///
/// `content` stays `None` until a rule or the classifier needs the body.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub id: String,
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub date_received: Option<DateTime<Utc>>,
    pub date_sent: Option<DateTime<Utc>>,
    pub content: Option<String>,
    pub is_read: bool,
    pub mailbox: String,
    pub account: String,
}

impl EmailMessage {
    /// One-line "sender: subject" summary for queue rows and logs.
    pub fn summary(&self) -> String {
        format!("{}: {}", self.sender, truncate(&self.subject, 50))
    }
}

/// A queued move, buffered for batch execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub message_id: String,
    pub target_mailbox: String,
    pub target_account: Option<String>,
    pub source_mailbox: String,
    pub source_account: String,
}

/// Narrow interface to the host mail application.
pub trait MailClient {
    fn list_accounts(&self) -> Result<Vec<MailAccount>, BridgeError>;
    fn list_mailboxes(&self, account: &str) -> Result<Vec<String>, BridgeError>;
    fn create_mailbox(&self, mailbox: &str, account: &str) -> Result<(), BridgeError>;
    fn list_local_mailboxes(&self) -> Result<Vec<String>, BridgeError>;
    fn create_local_mailbox(&self, mailbox: &str) -> Result<(), BridgeError>;
    fn message_count(&self, account: &str, mailbox: &str) -> Result<u32, BridgeError>;
    fn fetch_messages(
        &self,
        mailbox: &str,
        account: Option<&str>,
        limit: usize,
        unread_only: bool,
    ) -> Result<Vec<EmailMessage>, BridgeError>;
    fn fetch_message(&self, id: &str) -> Result<Option<EmailMessage>, BridgeError>;
    fn load_content(&self, id: &str) -> Result<String, BridgeError>;
    fn move_message(
        &self,
        id: &str,
        target_mailbox: &str,
        target_account: Option<&str>,
        source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError>;
    /// Batch move. Returns the ids that were actually moved.
    fn move_messages_batch(&self, moves: &[PendingMove]) -> Result<Vec<String>, BridgeError>;
    fn delete_message(&self, id: &str, source: Option<(&str, &str)>) -> Result<(), BridgeError>;
    fn set_read(
        &self,
        id: &str,
        read: bool,
        source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError>;
    fn set_flagged(
        &self,
        id: &str,
        flagged: bool,
        source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError>;
    fn reply(&self, id: &str, body: &str, source: Option<(&str, &str)>)
        -> Result<(), BridgeError>;
    fn forward(
        &self,
        id: &str,
        to: &[String],
        source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError>;
}

/// osascript-backed mail client.
pub struct OsaMailClient {
    timeout_secs: u64,
}

impl OsaMailClient {
    pub fn new() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl Default for OsaMailClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a script expression referencing one message, preferring the fast
/// source-scoped lookup over a global search.
fn message_ref(id: &str, source: Option<(&str, &str)>) -> String {
    match source {
        Some((mailbox, account)) => format!(
            "first message of mailbox \"{}\" of account \"{}\" whose id is {}",
            escape_script_string(mailbox),
            escape_script_string(account),
            id
        ),
        None => format!("first message whose id is {}", id),
    }
}

fn mailbox_ref(mailbox: &str, account: Option<&str>) -> String {
    match account {
        Some(acct) if acct != LOCAL_ACCOUNT_KEY => format!(
            "mailbox \"{}\" of account \"{}\"",
            escape_script_string(mailbox),
            escape_script_string(acct)
        ),
        _ => format!("mailbox \"{}\"", escape_script_string(mailbox)),
    }
}

/// Parse a host date string like "Friday, December 20, 2024 at 10:30:00 AM".
pub fn parse_host_date(date_str: &str) -> Option<DateTime<Utc>> {
    let date_str = date_str.trim();
    if date_str.is_empty() || date_str == "missing value" {
        return None;
    }
    let formats = [
        "%A, %B %d, %Y at %I:%M:%S %p",
        "%A, %B %d, %Y at %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];
    for fmt in formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(date_str, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

fn parse_message_record(record: &str) -> Option<EmailMessage> {
    let parts: Vec<&str> = record.split(FIELD_SEP).collect();
    if parts.len() < 10 {
        return None;
    }
    Some(EmailMessage {
        id: parts[0].to_string(),
        message_id: parts[1].to_string(),
        subject: parts[2].to_string(),
        sender: parts[3].to_string(),
        recipients: if parts[4].is_empty() {
            vec![]
        } else {
            parts[4].split(',').map(str::to_string).collect()
        },
        date_received: parse_host_date(parts[5]),
        date_sent: parse_host_date(parts[6]),
        content: None,
        is_read: parts[7].eq_ignore_ascii_case("true"),
        mailbox: parts[8].to_string(),
        account: parts[9].to_string(),
    })
}

impl MailClient for OsaMailClient {
    fn list_accounts(&self) -> Result<Vec<MailAccount>, BridgeError> {
        let script = r#"
        tell application "Mail"
            set output to ""
            set RS to (ASCII character 30)
            repeat with acct in accounts
                if output is not "" then set output to output & RS
                set output to output & (name of acct) & ":" & (enabled of acct)
            end repeat
            return output
        end tell
        "#;
        let result = run_osascript(APP, script, self.timeout_secs)?;
        if result.is_empty() {
            return Ok(vec![]);
        }
        Ok(result
            .split(RECORD_SEP)
            .filter_map(|rec| {
                let (name, enabled) = rec.rsplit_once(':')?;
                Some(MailAccount {
                    name: name.to_string(),
                    enabled: enabled.eq_ignore_ascii_case("true"),
                })
            })
            .collect())
    }

    fn list_mailboxes(&self, account: &str) -> Result<Vec<String>, BridgeError> {
        let script = format!(
            r#"
        tell application "Mail"
            set output to ""
            set acct to account "{}"
            set RS to (ASCII character 30)
            repeat with mbox in mailboxes of acct
                if output is not "" then set output to output & RS
                set output to output & name of mbox
            end repeat
            return output
        end tell
        "#,
            escape_script_string(account)
        );
        let result = run_osascript(APP, &script, self.timeout_secs)?;
        if result.is_empty() {
            return Ok(vec![]);
        }
        Ok(result.split(RECORD_SEP).map(str::to_string).collect())
    }

    fn create_mailbox(&self, mailbox: &str, account: &str) -> Result<(), BridgeError> {
        let script = format!(
            r#"
        tell application "Mail"
            set targetAcct to account "{}"
            make new mailbox with properties {{name:"{}"}} at targetAcct
        end tell
        "#,
            escape_script_string(account),
            escape_script_string(mailbox)
        );
        run_osascript(APP, &script, self.timeout_secs)?;
        Ok(())
    }

    fn list_local_mailboxes(&self) -> Result<Vec<String>, BridgeError> {
        let script = r#"
        tell application "Mail"
            set output to ""
            set RS to (ASCII character 30)
            repeat with mbox in mailboxes
                if account of mbox is missing value then
                    if output is not "" then set output to output & RS
                    set output to output & name of mbox
                end if
            end repeat
            return output
        end tell
        "#;
        let result = run_osascript(APP, script, self.timeout_secs)?;
        if result.trim().is_empty() {
            return Ok(vec![]);
        }
        Ok(result.split(RECORD_SEP).map(str::to_string).collect())
    }

    fn create_local_mailbox(&self, mailbox: &str) -> Result<(), BridgeError> {
        let script = format!(
            r#"
        tell application "Mail"
            make new mailbox with properties {{name:"{}"}}
        end tell
        "#,
            escape_script_string(mailbox)
        );
        run_osascript(APP, &script, self.timeout_secs)?;
        Ok(())
    }

    fn message_count(&self, account: &str, mailbox: &str) -> Result<u32, BridgeError> {
        let script = format!(
            r#"
        tell application "Mail"
            return count of messages of mailbox "{}" of account "{}"
        end tell
        "#,
            escape_script_string(mailbox),
            escape_script_string(account)
        );
        let result = run_osascript(APP, &script, self.timeout_secs)?;
        result
            .trim()
            .parse()
            .map_err(|_| BridgeError::Script(format!("unparseable count: {}", result)))
    }

    fn fetch_messages(
        &self,
        mailbox: &str,
        account: Option<&str>,
        limit: usize,
        unread_only: bool,
    ) -> Result<Vec<EmailMessage>, BridgeError> {
        let read_filter = if unread_only {
            "whose read status is false"
        } else {
            ""
        };
        let script = format!(
            r#"
        tell application "Mail"
            set output to ""
            set msgList to (messages of {} {})
            set msgCount to count of msgList
            if msgCount > {limit} then set msgCount to {limit}

            repeat with i from 1 to msgCount
                set msg to item i of msgList
                set recipList to ""
                repeat with recip in recipients of msg
                    if recipList is not "" then set recipList to recipList & ","
                    set recipList to recipList & (address of recip)
                end repeat
                if output is not "" then set output to output & "{MSG_SEP}"
                set output to output & (id of msg as string) & "{FIELD_SEP}" & (message id of msg) & "{FIELD_SEP}" & (subject of msg) & "{FIELD_SEP}" & (sender of msg) & "{FIELD_SEP}" & recipList & "{FIELD_SEP}" & (date received of msg as string) & "{FIELD_SEP}" & (date sent of msg as string) & "{FIELD_SEP}" & (read status of msg) & "{FIELD_SEP}" & (name of mailbox of msg) & "{FIELD_SEP}" & (name of account of mailbox of msg)
            end repeat

            return output
        end tell
        "#,
            mailbox_ref(mailbox, account),
            read_filter,
        );
        // Longer timeout: large mailboxes are slow to enumerate.
        let result = run_osascript(APP, &script, 120)?;
        if result.is_empty() {
            return Ok(vec![]);
        }
        Ok(result.split(MSG_SEP).filter_map(parse_message_record).collect())
    }

    fn fetch_message(&self, id: &str) -> Result<Option<EmailMessage>, BridgeError> {
        let script = format!(
            r#"
        tell application "Mail"
            set msg to first message whose id is {id}
            set recipList to ""
            repeat with recip in recipients of msg
                if recipList is not "" then set recipList to recipList & ","
                set recipList to recipList & (address of recip)
            end repeat
            return "{id}" & "{FIELD_SEP}" & (message id of msg) & "{FIELD_SEP}" & (subject of msg) & "{FIELD_SEP}" & (sender of msg) & "{FIELD_SEP}" & recipList & "{FIELD_SEP}" & (date received of msg as string) & "{FIELD_SEP}" & (date sent of msg as string) & "{FIELD_SEP}" & (read status of msg) & "{FIELD_SEP}" & (name of mailbox of msg) & "{FIELD_SEP}" & (name of account of mailbox of msg)
        end tell
        "#
        );
        match run_osascript(APP, &script, self.timeout_secs) {
            Ok(result) if result.is_empty() => Ok(None),
            Ok(result) => Ok(parse_message_record(&result)),
            Err(e) if e.is_stale_reference() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn load_content(&self, id: &str) -> Result<String, BridgeError> {
        let script = format!(
            r#"
        tell application "Mail"
            set msg to first message whose id is {id}
            set msgContent to content of msg
            if length of msgContent > 5000 then
                set msgContent to text 1 thru 5000 of msgContent
            end if
            return msgContent
        end tell
        "#
        );
        run_osascript(APP, &script, self.timeout_secs)
    }

    fn move_message(
        &self,
        id: &str,
        target_mailbox: &str,
        target_account: Option<&str>,
        source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError> {
        let script = format!(
            r#"
        tell application "Mail"
            set msg to {}
            move msg to {}
        end tell
        "#,
            message_ref(id, source),
            mailbox_ref(target_mailbox, target_account),
        );
        run_osascript(APP, &script, self.timeout_secs)?;
        Ok(())
    }

    fn move_messages_batch(&self, moves: &[PendingMove]) -> Result<Vec<String>, BridgeError> {
        if moves.is_empty() {
            return Ok(vec![]);
        }

        // One script per (target mailbox, target account) group; each script
        // reports the ids it managed to move.
        let mut groups: HashMap<(String, Option<String>), Vec<&PendingMove>> = HashMap::new();
        for mv in moves {
            groups
                .entry((mv.target_mailbox.clone(), mv.target_account.clone()))
                .or_default()
                .push(mv);
        }

        let mut moved = Vec::new();
        for ((target_mailbox, target_account), group) in groups {
            let ids = group
                .iter()
                .map(|m| m.message_id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let script = format!(
                r#"
            tell application "Mail"
                set targetBox to {}
                set msgIds to {{{ids}}}
                set movedIds to ""
                set RS to (ASCII character 30)
                repeat with msgId in msgIds
                    try
                        set msg to first message whose id is msgId
                        move msg to targetBox
                        if movedIds is not "" then set movedIds to movedIds & RS
                        set movedIds to movedIds & (msgId as string)
                    end try
                end repeat
                return movedIds
            end tell
            "#,
                mailbox_ref(&target_mailbox, target_account.as_deref()),
            );
            // Batches get a long leash; one group failing must not sink the rest.
            match run_osascript(APP, &script, 120) {
                Ok(result) if !result.is_empty() => {
                    moved.extend(result.split(RECORD_SEP).map(str::to_string));
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("  Batch move to '{}' failed: {}", target_mailbox, e);
                }
            }
        }
        Ok(moved)
    }

    fn delete_message(&self, id: &str, source: Option<(&str, &str)>) -> Result<(), BridgeError> {
        // Soft delete: find the account's trash by common names.
        let script = format!(
            r#"
        tell application "Mail"
            set msg to {}
            set msgAcct to account of mailbox of msg
            set trashNames to {{"Trash", "Deleted Messages", "[Gmail]/Trash", "Deleted Items"}}
            set trashMbox to missing value
            repeat with trashName in trashNames
                try
                    set trashMbox to mailbox trashName of msgAcct
                    exit repeat
                end try
            end repeat
            if trashMbox is missing value then
                error "Could not find trash mailbox"
            end if
            move msg to trashMbox
        end tell
        "#,
            message_ref(id, source),
        );
        run_osascript(APP, &script, self.timeout_secs)?;
        Ok(())
    }

    fn set_read(
        &self,
        id: &str,
        read: bool,
        source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError> {
        let script = format!(
            r#"
        tell application "Mail"
            set msg to {}
            set read status of msg to {}
        end tell
        "#,
            message_ref(id, source),
            read,
        );
        run_osascript(APP, &script, self.timeout_secs)?;
        Ok(())
    }

    fn set_flagged(
        &self,
        id: &str,
        flagged: bool,
        source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError> {
        let script = format!(
            r#"
        tell application "Mail"
            set msg to {}
            set flagged status of msg to {}
        end tell
        "#,
            message_ref(id, source),
            flagged,
        );
        run_osascript(APP, &script, self.timeout_secs)?;
        Ok(())
    }

    fn reply(
        &self,
        id: &str,
        body: &str,
        source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError> {
        let script = format!(
            r#"
        tell application "Mail"
            set msg to {}
            set replyMsg to reply msg
            set content of replyMsg to "{}"
            send replyMsg
        end tell
        "#,
            message_ref(id, source),
            escape_script_string(body),
        );
        run_osascript(APP, &script, self.timeout_secs)?;
        Ok(())
    }

    fn forward(
        &self,
        id: &str,
        to: &[String],
        source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError> {
        let recipients = to
            .iter()
            .map(|addr| {
                format!(
                    "make new to recipient at end of to recipients of fwdMsg with properties {{address:\"{}\"}}",
                    escape_script_string(addr)
                )
            })
            .collect::<Vec<_>>()
            .join("\n                ");
        let script = format!(
            r#"
        tell application "Mail"
            set msg to {}
            set fwdMsg to forward msg
            {}
            send fwdMsg
        end tell
        "#,
            message_ref(id, source),
            recipients,
        );
        run_osascript(APP, &script, self.timeout_secs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_date() {
        let dt = parse_host_date("Friday, December 20, 2024 at 10:30:00 AM").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-12-20T10:30:00+00:00");
        assert!(parse_host_date("missing value").is_none());
        assert!(parse_host_date("").is_none());
    }

    #[test]
    fn test_parse_message_record() {
        let record = "42:::<abc@mail>:::Hello:::Alice <a@x.com>:::b@x.com,c@x.com:::Friday, December 20, 2024 at 10:30:00 AM:::missing value:::true:::INBOX:::Work";
        let msg = parse_message_record(record).unwrap();
        assert_eq!(msg.id, "42");
        assert_eq!(msg.subject, "Hello");
        assert_eq!(msg.recipients.len(), 2);
        assert!(msg.is_read);
        assert!(msg.content.is_none());
        assert_eq!(msg.account, "Work");
    }

    #[test]
    fn test_parse_message_record_short() {
        assert!(parse_message_record("not enough fields").is_none());
    }

    #[test]
    fn test_message_ref_scoped_vs_global() {
        assert_eq!(
            message_ref("7", Some(("INBOX", "Work"))),
            "first message of mailbox \"INBOX\" of account \"Work\" whose id is 7"
        );
        assert_eq!(message_ref("7", None), "first message whose id is 7");
    }

    #[test]
    fn test_mailbox_ref_local_sentinel() {
        assert_eq!(
            mailbox_ref("Archive", Some(LOCAL_ACCOUNT_KEY)),
            "mailbox \"Archive\""
        );
        assert_eq!(
            mailbox_ref("Archive", Some("Work")),
            "mailbox \"Archive\" of account \"Work\""
        );
    }
}

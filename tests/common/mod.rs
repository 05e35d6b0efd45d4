//! Shared test doubles: scripted AI provider, recording mail client, and
//! inert calendar/reminder clients.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use mailpilot::ai::{AiError, AiProvider};
use mailpilot::autopilot::types::Decision;
use mailpilot::bridge::mail::{EmailMessage, MailAccount, MailClient, PendingMove};
use mailpilot::bridge::{
    BridgeError, CalendarClient, EventDraft, ReminderClient, ReminderDraft,
};
use mailpilot::config::autopilot::{AgingConfig, AutopilotConfig};
use mailpilot::config::settings::Config;

pub fn make_email(id: &str, sender: &str, subject: &str) -> EmailMessage {
    EmailMessage {
        id: id.to_string(),
        message_id: format!("<{}@test>", id),
        subject: subject.to_string(),
        sender: sender.to_string(),
        recipients: vec!["me@example.com".to_string()],
        date_received: Some(Utc::now() - Duration::hours(1)),
        date_sent: None,
        content: Some("hello body".to_string()),
        is_read: false,
        mailbox: "INBOX".to_string(),
        account: "Work".to_string(),
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    // No artificial pauses between mock AI calls
    config.settings.rate_limit_delay_secs = 0.0;
    config
}

pub fn test_autopilot_config() -> AutopilotConfig {
    AutopilotConfig {
        enabled: true,
        instructions: "Handle my email sensibly.".to_string(),
        mailboxes: vec!["INBOX".to_string()],
        accounts: Some(vec!["Work".to_string()]),
        exclude_senders: vec![],
        exclude_subjects: vec![],
        max_age_days: 7,
        main_account: None,
        quick_rules: vec![],
        aging: AgingConfig::default(),
    }
}

// --- Scripted AI provider ---

pub struct MockAi {
    /// Scripted outcomes, popped per classify call. Err strings become
    /// malformed-response errors.
    pub script: RefCell<VecDeque<Result<Decision, String>>>,
    pub calls: Cell<usize>,
}

impl MockAi {
    pub fn new() -> Self {
        Self {
            script: RefCell::new(VecDeque::new()),
            calls: Cell::new(0),
        }
    }

    pub fn push_decision(&self, decision: Decision) {
        self.script.borrow_mut().push_back(Ok(decision));
    }

    pub fn push_error(&self, error: &str) {
        self.script.borrow_mut().push_back(Err(error.to_string()));
    }
}

impl AiProvider for MockAi {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn autopilot_classify(
        &self,
        _email: &EmailMessage,
        _instructions: &str,
    ) -> Result<Decision, AiError> {
        self.calls.set(self.calls.get() + 1);
        match self.script.borrow_mut().pop_front() {
            Some(Ok(decision)) => Ok(decision),
            Some(Err(error)) => Err(AiError::MalformedResponse(error)),
            None => panic!("MockAi called with an empty script"),
        }
    }

    fn classify(
        &self,
        email: &EmailMessage,
        _context: Option<&str>,
    ) -> Result<Decision, AiError> {
        self.autopilot_classify(email, "")
    }

    fn generate_reply(
        &self,
        _email: &EmailMessage,
        _template: &str,
        _context: Option<&str>,
    ) -> Result<String, AiError> {
        Ok("mock reply".to_string())
    }
}

// --- Recording mail client ---

#[derive(Default)]
pub struct MockMail {
    /// account -> mailbox names
    pub mailboxes: RefCell<HashMap<String, Vec<String>>>,
    /// (mailbox, account) -> messages served by fetch_messages
    pub inbox: RefCell<HashMap<(String, String), Vec<EmailMessage>>>,
    /// id -> message served by fetch_message
    pub by_id: RefCell<HashMap<String, EmailMessage>>,
    /// account:mailbox -> count
    pub counts: RefCell<HashMap<String, u32>>,
    /// id -> content served by load_content
    pub contents: RefCell<HashMap<String, String>>,

    pub moved: RefCell<Vec<(String, String, Option<String>)>>,
    pub deleted: RefCell<Vec<String>>,
    pub read_set: RefCell<Vec<(String, bool)>>,
    pub flagged: RefCell<Vec<(String, bool)>>,
    pub replies: RefCell<Vec<(String, String)>>,
    pub forwards: RefCell<Vec<(String, Vec<String>)>>,
    pub created_folders: RefCell<Vec<(String, String)>>,
    pub batch_calls: RefCell<Vec<Vec<PendingMove>>>,

    /// When set, batch moves report only these ids as succeeded.
    pub batch_success: RefCell<Option<Vec<String>>>,
    /// Inline moves raise a stale-reference error.
    pub stale_on_move: Cell<bool>,
    /// Inline deletes raise a stale-reference error.
    pub stale_on_delete: Cell<bool>,
    /// load_content fails with a script error.
    pub fail_content: Cell<bool>,
}

impl MockMail {
    pub fn new() -> Self {
        let mock = Self::default();
        mock.mailboxes.borrow_mut().insert(
            "Work".to_string(),
            vec![
                "INBOX".to_string(),
                "Archive".to_string(),
                "Receipts".to_string(),
            ],
        );
        mock
    }

    pub fn serve(&self, message: EmailMessage) {
        self.by_id
            .borrow_mut()
            .insert(message.id.clone(), message.clone());
        self.inbox
            .borrow_mut()
            .entry((message.mailbox.clone(), message.account.clone()))
            .or_default()
            .push(message);
    }
}

impl MailClient for MockMail {
    fn list_accounts(&self) -> Result<Vec<MailAccount>, BridgeError> {
        Ok(self
            .mailboxes
            .borrow()
            .keys()
            .map(|name| MailAccount {
                name: name.clone(),
                enabled: true,
            })
            .collect())
    }

    fn list_mailboxes(&self, account: &str) -> Result<Vec<String>, BridgeError> {
        Ok(self
            .mailboxes
            .borrow()
            .get(account)
            .cloned()
            .unwrap_or_default())
    }

    fn create_mailbox(&self, mailbox: &str, account: &str) -> Result<(), BridgeError> {
        self.created_folders
            .borrow_mut()
            .push((mailbox.to_string(), account.to_string()));
        self.mailboxes
            .borrow_mut()
            .entry(account.to_string())
            .or_default()
            .push(mailbox.to_string());
        Ok(())
    }

    fn list_local_mailboxes(&self) -> Result<Vec<String>, BridgeError> {
        self.list_mailboxes("__local__")
    }

    fn create_local_mailbox(&self, mailbox: &str) -> Result<(), BridgeError> {
        self.create_mailbox(mailbox, "__local__")
    }

    fn message_count(&self, account: &str, mailbox: &str) -> Result<u32, BridgeError> {
        Ok(self
            .counts
            .borrow()
            .get(&format!("{}:{}", account, mailbox))
            .copied()
            .unwrap_or(0))
    }

    fn fetch_messages(
        &self,
        mailbox: &str,
        account: Option<&str>,
        limit: usize,
        _unread_only: bool,
    ) -> Result<Vec<EmailMessage>, BridgeError> {
        let key = (
            mailbox.to_string(),
            account.unwrap_or_default().to_string(),
        );
        Ok(self
            .inbox
            .borrow()
            .get(&key)
            .map(|messages| messages.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn fetch_message(&self, id: &str) -> Result<Option<EmailMessage>, BridgeError> {
        Ok(self.by_id.borrow().get(id).cloned())
    }

    fn load_content(&self, id: &str) -> Result<String, BridgeError> {
        if self.fail_content.get() {
            return Err(BridgeError::Script("content load failed".to_string()));
        }
        Ok(self
            .contents
            .borrow()
            .get(id)
            .cloned()
            .unwrap_or_else(|| "default body".to_string()))
    }

    fn move_message(
        &self,
        id: &str,
        target_mailbox: &str,
        target_account: Option<&str>,
        _source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError> {
        if self.stale_on_move.get() {
            return Err(BridgeError::StaleReference("invalid index".to_string()));
        }
        self.moved.borrow_mut().push((
            id.to_string(),
            target_mailbox.to_string(),
            target_account.map(str::to_string),
        ));
        Ok(())
    }

    fn move_messages_batch(&self, moves: &[PendingMove]) -> Result<Vec<String>, BridgeError> {
        self.batch_calls.borrow_mut().push(moves.to_vec());
        match &*self.batch_success.borrow() {
            Some(ids) => Ok(ids.clone()),
            None => Ok(moves.iter().map(|m| m.message_id.clone()).collect()),
        }
    }

    fn delete_message(&self, id: &str, _source: Option<(&str, &str)>) -> Result<(), BridgeError> {
        if self.stale_on_delete.get() {
            return Err(BridgeError::StaleReference("invalid index".to_string()));
        }
        self.deleted.borrow_mut().push(id.to_string());
        Ok(())
    }

    fn set_read(
        &self,
        id: &str,
        read: bool,
        _source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError> {
        self.read_set.borrow_mut().push((id.to_string(), read));
        Ok(())
    }

    fn set_flagged(
        &self,
        id: &str,
        flagged: bool,
        _source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError> {
        self.flagged.borrow_mut().push((id.to_string(), flagged));
        Ok(())
    }

    fn reply(
        &self,
        id: &str,
        body: &str,
        _source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError> {
        self.replies
            .borrow_mut()
            .push((id.to_string(), body.to_string()));
        Ok(())
    }

    fn forward(
        &self,
        id: &str,
        to: &[String],
        _source: Option<(&str, &str)>,
    ) -> Result<(), BridgeError> {
        self.forwards
            .borrow_mut()
            .push((id.to_string(), to.to_vec()));
        Ok(())
    }
}

// --- Inert PIM clients ---

#[derive(Default)]
pub struct MockCalendar {
    pub events: RefCell<Vec<EventDraft>>,
    pub upcoming: RefCell<Vec<String>>,
    pub fail_snapshot: Cell<bool>,
}

impl CalendarClient for MockCalendar {
    fn list_calendars(&self) -> Result<Vec<String>, BridgeError> {
        Ok(vec!["Calendar".to_string()])
    }

    fn create_event(&self, draft: &EventDraft) -> Result<(), BridgeError> {
        self.events.borrow_mut().push(draft.clone());
        Ok(())
    }

    fn upcoming_events(&self, _days: u32) -> Result<Vec<String>, BridgeError> {
        if self.fail_snapshot.get() {
            return Err(BridgeError::NotRunning("Calendar".to_string()));
        }
        Ok(self.upcoming.borrow().clone())
    }
}

#[derive(Default)]
pub struct MockReminders {
    pub created: RefCell<Vec<ReminderDraft>>,
    pub open: RefCell<Vec<String>>,
    pub fail_snapshot: Cell<bool>,
}

impl ReminderClient for MockReminders {
    fn list_lists(&self) -> Result<Vec<String>, BridgeError> {
        Ok(vec!["Reminders".to_string()])
    }

    fn create_reminder(&self, draft: &ReminderDraft) -> Result<(), BridgeError> {
        self.created.borrow_mut().push(draft.clone());
        Ok(())
    }

    fn complete_reminder(&self, _title: &str) -> Result<(), BridgeError> {
        Ok(())
    }

    fn open_reminders(&self) -> Result<Vec<String>, BridgeError> {
        if self.fail_snapshot.get() {
            return Err(BridgeError::NotRunning("Reminders".to_string()));
        }
        Ok(self.open.borrow().clone())
    }
}

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

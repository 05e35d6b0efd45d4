//! Autopilot engine — the per-message decision pipeline and the pass loop.
//!
//! Per message: quick rules, content materialization, AI classification,
//! confidence gate, outbound gate, execution. Moves and archives are
//! buffered and flushed per chunk (see `buffer`); everything else executes
//! inline.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::BTreeMap;

use crate::ai::AiProvider;
use crate::autopilot::buffer::{DeferredRecord, MutationBuffer};
use crate::autopilot::context::situational_context;
use crate::autopilot::folders::{mailbox_list, resolve_folder, FolderOutcome};
use crate::autopilot::rules;
use crate::autopilot::types::{
    ActionSpec, Decision, FolderPolicy, LowConfidenceAction, OutboundPolicy, ProcessResult,
    RunResult, SecondaryAction,
};
use crate::bridge::mail::{EmailMessage, MailClient, PendingMove, VIRTUAL_MAILBOXES};
use crate::bridge::{notify, BridgeError, CalendarClient, ReminderClient};
use crate::config::autopilot::{AutopilotConfig, QuickRule, RuleAction};
use crate::config::settings::{Config, Settings};
use crate::store::Store;
use crate::util::truncate;

/// Retryable failures per (message, stage) before giving up.
pub const FAILURE_THRESHOLD: u32 = 3;

const PROCESSED_ID_WINDOW: usize = 10_000;
const FETCH_CAP: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub verbose: u8,
    pub interactive: bool,
    pub auto_create: bool,
    pub account: Option<String>,
    /// Execute moves directly instead of buffering (approval/retry paths).
    pub direct_moves: bool,
}

/// Run-scoped mutable state, reset at the start of every pass.
pub struct RunContext {
    pub buffer: MutationBuffer,
    /// (folder, account) -> queued action count, for one end-of-run notice.
    pub queued_folders: BTreeMap<(String, String), usize>,
    instructions: String,
}

impl RunContext {
    pub fn new(instructions: String) -> Self {
        Self {
            buffer: MutationBuffer::new(),
            queued_folders: BTreeMap::new(),
            instructions,
        }
    }
}

pub struct Engine<'a> {
    pub config: &'a Config,
    pub autopilot: &'a AutopilotConfig,
    pub store: &'a Store,
    pub ai: &'a dyn AiProvider,
    pub mail: &'a dyn MailClient,
    pub calendar: &'a dyn CalendarClient,
    pub reminders: &'a dyn ReminderClient,
}

impl<'a> Engine<'a> {
    fn settings(&self) -> &Settings {
        &self.config.settings
    }

    /// Run one autopilot pass.
    pub fn run(&self, opts: &RunOptions) -> Result<RunResult> {
        let started_at = Utc::now();
        let batch_size = opts.limit.unwrap_or(self.settings().batch_size);

        let accounts = self.pass_accounts(opts);
        let mut emails = self.fetch_unprocessed(batch_size, &accounts, opts)?;

        let mut result = RunResult::new(started_at, opts.dry_run);
        result.emails_fetched = emails.len();

        let mut ctx = RunContext::new(self.enriched_instructions());

        if opts.verbose >= 1 && !emails.is_empty() {
            println!("\nProcessing {} email(s)...\n", emails.len());
        }

        for email in &mut emails {
            let process_result = match self.process_email(email, &mut ctx, opts) {
                Ok(process_result) => process_result,
                Err(e) => {
                    result.errors += 1;
                    if opts.verbose >= 1 {
                        eprintln!("  ERROR {}: {}", truncate(&email.subject, 40), e);
                    }
                    continue;
                }
            };

            if process_result.skipped {
                result.emails_skipped += 1;
            } else if process_result.queued {
                result.actions_queued += 1;
                result.emails_processed += 1;
            } else if process_result.success {
                result.actions_executed += 1;
                result.emails_processed += 1;
            } else {
                result.errors += 1;
            }

            if opts.verbose >= 1 {
                print_result(email, &process_result);
            }

            // Chunk boundary: flush buffered moves as one batch call.
            if ctx.buffer.len() >= self.settings().flush_batch_size {
                self.flush_buffer(&mut ctx, opts)?;
            }

            // Rate limiting between successive AI calls
            let delay = self.settings().rate_limit_delay_secs;
            if delay > 0.0 && process_result.rule_matched.is_none() && !process_result.skipped {
                std::thread::sleep(std::time::Duration::from_secs_f64(delay));
            }
        }

        self.flush_buffer(&mut ctx, opts)?;
        self.report_queued_folders(&ctx, opts);

        if self.autopilot.aging.enabled {
            let params = super::aging::SweepParams {
                aging: &self.autopilot.aging,
                accounts: &accounts,
                main_account: self.autopilot.main_account.as_deref(),
                cache_ttl_minutes: self.settings().mailbox_cache_ttl_minutes,
                dry_run: opts.dry_run,
                verbose: opts.verbose,
            };
            result.aging = Some(super::aging::run_sweep(self.store, self.mail, &params));
        }

        if !opts.dry_run {
            let removed = self
                .store
                .cleanup_old_records(self.settings().ledger_retention_days)?;
            if removed > 0 && opts.verbose >= 2 {
                println!("Ledger cleanup: removed {} old record(s)", removed);
            }
        }

        result.completed_at = Utc::now();
        Ok(result)
    }

    fn enriched_instructions(&self) -> String {
        let mut instructions = self.autopilot.instructions.clone();
        // Advisory; lookup failures are swallowed inside.
        if let Some(context) = situational_context(self.calendar, self.reminders) {
            instructions.push_str("\n\nCurrent situation (advisory):\n");
            instructions.push_str(&context);
        }
        instructions
    }

    fn pass_accounts(&self, opts: &RunOptions) -> Vec<String> {
        if let Some(account) = &opts.account {
            return vec![account.clone()];
        }
        if let Some(accounts) = &self.autopilot.accounts {
            if !accounts.is_empty() {
                return accounts.clone();
            }
        }
        match self.mail.list_accounts() {
            Ok(list) => list
                .into_iter()
                .filter(|a| a.enabled)
                .map(|a| a.name)
                .filter(|name| {
                    self.config
                        .accounts
                        .get(name)
                        .map(|c| c.enabled)
                        .unwrap_or(true)
                })
                .collect(),
            Err(e) => {
                eprintln!("Warning: failed to list accounts: {}", e);
                vec![]
            }
        }
    }

    /// Fetch candidates, newest first, skipping processed/pending/aged-out
    /// messages, capped at `limit`.
    fn fetch_unprocessed(
        &self,
        limit: usize,
        accounts: &[String],
        opts: &RunOptions,
    ) -> Result<Vec<EmailMessage>> {
        let processed_ids = self.store.get_processed_ids(PROCESSED_ID_WINDOW)?;
        let cutoff = Utc::now() - Duration::days(self.autopilot.max_age_days as i64);

        let mut all_emails: Vec<EmailMessage> = Vec::new();
        for mailbox in &self.autopilot.mailboxes {
            for account in accounts {
                // Fetch extra to survive filtering; capped because host
                // enumeration is roughly a second per message.
                let fetch_limit = (limit * 3).min(FETCH_CAP);
                match self
                    .mail
                    .fetch_messages(mailbox, Some(account), fetch_limit, false)
                {
                    Ok(mut messages) => {
                        for message in &mut messages {
                            // Providers report virtual containers for everything;
                            // keep the mailbox we actually queried.
                            if VIRTUAL_MAILBOXES.contains(&message.mailbox.as_str())
                                || message.mailbox.starts_with("[Gmail]")
                            {
                                message.mailbox = mailbox.clone();
                            }
                        }
                        all_emails.extend(messages);
                    }
                    Err(e) => {
                        eprintln!("Warning: failed to fetch from {} ({}): {}", mailbox, account, e);
                    }
                }
            }
        }

        all_emails.sort_by_key(|e| {
            std::cmp::Reverse(e.date_received.unwrap_or(DateTime::<Utc>::MIN_UTC))
        });

        let mut unprocessed = Vec::new();
        for email in all_emails {
            if email.mailbox.eq_ignore_ascii_case("INBOX") && !opts.dry_run {
                self.store
                    .track_first_seen_if_new(&email.id, &email.mailbox, &email.account)?;
            }
            if processed_ids.contains(&email.id) {
                continue;
            }
            if self.store.has_pending_for_message(&email.id)? {
                continue;
            }
            if let Some(received) = email.date_received {
                if received < cutoff {
                    continue;
                }
            }
            if self.is_excluded(&email) {
                continue;
            }
            unprocessed.push(email);
            if unprocessed.len() >= limit {
                break;
            }
        }
        Ok(unprocessed)
    }

    fn is_excluded(&self, email: &EmailMessage) -> bool {
        let sender = email.sender.to_lowercase();
        let subject = email.subject.to_lowercase();
        self.autopilot
            .exclude_senders
            .iter()
            .any(|p| sender.contains(&p.to_lowercase()))
            || self
                .autopilot
                .exclude_subjects
                .iter()
                .any(|p| subject.contains(&p.to_lowercase()))
    }

    // --- Per-message pipeline ---

    pub fn process_email(
        &self,
        email: &mut EmailMessage,
        ctx: &mut RunContext,
        opts: &RunOptions,
    ) -> Result<ProcessResult> {
        // 1. Quick rules short-circuit the pipeline; AI is never consulted.
        if !self.autopilot.quick_rules.is_empty() {
            if rules::any_rule_needs_content(&self.autopilot.quick_rules)
                && email.content.is_none()
            {
                if let Some(failure) = self.materialize_content(email, opts)? {
                    return Ok(failure);
                }
            }
            if let Some(rule) = rules::find_matching_rule(&self.autopilot.quick_rules, email) {
                return self.apply_quick_rule(email, rule, ctx, opts);
            }
        }

        // 2. The classifier always needs the body.
        if email.content.is_none() {
            if let Some(failure) = self.materialize_content(email, opts)? {
                return Ok(failure);
            }
        }

        // 3. AI classification, with the archive override applied.
        let decision = match self.ai.autopilot_classify(email, &ctx.instructions) {
            Ok(decision) => decision.demote_archive(),
            Err(e) => return self.stage_failure(email, "ai_classification", &e.to_string(), opts),
        };
        if !opts.dry_run {
            self.store.clear_rule_failures(&email.id, "ai_classification")?;
        }

        // 4. Confidence gate
        if decision.confidence < self.settings().confidence_threshold {
            return self.handle_low_confidence(email, &decision, opts);
        }

        // 5. Outbound gate
        if decision.is_outbound() {
            return self.handle_outbound(email, decision, ctx, opts);
        }

        // 6. Execute
        self.execute_action(email, decision, ctx, opts)
    }

    /// Load the body on demand. Returns Some(result) when loading failed and
    /// the message should be reported instead of processed further.
    fn materialize_content(
        &self,
        email: &mut EmailMessage,
        opts: &RunOptions,
    ) -> Result<Option<ProcessResult>> {
        match self.mail.load_content(&email.id) {
            Ok(content) => {
                email.content = Some(content);
                if !opts.dry_run {
                    self.store.clear_rule_failures(&email.id, "content_loading")?;
                }
                Ok(None)
            }
            Err(e) => Ok(Some(self.stage_failure(
                email,
                "content_loading",
                &e.to_string(),
                opts,
            )?)),
        }
    }

    /// Retryable failure bookkeeping: count, report, and at the threshold
    /// force-mark processed so the message stops looping.
    fn stage_failure(
        &self,
        email: &EmailMessage,
        stage: &str,
        error: &str,
        opts: &RunOptions,
    ) -> Result<ProcessResult> {
        if opts.dry_run {
            return Ok(ProcessResult::failed(
                &email.id,
                format!("{stage}: {error}"),
            ));
        }

        let count = self.store.increment_rule_failure(&email.id, stage, error)?;
        if count >= FAILURE_THRESHOLD {
            let action_name = if stage == "ai_classification" {
                "classification_failed".to_string()
            } else {
                format!("{stage}_failed")
            };
            let action = json!({"action": action_name, "stage": stage, "error": error});
            self.store.mark_processed(
                &email.id,
                &email.mailbox,
                &email.account,
                &email.subject,
                &email.sender,
                &action,
                0.0,
            )?;
            self.store.clear_rule_failures(&email.id, stage)?;
            self.store
                .log_action(&email.id, &action_name, "autopilot", Some(&action))?;

            let mut result = ProcessResult::failed(&email.id, error);
            result.action = Some(action_name);
            result.reason = Some(format!("gave up after {count} failure(s)"));
            return Ok(result);
        }

        Ok(ProcessResult::failed(
            &email.id,
            format!("{stage} failed (attempt {count}/{FAILURE_THRESHOLD}): {error}"),
        ))
    }

    // --- Quick rules ---

    fn apply_quick_rule(
        &self,
        email: &EmailMessage,
        rule: &QuickRule,
        ctx: &mut RunContext,
        opts: &RunOptions,
    ) -> Result<ProcessResult> {
        let label = rule
            .actions
            .iter()
            .map(rule_action_name)
            .collect::<Vec<_>>()
            .join("+");

        let mut result = ProcessResult::success(&email.id, &label, format!("rule '{}'", rule.name));
        result.rule_matched = Some(rule.name.clone());
        result.target_folder = rule.folder.clone();

        if opts.dry_run {
            result.action = Some(format!("[dry-run] {label}"));
            return Ok(result);
        }

        let rule_record = json!({
            "action": label,
            "rule": rule.name,
            "folder": rule.folder,
        });
        let target_account = self.move_target_account(email);
        let mut buffered = false;

        for action in &rule.actions {
            match action {
                RuleAction::Ignore => {}
                RuleAction::MarkRead => {
                    if let Err(e) = self.mail.set_read(
                        &email.id,
                        true,
                        Some((&email.mailbox, &email.account)),
                    ) {
                        return self.rule_bridge_failure(email, rule, &rule_record, e, opts);
                    }
                }
                RuleAction::Flag => {
                    if let Err(e) = self.mail.set_flagged(
                        &email.id,
                        true,
                        Some((&email.mailbox, &email.account)),
                    ) {
                        return self.rule_bridge_failure(email, rule, &rule_record, e, opts);
                    }
                }
                RuleAction::Delete => {
                    if let Err(e) = self
                        .mail
                        .delete_message(&email.id, Some((&email.mailbox, &email.account)))
                    {
                        return self.rule_bridge_failure(email, rule, &rule_record, e, opts);
                    }
                    // The message is gone; nothing after delete is meaningful.
                    self.mark_processed_value(email, &rule_record, 1.0)?;
                    self.store.remove_first_seen(&email.id)?;
                    return Ok(result);
                }
                RuleAction::Archive => {
                    self.queue_buffered_move(
                        email,
                        "Archive",
                        &target_account,
                        &rule_record,
                        1.0,
                        &mut buffered,
                        ctx,
                    );
                }
                RuleAction::Move => {
                    let Some(folder) = &rule.folder else {
                        return Ok(ProcessResult::failed(
                            &email.id,
                            format!("rule '{}' has a move action without a folder", rule.name),
                        ));
                    };
                    let policy = self.effective_policy(&target_account, opts);
                    match resolve_folder(
                        self.store,
                        self.mail,
                        folder,
                        &target_account,
                        policy,
                        self.settings().mailbox_cache_ttl_minutes,
                    )? {
                        FolderOutcome::Ready { folder: canonical } => {
                            self.queue_buffered_move(
                                email,
                                &canonical,
                                &target_account,
                                &rule_record,
                                1.0,
                                &mut buffered,
                                ctx,
                            );
                            result.target_folder = Some(canonical);
                        }
                        FolderOutcome::Queue => {
                            let decision = Decision::new(
                                ActionSpec::Move {
                                    folder: folder.clone(),
                                    account: Some(target_account.clone()),
                                },
                                1.0,
                                format!("rule '{}'", rule.name),
                            )?;
                            self.queue_folder_pending(email, &decision, folder, &target_account, ctx)?;
                            let mut queued =
                                ProcessResult::queued(&email.id, format!("folder '{}' missing", folder));
                            queued.rule_matched = Some(rule.name.clone());
                            return Ok(queued);
                        }
                        FolderOutcome::Skip => {
                            let mut skipped =
                                ProcessResult::skipped(&email.id, "folder creation skipped");
                            skipped.rule_matched = Some(rule.name.clone());
                            return Ok(skipped);
                        }
                    }
                }
            }
        }

        if !buffered {
            self.mark_processed_value(email, &rule_record, 1.0)?;
        }
        Ok(result)
    }

    fn rule_bridge_failure(
        &self,
        email: &EmailMessage,
        rule: &QuickRule,
        rule_record: &serde_json::Value,
        e: BridgeError,
        opts: &RunOptions,
    ) -> Result<ProcessResult> {
        if e.is_stale_reference() {
            self.mark_processed_value(email, rule_record, 1.0)?;
            let mut result = ProcessResult::success(&email.id, "none", "already moved");
            result.rule_matched = Some(rule.name.clone());
            return Ok(result);
        }
        let mut result = self.stage_failure(email, "rule_execution", &e.to_string(), opts)?;
        result.rule_matched = Some(rule.name.clone());
        Ok(result)
    }

    // --- Gates ---

    fn handle_low_confidence(
        &self,
        email: &EmailMessage,
        decision: &Decision,
        opts: &RunOptions,
    ) -> Result<ProcessResult> {
        let reason = format!("Low confidence ({:.0}%)", decision.confidence * 100.0);
        match self.settings().low_confidence_action {
            LowConfidenceAction::FlagForReview => {
                if !opts.dry_run {
                    if let Err(e) = self.mail.set_flagged(
                        &email.id,
                        true,
                        Some((&email.mailbox, &email.account)),
                    ) {
                        return self.bridge_failure(email, decision, e, opts);
                    }
                    self.mark_processed_decision(email, decision)?;
                }
                Ok(ProcessResult::success(&email.id, "flag", reason))
            }
            LowConfidenceAction::Skip => Ok(ProcessResult::skipped(&email.id, reason)),
            LowConfidenceAction::QueueForApproval => {
                if !opts.dry_run {
                    self.store.add_pending_action(
                        &email.id,
                        &email.summary(),
                        decision,
                        &decision.reasoning,
                    )?;
                }
                Ok(ProcessResult::queued(&email.id, reason))
            }
        }
    }

    fn handle_outbound(
        &self,
        email: &EmailMessage,
        decision: Decision,
        ctx: &mut RunContext,
        opts: &RunOptions,
    ) -> Result<ProcessResult> {
        match self.settings().outbound_policy {
            OutboundPolicy::RequireApproval => {
                if !opts.dry_run {
                    let reasoning = format!("[Outbound] {}", decision.reasoning);
                    self.store
                        .add_pending_action(&email.id, &email.summary(), &decision, &reasoning)?;
                }
                Ok(ProcessResult::queued(&email.id, "Outbound requires approval"))
            }
            OutboundPolicy::AllowHighConfidence => {
                if decision.confidence >= self.settings().outbound_confidence_threshold {
                    self.execute_action(email, decision, ctx, opts)
                } else {
                    let reason = format!(
                        "Outbound confidence ({:.0}%) below threshold",
                        decision.confidence * 100.0
                    );
                    if !opts.dry_run {
                        let reasoning = format!("[Outbound low confidence] {}", decision.reasoning);
                        self.store.add_pending_action(
                            &email.id,
                            &email.summary(),
                            &decision,
                            &reasoning,
                        )?;
                    }
                    Ok(ProcessResult::queued(&email.id, reason))
                }
            }
            OutboundPolicy::FullAutopilot => self.execute_action(email, decision, ctx, opts),
        }
    }

    // --- Execution ---

    pub fn execute_action(
        &self,
        email: &EmailMessage,
        mut decision: Decision,
        ctx: &mut RunContext,
        opts: &RunOptions,
    ) -> Result<ProcessResult> {
        let action_name = decision.action.name();

        if opts.dry_run {
            return Ok(ProcessResult::success(
                &email.id,
                &format!("[dry-run] {action_name}"),
                decision.reasoning.clone(),
            ));
        }

        let source = (email.mailbox.as_str(), email.account.as_str());

        match decision.action.clone() {
            ActionSpec::Move { folder, account } => {
                let target_account = account
                    .or_else(|| self.autopilot.main_account.clone())
                    .unwrap_or_else(|| email.account.clone());
                let policy = self.effective_policy(&target_account, opts);
                match resolve_folder(
                    self.store,
                    self.mail,
                    &folder,
                    &target_account,
                    policy,
                    self.settings().mailbox_cache_ttl_minutes,
                )? {
                    FolderOutcome::Ready { folder: canonical } => {
                        if canonical != folder {
                            decision.substitute_folder(&canonical);
                        }
                        if opts.direct_moves {
                            if let Err(e) = self.mail.move_message(
                                &email.id,
                                &canonical,
                                Some(&target_account),
                                Some(source),
                            ) {
                                return self.bridge_failure(email, &decision, e, opts);
                            }
                            self.mark_processed_decision(email, &decision)?;
                            self.store.remove_first_seen(&email.id)?;
                        } else {
                            let record = serde_json::to_value(&decision)?;
                            ctx.buffer.queue_move(
                                PendingMove {
                                    message_id: email.id.clone(),
                                    target_mailbox: canonical.clone(),
                                    target_account: Some(target_account.clone()),
                                    source_mailbox: email.mailbox.clone(),
                                    source_account: email.account.clone(),
                                },
                                DeferredRecord {
                                    message_id: email.id.clone(),
                                    mailbox: email.mailbox.clone(),
                                    account: email.account.clone(),
                                    subject: email.subject.clone(),
                                    sender: email.sender.clone(),
                                    action: record,
                                    confidence: decision.confidence,
                                },
                            );
                        }
                        self.run_secondary(email, &decision, ctx, opts);
                        let mut result = ProcessResult::success(
                            &email.id,
                            "move",
                            decision.reasoning.clone(),
                        );
                        result.target_folder = Some(canonical);
                        Ok(result)
                    }
                    FolderOutcome::Queue => {
                        self.queue_folder_pending(email, &decision, &folder, &target_account, ctx)?;
                        Ok(ProcessResult::queued(
                            &email.id,
                            format!("folder '{}' missing", folder),
                        ))
                    }
                    FolderOutcome::Skip => {
                        Ok(ProcessResult::skipped(&email.id, "folder creation skipped"))
                    }
                }
            }

            ActionSpec::Archive => {
                let target_account = self.move_target_account(email);
                if opts.direct_moves {
                    if let Err(e) = self.mail.move_message(
                        &email.id,
                        "Archive",
                        Some(&target_account),
                        Some(source),
                    ) {
                        return self.bridge_failure(email, &decision, e, opts);
                    }
                    self.mark_processed_decision(email, &decision)?;
                    self.store.remove_first_seen(&email.id)?;
                } else {
                    let record = serde_json::to_value(&decision)?;
                    ctx.buffer.queue_move(
                        PendingMove {
                            message_id: email.id.clone(),
                            target_mailbox: "Archive".to_string(),
                            target_account: Some(target_account),
                            source_mailbox: email.mailbox.clone(),
                            source_account: email.account.clone(),
                        },
                        DeferredRecord {
                            message_id: email.id.clone(),
                            mailbox: email.mailbox.clone(),
                            account: email.account.clone(),
                            subject: email.subject.clone(),
                            sender: email.sender.clone(),
                            action: record,
                            confidence: decision.confidence,
                        },
                    );
                }
                self.run_secondary(email, &decision, ctx, opts);
                let mut result =
                    ProcessResult::success(&email.id, "archive", decision.reasoning.clone());
                result.target_folder = Some("Archive".to_string());
                Ok(result)
            }

            ActionSpec::Delete => {
                if let Err(e) = self.mail.delete_message(&email.id, Some(source)) {
                    return self.bridge_failure(email, &decision, e, opts);
                }
                self.mark_processed_decision(email, &decision)?;
                self.store.remove_first_seen(&email.id)?;
                // Message is in the trash; secondary actions are moot.
                Ok(ProcessResult::success(
                    &email.id,
                    "delete",
                    decision.reasoning.clone(),
                ))
            }

            ActionSpec::MarkRead => {
                self.inline_then_finish(email, &decision, ctx, opts, |mail| {
                    mail.set_read(&email.id, true, Some(source))
                })
            }
            ActionSpec::MarkUnread => {
                self.inline_then_finish(email, &decision, ctx, opts, |mail| {
                    mail.set_read(&email.id, false, Some(source))
                })
            }
            ActionSpec::Flag => self.inline_then_finish(email, &decision, ctx, opts, |mail| {
                mail.set_flagged(&email.id, true, Some(source))
            }),
            ActionSpec::Unflag => self.inline_then_finish(email, &decision, ctx, opts, |mail| {
                mail.set_flagged(&email.id, false, Some(source))
            }),

            ActionSpec::Reply { body } => {
                self.inline_then_finish(email, &decision, ctx, opts, |mail| {
                    mail.reply(&email.id, &body, Some(source))
                })
            }
            ActionSpec::Forward { to } => {
                self.inline_then_finish(email, &decision, ctx, opts, |mail| {
                    mail.forward(&email.id, &to, Some(source))
                })
            }

            ActionSpec::CreateReminder { title, due, list } => {
                if self.store.has_pim_link(&email.id, "reminder")? {
                    self.mark_processed_decision(email, &decision)?;
                    return Ok(ProcessResult::success(
                        &email.id,
                        "create_reminder",
                        "reminder already exists",
                    ));
                }
                let draft = crate::bridge::ReminderDraft {
                    title,
                    due,
                    list,
                    notes: Some(email.summary()),
                };
                if let Err(e) = self.reminders.create_reminder(&draft) {
                    return self.stage_failure(email, "execution", &e.to_string(), opts);
                }
                self.store.add_pim_link(&email.id, "reminder")?;
                self.mark_processed_decision(email, &decision)?;
                self.run_secondary(email, &decision, ctx, opts);
                Ok(ProcessResult::success(
                    &email.id,
                    "create_reminder",
                    decision.reasoning.clone(),
                ))
            }

            ActionSpec::CreateEvent {
                summary,
                start,
                end,
                calendar,
                all_day,
            } => {
                if self.store.has_pim_link(&email.id, "event")? {
                    self.mark_processed_decision(email, &decision)?;
                    return Ok(ProcessResult::success(
                        &email.id,
                        "create_event",
                        "event already exists",
                    ));
                }
                let draft = crate::bridge::EventDraft {
                    summary,
                    start,
                    end,
                    calendar,
                    all_day,
                };
                if let Err(e) = self.calendar.create_event(&draft) {
                    return self.stage_failure(email, "execution", &e.to_string(), opts);
                }
                self.store.add_pim_link(&email.id, "event")?;
                self.mark_processed_decision(email, &decision)?;
                self.run_secondary(email, &decision, ctx, opts);
                Ok(ProcessResult::success(
                    &email.id,
                    "create_event",
                    decision.reasoning.clone(),
                ))
            }

            ActionSpec::Ignore => {
                self.mark_processed_decision(email, &decision)?;
                self.run_secondary(email, &decision, ctx, opts);
                Ok(ProcessResult::success(
                    &email.id,
                    "ignore",
                    decision.reasoning.clone(),
                ))
            }
        }
    }

    /// Inline bridge op, then ledger commit and secondary action.
    fn inline_then_finish(
        &self,
        email: &EmailMessage,
        decision: &Decision,
        ctx: &mut RunContext,
        opts: &RunOptions,
        op: impl FnOnce(&dyn MailClient) -> Result<(), BridgeError>,
    ) -> Result<ProcessResult> {
        if let Err(e) = op(self.mail) {
            return self.bridge_failure(email, decision, e, opts);
        }
        self.mark_processed_decision(email, decision)?;
        self.run_secondary(email, decision, ctx, opts);
        Ok(ProcessResult::success(
            &email.id,
            decision.action.name(),
            decision.reasoning.clone(),
        ))
    }

    /// Secondary actions are best-effort: a failure is logged, never fatal.
    fn run_secondary(
        &self,
        email: &EmailMessage,
        decision: &Decision,
        ctx: &mut RunContext,
        opts: &RunOptions,
    ) {
        let Some(secondary) = &decision.secondary else {
            return;
        };
        let source = Some((email.mailbox.as_str(), email.account.as_str()));
        let outcome: Result<(), String> = match secondary {
            SecondaryAction::MarkRead => self
                .mail
                .set_read(&email.id, true, source)
                .map_err(|e| e.to_string()),
            SecondaryAction::MarkUnread => self
                .mail
                .set_read(&email.id, false, source)
                .map_err(|e| e.to_string()),
            SecondaryAction::Flag => self
                .mail
                .set_flagged(&email.id, true, source)
                .map_err(|e| e.to_string()),
            SecondaryAction::Unflag => self
                .mail
                .set_flagged(&email.id, false, source)
                .map_err(|e| e.to_string()),
            SecondaryAction::Archive | SecondaryAction::Move { .. } => {
                let target_account = self.move_target_account(email);
                let folder = match secondary {
                    SecondaryAction::Move { folder } => folder.as_str(),
                    _ => "Archive",
                };
                let resolved = if folder == "Archive" {
                    Ok(FolderOutcome::Ready {
                        folder: "Archive".to_string(),
                    })
                } else {
                    resolve_folder(
                        self.store,
                        self.mail,
                        folder,
                        &target_account,
                        // Never queue durable rows for a secondary
                        match self.effective_policy(&target_account, opts) {
                            FolderPolicy::AutoCreate => FolderPolicy::AutoCreate,
                            _ => FolderPolicy::Queue,
                        },
                        self.settings().mailbox_cache_ttl_minutes,
                    )
                    .map_err(|e| e.to_string())
                };
                match resolved {
                    Ok(FolderOutcome::Ready { folder: canonical }) => {
                        if opts.direct_moves {
                            self.mail
                                .move_message(
                                    &email.id,
                                    &canonical,
                                    Some(&target_account),
                                    source,
                                )
                                .map_err(|e| e.to_string())
                        } else {
                            ctx.buffer.queue_move_only(PendingMove {
                                message_id: email.id.clone(),
                                target_mailbox: canonical,
                                target_account: Some(target_account),
                                source_mailbox: email.mailbox.clone(),
                                source_account: email.account.clone(),
                            });
                            Ok(())
                        }
                    }
                    Ok(_) => Err(format!("folder '{}' missing", folder)),
                    Err(e) => Err(e),
                }
            }
        };
        if let Err(e) = outcome {
            if opts.verbose >= 1 {
                eprintln!("  Secondary {} failed: {}", secondary.name(), e);
            }
            let _ = self.store.log_action(
                &email.id,
                &format!("secondary_{}_failed", secondary.name()),
                "autopilot",
                Some(&json!({"error": e})),
            );
        }
    }

    /// A stale reference means the message already left its mailbox; recover
    /// as success so the reference stops being retried.
    fn bridge_failure(
        &self,
        email: &EmailMessage,
        decision: &Decision,
        e: BridgeError,
        opts: &RunOptions,
    ) -> Result<ProcessResult> {
        if e.is_stale_reference() {
            self.mark_processed_decision(email, decision)?;
            return Ok(ProcessResult::success(
                &email.id,
                decision.action.name(),
                "already moved",
            ));
        }
        self.stage_failure(email, "execution", &e.to_string(), opts)
    }

    // --- Shared helpers ---

    fn effective_policy(&self, account: &str, opts: &RunOptions) -> FolderPolicy {
        if opts.auto_create {
            FolderPolicy::AutoCreate
        } else if opts.interactive {
            FolderPolicy::Interactive
        } else {
            self.config.folder_policy(account)
        }
    }

    fn move_target_account(&self, email: &EmailMessage) -> String {
        self.autopilot
            .main_account
            .clone()
            .unwrap_or_else(|| email.account.clone())
    }

    fn queue_folder_pending(
        &self,
        email: &EmailMessage,
        decision: &Decision,
        folder: &str,
        account: &str,
        ctx: &mut RunContext,
    ) -> Result<()> {
        self.store.add_pending_folder_action(
            &email.id,
            &email.summary(),
            decision,
            &decision.reasoning,
            folder,
            account,
        )?;
        *ctx
            .queued_folders
            .entry((folder.to_string(), account.to_string()))
            .or_insert(0) += 1;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn queue_buffered_move(
        &self,
        email: &EmailMessage,
        folder: &str,
        account: &str,
        record: &serde_json::Value,
        confidence: f64,
        buffered: &mut bool,
        ctx: &mut RunContext,
    ) {
        let mv = PendingMove {
            message_id: email.id.clone(),
            target_mailbox: folder.to_string(),
            target_account: Some(account.to_string()),
            source_mailbox: email.mailbox.clone(),
            source_account: email.account.clone(),
        };
        if *buffered {
            // One deferred ledger record per message is enough.
            ctx.buffer.queue_move_only(mv);
        } else {
            ctx.buffer.queue_move(
                mv,
                DeferredRecord {
                    message_id: email.id.clone(),
                    mailbox: email.mailbox.clone(),
                    account: email.account.clone(),
                    subject: email.subject.clone(),
                    sender: email.sender.clone(),
                    action: record.clone(),
                    confidence,
                },
            );
            *buffered = true;
        }
    }

    fn mark_processed_decision(&self, email: &EmailMessage, decision: &Decision) -> Result<()> {
        let value = serde_json::to_value(decision)?;
        self.mark_processed_value(email, &value, decision.confidence)
    }

    fn mark_processed_value(
        &self,
        email: &EmailMessage,
        action: &serde_json::Value,
        confidence: f64,
    ) -> Result<()> {
        self.store.mark_processed(
            &email.id,
            &email.mailbox,
            &email.account,
            &email.subject,
            &email.sender,
            action,
            confidence,
        )?;
        self.store.clear_all_failures_for(&email.id)?;
        self.store.log_action(
            &email.id,
            action["action"].as_str().unwrap_or("unknown"),
            "autopilot",
            Some(action),
        )?;
        Ok(())
    }

    fn flush_buffer(&self, ctx: &mut RunContext, opts: &RunOptions) -> Result<()> {
        if ctx.buffer.is_empty() {
            return Ok(());
        }
        let outcome = ctx.buffer.flush(self.mail, self.store)?;
        if opts.verbose >= 2 {
            println!(
                "  Flushed batch: {} moved, {} committed, {} unconfirmed",
                outcome.moved, outcome.committed, outcome.failed
            );
        }
        if outcome.failed > 0 {
            eprintln!(
                "  {} move(s) unconfirmed by the host; they stay unprocessed and retry next pass",
                outcome.failed
            );
        }
        Ok(())
    }

    fn report_queued_folders(&self, ctx: &RunContext, opts: &RunOptions) {
        if ctx.queued_folders.is_empty() {
            return;
        }
        let total: usize = ctx.queued_folders.values().sum();
        println!(
            "\n{} action(s) queued awaiting {} new folder(s):",
            total,
            ctx.queued_folders.len()
        );
        for ((folder, account), count) in &ctx.queued_folders {
            println!("  {} ({}) - {} message(s)", folder, account, count);
        }
        println!("Create them (or use --auto-create) and run 'mailpilot retry-folders'.");
        if !opts.dry_run {
            notify(
                "mailpilot",
                &format!(
                    "{} action(s) waiting on {} new folder(s)",
                    total,
                    ctx.queued_folders.len()
                ),
            );
        }
    }

    // --- Approval queue execution ---

    /// Execute a queued pending action after approval.
    pub fn execute_pending_action(&self, action_id: i64) -> Result<ProcessResult> {
        let Some(row) = self.store.get_pending_action(action_id)? else {
            return Ok(ProcessResult::failed("unknown", "pending action not found"));
        };
        if row.status != "pending" {
            return Ok(ProcessResult::failed(
                &row.message_id,
                format!("already resolved ({})", row.status),
            ));
        }

        let Some(email) = self.mail.fetch_message(&row.message_id)? else {
            self.store.update_pending_status(action_id, "rejected")?;
            return Ok(ProcessResult::failed(
                &row.message_id,
                "email no longer exists",
            ));
        };

        let opts = RunOptions {
            direct_moves: true,
            ..Default::default()
        };
        let mut ctx = RunContext::new(String::new());
        let result = self.execute_action(&email, row.decision, &mut ctx, &opts)?;
        self.flush_buffer(&mut ctx, &opts)?;

        if result.success {
            self.store.update_pending_status(action_id, "approved")?;
        } else {
            self.store.update_pending_status(action_id, "rejected")?;
        }
        Ok(result)
    }

    /// Re-check every distinct pending (folder, account); execute and clear
    /// what can now proceed.
    pub fn retry_pending_folders(&self) -> Result<()> {
        let pending = self.store.get_pending_folders(None)?;
        if pending.is_empty() {
            println!("No actions waiting on folders.");
            return Ok(());
        }

        let opts = RunOptions {
            direct_moves: true,
            ..Default::default()
        };
        let mut executed = 0;
        let mut still_waiting = 0;

        for pf in pending {
            // The folder may have just been created; don't trust the cache.
            self.store.clear_mailbox_cache(Some(&pf.account))?;
            let existing = mailbox_list(
                self.store,
                self.mail,
                &pf.account,
                self.settings().mailbox_cache_ttl_minutes,
            )?;
            if !existing
                .iter()
                .any(|name| name.eq_ignore_ascii_case(&pf.folder))
            {
                println!(
                    "  Still missing: {} ({}) - {} message(s) waiting",
                    pf.folder, pf.account, pf.message_count
                );
                still_waiting += pf.message_count;
                continue;
            }

            for row in self.store.get_actions_for_folder(&pf.folder, &pf.account)? {
                match self.mail.fetch_message(&row.message_id)? {
                    None => {
                        // Nothing left to act on
                        self.store.remove_pending_action(row.id)?;
                    }
                    Some(email) => {
                        let mut ctx = RunContext::new(String::new());
                        let result =
                            self.execute_action(&email, row.decision.clone(), &mut ctx, &opts)?;
                        if result.success {
                            self.store.remove_pending_action(row.id)?;
                            executed += 1;
                        } else {
                            eprintln!(
                                "  Failed to execute queued action for {}: {}",
                                row.email_summary,
                                result.error.as_deref().unwrap_or("unknown error")
                            );
                        }
                    }
                }
            }
        }

        println!(
            "Retry complete: {} executed, {} still waiting on folders.",
            executed, still_waiting
        );
        Ok(())
    }
}

fn rule_action_name(action: &RuleAction) -> &'static str {
    match action {
        RuleAction::Delete => "delete",
        RuleAction::Move => "move",
        RuleAction::Archive => "archive",
        RuleAction::MarkRead => "mark_read",
        RuleAction::Flag => "flag",
        RuleAction::Ignore => "ignore",
    }
}

fn print_result(email: &EmailMessage, result: &ProcessResult) {
    let subject = truncate(&email.subject, 50);
    if result.skipped {
        println!("  SKIP  {}", subject);
        if let Some(reason) = &result.reason {
            println!("        {}", reason);
        }
    } else if result.queued {
        println!("  QUEUE {}", subject);
        if let Some(reason) = &result.reason {
            println!("        {}", reason);
        }
    } else if result.success {
        println!(
            "  {} {}",
            result.action.as_deref().unwrap_or("OK").to_uppercase(),
            subject
        );
        if let Some(reason) = &result.reason {
            println!("        {}", reason);
        }
    } else {
        println!("  ERROR {}", subject);
        if let Some(error) = &result.error {
            println!("        {}", error);
        }
    }
}

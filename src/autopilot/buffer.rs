//! Mutation buffer — moves are queued per chunk and flushed as one batch
//! call, then reconciled against the ids the host actually moved.

use anyhow::Result;

use crate::bridge::mail::{MailClient, PendingMove};
use crate::store::Store;

/// A "mark processed" record deferred until its move is confirmed.
#[derive(Debug, Clone)]
pub struct DeferredRecord {
    pub message_id: String,
    pub mailbox: String,
    pub account: String,
    pub subject: String,
    pub sender: String,
    pub action: serde_json::Value,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FlushOutcome {
    pub moved: usize,
    pub committed: usize,
    pub failed: usize,
}

/// Buffered moves for the current processing chunk.
#[derive(Default)]
pub struct MutationBuffer {
    moves: Vec<PendingMove>,
    deferred: Vec<DeferredRecord>,
}

impl MutationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Queue a move whose ledger commit waits for batch confirmation.
    pub fn queue_move(&mut self, mv: PendingMove, deferred: DeferredRecord) {
        self.moves.push(mv);
        self.deferred.push(deferred);
    }

    /// Queue a move with no ledger consequence (secondary actions).
    pub fn queue_move_only(&mut self, mv: PendingMove) {
        self.moves.push(mv);
    }

    /// Submit all queued moves as one batch and commit only the deferred
    /// records whose ids the host confirmed. Unconfirmed messages stay
    /// unprocessed and are retried next pass.
    pub fn flush(&mut self, mail: &dyn MailClient, store: &Store) -> Result<FlushOutcome> {
        if self.moves.is_empty() {
            self.deferred.clear();
            return Ok(FlushOutcome::default());
        }

        let moves = std::mem::take(&mut self.moves);
        let deferred = std::mem::take(&mut self.deferred);

        let succeeded = mail.move_messages_batch(&moves)?;
        let succeeded: std::collections::HashSet<&str> =
            succeeded.iter().map(String::as_str).collect();

        let mut outcome = FlushOutcome {
            moved: succeeded.len(),
            ..Default::default()
        };

        for record in deferred {
            if succeeded.contains(record.message_id.as_str()) {
                store.mark_processed(
                    &record.message_id,
                    &record.mailbox,
                    &record.account,
                    &record.subject,
                    &record.sender,
                    &record.action,
                    record.confidence,
                )?;
                store.clear_all_failures_for(&record.message_id)?;
                store.remove_first_seen(&record.message_id)?;
                let action_name = record.action["action"].as_str().unwrap_or("move");
                store.log_action(&record.message_id, action_name, "autopilot", Some(&record.action))?;
                outcome.committed += 1;
            } else {
                outcome.failed += 1;
            }
        }
        Ok(outcome)
    }
}

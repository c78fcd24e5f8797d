//! Optimistic ledger for not-yet-confirmed user messages
//!
//! User input must appear the instant it is submitted and disappear
//! exactly once the authoritative log subsumes it. The ledger keeps those
//! in-flight messages in a collection separate from the authoritative
//! log; the two are only combined at the read boundary, so the merge
//! algorithm never sees speculative state.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::log_store::LogStore;
use crate::types::{LogEntry, USER_KIND};

/// A locally created user message awaiting backend confirmation.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    /// Globally unique client-generated id, sent as `message_id`
    pub message_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl PendingMessage {
    /// Create a pending message with a fresh UUID.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    /// Project this message as a provisional log entry.
    fn to_entry(&self) -> LogEntry {
        LogEntry {
            no: None,
            id: Some(self.message_id.clone()),
            kind: USER_KIND.to_string(),
            heading: Some("User message".to_string()),
            content: Some(self.text.clone()),
            kvps: None,
            received_at: self.created_at,
            provisional: true,
        }
    }
}

/// Tracks client-issued messages until the authoritative log contains them.
///
/// Retirement is monotonic: once a message is retired it never reappears,
/// and a send failure does not retract it (the backend may have received
/// the message even though the response was lost).
#[derive(Debug, Default)]
pub struct OptimisticLedger {
    pending: Vec<PendingMessage>,
}

impl OptimisticLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message to the ledger. Called synchronously on submit,
    /// before any network request is made.
    pub fn record(&mut self, message: PendingMessage) {
        self.pending.push(message);
    }

    /// Drop every pending message the authoritative log now contains.
    ///
    /// A message is confirmed when an authoritative entry carries its id,
    /// or (when the backend does not echo client ids) when a user-kind
    /// entry's trimmed content matches its trimmed text. The content match
    /// is a best-effort approximation: two identical texts submitted in
    /// quick succession can be conflated. Returns the number retired.
    pub fn retire_confirmed(&mut self, log: &LogStore) -> usize {
        let before = self.pending.len();
        self.pending.retain(|message| !is_confirmed(message, log));
        before - self.pending.len()
    }

    /// Provisional entries for every message still pending.
    pub fn pending_entries(&self) -> Vec<LogEntry> {
        self.pending.iter().map(PendingMessage::to_entry).collect()
    }

    /// The exposed read view: authoritative entries in authoritative
    /// order, then unretired provisional entries. A confirmed entry is
    /// already present at its stable position when the provisional one
    /// vanishes, so nothing visually jumps.
    pub fn merged_view(&self, log: &LogStore) -> Vec<LogEntry> {
        let mut view = log.to_vec();
        view.extend(self.pending_entries());
        view
    }

    /// Forget all pending messages (explicit context switch).
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn is_confirmed(message: &PendingMessage, log: &LogStore) -> bool {
    let text = message.text.trim();
    log.entries().any(|entry| {
        if entry.id.as_deref() == Some(message.message_id.as_str()) {
            return true;
        }
        entry.kind == USER_KIND && entry.trimmed_content() == Some(text)
    })
}

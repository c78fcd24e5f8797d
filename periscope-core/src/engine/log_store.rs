//! Authoritative log storage and snapshot reconciliation
//!
//! [`LogStore`] owns the session-bound view of the backend log: entries
//! with a backend-assigned position live in a position-keyed map, entries
//! that only ever arrive appended live in a receipt-ordered list, and a
//! guid/version cursor decides how each poll response is applied.
//!
//! Three application paths exist:
//! - **Session replacement**: the response's `log_guid` differs from an
//!   already-established one; the whole log is rebuilt from the response.
//! - **Incremental merge**: positioned entries overwrite their slot (the
//!   server is authoritative for it), unpositioned entries append.
//! - **Stale rejection**: a response reporting a version at or below the
//!   stored one is a duplicate or out-of-order reply; the log portion is
//!   ignored so state never rolls back.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::gateway::wire::{LogItem, PollResponse};
use crate::types::LogEntry;

/// How a poll response was applied to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Log identity changed; store rebuilt from this response alone
    Replaced {
        /// Entries in the rebuilt log
        entries: usize,
    },
    /// Entries merged into the existing log
    Merged {
        /// Entries written or appended
        merged: usize,
    },
    /// Response version at or below the stored one; log left untouched
    StaleLog,
    /// Empty entry list, no version advance; nothing to do
    Heartbeat,
}

/// The authoritative, session-bound log plus its sync cursor.
#[derive(Debug, Default)]
pub struct LogStore {
    /// Entries keyed by backend-assigned position
    sequenced: BTreeMap<u64, LogEntry>,
    /// Entries without a position, in receipt order
    appended: Vec<LogEntry>,
    /// Backend log identity; empty until first established
    guid: String,
    /// Highest backend-reported version seen; `None` until established
    version: Option<u64>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one poll response to the log, choosing replacement, merge,
    /// or rejection. Aux collections (contexts, notifications) are not
    /// handled here; see [`Tracker`](crate::engine::Tracker).
    pub fn apply(&mut self, response: &PollResponse, now: DateTime<Utc>) -> ApplyOutcome {
        let incoming_guid = response.log_guid.as_str();

        // Identity change with an established prior identity: the backend
        // replaced its log wholesale. Taken exactly once per switch.
        if !incoming_guid.is_empty() && !self.guid.is_empty() && incoming_guid != self.guid {
            let entries = self.rebuild(response, now);
            tracing::debug!(
                guid = incoming_guid,
                entries,
                "Log identity changed, store rebuilt"
            );
            return ApplyOutcome::Replaced { entries };
        }

        if !incoming_guid.is_empty() {
            self.guid = incoming_guid.to_string();
        }

        // Stale/duplicate guard: a reply reporting a version we already
        // hold (or older) must not touch the log. An empty reply at the
        // current version is the normal heartbeat.
        if let (Some(incoming), Some(current)) = (response.log_version, self.version) {
            if incoming <= current {
                return if response.logs.is_empty() {
                    ApplyOutcome::Heartbeat
                } else {
                    tracing::debug!(
                        incoming,
                        current,
                        "Ignoring stale log portion of poll response"
                    );
                    ApplyOutcome::StaleLog
                };
            }
        }

        let merged = self.merge_items(&response.logs, now);

        if let Some(incoming) = response.log_version {
            self.version = Some(self.version.map_or(incoming, |cur| cur.max(incoming)));
        }

        if merged == 0 {
            ApplyOutcome::Heartbeat
        } else {
            ApplyOutcome::Merged { merged }
        }
    }

    /// Discard everything and rebuild from a single response.
    fn rebuild(&mut self, response: &PollResponse, now: DateTime<Utc>) -> usize {
        self.sequenced.clear();
        self.appended.clear();
        self.merge_items(&response.logs, now);

        self.guid = response.log_guid.clone();
        // Adopted verbatim: a replacement legitimately restarts the counter.
        self.version = response.log_version;

        self.len()
    }

    /// Write positioned entries into their slot, append the rest.
    fn merge_items(&mut self, items: &[LogItem], now: DateTime<Utc>) -> usize {
        for item in items {
            match item.no {
                Some(no) => {
                    // Re-delivery of an already-held entry keeps its original
                    // receipt timestamp so relative display order stays stable.
                    let received_at = self
                        .sequenced
                        .get(&no)
                        .map(|existing| existing.received_at)
                        .unwrap_or(now);
                    self.sequenced.insert(no, entry_from_item(item, received_at));
                }
                None => self.appended.push(entry_from_item(item, now)),
            }
        }
        items.len()
    }

    /// Forget the session entirely (explicit context switch).
    pub fn reset(&mut self) {
        self.sequenced.clear();
        self.appended.clear();
        self.guid.clear();
        self.version = None;
    }

    /// Entries in authoritative order: positioned entries by position,
    /// then unpositioned entries in receipt order.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.sequenced.values().chain(self.appended.iter())
    }

    /// Cloned, ordered copy of the log for read-only consumers.
    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sequenced.len() + self.appended.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequenced.is_empty() && self.appended.is_empty()
    }

    /// Current backend-reported version, if one has been established.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Current log identity; empty until first established.
    pub fn guid(&self) -> &str {
        &self.guid
    }
}

/// Attach client-side fields to a wire entry at merge time.
fn entry_from_item(item: &LogItem, received_at: DateTime<Utc>) -> LogEntry {
    LogEntry {
        no: item.no,
        id: item.id.clone(),
        kind: item.kind.clone(),
        heading: item.heading.clone(),
        content: item.content.clone(),
        kvps: item.kvps.clone(),
        received_at,
        provisional: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(no: Option<u64>, content: &str) -> LogItem {
        LogItem {
            no,
            id: None,
            kind: "agent".to_string(),
            heading: None,
            content: Some(content.to_string()),
            kvps: None,
        }
    }

    fn response(guid: &str, version: Option<u64>, logs: Vec<LogItem>) -> PollResponse {
        PollResponse {
            log_guid: guid.to_string(),
            log_version: version,
            logs,
            ..Default::default()
        }
    }

    fn contents(store: &LogStore) -> Vec<String> {
        store
            .entries()
            .filter_map(|e| e.content.clone())
            .collect()
    }

    #[test]
    fn test_positioned_entries_merge_in_order() {
        let mut store = LogStore::new();
        let now = Utc::now();

        store.apply(
            &response("g", Some(1), vec![item(Some(0), "a"), item(Some(1), "b"), item(Some(4), "e")]),
            now,
        );
        store.apply(
            &response("g", Some(2), vec![item(Some(2), "c"), item(Some(3), "d")]),
            now,
        );

        assert_eq!(contents(&store), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(store.version(), Some(2));
    }

    #[test]
    fn test_unpositioned_entries_append() {
        let mut store = LogStore::new();
        let now = Utc::now();

        store.apply(
            &response("g", Some(1), vec![item(Some(0), "a"), item(None, "tail")]),
            now,
        );

        assert_eq!(contents(&store), vec!["a", "tail"]);
    }

    #[test]
    fn test_server_overwrites_slot() {
        let mut store = LogStore::new();
        let now = Utc::now();

        store.apply(&response("g", Some(1), vec![item(Some(0), "draft")]), now);
        store.apply(&response("g", Some(2), vec![item(Some(0), "final")]), now);

        assert_eq!(contents(&store), vec!["final"]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_redelivery_keeps_receipt_timestamp() {
        let mut store = LogStore::new();
        let first = Utc::now();
        let later = first + chrono::Duration::seconds(30);

        store.apply(&response("g", Some(1), vec![item(Some(0), "a")]), first);
        store.apply(&response("g", Some(2), vec![item(Some(0), "a2")]), later);

        let entry = store.entries().next().unwrap();
        assert_eq!(entry.content.as_deref(), Some("a2"));
        assert_eq!(entry.received_at, first);
    }

    #[test]
    fn test_stale_version_rejected() {
        let mut store = LogStore::new();
        let now = Utc::now();

        store.apply(&response("g", Some(5), vec![item(Some(0), "kept")]), now);
        let outcome = store.apply(&response("g", Some(4), vec![item(Some(0), "stale")]), now);

        assert_eq!(outcome, ApplyOutcome::StaleLog);
        assert_eq!(contents(&store), vec!["kept"]);
        assert_eq!(store.version(), Some(5));
    }

    #[test]
    fn test_duplicate_response_is_noop() {
        let mut store = LogStore::new();
        let now = Utc::now();
        let reply = response("g", Some(3), vec![item(Some(0), "a"), item(Some(1), "b")]);

        store.apply(&reply, now);
        let before = store.to_vec();
        let outcome = store.apply(&reply, now + chrono::Duration::seconds(5));

        assert_eq!(outcome, ApplyOutcome::StaleLog);
        assert_eq!(store.to_vec(), before);
    }

    #[test]
    fn test_heartbeat_changes_nothing() {
        let mut store = LogStore::new();
        let now = Utc::now();

        store.apply(&response("g", Some(3), vec![item(Some(0), "a")]), now);
        let before = store.to_vec();
        let outcome = store.apply(&response("g", Some(3), vec![]), now);

        assert_eq!(outcome, ApplyOutcome::Heartbeat);
        assert_eq!(store.to_vec(), before);
        assert_eq!(store.version(), Some(3));
    }

    #[test]
    fn test_guid_change_rebuilds() {
        let mut store = LogStore::new();
        let now = Utc::now();

        let many: Vec<LogItem> = (0..10).map(|i| item(Some(i), "old")).collect();
        store.apply(&response("guid-a", Some(20), many), now);
        assert_eq!(store.len(), 10);

        let outcome = store.apply(
            &response("guid-b", Some(2), vec![item(Some(0), "x"), item(Some(1), "y")]),
            now,
        );

        assert_eq!(outcome, ApplyOutcome::Replaced { entries: 2 });
        assert_eq!(contents(&store), vec!["x", "y"]);
        // Replacement legitimately adopts a lower version.
        assert_eq!(store.version(), Some(2));
        assert_eq!(store.guid(), "guid-b");
    }

    #[test]
    fn test_first_guid_is_adopted_without_rebuild() {
        let mut store = LogStore::new();
        let now = Utc::now();

        let outcome = store.apply(&response("guid-a", Some(1), vec![item(Some(0), "a")]), now);

        assert!(matches!(outcome, ApplyOutcome::Merged { merged: 1 }));
        assert_eq!(store.guid(), "guid-a");
    }

    #[test]
    fn test_missing_version_merges_without_advancing() {
        let mut store = LogStore::new();
        let now = Utc::now();

        store.apply(&response("g", Some(2), vec![item(Some(0), "a")]), now);
        store.apply(&response("g", None, vec![item(Some(1), "b")]), now);

        assert_eq!(contents(&store), vec!["a", "b"]);
        assert_eq!(store.version(), Some(2));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut store = LogStore::new();
        let now = Utc::now();

        store.apply(&response("g", Some(2), vec![item(Some(0), "a")]), now);
        store.reset();

        assert!(store.is_empty());
        assert_eq!(store.version(), None);
        assert_eq!(store.guid(), "");
    }
}

//! Session roster and notification stream tracking
//!
//! Contexts and scheduled tasks are replaced wholesale on every poll
//! response; the backend is authoritative and complete for them. The
//! notification stream is append-only, gated on a strictly increasing
//! version so a stale or duplicate reply never re-appends items. A read
//! watermark provides the "unread" count without mutating the stream.

use crate::gateway::wire::PollResponse;
use crate::types::{ContextSummary, Notification, TaskSummary};

/// Holds the auxiliary collections riding along on each poll response.
#[derive(Debug, Default)]
pub struct Tracker {
    contexts: Vec<ContextSummary>,
    tasks: Vec<TaskSummary>,
    notifications: Vec<Notification>,
    notifications_version: Option<u64>,
    read_watermark: usize,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb the auxiliary portion of one poll response.
    pub fn absorb(&mut self, response: &PollResponse) {
        self.contexts = response.contexts.clone();
        self.tasks = response.tasks.clone();

        if let Some(incoming) = response.notifications_version {
            let advanced = self
                .notifications_version
                .map_or(true, |current| incoming > current);
            if advanced {
                self.notifications
                    .extend(response.notifications.iter().cloned());
                self.notifications_version = Some(incoming);
            }
        }
    }

    pub fn contexts(&self) -> &[ContextSummary] {
        &self.contexts
    }

    pub fn tasks(&self) -> &[TaskSummary] {
        &self.tasks
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Version cursor echoed in the next poll request.
    pub fn version(&self) -> Option<u64> {
        self.notifications_version
    }

    /// Notifications that arrived since the last `mark_read`.
    pub fn unread_count(&self) -> usize {
        self.notifications.len().saturating_sub(self.read_watermark)
    }

    /// Move the read watermark to the end of the stream.
    pub fn mark_read(&mut self) {
        self.read_watermark = self.notifications.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(title: &str) -> Notification {
        Notification {
            id: None,
            kind: None,
            title: Some(title.to_string()),
            message: None,
            extra: serde_json::Map::new(),
        }
    }

    fn context(id: &str) -> ContextSummary {
        ContextSummary {
            id: id.to_string(),
            name: None,
            created_at: None,
            updated_at: None,
            extra: serde_json::Map::new(),
        }
    }

    fn response(
        contexts: Vec<ContextSummary>,
        notifications: Vec<Notification>,
        version: Option<u64>,
    ) -> PollResponse {
        PollResponse {
            contexts,
            notifications,
            notifications_version: version,
            ..Default::default()
        }
    }

    #[test]
    fn test_contexts_replaced_wholesale() {
        let mut tracker = Tracker::new();

        tracker.absorb(&response(vec![context("a"), context("b")], vec![], None));
        assert_eq!(tracker.contexts().len(), 2);

        tracker.absorb(&response(vec![context("c")], vec![], None));
        assert_eq!(tracker.contexts().len(), 1);
        assert_eq!(tracker.contexts()[0].id, "c");
    }

    #[test]
    fn test_notifications_append_on_version_advance() {
        let mut tracker = Tracker::new();

        tracker.absorb(&response(vec![], vec![notification("one")], Some(1)));
        tracker.absorb(&response(vec![], vec![notification("two")], Some(2)));

        assert_eq!(tracker.notifications().len(), 2);
        assert_eq!(tracker.version(), Some(2));
    }

    #[test]
    fn test_stale_notification_version_not_reappended() {
        let mut tracker = Tracker::new();

        tracker.absorb(&response(vec![], vec![notification("one")], Some(2)));
        // Duplicate delivery at the same version must not append again.
        tracker.absorb(&response(vec![], vec![notification("one")], Some(2)));
        tracker.absorb(&response(vec![], vec![notification("old")], Some(1)));

        assert_eq!(tracker.notifications().len(), 1);
        assert_eq!(tracker.version(), Some(2));
    }

    #[test]
    fn test_unread_watermark() {
        let mut tracker = Tracker::new();

        tracker.absorb(&response(vec![], vec![notification("one")], Some(1)));
        assert_eq!(tracker.unread_count(), 1);

        tracker.mark_read();
        assert_eq!(tracker.unread_count(), 0);

        tracker.absorb(&response(vec![], vec![notification("two")], Some(2)));
        assert_eq!(tracker.unread_count(), 1);
    }
}

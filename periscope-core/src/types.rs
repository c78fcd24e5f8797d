//! Core domain types for periscope
//!
//! These types represent the client-side view of a remote agent backend:
//! the per-session output log, the roster of sessions and scheduled tasks,
//! and the notification stream that ride along on every poll response.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Context** | A single conversation/task thread on the backend, identified by an opaque id |
//! | **Log** | The ordered sequence of entries describing a context's progress |
//! | **Entry** | One unit of backend output (user input, reasoning, tool use, response) |
//! | **Kind** | The backend-supplied tag on an entry ("user", "tool", "response", ...) |
//! | **Provisional entry** | A locally fabricated entry shown before server confirmation |
//! | **Task** | A scheduled background job managed by the backend |
//!
//! Entry kinds are open-ended and treated as opaque tags here; choosing how
//! to render a kind belongs entirely to the hosting UI. The single kind the
//! core inspects is [`USER_KIND`], used to retire provisional entries when
//! the backend does not echo the client-generated message id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Kind tag the backend assigns to user-submitted messages.
///
/// Provisional entries are created with this kind, and the fallback
/// optimistic dedup only ever compares entries of this kind.
pub const USER_KIND: &str = "user";

// ============================================
// Log Entries
// ============================================

/// One unit of backend-produced output within a context's log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Stable position assigned by the backend; absent for entries that
    /// only ever arrive appended
    pub no: Option<u64>,
    /// Stable id used for deduplication when `no` is unavailable
    pub id: Option<String>,
    /// Open-ended kind tag ("user", "agent", "tool", "response", ...)
    pub kind: String,
    /// Short heading for display
    pub heading: Option<String>,
    /// Entry body text
    pub content: Option<String>,
    /// Structured key/value payload; key order is preserved as sent
    pub kvps: Option<serde_json::Map<String, serde_json::Value>>,
    /// When this client first merged the entry; never authoritative for
    /// ordering, display only
    pub received_at: DateTime<Utc>,
    /// True only for entries that exist solely in the optimistic ledger
    pub provisional: bool,
}

impl LogEntry {
    /// Entry content with surrounding whitespace removed, if any.
    pub fn trimmed_content(&self) -> Option<&str> {
        self.content.as_deref().map(str::trim)
    }
}

// ============================================
// Contexts and Tasks
// ============================================

/// Summary of a conversation context, as reported by the backend.
///
/// The backend is authoritative and complete for this list on every poll
/// response; it is replaced wholesale, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    /// Opaque context id
    pub id: String,
    /// Human-friendly name (optional)
    #[serde(default)]
    pub name: Option<String>,
    /// Creation timestamp as reported by the backend
    #[serde(default)]
    pub created_at: Option<f64>,
    /// Last-update timestamp as reported by the backend
    #[serde(default)]
    pub updated_at: Option<f64>,
    /// Remaining backend-supplied fields, passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Summary of a scheduled background task, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Opaque task id
    pub id: String,
    /// Task display name
    #[serde(default)]
    pub task_name: Option<String>,
    /// Backend-reported task state ("idle", "running", ...)
    #[serde(default)]
    pub state: Option<String>,
    /// Task type tag
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Remaining backend-supplied fields, passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ============================================
// Notifications
// ============================================

/// One item from the backend's append-only notification stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification id (string or number on the wire)
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    /// Notification type tag
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Short title
    #[serde(default)]
    pub title: Option<String>,
    /// Body text
    #[serde(default)]
    pub message: Option<String>,
    /// Remaining backend-supplied fields, passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ============================================
// Connectivity and Activity
// ============================================

/// Observable health of the poll channel.
///
/// The loop itself never stops because of failures; this state exists so
/// hosts can show a "Disconnected" indicator or prompt for credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Last cycle completed successfully
    Online,
    /// One or more consecutive cycles failed; backing off
    Degraded {
        /// Failure streak length (0 means no cycle has completed yet)
        consecutive_failures: u32,
    },
    /// The backend rejected our credentials; user action required
    AuthRequired,
}

impl Connectivity {
    /// True when the last poll cycle succeeded.
    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }
}

/// Per-context activity indicators riding on the poll response.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Activity {
    /// Backend-reported progress value
    pub progress: f64,
    /// Whether the backend considers work in progress
    pub progress_active: bool,
    /// Whether the context is paused
    pub paused: bool,
}

// ============================================
// Wire helpers
// ============================================

/// Accept an id that arrives as either a JSON string or a number.
pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

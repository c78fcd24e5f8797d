//! Wire format for the backend HTTP API
//!
//! These structs mirror what the backend actually sends, decoded leniently:
//! unknown fields are ignored, per-entry decode failures are dropped with a
//! debug log so one bad record never poisons a whole poll response, and the
//! envelope version counters are `Option` so a missing field never invents
//! a version.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

use crate::types::{opt_string_or_number, ContextSummary, Notification, TaskSummary};

/// Request body for `POST /poll`
#[derive(Debug, Clone, Serialize)]
pub struct PollRequest {
    /// Log version the client already holds; the backend replies with
    /// only-new entries when it supports incremental responses
    pub log_from: u64,
    /// Notification version the client already holds
    pub notifications_from: u64,
    /// Currently selected context id, if any
    pub context: Option<String>,
    /// IANA timezone string, echoed for backend-side formatting
    pub timezone: String,
}

/// One log entry as it appears on the wire.
///
/// Client-side fields (receipt timestamp, provisional flag) are attached
/// at merge time; see [`crate::engine::LogStore`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogItem {
    /// Stable backend-assigned position; absent for append-only entries
    #[serde(default)]
    pub no: Option<u64>,
    /// Stable id (string or number on the wire)
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    /// Entry kind tag
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Structured key/value payload; key order preserved
    #[serde(default)]
    pub kvps: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Response envelope for `POST /poll`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollResponse {
    /// Backend asks the client to clear its selected context
    #[serde(default)]
    pub deselect_chat: bool,
    /// Context the backend considers active
    #[serde(default)]
    pub context: Option<String>,
    /// Full roster of contexts (authoritative, replaced each cycle)
    #[serde(default, deserialize_with = "lenient_vec")]
    pub contexts: Vec<ContextSummary>,
    /// Full roster of scheduled tasks (authoritative, replaced each cycle)
    #[serde(default, deserialize_with = "lenient_vec")]
    pub tasks: Vec<TaskSummary>,
    /// New or re-delivered log entries
    #[serde(default, deserialize_with = "lenient_vec")]
    pub logs: Vec<LogItem>,
    /// Identity of the backend log; a change means the log was replaced
    /// wholesale (new session, history cleared)
    #[serde(default)]
    pub log_guid: String,
    /// Backend log version; `None` when the field is missing or malformed
    #[serde(default, deserialize_with = "lenient_version")]
    pub log_version: Option<u64>,
    #[serde(default)]
    pub log_progress: f64,
    #[serde(default)]
    pub log_progress_active: bool,
    #[serde(default)]
    pub paused: bool,
    /// New notifications since `notifications_from`
    #[serde(default, deserialize_with = "lenient_vec")]
    pub notifications: Vec<Notification>,
    /// Identity of the notification stream (decoded, not yet used for gating)
    #[serde(default)]
    pub notifications_guid: String,
    /// Notification stream version; `None` when missing or malformed
    #[serde(default, deserialize_with = "lenient_version")]
    pub notifications_version: Option<u64>,
}

/// A user message on its way to the backend.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Client-generated unique id, echoed back by the backend for
    /// optimistic reconciliation
    pub message_id: String,
    pub text: String,
    /// Context to deliver into; `None` lets the backend pick
    pub context: Option<String>,
    /// Local files to upload alongside the text
    pub attachments: Vec<PathBuf>,
}

/// JSON body for `POST /message_async` (no attachments)
#[derive(Debug, Serialize)]
pub(crate) struct SendPayload<'a> {
    pub text: &'a str,
    pub context: Option<&'a str>,
    pub message_id: &'a str,
}

/// Response from `POST /message_async`
#[derive(Debug, Clone, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub message: String,
    /// Context the message was delivered into; adopted by the engine when
    /// it differs from the one used to send
    #[serde(default)]
    pub context: Option<String>,
}

/// Response from `POST /chat_create`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionAck {
    /// Id of the newly created context
    #[serde(rename = "ctxid")]
    pub id: String,
    #[serde(default)]
    pub message: String,
}

/// Response from `POST /pause`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PauseAck {
    #[serde(default)]
    pub paused: Option<bool>,
}

/// Decode a JSON array element-by-element, dropping entries that fail.
///
/// The envelope stays usable when the backend ships one malformed record;
/// version counters still come from the (successfully parsed) envelope.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed entry from poll response");
                None
            }
        })
        .collect())
}

/// Decode a version counter, tolerating a missing or non-integer value.
fn lenient_version<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(serde_json::Value::as_u64))
}

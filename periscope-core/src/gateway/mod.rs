//! Request gateway for the agent backend
//!
//! The engine talks to the backend exclusively through the [`Gateway`]
//! trait: a request/response seam that returns parsed wire structs or a
//! categorized [`Error`](crate::Error). Transport mechanics (verb choice,
//! header attachment, multipart encoding) live behind it, so tests drive
//! the engine with an in-process mock and never open a socket.

mod http;
pub mod wire;

pub use http::HttpGateway;
pub use wire::{OutgoingMessage, PollRequest, PollResponse, SendResponse, SessionAck};

use async_trait::async_trait;

use crate::error::Result;

/// Authenticated request/response access to the agent backend.
///
/// Implementations must categorize failures via the crate [`Error`]
/// taxonomy: auth rejections as `Error::Auth`, connectivity problems as
/// `Error::Transport`, non-2xx replies as `Error::Server`, and schema
/// violations as `Error::Decode`. The poll driver's backoff and
/// connectivity reporting depend on that classification.
///
/// [`Error`]: crate::Error
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Fetch incremental state: new log entries, roster, notifications.
    async fn poll(&self, request: &PollRequest) -> Result<PollResponse>;

    /// Deliver a user message (JSON, or multipart when attachments are
    /// present). The returned context must be adopted by the caller if it
    /// differs from the one used to send.
    async fn send_message(&self, outgoing: &OutgoingMessage) -> Result<SendResponse>;

    /// Create a new context, optionally branching from the current one.
    async fn new_session(&self, current: Option<&str>) -> Result<SessionAck>;

    /// Clear a context's history on the backend.
    async fn reset_session(&self, context: &str) -> Result<()>;

    /// Remove a context entirely.
    async fn remove_session(&self, context: &str) -> Result<()>;

    /// Pause or resume a context; returns the state the backend settled on.
    async fn set_paused(&self, context: &str, paused: bool) -> Result<bool>;

    /// Ask the backend to re-prompt a stuck context.
    async fn nudge(&self, context: &str) -> Result<()>;

    /// Cheap reachability probe; `Ok(false)` means unreachable, not broken.
    async fn health(&self) -> Result<bool>;
}

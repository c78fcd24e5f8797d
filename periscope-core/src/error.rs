//! Error types for periscope-core

use thiserror::Error;

/// Main error type for the periscope-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Network-level failure (unreachable, connection reset, timeout)
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials or API key rejected by the backend
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Backend returned a non-success status
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Response body did not match the expected schema
    #[error("malformed response: {0}")]
    Decode(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for failures that require user action to re-authenticate.
    ///
    /// The poll loop keeps backing off on these, but surfaces them as a
    /// distinct connectivity state so the hosting UI can react.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    /// True for failures that are expected to clear on their own.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Server { .. } | Error::Decode(_)
        )
    }
}

/// Result type alias for periscope-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_classification() {
        assert!(Error::Auth("bad key".to_string()).is_auth());
        assert!(!Error::Transport("connection refused".to_string()).is_auth());
    }

    #[test]
    fn test_transport_classification() {
        assert!(Error::Transport("timeout".to_string()).is_transport());
        assert!(Error::Server {
            status: 500,
            message: "oops".to_string()
        }
        .is_transport());
        assert!(Error::Decode("bad json".to_string()).is_transport());
        assert!(!Error::Auth("nope".to_string()).is_transport());
    }
}

//! Client error types.

use serde::Deserialize;
use thiserror::Error;

/// Errors returned by the API client and the watcher.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request never produced a response (connect, timeout, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error code from the response body, if present.
        code: Option<String>,
        /// Error message (response body text when not structured).
        message: String,
    },

    /// Response body or stream frame did not decode.
    #[error("decode error: {message}")]
    Decode {
        /// What failed to decode.
        message: String,
    },

    /// Stream ended without the terminal marker.
    #[error("event stream closed without terminal marker")]
    StreamClosed,

    /// Reconnect attempts exhausted.
    #[error("gave up after {attempts} reconnect attempts")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

impl ClientError {
    /// Whether the server reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// Build a [`ClientError::Status`] from a status code and response body.
    ///
    /// Understands the server's `{error: {code, message}}` envelope and falls
    /// back to the raw body text.
    pub fn from_response_body(status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Envelope {
            error: Detail,
        }
        #[derive(Deserialize)]
        struct Detail {
            code: Option<String>,
            message: String,
        }

        match serde_json::from_str::<Envelope>(body) {
            Ok(envelope) => Self::Status {
                status,
                code: envelope.error.code,
                message: envelope.error.message,
            },
            Err(_) => Self::Status {
                status,
                code: None,
                message: body.trim().to_string(),
            },
        }
    }
}

/// Convenience type alias for client results.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn structured_body_is_unpacked() {
        let err = ClientError::from_response_body(
            404,
            r#"{"error":{"code":"INVESTIGATION_NOT_FOUND","message":"investigation not found: x"}}"#,
        );
        assert!(err.is_not_found());
        assert_matches!(err, ClientError::Status { code: Some(ref c), .. } if c == "INVESTIGATION_NOT_FOUND");
    }

    #[test]
    fn plain_body_kept_as_message() {
        let err = ClientError::from_response_body(502, "bad gateway\n");
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "server returned 502: bad gateway");
    }

    #[test]
    fn retries_exhausted_display() {
        assert_eq!(
            ClientError::RetriesExhausted { attempts: 3 }.to_string(),
            "gave up after 3 reconnect attempts"
        );
    }
}

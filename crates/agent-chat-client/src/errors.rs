/// Fallback message used when an error response carries no readable body.
pub(crate) const GENERIC_REQUEST_FAILURE: &str = "Request failed";

/// Terminal failure of one streaming send.
///
/// Distinct from user cancellation: a failed stream never produces a
/// message, and whatever text had accumulated is discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum StreamFailure {
    /// The server reported a failure with a `stream.error` event.
    #[error("{message}")]
    Server {
        message: String,
        code: Option<String>,
    },
    /// Reading the response body failed after streaming began.
    #[error("{message}")]
    Transport { message: String },
    /// The response body ended before a terminal event arrived.
    #[error("stream ended before completion")]
    Incomplete,
}

impl StreamFailure {
    /// Creates a server-reported failure.
    pub fn server(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Server {
            message: message.into(),
            code,
        }
    }

    /// Creates a read-side transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// Top-level error type for the public client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (empty ids, rejected files, ...).
    #[error("validation error: {0}")]
    Validation(String),
    /// The server answered with a non-success status.
    #[error("{message}")]
    Api { status: u16, message: String },
    /// The request could not be issued or its body could not be read.
    #[error("transport error: {0}")]
    Transport(String),
    /// A response body did not match the expected JSON shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// A started stream ended in failure.
    #[error(transparent)]
    Stream(StreamFailure),
}

impl ChatError {
    pub(crate) fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Returns the HTTP status for API errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<StreamFailure> for ChatError {
    fn from(value: StreamFailure) -> Self {
        ChatError::Stream(value)
    }
}

/// Extracts a human-readable message from an error response body.
///
/// Prefers `error.message`, then a top-level `message`, then the generic
/// fallback. Empty strings count as absent.
pub(crate) fn error_message_from_body(body: &[u8]) -> String {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return GENERIC_REQUEST_FAILURE.to_string();
    };
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or(GENERIC_REQUEST_FAILURE)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_error_message_wins() {
        let body = br#"{"error":{"message":"conversation not found"},"message":"outer"}"#;
        assert_eq!(error_message_from_body(body), "conversation not found");
    }

    #[test]
    fn top_level_message_is_second_choice() {
        assert_eq!(
            error_message_from_body(br#"{"error":{},"message":"quota exceeded"}"#),
            "quota exceeded"
        );
    }

    #[test]
    fn unreadable_or_empty_bodies_fall_back() {
        assert_eq!(error_message_from_body(b"<html>502</html>"), "Request failed");
        assert_eq!(error_message_from_body(b""), "Request failed");
        assert_eq!(
            error_message_from_body(br#"{"error":{"message":""}}"#),
            "Request failed"
        );
    }

    #[test]
    fn stream_failure_displays_server_message_verbatim() {
        let err = ChatError::from(StreamFailure::server("rate limited", None));
        assert_eq!(err.to_string(), "rate limited");
        assert_eq!(err.status(), None);
    }
}

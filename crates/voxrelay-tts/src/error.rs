use thiserror::Error;

/// TTS bridge errors
#[derive(Error, Debug)]
pub enum TtsError {
    /// Transport-level failure: connect, handshake, or socket I/O
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation attempted in a session state that does not allow it
    #[error("Protocol state error: {0}")]
    ProtocolState(String),

    /// Error frame or non-zero status code reported by the vendor
    #[error("{provider} error {code}: {message}")]
    Vendor {
        provider: &'static str,
        code: i64,
        message: String,
    },

    /// Caller-initiated abort
    #[error("Synthesis cancelled")]
    Cancelled,

    /// Relay contract violation (e.g. two concurrent consumers)
    #[error("Relay misuse: {0}")]
    RelayMisuse(String),

    /// Missing or malformed caller parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Vendor payload did not match the documented frame shape
    #[error("Unexpected response format: {0}")]
    ResponseFormat(String),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for TtsError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TtsError::Connection(err.to_string())
    }
}

impl TtsError {
    /// Non-allocating check used by adapters deciding whether a failure
    /// came from the caller aborting.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TtsError::Cancelled)
    }
}

/// Result type for TTS operations
pub type TtsResult<T> = Result<T, TtsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_error_formats_provider_and_code() {
        let err = TtsError::Vendor {
            provider: "minimax",
            code: 1004,
            message: "invalid api key".into(),
        };
        assert_eq!(err.to_string(), "minimax error 1004: invalid api key");
    }

    #[test]
    fn cancelled_is_detectable() {
        assert!(TtsError::Cancelled.is_cancelled());
        assert!(!TtsError::Connection("reset".into()).is_cancelled());
    }

    #[test]
    fn json_errors_convert() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: TtsError = parse_err.into();
        assert!(matches!(err, TtsError::Json(_)));
    }
}

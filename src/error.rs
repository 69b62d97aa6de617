//! Error types for the book-sync crate.
//!
//! Expected external failures (sequence gaps, snapshot fetch failures,
//! malformed messages) are handled inside the synchronizer and never reach
//! the caller as errors. What does surface here is either a transport
//! failure from the REST or WebSocket clients, or an [`Error::Invariant`]
//! signalling a programming error in the processing loop.

/// The main error type for this crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration (unsupported depth limit, bad URL, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Exchange returned an error response
    #[error("API error ({}): {}", .0.status, .0.message)]
    Api(ApiError),

    /// Rate limit exceeded (HTTP 429 or 418)
    #[error("Rate limited{}", retry_suffix(.retry_after_ms))]
    RateLimited {
        /// Retry after this many milliseconds
        retry_after_ms: Option<u64>,
    },

    /// WebSocket connection closed unexpectedly
    #[error("WebSocket connection closed")]
    ConnectionClosed,

    /// Invalid or unknown trading symbol
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// A stream or REST message could not be decoded; the message is dropped
    #[error("Malformed message ({reason}): {payload}")]
    Malformed {
        /// Raw payload as received
        payload: String,
        /// Why decoding failed
        reason: String,
    },

    /// Internal invariant violated; fatal to the processing loop
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

fn retry_suffix(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(", retry after {}ms", ms),
        None => String::new(),
    }
}

/// Error returned by the exchange
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code (0 for errors delivered over the WebSocket)
    pub status: u16,
    /// Exchange error code (negative for REST errors, e.g. -1121)
    pub code: Option<i64>,
    /// Error message
    pub message: String,
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("invalid URL: {}", err))
    }
}

impl Error {
    /// Build a [`Error::Malformed`] from a raw payload and a reason
    pub fn malformed(payload: impl Into<String>, reason: impl ToString) -> Self {
        Error::Malformed {
            payload: payload.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the processing loop may keep running after this error
    ///
    /// Malformed messages and exchange-level rejections only cost the message
    /// they arrived in. Everything else means the transport is gone or the
    /// loop's state can no longer be trusted.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Malformed { .. } | Error::Api(_))
    }
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Create an API error with an exchange error code
    pub fn with_code(status: u16, code: i64, message: impl Into<String>) -> Self {
        Self {
            status,
            code: Some(code),
            message: message.into(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// KV-sync error types.
///
/// Comprehensive error handling for subscriber, index, and routing operations.
use std::io;
use thiserror::Error;

/// Main error type for `kvroute` operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// IO error during socket operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration is invalid (missing tokenizer, wrong tokenizer type, missing endpoint).
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Socket bind/connect failure. Always recoverable: the caller backs off and retries.
    #[error("transient connection error: {0}")]
    ConnectTransient(String),

    /// A batch or frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Sequence discontinuity detected; a replay is required.
    #[error("sequence gap: expected {expected}, got {got}")]
    Gap {
        /// The sequence id that was expected.
        expected: u64,
        /// The sequence id actually observed.
        got: u64,
    },

    /// The indexer rejected an event.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// The remote tokenizer call failed.
    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    /// Shutdown was already in progress or complete; safe to ignore.
    #[error("shutdown error: {0}")]
    Shutdown(String),

    /// A reply socket timed out waiting for a response.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type alias for `kvroute` operations.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Create a config-invalid error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    /// Create a transient connection error with a message.
    pub fn connect_transient(msg: impl Into<String>) -> Self {
        Self::ConnectTransient(msg.into())
    }

    /// Create a decode error with a message.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a dispatch error with a message.
    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }

    /// Check if this error is recoverable by backing off and retrying.
    ///
    /// `ConnectTransient`, `Gap`, `Decode`, and `Dispatch` never crash the
    /// caller per the error-handling design; `ConfigInvalid`, `TokenizerError`,
    /// and `Shutdown` are surfaced to the caller instead.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::ConnectTransient(_) | Self::Gap { .. } | Self::Timeout(_) => true,
            Self::Decode(_) | Self::Dispatch(_) => true,
            Self::ConfigInvalid(_) | Self::TokenizerError(_) | Self::Shutdown(_) => false,
        }
    }

    /// Check if this is a connection-level error that should drive the
    /// subscriber state machine back to `Disconnected`.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectTransient(_) | Self::Timeout(_) | Self::Io(_))
    }
}

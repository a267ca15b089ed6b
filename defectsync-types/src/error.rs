//! The error signal shared by every connector.
//!
//! Each variant maps to one class of the error taxonomy: configuration
//! errors never reach a session, connectivity errors carry an explicit
//! continuable flag, and query/data errors are always local to one call.

use thiserror::Error;

/// Result type for connector operations.
pub type TrackResult<T> = Result<T, TrackError>;

/// Errors surfaced by connectors to the host engine.
#[derive(Debug, Clone, Error)]
pub enum TrackError {
    /// Bad attribute or parameter value, detected before any session exists.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Handshake or transport failure. `continuable` is false when the
    /// session is no longer trustworthy and must be torn down before the
    /// next operation.
    #[error("connection error: {message}")]
    Connection { message: String, continuable: bool },

    /// Malformed traffic on the wire. The transport cannot be trusted after
    /// this, so it is never continuable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A request the backend cannot satisfy: unknown field, unknown project,
    /// a segmentation field without known values. Local to the one call.
    #[error("query error: {0}")]
    Query(String),

    /// The backend accepted the session but rejected the data (row-count
    /// anomalies, refused saves). The record handle stays usable for retry.
    #[error("data error: {0}")]
    Data(String),
}

impl TrackError {
    /// A connection error after which the session must be re-established.
    pub fn severed(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            continuable: false,
        }
    }

    /// A connection error that leaves the session minimally usable.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            continuable: true,
        }
    }

    /// Whether the session that produced this error remains usable.
    /// Non-continuable errors require teardown and reconnection.
    pub fn continuable(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::Query(_) | Self::Data(_) => true,
            Self::Connection { continuable, .. } => *continuable,
            Self::Protocol(_) => false,
        }
    }

    /// Whether this error came from the transport layer (as opposed to the
    /// backend rejecting a well-delivered request). Transport errors are the
    /// trigger for the single-shot reconnect wrapper.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Protocol(_))
    }
}

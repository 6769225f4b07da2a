//! Runtime layer errors.
//!
//! # Error Code Convention
//!
//! | Error | Prefix | Example |
//! |-------|--------|---------|
//! | [`InvokeError`] | `INVOKE_` | `INVOKE_ABORTED` |
//! | [`RemoteError`] | `REMOTE_` | `REMOTE_DEPTH_EXCEEDED` |
//! | [`TransportError`] | `TRANSPORT_` | `TRANSPORT_PARSE` |
//!
//! Aborts are the one error callers routinely branch on; detect them with
//! [`InvokeError::is_aborted`] rather than string matching.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use weft_types::ErrorCode;

/// How an invoke call failed to settle with a response.
///
/// The `error` payloads of [`Rejected`](Self::Rejected) and
/// [`Fatal`](Self::Fatal) are the peer's values forwarded as-is, so
/// callers see the original error data across the bus.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
pub enum InvokeError {
    /// The call was cancelled, by the caller's signal or by a peer's
    /// `send-abort`. The canonical "Aborted" error.
    #[error("Aborted: {reason}")]
    Aborted {
        /// Cancellation reason carried on the abort.
        reason: Value,
    },

    /// The peer's handler raised; carries the raised value.
    #[error("invoke rejected by peer: {error}")]
    Rejected {
        /// The error value from `receive-error` (or `send-error`).
        error: Value,
    },

    /// A registered fatal event fired while the call was pending.
    #[error("fatal transport event: {error}")]
    Fatal {
        /// The error carried by the fatal event.
        error: Value,
    },

    /// The per-call timeout elapsed before any terminal signal.
    #[error("invoke timed out after {ms} ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        ms: u64,
    },

    /// Internal delivery channel closed before settlement.
    #[error("invoke channel closed")]
    ChannelClosed,
}

impl InvokeError {
    /// Builds the canonical abort error.
    #[must_use]
    pub fn aborted(reason: Value) -> Self {
        Self::Aborted { reason }
    }

    /// Returns `true` for the canonical "Aborted" error.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

impl ErrorCode for InvokeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Aborted { .. } => "INVOKE_ABORTED",
            Self::Rejected { .. } => "INVOKE_REJECTED",
            Self::Fatal { .. } => "INVOKE_FATAL",
            Self::Timeout { .. } => "INVOKE_TIMEOUT",
            Self::ChannelClosed => "INVOKE_CHANNEL_CLOSED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Guard errors raised synchronously at the remote-methods
/// serialize/deserialize boundary.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
pub enum RemoteError {
    /// The payload carries methods but remote methods are not allowed.
    #[error("remote methods are disabled for this call")]
    NotAllowed,

    /// The payload walk exceeded the configured depth cap.
    #[error("payload nesting exceeds the configured depth cap ({max})")]
    DepthExceeded {
        /// Configured `max_depth`.
        max: usize,
    },

    /// More method stubs than the configured cap.
    #[error("payload carries more than {max} methods")]
    TooManyMethods {
        /// Configured `max_functions`.
        max: usize,
    },

    /// A stub tag failed the prefix check and the policy is `Error`.
    #[error("stub tag '{tag}' does not carry the configured prefix")]
    DisallowedTag {
        /// The offending tag.
        tag: String,
    },

    /// Strict mode: a node carries the stub marker key with a malformed
    /// descriptor.
    #[error("malformed method stub: {detail}")]
    MalformedStub {
        /// What was wrong with the descriptor.
        detail: String,
    },
}

impl ErrorCode for RemoteError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotAllowed => "REMOTE_NOT_ALLOWED",
            Self::DepthExceeded { .. } => "REMOTE_DEPTH_EXCEEDED",
            Self::TooManyMethods { .. } => "REMOTE_TOO_MANY_METHODS",
            Self::DisallowedTag { .. } => "REMOTE_DISALLOWED_TAG",
            Self::MalformedStub { .. } => "REMOTE_MALFORMED_STUB",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Transport adapter errors.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
pub enum TransportError {
    /// The transport can no longer carry frames.
    #[error("transport closed")]
    Closed,

    /// A single inbound frame failed to parse; the transport stays alive.
    #[error("frame parse error: {0}")]
    Parse(String),
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Closed => "TRANSPORT_CLOSED",
            Self::Parse(_) => "TRANSPORT_PARSE",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_types::assert_error_codes;

    #[test]
    fn invoke_error_codes() {
        assert_error_codes(
            &[
                InvokeError::aborted(json!("stop")),
                InvokeError::Rejected { error: json!("e") },
                InvokeError::Fatal { error: json!("e") },
                InvokeError::Timeout { ms: 10 },
                InvokeError::ChannelClosed,
            ],
            "INVOKE_",
        );
    }

    #[test]
    fn remote_error_codes() {
        assert_error_codes(
            &[
                RemoteError::NotAllowed,
                RemoteError::DepthExceeded { max: 4 },
                RemoteError::TooManyMethods { max: 4 },
                RemoteError::DisallowedTag { tag: "x".into() },
                RemoteError::MalformedStub {
                    detail: "no tag".into(),
                },
            ],
            "REMOTE_",
        );
    }

    #[test]
    fn transport_error_codes() {
        assert_error_codes(
            &[TransportError::Closed, TransportError::Parse("x".into())],
            "TRANSPORT_",
        );
    }

    #[test]
    fn aborted_is_named() {
        let err = InvokeError::aborted(json!("user cancelled"));
        assert!(err.is_aborted());
        assert!(err.to_string().starts_with("Aborted"));
        assert!(!InvokeError::ChannelClosed.is_aborted());
    }

    #[test]
    fn domains_follow_the_owning_layer() {
        assert_eq!(InvokeError::ChannelClosed.domain(), "INVOKE");
        assert_eq!(RemoteError::NotAllowed.domain(), "REMOTE");
        assert_eq!(TransportError::Closed.domain(), "TRANSPORT");
    }

    #[test]
    fn only_timeout_is_recoverable() {
        assert!(InvokeError::Timeout { ms: 1 }.is_recoverable());
        assert!(!InvokeError::aborted(json!(null)).is_recoverable());
        assert!(!InvokeError::ChannelClosed.is_recoverable());
    }
}

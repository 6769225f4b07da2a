//! Event layer errors.
//!
//! # Error Code Convention
//!
//! All event errors use the `EVENT_` prefix:
//!
//! | Error | Code | Recoverable |
//! |-------|------|-------------|
//! | [`EventError::MalformedBody`] | `EVENT_MALFORMED_BODY` | No |
//! | [`EventError::RoleMismatch`] | `EVENT_ROLE_MISMATCH` | No |
//!
//! Both indicate a peer (or a bug) produced a body or descriptor that
//! does not follow the invoke wire shapes; retrying will not change the
//! bytes.

use crate::InvokeRole;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use weft_types::ErrorCode;

/// Event layer error.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
pub enum EventError {
    /// An envelope body did not decode as the expected invoke shape.
    #[error("malformed event body: {0}")]
    MalformedBody(String),

    /// A descriptor arrived with the wrong invoke role for its context.
    #[error("expected {expected:?} descriptor, got {actual:?}")]
    RoleMismatch {
        /// Role the consuming side required.
        expected: InvokeRole,
        /// Role the descriptor actually carried.
        actual: Option<InvokeRole>,
    },
}

impl ErrorCode for EventError {
    fn code(&self) -> &'static str {
        match self {
            Self::MalformedBody(_) => "EVENT_MALFORMED_BODY",
            Self::RoleMismatch { .. } => "EVENT_ROLE_MISMATCH",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

//! Unified error interface for weft.
//!
//! Every weft error enum implements [`ErrorCode`]: a stable,
//! machine-readable code plus a recoverability flag. Codes are what
//! cross process boundaries (an invoke rejection forwarded over a
//! transport keeps its code even when the Rust type is gone), so they
//! are part of the wire contract and never change once shipped.
//!
//! # Code Format
//!
//! `<DOMAIN>_<DETAIL>` in UPPER_SNAKE_CASE, where the domain names the
//! owning layer:
//!
//! | Domain | Layer | Example |
//! |--------|-------|---------|
//! | `EVENT` | descriptors, envelopes | `EVENT_MALFORMED_BODY` |
//! | `INVOKE` | calls and handlers | `INVOKE_ABORTED` |
//! | `REMOTE` | method-stub walks | `REMOTE_DEPTH_EXCEEDED` |
//! | `TRANSPORT` | adapters | `TRANSPORT_CLOSED` |
//!
//! Callers branch on codes (or on [`ErrorCode::domain`]) rather than on
//! display strings.
//!
//! # Example
//!
//! ```
//! use weft_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum QueueError {
//!     Saturated,
//!     Detached,
//! }
//!
//! impl ErrorCode for QueueError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::Saturated => "QUEUE_SATURATED",
//!             Self::Detached => "QUEUE_DETACHED",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         // A saturated queue drains; a detached one is gone.
//!         matches!(self, Self::Saturated)
//!     }
//! }
//!
//! let err = QueueError::Saturated;
//! assert_eq!(err.code(), "QUEUE_SATURATED");
//! assert_eq!(err.domain(), "QUEUE");
//! assert!(err.is_recoverable());
//! ```

/// Unified error code interface for weft errors.
pub trait ErrorCode {
    /// Returns the machine-readable error code.
    ///
    /// UPPER_SNAKE_CASE, domain-prefixed, stable across versions, and
    /// unique per variant within one error type.
    fn code(&self) -> &'static str;

    /// Returns whether retrying (or a corrective action by the caller)
    /// can succeed. Aborts and malformed payloads are not recoverable;
    /// timeouts and transient transport conditions are.
    fn is_recoverable(&self) -> bool;

    /// The domain segment of the code: everything before the first
    /// underscore (`"INVOKE_ABORTED"` is in domain `"INVOKE"`).
    fn domain(&self) -> &'static str {
        let code = self.code();
        match code.split_once('_') {
            Some((domain, _)) => domain,
            None => code,
        }
    }
}

/// Asserts that every variant of an error enum follows weft's code
/// conventions.
///
/// # Checks
///
/// For each error: the code is non-empty, carries the expected prefix,
/// and is UPPER_SNAKE_CASE with no leading, trailing, or doubled
/// underscores. Across the slice: no two variants share a code.
///
/// Call it once per error type with one value of every variant, so a
/// new variant with a botched code fails the suite immediately.
///
/// # Panics
///
/// Panics with the specific violation.
///
/// # Example
///
/// ```
/// use weft_types::{assert_error_codes, ErrorCode};
///
/// #[derive(Debug)]
/// enum LinkError { Busy, Severed }
///
/// impl ErrorCode for LinkError {
///     fn code(&self) -> &'static str {
///         match self {
///             Self::Busy => "LINK_BUSY",
///             Self::Severed => "LINK_SEVERED",
///         }
///     }
///     fn is_recoverable(&self) -> bool { matches!(self, Self::Busy) }
/// }
///
/// assert_error_codes(&[LinkError::Busy, LinkError::Severed], "LINK_");
/// ```
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    let mut seen: Vec<&'static str> = Vec::with_capacity(errors.len());
    for err in errors {
        let code = err.code();
        if let Err(violation) = check_code(code, expected_prefix) {
            panic!("error code '{code}': {violation}");
        }
        assert!(
            !seen.contains(&code),
            "error code '{code}' is shared by two variants"
        );
        seen.push(code);
    }
}

/// Validates one code against the conventions, naming the violation.
fn check_code(code: &str, expected_prefix: &str) -> Result<(), String> {
    if code.is_empty() {
        return Err("must not be empty".into());
    }
    if !code.starts_with(expected_prefix) {
        return Err(format!("missing prefix '{expected_prefix}'"));
    }

    // Seeding with '_' makes a leading underscore read as a double.
    let mut prev = '_';
    for c in code.chars() {
        if !c.is_ascii_uppercase() && !c.is_ascii_digit() && c != '_' {
            return Err(format!("character '{c}' is not UPPER_SNAKE_CASE"));
        }
        if c == '_' && prev == '_' {
            return Err("leading or doubled underscore".into());
        }
        prev = c;
    }
    if prev == '_' {
        return Err("trailing underscore".into());
    }
    Ok(())
}

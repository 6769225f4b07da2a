//! Event identity for the weft runtime.
//!
//! This crate defines what an event *is*; `weft-runtime` defines how
//! events move. It is part of the SDK layer of the workspace:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SDK Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  weft-types   : Tag, InvokeId, Flow, ErrorCode              │
//! │  weft-event   : descriptors, matchers, families  ◄── HERE   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  weft-runtime : bus context, invoke protocol, transports    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Contents
//!
//! - [`EventDesc`] / [`EventKind`] / [`InvokeRole`] - typed event identity
//! - [`Matcher`] - literal, wildcard, and predicate match expressions
//! - [`Envelope`] plus the four invoke body shapes - what travels on the bus
//! - [`InvokeFamily`] - the seven descriptors of one RPC method
//! - [`EventError`] - event layer errors
//!
//! # Example
//!
//! ```
//! use weft_event::{EventDesc, InvokeFamily, Matcher};
//!
//! // Plain events: identity is just a tag
//! let ping = EventDesc::new("ping");
//!
//! // Invoke methods: one tag derives the whole protocol surface
//! let sum = InvokeFamily::new("sum");
//! assert_eq!(sum.send_abort().id().as_str(), "sum:send-abort");
//!
//! // Broad listeners use matchers
//! let everything_invoke = Matcher::predicate(|d: &EventDesc| d.invoke_role().is_some());
//! assert!(everything_invoke.matches(sum.send()));
//! assert!(!everything_invoke.matches(&ping));
//! ```

mod descriptor;
mod envelope;
mod error;
mod family;
mod matcher;

pub use descriptor::{EventDesc, EventKind, InvokeRole};
pub use envelope::{
    decode_body, encode_body, Envelope, InvokeAbortPayload, InvokeEndPayload, InvokeErrorPayload,
    InvokePayload,
};
pub use error::EventError;
pub use family::InvokeFamily;
pub use matcher::Matcher;

// Re-export from weft_types for convenience
pub use weft_types::{Flow, InvokeId, Tag};

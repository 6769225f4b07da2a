//! Core types for the weft event runtime.
//!
//! This crate is the bottom of the weft workspace. It carries the types
//! every other layer agrees on:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SDK Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  weft-types   : Tag, InvokeId, Flow, ErrorCode  ◄── HERE    │
//! │  weft-event   : descriptors, matchers, invoke families      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  weft-runtime : bus context, invoke protocol, transports    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Contents
//!
//! - [`Tag`] - stable string identity of a logical event
//! - [`InvokeId`] - per-call correlation id for the invoke protocol
//! - [`Flow`] - inbound/outbound marker used by transport adapters
//! - [`ErrorCode`] - unified machine-readable error interface

mod error;
mod flow;
mod id;

pub use error::{assert_error_codes, ErrorCode};
pub use flow::Flow;
pub use id::{InvokeId, Tag};

//! Weft runtime: event bus, invoke protocol, transports.
//!
//! The runtime layer of the weft workspace. One [`Context`] is an
//! in-process event bus; the invoke layer turns correlated events on
//! that bus into request/response and streaming RPC; transport adapters
//! splice remote buses in without the invoke layer noticing.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        weft-runtime                           │
//! │  ┌──────────────┐  ┌───────────────────┐  ┌────────────────┐  │
//! │  │   Context    │  │   invoke clients   │  │  remote methods│  │
//! │  │ emit/on/off  │◄─┤   and handlers     │◄─┤  (stub rewrite)│  │
//! │  └──────┬───────┘  └───────────────────┘  └────────────────┘  │
//! │         │ wildcard listener / inbound re-emit                 │
//! │  ┌──────▼───────┐                                             │
//! │  │  transports  │  ChannelTransport, adapter contract         │
//! │  └──────────────┘                                             │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use serde_json::json;
//! use weft_event::InvokeFamily;
//! use weft_runtime::{
//!     define_invoke, define_invoke_handler, Context, InvokeHandler, Reply,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let ctx = Context::new();
//! let family = InvokeFamily::new("greet");
//!
//! let _guard = define_invoke_handler(
//!     &ctx,
//!     &family,
//!     InvokeHandler::new(|input, _cx| async move {
//!         let name = input
//!             .into_value()
//!             .and_then(|v| v.get("name").cloned())
//!             .unwrap_or(json!("world"));
//!         Ok(Reply::new(json!({ "greeting": format!("hello, {}", name.as_str().unwrap_or("?")) })))
//!     }),
//! );
//!
//! let client = define_invoke(&ctx, &family);
//! let reply = client.call(json!({ "name": "alice" })).await.unwrap();
//! assert_eq!(reply, json!({ "greeting": "hello, alice" }));
//! # }
//! ```
//!
//! # Threading Model
//!
//! Dispatch is synchronous and listener tables are mutated behind short
//! critical sections; handler execution, request pumps, timers, and
//! abort delivery run as tokio tasks. A context may be shared across
//! tasks freely (it is `Send + Sync` and cheap to clone).

mod abort;
mod context;
mod error;
mod invoke;
mod remote;
mod transport;

pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use context::{
    Context, EmitOptions, Listener, ListenTarget, LISTENER_ERROR_EVENT,
};
pub use error::{InvokeError, RemoteError, TransportError};
pub use invoke::{
    define_invoke, define_invoke_handler, define_stream_invoke, define_stream_invoke_handler,
    undefine_invoke_handler, undefine_stream_invoke_handler, CallOptions, HandlerCx, HandlerGuard,
    InvokeClient, InvokeHandler, InvokeInput, InvokeStream, Reply, RequestStream, StreamHandler,
    StreamInvokeClient,
};
pub use remote::{
    DisallowedTag, RemoteDisposer, RemoteHandler, RemoteInvocation, RemoteInvokeClient,
    RemoteMethod, RemoteMethods, RemoteOptions, RemotePayload, DEFAULT_TAG_PREFIX, STUB_MARKER,
};
pub use transport::{
    bind_transport, bind_transport_with, ChannelTransport, Frame, Transport, TransportBinding,
    TransportConfig, TransportEvent, TRANSPORT_ERROR_EVENT, TRANSPORT_FATAL_EVENT,
};

// Re-export the SDK layer for convenience
pub use weft_event::{
    decode_body, encode_body, Envelope, EventDesc, EventKind, InvokeAbortPayload,
    InvokeEndPayload, InvokeErrorPayload, InvokeFamily, InvokePayload, InvokeRole, Matcher,
};
pub use weft_types::{ErrorCode, Flow, InvokeId, Tag};

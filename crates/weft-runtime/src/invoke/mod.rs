//! The invoke protocol: request/response and streaming RPC over the bus.
//!
//! Invoke messages are ordinary events. One [`InvokeFamily`] derives
//! the descriptors; clients and handlers meet on them:
//!
//! [`InvokeFamily`]: weft_event::InvokeFamily
//!
//! ```text
//! client                      bus                       handler
//!   │  send {invokeId, content}                            │
//!   ├────────────────────────────────────────────────────► │
//!   │                                                run handler
//!   │            receive:{invokeId} {content}              │
//!   │ ◄────────────────────────────────────────────────────┤
//! settle                                                   │
//! ```
//!
//! Request modes: unary, client-streaming (chunks marked `isReqStream`
//! then `send-stream-end`), aborted (`send-abort`). Response modes:
//! unary and server-streaming. All combinations share the same wire
//! shapes; correlation ids keep concurrent calls apart.

pub mod client;
pub mod handler;
pub mod streaming;

use crate::abort::AbortSignal;
use crate::context::EmitOptions;
use crate::error::InvokeError;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use weft_event::encode_body;

pub use client::{define_invoke, InvokeClient};
pub use handler::{define_invoke_handler, undefine_invoke_handler, HandlerGuard};
pub use streaming::{
    define_stream_invoke, define_stream_invoke_handler, undefine_stream_invoke_handler,
    InvokeStream, StreamInvokeClient,
};

/// Per-call options for invoke clients.
///
/// `emit` is forwarded untouched on every event the call emits; the
/// cancellation signal is consumed by the call itself and never
/// forwarded.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Cancellation signal for this call.
    pub signal: Option<AbortSignal>,
    /// Overall deadline. A unary call settles with `INVOKE_TIMEOUT`
    /// when it elapses; a streaming call raises the same error at the
    /// consumer and aborts the peer.
    pub timeout: Option<Duration>,
    /// Side-channel options forwarded on emitted events.
    pub emit: EmitOptions,
}

impl CallOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a cancellation signal.
    #[must_use]
    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Attaches a per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches side-channel emit options.
    #[must_use]
    pub fn with_emit(mut self, emit: EmitOptions) -> Self {
        self.emit = emit;
        self
    }
}

/// A handler's response: the content plus optional side-channel extras
/// carried on the `receive` emission.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Response content delivered to the caller.
    pub content: Value,
    /// Side-channel options attached to the reply emission.
    pub options: EmitOptions,
}

impl Reply {
    /// A bare reply with no extras.
    #[must_use]
    pub fn new(content: Value) -> Self {
        Self {
            content,
            options: EmitOptions::new(),
        }
    }

    /// Attaches side-channel extras.
    #[must_use]
    pub fn with_options(mut self, options: EmitOptions) -> Self {
        self.options = options;
        self
    }
}

impl From<Value> for Reply {
    fn from(content: Value) -> Self {
        Self::new(content)
    }
}

/// The request a handler receives: a plain value, or the consumer side
/// of a client-streaming request.
pub enum InvokeInput {
    /// Unary request content.
    Value(Value),
    /// Chunk sequence of a client-streaming request.
    Stream(RequestStream),
}

impl InvokeInput {
    /// Returns the unary content, if this is a unary request.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Stream(_) => None,
        }
    }

    /// Consumes into the unary content, if this is a unary request.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Stream(_) => None,
        }
    }

    /// Consumes into the request stream, if this is a streaming request.
    #[must_use]
    pub fn into_stream(self) -> Option<RequestStream> {
        match self {
            Self::Value(_) => None,
            Self::Stream(s) => Some(s),
        }
    }

    /// Returns `true` for a streaming request.
    #[must_use]
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl std::fmt::Debug for InvokeInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Consumer side of a client-streaming request.
///
/// Yields each chunk in arrival order; yields an error item when the
/// request producer failed (`send-error`) or the call was aborted, then
/// ends.
pub struct RequestStream {
    rx: mpsc::UnboundedReceiver<Result<Value, InvokeError>>,
}

impl RequestStream {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<Result<Value, InvokeError>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

impl futures::Stream for RequestStream {
    type Item = Result<Value, InvokeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for RequestStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RequestStream(..)")
    }
}

/// Per-invocation context handed to handlers.
#[derive(Debug, Clone)]
pub struct HandlerCx {
    /// Cooperative cancellation signal for this invocation.
    pub signal: AbortSignal,
    /// Side-channel options the caller forwarded.
    pub options: EmitOptions,
}

/// A unary invoke handler.
///
/// Cheap handle around an `Arc` callback; identity-based dedupe applies
/// when the same handle is registered twice against one family.
#[derive(Clone)]
pub struct InvokeHandler {
    f: Arc<dyn Fn(InvokeInput, HandlerCx) -> BoxFuture<'static, Result<Reply, Value>> + Send + Sync>,
}

impl InvokeHandler {
    /// Wraps an async handler.
    ///
    /// The handler resolves with a [`Reply`] (anything `Into<Reply>`
    /// works via `?`-free conversion at the call site) or raises an
    /// error value delivered to the caller as `receive-error`.
    #[must_use]
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(InvokeInput, HandlerCx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Reply, Value>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |input, cx| Box::pin(f(input, cx))),
        }
    }

    /// Returns `true` if both handles wrap the same handler.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }

    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.f) as *const () as usize
    }

    pub(crate) fn call(
        &self,
        input: InvokeInput,
        cx: HandlerCx,
    ) -> BoxFuture<'static, Result<Reply, Value>> {
        (self.f)(input, cx)
    }
}

impl std::fmt::Debug for InvokeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InvokeHandler({:#x})", self.key())
    }
}

/// A streaming invoke producer.
///
/// Resolves with the response stream; each `Ok` item becomes one
/// `receive` chunk, an `Err` item (or a failed resolution) becomes
/// `receive-error`, and a clean end becomes `receive-stream-end`.
#[derive(Clone)]
pub struct StreamHandler {
    #[allow(clippy::type_complexity)]
    f: Arc<
        dyn Fn(
                InvokeInput,
                HandlerCx,
            )
                -> BoxFuture<'static, Result<BoxStream<'static, Result<Value, Value>>, Value>>
            + Send
            + Sync,
    >,
}

impl StreamHandler {
    /// Wraps an async producer.
    #[must_use]
    pub fn new<F, Fut, S>(f: F) -> Self
    where
        F: Fn(InvokeInput, HandlerCx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<S, Value>> + Send + 'static,
        S: futures::Stream<Item = Result<Value, Value>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |input, cx| {
                let fut = f(input, cx);
                Box::pin(async move {
                    fut.await
                        .map(|s| Box::pin(s) as BoxStream<'static, Result<Value, Value>>)
                })
            }),
        }
    }

    /// Returns `true` if both handles wrap the same producer.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }

    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.f) as *const () as usize
    }

    pub(crate) fn call(
        &self,
        input: InvokeInput,
        cx: HandlerCx,
    ) -> BoxFuture<'static, Result<BoxStream<'static, Result<Value, Value>>, Value>> {
        (self.f)(input, cx)
    }
}

impl std::fmt::Debug for StreamHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamHandler({:#x})", self.key())
    }
}

/// Request body of a call: unary content or a chunk stream.
pub(crate) enum RequestBody {
    Unary(Value),
    Streaming(BoxStream<'static, Result<Value, Value>>),
}

/// Encodes an invoke body shape into an envelope body.
///
/// The shapes serialize infallibly; `Null` stands in if they ever do
/// not, so emission paths never panic.
pub(crate) fn body_of<T: Serialize>(payload: &T) -> Value {
    encode_body(payload).unwrap_or(Value::Null)
}

/// Resolves with the reason when an optional signal trips; pends
/// forever when no signal was supplied.
pub(crate) async fn wait_abort(signal: &Option<AbortSignal>) -> Value {
    match signal {
        Some(signal) => signal.aborted().await,
        None => std::future::pending().await,
    }
}

/// Resolves with the carried error when the context goes fatal.
pub(crate) async fn wait_fatal(
    mut rx: tokio::sync::watch::Receiver<Option<Value>>,
) -> Value {
    let result = rx.wait_for(Option::is_some).await.map(|value| (*value).clone());
    match result {
        Ok(value) => value.unwrap_or(Value::Null),
        Err(_) => std::future::pending().await,
    }
}

/// Resolves with the elapsed milliseconds when an optional deadline
/// passes; pends forever when no deadline was set.
pub(crate) async fn wait_timeout(timeout: Option<Duration>) -> u64 {
    match timeout {
        Some(duration) => {
            tokio::time::sleep(duration).await;
            duration.as_millis() as u64
        }
        None => std::future::pending().await,
    }
}

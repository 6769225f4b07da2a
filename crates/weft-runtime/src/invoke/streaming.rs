//! Streaming invoke: pull-based response sequences.
//!
//! The client opens a call and gets an [`InvokeStream`]:
//!
//! - yields each `receive:{id}` content in arrival order,
//! - ends cleanly on `receive-stream-end:{id}`,
//! - raises on `receive-error:{id}`, caller cancellation, a fatal
//!   event, or the call deadline.
//!
//! Dropping the stream before a terminal signal counts as cancelling the
//! pull: `send-abort` is emitted and the per-call listeners come down.
//!
//! The server side drives an async producer: every yielded value becomes
//! one `receive` chunk, normal return becomes `receive-stream-end`, any
//! raised error becomes `receive-error`.

use crate::context::{Context, EmitOptions, Listener};
use crate::error::InvokeError;
use crate::invoke::client::ListenerSet;
use crate::invoke::handler::{register_driver, remove_handlers, Driver, HandlerGuard};
use crate::invoke::{
    body_of, wait_abort, wait_fatal, wait_timeout, CallOptions, RequestBody, StreamHandler,
};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use weft_event::{
    decode_body, Envelope, InvokeAbortPayload, InvokeErrorPayload, InvokeFamily, InvokePayload,
};
use weft_types::InvokeId;

/// Creates a streaming invoke client for a family.
#[must_use]
pub fn define_stream_invoke(ctx: &Context, family: &InvokeFamily) -> StreamInvokeClient {
    StreamInvokeClient {
        ctx: ctx.clone(),
        family: family.clone(),
    }
}

/// Registers a streaming producer for a family.
///
/// Registering the same producer handle twice is a no-op, mirroring the
/// unary rule.
pub fn define_stream_invoke_handler(
    ctx: &Context,
    family: &InvokeFamily,
    producer: StreamHandler,
) -> HandlerGuard {
    let key = producer.key();
    register_driver(ctx, family, key, Driver::Stream(producer))
}

/// Removes one streaming producer (by handle) or every handler of a
/// family. Returns the number of registrations removed.
pub fn undefine_stream_invoke_handler(
    ctx: &Context,
    family: &InvokeFamily,
    producer: Option<&StreamHandler>,
) -> usize {
    remove_handlers(ctx, family.tag(), producer.map(StreamHandler::key))
}

/// Streaming invoke client.
#[derive(Debug, Clone)]
pub struct StreamInvokeClient {
    ctx: Context,
    family: InvokeFamily,
}

impl StreamInvokeClient {
    /// The family this client calls.
    #[must_use]
    pub fn family(&self) -> &InvokeFamily {
        &self.family
    }

    /// Opens a call with a unary request body.
    #[must_use]
    pub fn open(&self, req: Value) -> InvokeStream {
        self.open_with(req, CallOptions::new())
    }

    /// Opens a call with a unary request body and per-call options.
    ///
    /// A configured `timeout` is the deadline for the whole stream: if
    /// it elapses before a terminal signal, the sequence raises
    /// `INVOKE_TIMEOUT` at the consumer and the peer is aborted.
    #[must_use]
    pub fn open_with(&self, req: Value, options: CallOptions) -> InvokeStream {
        self.start(RequestBody::Unary(req), options)
    }

    /// Opens a call with a streaming request body.
    #[must_use]
    pub fn open_streaming<S>(&self, req: S) -> InvokeStream
    where
        S: Stream<Item = Result<Value, Value>> + Send + 'static,
    {
        self.open_streaming_with(req, CallOptions::new())
    }

    /// Streaming-request variant with per-call options; `timeout`
    /// behaves as in [`open_with`](Self::open_with).
    #[must_use]
    pub fn open_streaming_with<S>(&self, req: S, options: CallOptions) -> InvokeStream
    where
        S: Stream<Item = Result<Value, Value>> + Send + 'static,
    {
        self.start(RequestBody::Streaming(req.boxed()), options)
    }

    fn start(&self, body: RequestBody, options: CallOptions) -> InvokeStream {
        let id = InvokeId::generate();
        let (tx, rx) = mpsc::unbounded_channel::<StreamEvent>();

        // Pre-tripped signal: no listeners, no request, just the abort.
        if let Some(signal) = &options.signal {
            if signal.is_aborted() {
                let reason = signal.reason().unwrap_or(Value::Null);
                emit_abort(&self.ctx, &self.family, &id, reason.clone());
                let _ = tx.send(StreamEvent::Error(InvokeError::aborted(reason)));
                return InvokeStream {
                    rx,
                    ctx: self.ctx.clone(),
                    family: self.family.clone(),
                    id,
                    listeners: None,
                    watcher: None,
                    done: false,
                };
            }
        }

        let mut listeners = ListenerSet::new(self.ctx.clone());
        listeners.add(self.family.receive_for(&id), item_listener(tx.clone(), id.clone()));
        listeners.add(
            self.family.receive_error_for(&id),
            error_listener(tx.clone(), id.clone()),
        );
        listeners.add(
            self.family.receive_stream_end_for(&id),
            end_listener(tx.clone(), id.clone()),
        );

        debug!(family = %self.family.tag(), %id, "stream invoke open");
        match body {
            RequestBody::Unary(content) => self.ctx.emit_with(
                self.family.send(),
                body_of(&InvokePayload::unary(id.clone(), content)),
                options.emit.clone(),
            ),
            RequestBody::Streaming(stream) => super::client::spawn_request_pump(
                self.ctx.clone(),
                self.family.clone(),
                id.clone(),
                stream,
                options.clone(),
            ),
        }

        // Terminal signals that do not arrive over the bus: caller
        // cancellation, fatal events, and the call deadline.
        let watcher = {
            let ctx = self.ctx.clone();
            let family = self.family.clone();
            let id = id.clone();
            let signal = options.signal.clone();
            let timeout = options.timeout;
            let fatal_rx = ctx.fatal_watch();
            tokio::spawn(async move {
                tokio::select! {
                    reason = wait_abort(&signal) => {
                        debug!(family = %family.tag(), %id, "stream invoke aborted by caller");
                        emit_abort(&ctx, &family, &id, reason.clone());
                        let _ = tx.send(StreamEvent::Error(InvokeError::aborted(reason)));
                    }
                    error = wait_fatal(fatal_rx) => {
                        debug!(family = %family.tag(), %id, "stream invoke rejected by fatal event");
                        let _ = tx.send(StreamEvent::Error(InvokeError::Fatal { error }));
                    }
                    ms = wait_timeout(timeout) => {
                        debug!(family = %family.tag(), %id, "stream invoke timed out");
                        emit_abort(&ctx, &family, &id, json!("timeout"));
                        let _ = tx.send(StreamEvent::Error(InvokeError::Timeout { ms }));
                    }
                }
            })
        };

        InvokeStream {
            rx,
            ctx: self.ctx.clone(),
            family: self.family.clone(),
            id,
            listeners: Some(listeners),
            watcher: Some(watcher),
            done: false,
        }
    }
}

enum StreamEvent {
    Item(Value),
    End,
    Error(InvokeError),
}

fn emit_abort(ctx: &Context, family: &InvokeFamily, id: &InvokeId, reason: Value) {
    ctx.emit(
        family.send_abort(),
        body_of(&InvokeAbortPayload {
            invoke_id: id.clone(),
            reason,
        }),
    );
}

fn item_listener(tx: mpsc::UnboundedSender<StreamEvent>, id: InvokeId) -> Listener {
    Listener::new(move |env: &Envelope, _: &EmitOptions| {
        let Ok(payload) = decode_body::<InvokePayload>(&env.body) else {
            return;
        };
        if payload.invoke_id == id {
            let _ = tx.send(StreamEvent::Item(payload.content));
        }
    })
}

fn error_listener(tx: mpsc::UnboundedSender<StreamEvent>, id: InvokeId) -> Listener {
    Listener::new(move |env: &Envelope, _: &EmitOptions| {
        let Ok(payload) = decode_body::<InvokeErrorPayload>(&env.body) else {
            return;
        };
        if payload.invoke_id == id {
            let _ = tx.send(StreamEvent::Error(InvokeError::Rejected {
                error: payload.error,
            }));
        }
    })
}

fn end_listener(tx: mpsc::UnboundedSender<StreamEvent>, id: InvokeId) -> Listener {
    Listener::new(move |env: &Envelope, _: &EmitOptions| {
        let Ok(payload) = decode_body::<weft_event::InvokeEndPayload>(&env.body) else {
            return;
        };
        if payload.invoke_id == id {
            let _ = tx.send(StreamEvent::End);
        }
    })
}

/// Pull-based response sequence of one streaming call.
///
/// After any terminal signal (clean end, error, abort, fatal, timeout)
/// the per-call listeners are removed and no further callbacks run for
/// this call. Dropping the stream early cancels the call.
pub struct InvokeStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    ctx: Context,
    family: InvokeFamily,
    id: InvokeId,
    listeners: Option<ListenerSet>,
    watcher: Option<JoinHandle<()>>,
    done: bool,
}

impl InvokeStream {
    /// Correlation id of this call.
    #[must_use]
    pub fn invoke_id(&self) -> &InvokeId {
        &self.id
    }

    fn finish(&mut self) {
        self.done = true;
        self.listeners.take();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl Stream for InvokeStream {
    type Item = Result<Value, InvokeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(StreamEvent::Item(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(StreamEvent::End)) => {
                self.finish();
                Poll::Ready(None)
            }
            Poll::Ready(Some(StreamEvent::Error(error))) => {
                self.finish();
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                self.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for InvokeStream {
    fn drop(&mut self) {
        if !self.done {
            // Consumer cancelled the pull.
            debug!(family = %self.family.tag(), id = %self.id, "stream invoke dropped; aborting");
            emit_abort(&self.ctx, &self.family, &self.id, json!("Aborted"));
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        // `listeners` drops here, removing the per-call registrations.
    }
}

impl std::fmt::Debug for InvokeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeStream")
            .field("family", self.family.tag())
            .field("id", &self.id)
            .field("done", &self.done)
            .finish()
    }
}

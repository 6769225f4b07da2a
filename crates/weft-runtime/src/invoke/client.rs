//! Client side of unary invoke.
//!
//! A call settles exactly once, with the first of:
//!
//! 1. the matching `receive:{id}` content (fulfilled),
//! 2. the matching `receive-error:{id}` error (rejected),
//! 3. "Aborted" when the caller's signal trips (after emitting
//!    `send-abort`),
//! 4. the carried error when a registered fatal event fires,
//! 5. `INVOKE_TIMEOUT` when a per-call timeout elapses.
//!
//! Per-call listeners are registered on id-suffixed descriptors and are
//! removed on every settlement path by a drop guard, so listener
//! registrations minus removals always returns to zero.

use crate::context::{Context, EmitOptions, Listener};
use crate::error::InvokeError;
use crate::invoke::{body_of, wait_abort, wait_fatal, wait_timeout, CallOptions, RequestBody};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;
use weft_event::{
    decode_body, Envelope, EventDesc, InvokeAbortPayload, InvokeEndPayload, InvokeErrorPayload,
    InvokeFamily, InvokePayload,
};
use weft_types::InvokeId;

/// Creates a unary invoke client for a family.
#[must_use]
pub fn define_invoke(ctx: &Context, family: &InvokeFamily) -> InvokeClient {
    InvokeClient {
        ctx: ctx.clone(),
        family: family.clone(),
    }
}

/// Unary invoke client.
///
/// Cheaply cloneable; concurrent calls on one client (or on many
/// clients of the same family) are isolated solely by correlation id.
#[derive(Debug, Clone)]
pub struct InvokeClient {
    ctx: Context,
    family: InvokeFamily,
}

impl InvokeClient {
    /// The family this client calls.
    #[must_use]
    pub fn family(&self) -> &InvokeFamily {
        &self.family
    }

    /// Calls with a unary request body.
    pub async fn call(&self, req: Value) -> Result<Value, InvokeError> {
        self.call_with(req, CallOptions::new()).await
    }

    /// Calls with a unary request body and per-call options.
    pub async fn call_with(&self, req: Value, options: CallOptions) -> Result<Value, InvokeError> {
        self.run(RequestBody::Unary(req), options).await
    }

    /// Calls with a streaming request body.
    ///
    /// Each `Ok` item is emitted as a `send` chunk, a clean end as
    /// `send-stream-end`, and an `Err` item as `send-error` (after which
    /// pumping stops). The call still settles from the response side.
    pub async fn call_streaming<S>(&self, req: S) -> Result<Value, InvokeError>
    where
        S: Stream<Item = Result<Value, Value>> + Send + 'static,
    {
        self.call_streaming_with(req, CallOptions::new()).await
    }

    /// Streaming-request call with per-call options.
    pub async fn call_streaming_with<S>(
        &self,
        req: S,
        options: CallOptions,
    ) -> Result<Value, InvokeError>
    where
        S: Stream<Item = Result<Value, Value>> + Send + 'static,
    {
        self.run(RequestBody::Streaming(req.boxed()), options).await
    }

    async fn run(&self, body: RequestBody, options: CallOptions) -> Result<Value, InvokeError> {
        let id = InvokeId::generate();

        // A signal tripped before work begins aborts without emitting
        // the request at all.
        if let Some(signal) = &options.signal {
            if signal.is_aborted() {
                let reason = signal.reason().unwrap_or(Value::Null);
                self.emit_abort(&id, reason.clone());
                return Err(InvokeError::aborted(reason));
            }
        }

        let (tx, rx) = oneshot::channel::<Result<Value, InvokeError>>();
        let settle = Arc::new(Mutex::new(Some(tx)));

        let mut listeners = ListenerSet::new(self.ctx.clone());
        listeners.add(
            self.family.receive_for(&id),
            reply_listener(settle.clone(), id.clone()),
        );
        listeners.add(
            self.family.receive_error_for(&id),
            error_listener(settle.clone(), id.clone()),
        );

        debug!(family = %self.family.tag(), %id, "invoke call start");
        match body {
            RequestBody::Unary(content) => self.ctx.emit_with(
                self.family.send(),
                body_of(&InvokePayload::unary(id.clone(), content)),
                options.emit.clone(),
            ),
            RequestBody::Streaming(stream) => spawn_request_pump(
                self.ctx.clone(),
                self.family.clone(),
                id.clone(),
                stream,
                options.clone(),
            ),
        }

        let fatal_rx = self.ctx.fatal_watch();
        let result = tokio::select! {
            settled = rx => match settled {
                Ok(result) => result,
                Err(_) => Err(InvokeError::ChannelClosed),
            },
            reason = wait_abort(&options.signal) => {
                debug!(family = %self.family.tag(), %id, "invoke call aborted by caller");
                self.emit_abort(&id, reason.clone());
                Err(InvokeError::aborted(reason))
            }
            error = wait_fatal(fatal_rx) => {
                debug!(family = %self.family.tag(), %id, "invoke call rejected by fatal event");
                Err(InvokeError::Fatal { error })
            }
            ms = wait_timeout(options.timeout) => {
                debug!(family = %self.family.tag(), %id, "invoke call timed out");
                Err(InvokeError::Timeout { ms })
            }
        };

        // Per-call listeners come down on every settlement path.
        drop(listeners);
        result
    }

    fn emit_abort(&self, id: &InvokeId, reason: Value) {
        self.ctx.emit(
            self.family.send_abort(),
            body_of(&InvokeAbortPayload {
                invoke_id: id.clone(),
                reason,
            }),
        );
    }
}

fn reply_listener(
    settle: Arc<Mutex<Option<oneshot::Sender<Result<Value, InvokeError>>>>>,
    id: InvokeId,
) -> Listener {
    Listener::new(move |env: &Envelope, _: &EmitOptions| {
        let Ok(payload) = decode_body::<InvokePayload>(&env.body) else {
            return;
        };
        if payload.invoke_id != id {
            return;
        }
        if let Some(tx) = settle.lock().take() {
            let _ = tx.send(Ok(payload.content));
        }
    })
}

fn error_listener(
    settle: Arc<Mutex<Option<oneshot::Sender<Result<Value, InvokeError>>>>>,
    id: InvokeId,
) -> Listener {
    Listener::new(move |env: &Envelope, _: &EmitOptions| {
        let Ok(payload) = decode_body::<InvokeErrorPayload>(&env.body) else {
            return;
        };
        if payload.invoke_id != id {
            return;
        }
        if let Some(tx) = settle.lock().take() {
            let _ = tx.send(Err(InvokeError::Rejected {
                error: payload.error,
            }));
        }
    })
}

/// Pumps a streaming request body onto the bus.
///
/// The pump observes the caller's signal between chunks: once tripped it
/// stops emitting and does not send `send-error`; the abort path owns
/// termination.
pub(crate) fn spawn_request_pump(
    ctx: Context,
    family: InvokeFamily,
    id: InvokeId,
    mut stream: futures::stream::BoxStream<'static, Result<Value, Value>>,
    options: CallOptions,
) {
    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                item = stream.next() => item,
                _ = wait_abort(&options.signal) => {
                    debug!(family = %family.tag(), %id, "request pump stopped by abort");
                    return;
                }
            };
            match item {
                Some(Ok(chunk)) => ctx.emit_with(
                    family.send(),
                    body_of(&InvokePayload::chunk(id.clone(), chunk)),
                    options.emit.clone(),
                ),
                Some(Err(error)) => {
                    debug!(family = %family.tag(), %id, "request producer failed");
                    ctx.emit(
                        family.send_error(),
                        body_of(&InvokeErrorPayload {
                            invoke_id: id.clone(),
                            error,
                        }),
                    );
                    return;
                }
                None => {
                    ctx.emit(
                        family.send_stream_end(),
                        body_of(&InvokeEndPayload {
                            invoke_id: id.clone(),
                        }),
                    );
                    return;
                }
            }
        }
    });
}

/// Registered per-call listeners, removed together on drop.
///
/// Whatever path settles the call, dropping the set drains every
/// registration, so registrations minus removals always returns to
/// zero.
pub(crate) struct ListenerSet {
    ctx: Context,
    entries: Vec<(EventDesc, Listener)>,
}

impl ListenerSet {
    pub(crate) fn new(ctx: Context) -> Self {
        Self {
            ctx,
            entries: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, desc: EventDesc, listener: Listener) {
        self.ctx.on(&desc, listener.clone());
        self.entries.push((desc, listener));
    }
}

impl Drop for ListenerSet {
    fn drop(&mut self) {
        for (desc, listener) in self.entries.drain(..) {
            self.ctx.off(&desc, Some(&listener));
        }
    }
}

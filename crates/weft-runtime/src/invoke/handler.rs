//! Server side of the invoke protocol.
//!
//! Handler registration installs standing listeners on a family's four
//! send-side descriptors. Per invocation, the server keeps three tables
//! keyed by correlation id:
//!
//! | Table | Holds | Retired |
//! |-------|-------|---------|
//! | inputs | streaming-request controller | on `send-stream-end` / abort |
//! | aborts | the invocation's [`AbortHandle`] | when the handler finishes |
//! | deferred | abort reason that arrived early | when its handler starts |
//!
//! Event dispatch tolerates arrival-before-handler: a `send-abort` for an
//! invocation nobody has started yet parks its reason in the deferred
//! table, and the handler starts already cancelled (the token trips on
//! the next scheduler turn after handler start, so synchronously
//! installed observers see the trip).

use crate::abort::{abort_pair, AbortHandle};
use crate::context::{Context, EmitOptions, Listener};
use crate::error::InvokeError;
use crate::invoke::{
    body_of, HandlerCx, InvokeHandler, InvokeInput, Reply, RequestStream, StreamHandler,
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use weft_event::{
    decode_body, Envelope, EventDesc, InvokeAbortPayload, InvokeEndPayload, InvokeErrorPayload,
    InvokeFamily, InvokePayload,
};
use weft_types::{InvokeId, Tag};

/// Per-context server state for the invoke protocol.
///
/// Owned by the bus context, the way the pending-call side of a
/// request/response bus owns its routing tables.
#[derive(Default)]
pub(crate) struct ServerTables {
    /// Registered handlers per family tag.
    pub(crate) handlers: Mutex<HashMap<Tag, Vec<HandlerRecord>>>,
    /// Streaming-request controllers per live invocation.
    pub(crate) inputs: Mutex<HashMap<InvokeId, mpsc::UnboundedSender<Result<Value, InvokeError>>>>,
    /// Cooperative cancellation handles per live invocation.
    pub(crate) aborts: Mutex<HashMap<InvokeId, AbortHandle>>,
    /// Abort reasons that arrived before their handler started.
    pub(crate) deferred: Mutex<HashMap<InvokeId, Value>>,
}

/// One handler registration: its identity plus the bus listeners it owns.
pub(crate) struct HandlerRecord {
    pub(crate) key: usize,
    pub(crate) listeners: Vec<(EventDesc, Listener)>,
}

/// Unary handler or streaming producer, behind one registration path.
#[derive(Clone)]
pub(crate) enum Driver {
    Unary(InvokeHandler),
    Stream(StreamHandler),
}

/// Removal guard for one handler registration.
///
/// Disposes on drop; hold it for as long as the handler should stay
/// registered, or call [`dispose`](Self::dispose) explicitly.
#[must_use = "dropping the guard unregisters the handler"]
pub struct HandlerGuard {
    ctx: Context,
    tag: Tag,
    key: usize,
    disposed: bool,
}

impl HandlerGuard {
    fn live(ctx: Context, tag: Tag, key: usize) -> Self {
        Self {
            ctx,
            tag,
            key,
            disposed: false,
        }
    }

    /// A guard for a deduplicated (already present) registration; it
    /// owns nothing and disposes nothing.
    fn inert(ctx: Context, tag: Tag, key: usize) -> Self {
        Self {
            ctx,
            tag,
            key,
            disposed: true,
        }
    }

    /// Removes this handler's listeners. Idempotent.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        remove_handlers(&self.ctx, &self.tag, Some(self.key));
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for HandlerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerGuard")
            .field("family", &self.tag)
            .field("disposed", &self.disposed)
            .finish()
    }
}

/// Registers a unary handler for a family.
///
/// Registering the same handler handle against the same family twice is
/// a no-op (the returned guard owns nothing). Different handlers may
/// coexist on one family; each sees every request.
pub fn define_invoke_handler(
    ctx: &Context,
    family: &InvokeFamily,
    handler: InvokeHandler,
) -> HandlerGuard {
    let key = handler.key();
    register_driver(ctx, family, key, Driver::Unary(handler))
}

/// Removes one handler (by handle) or every handler of a family.
///
/// Returns the number of registrations removed. Outstanding
/// [`HandlerGuard`]s for removed registrations become inert.
pub fn undefine_invoke_handler(
    ctx: &Context,
    family: &InvokeFamily,
    handler: Option<&InvokeHandler>,
) -> usize {
    remove_handlers(ctx, family.tag(), handler.map(InvokeHandler::key))
}

pub(crate) fn register_driver(
    ctx: &Context,
    family: &InvokeFamily,
    key: usize,
    driver: Driver,
) -> HandlerGuard {
    let mut listeners: Vec<(EventDesc, Listener)> = Vec::with_capacity(4);

    let send = Listener::new({
        let ctx = ctx.clone();
        let family = family.clone();
        let driver = driver.clone();
        move |env: &Envelope, opts: &EmitOptions| on_send(&ctx, &family, &driver, env, opts)
    });
    listeners.push((family.send().clone(), send));

    let end = Listener::new({
        let ctx = ctx.clone();
        let family = family.clone();
        let driver = driver.clone();
        move |env: &Envelope, opts: &EmitOptions| on_stream_end(&ctx, &family, &driver, env, opts)
    });
    listeners.push((family.send_stream_end().clone(), end));

    let err = Listener::new({
        let ctx = ctx.clone();
        move |env: &Envelope, _: &EmitOptions| on_send_error(&ctx, env)
    });
    listeners.push((family.send_error().clone(), err));

    let abort = Listener::new({
        let ctx = ctx.clone();
        move |env: &Envelope, _: &EmitOptions| on_send_abort(&ctx, env)
    });
    listeners.push((family.send_abort().clone(), abort));

    {
        let mut handlers = ctx.inner.server.handlers.lock();
        let records = handlers.entry(family.tag().clone()).or_default();
        if records.iter().any(|r| r.key == key) {
            debug!(family = %family.tag(), "handler already registered; ignoring");
            return HandlerGuard::inert(ctx.clone(), family.tag().clone(), key);
        }
        records.push(HandlerRecord {
            key,
            listeners: listeners.clone(),
        });
    }

    for (desc, listener) in listeners {
        ctx.on(&desc, listener);
    }
    debug!(family = %family.tag(), "invoke handler registered");
    HandlerGuard::live(ctx.clone(), family.tag().clone(), key)
}

pub(crate) fn remove_handlers(ctx: &Context, tag: &Tag, key: Option<usize>) -> usize {
    let removed: Vec<HandlerRecord> = {
        let mut handlers = ctx.inner.server.handlers.lock();
        let Some(records) = handlers.get_mut(tag) else {
            return 0;
        };
        let removed = match key {
            Some(key) => {
                let mut extracted = Vec::new();
                records.retain_mut(|r| {
                    if r.key == key {
                        extracted.push(HandlerRecord {
                            key: r.key,
                            listeners: std::mem::take(&mut r.listeners),
                        });
                        false
                    } else {
                        true
                    }
                });
                extracted
            }
            None => records.drain(..).collect(),
        };
        if records.is_empty() {
            handlers.remove(tag);
        }
        removed
    };

    let count = removed.len();
    for record in removed {
        for (desc, listener) in record.listeners {
            ctx.off(&desc, Some(&listener));
        }
    }
    count
}

/// `send` listener: unary requests start the handler directly; stream
/// chunks feed (or create) the invocation's input controller.
fn on_send(ctx: &Context, family: &InvokeFamily, driver: &Driver, env: &Envelope, opts: &EmitOptions) {
    let payload: InvokePayload = match decode_body(&env.body) {
        Ok(p) => p,
        Err(e) => {
            warn!(event = %env.desc.id(), %e, "dropping malformed send payload");
            return;
        }
    };
    let id = payload.invoke_id.clone();

    if !payload.is_stream_chunk() {
        spawn_invocation(
            ctx,
            family,
            driver,
            InvokeInput::Value(payload.content),
            id,
            opts.clone(),
        );
        return;
    }

    let mut inputs = ctx.inner.server.inputs.lock();
    if let Some(tx) = inputs.get(&id) {
        // Controller exists: push this chunk. A closed receiver means the
        // handler already finished; the entry stays as a tombstone until
        // stream-end or abort retires it.
        let _ = tx.send(Ok(payload.content));
        return;
    }

    // First chunk of a new streaming request.
    let (tx, stream) = RequestStream::channel();
    let deferred = ctx.inner.server.deferred.lock().get(&id).cloned();
    match deferred {
        Some(reason) => {
            // Abort raced ahead of the request: hand the handler an
            // already-errored, closed input.
            let _ = tx.send(Err(InvokeError::aborted(reason)));
        }
        None => {
            let _ = tx.send(Ok(payload.content));
            inputs.insert(id.clone(), tx);
        }
    }
    drop(inputs);
    spawn_invocation(ctx, family, driver, InvokeInput::Stream(stream), id, opts.clone());
}

/// `send-stream-end` listener: closes the controller; with no chunks
/// observed, the handler still runs and sees an empty-then-ended input.
fn on_stream_end(
    ctx: &Context,
    family: &InvokeFamily,
    driver: &Driver,
    env: &Envelope,
    opts: &EmitOptions,
) {
    let payload: InvokeEndPayload = match decode_body(&env.body) {
        Ok(p) => p,
        Err(e) => {
            warn!(event = %env.desc.id(), %e, "dropping malformed stream-end payload");
            return;
        }
    };
    let id = payload.invoke_id;

    if ctx.inner.server.inputs.lock().remove(&id).is_some() {
        // Dropping the sender closes the stream.
        return;
    }

    // End without chunks: synthesize an empty input so handlers always
    // observe either "chunks then end" or "empty then end".
    let (tx, stream) = RequestStream::channel();
    if let Some(reason) = ctx.inner.server.deferred.lock().get(&id).cloned() {
        let _ = tx.send(Err(InvokeError::aborted(reason)));
    }
    drop(tx);
    spawn_invocation(ctx, family, driver, InvokeInput::Stream(stream), id, opts.clone());
}

/// `send-error` listener: the client's request producer failed; surface
/// it at the handler's read site and retire the controller.
fn on_send_error(ctx: &Context, env: &Envelope) {
    let payload: InvokeErrorPayload = match decode_body(&env.body) {
        Ok(p) => p,
        Err(e) => {
            warn!(event = %env.desc.id(), %e, "dropping malformed send-error payload");
            return;
        }
    };
    if let Some(tx) = ctx.inner.server.inputs.lock().remove(&payload.invoke_id) {
        let _ = tx.send(Err(InvokeError::Rejected {
            error: payload.error,
        }));
    } else {
        debug!(id = %payload.invoke_id, "send-error for unknown invocation");
    }
}

/// `send-abort` listener. Abort is not ordered with respect to `send`:
/// it may arrive before any chunk, between chunks, or after stream-end.
fn on_send_abort(ctx: &Context, env: &Envelope) {
    let payload: InvokeAbortPayload = match decode_body(&env.body) {
        Ok(p) => p,
        Err(e) => {
            warn!(event = %env.desc.id(), %e, "dropping malformed abort payload");
            return;
        }
    };
    let id = payload.invoke_id;
    let reason = payload.reason;

    let handle = ctx.inner.server.aborts.lock().get(&id).cloned();
    match handle {
        Some(handle) => {
            debug!(%id, "abort for running invocation; tripping token next turn");
            let trip_reason = reason.clone();
            tokio::spawn(async move {
                handle.abort(trip_reason);
            });
        }
        None => {
            debug!(%id, "abort before handler start; deferring reason");
            ctx.inner
                .server
                .deferred
                .lock()
                .insert(id.clone(), reason.clone());
        }
    }

    if let Some(tx) = ctx.inner.server.inputs.lock().remove(&id) {
        let _ = tx.send(Err(InvokeError::aborted(reason)));
    }
}

/// Clears the per-invocation tables on every handler termination path.
struct InvocationGuard {
    ctx: Context,
    id: InvokeId,
}

impl Drop for InvocationGuard {
    fn drop(&mut self) {
        self.ctx.inner.server.aborts.lock().remove(&self.id);
        self.ctx.inner.server.deferred.lock().remove(&self.id);
    }
}

/// Starts one invocation: installs the cancellation token, applies any
/// deferred abort, runs the driver, emits the terminal events.
fn spawn_invocation(
    ctx: &Context,
    family: &InvokeFamily,
    driver: &Driver,
    input: InvokeInput,
    id: InvokeId,
    options: EmitOptions,
) {
    let ctx = ctx.clone();
    let family = family.clone();
    let driver = driver.clone();
    tokio::spawn(async move {
        let (handle, signal) = abort_pair();
        ctx.inner.server.aborts.lock().insert(id.clone(), handle.clone());

        if let Some(reason) = ctx.inner.server.deferred.lock().remove(&id) {
            // Deferred trip: the handler must be able to install signal
            // observers before the token fires.
            let handle = handle.clone();
            tokio::spawn(async move {
                handle.abort(reason);
            });
        }

        let _guard = InvocationGuard {
            ctx: ctx.clone(),
            id: id.clone(),
        };
        let cx = HandlerCx {
            signal,
            options,
        };

        match driver {
            Driver::Unary(handler) => {
                debug!(family = %family.tag(), %id, "invoke handler start");
                match handler.call(input, cx).await {
                    Ok(Reply { content, options }) => {
                        debug!(family = %family.tag(), %id, "invoke handler resolved");
                        ctx.emit_with(
                            &family.receive_for(&id),
                            body_of(&InvokePayload::unary(id.clone(), content)),
                            options,
                        );
                    }
                    Err(error) => {
                        debug!(family = %family.tag(), %id, "invoke handler raised");
                        ctx.emit(
                            &family.receive_error_for(&id),
                            body_of(&InvokeErrorPayload {
                                invoke_id: id.clone(),
                                error,
                            }),
                        );
                    }
                }
            }
            Driver::Stream(producer) => {
                debug!(family = %family.tag(), %id, "stream producer start");
                match producer.call(input, cx).await {
                    Ok(mut stream) => {
                        while let Some(item) = stream.next().await {
                            match item {
                                Ok(chunk) => ctx.emit(
                                    &family.receive_for(&id),
                                    body_of(&InvokePayload::unary(id.clone(), chunk)),
                                ),
                                Err(error) => {
                                    debug!(family = %family.tag(), %id, "stream producer raised");
                                    ctx.emit(
                                        &family.receive_error_for(&id),
                                        body_of(&InvokeErrorPayload {
                                            invoke_id: id.clone(),
                                            error,
                                        }),
                                    );
                                    return;
                                }
                            }
                        }
                        debug!(family = %family.tag(), %id, "stream producer finished");
                        ctx.emit(
                            &family.receive_stream_end_for(&id),
                            body_of(&InvokeEndPayload {
                                invoke_id: id.clone(),
                            }),
                        );
                    }
                    Err(error) => {
                        debug!(family = %family.tag(), %id, "stream producer failed to start");
                        ctx.emit(
                            &family.receive_error_for(&id),
                            body_of(&InvokeErrorPayload {
                                invoke_id: id.clone(),
                                error,
                            }),
                        );
                    }
                }
            }
        }
    });
}

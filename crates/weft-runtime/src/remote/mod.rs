//! Remote methods: callables inside invoke payloads.
//!
//! An opt-in wrapper around unary invoke that lets request payloads
//! carry method values. On serialize, every [`RemoteMethod`] in the
//! payload tree registers a handler on a freshly tagged invoke family
//! and becomes a stub node:
//!
//! ```text
//! { "__weft_stub__": { "tag": "weft-fn:3fa9c14b06e2d875" } }
//! ```
//!
//! On deserialize, stub nodes whose tag passes the prefix check come
//! back as callables backed by unary invoke clients on the shared
//! context, so the receiving handler can call straight back into the
//! sender.
//!
//! # Guard Rails
//!
//! - Depth and method-count caps bound both walks.
//! - Tags failing the prefix check are ignored or rejected per
//!   [`RemoteOptions::on_disallowed_tag`].
//! - In strict mode a marker key with a malformed descriptor is a hard
//!   error.
//! - Map keys are never interpreted: `__proto__` and friends travel as
//!   inert data.
//!
//! # Lifecycle
//!
//! Every stub handler registered for a call is disposed exactly once, on
//! the first of: the call settling, [`RemoteInvocation::dispose`], the
//! invocation being dropped, or the `auto_dispose` timer elapsing.

mod deserialize;
mod serialize;

pub(crate) use deserialize::deserialize_payload;
pub(crate) use serialize::{serialize_payload, Serialized};

use crate::context::Context;
use crate::error::{InvokeError, RemoteError};
use crate::invoke::handler::{register_driver, Driver};
use crate::invoke::{
    define_invoke, CallOptions, HandlerCx, HandlerGuard, InvokeClient, InvokeHandler, Reply,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use weft_event::InvokeFamily;
use weft_types::ErrorCode;

/// Marker key identifying a method stub on the wire.
pub const STUB_MARKER: &str = "__weft_stub__";

/// Default prefix for generated stub tags.
pub const DEFAULT_TAG_PREFIX: &str = "weft-fn:";

/// Policy for stub tags that fail the prefix check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisallowedTag {
    /// Leave the node as plain data.
    #[default]
    Ignore,
    /// Fail the walk with `REMOTE_DISALLOWED_TAG`.
    Error,
}

/// Remote-method configuration.
///
/// Factory defaults apply to every call; per-call overrides replace
/// them wholesale via [`RemoteInvokeClient::call_with`].
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    /// Master switch. When off, payloads carrying methods are rejected
    /// and inbound stubs stay inert data.
    pub allow: bool,
    /// Maximum nesting depth either walk will follow.
    pub max_depth: usize,
    /// Maximum number of methods per payload, per direction.
    pub max_functions: usize,
    /// Prefix for generated stub tags; also the acceptance filter on
    /// deserialize when set.
    pub tag_prefix: Option<String>,
    /// What to do with stubs whose tag fails the prefix check.
    pub on_disallowed_tag: DisallowedTag,
    /// Dispose stub handlers after this long even if the call has not
    /// settled.
    pub auto_dispose: Option<Duration>,
    /// Treat malformed stub descriptors as hard errors.
    pub strict: bool,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            allow: true,
            max_depth: 16,
            max_functions: 32,
            tag_prefix: Some(DEFAULT_TAG_PREFIX.to_string()),
            on_disallowed_tag: DisallowedTag::Ignore,
            auto_dispose: None,
            strict: false,
        }
    }
}

/// An async callable carried inside a payload.
#[derive(Clone)]
pub struct RemoteMethod {
    f: Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, Value>> + Send + Sync>,
}

impl RemoteMethod {
    /// Wraps an async function.
    #[must_use]
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Value>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |arg| Box::pin(f(arg))),
        }
    }

    /// Calls the method.
    pub fn call(&self, arg: Value) -> BoxFuture<'static, Result<Value, Value>> {
        (self.f)(arg)
    }
}

impl std::fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RemoteMethod(..)")
    }
}

/// A payload tree that may carry methods.
///
/// Rust ownership makes these trees acyclic by construction; shared
/// subtrees are copied, which is the structured-clone behavior payloads
/// get anyway.
#[derive(Debug, Clone)]
pub enum RemotePayload {
    /// A plain JSON leaf (including whole objects with no methods).
    Json(Value),
    /// An array that may carry methods.
    Array(Vec<RemotePayload>),
    /// An object that may carry methods; entry order is preserved.
    Object(Vec<(String, RemotePayload)>),
    /// A callable.
    Method(RemoteMethod),
}

impl RemotePayload {
    /// Builds a method node.
    #[must_use]
    pub fn method<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Value>> + Send + 'static,
    {
        Self::Method(RemoteMethod::new(f))
    }

    /// Looks up an object entry by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RemotePayload> {
        match self {
            Self::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Indexes into an array node.
    #[must_use]
    pub fn index(&self, i: usize) -> Option<&RemotePayload> {
        match self {
            Self::Array(items) => items.get(i),
            _ => None,
        }
    }

    /// Returns the JSON leaf, if this node is one.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the method, if this node is one.
    #[must_use]
    pub fn as_method(&self) -> Option<&RemoteMethod> {
        match self {
            Self::Method(m) => Some(m),
            _ => None,
        }
    }
}

impl From<Value> for RemotePayload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Factory for remote-method invoke clients and handlers.
///
/// The remote-method rendition of the two define-invoke factories:
/// [`invoke`](Self::invoke) wraps the unary client,
/// [`define_handler`](Self::define_handler) wraps handler registration.
#[derive(Debug, Clone)]
pub struct RemoteMethods {
    ctx: Context,
    defaults: RemoteOptions,
}

impl RemoteMethods {
    /// Creates a factory with the given defaults.
    #[must_use]
    pub fn new(ctx: &Context, defaults: RemoteOptions) -> Self {
        Self {
            ctx: ctx.clone(),
            defaults,
        }
    }

    /// Creates a remote-method client for a family.
    #[must_use]
    pub fn invoke(&self, family: &InvokeFamily) -> RemoteInvokeClient {
        RemoteInvokeClient {
            ctx: self.ctx.clone(),
            client: define_invoke(&self.ctx, family),
            defaults: self.defaults.clone(),
        }
    }

    /// Registers a handler whose payloads have stubs rehydrated as
    /// callables. Registering the same handler handle twice against one
    /// family is a no-op, as with the base factory.
    pub fn define_handler(&self, family: &InvokeFamily, handler: RemoteHandler) -> HandlerGuard {
        let ctx = self.ctx.clone();
        let opts = self.defaults.clone();
        let key = handler.key();
        let inner = InvokeHandler::new(move |input, cx: HandlerCx| {
            let ctx = ctx.clone();
            let opts = opts.clone();
            let handler = handler.clone();
            async move {
                let value = input.into_value().unwrap_or(Value::Null);
                let payload = deserialize_payload(&ctx, &value, &opts)
                    .map_err(|e| json!({ "code": e.code(), "message": e.to_string() }))?;
                handler.call(payload, cx).await.map(Reply::new)
            }
        });
        register_driver(&self.ctx, family, key, Driver::Unary(inner))
    }
}

/// A handler receiving rehydrated payload trees.
#[derive(Clone)]
pub struct RemoteHandler {
    f: Arc<dyn Fn(RemotePayload, HandlerCx) -> BoxFuture<'static, Result<Value, Value>> + Send + Sync>,
}

impl RemoteHandler {
    /// Wraps an async handler.
    #[must_use]
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(RemotePayload, HandlerCx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Value>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |payload, cx| Box::pin(f(payload, cx))),
        }
    }

    fn call(&self, payload: RemotePayload, cx: HandlerCx) -> BoxFuture<'static, Result<Value, Value>> {
        (self.f)(payload, cx)
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.f) as *const () as usize
    }
}

impl std::fmt::Debug for RemoteHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RemoteHandler(..)")
    }
}

/// Remote-method invoke client.
#[derive(Debug, Clone)]
pub struct RemoteInvokeClient {
    ctx: Context,
    client: InvokeClient,
    defaults: RemoteOptions,
}

impl RemoteInvokeClient {
    /// Calls with factory defaults.
    ///
    /// # Errors
    ///
    /// Guard errors (caps, disallowed methods) are raised synchronously
    /// here; everything past serialization settles on the returned
    /// invocation.
    pub fn call(&self, payload: &RemotePayload) -> Result<RemoteInvocation, RemoteError> {
        self.call_with(payload, CallOptions::new(), None)
    }

    /// Calls with per-call invoke options and optional remote-option
    /// overrides.
    pub fn call_with(
        &self,
        payload: &RemotePayload,
        options: CallOptions,
        overrides: Option<RemoteOptions>,
    ) -> Result<RemoteInvocation, RemoteError> {
        let opts = overrides.unwrap_or_else(|| self.defaults.clone());
        let Serialized { value, stubs } = serialize_payload(&self.ctx, payload, &opts)?;
        debug!(
            family = %self.client.family().tag(),
            stubs = stubs.len(),
            "remote invoke serialized"
        );

        let disposer = RemoteDisposer::new(stubs);
        if let Some(after) = opts.auto_dispose {
            let timed = disposer.clone();
            disposer.set_timer(tokio::spawn(async move {
                tokio::time::sleep(after).await;
                debug!("auto-dispose timer elapsed");
                timed.dispose();
            }));
        }

        let client = self.client.clone();
        let settle_disposer = disposer.clone();
        let fut = async move {
            let result = client.call_with(value, options).await;
            settle_disposer.dispose();
            result
        }
        .boxed();

        Ok(RemoteInvocation { fut, disposer })
    }
}

/// A pending remote-method call.
///
/// Awaits to the call result. Stub handlers registered during
/// serialization are released exactly once, on the first of: settle,
/// [`dispose`](Self::dispose), drop, or the auto-dispose timer.
#[must_use = "futures do nothing unless awaited"]
pub struct RemoteInvocation {
    fut: BoxFuture<'static, Result<Value, InvokeError>>,
    disposer: RemoteDisposer,
}

impl RemoteInvocation {
    /// A handle that can release the call's stub handlers early, e.g.
    /// for fire-and-forget calls.
    #[must_use]
    pub fn disposer(&self) -> RemoteDisposer {
        self.disposer.clone()
    }

    /// Releases the stub handlers now.
    pub fn dispose(&self) {
        self.disposer.dispose();
    }
}

impl Future for RemoteInvocation {
    type Output = Result<Value, InvokeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        self.fut.as_mut().poll(cx)
    }
}

impl Drop for RemoteInvocation {
    fn drop(&mut self) {
        self.disposer.dispose();
    }
}

impl std::fmt::Debug for RemoteInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteInvocation")
            .field("disposed", &self.disposer.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Releases a call's stub handlers exactly once.
#[derive(Clone)]
pub struct RemoteDisposer {
    inner: Arc<DisposeInner>,
}

struct DisposeInner {
    done: AtomicBool,
    stubs: Mutex<Vec<HandlerGuard>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteDisposer {
    fn new(stubs: Vec<HandlerGuard>) -> Self {
        Self {
            inner: Arc::new(DisposeInner {
                done: AtomicBool::new(false),
                stubs: Mutex::new(stubs),
                timer: Mutex::new(None),
            }),
        }
    }

    fn set_timer(&self, timer: JoinHandle<()>) {
        *self.inner.timer.lock() = Some(timer);
    }

    /// Releases the stub handlers. Idempotent.
    pub fn dispose(&self) {
        if self.inner.done.swap(true, Ordering::SeqCst) {
            return;
        }
        for guard in self.inner.stubs.lock().drain(..) {
            guard.dispose();
        }
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }
    }

    /// Returns `true` once disposal ran.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RemoteDisposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDisposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

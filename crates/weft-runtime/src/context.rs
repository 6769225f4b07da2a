//! The bus context.
//!
//! A [`Context`] is the in-process multi-publisher/multi-subscriber
//! registry every other piece of weft is built on. Emission is
//! synchronous: by the time [`Context::emit`] returns, every listener
//! that matched has run in registration order.
//!
//! ```text
//! ┌─────────────┐   emit(desc, body)  ┌─────────────────────────────┐
//! │  Publisher  │ ──────────────────► │          Context            │
//! └─────────────┘                     │  by_id: Tag → [listeners]   │
//!                                     │  matchers: [(match, l)]     │
//! ┌─────────────┐   on(target, l)     │  fatal: watch<Option<err>>  │
//! │ Subscriber  │ ──────────────────► │                             │
//! └─────────────┘                     └─────────────────────────────┘
//! ```
//!
//! # Dispatch Rules
//!
//! - Listeners registered on the emitted descriptor's id run first, in
//!   registration order, followed by matcher listeners in registration
//!   order.
//! - The registry is snapshotted at the top of `emit`: listeners added
//!   during dispatch do not observe the current emission, and removals
//!   during dispatch do not unseat already-snapshotted siblings.
//! - A panicking listener never prevents its siblings from running; the
//!   panic is logged and surfaced on the [`LISTENER_ERROR_EVENT`] channel.
//!   `emit` itself never fails because of listener behavior.
//!
//! # Listener Identity
//!
//! [`Listener`] is a cheap handle around an `Arc` callback. Registering
//! the same handle (or a clone of it) against the same target twice is a
//! no-op, and targeted removal compares the same identity. This is the
//! dedupe rule the invoke layer's "same handler registered twice" no-op
//! builds on.

use crate::invoke::handler::ServerTables;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{trace, warn};
use weft_event::{Envelope, EventDesc, Matcher};
use weft_types::Tag;

/// Id of the event emitted when a listener panics during dispatch.
pub const LISTENER_ERROR_EVENT: &str = "weft:listener-error";

/// A registered callback.
///
/// Listeners receive the full envelope and the per-emit side-channel
/// options. Identity (for dedupe and targeted removal) is the identity
/// of the underlying `Arc`; clone the handle to keep a removable
/// reference.
#[derive(Clone)]
pub struct Listener {
    f: Arc<dyn Fn(&Envelope, &EmitOptions) + Send + Sync>,
}

impl Listener {
    /// Wraps a callback.
    #[must_use]
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Envelope, &EmitOptions) + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Returns `true` if both handles wrap the same callback.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }

    /// Stable identity key of the underlying callback.
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.f) as *const () as usize
    }

    fn call(&self, env: &Envelope, options: &EmitOptions) {
        (self.f)(env, options);
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Listener({:#x})", self.key())
    }
}

/// Per-emit side-channel options.
///
/// Conveyed opaquely to every listener of the emission; transport
/// adapters use hints for things like transferable-object lists or raw
/// message handles. The bus never interprets them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmitOptions {
    hints: HashMap<String, Value>,
}

impl EmitOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named hint.
    #[must_use]
    pub fn with_hint(mut self, key: impl Into<String>, value: Value) -> Self {
        self.hints.insert(key.into(), value);
        self
    }

    /// Looks up a hint by name.
    #[must_use]
    pub fn hint(&self, key: &str) -> Option<&Value> {
        self.hints.get(key)
    }

    /// Returns `true` when no hints are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }
}

/// What a listener is registered against: a literal descriptor id or a
/// match expression.
#[derive(Debug, Clone)]
pub enum ListenTarget {
    /// Exactly one descriptor id.
    Id(Tag),
    /// A predicate over descriptors.
    Match(Matcher),
}

impl From<&EventDesc> for ListenTarget {
    fn from(desc: &EventDesc) -> Self {
        Self::Id(desc.id().clone())
    }
}

impl From<EventDesc> for ListenTarget {
    fn from(desc: EventDesc) -> Self {
        Self::from(&desc)
    }
}

impl From<Matcher> for ListenTarget {
    fn from(matcher: Matcher) -> Self {
        match matcher {
            Matcher::Id(tag) => Self::Id(tag),
            other => Self::Match(other),
        }
    }
}

impl From<Tag> for ListenTarget {
    fn from(tag: Tag) -> Self {
        Self::Id(tag)
    }
}

impl From<&str> for ListenTarget {
    /// `"*"` targets every descriptor; anything else is a literal id.
    fn from(s: &str) -> Self {
        Self::from(Matcher::from(s))
    }
}

struct Entry {
    listener: Listener,
    once: bool,
}

#[derive(Default)]
struct Registry {
    by_id: HashMap<Tag, Vec<Entry>>,
    matchers: Vec<(Matcher, Entry)>,
}

pub(crate) struct ContextInner {
    registry: Mutex<Registry>,
    fatal_tx: watch::Sender<Option<Value>>,
    pub(crate) server: ServerTables,
}

/// The bus: publish/subscribe registry plus `emit`/`on`/`off`.
///
/// Cheaply cloneable; clones share the same registry and state tables.
/// Every context is self-contained: there is no process-wide state.
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Arc<ContextInner>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        let (fatal_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(ContextInner {
                registry: Mutex::new(Registry::default()),
                fatal_tx,
                server: ServerTables::default(),
            }),
        }
    }

    /// Registers a listener.
    ///
    /// Returns `false` (and changes nothing) when the same listener is
    /// already registered against the same target; a deduplicated
    /// listener fires once per emission.
    pub fn on(&self, target: impl Into<ListenTarget>, listener: Listener) -> bool {
        self.register(target.into(), listener, false)
    }

    /// Registers a listener that removes itself after its first
    /// matching emission.
    pub fn once(&self, target: impl Into<ListenTarget>, listener: Listener) -> bool {
        self.register(target.into(), listener, true)
    }

    fn register(&self, target: ListenTarget, listener: Listener, once: bool) -> bool {
        let mut reg = self.inner.registry.lock();
        match target {
            ListenTarget::Id(tag) => {
                let entries = reg.by_id.entry(tag).or_default();
                if entries.iter().any(|e| e.listener.same_as(&listener)) {
                    return false;
                }
                entries.push(Entry { listener, once });
            }
            ListenTarget::Match(matcher) => {
                if reg
                    .matchers
                    .iter()
                    .any(|(_, e)| e.listener.same_as(&listener))
                {
                    return false;
                }
                reg.matchers.push((matcher, Entry { listener, once }));
            }
        }
        true
    }

    /// Removes listeners.
    ///
    /// With a listener handle, removes that one registration; without,
    /// removes every listener for the target (for a [`ListenTarget::Match`]
    /// target this clears all matcher registrations, since match
    /// expressions carry no identity of their own). Returns the number
    /// of registrations removed.
    pub fn off(&self, target: impl Into<ListenTarget>, listener: Option<&Listener>) -> usize {
        let mut reg = self.inner.registry.lock();
        match target.into() {
            ListenTarget::Id(tag) => {
                let Some(entries) = reg.by_id.get_mut(&tag) else {
                    return 0;
                };
                let before = entries.len();
                match listener {
                    Some(l) => entries.retain(|e| !e.listener.same_as(l)),
                    None => entries.clear(),
                }
                let removed = before - entries.len();
                let now_empty = entries.is_empty();
                if now_empty {
                    reg.by_id.remove(&tag);
                }
                removed
            }
            ListenTarget::Match(_) => {
                let before = reg.matchers.len();
                match listener {
                    Some(l) => reg.matchers.retain(|(_, e)| !e.listener.same_as(l)),
                    None => reg.matchers.clear(),
                }
                before - reg.matchers.len()
            }
        }
    }

    /// Emits an event with empty side-channel options.
    pub fn emit(&self, desc: &EventDesc, body: Value) {
        self.emit_with(desc, body, EmitOptions::new());
    }

    /// Emits an event, dispatching synchronously to every matching
    /// listener in registration order.
    ///
    /// Never fails: listener panics are isolated and surfaced on
    /// [`LISTENER_ERROR_EVENT`].
    pub fn emit_with(&self, desc: &EventDesc, body: Value, options: EmitOptions) {
        let snapshot = {
            let mut reg = self.inner.registry.lock();
            let mut list = Vec::new();
            let mut id_bucket_empty = false;
            if let Some(entries) = reg.by_id.get_mut(desc.id()) {
                list.extend(entries.iter().map(|e| e.listener.clone()));
                entries.retain(|e| !e.once);
                id_bucket_empty = entries.is_empty();
            }
            if id_bucket_empty {
                reg.by_id.remove(desc.id());
            }
            for (matcher, entry) in &reg.matchers {
                if matcher.matches(desc) {
                    list.push(entry.listener.clone());
                }
            }
            reg.matchers
                .retain(|(matcher, entry)| !(entry.once && matcher.matches(desc)));
            list
        };

        trace!(event = %desc.id(), listeners = snapshot.len(), "dispatch");
        let env = Envelope::new(desc.clone(), body);
        for listener in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.call(&env, &options)));
            if outcome.is_err() {
                warn!(event = %desc.id(), "listener panicked during dispatch");
                if desc.id().as_str() != LISTENER_ERROR_EVENT {
                    self.emit(
                        &EventDesc::new(LISTENER_ERROR_EVENT),
                        json!({ "event": desc.id().as_str(), "error": "listener panicked" }),
                    );
                }
            }
        }
    }

    /// Number of listeners registered for a target.
    ///
    /// For a match target, counts every matcher registration.
    #[must_use]
    pub fn listener_count(&self, target: impl Into<ListenTarget>) -> usize {
        let reg = self.inner.registry.lock();
        match target.into() {
            ListenTarget::Id(tag) => reg.by_id.get(&tag).map_or(0, Vec::len),
            ListenTarget::Match(_) => reg.matchers.len(),
        }
    }

    /// Total number of registrations on the context.
    #[must_use]
    pub fn total_listeners(&self) -> usize {
        let reg = self.inner.registry.lock();
        reg.by_id.values().map(Vec::len).sum::<usize>() + reg.matchers.len()
    }

    /// Registers a fatal event source.
    ///
    /// When any emission matches the target, every invoke call pending
    /// on this context rejects with the carried error (the body's
    /// `error` field, or the whole body when absent). Registration is
    /// additive: each call adds another source.
    pub fn register_fatal_events(&self, target: impl Into<ListenTarget>) {
        let weak: Weak<ContextInner> = Arc::downgrade(&self.inner);
        self.on(
            target,
            Listener::new(move |env, _| {
                if let Some(inner) = weak.upgrade() {
                    let error = env
                        .body
                        .get("error")
                        .cloned()
                        .unwrap_or_else(|| env.body.clone());
                    warn!(event = %env.desc.id(), "fatal event: rejecting pending invokes");
                    let _ = inner.fatal_tx.send(Some(error));
                }
            }),
        );
    }

    /// Watch channel carrying the most recent fatal error, if any.
    ///
    /// Invoke calls select against this to reject when a fatal source
    /// fires; a context that has already gone fatal rejects new calls
    /// immediately.
    #[must_use]
    pub fn fatal_watch(&self) -> watch::Receiver<Option<Value>> {
        self.inner.fatal_tx.subscribe()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("listeners", &self.total_listeners())
            .finish_non_exhaustive()
    }
}

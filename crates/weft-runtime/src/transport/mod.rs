//! Transport adapters: plugging a context into a wire.
//!
//! An adapter is two one-way translations around one [`Context`]:
//!
//! ```text
//!              outbound listener                    inbound task
//!  ┌─────────┐  (publishable only)   ┌───────────┐  (stamps Inbound)  ┌─────────┐
//!  │ Context │ ────────────────────► │ Transport │ ─────────────────► │ Context │
//!  │  (local)│        Frame          │  (wire)   │       Frame        │ (remote)│
//!  └─────────┘                       └───────────┘                    └─────────┘
//! ```
//!
//! The [`Flow`] marker breaks the loop: events the adapter re-emits are
//! stamped [`Flow::Inbound`] and the outbound listener skips them, so
//! delivered messages are never bounced back onto the wire.
//!
//! Error policy: a frame that fails to parse emits the (non-fatal)
//! error event and the bus stays alive; a transport-level failure emits
//! the fatal event, which by default is registered as a fatal source so
//! pending invokes reject.

mod channel;

pub use channel::ChannelTransport;

use crate::context::{Context, EmitOptions, Listener, ListenTarget};
use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use weft_event::{Envelope, EventDesc, Matcher};
use weft_types::Flow;

/// Id of the non-fatal transport error event (parse failures).
pub const TRANSPORT_ERROR_EVENT: &str = "weft:transport-error";

/// Id of the fatal transport event (connection-level failures).
pub const TRANSPORT_FATAL_EVENT: &str = "weft:transport-fatal";

/// The framed payload adapters exchange.
///
/// JSON text framing; the descriptor travels with its kind so the far
/// side re-emits a descriptor equal to the one that was published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Descriptor of the event (flow marker stripped).
    pub desc: EventDesc,
    /// Event body.
    pub body: Value,
}

impl Frame {
    /// Creates a frame.
    #[must_use]
    pub fn new(desc: EventDesc, body: Value) -> Self {
        Self {
            desc: desc.without_flow(),
            body,
        }
    }

    /// Encodes to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Parse`] if serialization fails.
    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Parse(e.to_string()))
    }

    /// Decodes from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Parse`] on malformed input.
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Parse(e.to_string()))
    }
}

/// Message surfaced on a transport's inbound channel.
#[derive(Debug)]
pub enum TransportEvent {
    /// One framed payload from the peer.
    Frame(String),
    /// The transport failed; no further frames will arrive.
    Fatal(String),
}

/// The minimal interface a transport implements to plug into a context.
///
/// `publish` sends one framed payload outward; `take_inbound` hands the
/// adapter the inbound message stream (called once by
/// [`bind_transport`]).
pub trait Transport: Send + Sync + 'static {
    /// Sends one framed payload to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] when the wire is gone.
    fn publish(&self, text: String) -> Result<(), TransportError>;

    /// Takes the inbound message stream.
    ///
    /// Implementations yield the live channel on the first call and an
    /// already-closed one afterwards.
    fn take_inbound(&mut self) -> mpsc::UnboundedReceiver<TransportEvent>;
}

/// Adapter configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Descriptor emitted on per-frame (non-fatal) errors.
    pub error_event: EventDesc,
    /// Descriptor emitted on transport-level failure.
    pub fatal_event: EventDesc,
    /// Register `fatal_event` as a fatal source on the context.
    pub register_fatal: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            error_event: EventDesc::new(TRANSPORT_ERROR_EVENT),
            fatal_event: EventDesc::new(TRANSPORT_FATAL_EVENT),
            register_fatal: true,
        }
    }
}

/// Binds a transport to a context with the default configuration.
pub fn bind_transport<T: Transport>(ctx: &Context, transport: T) -> TransportBinding {
    bind_transport_with(ctx, transport, TransportConfig::default())
}

/// Binds a transport to a context.
///
/// Installs the outbound wildcard listener and spawns the inbound task.
/// Detach (or drop the binding) to undo both.
pub fn bind_transport_with<T: Transport>(
    ctx: &Context,
    mut transport: T,
    config: TransportConfig,
) -> TransportBinding {
    if config.register_fatal {
        ctx.register_fatal_events(&config.fatal_event);
    }

    let inbound = transport.take_inbound();
    let transport = std::sync::Arc::new(transport);

    let listener = Listener::new({
        let ctx = ctx.clone();
        let config = config.clone();
        move |env: &Envelope, _: &EmitOptions| {
            // Inbound-stamped events were just delivered from the wire;
            // our own error events stay local.
            if !env.desc.is_publishable() {
                return;
            }
            let id = env.desc.id();
            if id == config.error_event.id() || id == config.fatal_event.id() {
                return;
            }
            let frame = Frame::new(env.desc.clone(), env.body.clone());
            match frame.encode() {
                Ok(text) => {
                    if let Err(e) = transport.publish(text) {
                        warn!(event = %id, %e, "transport publish failed");
                        ctx.emit(&config.fatal_event, json!({ "error": e.to_string() }));
                    }
                }
                Err(e) => {
                    warn!(event = %id, %e, "frame encode failed");
                    ctx.emit(&config.error_event, json!({ "error": e.to_string() }));
                }
            }
        }
    });
    ctx.on(Matcher::predicate(EventDesc::is_publishable), listener.clone());

    let task = tokio::spawn({
        let ctx = ctx.clone();
        let config = config.clone();
        let mut inbound = inbound;
        async move {
            while let Some(event) = inbound.recv().await {
                match event {
                    TransportEvent::Frame(text) => match Frame::decode(&text) {
                        Ok(frame) => {
                            let desc = frame.desc.with_flow(Flow::Inbound);
                            ctx.emit(&desc, frame.body);
                        }
                        Err(e) => {
                            warn!(%e, "dropping malformed inbound frame");
                            ctx.emit(
                                &config.error_event,
                                json!({ "error": e.to_string(), "frame": text }),
                            );
                        }
                    },
                    TransportEvent::Fatal(message) => {
                        warn!(%message, "transport fatal");
                        ctx.emit(&config.fatal_event, json!({ "error": message }));
                        break;
                    }
                }
            }
            debug!("transport inbound channel ended");
        }
    });

    TransportBinding {
        ctx: ctx.clone(),
        listener: Some(listener),
        task: Some(task),
    }
}

/// A live transport attachment.
///
/// Detaches on drop: the outbound listener is removed and the inbound
/// task stopped. Fatal-source registration outlives the binding (the
/// transport died; its last word should still reject pending calls).
pub struct TransportBinding {
    ctx: Context,
    listener: Option<Listener>,
    task: Option<JoinHandle<()>>,
}

impl TransportBinding {
    /// Detaches the transport from the context.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.ctx
                .off(ListenTarget::Match(Matcher::Any), Some(&listener));
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TransportBinding {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for TransportBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportBinding")
            .field("attached", &self.listener.is_some())
            .finish()
    }
}

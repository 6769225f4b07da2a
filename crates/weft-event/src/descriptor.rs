//! Event descriptors.
//!
//! A descriptor is the typed identity of a logical message on the bus: a
//! stable string [`Tag`], a kind discriminator, and an optional
//! flow-direction marker stamped by transport adapters. Descriptors are
//! tagged records, not a class hierarchy; at runtime a descriptor is just
//! these three fields and is cheap to clone and compare.
//!
//! # Equality Semantics
//!
//! Two descriptors are equal iff their ids are equal. Kind and flow are
//! metadata for matchers and adapters; they do not participate in
//! equality or hashing.
//!
//! # Example
//!
//! ```
//! use weft_event::{EventDesc, EventKind};
//! use weft_types::Flow;
//!
//! let progress = EventDesc::new("progress");
//! assert_eq!(progress, EventDesc::new("progress"));
//!
//! // Flow marker does not change identity
//! let inbound = progress.clone().with_flow(Flow::Inbound);
//! assert_eq!(inbound, progress);
//! assert_eq!(inbound.kind(), &EventKind::Plain);
//! ```

use serde::{Deserialize, Serialize};
use weft_types::{Flow, Tag};

/// Role of a descriptor within an invoke family.
///
/// The role is the discriminator that lets predicate matchers select
/// "everything invoke-shaped" or a single leg of the protocol without
/// parsing ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvokeRole {
    /// Request payload (or one chunk of a streaming request).
    Send,
    /// Client-side request producer failed.
    SendError,
    /// Clean end of a streaming request.
    SendStreamEnd,
    /// Client cancelled the call.
    SendAbort,
    /// Response payload (or one chunk of a streaming response).
    Receive,
    /// Handler raised; carries the error value.
    ReceiveError,
    /// Clean end of a streaming response.
    ReceiveStreamEnd,
}

impl InvokeRole {
    /// The id suffix this role appends to the family tag.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::SendError => "send-error",
            Self::SendStreamEnd => "send-stream-end",
            Self::SendAbort => "send-abort",
            Self::Receive => "receive",
            Self::ReceiveError => "receive-error",
            Self::ReceiveStreamEnd => "receive-stream-end",
        }
    }

    /// Returns `true` for roles emitted by the calling side.
    #[must_use]
    pub fn is_send_side(self) -> bool {
        matches!(
            self,
            Self::Send | Self::SendError | Self::SendStreamEnd | Self::SendAbort
        )
    }

    /// Returns `true` for roles emitted by the handling side.
    #[must_use]
    pub fn is_receive_side(self) -> bool {
        !self.is_send_side()
    }
}

/// Kind discriminator for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "role")]
pub enum EventKind {
    /// A plain user event.
    Plain,
    /// One leg of the invoke protocol.
    Invoke(InvokeRole),
}

/// Typed identity of a logical event on the bus.
///
/// See the [module docs](self) for equality semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDesc {
    id: Tag,
    #[serde(default = "EventKind::plain")]
    kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    flow: Option<Flow>,
}

impl EventKind {
    fn plain() -> Self {
        Self::Plain
    }
}

impl EventDesc {
    /// Creates a plain event descriptor with a user-chosen tag.
    #[must_use]
    pub fn new(tag: impl Into<Tag>) -> Self {
        Self {
            id: tag.into(),
            kind: EventKind::Plain,
            flow: None,
        }
    }

    /// Creates a plain event descriptor with a freshly generated tag.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Tag::generate())
    }

    /// Creates an invoke-protocol descriptor.
    #[must_use]
    pub fn invoke(tag: impl Into<Tag>, role: InvokeRole) -> Self {
        Self {
            id: tag.into(),
            kind: EventKind::Invoke(role),
            flow: None,
        }
    }

    /// Returns the descriptor id.
    #[must_use]
    pub fn id(&self) -> &Tag {
        &self.id
    }

    /// Returns the kind discriminator.
    #[must_use]
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Returns the invoke role, if this is an invoke descriptor.
    #[must_use]
    pub fn invoke_role(&self) -> Option<InvokeRole> {
        match self.kind {
            EventKind::Invoke(role) => Some(role),
            EventKind::Plain => None,
        }
    }

    /// Returns the flow marker, if stamped.
    #[must_use]
    pub fn flow(&self) -> Option<Flow> {
        self.flow
    }

    /// Returns a copy stamped with the given flow direction.
    #[must_use]
    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Returns a copy with the flow marker cleared.
    #[must_use]
    pub fn without_flow(mut self) -> Self {
        self.flow = None;
        self
    }

    /// Returns `true` unless the descriptor is stamped inbound.
    ///
    /// Transport adapters publish exactly the events for which this holds.
    #[must_use]
    pub fn is_publishable(&self) -> bool {
        self.flow != Some(Flow::Inbound)
    }
}

impl PartialEq for EventDesc {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventDesc {}

impl std::hash::Hash for EventDesc {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for EventDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_id_only() {
        let plain = EventDesc::new("chat");
        let invoke = EventDesc::invoke("chat", InvokeRole::Send);
        assert_eq!(plain, invoke);

        let other = EventDesc::new("tool");
        assert_ne!(plain, other);
    }

    #[test]
    fn flow_does_not_affect_equality() {
        let desc = EventDesc::new("chat");
        let inbound = desc.clone().with_flow(Flow::Inbound);
        assert_eq!(desc, inbound);
    }

    #[test]
    fn publishable_unless_inbound() {
        let desc = EventDesc::new("chat");
        assert!(desc.is_publishable());
        assert!(desc.clone().with_flow(Flow::Outbound).is_publishable());
        assert!(!desc.with_flow(Flow::Inbound).is_publishable());
    }

    #[test]
    fn invoke_role_accessor() {
        let desc = EventDesc::invoke("chat:send", InvokeRole::Send);
        assert_eq!(desc.invoke_role(), Some(InvokeRole::Send));
        assert_eq!(EventDesc::new("chat").invoke_role(), None);
    }

    #[test]
    fn role_sides() {
        assert!(InvokeRole::SendAbort.is_send_side());
        assert!(InvokeRole::Receive.is_receive_side());
        assert!(!InvokeRole::Receive.is_send_side());
    }

    #[test]
    fn generated_descriptors_differ() {
        assert_ne!(EventDesc::generate(), EventDesc::generate());
    }

    #[test]
    fn serde_round_trip() {
        let desc = EventDesc::invoke("chat:send", InvokeRole::Send).with_flow(Flow::Outbound);
        let json = serde_json::to_value(&desc).unwrap();
        let back: EventDesc = serde_json::from_value(json).unwrap();
        assert_eq!(back, desc);
        assert_eq!(back.invoke_role(), Some(InvokeRole::Send));
        assert_eq!(back.flow(), Some(Flow::Outbound));
    }
}

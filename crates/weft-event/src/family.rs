//! Invoke family derivation.
//!
//! One user tag derives the seven descriptors that together implement one
//! RPC method. Derivation is a pure function: re-deriving from the same
//! tag yields descriptors that compare equal on id, so two peers agree on
//! the wire ids without any shared state.
//!
//! # Routing Scheme
//!
//! Send-side events (`send`, `send-error`, `send-stream-end`,
//! `send-abort`) travel on the family descriptor itself with the
//! correlation id in the body; the server keeps standing listeners on
//! those four ids. Receive-side events travel on per-call descriptors
//! whose id appends the correlation id (`{tag}:receive:{invoke_id}`); the
//! client registers ephemeral listeners on exactly the ids of its own
//! call, which is what makes cross-talk between concurrent calls
//! impossible on a shared bus.
//!
//! # Example
//!
//! ```
//! use weft_event::InvokeFamily;
//! use weft_types::InvokeId;
//!
//! let family = InvokeFamily::new("sum");
//! assert_eq!(family.send().id().as_str(), "sum:send");
//! assert_eq!(family, InvokeFamily::new("sum"));
//!
//! let id = InvokeId::from_wire("abc123");
//! assert_eq!(family.receive_for(&id).id().as_str(), "sum:receive:abc123");
//! ```

use crate::{EventDesc, InvokeRole};
use weft_types::{InvokeId, Tag};

/// The seven correlated descriptors of one invoke method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeFamily {
    tag: Tag,
    send: EventDesc,
    send_error: EventDesc,
    send_stream_end: EventDesc,
    send_abort: EventDesc,
    receive: EventDesc,
    receive_error: EventDesc,
    receive_stream_end: EventDesc,
}

impl InvokeFamily {
    /// Derives the family for a user tag.
    #[must_use]
    pub fn new(tag: impl Into<Tag>) -> Self {
        let tag = tag.into();
        let derive = |role: InvokeRole| EventDesc::invoke(tag.suffixed(role.suffix()), role);
        Self {
            send: derive(InvokeRole::Send),
            send_error: derive(InvokeRole::SendError),
            send_stream_end: derive(InvokeRole::SendStreamEnd),
            send_abort: derive(InvokeRole::SendAbort),
            receive: derive(InvokeRole::Receive),
            receive_error: derive(InvokeRole::ReceiveError),
            receive_stream_end: derive(InvokeRole::ReceiveStreamEnd),
            tag,
        }
    }

    /// Derives a family with a freshly generated tag.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Tag::generate())
    }

    /// The user tag the family was derived from.
    #[must_use]
    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Request events (unary payloads and streaming-request chunks).
    #[must_use]
    pub fn send(&self) -> &EventDesc {
        &self.send
    }

    /// Request-producer failures.
    #[must_use]
    pub fn send_error(&self) -> &EventDesc {
        &self.send_error
    }

    /// Clean end of a streaming request.
    #[must_use]
    pub fn send_stream_end(&self) -> &EventDesc {
        &self.send_stream_end
    }

    /// Client-side cancellation.
    #[must_use]
    pub fn send_abort(&self) -> &EventDesc {
        &self.send_abort
    }

    /// Response events (base descriptor; replies travel per-call).
    #[must_use]
    pub fn receive(&self) -> &EventDesc {
        &self.receive
    }

    /// Handler failures (base descriptor; replies travel per-call).
    #[must_use]
    pub fn receive_error(&self) -> &EventDesc {
        &self.receive_error
    }

    /// Clean end of a streaming response (base descriptor).
    #[must_use]
    pub fn receive_stream_end(&self) -> &EventDesc {
        &self.receive_stream_end
    }

    /// Per-call response descriptor: `{tag}:receive:{invoke_id}`.
    #[must_use]
    pub fn receive_for(&self, id: &InvokeId) -> EventDesc {
        self.per_call(&self.receive, InvokeRole::Receive, id)
    }

    /// Per-call handler-failure descriptor.
    #[must_use]
    pub fn receive_error_for(&self, id: &InvokeId) -> EventDesc {
        self.per_call(&self.receive_error, InvokeRole::ReceiveError, id)
    }

    /// Per-call stream-end descriptor.
    #[must_use]
    pub fn receive_stream_end_for(&self, id: &InvokeId) -> EventDesc {
        self.per_call(&self.receive_stream_end, InvokeRole::ReceiveStreamEnd, id)
    }

    fn per_call(&self, base: &EventDesc, role: InvokeRole, id: &InvokeId) -> EventDesc {
        EventDesc::invoke(base.id().suffixed(id.as_str()), role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_pure() {
        let a = InvokeFamily::new("chat");
        let b = InvokeFamily::new("chat");
        assert_eq!(a, b);
        assert_eq!(a.send(), b.send());
        assert_eq!(a.receive_error(), b.receive_error());
    }

    #[test]
    fn suffixes_are_stable() {
        let family = InvokeFamily::new("chat");
        assert_eq!(family.send().id().as_str(), "chat:send");
        assert_eq!(family.send_error().id().as_str(), "chat:send-error");
        assert_eq!(
            family.send_stream_end().id().as_str(),
            "chat:send-stream-end"
        );
        assert_eq!(family.send_abort().id().as_str(), "chat:send-abort");
        assert_eq!(family.receive().id().as_str(), "chat:receive");
        assert_eq!(family.receive_error().id().as_str(), "chat:receive-error");
        assert_eq!(
            family.receive_stream_end().id().as_str(),
            "chat:receive-stream-end"
        );
    }

    #[test]
    fn descriptors_carry_roles() {
        let family = InvokeFamily::new("chat");
        assert_eq!(family.send().invoke_role(), Some(InvokeRole::Send));
        assert_eq!(
            family.send_abort().invoke_role(),
            Some(InvokeRole::SendAbort)
        );
        assert_eq!(family.receive().invoke_role(), Some(InvokeRole::Receive));
    }

    #[test]
    fn per_call_descriptors_are_id_suffixed() {
        let family = InvokeFamily::new("chat");
        let id = InvokeId::from_wire("abc");
        assert_eq!(family.receive_for(&id).id().as_str(), "chat:receive:abc");
        assert_eq!(
            family.receive_error_for(&id).id().as_str(),
            "chat:receive-error:abc"
        );
        assert_eq!(
            family.receive_stream_end_for(&id).id().as_str(),
            "chat:receive-stream-end:abc"
        );
        assert_eq!(
            family.receive_for(&id).invoke_role(),
            Some(InvokeRole::Receive)
        );
    }

    #[test]
    fn per_call_descriptors_isolate_calls() {
        let family = InvokeFamily::new("chat");
        let a = family.receive_for(&InvokeId::from_wire("a"));
        let b = family.receive_for(&InvokeId::from_wire("b"));
        assert_ne!(a, b);
    }

    #[test]
    fn generated_families_differ() {
        assert_ne!(InvokeFamily::generate(), InvokeFamily::generate());
    }
}

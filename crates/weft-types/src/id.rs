//! Identifier types for weft.
//!
//! Every event on the bus is identified by a [`Tag`], and every in-flight
//! invoke call by an [`InvokeId`]. Both are short hex strings; generated
//! values draw 64 bits from a UUID v4, which keeps the collision
//! probability per invoke family comfortably below 10⁻⁹ while staying
//! readable in logs and on the wire.
//!
//! # Equality Semantics
//!
//! Identifiers compare by their string value. Two [`Tag`]s built from the
//! same string are the same tag, wherever they were created.
//!
//! # Example
//!
//! ```
//! use weft_types::{InvokeId, Tag};
//!
//! let chat = Tag::new("chat");
//! assert_eq!(chat, Tag::new("chat"));
//! assert_eq!(chat.as_str(), "chat");
//!
//! // Generated identifiers are unique
//! let a = InvokeId::generate();
//! let b = InvokeId::generate();
//! assert_ne!(a, b);
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of hex characters in a generated short identifier.
const SHORT_ID_LEN: usize = 16;

/// Generates a fresh short identifier: the first 16 hex characters of a
/// UUID v4 (64 bits of entropy).
fn short_id() -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(SHORT_ID_LEN);
    hex
}

/// A stable string tag identifying a logical event on the bus.
///
/// Tags are chosen by the user (`Tag::new("chat")`) or generated
/// (`Tag::generate()`). Derived tags for invoke families append role
/// suffixes to a base tag; see `weft-event`.
///
/// # Example
///
/// ```
/// use weft_types::Tag;
///
/// let tag = Tag::new("progress");
/// let derived = tag.suffixed("send");
/// assert_eq!(derived.as_str(), "progress:send");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Creates a tag from a user-chosen string.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Creates a fresh, randomly generated tag.
    #[must_use]
    pub fn generate() -> Self {
        Self(short_id())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derives a new tag by appending `:{suffix}`.
    ///
    /// Derivation is pure: the same base and suffix always produce the
    /// same tag.
    #[must_use]
    pub fn suffixed(&self, suffix: &str) -> Self {
        Self(format!("{}:{}", self.0, suffix))
    }

    /// Returns `true` if this tag starts with the given prefix.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Correlation identifier for one invoke call.
///
/// A fresh [`InvokeId`] is generated per call; it is the only thing that
/// isolates concurrent callers sharing a single bus, so it rides in every
/// invoke event body and in the per-call reply descriptor ids.
///
/// # Example
///
/// ```
/// use weft_types::InvokeId;
///
/// let id = InvokeId::generate();
/// assert_eq!(id.as_str().len(), 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvokeId(String);

impl InvokeId {
    /// Generates a fresh correlation id.
    #[must_use]
    pub fn generate() -> Self {
        Self(short_id())
    }

    /// Reconstructs an id received from a peer.
    #[must_use]
    pub fn from_wire(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InvokeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

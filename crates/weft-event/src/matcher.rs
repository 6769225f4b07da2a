//! Match expressions over event descriptors.
//!
//! Listeners register against either a literal descriptor id or a
//! [`Matcher`]: the wildcard, a user predicate over descriptor metadata,
//! or a combination of those. Transport adapters use matchers to pick up
//! "every outbound-directed or undirected event"; debuggers use them to
//! tap "everything invoke-shaped".
//!
//! # Example
//!
//! ```
//! use weft_event::{EventDesc, InvokeRole, Matcher};
//!
//! let aborts = Matcher::predicate(|desc: &EventDesc| {
//!     desc.invoke_role() == Some(InvokeRole::SendAbort)
//! });
//! let publishable = Matcher::predicate(EventDesc::is_publishable);
//!
//! let outbound_aborts = aborts.and(publishable);
//! assert!(outbound_aborts.matches(&EventDesc::invoke("chat:send-abort", InvokeRole::SendAbort)));
//! assert!(!outbound_aborts.matches(&EventDesc::new("chat")));
//! ```

use crate::EventDesc;
use std::sync::Arc;
use weft_types::Tag;

/// A predicate over descriptors used to register broad listeners.
#[derive(Clone)]
pub enum Matcher {
    /// Matches descriptors with exactly this id.
    Id(Tag),
    /// Matches every descriptor.
    Any,
    /// Matches descriptors satisfying a user predicate.
    Predicate(Arc<dyn Fn(&EventDesc) -> bool + Send + Sync>),
    /// Matches when every inner matcher matches.
    All(Vec<Matcher>),
    /// Matches when at least one inner matcher matches.
    AnyOf(Vec<Matcher>),
}

impl Matcher {
    /// Builds a predicate matcher from a boolean function.
    #[must_use]
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&EventDesc) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Combines two matchers; the result matches when both match.
    #[must_use]
    pub fn and(self, other: Matcher) -> Self {
        match self {
            Self::All(mut inner) => {
                inner.push(other);
                Self::All(inner)
            }
            first => Self::All(vec![first, other]),
        }
    }

    /// Combines two matchers; the result matches when either matches.
    #[must_use]
    pub fn or(self, other: Matcher) -> Self {
        match self {
            Self::AnyOf(mut inner) => {
                inner.push(other);
                Self::AnyOf(inner)
            }
            first => Self::AnyOf(vec![first, other]),
        }
    }

    /// Evaluates the matcher against a descriptor.
    #[must_use]
    pub fn matches(&self, desc: &EventDesc) -> bool {
        match self {
            Self::Id(tag) => desc.id() == tag,
            Self::Any => true,
            Self::Predicate(f) => f(desc),
            Self::All(inner) => inner.iter().all(|m| m.matches(desc)),
            Self::AnyOf(inner) => inner.iter().any(|m| m.matches(desc)),
        }
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(tag) => f.debug_tuple("Id").field(tag).finish(),
            Self::Any => f.write_str("Any"),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
            Self::All(inner) => f.debug_tuple("All").field(inner).finish(),
            Self::AnyOf(inner) => f.debug_tuple("AnyOf").field(inner).finish(),
        }
    }
}

impl From<&EventDesc> for Matcher {
    fn from(desc: &EventDesc) -> Self {
        Self::Id(desc.id().clone())
    }
}

impl From<EventDesc> for Matcher {
    fn from(desc: EventDesc) -> Self {
        Self::from(&desc)
    }
}

impl From<Tag> for Matcher {
    fn from(tag: Tag) -> Self {
        Self::Id(tag)
    }
}

impl From<&str> for Matcher {
    /// `"*"` is the wildcard; anything else is a literal id.
    fn from(s: &str) -> Self {
        if s == "*" {
            Self::Any
        } else {
            Self::Id(Tag::new(s))
        }
    }
}

//! Serialize walk: payload trees to wire values.
//!
//! Methods become stub nodes, each backed by a unary handler on a
//! freshly tagged family. Everything registered for a payload is handed
//! back as guards so the invocation can release it on any terminal
//! outcome; a failed walk releases its own partial registrations by
//! dropping them.

use super::{RemoteOptions, STUB_MARKER};
use crate::context::Context;
use crate::error::RemoteError;
use crate::invoke::{define_invoke_handler, HandlerGuard, InvokeHandler, Reply};
use serde_json::{json, Map, Value};
use tracing::trace;
use weft_event::InvokeFamily;
use weft_types::Tag;

/// Outcome of a serialize walk.
#[derive(Debug)]
pub(crate) struct Serialized {
    /// The wire value with methods replaced by stubs.
    pub(crate) value: Value,
    /// One guard per registered stub handler, in registration order.
    pub(crate) stubs: Vec<HandlerGuard>,
}

/// Replaces every method in the payload with a registered stub.
///
/// # Errors
///
/// - [`RemoteError::NotAllowed`] on a method when `allow` is off
/// - [`RemoteError::DepthExceeded`] past `max_depth`
/// - [`RemoteError::TooManyMethods`] past `max_functions`
pub(crate) fn serialize_payload(
    ctx: &Context,
    payload: &super::RemotePayload,
    opts: &RemoteOptions,
) -> Result<Serialized, RemoteError> {
    let mut stubs = Vec::new();
    let mut methods = 0usize;
    let value = walk(ctx, payload, opts, 0, &mut methods, &mut stubs)?;
    Ok(Serialized { value, stubs })
}

fn walk(
    ctx: &Context,
    payload: &super::RemotePayload,
    opts: &RemoteOptions,
    depth: usize,
    methods: &mut usize,
    stubs: &mut Vec<HandlerGuard>,
) -> Result<Value, RemoteError> {
    use super::RemotePayload::{Array, Json, Method, Object};

    if depth > opts.max_depth {
        return Err(RemoteError::DepthExceeded {
            max: opts.max_depth,
        });
    }

    match payload {
        Json(value) => Ok(value.clone()),
        Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(walk(ctx, item, opts, depth + 1, methods, stubs)?);
            }
            Ok(Value::Array(out))
        }
        Object(entries) => {
            let mut out = Map::new();
            for (key, item) in entries {
                out.insert(key.clone(), walk(ctx, item, opts, depth + 1, methods, stubs)?);
            }
            Ok(Value::Object(out))
        }
        Method(method) => {
            if !opts.allow {
                return Err(RemoteError::NotAllowed);
            }
            *methods += 1;
            if *methods > opts.max_functions {
                return Err(RemoteError::TooManyMethods {
                    max: opts.max_functions,
                });
            }

            let tag = stub_tag(opts);
            trace!(%tag, "registering method stub");
            let family = InvokeFamily::new(tag.clone());
            let method = method.clone();
            let handler = InvokeHandler::new(move |input, _cx| {
                let method = method.clone();
                async move {
                    let arg = input.into_value().unwrap_or(Value::Null);
                    method.call(arg).await.map(Reply::new)
                }
            });
            stubs.push(define_invoke_handler(ctx, &family, handler));
            Ok(json!({ STUB_MARKER: { "tag": tag } }))
        }
    }
}

fn stub_tag(opts: &RemoteOptions) -> Tag {
    let prefix = opts.tag_prefix.as_deref().unwrap_or("");
    Tag::new(format!("{}{}", prefix, Tag::generate()))
}

//! Deserialize walk: wire values back to payload trees.
//!
//! The symmetric inverse of the serialize walk. Stub nodes rehydrate as
//! callables backed by unary invoke clients on the shared context; every
//! other map key is inert data, which is the whole of the pollution
//! defense this side needs (nothing here ever interprets `__proto__`,
//! `constructor`, or `prototype`).

use super::{DisallowedTag, RemoteMethod, RemoteOptions, RemotePayload, STUB_MARKER};
use crate::context::Context;
use crate::error::{InvokeError, RemoteError};
use crate::invoke::define_invoke;
use serde_json::{json, Map, Value};
use tracing::{debug, trace};
use weft_event::InvokeFamily;

/// Rehydrates stub nodes in a received value.
///
/// # Errors
///
/// - [`RemoteError::DepthExceeded`] past `max_depth`
/// - [`RemoteError::TooManyMethods`] past `max_functions`
/// - [`RemoteError::DisallowedTag`] on a prefix failure with the
///   `Error` policy
/// - [`RemoteError::MalformedStub`] in strict mode
pub(crate) fn deserialize_payload(
    ctx: &Context,
    value: &Value,
    opts: &RemoteOptions,
) -> Result<RemotePayload, RemoteError> {
    let mut methods = 0usize;
    walk(ctx, value, opts, 0, &mut methods)
}

fn walk(
    ctx: &Context,
    value: &Value,
    opts: &RemoteOptions,
    depth: usize,
    methods: &mut usize,
) -> Result<RemotePayload, RemoteError> {
    if depth > opts.max_depth {
        return Err(RemoteError::DepthExceeded {
            max: opts.max_depth,
        });
    }

    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(walk(ctx, item, opts, depth + 1, methods)?);
            }
            Ok(RemotePayload::Array(out))
        }
        Value::Object(map) => {
            if let Some(marker) = map.get(STUB_MARKER) {
                return rehydrate(ctx, map, marker, opts, methods);
            }
            let mut out = Vec::with_capacity(map.len());
            for (key, item) in map {
                out.push((key.clone(), walk(ctx, item, opts, depth + 1, methods)?));
            }
            Ok(RemotePayload::Object(out))
        }
        other => Ok(RemotePayload::Json(other.clone())),
    }
}

fn rehydrate(
    ctx: &Context,
    map: &Map<String, Value>,
    marker: &Value,
    opts: &RemoteOptions,
    methods: &mut usize,
) -> Result<RemotePayload, RemoteError> {
    let tag = marker.get("tag").and_then(Value::as_str);
    let Some(tag) = tag else {
        if opts.strict {
            return Err(RemoteError::MalformedStub {
                detail: "marker without a string tag".into(),
            });
        }
        debug!("malformed stub marker; carrying as data");
        return Ok(inert(map));
    };

    if !opts.allow {
        // Remote methods disabled: stubs stay inert data.
        return Ok(inert(map));
    }

    if let Some(prefix) = &opts.tag_prefix {
        if !tag.starts_with(prefix.as_str()) {
            return match opts.on_disallowed_tag {
                DisallowedTag::Ignore => {
                    debug!(%tag, "stub tag outside prefix; carrying as data");
                    Ok(inert(map))
                }
                DisallowedTag::Error => Err(RemoteError::DisallowedTag {
                    tag: tag.to_string(),
                }),
            };
        }
    }

    *methods += 1;
    if *methods > opts.max_functions {
        return Err(RemoteError::TooManyMethods {
            max: opts.max_functions,
        });
    }

    trace!(%tag, "rehydrating method stub");
    let client = define_invoke(ctx, &InvokeFamily::new(tag));
    let method = RemoteMethod::new(move |arg: Value| {
        let client = client.clone();
        async move {
            client.call(arg).await.map_err(|e| match e {
                InvokeError::Rejected { error } => error,
                other => json!(other.to_string()),
            })
        }
    });
    Ok(RemotePayload::Method(method))
}

fn inert(map: &Map<String, Value>) -> RemotePayload {
    RemotePayload::Json(Value::Object(map.clone()))
}

//! Two contexts joined by the channel transport: invoke across a wire.

use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use weft_event::InvokeFamily;
use weft_runtime::{
    bind_transport, define_invoke, define_invoke_handler, define_stream_invoke,
    define_stream_invoke_handler, ChannelTransport, Context, InvokeError, InvokeHandler,
    RemoteHandler, RemoteMethods, RemoteOptions, RemotePayload, Reply, StreamHandler,
};

/// A client context and a server context joined by a channel pair.
fn linked_pair() -> (Context, Context, weft_runtime::TransportBinding, weft_runtime::TransportBinding) {
    let (a, b) = ChannelTransport::pair();
    let ctx_a = Context::new();
    let ctx_b = Context::new();
    let bind_a = bind_transport(&ctx_a, a);
    let bind_b = bind_transport(&ctx_b, b);
    (ctx_a, ctx_b, bind_a, bind_b)
}

#[tokio::test]
async fn unary_invoke_across_the_wire() {
    let (ctx_a, ctx_b, _ba, _bb) = linked_pair();

    let family = InvokeFamily::new("remote:add");
    let _guard = define_invoke_handler(
        &ctx_b,
        &family,
        InvokeHandler::new(|input, _cx| async move {
            let v = input.into_value().unwrap_or(Value::Null);
            let sum = v["a"].as_i64().unwrap_or_default() + v["b"].as_i64().unwrap_or_default();
            Ok(Reply::new(json!({ "sum": sum })))
        }),
    );

    let client = define_invoke(&ctx_a, &family);
    let reply = tokio::time::timeout(
        Duration::from_secs(2),
        client.call(json!({ "a": 2, "b": 40 })),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply, json!({ "sum": 42 }));
}

#[tokio::test]
async fn handler_error_crosses_the_wire_intact() {
    let (ctx_a, ctx_b, _ba, _bb) = linked_pair();

    let family = InvokeFamily::new("remote:reject");
    let _guard = define_invoke_handler(
        &ctx_b,
        &family,
        InvokeHandler::new(|_i, _c| async move { Err(json!({ "kind": "Denied", "code": 403 })) }),
    );

    let client = define_invoke(&ctx_a, &family);
    let err = tokio::time::timeout(Duration::from_secs(2), client.call(json!(null)))
        .await
        .unwrap()
        .unwrap_err();
    match err {
        InvokeError::Rejected { error } => {
            assert_eq!(error, json!({ "kind": "Denied", "code": 403 }));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn streaming_invoke_across_the_wire_preserves_order() {
    let (ctx_a, ctx_b, _ba, _bb) = linked_pair();

    let family = InvokeFamily::new("remote:count");
    let _guard = define_stream_invoke_handler(
        &ctx_b,
        &family,
        StreamHandler::new(|input, _cx| async move {
            let n = input
                .into_value()
                .and_then(|v| v.as_u64())
                .unwrap_or_default();
            let items: Vec<Result<Value, Value>> = (1..=n).map(|i| Ok(json!(i))).collect();
            Ok(futures::stream::iter(items))
        }),
    );

    let client = define_stream_invoke(&ctx_a, &family);
    let mut stream = client.open(json!(5));
    let mut seen = Vec::new();
    while let Some(item) = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
    {
        seen.push(item.unwrap());
    }
    assert_eq!(seen, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
}

#[tokio::test]
async fn client_streaming_request_across_the_wire() {
    let (ctx_a, ctx_b, _ba, _bb) = linked_pair();

    let family = InvokeFamily::new("remote:sum");
    let _guard = define_invoke_handler(
        &ctx_b,
        &family,
        InvokeHandler::new(|input, _cx| async move {
            let mut stream = match input.into_stream() {
                Some(s) => s,
                None => return Err(json!("expected a streaming request")),
            };
            let mut total = 0i64;
            while let Some(item) = stream.next().await {
                total += item.map_err(|e| json!(e.to_string()))?.as_i64().unwrap_or_default();
            }
            Ok(Reply::new(json!(total)))
        }),
    );

    let client = define_invoke(&ctx_a, &family);
    let chunks: Vec<Result<Value, Value>> = vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))];
    let total = tokio::time::timeout(
        Duration::from_secs(2),
        client.call_streaming(futures::stream::iter(chunks)),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(total, json!(6));
}

#[tokio::test]
async fn transport_failure_rejects_pending_call() {
    let (a, b) = ChannelTransport::pair();
    let ctx_a = Context::new();
    let _bind_a = bind_transport(&ctx_a, a);
    // The peer endpoint stays unbound; nobody will ever answer.

    let family = InvokeFamily::new("remote:void");
    let client = define_invoke(&ctx_a, &family);

    let failer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        b.fail("connection reset by peer");
    });

    let err = tokio::time::timeout(Duration::from_secs(2), client.call(json!(null)))
        .await
        .unwrap()
        .unwrap_err();
    match err {
        InvokeError::Fatal { error } => assert_eq!(error, json!("connection reset by peer")),
        other => panic!("expected Fatal, got {other:?}"),
    }
    failer.await.unwrap();
}

#[tokio::test]
async fn remote_methods_call_back_across_the_wire() {
    let (ctx_a, ctx_b, _ba, _bb) = linked_pair();

    let remote_a = RemoteMethods::new(&ctx_a, RemoteOptions::default());
    let remote_b = RemoteMethods::new(&ctx_b, RemoteOptions::default());

    let family = InvokeFamily::new("remote:with-callback");
    let _guard = remote_b.define_handler(
        &family,
        RemoteHandler::new(|payload, _cx| async move {
            let notify = payload
                .get("notify")
                .and_then(RemotePayload::as_method)
                .cloned()
                .ok_or(json!("missing notify"))?;
            // Call back into the requesting side.
            let ack = notify.call(json!("done")).await?;
            Ok(json!({ "ack": ack }))
        }),
    );

    let payload = RemotePayload::Object(vec![(
        "notify".into(),
        RemotePayload::method(|arg: Value| async move {
            Ok(json!(format!("received:{}", arg.as_str().unwrap_or("?"))))
        }),
    )]);

    let client = remote_a.invoke(&family);
    let out = tokio::time::timeout(
        Duration::from_secs(2),
        client.call(&payload).unwrap(),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(out, json!({ "ack": "received:done" }));
}

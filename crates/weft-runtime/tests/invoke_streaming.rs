//! Streaming invoke: server streams, client streams, early drops.

use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use weft_event::InvokeFamily;
use weft_runtime::{
    define_invoke, define_invoke_handler, define_stream_invoke, define_stream_invoke_handler,
    CallOptions, Context, InvokeError, InvokeHandler, Reply, StreamHandler,
};

#[tokio::test]
async fn server_streaming_progress_report() {
    let ctx = Context::new();
    let family = InvokeFamily::new("job:run");

    let _guard = define_stream_invoke_handler(
        &ctx,
        &family,
        StreamHandler::new(|input, _cx| async move {
            let req = input.into_value().unwrap_or(Value::Null);
            let name = req["name"].as_str().unwrap_or_default().to_string();
            let age = req["age"].as_u64().unwrap_or_default();

            let mut items: Vec<Result<Value, Value>> = vec![Ok(
                json!({ "type": "parameters", "name": name, "age": age }),
            )];
            items.extend(
                (1..=5).map(|i| Ok(json!({ "type": "progress", "progress": i * 20 }))),
            );
            items.push(Ok(json!({ "type": "result", "result": true })));
            Ok(futures::stream::iter(items))
        }),
    );

    let client = define_stream_invoke(&ctx, &family);
    let mut stream = client.open(json!({ "name": "alice", "age": 25 }));

    let mut parameters = 0;
    let mut progress = Vec::new();
    let mut results = 0;
    while let Some(item) = stream.next().await {
        let item = item.unwrap();
        match item["type"].as_str().unwrap() {
            "parameters" => {
                parameters += 1;
                assert_eq!(item["name"], json!("alice"));
                assert_eq!(item["age"], json!(25));
            }
            "progress" => progress.push(item["progress"].as_u64().unwrap()),
            "result" => {
                results += 1;
                assert_eq!(item["result"], json!(true));
            }
            other => panic!("unexpected item type {other}"),
        }
    }

    assert_eq!(parameters, 1);
    assert_eq!(progress, vec![20, 40, 60, 80, 100]);
    assert_eq!(results, 1);
}

#[tokio::test]
async fn client_streaming_input_sums() {
    let ctx = Context::new();
    let family = InvokeFamily::new("sum");

    let _guard = define_invoke_handler(
        &ctx,
        &family,
        InvokeHandler::new(|input, _cx| async move {
            let mut stream = match input.into_stream() {
                Some(s) => s,
                None => return Err(json!("expected a streaming request")),
            };
            let mut total = 0i64;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(v) => total += v.as_i64().unwrap_or_default(),
                    Err(e) => return Err(json!(e.to_string())),
                }
            }
            Ok(Reply::new(json!(total)))
        }),
    );

    let client = define_invoke(&ctx, &family);
    let chunks: Vec<Result<Value, Value>> = vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))];
    let total = client
        .call_streaming(futures::stream::iter(chunks))
        .await
        .unwrap();
    assert_eq!(total, json!(6));
}

#[tokio::test]
async fn empty_client_stream_observes_empty_then_end() {
    let ctx = Context::new();
    let family = InvokeFamily::new("sum:empty");

    let _guard = define_invoke_handler(
        &ctx,
        &family,
        InvokeHandler::new(|input, _cx| async move {
            let mut stream = match input.into_stream() {
                Some(s) => s,
                None => return Err(json!("expected a streaming request")),
            };
            let mut count = 0;
            while let Some(item) = stream.next().await {
                item.map_err(|e| json!(e.to_string()))?;
                count += 1;
            }
            Ok(Reply::new(json!(count)))
        }),
    );

    let client = define_invoke(&ctx, &family);
    let chunks: Vec<Result<Value, Value>> = Vec::new();
    let count = client
        .call_streaming(futures::stream::iter(chunks))
        .await
        .unwrap();
    assert_eq!(count, json!(0));
}

#[tokio::test]
async fn request_producer_error_reaches_handler_read_site() {
    let ctx = Context::new();
    let family = InvokeFamily::new("sum:poisoned");

    let _guard = define_invoke_handler(
        &ctx,
        &family,
        InvokeHandler::new(|input, _cx| async move {
            let mut stream = match input.into_stream() {
                Some(s) => s,
                None => return Err(json!("expected a streaming request")),
            };
            let mut seen = Vec::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(v) => seen.push(v),
                    Err(InvokeError::Rejected { error }) => {
                        return Err(json!({ "producer": error, "before": seen }));
                    }
                    Err(other) => return Err(json!(other.to_string())),
                }
            }
            Ok(Reply::new(json!(seen)))
        }),
    );

    let client = define_invoke(&ctx, &family);
    let chunks: Vec<Result<Value, Value>> =
        vec![Ok(json!(1)), Err(json!("disk on fire"))];
    let err = client
        .call_streaming(futures::stream::iter(chunks))
        .await
        .unwrap_err();
    match err {
        InvokeError::Rejected { error } => {
            assert_eq!(error, json!({ "producer": "disk on fire", "before": [1] }));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn stream_error_item_raises_at_consumer() {
    let ctx = Context::new();
    let family = InvokeFamily::new("job:flaky");

    let _guard = define_stream_invoke_handler(
        &ctx,
        &family,
        StreamHandler::new(|_input, _cx| async move {
            let items: Vec<Result<Value, Value>> =
                vec![Ok(json!(1)), Ok(json!(2)), Err(json!("midway failure"))];
            Ok(futures::stream::iter(items))
        }),
    );

    let client = define_stream_invoke(&ctx, &family);
    let mut stream = client.open(json!(null));

    assert_eq!(stream.next().await.unwrap().unwrap(), json!(1));
    assert_eq!(stream.next().await.unwrap().unwrap(), json!(2));
    match stream.next().await.unwrap().unwrap_err() {
        InvokeError::Rejected { error } => assert_eq!(error, json!("midway failure")),
        other => panic!("expected Rejected, got {other:?}"),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn producer_start_failure_raises_at_consumer() {
    let ctx = Context::new();
    let family = InvokeFamily::new("job:doa");

    let _guard = define_stream_invoke_handler(
        &ctx,
        &family,
        StreamHandler::new(|_input, _cx| async move {
            Err::<futures::stream::Iter<std::vec::IntoIter<Result<Value, Value>>>, Value>(json!(
                "refused"
            ))
        }),
    );

    let client = define_stream_invoke(&ctx, &family);
    let mut stream = client.open(json!(null));
    match stream.next().await.unwrap().unwrap_err() {
        InvokeError::Rejected { error } => assert_eq!(error, json!("refused")),
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn listener_balance_after_clean_stream_end() {
    let ctx = Context::new();
    let family = InvokeFamily::new("job:quick");
    let _guard = define_stream_invoke_handler(
        &ctx,
        &family,
        StreamHandler::new(|_input, _cx| async move {
            let items: Vec<Result<Value, Value>> = vec![Ok(json!(1))];
            Ok(futures::stream::iter(items))
        }),
    );
    let client = define_stream_invoke(&ctx, &family);

    let baseline = ctx.total_listeners();
    let mut stream = client.open(json!(null));
    while stream.next().await.is_some() {}
    assert_eq!(ctx.total_listeners(), baseline);
}

#[tokio::test(start_paused = true)]
async fn open_with_timeout_raises_at_consumer_and_aborts_peer() {
    let ctx = Context::new();
    let family = InvokeFamily::new("job:silent");
    // No handler anywhere: nothing will ever answer.

    let (abort_tx, abort_rx) = tokio::sync::oneshot::channel();
    let abort_tx = parking_lot::Mutex::new(Some(abort_tx));
    ctx.on(
        family.send_abort(),
        weft_runtime::Listener::new(move |env: &weft_event::Envelope, _opts| {
            if let Some(tx) = abort_tx.lock().take() {
                let _ = tx.send(env.body.clone());
            }
        }),
    );

    let client = define_stream_invoke(&ctx, &family);
    let baseline = ctx.total_listeners();

    let mut stream = client.open_with(
        json!(null),
        CallOptions::new().with_timeout(Duration::from_millis(50)),
    );
    match stream.next().await.unwrap().unwrap_err() {
        InvokeError::Timeout { ms } => assert_eq!(ms, 50),
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert!(stream.next().await.is_none());

    // Listeners balance and the peer was told to stop.
    assert_eq!(ctx.total_listeners(), baseline);
    let body = tokio::time::timeout(Duration::from_secs(1), abort_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["reason"], json!("timeout"));
}

#[tokio::test]
async fn dropping_the_stream_aborts_the_call() {
    let ctx = Context::new();
    let family = InvokeFamily::new("job:endless");

    // Observe the abort on the server side.
    let (abort_tx, abort_rx) = tokio::sync::oneshot::channel();
    let abort_tx = parking_lot::Mutex::new(Some(abort_tx));
    ctx.on(
        family.send_abort(),
        weft_runtime::Listener::new(move |env: &weft_event::Envelope, _opts| {
            if let Some(tx) = abort_tx.lock().take() {
                let _ = tx.send(env.body.clone());
            }
        }),
    );

    let client = define_stream_invoke(&ctx, &family);
    let baseline = ctx.total_listeners();
    let stream = client.open(json!(null));
    drop(stream);

    let body = tokio::time::timeout(std::time::Duration::from_secs(1), abort_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(body["invokeId"].is_string());
    assert_eq!(ctx.total_listeners(), baseline);
}

//! Cancellation and fatal-event wiring.

use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use weft_event::InvokeFamily;
use weft_runtime::{
    abort_pair, define_invoke, define_invoke_handler, encode_body, CallOptions, Context, EventDesc,
    InvokeError, InvokeHandler, InvokeId, InvokePayload, Listener, Reply,
};

#[tokio::test(start_paused = true)]
async fn abort_mid_stream_request() {
    let ctx = Context::new();
    let family = InvokeFamily::new("feed");

    // What the handler saw: collected integers plus the terminal error.
    let observed: Arc<parking_lot::Mutex<(Vec<i64>, Option<InvokeError>)>> =
        Arc::new(parking_lot::Mutex::new((Vec::new(), None)));
    let sink = observed.clone();

    let _guard = define_invoke_handler(
        &ctx,
        &family,
        InvokeHandler::new(move |input, _cx| {
            let sink = sink.clone();
            async move {
                let mut stream = match input.into_stream() {
                    Some(s) => s,
                    None => return Err(json!("expected a streaming request")),
                };
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(v) => sink.lock().0.push(v.as_i64().unwrap_or_default()),
                        Err(e) => {
                            sink.lock().1 = Some(e);
                            break;
                        }
                    }
                }
                Ok(Reply::new(json!(null)))
            }
        }),
    );

    // One integer every 250 ms, 1..=10.
    let ticks = futures::stream::unfold(1i64, |i| async move {
        if i > 10 {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        Some((Ok::<Value, Value>(json!(i)), i + 1))
    });

    let (handle, signal) = abort_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1050)).await;
        handle.abort(json!("deadline"));
    });

    let client = define_invoke(&ctx, &family);
    let err = client
        .call_streaming_with(ticks, CallOptions::new().with_signal(signal))
        .await
        .unwrap_err();
    assert!(err.is_aborted());

    // Let the server-side abort delivery settle.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (chunks, terminal) = observed.lock().clone();
    assert_eq!(chunks, vec![1, 2, 3, 4]);
    match terminal {
        Some(e) => assert!(e.is_aborted()),
        None => panic!("handler never observed the abort"),
    }
}

#[tokio::test]
async fn pre_tripped_signal_aborts_before_any_work() {
    let ctx = Context::new();
    let family = InvokeFamily::new("never-runs");

    let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let ran_flag = ran.clone();
    let _guard = define_invoke_handler(
        &ctx,
        &family,
        InvokeHandler::new(move |_i, _c| {
            let ran_flag = ran_flag.clone();
            async move {
                ran_flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(Reply::new(json!(null)))
            }
        }),
    );

    let (handle, signal) = abort_pair();
    handle.abort(json!("too late"));

    let client = define_invoke(&ctx, &family);
    let err = client
        .call_with(json!(1), CallOptions::new().with_signal(signal))
        .await
        .unwrap_err();
    match err {
        InvokeError::Aborted { reason } => assert_eq!(reason, json!("too late")),
        other => panic!("expected Aborted, got {other:?}"),
    }

    tokio::task::yield_now().await;
    assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn server_handler_observes_cooperative_token() {
    let ctx = Context::new();
    let family = InvokeFamily::new("patient");

    let _guard = define_invoke_handler(
        &ctx,
        &family,
        InvokeHandler::new(|_input, cx| async move {
            // Wait for cancellation and report the reason.
            let reason = tokio::time::timeout(Duration::from_secs(5), cx.signal.aborted())
                .await
                .map_err(|_| json!("token never tripped"))?;
            Ok(Reply::new(json!({ "aborted_with": reason })))
        }),
    );

    // Observe the reply out-of-band: the aborting caller has already
    // settled, so its own listeners are gone.
    let id = InvokeId::from_wire("patient-call-1");
    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    let reply_tx = parking_lot::Mutex::new(Some(reply_tx));
    ctx.on(
        &family.receive_for(&id),
        Listener::new(move |env: &weft_event::Envelope, _opts| {
            if let Some(tx) = reply_tx.lock().take() {
                let _ = tx.send(env.body.clone());
            }
        }),
    );

    ctx.emit(
        family.send(),
        encode_body(&InvokePayload::unary(id.clone(), json!(null))).unwrap(),
    );
    tokio::task::yield_now().await;
    ctx.emit(
        family.send_abort(),
        json!({ "invokeId": id.as_str(), "reason": "user cancelled" }),
    );

    let body = tokio::time::timeout(Duration::from_secs(1), reply_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["content"], json!({ "aborted_with": "user cancelled" }));
}

#[tokio::test]
async fn abort_before_handler_start_is_deferred() {
    let ctx = Context::new();
    let family = InvokeFamily::new("late-start");

    let _guard = define_invoke_handler(
        &ctx,
        &family,
        InvokeHandler::new(|_input, cx| async move {
            let reason = tokio::time::timeout(Duration::from_secs(1), cx.signal.aborted())
                .await
                .map_err(|_| json!("token never tripped"))?;
            Ok(Reply::new(json!({ "started_cancelled": reason })))
        }),
    );

    let id = InvokeId::from_wire("late-1");
    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    let reply_tx = parking_lot::Mutex::new(Some(reply_tx));
    ctx.on(
        &family.receive_for(&id),
        Listener::new(move |env: &weft_event::Envelope, _opts| {
            if let Some(tx) = reply_tx.lock().take() {
                let _ = tx.send(env.body.clone());
            }
        }),
    );

    // Abort arrives before its invocation's send.
    ctx.emit(
        family.send_abort(),
        json!({ "invokeId": id.as_str(), "reason": "raced ahead" }),
    );
    ctx.emit(
        family.send(),
        encode_body(&InvokePayload::unary(id.clone(), json!(null))).unwrap(),
    );

    let body = tokio::time::timeout(Duration::from_secs(1), reply_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["content"], json!({ "started_cancelled": "raced ahead" }));
}

#[tokio::test]
async fn fatal_event_rejects_pending_call() {
    let ctx = Context::new();
    let fatal_source = EventDesc::new("worker:error");
    ctx.register_fatal_events(&fatal_source);

    // No handler anywhere: the call stays pending until the fatal fires.
    let family = InvokeFamily::new("doomed");
    let client = define_invoke(&ctx, &family);

    let emitter = {
        let ctx = ctx.clone();
        let fatal_source = fatal_source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx.emit(&fatal_source, json!({ "error": { "kind": "E", "detail": 7 } }));
        })
    };

    let err = client.call(json!(1)).await.unwrap_err();
    match err {
        InvokeError::Fatal { error } => assert_eq!(error, json!({ "kind": "E", "detail": 7 })),
        other => panic!("expected Fatal, got {other:?}"),
    }
    emitter.await.unwrap();
}

#[tokio::test]
async fn no_callbacks_after_aborted_settlement() {
    let ctx = Context::new();
    let family = InvokeFamily::new("quiet-after-abort");
    let client = define_invoke(&ctx, &family);

    let (handle, signal) = abort_pair();
    let call = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .call_with(json!(1), CallOptions::new().with_signal(signal))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let baseline = ctx.total_listeners();
    assert!(baseline > 0, "per-call listeners should be registered");

    handle.abort(json!(null));
    let err = call.await.unwrap().unwrap_err();
    assert!(err.is_aborted());

    // Every per-call listener is gone; a late reply reaches nobody.
    assert_eq!(ctx.total_listeners(), 0);
}

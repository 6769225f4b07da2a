//! Cooperative cancellation.
//!
//! An [`AbortHandle`]/[`AbortSignal`] pair carries a one-shot,
//! reason-bearing cancellation flag between the party that decides to
//! cancel and the parties that observe it:
//!
//! ```text
//! caller ──┐                                 ┌── request pump
//!          │ AbortHandle::abort(reason)      │   (stops emitting)
//!          ▼                                 ▼
//!      ┌────────────── watch channel ──────────────┐
//!      └──────────────────────────────────────────-┘
//!          ▲                                 ▲
//!          │                                 │
//!   invoke client                     server handler
//!   (emits send-abort,               (AbortSignal in HandlerCx,
//!    settles "Aborted")               observes cooperatively)
//! ```
//!
//! Cancellation is cooperative: a handler that never looks at its signal
//! runs to completion; its results are simply not delivered because the
//! client has already settled.
//!
//! # Example
//!
//! ```
//! use weft_runtime::abort_pair;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let (handle, signal) = abort_pair();
//! assert!(!signal.is_aborted());
//!
//! handle.abort(json!("user cancelled"));
//! assert!(signal.is_aborted());
//! assert_eq!(signal.aborted().await, json!("user cancelled"));
//!
//! // The first reason wins; later trips are no-ops.
//! handle.abort(json!("again"));
//! assert_eq!(signal.reason(), Some(json!("user cancelled")));
//! # }
//! ```

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// Creates a linked handle/signal pair.
#[must_use]
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(None);
    let handle = AbortHandle { tx: Arc::new(tx) };
    (handle, AbortSignal { rx })
}

/// The tripping side of a cancellation pair.
///
/// Cloneable; any clone may trip the flag. The first reason wins.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<Option<Value>>>,
}

impl AbortHandle {
    /// Trips the flag with a reason. Idempotent; only the first reason
    /// is retained and observers wake exactly once.
    pub fn abort(&self, reason: Value) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Returns `true` once the flag has been tripped.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Derives another signal observing this handle.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// The observing side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<Option<Value>>,
}

impl AbortSignal {
    /// Returns `true` once the flag has been tripped.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Returns the abort reason, if tripped.
    #[must_use]
    pub fn reason(&self) -> Option<Value> {
        self.rx.borrow().clone()
    }

    /// Resolves with the reason once the flag trips.
    ///
    /// If every [`AbortHandle`] is dropped without tripping, the future
    /// never resolves; select against it rather than awaiting it alone.
    pub async fn aborted(&self) -> Value {
        let mut rx = self.rx.clone();
        let result = rx.wait_for(Option::is_some).await.map(|value| (*value).clone());
        match result {
            Ok(value) => value.unwrap_or(Value::Null),
            // Sender gone without a trip: cancellation can no longer occur.
            Err(_) => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn trip_wakes_waiters() {
        let (handle, signal) = abort_pair();
        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.aborted().await }
        });

        handle.abort(json!("stop"));
        let reason = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(reason, json!("stop"));
    }

    #[tokio::test]
    async fn first_reason_wins() {
        let (handle, signal) = abort_pair();
        handle.abort(json!(1));
        handle.abort(json!(2));
        assert_eq!(signal.reason(), Some(json!(1)));
        assert_eq!(signal.aborted().await, json!(1));
    }

    #[tokio::test]
    async fn already_tripped_resolves_immediately() {
        let (handle, signal) = abort_pair();
        handle.abort(json!(null));
        assert_eq!(
            timeout(Duration::from_millis(50), signal.aborted())
                .await
                .unwrap(),
            json!(null)
        );
    }

    #[tokio::test]
    async fn dropped_handle_never_resolves() {
        let (handle, signal) = abort_pair();
        drop(handle);
        assert!(!signal.is_aborted());
        assert!(timeout(Duration::from_millis(50), signal.aborted())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn derived_signals_observe_the_same_flag() {
        let (handle, _signal) = abort_pair();
        let derived = handle.signal();
        handle.abort(json!("x"));
        assert!(derived.is_aborted());
    }
}

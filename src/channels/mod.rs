//! Single-delivery, idempotent-close rendezvous channels.
//!
//! Multiple runtimes can race to deliver onto the same channel (every
//! failing component in a row calls into the same `ErrorChannel`); whichever
//! delivery lands first wins and every later delivery is silently dropped,
//! never panics. `tokio::sync::oneshot` does not model this: a second `send`
//! on an already-consumed oneshot surfaces as an error the caller would have
//! to explicitly swallow, and it has no notion of "close without a value".
//! A `Mutex<Option<T>>` guarded by an `AtomicBool` closed-flag mirrors the Go
//! original's mutex-guarded channel plus `isClose` bool directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use serde_json::Value;

use crate::errors::EngineError;

struct Slot<T> {
    value: Mutex<Option<T>>,
    closed: AtomicBool,
    notify: Notify,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    async fn set(&self, value: T) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.value.lock().await = Some(value);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn wait(&self) -> Option<T>
    where
        T: Clone,
    {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return self.value.lock().await.clone();
            }
            self.notify.notified().await;
        }
    }
}

/// Response envelope: the `{code, msg, data}` shape written into
/// `response.body.*` of the RunStore once delivered.
#[derive(Debug, Clone)]
pub struct ResponseData {
    pub code: i32,
    pub msg: String,
    pub data: Value,
}

/// Carries the one response a run produces, delivered by whichever
/// component reaches `now_response` (or the final component) first.
#[derive(Clone)]
pub struct ResponseChannel {
    slot: Arc<Slot<ResponseData>>,
}

impl ResponseChannel {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot::new()),
        }
    }

    pub async fn deliver_and_close(&self, data: ResponseData) {
        self.slot.set(data).await;
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }

    pub async fn wait(&self) -> Option<ResponseData> {
        self.slot.wait().await
    }
}

impl Default for ResponseChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Carries the one error that ends a run, delivered by whichever component
/// fails first (after exhausting its own retries).
#[derive(Clone)]
pub struct ErrorChannel {
    slot: Arc<Slot<EngineError>>,
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot::new()),
        }
    }

    pub async fn deliver_and_close(&self, err: EngineError) {
        self.slot.set(err).await;
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }

    pub async fn wait(&self) -> Option<EngineError> {
        self.slot.wait().await
    }
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_delivery_wins_second_is_dropped() {
        let chan = ErrorChannel::new();
        chan.deliver_and_close(EngineError::Network("first".into()))
            .await;
        chan.deliver_and_close(EngineError::Network("second".into()))
            .await;

        let got = chan.wait().await.unwrap();
        assert_eq!(got.message(), "network error: first");
    }

    #[tokio::test]
    async fn concurrent_deliveries_exactly_one_survives() {
        let chan = Arc::new(ErrorChannel::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let chan = chan.clone();
            handles.push(tokio::spawn(async move {
                chan.deliver_and_close(EngineError::Network(format!("err-{i}")))
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(chan.is_closed());
        assert!(chan.wait().await.is_some());
    }

    #[tokio::test]
    async fn waiters_unblock_when_delivery_lands() {
        let chan = ResponseChannel::new();
        let waiter_chan = chan.clone();
        let waiter = tokio::spawn(async move { waiter_chan.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        chan.deliver_and_close(ResponseData {
            code: 0,
            msg: "ok".into(),
            data: Value::Null,
        })
        .await;

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.code, 0);
    }
}

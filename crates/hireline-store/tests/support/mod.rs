//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use hireline_api::{ApiError, RawDocument, RawSnapshot, RealtimeChannel, SnapshotStream, SubscriptionKey};
use hireline_store::Notifier;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type SnapshotSender = mpsc::UnboundedSender<Result<RawSnapshot, ApiError>>;

/// Realtime channel whose snapshots are pushed by the test.
#[derive(Default)]
pub struct ScriptedChannel {
    senders: Mutex<HashMap<SubscriptionKey, SnapshotSender>>,
    opens: AtomicUsize,
}

impl ScriptedChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn is_open(&self, key: &SubscriptionKey) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn push(&self, key: &SubscriptionKey, documents: Vec<Value>) {
        let senders = self.senders.lock().unwrap();
        let tx = senders.get(key).expect("no channel open for key");
        tx.send(Ok(RawSnapshot {
            documents: documents.into_iter().map(RawDocument::from_value).collect(),
        }))
        .expect("subscriber went away");
    }
}

#[async_trait]
impl RealtimeChannel for ScriptedChannel {
    async fn open(&self, key: &SubscriptionKey) -> Result<SnapshotStream, ApiError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(key.clone(), tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// Collects notifier messages.
#[derive(Default)]
pub struct Toasts {
    pub success: Mutex<Vec<String>>,
    pub error: Mutex<Vec<String>>,
}

impl Notifier for Toasts {
    fn success(&self, message: &str) {
        self.success.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.error.lock().unwrap().push(message.to_string());
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

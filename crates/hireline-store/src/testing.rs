//! In-memory backends and recorders for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use hireline_api::{
    ApiError, PullBackend, RawDocument, RawSnapshot, RealtimeChannel, SnapshotStream,
    SubscriptionKey,
};
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::entity::Entity;
use crate::notify::Notifier;
use crate::subscription::{DecodedSnapshot, SnapshotListener};

/// Let spawned tasks run to quiescence on the current-thread runtime.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

type SnapshotSender = mpsc::UnboundedSender<Result<RawSnapshot, ApiError>>;

/// Realtime channel driven by the test.
#[derive(Default)]
pub struct FakeChannel {
    senders: Mutex<HashMap<SubscriptionKey, SnapshotSender>>,
    opens: AtomicUsize,
    reject: Mutex<Option<String>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn reject_opens(&self, message: &str) {
        *self.reject.lock().unwrap() = Some(message.to_string());
    }

    pub fn push(&self, key: &SubscriptionKey, documents: Vec<Value>) {
        if let Some(tx) = self.senders.lock().unwrap().get(key) {
            let _ = tx.send(Ok(RawSnapshot {
                documents: documents.into_iter().map(RawDocument::from_value).collect(),
            }));
        }
    }

    pub fn fail(&self, key: &SubscriptionKey, message: &str) {
        if let Some(tx) = self.senders.lock().unwrap().get(key) {
            let _ = tx.send(Err(ApiError::Subscription(message.to_string())));
        }
    }

    /// True once the subscriber side of the key's stream has been dropped.
    pub fn is_closed(&self, key: &SubscriptionKey) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(key)
            .is_none_or(|tx| tx.is_closed())
    }
}

#[async_trait]
impl RealtimeChannel for FakeChannel {
    async fn open(&self, key: &SubscriptionKey) -> Result<SnapshotStream, ApiError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.reject.lock().unwrap().clone() {
            return Err(ApiError::Subscription(message));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(key.clone(), tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// Records every snapshot and error it receives.
#[derive(Default)]
pub struct RecordingListener {
    snapshots: Mutex<Vec<(u64, Vec<String>)>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn ids(&self) -> Vec<Vec<String>> {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|(_, ids)| ids.clone())
            .collect()
    }

    pub fn seqs(&self) -> Vec<u64> {
        self.snapshots.lock().unwrap().iter().map(|(seq, _)| *seq).collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl<T: Entity> SnapshotListener<T> for RecordingListener {
    fn on_snapshot(&self, snapshot: DecodedSnapshot<T>) {
        let ids = snapshot.items.iter().map(|item| item.id().to_string()).collect();
        self.snapshots.lock().unwrap().push((snapshot.seq, ids));
    }

    fn on_error(&self, error: Arc<ApiError>) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// In-memory pull API.
///
/// Created records get ids of the form `<first letter of collection>-<n>`.
pub struct FakeBackend {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    calls: Mutex<Vec<String>>,
    fail_next: Mutex<Option<String>>,
    next_id: AtomicU64,
    list_gate: Mutex<Option<Arc<Notify>>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            next_id: AtomicU64::new(1),
            list_gate: Mutex::new(None),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids_from(self, n: u64) -> Self {
        self.next_id.store(n, Ordering::SeqCst);
        self
    }

    pub fn seed(&self, collection: &str, documents: Vec<Value>) {
        self.collections
            .lock()
            .unwrap()
            .insert(collection.to_string(), documents);
    }

    /// The next call fails with a 500 carrying `message`.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock().unwrap() = Some(message.to_string());
    }

    /// Hold every list call until the returned handle is notified.
    pub fn gate_lists(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(verb))
            .count()
    }

    fn record(&self, verb: &str, collection: &str) -> Result<(), ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", verb, collection));
        match self.fail_next.lock().unwrap().take() {
            Some(message) => Err(ApiError::Server {
                status: 500,
                message,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PullBackend for FakeBackend {
    async fn list(&self, collection: &str) -> Result<Vec<RawDocument>, ApiError> {
        let gate = self.list_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.record("list", collection)?;
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(RawDocument::from_value)
            .collect())
    }

    async fn create(&self, collection: &str, body: Value) -> Result<RawDocument, ApiError> {
        self.record("create", collection)?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let prefix = collection.chars().next().unwrap_or('x');
        let mut doc = RawDocument::from_value(body);
        doc.insert("id", format!("{}-{}", prefix, n));
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .insert(0, doc.clone().into_value());
        Ok(doc)
    }

    async fn update(&self, collection: &str, id: &str, body: Value) -> Result<RawDocument, ApiError> {
        self.record("update", collection)?;
        let mut doc = RawDocument::from_value(body);
        doc.insert("id", id);
        let mut collections = self.collections.lock().unwrap();
        let items = collections.entry(collection.to_string()).or_default();
        match items.iter_mut().find(|item| item["id"] == id) {
            Some(item) => *item = doc.clone().into_value(),
            None => {
                return Err(ApiError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            }
        }
        Ok(doc)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), ApiError> {
        self.record("delete", collection)?;
        let mut collections = self.collections.lock().unwrap();
        if let Some(items) = collections.get_mut(collection) {
            items.retain(|item| item["id"] != id);
        }
        Ok(())
    }
}

/// Records notifier messages.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(bool, String)>>,
}

impl RecordingNotifier {
    pub fn successes(&self) -> Vec<String> {
        self.filter(true)
    }

    pub fn errors(&self) -> Vec<String> {
        self.filter(false)
    }

    fn filter(&self, ok: bool) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(success, _)| *success == ok)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
        self.messages.lock().unwrap().push((true, message.to_string()));
    }

    fn error(&self, message: &str) {
        self.messages.lock().unwrap().push((false, message.to_string()));
    }
}

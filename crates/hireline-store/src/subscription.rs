//! Live push subscriptions keyed by canonical query.
//!
//! One realtime channel is opened per distinct [`SubscriptionKey`]. Every
//! listener registered for the same key shares that channel, and the channel
//! is closed when its last listener unsubscribes. Snapshots are decoded once
//! per channel and delivered in the order the provider emitted them.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::StreamExt;
use hireline_api::{ApiError, RealtimeChannel, SubscriptionKey};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::entity::Entity;
use crate::transform::decode_all;

/// Process-wide snapshot counter. Later snapshots always carry larger
/// sequence numbers, across every key and store.
static SNAPSHOT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Allocate the next snapshot sequence number.
pub fn next_snapshot_seq() -> u64 {
    SNAPSHOT_SEQ.fetch_add(1, Ordering::Relaxed) + 1
}

/// A decoded full-collection snapshot.
#[derive(Debug)]
pub struct DecodedSnapshot<T> {
    pub seq: u64,
    pub items: Arc<[T]>,
}

impl<T> Clone for DecodedSnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> DecodedSnapshot<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            seq: next_snapshot_seq(),
            items: items.into(),
        }
    }
}

/// Receives snapshots and terminal errors for one subscription.
///
/// Callbacks run on the channel's pump task and must not block. A listener
/// must not unsubscribe its own subscription from inside a callback.
pub trait SnapshotListener<T>: Send + Sync + 'static {
    fn on_snapshot(&self, snapshot: DecodedSnapshot<T>);

    fn on_error(&self, error: Arc<ApiError>);
}

/// Lifecycle of a shared channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriptionState {
    /// Registered, channel not yet requested.
    Idle = 0,
    /// Waiting for the provider to accept the query.
    Subscribing = 1,
    /// Delivering snapshots.
    Active = 2,
    /// The channel failed; inert until re-subscribed.
    Error = 3,
    /// Every listener left and the channel was closed.
    TornDown = 4,
}

impl From<u8> for SubscriptionState {
    fn from(v: u8) -> Self {
        match v {
            0 => SubscriptionState::Idle,
            1 => SubscriptionState::Subscribing,
            2 => SubscriptionState::Active,
            3 => SubscriptionState::Error,
            _ => SubscriptionState::TornDown,
        }
    }
}

struct ListenerSlot<T> {
    id: u64,
    /// Cleared on teardown. Delivery holds this lock, so once teardown has
    /// taken it no further callback can run for the slot.
    active: Arc<Mutex<bool>>,
    listener: Arc<dyn SnapshotListener<T>>,
}

impl<T> Clone for ListenerSlot<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            listener: Arc::clone(&self.listener),
        }
    }
}

impl<T: Entity> ListenerSlot<T> {
    fn deliver(&self, snapshot: &DecodedSnapshot<T>) {
        let active = lock(&self.active);
        if *active {
            self.listener.on_snapshot(snapshot.clone());
        }
    }

    fn fail(&self, error: &Arc<ApiError>) {
        let active = lock(&self.active);
        if *active {
            self.listener.on_error(Arc::clone(error));
        }
    }
}

struct Fanout<T> {
    listeners: Vec<ListenerSlot<T>>,
    latest: Option<DecodedSnapshot<T>>,
    error: Option<Arc<ApiError>>,
}

/// One open realtime channel shared by every listener of a key.
struct SharedChannel<T> {
    key: SubscriptionKey,
    state: AtomicU8,
    fanout: Mutex<Fanout<T>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Entity> SharedChannel<T> {
    fn new(key: SubscriptionKey) -> Self {
        Self {
            key,
            state: AtomicU8::new(SubscriptionState::Idle as u8),
            fanout: Mutex::new(Fanout {
                listeners: Vec::new(),
                latest: None,
                error: None,
            }),
            task: Mutex::new(None),
        }
    }

    fn state(&self) -> SubscriptionState {
        SubscriptionState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SubscriptionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Register a listener, replaying the latest snapshot or error.
    fn attach(&self, slot: ListenerSlot<T>) {
        let mut fanout = lock(&self.fanout);
        if let Some(snapshot) = &fanout.latest {
            slot.deliver(snapshot);
        }
        if let Some(error) = &fanout.error {
            slot.fail(error);
        }
        fanout.listeners.push(slot);
    }

    /// Remove a listener. Returns true if none remain.
    fn detach(&self, id: u64) -> bool {
        let mut fanout = lock(&self.fanout);
        fanout.listeners.retain(|slot| slot.id != id);
        fanout.listeners.is_empty()
    }

    fn publish(&self, snapshot: DecodedSnapshot<T>) {
        let listeners = {
            let mut fanout = lock(&self.fanout);
            fanout.latest = Some(snapshot.clone());
            fanout.listeners.clone()
        };
        for slot in &listeners {
            slot.deliver(&snapshot);
        }
    }

    fn fail(&self, error: ApiError) {
        let error = Arc::new(error);
        self.set_state(SubscriptionState::Error);
        let listeners = {
            let mut fanout = lock(&self.fanout);
            fanout.error = Some(Arc::clone(&error));
            fanout.listeners.clone()
        };
        for slot in &listeners {
            slot.fail(&error);
        }
    }

    fn shutdown(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        self.set_state(SubscriptionState::TornDown);
        info!(key = %self.key, "realtime subscription torn down");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Registry<T> = DashMap<SubscriptionKey, Arc<SharedChannel<T>>>;

/// Opens and shares realtime subscriptions for one entity type.
pub struct SubscriptionManager<T: Entity> {
    channel: Arc<dyn RealtimeChannel>,
    registry: Arc<Registry<T>>,
    next_listener: Arc<AtomicU64>,
}

impl<T: Entity> Clone for SubscriptionManager<T> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            registry: Arc::clone(&self.registry),
            next_listener: Arc::clone(&self.next_listener),
        }
    }
}

impl<T: Entity> SubscriptionManager<T> {
    pub fn new(channel: Arc<dyn RealtimeChannel>) -> Self {
        Self {
            channel,
            registry: Arc::new(DashMap::new()),
            next_listener: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe `listener` to `key`.
    ///
    /// Reuses the open channel for an identical key. Must be called from
    /// within a tokio runtime.
    pub fn subscribe(
        &self,
        key: SubscriptionKey,
        listener: Arc<dyn SnapshotListener<T>>,
    ) -> Subscription<T> {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let slot = ListenerSlot {
            id,
            active: Arc::new(Mutex::new(true)),
            listener,
        };
        let active = Arc::clone(&slot.active);

        let shared = match self.registry.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let shared = Arc::clone(entry.get());
                trace!(key = %key, listener = id, "realtime: joining open subscription");
                shared.attach(slot);
                shared
            }
            Entry::Vacant(entry) => {
                let shared = Arc::new(SharedChannel::new(key.clone()));
                shared.attach(slot);
                entry.insert(Arc::clone(&shared));
                let task = tokio::spawn(pump(
                    Arc::clone(&self.channel),
                    Arc::clone(&shared),
                    Arc::clone(&self.registry),
                ));
                *lock(&shared.task) = Some(task);
                debug!(key = %key, listener = id, "realtime: opening subscription");
                shared
            }
        };

        Subscription {
            id,
            shared,
            registry: Arc::clone(&self.registry),
            active,
            torn_down: AtomicBool::new(false),
        }
    }

    /// Number of distinct keys with an open channel.
    pub fn open_channels(&self) -> usize {
        self.registry.len()
    }

    /// State of the channel for `key`, if one is registered.
    pub fn state(&self, key: &SubscriptionKey) -> Option<SubscriptionState> {
        self.registry.get(key).map(|shared| shared.state())
    }
}

/// Drive one channel: open it, decode and fan out snapshots, stop on error.
async fn pump<T: Entity>(
    channel: Arc<dyn RealtimeChannel>,
    shared: Arc<SharedChannel<T>>,
    registry: Arc<Registry<T>>,
) {
    shared.set_state(SubscriptionState::Subscribing);

    let mut stream = match channel.open(&shared.key).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(key = %shared.key, error = %e, "realtime: subscribe failed");
            retire(&registry, &shared);
            shared.fail(e);
            return;
        }
    };

    shared.set_state(SubscriptionState::Active);

    while let Some(next) = stream.next().await {
        match next {
            Ok(raw) => {
                let snapshot = DecodedSnapshot::new(decode_all::<T>(&raw.documents));
                trace!(
                    key = %shared.key,
                    seq = snapshot.seq,
                    count = snapshot.items.len(),
                    "realtime: snapshot"
                );
                shared.publish(snapshot);
            }
            Err(e) => {
                warn!(key = %shared.key, error = %e, "realtime: subscription failed");
                retire(&registry, &shared);
                shared.fail(e);
                return;
            }
        }
    }

    debug!(key = %shared.key, "realtime: snapshot stream ended");
    retire(&registry, &shared);
    shared.fail(ApiError::Subscription("snapshot stream ended".to_string()));
}

/// Drop a failed channel from the registry so the next subscribe reopens it.
fn retire<T: Entity>(registry: &Registry<T>, shared: &Arc<SharedChannel<T>>) {
    registry.remove_if(&shared.key, |_, current| Arc::ptr_eq(current, shared));
}

/// Handle for one registered listener.
///
/// Unsubscribing is idempotent and also happens on drop. Once
/// [`Subscription::unsubscribe`] returns, the listener receives nothing more.
pub struct Subscription<T: Entity> {
    id: u64,
    shared: Arc<SharedChannel<T>>,
    registry: Arc<Registry<T>>,
    active: Arc<Mutex<bool>>,
    torn_down: AtomicBool,
}

impl<T: Entity> Subscription<T> {
    pub fn key(&self) -> &SubscriptionKey {
        &self.shared.key
    }

    pub fn state(&self) -> SubscriptionState {
        if self.torn_down.load(Ordering::SeqCst) {
            SubscriptionState::TornDown
        } else {
            self.shared.state()
        }
    }

    pub fn unsubscribe(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        // Waits for an in-flight delivery to this listener to finish.
        *lock(&self.active) = false;

        // Detach under the registry entry lock so a concurrent subscribe to
        // the same key cannot join a channel that is about to close.
        let closed = self
            .registry
            .remove_if(&self.shared.key, |_, current| {
                Arc::ptr_eq(current, &self.shared) && self.shared.detach(self.id)
            })
            .is_some();

        if closed {
            self.shared.shutdown();
        } else if self.shared.detach(self.id) && self.shared.state() != SubscriptionState::Error
        {
            // Already retired from the registry; close what is left.
            self.shared.shutdown();
        }
        trace!(key = %self.shared.key, listener = self.id, "realtime: listener removed");
    }
}

impl<T: Entity> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Job;
    use crate::testing::{FakeChannel, RecordingListener, settle};
    use hireline_api::Constraint;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn open_jobs() -> SubscriptionKey {
        SubscriptionKey::new("jobs", [Constraint::equals("status", "open")])
    }

    #[test]
    fn test_state_from_u8() {
        assert_eq!(SubscriptionState::from(2), SubscriptionState::Active);
        assert_eq!(SubscriptionState::from(200), SubscriptionState::TornDown);
    }

    #[test]
    fn test_snapshot_seq_is_monotonic() {
        let a = next_snapshot_seq();
        let b = next_snapshot_seq();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_delivers_decoded_snapshots_in_order() {
        let channel = Arc::new(FakeChannel::new());
        let manager = SubscriptionManager::<Job>::new(channel.clone());
        let listener = Arc::new(RecordingListener::default());

        let sub = manager.subscribe(open_jobs(), listener.clone());
        settle().await;
        assert_eq!(sub.state(), SubscriptionState::Active);

        channel.push(&open_jobs(), vec![json!({"_id": "j1"})]);
        channel.push(&open_jobs(), vec![json!({"id": "j1"}), json!({"id": "j2"})]);
        settle().await;

        let seen = listener.ids();
        assert_eq!(seen, vec![vec!["j1"], vec!["j1", "j2"]]);
        assert!(listener.seqs().windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_identical_keys_share_one_channel() {
        let channel = Arc::new(FakeChannel::new());
        let manager = SubscriptionManager::<Job>::new(channel.clone());
        let a = Arc::new(RecordingListener::default());
        let b = Arc::new(RecordingListener::default());

        let key_a = SubscriptionKey::new(
            "jobs",
            [Constraint::equals("status", "open"), Constraint::equals("clientId", "c1")],
        );
        let key_b = SubscriptionKey::new(
            "jobs",
            [Constraint::equals("clientId", "c1"), Constraint::equals("status", "open")],
        );

        let _sa = manager.subscribe(key_a.clone(), a.clone());
        let _sb = manager.subscribe(key_b, b.clone());
        settle().await;

        assert_eq!(channel.opens(), 1);
        assert_eq!(manager.open_channels(), 1);

        channel.push(&key_a, vec![json!({"id": "j1"})]);
        settle().await;
        assert_eq!(a.ids(), vec![vec!["j1"]]);
        assert_eq!(b.ids(), vec![vec!["j1"]]);
    }

    #[tokio::test]
    async fn test_late_joiner_gets_latest_snapshot() {
        let channel = Arc::new(FakeChannel::new());
        let manager = SubscriptionManager::<Job>::new(channel.clone());
        let first = Arc::new(RecordingListener::default());
        let _s1 = manager.subscribe(open_jobs(), first.clone());
        settle().await;
        channel.push(&open_jobs(), vec![json!({"id": "j1"})]);
        settle().await;

        let late = Arc::new(RecordingListener::default());
        let _s2 = manager.subscribe(open_jobs(), late.clone());
        assert_eq!(late.ids(), vec![vec!["j1"]]);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_closes_last() {
        let channel = Arc::new(FakeChannel::new());
        let manager = SubscriptionManager::<Job>::new(channel.clone());
        let a = Arc::new(RecordingListener::default());
        let b = Arc::new(RecordingListener::default());

        let sa = manager.subscribe(open_jobs(), a.clone());
        let sb = manager.subscribe(open_jobs(), b.clone());
        settle().await;

        sa.unsubscribe();
        sa.unsubscribe();
        assert_eq!(sa.state(), SubscriptionState::TornDown);
        assert_eq!(manager.open_channels(), 1);

        channel.push(&open_jobs(), vec![json!({"id": "j1"})]);
        settle().await;
        assert!(a.ids().is_empty());
        assert_eq!(b.ids().len(), 1);

        drop(sb);
        assert_eq!(manager.open_channels(), 0);
        settle().await;
        assert!(channel.is_closed(&open_jobs()));
    }

    #[tokio::test]
    async fn test_no_delivery_after_teardown() {
        let channel = Arc::new(FakeChannel::new());
        let manager = SubscriptionManager::<Job>::new(channel.clone());
        let listener = Arc::new(RecordingListener::default());

        let sub = manager.subscribe(open_jobs(), listener.clone());
        settle().await;
        // Queued but not yet pumped when teardown happens.
        channel.push(&open_jobs(), vec![json!({"id": "j1"})]);
        sub.unsubscribe();
        settle().await;

        assert!(listener.ids().is_empty());
    }

    #[tokio::test]
    async fn test_error_is_terminal_and_resubscribe_reopens() {
        let channel = Arc::new(FakeChannel::new());
        let manager = SubscriptionManager::<Job>::new(channel.clone());
        let listener = Arc::new(RecordingListener::default());

        let sub = manager.subscribe(open_jobs(), listener.clone());
        settle().await;
        channel.fail(&open_jobs(), "permission denied");
        settle().await;

        assert_eq!(sub.state(), SubscriptionState::Error);
        assert_eq!(listener.errors(), vec!["subscription error: permission denied"]);
        assert_eq!(manager.open_channels(), 0);

        // Inert: nothing further arrives on the dead channel.
        channel.push(&open_jobs(), vec![json!({"id": "j1"})]);
        settle().await;
        assert!(listener.ids().is_empty());

        let again = Arc::new(RecordingListener::default());
        let _sub2 = manager.subscribe(open_jobs(), again.clone());
        settle().await;
        assert_eq!(channel.opens(), 2);
        channel.push(&open_jobs(), vec![json!({"id": "j2"})]);
        settle().await;
        assert_eq!(again.ids(), vec![vec!["j2"]]);

        // Tearing down the dead handle leaves the new channel alone.
        sub.unsubscribe();
        assert_eq!(manager.open_channels(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_reports_error() {
        let channel = Arc::new(FakeChannel::new());
        channel.reject_opens("quota exceeded");
        let manager = SubscriptionManager::<Job>::new(channel.clone());
        let listener = Arc::new(RecordingListener::default());

        let sub = manager.subscribe(open_jobs(), listener.clone());
        settle().await;

        assert_eq!(sub.state(), SubscriptionState::Error);
        assert_eq!(listener.errors().len(), 1);
    }
}

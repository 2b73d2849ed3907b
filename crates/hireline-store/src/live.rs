//! Push-backed collections.
//!
//! A [`LiveCollection`] holds the latest decoded snapshot of one query and
//! publishes `{data, loading, error}` to watchers. A [`LiveQuery`] owns the
//! subscription that feeds it and swaps that subscription when the query key
//! changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hireline_api::{ApiError, SubscriptionKey};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::entity::Entity;
use crate::error::StoreError;
use crate::subscription::{DecodedSnapshot, SnapshotListener, Subscription, SubscriptionManager};

/// What consumers of a push-backed collection observe.
#[derive(Debug)]
pub struct CollectionState<T> {
    pub data: Arc<[T]>,
    pub loading: bool,
    pub error: Option<StoreError>,
}

impl<T> Clone for CollectionState<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

impl<T> CollectionState<T> {
    fn idle() -> Self {
        Self {
            data: Arc::from(Vec::new()),
            loading: false,
            error: None,
        }
    }

    fn loading() -> Self {
        Self {
            loading: true,
            ..Self::idle()
        }
    }
}

/// Latest snapshot of one live query.
///
/// Each attached subscription gets a generation. Snapshots from a retired
/// generation, or older than the last applied one, are dropped.
pub struct LiveCollection<T> {
    state: watch::Sender<CollectionState<T>>,
    generation: AtomicU64,
    last_seq: Mutex<u64>,
}

impl<T: Entity> LiveCollection<T> {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(CollectionState::idle());
        Arc::new(Self {
            state,
            generation: AtomicU64::new(0),
            last_seq: Mutex::new(0),
        })
    }

    pub fn watch(&self) -> watch::Receiver<CollectionState<T>> {
        self.state.subscribe()
    }

    pub fn current(&self) -> CollectionState<T> {
        self.state.borrow().clone()
    }

    pub fn data(&self) -> Arc<[T]> {
        Arc::clone(&self.state.borrow().data)
    }

    /// Retire the current generation and reset to `loading` (or idle when
    /// `enabled` is false). Returns the new generation.
    fn begin(&self, enabled: bool) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_seq.lock().unwrap_or_else(|p| p.into_inner()) = 0;
        self.state.send_replace(if enabled {
            CollectionState::loading()
        } else {
            CollectionState::idle()
        });
        generation
    }

    fn apply(&self, generation: u64, snapshot: DecodedSnapshot<T>) {
        if self.generation.load(Ordering::SeqCst) != generation {
            trace!(generation, "live: dropping snapshot from retired subscription");
            return;
        }
        let mut last_seq = self.last_seq.lock().unwrap_or_else(|p| p.into_inner());
        if snapshot.seq <= *last_seq {
            trace!(seq = snapshot.seq, last = *last_seq, "live: dropping superseded snapshot");
            return;
        }
        *last_seq = snapshot.seq;
        self.state.send_replace(CollectionState {
            data: snapshot.items,
            loading: false,
            error: None,
        });
    }

    fn fail(&self, generation: u64, error: Arc<ApiError>) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        // Keep the last good data.
        self.state.send_modify(|state| {
            state.loading = false;
            state.error = Some(StoreError::Api(error));
        });
    }
}

/// Binds one subscription generation to a collection.
struct GenerationListener<T> {
    collection: Arc<LiveCollection<T>>,
    generation: u64,
}

impl<T: Entity> SnapshotListener<T> for GenerationListener<T> {
    fn on_snapshot(&self, snapshot: DecodedSnapshot<T>) {
        self.collection.apply(self.generation, snapshot);
    }

    fn on_error(&self, error: Arc<ApiError>) {
        warn!(error = %error, "live: subscription failed");
        self.collection.fail(self.generation, error);
    }
}

/// A collection kept current by a push subscription whose key may change.
///
/// With no key the query is disabled: no channel is opened and the state
/// reports `loading = false` at once.
pub struct LiveQuery<T: Entity> {
    manager: SubscriptionManager<T>,
    collection: Arc<LiveCollection<T>>,
    key: Option<SubscriptionKey>,
    subscription: Option<Subscription<T>>,
}

impl<T: Entity> LiveQuery<T> {
    pub fn new(manager: SubscriptionManager<T>, key: Option<SubscriptionKey>) -> Self {
        let mut query = Self {
            manager,
            collection: LiveCollection::new(),
            key: None,
            subscription: None,
        };
        query.start(key);
        query
    }

    pub fn key(&self) -> Option<&SubscriptionKey> {
        self.key.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn collection(&self) -> Arc<LiveCollection<T>> {
        Arc::clone(&self.collection)
    }

    pub fn watch(&self) -> watch::Receiver<CollectionState<T>> {
        self.collection.watch()
    }

    pub fn current(&self) -> CollectionState<T> {
        self.collection.current()
    }

    /// Switch to a different key. The old subscription is fully torn down
    /// before the new one is opened. An identical key is a no-op.
    pub fn set_key(&mut self, key: Option<SubscriptionKey>) {
        if key == self.key {
            return;
        }
        debug!(
            from = ?self.key.as_ref().map(ToString::to_string),
            to = ?key.as_ref().map(ToString::to_string),
            "live: query key changed"
        );
        if let Some(old) = self.subscription.take() {
            old.unsubscribe();
        }
        self.start(key);
    }

    fn start(&mut self, key: Option<SubscriptionKey>) {
        let generation = self.collection.begin(key.is_some());
        self.subscription = key.clone().map(|key| {
            let listener = Arc::new(GenerationListener {
                collection: Arc::clone(&self.collection),
                generation,
            });
            self.manager.subscribe(key, listener)
        });
        self.key = key;
    }
}

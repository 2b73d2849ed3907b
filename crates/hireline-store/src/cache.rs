//! TTL cache over the pull API, one instance per entity type.
//!
//! The store holds the last known-good collection. Reads within the TTL are
//! served locally, writes go to the server and are folded in on success, and
//! realtime snapshots for the same collection overwrite it wholesale.

use std::sync::Arc;
use std::time::Duration;

use hireline_api::{ApiError, PullBackend, RawDocument};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::entity::Entity;
use crate::error::StoreError;
use crate::notify::Notifier;
use crate::subscription::{DecodedSnapshot, SnapshotListener};
use crate::transform::decode_all;

/// Cache entry for one entity type.
#[derive(Debug)]
pub struct StoreState<T> {
    pub items: Arc<[T]>,
    pub last_fetched: Option<Instant>,
    pub cache_valid: bool,
    /// True while at least one fetch is in flight.
    pub loading: bool,
    /// Number of fetches in flight.
    pub in_flight: usize,
    pub error: Option<StoreError>,
    /// Sequence number of the last realtime snapshot applied, or 0.
    pub snapshot_seq: u64,
}

impl<T> Clone for StoreState<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            last_fetched: self.last_fetched,
            cache_valid: self.cache_valid,
            loading: self.loading,
            in_flight: self.in_flight,
            error: self.error.clone(),
            snapshot_seq: self.snapshot_seq,
        }
    }
}

impl<T> Default for StoreState<T> {
    fn default() -> Self {
        Self {
            items: Arc::from(Vec::new()),
            last_fetched: None,
            cache_valid: false,
            loading: false,
            in_flight: 0,
            error: None,
            snapshot_seq: 0,
        }
    }
}

impl<T> StoreState<T> {
    /// True if a read now can be served without network I/O.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.cache_valid
            && !self.items.is_empty()
            && self
                .last_fetched
                .is_some_and(|fetched| fetched.elapsed() < ttl)
    }
}

/// Result of [`CacheStore::fetch_if_needed`].
#[derive(Debug)]
pub enum FetchOutcome<T> {
    /// Served from cache; no request was made.
    Cached(Arc<[T]>),
    /// A request was made and the cache refreshed.
    Fetched(Arc<[T]>),
}

impl<T> FetchOutcome<T> {
    pub fn items(&self) -> &Arc<[T]> {
        match self {
            FetchOutcome::Cached(items) | FetchOutcome::Fetched(items) => items,
        }
    }

    pub fn into_items(self) -> Arc<[T]> {
        match self {
            FetchOutcome::Cached(items) | FetchOutcome::Fetched(items) => items,
        }
    }

    pub fn was_cached(&self) -> bool {
        matches!(self, FetchOutcome::Cached(_))
    }
}

/// Pull-backed TTL cache for one entity type.
pub struct CacheStore<T: Entity> {
    backend: Arc<dyn PullBackend>,
    notifier: Arc<dyn Notifier>,
    ttl: Duration,
    state: watch::Sender<StoreState<T>>,
}

impl<T: Entity> CacheStore<T> {
    pub fn new(backend: Arc<dyn PullBackend>, notifier: Arc<dyn Notifier>, ttl: Duration) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        Self {
            backend,
            notifier,
            ttl,
            state,
        }
    }

    fn collection(&self) -> &'static str {
        T::KIND.collection()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn watch(&self) -> watch::Receiver<StoreState<T>> {
        self.state.subscribe()
    }

    pub fn current(&self) -> StoreState<T> {
        self.state.borrow().clone()
    }

    pub fn items(&self) -> Arc<[T]> {
        Arc::clone(&self.state.borrow().items)
    }

    /// Unconditionally fetch the collection.
    ///
    /// On failure the previous items are kept, the cache is marked invalid and
    /// the error recorded. A response that arrives after a realtime snapshot
    /// landed is discarded.
    pub async fn fetch(&self) -> Result<Arc<[T]>, StoreError> {
        let issued_after = self.state.borrow().snapshot_seq;
        let _in_flight = InFlight::start(&self.state);
        debug!(collection = self.collection(), "cache: fetching");

        match self.backend.list(self.collection()).await {
            Ok(documents) => {
                let items: Arc<[T]> = decode_all::<T>(&documents).into();
                let mut kept = Arc::clone(&items);
                self.state.send_modify(|state| {
                    if state.snapshot_seq != issued_after {
                        debug!(
                            collection = self.collection(),
                            "cache: discarding pull response superseded by snapshot"
                        );
                        kept = Arc::clone(&state.items);
                        return;
                    }
                    state.items = items;
                    state.last_fetched = Some(Instant::now());
                    state.cache_valid = true;
                    state.error = None;
                });
                trace!(collection = self.collection(), count = kept.len(), "cache: fetched");
                Ok(kept)
            }
            Err(e) => {
                warn!(collection = self.collection(), error = %e, "cache: fetch failed");
                let error = StoreError::from(e);
                self.state.send_modify(|state| {
                    state.cache_valid = false;
                    state.error = Some(error.clone());
                });
                Err(error)
            }
        }
    }

    /// Alias for [`CacheStore::fetch`] in the consumer contract.
    pub async fn refetch(&self) -> Result<Arc<[T]>, StoreError> {
        self.fetch().await
    }

    /// Serve from cache when valid, fresh and non-empty; otherwise fetch.
    pub async fn fetch_if_needed(&self) -> Result<FetchOutcome<T>, StoreError> {
        let cached = {
            let state = self.state.borrow();
            state.is_fresh(self.ttl).then(|| Arc::clone(&state.items))
        };
        if let Some(items) = cached {
            trace!(collection = self.collection(), "cache: hit");
            return Ok(FetchOutcome::Cached(items));
        }
        trace!(collection = self.collection(), "cache: miss");
        self.fetch().await.map(FetchOutcome::Fetched)
    }

    /// Create a record. The server's copy is inserted at the front.
    pub async fn create(&self, entity: &T) -> Result<T, StoreError> {
        let result = self
            .backend
            .create(self.collection(), entity.write_body())
            .await;
        let created = self.resolve(result, entity, "created")?;

        let record = created.clone();
        self.state.send_modify(move |state| {
            let id = record.id().to_string();
            let items: Vec<T> = std::iter::once(record)
                .chain(state.items.iter().filter(|item| item.id() != id).cloned())
                .collect();
            state.items = items.into();
            state.last_fetched = Some(Instant::now());
        });
        Ok(created)
    }

    /// Update a record in place.
    pub async fn update(&self, entity: &T) -> Result<T, StoreError> {
        let result = self
            .backend
            .update(self.collection(), entity.id(), entity.write_body())
            .await;
        let updated = self.resolve(result, entity, "updated")?;
        self.replace(updated.clone());
        Ok(updated)
    }

    /// Delete a record by id.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        match self.backend.delete(self.collection(), id).await {
            Ok(()) => {
                self.state.send_modify(|state| {
                    let items: Vec<T> = state
                        .items
                        .iter()
                        .filter(|item| item.id() != id)
                        .cloned()
                        .collect();
                    state.items = items.into();
                    state.last_fetched = Some(Instant::now());
                });
                self.notifier.success(&format!("{} deleted", T::KIND.name()));
                Ok(())
            }
            Err(e) => Err(self.mutation_failed(e)),
        }
    }

    /// Show an update immediately, then persist it.
    ///
    /// If the server rejects it, the previous record is restored unless
    /// something newer (a snapshot or another write) has replaced it since.
    pub async fn update_optimistic(&self, entity: T) -> Result<T, StoreError> {
        let previous = self
            .state
            .borrow()
            .items
            .iter()
            .find(|item| item.id() == entity.id())
            .cloned()
            .ok_or_else(|| StoreError::UnknownRecord(entity.id().to_string()))?;

        self.replace_local(entity.clone());

        let result = self
            .backend
            .update(self.collection(), entity.id(), entity.write_body())
            .await;
        match self.resolve(result, &entity, "updated") {
            Ok(updated) => {
                self.replace(updated.clone());
                Ok(updated)
            }
            Err(e) => {
                self.state.send_if_modified(|state| {
                    let Some(pos) = state.items.iter().position(|item| item == &entity) else {
                        return false;
                    };
                    let mut items = state.items.to_vec();
                    items[pos] = previous;
                    state.items = items.into();
                    true
                });
                debug!(
                    collection = self.collection(),
                    id = entity.id(),
                    "cache: rolled back optimistic update"
                );
                Err(e)
            }
        }
    }

    /// Fold in a record the server has already accepted elsewhere, such as a
    /// confirmed optimistic create. Same effect as a successful [`CacheStore::create`].
    pub fn absorb(&self, record: T) {
        trace!(collection = self.collection(), id = record.id(), "cache: absorbed");
        self.replace(record);
    }

    /// Mark the cache stale so the next [`CacheStore::fetch_if_needed`] fetches.
    pub fn invalidate(&self) {
        debug!(collection = self.collection(), "cache: invalidated");
        self.state.send_modify(|state| {
            state.cache_valid = false;
            state.last_fetched = None;
        });
    }

    /// Overwrite the store with a realtime snapshot. Older snapshots are ignored.
    pub fn apply_snapshot(&self, snapshot: DecodedSnapshot<T>) {
        self.state.send_if_modified(|state| {
            if snapshot.seq <= state.snapshot_seq {
                trace!(seq = snapshot.seq, "cache: ignoring superseded snapshot");
                return false;
            }
            state.items = snapshot.items;
            state.snapshot_seq = snapshot.seq;
            state.last_fetched = Some(Instant::now());
            state.cache_valid = true;
            state.error = None;
            true
        });
    }

    fn resolve(
        &self,
        result: Result<RawDocument, ApiError>,
        sent: &T,
        verb: &str,
    ) -> Result<T, StoreError> {
        match result {
            Ok(raw) => {
                let decoded = T::decode(&raw);
                // Some endpoints acknowledge without echoing the record.
                let record = if decoded.id().is_empty() {
                    sent.clone()
                } else {
                    decoded
                };
                self.notifier.success(&format!("{} {}", T::KIND.name(), verb));
                Ok(record)
            }
            Err(e) => Err(self.mutation_failed(e)),
        }
    }

    fn mutation_failed(&self, e: ApiError) -> StoreError {
        warn!(collection = self.collection(), error = %e, "cache: mutation failed");
        self.notifier.error(&e.to_string());
        StoreError::from(e)
    }

    /// Replace by id, or insert at the front if absent, refreshing `last_fetched`.
    fn replace(&self, record: T) {
        self.state.send_modify(|state| {
            state.items = with_replaced(&state.items, record);
            state.last_fetched = Some(Instant::now());
        });
    }

    fn replace_local(&self, record: T) {
        self.state.send_modify(|state| {
            state.items = with_replaced(&state.items, record);
        });
    }
}

/// Holds `loading` up for one fetch. Overlapping fetches each hold their
/// own, and `loading` clears when the last one finishes or is cancelled.
struct InFlight<'a, T> {
    state: &'a watch::Sender<StoreState<T>>,
}

impl<'a, T> InFlight<'a, T> {
    fn start(state: &'a watch::Sender<StoreState<T>>) -> Self {
        state.send_modify(|state| {
            state.in_flight += 1;
            state.loading = true;
        });
        Self { state }
    }
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        self.state.send_modify(|state| {
            state.in_flight = state.in_flight.saturating_sub(1);
            state.loading = state.in_flight > 0;
        });
    }
}

fn with_replaced<T: Entity>(items: &[T], record: T) -> Arc<[T]> {
    let mut items = items.to_vec();
    match items.iter().position(|item| item.id() == record.id()) {
        Some(pos) => items[pos] = record,
        None => items.insert(0, record),
    }
    items.into()
}

impl<T: Entity> SnapshotListener<T> for CacheStore<T> {
    fn on_snapshot(&self, snapshot: DecodedSnapshot<T>) {
        self.apply_snapshot(snapshot);
    }

    fn on_error(&self, error: Arc<ApiError>) {
        warn!(collection = self.collection(), error = %error, "cache: realtime feed failed");
        // Without pushes the data may drift; let the next read pull.
        self.state.send_modify(|state| {
            state.cache_valid = false;
            state.error = Some(StoreError::Api(error));
        });
    }
}

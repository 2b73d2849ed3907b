//! One store per entity kind, built once and shared.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use hireline_api::{PullBackend, RealtimeChannel, SubscriptionKey};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::cache::CacheStore;
use crate::config::SyncConfig;
use crate::entity::{Entity, EntityKind, Optimistic};
use crate::error::{ConfigError, StoreError};
use crate::feed::ConversationFeed;
use crate::live::LiveQuery;
use crate::model::{
    Activity, Application, Candidate, Client, Interview, Job, Message, Notification,
};
use crate::notify::{LogNotifier, Notifier};
use crate::optimistic::{OpStatus, OptimisticQueue};
use crate::reconcile::{NotificationSummary, merge_sources};
use crate::subscription::{Subscription, SubscriptionManager};

/// The full set of stores for one backend.
///
/// Construct once and share; every field is cheap to clone out. Confirmed
/// optimistic writes are retired from their queue once the matching store
/// holds the server's copy: confirmed notifications are folded into
/// `notifications` straight away, confirmed messages wait until a fetch or
/// mirrored snapshot of `messages` (or a conversation feed) carries them.
pub struct Stores {
    pub jobs: Arc<CacheStore<Job>>,
    pub candidates: Arc<CacheStore<Candidate>>,
    pub clients: Arc<CacheStore<Client>>,
    pub applications: Arc<CacheStore<Application>>,
    pub interviews: Arc<CacheStore<Interview>>,
    pub messages: Arc<CacheStore<Message>>,
    pub notifications: Arc<CacheStore<Notification>>,
    pub activities: Arc<CacheStore<Activity>>,

    /// Optimistic message sends.
    pub outbox: OptimisticQueue<Message>,
    /// Optimistic notification creates.
    pub pending_notifications: OptimisticQueue<Notification>,

    realtime: Option<Arc<dyn RealtimeChannel>>,
    /// One `SubscriptionManager<T>` per kind, created on first use.
    managers: DashMap<EntityKind, Arc<dyn Any + Send + Sync>>,
    retirements: Vec<JoinHandle<()>>,
}

/// What happens to a confirmed optimistic write before its store has it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnConfirm {
    /// Insert the server's copy into the store, then retire the operation.
    Fold,
    /// Keep the operation until a fetch or snapshot delivers the record.
    AwaitDelivery,
}

impl Stores {
    /// Must be called within a tokio runtime.
    pub fn new(
        config: &SyncConfig,
        backend: Arc<dyn PullBackend>,
        realtime: Option<Arc<dyn RealtimeChannel>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        fn store<T: Entity>(
            config: &SyncConfig,
            backend: &Arc<dyn PullBackend>,
            notifier: &Arc<dyn Notifier>,
        ) -> Arc<CacheStore<T>> {
            let ttl = config.ttl.ttl(T::KIND);
            debug!(kind = %T::KIND, ttl_secs = ttl.as_secs(), "stores: building cache");
            Arc::new(CacheStore::new(Arc::clone(backend), Arc::clone(notifier), ttl))
        }

        let messages = store(config, &backend, &notifier);
        let notifications = store(config, &backend, &notifier);
        let outbox = OptimisticQueue::new(Arc::clone(&backend), Arc::clone(&notifier));
        let pending_notifications = OptimisticQueue::new(Arc::clone(&backend), Arc::clone(&notifier));

        let retirements = vec![
            tokio::spawn(retire_confirmed(
                Arc::clone(&messages),
                outbox.clone(),
                OnConfirm::AwaitDelivery,
            )),
            tokio::spawn(retire_confirmed(
                Arc::clone(&notifications),
                pending_notifications.clone(),
                OnConfirm::Fold,
            )),
        ];

        Self {
            jobs: store(config, &backend, &notifier),
            candidates: store(config, &backend, &notifier),
            clients: store(config, &backend, &notifier),
            applications: store(config, &backend, &notifier),
            interviews: store(config, &backend, &notifier),
            messages,
            notifications,
            activities: store(config, &backend, &notifier),
            outbox,
            pending_notifications,
            realtime,
            managers: DashMap::new(),
            retirements,
        }
    }

    /// Build stores over the HTTP client and WebSocket channel described by
    /// `config`, reporting mutations to the log. Must be called within a
    /// tokio runtime.
    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        let backend: Arc<dyn PullBackend> = Arc::new(config.rest_client()?);
        let realtime = config
            .realtime_channel()
            .map(|channel| Arc::new(channel) as Arc<dyn RealtimeChannel>);
        info!(
            api = %config.api_url,
            version = %config.api_version,
            realtime = realtime.is_some(),
            "stores: configured"
        );
        Ok(Self::new(config, backend, realtime, Arc::new(LogNotifier)))
    }

    pub fn has_realtime(&self) -> bool {
        self.realtime.is_some()
    }

    /// The subscription manager for `T`, or `None` without a realtime channel.
    ///
    /// Every call returns a handle to the same manager, so identical keys
    /// share one channel across mirrors, live queries and feeds.
    pub fn subscriptions<T: Entity>(&self) -> Option<SubscriptionManager<T>> {
        let realtime = self.realtime.as_ref()?;
        let manager = self
            .managers
            .entry(T::KIND)
            .or_insert_with(|| {
                debug!(kind = %T::KIND, "stores: creating subscription manager");
                let manager: Arc<dyn Any + Send + Sync> =
                    Arc::new(SubscriptionManager::<T>::new(Arc::clone(realtime)));
                manager
            })
            .clone();
        manager.downcast_ref::<SubscriptionManager<T>>().cloned()
    }

    /// Feed `store` from a realtime query. Snapshots overwrite the cache and
    /// mark it fresh until the returned subscription is dropped.
    pub fn mirror<T: Entity>(
        &self,
        store: &Arc<CacheStore<T>>,
        key: SubscriptionKey,
    ) -> Option<Subscription<T>> {
        let manager = self.subscriptions::<T>()?;
        Some(manager.subscribe(key, Arc::clone(store) as _))
    }

    /// Live messages for `key` joined with the outbox.
    ///
    /// The query is disabled, and the feed shows only local sends, when there
    /// is no realtime channel or no key.
    pub fn conversations(
        &self,
        key: Option<SubscriptionKey>,
        viewer: Option<String>,
    ) -> Option<(LiveQuery<Message>, ConversationFeed)> {
        let manager = self.subscriptions::<Message>()?;
        let query = LiveQuery::new(manager, key.clone());
        let feed = ConversationFeed::new(query.watch(), self.outbox.clone(), key, viewer);
        Some((query, feed))
    }

    /// Notification counts over the cached notifications and local creates.
    pub fn notification_summary(&self) -> NotificationSummary {
        let merged = merge_sources(
            &self.notifications.items(),
            &self.pending_notifications.operations(),
        );
        NotificationSummary::rebuild(&merged)
    }

    pub fn invalidate_all(&self) {
        self.jobs.invalidate();
        self.candidates.invalidate();
        self.clients.invalidate();
        self.applications.invalidate();
        self.interviews.invalidate();
        self.messages.invalidate();
        self.notifications.invalidate();
        self.activities.invalidate();
    }

    /// Fetch a collection (from cache when fresh) as canonical JSON.
    pub async fn fetch_json(&self, kind: EntityKind) -> Result<Vec<Value>, StoreError> {
        async fn encoded<T: Entity>(store: &CacheStore<T>) -> Result<Vec<Value>, StoreError> {
            let outcome = store.fetch_if_needed().await?;
            Ok(outcome.items().iter().map(Entity::encode).collect())
        }

        match kind {
            EntityKind::Job => encoded(&self.jobs).await,
            EntityKind::Candidate => encoded(&self.candidates).await,
            EntityKind::Client => encoded(&self.clients).await,
            EntityKind::Application => encoded(&self.applications).await,
            EntityKind::Interview => encoded(&self.interviews).await,
            EntityKind::Message => encoded(&self.messages).await,
            EntityKind::Notification => encoded(&self.notifications).await,
            EntityKind::Activity => encoded(&self.activities).await,
        }
    }
}

impl Drop for Stores {
    fn drop(&mut self) {
        for task in &self.retirements {
            task.abort();
        }
    }
}

/// Retire confirmed operations from `queue` once `store` holds their record.
///
/// Runs until aborted; both watch senders outlive the task.
async fn retire_confirmed<T: Optimistic>(
    store: Arc<CacheStore<T>>,
    queue: OptimisticQueue<T>,
    on_confirm: OnConfirm,
) {
    let mut items = store.watch();
    let mut ops = queue.subscribe();

    loop {
        let mut delivered: HashSet<String> = items
            .borrow_and_update()
            .items
            .iter()
            .map(|item| item.id().to_string())
            .collect();
        let operations = Arc::clone(&ops.borrow_and_update());

        if on_confirm == OnConfirm::Fold {
            for op in operations.iter().filter(|op| op.status == OpStatus::Confirmed) {
                if let Some(record) = &op.confirmed
                    && delivered.insert(record.id().to_string())
                {
                    store.absorb(record.clone());
                }
            }
        }

        let retired = queue.retire_delivered(|id| delivered.contains(id));
        if retired > 0 {
            debug!(kind = %T::KIND, retired, "stores: retired confirmed writes");
        }

        tokio::select! {
            changed = items.changed() => if changed.is_err() { break },
            changed = ops.changed() => if changed.is_err() { break },
        }
    }
    trace!(kind = %T::KIND, "stores: retirement stopped");
}

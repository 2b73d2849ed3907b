//! Client-side sync layer for hireline.
//!
//! Sits between the UI and the two backends in `hireline-api` and keeps a
//! local, typed copy of every collection the UI reads.
//!
//! ## Features
//!
//! - **Transform**: decodes loosely-shaped raw documents into canonical
//!   entities, normalizing dates, ids, arrays and legacy field shapes
//! - **TTL caches**: one [`CacheStore`] per entity kind that only pulls when
//!   its data is stale or empty
//! - **Live queries**: shared realtime subscriptions keyed by query, with
//!   teardown on key change and stale-snapshot guards
//! - **Optimistic writes**: [`OptimisticQueue`] shows sends at once under a
//!   temporary id and reconciles them with the server's copy
//! - **Derived views**: conversations and notification counts rebuilt from
//!   the merged realtime and optimistic records

pub mod cache;
pub mod config;
pub mod entity;
mod error;
pub mod feed;
pub mod live;
pub mod model;
pub mod notify;
pub mod optimistic;
pub mod reconcile;
mod registry;
pub mod subscription;
pub mod transform;

#[cfg(test)]
mod testing;

pub use cache::{CacheStore, FetchOutcome, StoreState};
pub use config::{SyncConfig, TtlPolicy};
pub use entity::{Entity, EntityKind, Optimistic, UnknownKind};
pub use error::{ConfigError, StoreError};
pub use feed::ConversationFeed;
pub use live::{CollectionState, LiveCollection, LiveQuery};
pub use model::{
    Activity, Application, Candidate, Client, Interview, Job, Message, Notification,
};
pub use notify::{LogNotifier, Notifier};
pub use optimistic::{OpStatus, OptimisticOp, OptimisticQueue, Submission};
pub use reconcile::{Conversation, Delivery, Merged, NotificationSummary, merge_sources, reconcile};
pub use registry::Stores;
pub use subscription::{
    DecodedSnapshot, SnapshotListener, Subscription, SubscriptionManager, SubscriptionState,
};
pub use transform::JobRequirements;

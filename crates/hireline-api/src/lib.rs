//! Backend clients for hireline.
//!
//! This crate talks to the two backends the sync layer sits on:
//!
//! ## Features
//!
//! - **Pull API**: versioned REST client for list/create/update/delete, with
//!   `{ data }` envelope unwrapping
//! - **Realtime**: WebSocket channel delivering full-collection snapshots for
//!   a subscription key
//! - **Query keys**: canonical, order-independent subscription keys built from
//!   query constraints

mod client;
mod error;
pub mod query;
pub mod realtime;
mod types;

pub use client::{DEFAULT_REQUEST_TIMEOUT, PullBackend, RestClient};
pub use error::ApiError;
pub use query::{Constraint, Direction, Filter, FilterOp, OrderBy, SubscriptionKey};
pub use realtime::{RawSnapshot, RealtimeChannel, SnapshotStream, WsChannel};
pub use types::RawDocument;

//! Long-running commands that print every realtime update.

use hireline_api::SubscriptionKey;
use hireline_store::{
    Activity, Application, Candidate, Client, Entity, EntityKind, Interview, Job, LiveQuery,
    Message, Notification, Stores,
};
use miette::{IntoDiagnostic, Result, miette};
use serde::Serialize;
use tracing::{debug, info};

fn no_realtime() -> miette::Report {
    miette!("no realtime channel configured (set --realtime-url or HIRELINE_REALTIME_URL)")
}

/// Print one JSON line per snapshot for `key` until interrupted.
pub async fn watch(stores: &Stores, kind: EntityKind, key: SubscriptionKey) -> Result<()> {
    info!(key = %key, "watching");
    match kind {
        EntityKind::Job => snapshots::<Job>(stores, key).await,
        EntityKind::Candidate => snapshots::<Candidate>(stores, key).await,
        EntityKind::Client => snapshots::<Client>(stores, key).await,
        EntityKind::Application => snapshots::<Application>(stores, key).await,
        EntityKind::Interview => snapshots::<Interview>(stores, key).await,
        EntityKind::Message => snapshots::<Message>(stores, key).await,
        EntityKind::Notification => snapshots::<Notification>(stores, key).await,
        EntityKind::Activity => snapshots::<Activity>(stores, key).await,
    }
}

async fn snapshots<T: Entity>(stores: &Stores, key: SubscriptionKey) -> Result<()> {
    let manager = stores.subscriptions::<T>().ok_or_else(no_realtime)?;
    let query = LiveQuery::new(manager, Some(key));
    let mut rx = query.watch();

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                if let Some(error) = state.error {
                    return Err(miette!("subscription failed: {}", error));
                }
                if state.loading {
                    continue;
                }
                debug!(count = state.data.len(), "snapshot");
                let rows: Vec<_> = state.data.iter().map(Entity::encode).collect();
                print_line(&rows)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
    Ok(())
}

/// Print the conversation list each time it changes until interrupted.
pub async fn conversations(
    stores: &Stores,
    key: Option<SubscriptionKey>,
    viewer: Option<String>,
) -> Result<()> {
    let (_query, feed) = stores.conversations(key, viewer).ok_or_else(no_realtime)?;
    let mut rx = feed.watch();
    print_line(&**rx.borrow_and_update())?;

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = rx.borrow_and_update().clone();
                print_line(&*view)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
    Ok(())
}

pub fn print_line<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value).into_diagnostic()?;
    println!("{}", line);
    Ok(())
}

//! The conversation view: live messages joined with optimistic sends.

use std::collections::HashSet;
use std::sync::Arc;

use hireline_api::SubscriptionKey;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::entity::Entity;
use crate::live::CollectionState;
use crate::model::Message;
use crate::optimistic::{OptimisticOp, OptimisticQueue, Submission};
use crate::reconcile::{Conversation, merge_sources, reconcile};

/// Conversations rebuilt whenever the message snapshot or the send queue
/// changes.
///
/// Only sends matching `scope` (the key the message snapshot was queried
/// with) are shown, so a feed for one conversation never shows another's
/// sends. A confirmed send whose id shows up in a snapshot is retired from
/// the queue, so each message appears exactly once. The background task
/// stops when the feed is dropped.
pub struct ConversationFeed {
    messages: watch::Receiver<CollectionState<Message>>,
    queue: OptimisticQueue<Message>,
    scope: Option<SubscriptionKey>,
    viewer: Option<String>,
    view: watch::Receiver<Arc<[Conversation]>>,
    task: JoinHandle<()>,
}

impl ConversationFeed {
    /// Must be called within a tokio runtime.
    pub fn new(
        messages: watch::Receiver<CollectionState<Message>>,
        queue: OptimisticQueue<Message>,
        scope: Option<SubscriptionKey>,
        viewer: Option<String>,
    ) -> Self {
        let ops = queue.subscribe();
        let initial = build(
            &messages.borrow().data,
            &ops.borrow(),
            scope.as_ref(),
            viewer.as_deref(),
        );
        let (tx, view) = watch::channel(initial);
        let task = tokio::spawn(run(
            messages.clone(),
            ops,
            queue.clone(),
            scope.clone(),
            viewer.clone(),
            tx,
        ));
        Self {
            messages,
            queue,
            scope,
            viewer,
            view,
            task,
        }
    }

    /// Send a message optimistically. It shows up in [`ConversationFeed::current`]
    /// immediately under a temporary id.
    pub fn send(&self, draft: Message) -> Submission<Message> {
        self.queue.submit(draft)
    }

    pub fn queue(&self) -> &OptimisticQueue<Message> {
        &self.queue
    }

    /// Rebuild from the current sources.
    pub fn current(&self) -> Vec<Conversation> {
        let data = Arc::clone(&self.messages.borrow().data);
        build(
            &data,
            &self.queue.operations(),
            self.scope.as_ref(),
            self.viewer.as_deref(),
        )
        .to_vec()
    }

    /// The last published view.
    pub fn conversations(&self) -> Arc<[Conversation]> {
        Arc::clone(&self.view.borrow())
    }

    pub fn watch(&self) -> watch::Receiver<Arc<[Conversation]>> {
        self.view.clone()
    }
}

impl Drop for ConversationFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn build(
    realtime: &[Message],
    ops: &[OptimisticOp<Message>],
    scope: Option<&SubscriptionKey>,
    viewer: Option<&str>,
) -> Arc<[Conversation]> {
    let ops: Vec<_> = ops
        .iter()
        .filter(|op| scope.is_none_or(|key| key.matches(&op.record().encode())))
        .cloned()
        .collect();
    reconcile(&merge_sources(realtime, &ops), viewer).into()
}

async fn run(
    mut messages: watch::Receiver<CollectionState<Message>>,
    mut ops: watch::Receiver<Arc<[OptimisticOp<Message>]>>,
    queue: OptimisticQueue<Message>,
    scope: Option<SubscriptionKey>,
    viewer: Option<String>,
    view: watch::Sender<Arc<[Conversation]>>,
) {
    loop {
        tokio::select! {
            changed = messages.changed() => if changed.is_err() { break },
            changed = ops.changed() => if changed.is_err() { break },
        }

        let data = Arc::clone(&messages.borrow_and_update().data);
        let operations = Arc::clone(&ops.borrow_and_update());

        let delivered: HashSet<&str> = data.iter().map(|m| m.id.as_str()).collect();
        let retired = queue.retire_delivered(|id| delivered.contains(id));
        if retired > 0 {
            debug!(retired, "feed: retired delivered messages");
        }

        view.send_replace(build(&data, &operations, scope.as_ref(), viewer.as_deref()));
    }
    trace!("feed: message source closed");
}

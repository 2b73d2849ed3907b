//! Merging realtime records with optimistic writes, and the views derived
//! from the merged collection.
//!
//! Every view here is rebuilt from scratch on each change. Nothing is patched
//! incrementally.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::Optimistic;
use crate::model::{Message, Notification};
use crate::optimistic::{OpStatus, OptimisticOp};

/// Which source a merged record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Part of the latest realtime snapshot.
    Realtime,
    /// Optimistic write awaiting its create response.
    Pending,
    /// Created on the server but not yet seen in a snapshot.
    Confirmed,
    /// Optimistic write the server rejected.
    Failed,
}

impl From<OpStatus> for Delivery {
    fn from(status: OpStatus) -> Self {
        match status {
            OpStatus::Pending => Delivery::Pending,
            OpStatus::Confirmed => Delivery::Confirmed,
            OpStatus::Failed => Delivery::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Merged<T> {
    pub record: T,
    pub delivery: Delivery,
}

/// Merge realtime records with optimistic operations by canonical id.
///
/// Realtime wins: a confirmed operation whose canonical id is already in the
/// snapshot is folded into it. Operations without a canonical id are never
/// matched and appear under their temporary id.
pub fn merge_sources<T: Optimistic>(realtime: &[T], ops: &[OptimisticOp<T>]) -> Vec<Merged<T>> {
    let known: HashSet<&str> = realtime.iter().map(|record| record.id()).collect();

    let mut merged: Vec<Merged<T>> = realtime
        .iter()
        .map(|record| Merged {
            record: record.clone(),
            delivery: Delivery::Realtime,
        })
        .collect();

    for op in ops {
        if let Some(id) = &op.canonical_id
            && known.contains(id.as_str())
        {
            continue;
        }
        merged.push(Merged {
            record: op.record(),
            delivery: op.status.into(),
        });
    }
    merged
}

/// Messages grouped by conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<String>,
    /// Oldest first by send time.
    pub messages: Vec<Merged<Message>>,
    pub last_message: Option<Message>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: usize,
}

/// Group messages into conversations, most recent conversation first.
///
/// Ordering uses send times, never input order. A message counts as unread
/// when it is unread, came from the server, and (given a viewer) is
/// addressed to the viewer.
pub fn reconcile(records: &[Merged<Message>], viewer: Option<&str>) -> Vec<Conversation> {
    let mut groups: BTreeMap<&str, Vec<&Merged<Message>>> = BTreeMap::new();
    for merged in records {
        groups
            .entry(merged.record.conversation_id.as_str())
            .or_default()
            .push(merged);
    }

    let mut conversations: Vec<Conversation> = groups
        .into_iter()
        .map(|(id, members)| build_conversation(id, members, viewer))
        .collect();

    // Most recent first; undated conversations last; ties by id.
    conversations.sort_by(|a, b| {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    conversations
}

fn build_conversation(
    id: &str,
    members: Vec<&Merged<Message>>,
    viewer: Option<&str>,
) -> Conversation {
    let mut messages: Vec<Merged<Message>> = members.into_iter().cloned().collect();
    // Stable: equal send times keep arrival order.
    messages.sort_by(|a, b| a.record.sent_at.cmp(&b.record.sent_at));

    let last = messages.last().map(|m| m.record.clone());

    let unread_count = messages
        .iter()
        .filter(|m| matches!(m.delivery, Delivery::Realtime | Delivery::Confirmed))
        .filter(|m| !m.record.read)
        .filter(|m| viewer.is_none_or(|viewer| m.record.recipient_id == viewer))
        .count();

    let mut participants: Vec<String> = messages
        .iter()
        .flat_map(|m| [m.record.sender_id.clone(), m.record.recipient_id.clone()])
        .filter(|p| !p.is_empty())
        .collect();
    participants.sort();
    participants.dedup();

    Conversation {
        id: id.to_string(),
        participants,
        last_message_at: last.as_ref().and_then(|m| m.sent_at),
        last_message: last,
        messages,
        unread_count,
    }
}

/// Aggregate view over a notification collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummary {
    pub total: usize,
    pub unread: usize,
    pub latest: Option<Notification>,
}

impl NotificationSummary {
    pub fn rebuild(records: &[Merged<Notification>]) -> Self {
        let unread = records
            .iter()
            .filter(|m| m.delivery != Delivery::Failed && !m.record.read)
            .count();
        let latest = records
            .iter()
            .map(|m| &m.record)
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned();
        Self {
            total: records.len(),
            unread,
            latest,
        }
    }
}

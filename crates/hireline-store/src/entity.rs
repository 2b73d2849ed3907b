//! The entity catalog and the trait every decoded record implements.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use hireline_api::RawDocument;

/// Every collection the sync layer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Job,
    Candidate,
    Client,
    Application,
    Interview,
    Message,
    Notification,
    Activity,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Job,
        EntityKind::Candidate,
        EntityKind::Client,
        EntityKind::Application,
        EntityKind::Interview,
        EntityKind::Message,
        EntityKind::Notification,
        EntityKind::Activity,
    ];

    /// Singular name, as used in serialized configuration.
    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Job => "job",
            EntityKind::Candidate => "candidate",
            EntityKind::Client => "client",
            EntityKind::Application => "application",
            EntityKind::Interview => "interview",
            EntityKind::Message => "message",
            EntityKind::Notification => "notification",
            EntityKind::Activity => "activity",
        }
    }

    /// REST resource and realtime collection path.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Job => "jobs",
            EntityKind::Candidate => "candidates",
            EntityKind::Client => "clients",
            EntityKind::Application => "applications",
            EntityKind::Interview => "interviews",
            EntityKind::Message => "messages",
            EntityKind::Notification => "notifications",
            EntityKind::Activity => "activities",
        }
    }

    /// Cache lifetime used when configuration does not override it.
    pub fn default_ttl(self) -> Duration {
        match self {
            EntityKind::Message | EntityKind::Notification | EntityKind::Activity => {
                Duration::from_secs(30)
            }
            EntityKind::Application | EntityKind::Interview => Duration::from_secs(60),
            EntityKind::Candidate => Duration::from_secs(2 * 60),
            EntityKind::Job | EntityKind::Client => Duration::from_secs(5 * 60),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown entity kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for EntityKind {
    type Err = UnknownKind;

    /// Accepts either the singular name or the collection name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.collection() == needle || kind.name() == needle)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// A canonical, decoded record.
///
/// `decode` must be total. `encode` produces the canonical JSON shape, which
/// `decode` accepts unchanged.
pub trait Entity: Clone + fmt::Debug + PartialEq + Serialize + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn decode(raw: &RawDocument) -> Self;

    fn encode(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Body for create/update requests: the canonical shape without `id`.
    fn write_body(&self) -> Value {
        let mut body = self.encode();
        if let Value::Object(map) = &mut body {
            map.remove("id");
        }
        body
    }
}

/// Entities that can be shown before the server has assigned their id.
pub trait Optimistic: Entity {
    /// The same record under a different id.
    fn with_id(&self, id: &str) -> Self;
}

//! Canonical entity types.
//!
//! Each entity decodes from the loose document shapes both backends produce
//! and serializes to a single camelCase shape that decodes back to itself.

use chrono::{DateTime, Utc};
use serde::Serialize;

use hireline_api::RawDocument;

use crate::entity::{Entity, EntityKind, Optimistic};
use crate::transform::fields::{canonical_id, count, flag, foreign_key, opt_text, string_list, text};
use crate::transform::{JobRequirements, date_field};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub location: String,
    pub employment_type: String,
    pub status: String,
    pub openings: u32,
    pub requirements: JobRequirements,
    pub candidate_ids: Vec<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Job {
    const KIND: EntityKind = EntityKind::Job;

    fn id(&self) -> &str {
        &self.id
    }

    fn decode(raw: &RawDocument) -> Self {
        Self {
            id: canonical_id(raw),
            title: text(raw, &["title", "name"]),
            description: text(raw, &["description"]),
            client_id: foreign_key(raw, &["clientId", "client"]),
            location: text(raw, &["location"]),
            employment_type: text(raw, &["employmentType", "type"]),
            status: text(raw, &["status"]),
            openings: count(raw, &["openings", "positions"]),
            requirements: JobRequirements::decode(raw),
            candidate_ids: string_list(raw, &["candidateIds", "candidates"]),
            tags: string_list(raw, &["tags"]),
            deadline: date_field(raw, &["deadline", "closingDate"]),
            created_at: date_field(raw, &["createdAt"]),
            updated_at: date_field(raw, &["updatedAt"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub status: String,
    pub skills: Vec<String>,
    pub job_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Candidate {
    const KIND: EntityKind = EntityKind::Candidate;

    fn id(&self) -> &str {
        &self.id
    }

    fn decode(raw: &RawDocument) -> Self {
        let mut name = text(raw, &["name", "fullName"]);
        if name.is_empty() {
            let parts = [text(raw, &["firstName"]), text(raw, &["lastName"])];
            name = parts
                .iter()
                .filter(|p| !p.is_empty())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" ");
        }

        Self {
            id: canonical_id(raw),
            name,
            email: text(raw, &["email"]),
            phone: text(raw, &["phone"]),
            status: text(raw, &["status"]),
            skills: string_list(raw, &["skills"]),
            job_ids: string_list(raw, &["jobIds", "jobs"]),
            resume_url: opt_text(raw, &["resumeUrl", "resume"]),
            created_at: date_field(raw, &["createdAt"]),
            updated_at: date_field(raw, &["updatedAt"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    pub industry: String,
    pub contact_name: String,
    pub contact_email: String,
    pub job_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Client {
    const KIND: EntityKind = EntityKind::Client;

    fn id(&self) -> &str {
        &self.id
    }

    fn decode(raw: &RawDocument) -> Self {
        Self {
            id: canonical_id(raw),
            name: text(raw, &["name", "companyName"]),
            industry: text(raw, &["industry"]),
            contact_name: text(raw, &["contactName"]),
            contact_email: text(raw, &["contactEmail", "email"]),
            job_ids: string_list(raw, &["jobIds", "jobs"]),
            created_at: date_field(raw, &["createdAt"]),
            updated_at: date_field(raw, &["updatedAt"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    pub status: String,
    pub stage: String,
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Application {
    const KIND: EntityKind = EntityKind::Application;

    fn id(&self) -> &str {
        &self.id
    }

    fn decode(raw: &RawDocument) -> Self {
        Self {
            id: canonical_id(raw),
            job_id: foreign_key(raw, &["jobId", "job"]),
            candidate_id: foreign_key(raw, &["candidateId", "candidate"]),
            status: text(raw, &["status"]),
            stage: text(raw, &["stage"]),
            notes: string_list(raw, &["notes"]),
            applied_at: date_field(raw, &["appliedAt", "createdAt"]),
            updated_at: date_field(raw, &["updatedAt"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interview {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    pub interviewer_ids: Vec<String>,
    pub mode: String,
    pub status: String,
    pub duration_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for Interview {
    const KIND: EntityKind = EntityKind::Interview;

    fn id(&self) -> &str {
        &self.id
    }

    fn decode(raw: &RawDocument) -> Self {
        Self {
            id: canonical_id(raw),
            application_id: foreign_key(raw, &["applicationId", "application"]),
            job_id: foreign_key(raw, &["jobId", "job"]),
            candidate_id: foreign_key(raw, &["candidateId", "candidate"]),
            interviewer_ids: string_list(raw, &["interviewerIds", "interviewers"]),
            mode: text(raw, &["mode", "type"]),
            status: text(raw, &["status"]),
            duration_minutes: count(raw, &["durationMinutes", "duration"]),
            location: opt_text(raw, &["location"]),
            feedback: opt_text(raw, &["feedback"]),
            scheduled_at: date_field(raw, &["scheduledAt", "date"]),
            created_at: date_field(raw, &["createdAt"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub text: String,
    pub read: bool,
    pub attachments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl Message {
    /// An unsent message. The id is assigned by the optimistic queue and
    /// later by the server.
    pub fn draft(
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            text: text.into(),
            sent_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

/// Stable conversation id for a pair of participants, independent of who sent.
pub fn conversation_key(a: &str, b: &str) -> String {
    if a.is_empty() || b.is_empty() {
        return String::new();
    }
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}_{}", lo, hi)
}

impl Entity for Message {
    const KIND: EntityKind = EntityKind::Message;

    fn id(&self) -> &str {
        &self.id
    }

    fn decode(raw: &RawDocument) -> Self {
        let sender_id = foreign_key(raw, &["senderId", "sender", "from"]).unwrap_or_default();
        let recipient_id =
            foreign_key(raw, &["recipientId", "recipient", "to"]).unwrap_or_default();
        let conversation_id = foreign_key(raw, &["conversationId", "conversation"])
            .unwrap_or_else(|| conversation_key(&sender_id, &recipient_id));

        Self {
            id: canonical_id(raw),
            conversation_id,
            sender_id,
            recipient_id,
            text: text(raw, &["text", "content", "body"]),
            read: flag(raw, &["read", "isRead"]),
            attachments: string_list(raw, &["attachments"]),
            sent_at: date_field(raw, &["sentAt", "createdAt", "timestamp"]),
        }
    }
}

impl Optimistic for Message {
    fn with_id(&self, id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub kind: String,
    pub read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for Notification {
    const KIND: EntityKind = EntityKind::Notification;

    fn id(&self) -> &str {
        &self.id
    }

    fn decode(raw: &RawDocument) -> Self {
        Self {
            id: canonical_id(raw),
            user_id: foreign_key(raw, &["userId", "user"]).unwrap_or_default(),
            title: text(raw, &["title"]),
            body: text(raw, &["body", "message"]),
            kind: text(raw, &["kind", "type"]),
            read: flag(raw, &["read", "isRead"]),
            link: opt_text(raw, &["link", "url"]),
            created_at: date_field(raw, &["createdAt", "timestamp"]),
        }
    }
}

impl Optimistic for Notification {
    fn with_id(&self, id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub actor_id: String,
    pub action: String,
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for Activity {
    const KIND: EntityKind = EntityKind::Activity;

    fn id(&self) -> &str {
        &self.id
    }

    fn decode(raw: &RawDocument) -> Self {
        Self {
            id: canonical_id(raw),
            actor_id: foreign_key(raw, &["actorId", "actor", "userId"]).unwrap_or_default(),
            action: text(raw, &["action"]),
            entity_type: text(raw, &["entityType"]),
            entity_id: foreign_key(raw, &["entityId", "entity"]),
            description: text(raw, &["description"]),
            created_at: date_field(raw, &["createdAt", "timestamp"]),
        }
    }
}

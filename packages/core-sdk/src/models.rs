use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::providers::ProviderId;

/**
 * \brief Author of a chat turn.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/**
 * \brief One turn of a conversation; immutable once created.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /** \brief Client-side id, empty when the sender did not supply one. */
    #[serde(default)]
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default = "now_utc", with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: now_utc(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/**
 * \brief Token counters reported by a provider, when present.
 */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub tokens_used: u64,
    pub total_tokens: u64,
}

/**
 * \brief Normalised completion result. Failures are folded into `content`.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponse {
    pub content: String,
    pub provider: ProviderId,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/**
 * \brief Server-held chat session, lost on restart.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub provider: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChatSession {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/**
 * \brief Partial update merged into an existing session; absent fields are kept.
 */
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionPatch {
    pub title: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    /**
     * \brief Classify an upload by MIME type.
     */
    pub fn from_mime(mime: &str) -> Self {
        if mime.to_ascii_lowercase().contains("pdf") {
            DocumentKind::Pdf
        } else {
            DocumentKind::Text
        }
    }
}

/**
 * \brief Uploaded file held as decoded text.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    pub summary: Option<String>,
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub content: String,
    pub kind: DocumentKind,
}

pub(crate) fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_accepts_minimal_json() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"user","content":"hi"}"#).expect("parse");
        assert_eq!(msg.role, Role::User);
        assert!(msg.id.is_empty());
    }

    #[test]
    fn chat_message_round_trips_timestamp() {
        let msg: ChatMessage = serde_json::from_str(
            r#"{"id":"1","role":"assistant","content":"ok","timestamp":"2024-05-01T10:00:00Z"}"#,
        )
        .expect("parse");
        let out = serde_json::to_value(&msg).unwrap();
        assert_eq!(out["timestamp"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn document_kind_from_mime() {
        assert_eq!(DocumentKind::from_mime("application/pdf"), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_mime("text/plain"), DocumentKind::Text);
        assert_eq!(
            DocumentKind::from_mime("application/octet-stream"),
            DocumentKind::Text
        );
    }

    #[test]
    fn response_omits_missing_usage() {
        let resp = AiResponse {
            content: "x".into(),
            provider: ProviderId::Groq,
            model: "m".into(),
            usage: None,
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v.get("usage").is_none());
        assert_eq!(v["provider"], "groq");
    }
}

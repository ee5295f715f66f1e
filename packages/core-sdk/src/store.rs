//! Process-lifetime storage for chat sessions and uploaded documents.
//!
//! Nothing here is persisted; a restart starts from empty maps.

use std::{collections::HashMap, sync::RwLock};

use anyhow::{anyhow, bail, Result};
use uuid::Uuid;

use crate::models::{
    now_utc, ChatSession, ChatSessionPatch, Document, NewChatSession, NewDocument,
};

/**
 * \brief In-memory session and document maps, constructed once and shared.
 */
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, ChatSession>>,
    documents: RwLock<HashMap<String, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * \brief Create a session with a fresh id; `createdAt == updatedAt`.
     */
    pub fn create_chat_session(&self, input: NewChatSession, user_id: &str) -> Result<ChatSession> {
        let now = now_utc();
        let session = ChatSession {
            id: Uuid::new_v4().to_string(),
            title: input.title,
            provider: input.provider,
            model: input.model,
            messages: input.messages,
            user_id: user_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.sessions
            .write()
            .map_err(|_| anyhow!("session store poisoned"))?
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    pub fn get_chat_session(&self, id: &str) -> Result<Option<ChatSession>> {
        Ok(self
            .sessions
            .read()
            .map_err(|_| anyhow!("session store poisoned"))?
            .get(id)
            .cloned())
    }

    pub fn chat_sessions_by_user(&self, user_id: &str) -> Result<Vec<ChatSession>> {
        let guard = self
            .sessions
            .read()
            .map_err(|_| anyhow!("session store poisoned"))?;
        let mut sessions: Vec<ChatSession> = guard
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    /**
     * \brief Merge the present fields of `patch` and refresh `updatedAt`.
     */
    pub fn update_chat_session(&self, id: &str, patch: ChatSessionPatch) -> Result<ChatSession> {
        let mut guard = self
            .sessions
            .write()
            .map_err(|_| anyhow!("session store poisoned"))?;
        let Some(session) = guard.get_mut(id) else {
            bail!("chat session {} not found", id);
        };
        if let Some(title) = patch.title {
            session.title = title;
        }
        if let Some(provider) = patch.provider {
            session.provider = provider;
        }
        if let Some(model) = patch.model {
            session.model = model;
        }
        if let Some(messages) = patch.messages {
            session.messages = messages;
        }
        session.updated_at = now_utc();
        Ok(session.clone())
    }

    pub fn create_document(&self, input: NewDocument, user_id: &str) -> Result<Document> {
        let document = Document {
            id: Uuid::new_v4().to_string(),
            filename: input.filename,
            content: input.content,
            kind: input.kind,
            summary: None,
            user_id: user_id.to_string(),
            created_at: now_utc(),
        };
        self.documents
            .write()
            .map_err(|_| anyhow!("document store poisoned"))?
            .insert(document.id.clone(), document.clone());
        Ok(document)
    }

    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self
            .documents
            .read()
            .map_err(|_| anyhow!("document store poisoned"))?
            .get(id)
            .cloned())
    }

    pub fn documents_by_user(&self, user_id: &str) -> Result<Vec<Document>> {
        let guard = self
            .documents
            .read()
            .map_err(|_| anyhow!("document store poisoned"))?;
        let mut docs: Vec<Document> = guard
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, DocumentKind};

    fn new_session(title: &str) -> NewChatSession {
        NewChatSession {
            title: title.into(),
            provider: "groq".into(),
            model: "m".into(),
            messages: Vec::new(),
        }
    }

    #[test]
    fn create_stamps_id_and_equal_times() {
        let store = MemoryStore::new();
        let a = store.create_chat_session(new_session("a"), "anonymous").unwrap();
        let b = store.create_chat_session(new_session("b"), "anonymous").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.created_at, a.updated_at);
        assert!(a.messages.is_empty());
        assert_eq!(store.get_chat_session(&a.id).unwrap(), Some(a));
    }

    #[test]
    fn update_merges_fields_and_bumps_updated_at() {
        let store = MemoryStore::new();
        let created = store.create_chat_session(new_session("t"), "anonymous").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let updated = store
            .update_chat_session(
                &created.id,
                ChatSessionPatch {
                    title: Some("renamed".into()),
                    messages: Some(vec![ChatMessage::user("hi")]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.provider, "groq");
        assert_eq!(updated.model, "m");
        assert_eq!(updated.messages.len(), 1);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);
    }

    #[test]
    fn update_unknown_session_fails() {
        let store = MemoryStore::new();
        assert!(store
            .update_chat_session("missing", ChatSessionPatch::default())
            .is_err());
    }

    #[test]
    fn listing_filters_by_user() {
        let store = MemoryStore::new();
        store.create_chat_session(new_session("1"), "anonymous").unwrap();
        store.create_chat_session(new_session("2"), "someone").unwrap();
        store.create_chat_session(new_session("3"), "anonymous").unwrap();
        let mine = store.chat_sessions_by_user("anonymous").unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|s| s.user_id == "anonymous"));
        assert!(store.chat_sessions_by_user("nobody").unwrap().is_empty());
    }

    #[test]
    fn documents_are_created_and_listed() {
        let store = MemoryStore::new();
        let doc = store
            .create_document(
                NewDocument {
                    filename: "notes.txt".into(),
                    content: "hello".into(),
                    kind: DocumentKind::Text,
                },
                "anonymous",
            )
            .unwrap();
        assert!(doc.summary.is_none());
        assert_eq!(store.get_document(&doc.id).unwrap(), Some(doc.clone()));
        assert_eq!(store.documents_by_user("anonymous").unwrap(), vec![doc]);
        assert!(store.documents_by_user("other").unwrap().is_empty());
    }
}

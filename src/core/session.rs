use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::message::{Message, Role};

pub type SessionId = u64;

/// Errors from session store lookups and mutations.
#[derive(Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The referenced session id does not exist.
    SessionNotFound(SessionId),

    /// The referenced message index is out of range for the session.
    MessageNotFound { session: SessionId, index: usize },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::SessionNotFound(id) => {
                write!(f, "No session with id {id}")
            }
            StoreError::MessageNotFound { session, index } => {
                write!(f, "Session {session} has no message at index {index}")
            }
        }
    }
}

impl StdError for StoreError {}

/// One independent conversation thread with its own message history and an
/// active profile, referenced by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: Option<String>,
    pub profile: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    /// Display label for the session list: explicit name, else the first user
    /// message, else a placeholder.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(first) = self.messages.iter().find(|m| m.role == Role::User) {
            let mut label: String = first.content.chars().take(40).collect();
            if first.content.chars().count() > 40 {
                label.push('…');
            }
            return label;
        }
        "New session".to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Holds every conversation known to the application, in creation order.
///
/// The store is plain data: it knows nothing about providers or in-flight
/// requests. The controller layers those rules on top.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionStore {
    next_id: SessionId,
    sessions: Vec<Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty session bound to the given profile name and return
    /// its id. Ids are never reused within one store.
    pub fn create_session(&mut self, profile: impl Into<String>) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;
        self.sessions.push(Session {
            id,
            name: None,
            profile: profile.into(),
            messages: Vec::new(),
        });
        id
    }

    pub fn list(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: SessionId) -> Result<&Session, StoreError> {
        self.sessions
            .iter()
            .find(|s| s.id == id)
            .ok_or(StoreError::SessionNotFound(id))
    }

    pub fn get_mut(&mut self, id: SessionId) -> Result<&mut Session, StoreError> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::SessionNotFound(id))
    }

    /// Append a message to a session. Completion fetches for user messages are
    /// the controller's job, not the store's.
    pub fn append_message(&mut self, id: SessionId, message: Message) -> Result<(), StoreError> {
        self.get_mut(id)?.messages.push(message);
        Ok(())
    }

    /// Replace the content of the message at `index` and discard every message
    /// after it. Downstream turns were generated against the old prefix, so
    /// they are no longer valid. The edited message keeps its role and gets a
    /// fresh timestamp.
    ///
    /// Returns the role of the edited message so the caller can decide whether
    /// a new completion is due.
    pub fn edit_message(
        &mut self,
        id: SessionId,
        index: usize,
        new_content: impl Into<String>,
    ) -> Result<Role, StoreError> {
        let session = self.get_mut(id)?;
        if index >= session.messages.len() {
            return Err(StoreError::MessageNotFound { session: id, index });
        }
        session.messages.truncate(index + 1);
        let message = &mut session.messages[index];
        message.content = new_content.into();
        message.timestamp = chrono::Utc::now();
        Ok(message.role)
    }

    /// Remove the message at `index` along with its immediate assistant
    /// reply, when one follows. The reply was generated in response to the
    /// deleted message and is meaningless without it.
    pub fn delete_message(&mut self, id: SessionId, index: usize) -> Result<(), StoreError> {
        let session = self.get_mut(id)?;
        if index >= session.messages.len() {
            return Err(StoreError::MessageNotFound { session: id, index });
        }
        if session
            .messages
            .get(index + 1)
            .is_some_and(|m| m.is_assistant())
        {
            session.messages.remove(index + 1);
        }
        session.messages.remove(index);
        Ok(())
    }

    /// Remove the session and all messages it owns.
    pub fn delete_session(&mut self, id: SessionId) -> Result<(), StoreError> {
        let pos = self
            .sessions
            .iter()
            .position(|s| s.id == id)
            .ok_or(StoreError::SessionNotFound(id))?;
        self.sessions.remove(pos);
        Ok(())
    }

    pub fn rename_session(
        &mut self,
        id: SessionId,
        name: Option<String>,
    ) -> Result<(), StoreError> {
        self.get_mut(id)?.name = name;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_session() -> (SessionStore, SessionId) {
        let mut store = SessionStore::new();
        let id = store.create_session("default");
        (store, id)
    }

    #[test]
    fn create_session_starts_empty() {
        let (store, id) = store_with_session();
        let session = store.get(id).unwrap();
        assert!(session.is_empty());
        assert_eq!(session.profile, "default");
    }

    #[test]
    fn session_ids_are_not_reused() {
        let mut store = SessionStore::new();
        let a = store.create_session("default");
        store.delete_session(a).unwrap();
        let b = store.create_session("default");
        assert_ne!(a, b);
    }

    #[test]
    fn append_and_get_messages() {
        let (mut store, id) = store_with_session();
        store.append_message(id, Message::user("hi")).unwrap();
        store.append_message(id, Message::assistant("hello")).unwrap();
        assert_eq!(store.get(id).unwrap().messages.len(), 2);
    }

    #[test]
    fn append_to_missing_session_fails() {
        let mut store = SessionStore::new();
        assert_eq!(
            store.append_message(7, Message::user("hi")),
            Err(StoreError::SessionNotFound(7))
        );
    }

    #[test]
    fn edit_truncates_to_index_plus_one() {
        let (mut store, id) = store_with_session();
        store.append_message(id, Message::user("one")).unwrap();
        store.append_message(id, Message::assistant("two")).unwrap();
        store.append_message(id, Message::user("three")).unwrap();
        store.append_message(id, Message::assistant("four")).unwrap();

        let role = store.edit_message(id, 0, "hello").unwrap();

        assert_eq!(role, Role::User);
        let session = store.get(id).unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "hello");
    }

    #[test]
    fn edit_removes_prior_assistant_reply() {
        let (mut store, id) = store_with_session();
        store.append_message(id, Message::user("hi")).unwrap();
        store.append_message(id, Message::assistant("hey there")).unwrap();

        store.edit_message(id, 0, "hello").unwrap();

        let session = store.get(id).unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[0].content, "hello");
    }

    #[test]
    fn edit_out_of_range_fails() {
        let (mut store, id) = store_with_session();
        store.append_message(id, Message::user("hi")).unwrap();
        assert_eq!(
            store.edit_message(id, 1, "nope"),
            Err(StoreError::MessageNotFound { session: id, index: 1 })
        );
    }

    #[test]
    fn delete_message_removes_its_reply_too() {
        let (mut store, id) = store_with_session();
        store.append_message(id, Message::user("one")).unwrap();
        store.append_message(id, Message::assistant("two")).unwrap();
        store.append_message(id, Message::user("three")).unwrap();
        store.append_message(id, Message::assistant("four")).unwrap();

        store.delete_message(id, 0).unwrap();

        let contents: Vec<&str> = store
            .get(id)
            .unwrap()
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["three", "four"]);
    }

    #[test]
    fn delete_message_without_reply_removes_only_itself() {
        let (mut store, id) = store_with_session();
        store.append_message(id, Message::user("one")).unwrap();
        store.append_message(id, Message::assistant("two")).unwrap();
        store.append_message(id, Message::user("dangling")).unwrap();

        store.delete_message(id, 2).unwrap();
        assert_eq!(store.get(id).unwrap().messages.len(), 2);

        // A following user message is not a reply and stays put.
        store.append_message(id, Message::user("a")).unwrap();
        store.append_message(id, Message::user("b")).unwrap();
        store.delete_message(id, 2).unwrap();
        assert_eq!(
            store.get(id).unwrap().messages.last().unwrap().content,
            "b"
        );
    }

    #[test]
    fn delete_message_out_of_range_fails() {
        let (mut store, id) = store_with_session();
        assert_eq!(
            store.delete_message(id, 0),
            Err(StoreError::MessageNotFound { session: id, index: 0 })
        );
    }

    #[test]
    fn delete_removes_from_listing() {
        let mut store = SessionStore::new();
        let a = store.create_session("default");
        let b = store.create_session("default");
        store.delete_session(a).unwrap();

        let ids: Vec<SessionId> = store.list().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![b]);
        assert_eq!(store.delete_session(a), Err(StoreError::SessionNotFound(a)));
    }

    #[test]
    fn label_prefers_name_then_first_user_message() {
        let (mut store, id) = store_with_session();
        assert_eq!(store.get(id).unwrap().label(), "New session");

        store.append_message(id, Message::user("what is a monad?")).unwrap();
        assert_eq!(store.get(id).unwrap().label(), "what is a monad?");

        store.rename_session(id, Some("category theory".into())).unwrap();
        assert_eq!(store.get(id).unwrap().label(), "category theory");
    }

    #[test]
    fn long_first_message_labels_are_truncated() {
        let (mut store, id) = store_with_session();
        store
            .append_message(id, Message::user("x".repeat(80)))
            .unwrap();
        let label = store.get(id).unwrap().label();
        assert_eq!(label.chars().count(), 41);
        assert!(label.ends_with('…'));
    }
}

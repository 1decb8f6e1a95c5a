use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::api::stream::{CompletionEvent, CompletionOutcome, CompletionRequest};
use crate::api::ChatRequest;
use crate::core::message::Message;
use crate::core::profile::{ProfileError, ProfileRegistry};
use crate::core::session::{SessionId, SessionStore, StoreError};

/// Controller-level error taxonomy. Everything here is surfaced to the UI as
/// a visible notice; nothing is fatal to the process.
#[derive(Debug)]
pub enum ChatError {
    /// Bad session id or message index.
    Session(StoreError),

    /// Bad or missing profile.
    Profile(ProfileError),

    /// A completion for this session is already in flight. Sends are
    /// rejected rather than queued.
    Busy(SessionId),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Session(e) => write!(f, "{e}"),
            ChatError::Profile(e) => write!(f, "{e}"),
            ChatError::Busy(id) => {
                write!(f, "Session {id} is waiting on a response; try again when it finishes")
            }
        }
    }
}

impl StdError for ChatError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ChatError::Session(e) => Some(e),
            ChatError::Profile(e) => Some(e),
            ChatError::Busy(_) => None,
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        ChatError::Session(e)
    }
}

impl From<ProfileError> for ChatError {
    fn from(e: ProfileError) -> Self {
        ChatError::Profile(e)
    }
}

/// What a completion event did once the controller accepted it.
#[derive(Debug)]
pub enum Applied {
    /// An assistant message was appended to the session.
    Assistant { session_id: SessionId },

    /// The provider call failed; the session is unchanged.
    Failed { session_id: SessionId, message: String },
}

struct InFlight {
    stream_id: u64,
    cancel: CancellationToken,
}

/// Mediates between UI events and the session store, and owns the
/// one-outstanding-completion-per-session rule.
///
/// The controller never performs I/O itself: sends and edits return a
/// [`CompletionRequest`] for the caller to hand to the completion service,
/// and provider outcomes come back through [`ChatController::apply_event`].
/// Each request carries a stream id; events whose id is no longer current
/// for their session are dropped, so a superseded completion can never
/// append to a session behind the user's back.
pub struct ChatController {
    pub store: SessionStore,
    pub profiles: ProfileRegistry,
    in_flight: HashMap<SessionId, InFlight>,
    next_stream_id: u64,
}

impl ChatController {
    pub fn new(store: SessionStore, profiles: ProfileRegistry) -> Self {
        Self {
            store,
            profiles,
            in_flight: HashMap::new(),
            next_stream_id: 1,
        }
    }

    /// Create a new empty session. With no explicit profile, the registry's
    /// initial profile is used.
    pub fn create_session(&mut self, profile: Option<&str>) -> Result<SessionId, ChatError> {
        let profile_name = self.profiles.resolve_initial(profile)?.name.clone();
        let id = self.store.create_session(profile_name);
        tracing::info!(session_id = id, "created session");
        Ok(id)
    }

    /// Delete a session, cancelling any completion still in flight for it.
    pub fn delete_session(&mut self, id: SessionId) -> Result<(), ChatError> {
        self.cancel_in_flight(id);
        self.store.delete_session(id)?;
        tracing::info!(session_id = id, "deleted session");
        Ok(())
    }

    /// Switch a session to a different profile. Takes effect on the next
    /// completion; history is untouched.
    pub fn set_session_profile(&mut self, id: SessionId, profile: &str) -> Result<(), ChatError> {
        let name = self.profiles.get(profile)?.name.clone();
        self.store.get_mut(id)?.profile = name;
        Ok(())
    }

    pub fn is_busy(&self, id: SessionId) -> bool {
        self.in_flight.contains_key(&id)
    }

    /// Append a user message and prepare the completion request for it.
    ///
    /// Rejected with [`ChatError::Busy`] while a completion for the same
    /// session is outstanding.
    pub fn send_message(
        &mut self,
        id: SessionId,
        text: impl Into<String>,
    ) -> Result<CompletionRequest, ChatError> {
        if self.is_busy(id) {
            return Err(ChatError::Busy(id));
        }
        // Validate everything before mutating so a failed send leaves the
        // session untouched.
        self.store.get(id)?;
        self.profile_for(id)?;

        self.store.append_message(id, Message::user(text))?;
        self.begin_completion(id)
    }

    /// Replace the content of the message at `index`, discarding everything
    /// after it, and prepare a fresh completion when the edited message is a
    /// user turn. Any in-flight completion for the session is cancelled
    /// first; it was generated against the now-stale prefix.
    pub fn edit_message(
        &mut self,
        id: SessionId,
        index: usize,
        new_content: impl Into<String>,
    ) -> Result<Option<CompletionRequest>, ChatError> {
        // Validate before cancelling: a failed edit must not disturb the
        // pending completion.
        self.validate_index(id, index)?;
        self.profile_for(id)?;
        self.cancel_in_flight(id);

        let role = self.store.edit_message(id, index, new_content)?;
        if role.is_user() {
            Ok(Some(self.begin_completion(id)?))
        } else {
            Ok(None)
        }
    }

    /// Remove the message at `index` and its immediate assistant reply. Any
    /// in-flight completion was generated against the old history and is
    /// cancelled; no new one is triggered.
    pub fn delete_message(&mut self, id: SessionId, index: usize) -> Result<(), ChatError> {
        self.validate_index(id, index)?;
        self.cancel_in_flight(id);
        self.store.delete_message(id, index)?;
        Ok(())
    }

    fn validate_index(&self, id: SessionId, index: usize) -> Result<(), ChatError> {
        let session = self.store.get(id)?;
        if index >= session.messages.len() {
            return Err(StoreError::MessageNotFound { session: id, index }.into());
        }
        Ok(())
    }

    /// Cancel the outstanding completion for a session, if any.
    pub fn cancel_in_flight(&mut self, id: SessionId) {
        if let Some(in_flight) = self.in_flight.remove(&id) {
            tracing::debug!(session_id = id, stream_id = in_flight.stream_id, "cancelling stream");
            in_flight.cancel.cancel();
        }
    }

    /// Accept a completion outcome. Returns `None` when the event is stale:
    /// its session is gone or its stream id was superseded by a later send,
    /// edit, or cancellation.
    pub fn apply_event(&mut self, event: CompletionEvent) -> Option<Applied> {
        let current = self.in_flight.get(&event.session_id)?;
        if current.stream_id != event.stream_id {
            tracing::debug!(
                session_id = event.session_id,
                stream_id = event.stream_id,
                "dropping stale completion event"
            );
            return None;
        }
        self.in_flight.remove(&event.session_id);

        match event.outcome {
            CompletionOutcome::Success(content) => {
                if let Err(e) = self
                    .store
                    .append_message(event.session_id, Message::assistant(content))
                {
                    tracing::warn!(error = %e, "completed session vanished before append");
                    return None;
                }
                Some(Applied::Assistant {
                    session_id: event.session_id,
                })
            }
            CompletionOutcome::Error(message) => Some(Applied::Failed {
                session_id: event.session_id,
                message,
            }),
        }
    }

    fn profile_for(&self, id: SessionId) -> Result<&crate::core::profile::Profile, ChatError> {
        let session = self.store.get(id)?;
        Ok(self.profiles.get(&session.profile)?)
    }

    fn begin_completion(&mut self, id: SessionId) -> Result<CompletionRequest, ChatError> {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 1;

        let payload = {
            let session = self.store.get(id)?;
            let profile = self.profiles.get(&session.profile)?;
            ChatRequest::from_context(profile, &session.messages)
        };

        let cancel = CancellationToken::new();
        self.in_flight.insert(
            id,
            InFlight {
                stream_id,
                cancel: cancel.clone(),
            },
        );

        Ok(CompletionRequest {
            session_id: id,
            stream_id,
            cancel,
            payload,
        })
    }
}

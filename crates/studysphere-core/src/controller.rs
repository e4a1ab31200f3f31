//! Interaction controller: the session state machine.
//!
//! A send is split in two committed transitions so the optimistic user
//! message is observable before the reply arrives:
//!
//! 1. [`Controller::submit`] appends the user message, marks the session in
//!    flight and hands back a [`PendingRequest`].
//! 2. [`PendingRequest::run`] talks to the model off the UI path, and
//!    [`Controller::complete`] appends the model message and returns to idle.

use std::sync::Arc;

use crate::ai::ResponseClient;
use crate::ingest::{Attachments, EncodedImage};
use crate::state::{Conversation, ConversationId, Message, SessionState};
use crate::store::{BlobStore, ConversationStore};

const FAILURE_PREFIX: &str = "Sorry, I couldn't process that request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitRejected {
    #[error("a response is still being generated")]
    InFlight,
    #[error("nothing to send")]
    Empty,
    #[error("images are still being attached")]
    EncodingInProgress,
}

/// A request accepted by [`Controller::submit`] but not yet answered
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub conversation_id: ConversationId,
    pub prompt: String,
    pub images: Vec<EncodedImage>,
}

impl PendingRequest {
    pub async fn run(self, client: &ResponseClient) -> Reply {
        let text = client.generate(&self.prompt, &self.images).await;
        Reply {
            conversation_id: self.conversation_id,
            outcome: Ok(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub conversation_id: ConversationId,
    /// Generated text, or a description of why the request never finished
    pub outcome: Result<String, String>,
}

impl Reply {
    pub fn failed(conversation_id: ConversationId, description: impl Into<String>) -> Self {
        Self {
            conversation_id,
            outcome: Err(description.into()),
        }
    }
}

pub struct Controller {
    store: ConversationStore,
    session: SessionState,
    blobs: Arc<dyn BlobStore>,
}

impl Controller {
    /// Rehydrate history from `blobs`; session pointers always start empty.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        let store = ConversationStore::restore(blobs.as_ref());
        Self {
            store,
            session: SessionState::default(),
            blobs,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn draft(&self) -> &str {
        &self.session.draft
    }

    pub fn draft_mut(&mut self) -> &mut String {
        &mut self.session.draft
    }

    pub fn is_in_flight(&self) -> bool {
        self.session.in_flight
    }

    pub fn active_id(&self) -> Option<&ConversationId> {
        self.session.active_conversation_id.as_ref()
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active_id().and_then(|id| self.store.get(id))
    }

    /// Idle -> AwaitingResponse. Rejections leave every piece of state as it
    /// was.
    pub fn submit(
        &mut self,
        text: String,
        images: Vec<EncodedImage>,
    ) -> Result<PendingRequest, SubmitRejected> {
        if self.session.in_flight {
            return Err(SubmitRejected::InFlight);
        }
        if text.trim().is_empty() && images.is_empty() {
            return Err(SubmitRejected::Empty);
        }

        self.session.draft.clear();
        self.session.in_flight = true;

        let message = Message::user(
            text.clone(),
            images.iter().map(EncodedImage::to_data_url).collect(),
        );

        let target = self
            .session
            .active_conversation_id
            .clone()
            .filter(|id| self.store.contains(id));

        let conversation_id = match target {
            Some(id) => {
                self.store.append_message(&id, message);
                id
            }
            None => {
                let id = self.store.create_conversation(message);
                self.session.active_conversation_id = Some(id.clone());
                id
            }
        };

        tracing::info!(
            conversation_id = %conversation_id,
            images = images.len(),
            "Submitted message"
        );
        self.persist();

        Ok(PendingRequest {
            conversation_id,
            prompt: text,
            images,
        })
    }

    /// Submit the current draft together with the attachment tray. Blocked
    /// while any attachment is still encoding; the tray is emptied on success.
    pub fn submit_draft(
        &mut self,
        attachments: &mut Attachments,
    ) -> Result<PendingRequest, SubmitRejected> {
        if self.session.in_flight {
            return Err(SubmitRejected::InFlight);
        }
        let images = attachments
            .ready_images()
            .ok_or(SubmitRejected::EncodingInProgress)?;

        let pending = self.submit(self.session.draft.clone(), images)?;
        attachments.clear();
        Ok(pending)
    }

    /// AwaitingResponse -> Idle, on success or failure alike.
    pub fn complete(&mut self, reply: Reply) {
        let text = match reply.outcome {
            Ok(text) => text,
            Err(description) => format!("{} {}", FAILURE_PREFIX, description),
        };

        if self.active_id() != Some(&reply.conversation_id) {
            tracing::info!(
                conversation_id = %reply.conversation_id,
                "Reply arrived for a conversation that is no longer displayed"
            );
        }

        self.store.append_message(&reply.conversation_id, Message::model(text));
        self.session.in_flight = false;
        self.persist();
    }

    /// Submit, wait for the model and record the reply
    pub async fn send(
        &mut self,
        text: String,
        images: Vec<EncodedImage>,
        client: &ResponseClient,
    ) -> Result<ConversationId, SubmitRejected> {
        let pending = self.submit(text, images)?;
        let reply = pending.run(client).await;
        let id = reply.conversation_id.clone();
        self.complete(reply);
        Ok(id)
    }

    /// Point the session at another conversation. In-flight requests keep
    /// their original target.
    pub fn select_conversation(&mut self, id: &ConversationId) -> bool {
        if !self.store.contains(id) {
            return false;
        }
        self.session.active_conversation_id = Some(id.clone());
        true
    }

    pub fn new_chat(&mut self) {
        self.session.active_conversation_id = None;
    }

    pub fn delete_conversation(&mut self, id: &ConversationId) {
        if self.store.delete_conversation(id) {
            self.persist();
        }
        if self.active_id() == Some(id) {
            self.session.active_conversation_id = None;
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.persist(self.blobs.as_ref()) {
            tracing::warn!(error = %e, "Failed to save conversations");
        }
    }
}

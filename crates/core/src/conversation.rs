//! Conversation logging.
//!
//! A [`Conversation`] owns the live [`Session`] of one bridge and mirrors every
//! transcript entry to a [`ConversationRecorder`]. Recorder failures are logged
//! and never interrupt the conversation.

use crate::session::{Message, Session};
use crate::usage::{Pricing, Usage, UsageSummary};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("recorder I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("recorder serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("recorder backend error: {0}")]
    Backend(String),
}

/// Storage for transcripts and usage summaries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationRecorder: Send + Sync {
    /// Called for every transcript entry as it happens.
    async fn append(&self, session_id: Uuid, message: &Message) -> Result<(), RecorderError>;

    /// Called once when the session ends.
    async fn save(&self, session: &Session, summary: &UsageSummary) -> Result<(), RecorderError>;
}

pub struct Conversation {
    session: Session,
    recorder: Arc<dyn ConversationRecorder>,
}

impl Conversation {
    pub fn new(session: Session, recorder: Arc<dyn ConversationRecorder>) -> Self {
        Self { session, recorder }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn namespace(&self) -> &str {
        &self.session.namespace
    }

    /// Appends `message` to the transcript.
    pub async fn log(&mut self, message: Message) {
        if let Err(e) = self.recorder.append(self.session.id, &message).await {
            warn!(session_id = %self.session.id, error = %e, "Failed to record message");
        }
        self.session.push(message);
    }

    pub fn record_usage(&mut self, usage: &Usage) {
        self.session.record_usage(usage);
    }

    pub fn summary(&self, pricing: &Pricing) -> UsageSummary {
        self.session.summary(pricing)
    }

    /// Persists the transcript and `summary`. Failures are logged.
    pub async fn save(&self, summary: &UsageSummary) {
        match self.recorder.save(&self.session, summary).await {
            Ok(()) => info!(
                session_id = %self.session.id,
                messages = self.session.transcript().len(),
                cost_usd = summary.cost_usd,
                "Conversation saved"
            ),
            Err(e) => warn!(session_id = %self.session.id, error = %e, "Failed to save conversation"),
        }
    }
}

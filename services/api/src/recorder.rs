//! Conversation recorder writing one JSON file per session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kbvoice_core::{ConversationRecorder, Message, RecorderError, Session, UsageSummary};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Serialize)]
struct ConversationFile<'a> {
    session_id: Uuid,
    kb_id: &'a str,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    duration_seconds: f64,
    message_count: usize,
    messages: &'a [Message],
    cost: &'a UsageSummary,
}

/// Writes `{dir}/{session_id}_{YYYYmmdd_HHMMSS}.json` when a session ends.
/// Messages are kept by the session itself until then.
#[derive(Debug, Clone)]
pub struct JsonFileRecorder {
    dir: PathBuf,
}

impl JsonFileRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session: &Session) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.json",
            session.id,
            session.created_at.format("%Y%m%d_%H%M%S")
        ))
    }
}

#[async_trait]
impl ConversationRecorder for JsonFileRecorder {
    async fn append(&self, session_id: Uuid, message: &Message) -> Result<(), RecorderError> {
        debug!(%session_id, role = ?message.role, kind = ?message.kind, "Transcript entry");
        Ok(())
    }

    async fn save(&self, session: &Session, summary: &UsageSummary) -> Result<(), RecorderError> {
        let file = ConversationFile {
            session_id: session.id,
            kb_id: &session.namespace,
            start_time: session.created_at,
            end_time: Utc::now(),
            duration_seconds: summary.duration_seconds,
            message_count: session.transcript().len(),
            messages: session.transcript(),
            cost: summary,
        };
        let contents = serde_json::to_vec_pretty(&file)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(session);
        tokio::fs::write(&path, contents).await?;
        info!(path = %path.display(), "Conversation written");
        Ok(())
    }
}

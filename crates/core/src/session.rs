//! Per-connection session record: identity, namespace, token counters and the
//! append-only transcript.

use crate::events::{ContentPart, ConversationItem};
use crate::usage::{Pricing, TokenUsage, Usage, UsageSummary, round6};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Text stored in place of audio content, which is never persisted.
pub const AUDIO_PLACEHOLDER: &str = "[Audio]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Function,
}

impl Role {
    /// Maps an upstream role string. Unknown roles are treated as `system`.
    pub fn from_upstream(role: &str) -> Self {
        match role {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::System,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Audio,
    FunctionCall,
    FunctionResult,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn new(role: Role, kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            role,
            kind,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Builds transcript entries from a `conversation.item.created` item.
    ///
    /// Text parts keep their text; audio parts become [`AUDIO_PLACEHOLDER`].
    /// Parts of any other type are skipped.
    pub fn from_item(item: &ConversationItem) -> Vec<Message> {
        let role = Role::from_upstream(item.role.as_deref().unwrap_or("system"));
        item.content
            .iter()
            .filter_map(|part| Self::from_part(role, part))
            .collect()
    }

    fn from_part(role: Role, part: &ContentPart) -> Option<Message> {
        match part.kind.as_str() {
            "text" | "input_text" => Some(Message::new(
                role,
                MessageKind::Text,
                part.text.clone().unwrap_or_default(),
            )),
            "audio" | "input_audio" => {
                Some(Message::new(role, MessageKind::Audio, AUDIO_PLACEHOLDER))
            }
            _ => None,
        }
    }
}

/// State of one bridged conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub namespace: String,
    pub created_at: DateTime<Utc>,
    pub tokens: TokenUsage,
    transcript: Vec<Message>,
}

impl Session {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            created_at: Utc::now(),
            tokens: TokenUsage::default(),
            transcript: Vec::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.transcript.push(message);
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn record_usage(&mut self, usage: &Usage) {
        self.tokens.absorb(usage);
    }

    /// Usage summary as of now.
    pub fn summary(&self, pricing: &Pricing) -> UsageSummary {
        let elapsed = Utc::now() - self.created_at;
        let duration_seconds = round6(elapsed.num_microseconds().unwrap_or(0) as f64 / 1e6);
        let cost_breakdown = pricing.breakdown(&self.tokens);
        UsageSummary {
            session_id: self.id,
            start_time: self.created_at,
            duration_seconds: duration_seconds.max(0.0),
            tokens: self.tokens,
            cost_usd: cost_breakdown.total,
            cost_breakdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::TokenDetails;
    use serde_json::json;

    fn item(role: &str, parts: &[(&str, Option<&str>)]) -> ConversationItem {
        ConversationItem {
            role: Some(role.to_string()),
            content: parts
                .iter()
                .map(|(kind, text)| ContentPart {
                    kind: kind.to_string(),
                    text: text.map(str::to_string),
                })
                .collect(),
        }
    }

    #[test]
    fn test_messages_from_item_replace_audio() {
        let item = item(
            "user",
            &[("input_audio", None), ("input_text", Some("hello")), ("image", None)],
        );
        let messages = Message::from_item(&item);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, MessageKind::Audio);
        assert_eq!(messages[0].content, AUDIO_PLACEHOLDER);
        assert_eq!(messages[1].kind, MessageKind::Text);
        assert_eq!(messages[1].content, "hello");
        assert!(messages.iter().all(|m| m.role == Role::User));
    }

    #[test]
    fn test_unknown_role_maps_to_system() {
        let messages = Message::from_item(&item("tool", &[("text", Some("x"))]));
        assert_eq!(messages[0].role, Role::System);
    }

    #[test]
    fn test_message_serialization_shape() {
        let message = Message::new(Role::Assistant, MessageKind::FunctionCall, "q")
            .with_metadata(json!({"call_id": "c1"}));
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["role"], "assistant");
        assert_eq!(value["type"], "function_call");
        assert_eq!(value["metadata"]["call_id"], "c1");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_message_kind_names() {
        let kinds = [
            MessageKind::Text,
            MessageKind::Audio,
            MessageKind::FunctionCall,
            MessageKind::FunctionResult,
        ];
        let names: Vec<_> = kinds
            .iter()
            .map(|kind| serde_json::to_value(kind).unwrap())
            .collect();
        assert_eq!(names, ["text", "audio", "function_call", "function_result"]);
    }

    #[test]
    fn test_transcript_is_append_only_in_order() {
        let mut session = Session::new("acme");
        session.push(Message::new(Role::User, MessageKind::Text, "one"));
        session.push(Message::new(Role::Assistant, MessageKind::Text, "two"));

        let contents: Vec<_> = session.transcript().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two"]);
    }

    #[test]
    fn test_summary_reflects_recorded_usage() {
        let mut session = Session::new("acme");
        session.record_usage(&Usage {
            input_tokens: 1_000_000,
            output_tokens: 0,
            input_token_details: Some(TokenDetails {
                text_tokens: Some(1_000_000),
                audio_tokens: None,
            }),
            output_token_details: None,
        });

        let summary = session.summary(&Pricing::default());
        assert_eq!(summary.session_id, session.id);
        assert_eq!(summary.tokens.text_input, 1_000_000);
        assert_eq!(summary.cost_usd, 4.0);
        assert!(summary.duration_seconds >= 0.0);
    }
}

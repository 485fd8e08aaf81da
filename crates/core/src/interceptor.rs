//! Knowledge-base tool calls.
//!
//! The upstream model is told about a single function, `search_knowledge_base`.
//! When it finishes emitting the arguments of a call, the interceptor runs the
//! search against the session's namespace and answers with a function result
//! followed by a resume instruction. Retrieval failures never reach the model;
//! it gets a fixed fallback text instead.

use crate::conversation::Conversation;
use crate::events::{OutboundEvent, UpstreamEvent};
use crate::metrics::Metrics;
use crate::retrieval::Retrieval;
use crate::session::{Message, MessageKind, Role};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

pub const SEARCH_FUNCTION: &str = "search_knowledge_base";
pub const SEARCH_DESCRIPTION: &str =
    "Search the knowledge base for information relevant to the user's question.";

pub const NO_RESULTS: &str = "No relevant information found.";
pub const SEARCH_UNAVAILABLE: &str = "Search temporarily unavailable.";
pub const UNKNOWN_FUNCTION: &str = "Function not available.";

/// Arguments of `search_knowledge_base`.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// The search query
    pub query: String,
}

/// JSON schema advertised as the parameters of the search tool.
pub fn tool_parameters() -> Value {
    let mut schema = serde_json::to_value(schema_for!(SearchArgs)).unwrap_or_else(|_| json!({}));
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
        object.remove("description");
    }
    schema
}

/// A completed function call awaiting its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

impl PendingToolCall {
    /// Extracts the call from an upstream event, if it is one.
    pub fn from_event(event: &UpstreamEvent) -> Option<Self> {
        match event {
            UpstreamEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => Some(Self {
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            _ => None,
        }
    }

    /// Arguments as JSON. An unparseable blob is kept as a string.
    pub fn arguments_json(&self) -> Value {
        serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| Value::String(self.arguments.clone()))
    }

    /// Parsed search arguments. Malformed argument blobs yield an empty query.
    pub fn search_args(&self) -> SearchArgs {
        serde_json::from_str(&self.arguments).unwrap_or_else(|e| {
            warn!(call_id = %self.call_id, error = %e, "Unparseable tool arguments");
            SearchArgs::default()
        })
    }
}

pub struct ToolCallInterceptor {
    retrieval: Arc<dyn Retrieval>,
    metrics: Arc<Metrics>,
}

impl ToolCallInterceptor {
    pub fn new(retrieval: Arc<dyn Retrieval>, metrics: Arc<Metrics>) -> Self {
        Self { retrieval, metrics }
    }

    /// Returns the events to send upstream for `event`, in order. Events that
    /// are not completed function calls produce nothing.
    #[instrument(name = "tool_call", skip_all)]
    pub async fn handle(
        &self,
        event: &UpstreamEvent,
        conversation: &mut Conversation,
    ) -> Vec<OutboundEvent> {
        let Some(call) = PendingToolCall::from_event(event) else {
            return Vec::new();
        };

        let output = if call.name == SEARCH_FUNCTION {
            self.search(&call, conversation.namespace()).await
        } else {
            warn!(function = %call.name, "Model called an unknown function");
            UNKNOWN_FUNCTION.to_string()
        };

        conversation
            .log(
                Message::new(Role::Function, MessageKind::FunctionCall, output.clone())
                    .with_metadata(json!({
                        "function_name": call.name,
                        "call_id": call.call_id,
                        "arguments": call.arguments_json(),
                    })),
            )
            .await;

        vec![
            OutboundEvent::FunctionResult {
                call_id: call.call_id,
                output,
            },
            OutboundEvent::ResumeResponse,
        ]
    }

    async fn search(&self, call: &PendingToolCall, namespace: &str) -> String {
        let args = call.search_args();
        info!(call_id = %call.call_id, query = %args.query, namespace, "Searching knowledge base");

        self.metrics.increment("rag_searches");
        let started = Instant::now();
        let result = self.retrieval.search(&args.query, namespace).await;
        self.metrics.record_latency("rag_search", started.elapsed());

        match result {
            Ok(Some(content)) if !content.trim().is_empty() => {
                debug!(call_id = %call.call_id, chars = content.len(), "Retrieval returned content");
                content
            }
            Ok(_) => NO_RESULTS.to_string(),
            Err(e) => {
                warn!(call_id = %call.call_id, error = %e, "Knowledge base search failed");
                self.metrics.record_error("rag_search_failed");
                SEARCH_UNAVAILABLE.to_string()
            }
        }
    }
}

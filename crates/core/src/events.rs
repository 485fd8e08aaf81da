//! Realtime event model.
//!
//! Upstream frames are decoded into a small closed set of variants the bridge
//! acts on; every other event type lands in `Passthrough` and is forwarded
//! untouched. Outbound events are encoded with the `async-openai` realtime
//! client event types.

use crate::usage::Usage;
use async_openai::types::realtime::{
    ClientEvent, ConversationItemCreateEvent, Item, ItemType, ResponseCreateEvent,
};
use serde::Deserialize;
use tracing::debug;

/// Events received from the upstream realtime endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum UpstreamEvent {
    /// A response finished; carries token usage.
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseBody,
    },
    /// An item was added to the upstream conversation.
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        item: ConversationItem,
    },
    /// The model finished streaming the arguments of a function call.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    /// Anything the bridge does not inspect.
    #[serde(other)]
    Passthrough,
}

impl UpstreamEvent {
    /// Decodes a text frame. Frames that are not valid JSON, or whose
    /// recognized type is missing required fields, decode as `Passthrough`.
    pub fn decode(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|e| {
            debug!(error = %e, "Upstream frame not decodable, passing through");
            UpstreamEvent::Passthrough
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseBody {
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConversationItem {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

/// One content part of a conversation item.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Events the bridge sends upstream on its own behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Delivers the output of a function call back to the model.
    FunctionResult { call_id: String, output: String },
    /// Tells the model to continue generating.
    ResumeResponse,
}

impl OutboundEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&ClientEvent::from(self.clone()))
    }
}

impl From<OutboundEvent> for ClientEvent {
    fn from(event: OutboundEvent) -> Self {
        match event {
            OutboundEvent::FunctionResult { call_id, output } => {
                let item = Item {
                    r#type: Some(ItemType::FunctionCallOutput),
                    call_id: Some(call_id),
                    output: Some(output),
                    id: None,
                    status: None,
                    role: None,
                    content: None,
                    name: None,
                    arguments: None,
                };
                ClientEvent::ConversationItemCreate(ConversationItemCreateEvent {
                    item,
                    event_id: None,
                    previous_item_id: None,
                })
            }
            OutboundEvent::ResumeResponse => ClientEvent::ResponseCreate(ResponseCreateEvent {
                response: None,
                event_id: None,
            }),
        }
    }
}

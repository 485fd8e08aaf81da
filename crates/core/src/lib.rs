//! Domain core of the knowledge-base voice bridge.
//!
//! Everything here is transport-agnostic: the realtime event model, the
//! resilience primitives, tool-call interception, session accounting and the
//! seams (`Retrieval`, `ConversationRecorder`) the service plugs its
//! implementations into.

pub mod conversation;
pub mod events;
pub mod interceptor;
pub mod metrics;
pub mod profile;
pub mod resilience;
pub mod retrieval;
pub mod session;
pub mod usage;

pub use conversation::{Conversation, ConversationRecorder, RecorderError};
pub use events::{OutboundEvent, UpstreamEvent};
pub use interceptor::ToolCallInterceptor;
pub use metrics::Metrics;
pub use profile::SessionProfile;
pub use retrieval::{Retrieval, RetrievalError};
pub use session::{Message, MessageKind, Role, Session};
pub use usage::{Pricing, TokenUsage, UsageSummary};

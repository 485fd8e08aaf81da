//! Messages exchanged with the browser client outside the relayed stream.

use serde::{Deserialize, Serialize};

/// First frame sent by the client. Selects the knowledge base to search.
#[derive(Deserialize, Debug, Default, PartialEq, Eq)]
pub struct InitMessage {
    #[serde(default)]
    pub kb_id: Option<String>,
}

impl InitMessage {
    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn from_slice(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    /// Trimmed `kb_id`, or `default` when it is absent or blank.
    pub fn namespace(&self, default: &str) -> String {
        self.kb_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(default)
            .to_string()
    }
}

/// Sent once before the server closes the connection on a failure.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_resolution() {
        let cases = [
            (r#"{"kb_id":"acme"}"#, "acme"),
            (r#"{"kb_id":"  acme  "}"#, "acme"),
            (r#"{"kb_id":""}"#, "default"),
            (r#"{"kb_id":"   "}"#, "default"),
            (r#"{"kb_id":null}"#, "default"),
            (r#"{}"#, "default"),
        ];
        for (text, expected) in cases {
            let init = InitMessage::from_text(text).unwrap();
            assert_eq!(init.namespace("default"), expected, "input: {text}");
        }
    }

    #[test]
    fn test_invalid_init_is_rejected() {
        assert!(InitMessage::from_text("hello").is_err());
        assert!(InitMessage::from_text(r#"{"kb_id": 42}"#).is_err());
    }

    #[test]
    fn test_error_notice_shape() {
        let notice = ErrorNotice {
            error: "Connection timeout".into(),
        };
        assert_eq!(
            serde_json::to_string(&notice).unwrap(),
            r#"{"error":"Connection timeout"}"#
        );
    }
}

//! Session configuration sent upstream right after connecting.

use crate::interceptor::{SEARCH_DESCRIPTION, SEARCH_FUNCTION, tool_parameters};
use async_openai::types::realtime::{
    AudioFormat, AudioTranscription, ClientEvent, RealtimeVoice, SessionResource,
    SessionUpdateEvent, ToolChoice, ToolDefinition, TurnDetection,
};

/// Voice activity detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadSettings {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            prefix_padding_ms: 300,
            silence_duration_ms: 1000,
        }
    }
}

/// Everything the bridge tells the upstream model about a session.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub instructions: String,
    pub voice: RealtimeVoice,
    pub transcription_model: String,
    pub vad: VadSettings,
}

impl SessionProfile {
    pub fn new(instructions: impl Into<String>, voice: RealtimeVoice) -> Self {
        Self {
            instructions: instructions.into(),
            voice,
            transcription_model: "whisper-1".to_string(),
            vad: VadSettings::default(),
        }
    }

    /// Parses a voice name such as `alloy` or `verse`.
    pub fn parse_voice(name: &str) -> Option<RealtimeVoice> {
        serde_json::from_value(serde_json::Value::String(name.trim().to_lowercase())).ok()
    }

    /// The `session.update` event, declaring the knowledge-base search tool.
    pub fn session_update(&self) -> ClientEvent {
        let session = SessionResource {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(self.instructions.clone()),
            voice: Some(self.voice.clone()),
            input_audio_format: Some(AudioFormat::PCM16),
            output_audio_format: Some(AudioFormat::PCM16),
            input_audio_transcription: Some(AudioTranscription {
                model: Some(self.transcription_model.clone()),
                ..Default::default()
            }),
            turn_detection: Some(TurnDetection::ServerVAD {
                threshold: self.vad.threshold,
                prefix_padding_ms: self.vad.prefix_padding_ms,
                silence_duration_ms: self.vad.silence_duration_ms,
                interrupt_response: Some(true),
                create_response: Some(true),
            }),
            tools: Some(vec![ToolDefinition::Function {
                name: SEARCH_FUNCTION.to_string(),
                description: SEARCH_DESCRIPTION.to_string(),
                parameters: tool_parameters(),
            }]),
            tool_choice: Some(ToolChoice::Auto),
            ..Default::default()
        };
        ClientEvent::SessionUpdate(SessionUpdateEvent {
            session,
            event_id: None,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.session_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_session_update_declares_search_tool() {
        let profile = SessionProfile::new("Be helpful.", RealtimeVoice::Alloy);
        let value: Value = serde_json::from_str(&profile.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["instructions"], "Be helpful.");
        assert_eq!(value["session"]["voice"], "alloy");
        assert_eq!(value["session"]["tool_choice"], "auto");
        assert_eq!(value["session"]["tools"][0]["name"], SEARCH_FUNCTION);
        assert_eq!(value["session"]["tools"][0]["type"], "function");
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(value["session"]["turn_detection"]["silence_duration_ms"], 1000);
    }

    #[test]
    fn test_parse_voice() {
        assert!(matches!(
            SessionProfile::parse_voice(" Verse "),
            Some(RealtimeVoice::Verse)
        ));
        assert!(SessionProfile::parse_voice("nobody").is_none());
    }
}

//! Live API wire messages
//!
//! Outbound: one `setup` frame, then `realtime_input` audio envelopes.
//! Inbound: JSON objects that may carry model audio, a turn-complete flag,
//! a setup acknowledgment or an error.

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// MIME type of outbound microphone audio
pub const AUDIO_MIME_TYPE: &str = "audio/pcm";

/// First frame on the connection: selects the model
#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage<'a> {
    setup: SetupBody<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct SetupBody<'a> {
    model: &'a str,
}

impl<'a> SetupMessage<'a> {
    /// Setup frame for `model`
    #[must_use]
    pub const fn new(model: &'a str) -> Self {
        Self {
            setup: SetupBody { model },
        }
    }

    /// Serialize to JSON text
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One base64 audio chunk
#[derive(Debug, Clone, Serialize)]
pub struct MediaChunk {
    data: String,
    mime_type: &'static str,
}

/// Microphone audio envelope
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

impl RealtimeInputMessage {
    /// Wrap one PCM frame
    #[must_use]
    pub fn from_pcm(pcm: &[u8]) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    data: BASE64_STANDARD.encode(pcm),
                    mime_type: AUDIO_MIME_TYPE,
                }],
            },
        }
    }

    /// Serialize to JSON text
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A decoded inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A chunk of model audio (raw PCM, already base64-decoded)
    AudioDelta(Bytes),
    /// The model finished its turn
    TurnComplete,
    /// The setup frame was accepted
    SetupAck,
    /// The server reported an error
    Error(String),
}

impl ServerEvent {
    /// Short name for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AudioDelta(_) => "audio_delta",
            Self::TurnComplete => "turn_complete",
            Self::SetupAck => "setup_ack",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    error: Option<ServerError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

/// Decode one inbound JSON message into zero or more events
///
/// A message carrying both audio and `turnComplete` yields the audio first.
/// Messages with nothing recognizable yield no events.
///
/// # Errors
///
/// Returns error if the text is not JSON of the expected shape or the
/// audio payload is not valid base64
pub fn parse_server_message(text: &str) -> Result<Vec<ServerEvent>> {
    let message: ServerMessage = serde_json::from_str(text)?;
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(ServerEvent::SetupAck);
    }

    if let Some(error) = message.error {
        let reason = match (error.code, error.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (None, Some(message)) => message,
            (Some(code), None) => format!("error code {code}"),
            (None, None) => "unspecified server error".to_string(),
        };
        events.push(ServerEvent::Error(reason));
    }

    if let Some(content) = message.server_content {
        let audio = content
            .model_turn
            .and_then(|turn| turn.parts.into_iter().next())
            .and_then(|part| part.inline_data);
        if let Some(inline) = audio {
            let pcm = BASE64_STANDARD
                .decode(inline.data.as_bytes())
                .map_err(|e| Error::Protocol(format!("invalid audio payload: {e}")))?;
            events.push(ServerEvent::AudioDelta(Bytes::from(pcm)));
        }
        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_shape() {
        let json = SetupMessage::new("models/gemini-2.0-flash-exp").to_json().unwrap();
        assert_eq!(json, r#"{"setup":{"model":"models/gemini-2.0-flash-exp"}}"#);
    }

    #[test]
    fn test_realtime_input_shape() {
        let json = RealtimeInputMessage::from_pcm(&[0x01, 0x02, 0x03]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let chunk = &value["realtime_input"]["media_chunks"][0];

        assert_eq!(chunk["data"], "AQID");
        assert_eq!(chunk["mime_type"], "audio/pcm");
    }

    #[test]
    fn test_parse_setup_complete() {
        let events = parse_server_message(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(events, vec![ServerEvent::SetupAck]);
    }

    #[test]
    fn test_parse_audio_then_turn_complete() {
        let text = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAEC"}}]},"turnComplete":true}}"#;
        let events = parse_server_message(text).unwrap();

        assert_eq!(
            events,
            vec![
                ServerEvent::AudioDelta(Bytes::from_static(&[0x00, 0x01, 0x02])),
                ServerEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_parse_turn_complete_only() {
        let events = parse_server_message(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        assert_eq!(events, vec![ServerEvent::TurnComplete]);
    }

    #[test]
    fn test_parse_text_part_yields_nothing() {
        let text = r#"{"serverContent":{"modelTurn":{"parts":[{"text":"hello"}]}}}"#;
        assert!(parse_server_message(text).unwrap().is_empty());
    }

    #[test]
    fn test_parse_error() {
        let events =
            parse_server_message(r#"{"error":{"code":400,"message":"bad model"}}"#).unwrap();
        assert_eq!(events, vec![ServerEvent::Error("400: bad model".to_string())]);
    }

    #[test]
    fn test_parse_rejects_bad_payloads() {
        assert!(parse_server_message("not json").is_err());
        let bad_audio = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"!!"}}]}}}"#;
        assert!(matches!(
            parse_server_message(bad_audio),
            Err(Error::Protocol(_))
        ));
    }
}

//! Speech-to-text (STT) processing

use std::str::FromStr;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::recognizer::Transcriber;
use crate::{Error, Result};

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SttProvider {
    /// `OpenAI` Whisper
    #[default]
    Whisper,
    /// Deepgram
    Deepgram,
}

impl SttProvider {
    /// Default model for this provider
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Whisper => "whisper-1",
            Self::Deepgram => "nova-2",
        }
    }

    /// Environment variable holding this provider's API key
    #[must_use]
    pub const fn api_key_env(self) -> &'static str {
        match self {
            Self::Whisper => "OPENAI_API_KEY",
            Self::Deepgram => "DEEPGRAM_API_KEY",
        }
    }
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(provider: SttProvider, api_key: Option<SecretString>, model: String) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "{} required for {provider:?} transcription",
                    provider.api_key_env()
                ))
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider,
        })
    }

    /// Transcribe audio to text
    ///
    /// # Arguments
    ///
    /// * `audio` - WAV audio bytes
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe_wav(&self, audio: Vec<u8>) -> Result<String> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio).await,
        }
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;
        let transcript = result
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default();

        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        self.transcribe_wav(wav).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("whisper".parse::<SttProvider>().unwrap(), SttProvider::Whisper);
        assert_eq!(" Deepgram ".parse::<SttProvider>().unwrap(), SttProvider::Deepgram);
        assert!("google".parse::<SttProvider>().is_err());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = SpeechToText::new(SttProvider::Whisper, None, "whisper-1".to_string())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(msg) if msg.contains("OPENAI_API_KEY")));

        let empty = Some(SecretString::from(String::new()));
        assert!(SpeechToText::new(SttProvider::Deepgram, empty, "nova-2".to_string()).is_err());
    }
}

//! Text-to-speech (TTS) processing

use std::str::FromStr;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::playback::decode_mp3;
use super::speech::SpeechSynthesizer;
use crate::{Error, Result};

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TtsProvider {
    /// `OpenAI` speech
    #[default]
    OpenAI,
    /// `ElevenLabs`
    ElevenLabs,
}

impl TtsProvider {
    /// Default model for this provider
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAI => "tts-1",
            Self::ElevenLabs => "eleven_monolingual_v1",
        }
    }

    /// Default voice for this provider
    #[must_use]
    pub const fn default_voice(self) -> &'static str {
        match self {
            Self::OpenAI => "alloy",
            Self::ElevenLabs => "21m00Tcm4TlvDq8ikWAM",
        }
    }

    /// Environment variable holding this provider's API key
    #[must_use]
    pub const fn api_key_env(self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::ElevenLabs => "ELEVENLABS_API_KEY",
        }
    }
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    speed: f32,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance
    ///
    /// `speed` only applies to `OpenAI`.
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        provider: TtsProvider,
        api_key: Option<SecretString>,
        model: String,
        voice: String,
        speed: f32,
    ) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "{} required for {provider:?} TTS",
                    provider.api_key_env()
                ))
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
            provider,
        })
    }

    /// Synthesize text to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize_mp3(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(text, provider = ?self.provider, "synthesizing speech");
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", self.voice);

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>> {
        let mp3 = self.synthesize_mp3(text).await?;
        decode_mp3(&mp3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        assert_eq!(TtsProvider::default(), TtsProvider::OpenAI);
        assert_eq!(TtsProvider::OpenAI.default_model(), "tts-1");
        assert_eq!("ElevenLabs".parse::<TtsProvider>().unwrap(), TtsProvider::ElevenLabs);
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let result = TextToSpeech::new(
            TtsProvider::ElevenLabs,
            None,
            "eleven_monolingual_v1".to_string(),
            "voice".to_string(),
            1.0,
        );
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("ELEVENLABS_API_KEY")));
    }
}

//! Configuration management
//!
//! Precedence: CLI flag > environment > TOML file > default. CLI overrides
//! are applied by the binary after [`Config::load`].

pub mod file;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::live::DEFAULT_LIVE_ENDPOINT;
use crate::voice::{PhraseSet, SttProvider, TtsProvider};
use crate::{Error, Result};
pub use file::{HivoiceConfigFile, config_file_path, load_config_file, load_config_file_from};

/// Default live model
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Default text model for the turn-based assistant
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash";

/// Default wake phrases
pub const DEFAULT_WAKE_PHRASES: &[&str] = &["hi voice", "hi! voice", "hey assistant"];

/// Default exit phrases
pub const DEFAULT_EXIT_PHRASES: &[&str] = &["bye", "exit", "quit", "close"];

/// Default stop phrases
pub const DEFAULT_STOP_PHRASES: &[&str] = &["stop"];

/// Default acknowledgment after an interruption
pub const DEFAULT_ACKNOWLEDGMENT: &str = "Okay, stopping.";

const DEFAULT_LISTEN_TIMEOUT_SECS: f64 = 1.0;
const DEFAULT_PHRASE_TIME_LIMIT_SECS: f64 = 3.0;
const DEFAULT_SETUP_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_TTS_SPEED: f32 = 1.0;

/// Hivoice configuration
#[derive(Debug)]
pub struct Config {
    /// Live model connection
    pub live: LiveConfig,
    /// Trigger phrases
    pub phrases: PhrasesConfig,
    /// Recognition timing
    pub listen: ListenConfig,
    /// STT/TTS settings
    pub voice: VoiceConfig,
    /// API keys
    pub api_keys: ApiKeys,
}

/// Live model configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Websocket endpoint
    pub url: String,
    /// Live model id
    pub model: String,
    /// Text model for the turn-based assistant
    pub text_model: String,
    /// Seconds to wait for the setup acknowledgment
    pub setup_timeout_secs: f64,
    /// Optional bound on queued model audio frames
    pub playback_queue_limit: Option<usize>,
}

impl LiveConfig {
    /// Setup acknowledgment timeout
    #[must_use]
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.setup_timeout_secs)
    }
}

/// Trigger phrases, normalized
#[derive(Debug, Clone)]
pub struct PhrasesConfig {
    pub wake: Vec<String>,
    pub exit: Vec<String>,
    pub stop: Vec<String>,
    /// Spoken after a stop phrase interrupts a reply
    pub acknowledgment: String,
}

/// Recognition timing
#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Seconds to wait for speech to start
    pub timeout_secs: f64,
    /// Longest utterance in seconds
    pub phrase_time_limit_secs: f64,
}

impl ListenConfig {
    /// Per-listen wait for speech onset
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    /// Longest single utterance
    #[must_use]
    pub fn phrase_time_limit(&self) -> Duration {
        Duration::from_secs_f64(self.phrase_time_limit_secs)
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub stt_provider: SttProvider,
    pub stt_model: String,
    pub tts_provider: TtsProvider,
    pub tts_model: String,
    pub tts_voice: String,
    pub tts_speed: f32,
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    pub gemini: Option<SecretString>,
    pub openai: Option<SecretString>,
    pub deepgram: Option<SecretString>,
    pub elevenlabs: Option<SecretString>,
}

impl ApiKeys {
    /// The Gemini key, required for live and turn modes
    ///
    /// # Errors
    ///
    /// Returns error if no key is configured
    pub fn gemini(&self) -> Result<SecretString> {
        copy_secret(self.gemini.as_ref())
            .ok_or_else(|| Error::Config("GEMINI_API_KEY is not set".to_string()))
    }

    /// Key for the configured STT provider
    #[must_use]
    pub fn stt(&self, provider: SttProvider) -> Option<SecretString> {
        match provider {
            SttProvider::Whisper => copy_secret(self.openai.as_ref()),
            SttProvider::Deepgram => copy_secret(self.deepgram.as_ref()),
        }
    }

    /// Key for the configured TTS provider
    #[must_use]
    pub fn tts(&self, provider: TtsProvider) -> Option<SecretString> {
        match provider {
            TtsProvider::OpenAI => copy_secret(self.openai.as_ref()),
            TtsProvider::ElevenLabs => copy_secret(self.elevenlabs.as_ref()),
        }
    }
}

fn copy_secret(secret: Option<&SecretString>) -> Option<SecretString> {
    secret
        .map(ExposeSecret::expose_secret)
        .filter(|s| !s.is_empty())
        .map(|s| SecretString::from(s.to_owned()))
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is unknown, a phrase list is empty or
    /// a timeout is not positive
    pub fn from_sources<F>(fc: HivoiceConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_f64 = |key: &str| env(key).and_then(|v| v.trim().parse::<f64>().ok());
        let env_list = |key: &str| env(key).map(|v| split_list(&v));
        let secret = |key: &str, file: Option<String>| {
            env(key).or(file).filter(|k| !k.is_empty()).map(SecretString::from)
        };

        let live = LiveConfig {
            url: env("HIVOICE_LIVE_URL")
                .or(fc.live.url)
                .unwrap_or_else(|| DEFAULT_LIVE_ENDPOINT.to_string()),
            model: env("HIVOICE_MODEL")
                .or(fc.live.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            text_model: env("HIVOICE_TEXT_MODEL")
                .or(fc.live.text_model)
                .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            setup_timeout_secs: env_f64("HIVOICE_SETUP_TIMEOUT")
                .or(fc.live.setup_timeout_secs)
                .unwrap_or(DEFAULT_SETUP_TIMEOUT_SECS),
            playback_queue_limit: env("HIVOICE_PLAYBACK_QUEUE_LIMIT")
                .and_then(|v| v.trim().parse().ok())
                .or(fc.live.playback_queue_limit),
        };

        let phrases = PhrasesConfig {
            wake: env_list("HIVOICE_WAKE_PHRASES")
                .or(fc.phrases.wake)
                .unwrap_or_else(|| to_strings(DEFAULT_WAKE_PHRASES)),
            exit: env_list("HIVOICE_EXIT_PHRASES")
                .or(fc.phrases.exit)
                .unwrap_or_else(|| to_strings(DEFAULT_EXIT_PHRASES)),
            stop: env_list("HIVOICE_STOP_PHRASES")
                .or(fc.phrases.stop)
                .unwrap_or_else(|| to_strings(DEFAULT_STOP_PHRASES)),
            acknowledgment: env("HIVOICE_ACKNOWLEDGMENT")
                .or(fc.phrases.acknowledgment)
                .unwrap_or_else(|| DEFAULT_ACKNOWLEDGMENT.to_string()),
        };

        let listen = ListenConfig {
            timeout_secs: env_f64("HIVOICE_LISTEN_TIMEOUT")
                .or(fc.listen.timeout_secs)
                .unwrap_or(DEFAULT_LISTEN_TIMEOUT_SECS),
            phrase_time_limit_secs: env_f64("HIVOICE_PHRASE_TIME_LIMIT")
                .or(fc.listen.phrase_time_limit_secs)
                .unwrap_or(DEFAULT_PHRASE_TIME_LIMIT_SECS),
        };

        let stt_provider: SttProvider = env("HIVOICE_STT_PROVIDER")
            .or(fc.voice.stt_provider)
            .map(|p| p.parse())
            .transpose()?
            .unwrap_or_default();
        let tts_provider: TtsProvider = env("HIVOICE_TTS_PROVIDER")
            .or(fc.voice.tts_provider)
            .map(|p| p.parse())
            .transpose()?
            .unwrap_or_default();

        #[allow(clippy::cast_possible_truncation)]
        let voice = VoiceConfig {
            stt_provider,
            stt_model: env("HIVOICE_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| stt_provider.default_model().to_string()),
            tts_provider,
            tts_model: env("HIVOICE_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| tts_provider.default_model().to_string()),
            tts_voice: env("HIVOICE_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| tts_provider.default_voice().to_string()),
            tts_speed: env_f64("HIVOICE_TTS_SPEED")
                .or(fc.voice.tts_speed)
                .map_or(DEFAULT_TTS_SPEED, |s| s as f32),
        };

        let api_keys = ApiKeys {
            gemini: secret("GEMINI_API_KEY", fc.api_keys.gemini),
            openai: secret("OPENAI_API_KEY", fc.api_keys.openai),
            deepgram: secret("DEEPGRAM_API_KEY", fc.api_keys.deepgram),
            elevenlabs: secret("ELEVENLABS_API_KEY", fc.api_keys.elevenlabs),
        };

        let mut config = Self {
            live,
            phrases,
            listen,
            voice,
            api_keys,
        };
        config.validate()?;
        Ok(config)
    }

    /// Normalize phrase lists and check timeouts
    ///
    /// # Errors
    ///
    /// Returns error if any phrase list is empty after normalization or a
    /// timeout is not a positive number of seconds
    pub fn validate(&mut self) -> Result<()> {
        for (name, list) in [
            ("wake", &mut self.phrases.wake),
            ("exit", &mut self.phrases.exit),
            ("stop", &mut self.phrases.stop),
        ] {
            let set = PhraseSet::new(list.iter())
                .map_err(|_| Error::Config(format!("{name} phrase list must not be empty")))?;
            *list = set.phrases().to_vec();
        }

        for (name, secs) in [
            ("listen timeout", self.listen.timeout_secs),
            ("phrase time limit", self.listen.phrase_time_limit_secs),
            ("setup timeout", self.live.setup_timeout_secs),
        ] {
            if !(secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok()) {
                return Err(Error::Config(format!(
                    "{name} must be a positive number of seconds, got {secs}"
                )));
            }
        }

        if self.live.playback_queue_limit == Some(0) {
            return Err(Error::Config(
                "playback queue limit must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("bye, see ya ,,quit"), vec!["bye", "see ya", "quit"]);
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn test_copy_secret_skips_empty() {
        assert!(copy_secret(Some(&SecretString::from(String::new()))).is_none());
        let copied = copy_secret(Some(&SecretString::from("abc".to_string()))).unwrap();
        assert_eq!(copied.expose_secret(), "abc");
    }
}

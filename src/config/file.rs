//! TOML configuration file loading
//!
//! Supports `~/.config/hivoice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct HivoiceConfigFile {
    /// Live model connection
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Wake, exit and stop phrases
    #[serde(default)]
    pub phrases: PhrasesFileConfig,

    /// Speech recognition timing
    #[serde(default)]
    pub listen: ListenFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Live model configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// Websocket endpoint
    pub url: Option<String>,

    /// Live model identifier (e.g. "models/gemini-2.0-flash-exp")
    pub model: Option<String>,

    /// Text model for the turn-based assistant
    pub text_model: Option<String>,

    /// Seconds to wait for the setup acknowledgment
    pub setup_timeout_secs: Option<f64>,

    /// Maximum queued model audio frames
    pub playback_queue_limit: Option<usize>,
}

/// Trigger phrases
#[derive(Debug, Default, Deserialize)]
pub struct PhrasesFileConfig {
    pub wake: Option<Vec<String>>,
    pub exit: Option<Vec<String>>,
    pub stop: Option<Vec<String>>,

    /// Spoken after a stop phrase interrupts a reply
    pub acknowledgment: Option<String>,
}

/// Recognition timing
#[derive(Debug, Default, Deserialize)]
pub struct ListenFileConfig {
    /// Seconds to wait for speech to start
    pub timeout_secs: Option<f64>,

    /// Longest utterance in seconds
    pub phrase_time_limit_secs: Option<f64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT provider ("whisper" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS provider ("openai" or "elevenlabs")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `HivoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> HivoiceConfigFile {
    config_file_path().map_or_else(HivoiceConfigFile::default, |path| {
        load_config_file_from(&path)
    })
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> HivoiceConfigFile {
    if !path.exists() {
        return HivoiceConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                HivoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            HivoiceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/hivoice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("hivoice").join("config.toml"))
}

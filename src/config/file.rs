//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct BeaconVoiceConfigFile {
    /// Reasoning (LLM) configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Synthesis configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Conversation timing overrides
    #[serde(default)]
    pub timing: TimingFileConfig,

    /// Recognition configuration
    #[serde(default)]
    pub recognition: RecognitionFileConfig,

    /// Synthesis model asset precache
    #[serde(default)]
    pub assets: AssetsFileConfig,

    /// Audio output configuration
    #[serde(default)]
    pub playback: PlaybackFileConfig,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gemini-2.0-flash")
    pub model: Option<String>,

    /// API key for the generative API
    pub api_key: Option<String>,

    /// Base URL override for the generative API
    pub base_url: Option<String>,

    /// System instructions sent with every request
    pub system_instructions: Option<String>,
}

/// Synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Preferred voice identifier (e.g. "alloy")
    pub voice_id: Option<String>,

    /// TTS model for the worker engine (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// Base URL of the OpenAI-compatible speech endpoint
    pub tts_base_url: Option<String>,

    /// API key for the worker engine
    pub tts_api_key: Option<String>,

    /// Platform speech command (e.g. "espeak-ng")
    pub fallback_command: Option<String>,

    /// Skip the worker engine entirely
    pub fallback_only: Option<bool>,
}

/// Timing overrides, all in milliseconds
#[derive(Debug, Default, Deserialize)]
pub struct TimingFileConfig {
    pub debounce_ms: Option<u64>,
    pub pre_speak_delay_ms: Option<u64>,
    pub grace_ms: Option<u64>,
    pub onset_timeout_ms: Option<u64>,
    pub init_timeout_ms: Option<u64>,
    pub reasoning_timeout_ms: Option<u64>,
    pub voices_wait_ms: Option<u64>,
    pub max_auto_speak_attempts: Option<u32>,
}

/// Recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognitionFileConfig {
    /// BCP-47 language tag
    pub language: Option<String>,

    /// Restart the stream when it ends without a user stop
    pub auto_restart: Option<bool>,

    /// Delay before an automatic restart
    pub restart_delay_ms: Option<u64>,
}

/// Asset precache configuration
#[derive(Debug, Default, Deserialize)]
pub struct AssetsFileConfig {
    /// Model asset URLs to warm
    pub urls: Option<Vec<String>>,

    /// Cache directory override
    pub cache_dir: Option<String>,
}

/// Audio output configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    /// Directory for WAV output when no audio device is used
    pub output_dir: Option<String>,

    /// Play through the default output device
    pub device: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `BeaconVoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> BeaconVoiceConfigFile {
    config_file_path().map_or_else(BeaconVoiceConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path, falling back to defaults
pub fn load_from(path: &Path) -> BeaconVoiceConfigFile {
    if !path.exists() {
        return BeaconVoiceConfigFile::default();
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
                BeaconVoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            BeaconVoiceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/beacon-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-voice")
            .join("config.toml")
    })
}

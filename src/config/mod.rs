//! Configuration management for beacon-voice
//!
//! Values resolve as env > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

pub use file::BeaconVoiceConfigFile;

/// Default Gemini model for response generation
pub const DEFAULT_LLM_MODEL: &str = "gemini-2.0-flash";

/// Default system instructions for the assistant
pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str = "You are a helpful voice assistant. \
Answer in one or two short spoken sentences without markdown.";

/// beacon-voice configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Reasoning client configuration
    pub llm: LlmConfig,

    /// Synthesis configuration
    pub voice: VoiceConfig,

    /// Conversation timing
    pub timing: TimingConfig,

    /// Recognition configuration
    pub recognition: RecognitionConfig,

    /// Asset precache configuration
    pub assets: AssetsConfig,

    /// Audio output configuration
    pub playback: PlaybackConfig,
}

/// Reasoning client configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model identifier
    pub model: String,

    /// API key (from `GEMINI_API_KEY` env)
    pub api_key: Option<SecretString>,

    /// Base URL of the generative API
    pub base_url: String,

    /// System instructions sent with each request
    pub system_instructions: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            system_instructions: DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
        }
    }
}

/// Synthesis configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Preferred voice identifier
    pub voice_id: Option<String>,

    /// TTS model for the worker engine
    pub tts_model: String,

    /// Base URL of the OpenAI-compatible speech endpoint
    pub tts_base_url: String,

    /// API key for the worker engine (from `OPENAI_API_KEY` env)
    pub tts_api_key: Option<SecretString>,

    /// Platform speech command used in fallback mode
    pub fallback_command: Option<String>,

    /// Skip the worker engine and speak on the main task only
    pub fallback_only: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: None,
            tts_model: "tts-1".to_string(),
            tts_base_url: "https://api.openai.com/v1".to_string(),
            tts_api_key: None,
            fallback_command: None,
            fallback_only: false,
        }
    }
}

/// Conversation timing
///
/// These bound each phase of a turn. One coherent set is used everywhere.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Quiet period after the last final segment before generating
    pub debounce: Duration,

    /// Settle delay between a response arriving and speaking it
    pub pre_speak_delay: Duration,

    /// Delay between speech completing and the turn being cleared
    pub grace: Duration,

    /// How long fallback speech may take to audibly start
    pub onset_timeout: Duration,

    /// Wall-clock bound on all worker initialization attempts
    pub init_timeout: Duration,

    /// Bound on a single reasoning request
    pub reasoning_timeout: Duration,

    /// How long to wait for an asynchronously populated voice list
    pub voices_wait: Duration,

    /// Auto-speak attempts per turn before the circuit breaker trips
    pub max_auto_speak_attempts: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2000),
            pre_speak_delay: Duration::from_millis(300),
            grace: Duration::from_millis(500),
            onset_timeout: Duration::from_millis(3000),
            init_timeout: Duration::from_secs(10),
            reasoning_timeout: Duration::from_secs(30),
            voices_wait: Duration::from_secs(1),
            max_auto_speak_attempts: 3,
        }
    }
}

/// Recognition configuration
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// BCP-47 language tag, fixed when the stream starts
    pub language: String,

    /// Deliver interim (unfinalized) results
    pub interim_results: bool,

    /// Restart the stream when it ends without a user stop
    pub auto_restart: bool,

    /// Delay before an automatic restart
    pub restart_delay: Duration,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            interim_results: true,
            auto_restart: true,
            restart_delay: Duration::from_millis(250),
        }
    }
}

/// Asset precache configuration
#[derive(Debug, Clone)]
pub struct AssetsConfig {
    /// Model asset URLs to warm at startup
    pub urls: Vec<String>,

    /// Cache directory
    pub cache_dir: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            cache_dir: default_cache_dir(),
        }
    }
}

/// Audio output configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Directory for WAV output
    pub output_dir: PathBuf,

    /// Play through the default output device (requires `device-audio`)
    pub device: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            device: cfg!(feature = "device-audio"),
        }
    }
}

/// Default model asset cache: `~/.cache/omni/beacon-voice/assets/`
fn default_cache_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".cache/omni/beacon-voice/assets"),
        |d| d.cache_dir().join("omni").join("beacon-voice").join("assets"),
    )
}

/// Default WAV output directory: `~/.local/share/omni/beacon-voice/speech/`
fn default_output_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/omni/beacon-voice/speech"),
        |d| d.data_dir().join("omni").join("beacon-voice").join("speech"),
    )
}

fn millis(value: Option<u64>, default: Duration) -> Duration {
    value.map_or(default, Duration::from_millis)
}

impl Config {
    /// Load configuration from the standard file location and environment
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();
        Self::from_file(fc).with_env()
    }

    /// Load configuration from an explicit file path and environment
    #[must_use]
    pub fn load_from(path: &std::path::Path) -> Self {
        let fc = file::load_from(path);
        Self::from_file(fc).with_env()
    }

    /// Merge a parsed config file over defaults (no environment lookups)
    #[must_use]
    pub fn from_file(fc: BeaconVoiceConfigFile) -> Self {
        let defaults = Self::default();
        let t = fc.timing;

        let timing = TimingConfig {
            debounce: millis(t.debounce_ms, defaults.timing.debounce),
            pre_speak_delay: millis(t.pre_speak_delay_ms, defaults.timing.pre_speak_delay),
            grace: millis(t.grace_ms, defaults.timing.grace),
            onset_timeout: millis(t.onset_timeout_ms, defaults.timing.onset_timeout),
            init_timeout: millis(t.init_timeout_ms, defaults.timing.init_timeout),
            reasoning_timeout: millis(t.reasoning_timeout_ms, defaults.timing.reasoning_timeout),
            voices_wait: millis(t.voices_wait_ms, defaults.timing.voices_wait),
            max_auto_speak_attempts: t
                .max_auto_speak_attempts
                .unwrap_or(defaults.timing.max_auto_speak_attempts)
                .max(1),
        };

        let llm = LlmConfig {
            model: fc.llm.model.unwrap_or(defaults.llm.model),
            api_key: fc.llm.api_key.map(SecretString::from),
            base_url: fc.llm.base_url.unwrap_or(defaults.llm.base_url),
            system_instructions: fc
                .llm
                .system_instructions
                .unwrap_or(defaults.llm.system_instructions),
        };

        let voice = VoiceConfig {
            voice_id: fc.voice.voice_id,
            tts_model: fc.voice.tts_model.unwrap_or(defaults.voice.tts_model),
            tts_base_url: fc.voice.tts_base_url.unwrap_or(defaults.voice.tts_base_url),
            tts_api_key: fc.voice.tts_api_key.map(SecretString::from),
            fallback_command: fc.voice.fallback_command,
            fallback_only: fc.voice.fallback_only.unwrap_or(false),
        };

        let recognition = RecognitionConfig {
            language: fc
                .recognition
                .language
                .unwrap_or(defaults.recognition.language),
            interim_results: defaults.recognition.interim_results,
            auto_restart: fc
                .recognition
                .auto_restart
                .unwrap_or(defaults.recognition.auto_restart),
            restart_delay: millis(
                fc.recognition.restart_delay_ms,
                defaults.recognition.restart_delay,
            ),
        };

        let assets = AssetsConfig {
            urls: fc.assets.urls.unwrap_or_default(),
            cache_dir: fc
                .assets
                .cache_dir
                .map_or(defaults.assets.cache_dir, PathBuf::from),
        };

        let playback = PlaybackConfig {
            output_dir: fc
                .playback
                .output_dir
                .map_or(defaults.playback.output_dir, PathBuf::from),
            device: fc.playback.device.unwrap_or(defaults.playback.device),
        };

        Self {
            llm,
            voice,
            timing,
            recognition,
            assets,
            playback,
        }
    }

    /// Apply environment overrides on top of the current values
    #[must_use]
    pub fn with_env(mut self) -> Self {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.llm.api_key = Some(SecretString::from(key));
        }
        if let Ok(model) = std::env::var("BEACON_VOICE_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.voice.tts_api_key = Some(SecretString::from(key));
        }
        if let Ok(voice) = std::env::var("BEACON_VOICE_VOICE") {
            self.voice.voice_id = Some(voice);
        }
        if let Ok(language) = std::env::var("BEACON_VOICE_LANGUAGE") {
            self.recognition.language = language;
        }
        if let Some(ms) = std::env::var("BEACON_VOICE_DEBOUNCE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.timing.debounce = Duration::from_millis(ms);
        }
        if let Ok(dir) = std::env::var("BEACON_VOICE_OUTPUT_DIR") {
            self.playback.output_dir = PathBuf::from(dir);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn defaults_are_coherent() {
        let config = Config::default();
        assert_eq!(config.timing.debounce, Duration::from_millis(2000));
        assert_eq!(config.timing.pre_speak_delay, Duration::from_millis(300));
        assert_eq!(config.timing.onset_timeout, Duration::from_millis(3000));
        assert_eq!(config.timing.max_auto_speak_attempts, 3);
        assert_eq!(config.recognition.language, "en-US");
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let fc: BeaconVoiceConfigFile = toml::from_str(
            r#"
            [llm]
            api_key = "g-key"

            [voice]
            voice_id = "nova"
            fallback_only = true

            [timing]
            debounce_ms = 800
            max_auto_speak_attempts = 5

            [recognition]
            language = "de-DE"
            auto_restart = false
            "#,
        )
        .unwrap();

        let config = Config::from_file(fc);
        assert_eq!(
            config.llm.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("g-key".to_string())
        );
        assert_eq!(config.voice.voice_id.as_deref(), Some("nova"));
        assert!(config.voice.fallback_only);
        assert_eq!(config.timing.debounce, Duration::from_millis(800));
        assert_eq!(config.timing.max_auto_speak_attempts, 5);
        assert_eq!(config.timing.grace, Duration::from_millis(500));
        assert_eq!(config.recognition.language, "de-DE");
        assert!(!config.recognition.auto_restart);
    }

    #[test]
    fn zero_attempt_limit_is_clamped() {
        let fc: BeaconVoiceConfigFile =
            toml::from_str("[timing]\nmax_auto_speak_attempts = 0\n").unwrap();
        assert_eq!(Config::from_file(fc).timing.max_auto_speak_attempts, 1);
    }

    #[test]
    fn api_keys_are_redacted_in_debug() {
        let config = Config {
            llm: LlmConfig {
                api_key: Some(SecretString::from("super-secret".to_string())),
                ..LlmConfig::default()
            },
            ..Config::default()
        };
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}

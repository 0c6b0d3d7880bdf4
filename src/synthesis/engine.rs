//! HTTP synthesis engine for the worker
//!
//! Talks to an OpenAI-compatible `/audio/speech` endpoint and requests raw
//! PCM so the result can be played without a decoder.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::protocol::{AudioBuffer, ProgressInfo, VoiceInfo};
use super::worker::{ProgressSink, SynthesisEngine};
use crate::{Error, Result};

/// Sample rate of OpenAI `pcm` responses
pub const PCM_SAMPLE_RATE: u32 = 24_000;

/// Voices offered by OpenAI-compatible speech endpoints
const VOICES: &[&str] = &[
    "alloy", "ash", "coral", "echo", "fable", "nova", "onyx", "sage", "shimmer",
];

/// Default voice when none is configured
const DEFAULT_VOICE: &str = "alloy";

/// Synthesizes speech through an OpenAI-compatible HTTP API
pub struct HttpSynthesisEngine {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    voice: Mutex<String>,
}

impl HttpSynthesisEngine {
    /// Create a new engine
    ///
    /// A missing API key is not an error here; `load` reports the engine as
    /// unavailable so the session falls back to platform speech.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            voice: Mutex::new(DEFAULT_VOICE.to_string()),
        }
    }

    fn current_voice(&self) -> String {
        self.voice.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn store_voice(&self, voice_id: &str) {
        *self.voice.lock().unwrap_or_else(PoisonError::into_inner) = voice_id.to_string();
    }
}

#[async_trait]
impl SynthesisEngine for HttpSynthesisEngine {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn load(&self, voice_id: Option<&str>, progress: ProgressSink) -> Result<String> {
        let Some(key) = &self.api_key else {
            return Err(Error::EngineUnavailable(
                "no API key configured for speech endpoint".to_string(),
            ));
        };
        if key.expose_secret().is_empty() {
            return Err(Error::EngineUnavailable(
                "empty API key for speech endpoint".to_string(),
            ));
        }

        // Nothing to download; report a single completed step
        progress(ProgressInfo::new(1, Some(1)));

        if let Some(voice) = voice_id {
            self.set_voice(voice).await?;
        }
        Ok(self.current_voice())
    }

    async fn set_voice(&self, voice_id: &str) -> Result<()> {
        if !VOICES.contains(&voice_id) {
            return Err(Error::Config(format!("unknown voice: {voice_id}")));
        }
        self.store_voice(voice_id);
        Ok(())
    }

    async fn synthesize(&self, text: &str) -> Result<AudioBuffer> {
        #[derive(serde::Serialize)]
        struct SpeechRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            response_format: &'a str,
        }

        let key = self.api_key.as_ref().ok_or(Error::NotInitialized)?;
        let voice = self.current_voice();
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &voice,
            response_format: "pcm",
        };

        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("speech API error {status}: {body}")));
        }

        let bytes = response.bytes().await?;
        tracing::debug!(bytes = bytes.len(), voice = %voice, "speech synthesized");
        Ok(AudioBuffer::new(pcm16_to_f32(&bytes), PCM_SAMPLE_RATE))
    }

    async fn voices(&self) -> Result<Vec<VoiceInfo>> {
        Ok(VOICES
            .iter()
            .map(|v| VoiceInfo::new(*v, *v, Some("en".to_string())))
            .collect())
    }
}

/// Convert little-endian 16-bit PCM to f32 samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn pcm_conversion() {
        let bytes = [0x00, 0x00, 0xff, 0x7f, 0x00, 0x80, 0x01];
        let samples = pcm16_to_f32(&bytes);
        assert_eq!(samples.len(), 3);
        assert!(samples[0].abs() < f32::EPSILON);
        assert!((samples[1] - 32767.0 / 32768.0).abs() < 1e-6);
        assert!((samples[2] + 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn load_without_key_is_unavailable() {
        let engine = HttpSynthesisEngine::new("http://localhost:1", None, "tts-1");
        let result = engine.load(None, Arc::new(|_: ProgressInfo| {})).await;
        assert!(matches!(result, Err(Error::EngineUnavailable(_))));
    }

    #[tokio::test]
    async fn load_selects_known_voice() {
        let engine = HttpSynthesisEngine::new(
            "http://localhost:1",
            Some(SecretString::from("k".to_string())),
            "tts-1",
        );
        let voice = engine.load(Some("nova"), Arc::new(|_: ProgressInfo| {})).await.unwrap();
        assert_eq!(voice, "nova");

        assert!(engine.set_voice("robot").await.is_err());
        assert_eq!(engine.current_voice(), "nova");
    }
}

//! Synthesis adapter integration tests
//!
//! Exercises worker bring-up and fallback through the public adapter API.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use beacon_voice::playback::NullSink;
use beacon_voice::synthesis::worker::ProgressSink;
use beacon_voice::synthesis::{
    MAX_INIT_ATTEMPTS, ProgressInfo, SessionState, SynthesisEngine, VoiceInfo,
};
use beacon_voice::{
    AudioBuffer, AudioSink, Error, FallbackSynthesizer, PlaybackEnd, SpeechSynthesizer,
    SynthesisAdapter, SynthesisEvent, WavFileSink,
};

mod common;
use common::{FakePlatform, Speech};

/// Engine whose first `failures` loads fail
struct FlakyEngine {
    failures: AtomicU32,
    loads: AtomicU32,
    unavailable: bool,
}

impl FlakyEngine {
    fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(failures),
            loads: AtomicU32::new(0),
            unavailable: false,
        })
    }

    fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(0),
            loads: AtomicU32::new(0),
            unavailable: true,
        })
    }

    fn loads(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisEngine for FlakyEngine {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn load(&self, voice_id: Option<&str>, progress: ProgressSink) -> beacon_voice::Result<String> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(Error::EngineUnavailable("no accelerator".to_string()));
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Synthesis("model download failed".to_string()));
        }
        (*progress)(ProgressInfo::new(512, Some(1024)));
        (*progress)(ProgressInfo::new(1024, Some(1024)));
        Ok(voice_id.unwrap_or("alloy").to_string())
    }

    async fn set_voice(&self, _voice_id: &str) -> beacon_voice::Result<()> {
        Ok(())
    }

    async fn synthesize(&self, text: &str) -> beacon_voice::Result<AudioBuffer> {
        Ok(AudioBuffer::new(vec![0.1; text.len() * 100], 16_000))
    }

    async fn voices(&self) -> beacon_voice::Result<Vec<VoiceInfo>> {
        Ok(vec![VoiceInfo::new("alloy", "Alloy", Some("en".to_string()))])
    }
}

fn adapter(
    engine: Option<Arc<FlakyEngine>>,
    platform: Arc<FakePlatform>,
    sink: Arc<dyn AudioSink>,
) -> SynthesisAdapter {
    let fallback = FallbackSynthesizer::new(platform, Duration::from_secs(3), Duration::from_secs(1));
    SynthesisAdapter::new(
        engine.map(|e| e as Arc<dyn SynthesisEngine>),
        fallback,
        sink,
        Duration::from_secs(10),
    )
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<SynthesisEvent>) -> Vec<SynthesisEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn exhausted_attempts_fall_back_to_platform_speech() {
    let engine = FlakyEngine::failing(u32::MAX);
    let platform = FakePlatform::new(Speech::Speaks(Duration::from_millis(10)));
    let adapter = adapter(Some(engine.clone()), platform.clone(), Arc::new(NullSink));
    let mut events = adapter.subscribe();

    let info = adapter.initialize(None).await.unwrap();
    assert!(info.uses_fallback);
    assert_eq!(engine.loads(), MAX_INIT_ATTEMPTS);

    let session = adapter.session();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.attempt_count(), MAX_INIT_ATTEMPTS);
    assert!(session.uses_fallback());

    let ready: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SynthesisEvent::Ready(_)))
        .collect();
    assert_eq!(ready.len(), 1);
    assert!(matches!(&ready[0], SynthesisEvent::Ready(r) if r.uses_fallback));

    // A second initialize is a no-op with no second Ready
    adapter.initialize(None).await.unwrap();
    assert_eq!(engine.loads(), MAX_INIT_ATTEMPTS);
    assert!(drain(&mut events).is_empty());

    let playback = adapter.speak("hello").await.unwrap();
    assert_eq!(playback.finished().await, PlaybackEnd::Completed);
    assert_eq!(platform.spoken(), vec!["hello".to_string()]);
    assert_eq!(engine.loads(), MAX_INIT_ATTEMPTS);

    adapter.shutdown().await;
}

#[tokio::test]
async fn worker_audio_goes_to_the_sink() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(WavFileSink::new(dir.path()).unwrap());
    let engine = FlakyEngine::failing(1);
    let platform = FakePlatform::new(Speech::Silent);
    let adapter = adapter(Some(engine.clone()), platform.clone(), sink.clone());
    let mut events = adapter.subscribe();

    let info = adapter.initialize(Some("nova".to_string())).await.unwrap();
    assert!(!info.uses_fallback);
    assert_eq!(info.voice_id.as_deref(), Some("nova"));
    assert_eq!(adapter.session().attempt_count(), 2);

    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(e, SynthesisEvent::Progress(p) if p.loaded == 1024)));
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, SynthesisEvent::Ready(_)))
            .count(),
        1
    );

    let playback = adapter.speak("Paris is the capital of France.").await.unwrap();
    assert_eq!(playback.finished().await, PlaybackEnd::Completed);

    let written = sink.last_written().expect("a wav file");
    let reader = hound::WavReader::open(&written).unwrap();
    assert_eq!(reader.spec().sample_rate, 16_000);
    assert!(reader.len() > 0);
    assert!(platform.spoken().is_empty());

    let voices = adapter.list_voices().await.unwrap();
    assert_eq!(voices[0].id, "alloy");

    adapter.shutdown().await;
}

#[tokio::test]
async fn unavailable_engine_uses_platform_for_everything() {
    let engine = FlakyEngine::unavailable();
    let platform = FakePlatform::with_voices(vec![VoiceInfo::new(
        "en-us",
        "English (America)",
        Some("en-US".to_string()),
    )]);
    let adapter = adapter(Some(engine.clone()), platform.clone(), Arc::new(NullSink));

    let info = adapter.initialize(None).await.unwrap();
    assert!(info.uses_fallback);
    assert_eq!(engine.loads(), 1);
    assert_eq!(adapter.session().attempt_count(), 1);

    let voices = adapter.list_voices().await.unwrap();
    assert_eq!(voices.len(), 1);
    assert_eq!(voices[0].language.as_deref(), Some("en-US"));

    adapter.speak("hi").await.unwrap();
    assert_eq!(platform.spoken(), vec!["hi".to_string()]);
}

#[tokio::test]
async fn no_engine_goes_straight_to_fallback() {
    let platform = FakePlatform::new(Speech::Speaks(Duration::from_millis(10)));
    let adapter = adapter(None, platform.clone(), Arc::new(NullSink));

    let info = adapter.initialize(Some("en-gb".to_string())).await.unwrap();
    assert!(info.uses_fallback);
    assert_eq!(info.voice_id.as_deref(), Some("en-gb"));
    assert_eq!(adapter.session().attempt_count(), 0);
    assert_eq!(platform.primers(), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_platform_errors_after_one_retry() {
    let platform = FakePlatform::new(Speech::Silent);
    let adapter = adapter(None, platform.clone(), Arc::new(NullSink));
    adapter.initialize(None).await.unwrap();

    let err = adapter.speak("anyone?").await.unwrap_err();
    assert!(matches!(err, Error::Synthesis(_)), "got {err}");
    assert_eq!(platform.spoken().len(), 2);
    // One primer at startup, one before the retry
    assert_eq!(platform.primers(), 2);
}

#[tokio::test]
async fn stop_interrupts_platform_speech() {
    let platform = FakePlatform::new(Speech::Speaks(Duration::from_secs(30)));
    let adapter = adapter(None, platform.clone(), Arc::new(NullSink));
    adapter.initialize(None).await.unwrap();

    let playback = adapter.speak("a very long answer").await.unwrap();
    adapter.stop();
    adapter.stop();
    assert_eq!(playback.finished().await, PlaybackEnd::Interrupted);
    assert_eq!(platform.cancels(), 2);
}

#[tokio::test]
async fn initialize_fails_without_any_speech() {
    let adapter = adapter(None, FakePlatform::unavailable(), Arc::new(NullSink));

    let err = adapter.initialize(None).await.unwrap_err();
    assert!(matches!(err, Error::EngineUnavailable(_)), "got {err}");
    assert_eq!(adapter.session().state(), SessionState::Failed);
    assert!(matches!(
        adapter.speak("hello").await,
        Err(Error::NotInitialized)
    ));
}

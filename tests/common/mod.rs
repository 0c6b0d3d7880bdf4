//! Shared fakes for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beacon_voice::config::RecognitionConfig;
use beacon_voice::playback::{NullSink, PlaybackNotifier};
use beacon_voice::synthesis::fallback::SpeechErrorKind;
use beacon_voice::synthesis::worker::ProgressSink;
use beacon_voice::synthesis::{
    PlatformSpeech, SynthesisEngine, Utterance, UtteranceEvent, UtteranceHandle, VoiceInfo,
};
use beacon_voice::{
    AudioBuffer, AudioSink, Collaborators, Config, Error, FallbackSynthesizer, Orchestrator,
    OrchestratorStatus, Playback, PlaybackEnd, ReasoningClient, ReasoningRequest,
    ReasoningResponse, RecognitionEngine, RecognitionEvent, Segment, SynthesisAdapter,
};
use tokio::sync::{mpsc, watch};

/// How the fake platform handles one utterance
#[derive(Debug, Clone)]
pub enum Speech {
    /// Starts at once and ends after the duration
    Speaks(Duration),
    /// Reports an error instead of starting
    Fails(&'static str),
    /// Never reports anything
    Silent,
}

/// Scripted platform speech
pub struct FakePlatform {
    default: Speech,
    script: Mutex<VecDeque<Speech>>,
    available: bool,
    spoken: Mutex<Vec<String>>,
    primers: AtomicU32,
    cancels: AtomicU32,
    active: Mutex<Vec<mpsc::UnboundedSender<UtteranceEvent>>>,
    voices: Vec<VoiceInfo>,
}

impl FakePlatform {
    pub fn new(default: Speech) -> Arc<Self> {
        Arc::new(Self::build(default, true, Vec::new()))
    }

    /// Platform with no speech support at all
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self::build(Speech::Silent, false, Vec::new()))
    }

    pub fn with_voices(voices: Vec<VoiceInfo>) -> Arc<Self> {
        Arc::new(Self::build(Speech::Speaks(Duration::from_millis(100)), true, voices))
    }

    fn build(default: Speech, available: bool, voices: Vec<VoiceInfo>) -> Self {
        Self {
            default,
            script: Mutex::new(VecDeque::new()),
            available,
            spoken: Mutex::new(Vec::new()),
            primers: AtomicU32::new(0),
            cancels: AtomicU32::new(0),
            active: Mutex::new(Vec::new()),
            voices,
        }
    }

    /// Behaviour for the next utterances, before falling back to the default
    pub fn script(&self, steps: impl IntoIterator<Item = Speech>) {
        self.script.lock().unwrap().extend(steps);
    }

    /// Audible utterances, primers excluded
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn primers(&self) -> u32 {
        self.primers.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> u32 {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformSpeech for FakePlatform {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn speak(&self, utterance: Utterance) -> beacon_voice::Result<UtteranceHandle> {
        if !self.available {
            return Err(Error::EngineUnavailable("no speech here".to_string()));
        }

        let (tx, handle) = UtteranceHandle::channel();
        if utterance.volume <= 0.0 {
            self.primers.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(UtteranceEvent::End);
            return Ok(handle);
        }

        self.spoken.lock().unwrap().push(utterance.text);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        match step {
            Speech::Speaks(duration) => {
                let _ = tx.send(UtteranceEvent::Start);
                self.active.lock().unwrap().push(tx.clone());
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    let _ = tx.send(UtteranceEvent::End);
                });
            }
            Speech::Fails(message) => {
                let _ = tx.send(UtteranceEvent::Error(SpeechErrorKind::Other(message.to_string())));
            }
            Speech::Silent => self.active.lock().unwrap().push(tx),
        }
        Ok(handle)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        for tx in self.active.lock().unwrap().drain(..) {
            let _ = tx.send(UtteranceEvent::Error(SpeechErrorKind::Interrupted));
        }
    }

    async fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.clone()
    }
}

/// Adapter with no worker engine, speaking through `platform`
pub fn fallback_synthesizer(platform: Arc<FakePlatform>) -> Arc<SynthesisAdapter> {
    let fallback = FallbackSynthesizer::new(platform, Duration::from_secs(3), Duration::from_secs(1));
    Arc::new(SynthesisAdapter::new(
        None,
        fallback,
        Arc::new(NullSink),
        Duration::from_secs(10),
    ))
}

/// Worker engine that loads at once and renders silence
pub struct ToneEngine;

#[async_trait]
impl SynthesisEngine for ToneEngine {
    fn name(&self) -> &'static str {
        "tone"
    }

    async fn load(&self, voice_id: Option<&str>, _progress: ProgressSink) -> beacon_voice::Result<String> {
        Ok(voice_id.unwrap_or("alloy").to_string())
    }

    async fn set_voice(&self, _voice_id: &str) -> beacon_voice::Result<()> {
        Ok(())
    }

    async fn synthesize(&self, text: &str) -> beacon_voice::Result<AudioBuffer> {
        Ok(AudioBuffer::new(vec![0.0; text.len()], 16_000))
    }

    async fn voices(&self) -> beacon_voice::Result<Vec<VoiceInfo>> {
        Ok(vec![VoiceInfo::new("alloy", "Alloy", None)])
    }
}

/// Sink that plays each buffer for a fixed time
pub struct TimedSink {
    duration: Duration,
    plays: AtomicU32,
    active: Mutex<Vec<Arc<Mutex<Option<PlaybackNotifier>>>>>,
}

impl TimedSink {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            plays: AtomicU32::new(0),
            active: Mutex::new(Vec::new()),
        })
    }

    pub fn plays(&self) -> u32 {
        self.plays.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for TimedSink {
    async fn play(&self, _buffer: AudioBuffer) -> beacon_voice::Result<Playback> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        let (notifier, playback) = Playback::channel();
        let slot = Arc::new(Mutex::new(Some(notifier)));
        self.active.lock().unwrap().push(Arc::clone(&slot));

        let duration = self.duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(notifier) = slot.lock().unwrap().take() {
                notifier.finish(PlaybackEnd::Completed);
            }
        });
        Ok(playback)
    }

    fn stop(&self) {
        for slot in self.active.lock().unwrap().drain(..) {
            if let Some(notifier) = slot.lock().unwrap().take() {
                notifier.finish(PlaybackEnd::Interrupted);
            }
        }
    }
}

/// Adapter running [`ToneEngine`] on the worker and playing into `sink`
pub fn worker_synthesizer(sink: Arc<TimedSink>) -> Arc<SynthesisAdapter> {
    let fallback = FallbackSynthesizer::new(
        FakePlatform::new(Speech::Silent),
        Duration::from_secs(3),
        Duration::from_secs(1),
    );
    Arc::new(SynthesisAdapter::new(
        Some(Arc::new(ToneEngine) as Arc<dyn SynthesisEngine>),
        fallback,
        sink,
        Duration::from_secs(10),
    ))
}

/// Recognition engine fed by the test
#[derive(Default)]
pub struct ScriptedRecognizer {
    stream: Mutex<Option<mpsc::Sender<RecognitionEvent>>>,
    starts: AtomicU32,
    stops: AtomicU32,
}

impl ScriptedRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    /// Push an event into the open stream
    pub async fn emit(&self, event: RecognitionEvent) {
        let tx = self.stream.lock().unwrap().clone().expect("no open stream");
        tx.send(event).await.expect("stream receiver dropped");
    }

    /// A finalized segment
    pub async fn say(&self, text: &str) {
        self.emit(RecognitionEvent::Results(vec![Segment::finalized(text)]))
            .await;
    }

    /// An interim guess
    pub async fn hear(&self, text: &str) {
        self.emit(RecognitionEvent::Results(vec![Segment::interim(text)]))
            .await;
    }

    /// End the stream as if the engine stopped on its own
    pub async fn end(&self) {
        self.emit(RecognitionEvent::Ended).await;
        self.stream.lock().unwrap().take();
    }
}

#[async_trait]
impl RecognitionEngine for ScriptedRecognizer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn start(
        &self,
        _config: &RecognitionConfig,
    ) -> beacon_voice::Result<mpsc::Receiver<RecognitionEvent>> {
        let (tx, rx) = mpsc::channel(32);
        *self.stream.lock().unwrap() = Some(tx);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stream.lock().unwrap().take();
    }
}

/// Reasoning client with a fixed reply
pub struct FakeReasoner {
    reply: String,
    delay: Duration,
    transcripts: Mutex<Vec<String>>,
}

impl FakeReasoner {
    pub fn new(reply: &str) -> Arc<Self> {
        Self::slow(reply, Duration::from_millis(200))
    }

    pub fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            delay,
            transcripts: Mutex::new(Vec::new()),
        })
    }

    /// Transcripts sent for generation, in order
    pub fn transcripts(&self) -> Vec<String> {
        self.transcripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningClient for FakeReasoner {
    async fn generate(&self, request: ReasoningRequest) -> beacon_voice::Result<ReasoningResponse> {
        self.transcripts.lock().unwrap().push(request.transcript);
        tokio::time::sleep(self.delay).await;
        Ok(ReasoningResponse {
            generated_text: self.reply.clone(),
        })
    }
}

pub fn spawn_orchestrator(
    config: &Config,
    recognizer: &Arc<ScriptedRecognizer>,
    reasoner: &Arc<FakeReasoner>,
    synthesis: Arc<SynthesisAdapter>,
) -> Orchestrator {
    Orchestrator::spawn(
        config,
        Collaborators {
            recognition: recognizer.clone(),
            reasoning: reasoner.clone(),
            synthesis,
        },
    )
}

/// Wait until the published status satisfies `pred`
pub async fn wait_for(
    status: &mut watch::Receiver<OrchestratorStatus>,
    what: &str,
    pred: impl FnMut(&OrchestratorStatus) -> bool,
) -> OrchestratorStatus {
    let current = tokio::time::timeout(Duration::from_secs(300), status.wait_for(pred))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("orchestrator stopped");
    current.clone()
}

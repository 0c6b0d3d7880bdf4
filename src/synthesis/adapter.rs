//! Synthesis backend adapter
//!
//! Brings up the background worker with a bounded number of attempts, and
//! degrades to main-task [`FallbackSynthesizer`] speech for the rest of the
//! session when it cannot. Readiness changes are published as
//! [`SynthesisEvent`]s; callers never see worker messages directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::fallback::FallbackSynthesizer;
use super::protocol::{AudioBuffer, AudioPayload, ProgressInfo, VoiceInfo, WorkerCommand, WorkerEvent};
use super::session::SynthesisSession;
use super::worker::{SynthesisEngine, WorkerHandle, spawn_worker};
use crate::playback::{AudioSink, Playback};
use crate::{Error, Result};

/// Readiness notifications from the adapter
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    /// Emitted once per session when synthesis becomes usable
    Ready(ReadyInfo),
    /// Engine asset download progress
    Progress(ProgressInfo),
    /// Worker switched voice
    VoiceChanged(String),
}

/// Outcome of initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyInfo {
    pub uses_fallback: bool,
    pub voice_id: Option<String>,
}

impl From<&SynthesisSession> for ReadyInfo {
    fn from(session: &SynthesisSession) -> Self {
        Self {
            uses_fallback: session.uses_fallback(),
            voice_id: session.voice_id().map(str::to_string),
        }
    }
}

/// Result of [`SpeechSynthesizer::synthesize`]-style calls
#[derive(Debug)]
pub enum SynthesisOutput {
    /// Worker produced audio for a sink to play
    Audio(AudioBuffer),
    /// Fallback speech is already playing
    Spoken(Playback),
}

/// Speech output as seen by the orchestrator
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Bring synthesis up; a no-op when already ready
    async fn initialize(&self, voice_id: Option<String>) -> Result<ReadyInfo>;

    /// Snapshot of the session
    fn session(&self) -> SynthesisSession;

    /// Speak `text`, resolving once audio has started
    async fn speak(&self, text: &str) -> Result<Playback>;

    /// Cancel synthesis and playback; idempotent
    fn stop(&self);

    /// Available voices
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>>;

    /// Subscribe to readiness notifications
    fn subscribe(&self) -> broadcast::Receiver<SynthesisEvent>;

    /// Stop and terminate background work
    async fn shutdown(&self);
}

enum InitOutcome {
    Worker(Option<String>),
    Fallback,
}

/// A `SPEAK` awaiting audio
///
/// `epoch` counts the `STOP`s posted before the request. Only replies the
/// worker sends after acknowledging all of them belong to this request.
struct SpeakSlot {
    epoch: u64,
    tx: oneshot::Sender<Result<AudioPayload>>,
}

/// Requests awaiting a worker reply
#[derive(Default)]
struct Pending {
    init: Option<oneshot::Sender<Result<(Option<String>, bool)>>>,
    speak: Option<SpeakSlot>,
    voices: Option<oneshot::Sender<Result<(Vec<VoiceInfo>, bool)>>>,
    stops_posted: u64,
    stops_acked: u64,
}

impl Pending {
    /// Take the speak slot if a reply arriving now answers it
    fn take_current_speak(&mut self) -> Option<oneshot::Sender<Result<AudioPayload>>> {
        if self.speak.as_ref()?.epoch > self.stops_acked {
            tracing::trace!("dropping speak reply sent before the latest stop");
            return None;
        }
        self.speak.take().map(|slot| slot.tx)
    }
}

type SharedPending = Arc<Mutex<Pending>>;

struct WorkerLink {
    handle: WorkerHandle,
    pending: SharedPending,
    pump: JoinHandle<()>,
}

impl Drop for WorkerLink {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// [`SpeechSynthesizer`] backed by the worker with platform fallback
pub struct SynthesisAdapter {
    engine: Option<Arc<dyn SynthesisEngine>>,
    fallback: FallbackSynthesizer,
    sink: Arc<dyn AudioSink>,
    init_timeout: Duration,
    session: Arc<Mutex<SynthesisSession>>,
    init_gate: tokio::sync::Mutex<()>,
    worker: Mutex<Option<WorkerLink>>,
    events: broadcast::Sender<SynthesisEvent>,
    ready_emitted: AtomicBool,
}

impl SynthesisAdapter {
    /// Create an adapter
    ///
    /// With `engine` set to `None` the adapter goes straight to fallback.
    #[must_use]
    pub fn new(
        engine: Option<Arc<dyn SynthesisEngine>>,
        fallback: FallbackSynthesizer,
        sink: Arc<dyn AudioSink>,
        init_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            engine,
            fallback,
            sink,
            init_timeout,
            session: Arc::new(Mutex::new(SynthesisSession::default())),
            init_gate: tokio::sync::Mutex::new(()),
            worker: Mutex::new(None),
            events,
            ready_emitted: AtomicBool::new(false),
        }
    }

    /// Synthesize `text` without playing worker audio
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] unless the session is ready
    pub async fn synthesize(&self, text: &str) -> Result<SynthesisOutput> {
        let session = self.session();
        if !session.is_ready() {
            return Err(Error::NotInitialized);
        }
        if session.uses_fallback() {
            return self.fallback.speak(text).await.map(SynthesisOutput::Spoken);
        }

        let reply = {
            let worker = self.lock_worker();
            let link = worker.as_ref().ok_or(Error::NotInitialized)?;
            let (tx, rx) = oneshot::channel();
            let mut pending = lock(&link.pending);
            let epoch = pending.stops_posted;
            pending.speak = Some(SpeakSlot { epoch, tx });
            link.handle.post(WorkerCommand::Speak {
                text: text.to_string(),
            })?;
            rx
        };

        // A replaced or dropped slot means a newer request or stop took over
        match reply.await.unwrap_or(Err(Error::Interrupted))? {
            AudioPayload::Buffer(buffer) => Ok(SynthesisOutput::Audio(buffer)),
            AudioPayload::Request { text } => {
                tracing::debug!("worker requested main-task synthesis");
                self.fallback.speak(&text).await.map(SynthesisOutput::Spoken)
            }
        }
    }

    /// Reset the session and terminate the worker
    ///
    /// The next `initialize` starts from zero attempts.
    pub async fn restart(&self) {
        let _gate = self.init_gate.lock().await;
        self.stop();
        self.drop_worker();
        lock(&self.session).restart();
        self.ready_emitted.store(false, Ordering::SeqCst);
        tracing::info!("synthesis session restarted");
    }

    async fn init_worker(
        &self,
        engine: &Arc<dyn SynthesisEngine>,
        voice_id: Option<String>,
        deadline: Instant,
    ) -> InitOutcome {
        loop {
            let attempt = {
                let mut session = lock(&self.session);
                if !session.can_attempt_worker() {
                    break;
                }
                session.record_attempt()
            };

            let reply = match self.launch_worker(engine, voice_id.clone()) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "synthesis worker launch failed");
                    self.drop_worker();
                    continue;
                }
            };

            match tokio::time::timeout_at(deadline, reply).await {
                Err(_) => {
                    tracing::warn!(
                        attempt,
                        timeout_ms = self.init_timeout.as_millis(),
                        "synthesis init timed out"
                    );
                    self.drop_worker();
                    return InitOutcome::Fallback;
                }
                Ok(Ok(Ok((voice, false)))) => {
                    tracing::info!(attempt, engine = engine.name(), "synthesis worker ready");
                    return InitOutcome::Worker(voice);
                }
                Ok(Ok(Ok((_, true)))) => {
                    tracing::info!(engine = engine.name(), "worker delegated synthesis to main task");
                    self.drop_worker();
                    return InitOutcome::Fallback;
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!(attempt, error = %e, "synthesis init attempt failed");
                    self.drop_worker();
                }
                Ok(Err(_)) => {
                    tracing::warn!(attempt, "synthesis worker exited during init");
                    self.drop_worker();
                }
            }
        }

        tracing::warn!("synthesis init attempts exhausted");
        InitOutcome::Fallback
    }

    /// Spawn a fresh worker and post `INIT`
    fn launch_worker(
        &self,
        engine: &Arc<dyn SynthesisEngine>,
        voice_id: Option<String>,
    ) -> Result<oneshot::Receiver<Result<(Option<String>, bool)>>> {
        let (handle, events) = spawn_worker(Arc::clone(engine));
        let pending = SharedPending::default();
        let pump = tokio::spawn(pump_events(
            events,
            Arc::clone(&pending),
            Arc::clone(&self.session),
            self.events.clone(),
        ));

        let (tx, rx) = oneshot::channel();
        lock(&pending).init = Some(tx);
        handle.post(WorkerCommand::Init { voice_id })?;

        *self.lock_worker() = Some(WorkerLink {
            handle,
            pending,
            pump,
        });
        Ok(rx)
    }

    fn drop_worker(&self) {
        // Dropping the link aborts both the pump and the worker task
        let link = self.lock_worker().take();
        drop(link);
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<WorkerLink>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SynthesisEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl SpeechSynthesizer for SynthesisAdapter {
    async fn initialize(&self, voice_id: Option<String>) -> Result<ReadyInfo> {
        let _gate = self.init_gate.lock().await;
        {
            let mut session = lock(&self.session);
            if session.is_ready() {
                return Ok(ReadyInfo::from(&*session));
            }
            session.begin_initializing();
        }

        let deadline = Instant::now() + self.init_timeout;
        let outcome = match &self.engine {
            Some(engine) => self.init_worker(engine, voice_id.clone(), deadline).await,
            None => {
                tracing::info!("no synthesis engine configured, using platform speech");
                InitOutcome::Fallback
            }
        };

        let voice = match outcome {
            InitOutcome::Worker(voice) => voice,
            InitOutcome::Fallback => {
                lock(&self.session).engage_fallback();
                self.fallback.set_voice(voice_id.clone());
                if let Err(e) = self.fallback.prime().await {
                    tracing::error!(error = %e, "platform speech unavailable");
                    lock(&self.session).mark_failed();
                    return Err(e);
                }
                voice_id
            }
        };

        let info = {
            let mut session = lock(&self.session);
            session.mark_ready(voice);
            ReadyInfo::from(&*session)
        };
        tracing::info!(uses_fallback = info.uses_fallback, voice = ?info.voice_id, "synthesis ready");

        if !self.ready_emitted.swap(true, Ordering::SeqCst) {
            self.emit(SynthesisEvent::Ready(info.clone()));
        }
        Ok(info)
    }

    fn session(&self) -> SynthesisSession {
        lock(&self.session).clone()
    }

    async fn speak(&self, text: &str) -> Result<Playback> {
        match self.synthesize(text).await? {
            SynthesisOutput::Audio(buffer) => self.sink.play(buffer).await,
            SynthesisOutput::Spoken(playback) => Ok(playback),
        }
    }

    fn stop(&self) {
        if let Some(link) = self.lock_worker().as_ref() {
            let mut pending = lock(&link.pending);
            pending.speak = None;
            match link.handle.post(WorkerCommand::Stop) {
                Ok(()) => pending.stops_posted += 1,
                Err(e) => tracing::debug!(error = %e, "stop not delivered"),
            }
        }
        self.fallback.cancel();
        self.sink.stop();
    }

    async fn list_voices(&self) -> Result<Vec<VoiceInfo>> {
        if self.session().uses_fallback() {
            return Ok(self.fallback.list_voices().await);
        }

        let reply = {
            let worker = self.lock_worker();
            let link = worker.as_ref().ok_or(Error::NotInitialized)?;
            let (tx, rx) = oneshot::channel();
            lock(&link.pending).voices = Some(tx);
            link.handle.post(WorkerCommand::GetVoices)?;
            rx
        };

        let (voices, delegated) = reply
            .await
            .map_err(|_| Error::ChannelClosed("synthesis worker exited".to_string()))??;
        if delegated {
            return Ok(self.fallback.list_voices().await);
        }
        Ok(voices)
    }

    fn subscribe(&self) -> broadcast::Receiver<SynthesisEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) {
        self.stop();
        self.drop_worker();
        tracing::debug!("synthesis adapter shut down");
    }
}

/// Route worker events to waiting requests and subscribers
async fn pump_events(
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    pending: SharedPending,
    session: Arc<Mutex<SynthesisSession>>,
    notify: broadcast::Sender<SynthesisEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Ready {
                voice_id,
                uses_fallback,
            } => {
                if let Some(tx) = lock(&pending).init.take() {
                    let _ = tx.send(Ok((voice_id, uses_fallback)));
                }
            }
            WorkerEvent::DownloadProgress { loaded, total } => {
                let _ = notify.send(SynthesisEvent::Progress(ProgressInfo::new(loaded, total)));
            }
            WorkerEvent::Audio { payload } => {
                if let Some(tx) = lock(&pending).take_current_speak() {
                    let _ = tx.send(Ok(payload));
                }
            }
            WorkerEvent::Voices {
                voices,
                uses_fallback,
            } => {
                if let Some(tx) = lock(&pending).voices.take() {
                    let _ = tx.send(Ok((voices, uses_fallback)));
                }
            }
            WorkerEvent::VoiceChanged { voice_id } => {
                lock(&session).set_voice(voice_id.clone());
                if let Some(tx) = lock(&pending).init.take() {
                    let _ = tx.send(Ok((Some(voice_id.clone()), false)));
                }
                let _ = notify.send(SynthesisEvent::VoiceChanged(voice_id));
            }
            WorkerEvent::Error { message } => {
                // Errors answer the oldest kind of outstanding request
                let mut pending = lock(&pending);
                if let Some(tx) = pending.init.take() {
                    let _ = tx.send(Err(Error::Synthesis(message)));
                } else if pending.speak.is_some() {
                    if let Some(tx) = pending.take_current_speak() {
                        let _ = tx.send(Err(Error::Synthesis(message)));
                    }
                } else if let Some(tx) = pending.voices.take() {
                    let _ = tx.send(Err(Error::Synthesis(message)));
                } else {
                    tracing::warn!(%message, "unsolicited synthesis worker error");
                }
            }
            WorkerEvent::Stopped => {
                let mut pending = lock(&pending);
                pending.stops_acked += 1;
                // Requests posted after this stop are still in flight
                if pending
                    .speak
                    .as_ref()
                    .is_some_and(|slot| slot.epoch < pending.stops_acked)
                {
                    if let Some(slot) = pending.speak.take() {
                        let _ = slot.tx.send(Err(Error::Interrupted));
                    }
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

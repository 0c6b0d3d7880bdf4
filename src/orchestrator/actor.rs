//! Orchestrator event loop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::state::{ConversationContext, OrchestratorStatus};
use super::{Collaborators, Command};
use crate::config::{Config, RecognitionConfig, TimingConfig};
use crate::playback::PlaybackEnd;
use crate::reasoning::{ReasoningClient, ReasoningRequest};
use crate::recognition::{RecognitionEngine, RecognitionEvent};
use crate::synthesis::{ReadyInfo, SpeechSynthesizer};
use crate::{Error, Result};

/// Events the loop schedules for itself
enum Internal {
    SynthesisInit(Result<ReadyInfo>),
    DebounceElapsed { generation: u64 },
    Generated { turn: Uuid, result: Result<String> },
    PreSpeakElapsed { token: u64 },
    SpeechStarted { attempt: u64 },
    SpeechFinished { attempt: u64, outcome: Result<PlaybackEnd> },
    GraceElapsed { turn: Uuid },
    RestartRecognition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Auto,
    Manual,
}

/// The speak operation currently holding the lock
struct ActiveSpeech {
    attempt: u64,
    turn: Uuid,
    origin: Origin,
    /// Speaking the turn's response rather than ad hoc text
    for_response: bool,
    started: bool,
    reply: Option<oneshot::Sender<Result<()>>>,
    task: JoinHandle<()>,
}

pub(super) struct Actor {
    ctx: ConversationContext,
    timing: TimingConfig,
    recognition_config: RecognitionConfig,
    voice_id: Option<String>,
    system_instructions: String,

    recognition: Arc<dyn RecognitionEngine>,
    reasoning: Arc<dyn ReasoningClient>,
    synthesis: Arc<dyn SpeechSynthesizer>,

    stream: Option<mpsc::Receiver<RecognitionEvent>>,
    user_stopped: bool,

    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    status: watch::Sender<OrchestratorStatus>,

    debounce_generation: u64,
    pre_speak_token: u64,
    pre_speak_pending: bool,
    attempt_seq: u64,
    speech: Option<ActiveSpeech>,
    generation_task: Option<JoinHandle<()>>,
}

impl Actor {
    pub(super) fn new(
        config: &Config,
        collaborators: Collaborators,
    ) -> (Self, watch::Receiver<OrchestratorStatus>) {
        let ctx = ConversationContext::default();
        let (status, status_rx) = watch::channel(ctx.snapshot(false, false));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let actor = Self {
            ctx,
            timing: config.timing.clone(),
            recognition_config: config.recognition.clone(),
            voice_id: config.voice.voice_id.clone(),
            system_instructions: config.llm.system_instructions.clone(),
            recognition: collaborators.recognition,
            reasoning: collaborators.reasoning,
            synthesis: collaborators.synthesis,
            stream: None,
            user_stopped: true,
            internal_tx,
            internal_rx,
            status,
            debounce_generation: 0,
            pre_speak_token: 0,
            pre_speak_pending: false,
            attempt_seq: 0,
            speech: None,
            generation_task: None,
        };
        (actor, status_rx)
    }

    pub(super) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.spawn_initialize();
        tracing::debug!(turn = %self.ctx.turn.id, "orchestrator started");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.shutdown().await;
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                event = next_recognition(&mut self.stream) => self.handle_recognition(event),
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal).await,
            }
            self.publish();
        }
        self.publish();
    }

    /// Returns `false` once the loop should exit
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::StartRecording => self.start_recording().await,
            Command::StopRecording => self.stop_recording().await,
            Command::Speak { text, reply } => self.manual_speak(text, reply),
            Command::ForceStop => self.force_stop(),
            Command::Retry => self.retry(),
            Command::Clear => self.clear(),
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn handle_recognition(&mut self, event: Option<RecognitionEvent>) {
        match event {
            Some(RecognitionEvent::Results(segments)) => {
                if self.ctx.turn.transcript.apply(&segments) {
                    tracing::debug!(
                        turn = %self.ctx.turn.id,
                        transcript = %self.ctx.turn.transcript.text(),
                        "final segment"
                    );
                    self.schedule_debounce();
                }
            }
            Some(RecognitionEvent::Error { code, message }) => {
                self.close_stream();
                self.fail(&Error::Recognition { code, message });
            }
            Some(RecognitionEvent::Ended) | None => {
                self.close_stream();
                if !self.user_stopped && self.recognition_config.auto_restart {
                    tracing::debug!(
                        delay_ms = self.recognition_config.restart_delay.as_millis(),
                        "recognition ended on its own, restarting"
                    );
                    self.schedule(
                        self.recognition_config.restart_delay,
                        Internal::RestartRecognition,
                    );
                } else {
                    tracing::info!("recording stopped");
                }
            }
        }
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::SynthesisInit(Ok(info)) => {
                tracing::info!(uses_fallback = info.uses_fallback, "synthesis ready for conversation");
                self.maybe_schedule_auto_speak();
            }
            Internal::SynthesisInit(Err(e)) => self.fail(&e),
            Internal::DebounceElapsed { generation } => {
                if generation == self.debounce_generation {
                    self.maybe_generate();
                }
            }
            Internal::Generated { turn, result } => self.on_generated(turn, result),
            Internal::PreSpeakElapsed { token } => self.on_pre_speak(token),
            Internal::SpeechStarted { attempt } => self.on_speech_started(attempt),
            Internal::SpeechFinished { attempt, outcome } => self.on_speech_finished(attempt, outcome),
            Internal::GraceElapsed { turn } => self.on_grace(turn),
            Internal::RestartRecognition => {
                if !self.user_stopped && !self.ctx.is_recording {
                    self.open_stream().await;
                }
            }
        }
    }

    // -- recording ---

    async fn start_recording(&mut self) {
        self.user_stopped = false;
        if self.ctx.is_recording {
            return;
        }

        // A response still waiting to be spoken survives a new recording
        if self.ctx.turn.generated_response.is_none() && !self.ctx.is_generating {
            self.ctx.reset_turn();
        } else {
            self.ctx.turn.transcript.clear();
            self.ctx.turn.asked = 0;
        }
        self.ctx.error = None;
        self.debounce_generation += 1;
        self.open_stream().await;
    }

    async fn stop_recording(&mut self) {
        self.user_stopped = true;
        self.recognition.stop().await;
        if self.ctx.is_recording {
            tracing::info!(turn = %self.ctx.turn.id, "recording stopped by user");
        }
        self.close_stream();
    }

    async fn open_stream(&mut self) {
        match self.recognition.start(&self.recognition_config).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.ctx.is_recording = true;
                tracing::info!(
                    engine = self.recognition.name(),
                    language = %self.recognition_config.language,
                    "recording started"
                );
            }
            Err(e) => self.fail(&e),
        }
    }

    fn close_stream(&mut self) {
        self.stream = None;
        self.ctx.is_recording = false;
        self.ctx.turn.transcript.end_stream();
    }

    // -- generation ---

    fn schedule_debounce(&mut self) {
        self.debounce_generation += 1;
        let generation = self.debounce_generation;
        self.schedule(self.timing.debounce, Internal::DebounceElapsed { generation });
    }

    fn maybe_generate(&mut self) {
        let turn = &self.ctx.turn;
        if self.ctx.is_generating || turn.generated_response.is_some() || !turn.transcript.has_final() {
            return;
        }

        let request = ReasoningRequest {
            transcript: turn.transcript.text().trim().to_string(),
            system_instructions: self.system_instructions.clone(),
        };
        let turn_id = turn.id;
        let asked = turn.transcript.text().len();
        tracing::info!(turn = %turn_id, transcript = %request.transcript, "generating response");

        self.ctx.turn.asked = asked;
        self.ctx.is_generating = true;
        let reasoning = Arc::clone(&self.reasoning);
        let timeout = self.timing.reasoning_timeout;
        let tx = self.internal_tx.clone();
        self.generation_task = Some(tokio::spawn(async move {
            let result = generate(reasoning.as_ref(), request, timeout).await;
            let _ = tx.send(Internal::Generated {
                turn: turn_id,
                result,
            });
        }));
    }

    fn on_generated(&mut self, turn: Uuid, result: Result<String>) {
        // A stale result must not touch a newer turn's generation
        if turn != self.ctx.turn.id {
            tracing::debug!(%turn, "discarding response for a cleared turn");
            return;
        }
        self.ctx.is_generating = false;
        self.generation_task = None;

        match result {
            Ok(text) => {
                let text = text.trim().to_string();
                tracing::info!(%turn, response = %text, "response received");
                self.ctx.error = None;
                self.ctx.turn.generated_response = Some(text);
                self.maybe_schedule_auto_speak();
            }
            Err(e) => self.fail(&e),
        }
    }

    // -- speaking ---

    fn can_auto_speak(&self) -> bool {
        self.synthesis.session().is_ready()
            && !self.ctx.is_speaking
            && !self.ctx.lock.is_held()
            && self.ctx.turn.pending_response().is_some()
    }

    fn maybe_schedule_auto_speak(&mut self) {
        if self.pre_speak_pending || !self.can_auto_speak() {
            return;
        }
        self.pre_speak_token += 1;
        self.pre_speak_pending = true;
        let token = self.pre_speak_token;
        self.schedule(self.timing.pre_speak_delay, Internal::PreSpeakElapsed { token });
    }

    fn cancel_pre_speak(&mut self) {
        self.pre_speak_token += 1;
        self.pre_speak_pending = false;
    }

    fn on_pre_speak(&mut self, token: u64) {
        if token != self.pre_speak_token {
            return;
        }
        self.pre_speak_pending = false;

        if !self.can_auto_speak() {
            tracing::debug!(turn = %self.ctx.turn.id, "auto-speak conditions no longer hold");
            return;
        }
        if self.ctx.lock.attempts() >= self.timing.max_auto_speak_attempts {
            self.trip_breaker();
            return;
        }
        if let Some(text) = self.ctx.turn.pending_response().map(str::to_string) {
            self.begin_speak(text, Origin::Auto, true, None);
        }
    }

    fn manual_speak(&mut self, text: Option<String>, reply: oneshot::Sender<Result<()>>) {
        if !self.synthesis.session().is_ready() {
            let _ = reply.send(Err(Error::NotInitialized));
            return;
        }

        let response = self.ctx.turn.generated_response.clone();
        let (text, for_response) = match text {
            Some(text) => {
                let for_response = response.as_deref() == Some(text.as_str());
                (text, for_response)
            }
            None => (response.unwrap_or_default(), true),
        };
        if text.trim().is_empty() {
            let _ = reply.send(Err(Error::Synthesis("nothing to speak".to_string())));
            return;
        }

        self.ctx.error = None;
        self.begin_speak(text, Origin::Manual, for_response, Some(reply));
    }

    fn begin_speak(
        &mut self,
        text: String,
        origin: Origin,
        for_response: bool,
        reply: Option<oneshot::Sender<Result<()>>>,
    ) {
        let guard = match self.ctx.lock.try_acquire() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::debug!(?origin, "speaking lock held, not speaking");
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
                return;
            }
        };
        self.cancel_pre_speak();

        if origin == Origin::Auto {
            let attempts = self.ctx.lock.record_attempt();
            tracing::debug!(turn = %self.ctx.turn.id, attempts, "auto-speak attempt");
        }

        self.attempt_seq += 1;
        let attempt = self.attempt_seq;
        self.ctx.is_speaking = true;
        tracing::info!(turn = %self.ctx.turn.id, attempt, ?origin, "speaking");

        let synthesis = Arc::clone(&self.synthesis);
        let tx = self.internal_tx.clone();
        let task = tokio::spawn(async move {
            let outcome = match synthesis.speak(&text).await {
                Ok(playback) => {
                    let _ = tx.send(Internal::SpeechStarted { attempt });
                    Ok(playback.finished().await)
                }
                Err(e) => Err(e),
            };
            drop(guard);
            let _ = tx.send(Internal::SpeechFinished { attempt, outcome });
        });

        self.speech = Some(ActiveSpeech {
            attempt,
            turn: self.ctx.turn.id,
            origin,
            for_response,
            started: false,
            reply,
            task,
        });
    }

    fn on_speech_started(&mut self, attempt: u64) {
        let Some(speech) = self.speech.as_mut().filter(|s| s.attempt == attempt) else {
            return;
        };
        speech.started = true;
        if speech.for_response && speech.turn == self.ctx.turn.id {
            self.ctx.turn.spoken = true;
        }
        if let Some(reply) = speech.reply.take() {
            let _ = reply.send(Ok(()));
        }
        self.ctx.error = None;
    }

    fn on_speech_finished(&mut self, attempt: u64, outcome: Result<PlaybackEnd>) {
        let Some(speech) = self.speech.take_if(|s| s.attempt == attempt) else {
            tracing::trace!(attempt, "ignoring stale speech result");
            return;
        };
        self.ctx.is_speaking = false;
        let current_turn = speech.turn == self.ctx.turn.id;

        match outcome {
            Ok(end) => {
                tracing::info!(turn = %speech.turn, attempt, ?end, "speech ended");
                if let PlaybackEnd::Failed(message) = end {
                    self.fail(&Error::Audio(message));
                }
                if speech.started && speech.for_response && current_turn {
                    self.schedule_grace();
                }
            }
            Err(e) => {
                if e.is_interruption() {
                    tracing::debug!(attempt, "speech interrupted");
                } else if speech.origin == Origin::Auto
                    && current_turn
                    && self.ctx.lock.attempts() >= self.timing.max_auto_speak_attempts
                {
                    tracing::debug!(error = %e, "final auto-speak attempt failed");
                    self.trip_breaker();
                } else {
                    self.fail(&e);
                }
                if let Some(reply) = speech.reply {
                    let _ = reply.send(Err(e));
                }
                self.maybe_schedule_auto_speak();
            }
        }
    }

    /// Give up on the turn's response without surfacing an error
    fn trip_breaker(&mut self) {
        tracing::warn!(
            turn = %self.ctx.turn.id,
            attempts = self.ctx.lock.attempts(),
            "auto-speak circuit breaker tripped, abandoning response"
        );
        self.ctx.turn.spoken = true;
        self.ctx.lock.force_release();
        self.cancel_pre_speak();
        self.schedule_grace();
    }

    fn schedule_grace(&self) {
        let turn = self.ctx.turn.id;
        self.schedule(self.timing.grace, Internal::GraceElapsed { turn });
    }

    fn on_grace(&mut self, turn: Uuid) {
        if turn != self.ctx.turn.id || self.speech.as_ref().is_some_and(|s| s.turn == turn) {
            return;
        }
        self.ctx.finish_turn();
        tracing::debug!(%turn, next = %self.ctx.turn.id, "turn complete");

        // Speech captured during the answer gets its own turn
        if self.ctx.turn.transcript.has_final() {
            self.schedule_debounce();
        }
    }

    /// Cancel in-flight speech and free the lock
    fn stop_speech(&mut self) {
        self.cancel_pre_speak();
        if let Some(speech) = self.speech.take() {
            speech.task.abort();
            if let Some(reply) = speech.reply {
                let _ = reply.send(Err(Error::Interrupted));
            }
        }
        self.synthesis.stop();
        self.ctx.lock.force_release();
        self.ctx.is_speaking = false;
    }

    fn force_stop(&mut self) {
        let was_speaking = self.ctx.is_speaking;
        self.stop_speech();
        if self.ctx.turn.generated_response.is_some() && !self.ctx.turn.spoken {
            self.ctx.turn.spoken = true;
            self.schedule_grace();
        } else if was_speaking {
            self.schedule_grace();
        }
        tracing::info!(turn = %self.ctx.turn.id, "speech force-stopped");
    }

    fn retry(&mut self) {
        let Some(response) = self
            .ctx
            .turn
            .generated_response
            .clone()
            .filter(|r| !r.trim().is_empty())
        else {
            tracing::debug!("nothing to retry");
            return;
        };

        self.stop_speech();
        self.ctx.lock.reset_attempts();
        self.ctx.turn.spoken = false;
        self.ctx.error = None;
        tracing::info!(turn = %self.ctx.turn.id, "retrying response");
        self.begin_speak(response, Origin::Auto, true, None);
    }

    fn clear(&mut self) {
        self.stop_speech();
        if let Some(task) = self.generation_task.take() {
            task.abort();
        }
        self.ctx.is_generating = false;
        self.debounce_generation += 1;
        self.ctx.reset_turn();
        self.ctx.error = None;
        tracing::info!(turn = %self.ctx.turn.id, "conversation cleared");
    }

    async fn shutdown(&mut self) {
        self.user_stopped = true;
        self.recognition.stop().await;
        self.close_stream();
        self.stop_speech();
        if let Some(task) = self.generation_task.take() {
            task.abort();
        }
        self.ctx.is_generating = false;
        self.synthesis.shutdown().await;
        tracing::info!("orchestrator shut down");
    }

    // -- plumbing ---

    fn spawn_initialize(&self) {
        let synthesis = Arc::clone(&self.synthesis);
        let voice_id = self.voice_id.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = synthesis.initialize(voice_id).await;
            let _ = tx.send(Internal::SynthesisInit(result));
        });
    }

    fn schedule(&self, delay: Duration, event: Internal) {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
    }

    /// Record a user-visible failure and return to idle for that activity
    fn fail(&mut self, error: &Error) {
        tracing::warn!(turn = %self.ctx.turn.id, error = %error, "conversation error");
        self.ctx.error = Some(error.to_string());
    }

    fn publish(&self) {
        let session = self.synthesis.session();
        let status = self.ctx.snapshot(session.is_ready(), session.uses_fallback());
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn next_recognition(
    stream: &mut Option<mpsc::Receiver<RecognitionEvent>>,
) -> Option<RecognitionEvent> {
    match stream {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn generate(
    reasoning: &dyn ReasoningClient,
    request: ReasoningRequest,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, reasoning.generate(request)).await {
        Ok(response) => response.map(|r| r.generated_text),
        Err(_) => Err(Error::Timeout(format!(
            "no response within {}s",
            timeout.as_secs()
        ))),
    }
}

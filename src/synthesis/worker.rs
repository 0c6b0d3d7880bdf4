//! Background synthesis worker
//!
//! The worker owns a [`SynthesisEngine`] on its own task and talks to the
//! adapter only through [`WorkerCommand`]s and [`WorkerEvent`]s.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::protocol::{AudioBuffer, AudioPayload, ProgressInfo, VoiceInfo, WorkerCommand, WorkerEvent};
use crate::{Error, Result};

/// Callback for asset download progress while an engine loads
pub type ProgressSink = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// A synthesis engine hosted by the worker
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    /// Engine name for logging
    fn name(&self) -> &'static str;

    /// Load models and select a voice, returning the active voice id
    ///
    /// Return [`Error::EngineUnavailable`] when the engine can never run in
    /// this environment; the worker then asks for main-task synthesis.
    async fn load(&self, voice_id: Option<&str>, progress: ProgressSink) -> Result<String>;

    /// Switch voice on a loaded engine
    async fn set_voice(&self, voice_id: &str) -> Result<()>;

    /// Synthesize text to audio
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer>;

    /// Voices offered by the engine
    async fn voices(&self) -> Result<Vec<VoiceInfo>>;
}

/// Handle to a running worker task
///
/// Dropping the handle terminates the worker.
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Post a command to the worker
    ///
    /// # Errors
    ///
    /// Returns error if the worker has exited
    pub fn post(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ChannelClosed("synthesis worker exited".to_string()))
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a worker hosting `engine`
///
/// Returns the command handle and the stream of events the worker emits.
pub fn spawn_worker(
    engine: Arc<dyn SynthesisEngine>,
) -> (WorkerHandle, mpsc::UnboundedReceiver<WorkerEvent>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let worker = Worker {
        engine,
        events: event_tx,
        loaded_voice: None,
        loaded: false,
        delegate: false,
        in_flight: None,
    };
    let task = tokio::spawn(worker.run(command_rx));

    (
        WorkerHandle {
            commands: command_tx,
            task,
        },
        event_rx,
    )
}

struct Worker {
    engine: Arc<dyn SynthesisEngine>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    loaded_voice: Option<String>,
    loaded: bool,
    /// Engine unavailable; every request is answered with a main-task request
    delegate: bool,
    in_flight: Option<JoinHandle<()>>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<WorkerCommand>) {
        tracing::debug!(engine = self.engine.name(), "synthesis worker started");

        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }

        self.abort_in_flight();
        tracing::debug!(engine = self.engine.name(), "synthesis worker stopped");
    }

    async fn handle(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Init { voice_id } => self.init(voice_id).await,
            WorkerCommand::Speak { text } => self.speak(text),
            WorkerCommand::GetVoices => self.voices().await,
            WorkerCommand::Stop => {
                self.abort_in_flight();
                self.emit(WorkerEvent::Stopped);
            }
        }
    }

    async fn init(&mut self, voice_id: Option<String>) {
        if self.delegate {
            self.emit(WorkerEvent::Ready {
                voice_id,
                uses_fallback: true,
            });
            return;
        }

        if self.loaded {
            match voice_id {
                Some(voice) if self.loaded_voice.as_deref() != Some(voice.as_str()) => {
                    match self.engine.set_voice(&voice).await {
                        Ok(()) => {
                            self.loaded_voice = Some(voice.clone());
                            self.emit(WorkerEvent::VoiceChanged { voice_id: voice });
                        }
                        Err(e) => self.emit(WorkerEvent::Error {
                            message: e.to_string(),
                        }),
                    }
                }
                _ => self.emit(WorkerEvent::Ready {
                    voice_id: self.loaded_voice.clone(),
                    uses_fallback: false,
                }),
            }
            return;
        }

        let events = self.events.clone();
        let progress: ProgressSink = Arc::new(move |p: ProgressInfo| {
            let _ = events.send(WorkerEvent::DownloadProgress {
                loaded: p.loaded,
                total: p.total,
            });
        });

        match self.engine.load(voice_id.as_deref(), progress).await {
            Ok(active) => {
                tracing::info!(engine = self.engine.name(), voice = %active, "engine loaded");
                self.loaded = true;
                self.loaded_voice = Some(active.clone());
                self.emit(WorkerEvent::Ready {
                    voice_id: Some(active),
                    uses_fallback: false,
                });
            }
            Err(Error::EngineUnavailable(reason)) => {
                tracing::warn!(engine = self.engine.name(), %reason, "engine unavailable, delegating to main task");
                self.delegate = true;
                self.emit(WorkerEvent::Ready {
                    voice_id,
                    uses_fallback: true,
                });
            }
            Err(e) => {
                tracing::warn!(engine = self.engine.name(), error = %e, "engine load failed");
                self.emit(WorkerEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    fn speak(&mut self, text: String) {
        self.abort_in_flight();

        if self.delegate {
            self.emit(WorkerEvent::Audio {
                payload: AudioPayload::Request { text },
            });
            return;
        }

        if !self.loaded {
            self.emit(WorkerEvent::Error {
                message: Error::NotInitialized.to_string(),
            });
            return;
        }

        let engine = Arc::clone(&self.engine);
        let events = self.events.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let event = match engine.synthesize(&text).await {
                Ok(buffer) => WorkerEvent::Audio {
                    payload: AudioPayload::Buffer(buffer),
                },
                Err(e) => WorkerEvent::Error {
                    message: e.to_string(),
                },
            };
            let _ = events.send(event);
        }));
    }

    async fn voices(&self) {
        if self.delegate {
            self.emit(WorkerEvent::Voices {
                voices: Vec::new(),
                uses_fallback: true,
            });
            return;
        }

        match self.engine.voices().await {
            Ok(voices) => self.emit(WorkerEvent::Voices {
                voices,
                uses_fallback: false,
            }),
            Err(e) => self.emit(WorkerEvent::Error {
                message: e.to_string(),
            }),
        }
    }

    fn abort_in_flight(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
    }

    fn emit(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("synthesis worker event dropped, adapter gone");
        }
    }
}

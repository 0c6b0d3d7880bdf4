//! Conversation orchestrator
//!
//! One event-loop task per [`Orchestrator`] owns the [`ConversationContext`]
//! and drives `Idle → Recording → Generating → Speaking → Idle`. Callers talk
//! to it through an [`OrchestratorHandle`] and observe it through a `watch`
//! of [`OrchestratorStatus`].

mod actor;
mod lock;
mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

pub use lock::{SpeakGuard, SpeakingLock};
pub use state::{ConversationContext, ConversationState, OrchestratorStatus, Turn};

use crate::config::Config;
use crate::reasoning::ReasoningClient;
use crate::recognition::RecognitionEngine;
use crate::synthesis::SpeechSynthesizer;
use crate::{Error, Result};

/// Requests handled by the event loop
#[derive(Debug)]
pub(crate) enum Command {
    StartRecording,
    StopRecording,
    Speak {
        text: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    ForceStop,
    Retry,
    Clear,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Collaborators an orchestrator coordinates
pub struct Collaborators {
    pub recognition: Arc<dyn RecognitionEngine>,
    pub reasoning: Arc<dyn ReasoningClient>,
    pub synthesis: Arc<dyn SpeechSynthesizer>,
}

/// A running orchestrator
pub struct Orchestrator {
    handle: OrchestratorHandle,
    task: JoinHandle<()>,
}

impl Orchestrator {
    /// Spawn the event loop and begin synthesis initialization
    #[must_use]
    pub fn spawn(config: &Config, collaborators: Collaborators) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (actor, status_rx) = actor::Actor::new(config, collaborators);
        let task = tokio::spawn(actor.run(command_rx));

        Self {
            handle: OrchestratorHandle {
                commands: command_tx,
                status: status_rx,
            },
            task,
        }
    }

    /// A handle for sending commands
    #[must_use]
    pub fn handle(&self) -> OrchestratorHandle {
        self.handle.clone()
    }

    /// Shut down and wait for the event loop to exit
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "orchestrator task ended abnormally");
        }
    }
}

/// Cloneable command interface to an [`Orchestrator`]
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<OrchestratorStatus>,
}

impl OrchestratorHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::ChannelClosed("orchestrator stopped".to_string()))
    }

    /// Begin listening; a pending unspoken response is kept
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator has stopped
    pub async fn start_recording(&self) -> Result<()> {
        self.send(Command::StartRecording).await
    }

    /// Stop listening
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator has stopped
    pub async fn stop_recording(&self) -> Result<()> {
        self.send(Command::StopRecording).await
    }

    /// Speak `text`, or the pending response when `None`
    ///
    /// Resolves once speech has started.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SpeakingLockHeld`] if something is already speaking,
    /// or the synthesis error if speech could not start
    pub async fn speak(&self, text: Option<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Speak { text, reply }).await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("orchestrator stopped".to_string()))?
    }

    /// Cancel speech and mark the turn spoken
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator has stopped
    pub async fn force_stop(&self) -> Result<()> {
        self.send(Command::ForceStop).await
    }

    /// Reset the breaker and speak the pending response again
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator has stopped
    pub async fn retry(&self) -> Result<()> {
        self.send(Command::Retry).await
    }

    /// Discard the turn and stop any speech
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator has stopped
    pub async fn clear(&self) -> Result<()> {
        self.send(Command::Clear).await
    }

    /// Stop recognition and speech and end the event loop
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Latest status snapshot
    #[must_use]
    pub fn status(&self) -> OrchestratorStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status changes
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<OrchestratorStatus> {
        self.status.clone()
    }
}

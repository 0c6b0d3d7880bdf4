//! Line-based recognition for terminals and scripted input

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use super::{RecognitionEngine, RecognitionEvent, Segment};
use crate::config::RecognitionConfig;
use crate::{Error, Result};

type BoxedReader = Box<dyn AsyncBufRead + Unpin + Send>;

/// Treats each input line as one finalized utterance
///
/// The reader survives across streams so stop/start does not lose input.
/// End of input ends the stream and later starts are refused.
pub struct LineRecognizer {
    lines: Arc<Mutex<Lines<BoxedReader>>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    exhausted: watch::Sender<bool>,
}

impl LineRecognizer {
    /// Recognize lines from `reader`
    #[must_use]
    pub fn new(reader: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        let boxed: BoxedReader = Box::new(reader);
        let (exhausted, _) = watch::channel(false);
        Self {
            lines: Arc::new(Mutex::new(boxed.lines())),
            task: std::sync::Mutex::new(None),
            exhausted,
        }
    }

    /// Recognize lines typed on stdin
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }

    /// Resolves to `true` once input has ended
    #[must_use]
    pub fn exhausted(&self) -> watch::Receiver<bool> {
        self.exhausted.subscribe()
    }

    fn abort_task(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

#[async_trait]
impl RecognitionEngine for LineRecognizer {
    fn name(&self) -> &'static str {
        "line"
    }

    async fn start(&self, config: &RecognitionConfig) -> Result<mpsc::Receiver<RecognitionEvent>> {
        if *self.exhausted.borrow() {
            return Err(Error::Recognition {
                code: "no-input".to_string(),
                message: "input has ended".to_string(),
            });
        }
        self.abort_task();

        let (tx, rx) = mpsc::channel(16);
        let lines = Arc::clone(&self.lines);
        let exhausted = self.exhausted.clone();
        tracing::debug!(language = %config.language, "line recognition started");

        let task = tokio::spawn(async move {
            let mut lines = lines.lock().await;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        let event = RecognitionEvent::Results(vec![Segment::finalized(text)]);
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        exhausted.send_replace(true);
                        let _ = tx.send(RecognitionEvent::Ended).await;
                        return;
                    }
                    Err(e) => {
                        let _ = tx
                            .send(RecognitionEvent::Error {
                                code: "audio-capture".to_string(),
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }
        });
        *self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(task);

        Ok(rx)
    }

    async fn stop(&self) {
        self.abort_task();
    }
}

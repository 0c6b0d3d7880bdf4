//! Audio playback to speakers

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::oneshot;

use super::{AudioSink, Playback, PlaybackEnd, PlaybackNotifier};
use crate::synthesis::AudioBuffer;
use crate::{Error, Result};

/// Plays audio to the default output device
///
/// Each `play` opens a stream on a dedicated thread; `stop` silences it and
/// resolves its [`Playback`] as interrupted.
pub struct DevicePlayback {
    channels: u16,
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl DevicePlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let channels = device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?
            .channels();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            channels,
            "audio playback initialized"
        );

        Ok(Self {
            channels,
            current: Mutex::new(None),
        })
    }

    fn replace_current(&self, flag: Option<Arc<AtomicBool>>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            previous.store(true, Ordering::SeqCst);
        }
        *current = flag;
    }
}

#[async_trait]
impl AudioSink for DevicePlayback {
    async fn play(&self, buffer: AudioBuffer) -> Result<Playback> {
        if buffer.is_empty() {
            return Ok(Playback::ended(PlaybackEnd::Completed));
        }

        let stop = Arc::new(AtomicBool::new(false));
        self.replace_current(Some(Arc::clone(&stop)));

        let (notifier, playback) = Playback::channel();
        let (started_tx, started_rx) = oneshot::channel();
        let channels = self.channels;

        std::thread::spawn(move || {
            play_blocking(&buffer, channels, &stop, started_tx, notifier);
        });

        started_rx
            .await
            .map_err(|_| Error::Audio("playback thread exited".to_string()))??;
        Ok(playback)
    }

    fn stop(&self) {
        self.replace_current(None);
    }
}

fn play_blocking(
    buffer: &AudioBuffer,
    channels: u16,
    stop: &AtomicBool,
    started: oneshot::Sender<Result<()>>,
    notifier: PlaybackNotifier,
) {
    let (stream, finished) = match open_stream(buffer, channels) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = started.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = started.send(Err(Error::Audio(e.to_string())));
        return;
    }
    let _ = started.send(Ok(()));

    // Poll for completion with a margin past the nominal duration
    let start = Instant::now();
    let timeout = buffer.duration() + Duration::from_millis(500);
    let end = loop {
        if stop.load(Ordering::SeqCst) {
            break PlaybackEnd::Interrupted;
        }
        if finished.load(Ordering::SeqCst) || start.elapsed() > timeout {
            break PlaybackEnd::Completed;
        }
        std::thread::sleep(Duration::from_millis(20));
    };

    drop(stream);
    tracing::debug!(samples = buffer.samples.len(), ?end, "playback ended");
    notifier.finish(end);
}

fn open_stream(buffer: &AudioBuffer, channels: u16) -> Result<(cpal::Stream, Arc<AtomicBool>)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(buffer.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let frame_width = usize::from(channels.max(1));

    let samples = Arc::new(buffer.samples.clone());
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let finished_cb = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(frame_width) {
                    let pos = position.load(Ordering::Relaxed);
                    let sample = samples.get(pos).copied().unwrap_or_else(|| {
                        finished_cb.store(true, Ordering::SeqCst);
                        0.0
                    });
                    frame.fill(sample);
                    if pos < samples.len() {
                        position.store(pos + 1, Ordering::Relaxed);
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    Ok((stream, finished))
}

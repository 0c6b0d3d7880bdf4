//! WAV file output

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::{AudioSink, Playback, PlaybackEnd};
use crate::synthesis::AudioBuffer;
use crate::{Error, Result};

/// Convert f32 samples to 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Writes each utterance to a numbered WAV file
///
/// Useful on headless machines; playback completes as soon as the file is written.
#[derive(Debug)]
pub struct WavFileSink {
    dir: PathBuf,
    counter: AtomicU64,
    last: Mutex<Option<PathBuf>>,
}

impl WavFileSink {
    /// Create a sink writing into `dir`, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
            last: Mutex::new(None),
        })
    }

    /// Output directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the most recently written file
    #[must_use]
    pub fn last_written(&self) -> Option<PathBuf> {
        self.last.lock().ok().and_then(|p| p.clone())
    }
}

#[async_trait]
impl AudioSink for WavFileSink {
    async fn play(&self, buffer: AudioBuffer) -> Result<Playback> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let path = self.dir.join(format!("speech-{stamp}-{n:04}.wav"));

        let wav = samples_to_wav(&buffer.samples, buffer.sample_rate)?;
        tokio::fs::write(&path, wav).await?;

        tracing::info!(
            path = %path.display(),
            duration_ms = buffer.duration().as_millis(),
            "speech written"
        );
        if let Ok(mut last) = self.last.lock() {
            *last = Some(path);
        }

        Ok(Playback::ended(PlaybackEnd::Completed))
    }

    fn stop(&self) {}
}

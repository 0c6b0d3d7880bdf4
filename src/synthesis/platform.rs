//! espeak-backed platform speech

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;

use super::fallback::{PlatformSpeech, SpeechErrorKind, Utterance, UtteranceEvent, UtteranceHandle};
use super::protocol::VoiceInfo;
use crate::{Error, Result};

/// Programs tried in order when none is configured
const CANDIDATES: &[&str] = &["espeak-ng", "espeak"];

/// Speaks by running an espeak-compatible command per utterance
pub struct CommandSpeech {
    program: PathBuf,
    cancel: watch::Sender<u64>,
}

impl CommandSpeech {
    /// Use the given program
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let (cancel, _) = watch::channel(0);
        Self {
            program: program.into(),
            cancel,
        }
    }

    /// Find `preferred`, or the first espeak variant on `PATH`
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineUnavailable`] if no program is found
    pub fn locate(preferred: Option<&str>) -> Result<Self> {
        let found = preferred
            .map_or_else(|| CANDIDATES.to_vec(), |p| vec![p])
            .into_iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| Error::EngineUnavailable("no espeak program found on PATH".to_string()))?;

        tracing::debug!(program = %found.display(), "platform speech located");
        Ok(Self::new(found))
    }

    /// Program in use
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl PlatformSpeech for CommandSpeech {
    fn name(&self) -> &'static str {
        "espeak"
    }

    async fn speak(&self, utterance: Utterance) -> Result<UtteranceHandle> {
        let mut command = Command::new(&self.program);
        // espeak amplitude runs 0..=200 with 100 as normal
        #[allow(clippy::cast_possible_truncation)]
        let amplitude = (utterance.volume.clamp(0.0, 2.0) * 100.0).round() as i32;
        command.arg("-a").arg(amplitude.to_string());
        if let Some(voice) = &utterance.voice {
            command.arg("-v").arg(voice);
        }
        command
            .arg("--stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::Synthesis(format!("failed to run {}: {e}", self.program.display())))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(utterance.text.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let (tx, handle) = UtteranceHandle::channel();
        let _ = tx.send(UtteranceEvent::Start);

        let mut cancel = self.cancel.subscribe();
        cancel.mark_unchanged();
        tokio::spawn(async move {
            let event = tokio::select! {
                status = child.wait() => match status {
                    Ok(s) if s.success() => UtteranceEvent::End,
                    Ok(s) => UtteranceEvent::Error(SpeechErrorKind::Other(format!("speech exited with {s}"))),
                    Err(e) => UtteranceEvent::Error(SpeechErrorKind::Other(e.to_string())),
                },
                _ = cancel.changed() => {
                    let _ = child.kill().await;
                    UtteranceEvent::Error(SpeechErrorKind::Interrupted)
                }
            };
            let _ = tx.send(event);
        });

        Ok(handle)
    }

    fn cancel(&self) {
        self.cancel.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    async fn voices(&self) -> Vec<VoiceInfo> {
        match Command::new(&self.program).arg("--voices").output().await {
            Ok(output) if output.status.success() => {
                parse_voice_list(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                tracing::warn!(status = %output.status, "voice listing failed");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "voice listing failed");
                Vec::new()
            }
        }
    }
}

/// Parse `espeak --voices` output
///
/// Columns are `Pty Language Age/Gender VoiceName File [Other Languages]`;
/// the header line is skipped.
#[must_use]
pub fn parse_voice_list(output: &str) -> Vec<VoiceInfo> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let _priority = columns.next()?;
            let language = columns.next()?;
            let _age_gender = columns.next()?;
            let name = columns.next()?;
            Some(VoiceInfo::new(
                language,
                name.replace('_', " "),
                Some(language.to_string()),
            ))
        })
        .collect()
}

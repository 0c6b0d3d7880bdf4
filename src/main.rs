use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_voice::playback::AudioSink;
use beacon_voice::synthesis::{PlatformSpeech, SynthesisEngine};
use beacon_voice::{
    AssetPrecache, Collaborators, CommandSpeech, Config, ConversationState, FallbackSynthesizer,
    GeminiClient, HttpSynthesisEngine, LineRecognizer, Orchestrator, OrchestratorStatus,
    SpeechSynthesizer, SynthesisAdapter, WavFileSink,
};

/// Beacon Voice - conversational voice assistant core
#[derive(Parser)]
#[command(name = "beacon-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to ~/.config/omni/beacon-voice/config.toml)
    #[arg(short, long, env = "BEACON_VOICE_CONFIG")]
    config: Option<PathBuf>,

    /// Skip the synthesis worker and use platform speech only
    #[arg(long)]
    fallback_only: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Converse using typed lines as recognized speech (default)
    Chat,
    /// Speak a line of text
    Speak {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the speech output.")]
        text: String,
    },
    /// List available voices
    Voices,
    /// Download configured model assets into the cache
    Precache,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_voice=info",
        1 => "info,beacon_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = cli
        .config
        .as_deref()
        .map_or_else(Config::load, Config::load_from);
    if cli.fallback_only {
        config.voice.fallback_only = true;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(config).await,
        Command::Speak { text } => speak(&config, &text).await,
        Command::Voices => voices(&config).await,
        Command::Precache => precache(&config).await,
    }
}

/// Run a conversation with stdin lines standing in for recognized speech
async fn chat(mut config: Config) -> anyhow::Result<()> {
    // Line input cannot be reopened once it ends
    config.recognition.auto_restart = false;

    let recognizer = Arc::new(LineRecognizer::stdin());
    let reasoning = Arc::new(GeminiClient::new(&config.llm)?);
    let synthesis = build_synthesizer(&config)?;

    if !config.assets.urls.is_empty() {
        let precache = Arc::new(AssetPrecache::new(&config.assets.cache_dir));
        drop(precache.spawn_preload_all(config.assets.urls.clone()));
    }

    let orchestrator = Orchestrator::spawn(
        &config,
        Collaborators {
            recognition: recognizer.clone(),
            reasoning,
            synthesis,
        },
    );
    let handle = orchestrator.handle();
    let mut status = handle.watch();
    let mut exhausted = recognizer.exhausted();
    let mut input_done = false;
    let mut printed = Printed::default();

    handle.start_recording().await?;
    println!("Type a question and press enter (Ctrl-D to quit).");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                printed.report(&current);
                if input_done && is_settled(&current) {
                    break;
                }
            }
            changed = exhausted.changed(), if !input_done => {
                input_done = changed.is_err() || *exhausted.borrow();
                if input_done && is_settled(&handle.status()) {
                    break;
                }
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

/// No turn is in progress
fn is_settled(status: &OrchestratorStatus) -> bool {
    status.state == ConversationState::Idle
        && status.response.is_none()
        && (status.transcript.trim().is_empty() || status.error.is_some())
}

/// Tracks what the chat loop has already shown
#[derive(Default)]
struct Printed {
    response: Option<String>,
    error: Option<String>,
}

impl Printed {
    fn report(&mut self, status: &OrchestratorStatus) {
        if status.response != self.response {
            if let Some(response) = &status.response {
                println!("assistant: {response}");
            }
            self.response.clone_from(&status.response);
        }

        if status.error != self.error {
            if let Some(error) = &status.error {
                eprintln!("error: {error}");
            }
            self.error.clone_from(&status.error);
        }
    }
}

/// Speak a single line
async fn speak(config: &Config, text: &str) -> anyhow::Result<()> {
    let synthesis = build_synthesizer(config)?;
    let info = synthesis.initialize(config.voice.voice_id.clone()).await?;
    println!(
        "Speaking with {}",
        if info.uses_fallback { "platform speech" } else { "synthesis worker" }
    );

    let playback = synthesis.speak(text).await?;
    let end = playback.finished().await;
    println!("Playback ended: {end:?}");

    synthesis.shutdown().await;
    Ok(())
}

/// Print the voices the active backend offers
async fn voices(config: &Config) -> anyhow::Result<()> {
    let synthesis = build_synthesizer(config)?;
    let info = synthesis.initialize(config.voice.voice_id.clone()).await?;
    let voices = synthesis.list_voices().await?;

    println!(
        "{} voice(s){}:",
        voices.len(),
        if info.uses_fallback { " (platform speech)" } else { "" }
    );
    for voice in voices {
        match voice.language {
            Some(language) => println!("  {:<16} {} [{language}]", voice.id, voice.name),
            None => println!("  {:<16} {}", voice.id, voice.name),
        }
    }

    synthesis.shutdown().await;
    Ok(())
}

/// Warm the asset cache
async fn precache(config: &Config) -> anyhow::Result<()> {
    if config.assets.urls.is_empty() {
        println!("No asset URLs configured ([assets] urls in config.toml)");
        return Ok(());
    }

    let precache = AssetPrecache::new(&config.assets.cache_dir);
    let mut failed = 0usize;
    for url in &config.assets.urls {
        let result = precache
            .preload_with_progress(url, |p| {
                if let Some(fraction) = p.fraction() {
                    tracing::debug!(url = %url, percent = (fraction * 100.0).round(), "downloading");
                }
            })
            .await;
        match result {
            Ok(path) => println!("cached {url} -> {}", path.display()),
            Err(e) => {
                failed += 1;
                eprintln!("failed {url}: {e}");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} asset(s) failed to download");
    }
    Ok(())
}

fn build_synthesizer(config: &Config) -> anyhow::Result<Arc<SynthesisAdapter>> {
    let engine: Option<Arc<dyn SynthesisEngine>> = if config.voice.fallback_only {
        None
    } else {
        Some(Arc::new(HttpSynthesisEngine::new(
            config.voice.tts_base_url.clone(),
            config.voice.tts_api_key.clone(),
            config.voice.tts_model.clone(),
        )))
    };

    let preferred = config.voice.fallback_command.as_deref();
    let platform: Arc<dyn PlatformSpeech> = Arc::new(
        CommandSpeech::locate(preferred).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "platform speech not found, fallback will fail");
            CommandSpeech::new(preferred.unwrap_or("espeak-ng"))
        }),
    );
    let fallback = FallbackSynthesizer::new(
        platform,
        config.timing.onset_timeout,
        config.timing.voices_wait,
    );

    Ok(Arc::new(SynthesisAdapter::new(
        engine,
        fallback,
        build_sink(config)?,
        config.timing.init_timeout,
    )))
}

fn build_sink(config: &Config) -> anyhow::Result<Arc<dyn AudioSink>> {
    if config.playback.device {
        if let Some(device) = device_sink() {
            return Ok(device);
        }
    }

    let sink = WavFileSink::new(&config.playback.output_dir)?;
    tracing::info!(dir = %sink.dir().display(), "speech output directory");
    Ok(Arc::new(sink))
}

#[cfg(feature = "device-audio")]
fn device_sink() -> Option<Arc<dyn AudioSink>> {
    match beacon_voice::playback::DevicePlayback::new() {
        Ok(device) => Some(Arc::new(device)),
        Err(e) => {
            tracing::warn!(error = %e, "no audio device, writing WAV files");
            None
        }
    }
}

#[cfg(not(feature = "device-audio"))]
fn device_sink() -> Option<Arc<dyn AudioSink>> {
    tracing::warn!("built without device-audio, writing WAV files");
    None
}

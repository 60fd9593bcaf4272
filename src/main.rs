use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voxlet::avatar::AvatarClient;
use voxlet::config::{
    AvatarProvider, AvatarSettings, Config, TtsProvider, TtsSettings, WebhookMode,
    WebhookSettings,
};
use voxlet::speech::{MuteSynthesizer, SpeechOutput, Synthesizer, TextToSpeech};
use voxlet::voice::engine::HttpEngineProvider;
use voxlet::voice::recorder::SttChunkTranscriber;
use voxlet::voice::stt::SpeechToText;
use voxlet::voice::{CpalMicrophone, Microphone, SessionBuilder};
use voxlet::webhook::WebhookClient;
use voxlet::Conversation;

/// Voxlet - voice-driven conversational assistant
#[derive(Parser)]
#[command(name = "voxlet", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive first-run setup
    Setup,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,voxlet=info",
        1 => "info,voxlet=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
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
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Setup => setup(),
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&text).await,
        };
    }

    let Some(config) = Config::load()? else {
        anyhow::bail!(
            "no configuration found at {} - run `voxlet setup` first",
            Config::path().display()
        );
    };

    run_assistant(config).await
}

/// Wire the session, orchestrator, and speech output together and run
async fn run_assistant(config: Config) -> anyhow::Result<()> {
    let synth: Arc<dyn Synthesizer> = match TextToSpeech::from_settings(&config.tts) {
        Ok(tts) => Arc::new(tts),
        Err(e) => {
            tracing::warn!(error = %e, "TTS unavailable, speech output muted");
            Arc::new(MuteSynthesizer)
        }
    };
    let speech = SpeechOutput::new(synth, config.tts.speed);

    let backend = Arc::new(WebhookClient::from_settings(&config.webhook)?);
    let avatar = config
        .avatar
        .as_ref()
        .map(|settings| Arc::new(AvatarClient::from_settings(settings)));

    let mut conversation = Conversation::new(
        backend,
        speech.clone(),
        avatar,
        config.tuning.interrupt_debounce(),
    );

    let mic: Arc<dyn Microphone> = Arc::new(CpalMicrophone::new());
    let mut builder = SessionBuilder::new(mic).tuning(config.tuning.clone());

    if let Some(stt) = SpeechToText::from_env().map(Arc::new) {
        tracing::info!("streaming recognition enabled");
        builder = builder
            .engine_provider(Arc::new(HttpEngineProvider::new(Arc::clone(&stt))))
            .chunk_transcriber(Arc::new(SttChunkTranscriber::new(stt)));
    } else {
        tracing::warn!("no STT key in environment, falling back to offline phrases");
    }

    let (transcript_tx, mut transcript_rx) = tokio::sync::mpsc::unbounded_channel();
    let session = builder.build(transcript_tx);

    session.start().await?;
    conversation.greet(&config.greeting);

    let mut status_interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            Some(result) = transcript_rx.recv() => {
                conversation.handle_transcript(&result).await;
            }
            _ = status_interval.tick() => {
                tracing::trace!(
                    level = session.audio_level(),
                    recording = session.is_recording(),
                    "session status"
                );
                if let Some(error) = session.last_error() {
                    tracing::debug!(kind = %error.kind, message = %error.message, "last session error");
                }
            }
        }
    }

    session.stop();
    Ok(())
}

/// Interactive first-run configuration
fn setup() -> anyhow::Result<()> {
    use dialoguer::{Confirm, Input, Password, Select};

    println!("Voxlet setup\n");

    let url: String = Input::new()
        .with_prompt("Webhook URL")
        .validate_with(|input: &String| {
            url::Url::parse(input).map(|_| ()).map_err(|e| e.to_string())
        })
        .interact_text()?;

    let api_key: String = Password::new()
        .with_prompt("Webhook API key (optional, empty to skip)")
        .allow_empty_password(true)
        .interact()?;

    let mode = match Select::new()
        .with_prompt("Webhook mode")
        .items(&["standard", "popup"])
        .default(0)
        .interact()?
    {
        1 => WebhookMode::Popup,
        _ => WebhookMode::Standard,
    };

    let tts_provider = match Select::new()
        .with_prompt("TTS provider")
        .items(&["openai", "elevenlabs"])
        .default(0)
        .interact()?
    {
        1 => TtsProvider::ElevenLabs,
        _ => TtsProvider::OpenAI,
    };

    let tts_key: String = Password::new()
        .with_prompt("TTS API key (optional, empty mutes speech)")
        .allow_empty_password(true)
        .interact()?;

    let voice: String = Input::new()
        .with_prompt("TTS voice")
        .default("alloy".to_string())
        .interact_text()?;

    let avatar = if Confirm::new()
        .with_prompt("Enable talking avatar video?")
        .default(false)
        .interact()?
    {
        let provider = match Select::new()
            .with_prompt("Avatar provider")
            .items(&["did", "heygen"])
            .default(0)
            .interact()?
        {
            1 => AvatarProvider::Heygen,
            _ => AvatarProvider::Did,
        };

        let avatar_key: String = Password::new()
            .with_prompt("Avatar API key (optional, empty uses demo stream)")
            .allow_empty_password(true)
            .interact()?;

        Some(AvatarSettings {
            provider,
            api_key: (!avatar_key.is_empty()).then_some(avatar_key),
            avatar_url: None,
            voice_id: None,
        })
    } else {
        None
    };

    let config = Config {
        webhook: WebhookSettings {
            url,
            api_key: (!api_key.is_empty()).then_some(api_key),
            mode,
        },
        tts: TtsSettings {
            provider: tts_provider,
            voice,
            speed: 1.0,
            api_key: (!tts_key.is_empty()).then_some(tts_key),
        },
        avatar,
        greeting: "Hello! I am your voice assistant. How may I help you today?".to_string(),
        tuning: voxlet::config::Tuning::default(),
    };

    config.save()?;
    println!("\nConfiguration written to {}", Config::path().display());
    Ok(())
}

/// Capture for `duration` seconds and report levels
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    let mic = CpalMicrophone::new();
    let stream = mic.open().await?;

    println!("Recording for {duration}s, speak into the microphone...");

    let mut peak: f32 = 0.0;
    for _ in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let samples = stream.take_samples();
        let rms = if samples.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let mean_sq = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
            mean_sq.sqrt()
        };
        peak = peak.max(rms);
        println!("  level: {rms:.4}");
    }

    stream.stop();
    println!("Peak level: {peak:.4}");

    if peak < 0.001 {
        println!("No signal detected - check the input device.");
    }
    Ok(())
}

/// Play a short tone through the default output device
async fn test_speaker() -> anyhow::Result<()> {
    println!("Playing test tone...");
    tokio::task::spawn_blocking(|| voxlet::voice::playback::play_tone(440.0, 1.0)).await??;
    println!("Done.");
    Ok(())
}

/// Synthesize and play a phrase using the configured TTS provider
async fn test_tts(text: &str) -> anyhow::Result<()> {
    let Some(config) = Config::load()? else {
        anyhow::bail!("no configuration found - run `voxlet setup` first");
    };

    let tts = TextToSpeech::from_settings(&config.tts)?;
    println!("Speaking: {text}");
    tts.speak(text, config.tts.speed).await?;
    Ok(())
}

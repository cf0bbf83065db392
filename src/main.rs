use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hivoice::live::{GeminiConnector, GeminiTextClient};
use hivoice::session::{Session, SessionConfig, Signal};
use hivoice::turn::{TurnAssistant, TurnConfig};
use hivoice::voice::{
    AudioChunk, AudioPlayback, CloudRecognizer, CpalDevice, Loudspeaker, Microphone,
    OUTPUT_SAMPLE_RATE, SpeechToText, TextToSpeech, f32_to_i16, recognizer::calculate_energy,
};
use hivoice::Config;

/// Hivoice - wake-word gated voice assistant for live generative models
#[derive(Parser)]
#[command(name = "hivoice", version, about)]
struct Cli {
    /// Live model id (overrides `HIVOICE_MODEL`)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Wake phrase; repeat to set several (replaces the configured list)
    #[arg(long = "wake-phrase", global = true)]
    wake_phrases: Vec<String>,

    /// Exit phrase; repeat to set several (replaces the configured list)
    #[arg(long = "exit-phrase", global = true)]
    exit_phrases: Vec<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Turn-based assistant: speak a question, hear the answer, say "stop" to interrupt
    Turn,
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
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info",
        1 => "info,hivoice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::TestMic { duration }) = cli.command {
        return test_mic(duration).await;
    }
    if let Some(Command::TestSpeaker) = cli.command {
        return test_speaker().await;
    }

    let mut config = Config::load()?;
    apply_overrides(&mut config, &cli)?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Some(Command::TestTts { text }) => test_tts(&config, &text).await,
        Some(Command::Turn) => run_turn(&config).await,
        _ => run_live(&config).await,
    }
}

/// CLI flags take precedence over everything else
fn apply_overrides(config: &mut Config, cli: &Cli) -> hivoice::Result<()> {
    if let Some(model) = &cli.model {
        config.live.model.clone_from(model);
    }
    if !cli.wake_phrases.is_empty() {
        config.phrases.wake.clone_from(&cli.wake_phrases);
    }
    if !cli.exit_phrases.is_empty() {
        config.phrases.exit.clone_from(&cli.exit_phrases);
    }
    config.validate()
}

/// Raise `exit` on ctrl-c
fn exit_on_ctrl_c(exit: Signal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            exit.set();
        }
    });
}

fn speech_to_text(config: &Config) -> hivoice::Result<SpeechToText> {
    let provider = config.voice.stt_provider;
    SpeechToText::new(
        provider,
        config.api_keys.stt(provider),
        config.voice.stt_model.clone(),
    )
}

fn text_to_speech(config: &Config) -> hivoice::Result<TextToSpeech> {
    let provider = config.voice.tts_provider;
    TextToSpeech::new(
        provider,
        config.api_keys.tts(provider),
        config.voice.tts_model.clone(),
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
    )
}

/// Full-duplex live session
async fn run_live(config: &Config) -> anyhow::Result<()> {
    let connector = GeminiConnector::new(&config.live.url, config.api_keys.gemini()?)?;
    let transcriber = speech_to_text(config)?;

    let session = Session::new(
        SessionConfig::from_config(config)?,
        Arc::new(CpalDevice::new()),
        Arc::new(connector),
        Arc::new(transcriber),
    );
    exit_on_ctrl_c(session.exit_signal());

    tracing::info!(
        model = %config.live.model,
        wake = ?config.phrases.wake,
        "starting live session"
    );
    session.run().await?;
    Ok(())
}

/// Turn-based assistant with barge-in
async fn run_turn(config: &Config) -> anyhow::Result<()> {
    let generator = GeminiTextClient::new(config.live.text_model.clone(), config.api_keys.gemini()?);
    let transcriber = Arc::new(speech_to_text(config)?);
    let synthesizer = text_to_speech(config)?;
    let output = AudioPlayback::new()?;

    let microphone = Microphone::open(&CpalDevice::new())?;
    let recognizer =
        CloudRecognizer::new(microphone, transcriber, config.listen.phrase_time_limit());

    let exit = Signal::new();
    exit_on_ctrl_c(exit.clone());

    tracing::info!(model = %config.live.text_model, "starting turn-based assistant");
    TurnAssistant::new(
        TurnConfig::from_config(config)?,
        Box::new(recognizer),
        Arc::new(generator),
        Arc::new(synthesizer),
        Box::new(output),
    )
    .run(exit)
    .await?;
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let microphone = Microphone::open(&CpalDevice::new())?;
    println!("---");

    for i in 0..duration {
        let second = Instant::now();
        let mut samples = Vec::new();
        while second.elapsed() < Duration::from_secs(1) {
            samples.extend(microphone.read_frame().await?.to_f32());
        }

        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    microphone.close().await;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave, streamed the way model audio is
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let speaker = Loudspeaker::open(&CpalDevice::new())?;

    let frequency = 440.0_f32;
    let num_samples = OUTPUT_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<i16> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / OUTPUT_SAMPLE_RATE as f32;
            f32_to_i16((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3)
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), OUTPUT_SAMPLE_RATE);

    // 100ms frames, like streamed model audio
    for frame in samples.chunks(OUTPUT_SAMPLE_RATE as usize / 10) {
        speaker
            .write(AudioChunk::from_samples(frame).into_bytes())
            .await?;
    }
    speaker.close().await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = text_to_speech(config)?;

    println!("Synthesizing speech...");
    let mp3_data = tts.synthesize_mp3(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    println!("Playing audio...");
    let mut playback = AudioPlayback::new()?;
    playback.play_mp3(&mp3_data).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use apex_voice::history::JsonHistoryStore;
use apex_voice::session::SessionSnapshot;
use apex_voice::voice::{
    AudioCapture, AudioPlayback, AudioSink, MicTap, Microphone, SAMPLE_RATE, SYNTH_SAMPLE_RATE,
    SpectrumAnalyser, calculate_energy, level_from_bins,
};
use apex_voice::{Config, Session, Status};

/// Apex - talk to the Apex assistant
#[derive(Parser)]
#[command(name = "apex", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a voice conversation (default)
    Talk {
        /// Voice stream URL
        #[arg(long, env = "APEX_SERVER_URL")]
        url: Option<String>,

        /// Continue this conversation instead of the most recent one
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// List synthesis voices and the voice chosen per language
    Voices,
    /// List stored conversations, most recent first
    History,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,apex_voice=info",
        1 => "info,apex_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command.unwrap_or(Command::Talk {
        url: None,
        conversation: None,
    }) {
        Command::Talk { url, conversation } => {
            if let Some(url) = url {
                config.server.url = url;
            }
            talk(&config, conversation.as_deref()).await
        }
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::Voices => {
            list_voices(&config);
            Ok(())
        }
        Command::History => list_history(&config),
    }
}

#[allow(clippy::future_not_send)]
async fn talk(config: &Config, conversation: Option<&str>) -> anyhow::Result<()> {
    let (session, mut handle) = Session::connect(config, conversation).await?;

    let mut snapshots = handle.snapshots();
    let display = tokio::spawn(async move {
        let mut last = snapshots.borrow_and_update().clone();
        print_banner(&last);
        while snapshots.changed().await.is_ok() {
            let current = snapshots.borrow_and_update().clone();
            print_changes(&last, &current);
            last = current;
        }
    });

    let input = async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().eq_ignore_ascii_case("q") => break,
                    Ok(Some(_)) => handle.toggle_microphone(),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin closed");
                        break;
                    }
                },
                Some(notice) = handle.next_notice() => println!("! {notice}"),
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        handle.exit();
    };

    let (machine, ()) = tokio::join!(session.run(), input);
    display.abort();

    println!("Conversation saved as {}", machine.snapshot().conversation_id);
    Ok(())
}

fn print_banner(snapshot: &SessionSnapshot) {
    println!("Apex voice");
    println!("  conversation: {}", snapshot.conversation_id);
    println!(
        "  voice stream: {}",
        if snapshot.connected { "connected" } else { "disconnected" }
    );
    println!("Press Enter to start or stop the microphone, q to quit.\n");
}

fn print_changes(last: &SessionSnapshot, current: &SessionSnapshot) {
    if current.connected != last.connected && !current.connected {
        println!("! voice stream disconnected");
    }
    if current.status != last.status {
        let hint = match current.status {
            Status::Idle => "microphone off",
            Status::Listening => "go ahead",
            Status::Thinking | Status::Speaking => "",
        };
        println!("[{}] {hint}", current.status);
    }
    if current.current_transcript != last.current_transcript
        && !current.current_transcript.is_empty()
    {
        println!("  you: {}", current.current_transcript);
    }
    if current.emotion != last.emotion
        && let Some(emotion) = &current.emotion
    {
        let language = current.language.as_deref().unwrap_or("?");
        println!("  mood: {emotion} ({language})");
    }
}

#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let tap = MicTap::default();
    let mut capture = AudioCapture::new(tap.clone())?;
    capture.open()?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    let mut analyser = SpectrumAnalyser::new(256);
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = tap.take_pending();
        let energy = calculate_energy(&samples);
        let level = level_from_bins(&analyser.byte_frequency_data(&tap.latest(256)), 128.0);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (level * 50.0).clamp(0.0, 50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Level: {level:.2} | [{meter}]", i + 1);
    }

    capture.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = Arc::new(AudioPlayback::new()?);

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..SYNTH_SAMPLE_RATE * 2)
        .map(|i| {
            let t = i as f32 / SYNTH_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), playback.sample_rate());

    let stop = Arc::new(AtomicBool::new(false));
    let sink = Arc::clone(&playback);
    tokio::task::spawn_blocking(move || sink.play(samples, &stop)).await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

fn list_voices(config: &Config) {
    let policy = config.output.voice_policy();
    let voices = &config.output.voices;

    println!("Voices ({}):", voices.len());
    for voice in voices {
        println!("  {:<32} {}", voice.name, voice.lang);
    }

    println!("\nSelection:");
    let mut labels: Vec<Option<&str>> = vec![None];
    labels.extend(config.output.designated.iter().map(|d| Some(d.language.as_str())));
    for label in labels {
        let shown = label.unwrap_or("(none)");
        match policy.select(voices, label) {
            Some((voice, rule)) => println!("  {shown:<8} -> {} ({}) via {rule}", voice.name, voice.lang),
            None => println!("  {shown:<8} -> no voice"),
        }
    }
}

fn list_history(config: &Config) -> anyhow::Result<()> {
    let store = JsonHistoryStore::new(config.history.path.clone());
    let conversations = store.conversations()?;

    if conversations.is_empty() {
        println!("No conversations in {}", store.path().display());
        return Ok(());
    }

    for conversation in conversations {
        println!(
            "{}  {:<34} {:>3} messages  {}",
            conversation.id,
            conversation.title,
            conversation.messages.len(),
            conversation.updated_at.format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

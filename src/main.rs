use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use aurea_voice::voice::{
    AudioSegment, CapturePipeline, CpalMicrophone, PlaybackScheduler, SpeakerOutput,
    samples_to_wav,
};
use aurea_voice::{
    Config, Error, HttpBackend, SessionController, SessionState, UiEvent, WebSocketConnector,
};

/// Aurea - Realtime voice assistant client
#[derive(Parser)]
#[command(name = "aurea", version, about)]
struct Cli {
    /// Backend serving /config and /token
    #[arg(long, env = "AUREA_BACKEND_URL")]
    backend_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone capture
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the captured audio to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test gapless speaker playback
    TestSpeaker,
    /// Print the resolved configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,aurea_voice=info",
        1 => "info,aurea_voice=debug",
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = cli.backend_url.as_deref() {
        config = config.with_backend_url(url);
        config.validate()?;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Some(Command::TestMic { duration, output }) => test_mic(&config, duration, output).await,
        Some(Command::TestSpeaker) => test_speaker(&config).await,
        Some(Command::ShowConfig) => {
            show_config(&config);
            Ok(())
        }
        None => interactive(config).await,
    }
}

/// Interactive voice session driven from the keyboard
#[allow(clippy::future_not_send)]
async fn interactive(config: Config) -> anyhow::Result<()> {
    let output = SpeakerOutput::new(config.audio.output_sample_rate)?;
    let mut controller = SessionController::new(
        &config,
        Arc::new(HttpBackend::new(&config.backend_url)),
        Arc::new(WebSocketConnector::new(&config.live_endpoint)),
        Box::new(CpalMicrophone::new()),
        Box::new(output),
    );

    let printer = tokio::spawn(print_ui_events(controller.subscribe()));

    println!("Enter: talk / stop   r: reconnect   b: leave voice mode   q: quit\n");

    if let Err(e) = controller.initialize().await {
        tracing::debug!(error = %e, "initial connection failed");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    "" => {
                        if let Err(e) = controller.toggle_recording() {
                            print_hint(&e, controller.state());
                        }
                    }
                    "r" => {
                        if let Err(e) = controller.reinitialize().await {
                            tracing::debug!(error = %e, "reconnect failed");
                        }
                    }
                    "b" => controller.navigate_away(),
                    "q" => break,
                    other => println!("unknown command: {other:?}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
            alive = controller.step() => {
                if !alive {
                    break;
                }
            }
        }
    }

    controller.close();
    drop(controller);
    // Printer ends once the controller's sender is gone
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    Ok(())
}

fn print_hint(error: &Error, state: SessionState) {
    match error {
        Error::NotConnected if state == SessionState::Error => {
            println!("  (session is down, press r to reconnect)");
        }
        Error::NotConnected => println!("  (session is not ready yet)"),
        e if e.is_capture_error() => {
            println!("  (check microphone access, or run `aurea test-mic`)");
        }
        _ => {}
    }
}

async fn print_ui_events(mut rx: broadcast::Receiver<UiEvent>) {
    loop {
        match rx.recv().await {
            Ok(UiEvent::Status(text)) => println!("{text}"),
            Ok(UiEvent::Error(text)) => println!("! {text}"),
            Ok(UiEvent::Speaking(true)) => println!("~ assistant speaking"),
            Ok(UiEvent::Speaking(false)) => println!("~ assistant idle"),
            Ok(UiEvent::AudioReceived(secs)) => tracing::trace!(secs, "audio received"),
            Ok(UiEvent::State(state)) => tracing::debug!(%state, "state"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "ui events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Test microphone capture through the capture pipeline
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = CapturePipeline::with_block_size(
        Box::new(CpalMicrophone::new()),
        config.audio.capture_request(),
        config.audio.block_size,
    );
    capture.start()?;

    println!(
        "Frames: {} samples at {} Hz",
        capture.block_size(),
        capture.sample_rate()
    );
    println!("---");

    let mut recorded = Vec::new();
    for i in 0..duration {
        let deadline = tokio::time::sleep(Duration::from_secs(1));
        tokio::pin!(deadline);

        let mut frames = 0_usize;
        let mut samples = Vec::new();
        loop {
            tokio::select! {
                () = &mut deadline => break,
                frame = capture.next_frame() => {
                    let Some(frame) = frame else { break };
                    frames += 1;
                    samples.extend(frame.samples()?);
                }
            }
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] frames: {frames:3} | RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]",
            i + 1
        );
        recorded.extend(samples);
    }

    capture.stop();

    if let Some(path) = output {
        let wav = samples_to_wav(&recorded, capture.sample_rate())?;
        std::fs::write(&path, wav)?;
        println!("\nWrote {} samples to {}", recorded.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Play three tones back-to-back through the playback scheduler
#[allow(clippy::future_not_send)]
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear three rising tones with no gap between them\n");

    let rate = config.audio.output_sample_rate;
    let output = SpeakerOutput::new(rate)?;
    println!("Device rate: {} Hz", output.device_rate());

    let mut scheduler = PlaybackScheduler::new(Box::new(output), rate, 1);
    let mut total = 0.0;
    for frequency in [440.0_f32, 554.37, 659.25] {
        let placed = scheduler.schedule(tone(frequency, 0.6, rate));
        println!(
            "{frequency:>7.2} Hz at {:.3}s for {:.3}s",
            placed.start, placed.duration
        );
        total += placed.duration;
    }

    let wait = Duration::from_secs_f64(total + 2.0);
    let drained = tokio::time::timeout(wait, async {
        while scheduler.is_playing() {
            match scheduler.next_ended().await {
                Some(id) => {
                    scheduler.finish(id);
                }
                None => break,
            }
        }
    })
    .await;
    scheduler.shutdown();

    if drained.is_err() {
        anyhow::bail!("playback did not finish; the output device may be stalled");
    }

    println!("\n---");
    println!("If you heard the tones, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Sine tone at 30% volume
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tone(frequency: f32, seconds: f32, sample_rate: u32) -> AudioSegment {
    let count = (sample_rate as f32 * seconds) as usize;
    let samples = (0..count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    AudioSegment {
        samples,
        sample_rate,
        channels: 1,
    }
}

fn show_config(config: &Config) {
    let path = aurea_voice::config::file::config_file_path()
        .map_or_else(|| "(unavailable)".to_string(), |p| p.display().to_string());

    println!("config file:        {path}");
    println!("backend url:        {}", config.backend_url);
    println!("live endpoint:      {}", config.live_endpoint);
    println!("input sample rate:  {} Hz", config.audio.input_sample_rate);
    println!("output sample rate: {} Hz", config.audio.output_sample_rate);
    println!("block size:         {} samples", config.audio.block_size);
    println!("echo cancellation:  {}", config.audio.echo_cancellation);
    println!("noise suppression:  {}", config.audio.noise_suppression);
    println!("auto gain control:  {}", config.audio.auto_gain_control);
    println!("reconnect:          {:?}", config.reconnect);
}

//! # soundlight
//!
//! Listens to an input device (or replays a WAV file) and prints one JSON
//! line per LED and cycle on stdout, ready to be piped to the strip
//! controller's bus client.
//!
//! `soundlight control` is the other end of the pipe: it reads LED and
//! power messages from stdin and resolves them for the strip and the
//! radio outlets.
//!
//! ## Threads
//! - **Main thread**: capture, analysis and output, one cycle at a time
//! - **cpal callback**: pushes raw blocks into a bounded channel
//! - **Calibration watchers**: stdin and an optional timer, both feeding the
//!   cancel channel

mod logging;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use crossbeam_channel::Sender;
use soundlight_core::capture::{CaptureSource, CpalCapture, WavCapture};
use soundlight_core::config::Config;
use soundlight_core::control::{ControlAction, ControlRouter};
use soundlight_core::emit::JsonLinesSink;
use soundlight_core::pipeline::SpectrumPipeline;
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "soundlight")]
#[command(about = "Audio-reactive LED strip colours", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// TOML config file; built-in defaults when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Learn the room's noise spectrum before running
    #[arg(long)]
    calibrate: bool,

    /// Stop calibrating after this many seconds (Enter also stops it)
    #[arg(long, value_name = "SECONDS", requires = "calibrate")]
    calibrate_secs: Option<u64>,

    /// Analyse a WAV file instead of a live device
    #[arg(long, value_name = "FILE")]
    wav: Option<PathBuf>,

    /// Number of LEDs on the strip
    #[arg(long, value_name = "COUNT")]
    leds: Option<usize>,

    /// Substring of the input device name
    #[arg(long, value_name = "NAME", conflicts_with = "wav")]
    device: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read LED and power messages as JSON lines from stdin
    Control,
}

impl Args {
    /// Loads the config file (if any) and applies command line overrides.
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(leds) = self.leds {
            config.output.led_count = leds;
        }
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;
    logging::init(&config.logging.level)?;

    if let Some(Command::Control) = args.command {
        return run_control(&config);
    }

    let mut capture = open_capture(&args, &config)?;
    if config.audio.channel >= capture.channels() {
        bail!(
            "audio.channel {} out of range for a {}-channel input",
            config.audio.channel,
            capture.channels()
        );
    }

    let mut pipeline = SpectrumPipeline::new(&config, capture.sample_rate())
        .context("Failed to build the analysis pipeline")?;

    if args.calibrate {
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        spawn_enter_watcher(cancel_tx.clone());
        if let Some(secs) = args.calibrate_secs {
            spawn_timer(cancel_tx.clone(), Duration::from_secs(secs));
            info!("Keep the room silent; calibrating for {secs} s (or until Enter)");
        } else {
            info!("Keep the room silent; press Enter to finish calibrating");
        }
        pipeline
            .run_calibration(capture.as_mut(), &cancel_rx)
            .context("Calibration failed")?;
    }

    let mut sink = JsonLinesSink::new(
        std::io::stdout().lock(),
        &config.topics,
        &config.output.topic,
    )?;
    info!("Publishing on {}", sink.topic());

    let stats = pipeline
        .run(capture.as_mut(), &mut sink, &crossbeam_channel::never::<()>())
        .context("Audio capture failed")?;
    info!(
        "Done: {} cycles emitted, {} skipped, {} emit failures",
        stats.completed, stats.skipped, stats.emit_failures
    );
    Ok(())
}

fn run_control(config: &Config) -> Result<()> {
    let router = ControlRouter::from_config(config).context("Invalid control topics")?;
    info!("Reading control messages from stdin");
    let stats = router
        .handle_lines(std::io::stdin().lock(), |action| match action {
            ControlAction::Led(led) => info!("LED {} -> {:?}", led.id, led.rgb),
            ControlAction::Power { request, code } => {
                info!("Outlet {} {:?}: radio code {}", request.id, request.val, code)
            }
        })
        .context("Failed to read control messages")?;
    info!(
        "Control input closed: {} handled, {} ignored",
        stats.handled, stats.ignored
    );
    Ok(())
}

fn open_capture(args: &Args, config: &Config) -> Result<Box<dyn CaptureSource>> {
    match &args.wav {
        Some(path) => {
            let wav = WavCapture::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            info!(
                "Replaying {} ({} Hz, {} channels)",
                path.display(),
                wav.sample_rate(),
                wav.channels()
            );
            Ok(Box::new(wav))
        }
        None => {
            let live = CpalCapture::open(config.audio.device.as_deref())
                .context("Failed to open audio input")?;
            Ok(Box::new(live))
        }
    }
}

/// Sends on `cancel` when a line arrives on stdin.
fn spawn_enter_watcher(cancel: Sender<()>) {
    thread::spawn(move || {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) => warn!("stdin closed; calibration only stops on timeout or end of input"),
            Ok(_) => {
                let _ = cancel.try_send(());
            }
            Err(e) => warn!("Failed to read stdin: {}", e),
        }
    });
}

fn spawn_timer(cancel: Sender<()>, after: Duration) {
    thread::spawn(move || {
        thread::sleep(after);
        let _ = cancel.try_send(());
    });
}

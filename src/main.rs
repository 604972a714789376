//! vrcam - Webcam Avatar Tracker
//!
//! Main entry point for the CLI application.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

use vrcam::{
    config::{Config, SourceKind},
    output::{demo, OscSender, ParameterLogger},
    tracking::{ParameterSmoother, TrackingLoop},
};

/// vrcam - drive avatar parameters from a webcam over OSC
#[derive(Parser, Debug)]
#[command(name = "vrcam", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// OSC target address (overrides config)
    #[arg(long)]
    ip: Option<String>,

    /// OSC target port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Camera index (overrides config)
    #[arg(long)]
    camera: Option<u32>,

    /// Enable debug logging and the periodic parameter log
    #[arg(short, long)]
    debug: bool,

    /// Disable the preview window
    #[arg(long)]
    no_display: bool,

    /// Smoothing factor in (0, 1); higher is smoother
    #[arg(long)]
    smoothing: Option<f32>,

    /// Maximum OSC emissions per second
    #[arg(long)]
    send_rate: Option<f64>,

    /// Target frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Read frames from a directory of images instead of the camera
    #[arg(long, conflicts_with = "synthetic")]
    frames: Option<PathBuf>,

    /// Restart the image directory when it runs out
    #[arg(long, requires = "frames")]
    loop_frames: bool,

    /// Use generated frames instead of the camera
    #[arg(long)]
    synthetic: bool,

    /// Also send head and body tracker messages
    #[arg(long)]
    send_trackers: bool,

    /// Send a single test parameter and exit
    #[arg(long, conflicts_with = "demo")]
    test_connection: bool,

    /// Send camera-free demo parameters for this many seconds and exit
    #[arg(long, value_name = "SECS")]
    demo: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging before the config file is read so its messages show up
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (filter, filter_handle) = reload::Layer::new(log_filter(args.debug, rust_log.as_deref()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let config = load_config(&args)?;

    // `debug = true` in the file raises the level unless RUST_LOG is set
    if config.debug && !args.debug && rust_log.is_none() {
        if let Err(e) = filter_handle.reload(log_filter(true, None)) {
            warn!("Failed to raise log level: {}", e);
        }
    }

    info!("Starting {} v{}", vrcam::NAME, vrcam::VERSION);
    info!(
        "OSC target: {}:{} ({} Hz)",
        config.osc.target_ip, config.osc.target_port, config.osc.send_rate_hz
    );

    if args.test_connection {
        return test_connection(&config);
    }

    let runtime = tokio::runtime::Runtime::new()?;

    if let Some(secs) = args.demo {
        return runtime.block_on(run_demo(config, Duration::from_secs(secs)));
    }

    runtime.block_on(run_tracking(config))
}

/// INFO by default, DEBUG with the debug flag; `env` (RUST_LOG) overrides
fn log_filter(debug: bool, env: Option<&str>) -> EnvFilter {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };

    EnvFilter::builder()
        .with_default_directive(log_level.into())
        .parse_lossy(env.unwrap_or_default())
}

/// Load configuration and apply CLI overrides
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if let Some(ref path) = args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    if let Some(ref ip) = args.ip {
        config.osc.target_ip = ip.clone();
    }
    if let Some(port) = args.port {
        config.osc.target_port = port;
    }
    if let Some(index) = args.camera {
        config.camera.index = index;
    }
    if args.debug {
        config.debug = true;
    }
    if args.no_display {
        config.display = false;
    }
    if let Some(smoothing) = args.smoothing {
        config.tracking.smoothing_factor = smoothing;
    }
    if let Some(rate) = args.send_rate {
        config.osc.send_rate_hz = rate;
    }
    if let Some(fps) = args.fps {
        config.camera.fps = fps;
    }
    if let Some(ref dir) = args.frames {
        config.source.kind = SourceKind::Sequence;
        config.source.path = Some(dir.clone());
        config.source.looping = args.loop_frames;
    }
    if args.synthetic {
        config.source.kind = SourceKind::Synthetic;
    }
    if args.send_trackers {
        config.osc.send_trackers = true;
    }

    config.validate()?;
    Ok(config)
}

fn test_connection(config: &Config) -> anyhow::Result<()> {
    let mut sender = OscSender::connect(&config.osc)?;
    if sender.test_connection() {
        info!("Test message sent to {}", sender.target());
        Ok(())
    } else {
        anyhow::bail!("could not send test message to {}", sender.target())
    }
}

async fn run_demo(config: Config, duration: Duration) -> anyhow::Result<()> {
    let mut sender = OscSender::connect(&config.osc)?;
    let mut smoother = ParameterSmoother::new(config.tracking.smoothing_factor)?;
    let stop = Arc::new(AtomicBool::new(false));

    let worker_stop = Arc::clone(&stop);
    let mut worker = tokio::task::spawn_blocking(move || {
        demo::run_demo(
            &mut sender,
            &mut smoother,
            duration,
            demo::DEMO_INTERVAL,
            &worker_stop,
        )
    });

    let report = tokio::select! {
        result = &mut worker => result.context("demo worker panicked")?,
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            stop.store(true, Ordering::SeqCst);
            worker.await.context("demo worker panicked")?
        }
    };

    if report.failed > 0 {
        warn!("{} demo messages could not be sent", report.failed);
    }
    Ok(())
}

async fn run_tracking(config: Config) -> anyhow::Result<()> {
    let mut tracker = TrackingLoop::from_config(&config)?;

    if config.debug {
        tracker.add_observer(Box::new(ParameterLogger::default()));
    }
    if config.display {
        info!("Preview window is not available in this build; tracking headless");
    }

    let handle = tracker.handle();
    let mut worker = tokio::task::spawn_blocking(move || tracker.run());

    let result = tokio::select! {
        result = &mut worker => result.context("tracking worker panicked")?,
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            handle.stop();
            worker.await.context("tracking worker panicked")?
        }
    };

    match result {
        Ok(frames) => {
            info!("vrcam stopped after {} frames", frames);
            Ok(())
        }
        Err(e) => {
            error!("Tracking stopped: {}", e);
            Err(e.into())
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

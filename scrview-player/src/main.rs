//! scrview-player: entry point.
//!
//! ```text
//! scrview-player <recording>                 Play a recording
//! scrview-player <recording> --realtime      Pace frames by timestamp
//! scrview-player --config <path> <recording> Load a custom config TOML
//! scrview-player --gen-config                Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scrview_player::config::PlayerConfig;
use scrview_player::player::Player;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "scrview-player", about = "Headless screen-recording player")]
struct Cli {
    /// Recording to play (H.264 video in any FFmpeg-readable container).
    recording: Option<PathBuf>,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "scrview-player.toml")]
    config: PathBuf,

    /// Pace delivery by presentation timestamp.
    #[arg(long)]
    realtime: bool,

    /// Write the first viewer's last image to this PPM file.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", PlayerConfig::default_toml()?);
        return Ok(());
    }

    let Some(recording) = cli.recording else {
        eprintln!("no recording given (see --help)");
        std::process::exit(2);
    };

    // Load config, then apply command-line overrides.
    let mut config = PlayerConfig::load(&cli.config);
    if cli.realtime {
        config.playback.realtime = true;
    }
    if let Some(path) = cli.snapshot {
        config.snapshot.enabled = true;
        config.snapshot.path = path;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("scrview-player v{}", env!("CARGO_PKG_VERSION"));
    info!("viewers: {}", config.viewers.len());
    info!("realtime: {}", config.playback.realtime);

    let stop = Arc::new(AtomicBool::new(false));

    // Ctrl-C handler.
    let stop_clone = Arc::clone(&stop);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received; stopping playback");
        stop_clone.store(true, Ordering::SeqCst);
    });

    // Decoding blocks; keep it off the async workers.
    let player = Player::new(config);
    let report = tokio::task::spawn_blocking(move || player.run(&recording, &stop)).await??;

    info!(
        frames = report.frames,
        deliveries = report.stats.deliveries,
        resample_failures = report.stats.resample_failures,
        control_events = report.control_events,
        elapsed_ms = report.elapsed.as_millis() as u64,
        interrupted = report.interrupted,
        "playback done"
    );

    Ok(())
}

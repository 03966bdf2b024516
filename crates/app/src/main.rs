use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use clap::{Args, Parser, Subcommand};
use pngtuber_core::{net, AppConfig, Command, Compositor, Engine, PngTuberError};
use tracing_subscriber::EnvFilter;

const FRAMERATE: u32 = 60;

fn main() -> pngtuber_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            snapshot,
            frames,
        } => run(&config, snapshot.as_deref(), frames),
        Commands::State { index, target } => send(&target, Command::SetState(index)),
        Commands::Talk { target } => send(&target, Command::Talk),
    }
}

fn run(config_path: &Path, snapshot: Option<&Path>, frames: Option<u64>) -> pngtuber_core::Result<()> {
    let config = AppConfig::load(config_path)?;
    tracing::info!(
        caption = %config.app.caption,
        states = config.states.len(),
        "starting avatar"
    );
    let mut engine = Engine::from_config(&config)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)).map_err(|err| {
            PngTuberError::msg(format!("failed to install Ctrl-C handler: {err}"))
        })?;
    }

    let mut compositor = Compositor::new();
    let frame_time = Duration::from_secs(1) / FRAMERATE;
    while running.load(Ordering::SeqCst) && frames.map_or(true, |limit| compositor.frames_drawn() < limit) {
        let started = Instant::now();
        engine.tick(&mut compositor);
        if let Some(rest) = frame_time.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    tracing::info!(frames = compositor.frames_drawn(), "shutting down");
    if let Some(path) = snapshot {
        compositor.save(path)?;
        tracing::info!(path = %path.display(), "saved last frame");
    }
    Ok(())
}

fn send(target: &Target, command: Command) -> pngtuber_core::Result<()> {
    let config = AppConfig::load(&target.config)?;
    let host = target.host.clone().unwrap_or(config.app.host);
    let port = target.port.unwrap_or(config.app.port);
    net::send(&format!("{host}:{port}"), command)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Network-controlled PNGTuber avatar", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the configured states and react to commands until Ctrl-C.
    Run {
        /// Configuration document describing states and layers.
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
        /// Write the last composed frame to this PNG on exit.
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Stop after this many frames.
        #[arg(long)]
        frames: Option<u64>,
    },
    /// Ask a running avatar to switch to the state at INDEX.
    State {
        index: usize,
        #[command(flatten)]
        target: Target,
    },
    /// Tell a running avatar that speech is occurring.
    Talk {
        #[command(flatten)]
        target: Target,
    },
}

/// Where a one-shot command is sent. Host and port default to the listener
/// settings of the configuration document.
#[derive(Args, Debug)]
struct Target {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
    #[arg(long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
}

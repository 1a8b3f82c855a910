use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, Subcommand};
#[cfg(feature = "playback")]
use party_mode_core::CpalBackend;
use party_mode_core::{
    check_kicks, AudioBackend, AudioTimeline, Clock, MemorySurface, OfflineBackend, PartyConfig,
    PartyController, PlaybackClock, Recorder, RecordingSettings, SystemClock,
};
use tracing_subscriber::EnvFilter;

/// Poll cadence of the real-time loop.
const PLAY_POLL: Duration = Duration::from_millis(5);

fn main() -> party_mode_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play { config, seed, wav } => {
            run_play(load_config(config.as_ref())?, seed, wav.as_ref())
        }
        Commands::Render {
            output,
            config,
            seed,
            step_ms,
        } => run_render(load_config(config.as_ref())?, seed, &output, step_ms),
        Commands::Timeline { config } => run_timeline(&load_config(config.as_ref())?),
    }
}

fn load_config(path: Option<&PathBuf>) -> party_mode_core::Result<PartyConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading config");
            PartyConfig::from_json_file(path)
        }
        None => Ok(PartyConfig::default()),
    }
}

fn run_play(
    config: PartyConfig,
    seed: Option<u64>,
    wav: Option<&PathBuf>,
) -> party_mode_core::Result<()> {
    let clock = SystemClock::new();

    #[cfg(feature = "playback")]
    let last_mix = {
        let mut backend = CpalBackend::new();
        if let Some(seed) = seed {
            backend = backend.with_seed(seed);
        }
        play_session(config, seed, backend, clock).backend().last_mix()
    };

    #[cfg(not(feature = "playback"))]
    let last_mix = {
        tracing::info!("built without the playback feature, mixing in memory");
        let mut backend = OfflineBackend::new(clock, config.audio.sample_rate);
        if let Some(seed) = seed {
            backend = backend.with_seed(seed);
        }
        play_session(config, seed, backend, clock).backend().last_mix()
    };

    if let Some(path) = wav {
        match last_mix {
            Some(mix) => {
                Recorder::new(RecordingSettings::new(path)).write(&mix.snapshot()?)?;
            }
            None => tracing::warn!("no audio was produced, skipping wav output"),
        }
    }
    Ok(())
}

/// Runs one session against the wall clock until it stops itself.
fn play_session<B: AudioBackend>(
    config: PartyConfig,
    seed: Option<u64>,
    backend: B,
    clock: SystemClock,
) -> PartyController<MemorySurface, B, SystemClock> {
    let surface = MemorySurface::new();
    let mut controller = match seed {
        Some(seed) => PartyController::with_seed(config, surface, backend, clock, seed),
        None => PartyController::new(config, surface, backend, clock),
    };

    controller.start();
    let mut last_beats = 0;
    while controller.is_active() {
        std::thread::sleep(PLAY_POLL);
        controller.tick();

        let beats = controller.stats().beats;
        if beats != last_beats {
            last_beats = beats;
            tracing::info!(
                beat = beats,
                particles = controller.surface().particle_count(),
                elapsed_ms = controller.clock().now().as_millis() as u64,
                "pulse"
            );
        }
    }

    tracing::info!(stats = ?controller.stats(), "party over");
    controller
}

fn run_render(
    config: PartyConfig,
    seed: Option<u64>,
    output: &Path,
    step_ms: u64,
) -> party_mode_core::Result<()> {
    let seed = seed.unwrap_or(0);
    let step = Duration::from_millis(step_ms.max(1));
    let kick_window_ms = config.audio.kick_window_ms;
    let clock = PlaybackClock::new();
    let backend = OfflineBackend::new(clock.clone(), config.audio.sample_rate).with_seed(seed);
    let mut controller =
        PartyController::with_seed(config, MemorySurface::new(), backend, clock.clone(), seed);

    tracing::info!(?output, step_ms = step.as_millis() as u64, "rendering offline");
    controller.start();
    // Keep going after stop so removal timers drain too.
    while controller.is_active() || controller.has_pending_timers() {
        clock.advance(step);
        controller.tick();
    }

    let mix = controller
        .backend()
        .last_mix()
        .ok_or_else(|| party_mode_core::PartyError::msg("offline backend produced no mix"))?
        .snapshot()?;
    Recorder::new(RecordingSettings::new(output)).write(&mix)?;
    let kicks = check_kicks(&mix, controller.timeline(), kick_window_ms)?;

    let report = serde_json::json!({
        "output": output,
        "session": controller.stats(),
        "surface": controller.surface().stats(),
        "voices": controller.timeline().counts(),
        "kicks": kicks,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_timeline(config: &PartyConfig) -> party_mode_core::Result<()> {
    let timeline = AudioTimeline::from_config(config);
    println!("{}", serde_json::to_string_pretty(&timeline)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Timed celebration effect with synthesised music", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one party session in real time. Plays on the default audio device
    /// when built with the `playback` feature.
    Play {
        /// Optional JSON config overriding the built-in constants.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Seed for particles and noise.
        #[arg(short, long)]
        seed: Option<u64>,
        /// Save the session's mix to this WAV file afterwards.
        #[arg(long)]
        wav: Option<PathBuf>,
    },
    /// Run one session offline and write its mix to a WAV file.
    Render {
        /// Output WAV path.
        output: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        seed: Option<u64>,
        /// Simulated clock step in milliseconds.
        #[arg(long, default_value_t = 5)]
        step_ms: u64,
    },
    /// Print the audio timeline as JSON.
    Timeline {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

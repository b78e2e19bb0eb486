use std::{
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    thread,
};

use clap::{Parser, Subcommand};
use pulse_router_core::{
    clock::{BEATS_PER_BAR, PULSES_PER_BEAT},
    command_queue, spawn_ticker, AppConfig, Command, Engine, InputEvent, MidiMessage,
    OutboundEvent, ProjectSnapshot, RouterError,
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

fn main() -> pulse_router_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::live_defaults(),
    };

    match cli.command {
        Commands::Replay { project, events } => run_replay(config, &project, &events),
        Commands::Clock { bpm, bars } => run_clock(config, bpm, bars),
    }
}

/// One line of a replay file: a routed input event or a raw MIDI message.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Input(InputEvent),
    Midi(MidiMessage),
}

fn run_replay(config: AppConfig, project: &Path, events: &Path) -> pulse_router_core::Result<()> {
    tracing::info!(?project, ?events, "replaying input events");

    let mut engine = Engine::new(&config);
    engine.load_project(ProjectSnapshot::load(project)?);

    let reader = BufReader::new(std::fs::File::open(events)?);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let command = match serde_json::from_str(&line)? {
            ReplayLine::Input(event) => Command::InputFired(event),
            ReplayLine::Midi(message) => Command::Midi(message),
        };
        tracing::debug!(line = number + 1, ?command, "dispatching");
        print_events(&mut out, &engine.dispatch(command))?;
    }
    Ok(())
}

fn run_clock(mut config: AppConfig, bpm: Option<f64>, bars: u64) -> pulse_router_core::Result<()> {
    if let Some(bpm) = bpm {
        config.clock.bpm = bpm;
    }
    config.clock.generated = true;
    tracing::info!(bpm = config.clock.bpm, bars, "running internal clock");

    let engine = Engine::new(&config);
    let (handle, commands) = command_queue();
    let (events_tx, events_rx) = crossbeam_channel::unbounded();

    handle.send(Command::ClockReset)?;
    let pulses = bars * u64::from(PULSES_PER_BEAT * BEATS_PER_BAR);
    let ticker = spawn_ticker(handle, config.clock.bpm, Some(pulses));
    let worker = thread::spawn(move || engine.run(commands, events_tx));

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for event in events_rx.iter() {
        print_events(&mut out, std::slice::from_ref(&event))?;
    }

    ticker
        .join()
        .map_err(|_| RouterError::msg("clock ticker panicked"))?;
    worker
        .join()
        .map_err(|_| RouterError::msg("engine thread panicked"))?
}

fn print_events(out: &mut impl Write, events: &[OutboundEvent]) -> pulse_router_core::Result<()> {
    for event in events {
        serde_json::to_writer(&mut *out, event)?;
        writeln!(out)?;
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Routes MIDI, clock, LFO and audio signals into visual parameters",
    long_about = None
)]
struct Cli {
    /// Optional JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed recorded input events through a project and print the results.
    Replay {
        /// Project snapshot holding nodes and input links.
        #[arg(short, long)]
        project: PathBuf,
        /// JSON-lines file of input events or raw MIDI messages.
        #[arg(short, long)]
        events: PathBuf,
    },
    /// Run the internal clock and print beat and tempo events.
    Clock {
        /// Tempo override; defaults to the configured BPM.
        #[arg(long)]
        bpm: Option<f64>,
        /// Number of bars to run for.
        #[arg(long, default_value_t = 2)]
        bars: u64,
    },
}

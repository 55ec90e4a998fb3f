use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::info;
use tracing_subscriber::EnvFilter;

use keyplay::midi::load_midi;
use keyplay::notation::{key_notation, write_lrcp};
use keyplay::pipeline::{load_sequence, midi_to_sequence};
use keyplay::timing::{MAX_SPEED, MIN_SPEED};
use keyplay::{
    EngineCommand, KeyActuator, LoggingInjector, PlaybackState, PlaybackUpdate, Settings,
    spawn_engine,
};

const SPEED_STEP: f64 = 0.25;

#[derive(Parser)]
#[command(name = "keyplay")]
#[command(about = "Play LRCp scores and MIDI files as keyboard input")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RON settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Play an .lrcp or .mid file
    Play {
        file: PathBuf,

        #[arg(short, long)]
        speed: Option<f64>,

        /// Countdown before the first key, in seconds
        #[arg(long)]
        countdown: Option<u32>,

        #[arg(short, long)]
        layout: Option<String>,
    },
    /// Convert a MIDI file to LRCp
    Convert {
        midi: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the physical key score of a file
    Keys {
        file: PathBuf,

        #[arg(short, long)]
        layout: Option<String>,
    },
    /// Print the effective settings as RON
    ShowConfig,
    /// Check a settings file
    ValidateConfig { path: PathBuf },
}

struct RawGuard;

impl RawGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("keyplay=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyplay=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Play {
            file,
            speed,
            countdown,
            layout,
        } => {
            if let Some(speed) = speed {
                settings.playback.speed = speed;
            }
            if let Some(countdown) = countdown {
                settings.playback.countdown_secs = countdown;
            }
            if let Some(layout) = layout {
                settings.mapping.layout = layout;
            }
            settings.validate()?;
            play(&file, settings)
        }
        Commands::Convert { midi, output } => {
            let notes = load_midi(&midi)
                .with_context(|| format!("Failed to read MIDI file: {}", midi.display()))?;
            let sequence = midi_to_sequence(&notes.notes, Some(notes.source_bpm), &settings);
            let text = write_lrcp(&sequence);
            match output {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    info!(events = sequence.len(), path = %path.display(), "wrote LRCp");
                }
                None => print!("{text}"),
            }
            Ok(())
        }
        Commands::Keys { file, layout } => {
            if let Some(layout) = layout {
                settings.mapping.layout = layout;
            }
            let sequence = load_sequence(&file, &settings)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            let layout = settings.mapping.key_layout();
            println!(
                "{}",
                key_notation(&sequence, &layout, settings.mapping.notation_window_ms)
            );
            Ok(())
        }
        Commands::ShowConfig => {
            let text = ron::ser::to_string_pretty(&settings, ron::ser::PrettyConfig::default())?;
            println!("{text}");
            Ok(())
        }
        Commands::ValidateConfig { path } => {
            Settings::load(&path)
                .with_context(|| format!("Invalid settings file: {}", path.display()))?;
            println!("{}: ok", path.display());
            Ok(())
        }
    }
}

fn play(file: &Path, settings: Settings) -> Result<()> {
    let sequence = load_sequence(file, &settings)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    info!(
        events = sequence.len(),
        duration = sequence.total_duration(),
        "loaded {}",
        file.display()
    );

    let injector = LoggingInjector::new(settings.mapping.key_layout());
    let actuator = Arc::new(KeyActuator::new(injector));
    let mut speed = settings.playback.speed;
    let engine = spawn_engine(actuator, settings);
    engine.send(EngineCommand::Play(sequence));

    let raw = RawGuard::enter()?;
    eprint!("Controls: Space = pause/resume, Esc = stop, +/- = speed\r\n");

    let mut started = false;
    let mut failure = None;
    'session: loop {
        for update in engine.update_rx.try_iter() {
            match update {
                PlaybackUpdate::State(state) if state.is_active() => started = true,
                PlaybackUpdate::State(PlaybackState::Idle) if started => break 'session,
                PlaybackUpdate::Countdown { remaining } => eprint!("Starting in {remaining}...\r\n"),
                PlaybackUpdate::Error(message) => failure = Some(message),
                _ => {}
            }
        }

        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(k) = event::read()? {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match k.code {
                    KeyCode::Char(' ') => engine.send(EngineCommand::TogglePause),
                    KeyCode::Esc => engine.send(EngineCommand::Stop),
                    KeyCode::Char('c') if k.modifiers.contains(KeyModifiers::CONTROL) => {
                        engine.send(EngineCommand::Stop)
                    }
                    KeyCode::Char('+' | '=') => {
                        speed = (speed + SPEED_STEP).min(MAX_SPEED);
                        engine.send(EngineCommand::SetSpeed(speed));
                    }
                    KeyCode::Char('-') => {
                        speed = (speed - SPEED_STEP).max(MIN_SPEED);
                        engine.send(EngineCommand::SetSpeed(speed));
                    }
                    _ => {}
                }
            }
        }
    }

    drop(raw);
    engine.shutdown();
    match failure {
        Some(message) => anyhow::bail!("playback failed: {message}"),
        None => Ok(()),
    }
}

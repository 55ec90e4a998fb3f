use std::sync::Arc;
use std::thread::JoinHandle;

use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, Sender};
use tracing::{error, info, warn};

use crate::actuator::KeyActuator;
use crate::events::EventSequence;
use crate::settings::Settings;
use crate::timing::{
    PlaybackControl, PlaybackScheduler, PlaybackUpdate, SessionOutcome, clamp_speed,
};

#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Stops any running session, then plays `sequence`.
    Play(EventSequence),
    Pause,
    Resume,
    TogglePause,
    Stop,
    SetSpeed(f64),
    CancelCountdown,
    UpdateSettings(Settings),
    Shutdown,
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<PlaybackUpdate>,
    pub settings: Arc<ArcSwap<Settings>>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) {
        if self.command_tx.send(command).is_err() {
            warn!("engine thread is gone; command dropped");
        }
    }

    /// Stops playback, releases every key and waits for the engine thread.
    pub fn shutdown(mut self) {
        self.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("engine thread panicked");
            }
        }
    }
}

pub fn spawn_engine(actuator: Arc<KeyActuator>, settings: Settings) -> EngineHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();
    let settings = Arc::new(ArcSwap::from_pointee(settings));

    let engine_settings = settings.clone();
    let thread = std::thread::spawn(move || {
        engine_thread(command_rx, update_tx, actuator, engine_settings);
    });

    EngineHandle {
        command_tx,
        update_rx,
        settings,
        thread: Some(thread),
    }
}

struct ActiveSession {
    control: Arc<PlaybackControl>,
    thread: JoinHandle<()>,
}

impl ActiveSession {
    /// Drives the session to `Stopped` and waits until its keys are released.
    fn stop(self) {
        self.control.stop();
        if self.thread.join().is_err() {
            error!("playback thread panicked");
        }
    }
}

struct EngineState {
    actuator: Arc<KeyActuator>,
    settings: Arc<ArcSwap<Settings>>,
    update_tx: Sender<PlaybackUpdate>,
    session: Option<ActiveSession>,
}

impl EngineState {
    fn control(&self) -> Option<&PlaybackControl> {
        self.session
            .as_ref()
            .filter(|s| !s.thread.is_finished())
            .map(|s| s.control.as_ref())
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }

    fn play(&mut self, sequence: EventSequence) {
        self.stop_session();

        let settings = self.settings.load();
        let control = Arc::new(PlaybackControl::new(settings.playback.speed));
        let scheduler = PlaybackScheduler::new(
            self.actuator.clone(),
            control.clone(),
            settings.playback.scheduler_options(),
        )
        .with_updates(self.update_tx.clone());

        let thread = std::thread::spawn(move || match scheduler.run(&sequence) {
            Ok(SessionOutcome::Completed) => info!("playback completed"),
            Ok(outcome) => info!(?outcome, "playback ended early"),
            Err(err) => error!(%err, "playback failed"),
        });
        self.session = Some(ActiveSession { control, thread });
    }
}

fn engine_thread(
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<PlaybackUpdate>,
    actuator: Arc<KeyActuator>,
    settings: Arc<ArcSwap<Settings>>,
) {
    let mut state = EngineState {
        actuator,
        settings,
        update_tx,
        session: None,
    };

    loop {
        match command_rx.recv() {
            Ok(EngineCommand::Play(sequence)) => state.play(sequence),
            Ok(EngineCommand::Pause) => {
                if let Some(control) = state.control() {
                    control.pause();
                }
            }
            Ok(EngineCommand::Resume) => {
                if let Some(control) = state.control() {
                    control.resume();
                }
            }
            Ok(EngineCommand::TogglePause) => {
                if let Some(control) = state.control() {
                    control.toggle_pause();
                }
            }
            Ok(EngineCommand::Stop) => state.stop_session(),
            Ok(EngineCommand::SetSpeed(speed)) => {
                let speed = clamp_speed(speed);
                if let Some(control) = state.control() {
                    control.set_speed(speed);
                }
                let mut next = Settings::clone(&state.settings.load());
                next.playback.speed = speed;
                state.settings.store(Arc::new(next));
            }
            Ok(EngineCommand::CancelCountdown) => {
                if let Some(control) = state.control() {
                    control.cancel_countdown();
                }
            }
            Ok(EngineCommand::UpdateSettings(settings)) => match settings.validate() {
                Ok(()) => {
                    info!("settings updated");
                    state.settings.store(Arc::new(settings));
                }
                Err(err) => {
                    let _ = state.update_tx.send(PlaybackUpdate::Error(err.to_string()));
                }
            },
            Ok(EngineCommand::Shutdown) | Err(crossbeam::channel::RecvError) => break,
        }
    }

    state.stop_session();
    if let Err(err) = state.actuator.release_all() {
        error!(%err, "failed to release keys on shutdown");
    }
}

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use super::{PlaybackState, StateCell};
use crate::actuator::KeyActuator;
use crate::error::Result;
use crate::events::EventSequence;
use crate::keymap::KeyId;

pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 3.0;

/// Notifications for the UI / event-log layer and the playlist controller.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackUpdate {
    State(PlaybackState),
    Countdown { remaining: u32 },
    Progress { cursor: f64, total: f64 },
    Completed,
    Error(String),
}

/// Shared control cell. Writers never block; the dispatch loop observes
/// changes on its next iteration. One control serves one session.
#[derive(Debug)]
pub struct PlaybackControl {
    paused: AtomicBool,
    stop: AtomicBool,
    cancel_countdown: AtomicBool,
    speed: AtomicU64,
    state: StateCell,
}

impl PlaybackControl {
    pub fn new(speed: f64) -> Self {
        Self {
            paused: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            cancel_countdown: AtomicBool::new(false),
            speed: AtomicU64::new(clamp_speed(speed).to_bits()),
            state: StateCell::default(),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn toggle_pause(&self) {
        self.paused.fetch_xor(true, Ordering::AcqRel);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Global stop. Honoured in every active state.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn cancel_countdown(&self) {
        self.cancel_countdown.store(true, Ordering::Release);
    }

    pub fn set_speed(&self, speed: f64) {
        self.speed
            .store(clamp_speed(speed).to_bits(), Ordering::Release);
    }

    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed.load(Ordering::Acquire))
    }

    pub fn state(&self) -> PlaybackState {
        self.state.load()
    }
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Limits a requested speed to `MIN_SPEED..=MAX_SPEED`; non-finite input resets to 1.0.
pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_finite() {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    } else {
        1.0
    }
}

pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated time. `sleep` advances the clock instead of blocking.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: Duration) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Maps wall-clock instants to logical playback time.
///
/// Position is always recomputed from the anchor, so sleep jitter never
/// accumulates. Pausing and speed changes re-anchor at the current position.
#[derive(Debug, Clone, Copy)]
pub struct PlayHead {
    anchor_wall: Duration,
    anchor_position: f64,
    speed: f64,
    paused: bool,
}

impl PlayHead {
    pub fn start(now: Duration, speed: f64) -> Self {
        Self {
            anchor_wall: now,
            anchor_position: 0.0,
            speed,
            paused: false,
        }
    }

    pub fn position(&self, now: Duration) -> f64 {
        if self.paused {
            return self.anchor_position;
        }
        self.anchor_position + now.saturating_sub(self.anchor_wall).as_secs_f64() * self.speed
    }

    pub fn pause(&mut self, now: Duration) {
        if !self.paused {
            self.anchor_position = self.position(now);
            self.paused = true;
        }
    }

    pub fn resume(&mut self, now: Duration) {
        if self.paused {
            self.anchor_wall = now;
            self.paused = false;
        }
    }

    pub fn set_speed(&mut self, now: Duration, speed: f64) {
        self.anchor_position = self.position(now);
        self.anchor_wall = now;
        self.speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub countdown: Duration,
    /// Lift held keys while paused and press them again on resume.
    pub release_on_pause: bool,
    pub poll_interval: Duration,
    pub progress_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            countdown: Duration::ZERO,
            release_on_pause: false,
            poll_interval: Duration::from_millis(1),
            progress_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every event was dispatched and released.
    Completed,
    /// A global stop interrupted playback.
    Stopped,
    /// The countdown was cancelled before any key was pressed.
    Cancelled,
}

/// Same-instant order: sustained releases, presses, then tap releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ActionKind {
    Release,
    Press,
    TapRelease,
}

#[derive(Debug, Clone, Copy)]
struct Action {
    time: f64,
    kind: ActionKind,
    event: usize,
}

fn build_actions(sequence: &EventSequence) -> Vec<Action> {
    let mut actions = Vec::with_capacity(sequence.len() * 2);
    for (event, e) in sequence.iter().enumerate() {
        actions.push(Action {
            time: e.start(),
            kind: ActionKind::Press,
            event,
        });
        let (time, kind) = if e.is_tap() {
            (e.start(), ActionKind::TapRelease)
        } else {
            (e.end(), ActionKind::Release)
        };
        actions.push(Action { time, kind, event });
    }
    actions.sort_by(|a, b| {
        a.time
            .total_cmp(&b.time)
            .then(a.kind.cmp(&b.kind))
            .then(a.event.cmp(&b.event))
    });
    actions
}

/// Drives one event sequence through a [`KeyActuator`].
pub struct PlaybackScheduler {
    actuator: Arc<KeyActuator>,
    control: Arc<PlaybackControl>,
    clock: Arc<dyn Clock>,
    updates: Option<Sender<PlaybackUpdate>>,
    options: SchedulerOptions,
}

impl PlaybackScheduler {
    pub fn new(
        actuator: Arc<KeyActuator>,
        control: Arc<PlaybackControl>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            actuator,
            control,
            clock: Arc::new(MonotonicClock::new()),
            updates: None,
            options,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_updates(mut self, updates: Sender<PlaybackUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn control(&self) -> &Arc<PlaybackControl> {
        &self.control
    }

    /// Blocks until the session completes, is stopped or is cancelled.
    pub fn run(&self, sequence: &EventSequence) -> Result<SessionOutcome> {
        let mut session = self.start_session(sequence, self.clock.now());
        loop {
            if let Some(outcome) = session.tick(self.clock.now())? {
                return Ok(outcome);
            }
            self.clock.sleep(self.options.poll_interval);
        }
    }

    /// Leaves `Idle` and returns a session advanced by explicit `tick`s.
    pub fn start_session<'a>(&'a self, sequence: &'a EventSequence, now: Duration) -> Session<'a> {
        let phase = if self.options.countdown.is_zero() {
            Phase::Running(PlayHead::start(now, self.control.speed()))
        } else {
            Phase::CountingDown {
                until: now + self.options.countdown,
            }
        };
        let session = Session {
            scheduler: self,
            sequence,
            actions: build_actions(sequence),
            cursor: 0,
            held: BTreeSet::new(),
            phase,
            total: sequence.total_duration(),
            last_countdown: None,
            last_progress: None,
        };
        session.enter(match phase {
            Phase::CountingDown { .. } => PlaybackState::CountingDown,
            Phase::Running(_) => PlaybackState::Playing,
        });
        info!(events = sequence.len(), total = session.total, "playback session started");
        session
    }

    fn send(&self, update: PlaybackUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    CountingDown { until: Duration },
    Running(PlayHead),
}

pub struct Session<'a> {
    scheduler: &'a PlaybackScheduler,
    sequence: &'a EventSequence,
    actions: Vec<Action>,
    cursor: usize,
    /// Events pressed and not yet released.
    held: BTreeSet<usize>,
    phase: Phase,
    total: f64,
    last_countdown: Option<u32>,
    last_progress: Option<Duration>,
}

impl Session<'_> {
    /// Logical position, or `None` while counting down.
    pub fn position(&self, now: Duration) -> Option<f64> {
        match self.phase {
            Phase::Running(head) => Some(head.position(now)),
            Phase::CountingDown { .. } => None,
        }
    }

    /// One loop iteration. Returns the outcome once the session is back in `Idle`.
    pub fn tick(&mut self, now: Duration) -> Result<Option<SessionOutcome>> {
        let phase = self.phase;
        let result = match phase {
            Phase::CountingDown { until } => Ok(self.tick_countdown(now, until)),
            Phase::Running(head) => self.tick_running(now, head),
        };
        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(%err, "playback aborted");
                self.release_everything();
                self.enter(PlaybackState::Stopped);
                self.scheduler.send(PlaybackUpdate::Error(err.to_string()));
                self.enter(PlaybackState::Idle);
                Err(err)
            }
        }
    }

    fn tick_countdown(&mut self, now: Duration, until: Duration) -> Option<SessionOutcome> {
        let scheduler = self.scheduler;
        let control = &scheduler.control;
        if control.stop_requested() || control.cancel_countdown.swap(false, Ordering::AcqRel) {
            self.enter(PlaybackState::Idle);
            return Some(SessionOutcome::Cancelled);
        }
        if now >= until {
            self.phase = Phase::Running(PlayHead::start(until, control.speed()));
            self.enter(PlaybackState::Playing);
            return None;
        }
        let remaining = (until - now).as_secs_f64().ceil() as u32;
        if self.last_countdown != Some(remaining) {
            self.last_countdown = Some(remaining);
            self.scheduler.send(PlaybackUpdate::Countdown { remaining });
        }
        None
    }

    fn tick_running(&mut self, now: Duration, mut head: PlayHead) -> Result<Option<SessionOutcome>> {
        let scheduler = self.scheduler;
        let control = &scheduler.control;
        if control.stop_requested() {
            self.release_everything();
            self.enter(PlaybackState::Stopped);
            self.enter(PlaybackState::Idle);
            return Ok(Some(SessionOutcome::Stopped));
        }

        let paused = control.is_paused();
        if paused && !head.is_paused() {
            head.pause(now);
            self.phase = Phase::Running(head);
            if self.scheduler.options.release_on_pause {
                self.for_each_held(|actuator, keys| actuator.release(keys))?;
            }
            self.enter(PlaybackState::Paused);
        } else if !paused && head.is_paused() {
            head.resume(now);
            self.phase = Phase::Running(head);
            if self.scheduler.options.release_on_pause {
                self.for_each_held(|actuator, keys| actuator.press(keys))?;
            }
            self.enter(PlaybackState::Playing);
        }

        let speed = control.speed();
        if speed != head.speed() {
            head.set_speed(now, speed);
            debug!(speed, "playback speed changed");
        }
        self.phase = Phase::Running(head);
        if head.is_paused() {
            return Ok(None);
        }

        let position = head.position(now);
        self.dispatch_until(position)?;

        if self.cursor == self.actions.len() {
            self.scheduler.send(PlaybackUpdate::Progress {
                cursor: self.total,
                total: self.total,
            });
            self.release_everything();
            self.enter(PlaybackState::Completed);
            self.scheduler.send(PlaybackUpdate::Completed);
            self.enter(PlaybackState::Idle);
            return Ok(Some(SessionOutcome::Completed));
        }

        let due = self
            .last_progress
            .is_none_or(|last| now.saturating_sub(last) >= self.scheduler.options.progress_interval);
        if due {
            self.last_progress = Some(now);
            self.scheduler.send(PlaybackUpdate::Progress {
                cursor: position.min(self.total),
                total: self.total,
            });
        }
        Ok(None)
    }

    fn dispatch_until(&mut self, position: f64) -> Result<()> {
        let actuator = &self.scheduler.actuator;
        let events = self.sequence.events();
        while let Some(&action) = self.actions.get(self.cursor) {
            if action.time > position {
                break;
            }
            let keys = events[action.event].keys();
            match action.kind {
                ActionKind::Press => {
                    actuator.press(keys)?;
                    self.held.insert(action.event);
                }
                ActionKind::Release | ActionKind::TapRelease => {
                    if self.held.remove(&action.event) {
                        actuator.release(keys)?;
                    }
                }
            }
            trace!(event = action.event, kind = ?action.kind, at = action.time, "dispatched");
            self.cursor += 1;
        }
        Ok(())
    }

    fn for_each_held(&self, op: impl Fn(&KeyActuator, &[KeyId]) -> Result<()>) -> Result<()> {
        let events = self.sequence.events();
        for &event in &self.held {
            op(&self.scheduler.actuator, events[event].keys())?;
        }
        Ok(())
    }

    fn release_everything(&mut self) {
        self.held.clear();
        if let Err(err) = self.scheduler.actuator.release_all() {
            error!(%err, "release-all failed");
        }
    }

    fn enter(&self, state: PlaybackState) {
        let previous = self.scheduler.control.state.transition(state);
        info!(from = %previous, to = %state, "playback state changed");
        self.scheduler.send(PlaybackUpdate::State(state));
    }
}

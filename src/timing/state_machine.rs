use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PlaybackState {
    Idle = 0,
    CountingDown = 1,
    Playing = 2,
    Paused = 3,
    Completed = 4,
    Stopped = 5,
}

impl PlaybackState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PlaybackState::CountingDown,
            2 => PlaybackState::Playing,
            3 => PlaybackState::Paused,
            4 => PlaybackState::Completed,
            5 => PlaybackState::Stopped,
            _ => PlaybackState::Idle,
        }
    }

    /// Edges of `Idle -> CountingDown -> Playing <-> Paused -> {Completed | Stopped} -> Idle`.
    /// A cancelled countdown returns straight to `Idle`.
    pub fn can_transition_to(self, next: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, next),
            (Idle, CountingDown)
                | (Idle, Playing)
                | (CountingDown, Playing)
                | (CountingDown, Idle)
                | (Playing, Paused)
                | (Paused, Playing)
                | (Playing, Completed)
                | (Playing, Stopped)
                | (Paused, Stopped)
                | (Completed, Idle)
                | (Stopped, Idle)
        )
    }

    /// True while a session holds the scheduler.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PlaybackState::CountingDown | PlaybackState::Playing | PlaybackState::Paused
        )
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::CountingDown => "counting down",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Completed => "completed",
            PlaybackState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Lock-free holder of the current state, readable from any thread.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: PlaybackState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> PlaybackState {
        PlaybackState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Only the dispatch loop writes; illegal edges are a programming error.
    pub(crate) fn transition(&self, next: PlaybackState) -> PlaybackState {
        let previous = PlaybackState::from_u8(self.0.swap(next as u8, Ordering::AcqRel));
        debug_assert!(
            previous.can_transition_to(next),
            "illegal playback transition {previous} -> {next}"
        );
        previous
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(PlaybackState::Idle)
    }
}

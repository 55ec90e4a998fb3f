//! Keyboard auto-performance engine.
//!
//! LRCp scores and MIDI files are turned into timed key events over a
//! 28-key layout (three bands of seven degrees plus seven chord keys), then
//! played back through an OS key-injection backend by a drift-corrected
//! scheduler.

pub mod actuator;
pub mod engine;
pub mod error;
pub mod events;
pub mod keymap;
pub mod melody;
pub mod midi;
pub mod notation;
pub mod pipeline;
pub mod settings;
pub mod timing;

pub use actuator::{KeyActuator, KeyInjector, KeyStroke, LoggingInjector, MemoryInjector};
pub use engine::{EngineCommand, EngineHandle, spawn_engine};
pub use error::{InjectError, KeyplayError, Result};
pub use events::{Event, EventSequence, RawNote};
pub use keymap::{Band, BlackKeyStrategy, Chord, KeyId, KeyLayout, NoteMapper, NoteToken};
pub use melody::{MelodyConfig, MelodyMode, MelodyReducer};
pub use settings::{PlaybackMode, Settings};
pub use timing::{
    PlaybackControl, PlaybackScheduler, PlaybackState, PlaybackUpdate, PostProcessor,
    SchedulerOptions, SessionOutcome,
};

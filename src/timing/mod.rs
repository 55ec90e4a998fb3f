mod postprocess;
mod scheduler;
mod state_machine;

pub use postprocess::{
    BlackKeyPolicy, PostProcessConfig, PostProcessor, quantize, rescale, transpose_black_keys,
};
pub use scheduler::{
    Clock, MAX_SPEED, MIN_SPEED, ManualClock, MonotonicClock, PlayHead, PlaybackControl,
    PlaybackScheduler, PlaybackUpdate, SchedulerOptions, Session, SessionOutcome, clamp_speed,
};
pub use state_machine::{PlaybackState, StateCell};

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KeyplayError, Result};
use crate::keymap::KeyLayout;
use crate::melody::MelodyConfig;
use crate::timing::{MAX_SPEED, MIN_SPEED, PostProcessConfig, SchedulerOptions};

/// Which input pipeline feeds the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    #[default]
    Lrcp,
    Midi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub mode: PlaybackMode,
    pub speed: f64,
    pub countdown_secs: u32,
    pub release_on_pause: bool,
    pub poll_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            mode: PlaybackMode::Lrcp,
            speed: 1.0,
            countdown_secs: 3,
            release_on_pause: false,
            poll_interval_ms: 1,
        }
    }
}

impl PlaybackConfig {
    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            countdown: Duration::from_secs(u64::from(self.countdown_secs)),
            release_on_pause: self.release_on_pause,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            ..SchedulerOptions::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub layout: String,
    pub recognize_chords: bool,
    /// Span after each melody onset searched for accompanying chords.
    pub chord_window_ms: u32,
    /// Grouping window of the key-notation exporter.
    pub notation_window_ms: u32,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            layout: "default".to_string(),
            recognize_chords: true,
            chord_window_ms: 200,
            notation_window_ms: 50,
        }
    }
}

impl MappingConfig {
    pub fn key_layout(&self) -> KeyLayout {
        KeyLayout::by_name(&self.layout)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub melody: MelodyConfig,
    pub postprocess: PostProcessConfig,
    pub playback: PlaybackConfig,
    pub mapping: MappingConfig,
}

impl Settings {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let ron_string = fs::read_to_string(path)?;
        let settings: Settings = ron::from_str(&ron_string)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(KeyplayError::InvalidConfig(msg));

        let speed = self.playback.speed;
        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return invalid(format!("speed {speed} outside {MIN_SPEED}..={MAX_SPEED}"));
        }
        let melody = &self.melody;
        if !(0.0..=1.0).contains(&melody.intensity) {
            return invalid(format!("intensity {} outside 0..=1", melody.intensity));
        }
        if melody.window_ms == 0 || melody.context_ms == 0 || self.mapping.chord_window_ms == 0 {
            return invalid("melody and chord windows must be non-zero".to_string());
        }
        if !(melody.repetition_penalty >= 0.0) || !(melody.entropy_weight >= 0.0) {
            return invalid("repetition penalty and entropy weight must be non-negative".to_string());
        }
        if melody.priority_channel.is_some_and(|c| c > 15) {
            return invalid("priority channel must be 0..=15".to_string());
        }
        let w = melody.weights;
        if [w.entropy, w.beat, w.repetition].iter().any(|x| !(*x >= 0.0))
            || w.entropy + w.beat + w.repetition <= 0.0
        {
            return invalid("hybrid weights must be non-negative and not all zero".to_string());
        }
        for (name, bpm) in [("melody.bpm", melody.bpm), ("target_bpm", self.postprocess.target_bpm)] {
            if bpm.is_some_and(|b| !(b > 0.0) || !b.is_finite()) {
                return invalid(format!("{name} must be positive"));
            }
        }
        if self.postprocess.quantize_ms == Some(0) {
            return invalid("quantization window must be non-zero".to_string());
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::{EventSequence, RawNote, Timed};
use crate::keymap::{BlackKeyStrategy, is_black_key};

/// What happens to pitches outside the diatonic set before mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlackKeyPolicy {
    /// Pass through; the mapper applies its fixed `folded` table.
    #[default]
    #[serde(alias = "folded")]
    None,
    /// Transpose black keys down one semitone.
    Down,
    /// Merge to the nearest lower degree in the same band (`qmp`).
    #[serde(alias = "qmp")]
    Nearest,
}

impl BlackKeyPolicy {
    pub fn mapper_strategy(self) -> BlackKeyStrategy {
        match self {
            BlackKeyPolicy::Nearest => BlackKeyStrategy::Qmp,
            BlackKeyPolicy::None | BlackKeyPolicy::Down => BlackKeyStrategy::Folded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub black_keys: BlackKeyPolicy,
    /// Snap grid in milliseconds. `None` disables quantization.
    pub quantize_ms: Option<u32>,
    /// Rescale times by `target_bpm / source_bpm` when set.
    pub target_bpm: Option<f64>,
    /// Also retime LRCp input (tempo and quantization only).
    pub apply_to_lrcp: bool,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            black_keys: BlackKeyPolicy::None,
            quantize_ms: Some(30),
            target_bpm: None,
            apply_to_lrcp: false,
        }
    }
}

pub fn rescale<T: Timed>(items: &[T], factor: f64) -> Vec<T> {
    items
        .iter()
        .map(|item| item.with_times(item.start() * factor, item.end() * factor))
        .collect()
}

fn snap(t: f64, grid: f64) -> f64 {
    (t / grid).round() * grid
}

/// Snaps start and end independently to the nearest multiple of the grid.
/// Re-quantizing with the same grid is a no-op.
pub fn quantize<T: Timed>(items: &[T], window_ms: u32) -> Vec<T> {
    let grid = window_ms.max(1) as f64 / 1000.0;
    let mut out: Vec<T> = items
        .iter()
        .map(|item| item.with_times(snap(item.start(), grid), snap(item.end(), grid)))
        .collect();
    out.sort_by(|a, b| a.start().total_cmp(&b.start()));
    out
}

pub fn transpose_black_keys(notes: &[RawNote], policy: BlackKeyPolicy) -> Vec<RawNote> {
    notes
        .iter()
        .map(|note| match policy {
            BlackKeyPolicy::Down if is_black_key(note.pitch) => RawNote {
                pitch: note.pitch - 1,
                ..*note
            },
            _ => *note,
        })
        .collect()
}

pub struct PostProcessor {
    config: PostProcessConfig,
    source_bpm: Option<f64>,
}

impl PostProcessor {
    pub fn new(config: PostProcessConfig, source_bpm: Option<f64>) -> Self {
        Self { config, source_bpm }
    }

    pub fn tempo_factor(&self) -> Option<f64> {
        match (self.config.target_bpm, self.source_bpm) {
            (Some(target), Some(source)) if target > 0.0 && source > 0.0 => Some(target / source),
            _ => None,
        }
    }

    /// Tempo rescale, then black-key transposition, then quantization.
    pub fn process_notes(&self, notes: &[RawNote]) -> Vec<RawNote> {
        let mut notes = match self.tempo_factor() {
            Some(factor) => rescale(notes, factor),
            None => notes.to_vec(),
        };
        notes = transpose_black_keys(&notes, self.config.black_keys);
        if let Some(window) = self.config.quantize_ms {
            notes = quantize(&notes, window);
        }
        notes.sort_by(|a, b| a.start.total_cmp(&b.start));
        debug!(notes = notes.len(), factor = ?self.tempo_factor(), "post-processed notes");
        notes
    }

    /// Time-only steps for an already mapped sequence.
    pub fn process_events(&self, sequence: &EventSequence) -> EventSequence {
        let mut events = sequence.events().to_vec();
        if let Some(factor) = self.tempo_factor() {
            events = rescale(&events, factor);
        }
        if let Some(window) = self.config.quantize_ms {
            events = quantize(&events, window);
        }
        EventSequence::from_unsorted(events)
    }

    pub fn mapper_strategy(&self) -> BlackKeyStrategy {
        self.config.black_keys.mapper_strategy()
    }
}

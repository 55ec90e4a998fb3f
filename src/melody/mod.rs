//! Reduction of a polyphonic note stream into a performable line.

mod reducer;
mod scoring;

use serde::{Deserialize, Serialize};

pub use reducer::MelodyReducer;
pub use scoring::{ScoredNote, Scorer, estimate_beat_period};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MelodyMode {
    #[default]
    Entropy,
    Beat,
    Repetition,
    Hybrid,
}

/// Relative weights of the three heuristics under [`MelodyMode::Hybrid`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridWeights {
    pub entropy: f64,
    pub beat: f64,
    pub repetition: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            entropy: 1.0,
            beat: 1.0,
            repetition: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MelodyConfig {
    pub mode: MelodyMode,
    /// 0.0 ..= 1.0. Higher values tighten the beat tolerance.
    pub intensity: f64,
    /// Subtracted from the repetition score of an immediate repeat.
    pub repetition_penalty: f64,
    /// Sensitivity of the entropy score to local pitch disorder.
    pub entropy_weight: f64,
    pub min_score: Option<f64>,
    pub priority_channel: Option<u8>,
    /// Reduction window.
    pub window_ms: u32,
    /// Context span for the entropy and repetition heuristics.
    pub context_ms: u32,
    /// Beat grid tempo. Falls back to the file tempo, then to an onset estimate.
    pub bpm: Option<f64>,
    pub weights: HybridWeights,
}

impl Default for MelodyConfig {
    fn default() -> Self {
        Self {
            mode: MelodyMode::Entropy,
            intensity: 0.5,
            repetition_penalty: 0.25,
            entropy_weight: 0.5,
            min_score: None,
            priority_channel: None,
            window_ms: 80,
            context_ms: 2000,
            bpm: None,
            weights: HybridWeights::default(),
        }
    }
}

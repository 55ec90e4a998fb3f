use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{HybridWeights, MelodyConfig, MelodyMode};
use crate::events::RawNote;

const ENTROPY_GAIN: f64 = 4.0;
/// ln(12): entropy of a uniform pitch-class distribution.
const MAX_PC_ENTROPY: f64 = 2.484_906_649_788_000_4;
const IOI_BIN_SECS: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredNote {
    pub note: RawNote,
    pub salience: f64,
}

/// Per-note salience under one of the melody modes. `Hybrid` combines the
/// three single heuristics.
///
/// Notes must be passed sorted by start; scores are indexed the same way.
#[derive(Debug, Clone)]
pub enum Scorer {
    Entropy(EntropyScorer),
    Beat(BeatScorer),
    Repetition(RepetitionScorer),
    Hybrid(HybridScorer),
}

impl Scorer {
    /// `source_bpm` is the tempo of the input file. The beat grid uses it
    /// when the config sets no BPM of its own.
    pub fn build(config: &MelodyConfig, notes: &[RawNote], source_bpm: Option<f64>) -> Self {
        let context = config.context_ms.max(1) as f64 / 1000.0;
        let bpm = config.bpm.or(source_bpm);
        match config.mode {
            MelodyMode::Entropy => {
                Scorer::Entropy(EntropyScorer::new(notes, context, config.entropy_weight))
            }
            MelodyMode::Beat => Scorer::Beat(BeatScorer::new(notes, bpm, config.intensity)),
            MelodyMode::Repetition => Scorer::Repetition(RepetitionScorer::new(
                notes,
                context,
                config.repetition_penalty,
            )),
            MelodyMode::Hybrid => Scorer::Hybrid(HybridScorer {
                entropy: EntropyScorer::new(notes, context, config.entropy_weight),
                beat: BeatScorer::new(notes, bpm, config.intensity),
                repetition: RepetitionScorer::new(notes, context, config.repetition_penalty),
                weights: config.weights,
            }),
        }
    }

    /// Salience of note `index` given the pitch of the previously retained note.
    pub fn salience(&self, index: usize, notes: &[RawNote], previous: Option<i32>) -> f64 {
        match self {
            Scorer::Entropy(s) => s.scores[index],
            Scorer::Beat(s) => s.scores[index],
            Scorer::Repetition(s) => s.salience(index, notes, previous),
            Scorer::Hybrid(s) => s.salience(index, notes, previous),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntropyScorer {
    scores: Vec<f64>,
}

impl EntropyScorer {
    /// Scores each note by how much it lowers the pitch-class entropy of the
    /// window of `context` seconds centred on its onset.
    fn new(notes: &[RawNote], context: f64, weight: f64) -> Self {
        let half = context / 2.0;
        let scores = notes
            .iter()
            .map(|note| {
                let lo = notes.partition_point(|n| n.start < note.start - half);
                let hi = notes.partition_point(|n| n.start <= note.start + half);
                let mut counts = [0usize; 12];
                for n in &notes[lo..hi] {
                    counts[pitch_class(n.pitch)] += 1;
                }
                let with = entropy(&counts);
                counts[pitch_class(note.pitch)] -= 1;
                let without = entropy(&counts);
                let contribution = (with - without) / MAX_PC_ENTROPY;
                0.5 * (1.0 - (ENTROPY_GAIN * weight * contribution).tanh())
            })
            .collect();
        Self { scores }
    }
}

#[derive(Debug, Clone)]
pub struct BeatScorer {
    scores: Vec<f64>,
}

impl BeatScorer {
    fn new(notes: &[RawNote], bpm: Option<f64>, intensity: f64) -> Self {
        let period = match bpm.filter(|b| *b > 0.0) {
            Some(bpm) => Some(60.0 / bpm),
            None => estimate_beat_period(notes),
        };
        let (Some(period), Some(first)) = (period, notes.first()) else {
            return Self {
                scores: vec![1.0; notes.len()],
            };
        };

        let anchor = first.start;
        let half = period / 2.0;
        let tolerance = period * (0.35 - 0.23 * intensity.clamp(0.0, 1.0)) / 2.0;
        let scores = notes
            .iter()
            .map(|note| {
                let phase = (note.start - anchor) / period;
                let distance = (phase - phase.round()).abs() * period;
                if distance <= tolerance {
                    1.0 - 0.5 * distance / tolerance
                } else {
                    0.5 * (1.0 - (distance - tolerance) / (half - tolerance)).max(0.0)
                }
            })
            .collect();
        Self { scores }
    }
}

/// Most frequent inter-onset interval, binned to 20 ms.
pub fn estimate_beat_period(notes: &[RawNote]) -> Option<f64> {
    let onsets: Vec<f64> = {
        let mut starts: Vec<f64> = notes.iter().map(|n| n.start).collect();
        starts.sort_by(f64::total_cmp);
        starts.dedup_by(|a, b| (*a - *b).abs() < 1e-3);
        starts
    };
    let mut bins: BTreeMap<u64, usize> = BTreeMap::new();
    for pair in onsets.windows(2) {
        let ioi = pair[1] - pair[0];
        let bin = ((ioi / IOI_BIN_SECS).round() as u64).max(1);
        *bins.entry(bin).or_default() += 1;
    }
    // Ties resolve to the shortest interval.
    let (bin, _) = bins
        .into_iter()
        .fold(None, |best: Option<(u64, usize)>, (bin, count)| match best {
            Some((_, c)) if c >= count => best,
            _ => Some((bin, count)),
        })?;
    Some(bin as f64 * IOI_BIN_SECS)
}

#[derive(Debug, Clone)]
pub struct RepetitionScorer {
    scores: Vec<f64>,
    penalty: f64,
}

impl RepetitionScorer {
    /// Pitches that recur across many context windows score higher.
    fn new(notes: &[RawNote], context: f64, penalty: f64) -> Self {
        let window_of = |n: &RawNote| (n.start / context).floor() as i64;
        let mut windows_by_pitch: HashMap<i32, BTreeSet<i64>> = HashMap::new();
        let mut all_windows = BTreeSet::new();
        for n in notes {
            windows_by_pitch.entry(n.pitch).or_default().insert(window_of(n));
            all_windows.insert(window_of(n));
        }
        let span = all_windows.len().saturating_sub(1);

        let scores = notes
            .iter()
            .map(|n| {
                if span == 0 {
                    return 0.5;
                }
                let seen = windows_by_pitch[&n.pitch].len() - 1;
                0.5 + 0.5 * seen as f64 / span as f64
            })
            .collect();
        Self { scores, penalty }
    }

    fn salience(&self, index: usize, notes: &[RawNote], previous: Option<i32>) -> f64 {
        let base = self.scores[index];
        if previous == Some(notes[index].pitch) {
            (base - self.penalty).max(0.0)
        } else {
            base
        }
    }
}

#[derive(Debug, Clone)]
pub struct HybridScorer {
    entropy: EntropyScorer,
    beat: BeatScorer,
    repetition: RepetitionScorer,
    weights: HybridWeights,
}

impl HybridScorer {
    fn salience(&self, index: usize, notes: &[RawNote], previous: Option<i32>) -> f64 {
        let HybridWeights {
            entropy,
            beat,
            repetition,
        } = self.weights;
        let (we, wb, wr, total) = match entropy + beat + repetition {
            total if total > 0.0 => (entropy, beat, repetition, total),
            _ => (1.0, 1.0, 1.0, 3.0),
        };
        (we * self.entropy.scores[index]
            + wb * self.beat.scores[index]
            + wr * self.repetition.salience(index, notes, previous))
            / total
    }
}

fn pitch_class(pitch: i32) -> usize {
    pitch.rem_euclid(12) as usize
}

fn entropy(counts: &[usize; 12]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.ln()
        })
        .sum()
}

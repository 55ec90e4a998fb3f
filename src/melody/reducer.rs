use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::debug;

use super::{MelodyConfig, ScoredNote, Scorer};
use crate::events::RawNote;

pub struct MelodyReducer {
    config: MelodyConfig,
    source_bpm: Option<f64>,
}

impl MelodyReducer {
    pub fn new(config: MelodyConfig) -> Self {
        Self {
            config,
            source_bpm: None,
        }
    }

    /// Tempo read from the input file, used by the beat grid when the
    /// config carries no BPM.
    pub fn with_source_bpm(mut self, bpm: Option<f64>) -> Self {
        self.source_bpm = bpm.filter(|b| *b > 0.0 && b.is_finite());
        self
    }

    pub fn config(&self) -> &MelodyConfig {
        &self.config
    }

    /// Context-free salience of every note, sorted by onset.
    pub fn score(&self, notes: &[RawNote]) -> Vec<ScoredNote> {
        let sorted = sort_notes(notes);
        let scorer = Scorer::build(&self.config, &sorted, self.source_bpm);
        sorted
            .iter()
            .enumerate()
            .map(|(i, note)| ScoredNote {
                note: *note,
                salience: scorer.salience(i, &sorted, None),
            })
            .collect()
    }

    /// Keeps at most one note per reduction window (all priority-channel
    /// notes when the window has any), dropping winners below `min_score`.
    pub fn reduce(&self, notes: &[RawNote]) -> Vec<RawNote> {
        if notes.is_empty() {
            return Vec::new();
        }
        let sorted = sort_notes(notes);
        let scorer = Scorer::build(&self.config, &sorted, self.source_bpm);
        let retained = self.reduce_windows(&sorted, &scorer);

        debug!(
            input = notes.len(),
            retained = retained.len(),
            mode = ?self.config.mode,
            "melody reduction finished"
        );
        retained
    }

    fn passes_threshold(&self, salience: f64) -> bool {
        self.config.min_score.is_none_or(|min| salience >= min)
    }

    fn is_priority(&self, note: &RawNote) -> bool {
        self.config.priority_channel == Some(note.channel)
    }

    fn reduce_windows(&self, sorted: &[RawNote], scorer: &Scorer) -> Vec<RawNote> {
        let window = self.config.window_ms.max(1) as f64 / 1000.0;
        let mut windows: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, note) in sorted.iter().enumerate() {
            windows
                .entry((note.start / window).floor() as i64)
                .or_default()
                .push(i);
        }

        let mut out = Vec::with_capacity(windows.len());
        let mut previous: Option<i32> = None;

        for members in windows.values() {
            let priority: Vec<usize> = members
                .iter()
                .copied()
                .filter(|&i| self.is_priority(&sorted[i]))
                .collect();
            if !priority.is_empty() {
                out.extend(priority.iter().map(|&i| sorted[i]));
                previous = priority.last().map(|&i| sorted[i].pitch);
                continue;
            }

            let best = members
                .iter()
                .map(|&i| (i, scorer.salience(i, sorted, previous)))
                .max_by(|a, b| rank(sorted, *a, *b));
            let Some((index, salience)) = best else {
                continue;
            };
            if !self.passes_threshold(salience) {
                continue;
            }
            out.push(sorted[index]);
            previous = Some(sorted[index].pitch);
        }

        out.sort_by(|a, b| a.start.total_cmp(&b.start));
        out
    }
}

/// Higher salience wins; ties go to the lower channel, then the earlier
/// onset, then the higher pitch.
fn rank(notes: &[RawNote], (ia, sa): (usize, f64), (ib, sb): (usize, f64)) -> Ordering {
    let (a, b) = (&notes[ia], &notes[ib]);
    sa.total_cmp(&sb)
        .then_with(|| b.channel.cmp(&a.channel))
        .then_with(|| b.start.total_cmp(&a.start))
        .then_with(|| a.pitch.cmp(&b.pitch))
        .then_with(|| b.track.cmp(&a.track))
        .then_with(|| ib.cmp(&ia))
}

fn sort_notes(notes: &[RawNote]) -> Vec<RawNote> {
    let mut sorted = notes.to_vec();
    sorted.sort_by(|a, b| {
        a.start
            .total_cmp(&b.start)
            .then_with(|| a.channel.cmp(&b.channel))
            .then_with(|| a.pitch.cmp(&b.pitch))
    });
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melody::MelodyMode;

    fn note(pitch: i32, start: f64, channel: u8) -> RawNote {
        RawNote {
            pitch,
            start,
            end: start + 0.3,
            velocity: 80,
            channel,
            track: channel as usize,
        }
    }

    fn reducer(config: MelodyConfig) -> MelodyReducer {
        MelodyReducer::new(config)
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(reducer(MelodyConfig::default()).reduce(&[]).is_empty());
    }

    #[test]
    fn keeps_one_note_per_window() {
        let notes = vec![
            note(60, 0.00, 0),
            note(64, 0.01, 1),
            note(67, 0.02, 2),
            note(72, 0.50, 0),
        ];
        let out = reducer(MelodyConfig::default()).reduce(&notes);
        assert_eq!(out.len(), 2);
        assert!(out[0].start < 0.08);
        assert_eq!(out[1].start, 0.50);
    }

    #[test]
    fn ties_prefer_lowest_channel_then_earliest_onset() {
        // A zero entropy weight scores every note 0.5.
        let config = MelodyConfig {
            entropy_weight: 0.0,
            ..MelodyConfig::default()
        };
        let notes = vec![note(64, 0.00, 3), note(60, 0.03, 1), note(67, 0.01, 1)];
        let out = reducer(config).reduce(&notes);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].channel, 1);
        assert_eq!(out[0].pitch, 67);
    }

    #[test]
    fn threshold_can_leave_windows_silent() {
        let config = MelodyConfig {
            mode: MelodyMode::Repetition,
            min_score: Some(0.9),
            ..MelodyConfig::default()
        };
        let notes = vec![
            note(60, 0.0, 0),
            note(62, 0.5, 0),
            note(60, 2.5, 0),
            note(60, 4.5, 0),
        ];
        let out = reducer(config).reduce(&notes);
        assert!(out.iter().all(|n| n.pitch == 60));
        assert!(out.len() < notes.len());
    }

    #[test]
    fn repetition_penalty_discourages_immediate_repeats() {
        let config = MelodyConfig {
            mode: MelodyMode::Repetition,
            repetition_penalty: 0.9,
            window_ms: 100,
            ..MelodyConfig::default()
        };
        // Window 2 holds a repeat of the previous pitch and a fresh one.
        let notes = vec![note(60, 0.0, 0), note(60, 0.2, 0), note(62, 0.2, 1)];
        let out = reducer(config).reduce(&notes);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].pitch, 62);
    }

    #[test]
    fn priority_channel_bypasses_scoring() {
        let config = MelodyConfig {
            priority_channel: Some(9),
            min_score: Some(2.0),
            ..MelodyConfig::default()
        };
        let notes = vec![note(60, 0.0, 0), note(40, 0.01, 9), note(43, 0.02, 9), note(62, 1.0, 0)];
        let out = reducer(config).reduce(&notes);
        let pitches: Vec<i32> = out.iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![40, 43]);
    }

    #[test]
    fn zero_intensity_still_reduces_to_one_line() {
        let config = MelodyConfig {
            intensity: 0.0,
            ..MelodyConfig::default()
        };
        let notes = vec![note(60, 0.0, 0), note(64, 0.0, 0), note(67, 0.0, 0)];
        assert_eq!(reducer(config).reduce(&notes).len(), 1);
    }

    #[test]
    fn source_tempo_steers_beat_mode() {
        let config = MelodyConfig {
            mode: MelodyMode::Beat,
            ..MelodyConfig::default()
        };
        // 0.50 and 0.53 share a window; only 0.50 sits on the 120 BPM grid.
        let notes = vec![note(60, 0.0, 0), note(64, 0.50, 1), note(67, 0.53, 0)];
        let with_tempo = reducer(config.clone())
            .with_source_bpm(Some(120.0))
            .reduce(&notes);
        assert_eq!(with_tempo.len(), 2);
        assert_eq!(with_tempo[1].pitch, 64);

        // The onset estimate alone lands on a 40 ms grid instead.
        let estimated = reducer(config).reduce(&notes);
        assert_eq!(estimated[1].pitch, 67);
    }

    #[test]
    fn reduction_is_deterministic() {
        let notes: Vec<RawNote> = (0..40)
            .map(|i| note(55 + (i * 7) % 24, i as f64 * 0.037, (i % 3) as u8))
            .collect();
        let config = MelodyConfig {
            mode: MelodyMode::Hybrid,
            ..MelodyConfig::default()
        };
        let a = reducer(config.clone()).reduce(&notes);
        let b = reducer(config).reduce(&notes);
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0].start <= w[1].start));
    }
}

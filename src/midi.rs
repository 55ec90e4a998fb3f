//! Standard MIDI File reader producing [`RawNote`]s in seconds.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use midly::{Fps, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use tracing::debug;

use crate::error::Result;
use crate::events::RawNote;

const DEFAULT_US_PER_QUARTER: u32 = 500_000;

#[derive(Debug, Clone, PartialEq)]
pub struct MidiNotes {
    pub notes: Vec<RawNote>,
    /// Tempo in effect at tick 0.
    pub source_bpm: f64,
}

pub fn load_midi(path: &Path) -> Result<MidiNotes> {
    let bytes = std::fs::read(path)?;
    read_midi(&bytes)
}

pub fn read_midi(bytes: &[u8]) -> Result<MidiNotes> {
    let smf = Smf::parse(bytes)?;
    let tempo_map = TempoMap::from_smf(&smf);

    let mut notes = Vec::new();
    for (track, events) in smf.tracks.iter().enumerate() {
        // FIFO per (channel, key): overlapping same-pitch notes close in order.
        let mut open: HashMap<(u8, u8), VecDeque<(u64, u8)>> = HashMap::new();
        let mut tick = 0u64;

        for event in events {
            tick += u64::from(event.delta.as_int());
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    open.entry((channel, key.as_int()))
                        .or_default()
                        .push_back((tick, vel.as_int()));
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    let Some((start, velocity)) = open
                        .get_mut(&(channel, key.as_int()))
                        .and_then(VecDeque::pop_front)
                    else {
                        continue;
                    };
                    notes.push(RawNote {
                        pitch: i32::from(key.as_int()),
                        start: tempo_map.seconds(start),
                        end: tempo_map.seconds(tick),
                        velocity,
                        channel,
                        track,
                    });
                }
                _ => {}
            }
        }

        for ((channel, key), pending) in open {
            for (start, velocity) in pending {
                notes.push(RawNote {
                    pitch: i32::from(key),
                    start: tempo_map.seconds(start),
                    end: tempo_map.seconds(tick),
                    velocity,
                    channel,
                    track,
                });
            }
        }
    }

    notes.sort_by(|a, b| {
        a.start
            .total_cmp(&b.start)
            .then(a.track.cmp(&b.track))
            .then(a.channel.cmp(&b.channel))
            .then(a.pitch.cmp(&b.pitch))
    });
    debug!(
        notes = notes.len(),
        tracks = smf.tracks.len(),
        bpm = tempo_map.initial_bpm(),
        "read MIDI file"
    );

    Ok(MidiNotes {
        notes,
        source_bpm: tempo_map.initial_bpm(),
    })
}

#[derive(Debug, Clone, Copy)]
struct TempoSegment {
    tick: u64,
    seconds: f64,
    us_per_quarter: u32,
}

/// Global tick-to-seconds conversion built from every track's tempo events.
struct TempoMap {
    ticks_per_quarter: Option<f64>,
    seconds_per_tick: f64,
    segments: Vec<TempoSegment>,
}

impl TempoMap {
    fn from_smf(smf: &Smf) -> Self {
        match smf.header.timing {
            Timing::Metrical(tpq) => {
                let tpq = f64::from(tpq.as_int().max(1));
                let mut changes: Vec<(u64, u32)> = Vec::new();
                for track in &smf.tracks {
                    let mut tick = 0u64;
                    for event in track {
                        tick += u64::from(event.delta.as_int());
                        if let TrackEventKind::Meta(MetaMessage::Tempo(us)) = event.kind {
                            changes.push((tick, us.as_int()));
                        }
                    }
                }
                changes.sort_by_key(|(tick, _)| *tick);

                let mut segments = vec![TempoSegment {
                    tick: 0,
                    seconds: 0.0,
                    us_per_quarter: DEFAULT_US_PER_QUARTER,
                }];
                for (tick, us) in changes {
                    let last = segments[segments.len() - 1];
                    let seconds = last.seconds
                        + (tick - last.tick) as f64 * f64::from(last.us_per_quarter) / 1e6 / tpq;
                    if tick == last.tick {
                        segments.pop();
                    }
                    segments.push(TempoSegment {
                        tick,
                        seconds,
                        us_per_quarter: us.max(1),
                    });
                }
                Self {
                    ticks_per_quarter: Some(tpq),
                    seconds_per_tick: 0.0,
                    segments,
                }
            }
            Timing::Timecode(fps, subframes) => {
                let fps = match fps {
                    Fps::Fps24 => 24.0,
                    Fps::Fps25 => 25.0,
                    Fps::Fps29 => 29.97,
                    Fps::Fps30 => 30.0,
                };
                Self {
                    ticks_per_quarter: None,
                    seconds_per_tick: 1.0 / (fps * f64::from(subframes.max(1))),
                    segments: Vec::new(),
                }
            }
        }
    }

    fn seconds(&self, tick: u64) -> f64 {
        let Some(tpq) = self.ticks_per_quarter else {
            return tick as f64 * self.seconds_per_tick;
        };
        let index = self.segments.partition_point(|s| s.tick <= tick).saturating_sub(1);
        let seg = self.segments[index];
        seg.seconds + (tick - seg.tick) as f64 * f64::from(seg.us_per_quarter) / 1e6 / tpq
    }

    fn initial_bpm(&self) -> f64 {
        let us = self
            .segments
            .first()
            .map_or(DEFAULT_US_PER_QUARTER, |s| s.us_per_quarter);
        60_000_000.0 / f64::from(us)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use midly::{Format, Header, Track, TrackEvent};

    /// `(absolute tick, channel, key, velocity)`; velocity 0 is a note-off.
    pub(crate) fn smf_bytes(tempos: &[(u32, u32)], notes: &[(u32, u8, u8, u8)]) -> Vec<u8> {
        let mut conductor: Track = Vec::new();
        let mut last = 0;
        for &(tick, us) in tempos {
            conductor.push(TrackEvent {
                delta: (tick - last).into(),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(us.into())),
            });
            last = tick;
        }
        conductor.push(TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        let mut part: Track = Vec::new();
        let mut last = 0;
        for &(tick, channel, key, vel) in notes {
            part.push(TrackEvent {
                delta: (tick - last).into(),
                kind: TrackEventKind::Midi {
                    channel: channel.into(),
                    message: MidiMessage::NoteOn {
                        key: key.into(),
                        vel: vel.into(),
                    },
                },
            });
            last = tick;
        }
        part.push(TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        let smf = Smf {
            header: Header {
                format: Format::Parallel,
                timing: Timing::Metrical(480.into()),
            },
            tracks: vec![conductor, part],
        };
        let mut out = Vec::new();
        smf.write(&mut out).unwrap();
        out
    }

    #[test]
    fn converts_ticks_through_tempo_changes() {
        // 120 BPM for one quarter, then 60 BPM.
        let bytes = smf_bytes(
            &[(0, 500_000), (480, 1_000_000)],
            &[(0, 0, 60, 90), (480, 0, 60, 0), (480, 0, 64, 90), (960, 0, 64, 0)],
        );
        let midi = read_midi(&bytes).unwrap();
        assert_eq!(midi.source_bpm, 120.0);
        assert_eq!(midi.notes.len(), 2);
        assert_eq!((midi.notes[0].start, midi.notes[0].end), (0.0, 0.5));
        assert_eq!((midi.notes[1].start, midi.notes[1].end), (0.5, 1.5));
        assert_eq!(midi.notes[1].track, 1);
    }

    #[test]
    fn pairs_overlapping_notes_first_in_first_out() {
        let bytes = smf_bytes(
            &[],
            &[(0, 2, 60, 80), (240, 2, 60, 70), (480, 2, 60, 0), (960, 2, 60, 0)],
        );
        let midi = read_midi(&bytes).unwrap();
        assert_eq!(midi.source_bpm, 120.0);
        assert_eq!(midi.notes.len(), 2);
        assert_eq!(midi.notes[0].velocity, 80);
        assert_eq!(midi.notes[0].end, 0.5);
        assert_eq!(midi.notes[1].velocity, 70);
        assert_eq!(midi.notes[1].end, 1.0);
        assert!(midi.notes.iter().all(|n| n.channel == 2));
    }

    #[test]
    fn unterminated_notes_end_at_last_tick() {
        let bytes = smf_bytes(&[], &[(0, 0, 67, 100), (960, 0, 72, 100)]);
        let midi = read_midi(&bytes).unwrap();
        assert_eq!(midi.notes.len(), 2);
        assert!(midi.notes.iter().all(|n| n.end == 1.0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(read_midi(b"not a midi file").is_err());
    }
}

//! Input-to-EventSequence pipelines for both playback modes.

use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::events::{EventSequence, RawNote};
use crate::keymap::NoteMapper;
use crate::melody::MelodyReducer;
use crate::midi::load_midi;
use crate::notation;
use crate::settings::{PlaybackMode, Settings};
use crate::timing::PostProcessor;

/// MelodyReducer, then PostProcessor, then NoteMapper. Chords are read
/// from the full polyphony, retimed the same way as the melody line.
pub fn midi_to_sequence(notes: &[RawNote], source_bpm: Option<f64>, settings: &Settings) -> EventSequence {
    let reduced = MelodyReducer::new(settings.melody.clone())
        .with_source_bpm(source_bpm)
        .reduce(notes);
    let post = PostProcessor::new(settings.postprocess.clone(), source_bpm);
    let line = post.process_notes(&reduced);
    let harmony = post.process_notes(notes);
    let mapper = NoteMapper::new(post.mapper_strategy(), settings.mapping.recognize_chords);
    let window = f64::from(settings.mapping.chord_window_ms) / 1000.0;
    let sequence = mapper.map_with_chords(&line, &harmony, window);
    info!(
        notes = notes.len(),
        reduced = reduced.len(),
        events = sequence.len(),
        "converted MIDI notes"
    );
    sequence
}

/// Parses LRCp text; tempo and quantization run only when
/// `postprocess.apply_to_lrcp` is set. LRCp carries no tempo of its own,
/// so the melody BPM stands in as the source tempo.
pub fn lrcp_to_sequence(text: &str, settings: &Settings) -> EventSequence {
    let sequence = notation::parse(text);
    if !settings.postprocess.apply_to_lrcp {
        return sequence;
    }
    PostProcessor::new(settings.postprocess.clone(), settings.melody.bpm).process_events(&sequence)
}

/// Picks the pipeline from the file extension, falling back to the
/// configured playback mode.
pub fn load_sequence(path: &Path, settings: &Settings) -> Result<EventSequence> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let mode = match extension.as_deref() {
        Some("mid" | "midi") => PlaybackMode::Midi,
        Some("lrcp" | "lrc" | "txt") => PlaybackMode::Lrcp,
        _ => settings.playback.mode,
    };
    match mode {
        PlaybackMode::Midi => {
            let midi = load_midi(path)?;
            Ok(midi_to_sequence(&midi.notes, Some(midi.source_bpm), settings))
        }
        PlaybackMode::Lrcp => {
            let text = std::fs::read_to_string(path)?;
            Ok(lrcp_to_sequence(&text, settings))
        }
    }
}

//! Pitch-to-key folding, chord recognition and physical key layouts.
//!
//! The playable surface has 28 keys: three bands of seven scale degrees
//! (`L1`..`H7`) and one row of seven chord keys (`C` .. `G7`).

use std::fmt;

use crate::events::{Event, EventSequence, RawNote};

/// Lowest pitch of the covered span (C3, first key of the low band).
pub const LOWEST_PITCH: i32 = 48;
/// Highest pitch of the covered span (B5, last key of the high band).
pub const HIGHEST_PITCH: i32 = 83;

pub const KEY_COUNT: usize = 28;
const NOTE_KEY_COUNT: u8 = 21;

/// Pitch classes of the major-scale degrees 1..=7.
const DIATONIC_PCS: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];

/// Fixed semitone-to-degree lookup used by the `folded` strategy.
/// Each black key takes the degree of the white key directly above it.
const FOLDED_DEGREES: [u8; 12] = [1, 2, 2, 3, 3, 4, 5, 5, 6, 6, 7, 7];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Band {
    Low,
    Mid,
    High,
}

impl Band {
    pub const ALL: [Band; 3] = [Band::Low, Band::Mid, Band::High];

    fn prefix(self) -> char {
        match self {
            Band::Low => 'L',
            Band::Mid => 'M',
            Band::High => 'H',
        }
    }

    fn from_prefix(c: char) -> Option<Self> {
        match c {
            'L' => Some(Band::Low),
            'M' => Some(Band::Mid),
            'H' => Some(Band::High),
            _ => None,
        }
    }

    fn index(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Chord {
    C,
    Dm,
    Em,
    F,
    G,
    Am,
    G7,
}

impl Chord {
    pub const ALL: [Chord; 7] = [
        Chord::C,
        Chord::Dm,
        Chord::Em,
        Chord::F,
        Chord::G,
        Chord::Am,
        Chord::G7,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Chord::C => "C",
            Chord::Dm => "Dm",
            Chord::Em => "Em",
            Chord::F => "F",
            Chord::G => "G",
            Chord::Am => "Am",
            Chord::G7 => "G7",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Chord::ALL.into_iter().find(|c| c.label() == label)
    }

    /// Degree set of the chord as a bitmask (bit `d` set for degree `d`).
    fn degree_mask(self) -> u8 {
        let degrees: &[u8] = match self {
            Chord::C => &[1, 3, 5],
            Chord::Dm => &[2, 4, 6],
            Chord::Em => &[3, 5, 7],
            Chord::F => &[4, 6, 1],
            Chord::G => &[5, 7, 2],
            Chord::Am => &[6, 1, 3],
            Chord::G7 => &[5, 7, 2, 4],
        };
        degrees.iter().fold(0, |mask, d| mask | (1 << d))
    }
}

/// One LRCp token: a banded scale degree or a chord label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteToken {
    Note { band: Band, degree: u8 },
    Chord(Chord),
}

impl NoteToken {
    /// Parses `L1`..`H7` or one of the seven chord labels.
    pub fn parse(token: &str) -> Option<Self> {
        let mut chars = token.chars();
        if let (Some(prefix), Some(digit), None) = (chars.next(), chars.next(), chars.next()) {
            if let Some(band) = Band::from_prefix(prefix) {
                let degree = digit.to_digit(10)? as u8;
                return (1..=7)
                    .contains(&degree)
                    .then_some(NoteToken::Note { band, degree });
            }
        }
        Chord::from_label(token).map(NoteToken::Chord)
    }
}

/// Opaque identifier of one physical key, 21 note keys followed by 7 chord keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyId(u8);

impl KeyId {
    pub fn note(band: Band, degree: u8) -> Self {
        debug_assert!((1..=7).contains(&degree));
        KeyId(band.index() * 7 + degree.clamp(1, 7) - 1)
    }

    pub fn chord(chord: Chord) -> Self {
        KeyId(NOTE_KEY_COUNT + chord as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = KeyId> {
        (0..KEY_COUNT as u8).map(KeyId)
    }

    pub fn token(self) -> NoteToken {
        if self.0 < NOTE_KEY_COUNT {
            NoteToken::Note {
                band: Band::ALL[(self.0 / 7) as usize],
                degree: self.0 % 7 + 1,
            }
        } else {
            NoteToken::Chord(Chord::ALL[(self.0 - NOTE_KEY_COUNT) as usize])
        }
    }

    /// Scale degree of a note key, `None` for chord keys.
    pub fn degree(self) -> Option<u8> {
        match self.token() {
            NoteToken::Note { degree, .. } => Some(degree),
            NoteToken::Chord(_) => None,
        }
    }
}

impl From<NoteToken> for KeyId {
    fn from(token: NoteToken) -> Self {
        match token {
            NoteToken::Note { band, degree } => KeyId::note(band, degree),
            NoteToken::Chord(chord) => KeyId::chord(chord),
        }
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.token() {
            NoteToken::Note { band, degree } => write!(f, "{}{}", band.prefix(), degree),
            NoteToken::Chord(chord) => f.write_str(chord.label()),
        }
    }
}

/// How pitches outside the diatonic set are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlackKeyStrategy {
    /// Fixed semitone-to-degree lookup, black keys round up.
    #[default]
    Folded,
    /// Merge to the nearest lower diatonic degree within the same band.
    Qmp,
}

/// Wraps a pitch into the covered span by whole-octave transposition.
pub fn fold_pitch(pitch: i32) -> i32 {
    if pitch < LOWEST_PITCH {
        LOWEST_PITCH + (pitch - LOWEST_PITCH).rem_euclid(12)
    } else if pitch > HIGHEST_PITCH {
        HIGHEST_PITCH - 11 + (pitch - (HIGHEST_PITCH - 11)).rem_euclid(12)
    } else {
        pitch
    }
}

pub fn is_black_key(pitch: i32) -> bool {
    !DIATONIC_PCS.contains(&(pitch.rem_euclid(12) as u8))
}

/// Matches a simultaneous degree set against the seven chord patterns.
/// Bands are ignored and duplicates collapse.
pub fn recognize_chord<I>(degrees: I) -> Option<Chord>
where
    I: IntoIterator<Item = u8>,
{
    let mask = degrees
        .into_iter()
        .filter(|d| (1..=7).contains(d))
        .fold(0u8, |mask, d| mask | (1 << d));
    if mask == 0 {
        return None;
    }
    Chord::ALL.into_iter().find(|c| c.degree_mask() == mask)
}

/// Harmony matching order: the seventh chord before the triad it contains.
const HARMONY_ORDER: [Chord; 7] = [
    Chord::G7,
    Chord::C,
    Chord::Dm,
    Chord::Em,
    Chord::F,
    Chord::G,
    Chord::Am,
];

/// First chord whose whole degree set is present in `degrees`. Unlike
/// [`recognize_chord`], extra degrees are tolerated.
pub fn chord_within<I>(degrees: I) -> Option<Chord>
where
    I: IntoIterator<Item = u8>,
{
    let mask = degrees
        .into_iter()
        .filter(|d| (1..=7).contains(d))
        .fold(0u8, |mask, d| mask | (1 << d));
    HARMONY_ORDER
        .into_iter()
        .find(|c| mask & c.degree_mask() == c.degree_mask())
}

#[derive(Debug, Clone, Copy)]
pub struct NoteMapper {
    pub strategy: BlackKeyStrategy,
    pub recognize_chords: bool,
}

impl Default for NoteMapper {
    fn default() -> Self {
        Self {
            strategy: BlackKeyStrategy::Folded,
            recognize_chords: true,
        }
    }
}

impl NoteMapper {
    pub fn new(strategy: BlackKeyStrategy, recognize_chords: bool) -> Self {
        Self {
            strategy,
            recognize_chords,
        }
    }

    pub fn band_and_degree(&self, pitch: i32) -> (Band, u8) {
        let folded = fold_pitch(pitch);
        let band = Band::ALL[((folded - LOWEST_PITCH) / 12) as usize];
        let pc = (folded - LOWEST_PITCH).rem_euclid(12) as u8;
        let degree = match DIATONIC_PCS.iter().position(|&p| p == pc) {
            Some(idx) => idx as u8 + 1,
            None => match self.strategy {
                BlackKeyStrategy::Folded => FOLDED_DEGREES[pc as usize],
                BlackKeyStrategy::Qmp => lower_diatonic_degree(pc),
            },
        };
        (band, degree)
    }

    pub fn map_pitch(&self, pitch: i32) -> KeyId {
        let (band, degree) = self.band_and_degree(pitch);
        KeyId::note(band, degree)
    }

    /// Collapses a simultaneous set of note keys into a chord key when the
    /// degree set matches a pattern, otherwise returns the note keys
    /// deduplicated and ordered by ascending degree.
    pub fn resolve(&self, keys: &[KeyId]) -> Vec<KeyId> {
        if self.recognize_chords && keys.len() > 1 {
            if let Some(chord) = recognize_chord(keys.iter().filter_map(|k| k.degree())) {
                return vec![KeyId::chord(chord)];
            }
        }
        let mut out: Vec<KeyId> = Vec::with_capacity(keys.len());
        for &key in keys {
            if !out.contains(&key) {
                out.push(key);
            }
        }
        out.sort_by_key(|k| (k.degree().unwrap_or(u8::MAX), *k));
        out
    }

    /// Groups notes sharing an onset into one Event and resolves its keys.
    pub fn map_notes(&self, notes: &[RawNote]) -> EventSequence {
        let mut sorted: Vec<&RawNote> = notes.iter().collect();
        sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

        let mut events = Vec::new();
        let mut i = 0;
        while i < sorted.len() {
            let start = sorted[i].start;
            let mut end = sorted[i].end;
            let mut keys = Vec::new();
            let mut j = i;
            while j < sorted.len() && (sorted[j].start - start).abs() < 1e-9 {
                end = end.max(sorted[j].end);
                keys.push(self.map_pitch(sorted[j].pitch));
                j += 1;
            }
            if let Some(event) = Event::new(start, end.max(start), self.resolve(&keys)) {
                events.push(event);
            }
            i = j;
        }
        EventSequence::from_sorted(events)
    }

    /// Maps a reduced melody line and adds chord keys heard in the full
    /// polyphony. At each melody onset the notes sounding during the next
    /// `window` seconds are matched with [`chord_within`]. A new chord key
    /// absorbs the melody keys at that onset whose degree it contains; a
    /// chord that is still held is not pressed again.
    pub fn map_with_chords(&self, line: &[RawNote], full: &[RawNote], window: f64) -> EventSequence {
        let melody = self.map_notes(line);
        if !self.recognize_chords || full.is_empty() {
            return melody;
        }

        let mut events: Vec<Event> = Vec::with_capacity(melody.len());
        // Chord currently held: (chord, release time, index in `events`).
        let mut held: Option<(Chord, f64, usize)> = None;

        for event in melody.iter() {
            let onset = event.start();
            if event.keys().iter().any(|k| k.degree().is_none()) {
                events.push(event.clone());
                continue;
            }
            let sounding: Vec<(u8, f64)> = full
                .iter()
                .filter(|n| n.start <= onset + window && n.end > onset)
                .map(|n| (self.band_and_degree(n.pitch).1, n.end))
                .collect();
            let Some(chord) = chord_within(sounding.iter().map(|(d, _)| *d)) else {
                events.push(event.clone());
                continue;
            };
            if matches!(held, Some((c, until, _)) if c == chord && onset < until) {
                events.push(event.clone());
                continue;
            }

            let mask = chord.degree_mask();
            let in_chord = |d: u8| mask & (1 << d) != 0;
            // A different chord takes over from the one still held.
            if let Some((_, _, index)) = held.filter(|(_, until, _)| onset < *until) {
                let previous = &events[index];
                if let Some(cut) = Event::new(previous.start(), onset, previous.keys().to_vec()) {
                    events[index] = cut;
                }
            }

            let melody_keys: Vec<KeyId> = event
                .keys()
                .iter()
                .copied()
                .filter(|k| k.degree().is_none_or(|d| !in_chord(d)))
                .collect();
            if let Some(rest) = Event::new(onset, event.end(), melody_keys) {
                events.push(rest);
            }
            let release = sounding
                .iter()
                .filter(|(d, _)| in_chord(*d))
                .map(|(_, end)| *end)
                .fold(onset, f64::max);
            if let Some(accompaniment) = Event::new(onset, release, vec![KeyId::chord(chord)]) {
                held = Some((chord, release, events.len()));
                events.push(accompaniment);
            }
        }
        EventSequence::from_unsorted(events)
    }
}

fn lower_diatonic_degree(pc: u8) -> u8 {
    (0..=pc)
        .rev()
        .find_map(|p| DIATONIC_PCS.iter().position(|&d| d == p))
        .map_or(1, |idx| idx as u8 + 1)
}

/// Physical key characters for every KeyId.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    pub name: String,
    keys: [char; KEY_COUNT],
}

const CHORD_ROW: [char; 7] = ['z', 'x', 'c', 'v', 'b', 'n', 'm'];

impl KeyLayout {
    fn from_rows(name: &str, low: [char; 7], mid: [char; 7], high: [char; 7]) -> Self {
        let mut keys = [' '; KEY_COUNT];
        for (i, c) in low.iter().chain(&mid).chain(&high).chain(&CHORD_ROW).enumerate() {
            keys[i] = *c;
        }
        Self {
            name: name.to_string(),
            keys,
        }
    }

    pub fn standard() -> Self {
        Self::from_rows(
            "default",
            ['a', 's', 'd', 'f', 'g', 'h', 'j'],
            ['q', 'w', 'e', 'r', 't', 'y', 'u'],
            ['1', '2', '3', '4', '5', '6', '7'],
        )
    }

    pub fn genshin() -> Self {
        Self::from_rows(
            "genshin",
            ['z', 'x', 'c', 'v', 'b', 'n', 'm'],
            ['a', 's', 'd', 'f', 'g', 'h', 'j'],
            ['q', 'w', 'e', 'r', 't', 'y', 'u'],
        )
    }

    /// Unknown names fall back to the default layout.
    pub fn by_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "genshin" => Self::genshin(),
            _ => Self::standard(),
        }
    }

    pub fn key_char(&self, key: KeyId) -> char {
        self.keys[key.index()]
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::standard()
    }
}

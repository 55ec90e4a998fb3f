use crate::keymap::KeyId;

/// One key action window: press `keys` at `start`, release them at `end`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    start: f64,
    end: f64,
    keys: Vec<KeyId>,
}

impl Event {
    /// Returns `None` when `keys` is empty or `end < start`.
    pub fn new(start: f64, end: f64, keys: Vec<KeyId>) -> Option<Self> {
        if keys.is_empty() || !(end >= start) || !start.is_finite() || !end.is_finite() {
            return None;
        }
        Some(Self { start, end, keys })
    }

    pub fn tap(time: f64, keys: Vec<KeyId>) -> Option<Self> {
        Self::new(time, time, keys)
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn keys(&self) -> &[KeyId] {
        &self.keys
    }

    pub fn is_tap(&self) -> bool {
        self.end <= self.start
    }
}

/// Events sorted ascending by start time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSequence {
    events: Vec<Event>,
}

impl EventSequence {
    /// Stable sort by start; equal starts keep their input order.
    pub fn from_unsorted(mut events: Vec<Event>) -> Self {
        events.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self { events }
    }

    pub(crate) fn from_sorted(events: Vec<Event>) -> Self {
        debug_assert!(
            events.windows(2).all(|w| w[0].start <= w[1].start),
            "producer returned events out of order"
        );
        Self { events }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Latest release time in the sequence.
    pub fn total_duration(&self) -> f64 {
        self.events.iter().map(|e| e.end).fold(0.0, f64::max)
    }

    pub fn is_sorted(&self) -> bool {
        self.events.windows(2).all(|w| w[0].start <= w[1].start)
    }
}

impl<'a> IntoIterator for &'a EventSequence {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// A note as delivered by the MIDI reader. Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawNote {
    pub pitch: i32,
    pub start: f64,
    pub end: f64,
    pub velocity: u8,
    pub channel: u8,
    pub track: usize,
}

/// Anything with a start/end span that post-processing can retime.
pub trait Timed: Sized {
    fn start(&self) -> f64;
    fn end(&self) -> f64;
    fn with_times(&self, start: f64, end: f64) -> Self;
}

impl Timed for RawNote {
    fn start(&self) -> f64 {
        self.start
    }

    fn end(&self) -> f64 {
        self.end
    }

    fn with_times(&self, start: f64, end: f64) -> Self {
        RawNote { start, end, ..*self }
    }
}

impl Timed for Event {
    fn start(&self) -> f64 {
        self.start
    }

    fn end(&self) -> f64 {
        self.end
    }

    fn with_times(&self, start: f64, end: f64) -> Self {
        Event {
            start,
            end: end.max(start),
            keys: self.keys.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::{Band, KeyId};

    fn key() -> Vec<KeyId> {
        vec![KeyId::note(Band::Mid, 1)]
    }

    #[test]
    fn rejects_invalid_events() {
        assert!(Event::new(1.0, 0.5, key()).is_none());
        assert!(Event::new(0.0, 1.0, vec![]).is_none());
        assert!(Event::new(f64::NAN, 1.0, key()).is_none());
        assert!(Event::tap(2.0, key()).unwrap().is_tap());
    }

    #[test]
    fn sorting_is_stable_on_equal_starts() {
        let a = Event::new(1.0, 2.0, vec![KeyId::note(Band::Low, 1)]).unwrap();
        let b = Event::new(0.5, 2.0, vec![KeyId::note(Band::Low, 2)]).unwrap();
        let c = Event::new(1.0, 1.5, vec![KeyId::note(Band::Low, 3)]).unwrap();
        let seq = EventSequence::from_unsorted(vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(seq.events(), &[b, a, c]);
        assert!(seq.is_sorted());
        assert_eq!(seq.total_duration(), 2.0);
    }
}

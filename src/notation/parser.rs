use tracing::debug;

use crate::events::{Event, EventSequence};
use crate::keymap::{KeyId, NoteToken};

/// Parses the inside of a `[mm:ss]` or `[mm:ss.fff]` bracket into seconds.
pub fn parse_timestamp(inner: &str) -> Option<f64> {
    let (minutes, seconds) = inner.split_once(':')?;
    if minutes.is_empty() || !minutes.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (whole, frac) = match seconds.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (seconds, ""),
    };
    if whole.is_empty()
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !frac.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let minutes: f64 = minutes.parse().ok()?;
    let whole: f64 = whole.parse().ok()?;
    // A short fraction is right-padded: ".5" is 500 ms.
    let frac: f64 = if frac.is_empty() {
        0.0
    } else {
        format!("0.{frac}").parse().ok()?
    };
    Some(minutes * 60.0 + whole + frac)
}

/// Collects every valid timestamp on the line, returning them together with
/// the byte offset just past the last one.
fn scan_timestamps(line: &str) -> (Vec<f64>, usize) {
    let mut stamps = Vec::new();
    let mut tail = 0;
    let mut rest = line;
    let mut offset = 0;

    while let Some(open) = rest.find('[') {
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find(']') else {
            break;
        };
        let consumed = open + 1 + close + 1;
        if let Some(t) = parse_timestamp(&after_open[..close]) {
            stamps.push(t);
            tail = offset + consumed;
        }
        offset += consumed;
        rest = &rest[consumed..];
    }

    (stamps, tail)
}

/// Parses one LRCp line. Malformed lines yield no events.
pub fn parse_line(line: &str) -> Vec<Event> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Vec::new();
    }

    let (stamps, tail) = scan_timestamps(line);
    if stamps.is_empty() {
        return Vec::new();
    }

    let mut keys: Vec<KeyId> = Vec::new();
    for token in line[tail..].split_whitespace() {
        if let Some(key) = NoteToken::parse(token).map(KeyId::from) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    if keys.is_empty() {
        return Vec::new();
    }

    if let [t1, t2] = stamps[..] {
        if t2 > t1 {
            return Event::new(t1, t2, keys).into_iter().collect();
        }
    }

    stamps
        .into_iter()
        .filter_map(|t| Event::tap(t, keys.clone()))
        .collect()
}

/// Parses a whole LRCp document into a sorted sequence.
pub fn parse(text: &str) -> EventSequence {
    let mut events = Vec::new();

    for (number, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed = parse_line(line);
        if parsed.is_empty() {
            debug!(line = number + 1, "dropping malformed LRCp line");
        }
        events.extend(parsed);
    }

    EventSequence::from_unsorted(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::{Band, Chord};

    #[test]
    fn parses_timestamps() {
        assert_eq!(parse_timestamp("00:01"), Some(1.0));
        assert_eq!(parse_timestamp("01:02.5"), Some(62.5));
        assert_eq!(parse_timestamp("00:02.25"), Some(2.25));
        assert_eq!(parse_timestamp("00:02.125"), Some(2.125));
        assert_eq!(parse_timestamp("00:03."), Some(3.0));
        assert_eq!(parse_timestamp("0102"), None);
        assert_eq!(parse_timestamp("aa:01"), None);
        assert_eq!(parse_timestamp(":01"), None);
    }

    #[test]
    fn parses_sustain() {
        let events = parse_line("[00:01.000][00:02.500] L1 M3");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start(), 1.0);
        assert_eq!(events[0].end(), 2.5);
        assert_eq!(
            events[0].keys(),
            &[KeyId::note(Band::Low, 1), KeyId::note(Band::Mid, 3)]
        );
    }

    #[test]
    fn parses_tap() {
        let events = parse_line("[00:04.5] H7 Dm");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_tap());
        assert_eq!(events[0].start(), 4.5);
        assert_eq!(
            events[0].keys(),
            &[KeyId::note(Band::High, 7), KeyId::chord(Chord::Dm)]
        );
    }

    #[test]
    fn non_increasing_or_extra_timestamps_become_taps() {
        let reversed = parse_line("[00:02.000][00:01.000] M1");
        assert_eq!(reversed.len(), 2);
        assert!(reversed.iter().all(Event::is_tap));

        let equal = parse_line("[00:01.000][00:01.000] M1");
        assert_eq!(equal.len(), 2);

        let three = parse_line("[00:01][00:02][00:03] M1");
        assert_eq!(three.len(), 3);
        assert_eq!(three[2].start(), 3.0);
    }

    #[test]
    fn drops_malformed_lines() {
        assert!(parse_line("L1 M3").is_empty());
        assert!(parse_line("[00:01.000]").is_empty());
        assert!(parse_line("[00:01.000] X9 foo").is_empty());
        assert!(parse_line("# [00:01.000] L1").is_empty());
        assert!(parse_line("   ").is_empty());
    }

    #[test]
    fn discards_unknown_tokens_but_keeps_valid_ones() {
        let events = parse_line("[00:01.000] L1 bogus L1 G7");
        assert_eq!(
            events[0].keys(),
            &[KeyId::note(Band::Low, 1), KeyId::chord(Chord::G7)]
        );
    }

    #[test]
    fn document_is_sorted_and_stable() {
        let text = "\
# comment
[00:03.000] M1
[00:01.000] L1
not a line
[00:01.000][00:02.000] H1

[00:00.500] C
";
        let seq = parse(text);
        assert!(seq.is_sorted());
        let starts: Vec<f64> = seq.iter().map(Event::start).collect();
        assert_eq!(starts, vec![0.5, 1.0, 1.0, 3.0]);
        assert_eq!(seq.events()[1].keys(), &[KeyId::note(Band::Low, 1)]);
        assert_eq!(seq.events()[2].keys(), &[KeyId::note(Band::High, 1)]);
    }
}

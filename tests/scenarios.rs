use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::unbounded;
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

use keyplay::midi::read_midi;
use keyplay::notation::{self, write_lrcp};
use keyplay::pipeline::{lrcp_to_sequence, midi_to_sequence};
use keyplay::timing::{ManualClock, quantize};
use keyplay::{
    Band, Chord, KeyActuator, KeyId, MemoryInjector, PlaybackControl, PlaybackScheduler,
    PlaybackState, PlaybackUpdate, SchedulerOptions, SessionOutcome, Settings,
};

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

/// One track, 480 ticks per quarter at the default 120 BPM.
fn midi_bytes(notes: &[(u32, u8, u8)]) -> Vec<u8> {
    let mut track = Vec::new();
    let mut last = 0;
    for &(tick, key, vel) in notes {
        track.push(TrackEvent {
            delta: (tick - last).into(),
            kind: TrackEventKind::Midi {
                channel: 0.into(),
                message: MidiMessage::NoteOn {
                    key: key.into(),
                    vel: vel.into(),
                },
            },
        });
        last = tick;
    }
    track.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    let smf = Smf {
        header: Header {
            format: Format::SingleTrack,
            timing: Timing::Metrical(480.into()),
        },
        tracks: vec![track],
    };
    let mut out = Vec::new();
    smf.write(&mut out).unwrap();
    out
}

fn harness(options: SchedulerOptions) -> (PlaybackScheduler, MemoryInjector) {
    let injector = MemoryInjector::new();
    let actuator = Arc::new(KeyActuator::new(injector.clone()));
    let scheduler = PlaybackScheduler::new(actuator, Arc::new(PlaybackControl::default()), options);
    (scheduler, injector)
}

#[test]
fn lrcp_sustain_line() {
    let seq = lrcp_to_sequence("[00:01.000][00:02.500] L1 M3\n", &Settings::default());
    assert_eq!(seq.len(), 1);
    let event = &seq.events()[0];
    assert_eq!((event.start(), event.end()), (1.0, 2.5));
    assert_eq!(
        event.keys(),
        &[KeyId::note(Band::Low, 1), KeyId::note(Band::Mid, 3)]
    );
}

#[test]
fn midi_triad_plays_a_single_chord_key() {
    let bytes = midi_bytes(&[
        (0, 60, 100),
        (0, 64, 100),
        (0, 67, 100),
        (960, 60, 0),
        (960, 64, 0),
        (960, 67, 0),
    ]);
    let midi = read_midi(&bytes).unwrap();
    let seq = midi_to_sequence(&midi.notes, Some(midi.source_bpm), &Settings::default());
    assert_eq!(seq.len(), 1);
    assert_eq!(seq.events()[0].keys(), &[KeyId::chord(Chord::C)]);

    let (scheduler, injector) = harness(SchedulerOptions::default());
    let scheduler = scheduler.with_clock(Arc::new(ManualClock::new()));
    assert_eq!(scheduler.run(&seq).unwrap(), SessionOutcome::Completed);
    let chord = KeyId::chord(Chord::C);
    assert_eq!((injector.downs(chord), injector.ups(chord)), (1, 1));
    assert_eq!(injector.strokes().len(), 2);
}

#[test]
fn degree_sets_resolve_to_chords_or_notes() {
    let text = "\
[00:00.000] M1 M3 M5
[00:01.000] L2 M4 H6
[00:02.000] M1 M2
";
    let seq = notation::parse(text);
    assert_eq!(seq.len(), 3);
    // The parser keeps tokens verbatim; chord folding happens on mapped MIDI.
    assert_eq!(seq.events()[2].keys().len(), 2);

    let mapper = keyplay::NoteMapper::default();
    let c = [KeyId::note(Band::Mid, 1), KeyId::note(Band::Mid, 3), KeyId::note(Band::Mid, 5)];
    assert_eq!(mapper.resolve(&c), vec![KeyId::chord(Chord::C)]);
    let dm = [KeyId::note(Band::Low, 2), KeyId::note(Band::Mid, 4), KeyId::note(Band::High, 6)];
    assert_eq!(mapper.resolve(&dm), vec![KeyId::chord(Chord::Dm)]);
    let none = [KeyId::note(Band::Mid, 1), KeyId::note(Band::Mid, 2)];
    assert_eq!(mapper.resolve(&none), none.to_vec());
}

#[test]
fn playback_at_double_speed_matches_half_the_wall_time() {
    let text: String = (0..20)
        .map(|i| format!("[00:{:02}.{:03}] M{}\n", i / 4, (i % 4) * 250, i % 7 + 1))
        .collect();
    let seq = lrcp_to_sequence(&text, &Settings::default());

    let (fast, fast_keys) = harness(SchedulerOptions::default());
    fast.control().set_speed(2.0);
    let mut a = fast.start_session(&seq, secs(10.0));
    for step in 1..=150 {
        a.tick(secs(10.0 + step as f64 * 0.01)).unwrap();
    }

    let (normal, normal_keys) = harness(SchedulerOptions::default());
    let mut b = normal.start_session(&seq, secs(10.0));
    for step in 1..=300 {
        b.tick(secs(10.0 + step as f64 * 0.01)).unwrap();
    }

    assert_eq!(fast_keys.strokes(), normal_keys.strokes());
    assert!(!fast_keys.strokes().is_empty());
}

#[test]
fn pause_at_three_seconds_resumes_at_three_seconds() {
    let seq = notation::parse("[00:02.900] M1\n[00:03.050] M2\n");
    let (scheduler, injector) = harness(SchedulerOptions::default());
    let mut session = scheduler.start_session(&seq, secs(0.0));

    session.tick(secs(3.0)).unwrap();
    scheduler.control().pause();
    session.tick(secs(3.0)).unwrap();
    assert_eq!(scheduler.control().state(), PlaybackState::Paused);

    session.tick(secs(4.0)).unwrap();
    scheduler.control().resume();
    session.tick(secs(5.0)).unwrap();
    assert_eq!(session.position(secs(5.0)), Some(3.0));
    assert_eq!(injector.downs(KeyId::note(Band::Mid, 2)), 0);

    session.tick(secs(5.1)).unwrap();
    assert_eq!(injector.downs(KeyId::note(Band::Mid, 2)), 1);
}

#[test]
fn stop_while_paused_releases_and_returns_to_idle() {
    let seq = notation::parse("[00:00.000][00:30.000] H1 H5\n");
    let (tx, rx) = unbounded();
    let (scheduler, injector) = harness(SchedulerOptions::default());
    let scheduler = scheduler.with_updates(tx);
    let mut session = scheduler.start_session(&seq, secs(0.0));
    session.tick(secs(0.5)).unwrap();
    scheduler.control().pause();
    session.tick(secs(0.6)).unwrap();
    scheduler.control().stop();
    assert_eq!(session.tick(secs(0.7)).unwrap(), Some(SessionOutcome::Stopped));

    for key in [KeyId::note(Band::High, 1), KeyId::note(Band::High, 5)] {
        assert_eq!(injector.downs(key), 1);
        assert_eq!(injector.ups(key), 1);
    }
    let states: Vec<PlaybackState> = rx
        .try_iter()
        .filter_map(|u| match u {
            PlaybackUpdate::State(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            PlaybackState::Playing,
            PlaybackState::Paused,
            PlaybackState::Stopped,
            PlaybackState::Idle,
        ]
    );
}

#[test]
fn converted_midi_survives_lrcp_export() {
    // Default 30 ms grid: 0.25 s snaps to 0.24 s and 0.5 s to 0.51 s.
    let bytes = midi_bytes(&[(0, 62, 90), (240, 62, 0), (480, 65, 90), (720, 65, 0)]);
    let midi = read_midi(&bytes).unwrap();
    let seq = midi_to_sequence(&midi.notes, Some(midi.source_bpm), &Settings::default());
    let text = write_lrcp(&seq);
    assert_eq!(text, "[00:00.000][00:00.240] M2\n[00:00.510][00:00.750] M4\n");
    assert_eq!(notation::parse(&text).len(), 2);
}

#[test]
fn quantization_is_stable_under_reapplication() {
    let seq = notation::parse("[00:00.013][00:01.507] M1\n[00:02.249] Am\n");
    let once = quantize(seq.events(), 30);
    assert_eq!(quantize(&once, 30), once);
}

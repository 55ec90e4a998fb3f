//! Reference-counted key presses on top of an OS injection backend.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::error::{InjectError, KeyplayError, Result};
use crate::keymap::{KEY_COUNT, KeyId, KeyLayout};

/// The OS-level capability that physically presses keys.
pub trait KeyInjector: Send {
    fn key_down(&mut self, key: KeyId) -> std::result::Result<(), InjectError>;
    fn key_up(&mut self, key: KeyId) -> std::result::Result<(), InjectError>;
}

struct ActuatorState {
    counts: [u32; KEY_COUNT],
    injector: Box<dyn KeyInjector>,
}

/// Sole owner of physical key state. A key goes down on its first logical
/// hold and up when the last hold is released.
pub struct KeyActuator {
    state: Mutex<ActuatorState>,
}

impl KeyActuator {
    pub fn new(injector: impl KeyInjector + 'static) -> Self {
        Self {
            state: Mutex::new(ActuatorState {
                counts: [0; KEY_COUNT],
                injector: Box::new(injector),
            }),
        }
    }

    pub fn press(&self, keys: &[KeyId]) -> Result<()> {
        let mut state = self.state.lock();
        for &key in keys {
            if state.counts[key.index()] == 0 {
                state
                    .injector
                    .key_down(key)
                    .map_err(|source| KeyplayError::Injection { key, source })?;
                trace!(%key, "key down");
            }
            state.counts[key.index()] += 1;
        }
        Ok(())
    }

    /// Underflow is clamped and logged, never returned.
    pub fn release(&self, keys: &[KeyId]) -> Result<()> {
        let mut state = self.state.lock();
        for &key in keys {
            match state.counts[key.index()] {
                0 => warn!(%key, "release without matching press, ignoring"),
                1 => {
                    state.counts[key.index()] = 0;
                    state
                        .injector
                        .key_up(key)
                        .map_err(|source| KeyplayError::Injection { key, source })?;
                    trace!(%key, "key up");
                }
                _ => state.counts[key.index()] -= 1,
            }
        }
        Ok(())
    }

    /// Zeroes every refcount and lifts every held key. All keys are
    /// attempted even if one injection fails; the first failure is returned.
    pub fn release_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        let mut first_error = None;
        for key in KeyId::all() {
            if std::mem::take(&mut state.counts[key.index()]) == 0 {
                continue;
            }
            if let Err(source) = state.injector.key_up(key) {
                error!(%key, %source, "failed to lift key during release-all");
                if first_error.is_none() {
                    first_error = Some(KeyplayError::Injection { key, source });
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn refcount(&self, key: KeyId) -> u32 {
        self.state.lock().counts[key.index()]
    }

    pub fn held_keys(&self) -> Vec<KeyId> {
        let state = self.state.lock();
        KeyId::all().filter(|k| state.counts[k.index()] > 0).collect()
    }
}

impl Drop for KeyActuator {
    fn drop(&mut self) {
        if let Err(err) = self.release_all() {
            error!(%err, "keys may remain pressed after shutdown");
        }
    }
}

/// Reports key transitions through `tracing` using the physical key names
/// of a layout. Used when no OS backend is wired in.
pub struct LoggingInjector {
    layout: KeyLayout,
}

impl LoggingInjector {
    pub fn new(layout: KeyLayout) -> Self {
        Self { layout }
    }
}

impl KeyInjector for LoggingInjector {
    fn key_down(&mut self, key: KeyId) -> std::result::Result<(), InjectError> {
        debug!(target: "keyplay::keys", key = %self.layout.key_char(key), token = %key, "down");
        Ok(())
    }

    fn key_up(&mut self, key: KeyId) -> std::result::Result<(), InjectError> {
        debug!(target: "keyplay::keys", key = %self.layout.key_char(key), token = %key, "up");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub key: KeyId,
    pub down: bool,
}

#[derive(Default)]
struct MemoryLog {
    strokes: Vec<KeyStroke>,
    fail_on: Option<KeyId>,
}

/// Records every injected stroke. Clones share one log, so a test can keep
/// a handle while the actuator owns the other.
#[derive(Clone, Default)]
pub struct MemoryInjector {
    log: Arc<Mutex<MemoryLog>>,
}

impl MemoryInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strokes(&self) -> Vec<KeyStroke> {
        self.log.lock().strokes.clone()
    }

    /// Makes every later key-down of `key` fail with `InjectError::Denied`.
    pub fn fail_on(&self, key: KeyId) {
        self.log.lock().fail_on = Some(key);
    }

    pub fn downs(&self, key: KeyId) -> usize {
        self.count(key, true)
    }

    pub fn ups(&self, key: KeyId) -> usize {
        self.count(key, false)
    }

    fn count(&self, key: KeyId, down: bool) -> usize {
        self.log
            .lock()
            .strokes
            .iter()
            .filter(|s| s.key == key && s.down == down)
            .count()
    }
}

impl KeyInjector for MemoryInjector {
    fn key_down(&mut self, key: KeyId) -> std::result::Result<(), InjectError> {
        let mut log = self.log.lock();
        if log.fail_on == Some(key) {
            return Err(InjectError::Denied(format!("{key} is blocked")));
        }
        log.strokes.push(KeyStroke { key, down: true });
        Ok(())
    }

    fn key_up(&mut self, key: KeyId) -> std::result::Result<(), InjectError> {
        self.log.lock().strokes.push(KeyStroke { key, down: false });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::{Band, Chord};

    fn m(degree: u8) -> KeyId {
        KeyId::note(Band::Mid, degree)
    }

    #[test]
    fn overlapping_holds_inject_once() {
        let injector = MemoryInjector::new();
        let actuator = KeyActuator::new(injector.clone());

        actuator.press(&[m(1)]).unwrap();
        actuator.press(&[m(1), m(3)]).unwrap();
        assert_eq!(actuator.refcount(m(1)), 2);
        assert_eq!(injector.downs(m(1)), 1);

        actuator.release(&[m(1)]).unwrap();
        assert_eq!(injector.ups(m(1)), 0);
        actuator.release(&[m(1), m(3)]).unwrap();
        assert_eq!(injector.ups(m(1)), 1);
        assert_eq!(injector.ups(m(3)), 1);
        assert!(actuator.held_keys().is_empty());
    }

    #[test]
    fn underflow_is_clamped() {
        let injector = MemoryInjector::new();
        let actuator = KeyActuator::new(injector.clone());
        actuator.release(&[m(2)]).unwrap();
        assert_eq!(actuator.refcount(m(2)), 0);
        assert!(injector.strokes().is_empty());
    }

    #[test]
    fn release_all_lifts_everything_once() {
        let injector = MemoryInjector::new();
        let actuator = KeyActuator::new(injector.clone());
        let chord = KeyId::chord(Chord::Am);
        actuator.press(&[m(1), m(1), chord]).unwrap();
        actuator.release_all().unwrap();
        assert_eq!(injector.ups(m(1)), 1);
        assert_eq!(injector.ups(chord), 1);
        assert_eq!(actuator.refcount(m(1)), 0);

        actuator.release_all().unwrap();
        assert_eq!(injector.strokes().len(), 4);
    }

    #[test]
    fn presses_never_trail_releases() {
        let injector = MemoryInjector::new();
        let actuator = KeyActuator::new(injector.clone());
        let pattern: [(&[KeyId], bool); 6] = [
            (&[m(1), m(2)], true),
            (&[m(1)], true),
            (&[m(2)], false),
            (&[m(1)], false),
            (&[m(2)], false),
            (&[m(3)], true),
        ];
        for (keys, press) in pattern {
            if press {
                actuator.press(keys).unwrap();
            } else {
                actuator.release(keys).unwrap();
            }
            for key in KeyId::all() {
                assert!(injector.downs(key) >= injector.ups(key));
            }
        }
        actuator.release_all().unwrap();
        for key in KeyId::all() {
            assert_eq!(injector.downs(key), injector.ups(key));
        }
    }

    #[test]
    fn injection_failure_is_reported_with_key() {
        let injector = MemoryInjector::new();
        injector.fail_on(m(5));
        let actuator = KeyActuator::new(injector.clone());
        let err = actuator.press(&[m(4), m(5)]).unwrap_err();
        assert!(matches!(err, KeyplayError::Injection { key, .. } if key == m(5)));
        assert_eq!(actuator.refcount(m(5)), 0);
        assert_eq!(actuator.held_keys(), vec![m(4)]);
    }

    #[test]
    fn dropping_releases_held_keys() {
        let injector = MemoryInjector::new();
        {
            let actuator = KeyActuator::new(injector.clone());
            actuator.press(&[m(6)]).unwrap();
        }
        assert_eq!(injector.ups(m(6)), 1);
    }
}

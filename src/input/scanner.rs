use tracing::debug;

use super::debounce::DebounceState;
use crate::hal::InputPins;

/// Direction of a committed key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Pressed,
    Released,
}

/// A debounced transition of one key (ids are 1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEdge {
    pub key: u8,
    pub kind: EdgeKind,
}

/// Polls the button pins and debounces them. Never blocks.
pub struct InputScanner {
    keys: Vec<DebounceState>,
    last_press_ms: Vec<Option<u64>>,
    debounce_ms: u64,
}

impl InputScanner {
    pub fn new(num_keys: u8, debounce_ms: u64) -> Self {
        Self {
            keys: vec![DebounceState::default(); num_keys as usize],
            last_press_ms: vec![None; num_keys as usize],
            debounce_ms,
        }
    }

    /// Sample every key once and return the edges committed this tick
    pub fn scan(&mut self, pins: &mut dyn InputPins, now_ms: u64) -> Vec<KeyEdge> {
        let count = self.keys.len().min(pins.key_count());
        let mut edges = Vec::new();

        for index in 0..count {
            let level = pins.is_pressed(index);
            let Some(stable) = self.keys[index].update(level, now_ms, self.debounce_ms) else {
                continue;
            };

            let key = (index + 1) as u8;
            let kind = if stable {
                self.last_press_ms[index] = Some(now_ms);
                EdgeKind::Pressed
            } else {
                EdgeKind::Released
            };
            debug!("key {} {:?}", key, kind);
            edges.push(KeyEdge { key, kind });
        }

        edges
    }

    /// When `key` last committed a press
    pub fn last_press_ms(&self, key: u8) -> Option<u64> {
        (key as usize)
            .checked_sub(1)
            .and_then(|i| self.last_press_ms.get(i).copied().flatten())
    }

    pub fn is_held(&self, key: u8) -> bool {
        (key as usize)
            .checked_sub(1)
            .and_then(|i| self.keys.get(i))
            .map(DebounceState::stable)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::VirtualPins;

    #[test]
    fn test_press_and_release_edges() {
        let pins = VirtualPins::new(3, 0);
        let mut handle = pins.clone();
        let mut scanner = InputScanner::new(3, 20);

        pins.set_key(2, true);
        assert!(scanner.scan(&mut handle, 0).is_empty());
        assert!(scanner.scan(&mut handle, 10).is_empty());
        assert_eq!(
            scanner.scan(&mut handle, 20),
            vec![KeyEdge {
                key: 2,
                kind: EdgeKind::Pressed
            }]
        );
        assert!(scanner.scan(&mut handle, 30).is_empty());
        assert!(scanner.is_held(2));
        assert_eq!(scanner.last_press_ms(2), Some(20));

        pins.set_key(2, false);
        scanner.scan(&mut handle, 40);
        assert_eq!(
            scanner.scan(&mut handle, 60),
            vec![KeyEdge {
                key: 2,
                kind: EdgeKind::Released
            }]
        );
        assert!(!scanner.is_held(2));
    }

    #[test]
    fn test_glitch_shorter_than_window_is_dropped() {
        let pins = VirtualPins::new(2, 0);
        let mut handle = pins.clone();
        let mut scanner = InputScanner::new(2, 20);

        for key in 1..=2 {
            pins.set_key(key, true);
            scanner.scan(&mut handle, 0);
            pins.set_key(key, false);
            assert!(scanner.scan(&mut handle, 10).is_empty());
            assert!(scanner.scan(&mut handle, 100).is_empty());
        }
        assert_eq!(scanner.last_press_ms(1), None);
    }

    #[test]
    fn test_scans_only_wired_keys() {
        let pins = VirtualPins::new(2, 0);
        let mut handle = pins.clone();
        let mut scanner = InputScanner::new(4, 0);
        pins.set_key(1, true);
        pins.set_key(2, true);
        assert_eq!(scanner.scan(&mut handle, 0).len(), 2);
        assert!(!scanner.is_held(4));
    }
}

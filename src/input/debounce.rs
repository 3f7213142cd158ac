/// Per-key debounce state
///
/// A level has to hold unchanged for the debounce window before it becomes the
/// stable level. Every bounce restarts the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebounceState {
    raw: bool,
    stable: bool,
    last_change_ms: u64,
}

impl DebounceState {
    /// Feed the live level. Returns the new stable level on a committed transition.
    pub fn update(&mut self, level: bool, now_ms: u64, debounce_ms: u64) -> Option<bool> {
        if level != self.raw {
            self.raw = level;
            self.last_change_ms = now_ms;
        }

        if self.raw != self.stable && now_ms.saturating_sub(self.last_change_ms) >= debounce_ms {
            self.stable = self.raw;
            return Some(self.stable);
        }
        None
    }

    pub fn stable(&self) -> bool {
        self.stable
    }

    /// A raw change is waiting out the window
    pub fn is_pending(&self) -> bool {
        self.raw != self.stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_glitch_is_ignored() {
        let mut state = DebounceState::default();
        assert_eq!(state.update(true, 0, 20), None);
        assert_eq!(state.update(true, 10, 20), None);
        assert!(state.is_pending());
        assert_eq!(state.update(false, 15, 20), None);
        assert_eq!(state.update(false, 100, 20), None);
        assert!(!state.stable());
        assert!(!state.is_pending());
    }

    #[test]
    fn test_steady_level_commits_once() {
        let mut state = DebounceState::default();
        state.update(true, 0, 20);
        assert_eq!(state.update(true, 19, 20), None);
        assert_eq!(state.update(true, 20, 20), Some(true));
        assert_eq!(state.update(true, 40, 20), None);
        assert!(state.stable());
    }

    #[test]
    fn test_bounce_restarts_window() {
        let mut state = DebounceState::default();
        state.update(true, 0, 20);
        state.update(false, 5, 20);
        state.update(true, 10, 20);
        assert_eq!(state.update(true, 25, 20), None);
        assert_eq!(state.update(true, 30, 20), Some(true));
    }
}

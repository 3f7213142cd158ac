use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use super::{Rgb, OFF};
use crate::config::LedConfig;
use crate::hal::{Clock, LedStrip};

/// Idle pattern shown while no macro runs
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum IdleAnimation {
    #[default]
    None,
    Breathe,
    Rainbow,
}

/// Owns what the strip shows: one idle animation, per-key idle colors and
/// press highlights layered on top.
pub struct LedAnimator {
    config: LedConfig,
    mode: IdleAnimation,
    /// Breathe brightness, 0..=255
    level: u8,
    rising: bool,
    /// Rainbow hue offset
    hue: u8,
    last_frame_ms: Option<u64>,
    /// Per-pixel idle colors from the active profile
    key_colors: Vec<Option<Rgb>>,
    highlighted: Vec<bool>,
    /// Whole-strip color from an `led` action, shown in `None` mode until the
    /// profile's colors or mode are set again
    solid_color: Option<Rgb>,
    /// Static content needs a redraw
    dirty: bool,
}

impl LedAnimator {
    pub fn new(config: LedConfig) -> Self {
        let count = config.count;
        Self {
            config,
            mode: IdleAnimation::None,
            level: 0,
            rising: true,
            hue: 0,
            last_frame_ms: None,
            key_colors: vec![None; count],
            highlighted: vec![false; count],
            solid_color: None,
            dirty: true,
        }
    }

    pub fn mode(&self) -> IdleAnimation {
        self.mode
    }

    /// Switch idle mode, restarting its phase
    pub fn set_mode(&mut self, mode: IdleAnimation) {
        if mode != self.mode {
            debug!("idle animation {} -> {}", self.mode, mode);
        }
        self.mode = mode;
        self.level = 0;
        self.rising = true;
        self.hue = 0;
        self.last_frame_ms = None;
        self.solid_color = None;
        self.dirty = true;
    }

    /// Idle colors per key (index 0 is key 1)
    pub fn set_key_colors(&mut self, colors: impl IntoIterator<Item = (u8, Rgb)>) {
        self.key_colors.iter_mut().for_each(|c| *c = None);
        for (key, color) in colors {
            if let Some(slot) = pixel_for(key).and_then(|i| self.key_colors.get_mut(i)) {
                *slot = Some(color);
            }
        }
        self.solid_color = None;
        self.dirty = true;
    }

    /// Light the pixel under `key` immediately
    pub fn highlight(&mut self, key: u8, strip: &mut dyn LedStrip) {
        if let Some(i) = pixel_for(key).filter(|&i| i < self.highlighted.len()) {
            self.highlighted[i] = true;
            strip.set_pixel(i, self.config.highlight_color);
            strip.show();
        }
    }

    /// Drop the highlight under `key` and restore what the idle frame had there
    pub fn clear_highlight(&mut self, key: u8, strip: &mut dyn LedStrip) {
        if let Some(i) = pixel_for(key).filter(|&i| i < self.highlighted.len()) {
            self.highlighted[i] = false;
            strip.set_pixel(i, self.base_color(i, strip.len()));
            strip.show();
        }
    }

    pub fn is_highlighted(&self, key: u8) -> bool {
        pixel_for(key)
            .and_then(|i| self.highlighted.get(i).copied())
            .unwrap_or(false)
    }

    /// Advance the idle animation by at most one frame. Never blocks.
    ///
    /// Returns true when a frame was drawn.
    pub fn tick(&mut self, now_ms: u64, strip: &mut dyn LedStrip) -> bool {
        if let Some(last) = self.last_frame_ms {
            if now_ms.saturating_sub(last) < self.config.frame_interval_ms {
                return false;
            }
        }

        match self.mode {
            IdleAnimation::None => {
                if !self.dirty {
                    return false;
                }
            }
            IdleAnimation::Breathe => self.step_breathe(),
            IdleAnimation::Rainbow => self.hue = self.hue.wrapping_add(self.config.rainbow_step),
        }

        self.last_frame_ms = Some(now_ms);
        self.dirty = false;
        self.draw(strip);
        true
    }

    fn step_breathe(&mut self) {
        let step = self.config.breathe_step;
        if self.rising {
            self.level = self.level.saturating_add(step);
            if self.level == u8::MAX {
                self.rising = false;
            }
        } else {
            self.level = self.level.saturating_sub(step);
            if self.level == 0 {
                self.rising = true;
            }
        }
    }

    /// Color pixel `i` would have without any highlight
    fn base_color(&self, i: usize, len: usize) -> Rgb {
        match self.mode {
            IdleAnimation::None => self
                .solid_color
                .or_else(|| self.key_colors.get(i).copied().flatten())
                .unwrap_or(OFF),
            IdleAnimation::Breathe => self.config.breathe_color.scaled(self.level),
            IdleAnimation::Rainbow => {
                let spread = (i * 256 / len.max(1)) as u8;
                Rgb::wheel(spread.wrapping_add(self.hue))
            }
        }
    }

    fn draw(&self, strip: &mut dyn LedStrip) {
        let len = strip.len();
        for i in 0..len {
            let color = if self.highlighted.get(i).copied().unwrap_or(false) {
                self.config.highlight_color
            } else {
                self.base_color(i, len)
            };
            strip.set_pixel(i, color);
        }
        strip.show();
    }

    /// Whole-strip solid color, as set by an `led` action
    pub fn solid(&mut self, color: Rgb, strip: &mut dyn LedStrip) {
        strip.fill(color);
        strip.show();
        self.solid_color = Some(color);
        self.dirty = true;
    }

    /// Blink the whole strip. Blocks; only for macro and gesture feedback.
    pub fn flash(
        &mut self,
        strip: &mut dyn LedStrip,
        clock: &mut dyn Clock,
        color: Rgb,
        times: u32,
        on_ms: u64,
        off_ms: u64,
    ) {
        for _ in 0..times {
            strip.fill(color);
            strip.show();
            clock.delay_ms(on_ms);
            strip.fill(OFF);
            strip.show();
            clock.delay_ms(off_ms);
        }
        self.dirty = true;
        self.last_frame_ms = None;
    }

    /// Fade the whole strip up and down `cycles` times. Blocks.
    pub fn breathe_cycles(
        &mut self,
        strip: &mut dyn LedStrip,
        clock: &mut dyn Clock,
        color: Rgb,
        cycles: u32,
    ) {
        let step = self.config.breathe_step as usize;
        let frame = self.config.frame_interval_ms;
        for _ in 0..cycles {
            let up = (0..=255u16).step_by(step).map(|l| l as u8);
            let down = (0..=255u16).rev().step_by(step).map(|l| l as u8);
            for level in up.chain(down) {
                strip.fill(color.scaled(level));
                strip.show();
                clock.delay_ms(frame);
            }
        }
        strip.fill(OFF);
        strip.show();
        self.dirty = true;
        self.last_frame_ms = None;
    }
}

fn pixel_for(key: u8) -> Option<usize> {
    (key as usize).checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{ManualClock, VirtualStrip};
    use crate::led::{GREEN, WHITE};

    fn animator(mode: IdleAnimation) -> (LedAnimator, VirtualStrip) {
        let config = LedConfig {
            count: 4,
            frame_interval_ms: 10,
            breathe_step: 85,
            ..LedConfig::default()
        };
        let mut animator = LedAnimator::new(config);
        animator.set_mode(mode);
        (animator, VirtualStrip::new(4))
    }

    #[test]
    fn test_tick_is_frame_rate_gated() {
        let (mut animator, strip) = animator(IdleAnimation::Rainbow);
        let mut handle = strip.clone();
        assert!(animator.tick(0, &mut handle));
        assert!(!animator.tick(5, &mut handle));
        assert!(!animator.tick(9, &mut handle));
        assert!(animator.tick(10, &mut handle));
        assert_eq!(strip.frames(), 2);
    }

    #[test]
    fn test_breathe_ping_pongs() {
        let (mut animator, strip) = animator(IdleAnimation::Breathe);
        let mut handle = strip.clone();
        let mut levels = Vec::new();
        for frame in 0..8 {
            animator.tick(frame * 10, &mut handle);
            levels.push(animator.level);
        }
        assert_eq!(levels, vec![85, 170, 255, 170, 85, 0, 85, 170]);
    }

    #[test]
    fn test_rainbow_rotates_hue() {
        let (mut animator, strip) = animator(IdleAnimation::Rainbow);
        let mut handle = strip.clone();
        animator.tick(0, &mut handle);
        let first = strip.pixels();
        animator.tick(10, &mut handle);
        assert_ne!(strip.pixels(), first);
        assert_ne!(first[0], first[2]);
    }

    #[test]
    fn test_none_mode_draws_key_colors_once() {
        let (mut animator, strip) = animator(IdleAnimation::None);
        let mut handle = strip.clone();
        animator.set_key_colors([(2, GREEN)]);
        assert!(animator.tick(0, &mut handle));
        assert_eq!(strip.pixels(), vec![OFF, GREEN, OFF, OFF]);
        assert!(!animator.tick(100, &mut handle));
        assert_eq!(strip.frames(), 1);
    }

    #[test]
    fn test_highlight_overlays_and_restores() {
        let (mut animator, strip) = animator(IdleAnimation::None);
        let mut handle = strip.clone();
        animator.set_key_colors([(1, GREEN)]);
        animator.tick(0, &mut handle);

        animator.highlight(1, &mut handle);
        assert_eq!(strip.pixel(0), WHITE);
        assert!(animator.is_highlighted(1));

        animator.clear_highlight(1, &mut handle);
        assert_eq!(strip.pixel(0), GREEN);
        assert!(!animator.is_highlighted(1));

        // Out-of-range keys are ignored
        animator.highlight(0, &mut handle);
        animator.highlight(9, &mut handle);
    }

    #[test]
    fn test_solid_survives_idle_ticks() {
        let (mut animator, strip) = animator(IdleAnimation::None);
        let mut handle = strip.clone();
        animator.set_key_colors([(2, GREEN)]);
        animator.solid(Rgb::new(10, 20, 30), &mut handle);
        animator.highlight(1, &mut handle);
        animator.clear_highlight(1, &mut handle);
        for frame in 0..5 {
            animator.tick(frame * 10, &mut handle);
        }
        assert_eq!(strip.pixels(), vec![Rgb::new(10, 20, 30); 4]);

        // A new profile's colors replace it
        animator.set_key_colors([(2, GREEN)]);
        animator.tick(100, &mut handle);
        assert_eq!(strip.pixels(), vec![OFF, GREEN, OFF, OFF]);
    }

    #[test]
    fn test_flash_blocks_on_clock() {
        let (mut animator, strip) = animator(IdleAnimation::None);
        let mut handle = strip.clone();
        let clock = ManualClock::new();
        let mut clock_handle = clock.clone();
        animator.flash(&mut handle, &mut clock_handle, GREEN, 3, 100, 50);
        assert_eq!(clock.now_ms(), 450);
        assert_eq!(strip.frames(), 6);
        assert_eq!(strip.pixel(0), OFF);
    }

    #[test]
    fn test_breathe_cycles_end_dark() {
        let (mut animator, strip) = animator(IdleAnimation::None);
        let mut handle = strip.clone();
        let clock = ManualClock::new();
        let mut clock_handle = clock.clone();
        animator.breathe_cycles(&mut handle, &mut clock_handle, GREEN, 2);
        // 4 levels up, 4 down, per cycle
        assert_eq!(clock.now_ms(), 2 * 8 * 10);
        assert_eq!(strip.pixel(3), OFF);
    }
}

//! Capacitive profile-switch pads
//!
//! Each pad compares an averaged reading against its own baseline. A touch
//! pulls the reading down; the pad is active below `baseline - threshold`.
//! Gestures fire on the inactive-to-active edge, rate limited per pad. Both
//! pads held together long enough fire the failsafe instead.

use tracing::{debug, info, warn};

use crate::config::TouchConfig;
use crate::hal::{Clock, InputPins, TouchPad};

/// What the pads asked for this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchEvent {
    NextProfile,
    PrevProfile,
    /// Both pads held past the failsafe window
    Failsafe,
}

#[derive(Debug, Clone, Copy, Default)]
struct PadState {
    baseline: u16,
    active: bool,
    last_fire_ms: Option<u64>,
}

pub struct TouchSwitch {
    config: TouchConfig,
    pads: [PadState; 2],
    both_since_ms: Option<u64>,
    failsafe_fired: bool,
    idle_since_ms: Option<u64>,
}

impl TouchSwitch {
    pub fn new(config: TouchConfig) -> Self {
        Self {
            config,
            pads: [PadState::default(); 2],
            both_since_ms: None,
            failsafe_fired: false,
            idle_since_ms: None,
        }
    }

    /// Capture fresh baselines. Pads must not be touched while this runs.
    pub fn calibrate(&mut self, pins: &mut dyn InputPins, clock: &mut dyn Clock) {
        for pad in TouchPad::ALL {
            let baseline = self.sample(pins, clock, pad, self.config.calibration_samples);
            self.pads[pad.index()].baseline = baseline;
            info!("touch pad {:?} baseline {}", pad, baseline);
        }
    }

    pub fn baseline(&self, pad: TouchPad) -> u16 {
        self.pads[pad.index()].baseline
    }

    pub fn is_active(&self, pad: TouchPad) -> bool {
        self.pads[pad.index()].active
    }

    /// Averaged reading followed by the settle delay
    fn sample(&self, pins: &mut dyn InputPins, clock: &mut dyn Clock, pad: TouchPad, count: u8) -> u16 {
        let count = count.max(1) as u32;
        let sum: u32 = (0..count).map(|_| pins.touch_read(pad) as u32).sum();
        if self.config.settle_ms > 0 {
            clock.delay_ms(self.config.settle_ms);
        }
        (sum / count) as u16
    }

    /// Sample both pads and turn edges into gestures
    pub fn poll(&mut self, pins: &mut dyn InputPins, clock: &mut dyn Clock) -> Vec<TouchEvent> {
        let now = clock.now_ms();
        let mut events = Vec::new();

        for pad in TouchPad::ALL {
            let reading = self.sample(pins, clock, pad, self.config.samples);
            let state = &mut self.pads[pad.index()];
            let active = reading < state.baseline.saturating_sub(self.config.threshold);

            if active && !state.active {
                let cooled = state
                    .last_fire_ms
                    .map_or(true, |last| now.saturating_sub(last) >= self.config.cooldown_ms);
                if cooled {
                    state.last_fire_ms = Some(now);
                    debug!("touch pad {:?} fired (reading {})", pad, reading);
                    events.push(match pad {
                        TouchPad::Next => TouchEvent::NextProfile,
                        TouchPad::Prev => TouchEvent::PrevProfile,
                    });
                } else {
                    debug!("touch pad {:?} suppressed by cooldown", pad);
                }
            }
            state.active = active;
        }

        let both = self.pads.iter().all(|p| p.active);
        if both {
            let since = *self.both_since_ms.get_or_insert(now);
            if !self.failsafe_fired && now.saturating_sub(since) >= self.config.failsafe_hold_ms {
                self.failsafe_fired = true;
                warn!("both touch pads held for {} ms", now - since);
                events.push(TouchEvent::Failsafe);
            }
        } else {
            self.both_since_ms = None;
            self.failsafe_fired = false;
        }

        let idle = self.pads.iter().all(|p| !p.active);
        if idle {
            let since = *self.idle_since_ms.get_or_insert(now);
            let period = self.config.recalibrate_idle_ms;
            if period > 0 && now.saturating_sub(since) >= period {
                debug!("touch pads idle for {} ms, recalibrating", now - since);
                self.calibrate(pins, clock);
                self.idle_since_ms = Some(clock.now_ms());
            }
        } else {
            self.idle_since_ms = None;
        }

        events
    }
}

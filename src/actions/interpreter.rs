//! Macro execution
//!
//! A [`MacroCursor`] walks the action tree with an explicit frame stack. A
//! [`MacroRun`] executes actions one at a time and reports every pause as a
//! resume timestamp instead of sleeping, so the executor decides how to wait.
//! [`BlockingExecutor`] simply sleeps on the clock until the run finishes.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Action, KeyStroke, LedEffect};
use crate::config::MacroConfig;
use crate::hal::{Clock, HidTransport, LedStrip};
use crate::led::{LedAnimator, WHITE};
use crate::profiles::ProfileStore;

const FLASH_TIMES: u32 = 3;
const FLASH_ON_MS: u64 = 100;
const FLASH_OFF_MS: u64 = 100;
const BREATHE_CYCLES: u32 = 2;

/// Everything an action may touch
pub struct MacroContext<'a> {
    pub clock: &'a mut dyn Clock,
    pub hid: &'a mut dyn HidTransport,
    pub strip: &'a mut dyn LedStrip,
    pub animator: &'a mut LedAnimator,
    pub store: &'a mut ProfileStore,
}

struct Frame {
    actions: Arc<[Action]>,
    next: usize,
    /// Passes left over `actions`, including the current one
    remaining: u32,
}

/// Resumable position in an action tree
pub struct MacroCursor {
    stack: Vec<Frame>,
    max_repeat: u32,
}

impl MacroCursor {
    pub fn new(actions: Arc<[Action]>, max_repeat: u32) -> Self {
        Self {
            stack: vec![Frame {
                actions,
                next: 0,
                remaining: 1,
            }],
            max_repeat: max_repeat.max(1),
        }
    }

    /// Next leaf action in execution order; `Repeat` nodes are expanded, never returned
    pub fn next_action(&mut self) -> Option<Action> {
        loop {
            let frame = self.stack.last_mut()?;

            if frame.next >= frame.actions.len() {
                frame.remaining = frame.remaining.saturating_sub(1);
                if frame.remaining > 0 {
                    frame.next = 0;
                } else {
                    self.stack.pop();
                }
                continue;
            }

            let action = frame.actions[frame.next].clone();
            frame.next += 1;

            if let Action::Repeat { count, actions } = action {
                let times = clamp_repeat(count, self.max_repeat);
                if !actions.is_empty() {
                    self.stack.push(Frame {
                        actions,
                        next: 0,
                        remaining: times,
                    });
                }
                continue;
            }

            return Some(action);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.stack.is_empty()
    }
}

fn clamp_repeat(count: i64, max: u32) -> u32 {
    count.clamp(1, max as i64) as u32
}

/// What a run needs next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Poll again right away
    Ready,
    /// Poll again once the clock reaches this time
    WaitUntil(u64),
    Done,
}

/// One macro in flight
pub struct MacroRun {
    cursor: MacroCursor,
    config: MacroConfig,
    pending_text: VecDeque<char>,
    resume_at: Option<u64>,
}

impl MacroRun {
    pub fn new(actions: Arc<[Action]>, config: MacroConfig) -> Self {
        Self {
            cursor: MacroCursor::new(actions, config.max_repeat),
            config,
            pending_text: VecDeque::new(),
            resume_at: None,
        }
    }

    /// Do at most one unit of work: one action, or one typed character
    pub fn poll(&mut self, ctx: &mut MacroContext<'_>) -> RunState {
        if let Some(at) = self.resume_at {
            if ctx.clock.now_ms() < at {
                return RunState::WaitUntil(at);
            }
            self.resume_at = None;
        }

        if let Some(c) = self.pending_text.pop_front() {
            ctx.hid.write_char(c);
            return self.pause(ctx, self.config.char_delay_ms);
        }

        let Some(action) = self.cursor.next_action() else {
            return RunState::Done;
        };

        self.execute(&action, ctx);

        let pause = match &action {
            Action::Delay(ms) => *ms,
            a if a.paced_by_default_delay() => ctx
                .store
                .active()
                .map(|p| p.default_delay_ms)
                .unwrap_or(self.config.default_delay_ms),
            _ => 0,
        };
        self.pause(ctx, pause)
    }

    fn pause(&mut self, ctx: &MacroContext<'_>, ms: u64) -> RunState {
        if ms == 0 {
            return RunState::Ready;
        }
        let at = ctx.clock.now_ms() + ms;
        self.resume_at = Some(at);
        RunState::WaitUntil(at)
    }

    fn execute(&mut self, action: &Action, ctx: &mut MacroContext<'_>) {
        match action {
            Action::Comment | Action::Delay(_) => {}
            Action::Key(KeyStroke::Char(c)) => {
                debug!("key '{}'", c);
                ctx.hid.write_char(*c);
            }
            Action::Key(KeyStroke::Code(code)) => {
                debug!("key {}", code);
                ctx.hid.press(*code);
                ctx.hid.release(*code);
            }
            Action::KeyCombo(keys) => {
                if keys.is_empty() {
                    return;
                }
                debug!("combo {:?}", keys);
                for key in keys.iter().filter(|k| k.is_modifier()) {
                    ctx.hid.press(*key);
                }
                for key in keys.iter().filter(|k| !k.is_modifier()) {
                    ctx.hid.press(*key);
                }
                ctx.hid.release_all();
            }
            Action::Text(text) => {
                let chars = text.chars().take(self.config.max_text_len);
                self.pending_text.extend(chars);
                debug!("text, {} chars queued", self.pending_text.len());
            }
            Action::Hold(key) => ctx.hid.press(*key),
            Action::Release => ctx.hid.release_all(),
            // Expanded by the cursor
            Action::Repeat { .. } => {}
            Action::Media(key) => ctx.hid.media(*key),
            Action::Telephony(key) => ctx.hid.telephony(*key),
            Action::MouseMove { dx, dy } => ctx.hid.mouse_move(*dx, *dy),
            Action::MouseClick(button) => ctx.hid.mouse_click(*button),
            Action::Led(color) => ctx.animator.solid(*color, ctx.strip),
            Action::LedAnim { effect, color } => {
                let color = color.unwrap_or(WHITE);
                match effect {
                    LedEffect::Flash => ctx.animator.flash(
                        ctx.strip,
                        ctx.clock,
                        color,
                        FLASH_TIMES,
                        FLASH_ON_MS,
                        FLASH_OFF_MS,
                    ),
                    LedEffect::Breathe => {
                        ctx.animator
                            .breathe_cycles(ctx.strip, ctx.clock, color, BREATHE_CYCLES)
                    }
                }
            }
            Action::Profile(requested) => {
                let max = ctx.store.num_profiles();
                let id = (*requested).clamp(1, max as i64) as u8;
                let now = ctx.clock.now_ms();
                match ctx.store.load_profile(id, now) {
                    Ok(profile) => {
                        info!("macro switched to profile {} '{}'", id, profile.name);
                        profile.apply_leds(ctx.animator);
                    }
                    Err(e) => warn!("macro profile switch to {} failed: {}", id, e),
                }
            }
            Action::Noop => debug!("skipping unresolved action"),
        }
    }
}

/// Drives a run to completion
pub trait Executor {
    fn drive(&mut self, run: &mut MacroRun, ctx: &mut MacroContext<'_>);
}

/// Single-threaded executor: every pause blocks the caller on the clock
#[derive(Debug, Default)]
pub struct BlockingExecutor;

impl Executor for BlockingExecutor {
    fn drive(&mut self, run: &mut MacroRun, ctx: &mut MacroContext<'_>) {
        loop {
            match run.poll(ctx) {
                RunState::Ready => {}
                RunState::WaitUntil(at) => {
                    let now = ctx.clock.now_ms();
                    ctx.clock.delay_ms(at.saturating_sub(now));
                }
                RunState::Done => break,
            }
        }
    }
}

/// Looks up and runs key bindings of the active profile
pub struct Interpreter {
    config: MacroConfig,
    executor: Box<dyn Executor>,
    running: bool,
}

impl Interpreter {
    pub fn new(config: MacroConfig) -> Self {
        Self::with_executor(config, Box::new(BlockingExecutor))
    }

    pub fn with_executor(config: MacroConfig, executor: Box<dyn Executor>) -> Self {
        Self {
            config,
            executor,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Run the bound sequence for `key`. Returns false when nothing ran.
    pub fn run_macro_for_key(&mut self, key: u8, ctx: &mut MacroContext<'_>) -> bool {
        if self.running {
            debug!("key {} ignored, macro already running", key);
            return false;
        }

        let Some(profile) = ctx.store.active() else {
            debug!("key {} ignored, no profile loaded", key);
            return false;
        };
        let actions = match profile.binding(key) {
            Some(binding) if !binding.actions.is_empty() => binding.actions.clone(),
            _ => {
                debug!("key {} has no binding in profile {}", key, profile.id);
                return false;
            }
        };

        info!("running macro for key {} ({} actions)", key, actions.len());
        self.running = true;
        self.run(actions, ctx);
        self.running = false;
        true
    }

    /// Execute a single action, including its trailing pause
    pub fn execute_action(&mut self, action: Action, ctx: &mut MacroContext<'_>) {
        self.run(Arc::from(vec![action]), ctx);
    }

    fn run(&mut self, actions: Arc<[Action]>, ctx: &mut MacroContext<'_>) {
        let mut run = MacroRun::new(actions, self.config.clone());
        self.executor.drive(&mut run, ctx);
    }
}

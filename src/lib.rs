pub mod actions;
pub mod config;
pub mod console;
pub mod error;
pub mod hal;
pub mod input;
pub mod led;
pub mod profiles;
pub mod upload;

use tracing::{debug, error, info, warn};

use actions::{Interpreter, MacroContext};
use config::Config;
use console::{Command, PROMPT};
use hal::{Board, Clock, HidTransport, InputPins, LedStrip, SerialPort};
use input::{EdgeKind, InputScanner, TouchEvent, TouchSwitch};
use led::{IdleAnimation, LedAnimator, Rgb, AMBER, BLUE, GREEN, RED};
use profiles::ProfileStore;
use upload::{UploadEvent, UploadProtocol};

const ACK_ON_MS: u64 = 150;
const ACK_OFF_MS: u64 = 50;
const FAILSAFE_FLASHES: u32 = 3;
const FAILSAFE_ON_MS: u64 = 200;
const FAILSAFE_OFF_MS: u64 = 100;

/// What the host loop should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// Tear the device down and boot again from the same board
    Reboot,
}

/// Device context: every piece of mutable firmware state, owned by the main loop
pub struct Device {
    config: Config,
    clock: Box<dyn Clock>,
    hid: Box<dyn HidTransport>,
    strip: Box<dyn LedStrip>,
    pins: Box<dyn InputPins>,
    serial: Box<dyn SerialPort>,
    store: ProfileStore,
    scanner: InputScanner,
    touch: TouchSwitch,
    animator: LedAnimator,
    interpreter: Interpreter,
    upload: UploadProtocol,
    reboot_requested: bool,
}

impl Device {
    /// Bring the device up: touch baselines, flash layout, start profile, banner
    pub fn boot(config: Config, board: Board) -> Self {
        let config = config.sanitized();
        let Board {
            clock,
            hid,
            fs,
            strip,
            pins,
            serial,
        } = board;

        let mut led_config = config.led.clone();
        led_config.count = strip.len();

        let mut device = Self {
            store: ProfileStore::new(fs, &config),
            scanner: InputScanner::new(config.device.num_keys, config.input.debounce_ms),
            touch: TouchSwitch::new(config.touch.clone()),
            animator: LedAnimator::new(led_config),
            interpreter: Interpreter::new(config.macros.clone()),
            upload: UploadProtocol::new(config.storage.max_upload_bytes),
            reboot_requested: false,
            clock,
            hid,
            strip,
            pins,
            serial,
            config,
        };

        info!(
            "booting: {} keys, {} profiles, {} leds",
            device.config.device.num_keys,
            device.config.device.num_profiles,
            device.strip.len()
        );

        if let Err(e) = device.store.ensure_layout() {
            warn!("could not create backup dir: {}", e);
        }
        device
            .touch
            .calibrate(device.pins.as_mut(), device.clock.as_mut());

        let start = device.config.device.start_profile;
        device.switch_profile(start);

        let banner = match device.store.active() {
            Some(profile) => format!("macropad ready, profile {} ({})", profile.id, profile.name),
            None => "macropad ready, no profile loaded".to_string(),
        };
        device.serial.write_line(&banner);
        device.serial.write_line(PROMPT);
        device
    }

    /// One pass of the main loop
    pub fn tick(&mut self) -> TickOutcome {
        // Serial first so uploads and commands land before input is scanned
        self.drain_serial();

        let now = self.clock.now_ms();
        let edges = self.scanner.scan(self.pins.as_mut(), now);
        let gestures = self.touch.poll(self.pins.as_mut(), self.clock.as_mut());

        let mut ran_macro = false;
        for edge in edges {
            match edge.kind {
                EdgeKind::Pressed => {
                    self.animator.highlight(edge.key, self.strip.as_mut());
                    if !self.interpreter.is_running() {
                        ran_macro |= self.run_macro_for_key(edge.key);
                    }
                }
                EdgeKind::Released => self.animator.clear_highlight(edge.key, self.strip.as_mut()),
            }
        }

        for gesture in gestures {
            self.handle_gesture(gesture);
        }

        if !ran_macro {
            let now = self.clock.now_ms();
            self.animator.tick(now, self.strip.as_mut());
        }

        if std::mem::take(&mut self.reboot_requested) {
            TickOutcome::Reboot
        } else {
            TickOutcome::Continue
        }
    }

    /// Hand the peripherals back, e.g. to boot again
    pub fn into_board(self) -> Board {
        Board {
            clock: self.clock,
            hid: self.hid,
            fs: self.store.into_fs(),
            strip: self.strip,
            pins: self.pins,
            serial: self.serial,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn animator(&self) -> &LedAnimator {
        &self.animator
    }

    /// Run the macro bound to `key` in the active profile, blocking until done
    pub fn run_macro_for_key(&mut self, key: u8) -> bool {
        let mut ctx = MacroContext {
            clock: self.clock.as_mut(),
            hid: self.hid.as_mut(),
            strip: self.strip.as_mut(),
            animator: &mut self.animator,
            store: &mut self.store,
        };
        self.interpreter.run_macro_for_key(key, &mut ctx)
    }

    /// Load profile `id` and show it on the LEDs. False if the load failed.
    pub fn switch_profile(&mut self, id: u8) -> bool {
        let now = self.clock.now_ms();
        match self.store.load_profile(id, now) {
            Ok(profile) => {
                profile.apply_leds(&mut self.animator);
                true
            }
            Err(e) => {
                error!("failed to load profile {}: {}", id, e);
                false
            }
        }
    }

    fn handle_gesture(&mut self, gesture: TouchEvent) {
        let count = self.store.num_profiles();
        let current = self.store.active_id();

        let (target, color) = match gesture {
            TouchEvent::NextProfile => (current % count + 1, GREEN),
            TouchEvent::PrevProfile => (if current <= 1 { count } else { current - 1 }, BLUE),
            TouchEvent::Failsafe => {
                warn!("failsafe: unloading profile {}", current);
                self.store.unload();
                self.animator.set_mode(IdleAnimation::None);
                self.animator.set_key_colors(std::iter::empty());
                self.flash(RED, FAILSAFE_FLASHES, FAILSAFE_ON_MS, FAILSAFE_OFF_MS);
                return;
            }
        };

        info!("touch gesture {:?}: profile {} -> {}", gesture, current, target);
        let color = if self.switch_profile(target) { color } else { AMBER };
        self.flash(color, 1, ACK_ON_MS, ACK_OFF_MS);
    }

    fn flash(&mut self, color: Rgb, times: u32, on_ms: u64, off_ms: u64) {
        self.animator.flash(
            self.strip.as_mut(),
            self.clock.as_mut(),
            color,
            times,
            on_ms,
            off_ms,
        );
    }

    fn drain_serial(&mut self) {
        while let Some(line) = self.serial.read_line() {
            match self.upload.feed(&line) {
                UploadEvent::Pending => {}
                UploadEvent::Forward(command) => self.handle_command_line(&command),
                UploadEvent::Started(path) => {
                    self.serial.write_line(&format!("Receiving {}", path));
                }
                UploadEvent::Complete { path, data } => self.commit_upload(&path, &data),
                UploadEvent::Rejected(e) => {
                    self.serial.write_line(&format!("ERR {}", e));
                    self.serial.write_line(PROMPT);
                }
            }
        }
    }

    fn commit_upload(&mut self, path: &str, data: &[u8]) {
        let now = self.clock.now_ms();
        match self.store.atomic_write(path, data, now) {
            Ok(()) => {
                self.serial
                    .write_line(&format!("OK wrote {} bytes to {}", data.len(), path));
                let active_id = self.store.active_id();
                if path == self.store.profile_path(active_id) {
                    if self.switch_profile(active_id) {
                        self.serial
                            .write_line(&format!("Reloaded profile {}", active_id));
                    } else {
                        self.serial
                            .write_line(&format!("ERR reload of profile {} failed", active_id));
                    }
                }
            }
            Err(e) => {
                error!("upload to {} failed: {}", path, e);
                self.serial.write_line(&format!("ERR write failed: {}", e));
            }
        }
        self.serial.write_line(PROMPT);
    }

    fn handle_command_line(&mut self, line: &str) {
        debug!("console: {}", line);
        match Command::parse(line, self.store.num_profiles()) {
            Ok(command) => self.run_command(command),
            Err(e) => self.serial.write_line(&format!("ERR {}", e)),
        }
        self.serial.write_line(PROMPT);
    }

    fn run_command(&mut self, command: Command) {
        match command {
            Command::Help => {
                for line in console::help_lines() {
                    self.serial.write_line(line);
                }
            }
            Command::Ls => match self.store.fs().list() {
                Ok(entries) => {
                    for entry in &entries {
                        self.serial
                            .write_line(&format!("{:<32} {:>6}", entry.path, entry.size));
                    }
                    self.serial.write_line(&format!("{} files", entries.len()));
                }
                Err(e) => self.serial.write_line(&format!("ERR {}", e)),
            },
            Command::Cat(path) => match self.store.fs().read(&path) {
                Ok(bytes) => {
                    for line in String::from_utf8_lossy(&bytes).lines() {
                        self.serial.write_line(line);
                    }
                }
                Err(e) => self.serial.write_line(&format!("ERR {}", e)),
            },
            Command::SetProfile(id) => {
                if self.switch_profile(id) {
                    let name = self.store.active().map(|p| p.name.clone()).unwrap_or_default();
                    self.serial
                        .write_line(&format!("Profile {} loaded: {}", id, name));
                } else {
                    self.serial
                        .write_line(&format!("ERR failed to load profile {}", id));
                }
            }
            Command::Status => {
                let id = self.store.active_id();
                let (loaded, name) = match self.store.active() {
                    Some(profile) => ("yes", profile.name.clone()),
                    None => ("no", "-".to_string()),
                };
                let idle = self.animator.mode();
                self.serial.write_line(&format!("profile: {} ({})", id, name));
                self.serial.write_line(&format!("loaded: {}", loaded));
                self.serial.write_line(&format!("idle: {}", idle));
            }
            Command::Reboot => {
                info!("reboot requested");
                self.serial.write_line("Rebooting...");
                self.reboot_requested = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actions::KeyCode;
    use hal::sim::{
        BufferedSerial, HidEvent, ManualClock, MemoryFs, RecordingHid, VirtualPins, VirtualStrip,
    };
    use hal::{FlashFs, TouchPad};

    struct Sim {
        clock: ManualClock,
        hid: RecordingHid,
        fs: MemoryFs,
        strip: VirtualStrip,
        pins: VirtualPins,
        serial: BufferedSerial,
    }

    impl Sim {
        fn new() -> Self {
            let clock = ManualClock::new();
            Self {
                hid: RecordingHid::with_clock(clock.clone()),
                clock,
                fs: MemoryFs::new(),
                strip: VirtualStrip::new(4),
                pins: VirtualPins::new(4, 500),
                serial: BufferedSerial::new(),
            }
        }

        fn board(&self) -> Board {
            Board {
                clock: Box::new(self.clock.clone()),
                hid: Box::new(self.hid.clone()),
                fs: Box::new(self.fs.clone()),
                strip: Box::new(self.strip.clone()),
                pins: Box::new(self.pins.clone()),
                serial: Box::new(self.serial.clone()),
            }
        }

        fn boot(&self) -> Device {
            let mut config = Config::default();
            config.device.num_keys = 4;
            config.device.num_profiles = 3;
            config.touch.settle_ms = 0;
            config.touch.samples = 1;
            config.touch.recalibrate_idle_ms = 0;
            Device::boot(config, self.board())
        }

        /// Tick `count` times, 10 ms apart
        fn run(&self, device: &mut Device, count: usize) -> Vec<TickOutcome> {
            (0..count)
                .map(|_| {
                    let outcome = device.tick();
                    self.clock.advance(10);
                    outcome
                })
                .collect()
        }

        fn send(&self, lines: &[&str]) {
            for line in lines {
                self.serial.push_line(line);
            }
        }
    }

    const SHORTCUT_PROFILE: &str = r#"{
  "profile_name": "Shortcuts",
  "idle_animation": "breathe",
  "default_delay": 0,
  "keys": [
    {"id": 2, "led_color": [0, 0, 255], "actions": [
      {"type": "key_combo", "keys": ["R", "LEFT_CTRL", "LEFT_SHIFT"]}
    ]}
  ]
}"#;

    #[test]
    fn test_boot_synthesizes_start_profile() {
        let sim = Sim::new();
        let device = sim.boot();
        assert!(device.store().is_loaded());
        assert_eq!(device.store().active().unwrap().name, "Profile 1");
        assert!(sim.fs.exists("/profile1.json"));

        let output = sim.serial.take_output();
        assert_eq!(output[0], "macropad ready, profile 1 (Profile 1)");
        assert_eq!(output.last().unwrap(), PROMPT);
    }

    #[test]
    fn test_upload_to_active_profile_reloads() {
        let sim = Sim::new();
        let mut device = sim.boot();
        sim.serial.take_output();

        sim.send(&["###BEGIN### profile1.json"]);
        sim.send(&SHORTCUT_PROFILE.lines().collect::<Vec<_>>());
        sim.send(&["###END###", "status"]);
        sim.run(&mut device, 1);

        let output = sim.serial.take_output();
        assert!(output.contains(&"Reloaded profile 1".to_string()));
        assert!(output.contains(&"profile: 1 (Shortcuts)".to_string()));
        assert!(output.contains(&"loaded: yes".to_string()));
        assert!(output.contains(&"idle: breathe".to_string()));
        assert_eq!(device.animator().mode(), IdleAnimation::Breathe);
        // The synthesized document was backed up before the overwrite
        assert!(sim.fs.paths().iter().any(|p| p.starts_with("/backups/profile1-")));
    }

    #[test]
    fn test_upload_to_other_path_does_not_reload() {
        let sim = Sim::new();
        let mut device = sim.boot();
        sim.serial.take_output();

        sim.send(&["###BEGIN### profile2.json", "{}", "###END###"]);
        sim.run(&mut device, 1);

        let output = sim.serial.take_output();
        assert!(output.iter().any(|l| l.starts_with("OK wrote 3 bytes")));
        assert!(!output.iter().any(|l| l.starts_with("Reloaded")));
        assert_eq!(device.store().active().unwrap().name, "Profile 1");
    }

    #[test]
    fn test_led_action_color_stays_after_macro() {
        let sim = Sim::new();
        sim.fs.put(
            "/profile1.json",
            br#"{"profile_name": "Lamp", "idle_animation": "none", "default_delay": 0,
                 "keys": [{"id": 1, "actions": [{"type": "led", "color": [10, 20, 30]}]}]}"#,
        );
        let mut device = sim.boot();

        sim.pins.set_key(1, true);
        sim.run(&mut device, 5);
        sim.pins.set_key(1, false);
        sim.run(&mut device, 20);

        assert_eq!(sim.strip.pixels(), vec![Rgb::new(10, 20, 30); 4]);
    }

    #[test]
    fn test_mistyped_profile_still_boots() {
        let sim = Sim::new();
        sim.fs.put(
            "/profile1.json",
            br#"{"profile_name": "Typed", "default_delay": "30",
                 "keys": [{"id": 1, "actions": [{"type": "key", "key": "A"}]}]}"#,
        );
        let device = sim.boot();

        assert!(device.store().is_loaded());
        assert_eq!(device.store().active().unwrap().name, "Typed");
        assert!(device.store().active().unwrap().binding(1).is_some());
    }

    #[test]
    fn test_key_press_runs_combo() {
        let sim = Sim::new();
        sim.fs.put("/profile1.json", SHORTCUT_PROFILE.as_bytes());
        let mut device = sim.boot();

        sim.pins.set_key(2, true);
        sim.run(&mut device, 5);
        assert!(device.animator().is_highlighted(2));
        assert_eq!(
            sim.hid.events(),
            vec![
                HidEvent::Press(KeyCode::LEFT_CTRL),
                HidEvent::Press(KeyCode::LEFT_SHIFT),
                HidEvent::Press(KeyCode(0x15)),
                HidEvent::ReleaseAll,
            ]
        );

        // Holding the key does not repeat the macro
        sim.run(&mut device, 20);
        assert_eq!(sim.hid.events().len(), 4);

        sim.pins.set_key(2, false);
        sim.run(&mut device, 5);
        assert!(!device.animator().is_highlighted(2));
    }

    #[test]
    fn test_touch_gestures_wrap() {
        let sim = Sim::new();
        let mut device = sim.boot();
        assert_eq!(device.store().active_id(), 1);

        // Prev from the first profile wraps to the last
        sim.pins.set_touch(TouchPad::Prev, 400);
        sim.run(&mut device, 1);
        assert_eq!(device.store().active_id(), 3);
        sim.pins.set_touch(TouchPad::Prev, 500);
        sim.run(&mut device, 1);

        // Next from the last wraps to the first
        sim.clock.advance(500);
        sim.pins.set_touch(TouchPad::Next, 400);
        sim.run(&mut device, 1);
        assert_eq!(device.store().active_id(), 1);
        assert_eq!(device.store().active().unwrap().name, "Profile 1");
    }

    #[test]
    fn test_failsafe_unloads_profile() {
        let sim = Sim::new();
        sim.fs.put("/profile1.json", SHORTCUT_PROFILE.as_bytes());
        let mut device = sim.boot();

        sim.pins.set_touch(TouchPad::Next, 400);
        sim.pins.set_touch(TouchPad::Prev, 400);
        sim.run(&mut device, 1);
        sim.clock.advance(3000);
        sim.run(&mut device, 1);
        assert!(!device.store().is_loaded());

        // Macros stop firing
        sim.pins.set_touch(TouchPad::Next, 500);
        sim.pins.set_touch(TouchPad::Prev, 500);
        sim.hid.clear();
        sim.pins.set_key(2, true);
        sim.run(&mut device, 5);
        assert!(sim.hid.events().is_empty());

        sim.serial.take_output();
        sim.send(&["status"]);
        sim.run(&mut device, 1);
        assert!(sim.serial.take_output().contains(&"loaded: no".to_string()));
    }

    #[test]
    fn test_console_commands() {
        let sim = Sim::new();
        let mut device = sim.boot();
        sim.serial.take_output();

        sim.send(&["setprofile 2", "ls", "cat profile2.json", "bogus", "setprofile 9"]);
        sim.run(&mut device, 1);
        let output = sim.serial.take_output();

        assert!(output.contains(&"Profile 2 loaded: Profile 2".to_string()));
        assert!(output.iter().any(|l| l.starts_with("/profile2.json")));
        assert!(output.iter().any(|l| l.contains("\"profile_name\": \"Profile 2\"")));
        assert!(output.iter().any(|l| l.starts_with("ERR unknown command 'bogus'")));
        assert!(output.iter().any(|l| l.starts_with("ERR profile must be 1..=3")));
        assert_eq!(output.iter().filter(|l| *l == PROMPT).count(), 5);
    }

    #[test]
    fn test_reboot_rebuilds_from_board() {
        let sim = Sim::new();
        let mut device = sim.boot();
        device.switch_profile(2);
        sim.send(&["reboot"]);
        assert_eq!(sim.run(&mut device, 1), vec![TickOutcome::Reboot]);

        let board = device.into_board();
        let mut config = device_config();
        config.device.start_profile = 1;
        let device = Device::boot(config, board);
        assert_eq!(device.store().active_id(), 1);
        assert!(sim.fs.exists("/profile2.json"));
    }

    fn device_config() -> Config {
        let mut config = Config::default();
        config.device.num_keys = 4;
        config.device.num_profiles = 3;
        config
    }

    #[test]
    fn test_idle_animation_runs_between_macros() {
        let sim = Sim::new();
        sim.fs.put(
            "/profile1.json",
            br#"{"profile_name": "Glow", "idle_animation": "rainbow", "keys": []}"#,
        );
        let mut device = sim.boot();
        let before = sim.strip.frames();
        sim.run(&mut device, 10);
        assert!(sim.strip.frames() > before);
        assert_ne!(sim.strip.pixel(0), Rgb::default());
    }
}

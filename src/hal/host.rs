//! Backends for running the firmware core on a desktop host

use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use super::{Clock, FileEntry, FlashFs, HidTransport, SerialPort};
use crate::actions::{KeyCode, MediaKey, MouseButton, TelephonyKey};
use crate::error::FsError;

/// Monotonic clock starting at zero when created
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn delay_ms(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Flash filesystem emulated by a directory on disk
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, FsError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| FsError::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Map a flash path onto the root, refusing anything that escapes it
    fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(FsError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn collect(&self, dir: &Path, out: &mut Vec<FileEntry>) -> Result<(), FsError> {
        let io_err = |source| FsError::Io {
            path: dir.display().to_string(),
            source,
        };
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let metadata = entry.metadata().map_err(io_err)?;
            let path = entry.path();
            if metadata.is_dir() {
                self.collect(&path, out)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let flash_path = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(FileEntry {
                    path: format!("/{}", flash_path),
                    size: metadata.len() as usize,
                });
            }
        }
        Ok(())
    }
}

impl FlashFs for DirFs {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let full = self.resolve(path)?;
        std::fs::read(&full).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            _ => FsError::Io {
                path: path.to_string(),
                source,
            },
        })
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<usize, FsError> {
        let full = self.resolve(path)?;
        let io_err = |source| FsError::Io {
            path: path.to_string(),
            source,
        };
        let mut file = std::fs::File::create(&full).map_err(io_err)?;
        let mut written = 0;
        while written < data.len() {
            match file.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_err(e)),
            }
        }
        file.sync_all().map_err(io_err)?;
        Ok(written)
    }

    fn remove(&mut self, path: &str) -> Result<(), FsError> {
        let full = self.resolve(path)?;
        std::fs::remove_file(full).map_err(|source| FsError::Io {
            path: path.to_string(),
            source,
        })
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError> {
        let from_full = self.resolve(from)?;
        let to_full = self.resolve(to)?;
        std::fs::rename(from_full, to_full).map_err(|source| FsError::Io {
            path: to.to_string(),
            source,
        })
    }

    fn create_dir(&mut self, path: &str) -> Result<(), FsError> {
        let full = self.resolve(path)?;
        std::fs::create_dir_all(full).map_err(|source| FsError::Io {
            path: path.to_string(),
            source,
        })
    }

    fn list(&self) -> Result<Vec<FileEntry>, FsError> {
        let mut entries = Vec::new();
        self.collect(&self.root, &mut entries)?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

/// Transport that only logs what it would send
#[derive(Debug, Default)]
pub struct LogHid;

impl HidTransport for LogHid {
    fn press(&mut self, key: KeyCode) {
        info!("HID press {}", key);
    }

    fn release(&mut self, key: KeyCode) {
        info!("HID release {}", key);
    }

    fn release_all(&mut self) {
        info!("HID release all");
    }

    fn write_char(&mut self, c: char) {
        info!("HID char {:?}", c);
    }

    fn media(&mut self, key: MediaKey) {
        info!("HID media {} (0x{:02X})", key, key.usage());
    }

    fn telephony(&mut self, key: TelephonyKey) {
        info!("HID telephony {} (0x{:02X})", key, key.usage());
    }

    fn mouse_move(&mut self, dx: i8, dy: i8) {
        info!("HID mouse move {} {}", dx, dy);
    }

    fn mouse_click(&mut self, button: MouseButton) {
        info!("HID mouse click {}", button);
    }
}

/// Serial channel fed by a reader task, answering on stdout
pub struct ChannelSerial {
    rx: UnboundedReceiver<String>,
}

impl ChannelSerial {
    pub fn new(rx: UnboundedReceiver<String>) -> Self {
        Self { rx }
    }
}

impl SerialPort for ChannelSerial {
    fn read_line(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    fn write_line(&mut self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        if writeln!(stdout, "{}", line).and_then(|_| stdout.flush()).is_err() {
            debug!("stdout closed, dropping serial output");
        }
    }
}

#[cfg(feature = "enigo")]
pub use self::enigo_hid::EnigoHid;

#[cfg(feature = "enigo")]
mod enigo_hid {
    use enigo::{Button, Coordinate, Direction, Enigo, Key as EnigoKey, Keyboard, Mouse, Settings};
    use tracing::{debug, warn};

    use super::super::HidTransport;
    use crate::actions::{KeyCode, MediaKey, MouseButton, TelephonyKey};

    /// Injects events into the host desktop session
    pub struct EnigoHid {
        enigo: Enigo,
        held: Vec<EnigoKey>,
    }

    impl EnigoHid {
        pub fn new() -> anyhow::Result<Self> {
            let enigo = Enigo::new(&Settings::default())
                .map_err(|e| anyhow::anyhow!("Failed to initialize Enigo: {:?}", e))?;
            Ok(Self {
                enigo,
                held: Vec::new(),
            })
        }

        fn translate(key: KeyCode) -> Option<EnigoKey> {
            let key = match key.0 {
                code @ 0x04..=0x1D => EnigoKey::Unicode((b'a' + code - 0x04) as char),
                code @ 0x1E..=0x26 => EnigoKey::Unicode((b'1' + code - 0x1E) as char),
                0x27 => EnigoKey::Unicode('0'),
                0x28 => EnigoKey::Return,
                0x29 => EnigoKey::Escape,
                0x2A => EnigoKey::Backspace,
                0x2B => EnigoKey::Tab,
                0x2C => EnigoKey::Space,
                0x3A => EnigoKey::F1,
                0x3B => EnigoKey::F2,
                0x3C => EnigoKey::F3,
                0x3D => EnigoKey::F4,
                0x3E => EnigoKey::F5,
                0x3F => EnigoKey::F6,
                0x40 => EnigoKey::F7,
                0x41 => EnigoKey::F8,
                0x42 => EnigoKey::F9,
                0x43 => EnigoKey::F10,
                0x44 => EnigoKey::F11,
                0x45 => EnigoKey::F12,
                0x4A => EnigoKey::Home,
                0x4B => EnigoKey::PageUp,
                0x4C => EnigoKey::Delete,
                0x4D => EnigoKey::End,
                0x4E => EnigoKey::PageDown,
                0x4F => EnigoKey::RightArrow,
                0x50 => EnigoKey::LeftArrow,
                0x51 => EnigoKey::DownArrow,
                0x52 => EnigoKey::UpArrow,
                0xE0 | 0xE4 => EnigoKey::Control,
                0xE1 | 0xE5 => EnigoKey::Shift,
                0xE2 | 0xE6 => EnigoKey::Alt,
                0xE3 | 0xE7 => EnigoKey::Meta,
                _ => return None,
            };
            Some(key)
        }

        fn send(&mut self, key: EnigoKey, direction: Direction) {
            if let Err(e) = self.enigo.key(key, direction) {
                warn!("enigo key {:?} failed: {:?}", key, e);
            }
        }
    }

    impl HidTransport for EnigoHid {
        fn press(&mut self, key: KeyCode) {
            match Self::translate(key) {
                Some(k) => {
                    self.send(k, Direction::Press);
                    self.held.push(k);
                }
                None => debug!("no host mapping for {}", key),
            }
        }

        fn release(&mut self, key: KeyCode) {
            if let Some(k) = Self::translate(key) {
                self.send(k, Direction::Release);
                self.held.retain(|held| *held != k);
            }
        }

        fn release_all(&mut self) {
            for k in std::mem::take(&mut self.held).into_iter().rev() {
                self.send(k, Direction::Release);
            }
        }

        fn write_char(&mut self, c: char) {
            if let Err(e) = self.enigo.text(&c.to_string()) {
                warn!("enigo text {:?} failed: {:?}", c, e);
            }
        }

        fn media(&mut self, key: MediaKey) {
            let k = match key {
                MediaKey::PlayPause => EnigoKey::MediaPlayPause,
                MediaKey::NextTrack => EnigoKey::MediaNextTrack,
                MediaKey::PrevTrack => EnigoKey::MediaPrevTrack,
                MediaKey::Mute => EnigoKey::VolumeMute,
                MediaKey::VolumeUp => EnigoKey::VolumeUp,
                MediaKey::VolumeDown => EnigoKey::VolumeDown,
                MediaKey::Stop => {
                    debug!("media stop has no host mapping");
                    return;
                }
            };
            self.send(k, Direction::Click);
        }

        fn telephony(&mut self, key: TelephonyKey) {
            debug!("telephony {} has no host mapping", key);
        }

        fn mouse_move(&mut self, dx: i8, dy: i8) {
            if let Err(e) = self.enigo.move_mouse(dx as i32, dy as i32, Coordinate::Rel) {
                warn!("enigo mouse move ({}, {}) failed: {:?}", dx, dy, e);
            }
        }

        fn mouse_click(&mut self, button: MouseButton) {
            let button = match button {
                MouseButton::Left => Button::Left,
                MouseButton::Right => Button::Right,
                MouseButton::Middle => Button::Middle,
            };
            if let Err(e) = self.enigo.button(button, Direction::Click) {
                warn!("enigo button {:?} failed: {:?}", button, e);
            }
        }
    }
}

//! Hardware seams
//!
//! Every peripheral the firmware core touches sits behind one of these traits.
//! `sim` holds shared-handle virtual peripherals used by the simulator and the
//! tests, `host` holds the backends the binary runs against.

pub mod host;
pub mod sim;

use crate::actions::{KeyCode, MediaKey, MouseButton, TelephonyKey};
use crate::error::FsError;
use crate::led::Rgb;

/// Millisecond time source with a blocking delay
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn delay_ms(&mut self, ms: u64);
}

/// Logical keyboard/mouse/media calls turned into host-visible reports
pub trait HidTransport {
    fn press(&mut self, key: KeyCode);
    fn release(&mut self, key: KeyCode);
    fn release_all(&mut self);
    /// Type one printable character
    fn write_char(&mut self, c: char);
    fn media(&mut self, key: MediaKey);
    fn telephony(&mut self, key: TelephonyKey);
    fn mouse_move(&mut self, dx: i8, dy: i8);
    fn mouse_click(&mut self, button: MouseButton);
}

/// A stored file and its size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub size: usize,
}

/// Raw flash filesystem primitives. Paths are absolute from the flash root (`/profile1.json`).
pub trait FlashFs {
    fn exists(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> Result<Vec<u8>, FsError>;
    /// Returns the number of bytes that actually reached the file
    fn write(&mut self, path: &str, data: &[u8]) -> Result<usize, FsError>;
    fn remove(&mut self, path: &str) -> Result<(), FsError>;
    /// Moves `from` onto `to`, replacing any existing file at `to`
    fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError>;
    fn create_dir(&mut self, path: &str) -> Result<(), FsError>;
    fn list(&self) -> Result<Vec<FileEntry>, FsError>;
}

/// Addressable LED strip; nothing is visible until `show`
pub trait LedStrip {
    fn len(&self) -> usize;
    fn set_pixel(&mut self, index: usize, color: Rgb);
    fn show(&mut self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fill(&mut self, color: Rgb) {
        for i in 0..self.len() {
            self.set_pixel(i, color);
        }
    }
}

/// The two capacitive pads used for profile gestures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPad {
    Next,
    Prev,
}

impl TouchPad {
    pub const ALL: [TouchPad; 2] = [TouchPad::Next, TouchPad::Prev];

    pub fn index(self) -> usize {
        match self {
            TouchPad::Next => 0,
            TouchPad::Prev => 1,
        }
    }
}

/// Button GPIOs and touch channels
pub trait InputPins {
    fn key_count(&self) -> usize;
    /// Logical level of a key (true = held); active-low wiring is the backend's concern
    fn is_pressed(&mut self, index: usize) -> bool;
    /// Raw capacitive reading; lower means touched
    fn touch_read(&mut self, pad: TouchPad) -> u16;
}

/// Line-oriented serial channel
pub trait SerialPort {
    /// Next complete line, if one is pending. Never blocks.
    fn read_line(&mut self) -> Option<String>;
    fn write_line(&mut self, line: &str);
}

/// Every peripheral the device context owns
pub struct Board {
    pub clock: Box<dyn Clock>,
    pub hid: Box<dyn HidTransport>,
    pub fs: Box<dyn FlashFs>,
    pub strip: Box<dyn LedStrip>,
    pub pins: Box<dyn InputPins>,
    pub serial: Box<dyn SerialPort>,
}

//! Virtual peripherals with shared handles
//!
//! Each type is cheap to clone; clones observe and drive the same state, so a
//! test (or the simulator) keeps one handle while the device owns the other.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use super::{Clock, FileEntry, FlashFs, HidTransport, InputPins, LedStrip, SerialPort, TouchPad};
use crate::actions::{KeyCode, MediaKey, MouseButton, TelephonyKey};
use crate::error::FsError;
use crate::led::{Rgb, OFF};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Virtual time; `delay_ms` advances it instantly
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn delay_ms(&mut self, ms: u64) {
        self.advance(ms);
    }
}

/// One call made on a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HidEvent {
    Press(KeyCode),
    Release(KeyCode),
    ReleaseAll,
    Char(char),
    Media(MediaKey),
    Telephony(TelephonyKey),
    MouseMove(i8, i8),
    MouseClick(MouseButton),
}

/// Records every transport call with the virtual time it happened at
#[derive(Debug, Clone, Default)]
pub struct RecordingHid {
    events: Arc<Mutex<Vec<(u64, HidEvent)>>>,
    clock: Option<ManualClock>,
}

impl RecordingHid {
    /// Stamp events with `clock`
    pub fn with_clock(clock: ManualClock) -> Self {
        Self {
            events: Arc::default(),
            clock: Some(clock),
        }
    }

    pub fn events(&self) -> Vec<HidEvent> {
        lock(&self.events).iter().map(|(_, e)| *e).collect()
    }

    pub fn timed_events(&self) -> Vec<(u64, HidEvent)> {
        lock(&self.events).clone()
    }

    /// Characters typed, in order
    pub fn typed(&self) -> String {
        lock(&self.events)
            .iter()
            .filter_map(|(_, e)| match e {
                HidEvent::Char(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    fn record(&mut self, event: HidEvent) {
        let at = self.clock.as_ref().map(|c| c.now_ms()).unwrap_or(0);
        trace!("hid {:?} @{}", event, at);
        lock(&self.events).push((at, event));
    }
}

impl HidTransport for RecordingHid {
    fn press(&mut self, key: KeyCode) {
        self.record(HidEvent::Press(key));
    }

    fn release(&mut self, key: KeyCode) {
        self.record(HidEvent::Release(key));
    }

    fn release_all(&mut self) {
        self.record(HidEvent::ReleaseAll);
    }

    fn write_char(&mut self, c: char) {
        self.record(HidEvent::Char(c));
    }

    fn media(&mut self, key: MediaKey) {
        self.record(HidEvent::Media(key));
    }

    fn telephony(&mut self, key: TelephonyKey) {
        self.record(HidEvent::Telephony(key));
    }

    fn mouse_move(&mut self, dx: i8, dy: i8) {
        self.record(HidEvent::MouseMove(dx, dy));
    }

    fn mouse_click(&mut self, button: MouseButton) {
        self.record(HidEvent::MouseClick(button));
    }
}

#[derive(Debug, Default)]
struct MemoryFsInner {
    files: BTreeMap<String, Vec<u8>>,
    dirs: Vec<String>,
    /// Next write stores only this many bytes
    short_write: Option<usize>,
    fail_rename: bool,
}

/// In-memory flash with fault injection
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    inner: Arc<Mutex<MemoryFsInner>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file directly, bypassing the device
    pub fn put(&self, path: &str, data: &[u8]) {
        lock(&self.inner).files.insert(path.to_string(), data.to_vec());
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.inner).files.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        lock(&self.inner).files.keys().cloned().collect()
    }

    /// Make the next write stop after `bytes` bytes
    pub fn fail_next_write_after(&self, bytes: usize) {
        lock(&self.inner).short_write = Some(bytes);
    }

    pub fn fail_renames(&self, fail: bool) {
        lock(&self.inner).fail_rename = fail;
    }
}

impl FlashFs for MemoryFs {
    fn exists(&self, path: &str) -> bool {
        lock(&self.inner).files.contains_key(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, FsError> {
        lock(&self.inner)
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<usize, FsError> {
        let mut inner = lock(&self.inner);
        let written = match inner.short_write.take() {
            Some(limit) => limit.min(data.len()),
            None => data.len(),
        };
        inner.files.insert(path.to_string(), data[..written].to_vec());
        Ok(written)
    }

    fn remove(&mut self, path: &str) -> Result<(), FsError> {
        lock(&self.inner)
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError> {
        let mut inner = lock(&self.inner);
        if inner.fail_rename {
            return Err(FsError::Fault {
                path: to.to_string(),
                reason: "rename failed".to_string(),
            });
        }
        let data = inner
            .files
            .remove(from)
            .ok_or_else(|| FsError::NotFound(from.to_string()))?;
        inner.files.insert(to.to_string(), data);
        Ok(())
    }

    fn create_dir(&mut self, path: &str) -> Result<(), FsError> {
        let mut inner = lock(&self.inner);
        if !inner.dirs.iter().any(|d| d == path) {
            inner.dirs.push(path.to_string());
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<FileEntry>, FsError> {
        Ok(lock(&self.inner)
            .files
            .iter()
            .map(|(path, data)| FileEntry {
                path: path.clone(),
                size: data.len(),
            })
            .collect())
    }
}

#[derive(Debug, Default)]
struct StripInner {
    pending: Vec<Rgb>,
    shown: Vec<Rgb>,
    frames: u64,
}

/// LED strip backed by a shared pixel buffer
#[derive(Debug, Clone)]
pub struct VirtualStrip {
    inner: Arc<Mutex<StripInner>>,
    len: usize,
}

impl VirtualStrip {
    pub fn new(len: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StripInner {
                pending: vec![OFF; len],
                shown: vec![OFF; len],
                frames: 0,
            })),
            len,
        }
    }

    /// Pixels as of the last `show`
    pub fn pixels(&self) -> Vec<Rgb> {
        lock(&self.inner).shown.clone()
    }

    pub fn pixel(&self, index: usize) -> Rgb {
        lock(&self.inner).shown.get(index).copied().unwrap_or(OFF)
    }

    /// Number of `show` calls so far
    pub fn frames(&self) -> u64 {
        lock(&self.inner).frames
    }
}

impl LedStrip for VirtualStrip {
    fn len(&self) -> usize {
        self.len
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) {
        if let Some(pixel) = lock(&self.inner).pending.get_mut(index) {
            *pixel = color;
        }
    }

    fn show(&mut self) {
        let mut inner = lock(&self.inner);
        let frame = inner.pending.clone();
        inner.shown = frame;
        inner.frames += 1;
        trace!("strip frame {}", inner.frames);
    }
}

#[derive(Debug)]
struct PinsInner {
    keys: Vec<bool>,
    touch: [VecDeque<u16>; 2],
    touch_level: [u16; 2],
}

/// Button and touch levels set from outside
///
/// Touch reads return queued readings first, then the steady level.
#[derive(Debug, Clone)]
pub struct VirtualPins {
    inner: Arc<Mutex<PinsInner>>,
    key_count: usize,
}

impl VirtualPins {
    pub fn new(key_count: usize, touch_level: u16) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PinsInner {
                keys: vec![false; key_count],
                touch: [VecDeque::new(), VecDeque::new()],
                touch_level: [touch_level; 2],
            })),
            key_count,
        }
    }

    /// Set the level of a 1-based key id
    pub fn set_key(&self, key: u8, pressed: bool) {
        let index = (key as usize).wrapping_sub(1);
        if let Some(level) = lock(&self.inner).keys.get_mut(index) {
            *level = pressed;
        }
    }

    pub fn set_touch(&self, pad: TouchPad, level: u16) {
        let mut inner = lock(&self.inner);
        inner.touch[pad.index()].clear();
        inner.touch_level[pad.index()] = level;
    }

    /// Queue one-off readings ahead of the steady level
    pub fn queue_touch(&self, pad: TouchPad, readings: &[u16]) {
        lock(&self.inner).touch[pad.index()].extend(readings.iter().copied());
    }
}

impl InputPins for VirtualPins {
    fn key_count(&self) -> usize {
        self.key_count
    }

    fn is_pressed(&mut self, index: usize) -> bool {
        lock(&self.inner).keys.get(index).copied().unwrap_or(false)
    }

    fn touch_read(&mut self, pad: TouchPad) -> u16 {
        let mut inner = lock(&self.inner);
        let level = inner.touch_level[pad.index()];
        inner.touch[pad.index()].pop_front().unwrap_or(level)
    }
}

#[derive(Debug, Default)]
struct SerialInner {
    input: VecDeque<String>,
    output: Vec<String>,
}

/// Serial channel with queued input and captured output
#[derive(Debug, Clone, Default)]
pub struct BufferedSerial {
    inner: Arc<Mutex<SerialInner>>,
}

impl BufferedSerial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&self, line: &str) {
        lock(&self.inner).input.push_back(line.to_string());
    }

    /// Drain everything written so far
    pub fn take_output(&self) -> Vec<String> {
        std::mem::take(&mut lock(&self.inner).output)
    }
}

impl SerialPort for BufferedSerial {
    fn read_line(&mut self) -> Option<String> {
        lock(&self.inner).input.pop_front()
    }

    fn write_line(&mut self, line: &str) {
        lock(&self.inner).output.push(line.to_string());
    }
}

//! HID usage tables and name resolution for keys, media and telephony codes

use std::fmt;
use std::str::FromStr;

use strum::{Display, EnumString};

/// A HID keyboard page usage (page 0x07)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCode(pub u8);

impl KeyCode {
    pub const LEFT_CTRL: KeyCode = KeyCode(0xE0);
    pub const LEFT_SHIFT: KeyCode = KeyCode(0xE1);
    pub const LEFT_ALT: KeyCode = KeyCode(0xE2);
    pub const LEFT_GUI: KeyCode = KeyCode(0xE3);
    pub const RIGHT_CTRL: KeyCode = KeyCode(0xE4);
    pub const RIGHT_SHIFT: KeyCode = KeyCode(0xE5);
    pub const RIGHT_ALT: KeyCode = KeyCode(0xE6);
    pub const RIGHT_GUI: KeyCode = KeyCode(0xE7);

    pub fn is_modifier(self) -> bool {
        (0xE0..=0xE7).contains(&self.0)
    }

    /// Resolve a key name such as `ENTER`, `KEY_F5`, `left-ctrl` or `r`
    pub fn from_name(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Self::from_char(c);
        }

        let normalized = normalize(name);
        let normalized = normalized.strip_prefix("KEY_").unwrap_or(normalized.as_str());

        if let Some(n) = normalized.strip_prefix('F').and_then(|n| n.parse::<u8>().ok()) {
            return match n {
                1..=12 => Some(KeyCode(0x3A + n - 1)),
                13..=24 => Some(KeyCode(0x68 + n - 13)),
                _ => None,
            };
        }

        NAMED_KEYS
            .iter()
            .find(|(names, _)| names.contains(&normalized))
            .map(|(_, code)| KeyCode(*code))
    }

    /// Usage code for a single character, ignoring shift state
    pub fn from_char(c: char) -> Option<Self> {
        let code = match c.to_ascii_lowercase() {
            c @ 'a'..='z' => 0x04 + (c as u8 - b'a'),
            '0' => 0x27,
            c @ '1'..='9' => 0x1E + (c as u8 - b'1'),
            ' ' => 0x2C,
            '-' => 0x2D,
            '=' => 0x2E,
            '[' => 0x2F,
            ']' => 0x30,
            '\\' => 0x31,
            ';' => 0x33,
            '\'' => 0x34,
            '`' => 0x35,
            ',' => 0x36,
            '.' => 0x37,
            '/' => 0x38,
            _ => return None,
        };
        Some(KeyCode(code))
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match NAMED_KEYS.iter().find(|(_, code)| *code == self.0) {
            Some((names, _)) => write!(f, "{}", names[0]),
            None => write!(f, "0x{:02X}", self.0),
        }
    }
}

/// Named usages; the first name is the canonical one
const NAMED_KEYS: &[(&[&str], u8)] = &[
    (&["ENTER", "RETURN"], 0x28),
    (&["ESC", "ESCAPE"], 0x29),
    (&["BACKSPACE"], 0x2A),
    (&["TAB"], 0x2B),
    (&["SPACE"], 0x2C),
    (&["CAPS_LOCK"], 0x39),
    (&["PRINT_SCREEN", "PRTSC"], 0x46),
    (&["SCROLL_LOCK"], 0x47),
    (&["PAUSE"], 0x48),
    (&["INSERT"], 0x49),
    (&["HOME"], 0x4A),
    (&["PAGE_UP"], 0x4B),
    (&["DELETE", "DEL"], 0x4C),
    (&["END"], 0x4D),
    (&["PAGE_DOWN"], 0x4E),
    (&["RIGHT_ARROW", "RIGHT"], 0x4F),
    (&["LEFT_ARROW", "LEFT"], 0x50),
    (&["DOWN_ARROW", "DOWN"], 0x51),
    (&["UP_ARROW", "UP"], 0x52),
    (&["NUM_LOCK"], 0x53),
    (&["MENU", "APPLICATION"], 0x65),
    (&["LEFT_CTRL", "CTRL", "CONTROL", "LCTRL"], 0xE0),
    (&["LEFT_SHIFT", "SHIFT", "LSHIFT"], 0xE1),
    (&["LEFT_ALT", "ALT", "OPTION", "LALT"], 0xE2),
    (&["LEFT_GUI", "GUI", "CMD", "WIN", "META", "SUPER", "LGUI"], 0xE3),
    (&["RIGHT_CTRL", "RCTRL"], 0xE4),
    (&["RIGHT_SHIFT", "RSHIFT"], 0xE5),
    (&["RIGHT_ALT", "RALT", "ALTGR"], 0xE6),
    (&["RIGHT_GUI", "RGUI", "RCMD"], 0xE7),
];

fn normalize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// What a `key` action emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStroke {
    /// Printable character typed through the transport's layout
    Char(char),
    /// Raw usage pulsed press-then-release
    Code(KeyCode),
}

impl KeyStroke {
    pub fn from_name(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if !c.is_control() => Some(KeyStroke::Char(c)),
            _ => KeyCode::from_name(name).map(KeyStroke::Code),
        }
    }
}

/// Consumer control page usages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum MediaKey {
    #[strum(to_string = "play_pause", serialize = "play")]
    PlayPause,
    #[strum(to_string = "next_track", serialize = "next")]
    NextTrack,
    #[strum(to_string = "prev_track", serialize = "previous_track", serialize = "prev")]
    PrevTrack,
    Stop,
    Mute,
    VolumeUp,
    VolumeDown,
}

impl MediaKey {
    pub fn usage(self) -> u16 {
        match self {
            MediaKey::PlayPause => 0xCD,
            MediaKey::NextTrack => 0xB5,
            MediaKey::PrevTrack => 0xB6,
            MediaKey::Stop => 0xB7,
            MediaKey::Mute => 0xE2,
            MediaKey::VolumeUp => 0xE9,
            MediaKey::VolumeDown => 0xEA,
        }
    }
}

/// Telephony page usages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TelephonyKey {
    #[strum(to_string = "hook_switch", serialize = "answer")]
    HookSwitch,
    Flash,
    Redial,
    #[strum(to_string = "drop", serialize = "hang_up")]
    Drop,
    #[strum(to_string = "phone_mute", serialize = "mute")]
    PhoneMute,
    SpeakerPhone,
}

impl TelephonyKey {
    pub fn usage(self) -> u16 {
        match self {
            TelephonyKey::HookSwitch => 0x20,
            TelephonyKey::Flash => 0x21,
            TelephonyKey::Redial => 0x24,
            TelephonyKey::Drop => 0x26,
            TelephonyKey::SpeakerPhone => 0x2B,
            TelephonyKey::PhoneMute => 0x2F,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Parse a strum-backed code name, tolerating `-` and spaces
pub fn parse_code<T: FromStr>(name: &str) -> Option<T> {
    let normalized = name.trim().replace(['-', ' '], "_");
    normalized.parse().ok()
}

//! LED colors and the strip animator

mod animator;

pub use animator::{IdleAnimation, LedAnimator};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub const OFF: Rgb = Rgb::new(0, 0, 0);
pub const WHITE: Rgb = Rgb::new(255, 255, 255);
pub const RED: Rgb = Rgb::new(255, 0, 0);
pub const GREEN: Rgb = Rgb::new(0, 200, 60);
pub const BLUE: Rgb = Rgb::new(0, 90, 255);
pub const AMBER: Rgb = Rgb::new(255, 140, 0);

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scale every channel by `level / 255`
    pub fn scaled(self, level: u8) -> Self {
        let scale = |c: u8| ((c as u16 * level as u16) / 255) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }

    /// Classic 0..=255 color wheel (red → green → blue → red)
    pub fn wheel(pos: u8) -> Self {
        let pos = 255 - pos;
        match pos {
            0..=84 => Self::new(255 - pos * 3, 0, pos * 3),
            85..=169 => {
                let pos = pos - 85;
                Self::new(0, pos * 3, 255 - pos * 3)
            }
            _ => {
                let pos = pos - 170;
                Self::new(pos * 3, 255 - pos * 3, 0)
            }
        }
    }
}

/// Parse a hex color string like `#00C864`
pub fn parse_hex_color(hex: &str) -> Option<Rgb> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }

    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;

    Some(Rgb::new(r, g, b))
}

/// Convert to a hex string
pub fn rgb_to_hex(color: Rgb) -> String {
    format!("#{:02X}{:02X}{:02X}", color.r, color.g, color.b)
}

/// Config files carry colors as hex strings
impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&rgb_to_hex(*self))
    }
}

impl<'de> Deserialize<'de> for Rgb {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        parse_hex_color(&hex)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid color '{}'", hex)))
    }
}

/// Parse a JSON `[r, g, b]` triple; anything else is rejected
pub fn rgb_from_json(value: &serde_json::Value) -> Option<Rgb> {
    let channels = value.as_array()?;
    if channels.len() != 3 {
        return None;
    }
    let channel = |i: usize| channels[i].as_u64().map(|c| c.min(255) as u8);
    Some(Rgb::new(channel(0)?, channel(1)?, channel(2)?))
}

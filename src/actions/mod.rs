//! Macro actions: resolution from profile JSON and execution
//!
//! Actions are resolved once, when a profile loads. Anything that can't be
//! resolved (unknown `type`, unknown key name, wrong field type) becomes
//! [`Action::Noop`] plus a diagnostic, so a bad entry never takes the rest of
//! its sequence down with it.

mod interpreter;
mod keys;

pub use interpreter::{
    BlockingExecutor, Executor, Interpreter, MacroContext, MacroCursor, MacroRun, RunState,
};
pub use keys::{parse_code, KeyCode, KeyStroke, MediaKey, MouseButton, TelephonyKey};

use std::sync::Arc;

use serde_json::Value;
use strum::{Display, EnumString};

use crate::led::{rgb_from_json, Rgb};

/// Blocking LED effects a macro may trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LedEffect {
    Flash,
    Breathe,
}

/// One executable step of a macro
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Comment,
    Delay(u64),
    Key(KeyStroke),
    /// Resolved keys in source order; modifiers are sorted out at execution
    KeyCombo(Vec<KeyCode>),
    Text(String),
    Hold(KeyCode),
    Release,
    /// Requested count, clamped when executed
    Repeat { count: i64, actions: Arc<[Action]> },
    Media(MediaKey),
    MouseMove { dx: i8, dy: i8 },
    MouseClick(MouseButton),
    Led(Rgb),
    LedAnim { effect: LedEffect, color: Option<Rgb> },
    /// Requested profile id, clamped when executed
    Profile(i64),
    Telephony(TelephonyKey),
    /// Unresolvable entry
    Noop,
}

/// Type tags accepted in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
enum ActionKind {
    Comment,
    Delay,
    Key,
    #[strum(serialize = "key_combo", serialize = "combo", serialize = "keycombo")]
    KeyCombo,
    Text,
    Hold,
    Release,
    Repeat,
    Media,
    MouseMove,
    MouseClick,
    Led,
    LedAnim,
    #[strum(serialize = "profile", serialize = "profile_switch")]
    Profile,
    Telephony,
}

impl Action {
    /// Whether the profile's inter-action delay follows this action
    pub fn paced_by_default_delay(&self) -> bool {
        !matches!(
            self,
            Action::Comment | Action::Delay(_) | Action::Text(_) | Action::Repeat { .. } | Action::Noop
        )
    }
}

/// Resolve a list of JSON action objects
pub fn resolve_actions(values: &[Value], diagnostics: &mut Vec<String>) -> Arc<[Action]> {
    values
        .iter()
        .map(|value| resolve_action(value, diagnostics))
        .collect()
}

/// Resolve one JSON action object, recording why it degraded to a no-op
pub fn resolve_action(value: &Value, diagnostics: &mut Vec<String>) -> Action {
    match try_resolve(value, diagnostics) {
        Ok(action) => action,
        Err(reason) => {
            diagnostics.push(reason);
            Action::Noop
        }
    }
}

fn try_resolve(value: &Value, diagnostics: &mut Vec<String>) -> Result<Action, String> {
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("action without a string 'type': {}", value))?;
    let kind = parse_code::<ActionKind>(tag).ok_or_else(|| format!("unknown action type '{}'", tag))?;

    let action = match kind {
        ActionKind::Comment => Action::Comment,
        ActionKind::Delay => Action::Delay(field_u64(value, "ms")?),
        ActionKind::Key => {
            let name = field_str(value, "key")?;
            Action::Key(KeyStroke::from_name(name).ok_or_else(|| format!("unknown key '{}'", name))?)
        }
        ActionKind::KeyCombo => {
            let names = value
                .get("keys")
                .and_then(Value::as_array)
                .ok_or_else(|| "key_combo needs a 'keys' list".to_string())?;
            let mut keys = Vec::with_capacity(names.len());
            for name in names {
                // An unknown entry drops only itself from the chord
                match name.as_str().and_then(KeyCode::from_name) {
                    Some(key) => keys.push(key),
                    None => diagnostics.push(format!("unknown key '{}' in key_combo", name)),
                }
            }
            Action::KeyCombo(keys)
        }
        ActionKind::Text => Action::Text(field_str(value, "text")?.to_string()),
        ActionKind::Hold => {
            let name = field_str(value, "key")?;
            Action::Hold(KeyCode::from_name(name).ok_or_else(|| format!("unknown key '{}'", name))?)
        }
        ActionKind::Release => Action::Release,
        ActionKind::Repeat => {
            let count = value
                .get("count")
                .and_then(Value::as_i64)
                .ok_or_else(|| "repeat needs an integer 'count'".to_string())?;
            let nested = value
                .get("actions")
                .and_then(Value::as_array)
                .ok_or_else(|| "repeat needs an 'actions' list".to_string())?;
            Action::Repeat {
                count,
                actions: resolve_actions(nested, diagnostics),
            }
        }
        ActionKind::Media => {
            let name = field_str(value, "code")?;
            Action::Media(parse_code(name).ok_or_else(|| format!("unknown media code '{}'", name))?)
        }
        ActionKind::Telephony => {
            let name = field_str(value, "code")?;
            Action::Telephony(
                parse_code(name).ok_or_else(|| format!("unknown telephony code '{}'", name))?,
            )
        }
        ActionKind::MouseMove => Action::MouseMove {
            dx: clamp_delta(field_i64(value, "dx")?),
            dy: clamp_delta(field_i64(value, "dy")?),
        },
        ActionKind::MouseClick => {
            let name = value.get("button").and_then(Value::as_str).unwrap_or("left");
            Action::MouseClick(
                parse_code(name).ok_or_else(|| format!("unknown mouse button '{}'", name))?,
            )
        }
        ActionKind::Led => {
            let color = value
                .get("color")
                .and_then(rgb_from_json)
                .ok_or_else(|| "led needs 'color': [r, g, b]".to_string())?;
            Action::Led(color)
        }
        ActionKind::LedAnim => {
            let name = field_str(value, "name")?;
            let effect = parse_code(name).ok_or_else(|| format!("unknown led animation '{}'", name))?;
            Action::LedAnim {
                effect,
                color: value.get("color").and_then(rgb_from_json),
            }
        }
        ActionKind::Profile => Action::Profile(field_i64(value, "id")?),
    };

    Ok(action)
}

fn field_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("expected string field '{}' in {}", field, value))
}

fn field_i64(value: &Value, field: &str) -> Result<i64, String> {
    value
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| format!("expected integer field '{}' in {}", field, value))
}

fn field_u64(value: &Value, field: &str) -> Result<u64, String> {
    value
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| format!("expected non-negative integer field '{}' in {}", field, value))
}

fn clamp_delta(delta: i64) -> i8 {
    delta.clamp(-127, 127) as i8
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolve(value: Value) -> (Action, Vec<String>) {
        let mut diagnostics = Vec::new();
        let action = resolve_action(&value, &mut diagnostics);
        (action, diagnostics)
    }

    #[test]
    fn test_resolves_basic_actions() {
        assert_eq!(resolve(json!({"type": "delay", "ms": 50})).0, Action::Delay(50));
        assert_eq!(
            resolve(json!({"type": "key", "key": "ENTER"})).0,
            Action::Key(KeyStroke::Code(KeyCode(0x28)))
        );
        assert_eq!(
            resolve(json!({"type": "key", "key": "a"})).0,
            Action::Key(KeyStroke::Char('a'))
        );
        assert_eq!(
            resolve(json!({"type": "media", "code": "VOLUME_UP"})).0,
            Action::Media(MediaKey::VolumeUp)
        );
        assert_eq!(resolve(json!({"type": "Release"})).0, Action::Release);
        assert_eq!(resolve(json!({"type": "profile", "id": 9})).0, Action::Profile(9));
    }

    #[test]
    fn test_combo_keeps_source_order() {
        let (action, diagnostics) = resolve(json!({
            "type": "key_combo",
            "keys": ["R", "LEFT_CTRL", "NOT_A_KEY", "LEFT_SHIFT"]
        }));
        assert_eq!(
            action,
            Action::KeyCombo(vec![KeyCode(0x15), KeyCode::LEFT_CTRL, KeyCode::LEFT_SHIFT])
        );
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_unknown_and_malformed_degrade_to_noop() {
        let (action, diagnostics) = resolve(json!({"type": "teleport"}));
        assert_eq!(action, Action::Noop);
        assert!(diagnostics[0].contains("teleport"));

        assert_eq!(resolve(json!({"type": "delay", "ms": "soon"})).0, Action::Noop);
        assert_eq!(resolve(json!({"type": "key", "key": "WARP"})).0, Action::Noop);
        assert_eq!(resolve(json!({"type": "led", "color": [1, 2]})).0, Action::Noop);
        assert_eq!(resolve(json!({"ms": 5})).0, Action::Noop);
        assert_eq!(resolve(json!("delay")).0, Action::Noop);
    }

    #[test]
    fn test_nested_repeat_resolves_children() {
        let (action, diagnostics) = resolve(json!({
            "type": "repeat",
            "count": 3,
            "actions": [
                {"type": "text", "text": "hi"},
                {"type": "bogus"}
            ]
        }));
        match action {
            Action::Repeat { count, actions } => {
                assert_eq!(count, 3);
                assert_eq!(&*actions, &[Action::Text("hi".to_string()), Action::Noop]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_mouse_move_clamps_to_report_range() {
        assert_eq!(
            resolve(json!({"type": "mouse_move", "dx": 500, "dy": -500})).0,
            Action::MouseMove { dx: 127, dy: -127 }
        );
    }

    #[test]
    fn test_led_anim_optional_color() {
        assert_eq!(
            resolve(json!({"type": "led_anim", "name": "flash"})).0,
            Action::LedAnim {
                effect: LedEffect::Flash,
                color: None
            }
        );
        assert_eq!(
            resolve(json!({"type": "led_anim", "name": "breathe", "color": [0, 0, 255]})).0,
            Action::LedAnim {
                effect: LedEffect::Breathe,
                color: Some(Rgb::new(0, 0, 255))
            }
        );
        assert_eq!(resolve(json!({"type": "led_anim", "name": "sparkle"})).0, Action::Noop);
    }
}

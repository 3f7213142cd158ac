//! Profiles: the per-slot key bindings, idle animation and pacing
//!
//! A profile lives on flash as one JSON document (`/profile{id}.json`). The
//! document is resolved into a [`Profile`] once, at load time.

pub mod store;

pub use store::ProfileStore;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::{resolve_actions, Action};
use crate::led::{rgb_from_json, IdleAnimation, LedAnimator, Rgb};

/// A document field that still deserializes when it has the wrong JSON type.
/// The mistyped value is kept so resolution can report it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Lenient<T> {
    Valid(T),
    Mistyped(Value),
}

impl<T> Lenient<T> {
    fn resolve(field: Option<Self>, name: &str, diagnostics: &mut Vec<String>) -> Option<T> {
        match field? {
            Lenient::Valid(value) => Some(value),
            Lenient::Mistyped(value) => {
                diagnostics.push(format!("{} has the wrong type ({}), ignored", name, value));
                None
            }
        }
    }
}

/// Profile document as stored on flash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<Lenient<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_animation: Option<Lenient<String>>,
    /// Falls back to the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_delay: Option<Lenient<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Lenient<Vec<Lenient<KeyDocument>>>>,
}

/// One `keys` entry of a profile document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Lenient<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_color: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Lenient<Vec<Value>>>,
}

impl ProfileDocument {
    /// Minimal document written when a slot has never been stored
    pub fn default_for(id: u8, default_delay_ms: u64) -> Self {
        Self {
            profile_name: Some(Lenient::Valid(format!("Profile {}", id))),
            idle_animation: Some(Lenient::Valid(IdleAnimation::None.to_string())),
            default_delay: Some(Lenient::Valid(default_delay_ms)),
            keys: Some(Lenient::Valid(Vec::new())),
        }
    }
}

/// Actions and idle color bound to one key
#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub key: u8,
    pub led_color: Option<Rgb>,
    pub actions: Arc<[Action]>,
}

/// A resolved, ready-to-run profile
#[derive(Debug, Clone)]
pub struct Profile {
    pub id: u8,
    pub name: String,
    pub idle: IdleAnimation,
    pub default_delay_ms: u64,
    pub bindings: Vec<KeyBinding>,
    /// Everything that was skipped or degraded while resolving
    pub diagnostics: Vec<String>,
}

impl Profile {
    /// Resolve a document for slot `id`. Never fails; problems land in `diagnostics`.
    pub fn from_document(
        id: u8,
        doc: ProfileDocument,
        num_keys: u8,
        default_delay_ms: u64,
    ) -> Self {
        let mut diagnostics = Vec::new();

        let name = Lenient::resolve(doc.profile_name, "profile_name", &mut diagnostics)
            .unwrap_or_else(|| format!("Profile {}", id));
        let idle_name =
            Lenient::resolve(doc.idle_animation, "idle_animation", &mut diagnostics)
                .unwrap_or_default();
        let idle = if idle_name.trim().is_empty() {
            IdleAnimation::None
        } else {
            idle_name.trim().parse().unwrap_or_else(|_| {
                diagnostics.push(format!("unknown idle_animation '{}', using none", idle_name));
                IdleAnimation::None
            })
        };
        let default_delay_ms =
            Lenient::resolve(doc.default_delay, "default_delay", &mut diagnostics)
                .unwrap_or(default_delay_ms);
        let entries = Lenient::resolve(doc.keys, "keys", &mut diagnostics).unwrap_or_default();

        let mut bindings: Vec<KeyBinding> = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let what = format!("keys[{}]", index);
            let Some(entry) = Lenient::resolve(Some(entry), &what, &mut diagnostics) else {
                continue;
            };
            let Some(raw_id) = Lenient::resolve(entry.id, &format!("{}.id", what), &mut diagnostics)
            else {
                diagnostics.push(format!("{} has no usable id, skipped", what));
                continue;
            };
            if raw_id < 1 || raw_id > num_keys as i64 {
                diagnostics.push(format!("key id {} out of range 1..={}", raw_id, num_keys));
                continue;
            }
            let key = raw_id as u8;
            if bindings.iter().any(|b| b.key == key) {
                diagnostics.push(format!("duplicate binding for key {}, keeping the first", key));
                continue;
            }

            let led_color = match &entry.led_color {
                Some(value) => {
                    let color = rgb_from_json(value);
                    if color.is_none() {
                        diagnostics.push(format!("key {}: bad led_color {}", key, value));
                    }
                    color
                }
                None => None,
            };

            let raw_actions = Lenient::resolve(
                entry.actions,
                &format!("key {}: actions", key),
                &mut diagnostics,
            )
            .unwrap_or_default();
            let mut action_diagnostics = Vec::new();
            let actions = resolve_actions(&raw_actions, &mut action_diagnostics);
            diagnostics.extend(
                action_diagnostics
                    .into_iter()
                    .map(|d| format!("key {}: {}", key, d)),
            );

            bindings.push(KeyBinding {
                key,
                led_color,
                actions,
            });
        }

        Self {
            id,
            name,
            idle,
            default_delay_ms,
            bindings,
            diagnostics,
        }
    }

    pub fn binding(&self, key: u8) -> Option<&KeyBinding> {
        self.bindings.iter().find(|b| b.key == key)
    }

    /// Push this profile's idle mode and key colors onto the animator
    pub fn apply_leds(&self, animator: &mut LedAnimator) {
        animator.set_mode(self.idle);
        animator.set_key_colors(
            self.bindings
                .iter()
                .filter_map(|b| b.led_color.map(|c| (b.key, c))),
        );
    }
}

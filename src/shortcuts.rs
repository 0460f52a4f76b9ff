//! Global keyboard shortcuts
//!
//! Accelerators come from the config as strings like `"Ctrl+Meta+I"`. They
//! are resolved to keycodes through the server's keyboard mapping and
//! grabbed on the root window.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, GrabMode, ModMask};
use x11rb::rust_connection::RustConnection;

/// Shortcut action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShortcutAction {
    InvertScreen,
    InvertWindow,
    InvertScreenPlusHue,
    InvertWindowPlusHue,
    ZoomIn,
    ZoomOut,
    ZoomReset,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcceleratorError {
    #[error("empty accelerator")]
    Empty,
    #[error("unknown modifier `{0}`")]
    UnknownModifier(String),
    #[error("unknown key `{0}`")]
    UnknownKey(String),
}

/// Modifier mask plus keysym
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Accelerator {
    pub modifiers: u16,
    pub keysym: u32,
}

const SHIFT: u16 = 1 << 0;
const LOCK: u16 = 1 << 1;
const CONTROL: u16 = 1 << 2;
const MOD1: u16 = 1 << 3; // Alt
const MOD2: u16 = 1 << 4; // NumLock
const MOD4: u16 = 1 << 6; // Super/Meta

/// Lock-style modifiers that must not affect matching
const IGNORED_MODIFIERS: [u16; 4] = [0, LOCK, MOD2, LOCK | MOD2];

fn keysym_for(name: &str) -> Option<u32> {
    let keysym = match name.to_ascii_lowercase().as_str() {
        "plus" => 0x2b,
        "minus" => 0x2d,
        "equal" => 0x3d,
        "space" => 0x20,
        "escape" => 0xff1b,
        "home" => 0xff50,
        key if key.len() == 1 => {
            let c = key.chars().next()?;
            if !c.is_ascii_graphic() {
                return None;
            }
            c as u32
        }
        key => {
            let n: u32 = key.strip_prefix('f')?.parse().ok()?;
            if !(1..=12).contains(&n) {
                return None;
            }
            0xffbe + n - 1
        }
    };
    Some(keysym)
}

impl FromStr for Accelerator {
    type Err = AcceleratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<&str> = s.split('+').map(str::trim).collect();
        // "Ctrl++" names the plus key
        if s.ends_with("++") {
            parts.truncate(parts.len().saturating_sub(2));
            parts.push("plus");
        }
        let key = parts.pop().filter(|k| !k.is_empty()).ok_or(AcceleratorError::Empty)?;

        let mut modifiers = 0;
        for part in parts {
            modifiers |= match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => CONTROL,
                "shift" => SHIFT,
                "alt" => MOD1,
                "meta" | "super" | "win" => MOD4,
                _ => return Err(AcceleratorError::UnknownModifier(part.to_string())),
            };
        }
        let keysym = keysym_for(key).ok_or_else(|| AcceleratorError::UnknownKey(key.to_string()))?;
        Ok(Self { modifiers, keysym })
    }
}

/// Keysym -> keycode lookup built from `GetKeyboardMapping`
#[derive(Debug, Default)]
pub struct KeyboardMapping {
    min_keycode: u8,
    keysyms_per_keycode: usize,
    keysyms: Vec<u32>,
}

impl KeyboardMapping {
    pub fn query(conn: &RustConnection) -> Result<Self> {
        let setup = conn.setup();
        let (min, max) = (setup.min_keycode, setup.max_keycode);
        let reply = conn
            .get_keyboard_mapping(min, max - min + 1)?
            .reply()
            .context("Failed to get keyboard mapping")?;
        Ok(Self {
            min_keycode: min,
            keysyms_per_keycode: reply.keysyms_per_keycode as usize,
            keysyms: reply.keysyms,
        })
    }

    pub fn keycode(&self, keysym: u32) -> Option<u8> {
        if self.keysyms_per_keycode == 0 {
            return None;
        }
        self.keysyms
            .chunks(self.keysyms_per_keycode)
            .position(|syms| syms.contains(&keysym))
            .map(|index| self.min_keycode + index as u8)
    }
}

/// Grabbed shortcuts
#[derive(Debug, Default)]
pub struct ShortcutMap {
    bindings: HashMap<(u16, u8), ShortcutAction>,
}

impl ShortcutMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, modifiers: u16, keycode: u8, action: ShortcutAction) {
        self.bindings.insert((modifiers, keycode), action);
    }

    /// Resolve and grab every binding; bad entries are logged and skipped
    pub fn grab(
        conn: &RustConnection,
        root: u32,
        mapping: &KeyboardMapping,
        bindings: &[(String, ShortcutAction)],
    ) -> Result<Self> {
        let mut map = Self::new();
        for (binding, action) in bindings {
            let accel = match binding.parse::<Accelerator>() {
                Ok(accel) => accel,
                Err(e) => {
                    warn!("Ignoring shortcut {:?} for {:?}: {}", binding, action, e);
                    continue;
                }
            };
            let Some(keycode) = mapping.keycode(accel.keysym) else {
                warn!("No keycode for shortcut {:?}", binding);
                continue;
            };
            for extra in IGNORED_MODIFIERS {
                conn.grab_key(
                    true,
                    root,
                    ModMask::from(accel.modifiers | extra),
                    keycode,
                    GrabMode::ASYNC,
                    GrabMode::ASYNC,
                )?;
            }
            debug!("Grabbed {} (keycode {}) for {:?}", binding, keycode, action);
            map.insert(accel.modifiers, keycode, *action);
        }
        Ok(map)
    }

    pub fn lookup(&self, state: u16, keycode: u8) -> Option<ShortcutAction> {
        let modifiers = state & (SHIFT | CONTROL | MOD1 | MOD4);
        self.bindings.get(&(modifiers, keycode)).copied()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

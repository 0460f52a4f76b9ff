//! Configuration for the XRender compositor
//!
//! Loads configuration from TOML file at `~/.config/area/xrender.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::scene::SceneOptions;
use crate::scene::backend::Color;
use crate::shortcuts::ShortcutAction;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub compositor: CompositorConfig,
    pub transparency: TransparencyConfig,
    pub invert: InvertConfig,
    pub zoom: ZoomConfig,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;

        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("area");

        Ok(config_dir.join("xrender.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string)
            .context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }

    pub fn scene_options(&self) -> SceneOptions {
        SceneOptions {
            background: Color::from_rgb(self.compositor.background),
            full_repaint: self.compositor.full_repaint,
            translucency: self.transparency.enabled,
        }
    }

    /// Accelerator strings paired with what they trigger
    pub fn shortcut_bindings(&self) -> Vec<(String, ShortcutAction)> {
        let mut bindings = Vec::new();
        if self.invert.enabled {
            bindings.push((self.invert.screen.clone(), ShortcutAction::InvertScreen));
            bindings.push((self.invert.window.clone(), ShortcutAction::InvertWindow));
            bindings.push((self.invert.screen_plus_hue.clone(), ShortcutAction::InvertScreenPlusHue));
            bindings.push((self.invert.window_plus_hue.clone(), ShortcutAction::InvertWindowPlusHue));
        }
        bindings.push((self.zoom.zoom_in.clone(), ShortcutAction::ZoomIn));
        bindings.push((self.zoom.zoom_out.clone(), ShortcutAction::ZoomOut));
        bindings.push((self.zoom.reset.clone(), ShortcutAction::ZoomReset));
        bindings
    }
}

/// Compositor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Background color (hex: 0xRRGGBB)
    pub background: u32,
    /// Repaint the whole screen every frame instead of only damaged areas
    pub full_repaint: bool,
    /// Minimum time between frames in milliseconds
    pub frame_interval_ms: u64,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            background: 0x2e3440, // Nord Polar Night
            full_repaint: false,
            frame_interval_ms: 16,
        }
    }
}

/// Transparency configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransparencyConfig {
    /// Honor window opacity; when off every window is painted opaque
    pub enabled: bool,
    /// Opacity for windows without _NET_WM_WINDOW_OPACITY (0.0-1.0)
    pub default_opacity: f32,
}

impl Default for TransparencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_opacity: 1.0,
        }
    }
}

/// Color inversion shortcuts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvertConfig {
    pub enabled: bool,
    pub screen: String,
    pub window: String,
    pub screen_plus_hue: String,
    pub window_plus_hue: String,
}

impl Default for InvertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            screen: "Ctrl+Meta+I".to_string(),
            window: "Ctrl+Meta+U".to_string(),
            screen_plus_hue: "Ctrl+Meta+H".to_string(),
            window_plus_hue: "Ctrl+Meta+G".to_string(),
        }
    }
}

/// Screen zoom shortcuts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    pub zoom_in: String,
    pub zoom_out: String,
    pub reset: String,
    /// Factor applied per zoom step
    pub step: f32,
    pub max: f32,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            zoom_in: "Meta+Equal".to_string(),
            zoom_out: "Meta+Minus".to_string(),
            reset: "Meta+0".to_string(),
            step: 1.25,
            max: 8.0,
        }
    }
}

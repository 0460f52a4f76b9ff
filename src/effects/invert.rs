//! Color inversion effect
//!
//! Inverts the whole screen or individual windows, optionally keeping the
//! original hue. A window's own mode combines with the screen mode: the
//! same inversion applied twice cancels out.

use std::any::Any;
use std::collections::HashMap;

use tracing::{debug, info};

use super::{Effect, Feature, Repaint, ShaderKind};
use crate::scene::backend::RenderBackend;
use crate::scene::{PaintMask, WindowPaintData};
use crate::shared::WindowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InversionMode {
    #[default]
    None,
    Inverted,
    InvertedPlusHue,
}

impl InversionMode {
    pub fn shader(self) -> Option<ShaderKind> {
        match self {
            InversionMode::None => None,
            InversionMode::Inverted => Some(ShaderKind::Invert),
            InversionMode::InvertedPlusHue => Some(ShaderKind::InvertPlusHue),
        }
    }
}

#[derive(Debug)]
pub struct InvertEffect {
    valid: bool,
    screen: InversionMode,
    windows: HashMap<WindowId, InversionMode>,
}

impl InvertEffect {
    pub fn new(valid: bool) -> Self {
        Self {
            valid,
            screen: InversionMode::None,
            windows: HashMap::new(),
        }
    }

    /// Valid only when the backend can apply both color transforms
    pub fn for_backend<B: RenderBackend>(backend: &B) -> Self {
        let valid = Self::supported(backend);
        if !valid {
            info!("Invert effect unavailable: backend lacks color transforms");
        }
        Self::new(valid)
    }

    pub fn supported<B: RenderBackend>(backend: &B) -> bool {
        backend.supports_shader(ShaderKind::Invert) && backend.supports_shader(ShaderKind::InvertPlusHue)
    }

    pub fn screen_mode(&self) -> InversionMode {
        self.screen
    }

    pub fn window_mode(&self, window: WindowId) -> InversionMode {
        self.windows.get(&window).copied().unwrap_or_default()
    }

    pub fn toggle_screen_inversion(&mut self) -> Repaint {
        self.toggle_screen(InversionMode::Inverted)
    }

    pub fn toggle_screen_inversion_plus_hue(&mut self) -> Repaint {
        self.toggle_screen(InversionMode::InvertedPlusHue)
    }

    pub fn toggle_window_inversion(&mut self, active: Option<WindowId>) -> Repaint {
        self.toggle_window(active, InversionMode::Inverted)
    }

    pub fn toggle_window_inversion_plus_hue(&mut self, active: Option<WindowId>) -> Repaint {
        self.toggle_window(active, InversionMode::InvertedPlusHue)
    }

    fn toggle_screen(&mut self, mode: InversionMode) -> Repaint {
        self.screen = if self.screen == mode { InversionMode::None } else { mode };
        debug!("Screen inversion: {:?}", self.screen);
        Repaint::Full
    }

    fn toggle_window(&mut self, active: Option<WindowId>, mode: InversionMode) -> Repaint {
        let Some(window) = active else {
            return Repaint::None;
        };
        if self.window_mode(window) == mode {
            self.windows.remove(&window);
        } else {
            self.windows.insert(window, mode);
        }
        debug!("Window {} inversion: {:?}", window, self.window_mode(window));
        Repaint::Window(window)
    }

    /// Color transform for `window`, if any
    pub fn shader_for(&self, window: WindowId) -> Option<ShaderKind> {
        if !self.valid {
            return None;
        }
        let own = self.window_mode(window);
        if own == self.screen {
            return None;
        }
        if own != InversionMode::None {
            own.shader()
        } else {
            self.screen.shader()
        }
    }
}

impl Effect for InvertEffect {
    fn name(&self) -> &'static str {
        "invert"
    }

    fn is_active(&self) -> bool {
        self.valid && (self.screen != InversionMode::None || !self.windows.is_empty())
    }

    fn provides(&self, feature: Feature) -> bool {
        feature == Feature::ScreenInversion
    }

    fn chain_position(&self) -> i32 {
        99
    }

    fn draw_window(&mut self, window: WindowId, _mask: PaintMask, data: &mut WindowPaintData) {
        if let Some(shader) = self.shader_for(window) {
            data.shader = Some(shader);
        }
    }

    fn window_closed(&mut self, window: WindowId) {
        self.windows.remove(&window);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

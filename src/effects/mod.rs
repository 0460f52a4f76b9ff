//! Effect chain
//!
//! Effects sit between the scene and the backend: before a window is
//! composited, every active effect gets to adjust its `WindowPaintData`
//! (for example to request a color transform). Effects never own or mutate
//! the scene's per-window cache entries.

pub mod invert;

use std::any::Any;

use crate::scene::{PaintMask, WindowPaintData};
use crate::shared::WindowId;

/// Color transform an effect can ask the backend to apply while compositing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Invert,
    /// Inverted luminance, original hue
    InvertPlusHue,
}

/// Capabilities other components may query for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    ScreenInversion,
}

/// What needs repainting after an effect changed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repaint {
    None,
    Full,
    Window(WindowId),
}

pub trait Effect: Any {
    fn name(&self) -> &'static str;

    fn is_active(&self) -> bool;

    fn provides(&self, _feature: Feature) -> bool {
        false
    }

    /// Lower runs first
    fn chain_position(&self) -> i32 {
        50
    }

    fn draw_window(&mut self, _window: WindowId, _mask: PaintMask, _data: &mut WindowPaintData) {}

    fn window_closed(&mut self, _window: WindowId) {}

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Default)]
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, effect: Box<dyn Effect>) {
        tracing::info!("Loaded effect {} at position {}", effect.name(), effect.chain_position());
        self.effects.push(effect);
        self.effects.sort_by_key(|e| e.chain_position());
    }

    pub fn is_active(&self) -> bool {
        self.effects.iter().any(|e| e.is_active())
    }

    pub fn provides(&self, feature: Feature) -> bool {
        self.effects.iter().any(|e| e.provides(feature))
    }

    pub fn draw_window(&mut self, window: WindowId, mask: PaintMask, data: &mut WindowPaintData) {
        for effect in self.effects.iter_mut().filter(|e| e.is_active()) {
            effect.draw_window(window, mask, data);
        }
    }

    pub fn window_closed(&mut self, window: WindowId) {
        for effect in &mut self.effects {
            effect.window_closed(window);
        }
    }

    pub fn get_mut<T: Effect>(&mut self) -> Option<&mut T> {
        self.effects
            .iter_mut()
            .find_map(|e| e.as_any_mut().downcast_mut::<T>())
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

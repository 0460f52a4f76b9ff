//! Window identity -> cached render state
//!
//! The table is only mutated by lifecycle notifications and by paint passes
//! looking entries up. It holds exactly one entry per window that has been
//! added and not yet deleted.

use std::collections::HashMap;

use tracing::{debug, trace};

use super::backend::RenderBackend;
use super::window::WindowRenderState;
use crate::shared::WindowId;

#[derive(Debug, Default)]
pub struct SceneWindowTable {
    entries: HashMap<WindowId, WindowRenderState>,
}

impl SceneWindowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an empty entry. Duplicate notifications leave the existing
    /// entry untouched.
    pub fn on_window_added(&mut self, id: WindowId) {
        if self.entries.contains_key(&id) {
            debug!("Window {} added twice, keeping existing render state", id);
            return;
        }
        self.entries.insert(id, WindowRenderState::new());
        trace!("Render state created for window {}", id);
    }

    /// Size or shape changed: picture and mask are both stale
    pub fn on_geometry_or_shape_changed<B: RenderBackend>(&mut self, backend: &mut B, id: WindowId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.discard_resource(backend);
            entry.discard_alpha(backend);
            trace!("Discarded picture and mask of window {}", id);
        }
    }

    /// Nothing to do: `alpha_mask` notices the new opacity at paint time and
    /// rebuilds only the mask.
    pub fn on_opacity_changed(&mut self, id: WindowId) {
        trace!("Opacity of window {} changed", id);
    }

    /// The entry stays paintable until the window is deleted
    pub fn on_window_closed(&mut self, id: WindowId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.set_closing(true);
            debug!("Window {} closing", id);
        }
    }

    pub fn on_window_deleted<B: RenderBackend>(&mut self, backend: &mut B, id: WindowId) {
        if let Some(mut entry) = self.entries.remove(&id) {
            entry.release(backend);
            debug!("Render state of window {} released", id);
        }
    }

    /// The entry for `id`, created if a paint raced ahead of `WindowAdded`
    pub fn entry_for(&mut self, id: WindowId) -> &mut WindowRenderState {
        self.entries.entry(id).or_insert_with(|| {
            trace!("Render state created lazily for window {}", id);
            WindowRenderState::new()
        })
    }

    pub fn get(&self, id: WindowId) -> Option<&WindowRenderState> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = WindowId> + '_ {
        self.entries.keys().copied()
    }

    /// Release everything (scene teardown)
    pub fn clear<B: RenderBackend>(&mut self, backend: &mut B) {
        for (_, mut entry) in self.entries.drain() {
            entry.release(backend);
        }
    }
}

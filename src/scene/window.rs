//! Per-window cached render state
//!
//! A `WindowRenderState` owns the server resources derived from one window:
//! its picture, a translucency mask and the clip shape under the current
//! screen transform. Pictures and masks are created lazily on first use and
//! thrown away by the table's notification handlers when they go stale.

use tracing::trace;

use super::backend::{CompositeOp, CompositeRequest, RenderBackend, ResourceHandle};
use super::error::{ResourceCreationError, SceneError};
use super::{PaintMask, WindowPaintData};
use crate::shared::{Region, WindowSnapshot};

/// A mask plus the opacity it encodes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaMaskCache {
    pub mask: ResourceHandle,
    pub opacity: f32,
}

#[derive(Debug, Default)]
pub struct WindowRenderState {
    picture: Option<ResourceHandle>,
    alpha: Option<AlphaMaskCache>,
    transformed_shape: Region,
    closing: bool,
}

impl WindowRenderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The window's picture, created from its current storage if absent
    pub fn resource<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        window: &WindowSnapshot,
    ) -> Result<ResourceHandle, ResourceCreationError> {
        if let Some(picture) = self.picture {
            return Ok(picture);
        }
        let picture = backend.create_resource(window.storage, window.format)?;
        trace!("Created picture {:?} for window {}", picture, window.identity());
        self.picture = Some(picture);
        Ok(picture)
    }

    /// Release the picture. Safe to call when there is none.
    pub fn discard_resource<B: RenderBackend>(&mut self, backend: &mut B) {
        if let Some(picture) = self.picture.take() {
            backend.release_resource(picture);
        }
    }

    /// A mask encoding `opacity`, rebuilt when the cached one encodes
    /// something else
    pub fn alpha_mask<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        window: &WindowSnapshot,
        opacity: f32,
    ) -> Result<ResourceHandle, ResourceCreationError> {
        if let Some(cached) = self.alpha {
            if cached.opacity == opacity {
                return Ok(cached.mask);
            }
        }
        self.discard_alpha(backend);
        let mask = backend.create_mask(window.geometry.width, window.geometry.height, opacity)?;
        trace!("Built alpha mask {:?} ({:.3}) for window {}", mask, opacity, window.identity());
        self.alpha = Some(AlphaMaskCache { mask, opacity });
        Ok(mask)
    }

    pub fn discard_alpha<B: RenderBackend>(&mut self, backend: &mut B) {
        if let Some(cached) = self.alpha.take() {
            backend.release_resource(cached.mask);
        }
    }

    pub fn transformed_shape(&self) -> &Region {
        &self.transformed_shape
    }

    pub fn set_transformed_shape(&mut self, shape: Region) {
        self.transformed_shape = shape;
    }

    pub fn has_resource(&self) -> bool {
        self.picture.is_some()
    }

    pub fn cached_alpha(&self) -> Option<AlphaMaskCache> {
        self.alpha
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub(crate) fn set_closing(&mut self, closing: bool) {
        self.closing = closing;
    }

    /// Drop every owned resource
    pub fn release<B: RenderBackend>(&mut self, backend: &mut B) {
        self.discard_resource(backend);
        self.discard_alpha(backend);
        self.transformed_shape = Region::new();
    }

    /// Composite the window into `target`, restricted to `region`
    ///
    /// Fails with `ResourceCreation` when the picture or mask can't be made;
    /// the caller skips the window and the entry stays unresourced.
    pub fn perform_paint<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        window: &WindowSnapshot,
        target: ResourceHandle,
        mask: PaintMask,
        region: &Region,
        data: &WindowPaintData,
    ) -> Result<(), SceneError> {
        let transformed = mask.intersects(PaintMask::WINDOW_TRANSFORMED | PaintMask::SCREEN_TRANSFORMED);
        let clip = if transformed {
            region.intersect(&self.transformed_shape)
        } else {
            region.intersect_rect(&window.geometry)
        };
        if clip.is_empty() {
            return Ok(());
        }

        let source = self.resource(backend, window)?;
        let opacity = data.opacity.clamp(0.0, 1.0);
        let alpha = if opacity < 1.0 {
            Some(self.alpha_mask(backend, window, opacity)?)
        } else {
            None
        };

        let op = if mask.contains(PaintMask::WINDOW_OPAQUE) && alpha.is_none() && !window.format.has_alpha {
            CompositeOp::Src
        } else {
            CompositeOp::Over
        };

        backend.composite(&CompositeRequest {
            op,
            source,
            mask: alpha,
            target,
            geometry: window.geometry,
            scale: data.scale,
            x_translate: data.x_translate,
            y_translate: data.y_translate,
            clip: &clip,
            shader: data.shader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::testing::{FakeBackend, window};
    use crate::shared::Geometry;

    #[test]
    fn test_resource_is_cached() {
        let mut backend = FakeBackend::new();
        let w = window(1, 100, 100);
        let mut state = WindowRenderState::new();

        let first = state.resource(&mut backend, &w).unwrap();
        let second = state.resource(&mut backend, &w).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.created_resources(), 1);
    }

    #[test]
    fn test_discard_resource_is_idempotent() {
        let mut backend = FakeBackend::new();
        let w = window(1, 100, 100);
        let mut state = WindowRenderState::new();

        let first = state.resource(&mut backend, &w).unwrap();
        state.discard_resource(&mut backend);
        assert!(!state.has_resource());
        state.discard_resource(&mut backend);
        assert!(!state.has_resource());
        assert_eq!(backend.released, vec![first]);

        let fresh = state.resource(&mut backend, &w).unwrap();
        assert_ne!(first, fresh);
    }

    #[test]
    fn test_alpha_mask_rebuilt_on_opacity_change() {
        let mut backend = FakeBackend::new();
        let w = window(1, 100, 50);
        let mut state = WindowRenderState::new();

        let a = state.alpha_mask(&mut backend, &w, 0.5).unwrap();
        assert_eq!(state.cached_alpha().map(|c| c.opacity), Some(0.5));
        let same = state.alpha_mask(&mut backend, &w, 0.5).unwrap();
        assert_eq!(a, same);

        let b = state.alpha_mask(&mut backend, &w, 0.75).unwrap();
        assert_ne!(a, b);
        assert_eq!(state.cached_alpha().map(|c| c.opacity), Some(0.75));
        assert_eq!(backend.masks, vec![(100, 50, 0.5), (100, 50, 0.75)]);
        assert_eq!(backend.released, vec![a]);
    }

    #[test]
    fn test_failed_resource_leaves_entry_empty() {
        let mut backend = FakeBackend::new();
        let w = window(7, 10, 10);
        backend.fail_storage(w.storage);
        let mut state = WindowRenderState::new();

        assert!(state.resource(&mut backend, &w).is_err());
        assert!(!state.has_resource());

        backend.clear_failures();
        assert!(state.resource(&mut backend, &w).is_ok());
    }

    #[test]
    fn test_perform_paint_uses_mask_for_translucency() {
        let mut backend = FakeBackend::new();
        let mut w = window(1, 100, 100);
        w.opacity = 0.5;
        let mut state = WindowRenderState::new();
        let region = Region::from_rect(Geometry::new(0, 0, 1000, 1000));
        let data = WindowPaintData::from_window(&w);

        state
            .perform_paint(&mut backend, &w, ResourceHandle(999), PaintMask::WINDOW_TRANSLUCENT, &region, &data)
            .unwrap();

        let composite = &backend.composites[0];
        assert_eq!(composite.op, CompositeOp::Over);
        assert!(composite.mask.is_some());
        assert_eq!(composite.clip.area(), 100 * 100);
    }

    #[test]
    fn test_perform_paint_transformed_uses_shape() {
        let mut backend = FakeBackend::new();
        let w = window(1, 100, 100);
        let mut state = WindowRenderState::new();
        state.set_transformed_shape(Region::from_rect(Geometry::new(0, 0, 10, 10)));
        let region = Region::from_rect(Geometry::new(0, 0, 1000, 1000));
        let data = WindowPaintData::from_window(&w);

        state
            .perform_paint(
                &mut backend,
                &w,
                ResourceHandle(999),
                PaintMask::WINDOW_OPAQUE | PaintMask::SCREEN_TRANSFORMED,
                &region,
                &data,
            )
            .unwrap();

        assert_eq!(backend.composites[0].op, CompositeOp::Src);
        assert_eq!(backend.composites[0].clip.area(), 100);
    }
}

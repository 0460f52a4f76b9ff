//! XRender-style compositing scene
//!
//! The scene owns the per-window render cache, the back buffer and the
//! front picture. Each frame it composites the given windows into the back
//! buffer and presents the touched area in one step, so a half-painted
//! frame is never visible.

pub mod backend;
pub mod error;
pub mod table;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

use bitflags::bitflags;
use tracing::{debug, info, trace, warn};

use crate::effects::{EffectChain, ShaderKind};
use crate::events::SceneEvent;
use crate::shared::{Geometry, Region, WindowId, WindowSnapshot};
use backend::{Color, RenderBackend, ResourceHandle};
use error::SceneError;
use table::SceneWindowTable;

bitflags! {
    /// How a screen or window is being painted
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PaintMask: u32 {
        const WINDOW_OPAQUE = 1 << 0;
        const WINDOW_TRANSLUCENT = 1 << 1;
        const WINDOW_TRANSFORMED = 1 << 2;
        /// Only the damaged region is repainted
        const SCREEN_REGION = 1 << 3;
        const SCREEN_TRANSFORMED = 1 << 4;
        const SCREEN_BACKGROUND_FIRST = 1 << 5;
    }
}

/// Screen-wide transform (zoom and pan)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPaintData {
    pub scale: f32,
    pub x_translate: i32,
    pub y_translate: i32,
}

impl Default for ScreenPaintData {
    fn default() -> Self {
        Self {
            scale: 1.0,
            x_translate: 0,
            y_translate: 0,
        }
    }
}

impl ScreenPaintData {
    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.x_translate == 0 && self.y_translate == 0
    }

    /// Zoom by `scale` keeping the screen point (`x`, `y`) fixed
    pub fn zoom_at(scale: f32, x: i32, y: i32) -> Self {
        Self {
            scale,
            x_translate: (x as f32 * (1.0 - scale)).round() as i32,
            y_translate: (y as f32 * (1.0 - scale)).round() as i32,
        }
    }

    pub fn transform_region(&self, region: &Region) -> Region {
        region.scaled(self.scale).translated(self.x_translate, self.y_translate)
    }
}

/// Per-window paint parameters, adjustable by effects
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPaintData {
    pub opacity: f32,
    pub scale: f32,
    pub x_translate: i32,
    pub y_translate: i32,
    pub shader: Option<ShaderKind>,
}

impl WindowPaintData {
    pub fn from_window(window: &WindowSnapshot) -> Self {
        Self {
            opacity: window.opacity(),
            scale: 1.0,
            x_translate: 0,
            y_translate: 0,
            shader: None,
        }
    }

    /// Compose the screen transform on top of the window's own
    pub fn apply_screen(&mut self, screen: &ScreenPaintData) {
        self.x_translate = (self.x_translate as f32 * screen.scale).round() as i32 + screen.x_translate;
        self.y_translate = (self.y_translate as f32 * screen.scale).round() as i32 + screen.y_translate;
        self.scale *= screen.scale;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneOptions {
    pub background: Color,
    /// Repaint the whole screen every frame
    pub full_repaint: bool,
    /// When false every window is painted fully opaque
    pub translucency: bool,
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self {
            background: Color::from_rgb(0x2e3440),
            full_repaint: false,
            translucency: true,
        }
    }
}

/// Outcome of one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaintStats {
    pub painted: usize,
    /// Windows left out because their picture or mask couldn't be created
    pub skipped: usize,
    pub presented: bool,
}

pub struct Scene<B: RenderBackend> {
    backend: B,
    windows: SceneWindowTable,
    effects: EffectChain,
    front: ResourceHandle,
    buffer: Option<ResourceHandle>,
    screen: Geometry,
    screen_paint: ScreenPaintData,
    options: SceneOptions,
}

impl<B: RenderBackend> Scene<B> {
    pub fn new(mut backend: B, width: u32, height: u32, options: SceneOptions) -> Result<Self, SceneError> {
        let front = backend.create_front()?;
        info!("XRender scene initialized ({}x{})", width, height);
        Ok(Self {
            backend,
            windows: SceneWindowTable::new(),
            effects: EffectChain::new(),
            front,
            buffer: None,
            screen: Geometry::new(0, 0, width, height),
            screen_paint: ScreenPaintData::default(),
            options,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn window_table(&self) -> &SceneWindowTable {
        &self.windows
    }

    pub fn effects(&self) -> &EffectChain {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectChain {
        &mut self.effects
    }

    pub fn screen(&self) -> Geometry {
        self.screen
    }

    pub fn screen_paint(&self) -> ScreenPaintData {
        self.screen_paint
    }

    pub fn set_screen_transform(&mut self, data: ScreenPaintData) {
        debug!("Screen transform set to {:?}", data);
        self.screen_paint = data;
    }

    pub fn set_options(&mut self, options: SceneOptions) {
        self.options = options;
    }

    pub fn buffer_picture(&self) -> Option<ResourceHandle> {
        self.buffer
    }

    /// Screen size changed: the back buffer is recreated on the next paint
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.screen.width == width && self.screen.height == height {
            return;
        }
        info!("Screen resized to {}x{}", width, height);
        self.screen = Geometry::new(0, 0, width, height);
        if let Some(buffer) = self.buffer.take() {
            self.backend.release_resource(buffer);
        }
    }

    pub fn window_added(&mut self, id: WindowId) {
        self.windows.on_window_added(id);
    }

    pub fn window_geometry_shape_changed(&mut self, id: WindowId) {
        self.windows.on_geometry_or_shape_changed(&mut self.backend, id);
    }

    pub fn window_opacity_changed(&mut self, id: WindowId) {
        self.windows.on_opacity_changed(id);
    }

    pub fn window_closed(&mut self, id: WindowId) {
        self.windows.on_window_closed(id);
        self.effects.window_closed(id);
    }

    pub fn window_deleted(&mut self, id: WindowId) {
        self.windows.on_window_deleted(&mut self.backend, id);
    }

    pub fn handle_event(&mut self, event: &SceneEvent) {
        match *event {
            SceneEvent::WindowAdded(id) => self.window_added(id),
            SceneEvent::GeometryOrShapeChanged(id) => self.window_geometry_shape_changed(id),
            SceneEvent::OpacityChanged(id) => self.window_opacity_changed(id),
            SceneEvent::WindowClosed(id) => self.window_closed(id),
            SceneEvent::WindowDeleted(id) => self.window_deleted(id),
        }
    }

    /// Paint one frame. `windows` is in stacking order, bottom first.
    pub fn paint(&mut self, damage: &Region, windows: &[WindowSnapshot]) -> Result<PaintStats, SceneError> {
        let full = Region::from_rect(self.screen);
        let transformed = !self.screen_paint.is_identity();
        let generic = self.options.full_repaint || self.effects.is_active();
        let damage = if generic || transformed {
            full.clone()
        } else {
            damage.intersect_rect(&self.screen)
        };
        if damage.is_empty() {
            return Ok(PaintStats::default());
        }

        let mut stats = if transformed {
            self.paint_transformed_screen(PaintMask::SCREEN_TRANSFORMED, windows)?
        } else if generic {
            self.paint_generic_screen(PaintMask::empty(), ScreenPaintData::default(), windows)?
        } else {
            self.paint_simple_screen(PaintMask::SCREEN_REGION, &damage, windows)?
        };

        let buffer = self.ensure_buffer()?;
        self.backend.present(buffer, self.front, &damage)?;
        stats.presented = true;
        trace!("Frame done: {} painted, {} skipped", stats.painted, stats.skipped);
        Ok(stats)
    }

    /// Fill `region` of the back buffer with the background color
    pub fn paint_background(&mut self, region: &Region) -> Result<(), SceneError> {
        if region.is_empty() {
            return Ok(());
        }
        let buffer = self.ensure_buffer()?;
        self.backend.fill(buffer, self.options.background, region)
    }

    /// Repaint only `region`, windows untransformed
    pub fn paint_simple_screen(
        &mut self,
        mask: PaintMask,
        region: &Region,
        windows: &[WindowSnapshot],
    ) -> Result<PaintStats, SceneError> {
        let buffer = self.ensure_buffer()?;
        let mut stats = PaintStats::default();
        let paintable = self.prepare_windows(windows, &mut stats);

        let mut covered = Region::new();
        for w in paintable.iter().filter(|w| self.is_opaque(w)) {
            covered.add_rect(w.geometry);
        }
        self.paint_background(&region.subtract(&covered))?;

        let data = ScreenPaintData::default();
        for w in paintable {
            self.paint_window(buffer, w, mask, region, &data, &mut stats)?;
        }
        Ok(stats)
    }

    /// Repaint the whole screen with `data` applied to every window
    pub fn paint_generic_screen(
        &mut self,
        mask: PaintMask,
        data: ScreenPaintData,
        windows: &[WindowSnapshot],
    ) -> Result<PaintStats, SceneError> {
        let buffer = self.ensure_buffer()?;
        let full = Region::from_rect(self.screen);
        let mut stats = PaintStats::default();
        let paintable = self.prepare_windows(windows, &mut stats);

        self.paint_background(&full)?;
        let mask = mask | PaintMask::SCREEN_BACKGROUND_FIRST;
        for w in paintable {
            self.paint_window(buffer, w, mask, &full, &data, &mut stats)?;
        }
        Ok(stats)
    }

    /// Repaint the whole screen under the current screen transform
    ///
    /// Transformed shapes are recomputed for every window first; the
    /// background only goes where no opaque window will land.
    pub fn paint_transformed_screen(
        &mut self,
        mask: PaintMask,
        windows: &[WindowSnapshot],
    ) -> Result<PaintStats, SceneError> {
        let buffer = self.ensure_buffer()?;
        let full = Region::from_rect(self.screen);
        let data = self.screen_paint;
        let mut stats = PaintStats::default();

        for w in windows {
            let shape = data
                .transform_region(&Region::from_rect(w.geometry))
                .intersect_rect(&self.screen);
            self.windows.entry_for(w.identity()).set_transformed_shape(shape);
        }
        let paintable = self.prepare_windows(windows, &mut stats);

        let mut covered = Region::new();
        for w in paintable.iter().filter(|w| self.is_opaque(w)) {
            if let Some(entry) = self.windows.get(w.identity()) {
                covered = covered.union(entry.transformed_shape());
            }
        }
        self.paint_background(&full.subtract(&covered))?;

        let mask = mask | PaintMask::SCREEN_TRANSFORMED;
        for w in paintable {
            self.paint_window(buffer, w, mask, &full, &data, &mut stats)?;
        }
        Ok(stats)
    }

    /// Make sure every window has a picture; the ones that can't get one are
    /// left out of this frame
    fn prepare_windows<'w>(&mut self, windows: &'w [WindowSnapshot], stats: &mut PaintStats) -> Vec<&'w WindowSnapshot> {
        let mut paintable = Vec::with_capacity(windows.len());
        for w in windows {
            match self.windows.entry_for(w.identity()).resource(&mut self.backend, w) {
                Ok(_) => paintable.push(w),
                Err(e) => {
                    warn!("Skipping window {} this frame: {}", w.identity(), e);
                    stats.skipped += 1;
                }
            }
        }
        paintable
    }

    fn paint_window(
        &mut self,
        buffer: ResourceHandle,
        window: &WindowSnapshot,
        mask: PaintMask,
        region: &Region,
        screen: &ScreenPaintData,
        stats: &mut PaintStats,
    ) -> Result<(), SceneError> {
        let mut data = WindowPaintData::from_window(window);
        if !self.options.translucency {
            data.opacity = 1.0;
        }
        data.apply_screen(screen);

        let mut mask = mask;
        if self.is_opaque(window) {
            mask |= PaintMask::WINDOW_OPAQUE;
        } else {
            mask |= PaintMask::WINDOW_TRANSLUCENT;
        }
        self.effects.draw_window(window.identity(), mask, &mut data);

        let entry = self.windows.entry_for(window.identity());
        match entry.perform_paint(&mut self.backend, window, buffer, mask, region, &data) {
            Ok(()) => {
                stats.painted += 1;
                Ok(())
            }
            Err(SceneError::ResourceCreation(e)) => {
                warn!("Skipping window {} this frame: {}", window.identity(), e);
                stats.skipped += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn is_opaque(&self, window: &WindowSnapshot) -> bool {
        if self.options.translucency {
            window.is_opaque()
        } else {
            !window.format.has_alpha
        }
    }

    fn ensure_buffer(&mut self) -> Result<ResourceHandle, SceneError> {
        if let Some(buffer) = self.buffer {
            return Ok(buffer);
        }
        let buffer = self.backend.create_buffer(self.screen.width, self.screen.height)?;
        debug!("Created back buffer {:?} ({}x{})", buffer, self.screen.width, self.screen.height);
        self.buffer = Some(buffer);
        Ok(buffer)
    }
}

impl<B: RenderBackend> Drop for Scene<B> {
    fn drop(&mut self) {
        self.windows.clear(&mut self.backend);
        if let Some(buffer) = self.buffer.take() {
            self.backend.release_resource(buffer);
        }
        self.backend.release_resource(self.front);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::invert::InvertEffect;
    use crate::scene::testing::{FakeBackend, window};

    fn scene() -> Scene<FakeBackend> {
        Scene::new(FakeBackend::new(), 1000, 800, SceneOptions::default()).unwrap()
    }

    fn everything() -> Region {
        Region::from_rect(Geometry::new(0, 0, 1000, 800))
    }

    #[test]
    fn test_paint_creates_picture_once() {
        let mut scene = scene();
        let a = window(1, 100, 100);
        let b = window(2, 100, 100);
        scene.window_added(a.id);
        scene.window_geometry_shape_changed(a.id);

        scene.paint(&everything(), &[a]).unwrap();
        assert_eq!(scene.backend().created_for(a.storage), 1);
        assert_eq!(scene.backend().created_for(b.storage), 0);

        scene.paint(&everything(), &[a]).unwrap();
        assert_eq!(scene.backend().created_for(a.storage), 1);
    }

    #[test]
    fn test_geometry_change_between_frames_recreates_picture() {
        let mut scene = scene();
        let a = window(1, 100, 100);
        scene.window_added(a.id);
        scene.paint(&everything(), &[a]).unwrap();

        let mut resized = a;
        resized.geometry.width = 200;
        scene.window_geometry_shape_changed(a.id);
        scene.paint(&everything(), &[resized]).unwrap();

        let sources = scene.backend().composited_sources();
        assert_eq!(sources.len(), 2);
        assert_ne!(sources[0], sources[1]);
        assert_eq!(scene.backend().created_for(a.storage), 2);
    }

    #[test]
    fn test_failed_window_does_not_abort_frame() {
        let mut scene = scene();
        let a = window(1, 100, 100);
        let c = window(3, 100, 100);
        scene.backend_mut().fail_storage(a.storage);
        scene.window_added(a.id);
        scene.window_added(c.id);

        let stats = scene.paint(&everything(), &[a, c]).unwrap();
        assert_eq!(stats.painted, 1);
        assert_eq!(stats.skipped, 1);
        assert!(stats.presented);
        assert!(!scene.window_table().get(a.id).unwrap().has_resource());
        assert!(scene.window_table().get(c.id).unwrap().has_resource());

        scene.backend_mut().clear_failures();
        let stats = scene.paint(&everything(), &[a, c]).unwrap();
        assert_eq!(stats.painted, 2);
    }

    #[test]
    fn test_opacity_change_rebuilds_only_mask() {
        let mut scene = scene();
        let mut a = window(1, 100, 100);
        a.opacity = 0.5;
        scene.window_added(a.id);
        scene.paint(&everything(), &[a]).unwrap();

        a.opacity = 0.25;
        scene.window_opacity_changed(a.id);
        scene.paint(&everything(), &[a]).unwrap();

        let backend = scene.backend();
        assert_eq!(backend.created_for(a.storage), 1);
        assert_eq!(backend.masks, vec![(100, 100, 0.5), (100, 100, 0.25)]);
        let cached = scene.window_table().get(a.id).unwrap().cached_alpha().unwrap();
        assert_eq!(cached.opacity, 0.25);
    }

    #[test]
    fn test_closed_window_stays_until_deleted() {
        let mut scene = scene();
        let a = window(1, 100, 100);
        scene.window_added(a.id);
        scene.paint(&everything(), &[a]).unwrap();

        scene.window_closed(a.id);
        assert!(scene.window_table().get(a.id).unwrap().is_closing());
        let stats = scene.paint(&everything(), &[a]).unwrap();
        assert_eq!(stats.painted, 1);

        scene.window_deleted(a.id);
        assert!(!scene.window_table().contains(a.id));

        scene.paint(&everything(), &[a]).unwrap();
        let entry = scene.window_table().get(a.id).unwrap();
        assert!(!entry.is_closing());
        assert_eq!(scene.backend().created_for(a.storage), 2);
    }

    #[test]
    fn test_composites_target_back_buffer_and_present_once() {
        let mut scene = scene();
        let a = window(1, 100, 100);
        scene.window_added(a.id);
        let damage = Region::from_rect(Geometry::new(0, 0, 50, 50));
        scene.paint(&damage, &[a]).unwrap();

        let buffer = scene.buffer_picture().unwrap();
        let backend = scene.backend();
        assert!(backend.composites.iter().all(|c| c.target == buffer));
        assert_eq!(backend.composites[0].clip.area(), 50 * 50);
        assert_eq!(backend.presents.len(), 1);
        assert_eq!(backend.presents[0].0, buffer);
        assert_eq!(backend.presents[0].2.area(), 50 * 50);
        assert_eq!(backend.buffers, vec![(1000, 800)]);
    }

    #[test]
    fn test_background_skips_opaque_windows() {
        let mut scene = scene();
        let a = window(1, 100, 100);
        scene.paint(&everything(), &[a]).unwrap();
        let (_, _, background) = &scene.backend().fills[0];
        assert_eq!(background.area(), 1000 * 800 - 100 * 100);
    }

    #[test]
    fn test_empty_damage_paints_nothing() {
        let mut scene = scene();
        let a = window(1, 100, 100);
        let stats = scene.paint(&Region::new(), &[a]).unwrap();
        assert_eq!(stats, PaintStats::default());
        assert!(scene.backend().presents.is_empty());
        assert!(scene.buffer_picture().is_none());
    }

    #[test]
    fn test_resize_recreates_buffer() {
        let mut scene = scene();
        let a = window(1, 100, 100);
        scene.paint(&everything(), &[a]).unwrap();
        let old = scene.buffer_picture().unwrap();

        scene.resize(1920, 1080);
        assert!(scene.buffer_picture().is_none());
        assert!(scene.backend().released.contains(&old));

        scene.paint(&everything(), &[a]).unwrap();
        assert_eq!(scene.backend().buffers, vec![(1000, 800), (1920, 1080)]);
    }

    #[test]
    fn test_transformed_screen_recomputes_shapes() {
        let mut scene = scene();
        let mut a = window(1, 100, 100);
        a.geometry.x = 100;
        scene.set_screen_transform(ScreenPaintData {
            scale: 2.0,
            x_translate: -100,
            y_translate: 0,
        });

        let stats = scene.paint(&Region::new(), &[a]).unwrap();
        assert_eq!(stats.painted, 1);

        let shape = scene.window_table().get(a.id).unwrap().transformed_shape().clone();
        assert_eq!(shape.rects(), &[Geometry::new(100, 0, 200, 200)]);
        let composite = &scene.backend().composites[0];
        assert_eq!(composite.scale, 2.0);
        assert_eq!(composite.clip, shape);

        a.geometry.x = 0;
        scene.paint(&Region::new(), &[a]).unwrap();
        let shape = scene.window_table().get(a.id).unwrap().transformed_shape().clone();
        assert_eq!(shape.rects(), &[Geometry::new(0, 0, 100, 200)]);
    }

    #[test]
    fn test_effect_overrides_shader_without_touching_cache() {
        let mut scene = Scene::new(
            FakeBackend::with_shaders(&[ShaderKind::Invert, ShaderKind::InvertPlusHue]),
            1000,
            800,
            SceneOptions::default(),
        )
        .unwrap();
        let invert = InvertEffect::for_backend(scene.backend());
        scene.effects_mut().add(Box::new(invert));
        let a = window(1, 100, 100);
        let b = window(2, 100, 100);

        scene
            .effects_mut()
            .get_mut::<InvertEffect>()
            .unwrap()
            .toggle_window_inversion(Some(a.id));
        scene.paint(&everything(), &[a, b]).unwrap();

        let shaders: Vec<_> = scene.backend().composites.iter().map(|c| c.shader).collect();
        assert_eq!(shaders, vec![Some(ShaderKind::Invert), None]);
        assert_eq!(scene.backend().created_resources(), 2);

        scene.window_closed(a.id);
        assert!(!scene.effects().is_active());
    }

    #[test]
    fn test_active_effect_repaints_full_screen() {
        let mut scene = Scene::new(
            FakeBackend::with_shaders(&[ShaderKind::Invert, ShaderKind::InvertPlusHue]),
            1000,
            800,
            SceneOptions::default(),
        )
        .unwrap();
        let invert = InvertEffect::for_backend(scene.backend());
        scene.effects_mut().add(Box::new(invert));
        scene
            .effects_mut()
            .get_mut::<InvertEffect>()
            .unwrap()
            .toggle_screen_inversion();

        let a = window(1, 100, 100);
        let damage = Region::from_rect(Geometry::new(0, 0, 10, 10));
        scene.paint(&damage, &[a]).unwrap();

        let backend = scene.backend();
        assert_eq!(backend.fills[0].2.area(), 1000 * 800);
        assert_eq!(backend.presents[0].2.area(), 1000 * 800);
        assert_eq!(backend.composites[0].shader, Some(ShaderKind::Invert));
    }

    #[test]
    fn test_translucency_disabled_paints_opaque() {
        let options = SceneOptions {
            translucency: false,
            ..SceneOptions::default()
        };
        let mut scene = Scene::new(FakeBackend::new(), 1000, 800, options).unwrap();
        let mut a = window(1, 100, 100);
        a.opacity = 0.3;
        scene.paint(&everything(), &[a]).unwrap();
        assert!(scene.backend().masks.is_empty());
        assert_eq!(scene.backend().composites[0].op, backend::CompositeOp::Src);
    }
}

//! X11 event translation
//!
//! Turns raw x11rb events into the lifecycle notifications the scene
//! consumes, keeping the `WindowRegistry` of window snapshots current and
//! collecting the screen damage each event implies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace, warn};
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    AtomEnum, ConnectionExt as _, MapState, Property, Visualid, WindowClass,
};
use x11rb::rust_connection::RustConnection;

use crate::shared::{
    Geometry, GeometryUpdate, PixelFormat, PixelStorage, Region, WindowId, WindowPhase,
    WindowRegistry, WindowSnapshot,
};

/// Window lifecycle notification delivered to the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEvent {
    WindowAdded(WindowId),
    WindowClosed(WindowId),
    WindowDeleted(WindowId),
    GeometryOrShapeChanged(WindowId),
    OpacityChanged(WindowId),
}

/// What one X event means for the scene
#[derive(Debug, Default)]
pub struct Translation {
    pub events: Vec<SceneEvent>,
    pub damage: Region,
    /// New root size
    pub screen_resized: Option<(u32, u32)>,
}

impl Translation {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.damage.is_empty() && self.screen_resized.is_none()
    }

    pub fn merge(&mut self, other: Translation) {
        self.events.extend(other.events);
        self.damage = self.damage.union(&other.damage);
        if other.screen_resized.is_some() {
            self.screen_resized = other.screen_resized;
        }
    }
}

/// Where the translator gets window details the events don't carry
pub trait WindowSource {
    /// Current snapshot of a viewable window, `None` if it can't be composited
    fn snapshot(&mut self, window: WindowId) -> Option<WindowSnapshot>;

    fn opacity(&mut self, window: WindowId) -> f32;
}

/// Area a window's picture covers: the inside of its border
///
/// X reports the outer corner of the border as the window position, while
/// a picture on the window drawable starts inside it.
pub fn content_geometry(x: i16, y: i16, width: u16, height: u16, border_width: u16) -> Geometry {
    let border = border_width as i32;
    Geometry::new(x as i32 + border, y as i32 + border, width as u32, height as u32)
}

/// Opacity as stored in `_NET_WM_WINDOW_OPACITY`
pub fn opacity_from_property(value: u32) -> f32 {
    value as f32 / u32::MAX as f32
}

pub struct EventTranslator<S: WindowSource> {
    source: S,
    registry: WindowRegistry,
    root: u32,
    opacity_atom: u32,
    ignored: HashSet<u32>,
}

impl<S: WindowSource> EventTranslator<S> {
    pub fn new(source: S, root: u32, opacity_atom: u32) -> Self {
        Self {
            source,
            registry: WindowRegistry::new(),
            root,
            opacity_atom,
            ignored: HashSet::new(),
        }
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Never composite `window` (the overlay, our own helpers)
    pub fn ignore(&mut self, window: u32) {
        self.ignored.insert(window);
    }

    /// Adopt windows that were already mapped before we started
    pub fn adopt(&mut self, windows: &[u32]) -> Translation {
        let mut translation = Translation::default();
        for &window in windows {
            translation.merge(self.window_mapped(window));
        }
        translation
    }

    pub fn translate(&mut self, event: &Event) -> Translation {
        match event {
            Event::MapNotify(e) => self.window_mapped(e.window),
            Event::UnmapNotify(e) => self.window_unmapped(e.window),
            Event::DestroyNotify(e) => self.window_destroyed(e.window),
            // Once moved under a frame the window's own notifications stop
            // reaching the root, so it is forgotten like a destroyed one
            Event::ReparentNotify(e) if e.parent == self.root => self.window_mapped(e.window),
            Event::ReparentNotify(e) => self.window_destroyed(e.window),
            Event::ConfigureNotify(e) => {
                if e.window == self.root {
                    return Translation {
                        screen_resized: Some((e.width as u32, e.height as u32)),
                        ..Default::default()
                    };
                }
                let geometry = content_geometry(e.x, e.y, e.width, e.height, e.border_width);
                let sibling = (e.above_sibling != x11rb::NONE).then_some(WindowId(e.above_sibling));
                self.window_configured(e.window, geometry, sibling)
            }
            Event::PropertyNotify(e) if e.atom == self.opacity_atom => {
                let opacity = if e.state == Property::DELETE {
                    1.0
                } else {
                    self.source.opacity(WindowId(e.window))
                };
                self.opacity_changed(e.window, opacity)
            }
            Event::ShapeNotify(e) => self.shape_changed(e.affected_window),
            Event::DamageNotify(e) => {
                let area = Geometry::new(
                    e.area.x as i32,
                    e.area.y as i32,
                    e.area.width as u32,
                    e.area.height as u32,
                );
                self.window_damaged(e.drawable, area)
            }
            _ => Translation::default(),
        }
    }

    fn window_mapped(&mut self, window: u32) -> Translation {
        let mut translation = Translation::default();
        if window == self.root || self.ignored.contains(&window) {
            return translation;
        }
        let id = WindowId(window);

        // A re-mapped window starts over with fresh render state
        if self.registry.phase(id) == Some(WindowPhase::Closing) {
            self.registry.remove(id);
            translation.events.push(SceneEvent::WindowDeleted(id));
        }

        let Some(snapshot) = self.source.snapshot(id) else {
            trace!("Window {} mapped but not compositable", id);
            return translation;
        };
        translation.damage.add_rect(snapshot.geometry);
        self.registry.insert(snapshot);
        translation.events.push(SceneEvent::WindowAdded(id));
        debug!("Window {} mapped at {:?}", id, snapshot.geometry);
        translation
    }

    fn window_unmapped(&mut self, window: u32) -> Translation {
        let id = WindowId(window);
        let mut translation = Translation::default();
        if self.registry.phase(id) != Some(WindowPhase::Mapped) {
            return translation;
        }
        if let Some(snapshot) = self.registry.get(id) {
            translation.damage.add_rect(snapshot.geometry);
        }
        self.registry.set_phase(id, WindowPhase::Closing);
        translation.events.push(SceneEvent::WindowClosed(id));
        translation
    }

    fn window_destroyed(&mut self, window: u32) -> Translation {
        let id = WindowId(window);
        let mut translation = Translation::default();
        let Some(snapshot) = self.registry.remove(id) else {
            return translation;
        };
        translation.damage.add_rect(snapshot.geometry);
        translation.events.push(SceneEvent::WindowDeleted(id));
        translation
    }

    fn window_configured(&mut self, window: u32, geometry: Geometry, sibling: Option<WindowId>) -> Translation {
        let id = WindowId(window);
        let mut translation = Translation::default();
        let Some(old) = self.registry.get(id).map(|w| w.geometry) else {
            return translation;
        };
        self.registry.restack(id, sibling);
        match self.registry.update_geometry(id, geometry) {
            GeometryUpdate::Resized => {
                translation.events.push(SceneEvent::GeometryOrShapeChanged(id));
            }
            GeometryUpdate::Moved | GeometryUpdate::Unchanged | GeometryUpdate::Unknown => {}
        }
        // Restacking changes what's visible even without a move
        translation.damage.add_rect(old);
        translation.damage.add_rect(geometry);
        translation
    }

    fn opacity_changed(&mut self, window: u32, opacity: f32) -> Translation {
        let id = WindowId(window);
        let mut translation = Translation::default();
        if !self.registry.set_opacity(id, opacity) {
            return translation;
        }
        if let Some(snapshot) = self.registry.get(id) {
            translation.damage.add_rect(snapshot.geometry);
        }
        translation.events.push(SceneEvent::OpacityChanged(id));
        translation
    }

    fn shape_changed(&mut self, window: u32) -> Translation {
        let id = WindowId(window);
        let mut translation = Translation::default();
        if let Some(snapshot) = self.registry.get(id) {
            translation.damage.add_rect(snapshot.geometry);
            translation.events.push(SceneEvent::GeometryOrShapeChanged(id));
        }
        translation
    }

    fn window_damaged(&mut self, window: u32, area: Geometry) -> Translation {
        let mut translation = Translation::default();
        if let Some(snapshot) = self.registry.get(WindowId(window)) {
            let g = snapshot.geometry;
            let area = Geometry::new(g.x + area.x, g.y + area.y, area.width, area.height);
            if let Some(visible) = area.intersect(&g) {
                translation.damage.add_rect(visible);
            }
        }
        translation
    }
}

/// `WindowSource` backed by the X server
pub struct X11WindowSource {
    conn: Arc<RustConnection>,
    formats: HashMap<Visualid, PixelFormat>,
    opacity_atom: u32,
    default_opacity: f32,
}

impl X11WindowSource {
    pub fn new(
        conn: Arc<RustConnection>,
        formats: HashMap<Visualid, PixelFormat>,
        opacity_atom: u32,
        default_opacity: f32,
    ) -> Self {
        Self {
            conn,
            formats,
            opacity_atom,
            default_opacity,
        }
    }

    fn query_snapshot(&mut self, window: WindowId) -> anyhow::Result<Option<WindowSnapshot>> {
        let conn = self.conn.as_ref();
        let attrs = conn.get_window_attributes(window.0)?.reply()?;
        if attrs.class == WindowClass::INPUT_ONLY || attrs.map_state != MapState::VIEWABLE {
            return Ok(None);
        }
        let Some(format) = self.formats.get(&attrs.visual).copied() else {
            warn!("No picture format for visual 0x{:x} of window {}", attrs.visual, window);
            return Ok(None);
        };
        let geom = conn.get_geometry(window.0)?.reply()?;
        let geometry = content_geometry(geom.x, geom.y, geom.width, geom.height, geom.border_width);
        let mut snapshot = WindowSnapshot::new(window, geometry, format, PixelStorage(window.0));
        snapshot.opacity = self.opacity(window);
        Ok(Some(snapshot))
    }
}

impl WindowSource for X11WindowSource {
    fn snapshot(&mut self, window: WindowId) -> Option<WindowSnapshot> {
        match self.query_snapshot(window) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("Failed to query window {}: {}", window, e);
                None
            }
        }
    }

    fn opacity(&mut self, window: WindowId) -> f32 {
        let reply = self
            .conn
            .get_property(false, window.0, self.opacity_atom, AtomEnum::CARDINAL, 0, 1)
            .ok()
            .and_then(|cookie| cookie.reply().ok());
        reply
            .and_then(|r| r.value32().and_then(|mut values| values.next()))
            .map(opacity_from_property)
            .unwrap_or(self.default_opacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::protocol::xproto::{
        ConfigureNotifyEvent, DestroyNotifyEvent, MapNotifyEvent, PropertyNotifyEvent,
        ReparentNotifyEvent, UnmapNotifyEvent,
    };

    const ROOT: u32 = 1;
    const OPACITY_ATOM: u32 = 300;

    #[derive(Default)]
    struct FakeSource {
        windows: HashMap<WindowId, WindowSnapshot>,
        opacity: HashMap<WindowId, f32>,
    }

    impl WindowSource for FakeSource {
        fn snapshot(&mut self, window: WindowId) -> Option<WindowSnapshot> {
            self.windows.get(&window).copied()
        }

        fn opacity(&mut self, window: WindowId) -> f32 {
            self.opacity.get(&window).copied().unwrap_or(1.0)
        }
    }

    fn translator() -> EventTranslator<FakeSource> {
        let mut source = FakeSource::default();
        for id in [10, 11] {
            source.windows.insert(
                WindowId(id),
                WindowSnapshot::new(
                    WindowId(id),
                    Geometry::new(0, 0, 100, 100),
                    PixelFormat::new(1, 24, false),
                    PixelStorage(id),
                ),
            );
        }
        EventTranslator::new(source, ROOT, OPACITY_ATOM)
    }

    fn map(window: u32) -> Event {
        Event::MapNotify(MapNotifyEvent {
            response_type: 19,
            sequence: 0,
            event: ROOT,
            window,
            override_redirect: false,
        })
    }

    fn unmap(window: u32) -> Event {
        Event::UnmapNotify(UnmapNotifyEvent {
            response_type: 18,
            sequence: 0,
            event: ROOT,
            window,
            from_configure: false,
        })
    }

    fn destroy(window: u32) -> Event {
        Event::DestroyNotify(DestroyNotifyEvent {
            response_type: 17,
            sequence: 0,
            event: ROOT,
            window,
        })
    }

    fn configure(window: u32, x: i16, y: i16, width: u16, height: u16) -> Event {
        Event::ConfigureNotify(ConfigureNotifyEvent {
            response_type: 22,
            sequence: 0,
            event: ROOT,
            window,
            above_sibling: 0,
            x,
            y,
            width,
            height,
            border_width: 0,
            override_redirect: false,
        })
    }

    fn reparent(window: u32, parent: u32) -> Event {
        Event::ReparentNotify(ReparentNotifyEvent {
            response_type: 21,
            sequence: 0,
            event: ROOT,
            window,
            parent,
            x: 0,
            y: 0,
            override_redirect: false,
        })
    }

    #[test]
    fn test_map_adds_window() {
        let mut t = translator();
        let out = t.translate(&map(10));
        assert_eq!(out.events, vec![SceneEvent::WindowAdded(WindowId(10))]);
        assert_eq!(out.damage.area(), 100 * 100);
        assert!(t.registry().contains(WindowId(10)));

        // Not compositable
        let out = t.translate(&map(99));
        assert!(out.events.is_empty());
    }

    #[test]
    fn test_move_does_not_invalidate() {
        let mut t = translator();
        t.translate(&map(10));

        let out = t.translate(&configure(10, 50, 0, 100, 100));
        assert!(out.events.is_empty());
        assert_eq!(out.damage.area(), 150 * 100);

        let out = t.translate(&configure(10, 50, 0, 200, 100));
        assert_eq!(out.events, vec![SceneEvent::GeometryOrShapeChanged(WindowId(10))]);
    }

    #[test]
    fn test_close_then_delete() {
        let mut t = translator();
        t.translate(&map(10));

        let out = t.translate(&unmap(10));
        assert_eq!(out.events, vec![SceneEvent::WindowClosed(WindowId(10))]);
        assert!(t.registry().paint_order().is_empty());
        assert!(t.registry().contains(WindowId(10)));

        let out = t.translate(&destroy(10));
        assert_eq!(out.events, vec![SceneEvent::WindowDeleted(WindowId(10))]);
        assert!(!t.registry().contains(WindowId(10)));

        assert!(t.translate(&destroy(10)).events.is_empty());
    }

    #[test]
    fn test_remap_of_closing_window_starts_fresh() {
        let mut t = translator();
        t.translate(&map(10));
        t.translate(&unmap(10));

        let out = t.translate(&map(10));
        assert_eq!(
            out.events,
            vec![
                SceneEvent::WindowDeleted(WindowId(10)),
                SceneEvent::WindowAdded(WindowId(10)),
            ]
        );
    }

    #[test]
    fn test_opacity_property() {
        let mut t = translator();
        t.translate(&map(10));
        t.source_mut().opacity.insert(WindowId(10), 0.5);

        let event = Event::PropertyNotify(PropertyNotifyEvent {
            response_type: 28,
            sequence: 0,
            window: 10,
            atom: OPACITY_ATOM,
            time: 0,
            state: Property::NEW_VALUE,
        });
        let out = t.translate(&event);
        assert_eq!(out.events, vec![SceneEvent::OpacityChanged(WindowId(10))]);
        assert_eq!(t.registry().get(WindowId(10)).unwrap().opacity, 0.5);

        // Same value again is not a change
        assert!(t.translate(&event).events.is_empty());
    }

    #[test]
    fn test_reparent_into_frame_forgets_window() {
        let mut t = translator();
        t.translate(&map(10));

        let out = t.translate(&reparent(10, 77));
        assert_eq!(out.events, vec![SceneEvent::WindowDeleted(WindowId(10))]);
        assert_eq!(out.damage.area(), 100 * 100);
        assert!(!t.registry().contains(WindowId(10)));
        assert!(t.registry().paint_order().is_empty());

        // Later events for the reparented window are ignored
        assert!(t.translate(&configure(10, 5, 5, 200, 200)).is_empty());
        assert!(t.translate(&destroy(10)).is_empty());
    }

    #[test]
    fn test_reparent_to_root_adds_viewable_window() {
        let mut t = translator();
        let out = t.translate(&reparent(11, ROOT));
        assert_eq!(out.events, vec![SceneEvent::WindowAdded(WindowId(11))]);
        assert!(t.registry().contains(WindowId(11)));

        // Not viewable
        assert!(t.translate(&reparent(99, ROOT)).events.is_empty());
    }

    #[test]
    fn test_border_is_outside_content() {
        let mut t = translator();
        t.translate(&map(10));

        let event = Event::ConfigureNotify(ConfigureNotifyEvent {
            response_type: 22,
            sequence: 0,
            event: ROOT,
            window: 10,
            above_sibling: 0,
            x: 20,
            y: 30,
            width: 100,
            height: 100,
            border_width: 2,
            override_redirect: false,
        });
        let out = t.translate(&event);
        assert!(out.events.is_empty());
        assert_eq!(
            t.registry().get(WindowId(10)).unwrap().geometry,
            Geometry::new(22, 32, 100, 100)
        );
        assert_eq!(content_geometry(-5, 0, 10, 10, 3), Geometry::new(-2, 3, 10, 10));
    }

    #[test]
    fn test_root_configure_resizes_screen() {
        let mut t = translator();
        let out = t.translate(&configure(ROOT, 0, 0, 1920, 1080));
        assert_eq!(out.screen_resized, Some((1920, 1080)));
    }

    #[test]
    fn test_opacity_from_property() {
        assert_eq!(opacity_from_property(u32::MAX), 1.0);
        assert_eq!(opacity_from_property(0), 0.0);
    }
}

//! Window state shared between the event translation layer and the scene
//!
//! The scene never talks to X11 about window properties directly. Instead,
//! the event layer keeps a `WindowRegistry` of `WindowSnapshot`s up to date
//! and hands the current snapshots to the scene on every paint.

use std::collections::HashMap;
use std::fmt;

/// Stable window identity (the X11 window id)
///
/// Two snapshots refer to the same window iff their ids are equal. A window
/// that is destroyed and later re-created with a recycled id goes through
/// `WindowDeleted`/`WindowAdded` first, so it never inherits stale state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Window geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    /// Intersection of two rectangles, `None` if they don't overlap
    pub fn intersect(&self, other: &Geometry) -> Option<Geometry> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Geometry::new(x1, y1, (x2 - x1) as u32, (y2 - y1) as u32))
    }

    /// Same size, position ignored
    pub fn same_size(&self, other: &Geometry) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// Pixel format of a window's backing storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    /// Server-side format id (XRender `Pictformat`), 0 when unknown
    pub id: u32,
    pub depth: u8,
    pub has_alpha: bool,
}

impl PixelFormat {
    pub fn new(id: u32, depth: u8, has_alpha: bool) -> Self {
        Self { id, depth, has_alpha }
    }
}

/// Server-side pixel storage a window paints into (a drawable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelStorage(pub u32);

/// Everything the scene needs to know about a window for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSnapshot {
    pub id: WindowId,
    pub geometry: Geometry,
    /// Requested opacity (0.0 - 1.0)
    pub opacity: f32,
    pub format: PixelFormat,
    pub storage: PixelStorage,
}

impl WindowSnapshot {
    pub fn new(id: WindowId, geometry: Geometry, format: PixelFormat, storage: PixelStorage) -> Self {
        Self {
            id,
            geometry,
            opacity: 1.0,
            format,
            storage,
        }
    }

    pub fn identity(&self) -> WindowId {
        self.id
    }

    /// Opacity clamped to the valid range
    pub fn opacity(&self) -> f32 {
        self.opacity.clamp(0.0, 1.0)
    }

    pub fn is_opaque(&self) -> bool {
        self.opacity() >= 1.0 && !self.format.has_alpha
    }
}

/// Lifecycle of a known window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    Mapped,
    /// Unmapped, kept around until destroyed or re-mapped
    Closing,
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    snapshot: WindowSnapshot,
    phase: WindowPhase,
}

/// Result of recording a geometry update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryUpdate {
    Unknown,
    Moved,
    Resized,
    Unchanged,
}

/// Window registry: snapshots plus stacking order
#[derive(Debug, Default)]
pub struct WindowRegistry {
    windows: HashMap<WindowId, RegistryEntry>,
    z_order: Vec<WindowId>, // back to front
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly mapped window on top of the stack, or refresh an
    /// existing one (keeping its stacking position)
    pub fn insert(&mut self, snapshot: WindowSnapshot) {
        let id = snapshot.id;
        match self.windows.get_mut(&id) {
            Some(entry) => {
                entry.snapshot = snapshot;
                entry.phase = WindowPhase::Mapped;
            }
            None => {
                self.z_order.push(id);
                self.windows.insert(
                    id,
                    RegistryEntry {
                        snapshot,
                        phase: WindowPhase::Mapped,
                    },
                );
            }
        }
    }

    pub fn remove(&mut self, id: WindowId) -> Option<WindowSnapshot> {
        self.z_order.retain(|&wid| wid != id);
        self.windows.remove(&id).map(|entry| entry.snapshot)
    }

    pub fn get(&self, id: WindowId) -> Option<&WindowSnapshot> {
        self.windows.get(&id).map(|entry| &entry.snapshot)
    }

    pub fn phase(&self, id: WindowId) -> Option<WindowPhase> {
        self.windows.get(&id).map(|entry| entry.phase)
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.windows.contains_key(&id)
    }

    pub fn set_phase(&mut self, id: WindowId, phase: WindowPhase) {
        if let Some(entry) = self.windows.get_mut(&id) {
            entry.phase = phase;
        }
    }

    pub fn update_geometry(&mut self, id: WindowId, geometry: Geometry) -> GeometryUpdate {
        let Some(entry) = self.windows.get_mut(&id) else {
            return GeometryUpdate::Unknown;
        };
        let old = entry.snapshot.geometry;
        entry.snapshot.geometry = geometry;
        if !old.same_size(&geometry) {
            GeometryUpdate::Resized
        } else if old != geometry {
            GeometryUpdate::Moved
        } else {
            GeometryUpdate::Unchanged
        }
    }

    pub fn set_opacity(&mut self, id: WindowId, opacity: f32) -> bool {
        match self.windows.get_mut(&id) {
            Some(entry) if entry.snapshot.opacity != opacity => {
                entry.snapshot.opacity = opacity;
                true
            }
            _ => false,
        }
    }

    /// Restack `id` directly above `sibling` (or to the bottom when `None`)
    pub fn restack(&mut self, id: WindowId, sibling: Option<WindowId>) {
        if !self.windows.contains_key(&id) {
            return;
        }
        self.z_order.retain(|&wid| wid != id);
        let pos = sibling
            .and_then(|s| self.z_order.iter().position(|&wid| wid == s))
            .map(|p| p + 1)
            .unwrap_or(0);
        self.z_order.insert(pos, id);
    }

    /// Mapped windows in paint order (back to front)
    pub fn paint_order(&self) -> Vec<WindowSnapshot> {
        self.z_order
            .iter()
            .filter_map(|id| self.windows.get(id))
            .filter(|entry| entry.phase == WindowPhase::Mapped)
            .map(|entry| entry.snapshot)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

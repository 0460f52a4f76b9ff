//! Windowing-system resource API consumed by the scene
//!
//! `RenderBackend` is the seam between the cache/paint logic and the server:
//! `XRenderBackend` implements it over x11rb, tests implement it with a
//! recording fake.

use super::error::{ResourceCreationError, SceneError};
use crate::effects::ShaderKind;
use crate::shared::{Geometry, PixelFormat, PixelStorage, Region};

/// Opaque handle to a server-side render resource (an XRender `Picture`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub u32);

/// RGBA color, 16 bits per channel as XRender wants it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
    pub alpha: u16,
}

impl Color {
    pub const WHITE: Color = Color {
        red: 0xffff,
        green: 0xffff,
        blue: 0xffff,
        alpha: 0xffff,
    };

    /// From a 0xRRGGBB config value
    pub fn from_rgb(rgb: u32) -> Self {
        let expand = |c: u32| ((c & 0xff) * 0x101) as u16;
        Self {
            red: expand(rgb >> 16),
            green: expand(rgb >> 8),
            blue: expand(rgb),
            alpha: 0xffff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeOp {
    /// Replace destination (opaque windows)
    Src,
    /// Blend over destination
    Over,
}

/// One window composite into the back buffer
#[derive(Debug, Clone)]
pub struct CompositeRequest<'a> {
    pub op: CompositeOp,
    pub source: ResourceHandle,
    pub mask: Option<ResourceHandle>,
    pub target: ResourceHandle,
    /// Destination rectangle of the unscaled window
    pub geometry: Geometry,
    /// Uniform scale applied about the screen origin
    pub scale: f32,
    pub x_translate: i32,
    pub y_translate: i32,
    /// Only pixels inside `clip` may be touched
    pub clip: &'a Region,
    /// Color transform requested by an effect
    pub shader: Option<ShaderKind>,
}

impl CompositeRequest<'_> {
    /// Where the window lands on screen after scale and translation
    pub fn destination(&self) -> Geometry {
        if self.scale == 1.0 {
            return Geometry::new(
                self.geometry.x + self.x_translate,
                self.geometry.y + self.y_translate,
                self.geometry.width,
                self.geometry.height,
            );
        }
        Region::from_rect(self.geometry)
            .scaled(self.scale)
            .translated(self.x_translate, self.y_translate)
            .bounding_rect()
            .unwrap_or_default()
    }
}

pub trait RenderBackend {
    /// Materialize a picture for a window's pixel storage
    fn create_resource(
        &mut self,
        storage: PixelStorage,
        format: PixelFormat,
    ) -> Result<ResourceHandle, ResourceCreationError>;

    /// Allocate a `width`x`height` mask uniformly filled with `opacity`
    fn create_mask(
        &mut self,
        width: u32,
        height: u32,
        opacity: f32,
    ) -> Result<ResourceHandle, ResourceCreationError>;

    /// Allocate an off-screen buffer in the screen's format
    fn create_buffer(&mut self, width: u32, height: u32) -> Result<ResourceHandle, ResourceCreationError>;

    /// Picture for the on-screen (front) surface
    fn create_front(&mut self) -> Result<ResourceHandle, ResourceCreationError>;

    fn release_resource(&mut self, handle: ResourceHandle);

    fn fill(&mut self, target: ResourceHandle, color: Color, region: &Region) -> Result<(), SceneError>;

    fn composite(&mut self, request: &CompositeRequest<'_>) -> Result<(), SceneError>;

    /// Copy `region` of `buffer` to `front` as one operation and flush
    fn present(&mut self, buffer: ResourceHandle, front: ResourceHandle, region: &Region) -> Result<(), SceneError>;

    fn supports_shader(&self, _shader: ShaderKind) -> bool {
        false
    }
}

//! XRender backend
//!
//! Implements `RenderBackend` with the RENDER extension: window pictures are
//! created straight on the (redirected) window drawables, masks and the back
//! buffer live in server-side pixmaps, and presentation is a single clipped
//! `Src` composite onto the composite overlay window.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, trace};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::render::{
    self, ChangePictureAux, ConnectionExt as RenderExt, CreatePictureAux, PictOp, PictType,
    Pictformat, Transform,
};
use x11rb::protocol::xproto::{ConnectionExt as _, Rectangle, SubwindowMode, Visualid};
use x11rb::rust_connection::RustConnection;

use crate::effects::ShaderKind;
use crate::scene::backend::{Color, CompositeOp, CompositeRequest, RenderBackend, ResourceHandle};
use crate::scene::error::{ResourceCreationError, ResourceKind, SceneError};
use crate::shared::{PixelFormat, PixelStorage, Region};

const FIXED_ONE: i32 = 1 << 16;

fn to_fixed(value: f32) -> i32 {
    (value * FIXED_ONE as f32).round() as i32
}

fn scale_transform(scale: f32) -> Transform {
    let inverse = to_fixed(1.0 / scale);
    Transform {
        matrix11: inverse,
        matrix12: 0,
        matrix13: 0,
        matrix21: 0,
        matrix22: inverse,
        matrix23: 0,
        matrix31: 0,
        matrix32: 0,
        matrix33: FIXED_ONE,
    }
}

fn to_coord(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn to_extent(value: u32) -> u16 {
    value.min(u16::MAX as u32) as u16
}

fn to_xrect(rects: &Region) -> Vec<Rectangle> {
    rects
        .rects()
        .iter()
        .map(|r| Rectangle {
            x: to_coord(r.x),
            y: to_coord(r.y),
            width: to_extent(r.width),
            height: to_extent(r.height),
        })
        .collect()
}

/// One RENDER composite making up a window paint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// `Difference` of opaque white over the window area
    InvertTarget,
    Window,
    /// `HslHue` of the window picture over what was drawn
    WindowHue,
}

/// Composite sequence for a window paint
///
/// Inverting the area before and after blending the window gives
/// `a(1-W) + (1-a)B`, so the background behind a translucent window comes
/// out unchanged. `Src` replaces the area, so only the second inversion is
/// needed. The hue pass is exact for opaque windows only.
fn composite_passes(op: CompositeOp, shader: Option<ShaderKind>, blend_modes: bool) -> Vec<Pass> {
    let Some(shader) = shader else {
        return vec![Pass::Window];
    };
    let mut passes = Vec::with_capacity(4);
    if op != CompositeOp::Src {
        passes.push(Pass::InvertTarget);
    }
    passes.push(Pass::Window);
    passes.push(Pass::InvertTarget);
    if shader == ShaderKind::InvertPlusHue && blend_modes {
        passes.push(Pass::WindowHue);
    }
    passes
}

fn to_render_color(color: Color) -> render::Color {
    render::Color {
        red: color.red,
        green: color.green,
        blue: color.blue,
        alpha: color.alpha,
    }
}

fn to_pict_op(op: CompositeOp) -> PictOp {
    match op {
        CompositeOp::Src => PictOp::SRC,
        CompositeOp::Over => PictOp::OVER,
    }
}

/// Visual -> picture format table from `QueryPictFormats`
pub fn query_visual_formats(conn: &RustConnection) -> Result<VisualFormats, SceneError> {
    let reply = conn.render_query_pict_formats()?.reply()?;

    let mut formats = HashMap::new();
    let mut a8 = None;
    for info in &reply.formats {
        let format = PixelFormat::new(info.id, info.depth, info.direct.alpha_mask != 0);
        formats.insert(info.id, format);
        if info.type_ == PictType::DIRECT
            && info.depth == 8
            && info.direct.alpha_mask == 0xff
            && info.direct.red_mask == 0
        {
            a8 = Some(info.id);
        }
    }

    let mut visuals = HashMap::new();
    for screen in &reply.screens {
        for depth in &screen.depths {
            for visual in &depth.visuals {
                if let Some(format) = formats.get(&visual.format) {
                    visuals.insert(visual.visual, *format);
                }
            }
        }
    }

    let a8 = a8.ok_or_else(|| SceneError::MissingFormat("8-bit alpha".into()))?;
    Ok(VisualFormats { visuals, a8 })
}

#[derive(Debug, Clone)]
pub struct VisualFormats {
    pub visuals: HashMap<Visualid, PixelFormat>,
    pub a8: Pictformat,
}

pub struct XRenderBackend {
    conn: Arc<RustConnection>,
    root: u32,
    overlay: u32,
    root_depth: u8,
    root_format: Pictformat,
    formats: VisualFormats,
    /// Opaque white source for inversion, needs RENDER 0.10
    white: Option<u32>,
    /// RENDER 0.11 adds the PDF blend modes used for hue preservation
    blend_modes: bool,
    width: u16,
    height: u16,
}

impl XRenderBackend {
    pub fn new(conn: Arc<RustConnection>, screen_num: usize, overlay: u32) -> anyhow::Result<Self> {
        let _render_info = conn
            .extension_information(render::X11_EXTENSION_NAME)?
            .context("RENDER extension not available")?;

        let version = conn
            .render_query_version(0, 11)?
            .reply()
            .context("Failed to query RENDER version")?;
        info!("Render extension {}.{}", version.major_version, version.minor_version);

        let formats = query_visual_formats(&conn)?;

        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let root_depth = screen.root_depth;
        let root_format = formats
            .visuals
            .get(&screen.root_visual)
            .map(|f| f.id)
            .context("No picture format for the root visual")?;
        let width = screen.width_in_pixels;
        let height = screen.height_in_pixels;

        let minor = version.minor_version;
        let white = if version.major_version > 0 || minor >= 10 {
            let picture = conn.generate_id()?;
            conn.render_create_solid_fill(picture, to_render_color(Color::WHITE))?;
            Some(picture)
        } else {
            None
        };

        Ok(Self {
            conn,
            root,
            overlay,
            root_depth,
            root_format,
            formats,
            white,
            blend_modes: version.major_version > 0 || minor >= 11,
            width,
            height,
        })
    }

    pub fn visual_formats(&self) -> &HashMap<Visualid, PixelFormat> {
        &self.formats.visuals
    }

    pub fn set_screen_size(&mut self, width: u32, height: u32) {
        self.width = to_extent(width);
        self.height = to_extent(height);
    }

    fn create_error(kind: ResourceKind) -> impl Fn(String) -> ResourceCreationError {
        move |reason| ResourceCreationError::new(kind, reason)
    }

    /// Picture over a pixmap we own only for as long as the picture lives
    fn create_pixmap_picture(
        &mut self,
        kind: ResourceKind,
        depth: u8,
        format: Pictformat,
        width: u32,
        height: u32,
    ) -> Result<ResourceHandle, ResourceCreationError> {
        let fail = Self::create_error(kind);
        let width = width.clamp(1, u16::MAX as u32) as u16;
        let height = height.clamp(1, u16::MAX as u32) as u16;
        let conn = self.conn.as_ref();

        let pixmap = conn.generate_id().map_err(|e| fail(e.to_string()))?;
        conn.create_pixmap(depth, pixmap, self.root, width, height)
            .map_err(|e| fail(e.to_string()))?
            .check()
            .map_err(|e| fail(e.to_string()))?;

        let picture = conn.generate_id().map_err(|e| fail(e.to_string()))?;
        let result = conn
            .render_create_picture(picture, pixmap, format, &CreatePictureAux::new())
            .map_err(|e| fail(e.to_string()))
            .and_then(|cookie| cookie.check().map_err(|e| fail(e.to_string())));
        // The picture keeps the pixmap alive
        let _ = conn.free_pixmap(pixmap);
        result?;
        Ok(ResourceHandle(picture))
    }

    fn clip(&self, picture: u32, region: &Region) -> Result<(), SceneError> {
        self.conn
            .render_set_picture_clip_rectangles(picture, 0, 0, &to_xrect(region))?;
        Ok(())
    }

    fn unclip(&self, picture: u32) -> Result<(), SceneError> {
        self.conn
            .render_change_picture(picture, &ChangePictureAux::new().clipmask(x11rb::NONE))?;
        Ok(())
    }

    fn set_scale(&self, picture: u32, scale: f32) -> Result<(), SceneError> {
        self.conn.render_set_picture_transform(picture, scale_transform(scale))?;
        let filter: &[u8] = if scale == 1.0 { b"fast" } else { b"good" };
        self.conn.render_set_picture_filter(picture, filter, &[])?;
        Ok(())
    }
}

impl RenderBackend for XRenderBackend {
    fn create_resource(
        &mut self,
        storage: PixelStorage,
        format: PixelFormat,
    ) -> Result<ResourceHandle, ResourceCreationError> {
        let fail = Self::create_error(ResourceKind::WindowPicture);
        if format.id == 0 {
            return Err(fail(format!("unsupported pixel format (depth {})", format.depth)));
        }
        let conn = self.conn.as_ref();
        let picture = conn.generate_id().map_err(|e| fail(e.to_string()))?;
        let aux = CreatePictureAux::new().subwindowmode(SubwindowMode::INCLUDE_INFERIORS);
        conn.render_create_picture(picture, storage.0, format.id, &aux)
            .map_err(|e| fail(e.to_string()))?
            .check()
            .map_err(|e| fail(e.to_string()))?;
        trace!("Picture 0x{:x} on drawable 0x{:x}", picture, storage.0);
        Ok(ResourceHandle(picture))
    }

    fn create_mask(
        &mut self,
        width: u32,
        height: u32,
        opacity: f32,
    ) -> Result<ResourceHandle, ResourceCreationError> {
        let mask = self.create_pixmap_picture(ResourceKind::AlphaMask, 8, self.formats.a8, width, height)?;
        let alpha = (opacity.clamp(0.0, 1.0) * 0xffff as f32).round() as u16;
        let color = render::Color {
            red: 0,
            green: 0,
            blue: 0,
            alpha,
        };
        let area = Rectangle {
            x: 0,
            y: 0,
            width: width.clamp(1, u16::MAX as u32) as u16,
            height: height.clamp(1, u16::MAX as u32) as u16,
        };
        self.conn
            .render_fill_rectangles(PictOp::SRC, mask.0, color, &[area])
            .map_err(|e| ResourceCreationError::new(ResourceKind::AlphaMask, e.to_string()))?;
        Ok(mask)
    }

    fn create_buffer(&mut self, width: u32, height: u32) -> Result<ResourceHandle, ResourceCreationError> {
        self.create_pixmap_picture(ResourceKind::Buffer, self.root_depth, self.root_format, width, height)
    }

    fn create_front(&mut self) -> Result<ResourceHandle, ResourceCreationError> {
        let fail = Self::create_error(ResourceKind::FrontPicture);
        let conn = self.conn.as_ref();
        let picture = conn.generate_id().map_err(|e| fail(e.to_string()))?;
        let aux = CreatePictureAux::new().subwindowmode(SubwindowMode::INCLUDE_INFERIORS);
        conn.render_create_picture(picture, self.overlay, self.root_format, &aux)
            .map_err(|e| fail(e.to_string()))?
            .check()
            .map_err(|e| fail(e.to_string()))?;
        debug!("Front picture 0x{:x} on overlay 0x{:x}", picture, self.overlay);
        Ok(ResourceHandle(picture))
    }

    fn release_resource(&mut self, handle: ResourceHandle) {
        if let Err(e) = self.conn.render_free_picture(handle.0) {
            debug!("Failed to free picture 0x{:x}: {}", handle.0, e);
        }
    }

    fn fill(&mut self, target: ResourceHandle, color: Color, region: &Region) -> Result<(), SceneError> {
        self.conn
            .render_fill_rectangles(PictOp::SRC, target.0, to_render_color(color), &to_xrect(region))?;
        Ok(())
    }

    fn composite(&mut self, request: &CompositeRequest<'_>) -> Result<(), SceneError> {
        let dest = request.destination();
        let (dst_x, dst_y) = (to_coord(dest.x), to_coord(dest.y));
        let (width, height) = (to_extent(dest.width), to_extent(dest.height));
        let mask = request.mask.map(|m| m.0).unwrap_or(x11rb::NONE);
        let target = request.target.0;
        let scaled = request.scale != 1.0;
        let shader = request.shader.filter(|_| self.white.is_some());

        self.clip(target, request.clip)?;
        if scaled {
            self.set_scale(request.source.0, request.scale)?;
            if mask != x11rb::NONE {
                self.set_scale(mask, request.scale)?;
            }
        }

        for pass in composite_passes(request.op, shader, self.blend_modes) {
            let (op, source, pass_mask) = match pass {
                Pass::InvertTarget => match self.white {
                    Some(white) => (PictOp::DIFFERENCE, white, x11rb::NONE),
                    None => continue,
                },
                Pass::Window => (to_pict_op(request.op), request.source.0, mask),
                Pass::WindowHue => (PictOp::HSL_HUE, request.source.0, mask),
            };
            self.conn.render_composite(
                op, source, pass_mask, target, 0, 0, 0, 0, dst_x, dst_y, width, height,
            )?;
        }

        if scaled {
            self.set_scale(request.source.0, 1.0)?;
            if mask != x11rb::NONE {
                self.set_scale(mask, 1.0)?;
            }
        }
        self.unclip(target)
    }

    fn present(&mut self, buffer: ResourceHandle, front: ResourceHandle, region: &Region) -> Result<(), SceneError> {
        self.clip(front.0, region)?;
        self.conn.render_composite(
            PictOp::SRC,
            buffer.0,
            x11rb::NONE,
            front.0,
            0,
            0,
            0,
            0,
            0,
            0,
            self.width,
            self.height,
        )?;
        self.unclip(front.0)?;
        self.conn.flush()?;
        Ok(())
    }

    fn supports_shader(&self, shader: ShaderKind) -> bool {
        match shader {
            ShaderKind::Invert => self.white.is_some(),
            ShaderKind::InvertPlusHue => self.white.is_some() && self.blend_modes,
        }
    }
}

impl Drop for XRenderBackend {
    fn drop(&mut self) {
        if let Some(white) = self.white.take() {
            let _ = self.conn.render_free_picture(white);
        }
        let _ = self.conn.flush();
    }
}

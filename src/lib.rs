//! Area XRender compositor
//!
//! Composites redirected X11 windows with the RENDER extension. The core is
//! the scene's per-window render cache: pictures, alpha masks and
//! transformed shapes are created lazily, invalidated by window
//! notifications and released when windows go away.

pub mod backend;
pub mod config;
pub mod effects;
pub mod events;
pub mod scene;
pub mod shared;
pub mod shortcuts;
pub mod x11_async;

pub use scene::{PaintMask, PaintStats, Scene, SceneOptions, ScreenPaintData, WindowPaintData};
pub use shared::{Geometry, Region, WindowId, WindowSnapshot};

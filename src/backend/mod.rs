//! Rendering backends

pub mod xrender;

pub use xrender::XRenderBackend;

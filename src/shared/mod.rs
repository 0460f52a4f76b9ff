//! Types shared by the scene, the event layer and the backends

pub mod region;
pub mod window_state;

pub use region::Region;
pub use window_state::{
    Geometry, GeometryUpdate, PixelFormat, PixelStorage, WindowId, WindowPhase, WindowRegistry,
    WindowSnapshot,
};

//! Scene error types

use std::fmt;
use thiserror::Error;

/// What kind of server-side resource failed to materialize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    WindowPicture,
    AlphaMask,
    Buffer,
    FrontPicture,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::WindowPicture => "window picture",
            ResourceKind::AlphaMask => "alpha mask",
            ResourceKind::Buffer => "back buffer",
            ResourceKind::FrontPicture => "front picture",
        };
        f.write_str(name)
    }
}

/// The windowing system refused or failed to create a picture or mask
///
/// Recoverable: the window is skipped for the frame and retried on the next.
#[derive(Debug, Clone, Error)]
#[error("failed to create {kind}: {reason}")]
pub struct ResourceCreationError {
    pub kind: ResourceKind,
    pub reason: String,
}

impl ResourceCreationError {
    pub fn new(kind: ResourceKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error(transparent)]
    ResourceCreation(#[from] ResourceCreationError),

    #[error("X11 connection error: {0}")]
    Connection(#[from] x11rb::errors::ConnectionError),

    #[error("X11 request failed: {0}")]
    Reply(#[from] x11rb::errors::ReplyError),

    #[error("no XRender picture format for {0}")]
    MissingFormat(String),
}

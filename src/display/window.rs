use serde::Serialize;

use super::{DisplayError, SurfaceHandle, WindowHandle};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowOptions {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

/// A guest-visible window. It refers to its surface by handle and does not own it.
#[derive(Debug, Clone, Serialize)]
pub struct Window {
    pub id: WindowHandle,
    pub title: String,
    pub width: u32,
    pub height: u32,
    surface: Option<SurfaceHandle>,
}

impl Window {
    pub(crate) fn new(id: WindowHandle, options: WindowOptions) -> Self {
        Self {
            id,
            title: options.title,
            width: options.width,
            height: options.height,
            surface: None,
        }
    }

    pub fn surface(&self) -> Option<SurfaceHandle> {
        self.surface
    }

    /// Binds a surface. A window is bound at most once and never unbound.
    pub(crate) fn bind_surface(&mut self, surface: SurfaceHandle) -> Result<(), DisplayError> {
        if self.surface.is_some() {
            return Err(DisplayError::AlreadyBound(self.id));
        }
        self.surface = Some(surface);
        Ok(())
    }
}

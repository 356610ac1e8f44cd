//! Virtualized display subsystem: windows and double-buffered surfaces the
//! guest program draws into through the host boundary.
//!
//! Nothing here knows about a concrete renderer. Observers read surface
//! contents between scheduling turns.

mod surface;
mod window;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub use surface::Surface;
pub use window::{Window, WindowOptions};

/// 32-bit pixels, the only format guests are offered.
pub const BYTES_PER_PIXEL: u32 = 4;

/// Largest pixel buffer a guest may allocate for one surface.
pub const MAX_SURFACE_BYTES: usize = 64 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WindowHandle(pub u32);

/// Refers to a surface, or to the back buffer owned by a primary surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SurfaceHandle {
    pub index: u32,
    pub attached: bool,
}

impl SurfaceHandle {
    fn new(index: u32) -> Self {
        Self {
            index,
            attached: false,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisplayError {
    #[error("pixel buffer has {actual} bytes, surface needs {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("surface has no back buffer")]
    NoBackBuffer,
    #[error("unknown surface {0:?}")]
    UnknownSurface(SurfaceHandle),
    #[error("unknown window {0:?}")]
    UnknownWindow(WindowHandle),
    #[error("window {0:?} already has a surface")]
    AlreadyBound(WindowHandle),
    #[error("surface of {width}x{height} pixels is too large")]
    TooLarge { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceOptions {
    pub width: u32,
    pub height: u32,
    pub primary: bool,
    /// Window a primary surface is presented in.
    pub window: Option<WindowHandle>,
}

#[derive(Debug)]
pub struct Display {
    bytes_per_pixel: u32,
    windows: Vec<Window>,
    surfaces: Vec<Surface>,
}

impl Display {
    pub fn new(bytes_per_pixel: u32) -> Self {
        Self {
            bytes_per_pixel: bytes_per_pixel.max(1),
            windows: Vec::new(),
            surfaces: Vec::new(),
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    /// Allocates a window. Ids start at 1 and are never reused within a session.
    pub fn create_window(&mut self, options: WindowOptions) -> WindowHandle {
        let id = WindowHandle(self.windows.len() as u32 + 1);
        debug!(?id, title = %options.title, "create window");
        self.windows.push(Window::new(id, options));
        id
    }

    pub fn window(&self, handle: WindowHandle) -> Result<&Window, DisplayError> {
        handle
            .0
            .checked_sub(1)
            .and_then(|i| self.windows.get(i as usize))
            .ok_or(DisplayError::UnknownWindow(handle))
    }

    pub fn windows(&self) -> impl Iterator<Item = &Window> {
        self.windows.iter()
    }

    pub fn latest_window(&self) -> Option<WindowHandle> {
        self.windows.last().map(|w| w.id)
    }

    pub fn bind_surface(
        &mut self,
        window: WindowHandle,
        surface: SurfaceHandle,
    ) -> Result<(), DisplayError> {
        self.surface(surface)?;
        let slot = window
            .0
            .checked_sub(1)
            .and_then(|i| self.windows.get_mut(i as usize))
            .ok_or(DisplayError::UnknownWindow(window))?;
        slot.bind_surface(surface)?;
        debug!(?window, ?surface, "bound surface");
        Ok(())
    }

    pub fn create_surface(
        &mut self,
        width: u32,
        height: u32,
        primary: bool,
    ) -> Result<SurfaceHandle, DisplayError> {
        let surface = Surface::new(width, height, self.bytes_per_pixel, primary)?;
        let handle = SurfaceHandle::new(self.surfaces.len() as u32);
        self.surfaces.push(surface);
        debug!(?handle, width, height, primary, "create surface");
        Ok(handle)
    }

    pub fn surfaces(&self) -> impl Iterator<Item = (SurfaceHandle, &Surface)> {
        self.surfaces
            .iter()
            .enumerate()
            .map(|(i, s)| (SurfaceHandle::new(i as u32), s))
    }

    pub fn surface(&self, handle: SurfaceHandle) -> Result<&Surface, DisplayError> {
        let owner = self
            .surfaces
            .get(handle.index as usize)
            .ok_or(DisplayError::UnknownSurface(handle))?;
        if handle.attached {
            owner.back_buffer()
        } else {
            Ok(owner)
        }
    }

    fn surface_mut(&mut self, handle: SurfaceHandle) -> Result<&mut Surface, DisplayError> {
        let owner = self
            .surfaces
            .get_mut(handle.index as usize)
            .ok_or(DisplayError::UnknownSurface(handle))?;
        if handle.attached {
            owner.back_buffer_mut()
        } else {
            Ok(owner)
        }
    }

    pub fn write_pixels(&mut self, handle: SurfaceHandle, pixels: &[u8]) -> Result<(), DisplayError> {
        self.surface_mut(handle)?.write_pixels(pixels)
    }

    /// Returns the back buffer of a primary surface.
    pub fn get_attached(&self, handle: SurfaceHandle) -> Result<SurfaceHandle, DisplayError> {
        if handle.attached {
            return Err(DisplayError::NoBackBuffer);
        }
        self.surface(handle)?.back_buffer()?;
        Ok(SurfaceHandle {
            index: handle.index,
            attached: true,
        })
    }

    pub fn flip(&mut self, handle: SurfaceHandle) -> Result<(), DisplayError> {
        if handle.attached {
            return Err(DisplayError::NoBackBuffer);
        }
        self.surface_mut(handle)?.flip()
    }

    /// Copies a `w`x`h` rectangle from `src` at (`sx`, `sy`) onto `dst` at
    /// (`dx`, `dy`). The rectangle is clipped to both surfaces.
    #[allow(clippy::too_many_arguments)]
    pub fn bit_blt(
        &mut self,
        dst: SurfaceHandle,
        dx: u32,
        dy: u32,
        src: SurfaceHandle,
        sx: u32,
        sy: u32,
        w: u32,
        h: u32,
    ) -> Result<(), DisplayError> {
        let (w, h, rows) = self.surface(src)?.read_rect(sx, sy, w, h);
        self.surface_mut(dst)?.write_rect(dx, dy, w, h, &rows);
        Ok(())
    }
}

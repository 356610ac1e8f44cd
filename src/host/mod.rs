//! The synchronous boundary the execution engine calls into while it steps.
//!
//! Every method runs on the stepping thread, before `Engine::step` or
//! `Engine::step_many` returns, so the driver sees the mutations (exit code,
//! output, display state) as soon as the stepping call comes back.

mod clock;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::display::{
    Display, DisplayError, SurfaceHandle, SurfaceOptions, WindowHandle, WindowOptions,
};

pub use clock::{Clock, ManualClock, SystemClock};

pub trait Host {
    /// Terminates the guest program. Only the first code is kept.
    fn exit(&mut self, code: i32);
    fn exit_code(&self) -> Option<i32>;

    /// Appends decoded text to the output accumulator. Consumes the whole buffer.
    fn write(&mut self, bytes: &[u8]) -> usize;

    /// Monotonic wall-clock milliseconds.
    fn time(&self) -> u64;

    fn create_window(&mut self, options: WindowOptions) -> WindowHandle;
    /// Creates a surface; a primary surface is bound to `options.window` when given.
    fn create_surface(&mut self, options: &SurfaceOptions) -> Result<SurfaceHandle, DisplayError>;

    fn write_pixels(&mut self, surface: SurfaceHandle, pixels: &[u8]) -> Result<(), DisplayError>;
    fn get_attached(&mut self, surface: SurfaceHandle) -> Result<SurfaceHandle, DisplayError>;
    fn flip(&mut self, surface: SurfaceHandle) -> Result<(), DisplayError>;
    #[allow(clippy::too_many_arguments)]
    fn bit_blt(
        &mut self,
        dst: SurfaceHandle,
        dx: u32,
        dy: u32,
        src: SurfaceHandle,
        sx: u32,
        sy: u32,
        w: u32,
        h: u32,
    ) -> Result<(), DisplayError>;
}

/// Host-side state of one guest session.
pub struct HostState {
    exit_code: Option<i32>,
    output: String,
    display: Display,
    clock: Arc<dyn Clock>,
}

impl HostState {
    pub fn new(clock: Arc<dyn Clock>, bytes_per_pixel: u32) -> Self {
        Self {
            exit_code: None,
            output: String::new(),
            display: Display::new(bytes_per_pixel),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    /// Drains the output accumulated since the last call.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl Host for HostState {
    fn exit(&mut self, code: i32) {
        match self.exit_code {
            None => {
                info!(code, "guest exited");
                self.exit_code = Some(code);
            }
            Some(first) => warn!(first, code, "ignoring repeated exit"),
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        self.output.push_str(&String::from_utf8_lossy(bytes));
        bytes.len()
    }

    fn time(&self) -> u64 {
        self.clock.now_ms() as u64
    }

    fn create_window(&mut self, options: WindowOptions) -> WindowHandle {
        self.display.create_window(options)
    }

    fn create_surface(&mut self, options: &SurfaceOptions) -> Result<SurfaceHandle, DisplayError> {
        if let Some(window) = options.window {
            // Validate before allocating; a failed call creates no surface.
            let bound = self.display.window(window)?.surface();
            if options.primary && bound.is_some() {
                return Err(DisplayError::AlreadyBound(window));
            }
        }
        let surface = self
            .display
            .create_surface(options.width, options.height, options.primary)?;
        match (options.primary, options.window) {
            (true, Some(window)) => self.display.bind_surface(window, surface)?,
            (true, None) => debug!(?surface, "primary surface created without a window"),
            _ => {}
        }
        Ok(surface)
    }

    fn write_pixels(&mut self, surface: SurfaceHandle, pixels: &[u8]) -> Result<(), DisplayError> {
        self.display.write_pixels(surface, pixels)
    }

    fn get_attached(&mut self, surface: SurfaceHandle) -> Result<SurfaceHandle, DisplayError> {
        self.display.get_attached(surface)
    }

    fn flip(&mut self, surface: SurfaceHandle) -> Result<(), DisplayError> {
        self.display.flip(surface)
    }

    fn bit_blt(
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
        self.display.bit_blt(dst, dx, dy, src, sx, sy, w, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> (HostState, ManualClock) {
        let clock = ManualClock::new();
        (HostState::new(Arc::new(clock.clone()), 4), clock)
    }

    #[test]
    fn exit_keeps_first_code() {
        let (mut host, _) = host();
        host.exit(3);
        host.exit(7);
        assert_eq!(host.exit_code(), Some(3));
    }

    #[test]
    fn write_consumes_everything() {
        let (mut host, _) = host();
        assert_eq!(host.write(b"hello "), 6);
        assert_eq!(host.write(b"world"), 5);
        assert_eq!(host.take_output(), "hello world");
        assert_eq!(host.output(), "");
    }

    #[test]
    fn time_follows_clock() {
        let (host, clock) = host();
        clock.advance_ms(1234.0);
        assert_eq!(host.time(), 1234);
    }

    #[test]
    fn primary_surface_binds_to_given_window() {
        let (mut host, _) = host();
        let first = host.create_window(WindowOptions::default());
        let second = host.create_window(WindowOptions::default());
        let surface = host
            .create_surface(&SurfaceOptions {
                width: 4,
                height: 4,
                primary: true,
                window: Some(first),
            })
            .unwrap();

        assert_eq!(host.display().window(first).unwrap().surface(), Some(surface));
        assert_eq!(host.display().window(second).unwrap().surface(), None);
    }

    #[test]
    fn unknown_window_creates_nothing() {
        let (mut host, _) = host();
        let err = host
            .create_surface(&SurfaceOptions {
                width: 4,
                height: 4,
                primary: true,
                window: Some(WindowHandle(9)),
            })
            .unwrap_err();
        assert_eq!(err, DisplayError::UnknownWindow(WindowHandle(9)));
        assert_eq!(host.display().surfaces().count(), 0);
    }
}

use super::{DisplayError, MAX_SURFACE_BYTES};

/// A drawable pixel buffer.
///
/// A primary surface owns exactly one back buffer of identical dimensions,
/// created together with it and never replaced.
#[derive(Debug, Clone)]
pub struct Surface {
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    pixels: Vec<u8>,
    back_buffer: Option<Box<Surface>>,
}

impl Surface {
    pub fn new(
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        primary: bool,
    ) -> Result<Self, DisplayError> {
        let len = Self::byte_len(width, height, bytes_per_pixel)?;
        let back_buffer = if primary {
            Some(Box::new(Surface::new(width, height, bytes_per_pixel, false)?))
        } else {
            None
        };
        Ok(Self {
            width,
            height,
            bytes_per_pixel,
            pixels: vec![0; len],
            back_buffer,
        })
    }

    /// Size in bytes of a `width`x`height` pixel buffer, bounded by
    /// [`MAX_SURFACE_BYTES`].
    pub fn byte_len(width: u32, height: u32, bytes_per_pixel: u32) -> Result<usize, DisplayError> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(bytes_per_pixel as usize))
            .filter(|&n| n <= MAX_SURFACE_BYTES)
            .ok_or(DisplayError::TooLarge { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    pub fn is_primary(&self) -> bool {
        self.back_buffer.is_some()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    fn stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }

    pub fn back_buffer(&self) -> Result<&Surface, DisplayError> {
        self.back_buffer.as_deref().ok_or(DisplayError::NoBackBuffer)
    }

    pub fn back_buffer_mut(&mut self) -> Result<&mut Surface, DisplayError> {
        self.back_buffer
            .as_deref_mut()
            .ok_or(DisplayError::NoBackBuffer)
    }

    /// Replaces the full pixel contents. The buffer must cover every pixel.
    pub fn write_pixels(&mut self, pixels: &[u8]) -> Result<(), DisplayError> {
        if pixels.len() != self.pixels.len() {
            return Err(DisplayError::SizeMismatch {
                expected: self.pixels.len(),
                actual: pixels.len(),
            });
        }
        self.pixels.copy_from_slice(pixels);
        Ok(())
    }

    /// Presents the back buffer: its contents are copied onto this surface.
    pub fn flip(&mut self) -> Result<(), DisplayError> {
        let back = self
            .back_buffer
            .as_deref()
            .ok_or(DisplayError::NoBackBuffer)?;
        self.pixels.copy_from_slice(&back.pixels);
        Ok(())
    }

    /// Copies out a `w`x`h` rectangle at (`x`, `y`), clipped to this surface.
    /// Returns the clipped width and height along with the rows.
    pub(crate) fn read_rect(&self, x: u32, y: u32, w: u32, h: u32) -> (u32, u32, Vec<u8>) {
        let w = w.min(self.width.saturating_sub(x));
        let h = h.min(self.height.saturating_sub(y));
        if w == 0 || h == 0 {
            return (0, 0, Vec::new());
        }
        let bpp = self.bytes_per_pixel as usize;
        let row_len = w as usize * bpp;
        let mut out = Vec::with_capacity(row_len * h as usize);
        for row in 0..h as usize {
            let start = (y as usize + row) * self.stride() + x as usize * bpp;
            out.extend_from_slice(&self.pixels[start..start + row_len]);
        }
        (w, h, out)
    }

    /// Writes rows produced by `read_rect` at (`x`, `y`), clipped to this surface.
    pub(crate) fn write_rect(&mut self, x: u32, y: u32, w: u32, h: u32, rows: &[u8]) {
        let bpp = self.bytes_per_pixel as usize;
        let src_row_len = w as usize * bpp;
        let w = w.min(self.width.saturating_sub(x));
        let h = h.min(self.height.saturating_sub(y));
        if w == 0 || h == 0 {
            return;
        }
        let row_len = w as usize * bpp;
        let stride = self.stride();
        for row in 0..h as usize {
            let dst = (y as usize + row) * stride + x as usize * bpp;
            let src = row * src_row_len;
            self.pixels[dst..dst + row_len].copy_from_slice(&rows[src..src + row_len]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_owns_matching_back_buffer() {
        let surface = Surface::new(64, 32, 4, true).unwrap();
        let back = surface.back_buffer().unwrap();
        assert_eq!((back.width(), back.height()), (64, 32));
        assert!(!back.is_primary());
    }

    #[test]
    fn write_pixels_rejects_wrong_length() {
        let mut surface = Surface::new(2, 2, 4, false).unwrap();
        assert_eq!(
            surface.write_pixels(&[0; 15]),
            Err(DisplayError::SizeMismatch {
                expected: 16,
                actual: 15
            })
        );
        assert!(surface.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn read_rect_clips_to_bounds() {
        let surface = Surface::new(4, 4, 1, false).unwrap();
        let (w, h, rows) = surface.read_rect(3, 2, 5, 5);
        assert_eq!((w, h), (1, 2));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn rect_past_the_edge_is_empty() {
        let mut surface = Surface::new(4, 4, 4, false).unwrap();
        assert_eq!(surface.read_rect(10, 3, 2, 1), (0, 0, Vec::new()));
        assert_eq!(surface.read_rect(0, 9, 2, 1), (0, 0, Vec::new()));
        surface.write_rect(10, 3, 2, 1, &[0xff; 8]);
        surface.write_rect(1, 4, 2, 1, &[0xff; 8]);
        assert!(surface.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_surface_is_rejected() {
        assert_eq!(
            Surface::new(u32::MAX, u32::MAX, 4, true).unwrap_err(),
            DisplayError::TooLarge {
                width: u32::MAX,
                height: u32::MAX
            }
        );
        assert!(Surface::byte_len(640, 480, 4).is_ok());
    }
}

//! The framebuffer collaborator boundary.
//!
//! The session drives decoding but never owns pixel storage itself — it
//! reports decoded rectangles and cursor updates to whatever the host
//! chooses to back them with (a GPU texture, a `Vec<u8>`, a headless
//! test sink). Mirrors the plain-trait callback boundaries used for
//! diagnostics elsewhere in the workspace rather than a channel of its
//! own; the session's `SessionEvent`s already give hosts an async-safe
//! alternative when a callback isn't convenient.

use crate::vnc::types::PixelFormat;

/// A rectangle of decoded truecolour pixels, always 4 bytes (RGBA) per
/// pixel regardless of the wire pixel format's depth.
pub trait Framebuffer: Send {
    /// Resize the backing store. Called once after ServerInit and again
    /// on any DesktopSize/ExtendedDesktopSize pseudo-encoding.
    fn resize(&mut self, width: u16, height: u16);

    /// Blit a decoded rectangle of RGBA pixels at (x, y).
    fn blit(&mut self, x: u16, y: u16, width: u16, height: u16, rgba: &[u8]);

    /// Fill a rectangle with a single RGBA colour (RRE/Hextile/Tight fills).
    fn fill(&mut self, x: u16, y: u16, width: u16, height: u16, rgba: [u8; 4]);

    /// Copy a rectangle from elsewhere in the same framebuffer (CopyRect).
    fn copy_within(&mut self, src_x: u16, src_y: u16, dst_x: u16, dst_y: u16, width: u16, height: u16);

    /// The server pushed a new PixelFormat mid-session (WMVi pseudo-encoding).
    fn set_pixel_format(&mut self, _format: &PixelFormat) {}

    /// SetColourMapEntries (message type 1): `first_colour` is the index of
    /// the first replaced entry, each tuple is (red, green, blue) at
    /// 16-bit range. Hosts backed by a true-colour store can ignore this.
    fn set_colour_map_entries(&mut self, _first_colour: u16, _colours: &[(u16, u16, u16)]) {}
}

/// A trivial in-memory [`Framebuffer`] used by tests and headless hosts.
#[derive(Debug, Clone)]
pub struct RgbaBuffer {
    pub width: u16,
    pub height: u16,
    pub pixels: Vec<u8>,
}

impl RgbaBuffer {
    pub fn new(width: u16, height: u16) -> Self {
        let mut buf = Self { width, height, pixels: Vec::new() };
        buf.resize(width, height);
        buf
    }
}

impl Framebuffer for RgbaBuffer {
    fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.pixels = vec![0u8; width as usize * height as usize * 4];
    }

    fn blit(&mut self, x: u16, y: u16, width: u16, height: u16, rgba: &[u8]) {
        let dst_w = self.width as usize;
        for row in 0..height as usize {
            let src_start = row * width as usize * 4;
            let dst_start = ((y as usize + row) * dst_w + x as usize) * 4;
            let len = width as usize * 4;
            if src_start + len <= rgba.len() && dst_start + len <= self.pixels.len() {
                self.pixels[dst_start..dst_start + len]
                    .copy_from_slice(&rgba[src_start..src_start + len]);
            }
        }
    }

    fn fill(&mut self, x: u16, y: u16, width: u16, height: u16, rgba: [u8; 4]) {
        let dst_w = self.width as usize;
        for row in y as usize..(y as usize + height as usize) {
            for col in x as usize..(x as usize + width as usize) {
                let idx = (row * dst_w + col) * 4;
                if idx + 4 <= self.pixels.len() {
                    self.pixels[idx..idx + 4].copy_from_slice(&rgba);
                }
            }
        }
    }

    fn copy_within(&mut self, src_x: u16, src_y: u16, dst_x: u16, dst_y: u16, width: u16, height: u16) {
        let dst_w = self.width as usize;
        let mut tmp = vec![0u8; width as usize * height as usize * 4];
        for row in 0..height as usize {
            let src_start = ((src_y as usize + row) * dst_w + src_x as usize) * 4;
            let len = width as usize * 4;
            if src_start + len <= self.pixels.len() {
                tmp[row * len..row * len + len].copy_from_slice(&self.pixels[src_start..src_start + len]);
            }
        }
        self.blit(dst_x, dst_y, width, height, &tmp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_allocates_zeroed_buffer() {
        let buf = RgbaBuffer::new(4, 4);
        assert_eq!(buf.pixels.len(), 4 * 4 * 4);
        assert!(buf.pixels.iter().all(|&b| b == 0));
    }

    #[test]
    fn fill_sets_region() {
        let mut buf = RgbaBuffer::new(4, 4);
        buf.fill(1, 1, 2, 2, [255, 0, 0, 255]);
        let idx = (1 * 4 + 1) * 4;
        assert_eq!(&buf.pixels[idx..idx + 4], &[255, 0, 0, 255]);
        assert_eq!(&buf.pixels[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn copy_within_moves_region() {
        let mut buf = RgbaBuffer::new(4, 4);
        buf.fill(0, 0, 2, 2, [1, 2, 3, 4]);
        buf.copy_within(0, 0, 2, 2, 2, 2);
        let idx = (2 * 4 + 2) * 4;
        assert_eq!(&buf.pixels[idx..idx + 4], &[1, 2, 3, 4]);
    }
}

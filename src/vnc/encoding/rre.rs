//! RRE encoding (type 2): a background colour plus a flat list of
//! solid-colour subrectangles.

use crate::vnc::encoding::pixel_to_rgba;
use crate::vnc::error::VncError;
use crate::vnc::framebuffer::Framebuffer;
use crate::vnc::types::PixelFormat;

pub fn decode(
    fb: &mut dyn Framebuffer,
    x: u16,
    y: u16,
    width: u16,
    height: u16,
    data: &[u8],
    pf: &PixelFormat,
) -> Result<(), VncError> {
    let bpp = pf.bytes_per_pixel();
    if data.len() < 4 + bpp {
        return Err(VncError::decode("RRE header truncated"));
    }

    let num_subrects = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let bg = pixel_to_rgba(&data[4..4 + bpp], pf);
    fb.fill(x, y, width, height, bg);

    let subrect_size = bpp + 8;
    let mut offset = 4 + bpp;
    for _ in 0..num_subrects {
        if offset + subrect_size > data.len() {
            return Err(VncError::decode("RRE subrect truncated"));
        }
        let colour = pixel_to_rgba(&data[offset..offset + bpp], pf);
        let o2 = offset + bpp;
        let sx = u16::from_be_bytes([data[o2], data[o2 + 1]]);
        let sy = u16::from_be_bytes([data[o2 + 2], data[o2 + 3]]);
        let sw = u16::from_be_bytes([data[o2 + 4], data[o2 + 5]]);
        let sh = u16::from_be_bytes([data[o2 + 6], data[o2 + 7]]);
        fb.fill(x + sx, y + sy, sw, sh, colour);
        offset += subrect_size;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vnc::framebuffer::RgbaBuffer;

    #[test]
    fn fills_background_with_no_subrects() {
        let pf = PixelFormat::rgba32();
        let mut fb = RgbaBuffer::new(2, 2);
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&[0xFF, 0x00, 0x00, 0x00]); // blue LE
        decode(&mut fb, 0, 0, 2, 2, &data, &pf).unwrap();
        assert_eq!(fb.pixels[2], 255); // B channel
    }

    #[test]
    fn applies_one_subrect_over_background() {
        let pf = PixelFormat::rgba32();
        let mut fb = RgbaBuffer::new(2, 2);
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&[0, 0, 0, 0]); // black bg
        data.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0x00]); // white subrect pixel
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        decode(&mut fb, 0, 0, 2, 2, &data, &pf).unwrap();
        assert_eq!(&fb.pixels[0..4], &[255, 255, 255, 255]);
        assert_eq!(&fb.pixels[4..8], &[0, 0, 0, 255]);
    }

    #[test]
    fn rejects_truncated_header() {
        let pf = PixelFormat::rgba32();
        let mut fb = RgbaBuffer::new(1, 1);
        assert!(decode(&mut fb, 0, 0, 1, 1, &[0; 3], &pf).is_err());
    }
}

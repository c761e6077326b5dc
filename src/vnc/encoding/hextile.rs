//! Hextile encoding (type 5): the rectangle is divided into 16×16 tiles,
//! each independently flagged as raw, background/foreground fill, or a
//! list of coloured subrectangles.

use crate::vnc::encoding::{convert_to_rgba, pixel_to_rgba};
use crate::vnc::error::VncError;
use crate::vnc::framebuffer::Framebuffer;
use crate::vnc::types::PixelFormat;

pub(crate) const RAW: u8 = 1;
pub(crate) const BG_SPECIFIED: u8 = 2;
pub(crate) const FG_SPECIFIED: u8 = 4;
pub(crate) const ANY_SUBRECTS: u8 = 8;
pub(crate) const SUBRECTS_COLOURED: u8 = 16;

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
    let w = width as usize;
    let h = height as usize;

    let mut bg = [0u8; 4];
    let mut fg = [0u8; 4];
    let mut offset = 0;

    let tiles_x = (w + 15) / 16;
    let tiles_y = (h + 15) / 16;

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let tile_x = tx * 16;
            let tile_y = ty * 16;
            let tile_w = std::cmp::min(16, w - tile_x) as u16;
            let tile_h = std::cmp::min(16, h - tile_y) as u16;
            let abs_x = x + tile_x as u16;
            let abs_y = y + tile_y as u16;

            let flags = *data.get(offset).ok_or_else(|| VncError::decode("Hextile sub-encoding byte truncated"))?;
            offset += 1;

            if flags & RAW != 0 {
                let raw_size = tile_w as usize * tile_h as usize * bpp;
                let chunk = data
                    .get(offset..offset + raw_size)
                    .ok_or_else(|| VncError::decode("Hextile raw tile truncated"))?;
                let rgba = convert_to_rgba(chunk, pf);
                fb.blit(abs_x, abs_y, tile_w, tile_h, &rgba);
                offset += raw_size;
                continue;
            }

            if flags & BG_SPECIFIED != 0 {
                let chunk = data
                    .get(offset..offset + bpp)
                    .ok_or_else(|| VncError::decode("Hextile bg pixel truncated"))?;
                bg = pixel_to_rgba(chunk, pf);
                offset += bpp;
            }
            fb.fill(abs_x, abs_y, tile_w, tile_h, bg);

            if flags & FG_SPECIFIED != 0 {
                let chunk = data
                    .get(offset..offset + bpp)
                    .ok_or_else(|| VncError::decode("Hextile fg pixel truncated"))?;
                fg = pixel_to_rgba(chunk, pf);
                offset += bpp;
            }

            if flags & ANY_SUBRECTS != 0 {
                let count = *data.get(offset).ok_or_else(|| VncError::decode("Hextile subrect count truncated"))?;
                offset += 1;

                for _ in 0..count {
                    let colour = if flags & SUBRECTS_COLOURED != 0 {
                        let chunk = data
                            .get(offset..offset + bpp)
                            .ok_or_else(|| VncError::decode("Hextile subrect pixel truncated"))?;
                        offset += bpp;
                        pixel_to_rgba(chunk, pf)
                    } else {
                        fg
                    };

                    let xy = *data.get(offset).ok_or_else(|| VncError::decode("Hextile subrect coords truncated"))?;
                    let wh = *data.get(offset + 1).ok_or_else(|| VncError::decode("Hextile subrect coords truncated"))?;
                    offset += 2;

                    let sx = (xy >> 4) as u16;
                    let sy = (xy & 0x0F) as u16;
                    let sw = ((wh >> 4) + 1) as u16;
                    let sh = ((wh & 0x0F) + 1) as u16;
                    fb.fill(abs_x + sx, abs_y + sy, sw, sh, colour);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vnc::framebuffer::RgbaBuffer;

    #[test]
    fn decodes_raw_tile() {
        let pf = PixelFormat::rgba32();
        let mut fb = RgbaBuffer::new(2, 2);
        let mut data = Vec::new();
        data.push(RAW);
        data.extend_from_slice(&vec![0u8; 2 * 2 * 4]);
        decode(&mut fb, 0, 0, 2, 2, &data, &pf).unwrap();
        assert_eq!(fb.pixels.len(), 16);
    }

    #[test]
    fn decodes_bg_only_tile() {
        let pf = PixelFormat::rgba32();
        let mut fb = RgbaBuffer::new(2, 2);
        let mut data = Vec::new();
        data.push(BG_SPECIFIED);
        data.extend_from_slice(&[0xFF, 0x00, 0x00, 0x00]); // blue LE
        decode(&mut fb, 0, 0, 2, 2, &data, &pf).unwrap();
        assert_eq!(fb.pixels[2], 255);
    }

    #[test]
    fn decodes_coloured_subrect() {
        let pf = PixelFormat::rgba32();
        let mut fb = RgbaBuffer::new(16, 16);
        let mut data = Vec::new();
        data.push(BG_SPECIFIED | ANY_SUBRECTS | SUBRECTS_COLOURED);
        data.extend_from_slice(&[0, 0, 0, 0]); // black bg
        data.push(1); // 1 subrect
        data.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0x00]); // white
        data.push(0x00); // xy = 0,0
        data.push(0x00); // wh = 1,1
        decode(&mut fb, 0, 0, 16, 16, &data, &pf).unwrap();
        assert_eq!(&fb.pixels[0..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn rejects_truncated_flags_byte() {
        let pf = PixelFormat::rgba32();
        let mut fb = RgbaBuffer::new(16, 16);
        assert!(decode(&mut fb, 0, 0, 16, 16, &[], &pf).is_err());
    }
}

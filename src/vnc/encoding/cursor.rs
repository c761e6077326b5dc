//! RichCursor and XCursor pseudo-encodings: a server-rendered cursor
//! image sent as a rectangle whose `x, y` are the hotspot rather than a
//! screen position.

use crate::vnc::encoding::pixel_to_rgba;
use crate::vnc::error::VncError;
use crate::vnc::types::PixelFormat;

/// A decoded cursor image: RGBA pixels plus the click hotspot.
pub struct CursorImage {
    pub width: u16,
    pub height: u16,
    pub hotspot_x: u16,
    pub hotspot_y: u16,
    pub rgba: Vec<u8>,
}

fn mask_row_bytes(width: u16) -> usize {
    (width as usize + 7) / 8
}

/// RichCursor: `width*height` pixels in the current pixel format,
/// followed by a 1-bpp row-padded-to-byte transparency bitmask.
pub fn decode_rich_cursor(
    hotspot_x: u16,
    hotspot_y: u16,
    width: u16,
    height: u16,
    data: &[u8],
    pf: &PixelFormat,
) -> Result<CursorImage, VncError> {
    let bpp = pf.bytes_per_pixel();
    let pixel_bytes = width as usize * height as usize * bpp;
    let mask_bytes = mask_row_bytes(width) * height as usize;
    if data.len() < pixel_bytes + mask_bytes {
        return Err(VncError::decode("RichCursor data truncated"));
    }

    let pixel_data = &data[..pixel_bytes];
    let mask_data = &data[pixel_bytes..pixel_bytes + mask_bytes];
    let mask_stride = mask_row_bytes(width);

    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for row in 0..height as usize {
        for col in 0..width as usize {
            let pix_off = (row * width as usize + col) * bpp;
            let mut colour = pixel_to_rgba(&pixel_data[pix_off..pix_off + bpp], pf);
            let bit = (mask_data[row * mask_stride + col / 8] >> (7 - col % 8)) & 1;
            colour[3] = if bit != 0 { 255 } else { 0 };
            rgba.extend_from_slice(&colour);
        }
    }

    Ok(CursorImage { width, height, hotspot_x, hotspot_y, rgba })
}

/// XCursor: two RGB colours (primary, secondary), then a 1-bpp
/// colour-selection bitmap, then a 1-bpp transparency bitmask — both
/// row-padded to a byte boundary.
pub fn decode_xcursor(
    hotspot_x: u16,
    hotspot_y: u16,
    width: u16,
    height: u16,
    data: &[u8],
) -> Result<CursorImage, VncError> {
    if data.len() < 6 {
        return Err(VncError::decode("XCursor colour header truncated"));
    }
    let primary = [data[0], data[1], data[2], 255];
    let secondary = [data[3], data[4], data[5], 255];

    let stride = mask_row_bytes(width);
    let plane_bytes = stride * height as usize;
    if data.len() < 6 + 2 * plane_bytes {
        return Err(VncError::decode("XCursor bitmap/mask truncated"));
    }
    let bitmap = &data[6..6 + plane_bytes];
    let mask = &data[6 + plane_bytes..6 + 2 * plane_bytes];

    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for row in 0..height as usize {
        for col in 0..width as usize {
            let byte_idx = row * stride + col / 8;
            let bit_idx = 7 - col % 8;
            let selected = (bitmap[byte_idx] >> bit_idx) & 1;
            let visible = (mask[byte_idx] >> bit_idx) & 1;
            let mut colour = if selected != 0 { secondary } else { primary };
            colour[3] = if visible != 0 { 255 } else { 0 };
            rgba.extend_from_slice(&colour);
        }
    }

    Ok(CursorImage { width, height, hotspot_x, hotspot_y, rgba })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rich_cursor_decodes_2x2_fully_opaque() {
        let pf = PixelFormat::rgba32();
        let mut data = Vec::new();
        data.extend_from_slice(&vec![0u8; 2 * 2 * 4]); // 4 black pixels
        data.extend_from_slice(&[0b1100_0000, 0b1100_0000]); // both rows fully covered in top 2 bits
        let img = decode_rich_cursor(1, 1, 2, 2, &data, &pf).unwrap();
        assert_eq!(img.rgba.len(), 2 * 2 * 4);
        assert_eq!(img.rgba[3], 255); // top-left alpha
        assert_eq!(img.hotspot_x, 1);
    }

    #[test]
    fn rich_cursor_rejects_truncated_data() {
        let pf = PixelFormat::rgba32();
        assert!(decode_rich_cursor(0, 0, 4, 4, &[0; 2], &pf).is_err());
    }

    #[test]
    fn xcursor_selects_primary_and_secondary() {
        let mut data = Vec::new();
        data.extend_from_slice(&[255, 0, 0]); // primary = red
        data.extend_from_slice(&[0, 255, 0]); // secondary = green
        data.push(0b1000_0000); // bitmap: first pixel selects secondary
        data.push(0b1111_1111); // mask: fully visible
        let img = decode_xcursor(0, 0, 8, 1, &data).unwrap();
        assert_eq!(&img.rgba[0..4], &[0, 255, 0, 255]); // secondary (green)
        assert_eq!(&img.rgba[4..8], &[255, 0, 0, 255]); // primary (red)
    }

    #[test]
    fn xcursor_rejects_short_header() {
        assert!(decode_xcursor(0, 0, 8, 1, &[1, 2]).is_err());
    }
}

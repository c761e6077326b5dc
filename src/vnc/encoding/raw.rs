//! Raw encoding (type 0): pixel data sent verbatim, row-major.

use crate::vnc::encoding::{convert_to_rgba, raw_data_size};
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
    let expected = raw_data_size(width, height, pf);
    if data.len() < expected {
        return Err(VncError::decode(format!(
            "Raw rect truncated: expected {expected} bytes, got {}",
            data.len()
        )));
    }
    let rgba = convert_to_rgba(&data[..expected], pf);
    fb.blit(x, y, width, height, &rgba);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vnc::framebuffer::RgbaBuffer;

    #[test]
    fn decodes_into_framebuffer() {
        let pf = PixelFormat::rgba32();
        let mut fb = RgbaBuffer::new(2, 2);
        let data = vec![0u8; 2 * 2 * 4];
        decode(&mut fb, 0, 0, 2, 2, &data, &pf).unwrap();
        assert_eq!(fb.pixels.len(), 16);
    }

    #[test]
    fn rejects_truncated_data() {
        let pf = PixelFormat::rgba32();
        let mut fb = RgbaBuffer::new(10, 10);
        let data = vec![0u8; 10];
        assert!(decode(&mut fb, 0, 0, 10, 10, &data, &pf).is_err());
    }
}

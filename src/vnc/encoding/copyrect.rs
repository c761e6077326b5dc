//! CopyRect encoding (type 1): copy a same-size rectangle from elsewhere
//! in the framebuffer. 4 bytes: src_x, src_y (both u16 BE).

use crate::vnc::error::VncError;
use crate::vnc::framebuffer::Framebuffer;

pub fn decode(
    fb: &mut dyn Framebuffer,
    dst_x: u16,
    dst_y: u16,
    width: u16,
    height: u16,
    data: &[u8],
) -> Result<(), VncError> {
    let (src_x, src_y) = parse_source(data)?;
    fb.copy_within(src_x, src_y, dst_x, dst_y, width, height);
    Ok(())
}

/// Parse the (src_x, src_y) header without touching the framebuffer —
/// useful for tests and for callers that batch copies.
pub fn parse_source(data: &[u8]) -> Result<(u16, u16), VncError> {
    if data.len() < 4 {
        return Err(VncError::decode("CopyRect source header truncated"));
    }
    let src_x = u16::from_be_bytes([data[0], data[1]]);
    let src_y = u16::from_be_bytes([data[2], data[3]]);
    Ok((src_x, src_y))
}

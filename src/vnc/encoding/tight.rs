//! Tight encoding (type 7): a compression-control byte selects one of
//! four zlib contexts plus a per-rectangle behaviour — basic (copy,
//! palette, or gradient filtered pixel data), a one-pixel solid fill,
//! or a JPEG-compressed rectangle (§4.6.1).

use crate::vnc::encoding::gradient;
use crate::vnc::error::VncError;
use crate::vnc::framebuffer::Framebuffer;
use crate::vnc::protocol::{decode_cint, decode_tpixel, encode_tpixel, tpixel_len};
use crate::vnc::types::PixelFormat;
use crate::vnc::zlib::TightZlibPool;

pub(crate) const FILTER_COPY: u8 = 0;
pub(crate) const FILTER_PALETTE: u8 = 1;
pub(crate) const FILTER_GRADIENT: u8 = 2;

pub(crate) const SUBENCODING_FILL: u8 = 0x08;
pub(crate) const SUBENCODING_JPEG: u8 = 0x09;

/// Decode a Tight rectangle. `data` is everything the rectangle owns on
/// the wire starting at the compression-control byte; `pool` holds the
/// four persistent inflate contexts the control byte's reset-flags
/// nibble and stream-id bits select between.
pub fn decode(
    fb: &mut dyn Framebuffer,
    x: u16,
    y: u16,
    width: u16,
    height: u16,
    data: &[u8],
    pf: &PixelFormat,
    pool: &mut TightZlibPool,
) -> Result<(), VncError> {
    let mut cursor = 0usize;
    let control = *data.get(cursor).ok_or_else(|| VncError::decode("Tight control byte truncated"))?;
    cursor += 1;

    for i in 0..4 {
        if control & (0x10 << i) != 0 {
            pool.reset(i)?;
        }
    }

    let low = control & 0x0F;

    if low & SUBENCODING_FILL != 0 && low != SUBENCODING_JPEG {
        // Solid fill: one TPIXEL, no stream/filter bits apply.
        let len = tpixel_len(pf);
        let chunk = data
            .get(cursor..cursor + len)
            .ok_or_else(|| VncError::decode("Tight fill pixel truncated"))?;
        let (r, g, b) = decode_tpixel(pf, chunk)?;
        fb.fill(x, y, width, height, [r, g, b, 255]);
        return Ok(());
    }

    if low == SUBENCODING_JPEG {
        let (jpeg_len, n) = decode_cint(&data[cursor..]).map_err(VncError::decode)?;
        let jpeg_len = jpeg_len as usize;
        cursor += n;
        let jpeg_bytes = data
            .get(cursor..cursor + jpeg_len)
            .ok_or_else(|| VncError::decode("Tight JPEG payload truncated"))?;
        let rgba = decode_jpeg(jpeg_bytes, width as u32, height as u32)?;
        fb.blit(x, y, width, height, &rgba);
        return Ok(());
    }

    // Basic: low bits 0-1 select which of the four zlib streams carries
    // this rectangle's data; bit 2 says an explicit filter byte follows
    // (absent, the filter defaults to Copy).
    let stream_id = (low & 0x03) as usize;
    let explicit_filter = low & 0x04 != 0;
    let filter = if explicit_filter {
        let f = *data.get(cursor).ok_or_else(|| VncError::decode("Tight filter byte truncated"))?;
        cursor += 1;
        f
    } else {
        FILTER_COPY
    };

    let tpixel_bytes = tpixel_len(pf);
    let pixel_count = width as usize * height as usize;

    match filter {
        FILTER_PALETTE => {
            let count_minus_one = *data.get(cursor).ok_or_else(|| VncError::decode("Tight palette size truncated"))?;
            cursor += 1;
            let palette_size = count_minus_one as usize + 1;
            let palette_bytes = palette_size * tpixel_bytes;
            let palette_data = data
                .get(cursor..cursor + palette_bytes)
                .ok_or_else(|| VncError::decode("Tight palette truncated"))?;
            cursor += palette_bytes;

            let mut palette = Vec::with_capacity(palette_size);
            for chunk in palette_data.chunks_exact(tpixel_bytes) {
                let (r, g, b) = decode_tpixel(pf, chunk)?;
                palette.push([r, g, b, 255]);
            }

            let index_bits = if palette_size <= 2 { 1 } else { 8 };
            let row_bytes = (width as usize * index_bits + 7) / 8;
            let index_bytes = row_bytes * height as usize;

            let indices = read_filtered_stream(data, &mut cursor, index_bytes, stream_id, pool)?;
            let rgba = unpack_palette_indices(&indices, width as usize, height as usize, index_bits, &palette)?;
            fb.blit(x, y, width, height, &rgba);
        }
        FILTER_GRADIENT => {
            let raw_bytes = pixel_count * tpixel_bytes;
            let mut filtered = read_filtered_stream(data, &mut cursor, raw_bytes, stream_id, pool)?;
            gradient::unfilter(&mut filtered, width as usize, height as usize, tpixel_bytes);
            let rgba = tpixels_to_rgba(&filtered, tpixel_bytes, pf)?;
            fb.blit(x, y, width, height, &rgba);
        }
        // FILTER_COPY, or any unrecognised filter id: treat as uncoded.
        _ => {
            let raw_bytes = pixel_count * tpixel_bytes;
            let filtered = read_filtered_stream(data, &mut cursor, raw_bytes, stream_id, pool)?;
            let rgba = tpixels_to_rgba(&filtered, tpixel_bytes, pf)?;
            fb.blit(x, y, width, height, &rgba);
        }
    }

    Ok(())
}

/// Read the filter's raw byte stream: `cint`-length-prefixed and
/// zlib-compressed when it's 12 bytes or more, otherwise sent as-is.
fn read_filtered_stream(
    data: &[u8],
    cursor: &mut usize,
    expected_len: usize,
    stream_id: usize,
    pool: &mut TightZlibPool,
) -> Result<Vec<u8>, VncError> {
    if expected_len >= 12 {
        let (compressed_len, n) = decode_cint(&data[*cursor..]).map_err(VncError::decode)?;
        let compressed_len = compressed_len as usize;
        *cursor += n;
        let compressed = data
            .get(*cursor..*cursor + compressed_len)
            .ok_or_else(|| VncError::decode("Tight compressed payload truncated"))?;
        *cursor += compressed_len;
        let mut out = Vec::with_capacity(expected_len);
        pool.inflate(stream_id, compressed, &mut out)?;
        Ok(out)
    } else {
        let raw = data
            .get(*cursor..*cursor + expected_len)
            .ok_or_else(|| VncError::decode("Tight uncompressed payload truncated"))?
            .to_vec();
        *cursor += expected_len;
        Ok(raw)
    }
}

fn tpixels_to_rgba(data: &[u8], tpixel_bytes: usize, pf: &PixelFormat) -> Result<Vec<u8>, VncError> {
    let mut out = Vec::with_capacity((data.len() / tpixel_bytes) * 4);
    for chunk in data.chunks_exact(tpixel_bytes) {
        let (r, g, b) = decode_tpixel(pf, chunk)?;
        out.extend_from_slice(&[r, g, b, 255]);
    }
    Ok(out)
}

fn unpack_palette_indices(
    indices: &[u8],
    width: usize,
    height: usize,
    bits: usize,
    palette: &[[u8; 4]],
) -> Result<Vec<u8>, VncError> {
    let row_bytes = (width * bits + 7) / 8;
    let mut out = Vec::with_capacity(width * height * 4);

    for row in 0..height {
        let row_data = indices
            .get(row * row_bytes..row * row_bytes + row_bytes)
            .ok_or_else(|| VncError::decode("Tight palette index row truncated"))?;
        for col in 0..width {
            let index = extract_index(row_data, col, bits);
            let colour = palette
                .get(index)
                .copied()
                .ok_or_else(|| VncError::decode("Tight palette index out of range"))?;
            out.extend_from_slice(&colour);
        }
    }
    Ok(out)
}

fn extract_index(row: &[u8], col: usize, bits: usize) -> usize {
    if bits == 1 {
        let byte = row[col / 8];
        ((byte >> (7 - col % 8)) & 0x01) as usize
    } else {
        row[col] as usize
    }
}

fn decode_jpeg(bytes: &[u8], width: u32, height: u32) -> Result<Vec<u8>, VncError> {
    let img = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .map_err(|e| VncError::decode(format!("Tight JPEG decode failed: {e}")))?;
    let rgba = img.to_rgba8();
    if rgba.width() != width || rgba.height() != height {
        return Err(VncError::decode(format!(
            "Tight JPEG dimensions {}x{} do not match rectangle {}x{}",
            rgba.width(),
            rgba.height(),
            width,
            height
        )));
    }
    Ok(rgba.into_raw())
}

/// Re-encode a TPIXEL solid fill subencoding — used by tests to build
/// fixtures that exercise the decoder against [`encode_tpixel`].
#[cfg(test)]
fn fill_bytes(pf: &PixelFormat, r: u8, g: u8, b: u8) -> Vec<u8> {
    let mut out = vec![SUBENCODING_FILL];
    out.extend_from_slice(&encode_tpixel(pf, r, g, b));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vnc::encoding::gradient::filter as gradient_filter;
    use crate::vnc::framebuffer::RgbaBuffer;
    use crate::vnc::protocol::encode_cint;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn decodes_solid_fill() {
        let pf = PixelFormat::rgba32();
        let data = fill_bytes(&pf, 9, 99, 199);
        let mut fb = RgbaBuffer::new(4, 4);
        let mut pool = TightZlibPool::new();
        decode(&mut fb, 0, 0, 4, 4, &data, &pf, &mut pool).unwrap();
        assert_eq!(&fb.pixels[0..4], &[9, 99, 199, 255]);
        assert_eq!(&fb.pixels[fb.pixels.len() - 4..], &[9, 99, 199, 255]);
    }

    #[test]
    fn decodes_uncompressed_copy_rect_below_compress_threshold() {
        // 2x2 rect at bpp 3 = 12 bytes, right at the compress threshold,
        // so pick a 1x3 rect (9 bytes) to exercise the "< 12" branch.
        let pf = PixelFormat::rgba32();
        let mut data = vec![0u8]; // control: stream 0, no explicit filter -> Copy
        for _ in 0..3 {
            data.extend_from_slice(&encode_tpixel(&pf, 1, 2, 3));
        }
        let mut fb = RgbaBuffer::new(1, 3);
        let mut pool = TightZlibPool::new();
        decode(&mut fb, 0, 0, 1, 3, &data, &pf, &mut pool).unwrap();
        assert_eq!(&fb.pixels[0..4], &[1, 2, 3, 255]);
        assert_eq!(&fb.pixels[8..12], &[1, 2, 3, 255]);
    }

    #[test]
    fn decodes_compressed_copy_rect_at_or_above_threshold() {
        let pf = PixelFormat::rgba32();
        let width = 4u16;
        let height = 4u16;
        let mut raw = Vec::new();
        for _ in 0..(width as usize * height as usize) {
            raw.extend_from_slice(&encode_tpixel(&pf, 4, 5, 6));
        }
        let compressed = compress(&raw);
        let mut data = vec![0u8]; // control byte: stream 0, Copy filter
        data.extend_from_slice(&encode_cint(compressed.len() as u32));
        data.extend_from_slice(&compressed);

        let mut fb = RgbaBuffer::new(width, height);
        let mut pool = TightZlibPool::new();
        decode(&mut fb, 0, 0, width, height, &data, &pf, &mut pool).unwrap();
        assert_eq!(&fb.pixels[0..4], &[4, 5, 6, 255]);
    }

    #[test]
    fn decodes_palette_filter_two_colours() {
        let pf = PixelFormat::rgba32();
        // 4x1 rect, 2-colour palette -> 1-bit indices, row_bytes = 1 (< 12 uncompressed).
        let control = 0x04u8; // explicit filter bit set, stream 0
        let mut data = vec![control, FILTER_PALETTE];
        data.push(1); // count - 1 = 1 -> 2 colours
        data.extend_from_slice(&encode_tpixel(&pf, 255, 0, 0));
        data.extend_from_slice(&encode_tpixel(&pf, 0, 255, 0));
        data.push(0b1010_0000); // indices: 1,0,1,0

        let mut fb = RgbaBuffer::new(4, 1);
        let mut pool = TightZlibPool::new();
        decode(&mut fb, 0, 0, 4, 1, &data, &pf, &mut pool).unwrap();
        assert_eq!(&fb.pixels[0..4], &[0, 255, 0, 255]);
        assert_eq!(&fb.pixels[4..8], &[255, 0, 0, 255]);
        assert_eq!(&fb.pixels[8..12], &[0, 255, 0, 255]);
        assert_eq!(&fb.pixels[12..16], &[255, 0, 0, 255]);
    }

    #[test]
    fn decodes_gradient_filter() {
        let pf = PixelFormat::rgba32();
        let width = 2usize;
        let height = 2usize;
        let mut plane = Vec::new();
        for _ in 0..(width * height) {
            plane.extend_from_slice(&encode_tpixel(&pf, 10, 20, 30));
        }
        let filtered = gradient_filter(&plane, width, height, 3);

        let control = 0x04u8; // explicit filter, stream 0
        let mut data = vec![control, FILTER_GRADIENT];
        data.extend_from_slice(&filtered);

        let mut fb = RgbaBuffer::new(width as u16, height as u16);
        let mut pool = TightZlibPool::new();
        decode(&mut fb, 0, 0, width as u16, height as u16, &data, &pf, &mut pool).unwrap();
        assert_eq!(&fb.pixels[0..4], &[10, 20, 30, 255]);
        assert_eq!(&fb.pixels[12..16], &[10, 20, 30, 255]);
    }

    #[test]
    fn reset_flags_reset_the_selected_stream() {
        let pf = PixelFormat::rgba32();
        let raw = {
            let mut v = Vec::new();
            for _ in 0..16 {
                v.extend_from_slice(&encode_tpixel(&pf, 1, 1, 1));
            }
            v
        };
        let compressed = compress(&raw);

        // control byte: reset stream 2 (bit 6 = 0x40), use stream 2 (low bits = 2)
        let control = 0x40u8 | 0x02;
        let mut data = vec![control];
        data.extend_from_slice(&encode_cint(compressed.len() as u32));
        data.extend_from_slice(&compressed);

        let mut fb = RgbaBuffer::new(4, 4);
        let mut pool = TightZlibPool::new();
        decode(&mut fb, 0, 0, 4, 4, &data, &pf, &mut pool).unwrap();
        assert_eq!(&fb.pixels[0..4], &[1, 1, 1, 255]);
    }
}

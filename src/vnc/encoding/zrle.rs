//! ZRLE encoding (type 16): one persistent zlib stream carrying 64×64
//! tiles, each independently raw, solid, palette-packed, or RLE-coded.

use crate::vnc::error::VncError;
use crate::vnc::framebuffer::Framebuffer;
use crate::vnc::protocol::{cpixel_len, decode_cpixel, encode_cpixel};
use crate::vnc::types::PixelFormat;
use crate::vnc::zlib::ZlibStream;

const TILE_SIZE: usize = 64;

/// Decode a ZRLE rectangle. `compressed` is the zlib-compressed tile
/// stream (the 4-byte length prefix has already been consumed by the
/// caller); `stream` is the rectangle's persistent inflate context.
pub fn decode(
    fb: &mut dyn Framebuffer,
    x: u16,
    y: u16,
    width: u16,
    height: u16,
    compressed: &[u8],
    pf: &PixelFormat,
    stream: &mut ZlibStream,
) -> Result<(), VncError> {
    let mut raw = Vec::new();
    stream.inflate(compressed, &mut raw)?;
    let mut cursor = 0usize;

    let tiles_x = (width as usize + TILE_SIZE - 1) / TILE_SIZE;
    let tiles_y = (height as usize + TILE_SIZE - 1) / TILE_SIZE;

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let tile_x = tx * TILE_SIZE;
            let tile_y = ty * TILE_SIZE;
            let tile_w = TILE_SIZE.min(width as usize - tile_x);
            let tile_h = TILE_SIZE.min(height as usize - tile_y);

            let rgba = decode_tile(&raw, &mut cursor, tile_w, tile_h, pf)?;
            fb.blit(x + tile_x as u16, y + tile_y as u16, tile_w as u16, tile_h as u16, &rgba);
        }
    }

    Ok(())
}

fn decode_tile(
    raw: &[u8],
    cursor: &mut usize,
    tile_w: usize,
    tile_h: usize,
    pf: &PixelFormat,
) -> Result<Vec<u8>, VncError> {
    let subencoding = *raw.get(*cursor).ok_or_else(|| VncError::decode("ZRLE tile subencoding truncated"))?;
    *cursor += 1;

    let pixel_count = tile_w * tile_h;

    match subencoding {
        0 => {
            // Raw: tile_w*tile_h CPIXELs.
            let mut out = Vec::with_capacity(pixel_count * 4);
            for _ in 0..pixel_count {
                let cpixel = read_cpixel(raw, cursor, pf)?;
                let (r, g, b) = decode_cpixel(pf, &cpixel)?;
                out.extend_from_slice(&[r, g, b, 255]);
            }
            Ok(out)
        }
        1 => {
            // Solid.
            let cpixel = read_cpixel(raw, cursor, pf)?;
            let (r, g, b) = decode_cpixel(pf, &cpixel)?;
            Ok(std::iter::repeat([r, g, b, 255]).take(pixel_count).flatten().collect())
        }
        2..=16 => {
            let palette_size = subencoding as usize;
            let mut palette = Vec::with_capacity(palette_size);
            for _ in 0..palette_size {
                let cpixel = read_cpixel(raw, cursor, pf)?;
                let (r, g, b) = decode_cpixel(pf, &cpixel)?;
                palette.push([r, g, b, 255]);
            }
            decode_packed_palette(raw, cursor, tile_w, tile_h, &palette)
        }
        128 => decode_plain_rle(raw, cursor, pixel_count, pf),
        130..=255 => {
            let palette_size = (subencoding - 128) as usize;
            let mut palette = Vec::with_capacity(palette_size);
            for _ in 0..palette_size {
                let cpixel = read_cpixel(raw, cursor, pf)?;
                let (r, g, b) = decode_cpixel(pf, &cpixel)?;
                palette.push([r, g, b, 255]);
            }
            decode_palette_rle(raw, cursor, pixel_count, &palette)
        }
        other => Err(VncError::decode(format!("unsupported ZRLE tile subencoding {other}"))),
    }
}

fn read_cpixel(raw: &[u8], cursor: &mut usize, pf: &PixelFormat) -> Result<Vec<u8>, VncError> {
    let len = cpixel_len(pf);
    let chunk = raw
        .get(*cursor..*cursor + len)
        .ok_or_else(|| VncError::decode("ZRLE CPIXEL truncated"))?
        .to_vec();
    *cursor += len;
    Ok(chunk)
}

/// Bit depth used to pack palette indices, per RFC 6143 §7.7.5: 1 bit
/// for a 2-colour palette, 2 bits for 3-4 colours, 4 bits for 5-16.
fn packed_bits_per_index(palette_size: usize) -> usize {
    match palette_size {
        2 => 1,
        3 | 4 => 2,
        5..=16 => 4,
        _ => 8,
    }
}

fn decode_packed_palette(
    raw: &[u8],
    cursor: &mut usize,
    tile_w: usize,
    tile_h: usize,
    palette: &[[u8; 4]],
) -> Result<Vec<u8>, VncError> {
    let bits = packed_bits_per_index(palette.len());
    let row_bytes = (tile_w * bits + 7) / 8;
    let mut out = Vec::with_capacity(tile_w * tile_h * 4);

    for _row in 0..tile_h {
        let row_data = raw
            .get(*cursor..*cursor + row_bytes)
            .ok_or_else(|| VncError::decode("ZRLE packed palette row truncated"))?;
        *cursor += row_bytes;

        for col in 0..tile_w {
            let index = extract_bits(row_data, col, bits);
            let colour = palette
                .get(index)
                .copied()
                .ok_or_else(|| VncError::decode("ZRLE palette index out of range"))?;
            out.extend_from_slice(&colour);
        }
    }

    Ok(out)
}

fn extract_bits(row: &[u8], col: usize, bits: usize) -> usize {
    let bit_offset = col * bits;
    let byte_idx = bit_offset / 8;
    let shift = 8 - bits - (bit_offset % 8);
    ((row[byte_idx] as usize) >> shift) & ((1 << bits) - 1)
}

fn decode_plain_rle(raw: &[u8], cursor: &mut usize, pixel_count: usize, pf: &PixelFormat) -> Result<Vec<u8>, VncError> {
    let mut out = Vec::with_capacity(pixel_count * 4);
    while out.len() < pixel_count * 4 {
        let cpixel = read_cpixel(raw, cursor, pf)?;
        let (r, g, b) = decode_cpixel(pf, &cpixel)?;
        let run = read_rle_length(raw, cursor)?;
        for _ in 0..run {
            out.extend_from_slice(&[r, g, b, 255]);
        }
    }
    Ok(out)
}

fn decode_palette_rle(raw: &[u8], cursor: &mut usize, pixel_count: usize, palette: &[[u8; 4]]) -> Result<Vec<u8>, VncError> {
    let mut out = Vec::with_capacity(pixel_count * 4);
    while out.len() < pixel_count * 4 {
        let byte = *raw.get(*cursor).ok_or_else(|| VncError::decode("ZRLE palette RLE index truncated"))?;
        *cursor += 1;
        let index = (byte & 0x7F) as usize;
        let colour = palette
            .get(index)
            .copied()
            .ok_or_else(|| VncError::decode("ZRLE palette RLE index out of range"))?;
        let run = if byte & 0x80 != 0 {
            read_rle_length(raw, cursor)?
        } else {
            1
        };
        for _ in 0..run {
            out.extend_from_slice(&colour);
        }
    }
    Ok(out)
}

/// RLE run lengths are encoded as a sequence of bytes, each contributing
/// 255 plus a final byte < 255 that ends the run (length = 1 + sum).
fn read_rle_length(raw: &[u8], cursor: &mut usize) -> Result<usize, VncError> {
    let mut length = 1usize;
    loop {
        let byte = *raw.get(*cursor).ok_or_else(|| VncError::decode("ZRLE run length truncated"))?;
        *cursor += 1;
        length += byte as usize;
        if byte != 255 {
            break;
        }
    }
    Ok(length)
}

/// Re-encode a solid CPIXEL tile — used by tests to build fixtures that
/// exercise the decoder against the crate's own [`encode_cpixel`].
#[cfg(test)]
fn solid_tile_bytes(pf: &PixelFormat, r: u8, g: u8, b: u8) -> Vec<u8> {
    let mut out = vec![1u8]; // subencoding = solid
    out.extend_from_slice(&encode_cpixel(pf, r, g, b));
    out
}

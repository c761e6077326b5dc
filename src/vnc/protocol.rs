//! RFB protocol message builders and parsers.
//!
//! Client → Server and Server → Client message framing per RFC 6143.

use crate::vnc::audio::AudioFormat;
use crate::vnc::types::{
    ClientMessageType, EncodingType, PixelFormat, QemuAudioSubMessage, ServerMessageType,
};

/// Maximum byte length of a `cint`-encoded value (Tight/ZRLE §4.6.1).
pub const CINT_MAX_LEN: usize = 3;

// ── Client → Server message builders ────────────────────────────────────

/// Build SetPixelFormat message (§7.5.1).
/// 1 byte type + 3 padding + 16 bytes pixel format = 20 bytes.
pub fn build_set_pixel_format(pf: &PixelFormat) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    buf.push(ClientMessageType::SetPixelFormat as u8);
    buf.extend_from_slice(&[0, 0, 0]); // padding
    buf.extend_from_slice(&pf.to_bytes());
    buf
}

/// Build SetEncodings message (§7.5.2).
/// 1 byte type + 1 padding + 2 bytes count + 4 bytes per encoding.
pub fn build_set_encodings(encodings: &[EncodingType]) -> Vec<u8> {
    let count = encodings.len() as u16;
    let mut buf = Vec::with_capacity(4 + encodings.len() * 4);
    buf.push(ClientMessageType::SetEncodings as u8);
    buf.push(0); // padding
    buf.push((count >> 8) as u8);
    buf.push((count & 0xFF) as u8);
    for enc in encodings {
        let v = enc.to_i32();
        buf.push((v >> 24) as u8);
        buf.push((v >> 16) as u8);
        buf.push((v >> 8) as u8);
        buf.push(v as u8);
    }
    buf
}

/// Build FramebufferUpdateRequest (§7.5.3).
/// `incremental`: 0 = full, 1 = incremental.
pub fn build_fb_update_request(
    incremental: bool,
    x: u16,
    y: u16,
    width: u16,
    height: u16,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    buf.push(ClientMessageType::FramebufferUpdateRequest as u8);
    buf.push(if incremental { 1 } else { 0 });
    buf.extend_from_slice(&x.to_be_bytes());
    buf.extend_from_slice(&y.to_be_bytes());
    buf.extend_from_slice(&width.to_be_bytes());
    buf.extend_from_slice(&height.to_be_bytes());
    buf
}

/// Build KeyEvent message (§7.5.4).
pub fn build_key_event(down: bool, key: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.push(ClientMessageType::KeyEvent as u8);
    buf.push(if down { 1 } else { 0 });
    buf.extend_from_slice(&[0, 0]); // padding
    buf.extend_from_slice(&key.to_be_bytes());
    buf
}

/// Build PointerEvent message (§7.5.5).
pub fn build_pointer_event(button_mask: u8, x: u16, y: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6);
    buf.push(ClientMessageType::PointerEvent as u8);
    buf.push(button_mask);
    buf.extend_from_slice(&x.to_be_bytes());
    buf.extend_from_slice(&y.to_be_bytes());
    buf
}

/// Build ClientCutText message (§7.5.6).
pub fn build_client_cut_text(text: &str) -> Vec<u8> {
    let text_bytes = text.as_bytes();
    let len = text_bytes.len() as u32;
    let mut buf = Vec::with_capacity(8 + text_bytes.len());
    buf.push(ClientMessageType::ClientCutText as u8);
    buf.extend_from_slice(&[0, 0, 0]); // padding
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(text_bytes);
    buf
}

/// Build the QEMU extended KeyEvent message: the legacy KeyEvent layout
/// with a trailing 4-byte big-endian X11 keycode, gated behind the
/// `ExtendedKeyEventPseudo` capability the server must have announced.
pub fn build_extended_key_event(down: bool, keysym: u32, keycode: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.push(ClientMessageType::KeyEvent as u8);
    buf.push(if down { 1 } else { 0 });
    buf.extend_from_slice(&[0, 0]); // padding
    buf.extend_from_slice(&keysym.to_be_bytes());
    buf.extend_from_slice(&keycode.to_be_bytes());
    buf
}

/// Audio sub-messages all share this header: message type 255, submessage
/// type 1 (audio), then a 2-byte big-endian operation code.
fn qemu_audio_header(op: QemuAudioSubMessage) -> Vec<u8> {
    let op = op as u16;
    vec![ClientMessageType::QemuClientMessage as u8, 1, (op >> 8) as u8, op as u8]
}

/// Build a QEMU audio extension submessage requesting the server enable
/// PCM streaming.
pub fn build_qemu_audio_enable() -> Vec<u8> {
    qemu_audio_header(QemuAudioSubMessage::Enable)
}

/// Build a QEMU audio extension submessage asking the server to stop
/// streaming PCM.
pub fn build_qemu_audio_disable() -> Vec<u8> {
    qemu_audio_header(QemuAudioSubMessage::Disable)
}

/// Build a QEMU audio extension SetFormat submessage: sample rate, number
/// of channels, and bits-per-sample follow the operation header.
pub fn build_qemu_audio_set_format(format: AudioFormat) -> Vec<u8> {
    let mut buf = qemu_audio_header(QemuAudioSubMessage::SetFormat);
    buf.extend_from_slice(&format.sample_rate.to_be_bytes());
    buf.push(format.channels);
    buf.push(format.bits_per_sample);
    buf
}

// ── Server → Client parsing helpers ─────────────────────────────────────

/// Parse the server message type from the first byte.
pub fn parse_server_message_type(byte: u8) -> Option<ServerMessageType> {
    ServerMessageType::from_byte(byte)
}

/// Parse the 12-byte RFB version banner string.
pub fn parse_version_string(buf: &[u8; 12]) -> String {
    String::from_utf8_lossy(buf).trim().to_string()
}

/// Parse server init message after the security handshake.
/// Returns (width, height, pixel_format, name).
pub fn parse_server_init(data: &[u8]) -> Result<(u16, u16, PixelFormat, String), String> {
    if data.len() < 24 {
        return Err(format!("ServerInit too short: {} bytes", data.len()));
    }
    let width = u16::from_be_bytes([data[0], data[1]]);
    let height = u16::from_be_bytes([data[2], data[3]]);

    let mut pf_bytes = [0u8; 16];
    pf_bytes.copy_from_slice(&data[4..20]);
    let pixel_format = PixelFormat::from_bytes(&pf_bytes);

    let name_len = u32::from_be_bytes([data[20], data[21], data[22], data[23]]) as usize;

    let name = if data.len() >= 24 + name_len {
        String::from_utf8_lossy(&data[24..24 + name_len]).to_string()
    } else {
        String::new()
    };

    Ok((width, height, pixel_format, name))
}

/// Parse a FramebufferUpdate rectangle header (12 bytes).
/// Returns (x, y, width, height, encoding_type).
pub fn parse_rect_header(data: &[u8]) -> Result<(u16, u16, u16, u16, EncodingType), String> {
    if data.len() < 12 {
        return Err("Rectangle header too short".into());
    }
    let x = u16::from_be_bytes([data[0], data[1]]);
    let y = u16::from_be_bytes([data[2], data[3]]);
    let w = u16::from_be_bytes([data[4], data[5]]);
    let h = u16::from_be_bytes([data[6], data[7]]);
    let enc = i32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    Ok((x, y, w, h, EncodingType::from_i32(enc)))
}

/// Parse security type list (RFB 3.7+).
/// `data` is the bytes *after* the count byte.
pub fn parse_security_types(count: u8, data: &[u8]) -> Vec<u8> {
    data.iter().take(count as usize).copied().collect()
}

/// Parse the VNC authentication challenge (16 bytes).
pub fn parse_vnc_auth_challenge(data: &[u8]) -> Result<[u8; 16], String> {
    if data.len() < 16 {
        return Err("VNC auth challenge too short".into());
    }
    let mut challenge = [0u8; 16];
    challenge.copy_from_slice(&data[..16]);
    Ok(challenge)
}

/// Parse security result (4 bytes, big-endian u32). 0 = OK.
pub fn parse_security_result(data: &[u8]) -> Result<u32, String> {
    if data.len() < 4 {
        return Err("Security result too short".into());
    }
    Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
}

/// Parse ServerCutText length (after the 3 padding bytes).
pub fn parse_cut_text_length(data: &[u8]) -> Result<u32, String> {
    if data.len() < 4 {
        return Err("CutText length too short".into());
    }
    Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
}

/// Build the 4-byte ClientInit message. `shared` = allow other clients.
pub fn build_client_init(shared: bool) -> Vec<u8> {
    vec![if shared { 1 } else { 0 }]
}

/// Resolve encoding type from a name string.
pub fn encoding_from_name(name: &str) -> Option<EncodingType> {
    match name.to_lowercase().as_str() {
        "raw" => Some(EncodingType::Raw),
        "copyrect" => Some(EncodingType::CopyRect),
        "rre" => Some(EncodingType::RRE),
        "hextile" => Some(EncodingType::Hextile),
        "trle" => Some(EncodingType::TRLE),
        "zrle" => Some(EncodingType::ZRLE),
        "tight" => Some(EncodingType::Tight),
        _ => None,
    }
}

/// Convert a list of encoding name strings into encoding types,
/// automatically appending pseudo-encodings.
pub fn resolve_encodings(names: &[String], local_cursor: bool) -> Vec<EncodingType> {
    let mut result: Vec<EncodingType> = names
        .iter()
        .filter_map(|n| encoding_from_name(n))
        .collect();

    // Always include CopyRect if not already present.
    if !result.contains(&EncodingType::CopyRect) {
        result.push(EncodingType::CopyRect);
    }

    // Pseudo-encodings.
    if local_cursor {
        result.push(EncodingType::RichCursor);
        result.push(EncodingType::XCursor);
    }
    result.push(EncodingType::DesktopSizePseudo);
    result.push(EncodingType::ExtendedDesktopSizePseudo);
    result.push(EncodingType::LastRectPseudo);
    result.push(EncodingType::PointerChangePseudo);
    result.push(EncodingType::LedStatePseudo);
    result.push(EncodingType::PixelFormatChangePseudo);
    result.push(EncodingType::ExtendedKeyEventPseudo);
    result.push(EncodingType::AudioPseudo);

    result
}

/// Parse a single 32-bit security type (RFB 3.3's one-type-only wire form).
/// Returns `None` if the server sent the 3.3 connection-failed variant
/// (type 0, followed by a reason string the caller reads separately).
pub fn parse_security_type_3_3(data: &[u8]) -> Result<Option<u32>, String> {
    if data.len() < 4 {
        return Err("Security type (3.3) too short".into());
    }
    let v = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    Ok(if v == 0 { None } else { Some(v) })
}

// ── Variable-length integer encoding (Tight/ZRLE §4.6.1) ────────────────

/// Encode a `cint` (Tight's 1-3 byte variable-length unsigned integer).
/// The first two bytes carry 7 data bits with the top bit signalling
/// "more bytes follow"; the third (and last) byte carries all 8 of its
/// bits as data with no continuation bit, giving a 22-bit range
/// (0..=4194303) in 3 bytes.
pub fn encode_cint(value: u32) -> Vec<u8> {
    if value < 0x80 {
        vec![value as u8]
    } else if value < 0x4000 {
        vec![(value as u8) | 0x80, (value >> 7) as u8]
    } else {
        vec![(value as u8) | 0x80, ((value >> 7) as u8) | 0x80, (value >> 14) as u8]
    }
}

/// Decode a `cint` from the front of `data`. Returns (value, bytes consumed).
pub fn decode_cint(data: &[u8]) -> Result<(u32, usize), String> {
    let mut value: u32 = 0;
    for i in 0..CINT_MAX_LEN {
        let byte = *data.get(i).ok_or("cint truncated")?;
        if i == CINT_MAX_LEN - 1 {
            // Third byte: all 8 bits are data, no continuation bit.
            value |= (byte as u32) << (7 * i);
            return Ok((value, i + 1));
        }
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    unreachable!()
}

// ── Packed pixel encodings (ZRLE CPIXEL, Tight TPIXEL) ──────────────────
//
// Both CPIXEL and TPIXEL are "R, G, B channel values packed into
// whatever the wire actually sends" — which byte width that is depends
// on the pixel format, not always 3 bytes. §4.6.1's bit-exact rule: a
// compact 3-byte form is used only for the specific cases it names;
// every other pixel format round-trips through its native
// `bytes_per_pixel()` width. `r`/`g`/`b` are always already scaled to
// 0..=255, the same as [`pixel_to_rgba`](crate::vnc::encoding::pixel_to_rgba)
// returns — decoders can write them straight into an RGBA buffer with no
// further scaling, and encoders descale them back into the format's own
// `{red,green,blue}_max` range before packing the bits.

/// Which of the 4 bytes of a 32-bit pixel value is the all-zero byte a
/// compact 3-byte CPIXEL omits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompactSkip {
    /// LSB case: channels sit in the low 24 bits; byte index 3 is zero.
    HighByte,
    /// MSB case: channels sit in the high 24 bits; byte index 0 is zero.
    LowByte,
}

/// §4.6.1's CPIXEL condition: bpp=32, true-colour, and either all three
/// shifts exceed 7 (channels in the upper 24 bits) or all three
/// `max << shift` values fit under 2^24 (channels in the lower 24 bits).
fn cpixel_compact_skip(pf: &PixelFormat) -> Option<CompactSkip> {
    if pf.bytes_per_pixel() != 4 || !pf.true_colour {
        return None;
    }
    let msb_case = pf.red_shift > 7 && pf.green_shift > 7 && pf.blue_shift > 7;
    if msb_case {
        return Some(CompactSkip::LowByte);
    }
    let lsb_case = (pf.red_max as u32) << pf.red_shift < (1 << 24)
        && (pf.green_max as u32) << pf.green_shift < (1 << 24)
        && (pf.blue_max as u32) << pf.blue_shift < (1 << 24);
    if lsb_case {
        return Some(CompactSkip::HighByte);
    }
    None
}

/// §4.6.1's TPIXEL condition: depth=24 always gets the compact 3-byte
/// form (Tight doesn't distinguish MSB/LSB the way ZRLE does — the
/// reassembly into a 32-bit pixel via the advertised shifts makes the
/// byte position self-describing).
fn tpixel_is_compact(pf: &PixelFormat) -> bool {
    pf.depth == 24 && pf.bytes_per_pixel() == 4
}

fn pack_compact(pf: &PixelFormat, r: u8, g: u8, b: u8, skip: CompactSkip) -> Vec<u8> {
    let mut full = [0u8; 4];
    place_channel(&mut full, pf.red_shift, pf.red_max, r);
    place_channel(&mut full, pf.green_shift, pf.green_max, g);
    place_channel(&mut full, pf.blue_shift, pf.blue_max, b);
    let mut out = match skip {
        CompactSkip::HighByte => full[0..3].to_vec(),
        CompactSkip::LowByte => full[1..4].to_vec(),
    };
    if pf.big_endian {
        out.reverse();
    }
    out
}

fn unpack_compact(pf: &PixelFormat, data: &[u8], skip: CompactSkip) -> Result<(u8, u8, u8), String> {
    if data.len() < 3 {
        return Err("compact pixel truncated".into());
    }
    let mut buf = [data[0], data[1], data[2]];
    if pf.big_endian {
        buf.reverse();
    }
    let full = match skip {
        CompactSkip::HighByte => [buf[0], buf[1], buf[2], 0],
        CompactSkip::LowByte => [0, buf[0], buf[1], buf[2]],
    };
    Ok(extract_rgb(&full, pf))
}

/// Pack a raw-channel RGB triple into the format's full native pixel
/// width (used whenever the compact 3-byte CPIXEL/TPIXEL form doesn't
/// apply).
fn pack_native(pf: &PixelFormat, r: u8, g: u8, b: u8) -> Vec<u8> {
    let mut full = [0u8; 4];
    place_channel(&mut full, pf.red_shift, pf.red_max, r);
    place_channel(&mut full, pf.green_shift, pf.green_max, g);
    place_channel(&mut full, pf.blue_shift, pf.blue_max, b);
    let bpp = pf.bytes_per_pixel();
    let mut out = full[0..bpp].to_vec();
    if pf.big_endian {
        out.reverse();
    }
    out
}

fn unpack_native(pf: &PixelFormat, data: &[u8]) -> Result<(u8, u8, u8), String> {
    let bpp = pf.bytes_per_pixel();
    if data.len() < bpp {
        return Err("native pixel truncated".into());
    }
    let mut full = [0u8; 4];
    full[..bpp].copy_from_slice(&data[..bpp]);
    if pf.big_endian {
        full[..bpp].reverse();
    }
    Ok(extract_rgb(&full, pf))
}

/// Pack a 0..=255-scaled RGB triple into ZRLE's CPIXEL encoding.
pub fn encode_cpixel(pf: &PixelFormat, r: u8, g: u8, b: u8) -> Vec<u8> {
    match cpixel_compact_skip(pf) {
        Some(skip) => pack_compact(pf, r, g, b, skip),
        None => pack_native(pf, r, g, b),
    }
}

/// Unpack a ZRLE CPIXEL (3 bytes in the compact case, `bytes_per_pixel`
/// otherwise) into a 0..=255-scaled (r, g, b) triple.
pub fn decode_cpixel(pf: &PixelFormat, data: &[u8]) -> Result<(u8, u8, u8), String> {
    match cpixel_compact_skip(pf) {
        Some(skip) => unpack_compact(pf, data, skip),
        None => unpack_native(pf, data),
    }
}

/// How many bytes a single CPIXEL occupies on the wire for `pf`.
pub fn cpixel_len(pf: &PixelFormat) -> usize {
    if cpixel_compact_skip(pf).is_some() { 3 } else { pf.bytes_per_pixel() }
}

/// Pack a 0..=255-scaled RGB triple into Tight's TPIXEL encoding.
pub fn encode_tpixel(pf: &PixelFormat, r: u8, g: u8, b: u8) -> Vec<u8> {
    if tpixel_is_compact(pf) {
        // Depth 24 always omits the high (zero) byte, matching the
        // common depth-24-in-32bpp RGB/BGR layouts every Tight server uses.
        pack_compact(pf, r, g, b, CompactSkip::HighByte)
    } else {
        pack_native(pf, r, g, b)
    }
}

/// Unpack a Tight TPIXEL into a 0..=255-scaled (r, g, b) triple.
pub fn decode_tpixel(pf: &PixelFormat, data: &[u8]) -> Result<(u8, u8, u8), String> {
    if tpixel_is_compact(pf) {
        unpack_compact(pf, data, CompactSkip::HighByte)
    } else {
        unpack_native(pf, data)
    }
}

/// How many bytes a single TPIXEL occupies on the wire for `pf`.
pub fn tpixel_len(pf: &PixelFormat) -> usize {
    if tpixel_is_compact(pf) { 3 } else { pf.bytes_per_pixel() }
}

/// Place a 0..=255 channel value into its bit field at `shift`, descaling
/// it down to the field's own `0..=max` range first — the inverse of
/// [`scale_channel`]. `max` is a true channel max (never 0, since a
/// non-true-colour pixel format never reaches `pack_compact`/`pack_native`).
fn place_channel(out: &mut [u8; 4], shift: u8, max: u16, value: u8) {
    let raw = (value as u32 * max as u32 + 127) / 255;
    let byte_index = shift as usize / 8;
    out[byte_index] |= (raw as u8).wrapping_shl((shift % 8) as u32);
}

/// Scale a raw `0..=max` channel value up to `0..=255`, matching
/// [`pixel_to_rgba`](crate::vnc::encoding::pixel_to_rgba)'s `channel()`
/// helper so CPIXEL/TPIXEL-decoded colours agree with Raw/RRE/Hextile's.
fn scale_channel(raw: u32, max: u16) -> u8 {
    if max == 0 {
        return 0;
    }
    (raw * 255 / max as u32) as u8
}

fn extract_rgb(buf: &[u8; 4], pf: &PixelFormat) -> (u8, u8, u8) {
    let packed = (buf[0] as u32) | (buf[1] as u32) << 8 | (buf[2] as u32) << 16 | (buf[3] as u32) << 24;
    let r = scale_channel((packed >> pf.red_shift) & pf.red_max as u32, pf.red_max);
    let g = scale_channel((packed >> pf.green_shift) & pf.green_max as u32, pf.green_max);
    let b = scale_channel((packed >> pf.blue_shift) & pf.blue_max as u32, pf.blue_max);
    (r, g, b)
}

/// Whether ZRLE must be silently dropped from the outgoing SetEncodings
/// list (§4.7): ZRLE's CPIXEL packing assumes an 8-bit-per-channel pixel
/// format and cannot represent a depth-32 format whose channel max
/// exceeds 255.
pub fn zrle_unsupported_for_format(pf: &PixelFormat) -> bool {
    pf.depth == 32 && (pf.red_max > 255 || pf.green_max > 255 || pf.blue_max > 255)
}

/// Filter ZRLE out of an encoding list if the active pixel format can't
/// represent it (§4.7's SetEncodings policy).
pub fn apply_zrle_format_policy(encodings: Vec<EncodingType>, pf: &PixelFormat) -> Vec<EncodingType> {
    if zrle_unsupported_for_format(pf) {
        encodings
            .into_iter()
            .filter(|e| *e != EncodingType::ZRLE)
            .collect()
    } else {
        encodings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vnc::types::{keysym, mouse_button};

    // ── SetPixelFormat ──────────────────────────────────────────────

    #[test]
    fn set_pixel_format_length() {
        let msg = build_set_pixel_format(&PixelFormat::rgba32());
        assert_eq!(msg.len(), 20);
        assert_eq!(msg[0], ClientMessageType::SetPixelFormat as u8);
    }

    #[test]
    fn set_pixel_format_contains_format_bytes() {
        let pf = PixelFormat::rgba32();
        let msg = build_set_pixel_format(&pf);
        let pf_bytes = pf.to_bytes();
        assert_eq!(&msg[4..20], &pf_bytes);
    }

    // ── SetEncodings ────────────────────────────────────────────────

    #[test]
    fn set_encodings_empty() {
        let msg = build_set_encodings(&[]);
        assert_eq!(msg.len(), 4);
        assert_eq!(msg[0], ClientMessageType::SetEncodings as u8);
        assert_eq!(msg[2], 0);
        assert_eq!(msg[3], 0);
    }

    #[test]
    fn set_encodings_multiple() {
        let encs = vec![EncodingType::ZRLE, EncodingType::Raw, EncodingType::CopyRect];
        let msg = build_set_encodings(&encs);
        assert_eq!(msg.len(), 4 + 3 * 4);
        let count = u16::from_be_bytes([msg[2], msg[3]]);
        assert_eq!(count, 3);
    }

    #[test]
    fn set_encodings_negative_encoding() {
        let encs = vec![EncodingType::RichCursor];
        let msg = build_set_encodings(&encs);
        let enc_val = i32::from_be_bytes([msg[4], msg[5], msg[6], msg[7]]);
        assert_eq!(enc_val, -239);
    }

    // ── FramebufferUpdateRequest ────────────────────────────────────

    #[test]
    fn fb_update_request_length() {
        let msg = build_fb_update_request(true, 0, 0, 1920, 1080);
        assert_eq!(msg.len(), 10);
        assert_eq!(msg[0], ClientMessageType::FramebufferUpdateRequest as u8);
    }

    #[test]
    fn fb_update_request_incremental() {
        let msg = build_fb_update_request(true, 0, 0, 100, 100);
        assert_eq!(msg[1], 1);
    }

    #[test]
    fn fb_update_request_full() {
        let msg = build_fb_update_request(false, 0, 0, 100, 100);
        assert_eq!(msg[1], 0);
    }

    #[test]
    fn fb_update_request_coordinates() {
        let msg = build_fb_update_request(true, 100, 200, 300, 400);
        let x = u16::from_be_bytes([msg[2], msg[3]]);
        let y = u16::from_be_bytes([msg[4], msg[5]]);
        let w = u16::from_be_bytes([msg[6], msg[7]]);
        let h = u16::from_be_bytes([msg[8], msg[9]]);
        assert_eq!(x, 100);
        assert_eq!(y, 200);
        assert_eq!(w, 300);
        assert_eq!(h, 400);
    }

    // ── KeyEvent ────────────────────────────────────────────────────

    #[test]
    fn key_event_length() {
        let msg = build_key_event(true, keysym::RETURN);
        assert_eq!(msg.len(), 8);
        assert_eq!(msg[0], ClientMessageType::KeyEvent as u8);
    }

    #[test]
    fn key_event_down() {
        let msg = build_key_event(true, keysym::F1);
        assert_eq!(msg[1], 1);
        let key = u32::from_be_bytes([msg[4], msg[5], msg[6], msg[7]]);
        assert_eq!(key, keysym::F1);
    }

    #[test]
    fn key_event_up() {
        let msg = build_key_event(false, keysym::ESCAPE);
        assert_eq!(msg[1], 0);
    }

    // ── PointerEvent ────────────────────────────────────────────────

    #[test]
    fn pointer_event_length() {
        let msg = build_pointer_event(0, 100, 200);
        assert_eq!(msg.len(), 6);
        assert_eq!(msg[0], ClientMessageType::PointerEvent as u8);
    }

    #[test]
    fn pointer_event_buttons_and_coords() {
        let mask = mouse_button::LEFT | mouse_button::RIGHT;
        let msg = build_pointer_event(mask, 500, 300);
        assert_eq!(msg[1], mask);
        let x = u16::from_be_bytes([msg[2], msg[3]]);
        let y = u16::from_be_bytes([msg[4], msg[5]]);
        assert_eq!(x, 500);
        assert_eq!(y, 300);
    }

    // ── ClientCutText ───────────────────────────────────────────────

    #[test]
    fn client_cut_text_length() {
        let msg = build_client_cut_text("hello");
        assert_eq!(msg.len(), 8 + 5);
        assert_eq!(msg[0], ClientMessageType::ClientCutText as u8);
    }

    #[test]
    fn client_cut_text_contains_text() {
        let msg = build_client_cut_text("test");
        let len = u32::from_be_bytes([msg[4], msg[5], msg[6], msg[7]]);
        assert_eq!(len, 4);
        assert_eq!(&msg[8..], b"test");
    }

    #[test]
    fn client_cut_text_empty() {
        let msg = build_client_cut_text("");
        assert_eq!(msg.len(), 8);
        let len = u32::from_be_bytes([msg[4], msg[5], msg[6], msg[7]]);
        assert_eq!(len, 0);
    }

    // ── Server init parsing ─────────────────────────────────────────

    #[test]
    fn parse_server_init_basic() {
        let mut data = Vec::new();
        // width=800, height=600
        data.extend_from_slice(&800u16.to_be_bytes());
        data.extend_from_slice(&600u16.to_be_bytes());
        // pixel format (16 bytes)
        data.extend_from_slice(&PixelFormat::rgba32().to_bytes());
        // name length = 3
        data.extend_from_slice(&3u32.to_be_bytes());
        data.extend_from_slice(b"VNC");

        let (w, h, pf, name) = parse_server_init(&data).unwrap();
        assert_eq!(w, 800);
        assert_eq!(h, 600);
        assert_eq!(pf, PixelFormat::rgba32());
        assert_eq!(name, "VNC");
    }

    #[test]
    fn parse_server_init_too_short() {
        let data = vec![0u8; 10];
        assert!(parse_server_init(&data).is_err());
    }

    #[test]
    fn parse_server_init_no_name_data() {
        let mut data = Vec::new();
        data.extend_from_slice(&1920u16.to_be_bytes());
        data.extend_from_slice(&1080u16.to_be_bytes());
        data.extend_from_slice(&PixelFormat::rgba32().to_bytes());
        data.extend_from_slice(&5u32.to_be_bytes()); // says 5 bytes but we don't include them

        let (w, h, _, name) = parse_server_init(&data).unwrap();
        assert_eq!(w, 1920);
        assert_eq!(h, 1080);
        assert_eq!(name, ""); // graceful fallback
    }

    // ── Rect header parsing ─────────────────────────────────────────

    #[test]
    fn parse_rect_header_raw() {
        let mut data = Vec::new();
        data.extend_from_slice(&10u16.to_be_bytes());  // x
        data.extend_from_slice(&20u16.to_be_bytes());  // y
        data.extend_from_slice(&100u16.to_be_bytes()); // w
        data.extend_from_slice(&200u16.to_be_bytes()); // h
        data.extend_from_slice(&0i32.to_be_bytes());   // Raw encoding

        let (x, y, w, h, enc) = parse_rect_header(&data).unwrap();
        assert_eq!(x, 10);
        assert_eq!(y, 20);
        assert_eq!(w, 100);
        assert_eq!(h, 200);
        assert_eq!(enc, EncodingType::Raw);
    }

    #[test]
    fn parse_rect_header_copyrect() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&50u16.to_be_bytes());
        data.extend_from_slice(&50u16.to_be_bytes());
        data.extend_from_slice(&1i32.to_be_bytes()); // CopyRect

        let (_, _, _, _, enc) = parse_rect_header(&data).unwrap();
        assert_eq!(enc, EncodingType::CopyRect);
    }

    #[test]
    fn parse_rect_header_pseudo_encoding() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&1920u16.to_be_bytes());
        data.extend_from_slice(&1080u16.to_be_bytes());
        data.extend_from_slice(&(-223i32).to_be_bytes()); // DesktopSize pseudo

        let (_, _, w, h, enc) = parse_rect_header(&data).unwrap();
        assert_eq!(w, 1920);
        assert_eq!(h, 1080);
        assert_eq!(enc, EncodingType::DesktopSizePseudo);
    }

    #[test]
    fn parse_rect_header_too_short() {
        assert!(parse_rect_header(&[0; 8]).is_err());
    }

    // ── Security helpers ────────────────────────────────────────────

    #[test]
    fn parse_security_types_list() {
        let types = parse_security_types(3, &[1, 2, 16, 99]);
        assert_eq!(types, vec![1, 2, 16]);
    }

    #[test]
    fn parse_vnc_auth_challenge_ok() {
        let data = vec![0u8; 16];
        let challenge = parse_vnc_auth_challenge(&data).unwrap();
        assert_eq!(challenge.len(), 16);
    }

    #[test]
    fn parse_vnc_auth_challenge_short() {
        assert!(parse_vnc_auth_challenge(&[0; 10]).is_err());
    }

    #[test]
    fn parse_security_result_ok() {
        let data = 0u32.to_be_bytes();
        assert_eq!(parse_security_result(&data).unwrap(), 0);
    }

    #[test]
    fn parse_security_result_fail() {
        let data = 1u32.to_be_bytes();
        assert_eq!(parse_security_result(&data).unwrap(), 1);
    }

    // ── Client init ─────────────────────────────────────────────────

    #[test]
    fn client_init_shared() {
        assert_eq!(build_client_init(true), vec![1]);
    }

    #[test]
    fn client_init_exclusive() {
        assert_eq!(build_client_init(false), vec![0]);
    }

    // ── Encoding resolution ─────────────────────────────────────────

    #[test]
    fn encoding_from_name_known() {
        assert_eq!(encoding_from_name("Raw"), Some(EncodingType::Raw));
        assert_eq!(encoding_from_name("zrle"), Some(EncodingType::ZRLE));
        assert_eq!(encoding_from_name("TIGHT"), Some(EncodingType::Tight));
    }

    #[test]
    fn encoding_from_name_unknown() {
        assert!(encoding_from_name("nonexistent").is_none());
    }

    #[test]
    fn resolve_encodings_adds_pseudo() {
        let names = vec!["ZRLE".into(), "Raw".into()];
        let resolved = resolve_encodings(&names, true);
        assert!(resolved.contains(&EncodingType::ZRLE));
        assert!(resolved.contains(&EncodingType::Raw));
        assert!(resolved.contains(&EncodingType::CopyRect));
        assert!(resolved.contains(&EncodingType::RichCursor));
        assert!(resolved.contains(&EncodingType::DesktopSizePseudo));
    }

    #[test]
    fn resolve_encodings_no_cursor() {
        let names = vec!["Raw".into()];
        let resolved = resolve_encodings(&names, false);
        assert!(!resolved.contains(&EncodingType::RichCursor));
        assert!(resolved.contains(&EncodingType::DesktopSizePseudo));
    }

    #[test]
    fn resolve_encodings_copyrect_not_duplicated() {
        let names = vec!["CopyRect".into(), "Raw".into()];
        let resolved = resolve_encodings(&names, false);
        let count = resolved.iter().filter(|e| **e == EncodingType::CopyRect).count();
        assert_eq!(count, 1);
    }

    // ── Version string ──────────────────────────────────────────────

    #[test]
    fn parse_version_string_trims() {
        let v = parse_version_string(b"RFB 003.008\n");
        assert_eq!(v, "RFB 003.008");
    }

    // ── 3.3 security type parsing ────────────────────────────────────

    #[test]
    fn security_type_3_3_ok() {
        let data = 2u32.to_be_bytes();
        assert_eq!(parse_security_type_3_3(&data).unwrap(), Some(2));
    }

    #[test]
    fn security_type_3_3_connection_failed() {
        let data = 0u32.to_be_bytes();
        assert_eq!(parse_security_type_3_3(&data).unwrap(), None);
    }

    #[test]
    fn security_type_3_3_too_short() {
        assert!(parse_security_type_3_3(&[0, 0]).is_err());
    }

    // ── cint ──────────────────────────────────────────────────────────

    #[test]
    fn cint_roundtrip_single_byte_boundary() {
        // 0x7F is the largest value that fits in one byte (top bit clear).
        let encoded = encode_cint(0x7F);
        assert_eq!(encoded, vec![0x7F]);
        let (value, len) = decode_cint(&encoded).unwrap();
        assert_eq!(value, 0x7F);
        assert_eq!(len, 1);
    }

    #[test]
    fn cint_roundtrip_two_byte_boundary() {
        // 0x80 is the smallest value requiring a second byte.
        let encoded = encode_cint(0x80);
        assert_eq!(encoded.len(), 2);
        let (value, len) = decode_cint(&encoded).unwrap();
        assert_eq!(value, 0x80);
        assert_eq!(len, 2);
    }

    #[test]
    fn cint_roundtrip_three_byte_max() {
        // Largest value representable in 3 cint bytes: the third byte
        // carries all 8 bits as data with no continuation bit, giving
        // 7 + 7 + 8 = 22 bits, i.e. 2^22 - 1.
        let max_3byte = (1u32 << 22) - 1;
        let encoded = encode_cint(max_3byte);
        assert_eq!(encoded.len(), 3);
        let (value, len) = decode_cint(&encoded).unwrap();
        assert_eq!(value, max_3byte);
        assert_eq!(len, 3);
    }

    #[test]
    fn cint_decode_truncated_errors() {
        // Continuation bit set on the second byte but no third byte present.
        assert!(decode_cint(&[0x80, 0x80]).is_err());
    }

    #[test]
    fn cint_decode_consumes_only_its_own_bytes() {
        let mut data = encode_cint(300);
        data.extend_from_slice(&[0xAA, 0xBB]); // trailing unrelated bytes
        let (value, len) = decode_cint(&data).unwrap();
        assert_eq!(value, 300);
        assert_eq!(len, 2);
    }

    // ── CPIXEL / TPIXEL ───────────────────────────────────────────────

    #[test]
    fn cpixel_roundtrip_rgba32() {
        let pf = PixelFormat::rgba32();
        let packed = encode_cpixel(&pf, 0x11, 0x22, 0x33);
        assert_eq!(packed.len(), 3);
        let (r, g, b) = decode_cpixel(&pf, &packed).unwrap();
        assert_eq!((r, g, b), (0x11, 0x22, 0x33));
    }

    #[test]
    fn tpixel_roundtrip_matches_cpixel_layout() {
        let pf = PixelFormat::rgba32();
        let cpixel = encode_cpixel(&pf, 5, 6, 7);
        let tpixel = encode_tpixel(&pf, 5, 6, 7);
        assert_eq!(cpixel, tpixel);
        let (r, g, b) = decode_tpixel(&pf, &tpixel).unwrap();
        assert_eq!((r, g, b), (5, 6, 7));
    }

    #[test]
    fn cpixel_decode_truncated_errors() {
        let pf = PixelFormat::rgba32();
        assert!(decode_cpixel(&pf, &[0, 1]).is_err());
    }

    #[test]
    fn cpixel_scales_16bpp_channels_to_full_byte_range() {
        // RGB565's red/blue channels only have 5 bits (max 31); a pure
        // red pixel must decode to a full-brightness byte, not 31, to
        // agree with `pixel_to_rgba`'s scaling for Raw/RRE/Hextile.
        let pf = PixelFormat::rgb565();
        let packed = encode_cpixel(&pf, 255, 0, 0);
        let (r, g, b) = decode_cpixel(&pf, &packed).unwrap();
        assert_eq!((r, g, b), (255, 0, 0));
    }

    #[test]
    fn cpixel_roundtrip_16bpp_format() {
        let pf = PixelFormat::rgb565();
        let packed = encode_cpixel(&pf, 200, 100, 50);
        let (r, g, b) = decode_cpixel(&pf, &packed).unwrap();
        // 5/6-bit channels lose precision on the way down and back up;
        // the round trip should land within one quantization step.
        assert!(r.abs_diff(200) <= 8);
        assert!(g.abs_diff(100) <= 4);
        assert!(b.abs_diff(50) <= 8);
    }

    // ── ZRLE format policy (§4.7) ─────────────────────────────────────

    #[test]
    fn zrle_unsupported_for_wide_channel_depth32() {
        let mut pf = PixelFormat::rgba32();
        pf.red_max = 1023; // 10-bit channel, can't fit in a CPIXEL byte
        assert!(zrle_unsupported_for_format(&pf));
    }

    #[test]
    fn zrle_supported_for_standard_depth32() {
        let pf = PixelFormat::rgba32();
        assert!(!zrle_unsupported_for_format(&pf));
    }

    #[test]
    fn zrle_policy_drops_zrle_when_unsupported() {
        let mut pf = PixelFormat::rgba32();
        pf.red_max = 1023;
        let encs = vec![EncodingType::ZRLE, EncodingType::Raw];
        let filtered = apply_zrle_format_policy(encs, &pf);
        assert!(!filtered.contains(&EncodingType::ZRLE));
        assert!(filtered.contains(&EncodingType::Raw));
    }

    #[test]
    fn zrle_policy_keeps_zrle_when_supported() {
        let pf = PixelFormat::rgba32();
        let encs = vec![EncodingType::ZRLE, EncodingType::Raw];
        let filtered = apply_zrle_format_policy(encs, &pf);
        assert!(filtered.contains(&EncodingType::ZRLE));
    }
}

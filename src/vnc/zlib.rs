//! The five independent zlib sub-streams used by Tight (§4.3).
//!
//! Tight multiplexes up to 4 general-purpose deflate streams plus one
//! reserved for JPEG-adjacent metadata onto the same TCP connection; each
//! stream keeps its own inflate state across rectangles for the life of
//! the connection. ZRLE uses a single persistent stream, which is just
//! this reader sized to one context.

use flate2::{Decompress, FlushDecompress, Status};

use crate::vnc::error::VncError;

/// Number of independent zlib contexts Tight multiplexes (§4.3).
pub const TIGHT_ZLIB_STREAMS: usize = 4;

/// A single persistent inflate context, fed length-prefixed or
/// caller-delimited compressed chunks and producing decompressed bytes.
pub struct ZlibStream {
    inner: Decompress,
}

impl ZlibStream {
    pub fn new() -> Self {
        Self { inner: Decompress::new(true) }
    }

    /// Inflate `compressed` fully, appending output to `out`. Tight and
    /// ZRLE both frame their compressed payloads with an explicit byte
    /// length read off the wire beforehand, so the caller always knows
    /// exactly how many compressed bytes belong to this call.
    pub fn inflate(&mut self, compressed: &[u8], out: &mut Vec<u8>) -> Result<(), VncError> {
        let start_out = self.inner.total_out();
        let mut scratch = [0u8; 4096];
        let mut input = compressed;

        loop {
            let before_in = self.inner.total_in();
            let before_out = self.inner.total_out();
            let status = self
                .inner
                .decompress(input, &mut scratch, FlushDecompress::None)
                .map_err(|e| VncError::decode(format!("zlib inflate failed: {e}")))?;

            let produced = (self.inner.total_out() - before_out) as usize;
            out.extend_from_slice(&scratch[..produced]);

            let consumed = (self.inner.total_in() - before_in) as usize;
            input = &input[consumed..];

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError if input.is_empty() && produced == 0 => break,
                _ => {
                    if input.is_empty() {
                        break;
                    }
                }
            }
        }

        let _ = start_out;
        Ok(())
    }
}

impl Default for ZlibStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Tight's four-context zlib pool, indexed by the 2-bit stream selector
/// packed into the compression-control byte of each Tight rectangle.
pub struct TightZlibPool {
    streams: [ZlibStream; TIGHT_ZLIB_STREAMS],
}

impl TightZlibPool {
    pub fn new() -> Self {
        Self {
            streams: [ZlibStream::new(), ZlibStream::new(), ZlibStream::new(), ZlibStream::new()],
        }
    }

    /// Inflate `compressed` using stream `index` (0..4), appending to `out`.
    pub fn inflate(&mut self, index: usize, compressed: &[u8], out: &mut Vec<u8>) -> Result<(), VncError> {
        let stream = self
            .streams
            .get_mut(index)
            .ok_or_else(|| VncError::protocol(format!("Tight zlib stream index out of range: {index}")))?;
        stream.inflate(compressed, out)
    }

    /// Reinitialize stream `index`, discarding its dictionary. The server
    /// requests this via the reset-flags nibble of a Tight control byte
    /// when it knows the client has no use for the stream's prior state.
    pub fn reset(&mut self, index: usize) -> Result<(), VncError> {
        let stream = self
            .streams
            .get_mut(index)
            .ok_or_else(|| VncError::protocol(format!("Tight zlib stream index out of range: {index}")))?;
        *stream = ZlibStream::new();
        Ok(())
    }
}

impl Default for TightZlibPool {
    fn default() -> Self {
        Self::new()
    }
}

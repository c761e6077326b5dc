//! Tight's gradient predictor filter.
//!
//! Applied per colour channel independently: each sample is delta-coded
//! against `left + above - above_left`, saturated into `0..=255` before
//! subtraction, so flat gradients compress to near-zero after the
//! filter runs and before the zlib stage compresses further.

/// Undo the gradient filter over `channels`-byte-per-pixel row-major
/// `data` (e.g. 3 for TPIXEL RGB), reconstructing the original samples
/// in place.
pub fn unfilter(data: &mut [u8], width: usize, height: usize, channels: usize) {
    for row in 0..height {
        for col in 0..width {
            for c in 0..channels {
                let idx = (row * width + col) * channels + c;
                if idx >= data.len() {
                    continue;
                }
                let left = if col > 0 { data[idx - channels] as i32 } else { 0 };
                let up = if row > 0 { data[idx - width * channels] as i32 } else { 0 };
                let upleft = if row > 0 && col > 0 {
                    data[idx - width * channels - channels] as i32
                } else {
                    0
                };
                let predicted = saturate(left + up - upleft);
                data[idx] = data[idx].wrapping_add(predicted as u8);
            }
        }
    }
}

/// Apply the gradient filter (used by tests to build encoder-shaped
/// fixtures; the production engine is decode-only).
pub fn filter(data: &[u8], width: usize, height: usize, channels: usize) -> Vec<u8> {
    let mut out = data.to_vec();
    for row in (0..height).rev() {
        for col in (0..width).rev() {
            for c in (0..channels).rev() {
                let idx = (row * width + col) * channels + c;
                if idx >= out.len() {
                    continue;
                }
                let left = if col > 0 { data[idx - channels] as i32 } else { 0 };
                let up = if row > 0 { data[idx - width * channels] as i32 } else { 0 };
                let upleft = if row > 0 && col > 0 {
                    data[idx - width * channels - channels] as i32
                } else {
                    0
                };
                let predicted = saturate(left + up - upleft);
                out[idx] = data[idx].wrapping_sub(predicted as u8);
            }
        }
    }
    out
}

fn saturate(v: i32) -> i32 {
    v.clamp(0, 255)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_then_unfilter_roundtrips() {
        let width = 4;
        let height = 4;
        let channels = 3;
        let mut data = Vec::with_capacity(width * height * channels);
        for i in 0..width * height * channels {
            data.push((i * 17 % 256) as u8);
        }
        let filtered = filter(&data, width, height, channels);
        let mut restored = filtered.clone();
        unfilter(&mut restored, width, height, channels);
        assert_eq!(restored, data);
    }

    #[test]
    fn flat_colour_filters_to_near_zero_after_first_pixel() {
        let width = 3;
        let height = 3;
        let channels = 1;
        let data = vec![100u8; width * height];
        let filtered = filter(&data, width, height, channels);
        // First pixel has no predictor context, so it survives unchanged.
        assert_eq!(filtered[0], 100);
        // Every other pixel's predictor matches the flat value exactly.
        assert!(filtered[1..].iter().all(|&b| b == 0));
    }
}

//! Pixel converters into packed RGB24.
//!
//! Every converter is a pure `fn(&[u8]) -> Vec<u8>` so it can be stored in
//! the [`FormatRegistry`](crate::FormatRegistry) without any shared state.

/// 8-bit grayscale → RGB24, each sample `v` becomes `(v, v, v)`.
pub fn gray_to_rgb(gray: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(gray.len() * 3);
    for &v in gray {
        rgb.extend_from_slice(&[v, v, v]);
    }
    rgb
}

/// RGB24 passthrough. Always copies so the frame never aliases driver memory.
pub fn rgb_passthrough(rgb: &[u8]) -> Vec<u8> {
    rgb.to_vec()
}

/// Packed YUYV 4:2:2 → RGB24.
///
/// Works on `(Y1, U, Y2, V)` macropixels and emits two RGB pixels per group.
/// The arithmetic is deliberately done on wrapping `u8` values with
/// truncating division: descriptors enrolled with earlier builds were computed
/// from exactly this transform, so it must stay bit-for-bit identical.
/// A trailing partial macropixel is ignored.
pub fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 4 * 6);
    for px in yuyv.chunks_exact(4) {
        let (y1, u, y2, v) = (px[0], px[1], px[2], px[3]);
        let u = u.wrapping_sub(128);
        let v = v.wrapping_sub(128);

        let dr = v.wrapping_mul(2) / 3;
        let db = u.wrapping_mul(2) / 3;
        let (du, dv) = (u / 3, v / 3);

        rgb.extend_from_slice(&[
            y1.wrapping_add(dr),
            y1.wrapping_sub(du).wrapping_sub(dv),
            y1.wrapping_add(db),
            y2.wrapping_add(dr),
            y2.wrapping_sub(du).wrapping_sub(dv),
            y2.wrapping_add(db),
        ]);
    }
    rgb
}

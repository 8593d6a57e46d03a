use rayon::prelude::*;

use crate::foundation::core::Resolution;
use crate::foundation::math::mul_div255_u16;

pub(crate) type Rgba8 = [u8; 4];

/// Premultiplied `src` over an opaque `dst`, weighted by `op` (0..=255). Result is opaque.
#[inline]
pub(crate) fn over_opaque(dst: Rgba8, src: Rgba8, op: u16) -> Rgba8 {
    let sa = mul_div255_u16(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }
    let inv = 255u16 - sa;
    let mut out = [0u8, 0, 0, 255];
    for i in 0..3 {
        let sc = mul_div255_u16(u16::from(src[i]), op);
        let dc = mul_div255_u16(u16::from(dst[i]), inv);
        out[i] = (sc + dc).min(255) as u8;
    }
    out
}

/// Visible span of a layer placed at `offset` over an axis of `len` pixels.
///
/// Returns `(dst_start, src_start, count)`.
fn clip_axis(offset: i32, len: u32) -> Option<(usize, usize, usize)> {
    let len = i64::from(len);
    let offset = i64::from(offset);
    let start = offset.max(0);
    let end = (offset + len).min(len);
    if start >= end {
        return None;
    }
    Some((
        start as usize,
        (start - offset) as usize,
        (end - start) as usize,
    ))
}

/// Narrow a `(dst_start, src_start, count)` row span to the band `[start, end)`.
fn clip_band(
    (dst, src, count): (usize, usize, usize),
    (start, end): (u32, u32),
) -> Option<(usize, usize, usize)> {
    let lo = dst.max(start as usize);
    let hi = (dst + count).min(end as usize);
    if lo >= hi {
        return None;
    }
    Some((lo, src + (lo - dst), hi - lo))
}

/// Composite `layer` onto `out` (already holding the accumulator) at `(x, y)`.
///
/// Both buffers are `res`-sized RGBA8. The layer is clipped to the frame and to the output row
/// band `[rows.0, rows.1)`. With `occlude` set the visible layer rect replaces the accumulator
/// pixels outright; otherwise it blends with weight `op` (0..=255).
pub(crate) fn composite_into(
    out: &mut [u8],
    layer: &[u8],
    res: Resolution,
    (x, y): (i32, i32),
    rows: (u32, u32),
    op: u16,
    occlude: bool,
) {
    let (Some((dx, sx, cols)), Some((dy, sy, rows))) = (
        clip_axis(x, res.width),
        clip_axis(y, res.height).and_then(|span| clip_band(span, rows)),
    ) else {
        return;
    };
    if op == 0 {
        return;
    }
    let row_bytes = res.width as usize * 4;

    out.par_chunks_mut(row_bytes)
        .skip(dy)
        .take(rows)
        .enumerate()
        .for_each(|(r, dst_row)| {
            let src_off = (sy + r) * row_bytes + sx * 4;
            let src = &layer[src_off..src_off + cols * 4];
            let dst = &mut dst_row[dx * 4..(dx + cols) * 4];
            if occlude {
                dst.copy_from_slice(src);
                return;
            }
            for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                let px = over_opaque([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]], op);
                d.copy_from_slice(&px);
            }
        });
}

#[cfg(test)]
#[path = "../../tests/unit/accel/blend.rs"]
mod tests;

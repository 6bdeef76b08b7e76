//! Bilinear sampling of 8-bit grayscale buffers.

/// Sample `src` at a fractional pixel position, clamping at the borders.
pub fn sample_bilinear(src: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    if width == 0 || height == 0 {
        return 0.0;
    }
    let x0 = (x.floor() as i32).clamp(0, width as i32 - 1) as usize;
    let y0 = (y.floor() as i32).clamp(0, height as i32 - 1) as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (x - x.floor()).clamp(0.0, 1.0);
    let fy = (y - y.floor()).clamp(0.0, 1.0);

    let tl = src[y0 * width + x0] as f32;
    let tr = src[y0 * width + x1] as f32;
    let bl = src[y1 * width + x0] as f32;
    let br = src[y1 * width + x1] as f32;

    tl * (1.0 - fx) * (1.0 - fy) + tr * fx * (1.0 - fy) + bl * (1.0 - fx) * fy + br * fx * fy
}

/// Resize the whole buffer to `new_w` x `new_h` with pixel-centre alignment.
pub fn resize(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let sx = width as f32 / new_w.max(1) as f32;
    let sy = height as f32 / new_h.max(1) as f32;
    let mut out = vec![0u8; new_w * new_h];
    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * sy - 0.5;
        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * sx - 0.5;
            let v = sample_bilinear(src, width, height, src_x, src_y);
            out[y * new_w + x] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

use image::imageops::FilterType;

use crate::camera::Viewport;
use crate::error::EdgeError;
use crate::types::EdgeResult;

/// Crop, resize and re-encode one camera frame. CPU-bound; callers run
/// this on the blocking pool.
pub fn process_frame(
    frame: &[u8],
    viewport: Viewport,
    width: u32,
    quality: u8,
) -> EdgeResult<Vec<u8>> {
    let mut img = image::load_from_memory(frame)
        .map_err(|e| EdgeError::FrameProcessing(e.to_string()))?;

    if !viewport.is_full_frame() {
        let (crop_x, crop_y, crop_w, crop_h) = crop_box(viewport, img.width(), img.height());
        img = img.crop_imm(crop_x, crop_y, crop_w, crop_h);
    }

    // Only ever downscale; upscaling wastes bandwidth on blur.
    if img.width() > width {
        let new_height = ((img.height() as u64 * width as u64) / img.width() as u64).max(1) as u32;
        img = img.resize_exact(width, new_height, FilterType::Triangle);
    }

    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| EdgeError::FrameProcessing(e.to_string()))?;
    Ok(buf)
}

/// Normalized viewport to pixel crop box, clamped so the result is
/// non-empty and inside the image.
fn crop_box(viewport: Viewport, img_w: u32, img_h: u32) -> (u32, u32, u32, u32) {
    let left = (viewport.x * img_w as f32).floor() as i64;
    let top = (viewport.y * img_h as f32).floor() as i64;
    let right = ((viewport.x + viewport.w) * img_w as f32).floor() as i64;
    let bottom = ((viewport.y + viewport.h) * img_h as f32).floor() as i64;

    let left = left.clamp(0, img_w as i64 - 1);
    let top = top.clamp(0, img_h as i64 - 1);
    let right = right.clamp(left + 1, img_w as i64);
    let bottom = bottom.clamp(top + 1, img_h as i64);

    (
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    )
}

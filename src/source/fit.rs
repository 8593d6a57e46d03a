use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::foundation::core::Resolution;
use crate::source::media::FitMode;

const PAD: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Map `img` onto `target` per `mode`. Images already at the target pass through untouched.
pub fn fit_image(img: RgbaImage, target: Resolution, mode: FitMode) -> RgbaImage {
    let (w, h) = img.dimensions();
    if (w, h) == (target.width, target.height) || target.is_empty() {
        return img;
    }
    match mode {
        FitMode::Stretch => {
            imageops::resize(&img, target.width, target.height, FilterType::Lanczos3)
        }
        FitMode::Contain => {
            let scale = f64::min(
                f64::from(target.width) / f64::from(w.max(1)),
                f64::from(target.height) / f64::from(h.max(1)),
            );
            let sw = ((f64::from(w) * scale).round() as u32).clamp(1, target.width);
            let sh = ((f64::from(h) * scale).round() as u32).clamp(1, target.height);
            let scaled = imageops::resize(&img, sw, sh, FilterType::Lanczos3);
            let mut canvas = RgbaImage::from_pixel(target.width, target.height, PAD);
            let x = (target.width - sw) / 2;
            let y = (target.height - sh) / 2;
            imageops::replace(&mut canvas, &scaled, i64::from(x), i64::from(y));
            canvas
        }
        FitMode::CropTopLeft => {
            let mut canvas = RgbaImage::from_pixel(target.width, target.height, PAD);
            imageops::replace(&mut canvas, &img, 0, 0);
            canvas
        }
    }
}

/// Equivalent ffmpeg filter chain, for adapters that scale during decode.
pub fn ffmpeg_filter(target: Resolution, mode: FitMode) -> String {
    let (w, h) = (target.width, target.height);
    match mode {
        FitMode::Stretch => format!("scale={w}:{h}"),
        FitMode::Contain => format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black"
        ),
        FitMode::CropTopLeft => {
            format!("crop='min(iw,{w})':'min(ih,{h})':0:0,pad={w}:{h}:0:0:black")
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/source/fit.rs"]
mod tests;

//! Letterbox preprocessing.
//!
//! Images of any size are fitted onto a fixed square canvas: a uniform
//! scale keeps the aspect ratio and the remainder is padded with a constant
//! colour, split evenly on both sides. The returned [`LetterboxTransform`]
//! carries what is needed to map canvas boxes back onto the source image.

use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::detect::BoundingBox;

pub const DEFAULT_TARGET_SIZE: u32 = 640;
pub const DEFAULT_FILL: [u8; 3] = [114, 114, 114];

/// Fixed-canvas letterbox.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Letterbox {
    pub target_size: u32,
    pub fill: [u8; 3],
}

impl Default for Letterbox {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_TARGET_SIZE,
            fill: DEFAULT_FILL,
        }
    }
}

impl Letterbox {
    pub fn new(target_size: u32) -> Self {
        Self {
            target_size,
            ..Self::default()
        }
    }

    /// Fit `image` onto the canvas.
    ///
    /// Grayscale and alpha images are converted to 3-channel RGB before
    /// resizing.
    pub fn apply(&self, image: &DynamicImage) -> Result<(RgbImage, LetterboxTransform)> {
        if self.target_size == 0 {
            return Err(anyhow!("letterbox target size must be positive"));
        }
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot letterbox an empty {}x{} image", width, height));
        }

        let target = self.target_size;
        let scale = (target as f32 / height as f32).min(target as f32 / width as f32);
        let new_w = ((width as f32 * scale) as u32).clamp(1, target);
        let new_h = ((height as f32 * scale) as u32).clamp(1, target);

        let resized = if (new_w, new_h) == (width, height) {
            rgb
        } else {
            image::imageops::resize(&rgb, new_w, new_h, FilterType::Triangle)
        };

        let pad_left = (target - new_w) / 2;
        let pad_top = (target - new_h) / 2;

        let mut canvas = RgbImage::from_pixel(target, target, Rgb(self.fill));
        image::imageops::replace(&mut canvas, &resized, pad_left as i64, pad_top as i64);

        log::debug!(
            "letterboxed {}x{} -> {}x{} (scale {:.4}, pad {},{})",
            width,
            height,
            new_w,
            new_h,
            scale,
            pad_left,
            pad_top
        );

        Ok((
            canvas,
            LetterboxTransform {
                scale,
                pad_left,
                pad_top,
                target_size: target,
                original_width: width,
                original_height: height,
            },
        ))
    }
}

/// Parameters of one letterbox application.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub pad_left: u32,
    pub pad_top: u32,
    pub target_size: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl LetterboxTransform {
    /// Original-image box to canvas coordinates.
    pub fn to_canvas(&self, bbox: BoundingBox) -> BoundingBox {
        let (px, py) = (self.pad_left as f32, self.pad_top as f32);
        BoundingBox::new(
            bbox.x1 * self.scale + px,
            bbox.y1 * self.scale + py,
            bbox.x2 * self.scale + px,
            bbox.y2 * self.scale + py,
        )
    }

    /// Canvas box back to original-image coordinates. No clamping.
    pub fn to_original(&self, bbox: BoundingBox) -> BoundingBox {
        let (px, py) = (self.pad_left as f32, self.pad_top as f32);
        BoundingBox::new(
            (bbox.x1 - px) / self.scale,
            (bbox.y1 - py) / self.scale,
            (bbox.x2 - px) / self.scale,
            (bbox.y2 - py) / self.scale,
        )
    }
}

/// Contrast lift plus light denoising applied to the canvas before
/// inference.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Enhancement {
    pub alpha: f32,
    pub beta: f32,
    pub blur: bool,
}

impl Default for Enhancement {
    fn default() -> Self {
        Self {
            alpha: 1.1,
            beta: 5.0,
            blur: true,
        }
    }
}

/// 3-tap Gaussian, sigma derived from a 3x3 window.
const BLUR_KERNEL: [f32; 3] = [0.25, 0.5, 0.25];

impl Enhancement {
    pub fn apply(&self, canvas: &mut RgbImage) {
        for pixel in canvas.pixels_mut() {
            for channel in pixel.0.iter_mut() {
                let v = (self.alpha * *channel as f32 + self.beta).abs().round();
                *channel = v.min(255.0) as u8;
            }
        }
        if self.blur {
            *canvas = blur_reflect101(canvas);
        }
    }
}

/// 3x3 blur with mirrored borders (`dcb|abcd|cba`). The one-pixel ring
/// added here absorbs the filter's own edge clamping and is cropped off.
fn blur_reflect101(canvas: &RgbImage) -> RgbImage {
    let (width, height) = canvas.dimensions();
    let mirror = |v: i64, len: u32| -> u32 {
        let last = len as i64 - 1;
        let m = if v < 0 {
            -v
        } else if v > last {
            2 * last - v
        } else {
            v
        };
        m.clamp(0, last) as u32
    };
    let padded = RgbImage::from_fn(width + 2, height + 2, |x, y| {
        *canvas.get_pixel(
            mirror(x as i64 - 1, width),
            mirror(y as i64 - 1, height),
        )
    });
    let blurred = imageproc::filter::separable_filter_equal(&padded, &BLUR_KERNEL);
    image::imageops::crop_imm(&blurred, 1, 1, width, height).to_image()
}

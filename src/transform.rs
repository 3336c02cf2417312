use crate::config::ImageFormat;
use crate::ImageKitError;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder};
use std::io::Cursor;

pub mod params;

pub use params::{FitMode, TransformParams};

/// Decodes raw image bytes into memory-resident representation.
///
/// Returns the detected format too when it is one we can encode back, so the
/// caller can keep the source format when no `format` modifier is given.
///
/// # Errors
/// Returns `ImageKitError::TransformError` if the format cannot be detected
/// from magic bytes or the data is corrupted.
pub fn decode_image(bytes: &[u8]) -> Result<(DynamicImage, Option<ImageFormat>), ImageKitError> {
    let guessed = image::guess_format(bytes)
        .map_err(|e| ImageKitError::TransformError(e.to_string()))?;

    let img = image::load_from_memory_with_format(bytes, guessed)
        .map_err(|e| ImageKitError::TransformError(e.to_string()))?;

    let fmt = match guessed {
        image::ImageFormat::Jpeg => Some(ImageFormat::jpeg),
        image::ImageFormat::Png => Some(ImageFormat::png),
        image::ImageFormat::WebP => Some(ImageFormat::webp),
        image::ImageFormat::Avif => Some(ImageFormat::avif),
        image::ImageFormat::Gif => Some(ImageFormat::gif),
        image::ImageFormat::Tiff => Some(ImageFormat::tiff),
        _ => None,
    };

    Ok((img, fmt))
}

/// Resizes image according to the requested box and fit mode.
///
/// # Behavior
/// - Neither dimension: return original
/// - One dimension: scale the other proportionally
/// - Both, `contain` (default): fit inside the box keeping aspect ratio
/// - Both, `cover`: fill the box and crop the overflow
/// - Both, `fill`: stretch to the exact box
///
/// Minimum dimension is clamped to 1 pixel to prevent degenerate images. A
/// proportionally derived side larger than `max_dimension` is an
/// `InvalidArgument` error.
pub fn resize_image(
    img: DynamicImage,
    w: Option<u32>,
    h: Option<u32>,
    fit: Option<FitMode>,
    max_dimension: u32,
) -> Result<DynamicImage, ImageKitError> {
    let (orig_w, orig_h) = img.dimensions();

    let (target_w, target_h) = match (w, h) {
        (None, None) => return Ok(img),
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => {
            let ratio = w as f32 / orig_w as f32;
            (w, (orig_h as f32 * ratio).round() as u32)
        }
        (None, Some(h)) => {
            let ratio = h as f32 / orig_h as f32;
            ((orig_w as f32 * ratio).round() as u32, h)
        }
    };
    let (target_w, target_h) = (target_w.max(1), target_h.max(1));
    if target_w > max_dimension || target_h > max_dimension {
        return Err(ImageKitError::InvalidArgument(format!(
            "Output {}x{} exceeds the {}px limit",
            target_w, target_h, max_dimension
        )));
    }

    // Lanczos3 provides best quality for downsampling
    let resized = match fit.unwrap_or(FitMode::Contain) {
        FitMode::Contain => img.resize(target_w, target_h, FilterType::Lanczos3),
        FitMode::Cover => img.resize_to_fill(target_w, target_h, FilterType::Lanczos3),
        FitMode::Fill => img.resize_exact(target_w, target_h, FilterType::Lanczos3),
    };
    Ok(resized)
}

/// Encodes image to specified format with quality control.
///
/// Quality applies to the lossy encoders (JPEG, WebP, AVIF) and is clamped to
/// [1, 100]. PNG, GIF and TIFF go through the `image` crate's default writers.
pub fn encode_image(
    img: &DynamicImage,
    fmt: ImageFormat,
    quality: u8,
) -> Result<Vec<u8>, ImageKitError> {
    let mut out = Vec::new();
    let q = quality.clamp(1, 100);

    match fmt {
        ImageFormat::jpeg => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let enc = JpegEncoder::new_with_quality(&mut out, q);
            enc.write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(|e| ImageKitError::TransformError(e.to_string()))?;
        }
        ImageFormat::webp => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            let encoder = webp::Encoder::from_rgba(rgba.as_raw(), w, h);
            out.extend_from_slice(&encoder.encode(q as f32));
        }
        ImageFormat::avif => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            // Speed 4 balances encoding time and compression ratio
            let enc = AvifEncoder::new_with_speed_quality(&mut out, 4, q);
            enc.write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| ImageKitError::TransformError(e.to_string()))?;
        }
        ImageFormat::png | ImageFormat::gif | ImageFormat::tiff => {
            let target = match fmt {
                ImageFormat::png => image::ImageFormat::Png,
                ImageFormat::gif => image::ImageFormat::Gif,
                _ => image::ImageFormat::Tiff,
            };
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut Cursor::new(&mut out), target)
                .map_err(|e| ImageKitError::TransformError(e.to_string()))?;
        }
    }

    Ok(out)
}

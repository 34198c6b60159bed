use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

use crate::error::{ConvertError, Result};
use crate::{Category, ConversionOptions};

/// Map a target extension onto the encoder the `image` crate should use.
pub fn image_format_for(target: &str) -> Result<ImageFormat> {
    match target {
        "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
        "png" => Ok(ImageFormat::Png),
        "gif" => Ok(ImageFormat::Gif),
        "bmp" => Ok(ImageFormat::Bmp),
        "tif" | "tiff" => Ok(ImageFormat::Tiff),
        "webp" => Ok(ImageFormat::WebP),
        other => Err(ConvertError::UnsupportedTarget {
            category: Category::Images,
            format: other.to_string(),
            allowed: Category::Images.target_formats().join(", "),
        }),
    }
}

fn supports_alpha(format: ImageFormat) -> bool {
    !matches!(format, ImageFormat::Jpeg)
}

/// Resolve the requested size against the source dimensions.
///
/// Both sides given: exact size. One side given: the other follows the
/// source aspect ratio. Neither: `None`.
pub fn target_dimensions(
    orig_w: u32,
    orig_h: u32,
    width: Option<u32>,
    height: Option<u32>,
) -> Option<(u32, u32)> {
    match (width, height) {
        (Some(w), Some(h)) => Some((w, h)),
        (Some(w), None) => {
            let h = (orig_h as f64 / orig_w.max(1) as f64 * w as f64).round() as u32;
            Some((w, h.max(1)))
        }
        (None, Some(h)) => {
            let w = (orig_w as f64 / orig_h.max(1) as f64 * h as f64).round() as u32;
            Some((w.max(1), h))
        }
        (None, None) => None,
    }
}

pub fn convert_image(
    input: &Path,
    output: &Path,
    target: &str,
    options: &ConversionOptions,
) -> Result<()> {
    let format = image_format_for(target)?;
    let mut img = image::open(input)?;

    let (orig_w, orig_h) = (img.width(), img.height());
    if let Some((w, h)) = target_dimensions(orig_w, orig_h, options.width, options.height) {
        if (w, h) != (orig_w, orig_h) {
            debug!(input = %input.display(), from = ?(orig_w, orig_h), to = ?(w, h), "resizing");
            img = img.resize_exact(w, h, FilterType::Lanczos3);
        }
    }

    if !supports_alpha(format) {
        img = DynamicImage::ImageRgb8(img.to_rgb8());
    }

    match format {
        ImageFormat::Jpeg => {
            let file = File::create(output).map_err(|e| ConvertError::io(output, e))?;
            let encoder =
                JpegEncoder::new_with_quality(BufWriter::new(file), options.quality.clamp(1, 100));
            img.write_with_encoder(encoder)?;
        }
        _ => {
            debug!(
                format = ?format,
                quality = options.quality,
                "quality setting ignored for lossless format"
            );
            img.save_with_format(output, format)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    #[test]
    fn dimensions_follow_aspect_ratio() {
        assert_eq!(target_dimensions(400, 200, Some(100), Some(50)), Some((100, 50)));
        assert_eq!(target_dimensions(400, 200, Some(100), None), Some((100, 50)));
        assert_eq!(target_dimensions(400, 200, None, Some(100)), Some((200, 100)));
        assert_eq!(target_dimensions(1000, 1, Some(10), None), Some((10, 1)));
        assert_eq!(target_dimensions(400, 200, None, None), None);
    }

    #[test]
    fn unknown_target_is_rejected() {
        assert!(matches!(image_format_for("svg"), Err(ConvertError::UnsupportedTarget { .. })));
        assert_eq!(image_format_for("tiff").unwrap(), ImageFormat::Tiff);
    }

    #[test]
    fn rgba_png_becomes_rgb_jpeg() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("logo.png");
        let output = dir.path().join("logo.jpg");
        RgbaImage::from_pixel(20, 10, Rgba([200, 10, 10, 128])).save(&input).unwrap();

        let opts = ConversionOptions::default().with_quality(80);
        convert_image(&input, &output, "jpg", &opts).unwrap();

        let out = image::open(&output).unwrap();
        assert_eq!((out.width(), out.height()), (20, 10));
        assert!(!out.color().has_alpha());
    }

    #[test]
    fn gif_keeps_alpha() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("logo.png");
        let output = dir.path().join("logo.gif");
        RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 10])).save(&input).unwrap();

        convert_image(&input, &output, "gif", &ConversionOptions::default()).unwrap();
        assert!(image::open(&output).unwrap().color().has_alpha());
    }
}

use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, Rgba, RgbaImage};

use crate::error::{CoreError, Result};

/// Thumbnails fit inside a 256px square.
const THUMBNAIL_MAX_DIM: u32 = 256;
const THUMBNAIL_QUALITY: f32 = 80.0;

fn encode_webp(img: &DynamicImage, quality: f32) -> Vec<u8> {
    let rgba = img.to_rgba8();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    encoder.encode(quality).to_vec()
}

/// Decode an image and produce a WebP thumbnail with its largest edge
/// capped at 256px, preserving aspect ratio.
pub fn make_thumbnail(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    let thumb = img.resize(
        THUMBNAIL_MAX_DIM,
        THUMBNAIL_MAX_DIM,
        image::imageops::FilterType::Lanczos3,
    );
    Ok(encode_webp(&thumb, THUMBNAIL_QUALITY))
}

/// Uniform gray placeholder used when no thumbnail can be extracted.
pub fn placeholder_thumbnail() -> Vec<u8> {
    let gray = image::RgbImage::from_pixel(
        THUMBNAIL_MAX_DIM,
        THUMBNAIL_MAX_DIM,
        Rgb([100, 100, 100]),
    );
    encode_webp(&DynamicImage::ImageRgb8(gray), THUMBNAIL_QUALITY)
}

/// Pixel dimensions of an encoded image.
pub fn image_dimensions(bytes: &[u8]) -> Result<(i64, i64)> {
    let img = image::load_from_memory(bytes)?;
    let (w, h) = img.dimensions();
    Ok((i64::from(w), i64::from(h)))
}

/// Decode a base64 mask payload, tolerating a data-URL prefix.
pub fn decode_mask_payload(payload: &str) -> Result<Vec<u8>> {
    let encoded = match payload.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    BASE64
        .decode(encoded.trim())
        .map_err(|err| CoreError::InvalidInput(format!("mask is not valid base64: {err}")))
}

/// Normalize a painted mask into the worker's convention.
///
/// Clients paint the region to regenerate with alpha > 0 (or brightness,
/// for grayscale masks). The worker expects the opposite: alpha 0 where
/// regeneration should occur and alpha 255 everywhere else, RGB white.
/// Accepts L, LA, and RGBA inputs; anything else is an input error.
pub fn normalize_mask(mask_bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(mask_bytes)?;
    let (width, height) = img.dimensions();

    let painted: Vec<u8> = match img {
        DynamicImage::ImageLuma8(luma) => luma.into_raw(),
        DynamicImage::ImageLumaA8(la) => la.pixels().map(|p| p.0[1]).collect(),
        DynamicImage::ImageRgba8(rgba) => rgba.pixels().map(|p| p.0[3]).collect(),
        other => {
            return Err(CoreError::InvalidInput(format!(
                "unsupported mask color mode {:?}; paint the mask in L, LA, or RGBA",
                other.color()
            )));
        }
    };

    let mut out = RgbaImage::new(width, height);
    for (pixel, alpha) in out.pixels_mut().zip(painted) {
        *pixel = Rgba([255, 255, 255, 255 - alpha]);
    }

    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(out).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, LumaA, RgbImage};

    fn to_png(img: DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn thumbnail_caps_the_long_edge() {
        let src = to_png(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            1024,
            512,
            Rgb([10, 20, 30]),
        )));
        let thumb = make_thumbnail(&src).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.dimensions(), (256, 128));
    }

    #[test]
    fn thumbnail_does_not_upscale_portrait_sources() {
        let src = to_png(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            512,
            1024,
            Rgb([10, 20, 30]),
        )));
        let thumb = make_thumbnail(&src).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.dimensions(), (128, 256));
    }

    #[test]
    fn placeholder_is_a_256_square() {
        let bytes = placeholder_thumbnail();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (256, 256));
    }

    #[test]
    fn rgba_mask_alpha_is_inverted() {
        let mut mask = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        mask.put_pixel(1, 1, Rgba([200, 10, 10, 255]));
        let png = to_png(DynamicImage::ImageRgba8(mask));

        let normalized = normalize_mask(&png).unwrap();
        let out = image::load_from_memory(&normalized).unwrap().to_rgba8();

        // Painted pixel becomes transparent, everything else opaque white.
        assert_eq!(out.get_pixel(1, 1).0, [255, 255, 255, 0]);
        assert_eq!(out.get_pixel(0, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn grayscale_mask_uses_brightness_as_paint() {
        let mut mask = GrayImage::from_pixel(2, 2, image::Luma([0]));
        mask.put_pixel(0, 0, image::Luma([255]));
        let png = to_png(DynamicImage::ImageLuma8(mask));

        let normalized = normalize_mask(&png).unwrap();
        let out = image::load_from_memory(&normalized).unwrap().to_rgba8();
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        assert_eq!(out.get_pixel(1, 1).0[3], 255);
    }

    #[test]
    fn luma_alpha_mask_uses_the_alpha_channel() {
        let mut mask = image::ImageBuffer::from_pixel(2, 1, LumaA([128u8, 0]));
        mask.put_pixel(1, 0, LumaA([128, 255]));
        let png = to_png(DynamicImage::ImageLumaA8(mask));

        let normalized = normalize_mask(&png).unwrap();
        let out = image::load_from_memory(&normalized).unwrap().to_rgba8();
        assert_eq!(out.get_pixel(0, 0).0[3], 255);
        assert_eq!(out.get_pixel(1, 0).0[3], 0);
    }

    #[test]
    fn rgb_mask_is_rejected() {
        let png = to_png(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            2,
            2,
            Rgb([255, 255, 255]),
        )));
        let err = normalize_mask(&png).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn mask_payload_decoding_handles_data_urls() {
        let raw = b"hello";
        let plain = BASE64.encode(raw);
        assert_eq!(decode_mask_payload(&plain).unwrap(), raw);

        let data_url = format!("data:image/png;base64,{plain}");
        assert_eq!(decode_mask_payload(&data_url).unwrap(), raw);

        assert!(decode_mask_payload("!!!not base64!!!").is_err());
    }

    #[test]
    fn dimensions_reads_the_header() {
        let src = to_png(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            64,
            32,
            Rgb([0, 0, 0]),
        )));
        assert_eq!(image_dimensions(&src).unwrap(), (64, 32));
    }
}

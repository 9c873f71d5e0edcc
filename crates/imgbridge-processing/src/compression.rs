use std::io::Cursor;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, GenericImageView, ImageFormat};
use imgbridge_core::{EngineCapabilities, ImageError, Result};

use crate::encoder::SaveParams;
use crate::handle::{ImageHandle, Interpretation};

const STAGE: &str = "encode";

/// Per-format encoder bridges
pub struct ImageCompressor;

impl ImageCompressor {
    /// Compress to JPEG using mozjpeg
    #[cfg(feature = "jpeg")]
    pub fn compress_jpeg(handle: &ImageHandle, params: &SaveParams) -> Result<Vec<u8>> {
        let img = handle.image();
        let (width, height) = img.dimensions();

        let (color_space, pixels) = if handle.interpretation() == Interpretation::Cmyk {
            (mozjpeg::ColorSpace::JCS_CMYK, img.to_rgba8().into_raw())
        } else if handle.band_count() == 1 {
            (mozjpeg::ColorSpace::JCS_GRAYSCALE, img.to_luma8().into_raw())
        } else {
            (mozjpeg::ColorSpace::JCS_RGB, img.to_rgb8().into_raw())
        };

        let mut comp = mozjpeg::Compress::new(color_space);
        comp.set_size(width as usize, height as usize);
        comp.set_quality(params.quality as f32);
        if params.interlace {
            comp.set_progressive_mode();
        }
        comp.set_optimize_coding(true);

        let mut comp = comp
            .start_compress(Vec::new())
            .map_err(|e| ImageError::encode(STAGE, "jpeg", e))?;
        comp.write_scanlines(&pixels)
            .map_err(|e| ImageError::encode(STAGE, "jpeg", e))?;
        comp.finish().map_err(|e| ImageError::encode(STAGE, "jpeg", e))
    }

    /// Compress to PNG.
    ///
    /// `compression` picks the zlib level; `effort` picks the row filter strategy.
    pub fn compress_png(
        handle: &ImageHandle,
        params: &SaveParams,
        caps: &EngineCapabilities,
    ) -> Result<Vec<u8>> {
        let compression = match params.compression {
            0..=3 => CompressionType::Fast,
            4..=6 => CompressionType::Default,
            _ => CompressionType::Best,
        };
        let filter = if caps.png_effort_from_speed {
            let effort = 10u8.saturating_sub(params.speed.min(10));
            if effort <= 3 {
                FilterType::Sub
            } else {
                FilterType::Adaptive
            }
        } else {
            FilterType::Adaptive
        };

        if params.palette || params.interlace {
            tracing::debug!(
                palette = params.palette,
                interlace = params.interlace,
                "PNG palette and interlace output are not available, writing truecolour"
            );
        }

        let mut buffer = Vec::new();
        let encoder = PngEncoder::new_with_quality(&mut buffer, compression, filter);
        handle
            .image()
            .write_with_encoder(encoder)
            .map_err(|e| ImageError::encode(STAGE, "png", e))?;

        Ok(buffer)
    }

    /// Compress to WebP
    #[cfg(feature = "webp")]
    pub fn compress_webp(handle: &ImageHandle, params: &SaveParams) -> Result<Vec<u8>> {
        let img = handle.image();
        let (width, height) = img.dimensions();

        let webp_data = if handle.has_alpha() {
            let rgba_img = img.to_rgba8();
            let encoder = webp::Encoder::from_rgba(&rgba_img, width, height);
            if params.lossless {
                encoder.encode_lossless().to_vec()
            } else {
                encoder.encode(params.quality as f32).to_vec()
            }
        } else {
            let rgb_img = img.to_rgb8();
            let encoder = webp::Encoder::from_rgb(&rgb_img, width, height);
            if params.lossless {
                encoder.encode_lossless().to_vec()
            } else {
                encoder.encode(params.quality as f32).to_vec()
            }
        };

        Ok(webp_data)
    }

    /// Compress to AVIF
    #[cfg(feature = "avif")]
    pub fn compress_avif(handle: &ImageHandle, params: &SaveParams) -> Result<Vec<u8>> {
        let img = handle.image();
        let (width, height) = img.dimensions();

        let quality = if params.lossless {
            100.0
        } else {
            params.quality as f32
        };
        let encoder = ravif::Encoder::new()
            .with_quality(quality)
            .with_alpha_quality(quality)
            .with_speed(params.speed.clamp(1, 10));

        let encoded = if handle.has_alpha() {
            let rgba_img = img.to_rgba8();
            let rgba_data: Vec<rgb::RGBA8> = rgba_img
                .as_raw()
                .chunks_exact(4)
                .map(|chunk| rgb::RGBA8::new(chunk[0], chunk[1], chunk[2], chunk[3]))
                .collect();
            let img_buf = ravif::Img::new(rgba_data.as_slice(), width as usize, height as usize);
            encoder.encode_rgba(img_buf)
        } else {
            let rgb_img = img.to_rgb8();
            let rgb_data: Vec<rgb::RGB8> = rgb_img
                .as_raw()
                .chunks_exact(3)
                .map(|chunk| rgb::RGB8::new(chunk[0], chunk[1], chunk[2]))
                .collect();
            let img_buf = ravif::Img::new(rgb_data.as_slice(), width as usize, height as usize);
            encoder.encode_rgb(img_buf)
        }
        .map_err(|e| ImageError::encode(STAGE, "avif", e))?;

        Ok(encoded.avif_file)
    }

    /// Compress through the `image` crate's writer for `format`
    pub fn compress_generic(handle: &ImageHandle, format: ImageFormat) -> Result<Vec<u8>> {
        let img = handle.image();
        // GIF and BMP writers only take 8-bit samples.
        let img = match format {
            ImageFormat::Gif => DynamicImage::ImageRgba8(img.to_rgba8()),
            ImageFormat::Bmp if handle.bits_per_sample() > 8 => {
                if handle.has_alpha() {
                    DynamicImage::ImageRgba8(img.to_rgba8())
                } else {
                    DynamicImage::ImageRgb8(img.to_rgb8())
                }
            }
            _ => img.clone(),
        };

        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), format)
            .map_err(|e| ImageError::encode(STAGE, format!("{:?}", format).to_lowercase(), e))?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn rgb_handle() -> ImageHandle {
        ImageHandle::new(DynamicImage::ImageRgb8(RgbImage::from_fn(32, 16, |x, y| {
            Rgb([(x * 8) as u8, (y * 16) as u8, 128])
        })))
    }

    #[cfg(feature = "jpeg")]
    #[test]
    fn test_compress_jpeg_produces_jpeg() {
        let bytes = ImageCompressor::compress_jpeg(&rgb_handle(), &SaveParams::default()).unwrap();
        assert_eq!(&bytes[..3], &[0xFF, 0xD8, 0xFF]);
    }

    #[cfg(feature = "jpeg")]
    #[test]
    fn test_jpeg_quality_affects_size() {
        let handle = rgb_handle();
        let low = SaveParams {
            quality: 20,
            ..Default::default()
        };
        let high = SaveParams {
            quality: 95,
            ..Default::default()
        };
        let low = ImageCompressor::compress_jpeg(&handle, &low).unwrap();
        let high = ImageCompressor::compress_jpeg(&handle, &high).unwrap();
        assert!(low.len() < high.len());
    }

    #[cfg(feature = "png")]
    #[test]
    fn test_compress_png_keeps_16bit() {
        let img = DynamicImage::ImageRgb16(rgb_handle().image().to_rgb16());
        let bytes = ImageCompressor::compress_png(
            &ImageHandle::new(img),
            &SaveParams::default(),
            &EngineCapabilities::default(),
        )
        .unwrap();
        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb16);
    }

    #[cfg(feature = "webp")]
    #[test]
    fn test_compress_webp_with_alpha() {
        let handle = ImageHandle::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            8,
            8,
            Rgba([255, 0, 0, 128]),
        )));
        let params = SaveParams {
            lossless: true,
            ..Default::default()
        };
        let bytes = ImageCompressor::compress_webp(&handle, &params).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
    }

    #[cfg(feature = "gif")]
    #[test]
    fn test_compress_gif_downconverts() {
        let img = DynamicImage::ImageRgb16(rgb_handle().image().to_rgb16());
        let bytes = ImageCompressor::compress_generic(&ImageHandle::new(img), ImageFormat::Gif).unwrap();
        assert!(bytes.starts_with(b"GIF"));
    }
}

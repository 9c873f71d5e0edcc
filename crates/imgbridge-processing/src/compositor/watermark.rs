use image::{imageops, DynamicImage, GrayImage};
use imgbridge_core::{ImageError, Result};

use crate::colour::ColourOps;
use crate::handle::{ImageHandle, Interpretation};
use crate::image::geometry::{ExtendMode, ImageGeometry};
use crate::raster::{self, alpha_plane, select_dynamic};

const STAGE: &str = "watermark_image";

/// Image watermark parameters
#[derive(Debug, Clone)]
pub struct WatermarkImageSpec {
    pub overlay: ImageHandle,
    pub left: i32,
    pub top: i32,
    /// 0 means fully opaque
    pub opacity: f32,
}

/// Named anchor for placing an overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
    Custom { x: i32, y: i32 },
}

impl WatermarkPosition {
    /// Offset of an `overlay` sized image inside `base`
    pub fn offset(self, base: (u32, u32), overlay: (u32, u32)) -> (i32, i32) {
        let right = base.0 as i64 - overlay.0 as i64;
        let bottom = base.1 as i64 - overlay.1 as i64;
        let (x, y) = match self {
            WatermarkPosition::TopLeft => (0, 0),
            WatermarkPosition::TopRight => (right, 0),
            WatermarkPosition::BottomLeft => (0, bottom),
            WatermarkPosition::BottomRight => (right, bottom),
            WatermarkPosition::Center => (right / 2, bottom / 2),
            WatermarkPosition::Custom { x, y } => (x as i64, y as i64),
        };
        (x as i32, y as i32)
    }
}

impl WatermarkImageSpec {
    pub fn at(overlay: ImageHandle, base: &ImageHandle, position: WatermarkPosition, opacity: f32) -> Self {
        let (left, top) = position.offset(base.dimensions(), overlay.dimensions());
        Self {
            overlay,
            left,
            top,
            opacity,
        }
    }
}

pub struct ImageWatermark;

impl ImageWatermark {
    /// Blend `spec.overlay` onto `base` weighted by the overlay's alpha and opacity
    pub fn apply(base: ImageHandle, spec: WatermarkImageSpec) -> Result<ImageHandle> {
        let opacity = if spec.opacity > 0.0 {
            spec.opacity.min(1.0)
        } else {
            1.0
        };

        let base = ensure_alpha(base, "base")?;
        let overlay = match spec.overlay.interpretation() {
            Interpretation::Cmyk => ColourOps::to_colourspace(spec.overlay, Interpretation::Srgb)?,
            _ => spec.overlay,
        };
        let overlay = ensure_alpha(overlay, "overlay")?;

        let (width, height) = base.dimensions();
        let (ow, oh) = overlay.dimensions();
        check_fit(spec.left, spec.top, (ow, oh), (width, height))?;

        let converted = raster::convert_to(overlay.image(), base.image().color()).ok_or_else(|| {
            ImageError::transform(
                STAGE,
                format!("cannot convert overlay to {:?}", base.image().color()),
            )
        })?;
        let overlay = overlay.with_image(converted);

        let mut mask = GrayImage::new(width, height);
        let overlay_alpha = scale_alpha(&overlay_alpha(overlay.image())?, opacity);
        imageops::replace(&mut mask, &overlay_alpha, spec.left as i64, spec.top as i64);

        let positioned = ImageGeometry::embed(
            overlay,
            spec.left,
            spec.top,
            width,
            height,
            ExtendMode::Black,
            None,
        )?;

        tracing::debug!(
            left = spec.left,
            top = spec.top,
            overlay_width = ow,
            overlay_height = oh,
            opacity = opacity,
            "Applying image watermark"
        );

        let out = select_dynamic(STAGE, &mask, positioned.image(), base.image())?;
        Ok(base.with_image(out))
    }
}

fn ensure_alpha(handle: ImageHandle, param: &str) -> Result<ImageHandle> {
    if handle.has_alpha() {
        return Ok(handle);
    }
    if handle.interpretation() == Interpretation::Cmyk {
        return Err(ImageError::transform(
            STAGE,
            format!("cannot add an alpha band to CMYK {}", param),
        ));
    }
    let image = raster::with_opaque_alpha(handle.image().clone());
    Ok(handle.with_image(image))
}

fn check_fit(left: i32, top: i32, overlay: (u32, u32), base: (u32, u32)) -> Result<()> {
    let fits = |offset: i32, size: u32, limit: u32| {
        offset >= 0 && offset as i64 + size as i64 <= limit as i64
    };
    if !fits(left, overlay.0, base.0) {
        return Err(ImageError::geometry(
            STAGE,
            "left",
            format!(
                "overlay {} px wide at {} does not fit in {} px",
                overlay.0, left, base.0
            ),
        ));
    }
    if !fits(top, overlay.1, base.1) {
        return Err(ImageError::geometry(
            STAGE,
            "top",
            format!(
                "overlay {} px high at {} does not fit in {} px",
                overlay.1, top, base.1
            ),
        ));
    }
    Ok(())
}

fn overlay_alpha(image: &DynamicImage) -> Result<GrayImage> {
    match image {
        DynamicImage::ImageLumaA8(buf) => Ok(alpha_plane(buf)),
        DynamicImage::ImageRgba8(buf) => Ok(alpha_plane(buf)),
        DynamicImage::ImageLumaA16(buf) => Ok(alpha_plane(buf)),
        DynamicImage::ImageRgba16(buf) => Ok(alpha_plane(buf)),
        DynamicImage::ImageRgba32F(buf) => Ok(alpha_plane(buf)),
        other => Err(ImageError::transform(
            STAGE,
            format!("overlay layout {:?} has no alpha band", other.color()),
        )),
    }
}

fn scale_alpha(alpha: &GrayImage, opacity: f32) -> GrayImage {
    let mut scaled = alpha.clone();
    for pixel in scaled.pixels_mut() {
        pixel[0] = (pixel[0] as f32 * opacity) as u8;
    }
    scaled
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage, Rgba, RgbaImage};

    fn white_base(width: u32, height: u32) -> ImageHandle {
        ImageHandle::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb([255, 255, 255]),
        )))
    }

    fn black_overlay(width: u32, height: u32, alpha: u8) -> ImageHandle {
        ImageHandle::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([0, 0, 0, alpha]),
        )))
    }

    #[test]
    fn test_watermark_top_left() {
        let spec = WatermarkImageSpec {
            overlay: black_overlay(50, 50, 255),
            left: 0,
            top: 0,
            opacity: 1.0,
        };
        let result = ImageWatermark::apply(white_base(200, 200), spec).unwrap();
        assert_eq!(result.dimensions(), (200, 200));
        assert!(result.has_alpha());

        let rgba = result.image().to_rgba8();
        assert_eq!(rgba.get_pixel(49, 49), &Rgba([0, 0, 0, 255]));
        assert_eq!(rgba.get_pixel(50, 50), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_watermark_opacity() {
        let spec = WatermarkImageSpec {
            overlay: black_overlay(10, 10, 255),
            left: 5,
            top: 5,
            opacity: 0.5,
        };
        let result = ImageWatermark::apply(white_base(20, 20), spec).unwrap();
        let rgba = result.image().to_rgba8();
        // mask 127: 255 * 128 / 255 = 128
        assert_eq!(rgba.get_pixel(5, 5), &Rgba([128, 128, 128, 255]));
        assert_eq!(rgba.get_pixel(4, 4), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_zero_opacity_means_opaque() {
        let spec = WatermarkImageSpec {
            overlay: black_overlay(2, 2, 255),
            left: 0,
            top: 0,
            opacity: 0.0,
        };
        let result = ImageWatermark::apply(white_base(4, 4), spec).unwrap();
        assert_eq!(result.image().to_rgba8().get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_overlay_alpha_weights_blend() {
        let spec = WatermarkImageSpec {
            overlay: black_overlay(2, 2, 0),
            left: 1,
            top: 1,
            opacity: 1.0,
        };
        let result = ImageWatermark::apply(white_base(4, 4), spec).unwrap();
        assert_eq!(result.image().to_rgba8().get_pixel(1, 1), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_overlay_must_fit() {
        for (left, top, param) in [(-1, 0, "left"), (0, -1, "top"), (160, 0, "left"), (0, 151, "top")] {
            let spec = WatermarkImageSpec {
                overlay: black_overlay(50, 50, 255),
                left,
                top,
                opacity: 1.0,
            };
            let err = ImageWatermark::apply(white_base(200, 200), spec).unwrap_err();
            assert!(matches!(err, ImageError::InvalidGeometry { .. }));
            assert_eq!(err.param(), Some(param));
        }
    }

    #[test]
    fn test_overlay_converted_to_grey_base() {
        let base = ImageHandle::new(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            4,
            4,
            Luma([200]),
        )));
        let overlay = ImageHandle::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            2,
            2,
            Rgb([0, 0, 0]),
        )));
        let spec = WatermarkImageSpec {
            overlay,
            left: 2,
            top: 2,
            opacity: 1.0,
        };
        let result = ImageWatermark::apply(base, spec).unwrap();
        assert_eq!(result.interpretation(), Interpretation::BW);
        assert_eq!(result.band_count(), 2);
        let la = result.image().to_luma_alpha8();
        assert_eq!(la.get_pixel(3, 3).0, [0, 255]);
        assert_eq!(la.get_pixel(0, 0).0, [200, 255]);
    }

    #[test]
    fn test_cmyk_base_without_alpha_fails() {
        let base = ImageHandle::new(DynamicImage::ImageRgba8(RgbaImage::new(4, 4)))
            .with_interpretation(Interpretation::Cmyk)
            .unwrap();
        let spec = WatermarkImageSpec {
            overlay: black_overlay(1, 1, 255),
            left: 0,
            top: 0,
            opacity: 1.0,
        };
        let err = ImageWatermark::apply(base, spec).unwrap_err();
        assert!(matches!(err, ImageError::Transform { .. }));
    }

    #[test]
    fn test_positions() {
        let base = (200, 100);
        let overlay = (50, 20);
        assert_eq!(WatermarkPosition::TopLeft.offset(base, overlay), (0, 0));
        assert_eq!(WatermarkPosition::TopRight.offset(base, overlay), (150, 0));
        assert_eq!(WatermarkPosition::BottomLeft.offset(base, overlay), (0, 80));
        assert_eq!(WatermarkPosition::BottomRight.offset(base, overlay), (150, 80));
        assert_eq!(WatermarkPosition::Center.offset(base, overlay), (75, 40));
        assert_eq!(
            WatermarkPosition::Custom { x: 10, y: 20 }.offset(base, overlay),
            (10, 20)
        );
    }

    #[test]
    fn test_spec_at_position() {
        let base = white_base(200, 200);
        let spec = WatermarkImageSpec::at(
            black_overlay(50, 50, 255),
            &base,
            WatermarkPosition::BottomRight,
            1.0,
        );
        assert_eq!((spec.left, spec.top), (150, 150));
        let result = ImageWatermark::apply(base, spec).unwrap();
        assert_eq!(result.image().to_rgba8().get_pixel(199, 199), &Rgba([0, 0, 0, 255]));
    }
}

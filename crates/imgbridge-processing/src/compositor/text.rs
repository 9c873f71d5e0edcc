use image::{imageops, GrayImage, ImageBuffer};
use imgbridge_core::{ImageError, Result};
use serde::{Deserialize, Serialize};

use crate::colour::background_fill;
use crate::handle::ImageHandle;
use crate::raster::{map_dynamic, pixel_from, select_dynamic};

const STAGE: &str = "watermark_text";

pub const DEFAULT_FONT: &str = "sans 10";
pub const DEFAULT_DPI: u32 = 150;
pub const DEFAULT_OPACITY: f32 = 0.25;

/// Fixed offset of the text inside each stencil tile
pub const STENCIL_INSET: u32 = 100;

/// Turns text into a single-band coverage mask
pub trait TextRasterizer {
    /// Render `text` wrapped to `width` pixels at `dpi`; 255 is full coverage
    fn rasterize(&self, text: &str, font: &str, width: u32, dpi: u32) -> Result<GrayImage>;
}

/// Text watermark parameters; unset fields take defaults derived from the base image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatermarkTextSpec {
    pub text: String,
    pub font: Option<String>,
    /// Wrap width in pixels, `base.width / 6` by default
    pub width: Option<u32>,
    pub dpi_x: Option<u32>,
    /// Border around the text inside each tile, equal to the width by default
    pub margin_px: Option<u32>,
    #[serde(default)]
    pub tile_to_fill: bool,
    /// 0 or unset means 0.25
    pub opacity: Option<f32>,
    /// Text colour on the 0-255 scale
    #[serde(default)]
    pub background_rgb: [f64; 3],
}

/// [`WatermarkTextSpec`] with every default filled in
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTextSpec {
    pub font: String,
    pub width: u32,
    pub dpi: u32,
    pub margin: u32,
    pub opacity: f32,
}

impl WatermarkTextSpec {
    pub fn resolve(&self, base_width: u32) -> ResolvedTextSpec {
        let width = self
            .width
            .filter(|w| *w > 0)
            .unwrap_or((base_width / 6).max(1));
        let opacity = match self.opacity {
            Some(o) if o > 0.0 => o.min(1.0),
            _ => DEFAULT_OPACITY,
        };
        ResolvedTextSpec {
            font: self
                .font
                .clone()
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FONT.to_string()),
            width,
            dpi: self.dpi_x.filter(|d| *d > 0).unwrap_or(DEFAULT_DPI),
            margin: self.margin_px.filter(|m| *m > 0).unwrap_or(width),
            opacity,
        }
    }
}

pub struct TextWatermark;

impl TextWatermark {
    /// Blend rendered text over `base` in `spec.background_rgb`
    pub fn apply(
        base: ImageHandle,
        spec: &WatermarkTextSpec,
        rasterizer: &dyn TextRasterizer,
    ) -> Result<ImageHandle> {
        let resolved = spec.resolve(base.width());
        let mask = rasterizer.rasterize(&spec.text, &resolved.font, resolved.width, resolved.dpi)?;
        let mask = scale_mask(&mask, resolved.opacity);
        let stencil = Self::stencil(&mask, resolved.margin)?;

        let (width, height) = base.dimensions();
        let stencil = if spec.tile_to_fill {
            Self::tile(&stencil, width, height)?
        } else {
            fit_to(&stencil, width, height)
        };

        tracing::debug!(
            font = %resolved.font,
            width = resolved.width,
            dpi = resolved.dpi,
            margin = resolved.margin,
            opacity = resolved.opacity,
            tiled = spec.tile_to_fill,
            "Applying text watermark"
        );

        let (base, fill) = background_fill(base, spec.background_rgb)?;
        let colour = map_dynamic!(STAGE, base.image(), |buf| {
            let px = pixel_from(&fill);
            ImageBuffer::from_pixel(buf.width(), buf.height(), px)
        })?;
        let out = select_dynamic(STAGE, &stencil, &colour, base.image())?;
        Ok(base.with_image(out))
    }

    /// Pad the mask by `margin` on every side, shifted right and down by the inset
    pub fn stencil(mask: &GrayImage, margin: u32) -> Result<GrayImage> {
        let pad = margin
            .checked_mul(2)
            .and_then(|m| m.checked_add(STENCIL_INSET));
        let offset = margin.checked_add(STENCIL_INSET);
        let (pad, offset) = match (pad, offset) {
            (Some(pad), Some(offset)) => (pad, offset),
            _ => return Err(ImageError::geometry(STAGE, "margin_px", "margin is too large")),
        };

        let width = mask.width().checked_add(pad);
        let height = mask.height().checked_add(pad);
        let (width, height) = match (width, height) {
            (Some(w), Some(h)) => (w, h),
            _ => return Err(ImageError::geometry(STAGE, "margin_px", "stencil is too large")),
        };

        let mut stencil = GrayImage::new(width, height);
        imageops::replace(&mut stencil, mask, offset as i64, offset as i64);
        Ok(stencil)
    }

    /// Replicate the stencil `1 + base / stencil` times per axis, then crop to the base
    pub fn tile(stencil: &GrayImage, width: u32, height: u32) -> Result<GrayImage> {
        let (sw, sh) = stencil.dimensions();
        let (across, down) = Self::tile_counts((sw, sh), (width, height));
        let tiled_width = sw.checked_mul(across);
        let tiled_height = sh.checked_mul(down);
        let (tiled_width, tiled_height) = match (tiled_width, tiled_height) {
            (Some(w), Some(h)) => (w, h),
            _ => return Err(ImageError::geometry(STAGE, "tile_to_fill", "tiled canvas overflows")),
        };

        let tiled = GrayImage::from_fn(tiled_width, tiled_height, |x, y| {
            *stencil.get_pixel(x % sw, y % sh)
        });
        Ok(imageops::crop_imm(&tiled, 0, 0, width, height).to_image())
    }

    pub fn tile_counts(stencil: (u32, u32), base: (u32, u32)) -> (u32, u32) {
        (1 + base.0 / stencil.0.max(1), 1 + base.1 / stencil.1.max(1))
    }
}

/// Multiply coverage by `opacity`, truncating to 8 bits
fn scale_mask(mask: &GrayImage, opacity: f32) -> GrayImage {
    let mut scaled = mask.clone();
    for pixel in scaled.pixels_mut() {
        pixel[0] = (pixel[0] as f32 * opacity) as u8;
    }
    scaled
}

/// Crop or zero-pad to exactly `width` x `height`, anchored at the origin
fn fit_to(stencil: &GrayImage, width: u32, height: u32) -> GrayImage {
    let mut out = GrayImage::new(width, height);
    imageops::replace(&mut out, stencil, 0, 0);
    out
}

/// Lets callers pass a plain closure as a rasterizer in place of a font engine
impl<F> TextRasterizer for F
where
    F: Fn(&str, &str, u32, u32) -> Result<GrayImage>,
{
    fn rasterize(&self, text: &str, font: &str, width: u32, dpi: u32) -> Result<GrayImage> {
        self(text, font, width, dpi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Interpretation;
    use image::{DynamicImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use std::cell::RefCell;

    /// Solid 4x2 block of full coverage regardless of input
    fn block(_: &str, _: &str, _: u32, _: u32) -> Result<GrayImage> {
        Ok(GrayImage::from_pixel(4, 2, Luma([255])))
    }

    fn white_base(width: u32, height: u32) -> ImageHandle {
        ImageHandle::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb([255, 255, 255]),
        )))
    }

    #[test]
    fn test_defaults() {
        let resolved = WatermarkTextSpec::default().resolve(600);
        assert_eq!(
            resolved,
            ResolvedTextSpec {
                font: DEFAULT_FONT.to_string(),
                width: 100,
                dpi: 150,
                margin: 100,
                opacity: 0.25,
            }
        );

        let spec = WatermarkTextSpec {
            opacity: Some(3.0),
            margin_px: Some(5),
            ..Default::default()
        };
        let resolved = spec.resolve(600);
        assert_eq!(resolved.opacity, 1.0);
        assert_eq!(resolved.margin, 5);
    }

    #[test]
    fn test_stencil_layout() {
        let mask = GrayImage::from_pixel(4, 2, Luma([7]));
        let stencil = TextWatermark::stencil(&mask, 3).unwrap();
        assert_eq!(stencil.dimensions(), (4 + 6 + 100, 2 + 6 + 100));
        assert_eq!(stencil.get_pixel(103, 103)[0], 7);
        assert_eq!(stencil.get_pixel(102, 103)[0], 0);
        assert_eq!(stencil.get_pixel(106, 104)[0], 7);
        assert_eq!(stencil.get_pixel(107, 104)[0], 0);
    }

    #[test]
    fn test_tile_counts() {
        assert_eq!(TextWatermark::tile_counts((110, 108), (500, 100)), (5, 1));
        assert_eq!(TextWatermark::tile_counts((110, 108), (110, 108)), (2, 2));
    }

    #[test]
    fn test_tile_covers_base() {
        let mut stencil = GrayImage::new(3, 2);
        stencil.put_pixel(0, 0, Luma([255]));
        let tiled = TextWatermark::tile(&stencil, 7, 5).unwrap();
        assert_eq!(tiled.dimensions(), (7, 5));
        assert_eq!(tiled.get_pixel(3, 2)[0], 255);
        assert_eq!(tiled.get_pixel(6, 4)[0], 255);
        assert_eq!(tiled.get_pixel(4, 2)[0], 0);
    }

    #[test]
    fn test_text_blends_by_opacity() {
        let spec = WatermarkTextSpec {
            text: "x".to_string(),
            margin_px: Some(1),
            opacity: Some(0.5),
            background_rgb: [0.0, 0.0, 0.0],
            ..Default::default()
        };
        let out = TextWatermark::apply(white_base(300, 300), &spec, &block).unwrap();
        assert_eq!(out.dimensions(), (300, 300));

        let rgb = out.image().to_rgb8();
        // mask 255 * 0.5 truncates to 127; 255 * (255 - 127) / 255 = 128
        assert_eq!(rgb.get_pixel(101, 101), &Rgb([128, 128, 128]));
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
        // not tiled: the second tile position stays clean
        assert_eq!(rgb.get_pixel(106 + 101, 104 + 101), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_text_tiles_when_requested() {
        let spec = WatermarkTextSpec {
            text: "x".to_string(),
            margin_px: Some(1),
            opacity: Some(1.0),
            tile_to_fill: true,
            ..Default::default()
        };
        let out = TextWatermark::apply(white_base(300, 300), &spec, &block).unwrap();
        let rgb = out.image().to_rgb8();
        // stencil is 106 x 104 with text at (101, 101)
        assert_eq!(rgb.get_pixel(101, 101), &Rgb([0, 0, 0]));
        assert_eq!(rgb.get_pixel(106 + 101, 104 + 101), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_text_keeps_alpha_opaque() {
        let base = ImageHandle::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            200,
            200,
            Rgba([255, 255, 255, 0]),
        )));
        let spec = WatermarkTextSpec {
            text: "x".to_string(),
            margin_px: Some(1),
            opacity: Some(1.0),
            background_rgb: [255.0, 0.0, 0.0],
            ..Default::default()
        };
        let out = TextWatermark::apply(base, &spec, &block).unwrap();
        assert_eq!(out.image().to_rgba8().get_pixel(101, 101), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_text_on_16bit_base_uses_rescaled_colour() {
        let base = ImageHandle::new(DynamicImage::ImageRgb16(white_base(200, 200).image().to_rgb16()));
        assert_eq!(base.interpretation(), Interpretation::Rgb16);
        let spec = WatermarkTextSpec {
            text: "x".to_string(),
            margin_px: Some(1),
            opacity: Some(1.0),
            background_rgb: [255.0, 0.0, 0.0],
            ..Default::default()
        };
        let out = TextWatermark::apply(base, &spec, &block).unwrap();
        match out.image() {
            DynamicImage::ImageRgb16(buf) => assert_eq!(buf.get_pixel(101, 101).0, [65535, 0, 0]),
            other => panic!("unexpected layout {:?}", other.color()),
        }
    }

    #[test]
    fn test_rasterizer_receives_resolved_parameters() {
        let seen = RefCell::new(None);
        let recorder = |text: &str, font: &str, width: u32, dpi: u32| {
            *seen.borrow_mut() = Some((text.to_string(), font.to_string(), width, dpi));
            block(text, font, width, dpi)
        };
        let spec = WatermarkTextSpec {
            text: "hello".to_string(),
            ..Default::default()
        };
        TextWatermark::apply(white_base(120, 60), &spec, &recorder).unwrap();
        assert_eq!(
            seen.into_inner(),
            Some(("hello".to_string(), "sans 10".to_string(), 20, 150))
        );
    }

    #[test]
    fn test_render_failure_propagates() {
        let failing = |_: &str, _: &str, _: u32, _: u32| -> Result<GrayImage> {
            Err(ImageError::render("render_text", "font missing"))
        };
        let err = TextWatermark::apply(white_base(10, 10), &WatermarkTextSpec::default(), &failing)
            .unwrap_err();
        assert!(matches!(err, ImageError::Render { .. }));
    }
}

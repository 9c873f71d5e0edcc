use image::imageops::FilterType;
use image::{ImageBuffer, Pixel};
use imgbridge_core::{ImageError, Result};
use serde::{Deserialize, Serialize};

use crate::handle::ImageHandle;
use crate::raster::{map_dynamic, pixel_from, Buffer, Sample};

/// How a target box is honoured when only its bounds are meaningful
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Fit inside the box, preserving aspect ratio
    #[default]
    Fit,
    /// Cover the box, preserving aspect ratio
    FitUp,
    /// Exactly the requested size
    Force,
}

/// Requested output dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeDimensions {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ResizeDimensions {
    /// Parse dimensions from string format: "WxH", "Wx", or "xH"
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |message: String| ImageError::geometry("resize", "dimensions", message);

        let (width, height) = s
            .split_once('x')
            .ok_or_else(|| invalid("expected WxH, Wx, or xH".to_string()))?;

        let parse_side = |side: &str, name: &str| -> Result<Option<u32>> {
            if side.is_empty() {
                return Ok(None);
            }
            match side.parse::<u32>() {
                Ok(0) | Err(_) => Err(invalid(format!("invalid {}: {}", name, side))),
                Ok(v) => Ok(Some(v)),
            }
        };

        let width = parse_side(width, "width")?;
        let height = parse_side(height, "height")?;

        if width.is_none() && height.is_none() {
            return Err(invalid("at least one dimension must be specified".to_string()));
        }

        Ok(ResizeDimensions { width, height })
    }
}

/// Image resize operations
pub struct ImageResize;

impl ImageResize {
    /// Calculate target dimensions for a box under `mode`.
    ///
    /// With both sides given, `Fit` scales by the larger of the two shrink factors and
    /// `FitUp` by the smaller one. With one side given the other follows the aspect
    /// ratio, except under `Force` where it keeps the original size.
    pub fn calculate_dimensions(
        orig_width: u32,
        orig_height: u32,
        dimensions: ResizeDimensions,
        mode: ResizeMode,
    ) -> (u32, u32) {
        let (in_w, in_h) = (orig_width as f64, orig_height as f64);
        let scaled = |v: f64, factor: f64| ((v / factor).round() as u32).max(1);

        match (dimensions.width, dimensions.height) {
            (Some(w), Some(h)) => {
                let xf = in_w / w as f64;
                let yf = in_h / h as f64;
                match mode {
                    ResizeMode::Force => (w, h),
                    ResizeMode::Fit if xf > yf => (w, scaled(in_h, xf)),
                    ResizeMode::Fit => (scaled(in_w, yf), h),
                    ResizeMode::FitUp if xf < yf => (w, scaled(in_h, xf)),
                    ResizeMode::FitUp => (scaled(in_w, yf), h),
                }
            }
            (Some(w), None) => match mode {
                ResizeMode::Force => (w, orig_height),
                _ => (w, scaled(in_h, in_w / w as f64)),
            },
            (None, Some(h)) => match mode {
                ResizeMode::Force => (orig_width, h),
                _ => (scaled(in_w, in_h / h as f64), h),
            },
            (None, None) => (orig_width, orig_height),
        }
    }

    /// Select appropriate filter type based on resize ratio
    pub fn select_filter(
        orig_width: u32,
        orig_height: u32,
        new_width: u32,
        new_height: u32,
    ) -> FilterType {
        let width_ratio = orig_width as f32 / new_width as f32;
        let height_ratio = orig_height as f32 / new_height as f32;
        let max_ratio = width_ratio.max(height_ratio);

        if max_ratio > 2.0 {
            FilterType::Triangle
        } else if max_ratio > 1.5 {
            FilterType::CatmullRom
        } else {
            FilterType::Lanczos3
        }
    }

    /// Resample by independent horizontal and vertical scale factors
    pub fn resize(handle: ImageHandle, xscale: f64, yscale: f64) -> Result<ImageHandle> {
        for (param, scale) in [("xscale", xscale), ("yscale", yscale)] {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(ImageError::geometry(
                    "resize",
                    param,
                    format!("scale must be positive, got {}", scale),
                ));
            }
        }

        let (orig_width, orig_height) = handle.dimensions();
        let width = ((orig_width as f64 * xscale).round() as u32).max(1);
        let height = ((orig_height as f64 * yscale).round() as u32).max(1);
        Ok(Self::resize_exact(handle, width, height))
    }

    /// Resize into a target box
    pub fn resize_to(
        handle: ImageHandle,
        dimensions: ResizeDimensions,
        mode: ResizeMode,
    ) -> Result<ImageHandle> {
        let (orig_width, orig_height) = handle.dimensions();
        let (width, height) =
            Self::calculate_dimensions(orig_width, orig_height, dimensions, mode);
        Ok(Self::resize_exact(handle, width, height))
    }

    fn resize_exact(handle: ImageHandle, width: u32, height: u32) -> ImageHandle {
        let (orig_width, orig_height) = handle.dimensions();
        if (orig_width, orig_height) == (width, height) {
            return handle;
        }

        let filter = Self::select_filter(orig_width, orig_height, width, height);
        tracing::debug!(
            from_width = orig_width,
            from_height = orig_height,
            to_width = width,
            to_height = height,
            filter = ?filter,
            "Resizing image"
        );
        let resized = handle.image().resize_exact(width, height, filter);
        handle.with_image(resized)
    }

    /// Integer box-filter downscale
    pub fn shrink(handle: ImageHandle, xfactor: u32, yfactor: u32) -> Result<ImageHandle> {
        check_factor("shrink", "xfactor", xfactor)?;
        check_factor("shrink", "yfactor", yfactor)?;
        if xfactor == 1 && yfactor == 1 {
            return Ok(handle);
        }

        let out = map_dynamic!("shrink", handle.image(), |buf| box_average(buf, xfactor, yfactor))?;
        Ok(handle.with_image(out))
    }

    /// Integer pixel-replication upscale
    pub fn zoom(handle: ImageHandle, xfactor: u32, yfactor: u32) -> Result<ImageHandle> {
        check_factor("zoom", "xfactor", xfactor)?;
        check_factor("zoom", "yfactor", yfactor)?;
        if xfactor == 1 && yfactor == 1 {
            return Ok(handle);
        }

        let (width, height) = handle.dimensions();
        let overflow = || ImageError::geometry("zoom", "factor", "zoomed size overflows");
        let new_width = width.checked_mul(xfactor).ok_or_else(overflow)?;
        let new_height = height.checked_mul(yfactor).ok_or_else(overflow)?;

        let out = map_dynamic!("zoom", handle.image(), |buf| {
            ImageBuffer::from_fn(new_width, new_height, |x, y| {
                *buf.get_pixel(x / xfactor, y / yfactor)
            })
        })?;
        Ok(handle.with_image(out))
    }
}

fn check_factor(stage: &'static str, param: &'static str, factor: u32) -> Result<()> {
    if factor == 0 {
        return Err(ImageError::geometry(stage, param, "factor must be at least 1"));
    }
    Ok(())
}

/// Mean of each `xf` x `yf` block; trailing partial blocks are dropped unless the
/// source is smaller than one block.
fn box_average<P>(buf: &Buffer<P>, xf: u32, yf: u32) -> Buffer<P>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let (width, height) = buf.dimensions();
    let out_width = (width / xf).max(1);
    let out_height = (height / yf).max(1);
    let channels = P::CHANNEL_COUNT as usize;

    ImageBuffer::from_fn(out_width, out_height, |ox, oy| {
        let mut sums = vec![0.0f64; channels];
        let mut count: f64 = 0.0;
        for y in oy * yf..((oy + 1) * yf).min(height) {
            for x in ox * xf..((ox + 1) * xf).min(width) {
                for (sum, c) in sums.iter_mut().zip(buf.get_pixel(x, y).channels()) {
                    *sum += c.as_f64();
                }
                count += 1.0;
            }
        }
        let means: Vec<f64> = sums.iter().map(|s| s / count.max(1.0)).collect();
        pixel_from(&means)
    })
}

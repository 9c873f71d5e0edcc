use image::{DynamicImage, Pixel};
use imgbridge_core::{ImageError, Result};
use serde::{Deserialize, Serialize};

use crate::colour::{background_bands, ColourOps};
use crate::handle::ImageHandle;
use crate::raster::{Buffer, Sample};

const STAGE: &str = "find_trim";

/// Bounding box of non-background content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimResult {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

impl TrimResult {
    /// True when nothing but background was found
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

pub struct TrimDetector;

impl TrimDetector {
    /// Smallest box outside of which every pixel is within `threshold` of
    /// `background` (0-255 RGB, rescaled to the image's sample range).
    ///
    /// Alpha is flattened onto the background first. A uniform image yields an
    /// empty result.
    pub fn find_trim(handle: &ImageHandle, background: [f64; 3], threshold: f64) -> Result<TrimResult> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ImageError::transform(
                STAGE,
                format!("threshold must not be negative, got {}", threshold),
            ));
        }

        let flattened;
        let handle = if handle.has_alpha() {
            flattened = ColourOps::flatten_on_background(handle.clone(), background)?;
            &flattened
        } else {
            handle
        };

        let reference = background_bands(handle.interpretation(), background);
        let bounds = match handle.image() {
            DynamicImage::ImageLuma8(b) => deviation_bounds(b, &reference, threshold),
            DynamicImage::ImageLumaA8(b) => deviation_bounds(b, &reference, threshold),
            DynamicImage::ImageRgb8(b) => deviation_bounds(b, &reference, threshold),
            DynamicImage::ImageRgba8(b) => deviation_bounds(b, &reference, threshold),
            DynamicImage::ImageLuma16(b) => deviation_bounds(b, &reference, threshold),
            DynamicImage::ImageLumaA16(b) => deviation_bounds(b, &reference, threshold),
            DynamicImage::ImageRgb16(b) => deviation_bounds(b, &reference, threshold),
            DynamicImage::ImageRgba16(b) => deviation_bounds(b, &reference, threshold),
            DynamicImage::ImageRgb32F(b) => deviation_bounds(b, &reference, threshold),
            DynamicImage::ImageRgba32F(b) => deviation_bounds(b, &reference, threshold),
            other => {
                return Err(ImageError::transform(
                    STAGE,
                    format!("unsupported pixel layout {:?}", other.color()),
                ))
            }
        };

        let result = bounds
            .map(|(left, top, right, bottom)| TrimResult {
                top,
                left,
                width: right - left + 1,
                height: bottom - top + 1,
            })
            .unwrap_or_default();

        tracing::debug!(
            left = result.left,
            top = result.top,
            width = result.width,
            height = result.height,
            threshold = threshold,
            "Trim box found"
        );
        Ok(result)
    }
}

/// Inclusive (left, top, right, bottom) of pixels whose largest band difference
/// from `reference` exceeds `threshold`
fn deviation_bounds<P>(buf: &Buffer<P>, reference: &[f64], threshold: f64) -> Option<(u32, u32, u32, u32)>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in buf.enumerate_pixels() {
        let deviates = pixel
            .channels()
            .iter()
            .zip(reference)
            .any(|(c, r)| (c.as_f64() - r).abs() > threshold);
        if deviates {
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((l, t, r, b)) => (l.min(x), t.min(y), r.max(x), b.max(y)),
            });
        }
    }
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    fn with_box(width: u32, height: u32, area: (u32, u32, u32, u32), colour: Rgb<u8>) -> ImageHandle {
        let (l, t, w, h) = area;
        let img = RgbImage::from_fn(width, height, |x, y| {
            if x >= l && x < l + w && y >= t && y < t + h {
                colour
            } else {
                Rgb([255, 255, 255])
            }
        });
        ImageHandle::new(DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn test_finds_content_box() {
        let handle = with_box(20, 10, (3, 2, 5, 4), Rgb([0, 0, 0]));
        let trim = TrimDetector::find_trim(&handle, [255.0, 255.0, 255.0], 10.0).unwrap();
        assert_eq!(
            trim,
            TrimResult {
                top: 2,
                left: 3,
                width: 5,
                height: 4,
            }
        );
    }

    #[test]
    fn test_uniform_image_is_empty() {
        let handle = with_box(8, 8, (0, 0, 0, 0), Rgb([0, 0, 0]));
        let trim = TrimDetector::find_trim(&handle, [255.0, 255.0, 255.0], 0.0).unwrap();
        assert!(trim.is_empty());
        assert_eq!(trim, TrimResult::default());
    }

    #[test]
    fn test_threshold_tolerates_noise() {
        let handle = with_box(8, 8, (2, 2, 2, 2), Rgb([250, 250, 250]));
        let loose = TrimDetector::find_trim(&handle, [255.0, 255.0, 255.0], 10.0).unwrap();
        assert!(loose.is_empty());
        let strict = TrimDetector::find_trim(&handle, [255.0, 255.0, 255.0], 4.0).unwrap();
        assert_eq!((strict.left, strict.top, strict.width, strict.height), (2, 2, 2, 2));
    }

    #[test]
    fn test_16bit_background_is_rescaled() {
        let img = with_box(6, 6, (1, 1, 2, 2), Rgb([0, 0, 0])).image().to_rgb16();
        let handle = ImageHandle::new(DynamicImage::ImageRgb16(img));
        // a threshold of 10 is tiny against 65535-scale samples
        let trim = TrimDetector::find_trim(&handle, [255.0, 255.0, 255.0], 10.0).unwrap();
        assert_eq!((trim.left, trim.top, trim.width, trim.height), (1, 1, 2, 2));
    }

    #[test]
    fn test_transparent_pixels_count_as_background() {
        let img = RgbaImage::from_fn(5, 5, |x, y| {
            if x == 2 && y == 3 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        let handle = ImageHandle::new(DynamicImage::ImageRgba8(img));
        let trim = TrimDetector::find_trim(&handle, [255.0, 255.0, 255.0], 1.0).unwrap();
        assert_eq!((trim.left, trim.top, trim.width, trim.height), (2, 3, 1, 1));
    }

    #[test]
    fn test_grey_image() {
        let mut img = GrayImage::from_pixel(4, 4, Luma([0]));
        img.put_pixel(3, 0, Luma([200]));
        let handle = ImageHandle::new(DynamicImage::ImageLuma8(img));
        let trim = TrimDetector::find_trim(&handle, [0.0, 0.0, 0.0], 5.0).unwrap();
        assert_eq!((trim.left, trim.top, trim.width, trim.height), (3, 0, 1, 1));
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let handle = with_box(2, 2, (0, 0, 1, 1), Rgb([0, 0, 0]));
        assert!(TrimDetector::find_trim(&handle, [0.0; 3], -1.0).is_err());
    }
}

use imgbridge_core::{ImageError, Result};

use crate::handle::ImageHandle;

pub struct ImageFilters;

impl ImageFilters {
    /// Gaussian blur with standard deviation `sigma`
    pub fn blur(handle: ImageHandle, sigma: f32) -> Result<ImageHandle> {
        check_sigma("blur", sigma)?;
        tracing::debug!(sigma = sigma, "Applying blur");
        let blurred = handle.image().blur(sigma);
        Ok(handle.with_image(blurred))
    }

    /// Unsharp mask; differences below `threshold` are left alone
    pub fn sharpen(handle: ImageHandle, sigma: f32, threshold: i32) -> Result<ImageHandle> {
        check_sigma("sharpen", sigma)?;
        if threshold < 0 {
            return Err(ImageError::transform(
                "sharpen",
                format!("threshold must not be negative, got {}", threshold),
            ));
        }
        tracing::debug!(sigma = sigma, threshold = threshold, "Applying sharpen");
        let sharpened = handle.image().unsharpen(sigma, threshold);
        Ok(handle.with_image(sharpened))
    }
}

fn check_sigma(stage: &'static str, sigma: f32) -> Result<()> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(ImageError::transform(
            stage,
            format!("sigma must be positive, got {}", sigma),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};

    fn edge() -> ImageHandle {
        ImageHandle::new(DynamicImage::ImageLuma8(GrayImage::from_fn(10, 1, |x, _| {
            Luma([if x < 5 { 50 } else { 200 }])
        })))
    }

    #[test]
    fn test_blur_softens_edge() {
        let blurred = ImageFilters::blur(edge(), 1.5).unwrap();
        let luma = blurred.image().to_luma8();
        assert!(luma.get_pixel(4, 0)[0] > 50);
        assert!(luma.get_pixel(5, 0)[0] < 200);
    }

    #[test]
    fn test_blur_keeps_layout() {
        let handle = ImageHandle::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            8,
            8,
            Rgba([10, 20, 30, 40]),
        )));
        let blurred = ImageFilters::blur(handle, 2.0).unwrap();
        assert_eq!(blurred.band_count(), 4);
        assert_eq!(blurred.dimensions(), (8, 8));
    }

    #[test]
    fn test_sharpen_steepens_edge() {
        let sharpened = ImageFilters::sharpen(edge(), 1.0, 0).unwrap();
        let luma = sharpened.image().to_luma8();
        assert!(luma.get_pixel(4, 0)[0] < 50);
        assert!(luma.get_pixel(5, 0)[0] > 200);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(ImageFilters::blur(edge(), 0.0).is_err());
        assert!(ImageFilters::blur(edge(), f32::NAN).is_err());
        assert!(ImageFilters::sharpen(edge(), 1.0, -1).is_err());
    }
}

use image::DynamicImage;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imgbridge_core::{EngineCapabilities, ImageError, Result};
use serde::{Deserialize, Serialize};

use crate::colour::background_fill;
use crate::handle::{ImageHandle, Interpretation, ORIENTATION_TAG};
use crate::image::geometry::{ExtendMode, ImageGeometry};
use crate::raster::pixel_from;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlipAxis {
    /// Mirror left to right
    Horizontal,
    /// Mirror top to bottom
    Vertical,
}

/// Image orientation operations (rotation and flipping)
pub struct ImageOrientation;

impl ImageOrientation {
    pub fn flip(handle: ImageHandle, axis: FlipAxis) -> ImageHandle {
        let flipped = match axis {
            FlipAxis::Horizontal => handle.image().fliph(),
            FlipAxis::Vertical => handle.image().flipv(),
        };
        handle.with_image(flipped)
    }

    /// Rotate clockwise by `degrees`, normalised into [0, 360).
    ///
    /// Multiples of 90 are lossless. Any other angle resamples onto a canvas grown
    /// to the rotated bounding box, with exposed corners filled from `background`
    /// (transparent black when `None`).
    pub fn rotate_orthogonal(
        handle: ImageHandle,
        degrees: i32,
        background: Option<[f64; 3]>,
        caps: &EngineCapabilities,
    ) -> Result<ImageHandle> {
        let normalized = degrees.rem_euclid(360);
        if normalized % 90 == 0 {
            return Ok(Self::rotate_by_angle(handle, normalized as u16));
        }

        let interpolation = if caps.rotate45_fast_path && normalized % 45 == 0 {
            Interpolation::Nearest
        } else {
            Interpolation::Bilinear
        };
        Self::rotate_affine(handle, normalized, background, interpolation)
    }

    /// Rotate by a multiple of 90 degrees clockwise; other angles are ignored
    pub fn rotate_by_angle(handle: ImageHandle, angle: u16) -> ImageHandle {
        let rotated = match angle {
            90 => handle.image().rotate90(),
            180 => handle.image().rotate180(),
            270 => handle.image().rotate270(),
            _ => return handle,
        };
        handle.with_image(rotated)
    }

    fn rotate_affine(
        handle: ImageHandle,
        degrees: i32,
        background: Option<[f64; 3]>,
        interpolation: Interpolation,
    ) -> Result<ImageHandle> {
        // Float samples go through 16-bit, the deepest layout the resampler takes.
        let handle = match handle.image() {
            DynamicImage::ImageRgb32F(img) => {
                let img = DynamicImage::ImageRgb16(DynamicImage::ImageRgb32F(img.clone()).to_rgb16());
                handle.with_image_as(img, Interpretation::Rgb16)
            }
            DynamicImage::ImageRgba32F(img) => {
                let img =
                    DynamicImage::ImageRgba16(DynamicImage::ImageRgba32F(img.clone()).to_rgba16());
                handle.with_image_as(img, Interpretation::Rgb16)
            }
            _ => handle,
        };

        let theta = (degrees as f64).to_radians();
        let (width, height) = (handle.width() as f64, handle.height() as f64);
        let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
        let bound_width = (width * cos + height * sin - 1e-9).ceil().max(1.0) as u32;
        let bound_height = (width * sin + height * cos - 1e-9).ceil().max(1.0) as u32;

        let extend = if background.is_some() {
            ExtendMode::Background
        } else {
            ExtendMode::Black
        };
        let canvas = ImageGeometry::embed_centred(handle, bound_width, bound_height, extend, background)?;
        let (canvas, fill) = match background {
            Some(rgb) => background_fill(canvas, rgb)?,
            None => (canvas, vec![0.0]),
        };

        tracing::debug!(
            degrees = degrees,
            interpolation = ?interpolation,
            width = bound_width,
            height = bound_height,
            "Rotating by arbitrary angle"
        );

        let theta = theta as f32;
        let rotated = match canvas.image() {
            DynamicImage::ImageLuma8(b) => DynamicImage::ImageLuma8(rotate_about_center(
                b,
                theta,
                interpolation,
                pixel_from(&fill),
            )),
            DynamicImage::ImageLumaA8(b) => DynamicImage::ImageLumaA8(rotate_about_center(
                b,
                theta,
                interpolation,
                pixel_from(&fill),
            )),
            DynamicImage::ImageRgb8(b) => DynamicImage::ImageRgb8(rotate_about_center(
                b,
                theta,
                interpolation,
                pixel_from(&fill),
            )),
            DynamicImage::ImageRgba8(b) => DynamicImage::ImageRgba8(rotate_about_center(
                b,
                theta,
                interpolation,
                pixel_from(&fill),
            )),
            DynamicImage::ImageLuma16(b) => DynamicImage::ImageLuma16(rotate_about_center(
                b,
                theta,
                interpolation,
                pixel_from(&fill),
            )),
            DynamicImage::ImageLumaA16(b) => DynamicImage::ImageLumaA16(rotate_about_center(
                b,
                theta,
                interpolation,
                pixel_from(&fill),
            )),
            DynamicImage::ImageRgb16(b) => DynamicImage::ImageRgb16(rotate_about_center(
                b,
                theta,
                interpolation,
                pixel_from(&fill),
            )),
            DynamicImage::ImageRgba16(b) => DynamicImage::ImageRgba16(rotate_about_center(
                b,
                theta,
                interpolation,
                pixel_from(&fill),
            )),
            other => {
                return Err(ImageError::transform(
                    "rotate",
                    format!("cannot rotate pixel layout {:?}", other.color()),
                ))
            }
        };
        Ok(canvas.with_image(rotated))
    }

    /// Undo the EXIF orientation and clear the tag.
    ///
    /// A missing or non-numeric tag leaves the handle untouched.
    pub fn auto_rotate(handle: ImageHandle) -> ImageHandle {
        let orientation = handle.orientation();
        if orientation == 0 {
            return handle;
        }

        let (rotate, flip_h, flip_v) = Self::orientation_transforms(orientation);
        tracing::debug!(
            orientation = orientation,
            rotate = ?rotate,
            flip_horizontal = flip_h,
            flip_vertical = flip_v,
            "Applying EXIF orientation"
        );

        let mut handle = handle;
        if let Some(angle) = rotate {
            handle = Self::rotate_by_angle(handle, angle);
        }
        if flip_h {
            handle = Self::flip(handle, FlipAxis::Horizontal);
        }
        if flip_v {
            handle = Self::flip(handle, FlipAxis::Vertical);
        }

        handle.without_exif_tag(ORIENTATION_TAG)
    }

    /// Rotation (clockwise) then flips that restore an EXIF orientation code
    pub fn orientation_transforms(orientation: u8) -> (Option<u16>, bool, bool) {
        match orientation {
            2 => (None, true, false),
            3 => (Some(180), false, false),
            4 => (None, false, true),
            5 => (Some(90), true, false),
            6 => (Some(90), false, false),
            7 => (Some(270), true, false),
            8 => (Some(270), false, false),
            _ => (None, false, false),
        }
    }
}

use image::{ImageBuffer, Pixel};
use imgbridge_core::{ImageError, Result};
use serde::{Deserialize, Serialize};

use crate::colour::background_fill;
use crate::handle::{ImageHandle, Interpretation};
use crate::image::smart_crop::SmartCrop;
use crate::raster::{map_dynamic, pixel_from, Buffer, Sample};

/// How pixels outside the source are generated when embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtendMode {
    /// All bands zero, so transparent where there is alpha
    #[default]
    Black,
    White,
    /// Repeat the nearest edge pixel
    Copy,
    Mirror,
    /// Tile the source
    Repeat,
    /// Same as `Copy`
    Last,
    /// Solid caller-supplied colour
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gravity {
    #[default]
    Centre,
    North,
    East,
    South,
    West,
    /// Most salient window
    Smart,
}

/// Crops, extracts and pads
pub struct ImageGeometry;

impl ImageGeometry {
    /// Cut out a rectangle that must lie entirely inside the image
    pub fn extract_area(
        handle: ImageHandle,
        left: u32,
        top: u32,
        width: u32,
        height: u32,
    ) -> Result<ImageHandle> {
        if width == 0 || height == 0 {
            return Err(ImageError::geometry(
                "extract_area",
                if width == 0 { "width" } else { "height" },
                "area must be at least 1x1",
            ));
        }

        let (img_width, img_height) = handle.dimensions();
        if left as u64 + width as u64 > img_width as u64 {
            return Err(ImageError::geometry(
                "extract_area",
                "left",
                format!(
                    "area {}+{} exceeds image width {}",
                    left, width, img_width
                ),
            ));
        }
        if top as u64 + height as u64 > img_height as u64 {
            return Err(ImageError::geometry(
                "extract_area",
                "top",
                format!(
                    "area {}+{} exceeds image height {}",
                    top, height, img_height
                ),
            ));
        }

        if (left, top, width, height) == (0, 0, img_width, img_height) {
            return Ok(handle);
        }

        let cropped = handle.image().crop_imm(left, top, width, height);
        Ok(handle.with_image(cropped))
    }

    /// Place the image at (`left`, `top`) on a `width` x `height` canvas.
    ///
    /// `background` is an RGB triple on the 0-255 scale and is required for
    /// [`ExtendMode::Background`]; other modes ignore it.
    pub fn embed(
        handle: ImageHandle,
        left: i32,
        top: i32,
        width: u32,
        height: u32,
        extend: ExtendMode,
        background: Option<[f64; 3]>,
    ) -> Result<ImageHandle> {
        if width == 0 || height == 0 {
            return Err(ImageError::geometry(
                "embed",
                if width == 0 { "width" } else { "height" },
                "canvas must be at least 1x1",
            ));
        }

        let cmyk = handle.interpretation() == Interpretation::Cmyk;
        let (handle, fill) = match extend {
            ExtendMode::Background => {
                let rgb = background.ok_or_else(|| {
                    ImageError::geometry(
                        "embed",
                        "background",
                        "a background colour is required for background extend",
                    )
                })?;
                background_fill(handle, rgb)?
            }
            ExtendMode::White => background_fill(handle, [255.0; 3])?,
            ExtendMode::Black if cmyk => background_fill(handle, [0.0; 3])?,
            _ => (handle, vec![0.0]),
        };

        tracing::debug!(
            left = left,
            top = top,
            width = width,
            height = height,
            extend = ?extend,
            "Embedding image"
        );

        let placement = Placement {
            left: left as i64,
            top: top as i64,
            width,
            height,
        };
        let out = map_dynamic!("embed", handle.image(), |buf| {
            embed_buffer(buf, placement, extend, &fill)
        })?;
        Ok(handle.with_image(out))
    }

    /// [`ImageGeometry::embed`] with the image centred on the canvas
    pub fn embed_centred(
        handle: ImageHandle,
        width: u32,
        height: u32,
        extend: ExtendMode,
        background: Option<[f64; 3]>,
    ) -> Result<ImageHandle> {
        let left = (width as i64 - handle.width() as i64) / 2;
        let top = (height as i64 - handle.height() as i64) / 2;
        Self::embed(
            handle,
            left as i32,
            top as i32,
            width,
            height,
            extend,
            background,
        )
    }

    /// Crop to at most `width` x `height`, positioned by `gravity`.
    ///
    /// Images that already fit are returned unchanged.
    pub fn crop(
        handle: ImageHandle,
        width: u32,
        height: u32,
        gravity: Gravity,
    ) -> Result<ImageHandle> {
        if width == 0 || height == 0 {
            return Err(ImageError::geometry(
                "crop",
                if width == 0 { "width" } else { "height" },
                "crop must be at least 1x1",
            ));
        }

        let (in_width, in_height) = handle.dimensions();
        if in_width <= width && in_height <= height {
            return Ok(handle);
        }

        let out_width = width.min(in_width);
        let out_height = height.min(in_height);
        let (left, top) = match gravity {
            Gravity::Smart => SmartCrop::find_window(handle.image(), out_width, out_height),
            other => Self::gravity_offset(other, in_width, in_height, out_width, out_height),
        };

        tracing::debug!(
            gravity = ?gravity,
            left = left,
            top = top,
            width = out_width,
            height = out_height,
            "Cropping image"
        );
        Self::extract_area(handle, left, top, out_width, out_height)
    }

    /// Top-left corner of an `out` box inside an `in` image for a fixed gravity
    pub fn gravity_offset(
        gravity: Gravity,
        in_width: u32,
        in_height: u32,
        out_width: u32,
        out_height: u32,
    ) -> (u32, u32) {
        let centre = |input: u32, output: u32| (input.saturating_sub(output) + 1) / 2;
        let far = |input: u32, output: u32| input.saturating_sub(output);

        let (left, top) = match gravity {
            Gravity::North => (centre(in_width, out_width), 0),
            Gravity::East => (far(in_width, out_width), centre(in_height, out_height)),
            Gravity::South => (centre(in_width, out_width), far(in_height, out_height)),
            Gravity::West => (0, centre(in_height, out_height)),
            Gravity::Centre | Gravity::Smart => {
                (centre(in_width, out_width), centre(in_height, out_height))
            }
        };
        // (n + 1) / 2 may step one past the far edge when n is odd and the slack is 1.
        (
            left.min(far(in_width, out_width)),
            top.min(far(in_height, out_height)),
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    left: i64,
    top: i64,
    width: u32,
    height: u32,
}

fn embed_buffer<P>(buf: &Buffer<P>, at: Placement, extend: ExtendMode, fill: &[f64]) -> Buffer<P>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let (src_width, src_height) = buf.dimensions();
    let (w, h) = (src_width as i64, src_height as i64);
    let fill_pixel: P = pixel_from(fill);

    ImageBuffer::from_fn(at.width, at.height, |x, y| {
        let sx = x as i64 - at.left;
        let sy = y as i64 - at.top;
        if (0..w).contains(&sx) && (0..h).contains(&sy) {
            return *buf.get_pixel(sx as u32, sy as u32);
        }
        if w == 0 || h == 0 {
            return fill_pixel;
        }
        match extend {
            ExtendMode::Black | ExtendMode::White | ExtendMode::Background => fill_pixel,
            ExtendMode::Copy | ExtendMode::Last => {
                *buf.get_pixel(sx.clamp(0, w - 1) as u32, sy.clamp(0, h - 1) as u32)
            }
            ExtendMode::Repeat => *buf.get_pixel(sx.rem_euclid(w) as u32, sy.rem_euclid(h) as u32),
            ExtendMode::Mirror => *buf.get_pixel(mirror(sx, w), mirror(sy, h)),
        }
    })
}

fn mirror(i: i64, n: i64) -> u32 {
    let m = i.rem_euclid(2 * n);
    (if m < n { m } else { 2 * n - 1 - m }) as u32
}

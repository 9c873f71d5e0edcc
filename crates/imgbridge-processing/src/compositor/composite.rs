//! Operations over several images: grid joins and blend-mode compositing.

use image::DynamicImage;
use imgbridge_core::{ImageError, Result};
use serde::{Deserialize, Serialize};

use crate::colour::ColourOps;
use crate::handle::{ImageHandle, Interpretation};
use crate::image::geometry::{ExtendMode, ImageGeometry};
use crate::raster::{self, paste_dynamic};

/// Placement of an image inside a larger grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Low,
    Centre,
    High,
}

impl Align {
    fn offset(self, cell: u32, size: u32) -> i64 {
        let spare = cell as i64 - size as i64;
        match self {
            Align::Low => 0,
            Align::Centre => spare / 2,
            Align::High => spare,
        }
    }
}

/// Porter-Duff operators followed by the separable PDF blend modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    Clear,
    Source,
    #[default]
    Over,
    In,
    Out,
    Atop,
    Dest,
    DestOver,
    DestIn,
    DestOut,
    DestAtop,
    Xor,
    Add,
    Saturate,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColourDodge,
    ColourBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
}

/// Grid layout for [`Compositor::array_join`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayJoinSpec {
    /// Images per row, 0 puts them all on one row
    #[serde(default)]
    pub across: u32,
    /// Gap between cells
    #[serde(default)]
    pub shim: u32,
    /// Cell width, the widest image by default
    pub hspacing: Option<u32>,
    /// Cell height, the tallest image by default
    pub vspacing: Option<u32>,
    #[serde(default)]
    pub halign: Align,
    #[serde(default)]
    pub valign: Align,
    /// Fill for uncovered cell area, 0-255 scale
    #[serde(default)]
    pub background: [f64; 3],
}

impl Default for ArrayJoinSpec {
    fn default() -> Self {
        Self {
            across: 0,
            shim: 0,
            hspacing: None,
            vspacing: None,
            halign: Align::Low,
            valign: Align::Low,
            background: [0.0; 3],
        }
    }
}

/// Resolved grid geometry; output sides are wide enough not to overflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinLayout {
    pub across: u32,
    pub down: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    pub width: u64,
    pub height: u64,
}

impl ArrayJoinSpec {
    /// Grid geometry for images of the given sizes
    pub fn layout(&self, sizes: &[(u32, u32)]) -> JoinLayout {
        let count = sizes.len().max(1) as u32;
        let across = match self.across {
            0 => count,
            n => n.min(count),
        };
        let down = count.div_ceil(across);
        let cell_width = self
            .hspacing
            .filter(|s| *s > 0)
            .unwrap_or_else(|| sizes.iter().map(|s| s.0).max().unwrap_or(1));
        let cell_height = self
            .vspacing
            .filter(|s| *s > 0)
            .unwrap_or_else(|| sizes.iter().map(|s| s.1).max().unwrap_or(1));

        let side = |cells: u32, cell: u32| {
            cells as u64 * cell as u64 + cells.saturating_sub(1) as u64 * self.shim as u64
        };
        JoinLayout {
            across,
            down,
            cell_width,
            cell_height,
            width: side(across, cell_width),
            height: side(down, cell_height),
        }
    }
}

pub struct Compositor;

impl Compositor {
    /// Lay images out left to right, top to bottom, on a grid of equal cells
    pub fn array_join(images: Vec<ImageHandle>, spec: &ArrayJoinSpec) -> Result<ImageHandle> {
        const STAGE: &str = "array_join";
        if images.len() < 2 {
            return Err(ImageError::geometry(STAGE, "images", "at least two images are required"));
        }

        let sizes: Vec<(u32, u32)> = images.iter().map(|h| h.dimensions()).collect();
        let layout = spec.layout(&sizes);
        let (width, height) = match (u32::try_from(layout.width), u32::try_from(layout.height)) {
            (Ok(w), Ok(h)) => (w, h),
            (Err(_), _) => return Err(ImageError::geometry(STAGE, "across", "joined width overflows")),
            (_, Err(_)) => return Err(ImageError::geometry(STAGE, "vspacing", "joined height overflows")),
        };

        let alpha = images.iter().any(|h| h.has_alpha());
        let images = unify(images, alpha)?;
        tracing::debug!(
            images = images.len(),
            across = layout.across,
            down = layout.down,
            cell_width = layout.cell_width,
            cell_height = layout.cell_height,
            "Joining images"
        );

        let mut canvas: Option<ImageHandle> = None;
        for (index, handle) in images.into_iter().enumerate() {
            let index = index as u32;
            let (col, row) = (index % layout.across, index / layout.across);
            let left = col as i64 * (layout.cell_width as i64 + spec.shim as i64);
            let top = row as i64 * (layout.cell_height as i64 + spec.shim as i64);

            let cell = ImageGeometry::embed(
                handle,
                spec.halign.offset(layout.cell_width, sizes[index as usize].0) as i32,
                spec.valign.offset(layout.cell_height, sizes[index as usize].1) as i32,
                layout.cell_width,
                layout.cell_height,
                ExtendMode::Background,
                Some(spec.background),
            )?;

            let mut target = match canvas.take() {
                Some(target) => target,
                None => ImageGeometry::embed(
                    cell.clone(),
                    0,
                    0,
                    width,
                    height,
                    ExtendMode::Background,
                    Some(spec.background),
                )?,
            };
            let mut image = target.image().clone();
            paste_dynamic(STAGE, &mut image, cell.image(), left, top)?;
            target = target.with_image(image);
            canvas = Some(target);
        }

        canvas.ok_or_else(|| ImageError::geometry(STAGE, "images", "nothing to join"))
    }

    /// Blend each later image over the running result, `modes[i]` placing image
    /// `i + 1`. The output keeps the size of the first image.
    pub fn composite(images: Vec<ImageHandle>, modes: &[BlendMode]) -> Result<ImageHandle> {
        const STAGE: &str = "composite";
        if images.len() < 2 {
            return Err(ImageError::geometry(STAGE, "images", "at least two images are required"));
        }
        if modes.len() != images.len() - 1 {
            return Err(ImageError::geometry(
                STAGE,
                "modes",
                format!("{} images need {} blend modes, got {}", images.len(), images.len() - 1, modes.len()),
            ));
        }

        let mut images = unify(images, true)?.into_iter();
        let base = images
            .next()
            .ok_or_else(|| ImageError::geometry(STAGE, "images", "nothing to composite"))?;
        let layout = base.image().color();

        let mut acc = base.image().to_rgba32f();
        for (overlay, mode) in images.zip(modes) {
            let top = overlay.image().to_rgba32f();
            for (x, y, px) in acc.enumerate_pixels_mut() {
                let src = if x < top.width() && y < top.height() {
                    top.get_pixel(x, y).0
                } else {
                    [0.0; 4]
                };
                px.0 = blend(*mode, src, px.0);
            }
        }
        tracing::debug!(layers = modes.len() + 1, modes = ?modes, "Composited images");

        let out = raster::convert_to(&DynamicImage::ImageRgba32F(acc), layout)
            .ok_or_else(|| ImageError::transform(STAGE, format!("cannot write {:?}", layout)))?;
        Ok(base.with_image(out))
    }

    /// [`Compositor::composite`] of one overlay onto a base
    pub fn composite2(base: ImageHandle, overlay: ImageHandle, mode: BlendMode) -> Result<ImageHandle> {
        Self::composite(vec![base, overlay], &[mode])
    }
}

/// Convert every handle to one interpretation: grey only when all are grey,
/// 16-bit when any is deeper than 8 bits
fn unify(images: Vec<ImageHandle>, alpha: bool) -> Result<Vec<ImageHandle>> {
    let grey = images.iter().all(|h| h.interpretation().is_greyscale());
    let deep = images.iter().any(|h| h.bits_per_sample() > 8);
    let target = match (grey, deep) {
        (true, false) => Interpretation::BW,
        (true, true) => Interpretation::Grey16,
        (false, false) => Interpretation::Srgb,
        (false, true) => Interpretation::Rgb16,
    };

    images
        .into_iter()
        .map(|handle| {
            let handle = if handle.interpretation() == target {
                handle
            } else {
                ColourOps::to_colourspace(handle, target)?
            };
            if alpha && !handle.has_alpha() {
                let image = raster::with_opaque_alpha(handle.image().clone());
                Ok(handle.with_image(image))
            } else {
                Ok(handle)
            }
        })
        .collect()
}

/// Blend unpremultiplied `src` over `dst`, both normalised to 0..=1
fn blend(mode: BlendMode, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    use BlendMode::*;

    let (aa, ab) = (src[3], dst[3]);
    let alpha = match mode {
        Clear => 0.0,
        Source | DestAtop => aa,
        In | DestIn => aa * ab,
        Out => aa * (1.0 - ab),
        DestOut => ab * (1.0 - aa),
        Atop | Dest => ab,
        Xor => aa * (1.0 - ab) + ab * (1.0 - aa),
        Add | Saturate => (aa + ab).min(1.0),
        _ => aa + ab * (1.0 - aa),
    };
    if alpha <= 0.0 {
        return [0.0; 4];
    }

    let mut out = [0.0, 0.0, 0.0, alpha];
    for (i, value) in out.iter_mut().take(3).enumerate() {
        let (xa, xb) = (src[i], dst[i]);
        let colour = match mode {
            Clear => 0.0,
            Source | In | Out => xa,
            Dest | DestIn | DestOut => xb,
            Over => (aa * xa + ab * xb * (1.0 - aa)) / alpha,
            DestOver => (ab * xb + aa * xa * (1.0 - ab)) / alpha,
            Atop => aa * xa + (1.0 - aa) * xb,
            DestAtop => ab * xb + (1.0 - ab) * xa,
            Xor => (aa * (1.0 - ab) * xa + ab * (1.0 - aa) * xb) / alpha,
            Add => (aa * xa + ab * xb) / alpha,
            Saturate => (aa.min(1.0 - ab) * xa + ab * xb) / alpha,
            separable => {
                let mixed = separable_blend(separable, xa, xb);
                ((1.0 - ab) * aa * xa + (1.0 - aa) * ab * xb + aa * ab * mixed) / alpha
            }
        };
        *value = colour.clamp(0.0, 1.0);
    }
    out
}

/// `a` is the source colour, `b` the backdrop
fn separable_blend(mode: BlendMode, a: f32, b: f32) -> f32 {
    match mode {
        BlendMode::Multiply => a * b,
        BlendMode::Screen => a + b - a * b,
        BlendMode::Overlay => hard_light(b, a),
        BlendMode::Darken => a.min(b),
        BlendMode::Lighten => a.max(b),
        BlendMode::ColourDodge => {
            if b <= 0.0 {
                0.0
            } else if a >= 1.0 {
                1.0
            } else {
                (b / (1.0 - a)).min(1.0)
            }
        }
        BlendMode::ColourBurn => {
            if b >= 1.0 {
                1.0
            } else if a <= 0.0 {
                0.0
            } else {
                1.0 - ((1.0 - b) / a).min(1.0)
            }
        }
        BlendMode::HardLight => hard_light(a, b),
        BlendMode::SoftLight => {
            if a <= 0.5 {
                b - (1.0 - 2.0 * a) * b * (1.0 - b)
            } else {
                let d = if b <= 0.25 {
                    ((16.0 * b - 12.0) * b + 4.0) * b
                } else {
                    b.sqrt()
                };
                b + (2.0 * a - 1.0) * (d - b)
            }
        }
        BlendMode::Difference => (a - b).abs(),
        BlendMode::Exclusion => a + b - 2.0 * a * b,
        _ => a,
    }
}

fn hard_light(a: f32, b: f32) -> f32 {
    if a <= 0.5 {
        2.0 * a * b
    } else {
        1.0 - 2.0 * (1.0 - a) * (1.0 - b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use rstest::rstest;

    fn rgb(width: u32, height: u32, px: [u8; 3]) -> ImageHandle {
        ImageHandle::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(px))))
    }

    fn rgba(width: u32, height: u32, px: [u8; 4]) -> ImageHandle {
        ImageHandle::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(px))))
    }

    #[rstest]
    #[case(ArrayJoinSpec { across: 2, hspacing: Some(128), vspacing: Some(128), ..ArrayJoinSpec::default() }, 4, (256, 256))]
    #[case(ArrayJoinSpec::default(), 3, (30, 20))]
    #[case(ArrayJoinSpec { across: 2, shim: 4, ..ArrayJoinSpec::default() }, 3, (24, 44))]
    #[case(ArrayJoinSpec { across: 9, ..ArrayJoinSpec::default() }, 2, (20, 20))]
    fn test_join_layout(#[case] spec: ArrayJoinSpec, #[case] count: usize, #[case] expected: (u64, u64)) {
        let sizes = vec![(10, 20); count];
        let layout = spec.layout(&sizes);
        assert_eq!((layout.width, layout.height), expected);
    }

    #[test]
    fn test_array_join_places_cells() {
        let images = vec![
            rgb(2, 2, [255, 0, 0]),
            rgb(2, 2, [0, 255, 0]),
            rgb(2, 2, [0, 0, 255]),
        ];
        let spec = ArrayJoinSpec {
            across: 2,
            shim: 1,
            background: [255.0, 255.0, 255.0],
            ..ArrayJoinSpec::default()
        };

        let joined = Compositor::array_join(images, &spec).unwrap();
        assert_eq!(joined.dimensions(), (5, 5));
        let out = joined.image().to_rgb8();
        assert_eq!(out.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(out.get_pixel(3, 1), &Rgb([0, 255, 0]));
        assert_eq!(out.get_pixel(1, 4), &Rgb([0, 0, 255]));
        // shim and the empty fourth cell show the background
        assert_eq!(out.get_pixel(2, 0), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(4, 4), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_array_join_centres_small_images() {
        let images = vec![rgb(4, 4, [0, 0, 0]), rgb(2, 2, [255, 255, 255])];
        let spec = ArrayJoinSpec {
            halign: Align::Centre,
            valign: Align::Centre,
            background: [0.0, 0.0, 255.0],
            ..ArrayJoinSpec::default()
        };

        let out = Compositor::array_join(images, &spec).unwrap().image().to_rgb8();
        assert_eq!(out.dimensions(), (8, 4));
        assert_eq!(out.get_pixel(4, 0), &Rgb([0, 0, 255]));
        assert_eq!(out.get_pixel(5, 1), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_array_join_mixed_layouts() {
        let grey = ImageHandle::new(DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, Luma([9]))));
        let images = vec![grey, rgba(2, 2, [1, 2, 3, 4])];

        let joined = Compositor::array_join(images, &ArrayJoinSpec::default()).unwrap();
        assert_eq!(joined.interpretation(), Interpretation::Srgb);
        assert!(joined.has_alpha());
        assert_eq!(joined.image().to_rgba8().get_pixel(0, 0), &Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn test_array_join_needs_two_images() {
        let err = Compositor::array_join(vec![rgb(1, 1, [0; 3])], &ArrayJoinSpec::default()).unwrap_err();
        assert!(matches!(err, ImageError::InvalidGeometry { .. }));
        assert_eq!(err.param(), Some("images"));
    }

    #[rstest]
    #[case(BlendMode::Over, [0, 0, 255, 255])]
    #[case(BlendMode::Dest, [255, 0, 0, 255])]
    #[case(BlendMode::Clear, [0, 0, 0, 0])]
    #[case(BlendMode::Multiply, [0, 0, 0, 255])]
    #[case(BlendMode::Screen, [255, 0, 255, 255])]
    #[case(BlendMode::Lighten, [255, 0, 255, 255])]
    #[case(BlendMode::Difference, [255, 0, 255, 255])]
    fn test_composite2_modes(#[case] mode: BlendMode, #[case] expected: [u8; 4]) {
        let base = rgba(2, 2, [255, 0, 0, 255]);
        let overlay = rgba(2, 2, [0, 0, 255, 255]);
        let out = Compositor::composite2(base, overlay, mode).unwrap();
        assert_eq!(out.image().to_rgba8().get_pixel(1, 1), &Rgba(expected));
    }

    #[test]
    fn test_over_respects_overlay_alpha() {
        let base = rgb(2, 2, [0, 0, 0]);
        let overlay = rgba(2, 2, [255, 255, 255, 0]);
        let out = Compositor::composite2(base, overlay, BlendMode::Over).unwrap();
        assert_eq!(out.image().to_rgba8().get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_composite_keeps_base_size_and_depth() {
        let base = ImageHandle::new(DynamicImage::ImageRgb16(ImageBuffer::from_pixel(
            4,
            3,
            Rgb([0u16, 0, 0]),
        )));
        let small = rgb(2, 2, [255, 255, 255]);
        let out = Compositor::composite(vec![base, small.clone(), small], &[BlendMode::Over, BlendMode::Over])
            .unwrap();

        assert_eq!(out.dimensions(), (4, 3));
        assert_eq!(out.interpretation(), Interpretation::Rgb16);
        let pixels = out.image().to_rgba16();
        assert_eq!(pixels.get_pixel(1, 1), &Rgba([65535, 65535, 65535, 65535]));
        assert_eq!(pixels.get_pixel(3, 2), &Rgba([0, 0, 0, 65535]));
    }

    #[test]
    fn test_composite_needs_one_mode_per_overlay() {
        let images = vec![rgb(1, 1, [0; 3]), rgb(1, 1, [0; 3]), rgb(1, 1, [0; 3])];
        let err = Compositor::composite(images, &[BlendMode::Over]).unwrap_err();
        assert_eq!(err.param(), Some("modes"));
    }

    #[test]
    fn test_overlay_mode_darkens_dark_backdrop() {
        // backdrop 0.25 with source 1.0: 2 * 0.25 * 1.0
        let value = separable_blend(BlendMode::Overlay, 1.0, 0.25);
        assert!((value - 0.5).abs() < 1e-6);
        let value = separable_blend(BlendMode::HardLight, 1.0, 0.25);
        assert!((value - 1.0).abs() < 1e-6);
    }
}

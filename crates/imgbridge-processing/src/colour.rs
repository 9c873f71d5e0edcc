//! Colour-space conversion, ICC transforms, background flattening, gamma and
//! histogram equalisation.

use std::fs;
use std::path::Path;

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::contrast::equalize_histogram;
use imageproc::stats::histogram;
use imgbridge_core::{ImageError, Result};
use moxcms::{ColorProfile, DataColorSpace, Layout, TransformOptions};

use crate::handle::{ImageHandle, Interpretation};
use crate::metadata::ImageHistogram;
use crate::raster::{self, map_dynamic, Buffer, Sample};

/// Background colour and alpha ceiling expressed in an image's sample scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlattenConstants {
    pub background: [f64; 3],
    pub max_alpha: f64,
}

/// Rescale a 0-255 background into the sample scale of `interpretation`.
///
/// 16-bit encodings multiply both the colour and the alpha ceiling by 65535/255.
/// Float scRGB divides by 255 so that 1.0 is opaque. Everything else is used as-is.
pub fn flatten_constants(interpretation: Interpretation, rgb: [f64; 3]) -> FlattenConstants {
    if interpretation.is_16bit() {
        let scale = 65535.0 / 255.0;
        FlattenConstants {
            background: rgb.map(|v| v * scale),
            max_alpha: 65535.0,
        }
    } else if interpretation == Interpretation::ScRgb {
        FlattenConstants {
            background: rgb.map(|v| v / 255.0),
            max_alpha: 1.0,
        }
    } else {
        FlattenConstants {
            background: rgb,
            max_alpha: 255.0,
        }
    }
}

const SUPPORTED: [Interpretation; 7] = [
    Interpretation::BW,
    Interpretation::Grey16,
    Interpretation::Srgb,
    Interpretation::Rgb,
    Interpretation::Rgb16,
    Interpretation::ScRgb,
    Interpretation::Cmyk,
];

/// Colour operations on [`ImageHandle`]s
pub struct ColourOps;

impl ColourOps {
    /// Whether the handle's current interpretation can be converted from
    pub fn is_colourspace_supported(handle: &ImageHandle) -> bool {
        SUPPORTED.contains(&handle.interpretation())
    }

    pub fn to_colourspace(handle: ImageHandle, target: Interpretation) -> Result<ImageHandle> {
        let source = handle.interpretation();
        if !Self::is_colourspace_supported(&handle) {
            return Err(ImageError::transform(
                "colourspace",
                format!("cannot convert from {}", source),
            ));
        }
        if !SUPPORTED.contains(&target) {
            return Err(ImageError::transform(
                "colourspace",
                format!("cannot convert to {}", target),
            ));
        }
        if source == target {
            return Ok(handle);
        }

        let has_alpha = handle.has_alpha();
        let encoded = match source {
            Interpretation::Cmyk => DynamicImage::ImageRgb8(cmyk_to_rgb(&handle.image().to_rgba8())),
            Interpretation::ScRgb => map_dynamic!("colourspace", handle.image(), |buf| {
                raster::map_colour_bands(buf, has_alpha, linear_to_srgb)
            })?,
            _ => handle.image().clone(),
        };

        let converted = match target {
            Interpretation::BW if has_alpha => DynamicImage::ImageLumaA8(encoded.to_luma_alpha8()),
            Interpretation::BW => DynamicImage::ImageLuma8(encoded.to_luma8()),
            Interpretation::Grey16 if has_alpha => {
                DynamicImage::ImageLumaA16(encoded.to_luma_alpha16())
            }
            Interpretation::Grey16 => DynamicImage::ImageLuma16(encoded.to_luma16()),
            Interpretation::Srgb | Interpretation::Rgb if has_alpha => {
                DynamicImage::ImageRgba8(encoded.to_rgba8())
            }
            Interpretation::Srgb | Interpretation::Rgb => DynamicImage::ImageRgb8(encoded.to_rgb8()),
            Interpretation::Rgb16 if has_alpha => DynamicImage::ImageRgba16(encoded.to_rgba16()),
            Interpretation::Rgb16 => DynamicImage::ImageRgb16(encoded.to_rgb16()),
            Interpretation::ScRgb => {
                let float = if has_alpha {
                    DynamicImage::ImageRgba32F(encoded.to_rgba32f())
                } else {
                    DynamicImage::ImageRgb32F(encoded.to_rgb32f())
                };
                map_dynamic!("colourspace", &float, |buf| {
                    raster::map_colour_bands(buf, has_alpha, srgb_to_linear)
                })?
            }
            Interpretation::Cmyk => {
                if has_alpha {
                    tracing::debug!("Dropping alpha band for CMYK output");
                }
                DynamicImage::ImageRgba8(rgb_to_cmyk(&encoded.to_rgb8()))
            }
            other => {
                return Err(ImageError::transform(
                    "colourspace",
                    format!("cannot convert to {}", other),
                ))
            }
        };

        tracing::debug!(from = %source, to = %target, "Converted colourspace");

        // A profile only describes images of the same colour family.
        let same_family = family(source) == family(target);
        let handle = if same_family {
            handle
        } else {
            Self::strip_profile(handle)
        };
        Ok(handle.with_image_as(converted, target))
    }

    /// Transform pixels between ICC profiles.
    ///
    /// The embedded profile is the input when present and `input_profile` is then
    /// ignored. Without one, `input_profile` is required.
    pub fn icc_transform(
        handle: ImageHandle,
        output_profile: &Path,
        input_profile: Option<&Path>,
    ) -> Result<ImageHandle> {
        let output_bytes = read_profile(output_profile)?;
        let input_bytes = match handle.icc_profile() {
            Some(embedded) => embedded.to_vec(),
            None => match input_profile {
                Some(path) => read_profile(path)?,
                None => {
                    return Err(ImageError::transform(
                        "icc_transform",
                        "image has no embedded profile and no input profile was given",
                    ))
                }
            },
        };

        let src = ColorProfile::new_from_slice(&input_bytes)
            .map_err(|e| ImageError::transform("icc_transform", format!("input profile: {:?}", e)))?;
        let dst = ColorProfile::new_from_slice(&output_bytes).map_err(|e| {
            ImageError::transform("icc_transform", format!("output profile: {:?}", e))
        })?;

        let handle = Self::transform_profiles(handle, &src, &dst)?;
        Ok(handle.with_icc_profile(Some(output_bytes)))
    }

    /// Pixel half of [`ColourOps::icc_transform`] over parsed profiles.
    ///
    /// Grey profiles take single-band layouts on either side; every other colour
    /// space goes through RGB. The embedded profile is left untouched.
    pub fn transform_profiles(
        handle: ImageHandle,
        src: &ColorProfile,
        dst: &ColorProfile,
    ) -> Result<ImageHandle> {
        let has_alpha = handle.has_alpha();
        let interpretation = handle.interpretation();
        let (w, h) = handle.dimensions();

        let transformed = match (interpretation, handle.bits_per_sample()) {
            (Interpretation::Cmyk, _) => {
                let dst_layout = profile_layout(dst, false);
                let cmyk = handle.image().to_rgba8();
                let out = transform_8bit(src, dst, Layout::Rgba, dst_layout, cmyk.as_raw(), w)?;
                image_from_8bit(dst_layout, w, h, out)?
            }
            (_, 16) | (_, 32) => {
                let (src_layout, dst_layout) = (profile_layout(src, has_alpha), profile_layout(dst, has_alpha));
                let raw = raw_16bit(handle.image(), src_layout);
                let out = transform_16bit(src, dst, src_layout, dst_layout, &raw, w)?;
                image_from_16bit(dst_layout, w, h, out)?
            }
            _ => {
                let (src_layout, dst_layout) = (profile_layout(src, has_alpha), profile_layout(dst, has_alpha));
                let raw = raw_8bit(handle.image(), src_layout);
                let out = transform_8bit(src, dst, src_layout, dst_layout, &raw, w)?;
                image_from_8bit(dst_layout, w, h, out)?
            }
        };

        let target = match transformed {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageLumaA8(_) => Interpretation::BW,
            DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => Interpretation::Grey16,
            DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgba16(_) => Interpretation::Rgb16,
            _ => Interpretation::Srgb,
        };
        tracing::debug!(
            from = %interpretation,
            to = %target,
            embedded_input = handle.icc_profile().is_some(),
            "Applied ICC transform"
        );

        Ok(handle.with_image_as(transformed, target))
    }

    /// Composite onto a solid colour and drop the alpha band
    pub fn flatten_on_background(handle: ImageHandle, rgb: [f64; 3]) -> Result<ImageHandle> {
        if !handle.has_alpha() {
            return Ok(handle);
        }

        let (handle, fill) = background_fill(handle, rgb)?;
        let constants = flatten_constants(handle.interpretation(), rgb);
        let max_alpha = constants.max_alpha;

        let composited = map_dynamic!("flatten", handle.image(), |buf| {
            flatten_buffer(buf, &fill, max_alpha)
        })?;
        let opaque = raster::convert_to(&composited, raster::without_alpha(composited.color()))
            .ok_or_else(|| ImageError::transform("flatten", "cannot drop alpha band"))?;

        tracing::debug!(
            background = ?constants.background,
            max_alpha = max_alpha,
            "Flattened alpha onto background"
        );

        let interpretation = handle.interpretation();
        Ok(handle.with_image_as(opaque, interpretation))
    }

    /// Raise colour bands to `exponent`, expressed to the engine as `1 / exponent`
    pub fn gamma(handle: ImageHandle, exponent: f64) -> Result<ImageHandle> {
        if !exponent.is_finite() || exponent <= 0.0 {
            return Err(ImageError::transform(
                "gamma",
                format!("exponent must be positive, got {}", exponent),
            ));
        }

        let engine_exponent = 1.0 / exponent;
        let has_alpha = handle.has_alpha();
        let out = map_dynamic!("gamma", handle.image(), |buf| {
            raster::map_colour_bands(buf, has_alpha, |v| gamma_transform(v, engine_exponent))
        })?;
        Ok(handle.with_image(out))
    }

    pub fn has_profile_embedded(handle: &ImageHandle) -> bool {
        handle.icc_profile().is_some()
    }

    pub fn strip_profile(handle: ImageHandle) -> ImageHandle {
        handle.with_icc_profile(None)
    }

    /// Count samples per band over 256 bins.
    ///
    /// Deeper images are counted after reduction to 8 bits.
    pub fn histogram_find(handle: ImageHandle) -> Result<ImageHistogram> {
        let handle = to_8bit(handle)?;
        let counts = match handle.image() {
            DynamicImage::ImageLuma8(buf) => histogram(buf),
            DynamicImage::ImageLumaA8(buf) => histogram(buf),
            DynamicImage::ImageRgb8(buf) => histogram(buf),
            DynamicImage::ImageRgba8(buf) => histogram(buf),
            other => {
                return Err(ImageError::transform(
                    "histogram",
                    format!("unsupported pixel layout {:?}", other.color()),
                ))
            }
        };

        Ok(ImageHistogram {
            interpretation: handle.interpretation(),
            bands: counts.channels.iter().map(|bins| bins.to_vec()).collect(),
        })
    }

    /// Equalise every colour band independently; alpha is left as is.
    ///
    /// 16-bit and float images come back as 8-bit.
    pub fn histogram_normalise(handle: ImageHandle) -> Result<ImageHandle> {
        let handle = to_8bit(handle)?;
        let colour_bands = handle.band_count() as usize - usize::from(handle.has_alpha());
        let out = match handle.image() {
            DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(equalise_bands(buf, colour_bands)),
            DynamicImage::ImageLumaA8(buf) => DynamicImage::ImageLumaA8(equalise_bands(buf, colour_bands)),
            DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(equalise_bands(buf, colour_bands)),
            DynamicImage::ImageRgba8(buf) => DynamicImage::ImageRgba8(equalise_bands(buf, colour_bands)),
            other => {
                return Err(ImageError::transform(
                    "histogram_normalise",
                    format!("unsupported pixel layout {:?}", other.color()),
                ))
            }
        };
        tracing::debug!(bands = colour_bands, "Equalised histogram");
        Ok(handle.with_image(out))
    }
}

fn to_8bit(handle: ImageHandle) -> Result<ImageHandle> {
    match handle.interpretation() {
        Interpretation::Grey16 => ColourOps::to_colourspace(handle, Interpretation::BW),
        Interpretation::Rgb16 | Interpretation::ScRgb => {
            ColourOps::to_colourspace(handle, Interpretation::Srgb)
        }
        _ => Ok(handle),
    }
}

fn equalise_bands<P>(buf: &Buffer<P>, colour_bands: usize) -> Buffer<P>
where
    P: Pixel<Subpixel = u8>,
{
    let (width, height) = buf.dimensions();
    let mut out = buf.clone();
    for band in 0..colour_bands {
        let plane = GrayImage::from_fn(width, height, |x, y| Luma([buf.get_pixel(x, y).channels()[band]]));
        let equalised = equalize_histogram(&plane);
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            pixel.channels_mut()[band] = equalised.get_pixel(x, y)[0];
        }
    }
    out
}

/// Normalised gamma curve; the engine raises values to `1 / exponent`
fn gamma_transform(value: f64, exponent: f64) -> f64 {
    value.max(0.0).powf(1.0 / exponent)
}

fn family(interpretation: Interpretation) -> u8 {
    match interpretation {
        Interpretation::BW | Interpretation::Grey16 => 0,
        Interpretation::Cmyk => 2,
        _ => 1,
    }
}

/// Fill values for `rgb` in the handle's sample scale, one per band.
///
/// Greyscale images are promoted to RGB when the colour is not a grey. The alpha
/// band, if any, is filled opaque.
pub(crate) fn background_fill(handle: ImageHandle, rgb: [f64; 3]) -> Result<(ImageHandle, Vec<f64>)> {
    let is_grey_colour = rgb[0] == rgb[1] && rgb[1] == rgb[2];
    let handle = match handle.interpretation() {
        Interpretation::BW if !is_grey_colour => ColourOps::to_colourspace(handle, Interpretation::Srgb)?,
        Interpretation::Grey16 if !is_grey_colour => {
            ColourOps::to_colourspace(handle, Interpretation::Rgb16)?
        }
        _ => handle,
    };

    let mut fill = background_bands(handle.interpretation(), rgb);
    if handle.has_alpha() {
        fill.push(flatten_constants(handle.interpretation(), rgb).max_alpha);
    }
    Ok((handle, fill))
}

/// Colour bands of `rgb` in the sample scale of `interpretation`, excluding alpha.
///
/// Greyscale takes the Rec. 709 luma of the colour; CMYK takes naive ink values.
pub(crate) fn background_bands(interpretation: Interpretation, rgb: [f64; 3]) -> Vec<f64> {
    let constants = flatten_constants(interpretation, rgb);
    let [r, g, b] = constants.background;
    match interpretation {
        Interpretation::BW | Interpretation::Grey16 => vec![0.2126 * r + 0.7152 * g + 0.0722 * b],
        Interpretation::Cmyk => {
            let cmyk = rgb_pixel_to_cmyk(rgb.map(u8::from_f64));
            cmyk.iter().map(|&v| v as f64).collect()
        }
        _ => constants.background.to_vec(),
    }
}

fn flatten_buffer<P>(buf: &Buffer<P>, fill: &[f64], max_alpha: f64) -> Buffer<P>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let alpha_index = P::CHANNEL_COUNT as usize - 1;
    let mut out = buf.clone();
    for pixel in out.pixels_mut() {
        let channels = pixel.channels_mut();
        let alpha = channels[alpha_index].as_f64().clamp(0.0, max_alpha);
        for (i, c) in channels.iter_mut().enumerate().take(alpha_index) {
            let bg = fill.get(i).copied().unwrap_or(0.0);
            *c = P::Subpixel::from_f64((c.as_f64() * alpha + bg * (max_alpha - alpha)) / max_alpha);
        }
        channels[alpha_index] = P::Subpixel::from_f64(max_alpha);
    }
    out
}

fn read_profile(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        ImageError::transform(
            "icc_transform",
            format!("cannot read profile {}: {}", path.display(), e),
        )
    })
}

fn transform_8bit(
    src: &ColorProfile,
    dst: &ColorProfile,
    src_layout: Layout,
    dst_layout: Layout,
    input: &[u8],
    width: u32,
) -> Result<Vec<u8>> {
    let transform = src
        .create_transform_8bit(src_layout, dst, dst_layout, TransformOptions::default())
        .map_err(|e| ImageError::transform("icc_transform", format!("{:?}", e)))?;

    let src_row = width as usize * layout_channels(src_layout);
    let dst_row = width as usize * layout_channels(dst_layout);
    let rows = if src_row == 0 { 0 } else { input.len() / src_row };
    let mut output = vec![0u8; rows * dst_row];
    for (src_row, dst_row) in input
        .chunks_exact(src_row.max(1))
        .zip(output.chunks_exact_mut(dst_row.max(1)))
    {
        transform
            .transform(src_row, dst_row)
            .map_err(|e| ImageError::transform("icc_transform", format!("{:?}", e)))?;
    }
    Ok(output)
}

fn transform_16bit(
    src: &ColorProfile,
    dst: &ColorProfile,
    src_layout: Layout,
    dst_layout: Layout,
    input: &[u16],
    width: u32,
) -> Result<Vec<u16>> {
    let transform = src
        .create_transform_16bit(src_layout, dst, dst_layout, TransformOptions::default())
        .map_err(|e| ImageError::transform("icc_transform", format!("{:?}", e)))?;

    let src_row = (width as usize * layout_channels(src_layout)).max(1);
    let dst_row = (width as usize * layout_channels(dst_layout)).max(1);
    let mut output = vec![0u16; input.len() / src_row * dst_row];
    for (src_row, dst_row) in input.chunks_exact(src_row).zip(output.chunks_exact_mut(dst_row)) {
        transform
            .transform(src_row, dst_row)
            .map_err(|e| ImageError::transform("icc_transform", format!("{:?}", e)))?;
    }
    Ok(output)
}

/// moxcms layout for a profile's colour space
fn profile_layout(profile: &ColorProfile, alpha: bool) -> Layout {
    match (matches!(profile.color_space, DataColorSpace::Gray), alpha) {
        (true, false) => Layout::Gray,
        (true, true) => Layout::GrayAlpha,
        (false, false) => Layout::Rgb,
        (false, true) => Layout::Rgba,
    }
}

fn raw_8bit(image: &DynamicImage, layout: Layout) -> Vec<u8> {
    match layout {
        Layout::Gray => image.to_luma8().into_raw(),
        Layout::GrayAlpha => image.to_luma_alpha8().into_raw(),
        Layout::Rgba => image.to_rgba8().into_raw(),
        _ => image.to_rgb8().into_raw(),
    }
}

fn raw_16bit(image: &DynamicImage, layout: Layout) -> Vec<u16> {
    match layout {
        Layout::Gray => image.to_luma16().into_raw(),
        Layout::GrayAlpha => image.to_luma_alpha16().into_raw(),
        Layout::Rgba => image.to_rgba16().into_raw(),
        _ => image.to_rgb16().into_raw(),
    }
}

fn image_from_8bit(layout: Layout, width: u32, height: u32, data: Vec<u8>) -> Result<DynamicImage> {
    Ok(match layout {
        Layout::Gray => DynamicImage::ImageLuma8(buffer_from(width, height, data)?),
        Layout::GrayAlpha => DynamicImage::ImageLumaA8(buffer_from(width, height, data)?),
        Layout::Rgba => DynamicImage::ImageRgba8(buffer_from(width, height, data)?),
        _ => DynamicImage::ImageRgb8(buffer_from(width, height, data)?),
    })
}

fn image_from_16bit(layout: Layout, width: u32, height: u32, data: Vec<u16>) -> Result<DynamicImage> {
    Ok(match layout {
        Layout::Gray => DynamicImage::ImageLuma16(buffer_from(width, height, data)?),
        Layout::GrayAlpha => DynamicImage::ImageLumaA16(buffer_from(width, height, data)?),
        Layout::Rgba => DynamicImage::ImageRgba16(buffer_from(width, height, data)?),
        _ => DynamicImage::ImageRgb16(buffer_from(width, height, data)?),
    })
}

fn layout_channels(layout: Layout) -> usize {
    match layout {
        Layout::Rgba => 4,
        Layout::Gray => 1,
        Layout::GrayAlpha => 2,
        _ => 3,
    }
}

fn buffer_from<P>(width: u32, height: u32, data: Vec<P::Subpixel>) -> Result<Buffer<P>>
where
    P: Pixel,
{
    ImageBuffer::from_raw(width, height, data)
        .ok_or_else(|| ImageError::transform("icc_transform", "transformed buffer has wrong size"))
}

fn srgb_to_linear(v: f64) -> f64 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f64) -> f64 {
    if v <= 0.0031308 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

fn rgb_pixel_to_cmyk(rgb: [u8; 3]) -> [u8; 4] {
    let [r, g, b] = rgb.map(|v| v as f64 / 255.0);
    let k = 1.0 - r.max(g).max(b);
    if k >= 1.0 {
        return [0, 0, 0, 255];
    }
    let ink = |c: f64| u8::from_f64((1.0 - c - k) / (1.0 - k) * 255.0);
    [ink(r), ink(g), ink(b), u8::from_f64(k * 255.0)]
}

fn rgb_to_cmyk(rgb: &RgbImage) -> RgbaImage {
    ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
        Rgba(rgb_pixel_to_cmyk(rgb.get_pixel(x, y).0))
    })
}

fn cmyk_to_rgb(cmyk: &RgbaImage) -> RgbImage {
    ImageBuffer::from_fn(cmyk.width(), cmyk.height(), |x, y| {
        let [c, m, ye, k] = cmyk.get_pixel(x, y).0.map(|v| v as f64 / 255.0);
        let channel = |ink: f64| u8::from_f64((1.0 - ink) * (1.0 - k) * 255.0);
        Rgb([channel(c), channel(m), channel(ye)])
    })
}

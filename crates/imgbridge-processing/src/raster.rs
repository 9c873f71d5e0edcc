//! Pixel-level primitives shared by the geometry, colour and compositing stages.

use image::{ColorType, DynamicImage, GrayImage, ImageBuffer, Pixel, Primitive};

/// Sample types the engine works on
pub(crate) trait Sample: Primitive + 'static {
    /// Value of a fully saturated sample
    const MAX: f64;

    fn as_f64(self) -> f64;

    /// Round and clamp into the sample range
    fn from_f64(value: f64) -> Self;
}

impl Sample for u8 {
    const MAX: f64 = 255.0;

    fn as_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value.round().clamp(0.0, 255.0) as u8
    }
}

impl Sample for u16 {
    const MAX: f64 = 65535.0;

    fn as_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value.round().clamp(0.0, 65535.0) as u16
    }
}

impl Sample for f32 {
    const MAX: f64 = 1.0;

    fn as_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

pub(crate) type Buffer<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;

/// Apply a buffer-to-buffer expression to every pixel layout of a `DynamicImage`.
///
/// Evaluates to `Result<DynamicImage>`; layouts the engine does not handle become a
/// transform error attributed to `$stage`.
macro_rules! map_dynamic {
    ($stage:expr, $img:expr, |$buf:ident| $body:expr) => {
        match $img {
            ::image::DynamicImage::ImageLuma8($buf) => Ok(::image::DynamicImage::ImageLuma8($body)),
            ::image::DynamicImage::ImageLumaA8($buf) => Ok(::image::DynamicImage::ImageLumaA8($body)),
            ::image::DynamicImage::ImageRgb8($buf) => Ok(::image::DynamicImage::ImageRgb8($body)),
            ::image::DynamicImage::ImageRgba8($buf) => Ok(::image::DynamicImage::ImageRgba8($body)),
            ::image::DynamicImage::ImageLuma16($buf) => Ok(::image::DynamicImage::ImageLuma16($body)),
            ::image::DynamicImage::ImageLumaA16($buf) => {
                Ok(::image::DynamicImage::ImageLumaA16($body))
            }
            ::image::DynamicImage::ImageRgb16($buf) => Ok(::image::DynamicImage::ImageRgb16($body)),
            ::image::DynamicImage::ImageRgba16($buf) => Ok(::image::DynamicImage::ImageRgba16($body)),
            ::image::DynamicImage::ImageRgb32F($buf) => Ok(::image::DynamicImage::ImageRgb32F($body)),
            ::image::DynamicImage::ImageRgba32F($buf) => {
                Ok(::image::DynamicImage::ImageRgba32F($body))
            }
            other => Err(imgbridge_core::ImageError::transform(
                $stage,
                format!("unsupported pixel layout {:?}", other.color()),
            )),
        }
    };
}
pub(crate) use map_dynamic;

/// Build a pixel from per-channel values already in the sample's native scale.
///
/// Missing trailing values repeat the last one given.
pub(crate) fn pixel_from<P>(values: &[f64]) -> P
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let last = values.last().copied().unwrap_or(0.0);
    let channels: Vec<P::Subpixel> = (0..P::CHANNEL_COUNT as usize)
        .map(|i| P::Subpixel::from_f64(values.get(i).copied().unwrap_or(last)))
        .collect();
    *P::from_slice(&channels)
}

/// Alpha-weighted select: where `mask` is 255 take `then_buf`, where it is 0 keep
/// `else_buf`, and mix proportionally in between.
pub(crate) fn blend_select<P>(mask: &GrayImage, then_buf: &Buffer<P>, else_buf: &Buffer<P>) -> Buffer<P>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let (width, height) = else_buf.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        let base = *else_buf.get_pixel(x, y);
        let weight = mask.get_pixel(x, y)[0];
        match weight {
            0 => base,
            255 => *then_buf.get_pixel(x, y),
            w => {
                let w = w as f64;
                base.map2(then_buf.get_pixel(x, y), |e, t| {
                    P::Subpixel::from_f64((t.as_f64() * w + e.as_f64() * (255.0 - w)) / 255.0)
                })
            }
        }
    })
}

/// Same as [`blend_select`] over two `DynamicImage`s of identical layout
pub(crate) fn select_dynamic(
    stage: &'static str,
    mask: &GrayImage,
    then_img: &DynamicImage,
    else_img: &DynamicImage,
) -> imgbridge_core::Result<DynamicImage> {
    use DynamicImage::*;

    let size = (else_img.width(), else_img.height());
    if (then_img.width(), then_img.height()) == size && mask.dimensions() == size {
        let out = match (then_img, else_img) {
            (ImageLuma8(t), ImageLuma8(e)) => ImageLuma8(blend_select(mask, t, e)),
            (ImageLumaA8(t), ImageLumaA8(e)) => ImageLumaA8(blend_select(mask, t, e)),
            (ImageRgb8(t), ImageRgb8(e)) => ImageRgb8(blend_select(mask, t, e)),
            (ImageRgba8(t), ImageRgba8(e)) => ImageRgba8(blend_select(mask, t, e)),
            (ImageLuma16(t), ImageLuma16(e)) => ImageLuma16(blend_select(mask, t, e)),
            (ImageLumaA16(t), ImageLumaA16(e)) => ImageLumaA16(blend_select(mask, t, e)),
            (ImageRgb16(t), ImageRgb16(e)) => ImageRgb16(blend_select(mask, t, e)),
            (ImageRgba16(t), ImageRgba16(e)) => ImageRgba16(blend_select(mask, t, e)),
            (ImageRgb32F(t), ImageRgb32F(e)) => ImageRgb32F(blend_select(mask, t, e)),
            (ImageRgba32F(t), ImageRgba32F(e)) => ImageRgba32F(blend_select(mask, t, e)),
            (t, e) => {
                return Err(imgbridge_core::ImageError::transform(
                    stage,
                    format!("cannot blend {:?} onto {:?}", t.color(), e.color()),
                ))
            }
        };
        Ok(out)
    } else {
        Err(imgbridge_core::ImageError::transform(
            stage,
            "blend inputs differ in size",
        ))
    }
}

/// Copy `tile` into `canvas` with its top-left corner at (`x`, `y`), clipping at
/// the canvas edges. Both must share one pixel layout.
pub(crate) fn paste_dynamic(
    stage: &'static str,
    canvas: &mut DynamicImage,
    tile: &DynamicImage,
    x: i64,
    y: i64,
) -> imgbridge_core::Result<()> {
    use image::imageops::replace;
    use DynamicImage::*;

    match (canvas, tile) {
        (ImageLuma8(c), ImageLuma8(t)) => replace(c, t, x, y),
        (ImageLumaA8(c), ImageLumaA8(t)) => replace(c, t, x, y),
        (ImageRgb8(c), ImageRgb8(t)) => replace(c, t, x, y),
        (ImageRgba8(c), ImageRgba8(t)) => replace(c, t, x, y),
        (ImageLuma16(c), ImageLuma16(t)) => replace(c, t, x, y),
        (ImageLumaA16(c), ImageLumaA16(t)) => replace(c, t, x, y),
        (ImageRgb16(c), ImageRgb16(t)) => replace(c, t, x, y),
        (ImageRgba16(c), ImageRgba16(t)) => replace(c, t, x, y),
        (ImageRgb32F(c), ImageRgb32F(t)) => replace(c, t, x, y),
        (ImageRgba32F(c), ImageRgba32F(t)) => replace(c, t, x, y),
        (c, t) => {
            return Err(imgbridge_core::ImageError::transform(
                stage,
                format!("cannot paste {:?} onto {:?}", t.color(), c.color()),
            ))
        }
    }
    Ok(())
}

/// Last band rescaled to 0..=255; callers only pass buffers that carry alpha
pub(crate) fn alpha_plane<P>(buf: &Buffer<P>) -> GrayImage
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let last = P::CHANNEL_COUNT as usize - 1;
    ImageBuffer::from_fn(buf.width(), buf.height(), |x, y| {
        let a = buf.get_pixel(x, y).channels()[last].as_f64() / P::Subpixel::MAX;
        image::Luma([u8::from_f64(a * 255.0)])
    })
}

/// Apply `f` to every colour band, leaving a trailing alpha band untouched.
///
/// `f` receives and returns values normalised to 0.0..=1.0.
pub(crate) fn map_colour_bands<P, F>(buf: &Buffer<P>, has_alpha: bool, f: F) -> Buffer<P>
where
    P: Pixel,
    P::Subpixel: Sample,
    F: Fn(f64) -> f64,
{
    let colour_bands = if has_alpha {
        P::CHANNEL_COUNT as usize - 1
    } else {
        P::CHANNEL_COUNT as usize
    };
    let mut out = buf.clone();
    for pixel in out.pixels_mut() {
        for c in pixel.channels_mut().iter_mut().take(colour_bands) {
            let v = c.as_f64() / P::Subpixel::MAX;
            *c = P::Subpixel::from_f64(f(v) * P::Subpixel::MAX);
        }
    }
    out
}

/// Convert to the given layout using the `image` crate's conversions
pub(crate) fn convert_to(image: &DynamicImage, color: ColorType) -> Option<DynamicImage> {
    let converted = match color {
        ColorType::L8 => DynamicImage::ImageLuma8(image.to_luma8()),
        ColorType::La8 => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
        ColorType::Rgb8 => DynamicImage::ImageRgb8(image.to_rgb8()),
        ColorType::Rgba8 => DynamicImage::ImageRgba8(image.to_rgba8()),
        ColorType::L16 => DynamicImage::ImageLuma16(image.to_luma16()),
        ColorType::La16 => DynamicImage::ImageLumaA16(image.to_luma_alpha16()),
        ColorType::Rgb16 => DynamicImage::ImageRgb16(image.to_rgb16()),
        ColorType::Rgba16 => DynamicImage::ImageRgba16(image.to_rgba16()),
        ColorType::Rgb32F => DynamicImage::ImageRgb32F(image.to_rgb32f()),
        ColorType::Rgba32F => DynamicImage::ImageRgba32F(image.to_rgba32f()),
        _ => return None,
    };
    Some(converted)
}

/// Same layout with an opaque alpha band appended
pub(crate) fn with_opaque_alpha(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(_) => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
        DynamicImage::ImageRgb8(_) => DynamicImage::ImageRgba8(image.to_rgba8()),
        DynamicImage::ImageLuma16(_) => DynamicImage::ImageLumaA16(image.to_luma_alpha16()),
        DynamicImage::ImageRgb16(_) => DynamicImage::ImageRgba16(image.to_rgba16()),
        DynamicImage::ImageRgb32F(_) => DynamicImage::ImageRgba32F(image.to_rgba32f()),
        other => other,
    }
}

/// Layout with the trailing alpha band removed
pub(crate) fn without_alpha(color: ColorType) -> ColorType {
    match color {
        ColorType::La8 => ColorType::L8,
        ColorType::Rgba8 => ColorType::Rgb8,
        ColorType::La16 => ColorType::L16,
        ColorType::Rgba16 => ColorType::Rgb16,
        ColorType::Rgba32F => ColorType::Rgb32F,
        other => other,
    }
}

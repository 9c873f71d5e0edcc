//! Decoded image plus the metadata that travels with it through the pipeline.

use std::collections::BTreeMap;
use std::fmt;

use image::{ColorType, DynamicImage, GenericImageView};
use imgbridge_core::{ImageError, Result};
use serde::{Deserialize, Serialize};

use crate::format::FormatId;

/// EXIF key of the orientation tag in the primary image directory
pub const ORIENTATION_TAG: &str = "ifd0-Orientation";

/// Colour interpretation of an image's bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpretation {
    Multiband,
    /// 8-bit greyscale
    #[serde(rename = "b-w")]
    BW,
    Grey16,
    Srgb,
    Rgb,
    Rgb16,
    /// Linear-light RGB stored as floats
    ScRgb,
    Cmyk,
    Lab,
    Xyz,
}

impl Interpretation {
    pub fn name(self) -> &'static str {
        match self {
            Interpretation::Multiband => "multiband",
            Interpretation::BW => "b-w",
            Interpretation::Grey16 => "grey16",
            Interpretation::Srgb => "srgb",
            Interpretation::Rgb => "rgb",
            Interpretation::Rgb16 => "rgb16",
            Interpretation::ScRgb => "scrgb",
            Interpretation::Cmyk => "cmyk",
            Interpretation::Lab => "lab",
            Interpretation::Xyz => "xyz",
        }
    }

    /// True for the two 16-bit integer encodings
    pub fn is_16bit(self) -> bool {
        matches!(self, Interpretation::Rgb16 | Interpretation::Grey16)
    }

    pub fn is_greyscale(self) -> bool {
        matches!(self, Interpretation::BW | Interpretation::Grey16)
    }

    /// Interpretation implied by a decoded pixel layout
    pub fn guess(image: &DynamicImage) -> Self {
        match image.color() {
            ColorType::L8 | ColorType::La8 => Interpretation::BW,
            ColorType::L16 | ColorType::La16 => Interpretation::Grey16,
            ColorType::Rgb8 | ColorType::Rgba8 => Interpretation::Srgb,
            ColorType::Rgb16 | ColorType::Rgba16 => Interpretation::Rgb16,
            ColorType::Rgb32F | ColorType::Rgba32F => Interpretation::ScRgb,
            _ => Interpretation::Multiband,
        }
    }
}

impl fmt::Display for Interpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a `bands`/`interpretation` pair carries an alpha channel.
///
/// Two bands are grey plus alpha only for greyscale images, four bands are colour
/// plus alpha unless they are the four inks of CMYK, and five bands are alpha only
/// for CMYK.
pub fn has_alpha_channel(bands: u8, interpretation: Interpretation) -> bool {
    match bands {
        2 => interpretation.is_greyscale(),
        4 => interpretation != Interpretation::Cmyk,
        5 => interpretation == Interpretation::Cmyk,
        _ => false,
    }
}

/// A decoded raster and its metadata.
///
/// Transforms take a handle by value and return a new one; nothing mutates a
/// handle that another stage still holds.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    image: DynamicImage,
    interpretation: Interpretation,
    icc_profile: Option<Vec<u8>>,
    exif: BTreeMap<String, String>,
    source_format: Option<FormatId>,
}

impl ImageHandle {
    pub fn new(image: DynamicImage) -> Self {
        let interpretation = Interpretation::guess(&image);
        Self {
            image,
            interpretation,
            icc_profile: None,
            exif: BTreeMap::new(),
            source_format: None,
        }
    }

    /// Re-tag the bands with a different interpretation without touching pixels
    pub fn with_interpretation(mut self, interpretation: Interpretation) -> Result<Self> {
        let bands = self.band_count();
        let depth = self.bits_per_sample();
        let compatible = match interpretation {
            Interpretation::BW => matches!(bands, 1 | 2) && depth == 8,
            Interpretation::Grey16 => matches!(bands, 1 | 2) && depth == 16,
            Interpretation::Srgb | Interpretation::Rgb => matches!(bands, 3 | 4) && depth == 8,
            Interpretation::Rgb16 => matches!(bands, 3 | 4) && depth == 16,
            Interpretation::ScRgb => matches!(bands, 3 | 4) && depth == 32,
            Interpretation::Cmyk => bands == 4 && depth == 8,
            Interpretation::Lab | Interpretation::Xyz => matches!(bands, 3 | 4) && depth == 32,
            Interpretation::Multiband => true,
        };
        if !compatible {
            return Err(ImageError::transform(
                "interpretation",
                format!(
                    "{} cannot describe {} band(s) of {}-bit samples",
                    interpretation, bands, depth
                ),
            ));
        }
        self.interpretation = interpretation;
        Ok(self)
    }

    pub fn with_icc_profile(mut self, profile: Option<Vec<u8>>) -> Self {
        self.icc_profile = profile;
        self
    }

    pub fn with_exif(mut self, exif: BTreeMap<String, String>) -> Self {
        self.exif = exif;
        self
    }

    pub fn with_source_format(mut self, format: FormatId) -> Self {
        self.source_format = Some(format);
        self
    }

    /// Replace the raster, keeping metadata.
    ///
    /// The interpretation survives when the pixel layout is unchanged; otherwise it
    /// is derived from the new layout.
    pub fn with_image(self, image: DynamicImage) -> Self {
        let interpretation = if image.color() == self.image.color() {
            self.interpretation
        } else {
            Interpretation::guess(&image)
        };
        Self {
            image,
            interpretation,
            ..self
        }
    }

    pub(crate) fn with_image_as(self, image: DynamicImage, interpretation: Interpretation) -> Self {
        Self {
            image,
            interpretation,
            ..self
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn band_count(&self) -> u8 {
        self.image.color().channel_count()
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.image.color().bits_per_pixel() / self.band_count() as u16
    }

    pub fn interpretation(&self) -> Interpretation {
        self.interpretation
    }

    pub fn has_alpha(&self) -> bool {
        has_alpha_channel(self.band_count(), self.interpretation)
    }

    pub fn icc_profile(&self) -> Option<&[u8]> {
        self.icc_profile.as_deref()
    }

    pub fn exif(&self) -> &BTreeMap<String, String> {
        &self.exif
    }

    pub fn exif_tag(&self, key: &str) -> Option<&str> {
        self.exif.get(key).map(String::as_str)
    }

    /// Remove an EXIF tag, returning the handle
    pub fn without_exif_tag(mut self, key: &str) -> Self {
        self.exif.remove(key);
        self
    }

    /// EXIF orientation code; 0 when the tag is absent or not numeric
    pub fn orientation(&self) -> u8 {
        self.exif_tag(ORIENTATION_TAG)
            .and_then(|v| v.trim().parse::<u8>().ok())
            .unwrap_or(0)
    }

    pub fn source_format(&self) -> Option<FormatId> {
        self.source_format
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayAlphaImage, LumaA, Rgb, RgbImage, Rgba, RgbaImage};
    use rstest::rstest;

    #[rstest]
    #[case(1, Interpretation::BW, false)]
    #[case(2, Interpretation::BW, true)]
    #[case(2, Interpretation::Grey16, true)]
    #[case(2, Interpretation::Srgb, false)]
    #[case(2, Interpretation::Multiband, false)]
    #[case(3, Interpretation::Srgb, false)]
    #[case(4, Interpretation::Srgb, true)]
    #[case(4, Interpretation::Rgb16, true)]
    #[case(4, Interpretation::Cmyk, false)]
    #[case(5, Interpretation::Cmyk, true)]
    #[case(5, Interpretation::Srgb, false)]
    fn test_has_alpha_channel(
        #[case] bands: u8,
        #[case] interpretation: Interpretation,
        #[case] expected: bool,
    ) {
        assert_eq!(has_alpha_channel(bands, interpretation), expected);
    }

    #[test]
    fn test_cmyk_tag_removes_alpha() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0])));
        let handle = ImageHandle::new(rgba);
        assert!(handle.has_alpha());

        let cmyk = handle.with_interpretation(Interpretation::Cmyk).unwrap();
        assert_eq!(cmyk.band_count(), 4);
        assert!(!cmyk.has_alpha());
    }

    #[test]
    fn test_guess_interpretation() {
        let grey = DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(1, 1, LumaA([1, 2])));
        let handle = ImageHandle::new(grey);
        assert_eq!(handle.interpretation(), Interpretation::BW);
        assert!(handle.has_alpha());

        let rgb16 = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([1, 2, 3]))).to_rgb16();
        let handle = ImageHandle::new(DynamicImage::ImageRgb16(rgb16));
        assert_eq!(handle.interpretation(), Interpretation::Rgb16);
        assert_eq!(handle.bits_per_sample(), 16);
        assert!(!handle.has_alpha());
    }

    #[test]
    fn test_incompatible_interpretation_is_rejected() {
        let rgb = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([1, 2, 3])));
        let err = ImageHandle::new(rgb)
            .with_interpretation(Interpretation::Grey16)
            .unwrap_err();
        assert!(matches!(err, ImageError::Transform { .. }));
    }

    #[test]
    fn test_orientation_parsing() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(1, 1));
        let mut exif = BTreeMap::new();
        exif.insert(ORIENTATION_TAG.to_string(), "6".to_string());
        let handle = ImageHandle::new(img.clone()).with_exif(exif);
        assert_eq!(handle.orientation(), 6);

        let mut exif = BTreeMap::new();
        exif.insert(ORIENTATION_TAG.to_string(), "top-left".to_string());
        let handle = ImageHandle::new(img.clone()).with_exif(exif);
        assert_eq!(handle.orientation(), 0);

        assert_eq!(ImageHandle::new(img).orientation(), 0);
    }

    #[test]
    fn test_with_image_keeps_metadata() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let handle = ImageHandle::new(img)
            .with_icc_profile(Some(vec![1, 2, 3]))
            .with_source_format(FormatId::Png);
        let replaced = handle.with_image(DynamicImage::ImageRgb8(RgbImage::new(2, 2)));
        assert_eq!(replaced.dimensions(), (2, 2));
        assert_eq!(replaced.icc_profile(), Some(&[1u8, 2, 3][..]));
        assert_eq!(replaced.source_format(), Some(FormatId::Png));
        assert_eq!(replaced.interpretation(), Interpretation::Srgb);
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::format::FormatId;
use crate::handle::{ImageHandle, Interpretation};

/// Image metadata extracted from a decoded handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: Option<FormatId>,
    pub channels: u8,
    pub has_alpha: bool,
    pub has_profile: bool,
    pub interpretation: Interpretation,
    /// EXIF orientation, 0 when absent
    pub orientation: u8,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exif: BTreeMap<String, String>,
}

impl ImageMetadata {
    pub fn from_handle(handle: &ImageHandle) -> Self {
        Self {
            width: handle.width(),
            height: handle.height(),
            format: handle.source_format(),
            channels: handle.band_count(),
            has_alpha: handle.has_alpha(),
            has_profile: handle.icc_profile().is_some(),
            interpretation: handle.interpretation(),
            orientation: handle.orientation(),
            exif: handle.exif().clone(),
        }
    }
}

/// Pixel dimensions only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// 256-bin sample counts, one row per band including alpha
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHistogram {
    pub interpretation: Interpretation,
    pub bands: Vec<Vec<u32>>,
}

impl ImageHistogram {
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Number of pixels counted, taken from the first band
    pub fn total(&self) -> u64 {
        self.bands
            .first()
            .map(|bins| bins.iter().map(|&c| c as u64).sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbaImage};

    #[test]
    fn test_metadata_from_handle() {
        let mut exif = BTreeMap::new();
        exif.insert("ifd0-Orientation".to_string(), "6".to_string());
        let handle = ImageHandle::new(DynamicImage::ImageRgba8(RgbaImage::new(40, 30)))
            .with_exif(exif)
            .with_icc_profile(Some(vec![1, 2, 3]))
            .with_source_format(FormatId::Png);

        let metadata = ImageMetadata::from_handle(&handle);
        assert_eq!((metadata.width, metadata.height), (40, 30));
        assert_eq!(metadata.format, Some(FormatId::Png));
        assert_eq!(metadata.channels, 4);
        assert!(metadata.has_alpha);
        assert!(metadata.has_profile);
        assert_eq!(metadata.interpretation, Interpretation::Srgb);
        assert_eq!(metadata.orientation, 6);
    }

    #[test]
    fn test_metadata_serialization() {
        let metadata = ImageMetadata {
            width: 1920,
            height: 1080,
            format: Some(FormatId::Jpeg),
            channels: 3,
            has_alpha: false,
            has_profile: false,
            interpretation: Interpretation::Srgb,
            orientation: 1,
            exif: BTreeMap::new(),
        };

        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("\"format\":\"jpeg\""));
        assert!(!json.contains("exif"));
        let deserialized: ImageMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, metadata);
    }
}

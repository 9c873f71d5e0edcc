use std::collections::BTreeMap;
use std::io::Cursor;

use image::{DynamicImage, ImageDecoder, ImageReader};
use imgbridge_core::{ImageError, Result};

use crate::format::{FormatId, FormatRegistry};
use crate::handle::ImageHandle;
use crate::image::resize::ImageResize;

/// Expected pixel access pattern of the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessHint {
    #[default]
    Random,
    /// Top-to-bottom single pass
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadParams {
    pub access: AccessHint,
    /// Integer downscale requested at decode time
    pub shrink: Option<u32>,
}

/// Decodes encoded buffers into [`ImageHandle`]s through the format registry
pub struct Loader;

impl Loader {
    /// Decode `bytes` as `format`
    pub fn load(bytes: &[u8], format: FormatId, params: &LoadParams) -> Result<ImageHandle> {
        if bytes.is_empty() {
            return Err(ImageError::decode("load", "image buffer is empty"));
        }

        let (descriptor, decode) = FormatRegistry::global().loader_for(format)?;
        let handle = decode(bytes, params)?;

        match params.shrink {
            Some(requested) => match descriptor.shrink_on_load.effective(requested) {
                Some(factor) => {
                    tracing::debug!(
                        format = %format,
                        requested = requested,
                        factor = factor,
                        "Applying shrink-on-load"
                    );
                    ImageResize::shrink(handle, factor, factor)
                }
                None => {
                    tracing::debug!(
                        format = %format,
                        requested = requested,
                        "Shrink-on-load not available, hint ignored"
                    );
                    Ok(handle)
                }
            },
            None => Ok(handle),
        }
    }

    /// Sniff the format from magic bytes, then decode
    pub fn load_detected(bytes: &[u8], params: &LoadParams) -> Result<ImageHandle> {
        let format = FormatRegistry::detect(bytes)
            .ok_or_else(|| ImageError::unsupported("detect", "unknown"))?;
        Self::load(bytes, format, params)
    }
}

fn decode_raster(bytes: &[u8], format: FormatId, params: &LoadParams) -> Result<ImageHandle> {
    let image_format = format
        .to_image_format()
        .ok_or_else(|| ImageError::unsupported("load", format.name()))?;

    let mut decoder = ImageReader::with_format(Cursor::new(bytes), image_format)
        .into_decoder()
        .map_err(|e| ImageError::decode("load", e))?;
    let icc_profile = decoder
        .icc_profile()
        .map_err(|e| ImageError::decode("load", e))?;
    let image = DynamicImage::from_decoder(decoder).map_err(|e| ImageError::decode("load", e))?;
    let exif = read_exif(bytes);

    tracing::debug!(
        format = %format,
        width = image.width(),
        height = image.height(),
        color = ?image.color(),
        access = ?params.access,
        has_profile = icc_profile.is_some(),
        exif_tags = exif.len(),
        "Decoded image"
    );

    Ok(ImageHandle::new(image)
        .with_icc_profile(icc_profile)
        .with_exif(exif)
        .with_source_format(format))
}

/// EXIF fields keyed `<ifd>-<TagName>`; integer values are kept as decimal strings
pub(crate) fn read_exif(bytes: &[u8]) -> BTreeMap<String, String> {
    let mut cursor = Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif,
        Err(e) => {
            tracing::trace!(error = %e, "No readable EXIF block");
            return BTreeMap::new();
        }
    };

    exif.fields()
        .map(|field| {
            let ifd = match field.ifd_num {
                exif::In::PRIMARY => "ifd0".to_string(),
                exif::In::THUMBNAIL => "ifd1".to_string(),
                other => format!("ifd{}", other.index()),
            };
            let numeric = match field.value {
                exif::Value::Byte(_) | exif::Value::Short(_) | exif::Value::Long(_) => {
                    field.value.get_uint(0).map(|v| v.to_string())
                }
                _ => None,
            };
            let value = numeric.unwrap_or_else(|| field.display_value().to_string());
            (format!("{}-{}", ifd, field.tag), value)
        })
        .collect()
}

pub(crate) fn decode_jpeg(bytes: &[u8], params: &LoadParams) -> Result<ImageHandle> {
    decode_raster(bytes, FormatId::Jpeg, params)
}

pub(crate) fn decode_png(bytes: &[u8], params: &LoadParams) -> Result<ImageHandle> {
    decode_raster(bytes, FormatId::Png, params)
}

pub(crate) fn decode_webp(bytes: &[u8], params: &LoadParams) -> Result<ImageHandle> {
    decode_raster(bytes, FormatId::Webp, params)
}

pub(crate) fn decode_tiff(bytes: &[u8], params: &LoadParams) -> Result<ImageHandle> {
    decode_raster(bytes, FormatId::Tiff, params)
}

pub(crate) fn decode_gif(bytes: &[u8], params: &LoadParams) -> Result<ImageHandle> {
    decode_raster(bytes, FormatId::Gif, params)
}

pub(crate) fn decode_magick(bytes: &[u8], params: &LoadParams) -> Result<ImageHandle> {
    decode_raster(bytes, FormatId::Magick, params)
}

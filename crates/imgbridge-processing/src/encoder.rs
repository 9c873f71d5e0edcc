use image::ImageFormat;
use img_parts::{jpeg::Jpeg, png::Png, webp::WebP, Bytes, ImageICC};
use imgbridge_core::{EngineCapabilities, ImageError, Result};
use serde::{Deserialize, Serialize};

use crate::compression::ImageCompressor;
use crate::format::{FormatId, FormatRegistry};
use crate::handle::ImageHandle;

pub const DEFAULT_QUALITY: u8 = 75;
pub const DEFAULT_COMPRESSION: u8 = 6;

/// Fully resolved save parameters handed to a format's encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveParams {
    pub strip_metadata: bool,
    /// 1-100
    pub quality: u8,
    /// 0-9
    pub compression: u8,
    pub interlace: bool,
    pub lossless: bool,
    pub palette: bool,
    /// 0-10; some encoders invert it into an effort scale
    pub speed: u8,
}

impl Default for SaveParams {
    fn default() -> Self {
        Self {
            strip_metadata: false,
            quality: DEFAULT_QUALITY,
            compression: DEFAULT_COMPRESSION,
            interlace: false,
            lossless: false,
            palette: false,
            speed: 0,
        }
    }
}

/// Caller overrides; unset fields fall back to the format defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOptions {
    pub strip_metadata: Option<bool>,
    pub quality: Option<u8>,
    pub compression: Option<u8>,
    pub interlace: Option<bool>,
    pub lossless: Option<bool>,
    pub palette: Option<bool>,
    pub speed: Option<u8>,
}

impl SaveParams {
    /// Apply overrides. A quality or compression of 0 counts as unset.
    pub fn merged(self, overrides: &SaveOptions) -> Self {
        Self {
            strip_metadata: overrides.strip_metadata.unwrap_or(self.strip_metadata),
            quality: overrides
                .quality
                .filter(|q| *q > 0)
                .map(|q| q.min(100))
                .unwrap_or(self.quality),
            compression: overrides
                .compression
                .filter(|c| *c > 0)
                .map(|c| c.min(9))
                .unwrap_or(self.compression),
            interlace: overrides.interlace.unwrap_or(self.interlace),
            lossless: overrides.lossless.unwrap_or(self.lossless),
            palette: overrides.palette.unwrap_or(self.palette),
            speed: overrides.speed.map(|s| s.min(10)).unwrap_or(self.speed),
        }
    }
}

/// Encodes handles through the format registry
pub struct Encoder;

impl Encoder {
    pub fn encode(
        handle: &ImageHandle,
        format: FormatId,
        params: &SaveParams,
        caps: &EngineCapabilities,
    ) -> Result<Vec<u8>> {
        let (descriptor, encode) = FormatRegistry::global().saver_for(format)?;

        if !descriptor.can_represent(handle) {
            return Err(ImageError::encode(
                "encode",
                format.name(),
                format!(
                    "cannot represent {} band(s) of {} (alpha: {})",
                    handle.band_count(),
                    handle.interpretation(),
                    handle.has_alpha()
                ),
            ));
        }

        let bytes = encode(handle, params, caps)?;

        let bytes = match handle.icc_profile() {
            Some(profile) if !params.strip_metadata => embed_icc_profile(format, bytes, profile)?,
            _ => bytes,
        };

        tracing::debug!(
            format = %format,
            width = handle.width(),
            height = handle.height(),
            quality = params.quality,
            size_bytes = bytes.len(),
            "Encoded image"
        );

        Ok(bytes)
    }
}

/// Write the ICC profile into containers that carry one
fn embed_icc_profile(format: FormatId, bytes: Vec<u8>, profile: &[u8]) -> Result<Vec<u8>> {
    let profile = Some(Bytes::copy_from_slice(profile));
    let container_err = |e: img_parts::Error| ImageError::encode("embed_icc", format.name(), e);

    match format {
        FormatId::Jpeg => {
            let mut jpeg = Jpeg::from_bytes(bytes.into()).map_err(container_err)?;
            jpeg.set_icc_profile(profile);
            Ok(jpeg.encoder().bytes().to_vec())
        }
        FormatId::Png => {
            let mut png = Png::from_bytes(bytes.into()).map_err(container_err)?;
            png.set_icc_profile(profile);
            Ok(png.encoder().bytes().to_vec())
        }
        FormatId::Webp => {
            let mut webp = WebP::from_bytes(bytes.into()).map_err(container_err)?;
            webp.set_icc_profile(profile);
            Ok(webp.encoder().bytes().to_vec())
        }
        _ => {
            tracing::debug!(format = %format, "Container does not carry ICC profiles, dropped");
            Ok(bytes)
        }
    }
}

#[cfg(feature = "jpeg")]
pub(crate) fn encode_jpeg(
    handle: &ImageHandle,
    params: &SaveParams,
    _caps: &EngineCapabilities,
) -> Result<Vec<u8>> {
    ImageCompressor::compress_jpeg(handle, params)
}

pub(crate) fn encode_png(
    handle: &ImageHandle,
    params: &SaveParams,
    caps: &EngineCapabilities,
) -> Result<Vec<u8>> {
    ImageCompressor::compress_png(handle, params, caps)
}

#[cfg(feature = "webp")]
pub(crate) fn encode_webp(
    handle: &ImageHandle,
    params: &SaveParams,
    _caps: &EngineCapabilities,
) -> Result<Vec<u8>> {
    ImageCompressor::compress_webp(handle, params)
}

#[cfg(feature = "avif")]
pub(crate) fn encode_avif(
    handle: &ImageHandle,
    params: &SaveParams,
    _caps: &EngineCapabilities,
) -> Result<Vec<u8>> {
    ImageCompressor::compress_avif(handle, params)
}

pub(crate) fn encode_tiff(
    handle: &ImageHandle,
    _params: &SaveParams,
    _caps: &EngineCapabilities,
) -> Result<Vec<u8>> {
    ImageCompressor::compress_generic(handle, ImageFormat::Tiff)
}

pub(crate) fn encode_gif(
    handle: &ImageHandle,
    _params: &SaveParams,
    _caps: &EngineCapabilities,
) -> Result<Vec<u8>> {
    ImageCompressor::compress_generic(handle, ImageFormat::Gif)
}

pub(crate) fn encode_magick(
    handle: &ImageHandle,
    _params: &SaveParams,
    _caps: &EngineCapabilities,
) -> Result<Vec<u8>> {
    ImageCompressor::compress_generic(handle, ImageFormat::Bmp)
}

//! Format registry
//!
//! Every format the bridge knows about has one [`FormatDescriptor`] in a table built
//! on first use. Load and save dispatch is a lookup in that table. Adding a format
//! means adding a row, not another branch.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use image::ImageFormat;
use imgbridge_core::{EngineCapabilities, ImageError, Result};
use serde::{Deserialize, Serialize};

use crate::encoder::{self, SaveParams};
use crate::handle::{ImageHandle, Interpretation};
use crate::loader::{self, LoadParams};

/// Closed set of formats recognised by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatId {
    Jpeg,
    Png,
    Webp,
    Tiff,
    Gif,
    Pdf,
    Svg,
    Heif,
    Avif,
    Jp2k,
    /// Generic delegate for formats outside the core set (BMP)
    Magick,
}

impl FormatId {
    pub const ALL: [FormatId; 11] = [
        FormatId::Jpeg,
        FormatId::Png,
        FormatId::Webp,
        FormatId::Tiff,
        FormatId::Gif,
        FormatId::Pdf,
        FormatId::Svg,
        FormatId::Heif,
        FormatId::Avif,
        FormatId::Jp2k,
        FormatId::Magick,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FormatId::Jpeg => "jpeg",
            FormatId::Png => "png",
            FormatId::Webp => "webp",
            FormatId::Tiff => "tiff",
            FormatId::Gif => "gif",
            FormatId::Pdf => "pdf",
            FormatId::Svg => "svg",
            FormatId::Heif => "heif",
            FormatId::Avif => "avif",
            FormatId::Jp2k => "jp2k",
            FormatId::Magick => "magick",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            FormatId::Jpeg => "image/jpeg",
            FormatId::Png => "image/png",
            FormatId::Webp => "image/webp",
            FormatId::Tiff => "image/tiff",
            FormatId::Gif => "image/gif",
            FormatId::Pdf => "application/pdf",
            FormatId::Svg => "image/svg+xml",
            FormatId::Heif => "image/heif",
            FormatId::Avif => "image/avif",
            FormatId::Jp2k => "image/jp2",
            FormatId::Magick => "image/bmp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FormatId::Jpeg => "jpg",
            FormatId::Jp2k => "jp2",
            FormatId::Magick => "bmp",
            other => other.name(),
        }
    }

    /// The `image` crate format backing this identifier, if any
    pub(crate) fn to_image_format(self) -> Option<ImageFormat> {
        match self {
            FormatId::Jpeg => Some(ImageFormat::Jpeg),
            FormatId::Png => Some(ImageFormat::Png),
            FormatId::Webp => Some(ImageFormat::WebP),
            FormatId::Tiff => Some(ImageFormat::Tiff),
            FormatId::Gif => Some(ImageFormat::Gif),
            FormatId::Avif => Some(ImageFormat::Avif),
            FormatId::Magick => Some(ImageFormat::Bmp),
            FormatId::Pdf | FormatId::Svg | FormatId::Heif | FormatId::Jp2k => None,
        }
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FormatId {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(FormatId::Jpeg),
            "png" => Ok(FormatId::Png),
            "webp" => Ok(FormatId::Webp),
            "tiff" | "tif" => Ok(FormatId::Tiff),
            "gif" => Ok(FormatId::Gif),
            "pdf" => Ok(FormatId::Pdf),
            "svg" => Ok(FormatId::Svg),
            "heif" | "heic" => Ok(FormatId::Heif),
            "avif" => Ok(FormatId::Avif),
            "jp2k" | "jp2" | "j2k" | "jpeg2000" => Ok(FormatId::Jp2k),
            "magick" | "bmp" => Ok(FormatId::Magick),
            other => Err(ImageError::unsupported("parse_format", other)),
        }
    }
}

/// How a format can reduce resolution while decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShrinkSupport {
    None,
    /// DCT scaling: factors snap down to 8, 4 or 2
    Jpeg,
    /// Any integer factor
    Any,
}

impl ShrinkSupport {
    /// Effective shrink factor for a requested hint, `None` when nothing should happen
    pub fn effective(self, requested: u32) -> Option<u32> {
        match self {
            ShrinkSupport::None => None,
            ShrinkSupport::Jpeg => match requested {
                r if r >= 8 => Some(8),
                4..=7 => Some(4),
                2..=3 => Some(2),
                _ => None,
            },
            ShrinkSupport::Any => (requested >= 2).then_some(requested),
        }
    }
}

pub type DecodeFn = fn(&[u8], &LoadParams) -> Result<ImageHandle>;
pub type EncodeFn = fn(&ImageHandle, &SaveParams, &EngineCapabilities) -> Result<Vec<u8>>;

/// One row of the registry
#[derive(Debug, Clone, Copy)]
pub struct FormatDescriptor {
    pub id: FormatId,
    pub decoder: Option<DecodeFn>,
    pub encoder: Option<EncodeFn>,
    pub default_load: LoadParams,
    pub default_save: SaveParams,
    pub shrink_on_load: ShrinkSupport,
    /// Highest sample depth the encoder writes without truncation
    pub max_bit_depth: u8,
    pub supports_alpha: bool,
    pub supports_cmyk: bool,
}

impl FormatDescriptor {
    fn new(id: FormatId) -> Self {
        Self {
            id,
            decoder: None,
            encoder: None,
            default_load: LoadParams::default(),
            default_save: SaveParams::default(),
            shrink_on_load: ShrinkSupport::None,
            max_bit_depth: 8,
            supports_alpha: true,
            supports_cmyk: false,
        }
    }

    pub fn can_load(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn can_save(&self) -> bool {
        self.encoder.is_some()
    }

    /// Whether the encoder writes `interpretation` without a colourspace change
    pub fn supports_interpretation(&self, interpretation: Interpretation) -> bool {
        match interpretation {
            Interpretation::Cmyk => self.supports_cmyk,
            Interpretation::Lab
            | Interpretation::Xyz
            | Interpretation::Multiband
            | Interpretation::ScRgb => false,
            interp => !interp.is_16bit() || self.max_bit_depth >= 16,
        }
    }

    /// Whether the encoder can write the handle's band layout as-is
    pub fn can_represent(&self, handle: &ImageHandle) -> bool {
        let interpretation = handle.interpretation();
        self.supports_interpretation(interpretation)
            && (!handle.has_alpha()
                || (self.supports_alpha && interpretation != Interpretation::Cmyk))
    }
}

/// Read-only table of format descriptors keyed by [`FormatId`]
#[derive(Debug)]
pub struct FormatRegistry {
    descriptors: Vec<FormatDescriptor>,
}

static REGISTRY: OnceLock<FormatRegistry> = OnceLock::new();

impl FormatRegistry {
    /// The process-wide registry, built on first use
    pub fn global() -> &'static FormatRegistry {
        REGISTRY.get_or_init(FormatRegistry::build)
    }

    fn build() -> Self {
        let descriptors = FormatId::ALL
            .iter()
            .map(|&id| {
                let mut d = FormatDescriptor::new(id);
                match id {
                    FormatId::Jpeg => {
                        d.decoder = cfg!(feature = "jpeg").then_some(loader::decode_jpeg as DecodeFn);
                        #[cfg(feature = "jpeg")]
                        {
                            d.encoder = Some(encoder::encode_jpeg as EncodeFn);
                        }
                        d.shrink_on_load = ShrinkSupport::Jpeg;
                        d.supports_alpha = false;
                        d.supports_cmyk = true;
                    }
                    FormatId::Png => {
                        d.decoder = cfg!(feature = "png").then_some(loader::decode_png as DecodeFn);
                        d.encoder = cfg!(feature = "png").then_some(encoder::encode_png as EncodeFn);
                        d.default_save.speed = 3;
                        d.max_bit_depth = 16;
                    }
                    FormatId::Webp => {
                        d.decoder = cfg!(feature = "webp").then_some(loader::decode_webp as DecodeFn);
                        #[cfg(feature = "webp")]
                        {
                            d.encoder = Some(encoder::encode_webp as EncodeFn);
                        }
                        d.shrink_on_load = ShrinkSupport::Any;
                    }
                    FormatId::Tiff => {
                        d.decoder = cfg!(feature = "tiff").then_some(loader::decode_tiff as DecodeFn);
                        d.encoder = cfg!(feature = "tiff").then_some(encoder::encode_tiff as EncodeFn);
                        d.max_bit_depth = 16;
                    }
                    FormatId::Gif => {
                        d.decoder = cfg!(feature = "gif").then_some(loader::decode_gif as DecodeFn);
                        d.encoder = cfg!(feature = "gif").then_some(encoder::encode_gif as EncodeFn);
                    }
                    FormatId::Avif => {
                        // Save-only: no AV1 decoder is linked.
                        #[cfg(feature = "avif")]
                        {
                            d.encoder = Some(encoder::encode_avif as EncodeFn);
                        }
                        d.default_save.speed = 6;
                    }
                    FormatId::Magick => {
                        d.decoder =
                            cfg!(feature = "magick").then_some(loader::decode_magick as DecodeFn);
                        d.encoder =
                            cfg!(feature = "magick").then_some(encoder::encode_magick as EncodeFn);
                    }
                    // Descriptors exist so lookups name the format, but no codec is compiled in.
                    FormatId::Pdf | FormatId::Svg | FormatId::Heif | FormatId::Jp2k => {}
                }
                d
            })
            .collect();

        Self { descriptors }
    }

    fn lookup(&self, id: FormatId) -> Option<&FormatDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    /// Descriptor for a format that has at least one codec in this build
    pub fn resolve(&self, id: FormatId) -> Result<&FormatDescriptor> {
        match self.lookup(id) {
            Some(d) if d.can_load() || d.can_save() => Ok(d),
            _ => Err(ImageError::unsupported("resolve", id.name())),
        }
    }

    pub fn can_load(&self, id: FormatId) -> bool {
        self.lookup(id).is_some_and(FormatDescriptor::can_load)
    }

    pub fn can_save(&self, id: FormatId) -> bool {
        self.lookup(id).is_some_and(FormatDescriptor::can_save)
    }

    /// Descriptor with a decoder, or `UnsupportedFormat`
    pub fn loader_for(&self, id: FormatId) -> Result<(&FormatDescriptor, DecodeFn)> {
        let d = self.resolve(id)?;
        d.decoder
            .map(|f| (d, f))
            .ok_or_else(|| ImageError::unsupported("load", id.name()))
    }

    /// Descriptor with an encoder, or `UnsupportedFormat`
    pub fn saver_for(&self, id: FormatId) -> Result<(&FormatDescriptor, EncodeFn)> {
        let d = self.resolve(id)?;
        d.encoder
            .map(|f| (d, f))
            .ok_or_else(|| ImageError::unsupported("save", id.name()))
    }

    /// Identify a buffer by its leading magic bytes
    pub fn detect(buf: &[u8]) -> Option<FormatId> {
        if buf.len() < 4 {
            return None;
        }

        if buf.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(FormatId::Jpeg);
        }
        if buf.starts_with(b"GIF") {
            return Some(FormatId::Gif);
        }
        if buf.starts_with(&[0x89, b'P', b'N', b'G']) {
            return Some(FormatId::Png);
        }
        if buf.starts_with(b"II*\0") || buf.starts_with(b"MM\0*") {
            return Some(FormatId::Tiff);
        }
        if buf.starts_with(b"%PDF") {
            return Some(FormatId::Pdf);
        }
        if buf.len() >= 12 && &buf[0..4] == b"RIFF" && &buf[8..12] == b"WEBP" {
            return Some(FormatId::Webp);
        }
        if buf.len() >= 12 && &buf[4..8] == b"ftyp" {
            let brand = &buf[8..12];
            if brand == b"avif" {
                return Some(FormatId::Avif);
            }
            if [b"heic", b"mif1", b"msf1", b"heis", b"hevc"]
                .iter()
                .any(|b| brand == *b)
            {
                return Some(FormatId::Heif);
            }
        }
        if buf.len() >= 12 && buf[..12] == [0, 0, 0, 0x0C, b'j', b'P', b' ', b' ', 0x0D, 0x0A, 0x87, 0x0A]
        {
            return Some(FormatId::Jp2k);
        }
        if buf.starts_with(&[0xFF, 0x4F, 0xFF, 0x51]) {
            return Some(FormatId::Jp2k);
        }
        if buf.starts_with(b"BM") {
            return Some(FormatId::Magick);
        }

        let head = &buf[..buf.len().min(1024)];
        let text = String::from_utf8_lossy(head);
        let trimmed = text.trim_start();
        if (trimmed.starts_with("<?xml") || trimmed.starts_with("<svg")) && text.contains("<svg") {
            return Some(FormatId::Svg);
        }

        None
    }
}

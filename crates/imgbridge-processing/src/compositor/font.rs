//! Font lookup and glyph rasterization for text watermarks.

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_text_mut, text_size};
use imgbridge_core::{ImageError, Result};

use super::text::TextRasterizer;

const STAGE: &str = "render_text";
const DEFAULT_POINT_SIZE: f32 = 10.0;
const FONT_EXTENSIONS: [&str; 3] = ["ttf", "otf", "ttc"];

/// A `"<family> <size>"` font description
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    pub family: String,
    pub points: f32,
}

impl FontSpec {
    /// Parse `"sans 10"` or `"DejaVu Sans Bold 12"`; the size defaults to 10pt
    pub fn parse(description: &str) -> Result<Self> {
        let description = description.trim();
        let (family, points) = match description.rsplit_once(char::is_whitespace) {
            Some((family, size)) => match size.parse::<f32>() {
                Ok(points) => (family.trim(), points),
                Err(_) => (description, DEFAULT_POINT_SIZE),
            },
            None => (description, DEFAULT_POINT_SIZE),
        };

        if family.is_empty() {
            return Err(ImageError::render(STAGE, "font family is empty"));
        }
        if !points.is_finite() || points <= 0.0 {
            return Err(ImageError::render(
                STAGE,
                format!("invalid font size in {:?}", description),
            ));
        }

        Ok(Self {
            family: family.to_string(),
            points,
        })
    }

    /// Pixel height at `dpi`
    pub fn pixel_size(&self, dpi: u32) -> f32 {
        self.points * dpi as f32 / 72.0
    }
}

/// Font files under one directory, matched by normalised file stem
#[derive(Debug, Clone, Default)]
pub struct FontCatalog {
    dir: Option<PathBuf>,
}

impl FontCatalog {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Exact stem match first, then the first stem containing the family
    pub fn resolve(&self, family: &str) -> Result<PathBuf> {
        let dir = self.dir.as_deref().ok_or_else(|| {
            ImageError::render(STAGE, format!("no font directory configured for {:?}", family))
        })?;

        let wanted = normalise(family);
        let mut candidates = font_files(dir)?;
        candidates.sort();

        let stem_of = |path: &Path| {
            path.file_stem()
                .map(|s| normalise(&s.to_string_lossy()))
                .unwrap_or_default()
        };

        candidates
            .iter()
            .find(|path| stem_of(path) == wanted)
            .or_else(|| candidates.iter().find(|path| stem_of(path).contains(&wanted)))
            .cloned()
            .ok_or_else(|| {
                ImageError::render(
                    STAGE,
                    format!("font {:?} not found in {}", family, dir.display()),
                )
            })
    }
}

fn normalise(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn font_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        ImageError::render(STAGE, format!("cannot read font directory {}: {}", dir.display(), e))
    })?;

    Ok(entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FONT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect())
}

/// Renders text with `ab_glyph` outlines through `imageproc`
#[derive(Debug, Clone, Default)]
pub struct GlyphRasterizer {
    catalog: FontCatalog,
}

impl GlyphRasterizer {
    pub fn new(catalog: FontCatalog) -> Self {
        Self { catalog }
    }

    fn load_font(&self, family: &str) -> Result<FontArc> {
        let path = self.catalog.resolve(family)?;
        let bytes = fs::read(&path).map_err(|e| {
            ImageError::render(STAGE, format!("cannot read font {}: {}", path.display(), e))
        })?;
        FontArc::try_from_vec(bytes).map_err(|e| {
            ImageError::render(STAGE, format!("invalid font {}: {}", path.display(), e))
        })
    }
}

impl TextRasterizer for GlyphRasterizer {
    fn rasterize(&self, text: &str, font: &str, width: u32, dpi: u32) -> Result<GrayImage> {
        if text.trim().is_empty() {
            return Err(ImageError::render(STAGE, "text is empty"));
        }

        let spec = FontSpec::parse(font)?;
        let font = self.load_font(&spec.family)?;
        let scale = PxScale::from(spec.pixel_size(dpi));
        let scaled = font.as_scaled(scale);
        let line_height = (scaled.height() + scaled.line_gap()).ceil().max(1.0) as u32;

        let lines = wrap_lines(text, width, |line| text_size(scale, &font, line).0);
        let mask_width = lines
            .iter()
            .map(|line| text_size(scale, &font, line).0)
            .max()
            .unwrap_or(0)
            .max(1);
        let mask_height = line_height * lines.len().max(1) as u32;

        tracing::debug!(
            family = %spec.family,
            points = spec.points,
            dpi = dpi,
            lines = lines.len(),
            width = mask_width,
            height = mask_height,
            "Rasterizing text"
        );

        let mut mask = GrayImage::new(mask_width, mask_height);
        for (i, line) in lines.iter().enumerate() {
            let y = (i as u32 * line_height) as i32;
            draw_text_mut(&mut mask, Luma([255u8]), 0, y, scale, &font, line);
        }
        Ok(mask)
    }
}

/// Greedy word wrap so each line measures at most `width`.
///
/// A single word wider than `width` gets a line of its own. Explicit newlines
/// always break.
pub fn wrap_lines<F>(text: &str, width: u32, measure: F) -> Vec<String>
where
    F: Fn(&str) -> u32,
{
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current.push_str(word);
                continue;
            }
            let candidate = format!("{} {}", current, word);
            if measure(&candidate) <= width {
                current = candidate;
            } else {
                lines.push(std::mem::take(&mut current));
                current.push_str(word);
            }
        }
        lines.push(current);
    }
    lines
}

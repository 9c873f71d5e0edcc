//! Request orchestration
//!
//! One [`TransformRequest`] is decoded, optionally auto-rotated, run through its
//! operations in the order given, prepared for the target format and encoded.
//! Each step consumes the handle produced by the previous one, so the request
//! owns exactly one live image at a time.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use image::ImageReader;
use imgbridge_core::{
    EngineCapabilities, EngineConfig, ErrorMetadata, ImageError, LogLevel, Result,
};
use uuid::Uuid;

use crate::colour::ColourOps;
use crate::compositor::text::STENCIL_INSET;
use crate::compositor::{
    ArrayJoinSpec, BlendMode, Compositor, FontCatalog, GlyphRasterizer, ImageWatermark,
    TextRasterizer, TextWatermark, TrimDetector, WatermarkImageSpec, WatermarkTextSpec,
};
use crate::encoder::{Encoder, SaveOptions, SaveParams};
use crate::format::{FormatId, FormatRegistry};
use crate::handle::{ImageHandle, Interpretation};
use crate::image::{
    ExtendMode, FlipAxis, Gravity, ImageFilters, ImageGeometry, ImageOrientation, ImageResize,
    ResizeDimensions, ResizeMode,
};
use crate::loader::{LoadParams, Loader};
use crate::metadata::{ImageHistogram, ImageMetadata, ImageSize};

/// One step of a transform, applied in request order
#[derive(Debug, Clone)]
pub enum Operation {
    Flip(FlipAxis),
    /// Clockwise; multiples of 90 are lossless
    Rotate {
        degrees: i32,
        background: Option<[f64; 3]>,
    },
    AutoRotate,
    Resize {
        xscale: f64,
        yscale: f64,
    },
    ResizeTo {
        dimensions: ResizeDimensions,
        mode: ResizeMode,
    },
    Shrink {
        xfactor: u32,
        yfactor: u32,
    },
    Zoom {
        xfactor: u32,
        yfactor: u32,
    },
    ExtractArea {
        left: u32,
        top: u32,
        width: u32,
        height: u32,
    },
    Embed {
        left: i32,
        top: i32,
        width: u32,
        height: u32,
        extend: ExtendMode,
        background: Option<[f64; 3]>,
    },
    EmbedCentred {
        width: u32,
        height: u32,
        extend: ExtendMode,
        background: Option<[f64; 3]>,
    },
    Crop {
        width: u32,
        height: u32,
        gravity: Gravity,
    },
    Colourspace(Interpretation),
    IccTransform {
        output_profile: PathBuf,
        input_profile: Option<PathBuf>,
    },
    Flatten {
        background: [f64; 3],
    },
    Gamma {
        exponent: f64,
    },
    StripProfile,
    /// Per-band histogram equalisation
    HistogramNormalise,
    Blur {
        sigma: f32,
    },
    Sharpen {
        sigma: f32,
        threshold: i32,
    },
    WatermarkText(WatermarkTextSpec),
    WatermarkImage(WatermarkImageSpec),
    /// Crop to the content box; a uniform image is left as is
    Trim {
        background: [f64; 3],
        threshold: f64,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Flip(_) => "flip",
            Operation::Rotate { .. } => "rotate",
            Operation::AutoRotate => "auto_rotate",
            Operation::Resize { .. } => "resize",
            Operation::ResizeTo { .. } => "resize_to",
            Operation::Shrink { .. } => "shrink",
            Operation::Zoom { .. } => "zoom",
            Operation::ExtractArea { .. } => "extract_area",
            Operation::Embed { .. } => "embed",
            Operation::EmbedCentred { .. } => "embed_centred",
            Operation::Crop { .. } => "crop",
            Operation::Colourspace(_) => "colourspace",
            Operation::IccTransform { .. } => "icc_transform",
            Operation::Flatten { .. } => "flatten",
            Operation::Gamma { .. } => "gamma",
            Operation::StripProfile => "strip_profile",
            Operation::HistogramNormalise => "histogram_normalise",
            Operation::Blur { .. } => "blur",
            Operation::Sharpen { .. } => "sharpen",
            Operation::WatermarkText(_) => "watermark_text",
            Operation::WatermarkImage(_) => "watermark_image",
            Operation::Trim { .. } => "trim",
        }
    }

    /// Sides of the largest raster the operation allocates for a `width` x
    /// `height` input, each paired with the parameter that drives it
    fn planned_extent(&self, width: u32, height: u32) -> Vec<(&'static str, u64)> {
        let (w, h) = (width as f64, height as f64);
        let scaled = |side: f64, scale: f64| (side * scale).round().max(1.0) as u64;

        match self {
            Operation::Resize { xscale, yscale } => {
                vec![("xscale", scaled(w, *xscale)), ("yscale", scaled(h, *yscale))]
            }
            Operation::ResizeTo { dimensions, mode } => {
                let (tw, th) = ImageResize::calculate_dimensions(width, height, *dimensions, *mode);
                vec![("width", tw as u64), ("height", th as u64)]
            }
            Operation::Zoom { xfactor, yfactor } => vec![
                ("xfactor", width as u64 * *xfactor as u64),
                ("yfactor", height as u64 * *yfactor as u64),
            ],
            Operation::Embed { width, height, .. } | Operation::EmbedCentred { width, height, .. } => {
                vec![("width", *width as u64), ("height", *height as u64)]
            }
            Operation::Rotate { degrees, .. } => {
                let theta = (degrees.rem_euclid(360) as f64).to_radians();
                let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
                vec![
                    ("degrees", (w * cos + h * sin - 1e-9).ceil() as u64),
                    ("degrees", (w * sin + h * cos - 1e-9).ceil() as u64),
                ]
            }
            Operation::WatermarkText(spec) => {
                let resolved = spec.resolve(width);
                let stencil =
                    resolved.width as u64 + 2 * resolved.margin as u64 + STENCIL_INSET as u64;
                vec![("width", resolved.width as u64), ("margin_px", stencil)]
            }
            _ => Vec::new(),
        }
    }
}

/// Operation over several decoded sources
#[derive(Debug, Clone)]
pub enum MultiOperation {
    ArrayJoin(ArrayJoinSpec),
    /// One blend mode per source after the first
    Composite { modes: Vec<BlendMode> },
    /// Exactly two sources; overlay blending when no mode is given
    Composite2 { mode: Option<BlendMode> },
}

impl MultiOperation {
    pub fn name(&self) -> &'static str {
        match self {
            MultiOperation::ArrayJoin(_) => "array_join",
            MultiOperation::Composite { .. } => "composite",
            MultiOperation::Composite2 { .. } => "composite2",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MultiImageRequest {
    pub sources: Vec<Bytes>,
    pub operation: MultiOperation,
    /// JPEG unless a format is given
    pub output: OutputOptions,
}

impl MultiImageRequest {
    pub fn new<I, B>(sources: I, operation: MultiOperation) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            operation,
            output: OutputOptions::default(),
        }
    }

    pub fn with_output(mut self, output: OutputOptions) -> Self {
        self.output = output;
        self
    }
}

/// How the final image is written
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// Defaults to the source format when it can be saved, JPEG otherwise
    pub format: Option<FormatId>,
    pub save: SaveOptions,
    pub no_profile: bool,
    pub interpretation: Option<Interpretation>,
    pub input_icc: Option<PathBuf>,
    pub output_icc: Option<PathBuf>,
    /// Flatten colour for formats without alpha, black when unset
    pub background: Option<[f64; 3]>,
}

#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub source: Bytes,
    /// Sniffed from the source bytes when unset
    pub format: Option<FormatId>,
    pub load: LoadParams,
    pub auto_rotate: bool,
    pub operations: Vec<Operation>,
    pub output: OutputOptions,
}

impl TransformRequest {
    pub fn new(source: impl Into<Bytes>) -> Self {
        Self {
            source: source.into(),
            format: None,
            load: LoadParams::default(),
            auto_rotate: true,
            operations: Vec::new(),
            output: OutputOptions::default(),
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn with_output(mut self, output: OutputOptions) -> Self {
        self.output = output;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub bytes: Bytes,
    pub format: FormatId,
    /// Describes the image as it was encoded
    pub metadata: ImageMetadata,
}

/// Runs transform requests against one engine configuration
#[derive(Clone)]
pub struct ImagePipeline {
    config: EngineConfig,
    caps: EngineCapabilities,
    rasterizer: Arc<dyn TextRasterizer + Send + Sync>,
}

impl ImagePipeline {
    pub fn new(config: EngineConfig) -> Self {
        let rasterizer = GlyphRasterizer::new(FontCatalog::new(config.font_dir.clone()));
        Self {
            caps: config.capabilities(),
            config,
            rasterizer: Arc::new(rasterizer),
        }
    }

    /// Replace the text renderer used by text watermarks
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn TextRasterizer + Send + Sync>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn process(&self, request: TransformRequest) -> Result<TransformOutput> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("transform", request_id = %request_id);
        let _enter = span.enter();

        self.run(request).map_err(|err| {
            report(&err);
            err
        })
    }

    /// [`ImagePipeline::process`] on the blocking thread pool
    pub async fn process_async(&self, request: TransformRequest) -> Result<TransformOutput> {
        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || pipeline.process(request))
            .await
            .map_err(|e| ImageError::transform("process", format!("worker task failed: {}", e)))?
    }

    /// Decode `bytes` and describe the result without transforming it
    pub fn metadata(&self, bytes: &[u8]) -> Result<ImageMetadata> {
        let handle = Loader::load_detected(bytes, &LoadParams::default())?;
        Ok(ImageMetadata::from_handle(&handle))
    }

    /// Dimensions read from the header alone
    pub fn size(&self, bytes: &[u8]) -> Result<ImageSize> {
        let format =
            FormatRegistry::detect(bytes).ok_or_else(|| ImageError::unsupported("size", "unknown"))?;
        FormatRegistry::global().loader_for(format)?;
        let image_format = format
            .to_image_format()
            .ok_or_else(|| ImageError::unsupported("size", format.name()))?;

        let (width, height) = ImageReader::with_format(Cursor::new(bytes), image_format)
            .into_dimensions()
            .map_err(|e| ImageError::decode("size", e))?;
        Ok(ImageSize { width, height })
    }

    /// Decode `bytes` and count samples per band
    pub fn histogram(&self, bytes: &[u8]) -> Result<ImageHistogram> {
        let handle = Loader::load_detected(bytes, &LoadParams::default())?;
        ColourOps::histogram_find(handle)
    }

    /// Join or blend several sources into one encoded image
    pub fn process_multi(&self, request: MultiImageRequest) -> Result<TransformOutput> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "transform_multi",
            request_id = %request_id,
            operation = request.operation.name()
        );
        let _enter = span.enter();

        self.run_multi(request).map_err(|err| {
            report(&err);
            err
        })
    }

    fn run(&self, request: TransformRequest) -> Result<TransformOutput> {
        let started = Instant::now();
        let TransformRequest {
            source,
            format,
            load,
            auto_rotate,
            operations,
            output,
        } = request;

        let mut handle = match format {
            Some(format) => Loader::load(&source, format, &load)?,
            None => Loader::load_detected(&source, &load)?,
        };
        let source_format = handle.source_format();
        tracing::debug!(
            format = ?source_format,
            width = handle.width(),
            height = handle.height(),
            operations = operations.len(),
            "Source decoded"
        );

        if auto_rotate {
            handle = ImageOrientation::auto_rotate(handle);
        }

        for operation in operations {
            let name = operation.name();
            let op_started = Instant::now();
            self.check_extent(name, operation.planned_extent(handle.width(), handle.height()))?;
            handle = self.apply(handle, operation)?;
            self.check_dimensions(name, &handle)?;

            if self.config.trace_operations {
                tracing::info!(
                    operation = name,
                    width = handle.width(),
                    height = handle.height(),
                    duration_ms = op_started.elapsed().as_millis() as u64,
                    "Operation applied"
                );
            }
        }

        let target = output
            .format
            .or_else(|| source_format.filter(|f| FormatRegistry::global().can_save(*f)))
            .unwrap_or(FormatId::Jpeg);
        self.finish(handle, &output, target, started)
    }

    fn run_multi(&self, request: MultiImageRequest) -> Result<TransformOutput> {
        let started = Instant::now();
        let MultiImageRequest {
            sources,
            operation,
            output,
        } = request;
        let name = operation.name();

        let images = sources
            .iter()
            .map(|source| Loader::load_detected(source, &LoadParams::default()))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(operation = name, sources = images.len(), "Sources decoded");

        let handle = match operation {
            MultiOperation::ArrayJoin(spec) => {
                let sizes: Vec<(u32, u32)> = images.iter().map(|h| h.dimensions()).collect();
                let layout = spec.layout(&sizes);
                self.check_extent(name, [("width", layout.width), ("height", layout.height)])?;
                Compositor::array_join(images, &spec)?
            }
            MultiOperation::Composite { modes } => Compositor::composite(images, &modes)?,
            MultiOperation::Composite2 { mode } => {
                if images.len() != 2 {
                    return Err(ImageError::geometry(
                        name,
                        "sources",
                        format!("exactly two images are required, got {}", images.len()),
                    ));
                }
                Compositor::composite(images, &[mode.unwrap_or(BlendMode::Overlay)])?
            }
        };
        self.check_dimensions(name, &handle)?;

        let target = output.format.unwrap_or(FormatId::Jpeg);
        self.finish(handle, &output, target, started)
    }

    /// Prepare `handle` for `target`, encode it and describe the result
    fn finish(
        &self,
        handle: ImageHandle,
        output: &OutputOptions,
        target: FormatId,
        started: Instant,
    ) -> Result<TransformOutput> {
        let handle = self.prepare_for_save(handle, output, target)?;
        let params = self.save_params(&output.save);
        let encoded = Encoder::encode(&handle, target, &params, &self.caps)?;

        let metadata = ImageMetadata {
            format: Some(target),
            ..ImageMetadata::from_handle(&handle)
        };

        tracing::info!(
            format = %target,
            width = metadata.width,
            height = metadata.height,
            size_bytes = encoded.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Transform completed"
        );

        Ok(TransformOutput {
            bytes: Bytes::from(encoded),
            format: target,
            metadata,
        })
    }

    fn apply(&self, handle: ImageHandle, operation: Operation) -> Result<ImageHandle> {
        match operation {
            Operation::Flip(axis) => Ok(ImageOrientation::flip(handle, axis)),
            Operation::Rotate {
                degrees,
                background,
            } => ImageOrientation::rotate_orthogonal(handle, degrees, background, &self.caps),
            Operation::AutoRotate => Ok(ImageOrientation::auto_rotate(handle)),
            Operation::Resize { xscale, yscale } => ImageResize::resize(handle, xscale, yscale),
            Operation::ResizeTo { dimensions, mode } => {
                ImageResize::resize_to(handle, dimensions, mode)
            }
            Operation::Shrink { xfactor, yfactor } => ImageResize::shrink(handle, xfactor, yfactor),
            Operation::Zoom { xfactor, yfactor } => ImageResize::zoom(handle, xfactor, yfactor),
            Operation::ExtractArea {
                left,
                top,
                width,
                height,
            } => ImageGeometry::extract_area(handle, left, top, width, height),
            Operation::Embed {
                left,
                top,
                width,
                height,
                extend,
                background,
            } => ImageGeometry::embed(handle, left, top, width, height, extend, background),
            Operation::EmbedCentred {
                width,
                height,
                extend,
                background,
            } => ImageGeometry::embed_centred(handle, width, height, extend, background),
            Operation::Crop {
                width,
                height,
                gravity,
            } => ImageGeometry::crop(handle, width, height, gravity),
            Operation::Colourspace(target) => ColourOps::to_colourspace(handle, target),
            Operation::IccTransform {
                output_profile,
                input_profile,
            } => ColourOps::icc_transform(handle, &output_profile, input_profile.as_deref()),
            Operation::Flatten { background } => {
                ColourOps::flatten_on_background(handle, background)
            }
            Operation::Gamma { exponent } => ColourOps::gamma(handle, exponent),
            Operation::StripProfile => Ok(ColourOps::strip_profile(handle)),
            Operation::HistogramNormalise => ColourOps::histogram_normalise(handle),
            Operation::Blur { sigma } => ImageFilters::blur(handle, sigma),
            Operation::Sharpen { sigma, threshold } => {
                ImageFilters::sharpen(handle, sigma, threshold)
            }
            Operation::WatermarkText(spec) => {
                TextWatermark::apply(handle, &spec, self.rasterizer.as_ref())
            }
            Operation::WatermarkImage(spec) => ImageWatermark::apply(handle, spec),
            Operation::Trim {
                background,
                threshold,
            } => {
                let trim = TrimDetector::find_trim(&handle, background, threshold)?;
                if trim.is_empty() {
                    tracing::debug!("Nothing to trim");
                    return Ok(handle);
                }
                ImageGeometry::extract_area(handle, trim.left, trim.top, trim.width, trim.height)
            }
        }
    }

    /// Profile, colourspace and alpha adjustments the target format needs, in
    /// that order
    fn prepare_for_save(
        &self,
        handle: ImageHandle,
        output: &OutputOptions,
        format: FormatId,
    ) -> Result<ImageHandle> {
        let (descriptor, _) = FormatRegistry::global().saver_for(format)?;

        let mut handle = if output.no_profile {
            ColourOps::strip_profile(handle)
        } else {
            handle
        };

        if let Some(profile) = &output.output_icc {
            handle = ColourOps::icc_transform(handle, profile, output.input_icc.as_deref())?;
        }

        let target = match output.interpretation {
            Some(requested) => Some(requested),
            None if !descriptor.supports_interpretation(handle.interpretation()) => {
                Some(Interpretation::Srgb)
            }
            None => None,
        };
        if let Some(target) = target.filter(|t| *t != handle.interpretation()) {
            tracing::debug!(
                from = %handle.interpretation(),
                to = %target,
                format = %format,
                "Converting colourspace for output"
            );
            handle = ColourOps::to_colourspace(handle, target)?;
        }

        if handle.has_alpha() && !descriptor.supports_alpha {
            let background = output.background.unwrap_or([0.0; 3]);
            tracing::debug!(format = %format, "Flattening alpha for output");
            handle = ColourOps::flatten_on_background(handle, background)?;
        }

        Ok(handle)
    }

    fn save_params(&self, overrides: &SaveOptions) -> SaveParams {
        let defaults = SaveParams {
            quality: self.config.default_quality,
            compression: self.config.default_compression,
            ..SaveParams::default()
        };
        defaults.merged(overrides)
    }

    fn check_dimensions(&self, stage: &'static str, handle: &ImageHandle) -> Result<()> {
        self.check_extent(
            stage,
            [("width", handle.width() as u64), ("height", handle.height() as u64)],
        )
    }

    /// Reject any side above the configured cap, naming the parameter behind it
    fn check_extent(
        &self,
        stage: &'static str,
        sides: impl IntoIterator<Item = (&'static str, u64)>,
    ) -> Result<()> {
        let limit = self.caps.max_dimension as u64;
        for (param, size) in sides {
            if size > limit {
                return Err(ImageError::geometry(
                    stage,
                    param,
                    format!("{} px exceeds the {} px limit", size, limit),
                ));
            }
        }
        Ok(())
    }
}

fn report(err: &ImageError) {
    let (code, stage) = (err.error_code(), err.stage());
    match err.log_level() {
        LogLevel::Debug => tracing::debug!(code, stage, error = %err, "Transform failed"),
        LogLevel::Warn => tracing::warn!(code, stage, error = %err, "Transform failed"),
        LogLevel::Error => tracing::error!(code, stage, error = %err, "Transform failed"),
    }
}

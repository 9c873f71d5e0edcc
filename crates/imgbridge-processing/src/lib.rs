//! imgbridge processing library
//!
//! Decodes images through a data-driven format registry, runs geometry, colour
//! and compositing operations over owned [`ImageHandle`]s, and encodes the
//! result. [`ImagePipeline`] sequences all of it for one request, or joins and
//! blends several sources into one output.

pub mod colour;
pub mod compositor;
pub mod compression;
pub mod encoder;
pub mod format;
pub mod handle;
pub mod image;
pub mod loader;
pub mod metadata;
pub mod pipeline;
mod raster;

// Re-export commonly used types
pub use colour::ColourOps;
pub use compositor::{
    Align, ArrayJoinSpec, BlendMode, Compositor, FontCatalog, GlyphRasterizer, ImageWatermark,
    JoinLayout, TextRasterizer, TextWatermark, TrimDetector, TrimResult, WatermarkImageSpec,
    WatermarkPosition, WatermarkTextSpec,
};
pub use encoder::{Encoder, SaveOptions, SaveParams};
pub use format::{FormatDescriptor, FormatId, FormatRegistry, ShrinkSupport};
pub use handle::{ImageHandle, Interpretation};
pub use self::image::{
    ExtendMode, FlipAxis, Gravity, ImageFilters, ImageGeometry, ImageOrientation, ImageResize,
    ResizeDimensions, ResizeMode,
};
pub use loader::{AccessHint, LoadParams, Loader};
pub use metadata::{ImageHistogram, ImageMetadata, ImageSize};
pub use pipeline::{
    ImagePipeline, MultiImageRequest, MultiOperation, Operation, OutputOptions, TransformOutput,
    TransformRequest,
};

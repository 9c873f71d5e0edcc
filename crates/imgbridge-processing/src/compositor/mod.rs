//! Multi-image compositing: text and image watermarks, grid joins, blend-mode
//! composites and trim detection.
//!
//! Each operation consumes its inputs and returns one new handle. Intermediate
//! rasters are owned locally, so an error at any step drops them all and no
//! partially composited image escapes.

pub mod composite;
pub mod font;
pub mod text;
pub mod trim;
pub mod watermark;

pub use composite::{Align, ArrayJoinSpec, BlendMode, Compositor, JoinLayout};
pub use font::{FontCatalog, FontSpec, GlyphRasterizer};
pub use text::{TextRasterizer, TextWatermark, WatermarkTextSpec};
pub use trim::{TrimDetector, TrimResult};
pub use watermark::{ImageWatermark, WatermarkImageSpec, WatermarkPosition};

//! Geometry operations on image handles
//!
//! - Flips, rotations and EXIF auto-rotation (orientation)
//! - Resampling, box shrink and pixel zoom (resize)
//! - Area extraction, padding and gravity crops (geometry, smart_crop)
//! - Blur and sharpen (filters)

pub mod filters;
pub mod geometry;
pub mod orientation;
pub mod resize;
pub mod smart_crop;

pub use filters::ImageFilters;
pub use geometry::{ExtendMode, Gravity, ImageGeometry};
pub use orientation::{FlipAxis, ImageOrientation};
pub use resize::{ImageResize, ResizeDimensions, ResizeMode};
pub use smart_crop::SmartCrop;

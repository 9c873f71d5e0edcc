//! imgbridge core library
//!
//! Error taxonomy, engine configuration and telemetry shared by the image
//! transformation crates.

pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types
pub use config::{EngineCapabilities, EngineConfig, LogFormat};
pub use error::{ErrorMetadata, ImageError, LogLevel, Result};
pub use telemetry::init_telemetry;

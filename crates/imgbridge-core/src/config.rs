//! Configuration module
//!
//! Engine-level settings resolved once at process start. Nothing here is mutated
//! after [`EngineConfig::from_env`] returns; the processing crate receives the
//! derived [`EngineCapabilities`] by value.

use std::env;
use std::path::PathBuf;

const DEFAULT_QUALITY: u8 = 75;
const DEFAULT_COMPRESSION: u8 = 6;
/// Largest edge the underlying codecs accept
const MAX_DIMENSION: u32 = 16383;

/// Output format of the log subscriber
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Engine configuration
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Log every orchestrated operation with its timing
    pub trace_operations: bool,
    pub log_format: LogFormat,
    /// Rotate multiples of 45 degrees with nearest-neighbour sampling
    pub rotate45_fast_path: bool,
    /// Invert PNG `speed` into `effort = 10 - speed`
    pub png_effort_from_speed: bool,
    pub font_dir: Option<PathBuf>,
    pub default_quality: u8,
    pub default_compression: u8,
    pub max_dimension: u32,
}

/// Capability flags of the engine, copied into every request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineCapabilities {
    pub rotate45_fast_path: bool,
    pub png_effort_from_speed: bool,
    pub max_dimension: u32,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            rotate45_fast_path: false,
            png_effort_from_speed: true,
            max_dimension: MAX_DIMENSION,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trace_operations: false,
            log_format: LogFormat::Text,
            rotate45_fast_path: false,
            png_effort_from_speed: true,
            font_dir: None,
            default_quality: DEFAULT_QUALITY,
            default_compression: DEFAULT_COMPRESSION,
            max_dimension: MAX_DIMENSION,
        }
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    value
        .map(|s| s.trim().to_lowercase())
        .and_then(|s| match s.as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_format = match lookup("IMGBRIDGE_LOG_FORMAT")
            .map(|s| s.trim().to_lowercase())
            .as_deref()
        {
            Some("json") => LogFormat::Json,
            Some("text") | Some("pretty") | None => LogFormat::Text,
            Some(other) => {
                return Err(anyhow::anyhow!(
                    "IMGBRIDGE_LOG_FORMAT must be 'text' or 'json', got '{}'",
                    other
                ))
            }
        };

        let config = EngineConfig {
            trace_operations: parse_bool(lookup("IMGBRIDGE_TRACE_OPERATIONS"), false),
            log_format,
            rotate45_fast_path: parse_bool(lookup("IMGBRIDGE_ROTATE45_FAST_PATH"), false),
            png_effort_from_speed: parse_bool(lookup("IMGBRIDGE_PNG_EFFORT_FROM_SPEED"), true),
            font_dir: lookup("IMGBRIDGE_FONT_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            default_quality: lookup("IMGBRIDGE_DEFAULT_QUALITY")
                .unwrap_or_else(|| DEFAULT_QUALITY.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("IMGBRIDGE_DEFAULT_QUALITY must be a number"))?,
            default_compression: lookup("IMGBRIDGE_DEFAULT_COMPRESSION")
                .unwrap_or_else(|| DEFAULT_COMPRESSION.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("IMGBRIDGE_DEFAULT_COMPRESSION must be a number"))?,
            max_dimension: lookup("IMGBRIDGE_MAX_DIMENSION")
                .unwrap_or_else(|| MAX_DIMENSION.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("IMGBRIDGE_MAX_DIMENSION must be a number"))?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(1..=100).contains(&self.default_quality) {
            return Err(anyhow::anyhow!(
                "IMGBRIDGE_DEFAULT_QUALITY must be between 1 and 100"
            ));
        }

        if self.default_compression > 9 {
            return Err(anyhow::anyhow!(
                "IMGBRIDGE_DEFAULT_COMPRESSION must be between 0 and 9"
            ));
        }

        if self.max_dimension == 0 || self.max_dimension > MAX_DIMENSION {
            return Err(anyhow::anyhow!(
                "IMGBRIDGE_MAX_DIMENSION must be between 1 and {}",
                MAX_DIMENSION
            ));
        }

        if let Some(dir) = &self.font_dir {
            if !dir.is_dir() {
                return Err(anyhow::anyhow!(
                    "IMGBRIDGE_FONT_DIR '{}' is not a directory",
                    dir.display()
                ));
            }
        }

        Ok(())
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            rotate45_fast_path: self.rotate45_fast_path,
            png_effort_from_speed: self.png_effort_from_speed,
            max_dimension: self.max_dimension,
        }
    }
}

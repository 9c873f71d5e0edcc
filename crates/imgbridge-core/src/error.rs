//! Error types module
//!
//! Every failure raised by the transformation core is one of the six variants of
//! [`ImageError`]. Each variant names the stage that failed and, where there is one,
//! the parameter that was rejected. None of them are retried internally: an error
//! ends the current request and the caller decides what to do next.

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like rejected geometry
    Debug,
    /// Warning level - for bad input such as corrupt or unsupported files
    Warn,
    /// Error level - for unexpected engine failures
    Error,
}

/// Metadata describing how an error should be reported by callers
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "DECODE_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the caller
    fn suggested_action(&self) -> Option<&'static str>;

    /// Pipeline stage that raised the error
    fn stage(&self) -> &'static str;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Unsupported format in {stage}: {format}")]
    UnsupportedFormat { stage: &'static str, format: String },

    #[error("Decode error in {stage}: {message}")]
    Decode {
        stage: &'static str,
        message: String,
    },

    #[error("Encode error in {stage} ({format}): {message}")]
    Encode {
        stage: &'static str,
        format: String,
        message: String,
    },

    #[error("Invalid geometry in {stage}: {param} {message}")]
    InvalidGeometry {
        stage: &'static str,
        param: String,
        message: String,
    },

    #[error("Render error in {stage}: {message}")]
    Render {
        stage: &'static str,
        message: String,
    },

    #[error("Transform error in {stage}: {message}")]
    Transform {
        stage: &'static str,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ImageError>;

impl ImageError {
    pub fn unsupported(stage: &'static str, format: impl Into<String>) -> Self {
        ImageError::UnsupportedFormat {
            stage,
            format: format.into(),
        }
    }

    pub fn decode(stage: &'static str, message: impl ToString) -> Self {
        ImageError::Decode {
            stage,
            message: message.to_string(),
        }
    }

    pub fn encode(stage: &'static str, format: impl Into<String>, message: impl ToString) -> Self {
        ImageError::Encode {
            stage,
            format: format.into(),
            message: message.to_string(),
        }
    }

    pub fn geometry(stage: &'static str, param: impl Into<String>, message: impl ToString) -> Self {
        ImageError::InvalidGeometry {
            stage,
            param: param.into(),
            message: message.to_string(),
        }
    }

    pub fn render(stage: &'static str, message: impl ToString) -> Self {
        ImageError::Render {
            stage,
            message: message.to_string(),
        }
    }

    pub fn transform(stage: &'static str, message: impl ToString) -> Self {
        ImageError::Transform {
            stage,
            message: message.to_string(),
        }
    }

    /// The offending parameter, for variants that carry one
    pub fn param(&self) -> Option<&str> {
        match self {
            ImageError::InvalidGeometry { param, .. } => Some(param),
            ImageError::UnsupportedFormat { format, .. } | ImageError::Encode { format, .. } => {
                Some(format)
            }
            _ => None,
        }
    }
}

/// Single source of truth for error metadata: (error_code, suggested_action, log_level).
fn error_metadata(err: &ImageError) -> (&'static str, Option<&'static str>, LogLevel) {
    match err {
        ImageError::UnsupportedFormat { .. } => (
            "UNSUPPORTED_FORMAT",
            Some("Use a format enabled in this build"),
            LogLevel::Debug,
        ),
        ImageError::Decode { .. } => (
            "DECODE_ERROR",
            Some("Check the source image is a valid file of the declared format"),
            LogLevel::Warn,
        ),
        ImageError::Encode { .. } => (
            "ENCODE_ERROR",
            Some("Choose an output format that can hold the image's bands"),
            LogLevel::Warn,
        ),
        ImageError::InvalidGeometry { .. } => (
            "INVALID_GEOMETRY",
            Some("Keep crop, embed and overlay rectangles inside the image"),
            LogLevel::Debug,
        ),
        ImageError::Render { .. } => (
            "RENDER_ERROR",
            Some("Check the font name and font directory"),
            LogLevel::Warn,
        ),
        ImageError::Transform { .. } => ("TRANSFORM_ERROR", None, LogLevel::Error),
    }
}

impl ErrorMetadata for ImageError {
    fn error_code(&self) -> &'static str {
        error_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        false
    }

    fn suggested_action(&self) -> Option<&'static str> {
        error_metadata(self).1
    }

    fn stage(&self) -> &'static str {
        match self {
            ImageError::UnsupportedFormat { stage, .. }
            | ImageError::Decode { stage, .. }
            | ImageError::Encode { stage, .. }
            | ImageError::InvalidGeometry { stage, .. }
            | ImageError::Render { stage, .. }
            | ImageError::Transform { stage, .. } => stage,
        }
    }

    fn log_level(&self) -> LogLevel {
        error_metadata(self).2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_invalid_geometry() {
        let err = ImageError::geometry("extract_area", "width", "exceeds source");
        assert_eq!(err.error_code(), "INVALID_GEOMETRY");
        assert_eq!(err.stage(), "extract_area");
        assert_eq!(err.param(), Some("width"));
        assert!(!err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Debug);
        assert!(err.to_string().contains("extract_area"));
        assert!(err.to_string().contains("width"));
    }

    #[test]
    fn test_error_metadata_unsupported_format() {
        let err = ImageError::unsupported("resolve", "pdf");
        assert_eq!(err.error_code(), "UNSUPPORTED_FORMAT");
        assert_eq!(err.param(), Some("pdf"));
        assert_eq!(err.to_string(), "Unsupported format in resolve: pdf");
    }

    #[test]
    fn test_error_metadata_transform_has_no_suggestion() {
        let err = ImageError::transform("icc_transform", "bad profile");
        assert_eq!(err.error_code(), "TRANSFORM_ERROR");
        assert_eq!(err.suggested_action(), None);
        assert_eq!(err.log_level(), LogLevel::Error);
        assert_eq!(err.param(), None);
    }

    #[test]
    fn test_no_error_is_recoverable() {
        let errors = [
            ImageError::unsupported("a", "x"),
            ImageError::decode("b", "x"),
            ImageError::encode("c", "jpeg", "x"),
            ImageError::geometry("d", "p", "x"),
            ImageError::render("e", "x"),
            ImageError::transform("f", "x"),
        ];
        for err in &errors {
            assert!(!err.is_recoverable(), "{} should be terminal", err);
        }
    }
}

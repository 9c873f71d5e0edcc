use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{EngineConfig, LogFormat};

/// Initialize tracing for the process.
///
/// `RUST_LOG` overrides the default filter. Fails when a global subscriber is
/// already installed; the existing one stays in place.
pub fn init_telemetry(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (text, json) = match config.log_format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "imgbridge=info".into()))
        .with(text)
        .with(json)
        .try_init()?;

    tracing::info!(
        trace_operations = config.trace_operations,
        rotate45_fast_path = config.rotate45_fast_path,
        png_effort_from_speed = config.png_effort_from_speed,
        "Image engine telemetry initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let config = EngineConfig {
            log_format: LogFormat::Json,
            ..EngineConfig::default()
        };
        init_telemetry(&config).unwrap();

        let err = init_telemetry(&EngineConfig::default()).unwrap_err();
        assert!(!err.to_string().is_empty());
    }
}

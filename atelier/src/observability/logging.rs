//! `tracing-subscriber` initialisation.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Output format of the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Installs the global subscriber. The filter comes from `RUST_LOG`,
/// falling back to `default_directive` (e.g. `"info"`).
///
/// Returns false if a subscriber was already installed.
pub fn init_tracing(format: LogFormat, default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().with_current_span(false).try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        init_tracing(LogFormat::Json, "debug");
        assert!(!init_tracing(LogFormat::Pretty, "info"));
    }

    #[test]
    fn test_format_deserializes() {
        let format: LogFormat = serde_json::from_str(r#""json""#).unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}

//! Process-wide `tracing` subscriber setup.

use crate::config::{LogFormat, LogOutput, LoggingConfig};
use tracing::Subscriber;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Build the level filter. An explicit directive wins over `RUST_LOG`,
/// which wins over the configured level.
#[must_use]
pub fn filter(config: &LoggingConfig, directive: Option<&str>) -> EnvFilter {
    if let Some(filter) = directive.and_then(|d| EnvFilter::try_new(d).ok()) {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.to_string()))
}

/// Install the global subscriber. Call once at startup.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set.
pub fn init(config: &LoggingConfig, directive: Option<&str>) -> Result<(), TryInitError> {
    let layer = match config.output {
        LogOutput::Stdout => format_layer(config.format, std::io::stdout),
        LogOutput::Stderr => format_layer(config.format, std::io::stderr),
    };

    tracing_subscriber::registry()
        .with(filter(config, directive))
        .with(layer)
        .try_init()
}

fn format_layer<S, W>(format: LogFormat, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_target(true);
    match format {
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_ansi(false)
            .boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_levels_are_valid_filters() {
        for level in [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            assert!(EnvFilter::try_new(level.to_string()).is_ok());
        }
    }

    #[test]
    fn test_directive_overrides_config() {
        let config = LoggingConfig::default();
        let filter = filter(&config, Some("r0n_elb=trace"));
        assert_eq!(filter.to_string(), "r0n_elb=trace");
    }
}

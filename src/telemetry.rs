//! Tracing subscriber setup.

use crate::config::{LogLevel, LoggingConfig};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

/// Install a global subscriber for `config`.
///
/// `RUST_LOG` wins over the configured level. Returns `false` if a
/// subscriber was already installed, which is common in tests.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive(config.level)));

    let json = config.json_format.then(|| {
        fmt::layer()
            .json()
            .with_target(config.include_targets)
            .flatten_event(true)
    });
    let plain = (!config.json_format).then(|| {
        fmt::layer()
            .with_target(config.include_targets)
            .with_ansi(config.colored)
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(level = directive(config.level), json = config.json_format, "Tracing initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}

use confdrift_config::{LOG_FILTER_ENV, LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Picks the log filter: `CONFDRIFT_LOG` when set and valid, otherwise the
/// configured filter, otherwise `info`.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new(confdrift_config::DEFAULT_LOG_FILTER))
}

/// Installs the global subscriber. Logs go to stderr so stdout stays JSON.
/// Fails when a global subscriber is already installed.
pub fn init_tracing(format: LogFormat, config: &LoggingConfig) -> Result<(), TryInitError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(config))
        .with_writer(std::io::stderr)
        .with_target(true);

    match format {
        LogFormat::Human => builder.finish().try_init(),
        LogFormat::Json => builder.json().finish().try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_configured_filter_falls_back_to_default() {
        let config = LoggingConfig {
            format: LogFormat::Human,
            filter: "confdrift=loudest".to_owned(),
        };
        if std::env::var_os(LOG_FILTER_ENV).is_none() {
            assert_eq!(build_filter(&config).to_string(), "info");
        }
    }

    #[test]
    fn second_install_reports_failure() {
        let config = LoggingConfig {
            format: LogFormat::Human,
            filter: "warn".to_owned(),
        };
        let _ = init_tracing(LogFormat::Human, &config);
        assert!(init_tracing(LogFormat::Json, &config).is_err());
    }

    #[test]
    fn configured_filter_is_used_without_env_override() {
        let config = LoggingConfig {
            format: LogFormat::Json,
            filter: "confdrift_store=debug".to_owned(),
        };
        if std::env::var_os(LOG_FILTER_ENV).is_none() {
            assert_eq!(build_filter(&config).to_string(), "confdrift_store=debug");
        }
    }
}

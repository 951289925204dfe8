use stratum_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level; `--verbose` wins over both.
pub fn init(config: &LoggingConfig, verbose: bool) {
    let directive = filter_directive(std::env::var("RUST_LOG").ok(), config, verbose);
    let filter = EnvFilter::new(directive);

    let installed = if config.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

fn filter_directive(env: Option<String>, config: &LoggingConfig, verbose: bool) -> String {
    if verbose {
        return "debug".to_string();
    }
    env.filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.level.clone())
}

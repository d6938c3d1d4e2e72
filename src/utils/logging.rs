use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(&config.level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
        "compact" => registry.with(fmt::layer().compact()).try_init(),
        _ => registry.with(fmt::layer()).try_init(),
    };

    if let Err(err) = result {
        eprintln!("tracing subscriber already installed: {err}");
    }
}

fn default_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    // transport internals are noisy below warn
    format!("{level},hyper=warn,h2=warn,rustls=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_keep_level_first() {
        assert!(default_directives(" DEBUG ").starts_with("debug,"));
    }
}

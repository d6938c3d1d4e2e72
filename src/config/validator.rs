use thiserror::Error;

use super::parser::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConfig(message.into())
}

pub(super) fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.database.connection_string().trim().is_empty() {
        return Err(invalid("database.url cannot be empty"));
    }

    if config.server.port == 0 {
        return Err(invalid("server.port must be between 1 and 65535"));
    }

    if url::Url::parse(&config.graph.base_url).is_err() {
        return Err(invalid(format!(
            "graph.base_url is not a valid URL: {}",
            config.graph.base_url
        )));
    }

    if config.graph.api_version.trim().is_empty() {
        return Err(invalid("graph.api_version cannot be empty"));
    }

    let forwarder = &config.forwarder;
    if forwarder.poll_interval_secs == 0 {
        return Err(invalid("forwarder.poll_interval_secs must be at least 1"));
    }
    if forwarder.batch_size < 1 {
        return Err(invalid("forwarder.batch_size must be at least 1"));
    }
    if forwarder.max_attempts < 1 {
        return Err(invalid("forwarder.max_attempts must be at least 1"));
    }
    if forwarder.backoff_base_secs == 0 {
        return Err(invalid("forwarder.backoff_base_secs must be at least 1"));
    }
    if forwarder.backoff_max_secs < forwarder.backoff_base_secs {
        return Err(invalid(
            "forwarder.backoff_max_secs cannot be lower than forwarder.backoff_base_secs",
        ));
    }
    if forwarder.sender_types.is_empty() {
        return Err(invalid("forwarder.sender_types cannot be empty"));
    }
    for sender_type in &forwarder.sender_types {
        if !matches!(sender_type.as_str(), "bot" | "agent") {
            return Err(invalid(format!(
                "forwarder.sender_types only accepts bot and agent, got {sender_type}"
            )));
        }
    }

    if !matches!(config.logging.format.as_str(), "pretty" | "json" | "compact") {
        return Err(invalid(format!(
            "logging.format must be pretty, compact or json, got {}",
            config.logging.format
        )));
    }

    Ok(())
}

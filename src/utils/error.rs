use thiserror::Error;

use crate::config::ConfigError;
use crate::db::DatabaseError;
use crate::graph::GraphError;
use crate::service::ServiceError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Graph API error: {0}")]
    Graph(#[from] GraphError),

    #[error("Password error: {0}")]
    Password(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_layer_errors_with_context() {
        let err: AppError = DatabaseError::NotFound("company 7".to_string()).into();
        assert!(err.to_string().starts_with("Database error:"));

        let err: AppError = ConfigError::InvalidConfig("port must be set".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration: port must be set"
        );
    }
}

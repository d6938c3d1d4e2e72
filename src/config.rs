pub use self::parser::{
    Config, DatabaseConfig, DbType, ForwarderConfig, GraphConfig, LoggingConfig, ServerConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;

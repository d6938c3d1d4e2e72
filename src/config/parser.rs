use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub min_connections: Option<u32>,
}

impl DatabaseConfig {
    pub fn db_type(&self) -> DbType {
        let url = self.connection_string();
        if url.starts_with("sqlite://") {
            DbType::Sqlite
        } else if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            DbType::Mysql
        } else {
            DbType::Postgres
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            // diesel's mysql backend only understands the mysql:// scheme
            match url.strip_prefix("mariadb://") {
                Some(rest) => format!("mysql://{rest}"),
                None => url.clone(),
            }
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            String::new()
        }
    }

    pub fn sqlite_path(&self) -> Option<String> {
        if let DbType::Sqlite = self.db_type() {
            let url = self.connection_string();
            Some(url.strip_prefix("sqlite://").unwrap_or(&url).to_string())
        } else {
            None
        }
    }

    pub fn max_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres | DbType::Mysql => self.max_connections,
            DbType::Sqlite => Some(1),
        }
    }

    pub fn min_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres | DbType::Mysql => self.min_connections,
            DbType::Sqlite => Some(1),
        }
    }

    /// Connection string with any password replaced, for log lines.
    pub fn redacted_url(&self) -> String {
        let raw = self.connection_string();
        match url::Url::parse(&raw) {
            Ok(mut parsed) if parsed.password().is_some() => {
                let _ = parsed.set_password(Some("****"));
                parsed.to_string()
            }
            _ => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
    Mysql,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,
    #[serde(default = "default_graph_api_version")]
    pub api_version: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            api_version: default_graph_api_version(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl GraphConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwarderConfig {
    #[serde(default = "default_forwarder_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_sender_types")]
    pub sender_types: Vec<String>,
    #[serde(default = "default_credentials_cache_secs")]
    pub credentials_cache_secs: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            enabled: default_forwarder_enabled(),
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            sender_types: default_sender_types(),
            credentials_cache_secs: default_credentials_cache_secs(),
        }
    }
}

impl ForwarderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn credentials_ttl(&self) -> Duration {
        Duration::from_secs(self.credentials_cache_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_yaml(&content, |key| std::env::var(key).ok())
    }

    pub fn from_yaml<F>(content: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_env_overrides(env);
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        super::validator::validate(self)
    }

    fn normalize(&mut self) {
        self.graph.base_url = self.graph.base_url.trim().trim_end_matches('/').to_string();
        self.graph.api_version = self.graph.api_version.trim().trim_matches('/').to_string();
        self.logging.format = self.logging.format.trim().to_ascii_lowercase();
        for sender_type in &mut self.forwarder.sender_types {
            *sender_type = sender_type.trim().to_ascii_lowercase();
        }
        self.forwarder.sender_types.dedup();
    }

    fn apply_env_overrides<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = env("SHOPDESK_DATABASE_URL") {
            self.database.url = Some(value);
        }
        if let Some(value) = env("SHOPDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(port) = env("SHOPDESK_SERVER_PORT").and_then(|v| v.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(value) = env("SHOPDESK_GRAPH_BASE_URL") {
            self.graph.base_url = value;
        }
        if let Some(value) = env("SHOPDESK_LOG_LEVEL") {
            self.logging.level = value;
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_graph_base_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_graph_api_version() -> String {
    "v18.0".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_forwarder_enabled() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_batch_size() -> i64 {
    50
}

fn default_max_attempts() -> i32 {
    8
}

fn default_backoff_base_secs() -> u64 {
    30
}

fn default_backoff_max_secs() -> u64 {
    3600
}

fn default_sender_types() -> Vec<String> {
    vec!["bot".to_string(), "agent".to_string()]
}

fn default_credentials_cache_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config = Config::from_yaml("database:\n  url: sqlite://shop.db\n", no_env)
            .expect("minimal config");

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.db_type(), DbType::Sqlite);
        assert_eq!(config.database.sqlite_path().as_deref(), Some("shop.db"));
        assert_eq!(config.forwarder.batch_size, 50);
        assert_eq!(config.forwarder.sender_types, vec!["bot", "agent"]);
        assert_eq!(config.graph.base_url, "https://graph.facebook.com");
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SHOPDESK_DATABASE_URL", "postgres://shop:pw@db/shop"),
            ("SHOPDESK_SERVER_PORT", "9100"),
            ("SHOPDESK_GRAPH_BASE_URL", "http://127.0.0.1:9999/"),
        ]);
        let config = Config::from_yaml("database:\n  url: sqlite://shop.db\n", |key| {
            env.get(key).map(|v| v.to_string())
        })
        .expect("config with overrides");

        assert_eq!(config.database.db_type(), DbType::Postgres);
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.graph.base_url, "http://127.0.0.1:9999");
    }

    #[test_case("mysql://u:p@localhost/shop", DbType::Mysql ; "mysql")]
    #[test_case("mariadb://u:p@localhost/shop", DbType::Mysql ; "mariadb")]
    #[test_case("postgresql://u:p@localhost/shop", DbType::Postgres ; "postgres")]
    #[test_case("sqlite:///tmp/shop.db", DbType::Sqlite ; "sqlite")]
    fn db_type_follows_url_scheme(url: &str, expected: DbType) {
        let db = DatabaseConfig {
            url: Some(url.to_string()),
            filename: None,
            max_connections: None,
            min_connections: None,
        };
        assert_eq!(db.db_type(), expected);
    }

    #[test]
    fn mariadb_scheme_is_rewritten_for_the_driver() {
        let db = DatabaseConfig {
            url: Some("mariadb://u:p@localhost/shop".to_string()),
            filename: None,
            max_connections: None,
            min_connections: None,
        };
        assert_eq!(db.connection_string(), "mysql://u:p@localhost/shop");
    }

    #[test]
    fn redacted_url_hides_password() {
        let db = DatabaseConfig {
            url: Some("postgres://shop:secret@db:5432/shop".to_string()),
            filename: None,
            max_connections: None,
            min_connections: None,
        };
        let redacted = db.redacted_url();
        assert!(!redacted.contains("secret"));
        assert!(redacted.contains("****"));
    }

    #[test_case("forwarder:\n  batch_size: 0\n" ; "zero batch")]
    #[test_case("forwarder:\n  batch_size: -1\n" ; "negative batch")]
    #[test_case("forwarder:\n  max_attempts: 0\n" ; "zero attempts")]
    #[test_case("forwarder:\n  max_attempts: -1\n" ; "negative attempts")]
    #[test_case("forwarder:\n  poll_interval_secs: 0\n" ; "zero interval")]
    #[test_case("forwarder:\n  backoff_base_secs: 60\n  backoff_max_secs: 10\n" ; "inverted backoff")]
    #[test_case("forwarder:\n  sender_types: [customer]\n" ; "customer sender")]
    #[test_case("server:\n  port: 0\n" ; "zero port")]
    #[test_case("logging:\n  format: xml\n" ; "unknown log format")]
    fn invalid_values_are_rejected(extra: &str) {
        let yaml = format!("database:\n  url: sqlite://shop.db\n{extra}");
        let err = Config::from_yaml(&yaml, no_env).expect_err("config should be rejected");
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn missing_database_url_is_rejected() {
        let err = Config::from_yaml("database: {}\n", no_env).expect_err("no url");
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn load_from_file_reads_yaml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "database:\n  filename: shop.db\nforwarder:\n  enabled: false\n",
        )
        .expect("write config");

        let config = Config::load_from_file(&path).expect("load config");
        assert!(!config.forwarder.enabled);
        assert_eq!(config.database.connection_string(), "sqlite://shop.db");
    }
}

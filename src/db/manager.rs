use std::sync::Arc;

#[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
use diesel::RunQueryDsl;
#[cfg(feature = "mysql")]
use diesel::mysql::MysqlConnection;
#[cfg(feature = "postgres")]
use diesel::pg::PgConnection;
#[cfg(any(feature = "postgres", feature = "mysql"))]
use diesel::r2d2::{self, ConnectionManager};

use crate::config::{DatabaseConfig as ConfigDatabaseConfig, DbType as ConfigDbType};
#[cfg(feature = "mysql")]
use crate::db::mysql::{
    MysqlCategoryStore, MysqlCompanyStore, MysqlConversationStore, MysqlCouponStore,
    MysqlMessageStore, MysqlPageStore, MysqlProductStore,
};
#[cfg(feature = "postgres")]
use crate::db::postgres::{
    PostgresCategoryStore, PostgresCompanyStore, PostgresConversationStore, PostgresCouponStore,
    PostgresMessageStore, PostgresPageStore, PostgresProductStore,
};
#[cfg(feature = "sqlite")]
use crate::db::sqlite::{
    SqliteCategoryStore, SqliteCompanyStore, SqliteConversationStore, SqliteCouponStore,
    SqliteMessageStore, SqlitePageStore, SqliteProductStore, establish_connection,
};
use crate::db::{
    CategoryStore, CompanyStore, ConversationStore, CouponStore, DatabaseError, MessageStore,
    PageStore, ProductStore,
};

#[cfg(feature = "postgres")]
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;
#[cfg(feature = "mysql")]
pub type MysqlPool = r2d2::Pool<ConnectionManager<MysqlConnection>>;

#[derive(Clone)]
struct StoreSet {
    companies: Arc<dyn CompanyStore>,
    pages: Arc<dyn PageStore>,
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    categories: Arc<dyn CategoryStore>,
    products: Arc<dyn ProductStore>,
    coupons: Arc<dyn CouponStore>,
}

impl StoreSet {
    #[cfg(feature = "postgres")]
    fn postgres(pool: &Pool) -> Self {
        Self {
            companies: Arc::new(PostgresCompanyStore::new(pool.clone())),
            pages: Arc::new(PostgresPageStore::new(pool.clone())),
            conversations: Arc::new(PostgresConversationStore::new(pool.clone())),
            messages: Arc::new(PostgresMessageStore::new(pool.clone())),
            categories: Arc::new(PostgresCategoryStore::new(pool.clone())),
            products: Arc::new(PostgresProductStore::new(pool.clone())),
            coupons: Arc::new(PostgresCouponStore::new(pool.clone())),
        }
    }

    #[cfg(feature = "sqlite")]
    fn sqlite(path: &Arc<String>) -> Self {
        Self {
            companies: Arc::new(SqliteCompanyStore::new(path.clone())),
            pages: Arc::new(SqlitePageStore::new(path.clone())),
            conversations: Arc::new(SqliteConversationStore::new(path.clone())),
            messages: Arc::new(SqliteMessageStore::new(path.clone())),
            categories: Arc::new(SqliteCategoryStore::new(path.clone())),
            products: Arc::new(SqliteProductStore::new(path.clone())),
            coupons: Arc::new(SqliteCouponStore::new(path.clone())),
        }
    }

    #[cfg(feature = "mysql")]
    fn mysql(pool: &MysqlPool) -> Self {
        Self {
            companies: Arc::new(MysqlCompanyStore::new(pool.clone())),
            pages: Arc::new(MysqlPageStore::new(pool.clone())),
            conversations: Arc::new(MysqlConversationStore::new(pool.clone())),
            messages: Arc::new(MysqlMessageStore::new(pool.clone())),
            categories: Arc::new(MysqlCategoryStore::new(pool.clone())),
            products: Arc::new(MysqlProductStore::new(pool.clone())),
            coupons: Arc::new(MysqlCouponStore::new(pool.clone())),
        }
    }
}

#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "postgres")]
    postgres_pool: Option<Pool>,
    #[cfg(feature = "mysql")]
    mysql_pool: Option<MysqlPool>,
    #[cfg(feature = "sqlite")]
    sqlite_path: Option<String>,
    stores: StoreSet,
    db_type: DbType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
    Mysql,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Postgres => "postgres",
            DbType::Sqlite => "sqlite",
            DbType::Mysql => "mysql",
        }
    }
}

impl From<ConfigDbType> for DbType {
    fn from(value: ConfigDbType) -> Self {
        match value {
            ConfigDbType::Postgres => DbType::Postgres,
            ConfigDbType::Sqlite => DbType::Sqlite,
            ConfigDbType::Mysql => DbType::Mysql,
        }
    }
}

impl DatabaseManager {
    pub async fn new(config: &ConfigDatabaseConfig) -> Result<Self, DatabaseError> {
        let db_type = DbType::from(config.db_type());

        match db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let manager = ConnectionManager::<PgConnection>::new(config.connection_string());
                let pool = r2d2::Pool::builder()
                    .max_size(config.max_connections().unwrap_or(10))
                    .min_idle(Some(config.min_connections().unwrap_or(1)))
                    .build(manager)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;

                Ok(Self {
                    stores: StoreSet::postgres(&pool),
                    postgres_pool: Some(pool),
                    #[cfg(feature = "mysql")]
                    mysql_pool: None,
                    #[cfg(feature = "sqlite")]
                    sqlite_path: None,
                    db_type,
                })
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = config.sqlite_path().ok_or_else(|| {
                    DatabaseError::Connection("sqlite database path is missing".to_string())
                })?;
                Ok(Self::sqlite(path))
            }
            #[cfg(feature = "mysql")]
            DbType::Mysql => {
                let manager =
                    ConnectionManager::<MysqlConnection>::new(config.connection_string());
                let pool = r2d2::Pool::builder()
                    .max_size(config.max_connections().unwrap_or(10))
                    .min_idle(Some(config.min_connections().unwrap_or(1)))
                    .build(manager)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;

                Ok(Self {
                    stores: StoreSet::mysql(&pool),
                    #[cfg(feature = "postgres")]
                    postgres_pool: None,
                    mysql_pool: Some(pool),
                    #[cfg(feature = "sqlite")]
                    sqlite_path: None,
                    db_type,
                })
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Connection(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Connection(
                "SQLite feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "mysql"))]
            DbType::Mysql => Err(DatabaseError::Connection(
                "MySQL feature not enabled".to_string(),
            )),
        }
    }

    /// File-backed SQLite manager. Each store operation opens its own
    /// connection, so `:memory:` would give every call a fresh database.
    #[cfg(feature = "sqlite")]
    pub fn sqlite(path: String) -> Self {
        let path_arc = Arc::new(path.clone());
        Self {
            #[cfg(feature = "postgres")]
            postgres_pool: None,
            #[cfg(feature = "mysql")]
            mysql_pool: None,
            stores: StoreSet::sqlite(&path_arc),
            sqlite_path: Some(path),
            db_type: DbType::Sqlite,
        }
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        match self.db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let pool = self.postgres_pool.clone().ok_or_else(missing_pool)?;
                Self::migrate_postgres(pool).await
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = self.sqlite_path.clone().ok_or_else(missing_pool)?;
                Self::migrate_sqlite(path).await
            }
            #[cfg(feature = "mysql")]
            DbType::Mysql => {
                let pool = self.mysql_pool.clone().ok_or_else(missing_pool)?;
                Self::migrate_mysql(pool).await
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Migration(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Migration(
                "SQLite feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "mysql"))]
            DbType::Mysql => Err(DatabaseError::Migration(
                "MySQL feature not enabled".to_string(),
            )),
        }
    }

    /// Round-trips a trivial query through the active backend.
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        match self.db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let pool = self.postgres_pool.clone().ok_or_else(missing_pool)?;
                tokio::task::spawn_blocking(move || {
                    let mut conn = pool
                        .get()
                        .map_err(|e| DatabaseError::Connection(e.to_string()))?;
                    diesel::sql_query("SELECT 1")
                        .execute(&mut conn)
                        .map(|_| ())
                        .map_err(|e| DatabaseError::Query(e.to_string()))
                })
                .await
                .map_err(crate::db::error::task_error)?
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = self.sqlite_path.clone().ok_or_else(missing_pool)?;
                tokio::task::spawn_blocking(move || {
                    let mut conn = establish_connection(&path)?;
                    diesel::sql_query("SELECT 1")
                        .execute(&mut conn)
                        .map(|_| ())
                        .map_err(|e| DatabaseError::Query(e.to_string()))
                })
                .await
                .map_err(crate::db::error::task_error)?
            }
            #[cfg(feature = "mysql")]
            DbType::Mysql => {
                let pool = self.mysql_pool.clone().ok_or_else(missing_pool)?;
                tokio::task::spawn_blocking(move || {
                    let mut conn = pool
                        .get()
                        .map_err(|e| DatabaseError::Connection(e.to_string()))?;
                    diesel::sql_query("SELECT 1")
                        .execute(&mut conn)
                        .map(|_| ())
                        .map_err(|e| DatabaseError::Query(e.to_string()))
                })
                .await
                .map_err(crate::db::error::task_error)?
            }
            #[allow(unreachable_patterns)]
            _ => Err(DatabaseError::Connection(format!(
                "{} feature not enabled",
                self.db_type.as_str()
            ))),
        }
    }

    #[cfg(feature = "postgres")]
    async fn migrate_postgres(pool: Pool) -> Result<(), DatabaseError> {
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS companies (
                    id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS facebook_settings (
                    id BIGSERIAL PRIMARY KEY,
                    company_id BIGINT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    page_id TEXT NOT NULL UNIQUE,
                    page_name TEXT,
                    access_token TEXT NOT NULL,
                    webhook_verified BOOLEAN NOT NULL DEFAULT FALSE,
                    webhook_subscribed BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS conversations (
                    id BIGSERIAL PRIMARY KEY,
                    company_id BIGINT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    facebook_page_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    customer_name TEXT,
                    unread_messages BIGINT NOT NULL DEFAULT 0,
                    message_count BIGINT NOT NULL DEFAULT 0,
                    last_message_at TIMESTAMP WITH TIME ZONE,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    UNIQUE (company_id, facebook_page_id, user_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id BIGSERIAL PRIMARY KEY,
                    conversation_id BIGINT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                    company_id BIGINT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    direction TEXT NOT NULL,
                    sender_type TEXT NOT NULL,
                    content TEXT NOT NULL,
                    external_id TEXT,
                    delivery_attempts INTEGER NOT NULL DEFAULT 0,
                    next_attempt_at TIMESTAMP WITH TIME ZONE,
                    last_error TEXT,
                    dead_lettered BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    delivered_at TIMESTAMP WITH TIME ZONE
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS categories (
                    id BIGSERIAL PRIMARY KEY,
                    company_id BIGINT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    description TEXT,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    UNIQUE (company_id, name)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    id BIGSERIAL PRIMARY KEY,
                    company_id BIGINT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    category_id BIGINT REFERENCES categories(id) ON DELETE SET NULL,
                    name TEXT NOT NULL,
                    description TEXT,
                    price_cents BIGINT NOT NULL CHECK (price_cents >= 0),
                    stock INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0),
                    sku TEXT,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS coupons (
                    id BIGSERIAL PRIMARY KEY,
                    company_id BIGINT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    code TEXT NOT NULL,
                    discount_type TEXT NOT NULL,
                    discount_value BIGINT NOT NULL,
                    min_order_cents BIGINT,
                    usage_limit INTEGER,
                    used_count INTEGER NOT NULL DEFAULT 0,
                    starts_at TIMESTAMP WITH TIME ZONE,
                    expires_at TIMESTAMP WITH TIME ZONE,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    UNIQUE (company_id, code)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_facebook_settings_company ON facebook_settings(company_id)",
                "CREATE INDEX IF NOT EXISTS idx_conversations_company ON conversations(company_id, updated_at)",
                "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at)",
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_messages_external ON messages(company_id, external_id) WHERE external_id IS NOT NULL",
                "CREATE INDEX IF NOT EXISTS idx_messages_pending ON messages(created_at) WHERE external_id IS NULL AND dead_lettered = FALSE",
                "CREATE INDEX IF NOT EXISTS idx_products_company ON products(company_id, name)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    #[cfg(feature = "mysql")]
    async fn migrate_mysql(pool: MysqlPool) -> Result<(), DatabaseError> {
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS companies (
                    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    email VARCHAR(255) NOT NULL UNIQUE,
                    password_hash VARCHAR(255) NOT NULL,
                    status VARCHAR(32) NOT NULL DEFAULT 'active',
                    created_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    updated_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6)
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS facebook_settings (
                    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    company_id BIGINT NOT NULL,
                    page_id VARCHAR(64) NOT NULL UNIQUE,
                    page_name VARCHAR(255) NULL,
                    access_token TEXT NOT NULL,
                    webhook_verified BOOLEAN NOT NULL DEFAULT FALSE,
                    webhook_subscribed BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    updated_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    KEY idx_facebook_settings_company (company_id),
                    CONSTRAINT fk_facebook_settings_company
                        FOREIGN KEY (company_id) REFERENCES companies(id) ON DELETE CASCADE
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS conversations (
                    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    company_id BIGINT NOT NULL,
                    facebook_page_id VARCHAR(64) NOT NULL,
                    user_id VARCHAR(64) NOT NULL,
                    customer_name VARCHAR(255) NULL,
                    unread_messages BIGINT NOT NULL DEFAULT 0,
                    message_count BIGINT NOT NULL DEFAULT 0,
                    last_message_at DATETIME(6) NULL,
                    created_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    updated_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    UNIQUE KEY uq_conversations_thread (company_id, facebook_page_id, user_id),
                    KEY idx_conversations_company (company_id, updated_at),
                    CONSTRAINT fk_conversations_company
                        FOREIGN KEY (company_id) REFERENCES companies(id) ON DELETE CASCADE
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    conversation_id BIGINT NOT NULL,
                    company_id BIGINT NOT NULL,
                    direction VARCHAR(16) NOT NULL,
                    sender_type VARCHAR(16) NOT NULL,
                    content TEXT NOT NULL,
                    external_id VARCHAR(255) NULL,
                    delivery_attempts INT NOT NULL DEFAULT 0,
                    next_attempt_at DATETIME(6) NULL,
                    last_error TEXT NULL,
                    dead_lettered BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    delivered_at DATETIME(6) NULL,
                    KEY idx_messages_conversation (conversation_id, created_at),
                    UNIQUE KEY uq_messages_external (company_id, external_id),
                    KEY idx_messages_pending (dead_lettered, external_id, created_at),
                    CONSTRAINT fk_messages_conversation
                        FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
                    CONSTRAINT fk_messages_company
                        FOREIGN KEY (company_id) REFERENCES companies(id) ON DELETE CASCADE
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS categories (
                    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    company_id BIGINT NOT NULL,
                    name VARCHAR(255) NOT NULL,
                    description TEXT NULL,
                    created_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    updated_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    UNIQUE KEY uq_categories_name (company_id, name),
                    CONSTRAINT fk_categories_company
                        FOREIGN KEY (company_id) REFERENCES companies(id) ON DELETE CASCADE
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    company_id BIGINT NOT NULL,
                    category_id BIGINT NULL,
                    name VARCHAR(255) NOT NULL,
                    description TEXT NULL,
                    price_cents BIGINT NOT NULL,
                    stock INT NOT NULL DEFAULT 0,
                    sku VARCHAR(128) NULL,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    created_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    updated_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    KEY idx_products_company (company_id, name),
                    CONSTRAINT fk_products_company
                        FOREIGN KEY (company_id) REFERENCES companies(id) ON DELETE CASCADE,
                    CONSTRAINT fk_products_category
                        FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE SET NULL
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS coupons (
                    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    company_id BIGINT NOT NULL,
                    code VARCHAR(64) NOT NULL,
                    discount_type VARCHAR(16) NOT NULL,
                    discount_value BIGINT NOT NULL,
                    min_order_cents BIGINT NULL,
                    usage_limit INT NULL,
                    used_count INT NOT NULL DEFAULT 0,
                    starts_at DATETIME(6) NULL,
                    expires_at DATETIME(6) NULL,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    created_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    updated_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    UNIQUE KEY uq_coupons_code (company_id, code),
                    CONSTRAINT fk_coupons_company
                        FOREIGN KEY (company_id) REFERENCES companies(id) ON DELETE CASCADE
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
                "#,
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    #[cfg(feature = "sqlite")]
    async fn migrate_sqlite(path: String) -> Result<(), DatabaseError> {
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&path)?;

            let statements = [
                "PRAGMA journal_mode = WAL",
                r#"
                CREATE TABLE IF NOT EXISTS companies (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS facebook_settings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    page_id TEXT NOT NULL UNIQUE,
                    page_name TEXT,
                    access_token TEXT NOT NULL,
                    webhook_verified INTEGER NOT NULL DEFAULT 0,
                    webhook_subscribed INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS conversations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    facebook_page_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    customer_name TEXT,
                    unread_messages INTEGER NOT NULL DEFAULT 0,
                    message_count INTEGER NOT NULL DEFAULT 0,
                    last_message_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (company_id, facebook_page_id, user_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    direction TEXT NOT NULL,
                    sender_type TEXT NOT NULL,
                    content TEXT NOT NULL,
                    external_id TEXT,
                    delivery_attempts INTEGER NOT NULL DEFAULT 0,
                    next_attempt_at TEXT,
                    last_error TEXT,
                    dead_lettered INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    delivered_at TEXT
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS categories (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    description TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (company_id, name)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                    name TEXT NOT NULL,
                    description TEXT,
                    price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
                    stock INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0),
                    sku TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS coupons (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                    code TEXT NOT NULL,
                    discount_type TEXT NOT NULL,
                    discount_value INTEGER NOT NULL,
                    min_order_cents INTEGER,
                    usage_limit INTEGER,
                    used_count INTEGER NOT NULL DEFAULT 0,
                    starts_at TEXT,
                    expires_at TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (company_id, code)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_facebook_settings_company ON facebook_settings(company_id)",
                "CREATE INDEX IF NOT EXISTS idx_conversations_company ON conversations(company_id, updated_at)",
                "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at)",
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_messages_external ON messages(company_id, external_id) WHERE external_id IS NOT NULL",
                "CREATE INDEX IF NOT EXISTS idx_messages_pending ON messages(created_at) WHERE external_id IS NULL AND dead_lettered = 0",
                "CREATE INDEX IF NOT EXISTS idx_products_company ON products(company_id, name)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn company_store(&self) -> Arc<dyn CompanyStore> {
        self.stores.companies.clone()
    }

    pub fn page_store(&self) -> Arc<dyn PageStore> {
        self.stores.pages.clone()
    }

    pub fn conversation_store(&self) -> Arc<dyn ConversationStore> {
        self.stores.conversations.clone()
    }

    pub fn message_store(&self) -> Arc<dyn MessageStore> {
        self.stores.messages.clone()
    }

    pub fn category_store(&self) -> Arc<dyn CategoryStore> {
        self.stores.categories.clone()
    }

    pub fn product_store(&self) -> Arc<dyn ProductStore> {
        self.stores.products.clone()
    }

    pub fn coupon_store(&self) -> Arc<dyn CouponStore> {
        self.stores.coupons.clone()
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }
}

fn missing_pool() -> DatabaseError {
    DatabaseError::Connection("database connection is not initialized".to_string())
}

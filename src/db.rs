pub use self::error::DatabaseError;
pub use self::manager::{DatabaseManager, DbType};
pub use self::models::{
    Category, CategoryInput, Company, CompanyStatus, Conversation, ConversationFilter, Coupon,
    CouponInput, DiscountType, FacebookSettings, Message, MessageDirection, NewCompany,
    NewConversation, NewMessage, PageCredentials, Product, ProductFilter, ProductInput,
    SenderType,
};
pub use self::stores::{
    CategoryStore, CompanyStore, ConversationStore, CouponStore, MessageStore, PageStore,
    ProductStore,
};

pub mod error;
pub mod manager;
pub mod models;
pub mod queries;
#[cfg(feature = "postgres")]
pub mod schema;
pub mod stores;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub mod schema_sqlite;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "mysql")]
pub mod schema_mysql;

/// Migrated SQLite database in a temporary directory for store and service tests.
#[cfg(all(test, feature = "sqlite"))]
pub(crate) async fn test_manager() -> (DatabaseManager, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("shopdesk.db");
    let manager = DatabaseManager::sqlite(path.to_string_lossy().into_owned());
    manager.migrate().await.expect("migrate test database");
    (manager, dir)
}

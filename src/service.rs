use std::sync::Arc;

use thiserror::Error;

use crate::db::{Company, DatabaseError, DatabaseManager};

pub use self::accounts::{AccountService, CompanyUpdate, PageConnection};
pub use self::catalog::{CatalogService, CouponQuote};
pub use self::diagnostics::{DiagnosticsReport, diagnose};
pub use self::messaging::{InboundMessage, IngestOutcome, MessagingService, QueueCounts};

pub mod accounts;
pub mod catalog;
pub mod diagnostics;
pub mod messaging;

pub const DEFAULT_PAGE_LIMIT: i64 = 100;
pub const MAX_PAGE_LIMIT: i64 = 1000;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Invalid(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("storage failure: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for ServiceError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(what) => ServiceError::NotFound(what),
            DatabaseError::Conflict(detail) => ServiceError::Conflict(detail),
            other => ServiceError::Database(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Clamps list paging to `1..=1000` rows and a non-negative offset.
pub fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

/// Every service entry point that takes a company id goes through here first.
async fn require_company(db: &DatabaseManager, company_id: i64) -> ServiceResult<Company> {
    db.company_store()
        .get_company(company_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("company {company_id}")))
}

fn required_text(field: &str, value: &str) -> ServiceResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Invalid(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Clone)]
pub struct Services {
    pub accounts: AccountService,
    pub messaging: MessagingService,
    pub catalog: CatalogService,
    db: Arc<DatabaseManager>,
}

impl Services {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self {
            accounts: AccountService::new(db.clone()),
            messaging: MessagingService::new(db.clone()),
            catalog: CatalogService::new(db.clone()),
            db,
        }
    }

    pub fn db(&self) -> &Arc<DatabaseManager> {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(None, None => (100, 0); "defaults")]
    #[test_case(Some(0), Some(-5) => (1, 0); "floors")]
    #[test_case(Some(5000), Some(20) => (1000, 20); "caps limit")]
    #[test_case(Some(25), Some(50) => (25, 50); "passes through")]
    fn paging_is_clamped(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
        clamp_page(limit, offset)
    }

    #[test]
    fn database_errors_keep_their_meaning() {
        assert!(matches!(
            ServiceError::from(DatabaseError::Conflict("dup".into())),
            ServiceError::Conflict(_)
        ));
        assert!(matches!(
            ServiceError::from(DatabaseError::NotFound("row".into())),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            ServiceError::from(DatabaseError::Query("boom".into())),
            ServiceError::Database(_)
        ));
    }

    #[test]
    fn blank_text_is_rejected() {
        assert!(required_text("name", "   ").is_err());
        assert_eq!(required_text("name", "  Swan ").expect("trimmed"), "Swan");
        assert_eq!(optional_text(Some("  ")), None);
    }
}

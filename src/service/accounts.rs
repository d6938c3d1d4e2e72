use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use super::{ServiceError, ServiceResult, optional_text, require_company, required_text};
use crate::db::{Company, CompanyStatus, DatabaseManager, FacebookSettings, NewCompany, PageCredentials};
use crate::utils::password::{hash_password, verify_password};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex must compile")
});

static PAGE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{1,64}$").expect("page id regex must compile"));

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanyUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<CompanyStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageConnection {
    pub page_id: String,
    #[serde(default)]
    pub page_name: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub webhook_verified: bool,
    #[serde(default)]
    pub webhook_subscribed: bool,
}

pub fn normalize_email(email: &str) -> ServiceResult<String> {
    let email = email.trim().to_lowercase();
    if !EMAIL_RE.is_match(&email) {
        return Err(ServiceError::Invalid(format!("invalid email address: {email}")));
    }
    Ok(email)
}

/// Company accounts and their connected Facebook Pages.
#[derive(Clone)]
pub struct AccountService {
    db: Arc<DatabaseManager>,
}

impl AccountService {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &SecretString,
    ) -> ServiceResult<Company> {
        let name = required_text("name", name)?;
        let email = normalize_email(email)?;
        if password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
            return Err(ServiceError::Invalid(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let store = self.db.company_store();
        if store.get_company_by_email(&email).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "a company is already registered with {email}"
            )));
        }

        let password_hash = hash_password(password).map_err(ServiceError::Invalid)?;
        let company = store
            .create_company(&NewCompany {
                name,
                email,
                password_hash,
                status: CompanyStatus::Active,
                created_at: Utc::now(),
            })
            .await?;

        info!("registered company {} ({})", company.id, company.email);
        Ok(company)
    }

    /// Unknown email, wrong password and suspended accounts all answer 401.
    pub async fn login(&self, email: &str, password: &SecretString) -> ServiceResult<Company> {
        let email = email.trim().to_lowercase();
        let invalid = || ServiceError::Unauthorized("invalid email or password".to_string());

        let company = self
            .db
            .company_store()
            .get_company_by_email(&email)
            .await?
            .ok_or_else(invalid)?;

        if !verify_password(password, &company.password_hash) {
            return Err(invalid());
        }
        if company.status == CompanyStatus::Suspended {
            return Err(ServiceError::Unauthorized("company is suspended".to_string()));
        }
        Ok(company)
    }

    pub async fn get_company(&self, id: i64) -> ServiceResult<Company> {
        require_company(&self.db, id).await
    }

    pub async fn list_companies(&self, limit: i64, offset: i64) -> ServiceResult<Vec<Company>> {
        Ok(self.db.company_store().list_companies(limit, offset).await?)
    }

    pub async fn count_companies(&self) -> ServiceResult<i64> {
        Ok(self.db.company_store().count_companies().await?)
    }

    pub async fn update_company(&self, id: i64, update: &CompanyUpdate) -> ServiceResult<Company> {
        let current = require_company(&self.db, id).await?;
        let name = match update.name.as_deref() {
            Some(name) => required_text("name", name)?,
            None => current.name,
        };
        let status = update.status.unwrap_or(current.status);

        self.db
            .company_store()
            .update_company(id, &name, status, Utc::now())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("company {id}")))
    }

    pub async fn delete_company(&self, id: i64) -> ServiceResult<()> {
        if !self.db.company_store().delete_company(id).await? {
            return Err(ServiceError::NotFound(format!("company {id}")));
        }
        info!("deleted company {id}");
        Ok(())
    }

    pub async fn list_pages(&self, company_id: i64) -> ServiceResult<Vec<FacebookSettings>> {
        require_company(&self.db, company_id).await?;
        Ok(self.db.page_store().list_pages(company_id).await?)
    }

    /// Connects a page, or refreshes it when this company already owns it.
    /// The flag in the result is true when a new row was created.
    pub async fn connect_page(
        &self,
        company_id: i64,
        connection: &PageConnection,
    ) -> ServiceResult<(FacebookSettings, bool)> {
        require_company(&self.db, company_id).await?;

        let page_id = connection.page_id.trim().to_string();
        if !PAGE_ID_RE.is_match(&page_id) {
            return Err(ServiceError::Invalid(format!("invalid page id: {page_id}")));
        }
        let access_token = required_text("access_token", &connection.access_token)?;

        let credentials = PageCredentials {
            company_id,
            page_id: page_id.clone(),
            page_name: optional_text(connection.page_name.as_deref()),
            access_token,
            webhook_verified: connection.webhook_verified,
            webhook_subscribed: connection.webhook_subscribed,
        };

        let store = self.db.page_store();
        let now = Utc::now();
        match store.get_page(&page_id).await? {
            Some(existing) if existing.company_id != company_id => Err(ServiceError::Conflict(
                format!("page {page_id} is connected to another company"),
            )),
            Some(existing) => {
                let page = store.update_page(existing.id, &credentials, now).await?;
                info!("updated page {} for company {}", page_id, company_id);
                Ok((page, false))
            }
            None => {
                let page = store.create_page(&credentials, now).await?;
                info!("connected page {} to company {}", page_id, company_id);
                Ok((page, true))
            }
        }
    }

    pub async fn disconnect_page(&self, company_id: i64, page_id: &str) -> ServiceResult<()> {
        require_company(&self.db, company_id).await?;
        if !self.db.page_store().delete_page(company_id, page_id).await? {
            return Err(ServiceError::NotFound(format!("page {page_id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::db::test_manager;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn page(page_id: &str) -> PageConnection {
        PageConnection {
            page_id: page_id.to_string(),
            page_name: Some("Swan Shop".to_string()),
            access_token: "EAAB-token".to_string(),
            webhook_verified: true,
            webhook_subscribed: true,
        }
    }

    #[test_case("owner@swan.shop" => true; "plain")]
    #[test_case("  Owner@Swan.Shop " => true; "trimmed and mixed case")]
    #[test_case("owner.swan.shop" => false; "missing at")]
    #[test_case("owner@swan" => false; "missing tld")]
    #[test_case("" => false; "empty")]
    fn email_validation(email: &str) -> bool {
        normalize_email(email).is_ok()
    }

    #[tokio::test]
    async fn register_then_fetch_returns_same_company() {
        let (db, _dir) = test_manager().await;
        let accounts = AccountService::new(Arc::new(db));

        let created = accounts
            .register("Swan Shop", " Owner@Swan.Shop ", &secret("correct horse"))
            .await
            .expect("register");
        let fetched = accounts.get_company(created.id).await.expect("fetch");

        assert_eq!(fetched.name, "Swan Shop");
        assert_eq!(fetched.email, "owner@swan.shop");
        assert_eq!(fetched.status, CompanyStatus::Active);
        assert_ne!(fetched.password_hash, "correct horse");
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let (db, _dir) = test_manager().await;
        let accounts = AccountService::new(Arc::new(db));

        accounts
            .register("Swan Shop", "owner@swan.shop", &secret("correct horse"))
            .await
            .expect("first register");
        let err = accounts
            .register("Other", "OWNER@swan.shop", &secret("correct horse"))
            .await
            .expect_err("duplicate email");
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn short_password_is_invalid() {
        let (db, _dir) = test_manager().await;
        let accounts = AccountService::new(Arc::new(db));
        let err = accounts
            .register("Swan Shop", "owner@swan.shop", &secret("short"))
            .await
            .expect_err("short password");
        assert!(matches!(err, ServiceError::Invalid(_)));
    }

    #[tokio::test]
    async fn login_checks_password_and_status() {
        let (db, _dir) = test_manager().await;
        let accounts = AccountService::new(Arc::new(db));
        let company = accounts
            .register("Swan Shop", "owner@swan.shop", &secret("correct horse"))
            .await
            .expect("register");

        let logged_in = accounts
            .login("OWNER@swan.shop", &secret("correct horse"))
            .await
            .expect("login");
        assert_eq!(logged_in.id, company.id);

        let err = accounts
            .login("owner@swan.shop", &secret("wrong horse"))
            .await
            .expect_err("wrong password");
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        accounts
            .update_company(
                company.id,
                &CompanyUpdate {
                    name: None,
                    status: Some(CompanyStatus::Suspended),
                },
            )
            .await
            .expect("suspend");
        let err = accounts
            .login("owner@swan.shop", &secret("correct horse"))
            .await
            .expect_err("suspended");
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn delete_then_fetch_is_not_found() {
        let (db, _dir) = test_manager().await;
        let accounts = AccountService::new(Arc::new(db));
        let company = accounts
            .register("Swan Shop", "owner@swan.shop", &secret("correct horse"))
            .await
            .expect("register");
        accounts.connect_page(company.id, &page("1001")).await.expect("connect");

        accounts.delete_company(company.id).await.expect("delete");

        assert!(matches!(
            accounts.get_company(company.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            accounts.delete_company(company.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn page_connection_upserts_within_company_only() {
        let (db, _dir) = test_manager().await;
        let accounts = AccountService::new(Arc::new(db));
        let a = accounts
            .register("Swan Shop", "a@swan.shop", &secret("correct horse"))
            .await
            .expect("register a");
        let b = accounts
            .register("Crow Shop", "b@crow.shop", &secret("correct horse"))
            .await
            .expect("register b");

        let (first, created) = accounts.connect_page(a.id, &page("1001")).await.expect("connect");
        assert!(created);

        let mut renamed = page("1001");
        renamed.page_name = Some("Swan Shop Official".to_string());
        let (second, created) = accounts.connect_page(a.id, &renamed).await.expect("upsert");
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.page_name.as_deref(), Some("Swan Shop Official"));

        let err = accounts
            .connect_page(b.id, &page("1001"))
            .await
            .expect_err("owned by a");
        assert!(matches!(err, ServiceError::Conflict(_)));

        assert!(matches!(
            accounts.disconnect_page(b.id, "1001").await,
            Err(ServiceError::NotFound(_))
        ));
        accounts.disconnect_page(a.id, "1001").await.expect("disconnect");
        assert!(accounts.list_pages(a.id).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn page_id_must_be_numeric() {
        let (db, _dir) = test_manager().await;
        let accounts = AccountService::new(Arc::new(db));
        let company = accounts
            .register("Swan Shop", "owner@swan.shop", &secret("correct horse"))
            .await
            .expect("register");
        let err = accounts
            .connect_page(company.id, &page("not-a-page"))
            .await
            .expect_err("bad page id");
        assert!(matches!(err, ServiceError::Invalid(_)));
    }
}

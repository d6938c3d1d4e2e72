use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::{ServiceError, ServiceResult, optional_text, require_company, required_text};
use crate::db::{
    Category, CategoryInput, Coupon, CouponInput, DatabaseManager, DiscountType, Product,
    ProductFilter, ProductInput,
};

static SKU_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").expect("valid sku regex"));

static COUPON_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9_-]{3,32}$").expect("valid coupon code regex"));

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CouponQuote {
    pub code: String,
    pub order_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
}

/// Discount for an order, never more than the order itself.
pub fn discount_for(coupon: &Coupon, order_cents: i64) -> i64 {
    let order = i128::from(order_cents.max(0));
    let value = i128::from(coupon.discount_value);
    // widened so any i64 order total multiplies without overflow
    let discount = match coupon.discount_type {
        DiscountType::Percentage => order * value / 100,
        DiscountType::Fixed => value,
    };
    i64::try_from(discount.clamp(0, order)).unwrap_or(0)
}

fn normalize_category(input: &CategoryInput) -> ServiceResult<CategoryInput> {
    Ok(CategoryInput {
        name: required_text("name", &input.name)?,
        description: optional_text(input.description.as_deref()),
    })
}

fn normalize_product(input: &ProductInput) -> ServiceResult<ProductInput> {
    if input.price_cents < 0 {
        return Err(ServiceError::Invalid("price_cents must not be negative".to_string()));
    }
    if input.stock < 0 {
        return Err(ServiceError::Invalid("stock must not be negative".to_string()));
    }
    let sku = optional_text(input.sku.as_deref());
    if let Some(ref sku) = sku
        && !SKU_RE.is_match(sku)
    {
        return Err(ServiceError::Invalid(format!("invalid sku: {sku}")));
    }

    Ok(ProductInput {
        name: required_text("name", &input.name)?,
        description: optional_text(input.description.as_deref()),
        category_id: input.category_id,
        price_cents: input.price_cents,
        stock: input.stock,
        sku,
        is_active: input.is_active,
    })
}

fn normalize_coupon(input: &CouponInput) -> ServiceResult<CouponInput> {
    let code = input.code.trim().to_uppercase();
    if !COUPON_CODE_RE.is_match(&code) {
        return Err(ServiceError::Invalid(format!("invalid coupon code: {code}")));
    }

    match input.discount_type {
        DiscountType::Percentage if !(1..=100).contains(&input.discount_value) => {
            return Err(ServiceError::Invalid(
                "percentage discount must be between 1 and 100".to_string(),
            ));
        }
        DiscountType::Fixed if input.discount_value <= 0 => {
            return Err(ServiceError::Invalid(
                "fixed discount must be greater than zero".to_string(),
            ));
        }
        _ => {}
    }

    if input.min_order_cents.is_some_and(|min| min < 0) {
        return Err(ServiceError::Invalid("min_order_cents must not be negative".to_string()));
    }
    if input.usage_limit.is_some_and(|limit| limit <= 0) {
        return Err(ServiceError::Invalid("usage_limit must be positive".to_string()));
    }
    if let (Some(starts), Some(expires)) = (input.starts_at, input.expires_at)
        && expires <= starts
    {
        return Err(ServiceError::Invalid("expires_at must be after starts_at".to_string()));
    }

    Ok(CouponInput {
        code,
        ..input.clone()
    })
}

fn check_redeemable(coupon: &Coupon, order_cents: i64, now: DateTime<Utc>) -> ServiceResult<()> {
    let reject = |reason: &str| Err(ServiceError::Invalid(format!("coupon {}: {reason}", coupon.code)));

    if !coupon.is_active {
        return reject("inactive");
    }
    if coupon.starts_at.is_some_and(|starts| now < starts) {
        return reject("not started yet");
    }
    if coupon.expires_at.is_some_and(|expires| now >= expires) {
        return reject("expired");
    }
    if coupon.usage_limit.is_some_and(|limit| coupon.used_count >= limit) {
        return reject("usage limit reached");
    }
    if coupon.min_order_cents.is_some_and(|min| order_cents < min) {
        return reject("order below minimum");
    }
    Ok(())
}

/// Products, categories and coupons. Every call is scoped to one company.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseManager>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn list_categories(
        &self,
        company_id: i64,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<Vec<Category>> {
        require_company(&self.db, company_id).await?;
        Ok(self
            .db
            .category_store()
            .list_categories(company_id, limit, offset)
            .await?)
    }

    pub async fn get_category(&self, company_id: i64, id: i64) -> ServiceResult<Category> {
        self.db
            .category_store()
            .get_category(company_id, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("category {id}")))
    }

    pub async fn create_category(
        &self,
        company_id: i64,
        input: &CategoryInput,
    ) -> ServiceResult<Category> {
        require_company(&self.db, company_id).await?;
        let input = normalize_category(input)?;
        Ok(self
            .db
            .category_store()
            .create_category(company_id, &input, Utc::now())
            .await?)
    }

    pub async fn update_category(
        &self,
        company_id: i64,
        id: i64,
        input: &CategoryInput,
    ) -> ServiceResult<Category> {
        let input = normalize_category(input)?;
        self.db
            .category_store()
            .update_category(company_id, id, &input, Utc::now())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("category {id}")))
    }

    /// Products in the category stay, with their category cleared.
    pub async fn delete_category(&self, company_id: i64, id: i64) -> ServiceResult<()> {
        if !self.db.category_store().delete_category(company_id, id).await? {
            return Err(ServiceError::NotFound(format!("category {id}")));
        }
        Ok(())
    }

    pub async fn list_products(
        &self,
        company_id: i64,
        filter: &ProductFilter,
    ) -> ServiceResult<Vec<Product>> {
        require_company(&self.db, company_id).await?;
        Ok(self
            .db
            .product_store()
            .list_products(company_id, filter)
            .await?)
    }

    pub async fn get_product(&self, company_id: i64, id: i64) -> ServiceResult<Product> {
        self.db
            .product_store()
            .get_product(company_id, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {id}")))
    }

    async fn check_category(&self, company_id: i64, category_id: Option<i64>) -> ServiceResult<()> {
        let Some(category_id) = category_id else {
            return Ok(());
        };
        let found = self
            .db
            .category_store()
            .get_category(company_id, category_id)
            .await?;
        if found.is_none() {
            return Err(ServiceError::Invalid(format!(
                "category {category_id} does not belong to company {company_id}"
            )));
        }
        Ok(())
    }

    pub async fn create_product(
        &self,
        company_id: i64,
        input: &ProductInput,
    ) -> ServiceResult<Product> {
        require_company(&self.db, company_id).await?;
        let input = normalize_product(input)?;
        self.check_category(company_id, input.category_id).await?;
        Ok(self
            .db
            .product_store()
            .create_product(company_id, &input, Utc::now())
            .await?)
    }

    pub async fn update_product(
        &self,
        company_id: i64,
        id: i64,
        input: &ProductInput,
    ) -> ServiceResult<Product> {
        let input = normalize_product(input)?;
        self.check_category(company_id, input.category_id).await?;
        self.db
            .product_store()
            .update_product(company_id, id, &input, Utc::now())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {id}")))
    }

    pub async fn delete_product(&self, company_id: i64, id: i64) -> ServiceResult<()> {
        if !self.db.product_store().delete_product(company_id, id).await? {
            return Err(ServiceError::NotFound(format!("product {id}")));
        }
        Ok(())
    }

    pub async fn list_coupons(
        &self,
        company_id: i64,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<Vec<Coupon>> {
        require_company(&self.db, company_id).await?;
        Ok(self
            .db
            .coupon_store()
            .list_coupons(company_id, limit, offset)
            .await?)
    }

    pub async fn get_coupon(&self, company_id: i64, id: i64) -> ServiceResult<Coupon> {
        self.db
            .coupon_store()
            .get_coupon(company_id, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("coupon {id}")))
    }

    pub async fn create_coupon(&self, company_id: i64, input: &CouponInput) -> ServiceResult<Coupon> {
        require_company(&self.db, company_id).await?;
        let input = normalize_coupon(input)?;
        Ok(self
            .db
            .coupon_store()
            .create_coupon(company_id, &input, Utc::now())
            .await?)
    }

    pub async fn update_coupon(
        &self,
        company_id: i64,
        id: i64,
        input: &CouponInput,
    ) -> ServiceResult<Coupon> {
        let input = normalize_coupon(input)?;
        self.db
            .coupon_store()
            .update_coupon(company_id, id, &input, Utc::now())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("coupon {id}")))
    }

    pub async fn delete_coupon(&self, company_id: i64, id: i64) -> ServiceResult<()> {
        if !self.db.coupon_store().delete_coupon(company_id, id).await? {
            return Err(ServiceError::NotFound(format!("coupon {id}")));
        }
        Ok(())
    }

    /// Prices an order with a coupon. Does not consume a use. Every
    /// rejection, an unknown code included, is invalid input.
    pub async fn validate_coupon(
        &self,
        company_id: i64,
        code: &str,
        order_cents: i64,
    ) -> ServiceResult<CouponQuote> {
        if order_cents < 0 {
            return Err(ServiceError::Invalid("order_cents must not be negative".to_string()));
        }
        let code = code.trim().to_uppercase();
        let coupon = self
            .db
            .coupon_store()
            .get_coupon_by_code(company_id, &code)
            .await?
            .ok_or_else(|| ServiceError::Invalid(format!("unknown coupon code {code}")))?;

        check_redeemable(&coupon, order_cents, Utc::now())?;
        let discount_cents = discount_for(&coupon, order_cents);
        Ok(CouponQuote {
            code: coupon.code,
            order_cents,
            discount_cents,
            total_cents: order_cents - discount_cents,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use secrecy::SecretString;
    use test_case::test_case;

    use super::*;
    use crate::db::{Company, test_manager};
    use crate::service::AccountService;

    async fn company(db: &Arc<DatabaseManager>, email: &str) -> Company {
        AccountService::new(db.clone())
            .register("Shop", email, &SecretString::from("correct horse".to_string()))
            .await
            .expect("register")
    }

    fn product(name: &str) -> ProductInput {
        ProductInput {
            name: name.to_string(),
            description: None,
            category_id: None,
            price_cents: 2599,
            stock: 4,
            sku: Some("DRESS-BLUE-M".to_string()),
            is_active: true,
        }
    }

    fn coupon(code: &str, discount_type: DiscountType, value: i64) -> CouponInput {
        CouponInput {
            code: code.to_string(),
            discount_type,
            discount_value: value,
            min_order_cents: None,
            usage_limit: None,
            starts_at: None,
            expires_at: None,
            is_active: true,
        }
    }

    fn stored(input: &CouponInput) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: 1,
            company_id: 1,
            code: input.code.clone(),
            discount_type: input.discount_type,
            discount_value: input.discount_value,
            min_order_cents: input.min_order_cents,
            usage_limit: input.usage_limit,
            used_count: 0,
            starts_at: input.starts_at,
            expires_at: input.expires_at,
            is_active: input.is_active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test_case(DiscountType::Percentage, 0 => false; "zero percent")]
    #[test_case(DiscountType::Percentage, 100 => true; "full percent")]
    #[test_case(DiscountType::Percentage, 101 => false; "over hundred")]
    #[test_case(DiscountType::Fixed, 0 => false; "zero fixed")]
    #[test_case(DiscountType::Fixed, 500 => true; "fixed amount")]
    fn discount_bounds(discount_type: DiscountType, value: i64) -> bool {
        normalize_coupon(&coupon("SPRING", discount_type, value)).is_ok()
    }

    #[test_case(DiscountType::Percentage, 15, 10_000 => 1_500; "percentage")]
    #[test_case(DiscountType::Percentage, 33, 999 => 329; "percentage floors")]
    #[test_case(DiscountType::Fixed, 500, 10_000 => 500; "fixed")]
    #[test_case(DiscountType::Fixed, 5_000, 1_200 => 1_200; "fixed capped at order")]
    #[test_case(DiscountType::Percentage, 50, 200_000_000_000_000_000 => 100_000_000_000_000_000; "large order")]
    #[test_case(DiscountType::Percentage, 100, i64::MAX => i64::MAX; "maximum order")]
    fn discount_amounts(discount_type: DiscountType, value: i64, order: i64) -> i64 {
        discount_for(&stored(&coupon("SPRING", discount_type, value)), order)
    }

    #[test]
    fn coupon_code_is_upper_cased() {
        let input = normalize_coupon(&coupon(" spring-24 ", DiscountType::Fixed, 100))
            .expect("valid coupon");
        assert_eq!(input.code, "SPRING-24");
    }

    #[test]
    fn coupon_window_must_be_ordered() {
        let now = Utc::now();
        let mut input = coupon("SPRING", DiscountType::Fixed, 100);
        input.starts_at = Some(now);
        input.expires_at = Some(now - Duration::days(1));
        assert!(normalize_coupon(&input).is_err());
    }

    #[test]
    fn redeemable_checks_window_usage_and_minimum() {
        let now = Utc::now();
        let mut c = stored(&coupon("SPRING", DiscountType::Fixed, 100));
        assert!(check_redeemable(&c, 1_000, now).is_ok());

        c.expires_at = Some(now - Duration::minutes(1));
        assert!(check_redeemable(&c, 1_000, now).is_err());
        c.expires_at = None;

        c.usage_limit = Some(2);
        c.used_count = 2;
        assert!(check_redeemable(&c, 1_000, now).is_err());
        c.usage_limit = None;

        c.min_order_cents = Some(5_000);
        assert!(check_redeemable(&c, 1_000, now).is_err());
    }

    #[test]
    fn negative_price_and_bad_sku_are_rejected() {
        let mut input = product("Dress");
        input.price_cents = -1;
        assert!(normalize_product(&input).is_err());

        let mut input = product("Dress");
        input.sku = Some("has spaces".to_string());
        assert!(normalize_product(&input).is_err());
    }

    #[tokio::test]
    async fn products_are_isolated_between_companies() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let a = company(&db, "a@swan.shop").await;
        let b = company(&db, "b@crow.shop").await;
        let catalog = CatalogService::new(db.clone());

        let created = catalog
            .create_product(a.id, &product("Blue dress"))
            .await
            .expect("create");

        let filter = ProductFilter {
            limit: 100,
            ..Default::default()
        };
        let listed_b = catalog.list_products(b.id, &filter).await.expect("list b");
        assert!(listed_b.iter().all(|p| p.id != created.id));
        assert!(matches!(
            catalog.get_product(b.id, created.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            catalog.delete_product(b.id, created.id).await,
            Err(ServiceError::NotFound(_))
        ));

        let listed_a = catalog.list_products(a.id, &filter).await.expect("list a");
        assert_eq!(listed_a.len(), 1);
    }

    #[tokio::test]
    async fn product_category_must_be_same_company() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let a = company(&db, "a@swan.shop").await;
        let b = company(&db, "b@crow.shop").await;
        let catalog = CatalogService::new(db.clone());

        let category = catalog
            .create_category(
                b.id,
                &CategoryInput {
                    name: "Dresses".to_string(),
                    description: None,
                },
            )
            .await
            .expect("category");

        let mut input = product("Blue dress");
        input.category_id = Some(category.id);
        let err = catalog
            .create_product(a.id, &input)
            .await
            .expect_err("foreign category");
        assert!(matches!(err, ServiceError::Invalid(_)));
    }

    #[tokio::test]
    async fn deleting_category_detaches_products() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let a = company(&db, "a@swan.shop").await;
        let catalog = CatalogService::new(db.clone());

        let category = catalog
            .create_category(
                a.id,
                &CategoryInput {
                    name: "Dresses".to_string(),
                    description: None,
                },
            )
            .await
            .expect("category");
        let mut input = product("Blue dress");
        input.category_id = Some(category.id);
        let created = catalog.create_product(a.id, &input).await.expect("product");

        catalog
            .delete_category(a.id, category.id)
            .await
            .expect("delete category");
        let fetched = catalog.get_product(a.id, created.id).await.expect("product");
        assert_eq!(fetched.category_id, None);
    }

    #[tokio::test]
    async fn duplicate_category_name_conflicts() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let a = company(&db, "a@swan.shop").await;
        let catalog = CatalogService::new(db.clone());
        let input = CategoryInput {
            name: "Dresses".to_string(),
            description: None,
        };

        catalog.create_category(a.id, &input).await.expect("first");
        let err = catalog
            .create_category(a.id, &input)
            .await
            .expect_err("duplicate");
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn coupon_validation_prices_order() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let a = company(&db, "a@swan.shop").await;
        let b = company(&db, "b@crow.shop").await;
        let catalog = CatalogService::new(db.clone());

        catalog
            .create_coupon(a.id, &coupon("spring", DiscountType::Percentage, 20))
            .await
            .expect("coupon");

        let quote = catalog
            .validate_coupon(a.id, "Spring", 5_000)
            .await
            .expect("quote");
        assert_eq!(quote.discount_cents, 1_000);
        assert_eq!(quote.total_cents, 4_000);

        assert!(matches!(
            catalog.validate_coupon(b.id, "SPRING", 5_000).await,
            Err(ServiceError::Invalid(_))
        ));
    }
}

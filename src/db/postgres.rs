use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::pg::PgConnection;

use super::DatabaseError;
use super::error::{query_error, task_error};
use super::models::{
    Category, CategoryInput, Company, CompanyStatus, Conversation, ConversationFilter, Coupon,
    CouponInput, FacebookSettings, Message, MessageDirection, NewCompany, NewConversation,
    NewMessage, PageCredentials, Product, ProductFilter, ProductInput, SenderType,
};
use super::queries::{
    IdRow, LIKE_ESCAPE, contains_pattern, parse_text, tenant_mismatch_messages_sql,
    unlinked_conversations_sql,
};
use super::stores::{
    CategoryStore, CompanyStore, ConversationStore, CouponStore, MessageStore, PageStore,
    ProductStore,
};
use crate::db::manager::Pool;
use crate::db::schema::{
    categories, companies, conversations, coupons, facebook_settings, messages, products,
};

async fn with_connection<T, F>(pool: Pool, operation: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        operation(&mut conn)
    })
    .await
    .map_err(task_error)?
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = companies)]
struct DbCompany {
    id: i64,
    name: String,
    email: String,
    password_hash: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DbCompany {
    fn to_company(&self) -> Result<Company, DatabaseError> {
        Ok(Company {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            password_hash: self.password_hash.clone(),
            status: parse_text(&self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = companies)]
struct NewCompanyRow<'a> {
    name: &'a str,
    email: &'a str,
    password_hash: &'a str,
    status: &'a str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(AsChangeset)]
#[diesel(table_name = companies)]
struct UpdateCompanyRow<'a> {
    name: &'a str,
    status: &'a str,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = facebook_settings)]
struct DbFacebookSettings {
    id: i64,
    company_id: i64,
    page_id: String,
    page_name: Option<String>,
    access_token: String,
    webhook_verified: bool,
    webhook_subscribed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DbFacebookSettings {
    fn to_settings(&self) -> Result<FacebookSettings, DatabaseError> {
        Ok(FacebookSettings {
            id: self.id,
            company_id: self.company_id,
            page_id: self.page_id.clone(),
            page_name: self.page_name.clone(),
            access_token: self.access_token.clone(),
            webhook_verified: self.webhook_verified,
            webhook_subscribed: self.webhook_subscribed,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = facebook_settings)]
struct NewFacebookSettingsRow<'a> {
    company_id: i64,
    page_id: &'a str,
    page_name: Option<&'a str>,
    access_token: &'a str,
    webhook_verified: bool,
    webhook_subscribed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(AsChangeset)]
#[diesel(table_name = facebook_settings, treat_none_as_null = true)]
struct UpdateFacebookSettingsRow<'a> {
    page_name: Option<&'a str>,
    access_token: &'a str,
    webhook_verified: bool,
    webhook_subscribed: bool,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = conversations)]
struct DbConversation {
    id: i64,
    company_id: i64,
    facebook_page_id: String,
    user_id: String,
    customer_name: Option<String>,
    unread_messages: i64,
    message_count: i64,
    last_message_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DbConversation {
    fn to_conversation(&self) -> Result<Conversation, DatabaseError> {
        Ok(Conversation {
            id: self.id,
            company_id: self.company_id,
            facebook_page_id: self.facebook_page_id.clone(),
            user_id: self.user_id.clone(),
            customer_name: self.customer_name.clone(),
            unread_messages: self.unread_messages,
            message_count: self.message_count,
            last_message_at: self.last_message_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = conversations)]
struct NewConversationRow<'a> {
    company_id: i64,
    facebook_page_id: &'a str,
    user_id: &'a str,
    customer_name: Option<&'a str>,
    unread_messages: i64,
    message_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = messages)]
struct DbMessage {
    id: i64,
    conversation_id: i64,
    company_id: i64,
    direction: String,
    sender_type: String,
    content: String,
    external_id: Option<String>,
    delivery_attempts: i32,
    next_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    dead_lettered: bool,
    created_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
}

impl DbMessage {
    fn to_message(&self) -> Result<Message, DatabaseError> {
        Ok(Message {
            id: self.id,
            conversation_id: self.conversation_id,
            company_id: self.company_id,
            direction: parse_text(&self.direction)?,
            sender_type: parse_text(&self.sender_type)?,
            content: self.content.clone(),
            external_id: self.external_id.clone(),
            delivery_attempts: self.delivery_attempts,
            next_attempt_at: self.next_attempt_at,
            last_error: self.last_error.clone(),
            dead_lettered: self.dead_lettered,
            created_at: self.created_at,
            delivered_at: self.delivered_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
struct NewMessageRow<'a> {
    conversation_id: i64,
    company_id: i64,
    direction: &'a str,
    sender_type: &'a str,
    content: &'a str,
    external_id: Option<&'a str>,
    delivery_attempts: i32,
    dead_lettered: bool,
    created_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = categories)]
struct DbCategory {
    id: i64,
    company_id: i64,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DbCategory {
    fn to_category(&self) -> Result<Category, DatabaseError> {
        Ok(Category {
            id: self.id,
            company_id: self.company_id,
            name: self.name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = categories)]
struct NewCategoryRow<'a> {
    company_id: i64,
    name: &'a str,
    description: Option<&'a str>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(AsChangeset)]
#[diesel(table_name = categories, treat_none_as_null = true)]
struct UpdateCategoryRow<'a> {
    name: &'a str,
    description: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = products)]
struct DbProduct {
    id: i64,
    company_id: i64,
    category_id: Option<i64>,
    name: String,
    description: Option<String>,
    price_cents: i64,
    stock: i32,
    sku: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DbProduct {
    fn to_product(&self) -> Result<Product, DatabaseError> {
        Ok(Product {
            id: self.id,
            company_id: self.company_id,
            category_id: self.category_id,
            name: self.name.clone(),
            description: self.description.clone(),
            price_cents: self.price_cents,
            stock: self.stock,
            sku: self.sku.clone(),
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = products)]
struct NewProductRow<'a> {
    company_id: i64,
    category_id: Option<i64>,
    name: &'a str,
    description: Option<&'a str>,
    price_cents: i64,
    stock: i32,
    sku: Option<&'a str>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(AsChangeset)]
#[diesel(table_name = products, treat_none_as_null = true)]
struct UpdateProductRow<'a> {
    category_id: Option<i64>,
    name: &'a str,
    description: Option<&'a str>,
    price_cents: i64,
    stock: i32,
    sku: Option<&'a str>,
    is_active: bool,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = coupons)]
struct DbCoupon {
    id: i64,
    company_id: i64,
    code: String,
    discount_type: String,
    discount_value: i64,
    min_order_cents: Option<i64>,
    usage_limit: Option<i32>,
    used_count: i32,
    starts_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DbCoupon {
    fn to_coupon(&self) -> Result<Coupon, DatabaseError> {
        Ok(Coupon {
            id: self.id,
            company_id: self.company_id,
            code: self.code.clone(),
            discount_type: parse_text(&self.discount_type)?,
            discount_value: self.discount_value,
            min_order_cents: self.min_order_cents,
            usage_limit: self.usage_limit,
            used_count: self.used_count,
            starts_at: self.starts_at,
            expires_at: self.expires_at,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = coupons)]
struct NewCouponRow<'a> {
    company_id: i64,
    code: &'a str,
    discount_type: &'a str,
    discount_value: i64,
    min_order_cents: Option<i64>,
    usage_limit: Option<i32>,
    used_count: i32,
    starts_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(AsChangeset)]
#[diesel(table_name = coupons, treat_none_as_null = true)]
struct UpdateCouponRow<'a> {
    code: &'a str,
    discount_type: &'a str,
    discount_value: i64,
    min_order_cents: Option<i64>,
    usage_limit: Option<i32>,
    starts_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    updated_at: DateTime<Utc>,
}

pub struct PostgresCompanyStore {
    pool: Pool,
}

impl PostgresCompanyStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CompanyStore for PostgresCompanyStore {
    async fn create_company(&self, company: &NewCompany) -> Result<Company, DatabaseError> {
        let company = company.clone();
        with_connection(self.pool.clone(), move |conn| {
            let created_at = company.created_at;
            let row = NewCompanyRow {
                name: &company.name,
                email: &company.email,
                password_hash: &company.password_hash,
                status: company.status.as_str(),
                created_at: created_at,
                updated_at: created_at,
            };
            diesel::insert_into(companies::table)
                .values(&row)
                .returning(DbCompany::as_returning())
                .get_result::<DbCompany>(conn)
                .map_err(query_error)?
                .to_company()
        })
        .await
    }

    async fn get_company(&self, id: i64) -> Result<Option<Company>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            companies::table
                .find(id)
                .select(DbCompany::as_select())
                .first::<DbCompany>(conn)
                .optional()
                .map_err(query_error)?
                .map(|row| row.to_company())
                .transpose()
        })
        .await
    }

    async fn get_company_by_email(&self, email: &str) -> Result<Option<Company>, DatabaseError> {
        let email = email.to_string();
        with_connection(self.pool.clone(), move |conn| {
            companies::table
                .filter(companies::email.eq(email))
                .select(DbCompany::as_select())
                .first::<DbCompany>(conn)
                .optional()
                .map_err(query_error)?
                .map(|row| row.to_company())
                .transpose()
        })
        .await
    }

    async fn list_companies(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Company>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            companies::table
                .order(companies::id.asc())
                .limit(limit)
                .offset(offset)
                .select(DbCompany::as_select())
                .load::<DbCompany>(conn)
                .map_err(query_error)?
                .iter()
                .map(DbCompany::to_company)
                .collect()
        })
        .await
    }

    async fn count_companies(&self) -> Result<i64, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            companies::table
                .count()
                .get_result(conn)
                .map_err(query_error)
        })
        .await
    }

    async fn update_company(
        &self,
        id: i64,
        name: &str,
        status: CompanyStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Company>, DatabaseError> {
        let name = name.to_string();
        with_connection(self.pool.clone(), move |conn| {
            let changes = UpdateCompanyRow {
                name: &name,
                status: status.as_str(),
                updated_at: updated_at,
            };
            diesel::update(companies::table.find(id))
                .set(&changes)
                .returning(DbCompany::as_returning())
                .get_result::<DbCompany>(conn)
                .optional()
                .map_err(query_error)?
                .map(|row| row.to_company())
                .transpose()
        })
        .await
    }

    async fn delete_company(&self, id: i64) -> Result<bool, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            diesel::delete(companies::table.find(id))
                .execute(conn)
                .map(|count| count > 0)
                .map_err(query_error)
        })
        .await
    }
}

pub struct PostgresPageStore {
    pool: Pool,
}

impl PostgresPageStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PageStore for PostgresPageStore {
    async fn get_page(&self, page_id: &str) -> Result<Option<FacebookSettings>, DatabaseError> {
        let page_id = page_id.to_string();
        with_connection(self.pool.clone(), move |conn| {
            facebook_settings::table
                .filter(facebook_settings::page_id.eq(page_id))
                .select(DbFacebookSettings::as_select())
                .first::<DbFacebookSettings>(conn)
                .optional()
                .map_err(query_error)?
                .map(|row| row.to_settings())
                .transpose()
        })
        .await
    }

    async fn list_pages(&self, company_id: i64) -> Result<Vec<FacebookSettings>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            facebook_settings::table
                .filter(facebook_settings::company_id.eq(company_id))
                .order(facebook_settings::id.asc())
                .select(DbFacebookSettings::as_select())
                .load::<DbFacebookSettings>(conn)
                .map_err(query_error)?
                .iter()
                .map(DbFacebookSettings::to_settings)
                .collect()
        })
        .await
    }

    async fn create_page(
        &self,
        page: &PageCredentials,
        now: DateTime<Utc>,
    ) -> Result<FacebookSettings, DatabaseError> {
        let page = page.clone();
        with_connection(self.pool.clone(), move |conn| {
            let row = NewFacebookSettingsRow {
                company_id: page.company_id,
                page_id: &page.page_id,
                page_name: page.page_name.as_deref(),
                access_token: &page.access_token,
                webhook_verified: page.webhook_verified,
                webhook_subscribed: page.webhook_subscribed,
                created_at: now,
                updated_at: now,
            };
            diesel::insert_into(facebook_settings::table)
                .values(&row)
                .returning(DbFacebookSettings::as_returning())
                .get_result::<DbFacebookSettings>(conn)
                .map_err(query_error)?
                .to_settings()
        })
        .await
    }

    async fn update_page(
        &self,
        id: i64,
        page: &PageCredentials,
        now: DateTime<Utc>,
    ) -> Result<FacebookSettings, DatabaseError> {
        let page = page.clone();
        with_connection(self.pool.clone(), move |conn| {
            let changes = UpdateFacebookSettingsRow {
                page_name: page.page_name.as_deref(),
                access_token: &page.access_token,
                webhook_verified: page.webhook_verified,
                webhook_subscribed: page.webhook_subscribed,
                updated_at: now,
            };
            diesel::update(facebook_settings::table.find(id))
                .set(&changes)
                .returning(DbFacebookSettings::as_returning())
                .get_result::<DbFacebookSettings>(conn)
                .map_err(query_error)?
                .to_settings()
        })
        .await
    }

    async fn delete_page(&self, company_id: i64, page_id: &str) -> Result<bool, DatabaseError> {
        let page_id = page_id.to_string();
        with_connection(self.pool.clone(), move |conn| {
            diesel::delete(
                facebook_settings::table
                    .filter(facebook_settings::company_id.eq(company_id))
                    .filter(facebook_settings::page_id.eq(page_id)),
            )
            .execute(conn)
            .map(|count| count > 0)
            .map_err(query_error)
        })
        .await
    }
}

pub struct PostgresConversationStore {
    pool: Pool,
}

impl PostgresConversationStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn load_conversations_by_id(
    conn: &mut PgConnection,
    ids: Vec<i64>,
) -> Result<Vec<Conversation>, DatabaseError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    conversations::table
        .filter(conversations::id.eq_any(ids))
        .order(conversations::id.asc())
        .select(DbConversation::as_select())
        .load::<DbConversation>(conn)
        .map_err(query_error)?
        .iter()
        .map(DbConversation::to_conversation)
        .collect()
}

#[async_trait]
impl ConversationStore for PostgresConversationStore {
    async fn find_conversation(
        &self,
        company_id: i64,
        page_id: &str,
        user_id: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let page_id = page_id.to_string();
        let user_id = user_id.to_string();
        with_connection(self.pool.clone(), move |conn| {
            conversations::table
                .filter(conversations::company_id.eq(company_id))
                .filter(conversations::facebook_page_id.eq(page_id))
                .filter(conversations::user_id.eq(user_id))
                .select(DbConversation::as_select())
                .first::<DbConversation>(conn)
                .optional()
                .map_err(query_error)?
                .map(|row| row.to_conversation())
                .transpose()
        })
        .await
    }

    async fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> Result<Conversation, DatabaseError> {
        let conversation = conversation.clone();
        with_connection(self.pool.clone(), move |conn| {
            let created_at = conversation.created_at;
            let row = NewConversationRow {
                company_id: conversation.company_id,
                facebook_page_id: &conversation.facebook_page_id,
                user_id: &conversation.user_id,
                customer_name: conversation.customer_name.as_deref(),
                unread_messages: 0,
                message_count: 0,
                created_at: created_at,
                updated_at: created_at,
            };
            diesel::insert_into(conversations::table)
                .values(&row)
                .returning(DbConversation::as_returning())
                .get_result::<DbConversation>(conn)
                .map_err(query_error)?
                .to_conversation()
        })
        .await
    }

    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            conversations::table
                .find(id)
                .select(DbConversation::as_select())
                .first::<DbConversation>(conn)
                .optional()
                .map_err(query_error)?
                .map(|row| row.to_conversation())
                .transpose()
        })
        .await
    }

    async fn list_conversations(
        &self,
        company_id: i64,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, DatabaseError> {
        let filter = filter.clone();
        with_connection(self.pool.clone(), move |conn| {
            let mut query = conversations::table
                .filter(conversations::company_id.eq(company_id))
                .into_boxed();
            if let Some(page_id) = filter.page_id {
                query = query.filter(conversations::facebook_page_id.eq(page_id));
            }
            if filter.unread_only {
                query = query.filter(conversations::unread_messages.gt(0_i64));
            }
            query
                .order((conversations::updated_at.desc(), conversations::id.desc()))
                .limit(filter.limit)
                .offset(filter.offset)
                .select(DbConversation::as_select())
                .load::<DbConversation>(conn)
                .map_err(query_error)?
                .iter()
                .map(DbConversation::to_conversation)
                .collect()
        })
        .await
    }

    async fn record_message(
        &self,
        id: i64,
        inbound: bool,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            let target = conversations::table.find(id);
            let result = if inbound {
                diesel::update(target)
                    .set((
                        conversations::unread_messages.eq(conversations::unread_messages + 1_i64),
                        conversations::message_count.eq(conversations::message_count + 1_i64),
                        conversations::last_message_at.eq(Some(at)),
                        conversations::updated_at.eq(at),
                    ))
                    .execute(conn)
            } else {
                diesel::update(target)
                    .set((
                        conversations::message_count.eq(conversations::message_count + 1_i64),
                        conversations::last_message_at.eq(Some(at)),
                        conversations::updated_at.eq(at),
                    ))
                    .execute(conn)
            };
            let updated = result.map_err(query_error)?;

            if updated == 0 {
                return Err(DatabaseError::NotFound(format!("conversation {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn set_customer_name(
        &self,
        id: i64,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let name = name.to_string();
        with_connection(self.pool.clone(), move |conn| {
            diesel::update(conversations::table.find(id))
                .set((
                    conversations::customer_name.eq(Some(name)),
                    conversations::updated_at.eq(at),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(query_error)
        })
        .await
    }

    async fn mark_read(
        &self,
        company_id: i64,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            diesel::update(
                conversations::table
                    .filter(conversations::id.eq(id))
                    .filter(conversations::company_id.eq(company_id)),
            )
            .set((
                conversations::unread_messages.eq(0_i64),
                conversations::updated_at.eq(at),
            ))
            .execute(conn)
            .map(|count| count > 0)
            .map_err(query_error)
        })
        .await
    }

    async fn find_self_addressed(
        &self,
        company_id: Option<i64>,
    ) -> Result<Vec<Conversation>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            let mut query = conversations::table
                .filter(conversations::user_id.eq(conversations::facebook_page_id))
                .into_boxed();
            if let Some(company_id) = company_id {
                query = query.filter(conversations::company_id.eq(company_id));
            }
            query
                .order(conversations::id.asc())
                .select(DbConversation::as_select())
                .load::<DbConversation>(conn)
                .map_err(query_error)?
                .iter()
                .map(DbConversation::to_conversation)
                .collect()
        })
        .await
    }

    async fn find_unlinked(
        &self,
        company_id: Option<i64>,
    ) -> Result<Vec<Conversation>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            let ids = diesel::sql_query(unlinked_conversations_sql(company_id))
                .load::<IdRow>(conn)
                .map_err(query_error)?
                .into_iter()
                .map(|row| row.id)
                .collect();
            load_conversations_by_id(conn, ids)
        })
        .await
    }
}

pub struct PostgresMessageStore {
    pool: Pool,
}

impl PostgresMessageStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn load_messages(
    query: messages::BoxedQuery<'_, diesel::pg::Pg>,
    conn: &mut PgConnection,
) -> Result<Vec<Message>, DatabaseError> {
    query
        .select(DbMessage::as_select())
        .load::<DbMessage>(conn)
        .map_err(query_error)?
        .iter()
        .map(DbMessage::to_message)
        .collect()
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn insert_message(&self, message: &NewMessage) -> Result<Message, DatabaseError> {
        let message = message.clone();
        with_connection(self.pool.clone(), move |conn| {
            let created_at = message.created_at;
            // inbound rows arrive already delivered
            let delivered_at = match message.direction {
                MessageDirection::Inbound => Some(created_at),
                MessageDirection::Outbound => None,
            };
            let row = NewMessageRow {
                conversation_id: message.conversation_id,
                company_id: message.company_id,
                direction: message.direction.as_str(),
                sender_type: message.sender_type.as_str(),
                content: &message.content,
                external_id: message.external_id.as_deref(),
                delivery_attempts: 0,
                dead_lettered: false,
                created_at,
                delivered_at,
            };
            diesel::insert_into(messages::table)
                .values(&row)
                .returning(DbMessage::as_returning())
                .get_result::<DbMessage>(conn)
                .map_err(query_error)?
                .to_message()
        })
        .await
    }

    async fn get_message(&self, id: i64) -> Result<Option<Message>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            messages::table
                .find(id)
                .select(DbMessage::as_select())
                .first::<DbMessage>(conn)
                .optional()
                .map_err(query_error)?
                .map(|row| row.to_message())
                .transpose()
        })
        .await
    }

    async fn get_by_external_id(
        &self,
        company_id: i64,
        external_id: &str,
    ) -> Result<Option<Message>, DatabaseError> {
        let external_id = external_id.to_string();
        with_connection(self.pool.clone(), move |conn| {
            messages::table
                .filter(messages::company_id.eq(company_id))
                .filter(messages::external_id.eq(external_id))
                .select(DbMessage::as_select())
                .first::<DbMessage>(conn)
                .optional()
                .map_err(query_error)?
                .map(|row| row.to_message())
                .transpose()
        })
        .await
    }

    async fn list_for_conversation(
        &self,
        conversation_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            let query = messages::table
                .filter(messages::conversation_id.eq(conversation_id))
                .order((messages::created_at.asc(), messages::id.asc()))
                .limit(limit)
                .offset(offset)
                .into_boxed();
            load_messages(query, conn)
        })
        .await
    }

    async fn list_pending(
        &self,
        now: DateTime<Utc>,
        sender_types: &[SenderType],
        limit: i64,
    ) -> Result<Vec<Message>, DatabaseError> {
        let kinds: Vec<&'static str> = sender_types.iter().map(SenderType::as_str).collect();
        with_connection(self.pool.clone(), move |conn| {
            let query = messages::table
                .filter(messages::direction.eq(MessageDirection::Outbound.as_str()))
                .filter(messages::sender_type.eq_any(kinds))
                .filter(messages::external_id.is_null())
                .filter(messages::dead_lettered.eq(false))
                .filter(
                    messages::next_attempt_at
                        .is_null()
                        .or(messages::next_attempt_at.le(now)),
                )
                .order((messages::created_at.asc(), messages::id.asc()))
                .limit(limit)
                .into_boxed();
            load_messages(query, conn)
        })
        .await
    }

    async fn mark_delivered(
        &self,
        id: i64,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let external_id = external_id.to_string();
        with_connection(self.pool.clone(), move |conn| {
            diesel::update(
                messages::table
                    .filter(messages::id.eq(id))
                    .filter(messages::external_id.is_null()),
            )
            .set((
                messages::external_id.eq(Some(external_id)),
                messages::delivered_at.eq(Some(at)),
                messages::next_attempt_at.eq(None::<DateTime<Utc>>),
                messages::last_error.eq(None::<String>),
            ))
            .execute(conn)
            .map(|count| count > 0)
            .map_err(query_error)
        })
        .await
    }

    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let error = error.to_string();
        with_connection(self.pool.clone(), move |conn| {
            diesel::update(
                messages::table
                    .filter(messages::id.eq(id))
                    .filter(messages::external_id.is_null()),
            )
            .set((
                messages::delivery_attempts.eq(messages::delivery_attempts + 1),
                messages::last_error.eq(Some(error)),
                messages::next_attempt_at.eq(Some(next_attempt_at)),
            ))
            .execute(conn)
            .map(|_| ())
            .map_err(query_error)
        })
        .await
    }

    async fn dead_letter(&self, id: i64, error: &str) -> Result<(), DatabaseError> {
        let error = error.to_string();
        with_connection(self.pool.clone(), move |conn| {
            diesel::update(
                messages::table
                    .filter(messages::id.eq(id))
                    .filter(messages::external_id.is_null()),
            )
            .set((
                messages::delivery_attempts.eq(messages::delivery_attempts + 1),
                messages::last_error.eq(Some(error)),
                messages::next_attempt_at.eq(None::<DateTime<Utc>>),
                messages::dead_lettered.eq(true),
            ))
            .execute(conn)
            .map(|_| ())
            .map_err(query_error)
        })
        .await
    }

    async fn requeue(&self, company_id: i64, id: i64) -> Result<bool, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            diesel::update(
                messages::table
                    .filter(messages::id.eq(id))
                    .filter(messages::company_id.eq(company_id))
                    .filter(messages::dead_lettered.eq(true)),
            )
            .set((
                messages::dead_lettered.eq(false),
                messages::delivery_attempts.eq(0),
                messages::next_attempt_at.eq(None::<DateTime<Utc>>),
                messages::last_error.eq(None::<String>),
            ))
            .execute(conn)
            .map(|count| count > 0)
            .map_err(query_error)
        })
        .await
    }

    async fn list_dead_letters(
        &self,
        company_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            let query = messages::table
                .filter(messages::company_id.eq(company_id))
                .filter(messages::dead_lettered.eq(true))
                .order((messages::created_at.desc(), messages::id.desc()))
                .limit(limit)
                .offset(offset)
                .into_boxed();
            load_messages(query, conn)
        })
        .await
    }

    async fn count_pending(&self) -> Result<i64, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            messages::table
                .filter(messages::direction.eq(MessageDirection::Outbound.as_str()))
                .filter(messages::external_id.is_null())
                .filter(messages::dead_lettered.eq(false))
                .count()
                .get_result(conn)
                .map_err(query_error)
        })
        .await
    }

    async fn count_dead_letters(&self) -> Result<i64, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            messages::table
                .filter(messages::dead_lettered.eq(true))
                .count()
                .get_result(conn)
                .map_err(query_error)
        })
        .await
    }

    async fn find_tenant_mismatches(
        &self,
        company_id: Option<i64>,
    ) -> Result<Vec<Message>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            let ids: Vec<i64> = diesel::sql_query(tenant_mismatch_messages_sql(company_id))
                .load::<IdRow>(conn)
                .map_err(query_error)?
                .into_iter()
                .map(|row| row.id)
                .collect();
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let query = messages::table
                .filter(messages::id.eq_any(ids))
                .order(messages::id.asc())
                .into_boxed();
            load_messages(query, conn)
        })
        .await
    }
}

pub struct PostgresCategoryStore {
    pool: Pool,
}

impl PostgresCategoryStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CategoryStore for PostgresCategoryStore {
    async fn create_category(
        &self,
        company_id: i64,
        input: &CategoryInput,
        now: DateTime<Utc>,
    ) -> Result<Category, DatabaseError> {
        let input = input.clone();
        with_connection(self.pool.clone(), move |conn| {
            let row = NewCategoryRow {
                company_id,
                name: &input.name,
                description: input.description.as_deref(),
                created_at: now,
                updated_at: now,
            };
            diesel::insert_into(categories::table)
                .values(&row)
                .returning(DbCategory::as_returning())
                .get_result::<DbCategory>(conn)
                .map_err(query_error)?
                .to_category()
        })
        .await
    }

    async fn get_category(
        &self,
        company_id: i64,
        id: i64,
    ) -> Result<Option<Category>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            categories::table
                .filter(categories::id.eq(id))
                .filter(categories::company_id.eq(company_id))
                .select(DbCategory::as_select())
                .first::<DbCategory>(conn)
                .optional()
                .map_err(query_error)?
                .map(|row| row.to_category())
                .transpose()
        })
        .await
    }

    async fn list_categories(
        &self,
        company_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Category>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            categories::table
                .filter(categories::company_id.eq(company_id))
                .order((categories::name.asc(), categories::id.asc()))
                .limit(limit)
                .offset(offset)
                .select(DbCategory::as_select())
                .load::<DbCategory>(conn)
                .map_err(query_error)?
                .iter()
                .map(DbCategory::to_category)
                .collect()
        })
        .await
    }

    async fn update_category(
        &self,
        company_id: i64,
        id: i64,
        input: &CategoryInput,
        now: DateTime<Utc>,
    ) -> Result<Option<Category>, DatabaseError> {
        let input = input.clone();
        with_connection(self.pool.clone(), move |conn| {
            let changes = UpdateCategoryRow {
                name: &input.name,
                description: input.description.as_deref(),
                updated_at: now,
            };
            diesel::update(
                categories::table
                    .filter(categories::id.eq(id))
                    .filter(categories::company_id.eq(company_id)),
            )
            .set(&changes)
            .returning(DbCategory::as_returning())
            .get_result::<DbCategory>(conn)
            .optional()
            .map_err(query_error)?
            .map(|row| row.to_category())
            .transpose()
        })
        .await
    }

    async fn delete_category(&self, company_id: i64, id: i64) -> Result<bool, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            diesel::delete(
                categories::table
                    .filter(categories::id.eq(id))
                    .filter(categories::company_id.eq(company_id)),
            )
            .execute(conn)
            .map(|count| count > 0)
            .map_err(query_error)
        })
        .await
    }
}

pub struct PostgresProductStore {
    pool: Pool,
}

impl PostgresProductStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductStore for PostgresProductStore {
    async fn create_product(
        &self,
        company_id: i64,
        input: &ProductInput,
        now: DateTime<Utc>,
    ) -> Result<Product, DatabaseError> {
        let input = input.clone();
        with_connection(self.pool.clone(), move |conn| {
            let row = NewProductRow {
                company_id,
                category_id: input.category_id,
                name: &input.name,
                description: input.description.as_deref(),
                price_cents: input.price_cents,
                stock: input.stock,
                sku: input.sku.as_deref(),
                is_active: input.is_active,
                created_at: now,
                updated_at: now,
            };
            diesel::insert_into(products::table)
                .values(&row)
                .returning(DbProduct::as_returning())
                .get_result::<DbProduct>(conn)
                .map_err(query_error)?
                .to_product()
        })
        .await
    }

    async fn get_product(&self, company_id: i64, id: i64) -> Result<Option<Product>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            products::table
                .filter(products::id.eq(id))
                .filter(products::company_id.eq(company_id))
                .select(DbProduct::as_select())
                .first::<DbProduct>(conn)
                .optional()
                .map_err(query_error)?
                .map(|row| row.to_product())
                .transpose()
        })
        .await
    }

    async fn list_products(
        &self,
        company_id: i64,
        filter: &ProductFilter,
    ) -> Result<Vec<Product>, DatabaseError> {
        let filter = filter.clone();
        with_connection(self.pool.clone(), move |conn| {
            let mut query = products::table
                .filter(products::company_id.eq(company_id))
                .into_boxed();
            if let Some(category_id) = filter.category_id {
                query = query.filter(products::category_id.eq(category_id));
            }
            if let Some(search) = filter.search {
                query = query.filter(
                    products::name
                        .ilike(contains_pattern(&search))
                        .escape(LIKE_ESCAPE),
                );
            }
            if !filter.include_inactive {
                query = query.filter(products::is_active.eq(true));
            }
            query
                .order((products::name.asc(), products::id.asc()))
                .limit(filter.limit)
                .offset(filter.offset)
                .select(DbProduct::as_select())
                .load::<DbProduct>(conn)
                .map_err(query_error)?
                .iter()
                .map(DbProduct::to_product)
                .collect()
        })
        .await
    }

    async fn update_product(
        &self,
        company_id: i64,
        id: i64,
        input: &ProductInput,
        now: DateTime<Utc>,
    ) -> Result<Option<Product>, DatabaseError> {
        let input = input.clone();
        with_connection(self.pool.clone(), move |conn| {
            let changes = UpdateProductRow {
                category_id: input.category_id,
                name: &input.name,
                description: input.description.as_deref(),
                price_cents: input.price_cents,
                stock: input.stock,
                sku: input.sku.as_deref(),
                is_active: input.is_active,
                updated_at: now,
            };
            diesel::update(
                products::table
                    .filter(products::id.eq(id))
                    .filter(products::company_id.eq(company_id)),
            )
            .set(&changes)
            .returning(DbProduct::as_returning())
            .get_result::<DbProduct>(conn)
            .optional()
            .map_err(query_error)?
            .map(|row| row.to_product())
            .transpose()
        })
        .await
    }

    async fn delete_product(&self, company_id: i64, id: i64) -> Result<bool, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            diesel::delete(
                products::table
                    .filter(products::id.eq(id))
                    .filter(products::company_id.eq(company_id)),
            )
            .execute(conn)
            .map(|count| count > 0)
            .map_err(query_error)
        })
        .await
    }
}

pub struct PostgresCouponStore {
    pool: Pool,
}

impl PostgresCouponStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CouponStore for PostgresCouponStore {
    async fn create_coupon(
        &self,
        company_id: i64,
        input: &CouponInput,
        now: DateTime<Utc>,
    ) -> Result<Coupon, DatabaseError> {
        let input = input.clone();
        with_connection(self.pool.clone(), move |conn| {
            let row = NewCouponRow {
                company_id,
                code: &input.code,
                discount_type: input.discount_type.as_str(),
                discount_value: input.discount_value,
                min_order_cents: input.min_order_cents,
                usage_limit: input.usage_limit,
                used_count: 0,
                starts_at: input.starts_at,
                expires_at: input.expires_at,
                is_active: input.is_active,
                created_at: now,
                updated_at: now,
            };
            diesel::insert_into(coupons::table)
                .values(&row)
                .returning(DbCoupon::as_returning())
                .get_result::<DbCoupon>(conn)
                .map_err(query_error)?
                .to_coupon()
        })
        .await
    }

    async fn get_coupon(&self, company_id: i64, id: i64) -> Result<Option<Coupon>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            coupons::table
                .filter(coupons::id.eq(id))
                .filter(coupons::company_id.eq(company_id))
                .select(DbCoupon::as_select())
                .first::<DbCoupon>(conn)
                .optional()
                .map_err(query_error)?
                .map(|row| row.to_coupon())
                .transpose()
        })
        .await
    }

    async fn get_coupon_by_code(
        &self,
        company_id: i64,
        code: &str,
    ) -> Result<Option<Coupon>, DatabaseError> {
        let code = code.to_string();
        with_connection(self.pool.clone(), move |conn| {
            coupons::table
                .filter(coupons::company_id.eq(company_id))
                .filter(coupons::code.eq(code))
                .select(DbCoupon::as_select())
                .first::<DbCoupon>(conn)
                .optional()
                .map_err(query_error)?
                .map(|row| row.to_coupon())
                .transpose()
        })
        .await
    }

    async fn list_coupons(
        &self,
        company_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Coupon>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            coupons::table
                .filter(coupons::company_id.eq(company_id))
                .order((coupons::code.asc(), coupons::id.asc()))
                .limit(limit)
                .offset(offset)
                .select(DbCoupon::as_select())
                .load::<DbCoupon>(conn)
                .map_err(query_error)?
                .iter()
                .map(DbCoupon::to_coupon)
                .collect()
        })
        .await
    }

    async fn update_coupon(
        &self,
        company_id: i64,
        id: i64,
        input: &CouponInput,
        now: DateTime<Utc>,
    ) -> Result<Option<Coupon>, DatabaseError> {
        let input = input.clone();
        with_connection(self.pool.clone(), move |conn| {
            let changes = UpdateCouponRow {
                code: &input.code,
                discount_type: input.discount_type.as_str(),
                discount_value: input.discount_value,
                min_order_cents: input.min_order_cents,
                usage_limit: input.usage_limit,
                starts_at: input.starts_at,
                expires_at: input.expires_at,
                is_active: input.is_active,
                updated_at: now,
            };
            diesel::update(
                coupons::table
                    .filter(coupons::id.eq(id))
                    .filter(coupons::company_id.eq(company_id)),
            )
            .set(&changes)
            .returning(DbCoupon::as_returning())
            .get_result::<DbCoupon>(conn)
            .optional()
            .map_err(query_error)?
            .map(|row| row.to_coupon())
            .transpose()
        })
        .await
    }

    async fn delete_coupon(&self, company_id: i64, id: i64) -> Result<bool, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            diesel::delete(
                coupons::table
                    .filter(coupons::id.eq(id))
                    .filter(coupons::company_id.eq(company_id)),
            )
            .execute(conn)
            .map(|count| count > 0)
            .map_err(query_error)
        })
        .await
    }
}

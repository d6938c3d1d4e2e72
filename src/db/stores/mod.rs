use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::DatabaseError;
use super::models::{
    Category, CategoryInput, Company, CompanyStatus, Conversation, ConversationFilter, Coupon,
    CouponInput, FacebookSettings, Message, NewCompany, NewConversation, NewMessage,
    PageCredentials, Product, ProductFilter, ProductInput, SenderType,
};

#[async_trait]
pub trait CompanyStore: Send + Sync {
    async fn create_company(&self, company: &NewCompany) -> Result<Company, DatabaseError>;
    async fn get_company(&self, id: i64) -> Result<Option<Company>, DatabaseError>;
    async fn get_company_by_email(&self, email: &str) -> Result<Option<Company>, DatabaseError>;
    async fn list_companies(&self, limit: i64, offset: i64)
    -> Result<Vec<Company>, DatabaseError>;
    async fn count_companies(&self) -> Result<i64, DatabaseError>;
    async fn update_company(
        &self,
        id: i64,
        name: &str,
        status: CompanyStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Company>, DatabaseError>;
    /// Removes the company and, through foreign keys, everything it owns.
    async fn delete_company(&self, id: i64) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait PageStore: Send + Sync {
    async fn get_page(&self, page_id: &str) -> Result<Option<FacebookSettings>, DatabaseError>;
    async fn list_pages(&self, company_id: i64) -> Result<Vec<FacebookSettings>, DatabaseError>;
    async fn create_page(
        &self,
        page: &PageCredentials,
        now: DateTime<Utc>,
    ) -> Result<FacebookSettings, DatabaseError>;
    async fn update_page(
        &self,
        id: i64,
        page: &PageCredentials,
        now: DateTime<Utc>,
    ) -> Result<FacebookSettings, DatabaseError>;
    async fn delete_page(&self, company_id: i64, page_id: &str) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_conversation(
        &self,
        company_id: i64,
        page_id: &str,
        user_id: &str,
    ) -> Result<Option<Conversation>, DatabaseError>;
    async fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> Result<Conversation, DatabaseError>;
    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, DatabaseError>;
    async fn list_conversations(
        &self,
        company_id: i64,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, DatabaseError>;
    /// Bumps `message_count` and `last_message_at`; `unread_messages` only
    /// moves when `inbound` is set.
    async fn record_message(
        &self,
        id: i64,
        inbound: bool,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;
    async fn set_customer_name(
        &self,
        id: i64,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;
    async fn mark_read(
        &self,
        company_id: i64,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;
    /// Conversations whose user id equals the page id.
    async fn find_self_addressed(
        &self,
        company_id: Option<i64>,
    ) -> Result<Vec<Conversation>, DatabaseError>;
    /// Conversations whose page is not connected to the owning company.
    async fn find_unlinked(
        &self,
        company_id: Option<i64>,
    ) -> Result<Vec<Conversation>, DatabaseError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: &NewMessage) -> Result<Message, DatabaseError>;
    async fn get_message(&self, id: i64) -> Result<Option<Message>, DatabaseError>;
    async fn get_by_external_id(
        &self,
        company_id: i64,
        external_id: &str,
    ) -> Result<Option<Message>, DatabaseError>;
    async fn list_for_conversation(
        &self,
        conversation_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, DatabaseError>;
    /// Outbound, undelivered, not dead-lettered and due at `now`, oldest first.
    async fn list_pending(
        &self,
        now: DateTime<Utc>,
        sender_types: &[SenderType],
        limit: i64,
    ) -> Result<Vec<Message>, DatabaseError>;
    /// Stores the provider id. Returns false when an id was already stored.
    async fn mark_delivered(
        &self,
        id: i64,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;
    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;
    async fn dead_letter(&self, id: i64, error: &str) -> Result<(), DatabaseError>;
    async fn requeue(&self, company_id: i64, id: i64) -> Result<bool, DatabaseError>;
    async fn list_dead_letters(
        &self,
        company_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, DatabaseError>;
    async fn count_pending(&self) -> Result<i64, DatabaseError>;
    async fn count_dead_letters(&self) -> Result<i64, DatabaseError>;
    /// Messages whose company differs from their conversation's company.
    async fn find_tenant_mismatches(
        &self,
        company_id: Option<i64>,
    ) -> Result<Vec<Message>, DatabaseError>;
}

#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn create_category(
        &self,
        company_id: i64,
        input: &CategoryInput,
        now: DateTime<Utc>,
    ) -> Result<Category, DatabaseError>;
    async fn get_category(&self, company_id: i64, id: i64)
    -> Result<Option<Category>, DatabaseError>;
    async fn list_categories(
        &self,
        company_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Category>, DatabaseError>;
    async fn update_category(
        &self,
        company_id: i64,
        id: i64,
        input: &CategoryInput,
        now: DateTime<Utc>,
    ) -> Result<Option<Category>, DatabaseError>;
    async fn delete_category(&self, company_id: i64, id: i64) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn create_product(
        &self,
        company_id: i64,
        input: &ProductInput,
        now: DateTime<Utc>,
    ) -> Result<Product, DatabaseError>;
    async fn get_product(&self, company_id: i64, id: i64) -> Result<Option<Product>, DatabaseError>;
    async fn list_products(
        &self,
        company_id: i64,
        filter: &ProductFilter,
    ) -> Result<Vec<Product>, DatabaseError>;
    async fn update_product(
        &self,
        company_id: i64,
        id: i64,
        input: &ProductInput,
        now: DateTime<Utc>,
    ) -> Result<Option<Product>, DatabaseError>;
    async fn delete_product(&self, company_id: i64, id: i64) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn create_coupon(
        &self,
        company_id: i64,
        input: &CouponInput,
        now: DateTime<Utc>,
    ) -> Result<Coupon, DatabaseError>;
    async fn get_coupon(&self, company_id: i64, id: i64) -> Result<Option<Coupon>, DatabaseError>;
    async fn get_coupon_by_code(
        &self,
        company_id: i64,
        code: &str,
    ) -> Result<Option<Coupon>, DatabaseError>;
    async fn list_coupons(
        &self,
        company_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Coupon>, DatabaseError>;
    async fn update_coupon(
        &self,
        company_id: i64,
        id: i64,
        input: &CouponInput,
        now: DateTime<Utc>,
    ) -> Result<Option<Coupon>, DatabaseError>;
    async fn delete_coupon(&self, company_id: i64, id: i64) -> Result<bool, DatabaseError>;
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(
                        concat!("unknown ", stringify!($name), " value: {}"),
                        other
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(CompanyStatus {
    Active => "active",
    Suspended => "suspended",
});

text_enum!(MessageDirection {
    Inbound => "inbound",
    Outbound => "outbound",
});

text_enum!(SenderType {
    Customer => "customer",
    Bot => "bot",
    Agent => "agent",
});

text_enum!(DiscountType {
    Percentage => "percentage",
    Fixed => "fixed",
});

#[derive(Debug, Clone, Serialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub status: CompanyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCompany {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub status: CompanyStatus,
    pub created_at: DateTime<Utc>,
}

/// A Facebook Page connected to a company.
#[derive(Debug, Clone, Serialize)]
pub struct FacebookSettings {
    pub id: i64,
    pub company_id: i64,
    pub page_id: String,
    pub page_name: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub webhook_verified: bool,
    pub webhook_subscribed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FacebookSettings {
    pub fn has_access_token(&self) -> bool {
        !self.access_token.trim().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PageCredentials {
    pub company_id: i64,
    pub page_id: String,
    pub page_name: Option<String>,
    pub access_token: String,
    pub webhook_verified: bool,
    pub webhook_subscribed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub company_id: i64,
    pub facebook_page_id: String,
    pub user_id: String,
    pub customer_name: Option<String>,
    pub unread_messages: i64,
    pub message_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub company_id: i64,
    pub facebook_page_id: String,
    pub user_id: String,
    pub customer_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub page_id: Option<String>,
    pub unread_only: bool,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub company_id: i64,
    pub direction: MessageDirection,
    pub sender_type: SenderType,
    pub content: String,
    pub external_id: Option<String>,
    pub delivery_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub dead_lettered: bool,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_pending(&self) -> bool {
        self.direction == MessageDirection::Outbound
            && self.external_id.is_none()
            && !self.dead_lettered
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub company_id: i64,
    pub direction: MessageDirection,
    pub sender_type: SenderType,
    pub content: String,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: i64,
    pub company_id: i64,
    pub category_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub stock: i32,
    pub sku: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    pub price_cents: i64,
    #[serde(default)]
    pub stock: i32,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub category_id: Option<i64>,
    pub search: Option<String>,
    pub include_inactive: bool,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Coupon {
    pub id: i64,
    pub company_id: i64,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub min_order_cents: Option<i64>,
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CouponInput {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    #[serde(default)]
    pub min_order_cents: Option<i64>,
    #[serde(default)]
    pub usage_limit: Option<i32>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_round_trip_through_str() {
        assert_eq!("bot".parse::<SenderType>(), Ok(SenderType::Bot));
        assert_eq!(MessageDirection::Outbound.as_str(), "outbound");
        assert_eq!(DiscountType::Percentage.to_string(), "percentage");
        assert!("robot".parse::<SenderType>().is_err());
    }

    #[test]
    fn secrets_are_not_serialized() {
        let now = Utc::now();
        let company = Company {
            id: 1,
            name: "Swan Shop".to_string(),
            email: "owner@swan.shop".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            status: CompanyStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&company).expect("serialize company");
        assert!(value.get("password_hash").is_none());
        assert_eq!(value["status"], "active");

        let page = FacebookSettings {
            id: 1,
            company_id: 1,
            page_id: "1001".to_string(),
            page_name: None,
            access_token: "EAAB-token".to_string(),
            webhook_verified: true,
            webhook_subscribed: false,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&page).expect("serialize page");
        assert!(value.get("access_token").is_none());
    }
}

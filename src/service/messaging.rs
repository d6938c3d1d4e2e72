use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ServiceError, ServiceResult, optional_text, require_company, required_text};
use crate::db::{
    Conversation, ConversationFilter, DatabaseError, DatabaseManager, Message, MessageDirection,
    NewConversation, NewMessage, SenderType,
};
use crate::web::metrics::Metrics;

/// Messenger rejects longer text messages.
pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub page_id: String,
    pub sender_id: String,
    pub text: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub conversation: Conversation,
    pub message: Message,
    /// The provider id was already stored; nothing was written.
    pub duplicate: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: i64,
    pub dead_lettered: i64,
}

#[derive(Clone)]
pub struct MessagingService {
    db: Arc<DatabaseManager>,
}

impl MessagingService {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn list_conversations(
        &self,
        company_id: i64,
        filter: &ConversationFilter,
    ) -> ServiceResult<Vec<Conversation>> {
        require_company(&self.db, company_id).await?;
        Ok(self
            .db
            .conversation_store()
            .list_conversations(company_id, filter)
            .await?)
    }

    pub async fn get_conversation(
        &self,
        company_id: i64,
        conversation_id: i64,
    ) -> ServiceResult<Conversation> {
        self.db
            .conversation_store()
            .get_conversation(conversation_id)
            .await?
            .filter(|c| c.company_id == company_id)
            .ok_or_else(|| ServiceError::NotFound(format!("conversation {conversation_id}")))
    }

    pub async fn mark_read(
        &self,
        company_id: i64,
        conversation_id: i64,
    ) -> ServiceResult<Conversation> {
        let updated = self
            .db
            .conversation_store()
            .mark_read(company_id, conversation_id, Utc::now())
            .await?;
        if !updated {
            return Err(ServiceError::NotFound(format!("conversation {conversation_id}")));
        }
        self.get_conversation(company_id, conversation_id).await
    }

    pub async fn list_messages(
        &self,
        company_id: i64,
        conversation_id: i64,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<Vec<Message>> {
        self.get_conversation(company_id, conversation_id).await?;
        Ok(self
            .db
            .message_store()
            .list_for_conversation(conversation_id, limit, offset)
            .await?)
    }

    /// Records a customer message for a page the company has connected,
    /// creating the conversation on first contact.
    pub async fn ingest_inbound(
        &self,
        company_id: i64,
        inbound: &InboundMessage,
    ) -> ServiceResult<IngestOutcome> {
        require_company(&self.db, company_id).await?;

        let page_id = required_text("page_id", &inbound.page_id)?;
        let sender_id = required_text("sender_id", &inbound.sender_id)?;
        required_text("text", &inbound.text)?;

        self.db
            .page_store()
            .get_page(&page_id)
            .await?
            .filter(|page| page.company_id == company_id)
            .ok_or_else(|| ServiceError::NotFound(format!("page {page_id}")))?;

        if sender_id == page_id {
            return Err(ServiceError::Invalid(
                "sender id must differ from the page id".to_string(),
            ));
        }

        let external_id = optional_text(inbound.external_id.as_deref());
        let messages = self.db.message_store();
        if let Some(ref mid) = external_id
            && let Some(existing) = messages.get_by_external_id(company_id, mid).await?
        {
            debug!("inbound message {} already stored as {}", mid, existing.id);
            return self.duplicate_outcome(company_id, existing).await;
        }

        let customer_name = optional_text(inbound.customer_name.as_deref());
        let conversation = self
            .find_or_create_conversation(company_id, &page_id, &sender_id, customer_name.as_deref())
            .await?;

        let now = Utc::now();
        let inserted = messages
            .insert_message(&NewMessage {
                conversation_id: conversation.id,
                company_id,
                direction: MessageDirection::Inbound,
                sender_type: SenderType::Customer,
                content: inbound.text.clone(),
                external_id: external_id.clone(),
                created_at: now,
            })
            .await;
        let message = match (inserted, external_id) {
            (Ok(message), _) => message,
            // a concurrent delivery of the same provider id won the insert
            (Err(DatabaseError::Conflict(_)), Some(mid)) => {
                let existing = messages
                    .get_by_external_id(company_id, &mid)
                    .await?
                    .ok_or_else(|| ServiceError::Conflict(format!("inbound message {mid}")))?;
                debug!("inbound message {} stored concurrently as {}", mid, existing.id);
                return self.duplicate_outcome(company_id, existing).await;
            }
            (Err(err), _) => return Err(err.into()),
        };
        self.db
            .conversation_store()
            .record_message(conversation.id, true, now)
            .await?;
        Metrics::inbound_ingested();

        let conversation = self.get_conversation(company_id, conversation.id).await?;
        Ok(IngestOutcome {
            conversation,
            message,
            duplicate: false,
        })
    }

    async fn duplicate_outcome(
        &self,
        company_id: i64,
        existing: Message,
    ) -> ServiceResult<IngestOutcome> {
        let conversation = self
            .get_conversation(company_id, existing.conversation_id)
            .await?;
        Ok(IngestOutcome {
            conversation,
            message: existing,
            duplicate: true,
        })
    }

    async fn find_or_create_conversation(
        &self,
        company_id: i64,
        page_id: &str,
        user_id: &str,
        customer_name: Option<&str>,
    ) -> ServiceResult<Conversation> {
        let store = self.db.conversation_store();
        if let Some(existing) = store.find_conversation(company_id, page_id, user_id).await? {
            if let Some(name) = customer_name
                && existing.customer_name.as_deref() != Some(name)
            {
                store.set_customer_name(existing.id, name, Utc::now()).await?;
            }
            return Ok(existing);
        }

        let created = store
            .create_conversation(&NewConversation {
                company_id,
                facebook_page_id: page_id.to_string(),
                user_id: user_id.to_string(),
                customer_name: customer_name.map(str::to_string),
                created_at: Utc::now(),
            })
            .await;

        match created {
            Ok(conversation) => {
                info!(
                    "opened conversation {} for user {} on page {}",
                    conversation.id, user_id, page_id
                );
                Ok(conversation)
            }
            // lost a race with a concurrent ingest for the same thread
            Err(DatabaseError::Conflict(_)) => store
                .find_conversation(company_id, page_id, user_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("conversation for {user_id}"))),
            Err(err) => Err(err.into()),
        }
    }

    /// Queues a reply for the forwarder. Nothing is sent from here.
    pub async fn enqueue_outbound(
        &self,
        company_id: i64,
        conversation_id: i64,
        text: &str,
        sender_type: SenderType,
    ) -> ServiceResult<Message> {
        if sender_type == SenderType::Customer {
            return Err(ServiceError::Invalid(
                "outbound messages are sent by a bot or an agent".to_string(),
            ));
        }
        if text.trim().is_empty() {
            return Err(ServiceError::Invalid("text is required".to_string()));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ServiceError::Invalid(format!(
                "text exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }

        let conversation = self.get_conversation(company_id, conversation_id).await?;
        let now = Utc::now();
        let message = self
            .db
            .message_store()
            .insert_message(&NewMessage {
                conversation_id: conversation.id,
                company_id,
                direction: MessageDirection::Outbound,
                sender_type,
                content: text.to_string(),
                external_id: None,
                created_at: now,
            })
            .await?;
        self.db
            .conversation_store()
            .record_message(conversation.id, false, now)
            .await?;

        debug!("queued outbound message {} on conversation {}", message.id, conversation.id);
        Ok(message)
    }

    pub async fn list_dead_letters(
        &self,
        company_id: i64,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<Vec<Message>> {
        require_company(&self.db, company_id).await?;
        Ok(self
            .db
            .message_store()
            .list_dead_letters(company_id, limit, offset)
            .await?)
    }

    pub async fn requeue_dead_letter(&self, company_id: i64, message_id: i64) -> ServiceResult<Message> {
        let messages = self.db.message_store();
        if !messages.requeue(company_id, message_id).await? {
            return Err(ServiceError::NotFound(format!(
                "dead-lettered message {message_id}"
            )));
        }
        info!("requeued message {} for company {}", message_id, company_id);
        messages
            .get_message(message_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("message {message_id}")))
    }

    pub async fn queue_counts(&self) -> ServiceResult<QueueCounts> {
        let messages = self.db.message_store();
        Ok(QueueCounts {
            pending: messages.count_pending().await?,
            dead_lettered: messages.count_dead_letters().await?,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::db::{Company, test_manager};
    use crate::service::{AccountService, PageConnection};

    pub(crate) async fn company_with_page(
        db: &Arc<DatabaseManager>,
        email: &str,
        page_id: &str,
    ) -> Company {
        let accounts = AccountService::new(db.clone());
        let company = accounts
            .register("Swan Shop", email, &SecretString::from("correct horse".to_string()))
            .await
            .expect("register");
        accounts
            .connect_page(
                company.id,
                &PageConnection {
                    page_id: page_id.to_string(),
                    page_name: None,
                    access_token: "EAAB-token".to_string(),
                    webhook_verified: true,
                    webhook_subscribed: true,
                },
            )
            .await
            .expect("connect page");
        company
    }

    pub(crate) fn inbound(page_id: &str, sender_id: &str, mid: Option<&str>) -> InboundMessage {
        InboundMessage {
            page_id: page_id.to_string(),
            sender_id: sender_id.to_string(),
            text: "is the blue dress in stock?".to_string(),
            external_id: mid.map(str::to_string),
            customer_name: Some("Ada".to_string()),
        }
    }

    #[tokio::test]
    async fn unread_counts_only_inbound_and_resets_on_read() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let company = company_with_page(&db, "owner@swan.shop", "1001").await;
        let messaging = MessagingService::new(db.clone());

        let first = messaging
            .ingest_inbound(company.id, &inbound("1001", "2002", Some("m.1")))
            .await
            .expect("first inbound");
        assert_eq!(first.conversation.unread_messages, 1);

        let second = messaging
            .ingest_inbound(company.id, &inbound("1001", "2002", Some("m.2")))
            .await
            .expect("second inbound");
        assert_eq!(second.conversation.id, first.conversation.id);
        assert_eq!(second.conversation.unread_messages, 2);

        messaging
            .enqueue_outbound(company.id, first.conversation.id, "yes it is", SenderType::Agent)
            .await
            .expect("outbound");
        let conversation = messaging
            .get_conversation(company.id, first.conversation.id)
            .await
            .expect("fetch");
        assert_eq!(conversation.unread_messages, 2);
        assert_eq!(conversation.message_count, 3);
        assert!(conversation.last_message_at.is_some());

        let read = messaging
            .mark_read(company.id, conversation.id)
            .await
            .expect("mark read");
        assert_eq!(read.unread_messages, 0);
        assert_eq!(read.message_count, 3);
    }

    #[tokio::test]
    async fn duplicate_provider_id_is_not_stored_twice() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let company = company_with_page(&db, "owner@swan.shop", "1001").await;
        let messaging = MessagingService::new(db.clone());

        let first = messaging
            .ingest_inbound(company.id, &inbound("1001", "2002", Some("m.1")))
            .await
            .expect("first");
        let again = messaging
            .ingest_inbound(company.id, &inbound("1001", "2002", Some("m.1")))
            .await
            .expect("again");

        assert!(again.duplicate);
        assert_eq!(again.message.id, first.message.id);
        assert_eq!(again.conversation.unread_messages, 1);
        assert_eq!(again.conversation.message_count, 1);
    }

    #[tokio::test]
    async fn concurrent_redelivery_stores_one_message() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let company = company_with_page(&db, "owner@swan.shop", "1001").await;
        let messaging = MessagingService::new(db.clone());
        let message = inbound("1001", "2002", Some("m.1"));

        let (a, b) = tokio::join!(
            messaging.ingest_inbound(company.id, &message),
            messaging.ingest_inbound(company.id, &message),
        );
        let (a, b) = (a.expect("first delivery"), b.expect("second delivery"));

        assert_eq!(a.message.id, b.message.id);
        assert_eq!([a.duplicate, b.duplicate].iter().filter(|d| **d).count(), 1);
        let conversation = messaging
            .get_conversation(company.id, a.conversation.id)
            .await
            .expect("fetch");
        assert_eq!(conversation.unread_messages, 1);
        assert_eq!(conversation.message_count, 1);
    }

    #[tokio::test]
    async fn sender_equal_to_page_is_rejected() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let company = company_with_page(&db, "owner@swan.shop", "1001").await;
        let messaging = MessagingService::new(db.clone());

        let err = messaging
            .ingest_inbound(company.id, &inbound("1001", "1001", None))
            .await
            .expect_err("self addressed");
        assert!(matches!(err, ServiceError::Invalid(_)));
    }

    #[tokio::test]
    async fn inbound_for_foreign_page_is_not_found() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        company_with_page(&db, "a@swan.shop", "1001").await;
        let other = company_with_page(&db, "b@crow.shop", "3003").await;
        let messaging = MessagingService::new(db.clone());

        let err = messaging
            .ingest_inbound(other.id, &inbound("1001", "2002", None))
            .await
            .expect_err("page of another company");
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn customer_name_is_refreshed() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let company = company_with_page(&db, "owner@swan.shop", "1001").await;
        let messaging = MessagingService::new(db.clone());

        messaging
            .ingest_inbound(company.id, &inbound("1001", "2002", None))
            .await
            .expect("first");
        let mut renamed = inbound("1001", "2002", None);
        renamed.customer_name = Some("Ada Lovelace".to_string());
        let outcome = messaging
            .ingest_inbound(company.id, &renamed)
            .await
            .expect("second");
        assert_eq!(
            outcome.conversation.customer_name.as_deref(),
            Some("Ada Lovelace")
        );
    }

    #[tokio::test]
    async fn outbound_text_is_validated() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let company = company_with_page(&db, "owner@swan.shop", "1001").await;
        let messaging = MessagingService::new(db.clone());
        let outcome = messaging
            .ingest_inbound(company.id, &inbound("1001", "2002", None))
            .await
            .expect("inbound");
        let conversation_id = outcome.conversation.id;

        let blank = messaging
            .enqueue_outbound(company.id, conversation_id, "   ", SenderType::Bot)
            .await;
        assert!(matches!(blank, Err(ServiceError::Invalid(_))));

        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        let too_long = messaging
            .enqueue_outbound(company.id, conversation_id, &long, SenderType::Bot)
            .await;
        assert!(matches!(too_long, Err(ServiceError::Invalid(_))));

        let as_customer = messaging
            .enqueue_outbound(company.id, conversation_id, "hi", SenderType::Customer)
            .await;
        assert!(matches!(as_customer, Err(ServiceError::Invalid(_))));

        let queued = messaging
            .enqueue_outbound(company.id, conversation_id, "hi", SenderType::Bot)
            .await
            .expect("queued");
        assert!(queued.is_pending());
        assert_eq!(
            messaging.queue_counts().await.expect("counts"),
            QueueCounts {
                pending: 1,
                dead_lettered: 0
            }
        );
    }

    #[tokio::test]
    async fn conversations_are_tenant_scoped() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let a = company_with_page(&db, "a@swan.shop", "1001").await;
        let b = company_with_page(&db, "b@crow.shop", "3003").await;
        let messaging = MessagingService::new(db.clone());

        let outcome = messaging
            .ingest_inbound(a.id, &inbound("1001", "2002", None))
            .await
            .expect("inbound");

        assert!(matches!(
            messaging.get_conversation(b.id, outcome.conversation.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            messaging.mark_read(b.id, outcome.conversation.id).await,
            Err(ServiceError::NotFound(_))
        ));
        let listed = messaging
            .list_conversations(
                b.id,
                &ConversationFilter {
                    limit: 100,
                    ..Default::default()
                },
            )
            .await
            .expect("list");
        assert!(listed.is_empty());
    }
}

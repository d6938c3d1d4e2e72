//! Read-only integrity report.
//!
//! Rows found here are left untouched: the writes that produced them predate
//! the ingestion checks, and no automatic repair is known to be correct.

use serde::Serialize;
use tracing::warn;

use super::ServiceResult;
use crate::db::{Conversation, DatabaseManager, Message};

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub company_id: Option<i64>,
    /// Conversations whose user id equals the page id.
    pub self_addressed_conversations: Vec<Conversation>,
    /// Conversations on a page that is not connected to their company.
    pub unlinked_conversations: Vec<Conversation>,
    /// Messages whose company differs from their conversation's.
    pub tenant_mismatched_messages: Vec<Message>,
}

impl DiagnosticsReport {
    pub fn problem_count(&self) -> usize {
        self.self_addressed_conversations.len()
            + self.unlinked_conversations.len()
            + self.tenant_mismatched_messages.len()
    }

    pub fn is_clean(&self) -> bool {
        self.problem_count() == 0
    }
}

pub async fn diagnose(
    db: &DatabaseManager,
    company_id: Option<i64>,
) -> ServiceResult<DiagnosticsReport> {
    let conversations = db.conversation_store();
    let report = DiagnosticsReport {
        company_id,
        self_addressed_conversations: conversations.find_self_addressed(company_id).await?,
        unlinked_conversations: conversations.find_unlinked(company_id).await?,
        tenant_mismatched_messages: db
            .message_store()
            .find_tenant_mismatches(company_id)
            .await?,
    };

    if !report.is_clean() {
        warn!(
            "integrity check found {} self-addressed, {} unlinked conversations and {} mismatched messages",
            report.self_addressed_conversations.len(),
            report.unlinked_conversations.len(),
            report.tenant_mismatched_messages.len()
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::db::{MessageDirection, NewConversation, NewMessage, SenderType, test_manager};
    use crate::service::messaging::tests::{company_with_page, inbound};
    use crate::service::MessagingService;

    #[tokio::test]
    async fn clean_database_reports_nothing() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let company = company_with_page(&db, "owner@swan.shop", "1001").await;
        MessagingService::new(db.clone())
            .ingest_inbound(company.id, &inbound("1001", "2002", None))
            .await
            .expect("inbound");

        let report = diagnose(&db, None).await.expect("diagnose");
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn legacy_rows_are_reported_not_repaired() {
        let (db, _dir) = test_manager().await;
        let db = Arc::new(db);
        let a = company_with_page(&db, "a@swan.shop", "1001").await;
        let b = company_with_page(&db, "b@crow.shop", "3003").await;
        let conversations = db.conversation_store();
        let now = Utc::now();

        let self_addressed = conversations
            .create_conversation(&NewConversation {
                company_id: a.id,
                facebook_page_id: "1001".to_string(),
                user_id: "1001".to_string(),
                customer_name: None,
                created_at: now,
            })
            .await
            .expect("self addressed row");
        let unlinked = conversations
            .create_conversation(&NewConversation {
                company_id: a.id,
                facebook_page_id: "9999".to_string(),
                user_id: "2002".to_string(),
                customer_name: None,
                created_at: now,
            })
            .await
            .expect("unlinked row");
        let mismatched = db
            .message_store()
            .insert_message(&NewMessage {
                conversation_id: unlinked.id,
                company_id: b.id,
                direction: MessageDirection::Inbound,
                sender_type: SenderType::Customer,
                content: "hello".to_string(),
                external_id: None,
                created_at: now,
            })
            .await
            .expect("mismatched row");

        let report = diagnose(&db, None).await.expect("diagnose");
        assert_eq!(report.self_addressed_conversations.len(), 1);
        assert_eq!(report.self_addressed_conversations[0].id, self_addressed.id);
        assert_eq!(report.unlinked_conversations.len(), 1);
        assert_eq!(report.unlinked_conversations[0].id, unlinked.id);
        assert_eq!(report.tenant_mismatched_messages.len(), 1);
        assert_eq!(report.tenant_mismatched_messages[0].id, mismatched.id);

        let scoped = diagnose(&db, Some(b.id)).await.expect("scoped");
        assert!(scoped.self_addressed_conversations.is_empty());
        assert!(scoped.unlinked_conversations.is_empty());
        assert_eq!(scoped.tenant_mismatched_messages.len(), 1);

        // still there after a second run
        let again = diagnose(&db, None).await.expect("again");
        assert_eq!(again.problem_count(), 3);
    }
}

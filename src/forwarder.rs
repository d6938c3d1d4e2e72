use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::config::{ConfigError, ForwarderConfig};
use crate::db::{DatabaseError, DatabaseManager, FacebookSettings, Message, SenderType};
use crate::graph::{GraphError, MessageSender};
use crate::web::metrics::Metrics;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct TickSummary {
    pub selected: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickStatus {
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: TickSummary,
}

enum Outcome {
    Delivered,
    Retried,
    DeadLettered,
}

/// `min(base * 2^(attempts - 1), max)`.
pub fn backoff(attempts: i32, base: Duration, max: Duration) -> Duration {
    let shift = attempts.saturating_sub(1).max(0) as u32;
    let factor = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

/// The only component that sends outbound messages. It drains the pending
/// queue one tick at a time.
pub struct Forwarder {
    db: Arc<DatabaseManager>,
    sender: Arc<dyn MessageSender>,
    config: ForwarderConfig,
    sender_types: Vec<SenderType>,
    credentials: TtlCache<String, FacebookSettings>,
    last_tick: Mutex<Option<TickStatus>>,
}

impl Forwarder {
    pub fn new(
        db: Arc<DatabaseManager>,
        sender: Arc<dyn MessageSender>,
        config: &ForwarderConfig,
    ) -> Result<Self, ConfigError> {
        let sender_types = config
            .sender_types
            .iter()
            .map(|kind| kind.parse::<SenderType>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConfigError::InvalidConfig)?;

        Ok(Self {
            db,
            sender,
            credentials: TtlCache::new(config.credentials_ttl()),
            config: config.clone(),
            sender_types,
            last_tick: Mutex::new(None),
        })
    }

    /// Drops cached credentials for a page after it is reconnected or
    /// disconnected. Changes made outside this process are only seen once
    /// the cached entry expires.
    pub async fn forget_page(&self, page_id: &str) {
        self.credentials.invalidate(&page_id.to_string()).await;
    }

    pub fn last_tick(&self) -> Option<TickStatus> {
        self.last_tick.lock().clone()
    }

    /// Ticks until the task is aborted. Ticks never overlap: a slow one
    /// makes the interval skip rather than queue up.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "forwarder started: every {}s, batch {}, sender types {:?}",
            self.config.poll_interval_secs, self.config.batch_size, self.sender_types
        );

        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(summary) if summary.selected > 0 => info!(
                    "forwarder tick: {} selected, {} delivered, {} retried, {} dead-lettered",
                    summary.selected, summary.delivered, summary.retried, summary.dead_lettered
                ),
                Ok(_) => {}
                Err(err) => warn!("forwarder tick failed: {}", err),
            }
        }
    }

    pub async fn run_once(&self) -> Result<TickSummary, DatabaseError> {
        Metrics::forwarder_tick();
        let now = Utc::now();
        let pending = self
            .db
            .message_store()
            .list_pending(now, &self.sender_types, self.config.batch_size)
            .await?;

        let mut summary = TickSummary {
            selected: pending.len(),
            ..TickSummary::default()
        };

        for message in &pending {
            match self.deliver(message).await {
                Ok(Outcome::Delivered) => summary.delivered += 1,
                Ok(Outcome::Retried) => summary.retried += 1,
                Ok(Outcome::DeadLettered) => summary.dead_lettered += 1,
                Err(err) => {
                    // left as it was; the next tick selects it again
                    Metrics::forward_failed();
                    warn!("failed to update message {}: {}", message.id, err);
                }
            }
        }

        self.credentials.purge_expired().await;
        *self.last_tick.lock() = Some(TickStatus {
            finished_at: Utc::now(),
            summary,
        });
        Ok(summary)
    }

    async fn page_credentials(&self, page_id: &str) -> Result<Option<FacebookSettings>, DatabaseError> {
        let pages = self.db.page_store();
        self.credentials
            .get_or_load(page_id.to_string(), || async move { pages.get_page(page_id).await })
            .await
    }

    async fn deliver(&self, message: &Message) -> Result<Outcome, DatabaseError> {
        let Some(conversation) = self
            .db
            .conversation_store()
            .get_conversation(message.conversation_id)
            .await?
        else {
            return self.dead_letter(message, "conversation no longer exists").await;
        };

        let recipient = conversation.user_id.trim();
        if recipient.is_empty() {
            return self.dead_letter(message, "conversation has no recipient").await;
        }

        let page = self
            .page_credentials(&conversation.facebook_page_id)
            .await?
            .filter(|page| page.company_id == conversation.company_id && page.has_access_token());
        let Some(page) = page else {
            let reason = format!(
                "no access token for page {} of company {}",
                conversation.facebook_page_id, conversation.company_id
            );
            return self.dead_letter(message, &reason).await;
        };

        let token = SecretString::from(page.access_token.clone());
        match self.sender.send_text(&token, recipient, &message.content).await {
            Ok(external_id) => {
                let stored = self
                    .db
                    .message_store()
                    .mark_delivered(message.id, &external_id, Utc::now())
                    .await?;
                if !stored {
                    debug!("message {} already had a provider id", message.id);
                }
                Metrics::message_forwarded();
                Ok(Outcome::Delivered)
            }
            Err(err) if err.is_permanent() => {
                if matches!(err, GraphError::Api { code: 190, .. }) {
                    self.credentials.invalidate(&page.page_id).await;
                }
                Metrics::forward_failed();
                self.dead_letter(message, &err.to_string()).await
            }
            Err(err) => {
                Metrics::forward_failed();
                self.retry_later(message, &err.to_string()).await
            }
        }
    }

    async fn retry_later(&self, message: &Message, error: &str) -> Result<Outcome, DatabaseError> {
        let attempts = message.delivery_attempts + 1;
        if attempts >= self.config.max_attempts {
            let reason = format!("gave up after {attempts} attempts: {error}");
            return self.dead_letter(message, &reason).await;
        }

        let delay = backoff(
            attempts,
            Duration::from_secs(self.config.backoff_base_secs),
            Duration::from_secs(self.config.backoff_max_secs),
        );
        let next_attempt_at =
            Utc::now() + TimeDelta::from_std(delay).unwrap_or_else(|_| TimeDelta::hours(1));
        warn!(
            "delivery of message {} failed (attempt {}), retrying in {}s: {}",
            message.id,
            attempts,
            delay.as_secs(),
            error
        );
        self.db
            .message_store()
            .record_failure(message.id, error, next_attempt_at)
            .await?;
        Ok(Outcome::Retried)
    }

    async fn dead_letter(&self, message: &Message, reason: &str) -> Result<Outcome, DatabaseError> {
        warn!("dead-lettering message {}: {}", message.id, reason);
        self.db.message_store().dead_letter(message.id, reason).await?;
        Metrics::message_dead_lettered();
        Ok(Outcome::DeadLettered)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use test_case::test_case;

    use super::*;
    use crate::db::test_manager;
    use crate::service::MessagingService;
    use crate::service::messaging::tests::{company_with_page, inbound};

    #[derive(Default)]
    struct MockSender {
        sent: Mutex<Vec<(String, String)>>,
        scripted: Mutex<VecDeque<Result<String, GraphError>>>,
    }

    impl MockSender {
        fn failing_with(errors: Vec<GraphError>) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                scripted: Mutex::new(errors.into_iter().map(Err).collect()),
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl MessageSender for MockSender {
        async fn send_text(
            &self,
            _access_token: &SecretString,
            recipient_id: &str,
            text: &str,
        ) -> Result<String, GraphError> {
            let mut sent = self.sent.lock();
            sent.push((recipient_id.to_string(), text.to_string()));
            let n = sent.len();
            drop(sent);
            self.scripted
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(format!("m_{n}")))
        }
    }

    fn config() -> ForwarderConfig {
        ForwarderConfig::default()
    }

    struct Fixture {
        db: Arc<DatabaseManager>,
        company_id: i64,
        conversation_id: i64,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let (db, dir) = test_manager().await;
        let db = Arc::new(db);
        let company = company_with_page(&db, "owner@swan.shop", "1001").await;
        let outcome = MessagingService::new(db.clone())
            .ingest_inbound(company.id, &inbound("1001", "2002", None))
            .await
            .expect("inbound");
        Fixture {
            db,
            company_id: company.id,
            conversation_id: outcome.conversation.id,
            _dir: dir,
        }
    }

    async fn enqueue(f: &Fixture, text: &str, sender_type: SenderType) -> Message {
        MessagingService::new(f.db.clone())
            .enqueue_outbound(f.company_id, f.conversation_id, text, sender_type)
            .await
            .expect("enqueue")
    }

    async fn reload(f: &Fixture, id: i64) -> Message {
        f.db
            .message_store()
            .get_message(id)
            .await
            .expect("get message")
            .expect("message exists")
    }

    #[test_case(1 => 30; "first retry")]
    #[test_case(2 => 60; "second retry")]
    #[test_case(5 => 480; "fifth retry")]
    #[test_case(8 => 3600; "capped")]
    #[test_case(40 => 3600; "large attempt count")]
    fn backoff_doubles_until_cap(attempts: i32) -> u64 {
        backoff(attempts, Duration::from_secs(30), Duration::from_secs(3600)).as_secs()
    }

    #[tokio::test]
    async fn delivers_once_and_never_resends() {
        let f = fixture().await;
        let message = enqueue(&f, "yes, size M is in stock", SenderType::Bot).await;
        let sender = Arc::new(MockSender::default());
        let forwarder = Forwarder::new(f.db.clone(), sender.clone(), &config()).expect("forwarder");

        let summary = forwarder.run_once().await.expect("tick");
        assert_eq!(
            summary,
            TickSummary {
                selected: 1,
                delivered: 1,
                retried: 0,
                dead_lettered: 0
            }
        );
        assert_eq!(
            sender.sent(),
            vec![("2002".to_string(), "yes, size M is in stock".to_string())]
        );

        let stored = reload(&f, message.id).await;
        assert_eq!(stored.external_id.as_deref(), Some("m_1"));
        assert!(stored.delivered_at.is_some());

        let again = forwarder.run_once().await.expect("second tick");
        assert_eq!(again.selected, 0);
        assert_eq!(sender.sent().len(), 1);

        let marked_again = f
            .db
            .message_store()
            .mark_delivered(message.id, "m_other", Utc::now())
            .await
            .expect("mark");
        assert!(!marked_again);
        assert_eq!(reload(&f, message.id).await.external_id.as_deref(), Some("m_1"));
        assert_eq!(forwarder.last_tick().expect("status").summary.selected, 0);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_later() {
        let f = fixture().await;
        let message = enqueue(&f, "hello", SenderType::Agent).await;
        let sender = Arc::new(MockSender::failing_with(vec![GraphError::Transport(
            "connection reset".to_string(),
        )]));
        let forwarder = Forwarder::new(f.db.clone(), sender.clone(), &config()).expect("forwarder");

        let before = Utc::now();
        let summary = forwarder.run_once().await.expect("tick");
        assert_eq!(summary.retried, 1);

        let stored = reload(&f, message.id).await;
        assert_eq!(stored.delivery_attempts, 1);
        assert!(!stored.dead_lettered);
        assert!(stored.last_error.is_some());
        let next = stored.next_attempt_at.expect("scheduled");
        assert!(next >= before + TimeDelta::seconds(30));

        // not due yet
        let summary = forwarder.run_once().await.expect("tick");
        assert_eq!(summary.selected, 0);
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn dead_letters_after_max_attempts_and_requeues() {
        let f = fixture().await;
        let message = enqueue(&f, "hello", SenderType::Bot).await;
        let sender = Arc::new(MockSender::failing_with(vec![
            GraphError::Transport("timeout".to_string()),
            GraphError::Transport("timeout".to_string()),
        ]));
        let mut config = config();
        config.max_attempts = 2;
        config.backoff_base_secs = 0;
        config.backoff_max_secs = 0;
        let forwarder = Forwarder::new(f.db.clone(), sender.clone(), &config).expect("forwarder");

        assert_eq!(forwarder.run_once().await.expect("tick 1").retried, 1);
        assert_eq!(forwarder.run_once().await.expect("tick 2").dead_lettered, 1);

        let stored = reload(&f, message.id).await;
        assert!(stored.dead_lettered);
        assert_eq!(stored.delivery_attempts, 2);
        assert_eq!(forwarder.run_once().await.expect("tick 3").selected, 0);

        let messaging = MessagingService::new(f.db.clone());
        let dead = messaging
            .list_dead_letters(f.company_id, 100, 0)
            .await
            .expect("dead letters");
        assert_eq!(dead.len(), 1);

        let requeued = messaging
            .requeue_dead_letter(f.company_id, message.id)
            .await
            .expect("requeue");
        assert!(requeued.is_pending());
        assert_eq!(requeued.delivery_attempts, 0);

        let summary = forwarder.run_once().await.expect("tick 4");
        assert_eq!(summary.delivered, 1);
        assert_eq!(sender.sent().len(), 3);
    }

    #[tokio::test]
    async fn permanent_error_dead_letters_immediately() {
        let f = fixture().await;
        let message = enqueue(&f, "hello", SenderType::Bot).await;
        let sender = Arc::new(MockSender::failing_with(vec![GraphError::Api {
            status: 400,
            code: 190,
            subcode: Some(463),
            message: "Error validating access token".to_string(),
        }]));
        let forwarder = Forwarder::new(f.db.clone(), sender.clone(), &config()).expect("forwarder");

        let summary = forwarder.run_once().await.expect("tick");
        assert_eq!(summary.dead_lettered, 1);
        let stored = reload(&f, message.id).await;
        assert!(stored.dead_lettered);
        assert_eq!(stored.delivery_attempts, 1);
    }

    #[tokio::test]
    async fn missing_credentials_dead_letter_without_sending() {
        let f = fixture().await;
        let message = enqueue(&f, "hello", SenderType::Bot).await;
        crate::service::AccountService::new(f.db.clone())
            .disconnect_page(f.company_id, "1001")
            .await
            .expect("disconnect");
        let sender = Arc::new(MockSender::default());
        let forwarder = Forwarder::new(f.db.clone(), sender.clone(), &config()).expect("forwarder");

        let summary = forwarder.run_once().await.expect("tick");
        assert_eq!(summary.dead_lettered, 1);
        assert!(sender.sent().is_empty());
        assert!(reload(&f, message.id).await.dead_lettered);
    }

    #[tokio::test]
    async fn disconnected_page_stops_cached_sends() {
        let f = fixture().await;
        let sender = Arc::new(MockSender::default());
        let forwarder = Forwarder::new(f.db.clone(), sender.clone(), &config()).expect("forwarder");

        enqueue(&f, "first", SenderType::Agent).await;
        assert_eq!(forwarder.run_once().await.expect("tick 1").delivered, 1);

        crate::service::AccountService::new(f.db.clone())
            .disconnect_page(f.company_id, "1001")
            .await
            .expect("disconnect");
        forwarder.forget_page("1001").await;

        let second = enqueue(&f, "second", SenderType::Agent).await;
        let summary = forwarder.run_once().await.expect("tick 2");
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(sender.sent().len(), 1);
        assert!(reload(&f, second.id).await.dead_lettered);
    }

    #[tokio::test]
    async fn only_configured_sender_types_are_forwarded() {
        let f = fixture().await;
        let bot = enqueue(&f, "automated", SenderType::Bot).await;
        let agent = enqueue(&f, "from a human", SenderType::Agent).await;
        let sender = Arc::new(MockSender::default());
        let mut config = config();
        config.sender_types = vec!["bot".to_string()];
        let forwarder = Forwarder::new(f.db.clone(), sender.clone(), &config).expect("forwarder");

        let summary = forwarder.run_once().await.expect("tick");
        assert_eq!(summary.selected, 1);
        assert!(reload(&f, bot.id).await.external_id.is_some());
        assert!(reload(&f, agent.id).await.is_pending());
    }

    #[tokio::test]
    async fn unknown_sender_type_is_rejected() {
        let (db, _dir) = test_manager().await;
        let mut config = config();
        config.sender_types = vec!["robot".to_string()];
        let result = Forwarder::new(Arc::new(db), Arc::new(MockSender::default()), &config);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }
}

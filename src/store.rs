use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::AppError;

/// Collection receiving verified e-mail addresses
pub const USERS_COLLECTION: &str = "users";
/// Collection receiving question/answer pairs
pub const QUESTIONS_COLLECTION: &str = "questions";

const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// A verified e-mail address
#[derive(Debug, Clone, PartialEq)]
pub struct EmailLogEntry {
    pub email: String,
    pub timestamp: DateTime<Utc>,
}

/// One answered question
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionLogEntry {
    pub email: String,
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only sink for activity records
///
/// Implementations only ever insert; nothing is read back, updated or deleted.
pub trait LogStore: Send + Sync + 'static {
    fn insert_user(&self, entry: EmailLogEntry)
    -> impl Future<Output = Result<(), AppError>> + Send;

    fn insert_question(
        &self,
        entry: QuestionLogEntry,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// MongoDB-backed store writing to the `users` and `questions` collections
pub struct MongoLogStore {
    users: Collection<bson::Document>,
    questions: Collection<bson::Document>,
}

impl MongoLogStore {
    /// Build a store from a connection string
    ///
    /// The driver connects lazily, so an unreachable server only surfaces on
    /// the first insert (after the server-selection timeout).
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        let mut options = ClientOptions::parse(uri).await?;
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        options.app_name = Some("sheet_qa".to_string());

        let client = Client::with_options(options)?;
        let db = client.database(database);

        Ok(MongoLogStore {
            users: db.collection(USERS_COLLECTION),
            questions: db.collection(QUESTIONS_COLLECTION),
        })
    }
}

fn bson_time(timestamp: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(timestamp.timestamp_millis())
}

impl LogStore for MongoLogStore {
    async fn insert_user(&self, entry: EmailLogEntry) -> Result<(), AppError> {
        self.users
            .insert_one(doc! {
                "email": entry.email,
                "timestamp": bson_time(entry.timestamp),
            })
            .await?;
        Ok(())
    }

    async fn insert_question(&self, entry: QuestionLogEntry) -> Result<(), AppError> {
        self.questions
            .insert_one(doc! {
                "email": entry.email,
                "question": entry.question,
                "answer": entry.answer,
                "timestamp": bson_time(entry.timestamp),
            })
            .await?;
        Ok(())
    }
}

/// In-process store keeping records in memory
#[derive(Default)]
pub struct MemoryLogStore {
    users: Mutex<Vec<EmailLogEntry>>,
    questions: Mutex<Vec<QuestionLogEntry>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn users(&self) -> Vec<EmailLogEntry> {
        self.users.lock().map(|u| u.clone()).unwrap_or_default()
    }

    pub fn questions(&self) -> Vec<QuestionLogEntry> {
        self.questions.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

impl LogStore for MemoryLogStore {
    async fn insert_user(&self, entry: EmailLogEntry) -> Result<(), AppError> {
        self.users
            .lock()
            .map_err(|_| AppError::DatabaseUnavailable("store lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }

    async fn insert_question(&self, entry: QuestionLogEntry) -> Result<(), AppError> {
        self.questions
            .lock()
            .map_err(|_| AppError::DatabaseUnavailable("store lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }
}

/// Best-effort activity logging on top of an optional store
///
/// A missing store is reported as `AppError::DatabaseUnavailable`; callers
/// decide whether that blocks the action (e-mail gating) or is only shown as
/// a notice (question logging).
pub struct ActivityLog<S> {
    store: Option<S>,
}

impl<S: LogStore> ActivityLog<S> {
    pub fn new(store: Option<S>) -> Self {
        ActivityLog { store }
    }

    pub fn disabled() -> Self {
        ActivityLog { store: None }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    pub fn store(&self) -> Option<&S> {
        self.store.as_ref()
    }

    fn require_store(&self) -> Result<&S, AppError> {
        self.store.as_ref().ok_or_else(|| {
            AppError::DatabaseUnavailable("MONGODB_URI is not configured".to_string())
        })
    }

    /// Record a verified e-mail address with the current time
    pub async fn log_email(&self, email: &str) -> Result<(), AppError> {
        let store = self.require_store()?;
        let result = store
            .insert_user(EmailLogEntry {
                email: email.trim().to_string(),
                timestamp: Utc::now(),
            })
            .await;
        if let Err(e) = &result {
            log::warn!("failed to log email: {}", e);
        }
        result
    }

    /// Record an answered question with the current time
    pub async fn log_question(
        &self,
        email: &str,
        question: &str,
        answer: &str,
    ) -> Result<(), AppError> {
        let store = self.require_store()?;
        let result = store
            .insert_question(QuestionLogEntry {
                email: email.to_string(),
                question: question.to_string(),
                answer: answer.to_string(),
                timestamp: Utc::now(),
            })
            .await;
        if let Err(e) = &result {
            log::warn!("failed to log question: {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_appends_records() {
        let log = ActivityLog::new(Some(MemoryLogStore::new()));
        log.log_email(" a@b.com ").await.unwrap();
        log.log_question("a@b.com", "total sales", "150").await.unwrap();

        let store = log.store().unwrap();
        let users = store.users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].email, "a@b.com");

        let questions = store.questions();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].question, "total sales");
        assert_eq!(questions[0].answer, "150");
        assert!(questions[0].timestamp >= users[0].timestamp);
    }

    #[tokio::test]
    async fn missing_store_is_unavailable() {
        let log: ActivityLog<MemoryLogStore> = ActivityLog::disabled();
        assert!(!log.is_available());
        assert!(matches!(
            log.log_email("a@b.com").await,
            Err(AppError::DatabaseUnavailable(_))
        ));
        assert!(matches!(
            log.log_question("a@b.com", "q", "a").await,
            Err(AppError::DatabaseUnavailable(_))
        ));
    }

    #[test]
    fn timestamps_convert_to_bson_millis() {
        let ts = DateTime::parse_from_rfc3339("2024-01-02T03:04:05.678Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(bson_time(ts).timestamp_millis(), ts.timestamp_millis());
    }
}

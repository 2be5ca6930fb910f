#![allow(dead_code)]

use sheet_qa::AppError;
use sheet_qa::llm::{ChatMessage, ChatModel, LlmError};
use sheet_qa::store::{EmailLogEntry, LogStore, QuestionLogEntry};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SALES_CSV: &[u8] = b"region,sales\nNorth,100\nSouth,50\n";

/// Chat model replaying canned replies and recording every prompt
#[derive(Clone, Default)]
pub struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<String>>>,
    pub prompts: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Self {
        ScriptedModel {
            replies: Arc::new(Mutex::new(replies.iter().map(|r| r.to_string()).collect())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        ScriptedModel {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_user_prompt(&self) -> String {
        let prompts = self.prompts.lock().unwrap();
        prompts
            .last()
            .and_then(|messages| messages.last())
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

impl ChatModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage], _stop: &[&str]) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        // An exhausted script keeps the agent busy with harmless actions
        Ok(next.unwrap_or_else(|| {
            "Thought: let me look again\nAction: table_query\nAction Input: rows".to_string()
        }))
    }
}

/// Store whose every insert fails, as when the database is unreachable
pub struct FailingStore;

impl LogStore for FailingStore {
    async fn insert_user(&self, _entry: EmailLogEntry) -> Result<(), AppError> {
        Err(AppError::DatabaseUnavailable("server selection timeout".to_string()))
    }

    async fn insert_question(&self, _entry: QuestionLogEntry) -> Result<(), AppError> {
        Err(AppError::DatabaseUnavailable("server selection timeout".to_string()))
    }
}

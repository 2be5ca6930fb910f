use crate::agent::{PromptStyle, create_agent};
use crate::config::Config;
use crate::email::validate_email;
use crate::error::AppError;
use crate::llm::ChatModel;
use crate::loader::load_file;
use crate::postprocess::{ResponseFilter, salvage};
use crate::session::{Reply, Session, SessionStore};
use crate::store::{ActivityLog, LogStore};

/// E-mail recorded with questions from sessions that never passed the gate
const ANONYMOUS_EMAIL: &str = "anonymous";

/// Wires loading, gating, answering and logging per user action
///
/// Every public method performs one action for one session. Failures are
/// returned to the caller and also queued on the session so the next page
/// render shows them inline.
pub struct Assistant<M, S> {
    config: Config,
    model: M,
    activity: ActivityLog<S>,
    sessions: SessionStore,
    filter: ResponseFilter,
}

/// Resets a session stuck in `Answering` when a question is abandoned midway
struct AnswerGuard<'a> {
    sessions: &'a SessionStore,
    session_id: &'a str,
    done: bool,
}

impl Drop for AnswerGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.sessions.with_session(self.session_id, |session| {
                session.finish_answer(Reply::Error("The question was cancelled".to_string()));
            });
        }
    }
}

impl<M: ChatModel, S: LogStore> Assistant<M, S> {
    pub fn new(config: Config, model: M, activity: ActivityLog<S>) -> Self {
        let filter = ResponseFilter::new(config.agent.style == PromptStyle::Strict);
        let sessions = SessionStore::new(config.require_email);
        Assistant {
            config,
            model,
            activity,
            sessions,
            filter,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn activity(&self) -> &ActivityLog<S> {
        &self.activity
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run `f` on a session without awaiting
    pub fn with_session<T>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> T) -> T {
        self.sessions.with_session(session_id, f)
    }

    fn record_error(&self, session_id: &str, err: AppError) -> AppError {
        log::info!("session {}: {}", session_id, err);
        let message = err.to_string();
        self.with_session(session_id, |session| session.errors.push(message));
        err
    }

    /// Validate and record the user's e-mail, opening the upload step
    pub async fn submit_email(&self, session_id: &str, email: &str) -> Result<(), AppError> {
        if !validate_email(email) {
            return Err(self.record_error(session_id, AppError::InvalidEmail));
        }
        if !self.with_session(session_id, |session| session.is_gated()) {
            return Ok(());
        }

        if !self.activity.is_available() {
            log::warn!("email gate skipped: no log store configured");
            self.with_session(session_id, |session| {
                session.skip_gate();
                session
                    .notices
                    .push("Email logging is unavailable; continuing without it".to_string());
            });
            return Ok(());
        }

        match self.activity.log_email(email).await {
            Ok(()) => {
                self.with_session(session_id, |session| session.verify_email(email));
                Ok(())
            }
            Err(e) => Err(self.record_error(session_id, e)),
        }
    }

    /// Load an uploaded file and make its first sheet active
    pub fn upload(&self, session_id: &str, file_name: &str, bytes: &[u8]) -> Result<(), AppError> {
        let gated = self.with_session(session_id, |session| session.is_gated());
        if gated {
            return Err(self.record_error(session_id, AppError::InvalidEmail));
        }

        let sheets = load_file(file_name, bytes).map_err(|e| self.record_error(session_id, e))?;
        self.with_session(session_id, |session| session.load_workbook(file_name, sheets))
            .map_err(|e| self.record_error(session_id, e))
    }

    pub fn select_sheet(&self, session_id: &str, sheet: &str) -> Result<(), AppError> {
        self.with_session(session_id, |session| session.select_sheet(sheet))
            .map_err(|e| self.record_error(session_id, e))
    }

    pub fn reset(&self, session_id: &str) -> Result<(), AppError> {
        self.with_session(session_id, |session| session.clear_workbook())
            .map_err(|e| self.record_error(session_id, e))
    }

    /// Answer a question about the active sheet
    ///
    /// Returns `Ok(None)` for a blank question. Agent failures are not errors
    /// here: they become `Reply::Error` after an attempt to salvage the
    /// model's text from an output-parsing failure.
    pub async fn ask(&self, session_id: &str, question: &str) -> Result<Option<Reply>, AppError> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(None);
        }

        let (sheets, sheet_name) = self
            .with_session(session_id, |session| session.begin_answer(question))
            .map_err(|e| self.record_error(session_id, e))?;
        let mut guard = AnswerGuard {
            sessions: &self.sessions,
            session_id,
            done: false,
        };

        let reply = match sheets.get(&sheet_name) {
            Some(table) => {
                let agent = create_agent(&self.model, table, &self.config.agent);
                match agent.run(question).await {
                    Ok(answer) => Reply::Answer(self.filter.strip(&answer)),
                    Err(e) => self.recover(AppError::from(e)),
                }
            }
            None => Reply::Error(AppError::UnknownSheet(sheet_name.clone()).to_string()),
        };

        guard.done = true;
        let email = self.with_session(session_id, |session| {
            session.finish_answer(reply.clone());
            session.user_email.clone()
        });

        if let Reply::Answer(answer) = &reply {
            self.log_answer(session_id, email.as_deref(), question, answer)
                .await;
        }

        Ok(Some(reply))
    }

    fn recover(&self, err: AppError) -> Reply {
        if let AppError::AgentParsing(message) = &err {
            if let Some(text) = salvage(message) {
                log::info!("salvaged answer from unparseable agent output");
                return Reply::Answer(self.filter.strip(&text));
            }
        }
        log::warn!("agent failed: {}", err);
        match err {
            AppError::AgentParsing(message) => {
                Reply::Error(AppError::AgentExecution(message).to_string())
            }
            other => Reply::Error(other.to_string()),
        }
    }

    /// Best effort: a failed write only adds a notice to the session
    async fn log_answer(&self, session_id: &str, email: Option<&str>, question: &str, answer: &str) {
        if !self.activity.is_available() {
            return;
        }
        let email = email.unwrap_or(ANONYMOUS_EMAIL);
        if let Err(e) = self.activity.log_question(email, question, answer).await {
            self.with_session(session_id, |session| {
                session.notices.push(format!("Could not log question: {}", e));
            });
        }
    }
}

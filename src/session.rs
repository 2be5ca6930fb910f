use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::error::AppError;
use crate::table::{SheetMap, Table};

const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// Where a session is in the upload → preview → question cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    AwaitingEmail,
    AwaitingFile,
    PreviewingSheet,
    AwaitingQuery,
    Answering,
}

/// A workbook loaded for one session
///
/// The sheet map is never mutated after load; it is shared with in-flight
/// questions through an `Arc`.
#[derive(Debug, Clone)]
pub struct Workbook {
    pub file_name: String,
    pub sheets: Arc<SheetMap>,
}

/// Outcome of the most recent question
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Answer(String),
    Error(String),
}

/// Per-browser session record
#[derive(Debug, Clone)]
pub struct Session {
    pub email_verified: bool,
    pub user_email: Option<String>,
    pub workbook: Option<Workbook>,
    pub selected_sheet: Option<String>,
    pub stage: Stage,
    pub last_question: Option<String>,
    pub last_reply: Option<Reply>,
    /// One-shot messages shown on the next render
    pub notices: Vec<String>,
    pub errors: Vec<String>,
    pub expires_at: SystemTime,
}

impl Session {
    /// Fresh session; gated sessions start at `AwaitingEmail`
    pub fn new(require_email: bool) -> Self {
        Session {
            email_verified: false,
            user_email: None,
            workbook: None,
            selected_sheet: None,
            stage: if require_email {
                Stage::AwaitingEmail
            } else {
                Stage::AwaitingFile
            },
            last_question: None,
            last_reply: None,
            notices: Vec::new(),
            errors: Vec::new(),
            expires_at: SystemTime::now() + Duration::from_secs(SESSION_DURATION),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= SystemTime::now()
    }

    pub fn is_gated(&self) -> bool {
        self.stage == Stage::AwaitingEmail
    }

    /// Mark the e-mail as verified and open the upload step
    pub fn verify_email(&mut self, email: &str) {
        self.email_verified = true;
        self.user_email = Some(email.trim().to_string());
        if self.stage == Stage::AwaitingEmail {
            self.stage = Stage::AwaitingFile;
        }
    }

    /// Let a gated session through without a recorded address
    pub fn skip_gate(&mut self) {
        if self.stage == Stage::AwaitingEmail {
            self.stage = Stage::AwaitingFile;
        }
    }

    /// Install a freshly loaded workbook, selecting its first sheet
    pub fn load_workbook(&mut self, file_name: &str, sheets: SheetMap) -> Result<(), AppError> {
        self.ensure_ungated()?;
        if self.stage == Stage::Answering {
            return Err(AppError::Busy);
        }
        self.selected_sheet = sheets.first_name().map(|s| s.to_string());
        self.workbook = Some(Workbook {
            file_name: file_name.to_string(),
            sheets: Arc::new(sheets),
        });
        self.last_question = None;
        self.last_reply = None;
        self.stage = Stage::PreviewingSheet;
        Ok(())
    }

    /// Drop the workbook and wait for a new upload
    pub fn clear_workbook(&mut self) -> Result<(), AppError> {
        if self.stage == Stage::Answering {
            return Err(AppError::Busy);
        }
        self.workbook = None;
        self.selected_sheet = None;
        self.last_question = None;
        self.last_reply = None;
        if self.stage != Stage::AwaitingEmail {
            self.stage = Stage::AwaitingFile;
        }
        Ok(())
    }

    /// Swap the active table; the stage does not change
    pub fn select_sheet(&mut self, name: &str) -> Result<(), AppError> {
        let workbook = self
            .workbook
            .as_ref()
            .ok_or_else(|| AppError::UnknownSheet(name.to_string()))?;
        if workbook.sheets.get(name).is_none() {
            return Err(AppError::UnknownSheet(name.to_string()));
        }
        self.selected_sheet = Some(name.to_string());
        Ok(())
    }

    /// The active table, if a workbook is loaded
    pub fn active_table(&self) -> Option<&Table> {
        let workbook = self.workbook.as_ref()?;
        let name = self.selected_sheet.as_deref()?;
        workbook.sheets.get(name)
    }

    /// Enter `Answering` and hand out what the agent needs
    ///
    /// Returns the shared sheet map and the selected sheet name so the caller
    /// can run the agent without holding the session lock.
    pub fn begin_answer(&mut self, question: &str) -> Result<(Arc<SheetMap>, String), AppError> {
        self.ensure_ungated()?;
        match self.stage {
            Stage::Answering => return Err(AppError::Busy),
            Stage::PreviewingSheet | Stage::AwaitingQuery => {}
            _ => {
                return Err(AppError::FileRead(
                    "Upload a file before asking questions".to_string(),
                ));
            }
        }
        let (Some(workbook), Some(sheet)) = (&self.workbook, &self.selected_sheet) else {
            return Err(AppError::FileRead(
                "Upload a file before asking questions".to_string(),
            ));
        };
        let handles = (Arc::clone(&workbook.sheets), sheet.clone());

        self.stage = Stage::Answering;
        self.last_question = Some(question.to_string());
        self.last_reply = None;
        Ok(handles)
    }

    /// Leave `Answering` with the displayed reply
    pub fn finish_answer(&mut self, reply: Reply) {
        self.last_reply = Some(reply);
        if self.stage == Stage::Answering {
            self.stage = Stage::AwaitingQuery;
        }
    }

    /// Take the pending notices and errors for rendering
    pub fn drain_messages(&mut self) -> (Vec<String>, Vec<String>) {
        (
            std::mem::take(&mut self.notices),
            std::mem::take(&mut self.errors),
        )
    }

    fn ensure_ungated(&self) -> Result<(), AppError> {
        if self.stage == Stage::AwaitingEmail {
            return Err(AppError::InvalidEmail);
        }
        Ok(())
    }
}

/// All live sessions keyed by cookie value
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    require_email: bool,
}

impl SessionStore {
    pub fn new(require_email: bool) -> Self {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
            require_email,
        }
    }

    /// Run `f` on the session with `id`, creating it when missing or expired
    ///
    /// The lock is held only for the duration of `f`, which must not await.
    pub fn with_session<T>(&self, id: &str, f: impl FnOnce(&mut Session) -> T) -> T {
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.retain(|_, session| !session.is_expired());
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(self.require_email));
        f(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

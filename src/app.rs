use axum::{
    Form, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::llm::{ChatModel, OpenAiChat};
use crate::loader::SUPPORTED_EXTENSIONS;
use crate::orchestrator::Assistant;
use crate::session::{Reply, Session, Stage};
use crate::store::{ActivityLog, LogStore, MongoLogStore};
use crate::table::PREVIEW_ROWS;

pub const SESSION_COOKIE: &str = "session";
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const PAGE_TEMPLATE: &str = "index";

pub struct AppState<M, S> {
    pub assistant: Assistant<M, S>,
    templates: Handlebars<'static>,
}

impl<M: ChatModel, S: LogStore> AppState<M, S> {
    pub fn new(assistant: Assistant<M, S>) -> Result<Self, AppError> {
        let mut templates = Handlebars::new();
        templates
            .register_template_string(PAGE_TEMPLATE, include_str!("./static/index.hbs"))
            .map_err(|e| AppError::Config(format!("invalid page template: {}", e)))?;
        Ok(AppState {
            assistant,
            templates,
        })
    }
}

#[derive(Deserialize)]
struct EmailForm {
    email: String,
}

#[derive(Deserialize)]
struct SheetForm {
    sheet: String,
}

#[derive(Deserialize)]
struct QuestionForm {
    question: String,
}

#[derive(Serialize)]
struct SheetOption {
    name: String,
    selected: bool,
}

#[derive(Serialize)]
struct PreviewView {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    total_rows: usize,
}

/// Everything the page template needs for one render
#[derive(Serialize)]
struct PageView {
    stage: &'static str,
    gated: bool,
    email: Option<String>,
    notices: Vec<String>,
    errors: Vec<String>,
    accept: String,
    file_name: Option<String>,
    sheets: Vec<SheetOption>,
    preview: Option<PreviewView>,
    can_ask: bool,
    answering: bool,
    question: Option<String>,
    answer: Option<String>,
    answer_error: Option<String>,
}

fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::AwaitingEmail => "awaiting-email",
        Stage::AwaitingFile => "awaiting-file",
        Stage::PreviewingSheet => "previewing-sheet",
        Stage::AwaitingQuery => "awaiting-query",
        Stage::Answering => "answering",
    }
}

impl PageView {
    fn from_session(session: &mut Session) -> Self {
        let (notices, errors) = session.drain_messages();

        let sheets = session
            .workbook
            .as_ref()
            .map(|wb| {
                wb.sheets
                    .names()
                    .into_iter()
                    .map(|name| SheetOption {
                        name: name.to_string(),
                        selected: session.selected_sheet.as_deref() == Some(name),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let preview = session.active_table().map(|table| {
            let head = table.head(PREVIEW_ROWS);
            PreviewView {
                columns: head.columns.clone(),
                rows: head
                    .rows
                    .iter()
                    .map(|row| row.iter().map(|v| v.to_string()).collect())
                    .collect(),
                total_rows: table.row_count(),
            }
        });

        let (answer, answer_error) = match &session.last_reply {
            Some(Reply::Answer(text)) => (Some(text.clone()), None),
            Some(Reply::Error(text)) => (None, Some(text.clone())),
            None => (None, None),
        };

        PageView {
            stage: stage_name(session.stage),
            gated: session.is_gated(),
            email: session.user_email.clone(),
            notices,
            errors,
            accept: SUPPORTED_EXTENSIONS
                .iter()
                .map(|ext| format!(".{}", ext))
                .collect::<Vec<_>>()
                .join(","),
            file_name: session.workbook.as_ref().map(|wb| wb.file_name.clone()),
            sheets,
            preview,
            can_ask: matches!(session.stage, Stage::PreviewingSheet | Stage::AwaitingQuery),
            answering: session.stage == Stage::Answering,
            question: session.last_question.clone(),
            answer,
            answer_error,
        }
    }
}

/// Session id from the cookie, minting a new one when absent
fn session_id(jar: CookieJar) -> (CookieJar, String) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if !cookie.value().is_empty() {
            let id = cookie.value().to_string();
            return (jar, id);
        }
    }

    let id = Uuid::new_v4().to_string();
    let cookie = Cookie::build((SESSION_COOKIE, id.clone()))
        .path("/")
        .http_only(true)
        .build();
    (jar.add(cookie), id)
}

pub fn router<M: ChatModel, S: LogStore>(state: Arc<AppState<M, S>>) -> Router {
    Router::new()
        .route("/", get(index::<M, S>))
        .route("/email", post(submit_email::<M, S>))
        .route("/upload", post(upload::<M, S>))
        .route("/sheet", post(select_sheet::<M, S>))
        .route("/ask", post(ask::<M, S>))
        .route("/reset", post(reset::<M, S>))
        .route("/health", get(health))
        .nest_service("/static", ServeDir::new("static"))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn index<M: ChatModel, S: LogStore>(
    State(state): State<Arc<AppState<M, S>>>,
    jar: CookieJar,
) -> Response {
    let (jar, id) = session_id(jar);
    let view = state
        .assistant
        .with_session(&id, |session| PageView::from_session(session));

    match state.templates.render(PAGE_TEMPLATE, &view) {
        Ok(html) => (jar, Html(html)).into_response(),
        Err(e) => {
            log::error!("failed to render page: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render page").into_response()
        }
    }
}

async fn submit_email<M: ChatModel, S: LogStore>(
    State(state): State<Arc<AppState<M, S>>>,
    jar: CookieJar,
    Form(form): Form<EmailForm>,
) -> (CookieJar, Redirect) {
    let (jar, id) = session_id(jar);
    // Failures are already queued on the session for display
    let _ = state.assistant.submit_email(&id, &form.email).await;
    (jar, Redirect::to("/"))
}

async fn upload<M: ChatModel, S: LogStore>(
    State(state): State<Arc<AppState<M, S>>>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> (CookieJar, Redirect) {
    let (jar, id) = session_id(jar);

    let mut upload: Option<(String, Vec<u8>)> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                let file_name = field.file_name().unwrap_or("upload").to_string();
                match field.bytes().await {
                    Ok(bytes) => upload = Some((file_name, bytes.to_vec())),
                    Err(e) => {
                        state.assistant.with_session(&id, |session| {
                            session
                                .errors
                                .push(AppError::FileRead(e.body_text()).to_string())
                        });
                        return (jar, Redirect::to("/"));
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                state.assistant.with_session(&id, |session| {
                    session
                        .errors
                        .push(AppError::FileRead(e.body_text()).to_string())
                });
                return (jar, Redirect::to("/"));
            }
        }
    }

    match upload {
        Some((file_name, bytes)) if !bytes.is_empty() => {
            let _ = state.assistant.upload(&id, &file_name, &bytes);
        }
        _ => state.assistant.with_session(&id, |session| {
            session
                .errors
                .push(AppError::FileRead("No file data received".to_string()).to_string())
        }),
    }

    (jar, Redirect::to("/"))
}

async fn select_sheet<M: ChatModel, S: LogStore>(
    State(state): State<Arc<AppState<M, S>>>,
    jar: CookieJar,
    Form(form): Form<SheetForm>,
) -> (CookieJar, Redirect) {
    let (jar, id) = session_id(jar);
    let _ = state.assistant.select_sheet(&id, &form.sheet);
    (jar, Redirect::to("/"))
}

async fn ask<M: ChatModel, S: LogStore>(
    State(state): State<Arc<AppState<M, S>>>,
    jar: CookieJar,
    Form(form): Form<QuestionForm>,
) -> (CookieJar, Redirect) {
    let (jar, id) = session_id(jar);
    let _ = state.assistant.ask(&id, &form.question).await;
    (jar, Redirect::to("/"))
}

async fn reset<M: ChatModel, S: LogStore>(
    State(state): State<Arc<AppState<M, S>>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let (jar, id) = session_id(jar);
    let _ = state.assistant.reset(&id);
    (jar, Redirect::to("/"))
}

/// Build the production state and serve until the process is stopped
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    if config.api_key.is_none() {
        log::warn!("API_KEY is not set; questions will fail until it is configured");
    }
    let model = OpenAiChat::new(
        config.api_key.clone(),
        config.openai_base_url.as_str(),
        config.openai_model.as_str(),
    )?;

    let store = match &config.mongodb_uri {
        Some(uri) => match MongoLogStore::connect(uri, &config.mongodb_database).await {
            Ok(store) => Some(store),
            Err(e) => {
                log::warn!("activity logging disabled: {}", e);
                None
            }
        },
        None => {
            log::warn!("MONGODB_URI is not set; activity logging disabled");
            None
        }
    };

    let bind_addr = config.bind_addr.clone();
    let assistant = Assistant::new(config, model, ActivityLog::new(store));
    let state = Arc::new(AppState::new(assistant)?);
    let app = router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    log::info!("Listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

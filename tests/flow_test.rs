mod common;

use common::{FailingStore, SALES_CSV, ScriptedModel};
use sheet_qa::AppError;
use sheet_qa::agent::{AgentConfig, AgentError, PromptStyle, create_agent};
use sheet_qa::config::Config;
use sheet_qa::loader::load_file;
use sheet_qa::orchestrator::Assistant;
use sheet_qa::session::{Reply, Stage};
use sheet_qa::store::{ActivityLog, MemoryLogStore};
use std::time::Duration;

const SESSION: &str = "session-1";

fn config(require_email: bool) -> Config {
    Config {
        require_email,
        ..Config::default()
    }
}

fn assistant(
    model: ScriptedModel,
    require_email: bool,
) -> Assistant<ScriptedModel, MemoryLogStore> {
    Assistant::new(
        config(require_email),
        model,
        ActivityLog::new(Some(MemoryLogStore::new())),
    )
}

#[tokio::test]
async fn total_sales_end_to_end() {
    let model = ScriptedModel::new(&["150"]);
    let assistant = assistant(model.clone(), false);

    assistant.upload(SESSION, "sales.csv", SALES_CSV).unwrap();
    let reply = assistant.ask(SESSION, "total sales").await.unwrap();

    assert_eq!(reply, Some(Reply::Answer("150".to_string())));
    assert_eq!(model.calls(), 1);
    assert_eq!(assistant.with_session(SESSION, |s| s.stage), Stage::AwaitingQuery);
}

#[tokio::test]
async fn agent_runs_table_query_before_answering() {
    let model = ScriptedModel::new(&[
        " I need the sum of the sales column\nAction: table_query\nAction Input: sum(sales)",
        " I now know the final answer\nFinal Answer: Analysis Result: 150",
    ]);
    let assistant = assistant(model.clone(), false);

    assistant.upload(SESSION, "sales.csv", SALES_CSV).unwrap();
    let reply = assistant.ask(SESSION, "total sales").await.unwrap();

    assert_eq!(reply, Some(Reply::Answer("150".to_string())));
    assert_eq!(model.calls(), 2);
    let prompt = model.last_user_prompt();
    assert!(prompt.contains("Action Input: sum(sales)\nObservation: 150\nThought:"));
    assert!(prompt.starts_with("Question: ANALYZE AND SHOW ONLY THE RESULTS FOR: total sales"));
}

#[tokio::test]
async fn system_prompt_carries_style_and_preview() {
    let model = ScriptedModel::new(&["Final Answer: done"]);
    let sheets = load_file("sales.csv", SALES_CSV).unwrap();
    let table = sheets.get("Sheet1").unwrap();
    let config = AgentConfig {
        style: PromptStyle::Brief,
        ..AgentConfig::default()
    };

    let agent = create_agent(&model, table, &config);
    let prompt = agent.system_prompt();
    assert!(prompt.starts_with("You are a helpful data analyst"));
    assert!(prompt.contains("| region | sales |"));
    assert!(prompt.contains("| North | 100 |"));
    assert!(prompt.contains("2 rows and 2 columns"));

    assert_eq!(agent.run("anything").await.unwrap(), "done");
}

#[tokio::test]
async fn unknown_tool_is_reported_back_to_the_model() {
    let model = ScriptedModel::new(&[
        "Action: python_repl_ast\nAction Input: df['sales'].sum()",
        "Final Answer: 150",
    ]);
    let assistant = assistant(model.clone(), false);
    assistant.upload(SESSION, "sales.csv", SALES_CSV).unwrap();

    let reply = assistant.ask(SESSION, "total sales").await.unwrap();
    assert_eq!(reply, Some(Reply::Answer("150".to_string())));
    assert!(
        model
            .last_user_prompt()
            .contains("python_repl_ast is not a valid tool, try one of [table_query].")
    );
}

#[tokio::test]
async fn parsing_error_is_salvaged() {
    let model = ScriptedModel::new(&["Analysis Result: 42 units"]);
    let assistant = assistant(model, false);
    assistant.upload(SESSION, "sales.csv", SALES_CSV).unwrap();

    let reply = assistant.ask(SESSION, "how many units?").await.unwrap();
    assert_eq!(reply, Some(Reply::Answer("42 units".to_string())));
}

#[tokio::test]
async fn salvaged_answer_keeps_inline_code() {
    let model = ScriptedModel::new(&["Total sales are `150` units"]);
    let assistant = assistant(model, false);
    assistant.upload(SESSION, "sales.csv", SALES_CSV).unwrap();

    let reply = assistant.ask(SESSION, "total sales").await.unwrap();
    assert_eq!(reply, Some(Reply::Answer("Total sales are `150` units".to_string())));
}

#[tokio::test]
async fn iteration_limit_is_an_error_reply() {
    let model = ScriptedModel::new(&[]);
    let assistant = assistant(model.clone(), false);
    assistant.upload(SESSION, "sales.csv", SALES_CSV).unwrap();

    let reply = assistant.ask(SESSION, "loop forever").await.unwrap();
    assert_eq!(
        reply,
        Some(Reply::Error(
            "An error occurred: Agent stopped due to iteration limit or time limit.".to_string()
        ))
    );
    assert_eq!(model.calls(), 5);
    assert_eq!(assistant.with_session(SESSION, |s| s.stage), Stage::AwaitingQuery);
    // Failed answers are not logged
    assert!(assistant.activity().store().unwrap().questions().is_empty());
}

#[tokio::test]
async fn execution_time_limit_stops_the_agent() {
    let model = ScriptedModel::slow(Duration::from_millis(500));
    let sheets = load_file("sales.csv", SALES_CSV).unwrap();
    let table = sheets.get("Sheet1").unwrap();
    let config = AgentConfig {
        max_execution_time: Duration::from_millis(50),
        ..AgentConfig::default()
    };

    let result = create_agent(&model, table, &config).run("total sales").await;
    assert!(matches!(result, Err(AgentError::LimitReached)));
}

#[tokio::test]
async fn blank_question_is_ignored() {
    let model = ScriptedModel::new(&[]);
    let assistant = assistant(model.clone(), false);
    assistant.upload(SESSION, "sales.csv", SALES_CSV).unwrap();

    assert_eq!(assistant.ask(SESSION, "   ").await.unwrap(), None);
    assert_eq!(model.calls(), 0);
    assert_eq!(assistant.with_session(SESSION, |s| s.stage), Stage::PreviewingSheet);
}

#[tokio::test]
async fn question_before_upload_is_rejected() {
    let assistant = assistant(ScriptedModel::new(&[]), false);
    assert!(assistant.ask(SESSION, "total sales").await.is_err());
    let errors = assistant.with_session(SESSION, |s| s.errors.clone());
    assert_eq!(errors.len(), 1);
}

#[tokio::test]
async fn unsupported_upload_keeps_awaiting_file() {
    let assistant = assistant(ScriptedModel::new(&[]), false);
    let result = assistant.upload(SESSION, "notes.txt", b"hello");
    assert!(matches!(result, Err(AppError::UnsupportedFileFormat(_))));
    assert_eq!(assistant.with_session(SESSION, |s| s.stage), Stage::AwaitingFile);
    let errors = assistant.with_session(SESSION, |s| s.errors.clone());
    assert_eq!(errors, vec!["Unsupported file format: .txt".to_string()]);
}

#[tokio::test]
async fn email_gate_logs_address_and_questions() {
    let model = ScriptedModel::new(&["Final Answer: 150"]);
    let assistant = assistant(model, true);

    assert!(matches!(
        assistant.upload(SESSION, "sales.csv", SALES_CSV),
        Err(AppError::InvalidEmail)
    ));

    assert!(matches!(
        assistant.submit_email(SESSION, "not-an-email").await,
        Err(AppError::InvalidEmail)
    ));
    assert_eq!(assistant.with_session(SESSION, |s| s.stage), Stage::AwaitingEmail);

    assistant.submit_email(SESSION, "a@b.com").await.unwrap();
    assert_eq!(assistant.with_session(SESSION, |s| s.stage), Stage::AwaitingFile);

    assistant.upload(SESSION, "sales.csv", SALES_CSV).unwrap();
    assistant.ask(SESSION, "total sales").await.unwrap();

    let store = assistant.activity().store().unwrap();
    let users = store.users();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].email, "a@b.com");

    let questions = store.questions();
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0].email, "a@b.com");
    assert_eq!(questions[0].question, "total sales");
    assert_eq!(questions[0].answer, "150");
}

#[tokio::test]
async fn failed_email_write_keeps_the_gate_closed() {
    let assistant = Assistant::new(
        config(true),
        ScriptedModel::new(&[]),
        ActivityLog::new(Some(FailingStore)),
    );

    let result = assistant.submit_email(SESSION, "a@b.com").await;
    assert!(matches!(result, Err(AppError::DatabaseUnavailable(_))));
    assert_eq!(assistant.with_session(SESSION, |s| s.stage), Stage::AwaitingEmail);
}

#[tokio::test]
async fn missing_store_skips_gate_with_notice() {
    let assistant: Assistant<ScriptedModel, MemoryLogStore> =
        Assistant::new(config(true), ScriptedModel::new(&[]), ActivityLog::disabled());

    assistant.submit_email(SESSION, "a@b.com").await.unwrap();
    let (stage, notices) = assistant.with_session(SESSION, |s| (s.stage, s.notices.clone()));
    assert_eq!(stage, Stage::AwaitingFile);
    assert_eq!(notices.len(), 1);
}

#[tokio::test]
async fn failed_question_log_does_not_hide_the_answer() {
    let assistant = Assistant::new(
        config(false),
        ScriptedModel::new(&["Final Answer: 150"]),
        ActivityLog::new(Some(FailingStore)),
    );
    assistant.upload(SESSION, "sales.csv", SALES_CSV).unwrap();

    let reply = assistant.ask(SESSION, "total sales").await.unwrap();
    assert_eq!(reply, Some(Reply::Answer("150".to_string())));
    let notices = assistant.with_session(SESSION, |s| s.notices.clone());
    assert!(notices[0].starts_with("Could not log question"));
}

#[tokio::test]
async fn sheet_selection_changes_the_queried_table() {
    let model = ScriptedModel::new(&["Action: table_query\nAction Input: columns", "Final Answer: ok"]);
    let assistant = assistant(model.clone(), false);

    let mut book = rust_xlsxwriter::Workbook::new();
    let first = book.add_worksheet();
    first.set_name("First").unwrap();
    first.write_string(0, 0, "alpha").unwrap();
    let second = book.add_worksheet();
    second.set_name("Second").unwrap();
    second.write_string(0, 0, "beta").unwrap();
    let bytes = book.save_to_buffer().unwrap();

    assistant.upload(SESSION, "book.xlsx", &bytes).unwrap();
    assistant.select_sheet(SESSION, "Second").unwrap();
    assert_eq!(assistant.with_session(SESSION, |s| s.stage), Stage::PreviewingSheet);
    assert!(assistant.select_sheet(SESSION, "Third").is_err());

    assistant.ask(SESSION, "which columns?").await.unwrap();
    assert!(model.last_user_prompt().contains("Observation: beta"));
}

/*!
# Spreadsheet Question Answering

A browser-based application that lets a user upload a spreadsheet, preview it,
and ask natural-language questions about its contents, built in Rust.

## Overview

The user uploads a `.csv`, `.xlsx` or `.xls` file, picks a sheet, and types a
question. A hosted chat model answers it by reasoning step by step and running
queries against the selected table; the answer is cleaned of boilerplate and
shown on the page. Optionally the user must enter an e-mail address first, and
every e-mail and question/answer pair is appended to a MongoDB database.

## Architecture

### Frontend Layer
- **Technologies**: HTML rendered server-side with handlebars, plain forms
- **Key Components**:
  - Email gate - Shown first when `REQUIRE_EMAIL` is set
  - Upload form - Accepts `.csv`, `.xlsx` and `.xls`
  - Sheet selector and data preview - First rows of the active sheet
  - Question box and answer area

### Backend Layer
- **Technologies**: Rust, axum, tokio
- **Core Components**:
  - File Loader - Reads CSV and Excel workbooks into tables
  - Table Query Language - Aggregations the agent runs against a table
  - Agent - Thought / Action / Observation loop over a chat model
  - Response Post-processor - Strips boilerplate, salvages unparseable output
  - Session State Machine - Email gate, upload, preview, question cycle

### Data Persistence Layer
- MongoDB collections `users` and `questions`, insert only
- Sessions are in memory and expire after 24 hours

## Modules

- **table**: Values, tables and the ordered sheet map
- **loader**: CSV and Excel loading
- **email**: Address validation
- **store**: Activity log and its MongoDB / in-memory stores
- **llm**: Chat-completion client
- **query**: Table query language
- **agent**: Agent factory and reasoning loop
- **postprocess**: Answer clean-up and salvage
- **session**: Session record and state transitions
- **orchestrator**: One method per user action
- **config**: Environment configuration
- **app**: Routing and handlers (feature `web`)

## Routes

- `GET /` - Renders the page for the current session
- `POST /email` - Submits the gating e-mail
- `POST /upload` - Uploads a spreadsheet (multipart field `file`)
- `POST /sheet` - Selects the active sheet
- `POST /ask` - Asks a question about the active sheet
- `POST /reset` - Drops the loaded workbook
- `GET /health` - Liveness check
*/

pub mod agent;
pub mod config;
pub mod email;
pub mod error;
pub mod llm;
pub mod loader;
pub mod orchestrator;
pub mod postprocess;
pub mod query;
pub mod session;
pub mod store;
pub mod table;

#[cfg(feature = "web")]
pub mod app;

pub use error::AppError;

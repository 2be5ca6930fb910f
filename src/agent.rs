use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

use crate::llm::{ChatMessage, ChatModel, LlmError};
use crate::query::run_query;
use crate::table::{PREVIEW_ROWS, Table};

pub const DEFAULT_MAX_ITERATIONS: usize = 5;
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(60);

/// Name of the single tool offered to the model
pub const TOOL_NAME: &str = "table_query";

const FINAL_ANSWER: &str = "Final Answer:";
const STOP_SEQUENCE: &str = "\nObservation:";

lazy_static! {
    static ref ACTION_REGEX: Regex =
        Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)")
            .unwrap();
}

const STRICT_PREFIX: &str = "You are a data analysis expert. NEVER mention variables, code, or give suggestions.
ALWAYS follow these rules:
1. Only show the final calculated results
2. For lists/groups, show each item on a new line with a bullet point (•)
3. For currency, always use $ with 2 decimal places
4. Sort numerical results from highest to lowest
5. Never explain the calculation process
6. Never mention queries, tools, or any technical terms
7. Never show or mention code or variables
8. Keep responses focused only on the actual values and results

Examples of good responses:
Q: What's the revenue by product?
• Laptops: $5,230.50
• Phones: $3,420.80
• Tablets: $2,150.25

Q: What's the average sales?
The average sales is $3,245.75

Q: How many units were sold by region?
• North: 1,234 units
• South: 987 units
• East: 856 units
• West: 654 units";

const BRIEF_PREFIX: &str = "You are a helpful data analyst working with a table of data.
Answer with a brief explanation (one or two sentences) followed by the results as bullet points (•).
For currency, use $ with 2 decimal places. Do not show queries or code.";

const TOOLS_SECTION: &str = "You have access to the following tool:

table_query: Runs one query against the table and returns the result. Input must be a single query line:
  columns                      -> list the column names
  rows                         -> number of rows
  head N                       -> first N rows
  describe                     -> type, count and numeric summary per column
  FUNC(column) [by column] [where column OP value]
     FUNC is one of sum, mean, min, max, count, median, unique (count() counts rows)
     OP is one of =, !=, >, >=, <, <=
  Example: sum(sales) by region where year >= 2023";

const FORMAT_INSTRUCTIONS: &str = "Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [table_query]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question";

/// Tone and formatting of the agent's answers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PromptStyle {
    /// Results only, no prose
    #[default]
    Strict,
    /// A short explanation followed by bullet results
    Brief,
}

impl PromptStyle {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "strict" => Some(PromptStyle::Strict),
            "brief" => Some(PromptStyle::Brief),
            _ => None,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            PromptStyle::Strict => STRICT_PREFIX,
            PromptStyle::Brief => BRIEF_PREFIX,
        }
    }

    /// Wrap the user's question the way this style expects
    pub fn wrap_question(&self, question: &str) -> String {
        match self {
            PromptStyle::Strict => format!(
                "ANALYZE AND SHOW ONLY THE RESULTS FOR: {}
REMEMBER:
- Show ONLY the calculated results
- NO explanations
- NO variables
- NO suggestions
- NO technical terms",
                question
            ),
            PromptStyle::Brief => question.to_string(),
        }
    }
}

/// Execution limits and prompt style for one agent
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub style: PromptStyle,
    pub max_iterations: usize,
    pub max_execution_time: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            style: PromptStyle::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
        }
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Could not parse LLM output: `{output}`")]
    OutputParsing { output: String },

    #[error("Agent stopped due to iteration limit or time limit.")]
    LimitReached,

    #[error(transparent)]
    Model(#[from] LlmError),
}

/// One parsed model reply
#[derive(Debug, PartialEq)]
pub enum AgentStep {
    Action { tool: String, input: String },
    Finish(String),
}

/// Parse a reply in the Thought / Action / Final Answer format
///
/// A final answer wins over an action when both are present.
pub fn parse_output(text: &str) -> Result<AgentStep, AgentError> {
    if let Some(pos) = text.find(FINAL_ANSWER) {
        let answer = text[pos + FINAL_ANSWER.len()..].trim();
        return Ok(AgentStep::Finish(answer.to_string()));
    }

    if let Some(caps) = ACTION_REGEX.captures(text) {
        let tool = caps[1].trim().to_string();
        let input = caps[2].trim().trim_matches('"').trim().to_string();
        return Ok(AgentStep::Action { tool, input });
    }

    Err(AgentError::OutputParsing {
        output: text.trim().to_string(),
    })
}

/// Natural-language query interface over one table
pub struct TableAgent<'a, M> {
    model: &'a M,
    table: &'a Table,
    config: &'a AgentConfig,
}

/// Bind a chat model to a table
pub fn create_agent<'a, M: ChatModel>(
    model: &'a M,
    table: &'a Table,
    config: &'a AgentConfig,
) -> TableAgent<'a, M> {
    TableAgent {
        model,
        table,
        config,
    }
}

impl<'a, M: ChatModel> TableAgent<'a, M> {
    pub fn system_prompt(&self) -> String {
        format!(
            "{}\n\nYou are working with a table of {} rows and {} columns.\n\n{}\n\n{}\n\nThis is the result of `head {}`:\n{}",
            self.config.style.prefix(),
            self.table.row_count(),
            self.table.column_count(),
            TOOLS_SECTION,
            FORMAT_INSTRUCTIONS,
            PREVIEW_ROWS,
            self.table.head(PREVIEW_ROWS).to_markdown()
        )
    }

    /// Answer a free-text question, bounded by the configured limits
    pub async fn run(&self, question: &str) -> Result<String, AgentError> {
        match tokio::time::timeout(self.config.max_execution_time, self.run_steps(question)).await
        {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "agent timed out after {:?}",
                    self.config.max_execution_time
                );
                Err(AgentError::LimitReached)
            }
        }
    }

    async fn run_steps(&self, question: &str) -> Result<String, AgentError> {
        let system = ChatMessage::system(self.system_prompt());
        let mut scratchpad = String::new();

        for iteration in 1..=self.config.max_iterations {
            let user = ChatMessage::user(format!(
                "Question: {}\nThought:{}",
                self.config.style.wrap_question(question),
                scratchpad
            ));

            let reply = self
                .model
                .complete(&[system.clone(), user], &[STOP_SEQUENCE])
                .await?;
            log::debug!("agent iteration {}: {}", iteration, reply);

            match parse_output(&reply)? {
                AgentStep::Finish(answer) => return Ok(answer),
                AgentStep::Action { tool, input } => {
                    let observation = if tool == TOOL_NAME {
                        run_query(self.table, &input)
                    } else {
                        format!("{} is not a valid tool, try one of [{}].", tool, TOOL_NAME)
                    };
                    log::debug!("observation: {}", observation);

                    scratchpad.push_str(reply.trim_end());
                    scratchpad.push_str("\nObservation: ");
                    scratchpad.push_str(&observation);
                    scratchpad.push_str("\nThought:");
                }
            }
        }

        Err(AgentError::LimitReached)
    }
}

use std::time::Duration;

use crate::agent::{AgentConfig, DEFAULT_MAX_ITERATIONS, PromptStyle};
use crate::error::AppError;
use crate::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_DATABASE: &str = "sheet_qa";

/// Runtime settings read from the environment
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,
    pub require_email: bool,
    pub agent: AgentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            api_key: None,
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            openai_model: DEFAULT_MODEL.to_string(),
            mongodb_uri: None,
            mongodb_database: DEFAULT_DATABASE.to_string(),
            require_email: false,
            agent: AgentConfig::default(),
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(AppError::Config(format!("{} must be a boolean, got '{}'", key, other))),
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64, AppError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| AppError::Config(format!("{} must be a positive integer, got '{}'", key, raw)))
}

impl Config {
    /// Load settings from the process environment, honouring a `.env` file
    pub fn from_env() -> Result<Self, AppError> {
        if let Ok(path) = dotenvy::dotenv() {
            log::info!("loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary lookup function
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.api_key = get("API_KEY");
        if let Some(url) = get("OPENAI_BASE_URL") {
            config.openai_base_url = url;
        }
        if let Some(model) = get("OPENAI_MODEL") {
            config.openai_model = model;
        }
        config.mongodb_uri = get("MONGODB_URI");
        if let Some(db) = get("MONGODB_DATABASE") {
            config.mongodb_database = db;
        }
        if let Some(raw) = get("REQUIRE_EMAIL") {
            config.require_email = parse_bool("REQUIRE_EMAIL", &raw)?;
        }
        if let Some(raw) = get("PROMPT_STYLE") {
            config.agent.style = PromptStyle::from_name(&raw).ok_or_else(|| {
                AppError::Config(format!("PROMPT_STYLE must be 'strict' or 'brief', got '{}'", raw))
            })?;
        }
        if let Some(raw) = get("AGENT_MAX_ITERATIONS") {
            let n = parse_number("AGENT_MAX_ITERATIONS", &raw)?;
            config.agent.max_iterations = if n == 0 {
                DEFAULT_MAX_ITERATIONS
            } else {
                n as usize
            };
        }
        if let Some(raw) = get("AGENT_MAX_EXECUTION_SECS") {
            let secs = parse_number("AGENT_MAX_EXECUTION_SECS", &raw)?;
            config.agent.max_execution_time = Duration::from_secs(secs.max(1));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.openai_model, "gpt-3.5-turbo-0125");
        assert!(config.api_key.is_none());
        assert!(config.mongodb_uri.is_none());
        assert!(!config.require_email);
        assert_eq!(config.agent.max_iterations, 5);
    }

    #[test]
    fn reads_all_settings() {
        let config = Config::from_lookup(lookup(&[
            ("API_KEY", "sk-test"),
            ("MONGODB_URI", "mongodb://localhost:27017"),
            ("MONGODB_DATABASE", "qa"),
            ("REQUIRE_EMAIL", "yes"),
            ("PROMPT_STYLE", "brief"),
            ("AGENT_MAX_ITERATIONS", "8"),
            ("AGENT_MAX_EXECUTION_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.mongodb_database, "qa");
        assert!(config.require_email);
        assert_eq!(config.agent.style, PromptStyle::Brief);
        assert_eq!(config.agent.max_iterations, 8);
        assert_eq!(config.agent.max_execution_time, Duration::from_secs(30));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = Config::from_lookup(lookup(&[("API_KEY", "  "), ("MONGODB_URI", "")])).unwrap();
        assert!(config.api_key.is_none());
        assert!(config.mongodb_uri.is_none());
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(Config::from_lookup(lookup(&[("REQUIRE_EMAIL", "maybe")])).is_err());
        assert!(Config::from_lookup(lookup(&[("PROMPT_STYLE", "verbose")])).is_err());
        assert!(Config::from_lookup(lookup(&[("AGENT_MAX_ITERATIONS", "-1")])).is_err());
    }
}

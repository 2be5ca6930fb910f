use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NARRATIVE_REGEX: Regex =
        Regex::new(r"(?i)^(Here's|Here is|I found|I calculated|The|Based on)\s+\w+\s+").unwrap();
    static ref SALVAGE_REGEX: Regex =
        Regex::new(r"(?s)Could not parse LLM output:\s*`(.*)`").unwrap();
}

/// Lead-ins removed from every answer
const BOILERPLATE: [&str; 4] = [
    "Analysis Result:",
    "Here's what I found:",
    "Here is what I found:",
    "Final Answer:",
];

/// Cleans the agent's free-text answer before display
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseFilter {
    /// Also drop narrative openers such as "The total is"
    pub strict: bool,
}

impl ResponseFilter {
    pub fn new(strict: bool) -> Self {
        ResponseFilter { strict }
    }

    /// Remove boilerplate lead-ins until nothing more can be removed
    ///
    /// Running to a fixed point makes `strip(strip(s)) == strip(s)`.
    pub fn strip(&self, response: &str) -> String {
        let mut current = response.trim().to_string();
        loop {
            let next = self.strip_once(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn strip_once(&self, response: &str) -> String {
        let mut text = response.trim();
        for lead in BOILERPLATE {
            if let Some(rest) = text.strip_prefix(lead) {
                text = rest.trim_start();
            }
        }
        if self.strict {
            if let Some(m) = NARRATIVE_REGEX.find(text) {
                let rest = text[m.end()..].trim();
                // Never strip an answer down to nothing
                if !rest.is_empty() {
                    text = rest;
                }
            }
        }
        text.trim().to_string()
    }
}

/// Recover the model's text from an output-parsing error message
///
/// # Examples
/// ```
/// use sheet_qa::postprocess::salvage;
///
/// assert_eq!(salvage("Could not parse LLM output: `42 units`").as_deref(), Some("42 units"));
/// assert_eq!(salvage("connection reset"), None);
/// ```
pub fn salvage(error_message: &str) -> Option<String> {
    SALVAGE_REGEX
        .captures(error_message)
        .map(|caps| caps[1].trim().to_string())
        .filter(|text| !text.is_empty())
}

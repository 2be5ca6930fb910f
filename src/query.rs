//! Table query language evaluated on behalf of the agent.
//!
//! Queries are single lines:
//!
//! ```text
//! columns
//! rows
//! head [n]
//! describe
//! FUNC(column) [by column] [where column OP value]
//! ```
//!
//! `FUNC` is one of `sum`, `mean`/`avg`, `min`, `max`, `count`, `median`,
//! `unique`; `OP` is one of `=`, `==`, `!=`, `>`, `>=`, `<`, `<=`.

use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

use crate::table::{PREVIEW_ROWS, Table, Value, format_number};

lazy_static! {
    static ref AGG_REGEX: Regex = Regex::new(
        r"(?i)^([a-z]+)\s*\(\s*(.*?)\s*\)(?:\s+by\s+(.+?))?(?:\s+where\s+(.+?)\s*(==|!=|>=|<=|=|>|<)\s*(.+?))?$"
    )
    .unwrap();
    static ref HEAD_REGEX: Regex = Regex::new(r"(?i)^head(?:\s*\(?\s*(\d+)\s*\)?)?$").unwrap();
}

#[derive(Error, Debug, PartialEq)]
pub enum QueryError {
    #[error("SyntaxError: could not understand query `{0}`")]
    Syntax(String),

    #[error("NameError: unknown function `{0}`; use one of sum, mean, min, max, count, median, unique")]
    UnknownFunction(String),

    #[error("KeyError: '{column}' (available columns: {available})")]
    UnknownColumn { column: String, available: String },

    #[error("TypeError: column '{0}' has no numeric values")]
    NotNumeric(String),

    #[error("SyntaxError: {0}() needs a column name")]
    MissingColumn(String),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AggFunc {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    Median,
    Unique,
}

impl AggFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sum" | "total" => Some(AggFunc::Sum),
            "mean" | "avg" | "average" => Some(AggFunc::Mean),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            "count" => Some(AggFunc::Count),
            "median" => Some(AggFunc::Median),
            "unique" | "distinct" => Some(AggFunc::Unique),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Mean => "mean",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Count => "count",
            AggFunc::Median => "median",
            AggFunc::Unique => "unique",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" | "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            _ => None,
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: CompareOp,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    Columns,
    Rows,
    Head(usize),
    Describe,
    Aggregate {
        func: AggFunc,
        column: Option<String>,
        group_by: Option<String>,
        filter: Option<Filter>,
    },
}

/// Result of a successful query, rendered as the agent's observation
#[derive(Clone, Debug, PartialEq)]
pub enum QueryResult {
    Scalar(String),
    Groups(Vec<(String, String)>),
    Text(String),
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryResult::Scalar(s) | QueryResult::Text(s) => write!(f, "{}", s),
            QueryResult::Groups(groups) => {
                let lines: Vec<String> = groups
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key, value))
                    .collect();
                write!(f, "{}", lines.join("\n"))
            }
        }
    }
}

/// Strip one layer of backticks or quotes around a name or literal
fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ['`', '"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

/// Parse a single query line
///
/// Surrounding whitespace, a trailing semicolon and a wrapping pair of
/// backticks (models like to format their input as code) are ignored.
pub fn parse_query(input: &str) -> Result<Query, QueryError> {
    let mut text = input.trim().trim_end_matches(';').trim();
    if text.len() > 1 && text.starts_with('`') && text.ends_with('`') {
        text = text.trim_matches('`').trim();
    }
    let lower = text.to_lowercase();

    match lower.as_str() {
        "columns" => return Ok(Query::Columns),
        "rows" | "len" | "count rows" => return Ok(Query::Rows),
        "describe" | "info" => return Ok(Query::Describe),
        _ => {}
    }

    if let Some(caps) = HEAD_REGEX.captures(text) {
        let n = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(PREVIEW_ROWS);
        return Ok(Query::Head(n));
    }

    let caps = AGG_REGEX
        .captures(text)
        .ok_or_else(|| QueryError::Syntax(text.to_string()))?;

    let func_name = &caps[1];
    let func =
        AggFunc::from_name(func_name).ok_or_else(|| QueryError::UnknownFunction(func_name.to_string()))?;

    let column = match unquote(&caps[2]) {
        c if c.is_empty() || c == "*" => None,
        c => Some(c),
    };
    if column.is_none() && func != AggFunc::Count {
        return Err(QueryError::MissingColumn(func.name().to_string()));
    }

    let group_by = caps.get(3).map(|m| unquote(m.as_str()));

    let filter = match (caps.get(4), caps.get(5), caps.get(6)) {
        (Some(col), Some(op), Some(value)) => Some(Filter {
            column: unquote(col.as_str()),
            op: CompareOp::from_symbol(op.as_str())
                .ok_or_else(|| QueryError::Syntax(text.to_string()))?,
            value: unquote(value.as_str()),
        }),
        _ => None,
    };

    Ok(Query::Aggregate {
        func,
        column,
        group_by,
        filter,
    })
}

fn resolve_column(table: &Table, name: &str) -> Result<usize, QueryError> {
    table
        .column_index(name)
        .ok_or_else(|| QueryError::UnknownColumn {
            column: name.to_string(),
            available: table.columns.join(", "),
        })
}

fn compare(cell: &Value, literal: &str) -> Option<Ordering> {
    if cell.is_empty() {
        return None;
    }
    if let (Some(lhs), Ok(rhs)) = (cell.as_f64(), literal.trim().parse::<f64>()) {
        return lhs.partial_cmp(&rhs);
    }
    let lhs = cell.to_string().to_lowercase();
    Some(lhs.as_str().cmp(literal.to_lowercase().as_str()))
}

fn aggregate(func: AggFunc, column_name: &str, values: &[&Value]) -> Result<String, QueryError> {
    if func == AggFunc::Count {
        return Ok(values.iter().filter(|v| !v.is_empty()).count().to_string());
    }

    if func == AggFunc::Unique {
        let mut seen: Vec<String> = Vec::new();
        for value in values.iter().filter(|v| !v.is_empty()) {
            let rendered = value.to_string();
            if !seen.contains(&rendered) {
                seen.push(rendered);
            }
        }
        return Ok(seen.join(", "));
    }

    let mut numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    if numbers.is_empty() && values.iter().any(|v| !v.is_empty()) {
        return Err(QueryError::NotNumeric(column_name.to_string()));
    }
    if numbers.is_empty() {
        return Ok(match func {
            AggFunc::Sum => "0".to_string(),
            _ => "NaN".to_string(),
        });
    }

    let result = match func {
        AggFunc::Sum => numbers.iter().sum(),
        AggFunc::Mean => numbers.iter().sum::<f64>() / numbers.len() as f64,
        AggFunc::Min => numbers.iter().cloned().fold(f64::INFINITY, f64::min),
        AggFunc::Max => numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        AggFunc::Median => {
            numbers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            let mid = numbers.len() / 2;
            if numbers.len() % 2 == 0 {
                (numbers[mid - 1] + numbers[mid]) / 2.0
            } else {
                numbers[mid]
            }
        }
        AggFunc::Count | AggFunc::Unique => unreachable!("handled above"),
    };

    Ok(format_number(result))
}

fn describe(table: &Table) -> String {
    let mut lines = vec![format!(
        "{} rows x {} columns",
        table.row_count(),
        table.column_count()
    )];

    for (index, name) in table.columns.iter().enumerate() {
        let present: Vec<&Value> = table.column_values(index).filter(|v| !v.is_empty()).collect();

        let mut kinds: Vec<&str> = present.iter().map(|v| v.type_name()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        let kind = match kinds.as_slice() {
            [] => "empty",
            [single] => *single,
            ["float", "int"] => "float",
            _ => "mixed",
        };

        let mut line = format!("{}: {}, {} non-empty", name, kind, present.len());
        let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
        if !numbers.is_empty() {
            let min = numbers.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
            line.push_str(&format!(
                ", min {}, max {}, mean {}",
                format_number(min),
                format_number(max),
                format_number(mean)
            ));
        }
        lines.push(line);
    }

    lines.join("\n")
}

/// Evaluate a parsed query against a table
pub fn execute(table: &Table, query: &Query) -> Result<QueryResult, QueryError> {
    match query {
        Query::Columns => Ok(QueryResult::Text(table.columns.join(", "))),
        Query::Rows => Ok(QueryResult::Scalar(table.row_count().to_string())),
        Query::Head(n) => Ok(QueryResult::Text(table.head(*n).to_text())),
        Query::Describe => Ok(QueryResult::Text(describe(table))),
        Query::Aggregate {
            func,
            column,
            group_by,
            filter,
        } => {
            let value_index = column
                .as_deref()
                .map(|c| resolve_column(table, c))
                .transpose()?;
            let group_index = group_by
                .as_deref()
                .map(|c| resolve_column(table, c))
                .transpose()?;
            let filter_index = filter
                .as_ref()
                .map(|f| resolve_column(table, &f.column))
                .transpose()?;

            let rows: Vec<&Vec<Value>> = table
                .rows
                .iter()
                .filter(|row| match (filter, filter_index) {
                    (Some(f), Some(idx)) => compare(&row[idx], &f.value)
                        .map(|ordering| f.op.accepts(ordering))
                        .unwrap_or(false),
                    _ => true,
                })
                .collect();

            // count() without a column counts rows
            let pick = |row: &Vec<Value>| -> Value {
                match value_index {
                    Some(idx) => row[idx].clone(),
                    None => Value::Bool(true),
                }
            };
            let column_label = column.clone().unwrap_or_else(|| "*".to_string());

            match group_index {
                None => {
                    let values: Vec<Value> = rows.iter().map(|&row| pick(row)).collect();
                    let refs: Vec<&Value> = values.iter().collect();
                    Ok(QueryResult::Scalar(aggregate(*func, &column_label, &refs)?))
                }
                Some(group_idx) => {
                    let mut groups: Vec<(String, Vec<Value>)> = Vec::new();
                    for &row in &rows {
                        let key = row[group_idx].to_string();
                        match groups.iter_mut().find(|(k, _)| *k == key) {
                            Some((_, values)) => values.push(pick(row)),
                            None => groups.push((key, vec![pick(row)])),
                        }
                    }

                    let mut out = Vec::with_capacity(groups.len());
                    for (key, values) in &groups {
                        let refs: Vec<&Value> = values.iter().collect();
                        out.push((key.clone(), aggregate(*func, &column_label, &refs)?));
                    }
                    Ok(QueryResult::Groups(out))
                }
            }
        }
    }
}

/// Parse and evaluate in one step; errors are returned as text for the agent
pub fn run_query(table: &Table, input: &str) -> String {
    match parse_query(input).and_then(|query| execute(table, &query)) {
        Ok(result) => result.to_string(),
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales_table() -> Table {
        Table::new(
            vec!["region".to_string(), "sales".to_string(), "rep".to_string()],
            vec![
                vec![Value::Text("North".into()), Value::Int(100), Value::Text("Ann".into())],
                vec![Value::Text("South".into()), Value::Int(50), Value::Text("Bob".into())],
                vec![Value::Text("North".into()), Value::Float(25.5), Value::Text("Cy".into())],
                vec![Value::Text("East".into()), Value::Empty, Value::Text("Ann".into())],
            ],
        )
    }

    #[test]
    fn parses_aggregate_with_group_and_filter() {
        let query = parse_query("sum(`sales`) by region where rep != 'Bob'").unwrap();
        assert_eq!(
            query,
            Query::Aggregate {
                func: AggFunc::Sum,
                column: Some("sales".to_string()),
                group_by: Some("region".to_string()),
                filter: Some(Filter {
                    column: "rep".to_string(),
                    op: CompareOp::Ne,
                    value: "Bob".to_string(),
                }),
            }
        );
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_query(" columns ").unwrap(), Query::Columns);
        assert_eq!(parse_query("HEAD 3").unwrap(), Query::Head(3));
        assert_eq!(parse_query("head").unwrap(), Query::Head(PREVIEW_ROWS));
        assert_eq!(parse_query("`describe`").unwrap(), Query::Describe);
    }

    #[test]
    fn rejects_unknown_function_and_garbage() {
        assert_eq!(
            parse_query("stdev(sales)"),
            Err(QueryError::UnknownFunction("stdev".to_string()))
        );
        assert!(matches!(parse_query("df['sales'].sum()"), Err(QueryError::Syntax(_))));
        assert_eq!(
            parse_query("sum()"),
            Err(QueryError::MissingColumn("sum".to_string()))
        );
    }

    #[test]
    fn sums_and_groups() {
        let table = sales_table();
        assert_eq!(run_query(&table, "sum(sales)"), "175.5");
        assert_eq!(
            run_query(&table, "sum(sales) by region"),
            "North: 125.5\nSouth: 50\nEast: 0"
        );
        assert_eq!(run_query(&table, "count()"), "4");
        assert_eq!(run_query(&table, "count(sales)"), "3");
    }

    #[test]
    fn filters_numerically_and_textually() {
        let table = sales_table();
        assert_eq!(run_query(&table, "sum(sales) where sales >= 50"), "150");
        assert_eq!(run_query(&table, "count() where region = north"), "2");
        assert_eq!(run_query(&table, "unique(rep) where region == North"), "Ann, Cy");
    }

    #[test]
    fn median_mean_min_max() {
        let table = sales_table();
        assert_eq!(run_query(&table, "median(sales)"), "50");
        assert_eq!(run_query(&table, "avg(sales)"), "58.5");
        assert_eq!(run_query(&table, "min(sales)"), "25.5");
        assert_eq!(run_query(&table, "max(sales)"), "100");
        assert_eq!(run_query(&table, "mean(sales) where region = West"), "NaN");
    }

    #[test]
    fn errors_become_observation_text() {
        let table = sales_table();
        let unknown = run_query(&table, "sum(revenue)");
        assert!(unknown.contains("KeyError: 'revenue'"));
        assert!(unknown.contains("region, sales, rep"));
        assert_eq!(
            run_query(&table, "sum(region)"),
            "TypeError: column 'region' has no numeric values"
        );
    }

    #[test]
    fn describe_summarises_columns() {
        let table = sales_table();
        let text = run_query(&table, "describe");
        assert!(text.starts_with("4 rows x 3 columns"));
        assert!(text.contains("region: text, 4 non-empty"));
        assert!(text.contains("sales: float, 3 non-empty, min 25.5, max 100, mean 58.5"));
    }
}

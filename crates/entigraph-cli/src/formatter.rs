//! Output formatting.

use clap::ValueEnum;
use entigraph_core::{CommitSummary, CompiledQuery, EntityId};
use entigraph_proto::{QueryResult, ValueMap};
use serde_json::json;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// One line per row
    Text,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Text => write!(f, "text"),
        }
    }
}

fn pretty(value: serde_json::Value) -> String {
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

fn row_line(row: &ValueMap) -> String {
    row.iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A compiled statement with its parameters.
pub fn compiled(format: OutputFormat, query: &CompiledQuery) -> String {
    match format {
        OutputFormat::Json => pretty(json!({
            "statement": query.text,
            "positional": query.positional.iter().cloned().map(serde_json::Value::from).collect::<Vec<_>>(),
            "named": query
                .named
                .iter()
                .map(|(name, param)| (name.clone(), serde_json::Value::from(param.value.clone())))
                .collect::<serde_json::Map<_, _>>(),
        })),
        OutputFormat::Text => {
            let mut out = query.text.clone();
            for (i, value) in query.positional.iter().enumerate() {
                out.push_str(&format!("\n  ?{} = {}", i + 1, value));
            }
            for (name, param) in &query.named {
                out.push_str(&format!("\n  :{} = {}", name, param.value));
            }
            out
        }
    }
}

/// A page of projection rows.
pub fn rows(format: OutputFormat, result: &QueryResult) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(result).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
        }
        OutputFormat::Text => {
            if result.is_empty() {
                return "No results".to_string();
            }
            let mut lines: Vec<String> = result.rows.iter().map(row_line).collect();
            if let Some(total) = result.total {
                lines.push(format!("({} of {} row(s))", result.len(), total));
            }
            lines.join("\n")
        }
    }
}

/// A row count.
pub fn count(format: OutputFormat, count: u64) -> String {
    match format {
        OutputFormat::Json => pretty(json!({ "count": count })),
        OutputFormat::Text => count.to_string(),
    }
}

/// The outcome of a reconciled save.
pub fn saved(format: OutputFormat, id: EntityId, summary: &CommitSummary) -> String {
    match format {
        OutputFormat::Json => pretty(json!({
            "id": id,
            "inserted": summary.inserted,
            "updated": summary.updated,
            "deleted": summary.deleted,
        })),
        OutputFormat::Text => format!(
            "saved #{}: {} inserted, {} updated, {} deleted",
            id, summary.inserted, summary.updated, summary.deleted
        ),
    }
}

/// A simple message.
pub fn message(format: OutputFormat, text: &str) -> String {
    match format {
        OutputFormat::Json => pretty(json!({ "message": text })),
        OutputFormat::Text => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigraph_proto::value_map;

    #[test]
    fn test_text_rows() {
        let result = QueryResult::new(vec![value_map! { "id" => 1, "name" => "Acme" }], 0, 10).with_total(3);
        assert_eq!(rows(OutputFormat::Text, &result), "id=1 name=Acme\n(1 of 3 row(s))");
        assert_eq!(rows(OutputFormat::Text, &QueryResult::default()), "No results");
    }

    #[test]
    fn test_json_count() {
        let out = count(OutputFormat::Json, 4);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["count"], 4);
    }
}

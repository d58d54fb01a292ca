//! Error types for domain expression parsing.

use crate::span::{offset_to_line_col, Span};
use thiserror::Error;

/// Error raised for malformed criteria, domain text or field paths.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " ({})", hint)?;
        }
        Ok(())
    }
}

impl ParseError {
    /// Create a new parse error.
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            hint: None,
        }
    }

    /// Create a parse error that has no meaningful source position, such as
    /// one raised for a structured criteria payload.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(message, Span::default())
    }

    /// Add a hint to the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Render the error under the offending line of `source`, with a caret
    /// run marking the span.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        let mut out = format!("error: {}\n  --> line {}:{}\n", self.message, line, col);

        if let Some(text) = source.lines().nth(line - 1) {
            let room = text.chars().count().saturating_sub(col - 1).max(1);
            let width = self.span.end.saturating_sub(self.span.start).clamp(1, room);
            out.push_str(&format!(
                "   |\n{:3}| {}\n   | {}{}\n",
                line,
                text,
                " ".repeat(col - 1),
                "^".repeat(width)
            ));
        }
        if let Some(hint) = &self.hint {
            out.push_str(&format!("   = hint: {}\n", hint));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting() {
        let source = "self.code = ? AND self.name = ?2";
        let err = ParseError::new("cannot mix '?' and '?N' placeholders", Span::new(30, 32))
            .with_hint("number every placeholder");

        let formatted = err.format_with_source(source);
        assert!(formatted.contains("line 1:31"));
        assert!(formatted.contains("cannot mix"));
        assert!(formatted.contains("hint: number every placeholder"));
        assert!(formatted.contains("\n   |                               ^^\n"));
    }

    #[test]
    fn test_display_includes_hint() {
        let err = ParseError::msg("unknown operator 'foo'").with_hint("use '=' or 'like'");
        assert_eq!(err.to_string(), "unknown operator 'foo' (use '=' or 'like')");
    }
}

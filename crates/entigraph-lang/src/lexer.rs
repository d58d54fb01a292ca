//! Lexer for domain expressions using logos.
//!
//! Domain expressions are JPQL-flavoured boolean conditions written against
//! the root entity, which is always called `self`:
//!
//! ```text
//! self.customer.name = :name AND self.total > ?1
//! ```
//!
//! The lexer only needs to recognise the parts the compiler rewrites (field
//! paths and placeholders) plus enough of the surrounding grammar to locate
//! them reliably. Everything else is copied through verbatim.

use crate::error::ParseError;
use crate::span::Span;
use logos::Logos;

/// Token types for domain expressions.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    /// `self.a.b`, stored without the `self.` prefix.
    #[regex(r"self(\.[a-zA-Z_][a-zA-Z0-9_]*)+", |lex| lex.slice()[5..].to_string())]
    Path(String),

    /// Sequential placeholder `?`.
    #[token("?")]
    Placeholder,

    /// Indexed placeholder `?N`.
    #[regex(r"\?[0-9]+", |lex| lex.slice()[1..].parse::<usize>().ok())]
    Indexed(usize),

    /// Named parameter `:name`.
    #[regex(r":[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Named(String),

    // Comparison operators
    #[token("=")]
    Eq,
    #[token("!=")]
    #[token("<>")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    /// Arithmetic and concatenation operators.
    #[regex(r"[+\-*/%|&]+")]
    Operator,

    /// Keywords, function names and aliases other than `self` paths.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    /// Single-quoted string literal, `''` escapes a quote.
    #[regex(r"'([^']|'')*'")]
    Str,

    /// Numeric literal.
    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,

    // Punctuation
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

impl Token {
    /// Check if this token is a comparison operator.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Token::Eq | Token::Ne | Token::Le | Token::Ge | Token::Lt | Token::Gt
        )
    }

    /// Check if this token is the keyword `name`, case-insensitively.
    pub fn is_keyword(&self, name: &str) -> bool {
        matches!(self, Token::Ident(ident) if ident.eq_ignore_ascii_case(name))
    }
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenize a domain expression.
///
/// Unlike an error-tolerant editor lexer, unrecognised input is rejected so
/// that malformed domain text surfaces as a [`ParseError`] instead of being
/// silently rewritten.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let span: Span = lexer.span().into();
        match result {
            Ok(token) => tokens.push(SpannedToken { token, span }),
            Err(()) => {
                return Err(ParseError::new(
                    format!("unexpected input {:?} in domain expression", span.slice(source)),
                    span,
                ));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_paths_and_placeholders() {
        assert_eq!(
            kinds("self.customer.name = ?1 AND self.code = :code"),
            vec![
                Token::Path("customer.name".into()),
                Token::Eq,
                Token::Indexed(1),
                Token::Ident("AND".into()),
                Token::Path("code".into()),
                Token::Eq,
                Token::Named("code".into()),
            ]
        );
    }

    #[test]
    fn test_bare_self_is_an_identifier() {
        assert_eq!(
            kinds("self = ? OR selfish.x <> 2"),
            vec![
                Token::Ident("self".into()),
                Token::Eq,
                Token::Placeholder,
                Token::Ident("OR".into()),
                Token::Ident("selfish".into()),
                Token::Dot,
                Token::Ident("x".into()),
                Token::Ne,
                Token::Number,
            ]
        );
    }

    #[test]
    fn test_string_literals_are_opaque() {
        let tokens = kinds("self.name LIKE 'self.x = ?'''");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[2], Token::Str);
    }

    #[test]
    fn test_rejects_unknown_input() {
        let err = tokenize("self.name = \"x\"").unwrap_err();
        assert_eq!(err.span, Span::new(12, 13));
    }
}

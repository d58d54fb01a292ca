//! Parsed domain expressions and their rewriting.

use crate::condition::{self, Condition};
use crate::error::ParseError;
use crate::lexer::{tokenize, SpannedToken, Token};
use crate::span::{Span, Spanned};

/// How positional placeholders are written in an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// No positional placeholders.
    None,
    /// Plain `?`, numbered in order of appearance.
    Sequential,
    /// Explicit `?N`.
    Indexed,
}

/// A named parameter referenced by an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedParameter {
    /// Parameter name without the leading colon.
    pub name: String,
    /// Field path the parameter is compared against, if any. The compiler
    /// uses it to give a missing parameter the right type.
    pub compared_path: Option<String>,
}

/// A tokenized domain expression.
///
/// ```
/// use entigraph_lang::DomainExpr;
///
/// let expr = DomainExpr::parse("self.customer.name = ? AND self.total > ?").unwrap();
/// let text = expr
///     .render::<()>(2, |path, _| Ok(format!("<{}>", path)))
///     .unwrap();
/// assert_eq!(text, "<customer.name> = ?3 AND <total> > ?4");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DomainExpr {
    source: String,
    tokens: Vec<SpannedToken>,
    style: PlaceholderStyle,
}

impl DomainExpr {
    /// Tokenize and validate a domain expression.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(source)?;

        let mut style = PlaceholderStyle::None;
        let mut depth: i32 = 0;
        for token in &tokens {
            let found = match token.token {
                Token::Placeholder => PlaceholderStyle::Sequential,
                Token::Indexed(0) => {
                    return Err(ParseError::new("placeholders are numbered from 1", token.span));
                }
                Token::Indexed(_) => PlaceholderStyle::Indexed,
                Token::LParen => {
                    depth += 1;
                    continue;
                }
                Token::RParen => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(ParseError::new("unbalanced ')'", token.span));
                    }
                    continue;
                }
                _ => continue,
            };
            if style != PlaceholderStyle::None && style != found {
                return Err(
                    ParseError::new("cannot mix '?' and '?N' placeholders", token.span)
                        .with_hint("number every placeholder, e.g. ?1, ?2"),
                );
            }
            style = found;
        }
        if depth > 0 {
            return Err(ParseError::new(
                "unclosed '('",
                Span::at(source.len()),
            ));
        }

        Ok(Self {
            source: source.to_string(),
            tokens,
            style,
        })
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder style used by this expression.
    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.style
    }

    /// Number of positional parameters the expression consumes: the count of
    /// `?` for sequential placeholders, or the highest `N` for indexed ones.
    pub fn placeholder_count(&self) -> usize {
        self.tokens
            .iter()
            .filter_map(|t| match t.token {
                Token::Placeholder => Some(1),
                Token::Indexed(n) => Some(n),
                _ => None,
            })
            .fold(0, |acc, n| match self.style {
                PlaceholderStyle::Sequential => acc + n,
                _ => acc.max(n),
            })
    }

    /// Field paths referenced through `self`, relative to the root entity.
    pub fn paths(&self) -> impl Iterator<Item = Spanned<&str>> + '_ {
        self.tokens.iter().filter_map(|t| match &t.token {
            Token::Path(path) => Some(Spanned::new(path.as_str(), t.span)),
            _ => None,
        })
    }

    /// Named parameters in order of first appearance.
    pub fn named_parameters(&self) -> Vec<NamedParameter> {
        let mut params: Vec<NamedParameter> = Vec::new();
        for (i, token) in self.tokens.iter().enumerate() {
            let Token::Named(name) = &token.token else {
                continue;
            };
            let compared_path = self.compared_path(i);
            match params.iter_mut().find(|p| &p.name == name) {
                Some(existing) => {
                    if existing.compared_path.is_none() {
                        existing.compared_path = compared_path;
                    }
                }
                None => params.push(NamedParameter {
                    name: name.clone(),
                    compared_path,
                }),
            }
        }
        params
    }

    /// Find the path on the other side of a comparison (or `IN`) from the
    /// token at `index`.
    fn compared_path(&self, index: usize) -> Option<String> {
        let token_at = |i: usize| self.tokens.get(i).map(|t| &t.token);
        let path_at = |i: usize| match token_at(i) {
            Some(Token::Path(path)) => Some(path.clone()),
            _ => None,
        };

        // self.x = :p
        if index >= 2 && token_at(index - 1).is_some_and(Token::is_comparison) {
            if let Some(path) = path_at(index - 2) {
                return Some(path);
            }
        }
        // :p = self.x
        if token_at(index + 1).is_some_and(Token::is_comparison) {
            if let Some(path) = path_at(index + 2) {
                return Some(path);
            }
        }
        // self.x IN (:p) / self.x NOT IN :p
        let mut i = index;
        if i >= 1 && token_at(i - 1) == Some(&Token::LParen) {
            i -= 1;
        }
        if i >= 2 && token_at(i - 1).is_some_and(|t| t.is_keyword("in")) {
            let mut j = i - 2;
            if token_at(j).is_some_and(|t| t.is_keyword("not")) && j >= 1 {
                j -= 1;
            }
            return path_at(j);
        }
        None
    }

    /// Parse the expression into a condition tree.
    pub fn condition(&self) -> Result<Condition, ParseError> {
        condition::parse(&self.source, &self.tokens)
    }

    /// Rewrite the expression.
    ///
    /// Every `self` path is replaced by whatever `resolve` returns for it,
    /// and positional placeholders are renumbered to start after `offset`
    /// so that several expressions can share one parameter list.
    pub fn render<E>(
        &self,
        offset: usize,
        mut resolve: impl FnMut(&str, Span) -> Result<String, E>,
    ) -> Result<String, E> {
        let mut out = String::with_capacity(self.source.len() + 16);
        let mut cursor = 0;
        let mut sequence = 0;

        for token in &self.tokens {
            let replacement = match &token.token {
                Token::Path(path) => resolve(path, token.span)?,
                Token::Placeholder => {
                    sequence += 1;
                    format!("?{}", offset + sequence)
                }
                Token::Indexed(n) => format!("?{}", offset + n),
                _ => continue,
            };
            out.push_str(&self.source[cursor..token.span.start]);
            out.push_str(&replacement);
            cursor = token.span.end;
        }
        out.push_str(&self.source[cursor..]);

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn identity(path: &str, _: Span) -> Result<String, ()> {
        Ok(format!("self.{}", path))
    }

    #[test]
    fn test_renumber_sequential() {
        let expr = DomainExpr::parse("self.a = ? OR (self.b > ? AND self.c IS NULL)").unwrap();
        assert_eq!(expr.placeholder_style(), PlaceholderStyle::Sequential);
        assert_eq!(expr.placeholder_count(), 2);
        assert_eq!(
            expr.render(0, identity).unwrap(),
            "self.a = ?1 OR (self.b > ?2 AND self.c IS NULL)"
        );
    }

    #[test]
    fn test_renumber_indexed_with_offset() {
        let expr = DomainExpr::parse("self.a = ?2 OR self.b = ?1").unwrap();
        assert_eq!(expr.placeholder_count(), 2);
        assert_eq!(expr.render(3, identity).unwrap(), "self.a = ?5 OR self.b = ?4");
    }

    #[test]
    fn test_mixed_placeholders_rejected() {
        let err = DomainExpr::parse("self.a = ? AND self.b = ?2").unwrap_err();
        assert!(err.message.contains("cannot mix"));
        assert_eq!(err.span, Span::new(24, 26));
    }

    #[test]
    fn test_unbalanced_parentheses() {
        assert!(DomainExpr::parse("(self.a = 1").is_err());
        assert!(DomainExpr::parse("self.a = 1)").is_err());
    }

    #[test]
    fn test_paths_are_rewritten_by_callback() {
        let expr = DomainExpr::parse("self.customer.name LIKE :q AND self.total >= 10").unwrap();
        let paths: Vec<_> = expr.paths().map(|p| p.value).collect();
        assert_eq!(paths, vec!["customer.name", "total"]);

        let text = expr
            .render::<()>(0, |path, _| {
                Ok(match path {
                    "customer.name" => "_customer.name".to_string(),
                    other => format!("self.{}", other),
                })
            })
            .unwrap();
        assert_eq!(text, "_customer.name LIKE :q AND self.total >= 10");
    }

    #[test]
    fn test_named_parameters_with_compared_paths() {
        let expr = DomainExpr::parse(
            "self.status = :status AND :day <= self.dueDate AND self.id NOT IN (:ids) AND :free > 0",
        )
        .unwrap();
        assert_eq!(
            expr.named_parameters(),
            vec![
                NamedParameter {
                    name: "status".into(),
                    compared_path: Some("status".into()),
                },
                NamedParameter {
                    name: "day".into(),
                    compared_path: Some("dueDate".into()),
                },
                NamedParameter {
                    name: "ids".into(),
                    compared_path: Some("id".into()),
                },
                NamedParameter {
                    name: "free".into(),
                    compared_path: None,
                },
            ]
        );
    }

    #[test]
    fn test_resolve_errors_propagate() {
        let expr = DomainExpr::parse("self.missing = 1").unwrap();
        let err = expr
            .render(0, |path, span| Err(ParseError::new(format!("unknown '{}'", path), span)))
            .unwrap_err();
        assert_eq!(err.span, Span::new(0, 12));
    }
}

//! Structured form of a domain expression.
//!
//! The compiler renders domain text for stores that understand it directly.
//! Stores that evaluate predicates themselves need the expression as a tree
//! instead; [`parse`] builds one for the boolean subset of the language:
//!
//! ```text
//! cond    := and (OR and)*
//! and     := unary (AND unary)*
//! unary   := NOT unary | '(' cond ')' | operand tail
//! tail    := cmp operand
//!          | IS [NOT] NULL
//!          | [NOT] IN '(' operand (',' operand)* ')' | [NOT] IN operand
//!          | [NOT] LIKE operand
//!          | [NOT] BETWEEN operand AND operand
//! operand := path | ? | ?N | :name | 'text' | [-]number | TRUE | FALSE | NULL
//! ```
//!
//! Function calls and arithmetic are outside that subset and fail with a
//! [`ParseError`].

use crate::error::ParseError;
use crate::lexer::{SpannedToken, Token};
use crate::span::Span;

/// A literal value written in the expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A `self` path, without the prefix.
    Path(String),
    /// Positional parameter, numbered from 1 within the expression.
    Positional(usize),
    /// Named parameter.
    Named(String),
    /// Literal.
    Literal(Literal),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// The operator with its operands swapped: `a < b` is `b > a`.
    pub fn flip(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            other => other,
        }
    }

    fn from_token(token: &Token) -> Option<Self> {
        Some(match token {
            Token::Eq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            _ => return None,
        })
    }
}

/// A boolean condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Like {
        operand: Operand,
        pattern: Operand,
        negated: bool,
    },
    In {
        operand: Operand,
        values: Vec<Operand>,
        negated: bool,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    Between {
        operand: Operand,
        low: Operand,
        high: Operand,
        negated: bool,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

/// Parse a token stream into a condition tree.
pub(crate) fn parse(source: &str, tokens: &[SpannedToken]) -> Result<Condition, ParseError> {
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        sequence: 0,
    };
    let condition = parser.condition()?;
    if let Some(token) = parser.peek() {
        return Err(ParseError::new(
            format!("unexpected {:?} after condition", token.span.slice(source)),
            token.span,
        ));
    }
    Ok(condition)
}

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [SpannedToken],
    pos: usize,
    sequence: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a SpannedToken> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|t| t.token.is_keyword(keyword))
    }

    fn advance(&mut self) -> Option<&'a SpannedToken> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn end_span(&self) -> Span {
        Span::at(self.source.len())
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ParseError> {
        match self.advance() {
            Some(t) if t.token == expected => Ok(()),
            Some(t) => Err(ParseError::new(
                format!("expected {}, found {:?}", what, t.span.slice(self.source)),
                t.span,
            )),
            None => Err(ParseError::new(format!("expected {}", what), self.end_span())),
        }
    }

    fn condition(&mut self) -> Result<Condition, ParseError> {
        let mut terms = vec![self.conjunction()?];
        while self.eat_keyword("or") {
            terms.push(self.conjunction()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Condition::Or(terms)
        })
    }

    fn conjunction(&mut self) -> Result<Condition, ParseError> {
        let mut terms = vec![self.unary()?];
        while self.eat_keyword("and") {
            terms.push(self.unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Condition::And(terms)
        })
    }

    fn unary(&mut self) -> Result<Condition, ParseError> {
        if self.eat_keyword("not") {
            return Ok(Condition::Not(Box::new(self.unary()?)));
        }
        if self.peek().is_some_and(|t| t.token == Token::LParen) {
            self.pos += 1;
            let inner = self.condition()?;
            self.expect(Token::RParen, "')'")?;
            return Ok(inner);
        }
        let operand = self.operand()?;
        self.tail(operand)
    }

    fn tail(&mut self, operand: Operand) -> Result<Condition, ParseError> {
        let Some(token) = self.advance() else {
            return Err(ParseError::new("incomplete condition", self.end_span()));
        };
        if let Some(op) = CompareOp::from_token(&token.token) {
            let right = self.operand()?;
            return Ok(Condition::Compare {
                left: operand,
                op,
                right,
            });
        }
        if token.token.is_keyword("is") {
            let negated = self.eat_keyword("not");
            if !self.eat_keyword("null") {
                return Err(self.unexpected("NULL"));
            }
            return Ok(Condition::IsNull { operand, negated });
        }

        let negated = token.token.is_keyword("not");
        let keyword = if negated {
            self.advance()
                .ok_or_else(|| ParseError::new("incomplete condition", self.end_span()))?
        } else {
            token
        };

        if keyword.token.is_keyword("in") {
            let values = if self.peek().is_some_and(|t| t.token == Token::LParen) {
                self.pos += 1;
                let mut values = vec![self.operand()?];
                while self.peek().is_some_and(|t| t.token == Token::Comma) {
                    self.pos += 1;
                    values.push(self.operand()?);
                }
                self.expect(Token::RParen, "')'")?;
                values
            } else {
                vec![self.operand()?]
            };
            return Ok(Condition::In {
                operand,
                values,
                negated,
            });
        }
        if keyword.token.is_keyword("like") {
            let pattern = self.operand()?;
            return Ok(Condition::Like {
                operand,
                pattern,
                negated,
            });
        }
        if keyword.token.is_keyword("between") {
            let low = self.operand()?;
            if !self.eat_keyword("and") {
                return Err(self.unexpected("AND"));
            }
            let high = self.operand()?;
            return Ok(Condition::Between {
                operand,
                low,
                high,
                negated,
            });
        }

        Err(ParseError::new(
            format!(
                "expected a comparison, IS, IN, LIKE or BETWEEN, found {:?}",
                keyword.span.slice(self.source)
            ),
            keyword.span,
        ))
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(t) => ParseError::new(
                format!("expected {}, found {:?}", expected, t.span.slice(self.source)),
                t.span,
            ),
            None => ParseError::new(format!("expected {}", expected), self.end_span()),
        }
    }

    fn operand(&mut self) -> Result<Operand, ParseError> {
        let Some(token) = self.advance() else {
            return Err(ParseError::new("expected an operand", self.end_span()));
        };
        let text = token.span.slice(self.source);
        Ok(match &token.token {
            Token::Path(path) => Operand::Path(path.clone()),
            Token::Placeholder => {
                self.sequence += 1;
                Operand::Positional(self.sequence)
            }
            Token::Indexed(n) => Operand::Positional(*n),
            Token::Named(name) => Operand::Named(name.clone()),
            Token::Str => {
                let inner = &text[1..text.len() - 1];
                Operand::Literal(Literal::String(inner.replace("''", "'")))
            }
            Token::Number => Operand::Literal(number(text, false, token.span)?),
            Token::Operator if text == "-" => match self.advance() {
                Some(next) if next.token == Token::Number => {
                    Operand::Literal(number(next.span.slice(self.source), true, next.span)?)
                }
                _ => return Err(ParseError::new("expected a number after '-'", token.span)),
            },
            Token::Ident(ident) => {
                if self.peek().is_some_and(|t| t.token == Token::LParen) {
                    return Err(ParseError::new(
                        format!("function '{}' is not supported here", ident),
                        token.span,
                    ));
                }
                match ident.to_ascii_lowercase().as_str() {
                    "null" => Operand::Literal(Literal::Null),
                    "true" => Operand::Literal(Literal::Bool(true)),
                    "false" => Operand::Literal(Literal::Bool(false)),
                    _ => {
                        return Err(ParseError::new(
                            format!("unexpected '{}'", ident),
                            token.span,
                        )
                        .with_hint("field paths start with 'self.'"))
                    }
                }
            }
            _ => {
                return Err(ParseError::new(
                    format!("expected an operand, found {:?}", text),
                    token.span,
                ))
            }
        })
    }
}

fn number(text: &str, negative: bool, span: Span) -> Result<Literal, ParseError> {
    let sign = if negative { -1 } else { 1 };
    if text.contains('.') {
        text.parse::<f64>()
            .map(|f| Literal::Float(f * sign as f64))
            .map_err(|_| ParseError::new("invalid number", span))
    } else {
        text.parse::<i64>()
            .map(|i| Literal::Int(i * sign))
            .map_err(|_| ParseError::new("number out of range", span))
    }
}

#[cfg(test)]
mod tests {
    use crate::DomainExpr;

    use super::*;
    use pretty_assertions::assert_eq;

    fn cond(text: &str) -> Condition {
        DomainExpr::parse(text).unwrap().condition().unwrap()
    }

    fn path(p: &str) -> Operand {
        Operand::Path(p.to_string())
    }

    #[test]
    fn test_precedence() {
        let parsed = cond("self.a = 1 OR self.b = ? AND NOT self.c IS NULL");
        assert_eq!(
            parsed,
            Condition::Or(vec![
                Condition::Compare {
                    left: path("a"),
                    op: CompareOp::Eq,
                    right: Operand::Literal(Literal::Int(1)),
                },
                Condition::And(vec![
                    Condition::Compare {
                        left: path("b"),
                        op: CompareOp::Eq,
                        right: Operand::Positional(1),
                    },
                    Condition::Not(Box::new(Condition::IsNull {
                        operand: path("c"),
                        negated: false,
                    })),
                ]),
            ])
        );
    }

    #[test]
    fn test_in_like_between() {
        assert_eq!(
            cond("self.id NOT IN (?1, ?2)"),
            Condition::In {
                operand: path("id"),
                values: vec![Operand::Positional(1), Operand::Positional(2)],
                negated: true,
            }
        );
        assert_eq!(
            cond("self.code LIKE 'it''s%'"),
            Condition::Like {
                operand: path("code"),
                pattern: Operand::Literal(Literal::String("it's%".into())),
                negated: false,
            }
        );
        assert_eq!(
            cond("(self.total BETWEEN -1.5 AND :max)"),
            Condition::Between {
                operand: path("total"),
                low: Operand::Literal(Literal::Float(-1.5)),
                high: Operand::Named("max".into()),
                negated: false,
            }
        );
    }

    #[test]
    fn test_rejects_functions_and_bare_names() {
        let expr = DomainExpr::parse("LOWER(self.name) = ?").unwrap();
        assert!(expr.condition().is_err());
        let expr = DomainExpr::parse("name = ?").unwrap();
        let err = expr.condition().unwrap_err();
        assert_eq!(err.hint.as_deref(), Some("field paths start with 'self.'"));
        assert!(DomainExpr::parse("self.a = 1 self.b").unwrap().condition().is_err());
    }
}

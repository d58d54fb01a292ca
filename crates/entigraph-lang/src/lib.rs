//! Entigraph domain expression language.
//!
//! Domain expressions are free-text boolean conditions that clients attach to
//! criteria searches and that code passes to `Query::filter`. They are
//! written against the root entity, always aliased `self`:
//!
//! ```text
//! self.customer.name = :name
//! self.total > ? AND self.confirmed = true
//! self.id IN (?1) OR self.code LIKE ?2
//! ```
//!
//! This crate tokenizes such expressions, validates placeholder usage and
//! rewrites them: `self` paths are handed to a resolver (the join planner in
//! `entigraph-core`) and positional placeholders are renumbered so several
//! expressions can share one parameter list. Stores that evaluate predicates
//! themselves can ask for the boolean subset as a [`Condition`] tree.
//!
//! # Usage
//!
//! ```rust
//! use entigraph_lang::DomainExpr;
//!
//! let expr = DomainExpr::parse("self.code = ? OR self.code = ?").unwrap();
//! assert_eq!(expr.placeholder_count(), 2);
//! ```

pub mod condition;
pub mod domain;
pub mod error;
pub mod lexer;
pub mod span;

pub use condition::{CompareOp, Condition, Literal, Operand};
pub use domain::{DomainExpr, NamedParameter, PlaceholderStyle};
pub use error::ParseError;
pub use lexer::{tokenize, SpannedToken, Token};
pub use span::{Span, Spanned};

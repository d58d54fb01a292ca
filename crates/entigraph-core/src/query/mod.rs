//! Query compilation and execution.
//!
//! Criteria payloads and domain expressions are parsed into predicate trees,
//! association paths are planned into joins, and a [`Query`] compiles it
//! all into a statement with bound parameters. [`QueryStore`] runs compiled
//! statements; the embedded [`StorageEngine`](crate::storage::StorageEngine)
//! implements it by evaluating the predicate tree over scanned rows.

mod binder;
mod compiler;
mod criteria;
mod executor;
mod filter;
mod join;
mod predicate;
mod selector;

pub use binder::{Bindings, DeclaredParam, ParamType, Parameter, DATE_VAR, TIME_VAR};
pub use compiler::{CompiledQuery, Query, QueryKind, SUBQUERY_ALIAS};
pub use criteria::{CriteriaParser, ParsedCriteria, ARCHIVED};
pub use executor::QueryStore;
pub use filter::FilterEvaluator;
pub use join::{Join, JoinPlan, PathResolver, ResolvedPath, ROOT_ALIAS};
pub use predicate::{Operand, Operator, PredicateNode};
pub use selector::{SelectField, Selector};

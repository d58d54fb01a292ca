//! Entigraph Core - query compiler, graph reconciler and entity store.
//!
//! This crate turns criteria and domain expressions into statements over a
//! metadata registry, reconciles nested client payloads into units of work
//! with optimistic concurrency, and ships an embedded sled store that
//! executes both.

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod parallel;
pub mod query;
pub mod reconcile;
pub mod storage;

pub use catalog::{EntityDef, PropertyDescriptor, PropertyKind, Registry, ScalarType, SchemaBundle};
pub use config::{EngineConfig, QueryConfig, ReconcileConfig};
pub use context::ContextView;
pub use error::{Error, ResolutionError};
pub use parallel::{Command, ParallelSessionExecutor};
pub use query::{CompiledQuery, CriteriaParser, PathResolver, PredicateNode, Query, QueryKind, QueryStore};
pub use reconcile::{Reconciled, Reconciler};
pub use storage::{CommitSummary, EntityId, StorageConfig, StorageEngine, UnitOfWork};

/// Re-export payload types.
pub use entigraph_proto as proto;

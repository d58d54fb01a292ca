//! Context materialization.
//!
//! Form handlers and computed fields see an entity the way the client
//! currently holds it: partially edited values layered over the stored
//! row. [`ContextView`] provides that view without loading anything the
//! caller never reads.

mod view;

pub use view::ContextView;

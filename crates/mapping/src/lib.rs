//! Declarative mapping of raw tabular rows onto normalized entities.
//!
//! - [`spec`]: the mapping specification tree and its JSON form
//! - [`engine`]: applies a specification to rows, producing a [`MappedBatch`]
//!   plus per-row errors
//!
//! [`MappedBatch`]: tabula_core::MappedBatch

pub mod engine;
pub mod spec;

pub use engine::{apply, MappingOutput};
pub use spec::{Component, ItemMapping, MappingSpec, ParameterMapping};

//! # indexkit core
//!
//! Storage-agnostic search indexing: the field/item model, condition
//! groups and queries, the processor pipeline with its built-in
//! processors, change tracking, and index orchestration.
//!
//! This crate contains no tokio, sqlx or filesystem I/O. Persistence and
//! search live behind the [`tracker::TrackerStore`] and
//! [`backend::Backend`] traits; in-memory implementations of both are
//! included.

pub mod backend;
pub mod batch;
pub mod condition;
pub mod context;
pub mod datasource;
pub mod error;
pub mod field;
pub mod index;
pub mod item;
pub mod processor;
pub mod query;
pub mod results;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use index::{Index, IndexSettings};
pub use query::{Query, QueryOptions};

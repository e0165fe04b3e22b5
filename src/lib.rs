//! Structured search queries over typed entities and relations.
//!
//! Callers describe what to fetch as ordered steps joined by relation steps,
//! projected (optionally aggregated) fields, and a constraint tree, then freeze
//! the description into an immutable [`query::SearchQuery`]. Evaluation is left
//! to backends.

#![warn(missing_docs)]

pub mod query;
pub mod types;

pub use query::{QueryError, QueryResult, SearchQuery, SearchQueryBuilder};

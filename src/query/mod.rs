#![forbid(unsafe_code)]

//! Structured search-query model.
//!
//! A query is assembled with [`SearchQueryBuilder`] and frozen into an
//! immutable, shareable [`SearchQuery`] that evaluating backends consume.

/// Query builder for programmatic query construction.
///
/// Hands out step and field handles and validates the query on freeze.
pub mod builder;

/// Prepared-query cache keyed by frozen queries.
pub mod cache;

/// Constraint tree: predicate kinds, operators, and support levels.
pub mod constraint;

/// Structured error types for the query model.
pub mod errors;

/// Explain trees for frozen queries.
pub mod explain;

/// Projected fields, aggregation operators, and sort orders.
pub mod field;

mod fingerprint;

/// Schema lookups used to validate names while building.
pub mod metadata;

/// Builder limits and their TOML configuration.
pub mod options;

/// The frozen query.
pub mod search_query;

/// Steps, relation steps, and directionality.
pub mod step;

/// Literal values used in constraints.
pub mod value;

pub use builder::SearchQueryBuilder;
pub use cache::{CacheMetrics, PreparedQueryCache};
pub use constraint::{
    Constraint, ConstraintKind, ExtensionConstraint, LogicalOperator, Operator, SupportLevel,
};
pub use errors::{QueryError, QueryResult};
pub use explain::{ExplainNode, ExplainProp};
pub use field::{
    AggregatedField, AggregationType, FieldRef, Projection, SortDirection, SortOrder, StepField,
};
pub use metadata::{InMemorySchema, SchemaProvider, TableKind};
pub use options::{BuilderOptions, ConfigError};
pub use search_query::SearchQuery;
pub use step::{Directionality, Orientation, QueryStep, RelationStep, Step, StepRef};
pub use value::Value;

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// Structured errors emitted while building a search query.
///
/// Every error is raised synchronously by the offending call and leaves the
/// builder in the state it had before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// A value lies outside its enumerated domain, or a required value is empty.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
    /// A step reference does not resolve to a step owned by this query.
    #[error("invalid reference to '{target}': {reason}")]
    InvalidReference { target: String, reason: &'static str },
    /// Two steps resolve to the same alias-or-table identity.
    #[error("duplicate step alias '{alias}'")]
    DuplicateAlias { alias: String },
    /// A mutation was attempted after the query was frozen.
    #[error("{operation} not allowed after freeze")]
    FrozenStateViolation { operation: &'static str },
    /// Table name is not known to the schema provider.
    #[error("unknown table '{table}'")]
    UnknownTable { table: String },
    /// Field name is not defined for the table.
    #[error("field '{field}' not defined on table '{table}'")]
    UnknownField { table: String, field: String },
    /// Role name is not known to the schema provider.
    #[error("unknown role '{role}'")]
    UnknownRole { role: String },
}

impl QueryError {
    /// Builds an [`QueryError::InvalidArgument`] from any displayable reason.
    pub fn invalid(reason: impl Into<String>) -> Self {
        QueryError::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Builds an [`QueryError::InvalidReference`] for a specific target.
    pub fn invalid_ref(target: impl Into<String>, reason: &'static str) -> Self {
        QueryError::InvalidReference {
            target: target.into(),
            reason,
        }
    }

    /// Builds an [`QueryError::FrozenStateViolation`] for the named operation.
    pub fn frozen(operation: &'static str) -> Self {
        QueryError::FrozenStateViolation { operation }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::InvalidArgument { .. } => "InvalidArgument",
            QueryError::InvalidReference { .. } => "InvalidReference",
            QueryError::DuplicateAlias { .. } => "DuplicateAlias",
            QueryError::FrozenStateViolation { .. } => "FrozenStateViolation",
            QueryError::UnknownTable { .. } => "UnknownTable",
            QueryError::UnknownField { .. } => "UnknownField",
            QueryError::UnknownRole { .. } => "UnknownRole",
        }
    }
}

/// Convenience wrapper that formats query errors with their codes.
pub struct QueryErrorWithCode<'a>(pub &'a QueryError);

impl fmt::Display for QueryErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}

/// Convenience alias for query-model results.
pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_prefixed_in_display() {
        let err = QueryError::frozen("set_role");
        assert_eq!(err.code(), "FrozenStateViolation");
        assert_eq!(
            QueryErrorWithCode(&err).to_string(),
            "[FrozenStateViolation] set_role not allowed after freeze"
        );
    }

    #[test]
    fn invalid_reference_names_target() {
        let err = QueryError::invalid_ref("p", "step not owned by this query");
        assert_eq!(
            err.to_string(),
            "invalid reference to 'p': step not owned by this query"
        );
    }
}

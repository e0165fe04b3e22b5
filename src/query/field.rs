#![forbid(unsafe_code)]

//! Field references scoped to a step, optionally aggregated, and sort orders.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::Serialize;

use crate::query::errors::{QueryError, QueryResult};
use crate::query::step::{normalize_alias, QueryId, QueryStep};

/// Aggregation operator applied to a projected field.
///
/// Codes form the closed range
/// [`AggregationType::GROUP_BY`]..=[`AggregationType::MAX_AGGREGATION`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    /// Group rows by the field value.
    GroupBy,
    /// Count of non-null values.
    Count,
    /// Count of distinct non-null values.
    CountDistinct,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
    /// Sum of the values.
    Sum,
    /// Arithmetic mean of the values.
    Avg,
}

const AGGREGATION_DESCRIPTIONS: [Option<&str>; 8] = [
    None,
    Some("group by"),
    Some("count"),
    Some("count distinct"),
    Some("min"),
    Some("max"),
    Some("sum"),
    Some("avg"),
];

impl AggregationType {
    /// Lowest valid aggregation code.
    pub const GROUP_BY: i32 = 1;
    /// Highest valid aggregation code.
    pub const MAX_AGGREGATION: i32 = 7;

    /// All aggregation types in code order.
    pub const ALL_VALUES: [AggregationType; 7] = [
        AggregationType::GroupBy,
        AggregationType::Count,
        AggregationType::CountDistinct,
        AggregationType::Min,
        AggregationType::Max,
        AggregationType::Sum,
        AggregationType::Avg,
    ];

    /// Numeric code used by external callers.
    pub const fn code(self) -> i32 {
        match self {
            AggregationType::GroupBy => 1,
            AggregationType::Count => 2,
            AggregationType::CountDistinct => 3,
            AggregationType::Min => 4,
            AggregationType::Max => 5,
            AggregationType::Sum => 6,
            AggregationType::Avg => 7,
        }
    }

    /// Human-readable label.
    pub fn description(self) -> &'static str {
        AGGREGATION_DESCRIPTIONS[self.code() as usize].unwrap_or("")
    }

    /// Label for a raw code, or `None` when the code is outside the description table.
    pub fn description_for(code: i32) -> Option<&'static str> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| AGGREGATION_DESCRIPTIONS.get(idx).copied().flatten())
    }

    /// Whether this operator groups rather than aggregates.
    pub fn is_group_by(self) -> bool {
        matches!(self, AggregationType::GroupBy)
    }
}

impl TryFrom<i32> for AggregationType {
    type Error = QueryError;

    fn try_from(code: i32) -> QueryResult<Self> {
        if !(Self::GROUP_BY..=Self::MAX_AGGREGATION).contains(&code) {
            return Err(QueryError::invalid(format!(
                "invalid aggregationType value: {code}"
            )));
        }
        Ok(Self::ALL_VALUES[(code - Self::GROUP_BY) as usize])
    }
}

impl FromStr for AggregationType {
    type Err = QueryError;

    fn from_str(s: &str) -> QueryResult<Self> {
        let needle = s.trim().replace('_', " ");
        AggregationType::ALL_VALUES
            .into_iter()
            .find(|agg| agg.description().eq_ignore_ascii_case(&needle))
            .ok_or_else(|| QueryError::invalid(format!("invalid aggregationType value: '{s}'")))
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Reference to a named field of the entity type queried by a step.
#[derive(Clone, Debug, Serialize)]
pub struct StepField {
    step_index: usize,
    step_identity: String,
    table_name: String,
    field_name: String,
    alias: Option<String>,
}

impl StepField {
    pub(crate) fn new(step_index: usize, step: &QueryStep, field_name: &str) -> QueryResult<Self> {
        let field_name = field_name.trim();
        if field_name.is_empty() {
            return Err(QueryError::invalid("field name cannot be empty"));
        }
        Ok(Self {
            step_index,
            step_identity: step.identity().to_owned(),
            table_name: step.table_name().to_owned(),
            field_name: field_name.to_owned(),
            alias: None,
        })
    }

    /// Position of the owning step in the query.
    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// Alias-or-table name of the owning step.
    pub fn step_identity(&self) -> &str {
        &self.step_identity
    }

    /// Table name of the owning step.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Field name.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Output alias, if one was set.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Returns the field with `alias` set; blank aliases are rejected.
    pub fn with_alias(mut self, alias: &str) -> QueryResult<Self> {
        self.alias = Some(normalize_alias(alias)?);
        Ok(self)
    }

    pub(crate) fn set_alias(&mut self, alias: Option<String>) {
        self.alias = alias;
    }

    /// Whether the field still points at `steps[step_index]` by identity.
    pub(crate) fn resolves_in(&self, steps: &[QueryStep]) -> bool {
        steps
            .get(self.step_index)
            .is_some_and(|step| step.identity() == self.step_identity)
    }
}

/// Compares the steps of two fields by alias-or-table name.
pub fn compare_steps(a: &StepField, b: &StepField) -> bool {
    a.step_identity == b.step_identity
}

impl PartialEq for StepField {
    fn eq(&self, other: &Self) -> bool {
        compare_steps(self, other)
            && self.field_name == other.field_name
            && self.alias == other.alias
    }
}

impl Eq for StepField {}

impl Hash for StepField {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.step_identity.hash(state);
        self.field_name.hash(state);
        self.alias.hash(state);
    }
}

impl fmt::Display for StepField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StepField(step:{}, fieldname:{}, alias:{})",
            self.step_identity,
            self.field_name,
            self.alias.as_deref().unwrap_or("null")
        )
    }
}

/// A step field annotated with an aggregation operator.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct AggregatedField {
    field: StepField,
    aggregation_type: AggregationType,
}

impl AggregatedField {
    pub(crate) fn new(field: StepField, aggregation_type: AggregationType) -> Self {
        Self {
            field,
            aggregation_type,
        }
    }

    /// The underlying step field.
    pub fn field(&self) -> &StepField {
        &self.field
    }

    /// Field name.
    pub fn field_name(&self) -> &str {
        self.field.field_name()
    }

    /// Output alias, if one was set.
    pub fn alias(&self) -> Option<&str> {
        self.field.alias()
    }

    /// Aggregation operator.
    pub fn aggregation_type(&self) -> AggregationType {
        self.aggregation_type
    }

    /// Label of the aggregation operator.
    pub fn aggregation_type_description(&self) -> &'static str {
        self.aggregation_type.description()
    }

    pub(crate) fn field_mut(&mut self) -> &mut StepField {
        &mut self.field
    }

    pub(crate) fn set_aggregation_type(&mut self, aggregation_type: AggregationType) {
        self.aggregation_type = aggregation_type;
    }
}

impl fmt::Display for AggregatedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AggregatedField(step:{}, fieldname:{}, alias:{}, aggregationtype:{})",
            self.field.step_identity,
            self.field.field_name,
            self.field.alias.as_deref().unwrap_or("null"),
            self.aggregation_type_description()
        )
    }
}

/// Projected field of a query.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Projection {
    /// Plain field.
    Field(StepField),
    /// Aggregated field.
    Aggregated(AggregatedField),
}

impl Projection {
    /// The underlying step field.
    pub fn step_field(&self) -> &StepField {
        match self {
            Projection::Field(field) => field,
            Projection::Aggregated(agg) => agg.field(),
        }
    }

    /// Aggregation operator, for aggregated fields.
    pub fn aggregation_type(&self) -> Option<AggregationType> {
        match self {
            Projection::Field(_) => None,
            Projection::Aggregated(agg) => Some(agg.aggregation_type()),
        }
    }

    /// Whether this projection is aggregated.
    pub fn is_aggregated(&self) -> bool {
        matches!(self, Projection::Aggregated(_))
    }

    pub(crate) fn step_field_mut(&mut self) -> &mut StepField {
        match self {
            Projection::Field(field) => field,
            Projection::Aggregated(agg) => agg.field_mut(),
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::Field(field) => field.fmt(f),
            Projection::Aggregated(agg) => agg.fmt(f),
        }
    }
}

/// Handle to a projected field owned by a particular query builder.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct FieldRef {
    pub(crate) query: QueryId,
    pub(crate) index: usize,
}

impl FieldRef {
    /// Position of the field in the query's projection list.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest values first.
    #[default]
    Ascending,
    /// Largest values first.
    Descending,
}

/// Ordering applied to the query results.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct SortOrder {
    field: StepField,
    direction: SortDirection,
    case_sensitive: bool,
}

impl SortOrder {
    /// Creates an ascending, case-sensitive sort order.
    pub fn new(field: StepField) -> Self {
        Self {
            field,
            direction: SortDirection::Ascending,
            case_sensitive: true,
        }
    }

    /// Returns the sort order with `direction` set.
    pub fn with_direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Returns the sort order with case sensitivity set.
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Field to sort on.
    pub fn field(&self) -> &StepField {
        &self.field
    }

    /// Sort direction.
    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    /// Whether string comparison is case sensitive.
    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            SortDirection::Ascending => "ascending",
            SortDirection::Descending => "descending",
        };
        write!(
            f,
            "SortOrder(field:{}.{}, dir:{}, casesensitive:{})",
            self.field.step_identity, self.field.field_name, dir, self.case_sensitive
        )
    }
}

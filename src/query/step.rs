#![forbid(unsafe_code)]

//! Steps: placeholders for the queried entity types, and relation steps that
//! join two of them.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::Serialize;

use crate::query::errors::{QueryError, QueryResult};
use crate::types::{NodeId, RoleId};

/// Identifier of the builder that created a [`StepRef`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) struct QueryId(pub(crate) u64);

/// Handle to a step owned by a particular query builder.
///
/// Handles are only meaningful for the builder that issued them; passing one
/// to another builder fails with [`QueryError::InvalidReference`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct StepRef {
    pub(crate) query: QueryId,
    pub(crate) index: usize,
}

impl StepRef {
    /// Position of the step in the query's ordered step sequence.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Which endpoint of a relation must align with the previous and next step.
///
/// The numeric codes match the external relation-step constants.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Directionality {
    /// Follow relations forward, and backward when the relation is bidirectional.
    #[default]
    Both,
    /// The next step must be the source of the relation.
    Source,
    /// The next step must be the destination of the relation.
    Destination,
    /// Follow relations in both orientations regardless of their own direction flag.
    All,
    /// Like [`Directionality::All`], but a pair matched in one orientation is not
    /// matched again in the other.
    Either,
}

/// Orientation of a candidate relation instance relative to the join.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Orientation {
    /// `previous` is the relation source, `next` its destination.
    Forward,
    /// `next` is the relation source, `previous` its destination.
    Backward,
}

impl Directionality {
    /// All directionality values in code order.
    pub const ALL_VALUES: [Directionality; 5] = [
        Directionality::Both,
        Directionality::Source,
        Directionality::Destination,
        Directionality::All,
        Directionality::Either,
    ];

    /// Numeric code used by external callers.
    pub const fn code(self) -> i32 {
        match self {
            Directionality::Both => 0,
            Directionality::Source => 1,
            Directionality::Destination => 2,
            Directionality::All => 3,
            Directionality::Either => 4,
        }
    }

    /// Human-readable label.
    pub const fn description(self) -> &'static str {
        match self {
            Directionality::Both => "both",
            Directionality::Source => "source",
            Directionality::Destination => "destination",
            Directionality::All => "all",
            Directionality::Either => "either",
        }
    }

    /// Label for a raw code, or `None` when the code is outside the table.
    pub fn description_for(code: i32) -> Option<&'static str> {
        Directionality::try_from(code).ok().map(Directionality::description)
    }

    /// Whether a relation instance in `orientation` may satisfy the join.
    ///
    /// `bidirectional` is the relation's own direction flag; it only matters
    /// for [`Directionality::Both`].
    pub fn permits(self, orientation: Orientation, bidirectional: bool) -> bool {
        match (self, orientation) {
            (Directionality::Destination, Orientation::Forward) => true,
            (Directionality::Destination, Orientation::Backward) => false,
            (Directionality::Source, Orientation::Forward) => false,
            (Directionality::Source, Orientation::Backward) => true,
            (Directionality::Both, Orientation::Forward) => true,
            (Directionality::Both, Orientation::Backward) => bidirectional,
            (Directionality::All | Directionality::Either, _) => true,
        }
    }

    /// Whether a pair already matched in one orientation must be skipped in the other.
    pub fn deduplicates_pairs(self) -> bool {
        matches!(self, Directionality::Either)
    }
}

impl TryFrom<i32> for Directionality {
    type Error = QueryError;

    fn try_from(code: i32) -> QueryResult<Self> {
        Directionality::ALL_VALUES
            .into_iter()
            .find(|dir| dir.code() == code)
            .ok_or_else(|| QueryError::invalid(format!("invalid directionality value: {code}")))
    }
}

impl FromStr for Directionality {
    type Err = QueryError;

    fn from_str(s: &str) -> QueryResult<Self> {
        let needle = s.trim();
        Directionality::ALL_VALUES
            .into_iter()
            .find(|dir| dir.description().eq_ignore_ascii_case(needle))
            .ok_or_else(|| QueryError::invalid(format!("invalid directionality value: '{s}'")))
    }
}

impl fmt::Display for Directionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Placeholder for one queried entity type.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct Step {
    table_name: String,
    alias: Option<String>,
    nodes: Option<BTreeSet<NodeId>>,
}

impl Step {
    pub(crate) fn new(table_name: &str) -> QueryResult<Self> {
        let table_name = table_name.trim();
        if table_name.is_empty() {
            return Err(QueryError::invalid("step table name cannot be empty"));
        }
        Ok(Self {
            table_name: table_name.to_owned(),
            alias: None,
            nodes: None,
        })
    }

    /// Entity type queried by this step.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Explicit alias, if one was set.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Node numbers restricting the matched instances, if any.
    pub fn nodes(&self) -> Option<&BTreeSet<NodeId>> {
        self.nodes.as_ref()
    }

    /// Name the step is referenced by: the alias, or else the table name.
    pub fn identity(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table_name)
    }

    pub(crate) fn set_alias(&mut self, alias: Option<String>) {
        self.alias = alias;
    }

    pub(crate) fn add_node(&mut self, node: NodeId) {
        self.nodes.get_or_insert_with(BTreeSet::new).insert(node);
    }
}

/// Validates an alias; blank aliases are rejected.
pub(crate) fn normalize_alias(alias: &str) -> QueryResult<String> {
    let trimmed = alias.trim();
    if trimmed.is_empty() {
        return Err(QueryError::invalid(format!("invalid alias value: '{alias}'")));
    }
    Ok(trimmed.to_owned())
}

fn fmt_opt<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "null".to_owned(), |v| v.to_string())
}

fn fmt_nodes(nodes: Option<&BTreeSet<NodeId>>) -> String {
    match nodes {
        None => "null".to_owned(),
        Some(nodes) => {
            let joined: Vec<String> = nodes.iter().map(NodeId::to_string).collect();
            format!("[{}]", joined.join(", "))
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Step(tablename:{}, alias:{}, nodes:{})",
            self.table_name,
            fmt_opt(self.alias.as_deref()),
            fmt_nodes(self.nodes())
        )
    }
}

/// A step that also represents a typed relation joining two other steps.
#[derive(Clone, Debug, Serialize)]
pub struct RelationStep {
    step: Step,
    previous: usize,
    next: usize,
    directionality: Directionality,
    checked_directionality: bool,
    role: Option<RoleId>,
}

impl RelationStep {
    pub(crate) fn new(step: Step, previous: usize, next: usize) -> Self {
        Self {
            step,
            previous,
            next,
            directionality: Directionality::default(),
            checked_directionality: false,
            role: None,
        }
    }

    /// The step part of this relation step.
    pub fn step(&self) -> &Step {
        &self.step
    }

    /// Relation table queried by this step.
    pub fn table_name(&self) -> &str {
        self.step.table_name()
    }

    /// Explicit alias, if one was set.
    pub fn alias(&self) -> Option<&str> {
        self.step.alias()
    }

    /// Node numbers restricting the matched relation instances, if any.
    pub fn nodes(&self) -> Option<&BTreeSet<NodeId>> {
        self.step.nodes()
    }

    /// Position of the previous step in the query.
    pub fn previous_index(&self) -> usize {
        self.previous
    }

    /// Position of the next step in the query.
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Which relation endpoint must match `previous` and `next`.
    pub fn directionality(&self) -> Directionality {
        self.directionality
    }

    /// Label for the directionality.
    pub fn directionality_description(&self) -> &'static str {
        self.directionality.description()
    }

    /// Whether the backend must verify the direction during evaluation.
    pub fn checked_directionality(&self) -> bool {
        self.checked_directionality
    }

    /// Relation type every matching relation must have; `None` means any.
    pub fn role(&self) -> Option<RoleId> {
        self.role
    }

    /// Role label in `reldef:<id>` form.
    pub fn role_description(&self) -> String {
        format!("reldef:{}", fmt_opt(self.role))
    }

    pub(crate) fn step_mut(&mut self) -> &mut Step {
        &mut self.step
    }

    pub(crate) fn set_directionality(&mut self, directionality: Directionality) {
        self.directionality = directionality;
    }

    pub(crate) fn set_checked_directionality(&mut self, checked: bool) {
        self.checked_directionality = checked;
    }

    pub(crate) fn set_role(&mut self, role: Option<RoleId>) {
        self.role = role;
    }
}

// Endpoints and checked directionality stay out of equality; the owning query
// compares both itself.
impl PartialEq for RelationStep {
    fn eq(&self, other: &Self) -> bool {
        self.step == other.step
            && self.directionality == other.directionality
            && self.role == other.role
    }
}

impl Eq for RelationStep {}

impl Hash for RelationStep {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.step.hash(state);
        self.directionality.hash(state);
        self.role.hash(state);
    }
}

impl fmt::Display for RelationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RelationStep(tablename:{}, alias:{}, nodes:{}, dir:{}, role:{})",
            self.step.table_name,
            fmt_opt(self.step.alias.as_deref()),
            fmt_nodes(self.step.nodes()),
            self.directionality_description(),
            self.role_description()
        )
    }
}

/// Entry in a query's ordered step sequence.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum QueryStep {
    /// Plain entity step.
    Node(Step),
    /// Relation step joining two other steps.
    Relation(RelationStep),
}

impl QueryStep {
    /// The step part, for either variant.
    pub fn as_step(&self) -> &Step {
        match self {
            QueryStep::Node(step) => step,
            QueryStep::Relation(rel) => rel.step(),
        }
    }

    /// The relation step, when this entry is one.
    pub fn as_relation(&self) -> Option<&RelationStep> {
        match self {
            QueryStep::Node(_) => None,
            QueryStep::Relation(rel) => Some(rel),
        }
    }

    /// Whether this entry is a relation step.
    pub fn is_relation(&self) -> bool {
        matches!(self, QueryStep::Relation(_))
    }

    /// Alias-or-table name of the step.
    pub fn identity(&self) -> &str {
        self.as_step().identity()
    }

    /// Table name of the step.
    pub fn table_name(&self) -> &str {
        self.as_step().table_name()
    }

    pub(crate) fn step_mut(&mut self) -> &mut Step {
        match self {
            QueryStep::Node(step) => step,
            QueryStep::Relation(rel) => rel.step_mut(),
        }
    }
}

impl fmt::Display for QueryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStep::Node(step) => step.fmt(f),
            QueryStep::Relation(rel) => rel.fmt(f),
        }
    }
}

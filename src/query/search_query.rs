#![forbid(unsafe_code)]

//! Frozen, immutable search query.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::query::constraint::Constraint;
use crate::query::explain::{self, ExplainNode};
use crate::query::field::{Projection, SortOrder};
use crate::query::fingerprint;
use crate::query::step::{QueryStep, RelationStep};

/// A validated query ready to be handed to an evaluating backend.
///
/// Produced by [`crate::query::SearchQueryBuilder::freeze`]. It has no
/// setters and no interior mutability, so it can be shared across threads
/// and used as a cache key.
#[derive(Clone, Debug, Serialize)]
pub struct SearchQuery {
    steps: Vec<QueryStep>,
    fields: Vec<Projection>,
    constraint: Option<Constraint>,
    sort_orders: Vec<SortOrder>,
    distinct: bool,
    max_number: Option<u64>,
    offset: u64,
}

impl SearchQuery {
    pub(crate) fn from_parts(
        steps: Vec<QueryStep>,
        fields: Vec<Projection>,
        constraint: Option<Constraint>,
        sort_orders: Vec<SortOrder>,
        distinct: bool,
        max_number: Option<u64>,
        offset: u64,
    ) -> Self {
        Self {
            steps,
            fields,
            constraint,
            sort_orders,
            distinct,
            max_number,
            offset,
        }
    }

    /// Steps in join order.
    pub fn steps(&self) -> &[QueryStep] {
        &self.steps
    }

    /// Step at `index`.
    pub fn step(&self, index: usize) -> Option<&QueryStep> {
        self.steps.get(index)
    }

    /// Step referenced by `identity`, with its position.
    pub fn step_by_identity(&self, identity: &str) -> Option<(usize, &QueryStep)> {
        self.steps
            .iter()
            .enumerate()
            .find(|(_, step)| step.identity() == identity)
    }

    /// Relation steps with their positions.
    pub fn relation_steps(&self) -> impl Iterator<Item = (usize, &RelationStep)> + '_ {
        self.steps
            .iter()
            .enumerate()
            .filter_map(|(idx, step)| step.as_relation().map(|rel| (idx, rel)))
    }

    /// Step the relation joins from.
    pub fn previous_of(&self, relation: &RelationStep) -> Option<&QueryStep> {
        self.steps.get(relation.previous_index())
    }

    /// Step the relation joins to.
    pub fn next_of(&self, relation: &RelationStep) -> Option<&QueryStep> {
        self.steps.get(relation.next_index())
    }

    /// Projected fields in output order.
    pub fn fields(&self) -> &[Projection] {
        &self.fields
    }

    /// Whether the projection consists of aggregated fields.
    pub fn is_aggregating(&self) -> bool {
        self.fields.first().is_some_and(Projection::is_aggregated)
    }

    /// Constraint tree, if any.
    pub fn constraint(&self) -> Option<&Constraint> {
        self.constraint.as_ref()
    }

    /// Sort orders in priority order.
    pub fn sort_orders(&self) -> &[SortOrder] {
        &self.sort_orders
    }

    /// Whether duplicate-free results are requested.
    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Result limit; `None` means unlimited.
    pub fn max_number(&self) -> Option<u64> {
        self.max_number
    }

    /// Number of leading results to skip.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Deterministic structural hash, stable across processes.
    pub fn fingerprint(&self) -> u64 {
        fingerprint::fingerprint(self)
    }

    /// Explain tree describing the query structure.
    pub fn explain(&self) -> ExplainNode {
        explain::explain_query(self)
    }

    // Relation-step state kept out of `RelationStep` equality: the endpoints
    // and whether the backend must verify the direction.
    fn relation_links(&self) -> impl Iterator<Item = (usize, usize, bool)> + '_ {
        self.relation_steps().map(|(_, rel)| {
            (
                rel.previous_index(),
                rel.next_index(),
                rel.checked_directionality(),
            )
        })
    }
}

impl PartialEq for SearchQuery {
    fn eq(&self, other: &Self) -> bool {
        self.steps == other.steps
            && self.relation_links().eq(other.relation_links())
            && self.fields == other.fields
            && self.constraint == other.constraint
            && self.sort_orders == other.sort_orders
            && self.distinct == other.distinct
            && self.max_number == other.max_number
            && self.offset == other.offset
    }
}

impl Eq for SearchQuery {}

impl Hash for SearchQuery {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.steps.hash(state);
        for link in self.relation_links() {
            link.hash(state);
        }
        self.fields.hash(state);
        self.constraint.hash(state);
        self.sort_orders.hash(state);
        self.distinct.hash(state);
        self.max_number.hash(state);
        self.offset.hash(state);
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("]")
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SearchQuery(steps:")?;
        write_list(f, &self.steps)?;
        f.write_str(", fields:")?;
        write_list(f, &self.fields)?;
        match &self.constraint {
            Some(constraint) => write!(f, ", constraint:{constraint}")?,
            None => f.write_str(", constraint:null")?,
        }
        f.write_str(", sortorders:")?;
        write_list(f, &self.sort_orders)?;
        let max = self
            .max_number
            .map_or_else(|| "-1".to_owned(), |n| n.to_string());
        write!(
            f,
            ", distinct:{}, max:{}, offset:{})",
            self.distinct, max, self.offset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::builder::SearchQueryBuilder;
    use crate::query::field::AggregationType;
    use crate::types::RoleId;
    use std::collections::hash_map::DefaultHasher;
    use std::sync::Arc;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    fn assert_send_sync<T: Send + Sync>() {}

    fn build(reversed: bool) -> Arc<SearchQuery> {
        let mut q = SearchQueryBuilder::new();
        let p = q.add_aliased_step("person", "p").unwrap();
        let a = q.add_step("article").unwrap();
        let r = if reversed {
            q.add_relation_step("posts", a, p).unwrap()
        } else {
            q.add_relation_step("posts", p, a).unwrap()
        };
        q.set_role(r, Some(RoleId(3))).unwrap();
        q.add_aggregated_field(a, "wordcount", AggregationType::Avg)
            .unwrap();
        q.freeze().unwrap()
    }

    #[test]
    fn frozen_query_is_shareable() {
        assert_send_sync::<SearchQuery>();
        assert_send_sync::<Arc<SearchQuery>>();
    }

    #[test]
    fn independently_built_queries_are_equal() {
        let a = build(false);
        let b = build(false);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn relation_endpoints_take_part_in_equality() {
        let forward = build(false);
        let backward = build(true);
        assert_ne!(forward, backward);
        assert_ne!(forward.fingerprint(), backward.fingerprint());
    }

    #[test]
    fn checked_directionality_takes_part_in_equality() {
        let plain = build(false);
        let mut q = SearchQueryBuilder::new();
        let p = q.add_aliased_step("person", "p").unwrap();
        let a = q.add_step("article").unwrap();
        let r = q.add_relation_step("posts", p, a).unwrap();
        q.set_role(r, Some(RoleId(3))).unwrap();
        q.set_checked_directionality(r, true).unwrap();
        q.add_aggregated_field(a, "wordcount", AggregationType::Avg)
            .unwrap();
        let checked = q.freeze().unwrap();

        let (_, plain_rel) = plain.relation_steps().next().unwrap();
        let (_, checked_rel) = checked.relation_steps().next().unwrap();
        assert_eq!(plain_rel, checked_rel);
        assert_ne!(plain, checked);
        assert_ne!(hash_of(&plain), hash_of(&checked));
        assert_ne!(plain.fingerprint(), checked.fingerprint());
    }

    #[test]
    fn navigates_relation_endpoints() {
        let q = build(false);
        let (idx, rel) = q.relation_steps().next().unwrap();
        assert_eq!(idx, 2);
        assert_eq!(q.previous_of(rel).map(QueryStep::identity), Some("p"));
        assert_eq!(q.next_of(rel).map(QueryStep::identity), Some("article"));
        assert_eq!(q.step_by_identity("article").map(|(i, _)| i), Some(1));
        assert!(q.is_aggregating());
    }

    #[test]
    fn serializes_to_json() {
        let q = build(false);
        let json = serde_json::to_value(&*q).unwrap();
        assert_eq!(json["steps"][2]["kind"], "relation");
        assert_eq!(json["steps"][2]["role"], 3);
        assert_eq!(json["fields"][0]["aggregation_type"], "avg");
        assert_eq!(json["max_number"], serde_json::Value::Null);
    }

    #[test]
    fn display_lists_members() {
        let q = build(false);
        let text = q.to_string();
        assert!(
            text.starts_with("SearchQuery(steps:[Step(tablename:person, alias:p, nodes:null)")
        );
        assert!(text.contains("dir:both, role:reldef:3"));
        assert!(
            text.ends_with("constraint:null, sortorders:[], distinct:false, max:-1, offset:0)")
        );
    }
}

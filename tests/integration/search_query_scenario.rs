use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use sombra_search::query::{
    AggregationType, Constraint, Directionality, Operator, QueryError, QueryResult, QueryStep,
    SearchQuery, SearchQueryBuilder, SortDirection, SortOrder,
};
use sombra_search::types::RoleId;

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// person p -[posts, source, role 3]-> article, avg(article.wordcount), p.age >= 18
fn build_scenario() -> QueryResult<(SearchQueryBuilder, Arc<SearchQuery>)> {
    let mut q = SearchQueryBuilder::new();
    let p = q.add_aliased_step("person", "p")?;
    let a = q.add_step("article")?;
    let r = q.add_relation_step("posts", p, a)?;
    q.set_directionality(r, Directionality::Source)?;
    q.set_role(r, Some(RoleId(3)))?;
    q.add_aggregated_field(a, "wordcount", AggregationType::Avg)?;
    let age = q.field(p, "age")?;
    q.set_constraint(Constraint::field_value(age, Operator::GreaterEqual, 18))?;
    let frozen = q.freeze()?;
    Ok((q, frozen))
}

#[test]
fn scenario_reads_back_frozen_values() -> QueryResult<()> {
    let (_, query) = build_scenario()?;

    assert_eq!(query.steps().len(), 3);
    assert_eq!(query.steps()[0].identity(), "p");
    assert_eq!(query.steps()[1].identity(), "article");
    let (idx, rel) = query.relation_steps().next().expect("relation step");
    assert_eq!(idx, 2);
    assert_eq!(rel.table_name(), "posts");
    assert_eq!(rel.directionality(), Directionality::Source);
    assert_eq!(rel.directionality().code(), 1);
    assert_eq!(rel.role(), Some(RoleId(3)));
    assert_eq!(query.previous_of(rel).map(QueryStep::identity), Some("p"));
    assert_eq!(query.next_of(rel).map(QueryStep::identity), Some("article"));

    assert_eq!(query.fields().len(), 1);
    assert_eq!(query.fields()[0].aggregation_type(), Some(AggregationType::Avg));
    assert_eq!(query.fields()[0].step_field().field_name(), "wordcount");

    let constraint = query.constraint().expect("constraint");
    assert!(!constraint.is_inverse());
    assert!(!constraint.is_modifiable());
    assert_eq!(constraint.to_string(), "p.age >= 18");
    Ok(())
}

#[test]
fn scenario_rejects_mutation_after_freeze() -> QueryResult<()> {
    let (mut q, query) = build_scenario()?;
    let r = q.step_ref_by_identity("posts")?;
    let err = q.set_role(r, Some(RoleId(4))).unwrap_err();
    assert!(matches!(err, QueryError::FrozenStateViolation { .. }));
    assert_eq!(err.code(), "FrozenStateViolation");
    assert_eq!(q.relation(r)?.role(), Some(RoleId(3)));
    assert_eq!(query.relation_steps().next().map(|(_, rel)| rel.role()), Some(Some(RoleId(3))));
    Ok(())
}

#[test]
fn independently_built_scenarios_are_equal() -> QueryResult<()> {
    let (_, first) = build_scenario()?;
    let (_, second) = build_scenario()?;
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first, second);
    assert_eq!(hash_of(&first), hash_of(&second));
    assert_eq!(first.fingerprint(), second.fingerprint());
    Ok(())
}

#[test]
fn changing_any_part_breaks_equality() -> QueryResult<()> {
    let (_, base) = build_scenario()?;

    let mut q = SearchQueryBuilder::new();
    let p = q.add_aliased_step("person", "p")?;
    let a = q.add_step("article")?;
    let r = q.add_relation_step("posts", p, a)?;
    q.set_directionality(r, Directionality::Destination)?;
    q.set_role(r, Some(RoleId(3)))?;
    q.add_aggregated_field(a, "wordcount", AggregationType::Avg)?;
    let age = q.field(p, "age")?;
    q.set_constraint(Constraint::field_value(age, Operator::GreaterEqual, 18))?;
    assert_ne!(*base, *q.freeze()?);
    Ok(())
}

#[test]
fn query_options_round_trip_through_freeze() -> QueryResult<()> {
    let mut q = SearchQueryBuilder::new();
    let p = q.add_aliased_step("person", "p")?;
    q.add_field(p, "name")?;
    let name = q.field(p, "name")?;
    q.add_sort_order(
        SortOrder::new(name)
            .with_direction(SortDirection::Descending)
            .with_case_sensitive(false),
    )?;
    q.set_distinct(true)?;
    q.set_max_number(Some(25))?;
    q.set_offset(50)?;
    let query = q.freeze()?;

    assert!(query.is_distinct());
    assert_eq!(query.max_number(), Some(25));
    assert_eq!(query.offset(), 50);
    assert_eq!(query.sort_orders()[0].direction(), SortDirection::Descending);
    assert!(!query.sort_orders()[0].case_sensitive());
    assert!(!query.is_aggregating());

    let json = serde_json::to_string(&*query).expect("serialize");
    assert!(json.contains("\"distinct\":true"));
    assert!(json.contains("\"direction\":\"descending\""));
    Ok(())
}

use std::sync::Arc;

use sombra_search::query::{
    AggregationType, BuilderOptions, Constraint, Directionality, InMemorySchema, QueryError,
    QueryResult, SearchQueryBuilder, SortOrder, StepRef,
};
use sombra_search::types::{NodeId, RoleId};

fn assert_frozen<T: std::fmt::Debug>(result: QueryResult<T>) {
    match result {
        Err(QueryError::FrozenStateViolation { .. }) => {}
        other => panic!("expected FrozenStateViolation, got {other:?}"),
    }
}

struct Handles {
    p: StepRef,
    a: StepRef,
    r: StepRef,
}

fn open_builder() -> QueryResult<(SearchQueryBuilder, Handles)> {
    let mut q = SearchQueryBuilder::new();
    let p = q.add_aliased_step("person", "p")?;
    let a = q.add_step("article")?;
    let r = q.add_relation_step("posts", p, a)?;
    Ok((q, Handles { p, a, r }))
}

#[test]
fn freeze_twice_returns_same_query() -> QueryResult<()> {
    let (mut q, _) = open_builder()?;
    let first = q.freeze()?;
    let second = q.freeze()?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn finish_consumes_builder() -> QueryResult<()> {
    let (q, _) = open_builder()?;
    let query = q.finish()?;
    assert_eq!(query.steps().len(), 3);
    Ok(())
}

#[test]
fn every_mutator_fails_after_freeze() -> QueryResult<()> {
    let (mut q, h) = open_builder()?;
    let f = q.add_aggregated_field(h.a, "wordcount", AggregationType::Sum)?;
    let age = q.field(h.p, "age")?;
    q.set_constraint(Constraint::equal(age.clone(), 30))?;
    let before = q.freeze()?;

    assert_frozen(q.add_step("comment"));
    assert_frozen(q.add_aliased_step("comment", "c"));
    assert_frozen(q.add_relation_step("posts", h.p, h.a));
    assert_frozen(q.add_aliased_relation_step("posts", "again", h.p, h.a));
    assert_frozen(q.add_relation_step_between("posts", "p", "article"));
    assert_frozen(q.set_alias(h.p, None));
    assert_frozen(q.add_node(h.a, NodeId(7)));
    assert_frozen(q.set_directionality(h.r, Directionality::All));
    assert_frozen(q.set_directionality_code(h.r, 2));
    assert_frozen(q.set_checked_directionality(h.r, true));
    assert_frozen(q.set_role(h.r, None));
    assert_frozen(q.set_role_by_name(h.r, "3"));
    assert_frozen(q.add_field(h.a, "title"));
    assert_frozen(q.add_aggregated_field(h.a, "title", AggregationType::Count));
    assert_frozen(q.add_aggregated_field_code(h.a, "title", 2));
    assert_frozen(q.set_field_alias(f, Some("total")));
    assert_frozen(q.set_aggregation_type(f, AggregationType::Max));
    assert_frozen(q.set_aggregation_code(f, 5));
    assert_frozen(q.set_constraint(Constraint::is_null(age.clone())));
    assert_frozen(q.clear_constraint());
    assert_frozen(q.constraint_mut());
    assert_frozen(q.add_sort_order(SortOrder::new(age)));
    assert_frozen(q.set_distinct(true));
    assert_frozen(q.set_max_number(Some(1)));
    assert_frozen(q.set_offset(1));

    let after = q.freeze()?;
    assert_eq!(*before, *after);
    assert_eq!(q.steps().len(), 3);
    assert_eq!(q.fields().len(), 1);
    assert_eq!(q.relation(h.r)?.directionality(), Directionality::Both);
    Ok(())
}

#[test]
fn frozen_constraint_tree_is_unmodifiable() -> QueryResult<()> {
    let (mut q, h) = open_builder()?;
    let age = q.field(h.p, "age")?;
    let title = q.field(h.a, "title")?;
    q.set_constraint(Constraint::and([
        Constraint::equal(age, 30),
        Constraint::is_null(title),
    ]))?;
    let query = q.freeze()?;
    let mut copy = query.constraint().cloned().expect("constraint");
    assert_frozen(copy.set_inverse(true).map(|_| ()));
    let name = q.field(h.p, "name")?;
    assert_frozen(copy.add_child(Constraint::is_null(name)).map(|_| ()));
    assert!(!copy.is_inverse());
    Ok(())
}

#[test]
fn failed_freeze_leaves_builder_open() -> QueryResult<()> {
    let mut q = SearchQueryBuilder::new();
    let p = q.add_step("person")?;
    let a = q.add_step("article")?;
    let err = q.freeze().unwrap_err();
    assert_eq!(err.code(), "InvalidReference");
    assert!(!q.is_frozen());
    q.add_relation_step("posts", p, a)?;
    assert!(q.freeze().is_ok());
    Ok(())
}

#[test]
fn foreign_and_unknown_references_are_rejected() -> QueryResult<()> {
    let (mut q, h) = open_builder()?;
    let (mut other, oh) = open_builder()?;

    let err = q.add_relation_step("posts", h.p, oh.a).unwrap_err();
    assert_eq!(err.code(), "InvalidReference");
    let err = other.set_role(h.r, Some(RoleId(1))).unwrap_err();
    assert_eq!(err.code(), "InvalidReference");
    let err = q
        .add_relation_step_between("posts", "p", "nobody")
        .unwrap_err();
    assert_eq!(err.code(), "InvalidReference");
    assert_eq!(q.steps().len(), 3);
    Ok(())
}

#[test]
fn schema_rejections_use_dedicated_errors() -> QueryResult<()> {
    let schema = InMemorySchema::new()
        .with_table("person", ["age"])
        .with_table("article", ["wordcount"])
        .with_relation("posts", Vec::<String>::new());
    let mut q =
        SearchQueryBuilder::with_options(BuilderOptions::strict()).with_schema(Arc::new(schema));
    let p = q.add_step("person")?;
    let a = q.add_step("article")?;
    let r = q.add_relation_step("posts", p, a)?;

    assert_eq!(q.add_step("invoice").unwrap_err().code(), "UnknownTable");
    assert_eq!(q.field(a, "title").unwrap_err().code(), "UnknownField");
    assert_eq!(q.set_role_by_name(r, "editor").unwrap_err().code(), "UnknownRole");
    Ok(())
}

#![forbid(unsafe_code)]

//! Deterministic xxh64 fingerprint of a frozen query.
//!
//! Every variable-length section is prefixed with its length and every sum
//! type with a tag byte, so structurally different queries do not collide by
//! concatenation.

use std::hash::Hasher;

use xxhash_rust::xxh64::Xxh64;

use crate::query::constraint::{Constraint, ConstraintKind, LogicalOperator, Operator};
use crate::query::field::{Projection, SortDirection, SortOrder, StepField};
use crate::query::search_query::SearchQuery;
use crate::query::step::{QueryStep, Step};
use crate::query::Value;

const NONE_TAG: u8 = 0xff;

pub(crate) fn fingerprint(query: &SearchQuery) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.write_u64(query.steps().len() as u64);
    for step in query.steps() {
        hash_query_step(step, &mut hasher);
    }
    hasher.write_u64(query.fields().len() as u64);
    for projection in query.fields() {
        hash_projection(projection, &mut hasher);
    }
    match query.constraint() {
        Some(constraint) => hash_constraint(constraint, &mut hasher),
        None => hasher.write_u8(NONE_TAG),
    }
    hasher.write_u64(query.sort_orders().len() as u64);
    for order in query.sort_orders() {
        hash_sort_order(order, &mut hasher);
    }
    hasher.write_u8(query.is_distinct() as u8);
    match query.max_number() {
        Some(max) => {
            hasher.write_u8(1);
            hasher.write_u64(max);
        }
        None => hasher.write_u8(NONE_TAG),
    }
    hasher.write_u64(query.offset());
    hasher.finish()
}

fn hash_str(value: &str, hasher: &mut Xxh64) {
    hasher.write_u64(value.len() as u64);
    hasher.write(value.as_bytes());
}

fn hash_opt_str(value: Option<&str>, hasher: &mut Xxh64) {
    match value {
        Some(value) => {
            hasher.write_u8(1);
            hash_str(value, hasher);
        }
        None => hasher.write_u8(NONE_TAG),
    }
}

fn hash_step(step: &Step, hasher: &mut Xxh64) {
    hash_str(step.table_name(), hasher);
    hash_opt_str(step.alias(), hasher);
    match step.nodes() {
        Some(nodes) => {
            hasher.write_u64(nodes.len() as u64);
            for node in nodes {
                hasher.write_u64(node.0);
            }
        }
        None => hasher.write_u8(NONE_TAG),
    }
}

fn hash_query_step(step: &QueryStep, hasher: &mut Xxh64) {
    match step {
        QueryStep::Node(step) => {
            hasher.write_u8(0);
            hash_step(step, hasher);
        }
        QueryStep::Relation(rel) => {
            hasher.write_u8(1);
            hash_step(rel.step(), hasher);
            hasher.write_u64(rel.previous_index() as u64);
            hasher.write_u64(rel.next_index() as u64);
            hasher.write_i32(rel.directionality().code());
            hasher.write_u8(rel.checked_directionality() as u8);
            match rel.role() {
                Some(role) => {
                    hasher.write_u8(1);
                    hasher.write_u32(role.0);
                }
                None => hasher.write_u8(NONE_TAG),
            }
        }
    }
}

fn hash_field(field: &StepField, hasher: &mut Xxh64) {
    hash_str(field.step_identity(), hasher);
    hash_str(field.field_name(), hasher);
    hash_opt_str(field.alias(), hasher);
}

fn hash_projection(projection: &Projection, hasher: &mut Xxh64) {
    match projection.aggregation_type() {
        Some(agg) => hasher.write_i32(agg.code()),
        None => hasher.write_i32(0),
    }
    hash_field(projection.step_field(), hasher);
}

fn hash_sort_order(order: &SortOrder, hasher: &mut Xxh64) {
    hash_field(order.field(), hasher);
    hasher.write_u8(match order.direction() {
        SortDirection::Ascending => 0,
        SortDirection::Descending => 1,
    });
    hasher.write_u8(order.case_sensitive() as u8);
}

fn operator_tag(operator: Operator) -> u8 {
    match operator {
        Operator::Equal => 0,
        Operator::NotEqual => 1,
        Operator::Less => 2,
        Operator::LessEqual => 3,
        Operator::Greater => 4,
        Operator::GreaterEqual => 5,
        Operator::Like => 6,
        Operator::Regexp => 7,
    }
}

fn hash_constraint(constraint: &Constraint, hasher: &mut Xxh64) {
    hasher.write_u8(constraint.is_inverse() as u8);
    match constraint.kind() {
        ConstraintKind::FieldValue {
            field,
            operator,
            value,
            case_sensitive,
        } => {
            hasher.write_u8(0);
            hash_field(field, hasher);
            hasher.write_u8(operator_tag(*operator));
            hash_value(value, hasher);
            hasher.write_u8(*case_sensitive as u8);
        }
        ConstraintKind::FieldCompare {
            field,
            operator,
            other,
        } => {
            hasher.write_u8(1);
            hash_field(field, hasher);
            hasher.write_u8(operator_tag(*operator));
            hash_field(other, hasher);
        }
        ConstraintKind::Between {
            field,
            lower,
            upper,
            case_sensitive,
        } => {
            hasher.write_u8(2);
            hash_field(field, hasher);
            hash_value(lower, hasher);
            hash_value(upper, hasher);
            hasher.write_u8(*case_sensitive as u8);
        }
        ConstraintKind::In {
            field,
            values,
            case_sensitive,
        } => {
            hasher.write_u8(3);
            hash_field(field, hasher);
            hasher.write_u64(values.len() as u64);
            for value in values {
                hash_value(value, hasher);
            }
            hasher.write_u8(*case_sensitive as u8);
        }
        ConstraintKind::Null { field } => {
            hasher.write_u8(4);
            hash_field(field, hasher);
        }
        ConstraintKind::Composite { operator, children } => {
            hasher.write_u8(5);
            hasher.write_u8(match operator {
                LogicalOperator::And => 0,
                LogicalOperator::Or => 1,
            });
            hasher.write_u64(children.len() as u64);
            for child in children {
                hash_constraint(child, hasher);
            }
        }
        ConstraintKind::RelationExists {
            relation,
            step_index,
        } => {
            hasher.write_u8(6);
            hash_str(relation, hasher);
            hasher.write_u64(*step_index as u64);
        }
        ConstraintKind::Extension(ext) => {
            hasher.write_u8(7);
            hash_str(&ext.name, hasher);
            hasher.write_u64(ext.arguments.len() as u64);
            for value in &ext.arguments {
                hash_value(value, hasher);
            }
            hasher.write_u8(ext.support as u8);
        }
    }
}

fn hash_value(value: &Value, hasher: &mut Xxh64) {
    match value {
        Value::Null => hasher.write_u8(0),
        Value::Bool(v) => {
            hasher.write_u8(1);
            hasher.write_u8(*v as u8);
        }
        Value::Int(v) => {
            hasher.write_u8(2);
            hasher.write_i64(*v);
        }
        Value::Float(v) => {
            hasher.write_u8(3);
            hasher.write_u64(v.to_bits());
        }
        Value::String(s) => {
            hasher.write_u8(4);
            hash_str(s, hasher);
        }
        Value::Bytes(bytes) => {
            hasher.write_u8(5);
            hasher.write_u64(bytes.len() as u64);
            hasher.write(bytes);
        }
        Value::DateTime(ts) => {
            hasher.write_u8(6);
            hasher.write(&ts.to_le_bytes());
        }
    }
}

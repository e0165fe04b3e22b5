#![forbid(unsafe_code)]

//! Explain trees for frozen queries.

use std::fmt::Write as _;

use serde::Serialize;

use crate::query::constraint::{Constraint, ConstraintKind};
use crate::query::field::Projection;
use crate::query::search_query::SearchQuery;
use crate::query::step::QueryStep;

/// Explain node representing one part of a query with optional metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExplainNode {
    /// Node name
    pub op: String,
    /// Additional properties describing the node
    pub props: Vec<ExplainProp>,
    /// Child nodes
    pub inputs: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Creates a new explain node with the given name.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            props: Vec::new(),
            inputs: Vec::new(),
        }
    }

    /// Looks up a property value by key.
    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props
            .iter()
            .find(|prop| prop.key == key)
            .map(|prop| prop.value.as_str())
    }

    /// Renders the tree as indented text, one node per line.
    ///
    /// Redactable properties are replaced by `?` when `redact` is set.
    pub fn render(&self, redact: bool) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0, redact);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize, redact: bool) {
        let _ = write!(out, "{:indent$}{}", "", self.op, indent = depth * 2);
        if !self.props.is_empty() {
            out.push_str(" (");
            for (idx, prop) in self.props.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                let value = if redact && prop.redactable {
                    "?"
                } else {
                    prop.value.as_str()
                };
                let _ = write!(out, "{}={}", prop.key, value);
            }
            out.push(')');
        }
        out.push('\n');
        for input in &self.inputs {
            input.render_into(out, depth + 1, redact);
        }
    }
}

/// Single property associated with an [`ExplainNode`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Property value serialized for display.
    pub value: String,
    /// Whether this property contains literal data that may be redacted.
    pub redactable: bool,
}

impl ExplainProp {
    fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: false,
        }
    }

    fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: true,
        }
    }
}

pub(crate) fn explain_query(query: &SearchQuery) -> ExplainNode {
    let mut root = ExplainNode::new("SearchQuery");
    root.props
        .push(ExplainProp::plain("fingerprint", format!("{:016x}", query.fingerprint())));
    root.props
        .push(ExplainProp::plain("distinct", query.is_distinct().to_string()));
    if let Some(max) = query.max_number() {
        root.props.push(ExplainProp::plain("max", max.to_string()));
    }
    if query.offset() > 0 {
        root.props
            .push(ExplainProp::plain("offset", query.offset().to_string()));
    }

    let mut steps = ExplainNode::new("Steps");
    steps.inputs = query
        .steps()
        .iter()
        .map(|step| explain_step(query, step))
        .collect();
    root.inputs.push(steps);

    if !query.fields().is_empty() {
        let mut fields = ExplainNode::new(if query.is_aggregating() {
            "Aggregate"
        } else {
            "Project"
        });
        fields.inputs = query.fields().iter().map(explain_projection).collect();
        root.inputs.push(fields);
    }

    if let Some(constraint) = query.constraint() {
        let mut filter = ExplainNode::new("Filter");
        filter.inputs.push(explain_constraint(constraint));
        root.inputs.push(filter);
    }

    if !query.sort_orders().is_empty() {
        let mut sort = ExplainNode::new("Sort");
        for order in query.sort_orders() {
            let mut node = ExplainNode::new("SortKey");
            node.props.push(ExplainProp::plain(
                "field",
                format!("{}.{}", order.field().step_identity(), order.field().field_name()),
            ));
            node.props
                .push(ExplainProp::plain("dir", format!("{:?}", order.direction())));
            if !order.case_sensitive() {
                node.props.push(ExplainProp::plain("case_sensitive", "false"));
            }
            sort.inputs.push(node);
        }
        root.inputs.push(sort);
    }
    root
}

fn explain_step(query: &SearchQuery, step: &QueryStep) -> ExplainNode {
    let base = step.as_step();
    let mut node = ExplainNode::new(match step {
        QueryStep::Node(_) => "Step",
        QueryStep::Relation(_) => "RelationStep",
    });
    node.props.push(ExplainProp::plain("table", base.table_name()));
    if let Some(alias) = base.alias() {
        node.props.push(ExplainProp::plain("as", alias));
    }
    if let Some(nodes) = base.nodes() {
        let ids: Vec<String> = nodes.iter().map(ToString::to_string).collect();
        node.props
            .push(ExplainProp::literal("nodes", format!("[{}]", ids.join(", "))));
    }
    if let QueryStep::Relation(rel) = step {
        let endpoint = |step: Option<&QueryStep>| step.map_or("?", QueryStep::identity).to_owned();
        node.props
            .push(ExplainProp::plain("from", endpoint(query.previous_of(rel))));
        node.props
            .push(ExplainProp::plain("to", endpoint(query.next_of(rel))));
        node.props
            .push(ExplainProp::plain("dir", rel.directionality_description()));
        node.props
            .push(ExplainProp::plain("role", rel.role_description()));
        if rel.checked_directionality() {
            node.props.push(ExplainProp::plain("checked", "true"));
        }
    }
    node
}

fn explain_projection(projection: &Projection) -> ExplainNode {
    let field = projection.step_field();
    let mut node = ExplainNode::new("Field");
    node.props.push(ExplainProp::plain(
        "field",
        format!("{}.{}", field.step_identity(), field.field_name()),
    ));
    if let Some(agg) = projection.aggregation_type() {
        node.props.push(ExplainProp::plain("agg", agg.description()));
    }
    if let Some(alias) = field.alias() {
        node.props.push(ExplainProp::plain("as", alias));
    }
    node
}

fn explain_constraint(constraint: &Constraint) -> ExplainNode {
    let mut node = ExplainNode::new(constraint.kind().name());
    if constraint.is_inverse() {
        node.props.push(ExplainProp::plain("inverse", "true"));
    }
    node.props.push(ExplainProp::plain(
        "support",
        constraint.support_level().description(),
    ));
    match constraint.kind() {
        ConstraintKind::Composite { operator, children } => {
            node.props
                .push(ExplainProp::plain("op", format!("{operator:?}")));
            node.inputs = children.iter().map(explain_constraint).collect();
        }
        ConstraintKind::RelationExists { relation, .. } => {
            node.props.push(ExplainProp::plain("relation", relation.as_str()));
        }
        _ => {
            node.props
                .push(ExplainProp::literal("predicate", constraint.to_string()));
        }
    }
    node
}

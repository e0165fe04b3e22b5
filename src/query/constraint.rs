#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Predicate tree attached to a search query.
//!
//! [`Constraint`] carries the state every predicate shares (the inverse flag
//! and the modifiable flag) around a closed [`ConstraintKind`]. Backends
//! translate the kinds exhaustively; predicates that have no dedicated kind go
//! through [`ConstraintKind::Extension`], which declares its own support level.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::query::errors::{QueryError, QueryResult};
use crate::query::field::StepField;
use crate::query::Value;

/// How well a backend can evaluate a predicate.
///
/// Planners push predicates at or above their threshold to the backend and
/// evaluate the remainder in-process.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportLevel {
    /// Not supported at all.
    None,
    /// Supported, but likely slow.
    Weak,
    /// Supported without index assistance.
    Normal,
    /// Supported in the optimal way.
    #[default]
    Optimal,
}

impl SupportLevel {
    /// Label used in explain output.
    pub fn description(self) -> &'static str {
        match self {
            SupportLevel::None => "none",
            SupportLevel::Weak => "weak",
            SupportLevel::Normal => "normal",
            SupportLevel::Optimal => "optimal",
        }
    }
}

/// Comparison operator for field predicates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// `=`
    Equal,
    /// `<>`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
    /// Pattern match with `%` and `_` wildcards.
    Like,
    /// Regular-expression match.
    Regexp,
}

impl Operator {
    /// Symbol used in display output.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "<>",
            Operator::Less => "<",
            Operator::LessEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
            Operator::Like => "LIKE",
            Operator::Regexp => "REGEXP",
        }
    }
}

/// Boolean connective of a composite constraint.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    /// All children must hold.
    And,
    /// At least one child must hold.
    Or,
}

impl LogicalOperator {
    fn keyword(self) -> &'static str {
        match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
        }
    }
}

/// Custom predicate evaluated by a backend that knows it by name.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct ExtensionConstraint {
    /// Predicate name as registered with the backend.
    pub name: String,
    /// Literal arguments.
    pub arguments: Vec<Value>,
    /// Support level the predicate declares for itself.
    pub support: SupportLevel,
}

/// Predicate-specific state.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    /// `field OP literal`.
    FieldValue {
        field: StepField,
        operator: Operator,
        value: Value,
        case_sensitive: bool,
    },
    /// `field OP other_field`.
    FieldCompare {
        field: StepField,
        operator: Operator,
        other: StepField,
    },
    /// `field BETWEEN lower AND upper`, both bounds inclusive.
    Between {
        field: StepField,
        lower: Value,
        upper: Value,
        case_sensitive: bool,
    },
    /// `field IN (values)`; values are deduplicated in insertion order.
    In {
        field: StepField,
        values: Vec<Value>,
        case_sensitive: bool,
    },
    /// `field IS NULL`.
    Null { field: StepField },
    /// AND/OR over child constraints.
    Composite {
        operator: LogicalOperator,
        children: Vec<Constraint>,
    },
    /// The relation step identified by `relation` has at least one matching relation.
    RelationExists { relation: String, step_index: usize },
    /// Named predicate outside the closed set.
    Extension(ExtensionConstraint),
}

impl ConstraintKind {
    /// Short name of the predicate kind.
    pub fn name(&self) -> &'static str {
        match self {
            ConstraintKind::FieldValue { .. } => "FieldValue",
            ConstraintKind::FieldCompare { .. } => "FieldCompare",
            ConstraintKind::Between { .. } => "Between",
            ConstraintKind::In { .. } => "In",
            ConstraintKind::Null { .. } => "Null",
            ConstraintKind::Composite { .. } => "Composite",
            ConstraintKind::RelationExists { .. } => "RelationExists",
            ConstraintKind::Extension(_) => "Extension",
        }
    }
}

/// Predicate node with a logical-negation flag.
#[derive(Clone, Debug, Serialize)]
pub struct Constraint {
    #[serde(flatten)]
    kind: ConstraintKind,
    inverse: bool,
    #[serde(skip)]
    modifiable: bool,
}

impl Constraint {
    /// Wraps a predicate kind; the constraint starts non-inverted and modifiable.
    pub fn new(kind: ConstraintKind) -> Self {
        Self {
            kind,
            inverse: false,
            modifiable: true,
        }
    }

    /// `field OP value`, case sensitive.
    pub fn field_value(field: StepField, operator: Operator, value: impl Into<Value>) -> Self {
        Self::new(ConstraintKind::FieldValue {
            field,
            operator,
            value: value.into(),
            case_sensitive: true,
        })
    }

    /// `field = value`.
    pub fn equal(field: StepField, value: impl Into<Value>) -> Self {
        Self::field_value(field, Operator::Equal, value)
    }

    /// `field OP other`.
    pub fn field_compare(field: StepField, operator: Operator, other: StepField) -> Self {
        Self::new(ConstraintKind::FieldCompare {
            field,
            operator,
            other,
        })
    }

    /// `field BETWEEN lower AND upper`.
    pub fn between(field: StepField, lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        Self::new(ConstraintKind::Between {
            field,
            lower: lower.into(),
            upper: upper.into(),
            case_sensitive: true,
        })
    }

    /// `field IN (values)`; fails when `values` is empty.
    pub fn in_list<I, V>(field: StepField, values: I) -> QueryResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut deduped: Vec<Value> = Vec::new();
        for value in values.into_iter().map(Into::into) {
            if !deduped.contains(&value) {
                deduped.push(value);
            }
        }
        if deduped.is_empty() {
            return Err(QueryError::invalid("in_list requires at least one value"));
        }
        Ok(Self::new(ConstraintKind::In {
            field,
            values: deduped,
            case_sensitive: true,
        }))
    }

    /// `field IS NULL`.
    pub fn is_null(field: StepField) -> Self {
        Self::new(ConstraintKind::Null { field })
    }

    /// Conjunction of `children`.
    pub fn and(children: impl IntoIterator<Item = Constraint>) -> Self {
        Self::new(ConstraintKind::Composite {
            operator: LogicalOperator::And,
            children: children.into_iter().collect(),
        })
    }

    /// Disjunction of `children`.
    pub fn or(children: impl IntoIterator<Item = Constraint>) -> Self {
        Self::new(ConstraintKind::Composite {
            operator: LogicalOperator::Or,
            children: children.into_iter().collect(),
        })
    }

    /// Named custom predicate.
    pub fn extension(
        name: impl Into<String>,
        arguments: Vec<Value>,
        support: SupportLevel,
    ) -> QueryResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(QueryError::invalid("extension constraint name cannot be empty"));
        }
        Ok(Self::new(ConstraintKind::Extension(ExtensionConstraint {
            name,
            arguments,
            support,
        })))
    }

    /// Predicate-specific state.
    pub fn kind(&self) -> &ConstraintKind {
        &self.kind
    }

    /// Whether the predicate is negated.
    pub fn is_inverse(&self) -> bool {
        self.inverse
    }

    /// Whether the constraint may still be altered.
    pub fn is_modifiable(&self) -> bool {
        self.modifiable
    }

    /// Sets the negation flag.
    pub fn set_inverse(&mut self, inverse: bool) -> QueryResult<&mut Self> {
        self.ensure_modifiable("set_inverse")?;
        self.inverse = inverse;
        Ok(self)
    }

    /// Sets case sensitivity for kinds that compare against literals.
    pub fn set_case_sensitive(&mut self, case_sensitive: bool) -> QueryResult<&mut Self> {
        self.ensure_modifiable("set_case_sensitive")?;
        match &mut self.kind {
            ConstraintKind::FieldValue {
                case_sensitive: flag,
                ..
            }
            | ConstraintKind::Between {
                case_sensitive: flag,
                ..
            }
            | ConstraintKind::In {
                case_sensitive: flag,
                ..
            } => {
                *flag = case_sensitive;
                Ok(self)
            }
            other => Err(QueryError::invalid(format!(
                "{} constraint has no case sensitivity",
                other.name()
            ))),
        }
    }

    /// Appends a child to a composite constraint.
    pub fn add_child(&mut self, child: Constraint) -> QueryResult<&mut Self> {
        self.ensure_modifiable("add_child")?;
        match &mut self.kind {
            ConstraintKind::Composite { children, .. } => {
                children.push(child);
                Ok(self)
            }
            other => Err(QueryError::invalid(format!(
                "{} constraint cannot take children",
                other.name()
            ))),
        }
    }

    /// Makes this constraint and all of its children unmodifiable. Idempotent.
    pub fn set_unmodifiable(&mut self) {
        self.modifiable = false;
        if let ConstraintKind::Composite { children, .. } = &mut self.kind {
            for child in children {
                child.set_unmodifiable();
            }
        }
    }

    /// How well a backend can evaluate this predicate.
    pub fn support_level(&self) -> SupportLevel {
        match &self.kind {
            ConstraintKind::FieldValue {
                operator: Operator::Regexp,
                ..
            } => SupportLevel::Weak,
            ConstraintKind::FieldValue {
                operator: Operator::Like,
                value: Value::String(pattern),
                ..
            } if pattern.starts_with('%') || pattern.starts_with('_') => SupportLevel::Normal,
            ConstraintKind::FieldCompare {
                operator: Operator::Regexp,
                ..
            } => SupportLevel::Weak,
            ConstraintKind::FieldCompare {
                operator: Operator::Like,
                ..
            } => SupportLevel::Normal,
            ConstraintKind::Composite { children, .. } => children
                .iter()
                .map(Constraint::support_level)
                .min()
                .unwrap_or_default(),
            ConstraintKind::Extension(ext) => ext.support,
            _ => SupportLevel::Optimal,
        }
    }

    /// Splits the constraint into the part supported at `min` or better and the
    /// remainder.
    ///
    /// Only a non-inverted AND is split child by child; any other constraint
    /// lands whole on one side. Either side is `None` when empty.
    pub fn split_by_support(&self, min: SupportLevel) -> (Option<Constraint>, Option<Constraint>) {
        if self.support_level() >= min {
            return (Some(self.clone()), None);
        }
        match &self.kind {
            ConstraintKind::Composite {
                operator: LogicalOperator::And,
                children,
            } if !self.inverse => {
                let (pushed, residual): (Vec<Constraint>, Vec<Constraint>) = children
                    .iter()
                    .cloned()
                    .partition(|child| child.support_level() >= min);
                (collapse_and(pushed), collapse_and(residual))
            }
            _ => (None, Some(self.clone())),
        }
    }

    /// Every step field referenced anywhere in the tree.
    pub fn fields(&self) -> Vec<&StepField> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a StepField>) {
        match &self.kind {
            ConstraintKind::FieldValue { field, .. }
            | ConstraintKind::Between { field, .. }
            | ConstraintKind::In { field, .. }
            | ConstraintKind::Null { field } => out.push(field),
            ConstraintKind::FieldCompare { field, other, .. } => {
                out.push(field);
                out.push(other);
            }
            ConstraintKind::Composite { children, .. } => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            ConstraintKind::RelationExists { .. } | ConstraintKind::Extension(_) => {}
        }
    }

    /// Number of nodes and maximum depth of the tree.
    pub fn stats(&self) -> ConstraintStats {
        match &self.kind {
            ConstraintKind::Composite { children, .. } => {
                let mut nodes = 1;
                let mut max_depth = 0;
                for child in children {
                    let stats = child.stats();
                    nodes += stats.nodes;
                    max_depth = max_depth.max(stats.depth);
                }
                ConstraintStats {
                    nodes,
                    depth: max_depth + 1,
                }
            }
            _ => ConstraintStats { nodes: 1, depth: 1 },
        }
    }

    pub(crate) fn relation_exists(relation: String, step_index: usize) -> Self {
        Self::new(ConstraintKind::RelationExists {
            relation,
            step_index,
        })
    }

    pub(crate) fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Constraint)) {
        f(self);
        if let ConstraintKind::Composite { children, .. } = &self.kind {
            for child in children {
                child.visit(f);
            }
        }
    }

    fn ensure_modifiable(&self, operation: &'static str) -> QueryResult<()> {
        if self.modifiable {
            Ok(())
        } else {
            Err(QueryError::frozen(operation))
        }
    }
}

fn collapse_and(mut parts: Vec<Constraint>) -> Option<Constraint> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Constraint::and(parts)),
    }
}

/// Size of a constraint tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConstraintStats {
    /// Total node count.
    pub nodes: usize,
    /// Maximum nesting depth; a leaf has depth 1.
    pub depth: usize,
}

// The modifiable flag is lifecycle state, not predicate state.
impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        self.inverse == other.inverse && self.kind == other.kind
    }
}

impl Eq for Constraint {}

impl Hash for Constraint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inverse.hash(state);
        self.kind.hash(state);
    }
}

fn fmt_field(field: &StepField) -> String {
    format!("{}.{}", field.step_identity(), field.field_name())
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inverse {
            f.write_str("NOT ")?;
        }
        match &self.kind {
            ConstraintKind::FieldValue {
                field,
                operator,
                value,
                ..
            } => write!(f, "{} {} {}", fmt_field(field), operator.symbol(), value),
            ConstraintKind::FieldCompare {
                field,
                operator,
                other,
            } => write!(
                f,
                "{} {} {}",
                fmt_field(field),
                operator.symbol(),
                fmt_field(other)
            ),
            ConstraintKind::Between {
                field,
                lower,
                upper,
                ..
            } => write!(f, "{} BETWEEN {} AND {}", fmt_field(field), lower, upper),
            ConstraintKind::In { field, values, .. } => {
                let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                write!(f, "{} IN ({})", fmt_field(field), rendered.join(", "))
            }
            ConstraintKind::Null { field } => write!(f, "{} IS NULL", fmt_field(field)),
            ConstraintKind::Composite { operator, children } => {
                let rendered: Vec<String> = children.iter().map(Constraint::to_string).collect();
                let sep = format!(" {} ", operator.keyword());
                write!(f, "({})", rendered.join(&sep))
            }
            ConstraintKind::RelationExists { relation, .. } => write!(f, "EXISTS {relation}"),
            ConstraintKind::Extension(ext) => {
                let rendered: Vec<String> = ext.arguments.iter().map(Value::to_string).collect();
                write!(f, "{}({})", ext.name, rendered.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::step::{QueryStep, Step};
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    fn field(name: &str) -> StepField {
        let step = QueryStep::Node(Step::new("person").unwrap());
        StepField::new(0, &step, name).unwrap()
    }

    #[test]
    fn defaults_are_plain_and_optimal() {
        let c = Constraint::equal(field("age"), 18);
        assert!(!c.is_inverse());
        assert!(c.is_modifiable());
        assert_eq!(c.support_level(), SupportLevel::Optimal);
    }

    #[test]
    fn set_inverse_fails_once_unmodifiable() {
        let mut c = Constraint::equal(field("age"), 18);
        c.set_inverse(true).unwrap();
        c.set_unmodifiable();
        c.set_unmodifiable();
        let err = c.set_inverse(false).unwrap_err();
        assert!(matches!(err, QueryError::FrozenStateViolation { .. }));
        assert!(c.is_inverse());
    }

    #[test]
    fn unmodifiable_propagates_to_children() {
        let mut c = Constraint::and([
            Constraint::equal(field("age"), 18),
            Constraint::is_null(field("email")),
        ]);
        c.set_unmodifiable();
        match c.kind() {
            ConstraintKind::Composite { children, .. } => {
                assert!(children.iter().all(|child| !child.is_modifiable()))
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert!(c.add_child(Constraint::is_null(field("x"))).is_err());
    }

    #[test]
    fn equality_compares_kind_and_inverse() {
        let a = Constraint::field_value(field("age"), Operator::GreaterEqual, 18);
        let mut b = Constraint::field_value(field("age"), Operator::GreaterEqual, 18);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        b.set_inverse(true).unwrap();
        assert_ne!(a, b);

        let c = Constraint::field_value(field("age"), Operator::Greater, 18);
        assert_ne!(a, c);

        let mut frozen = a.clone();
        frozen.set_unmodifiable();
        assert_eq!(a, frozen);
        assert_eq!(hash_of(&a), hash_of(&frozen));
    }

    #[test]
    fn same_operands_different_kinds_differ() {
        let eq = Constraint::equal(field("age"), 18);
        let inl = Constraint::in_list(field("age"), [18]).unwrap();
        assert_ne!(eq, inl);
    }

    #[test]
    fn in_list_dedups_and_rejects_empty() {
        let c = Constraint::in_list(field("name"), ["a", "b", "a"]).unwrap();
        match c.kind() {
            ConstraintKind::In { values, .. } => assert_eq!(values.len(), 2),
            other => panic!("unexpected kind {other:?}"),
        }
        let err = Constraint::in_list(field("name"), Vec::<Value>::new()).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn support_levels_follow_operators() {
        let like = Constraint::field_value(field("name"), Operator::Like, "%son");
        assert_eq!(like.support_level(), SupportLevel::Normal);
        let prefix = Constraint::field_value(field("name"), Operator::Like, "Jo%");
        assert_eq!(prefix.support_level(), SupportLevel::Optimal);
        let regexp = Constraint::field_value(field("name"), Operator::Regexp, "^J");
        assert_eq!(regexp.support_level(), SupportLevel::Weak);
        let ext = Constraint::extension("geo_within", vec![], SupportLevel::None).unwrap();
        let both = Constraint::and([like, ext]);
        assert_eq!(both.support_level(), SupportLevel::None);
        assert_eq!(Constraint::and([]).support_level(), SupportLevel::Optimal);
    }

    #[test]
    fn split_by_support_partitions_and() {
        let age = Constraint::field_value(field("age"), Operator::GreaterEqual, 18);
        let ext = Constraint::extension("soundex", vec!["jon".into()], SupportLevel::Weak).unwrap();
        let c = Constraint::and([age.clone(), ext.clone()]);

        let (pushed, residual) = c.split_by_support(SupportLevel::Normal);
        assert_eq!(pushed, Some(age));
        assert_eq!(residual, Some(ext.clone()));

        let mut inverted = c.clone();
        inverted.set_inverse(true).unwrap();
        let (pushed, residual) = inverted.split_by_support(SupportLevel::Normal);
        assert!(pushed.is_none());
        assert_eq!(residual, Some(inverted));

        let (pushed, residual) = ext.split_by_support(SupportLevel::Weak);
        assert!(pushed.is_some());
        assert!(residual.is_none());
    }

    #[test]
    fn case_sensitivity_only_on_literal_kinds() {
        let mut c = Constraint::equal(field("name"), "Ada");
        c.set_case_sensitive(false).unwrap();
        assert_ne!(c, Constraint::equal(field("name"), "Ada"));
        let mut null = Constraint::is_null(field("name"));
        assert!(null.set_case_sensitive(false).is_err());
    }

    #[test]
    fn stats_count_nodes_and_depth() {
        let c = Constraint::or([
            Constraint::is_null(field("a")),
            Constraint::and([Constraint::is_null(field("b")), Constraint::is_null(field("c"))]),
        ]);
        assert_eq!(c.stats(), ConstraintStats { nodes: 5, depth: 3 });
        assert_eq!(c.fields().len(), 3);
    }

    #[test]
    fn display_renders_tree() {
        let mut c = Constraint::and([
            Constraint::field_value(field("age"), Operator::GreaterEqual, 18),
            Constraint::in_list(field("name"), ["a", "b"]).unwrap(),
        ]);
        c.set_inverse(true).unwrap();
        assert_eq!(
            c.to_string(),
            "NOT (person.age >= 18 AND person.name IN ('a', 'b'))"
        );
    }
}

//! Search-query builder: the mutable `Building` side of a query.
//!
//! Steps, relation steps, and projected fields are addressed through the
//! [`StepRef`] and [`FieldRef`] handles the builder returns. [`freeze`]
//! validates the whole query and hands out an immutable [`SearchQuery`];
//! from then on every mutator fails with
//! [`QueryError::FrozenStateViolation`] while reads keep working.
//!
//! [`freeze`]: SearchQueryBuilder::freeze

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::query::constraint::{Constraint, ConstraintKind};
use crate::query::errors::{QueryError, QueryResult};
use crate::query::field::{
    AggregatedField, AggregationType, FieldRef, Projection, SortOrder, StepField,
};
use crate::query::metadata::{SchemaProvider, TableKind};
use crate::query::options::BuilderOptions;
use crate::query::search_query::SearchQuery;
use crate::query::step::{
    normalize_alias, Directionality, QueryId, QueryStep, RelationStep, Step, StepRef,
};
use crate::types::{NodeId, RoleId};

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Builder for a [`SearchQuery`].
pub struct SearchQueryBuilder {
    id: QueryId,
    options: BuilderOptions,
    schema: Option<Arc<dyn SchemaProvider>>,
    steps: Vec<QueryStep>,
    fields: Vec<Projection>,
    constraint: Option<Constraint>,
    sort_orders: Vec<SortOrder>,
    distinct: bool,
    max_number: Option<u64>,
    offset: u64,
    frozen: Option<Arc<SearchQuery>>,
}

impl Default for SearchQueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchQueryBuilder {
    /// Creates an empty builder with default options and no schema.
    pub fn new() -> Self {
        Self::with_options(BuilderOptions::default())
    }

    /// Creates an empty builder with the supplied options.
    pub fn with_options(options: BuilderOptions) -> Self {
        Self {
            id: QueryId(NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed)),
            options,
            schema: None,
            steps: Vec::new(),
            fields: Vec::new(),
            constraint: None,
            sort_orders: Vec::new(),
            distinct: false,
            max_number: None,
            offset: 0,
            frozen: None,
        }
    }

    /// Attaches a schema provider used to validate table, field, and role names.
    pub fn with_schema(mut self, schema: Arc<dyn SchemaProvider>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Options this builder enforces.
    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    /// Whether [`SearchQueryBuilder::freeze`] has succeeded.
    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    // ----- steps -----------------------------------------------------------

    /// Appends an unaliased step for `table`.
    pub fn add_step(&mut self, table: &str) -> QueryResult<StepRef> {
        self.push_node_step(table, None)
    }

    /// Appends a step for `table` with `alias`.
    pub fn add_aliased_step(&mut self, table: &str, alias: &str) -> QueryResult<StepRef> {
        self.push_node_step(table, Some(alias))
    }

    /// Appends a relation step joining `previous` to `next`.
    pub fn add_relation_step(
        &mut self,
        table: &str,
        previous: StepRef,
        next: StepRef,
    ) -> QueryResult<StepRef> {
        self.push_relation_step(table, None, previous, next)
    }

    /// Appends an aliased relation step joining `previous` to `next`.
    pub fn add_aliased_relation_step(
        &mut self,
        table: &str,
        alias: &str,
        previous: StepRef,
        next: StepRef,
    ) -> QueryResult<StepRef> {
        self.push_relation_step(table, Some(alias), previous, next)
    }

    /// Appends a relation step joining the steps named `previous` and `next`
    /// (alias, or table name for unaliased steps).
    pub fn add_relation_step_between(
        &mut self,
        table: &str,
        previous: &str,
        next: &str,
    ) -> QueryResult<StepRef> {
        self.ensure_building("add_relation_step")?;
        let previous = self.step_ref_by_identity(previous)?;
        let next = self.step_ref_by_identity(next)?;
        self.push_relation_step(table, None, previous, next)
    }

    /// Sets or clears the alias of a step.
    pub fn set_alias(&mut self, step: StepRef, alias: Option<&str>) -> QueryResult<()> {
        self.ensure_building("set_alias")?;
        let idx = self.resolve(step)?;
        let alias = alias.map(normalize_alias).transpose()?;
        let identity = alias
            .clone()
            .unwrap_or_else(|| self.steps[idx].table_name().to_owned());
        self.ensure_identity_free(&identity, Some(idx))?;
        if self.is_referenced(idx) {
            return Err(QueryError::invalid(format!(
                "step '{}' is already referenced by fields or constraints",
                self.steps[idx].identity()
            )));
        }
        self.steps[idx].step_mut().set_alias(alias);
        trace!(step = idx, identity = %identity, "query.builder.alias_set");
        Ok(())
    }

    /// Restricts a step to an explicit node number; may be called repeatedly.
    pub fn add_node(&mut self, step: StepRef, node: NodeId) -> QueryResult<()> {
        self.ensure_building("add_node")?;
        let idx = self.resolve(step)?;
        self.steps[idx].step_mut().add_node(node);
        Ok(())
    }

    /// Sets the directionality of a relation step.
    pub fn set_directionality(
        &mut self,
        relation: StepRef,
        directionality: Directionality,
    ) -> QueryResult<()> {
        self.ensure_building("set_directionality")?;
        self.relation_mut(relation)?.set_directionality(directionality);
        Ok(())
    }

    /// Sets the directionality of a relation step from its numeric code.
    pub fn set_directionality_code(&mut self, relation: StepRef, code: i32) -> QueryResult<()> {
        self.ensure_building("set_directionality")?;
        let directionality = Directionality::try_from(code)?;
        self.set_directionality(relation, directionality)
    }

    /// Sets whether the backend must verify the direction at evaluation time.
    pub fn set_checked_directionality(
        &mut self,
        relation: StepRef,
        checked: bool,
    ) -> QueryResult<()> {
        self.ensure_building("set_checked_directionality")?;
        self.relation_mut(relation)?.set_checked_directionality(checked);
        Ok(())
    }

    /// Restricts a relation step to one role; `None` allows any role.
    pub fn set_role(&mut self, relation: StepRef, role: Option<RoleId>) -> QueryResult<()> {
        self.ensure_building("set_role")?;
        self.relation_mut(relation)?.set_role(role);
        Ok(())
    }

    /// Restricts a relation step to the role named `name`, resolved through the schema.
    pub fn set_role_by_name(&mut self, relation: StepRef, name: &str) -> QueryResult<()> {
        self.ensure_building("set_role")?;
        let role = match &self.schema {
            Some(schema) => schema.resolve_role(name),
            None => name.parse::<u32>().ok().map(RoleId),
        }
        .ok_or_else(|| QueryError::UnknownRole {
            role: name.to_owned(),
        })?;
        self.set_role(relation, Some(role))
    }

    /// Step addressed by `step`.
    pub fn step(&self, step: StepRef) -> QueryResult<&QueryStep> {
        let idx = self.resolve(step)?;
        Ok(&self.steps[idx])
    }

    /// Relation step addressed by `relation`.
    pub fn relation(&self, relation: StepRef) -> QueryResult<&RelationStep> {
        let idx = self.resolve(relation)?;
        self.steps[idx].as_relation().ok_or_else(|| {
            QueryError::invalid_ref(self.steps[idx].identity(), "not a relation step")
        })
    }

    /// Steps in insertion order.
    pub fn steps(&self) -> &[QueryStep] {
        &self.steps
    }

    /// Handle for the step named `identity` (alias, or table name when unaliased).
    pub fn step_ref_by_identity(&self, identity: &str) -> QueryResult<StepRef> {
        self.steps
            .iter()
            .position(|step| step.identity() == identity)
            .map(|index| StepRef {
                query: self.id,
                index,
            })
            .ok_or_else(|| {
                QueryError::invalid_ref(identity, "no step with this alias or table name")
            })
    }

    // ----- fields ----------------------------------------------------------

    /// Reference to `field` of `step`, for use in constraints and sort orders.
    /// The field is not projected.
    pub fn field(&self, step: StepRef, field: &str) -> QueryResult<StepField> {
        let idx = self.resolve(step)?;
        let step_field = StepField::new(idx, &self.steps[idx], field)?;
        self.check_field(&self.steps[idx], step_field.field_name())?;
        Ok(step_field)
    }

    /// Projects `field` of `step`.
    pub fn add_field(&mut self, step: StepRef, field: &str) -> QueryResult<FieldRef> {
        self.ensure_building("add_field")?;
        let step_field = self.field(step, field)?;
        self.push_projection(Projection::Field(step_field))
    }

    /// Projects `field` of `step` under `aggregation_type`.
    pub fn add_aggregated_field(
        &mut self,
        step: StepRef,
        field: &str,
        aggregation_type: AggregationType,
    ) -> QueryResult<FieldRef> {
        self.ensure_building("add_field")?;
        let step_field = self.field(step, field)?;
        self.push_projection(Projection::Aggregated(AggregatedField::new(
            step_field,
            aggregation_type,
        )))
    }

    /// Projects an aggregated field from a raw aggregation code.
    pub fn add_aggregated_field_code(
        &mut self,
        step: StepRef,
        field: &str,
        code: i32,
    ) -> QueryResult<FieldRef> {
        self.ensure_building("add_field")?;
        let aggregation_type = AggregationType::try_from(code)?;
        self.add_aggregated_field(step, field, aggregation_type)
    }

    /// Sets or clears the output alias of a projected field.
    pub fn set_field_alias(&mut self, field: FieldRef, alias: Option<&str>) -> QueryResult<()> {
        self.ensure_building("set_field_alias")?;
        let idx = self.resolve_field(field)?;
        let alias = alias.map(normalize_alias).transpose()?;
        self.fields[idx].step_field_mut().set_alias(alias);
        Ok(())
    }

    /// Changes the aggregation operator of an aggregated field.
    pub fn set_aggregation_type(
        &mut self,
        field: FieldRef,
        aggregation_type: AggregationType,
    ) -> QueryResult<()> {
        self.ensure_building("set_aggregation_type")?;
        let idx = self.resolve_field(field)?;
        match &mut self.fields[idx] {
            Projection::Aggregated(agg) => {
                agg.set_aggregation_type(aggregation_type);
                Ok(())
            }
            Projection::Field(plain) => Err(QueryError::invalid(format!(
                "field '{}' is not aggregated",
                plain.field_name()
            ))),
        }
    }

    /// Changes the aggregation operator from a raw aggregation code.
    pub fn set_aggregation_code(&mut self, field: FieldRef, code: i32) -> QueryResult<()> {
        self.ensure_building("set_aggregation_type")?;
        let aggregation_type = AggregationType::try_from(code)?;
        self.set_aggregation_type(field, aggregation_type)
    }

    /// Projected field addressed by `field`.
    pub fn projection(&self, field: FieldRef) -> QueryResult<&Projection> {
        let idx = self.resolve_field(field)?;
        Ok(&self.fields[idx])
    }

    /// Projected fields in insertion order.
    pub fn fields(&self) -> &[Projection] {
        &self.fields
    }

    // ----- constraints and options ------------------------------------------

    /// Replaces the constraint tree.
    pub fn set_constraint(&mut self, constraint: Constraint) -> QueryResult<()> {
        self.ensure_building("set_constraint")?;
        self.check_constraint(&constraint)?;
        self.constraint = Some(constraint);
        Ok(())
    }

    /// Removes the constraint tree.
    pub fn clear_constraint(&mut self) -> QueryResult<()> {
        self.ensure_building("clear_constraint")?;
        self.constraint = None;
        Ok(())
    }

    /// Current constraint tree.
    pub fn constraint(&self) -> Option<&Constraint> {
        self.constraint.as_ref()
    }

    /// Mutable access to the constraint tree while building.
    pub fn constraint_mut(&mut self) -> QueryResult<Option<&mut Constraint>> {
        self.ensure_building("constraint_mut")?;
        Ok(self.constraint.as_mut())
    }

    /// Constraint that holds when `relation` has at least one matching relation.
    pub fn relation_exists(&self, relation: StepRef) -> QueryResult<Constraint> {
        let rel = self.relation(relation)?;
        Ok(Constraint::relation_exists(
            rel.step().identity().to_owned(),
            relation.index,
        ))
    }

    /// Appends a sort order.
    pub fn add_sort_order(&mut self, order: SortOrder) -> QueryResult<()> {
        self.ensure_building("add_sort_order")?;
        self.check_field_ref(order.field())?;
        self.sort_orders.push(order);
        Ok(())
    }

    /// Sort orders in priority order.
    pub fn sort_orders(&self) -> &[SortOrder] {
        &self.sort_orders
    }

    /// Requests duplicate-free results.
    pub fn set_distinct(&mut self, distinct: bool) -> QueryResult<()> {
        self.ensure_building("set_distinct")?;
        self.distinct = distinct;
        Ok(())
    }

    /// Limits the number of results; `None` means unlimited.
    pub fn set_max_number(&mut self, max_number: Option<u64>) -> QueryResult<()> {
        self.ensure_building("set_max_number")?;
        self.max_number = max_number;
        Ok(())
    }

    /// Skips the first `offset` results.
    pub fn set_offset(&mut self, offset: u64) -> QueryResult<()> {
        self.ensure_building("set_offset")?;
        self.offset = offset;
        Ok(())
    }

    /// Whether duplicate-free results are requested.
    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Result limit, if any.
    pub fn max_number(&self) -> Option<u64> {
        self.max_number
    }

    /// Result offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    // ----- freeze ------------------------------------------------------------

    /// Validates the query and makes it immutable.
    ///
    /// Idempotent: later calls return the same shared query. When validation
    /// fails the builder stays in the building state, unchanged.
    pub fn freeze(&mut self) -> QueryResult<Arc<SearchQuery>> {
        if let Some(frozen) = &self.frozen {
            return Ok(Arc::clone(frozen));
        }
        self.validate()?;
        if let Some(constraint) = self.constraint.as_mut() {
            constraint.set_unmodifiable();
        }
        let query = Arc::new(SearchQuery::from_parts(
            self.steps.clone(),
            self.fields.clone(),
            self.constraint.clone(),
            self.sort_orders.clone(),
            self.distinct,
            self.max_number,
            self.offset,
        ));
        debug!(
            steps = query.steps().len(),
            fields = query.fields().len(),
            constrained = query.constraint().is_some(),
            fingerprint = query.fingerprint(),
            "query.freeze"
        );
        self.frozen = Some(Arc::clone(&query));
        Ok(query)
    }

    /// Consumes the builder and returns the frozen query.
    pub fn finish(mut self) -> QueryResult<Arc<SearchQuery>> {
        self.freeze()
    }

    // ----- internals -----------------------------------------------------------

    fn ensure_building(&self, operation: &'static str) -> QueryResult<()> {
        if self.frozen.is_some() {
            return Err(QueryError::frozen(operation));
        }
        Ok(())
    }

    fn resolve(&self, step: StepRef) -> QueryResult<usize> {
        if step.query != self.id || step.index >= self.steps.len() {
            return Err(QueryError::invalid_ref(
                format!("step #{}", step.index),
                "step not owned by this query",
            ));
        }
        Ok(step.index)
    }

    fn resolve_field(&self, field: FieldRef) -> QueryResult<usize> {
        if field.query != self.id || field.index >= self.fields.len() {
            return Err(QueryError::invalid_ref(
                format!("field #{}", field.index),
                "field not owned by this query",
            ));
        }
        Ok(field.index)
    }

    fn relation_mut(&mut self, relation: StepRef) -> QueryResult<&mut RelationStep> {
        let idx = self.resolve(relation)?;
        let identity = self.steps[idx].identity().to_owned();
        match &mut self.steps[idx] {
            QueryStep::Relation(rel) => Ok(rel),
            QueryStep::Node(_) => Err(QueryError::invalid_ref(identity, "not a relation step")),
        }
    }

    fn new_step(&self, table: &str, alias: Option<&str>, kind: TableKind) -> QueryResult<Step> {
        if self.steps.len() >= self.options.max_steps {
            return Err(QueryError::invalid(format!(
                "query exceeds {} steps",
                self.options.max_steps
            )));
        }
        let mut step = Step::new(table)?;
        self.check_table(step.table_name(), kind)?;
        let alias = alias.map(normalize_alias).transpose()?;
        self.ensure_identity_free(alias.as_deref().unwrap_or(step.table_name()), None)?;
        step.set_alias(alias);
        Ok(step)
    }

    fn push_node_step(&mut self, table: &str, alias: Option<&str>) -> QueryResult<StepRef> {
        self.ensure_building("add_step")?;
        let step = self.new_step(table, alias, TableKind::Node)?;
        let index = self.steps.len();
        trace!(step = index, identity = step.identity(), "query.builder.step_added");
        self.steps.push(QueryStep::Node(step));
        Ok(StepRef {
            query: self.id,
            index,
        })
    }

    fn push_relation_step(
        &mut self,
        table: &str,
        alias: Option<&str>,
        previous: StepRef,
        next: StepRef,
    ) -> QueryResult<StepRef> {
        self.ensure_building("add_relation_step")?;
        let previous = self.resolve(previous)?;
        let next = self.resolve(next)?;
        let step = self.new_step(table, alias, TableKind::Relation)?;
        let index = self.steps.len();
        trace!(
            step = index,
            identity = step.identity(),
            previous = self.steps[previous].identity(),
            next = self.steps[next].identity(),
            "query.builder.relation_added"
        );
        self.steps
            .push(QueryStep::Relation(RelationStep::new(step, previous, next)));
        Ok(StepRef {
            query: self.id,
            index,
        })
    }

    fn push_projection(&mut self, projection: Projection) -> QueryResult<FieldRef> {
        if self.fields.len() >= self.options.max_fields {
            return Err(QueryError::invalid(format!(
                "query exceeds {} fields",
                self.options.max_fields
            )));
        }
        if let Some(first) = self.fields.first() {
            if first.is_aggregated() != projection.is_aggregated() {
                return Err(QueryError::invalid(
                    "aggregated and non-aggregated fields cannot be mixed",
                ));
            }
        }
        let index = self.fields.len();
        trace!(
            field = index,
            name = projection.step_field().field_name(),
            aggregated = projection.is_aggregated(),
            "query.builder.field_added"
        );
        self.fields.push(projection);
        Ok(FieldRef {
            query: self.id,
            index,
        })
    }

    fn ensure_identity_free(&self, identity: &str, skip: Option<usize>) -> QueryResult<()> {
        let taken = self
            .steps
            .iter()
            .enumerate()
            .any(|(idx, step)| Some(idx) != skip && step.identity() == identity);
        if taken {
            return Err(QueryError::DuplicateAlias {
                alias: identity.to_owned(),
            });
        }
        Ok(())
    }

    fn is_referenced(&self, idx: usize) -> bool {
        let identity = self.steps[idx].identity();
        let by_field =
            |field: &StepField| field.step_index() == idx && field.step_identity() == identity;
        if self.fields.iter().any(|p| by_field(p.step_field()))
            || self.sort_orders.iter().any(|o| by_field(o.field()))
        {
            return true;
        }
        let Some(constraint) = &self.constraint else {
            return false;
        };
        let mut referenced = constraint.fields().into_iter().any(by_field);
        constraint.visit(&mut |node| {
            if let ConstraintKind::RelationExists {
                relation,
                step_index,
            } = node.kind()
            {
                referenced |= *step_index == idx && relation == identity;
            }
        });
        referenced
    }

    fn check_table(&self, table: &str, kind: TableKind) -> QueryResult<()> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        match schema.table_kind(table) {
            None => Err(QueryError::UnknownTable {
                table: table.to_owned(),
            }),
            Some(TableKind::Node) if kind == TableKind::Relation => Err(QueryError::invalid(
                format!("table '{table}' is not a relation table"),
            )),
            Some(_) => Ok(()),
        }
    }

    fn check_field(&self, step: &QueryStep, field: &str) -> QueryResult<()> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        if !schema.has_field(step.table_name(), field) {
            return Err(QueryError::UnknownField {
                table: step.table_name().to_owned(),
                field: field.to_owned(),
            });
        }
        Ok(())
    }

    fn check_field_ref(&self, field: &StepField) -> QueryResult<()> {
        if !field.resolves_in(&self.steps) {
            return Err(QueryError::invalid_ref(
                field.step_identity(),
                "field refers to a step not owned by this query",
            ));
        }
        Ok(())
    }

    fn check_constraint(&self, constraint: &Constraint) -> QueryResult<()> {
        let stats = constraint.stats();
        if stats.nodes > self.options.max_constraint_nodes {
            return Err(QueryError::invalid(format!(
                "constraint tree exceeds {} nodes (got {})",
                self.options.max_constraint_nodes, stats.nodes
            )));
        }
        if stats.depth > self.options.max_constraint_depth {
            return Err(QueryError::invalid(format!(
                "constraint tree exceeds depth {} (got {})",
                self.options.max_constraint_depth, stats.depth
            )));
        }
        let mut outcome = Ok(());
        constraint.visit(&mut |node| {
            if outcome.is_err() {
                return;
            }
            outcome = match node.kind() {
                ConstraintKind::In { values, .. } if values.len() > self.options.max_in_values => {
                    Err(QueryError::invalid(format!(
                        "in list exceeds maximum of {} values",
                        self.options.max_in_values
                    )))
                }
                ConstraintKind::RelationExists {
                    relation,
                    step_index,
                } => match self.steps.get(*step_index) {
                    Some(step) if step.is_relation() && step.identity() == relation => Ok(()),
                    _ => Err(QueryError::invalid_ref(
                        relation.clone(),
                        "relation-exists constraint refers to a missing relation step",
                    )),
                },
                _ => Ok(()),
            };
        });
        outcome?;
        for field in constraint.fields() {
            self.check_field_ref(field)?;
        }
        Ok(())
    }

    fn validate(&self) -> QueryResult<()> {
        if let Some(constraint) = &self.constraint {
            self.check_constraint(constraint)?;
        }
        for projection in &self.fields {
            self.check_field_ref(projection.step_field())?;
        }
        for order in &self.sort_orders {
            self.check_field_ref(order.field())?;
        }
        if self.options.require_connected_steps {
            self.check_connected()?;
        }
        Ok(())
    }

    fn check_connected(&self) -> QueryResult<()> {
        if self.steps.is_empty() {
            return Ok(());
        }
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for (idx, step) in self.steps.iter().enumerate() {
            if let QueryStep::Relation(rel) = step {
                for endpoint in [rel.previous_index(), rel.next_index()] {
                    adjacency[idx].push(endpoint);
                    adjacency[endpoint].push(idx);
                }
            }
        }
        let mut seen = vec![false; self.steps.len()];
        let mut queue = VecDeque::from([0usize]);
        seen[0] = true;
        while let Some(idx) = queue.pop_front() {
            for &neighbour in &adjacency[idx] {
                if !seen[neighbour] {
                    seen[neighbour] = true;
                    queue.push_back(neighbour);
                }
            }
        }
        match seen.iter().position(|reached| !reached) {
            Some(idx) => Err(QueryError::invalid_ref(
                self.steps[idx].identity(),
                "step is not connected to the join path",
            )),
            None => Ok(()),
        }
    }
}

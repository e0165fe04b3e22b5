//! Schema lookups bridging entity, field, and role names to the bridge layer.
//!
//! The builder treats names as opaque strings. When a [`SchemaProvider`] is
//! attached it checks every table, field, and role name against it before the
//! name enters the query.

use std::collections::{HashMap, HashSet};

use crate::types::RoleId;

/// Kind of table a name resolves to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableKind {
    /// Entity type holding nodes.
    Node,
    /// Relation type holding relations between nodes.
    Relation,
}

/// Provides name validation for query builders.
pub trait SchemaProvider: Send + Sync {
    /// Returns the kind of the named table, or `None` if it does not exist.
    fn table_kind(&self, table: &str) -> Option<TableKind>;
    /// Whether `field` is defined on `table`.
    fn has_field(&self, table: &str, field: &str) -> bool;
    /// Resolves a role name to its relation-type identifier.
    fn resolve_role(&self, name: &str) -> Option<RoleId>;
}

/// Simple in-memory schema provider used for tests or prototyping.
#[derive(Clone, Debug, Default)]
pub struct InMemorySchema {
    tables: HashMap<String, TableKind>,
    fields: HashMap<String, HashSet<String>>,
    roles: HashMap<String, RoleId>,
}

impl InMemorySchema {
    /// Creates a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity table with its fields.
    pub fn with_table<I, S>(self, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_kind(name.into(), TableKind::Node, fields)
    }

    /// Registers a relation table with its fields.
    pub fn with_relation<I, S>(self, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_kind(name.into(), TableKind::Relation, fields)
    }

    /// Registers a role name with its identifier.
    pub fn with_role(mut self, name: impl Into<String>, id: RoleId) -> Self {
        self.roles.insert(name.into(), id);
        self
    }

    fn with_kind<I, S>(mut self, name: String, kind: TableKind, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .entry(name.clone())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self.tables.insert(name, kind);
        self
    }
}

impl SchemaProvider for InMemorySchema {
    fn table_kind(&self, table: &str) -> Option<TableKind> {
        self.tables.get(table).copied()
    }

    fn has_field(&self, table: &str, field: &str) -> bool {
        self.fields
            .get(table)
            .is_some_and(|fields| fields.contains(field))
    }

    fn resolve_role(&self, name: &str) -> Option<RoleId> {
        self.roles
            .get(name)
            .copied()
            .or_else(|| name.parse::<u32>().ok().map(RoleId))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_names() {
        let schema = InMemorySchema::new()
            .with_table("person", ["name", "age"])
            .with_relation("posts", ["pos"])
            .with_role("author", RoleId(3));
        assert_eq!(schema.table_kind("person"), Some(TableKind::Node));
        assert_eq!(schema.table_kind("posts"), Some(TableKind::Relation));
        assert_eq!(schema.table_kind("ghost"), None);
        assert!(schema.has_field("person", "age"));
        assert!(!schema.has_field("person", "wordcount"));
        assert_eq!(schema.resolve_role("author"), Some(RoleId(3)));
    }

    #[test]
    fn numeric_role_names_fall_back_to_ids() {
        let schema = InMemorySchema::new();
        assert_eq!(schema.resolve_role("12"), Some(RoleId(12)));
        assert_eq!(schema.resolve_role("editor"), None);
    }
}

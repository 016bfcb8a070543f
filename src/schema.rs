//! Schema metadata
//!
//! Plain builder structs describing tables, relations, indexes, views and
//! procedures. The DDL planner and relation resolver consume these; nothing
//! here talks to a database.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::dialect::DialectKind;
use crate::error::SqlResult;
use crate::query::SelectDef;
use crate::types::{ColumnType, Value};

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
            primary_key: false,
            auto_increment: false,
            unique: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Foreign key actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
    NoAction,
}

impl ForeignKeyAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyAction::Restrict => "RESTRICT",
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::SetDefault => "SET DEFAULT",
            ForeignKeyAction::NoAction => "NO ACTION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Resolved foreign key, ready to render as a constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub from_table: String,
    pub from_columns: Vec<String>,
    pub to_table: String,
    pub to_columns: Vec<String>,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

/// Forward relation: local columns pointing at the target's primary key, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardRelation {
    pub target: String,
    pub columns: Vec<String>,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

/// Inverse side of a forward relation declared on `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverseRelation {
    pub target: String,
    pub forward: String,
    pub single: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Relation {
    /// Enforced by a database constraint.
    ForeignKey(ForwardRelation),
    /// Logical only; no constraint is emitted.
    RelationKey(ForwardRelation),
    Inverse(InverseRelation),
}

impl Relation {
    pub fn target(&self) -> &str {
        match self {
            Relation::ForeignKey(r) | Relation::RelationKey(r) => &r.target,
            Relation::Inverse(r) => &r.target,
        }
    }

    pub fn forward(&self) -> Option<&ForwardRelation> {
        match self {
            Relation::ForeignKey(r) | Relation::RelationKey(r) => Some(r),
            Relation::Inverse(_) => None,
        }
    }
}

/// Table definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub relations: IndexMap<String, Relation>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            relations: IndexMap::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        if column.primary_key && !self.primary_key.contains(&column.name) {
            self.primary_key.push(column.name.clone());
        }
        if column.unique {
            self.indexes.push(IndexDefinition {
                name: format!("ux_{}_{}", self.name, column.name),
                table: self.name.clone(),
                columns: vec![column.name.clone()],
                unique: true,
            });
        }
        self.columns.push(column);
        self
    }

    /// Explicit composite primary key; replaces any per-column markers.
    pub fn with_primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        for column in &mut self.columns {
            column.primary_key = self.primary_key.contains(&column.name);
            if column.primary_key {
                column.nullable = false;
            }
        }
        self
    }

    pub fn with_foreign_key<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
        on_delete: ForeignKeyAction,
    ) -> Self {
        self.relations.insert(
            name.into(),
            Relation::ForeignKey(ForwardRelation {
                target: target.into(),
                columns: columns.into_iter().map(Into::into).collect(),
                on_delete,
                on_update: ForeignKeyAction::NoAction,
            }),
        );
        self
    }

    pub fn with_relation_key<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.relations.insert(
            name.into(),
            Relation::RelationKey(ForwardRelation {
                target: target.into(),
                columns: columns.into_iter().map(Into::into).collect(),
                on_delete: ForeignKeyAction::NoAction,
                on_update: ForeignKeyAction::NoAction,
            }),
        );
        self
    }

    pub fn with_inverse(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        forward: impl Into<String>,
        single: bool,
    ) -> Self {
        self.relations.insert(
            name.into(),
            Relation::Inverse(InverseRelation {
                target: target.into(),
                forward: forward.into(),
                single,
            }),
        );
        self
    }

    pub fn with_index<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
        unique: bool,
    ) -> Self {
        self.indexes.push(IndexDefinition {
            name: name.into(),
            table: self.name.clone(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique,
        });
        self
    }

    /// Get a column by name
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn auto_increment_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.auto_increment)
    }

    /// Ordered `name -> tag` map over every column.
    pub fn column_types(&self) -> IndexMap<String, ColumnType> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.column_type))
            .collect()
    }

    /// True when `columns` (in any order) are the primary key or a unique index.
    pub fn is_unique_key(&self, columns: &[String]) -> bool {
        let same_set = |other: &[String]| {
            other.len() == columns.len() && columns.iter().all(|c| other.contains(c))
        };
        same_set(&self.primary_key)
            || self.indexes.iter().any(|i| i.unique && same_set(&i.columns))
            || (columns.len() == 1
                && self
                    .get_column(&columns[0])
                    .map(|c| c.unique)
                    .unwrap_or(false))
    }
}

/// Produces a view's defining select when the schema is created.
pub type ViewFn = Arc<dyn Fn() -> SqlResult<SelectDef> + Send + Sync>;

#[derive(Clone)]
pub struct ViewDefinition {
    pub name: String,
    pub definition: Option<ViewFn>,
}

impl ViewDefinition {
    pub fn new<F>(name: impl Into<String>, definition: F) -> Self
    where
        F: Fn() -> SqlResult<SelectDef> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            definition: Some(Arc::new(definition)),
        }
    }

    /// A view declared without a body; creating it is a render error.
    pub fn declared(name: impl Into<String>) -> Self {
        Self { name: name.into(), definition: None }
    }
}

impl fmt::Debug for ViewDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewDefinition")
            .field("name", &self.name)
            .field("has_definition", &self.definition.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureDefinition {
    pub name: String,
    pub params: Vec<Column>,
    pub returns: Vec<Column>,
    pub bodies: HashMap<DialectKind, String>,
}

impl ProcedureDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: Vec::new(),
            bodies: HashMap::new(),
        }
    }

    pub fn param(mut self, column: Column) -> Self {
        self.params.push(column);
        self
    }

    pub fn returns(mut self, column: Column) -> Self {
        self.returns.push(column);
        self
    }

    pub fn body(mut self, dialect: DialectKind, body: impl Into<String>) -> Self {
        self.bodies.insert(dialect, body.into());
        self
    }
}

/// The full static schema: tables in declaration order, views, procedures.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: IndexMap<String, TableDefinition>,
    views: Vec<ViewDefinition>,
    procedures: Vec<ProcedureDefinition>,
}

impl Schema {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: TableDefinition) -> Self {
        self.add_table_mut(table);
        self
    }

    pub fn add_table_mut(&mut self, table: TableDefinition) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn with_view(mut self, view: ViewDefinition) -> Self {
        self.views.push(view);
        self
    }

    pub fn with_procedure(mut self, procedure: ProcedureDefinition) -> Self {
        self.procedures.push(procedure);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.views.is_empty() && self.procedures.is_empty()
    }

    pub fn find_table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDefinition> {
        self.tables.values()
    }

    pub fn indexes(&self) -> impl Iterator<Item = &IndexDefinition> {
        self.tables.values().flat_map(|t| t.indexes.iter())
    }

    pub fn views(&self) -> &[ViewDefinition] {
        &self.views
    }

    pub fn procedures(&self) -> &[ProcedureDefinition] {
        &self.procedures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_markers_collect_in_order() {
        let table = TableDefinition::new("order_lines")
            .with_column(Column::new("order_id", ColumnType::BigInt).primary_key())
            .with_column(Column::new("line_no", ColumnType::Int).primary_key())
            .with_column(Column::new("sku", ColumnType::Text(Some(32))).unique());

        assert_eq!(table.primary_key, vec!["order_id", "line_no"]);
        assert!(table.is_unique_key(&["line_no".to_string(), "order_id".to_string()]));
        assert!(table.is_unique_key(&["sku".to_string()]));
        assert!(!table.is_unique_key(&["order_id".to_string()]));
        assert_eq!(table.indexes.len(), 1);
    }

    #[test]
    fn test_explicit_primary_key_overrides_markers() {
        let table = TableDefinition::new("t")
            .with_column(Column::new("a", ColumnType::Int).primary_key())
            .with_column(Column::new("b", ColumnType::Int))
            .with_primary_key(["b"]);
        assert_eq!(table.primary_key, vec!["b"]);
        assert!(!table.get_column("a").unwrap().primary_key);
        assert!(!table.get_column("b").unwrap().nullable);
    }

    #[test]
    fn test_schema_keeps_declaration_order() {
        let schema = Schema::empty()
            .with_table(TableDefinition::new("b"))
            .with_table(TableDefinition::new("a"));
        let names: Vec<_> = schema.tables().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}

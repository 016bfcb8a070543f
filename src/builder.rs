//! Fluent builders
//!
//! Every structural rule a renderer relies on is checked here, before a tree
//! exists: limits need an ordering, recursive CTEs need a step that reads the
//! CTE back, projection paths must name joins, relation joins must be
//! unambiguous.

use indexmap::IndexMap;

use crate::error::{SqlError, SqlResult};
use crate::expr::{Expr, OrderBy, WhereExpr};
use crate::query::{
    DeleteDef, InsertDef, InsertIfNotExistsDef, InsertIntoDef, JoinDef, JoinKind, Limit, LockMode,
    QueryDef, RecursiveCte, SelectDef, Source, UpdateDef, UpsertDef,
};
use crate::relations::{resolve_relation, unique_relation_to};
use crate::schema::{Schema, TableDefinition};
use crate::types::ColumnType;

/// Hands out SQL aliases `t0, t1, ...`. Owned by one orchestrator and reset
/// once per top-level connection.
#[derive(Debug, Default, Clone)]
pub struct AliasGenerator {
    next: usize,
}

impl AliasGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_alias(&mut self) -> String {
        let alias = format!("t{}", self.next);
        self.next += 1;
        alias
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}

#[derive(Debug, Clone)]
pub struct SelectBuilder {
    def: SelectDef,
}

impl SelectBuilder {
    pub fn new(source: Source, alias: impl Into<String>) -> Self {
        Self {
            def: SelectDef::new(source, alias),
        }
    }

    pub fn from_table(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(Source::table(table), alias)
    }

    pub fn from_view(view: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(Source::View(view.into()), alias)
    }

    pub fn from_select(select: SelectDef, alias: impl Into<String>) -> Self {
        Self::new(Source::Select(Box::new(select)), alias)
    }

    pub fn from_union(selects: Vec<SelectDef>, all: bool, alias: impl Into<String>) -> SqlResult<Self> {
        if selects.len() < 2 {
            return Err(SqlError::invalid_tree("a union needs at least two selects"));
        }
        Ok(Self::new(Source::Union { selects, all }, alias))
    }

    pub fn from_cte(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(Source::Cte(name.into()), alias)
    }

    pub fn alias(&self) -> &str {
        &self.def.alias
    }

    /// Name of the table this select reads from, if it reads from one.
    pub fn table_name(&self) -> Option<&str> {
        match &self.def.source {
            Source::Table { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn column(mut self, key: impl Into<String>, expr: Expr) -> Self {
        self.def.projection.insert(key.into(), expr);
        self
    }

    /// Project every column of `table` under its own name.
    pub fn all_columns(mut self, table: &TableDefinition) -> Self {
        for column in &table.columns {
            self.def.projection.insert(
                column.name.clone(),
                Expr::Column {
                    path: vec![self.def.alias.clone(), column.name.clone()],
                    ty: column.column_type,
                },
            );
        }
        self
    }

    pub fn distinct(mut self) -> Self {
        self.def.distinct = true;
        self
    }

    pub fn top(mut self, count: u64) -> Self {
        self.def.top = Some(count);
        self
    }

    pub fn lock(mut self, mode: LockMode) -> Self {
        self.def.lock = Some(mode);
        self
    }

    pub fn filter(mut self, condition: WhereExpr) -> Self {
        self.def.filters.push(condition);
        self
    }

    pub fn having(mut self, condition: WhereExpr) -> Self {
        self.def.having.push(condition);
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.def.group_by.push(expr);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.def.order_by.push(order);
        self
    }

    /// Row window; only legal once an ordering exists.
    pub fn limit(mut self, offset: u64, count: u64) -> SqlResult<Self> {
        if self.def.order_by.is_empty() {
            return Err(SqlError::LimitWithoutOrderBy {
                alias: self.def.alias.clone(),
            });
        }
        self.def.limit = Some(Limit { offset, count });
        Ok(self)
    }

    pub fn join(
        mut self,
        kind: JoinKind,
        name: impl Into<String>,
        is_single: bool,
        select: SelectBuilder,
        on: Vec<WhereExpr>,
    ) -> SqlResult<Self> {
        let name = name.into();
        if name.is_empty() || name.contains('.') {
            return Err(SqlError::invalid_tree(format!("invalid join name '{}'", name)));
        }
        if self.def.joins.iter().any(|j| j.name == name) {
            return Err(SqlError::invalid_tree(format!("duplicate join name '{}'", name)));
        }
        self.def.joins.push(JoinDef {
            kind,
            name,
            is_single,
            select: select.build()?,
            on,
        });
        Ok(self)
    }

    /// Join a declared relation of the source table. `shape` can add a
    /// projection, nested joins, ordering and so on to the joined select.
    pub fn join_relation<F>(
        self,
        schema: &Schema,
        relation: &str,
        kind: JoinKind,
        target_alias: impl Into<String>,
        shape: F,
    ) -> SqlResult<Self>
    where
        F: FnOnce(SelectBuilder) -> SqlResult<SelectBuilder>,
    {
        let table = self
            .table_name()
            .ok_or_else(|| SqlError::invalid_tree("relation joins need a table source"))?
            .to_string();
        let resolved = resolve_relation(schema, &table, relation)?;
        let target_alias = target_alias.into();
        let on = resolved.join_conditions(&self.def.alias, &target_alias);
        let target = shape(SelectBuilder::from_table(resolved.target.clone(), target_alias))?;
        self.join(kind, relation, resolved.is_single, target, on)
    }

    /// Join `target` through the single relation that reaches it; more than
    /// one candidate relation is an ambiguity error.
    pub fn join_table<F>(
        self,
        schema: &Schema,
        target: &str,
        kind: JoinKind,
        target_alias: impl Into<String>,
        shape: F,
    ) -> SqlResult<Self>
    where
        F: FnOnce(SelectBuilder) -> SqlResult<SelectBuilder>,
    {
        let table = self
            .table_name()
            .ok_or_else(|| SqlError::invalid_tree("relation joins need a table source"))?
            .to_string();
        let relation = unique_relation_to(schema, &table, target)?.to_string();
        self.join_relation(schema, &relation, kind, target_alias, shape)
    }

    /// Wire a recursive CTE. This select must read from `Source::Cte(name)`;
    /// `base` must not reference the CTE and `step` must read it back.
    pub fn recursive(mut self, name: impl Into<String>, base: SelectDef, step: SelectDef) -> SqlResult<Self> {
        let name = name.into();
        if !matches!(&self.def.source, Source::Cte(n) if *n == name) {
            return Err(SqlError::invalid_tree(format!(
                "a recursive select must read from CTE '{}'",
                name
            )));
        }
        if references_cte(&base, &name) || base.recursive.is_some() {
            return Err(SqlError::invalid_tree(format!(
                "base select of '{}' must not be recursive",
                name
            )));
        }
        if !references_cte(&step, &name) {
            return Err(SqlError::invalid_tree(format!(
                "recursive step of '{}' must join back to the CTE",
                name
            )));
        }
        let base_keys: Vec<_> = base.output_columns().into_iter().map(|(k, _)| k).collect();
        let step_keys: Vec<_> = step.output_columns().into_iter().map(|(k, _)| k).collect();
        if base_keys.is_empty() || base_keys != step_keys {
            return Err(SqlError::invalid_tree(format!(
                "base and step of '{}' must project the same columns",
                name
            )));
        }
        self.def.recursive = Some(RecursiveCte {
            name,
            base: Box::new(base),
            step: Box::new(step),
        });
        Ok(self)
    }

    pub fn build(self) -> SqlResult<SelectDef> {
        let def = self.def;
        if def.limit.is_some() && def.order_by.is_empty() {
            return Err(SqlError::LimitWithoutOrderBy { alias: def.alias });
        }
        if def.limit.is_some() && def.top.is_some() {
            return Err(SqlError::invalid_tree(format!(
                "'{}' sets both top and limit",
                def.alias
            )));
        }
        let meta = def.result_meta();
        for key in meta.columns.keys() {
            if let Some((prefix, _)) = key.rsplit_once('.') {
                if !meta.joins.contains_key(prefix) {
                    return Err(SqlError::invalid_tree(format!(
                        "projection key '{}' does not name a join of '{}'",
                        key, def.alias
                    )));
                }
            }
        }
        Ok(def)
    }

    pub fn build_query(self) -> SqlResult<QueryDef> {
        self.build().map(QueryDef::Select)
    }
}

fn references_cte(select: &SelectDef, name: &str) -> bool {
    matches!(&select.source, Source::Cte(n) if n == name)
        || select.joins.iter().any(|j| references_cte(&j.select, name))
}

fn output_types(table: &TableDefinition, columns: &[&str]) -> SqlResult<IndexMap<String, ColumnType>> {
    columns
        .iter()
        .map(|name| {
            table
                .get_column(name)
                .map(|c| (c.name.clone(), c.column_type))
                .ok_or_else(|| SqlError::unknown_column(&table.name, *name))
        })
        .collect()
}

fn check_columns<'a>(table: &TableDefinition, keys: impl IntoIterator<Item = &'a String>) -> SqlResult<()> {
    for key in keys {
        if table.get_column(key).is_none() {
            return Err(SqlError::unknown_column(&table.name, key));
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InsertBuilder<'t> {
    table: &'t TableDefinition,
    def: InsertDef,
}

impl<'t> InsertBuilder<'t> {
    pub fn into_table(table: &'t TableDefinition) -> Self {
        Self {
            table,
            def: InsertDef {
                table: table.name.clone(),
                rows: Vec::new(),
                output: IndexMap::new(),
                primary_key: table.primary_key.clone(),
                auto_increment: table.auto_increment_column().map(|c| c.name.clone()),
            },
        }
    }

    pub fn row(mut self, values: IndexMap<String, Expr>) -> SqlResult<Self> {
        check_columns(self.table, values.keys())?;
        self.def.rows.push(values);
        Ok(self)
    }

    pub fn returning(mut self, columns: &[&str]) -> SqlResult<Self> {
        self.def.output = output_types(self.table, columns)?;
        Ok(self)
    }

    pub fn returning_all(mut self) -> Self {
        self.def.output = self.table.column_types();
        self
    }

    pub fn build(self) -> SqlResult<QueryDef> {
        if self.def.rows.is_empty() {
            return Err(SqlError::missing_columns(format!("insert into '{}'", self.def.table)));
        }
        Ok(QueryDef::Insert(self.def))
    }
}

/// Insert-unless-present keyed on `keys` (the primary key when empty).
pub fn insert_if_not_exists(
    table: &TableDefinition,
    values: IndexMap<String, Expr>,
    keys: &[&str],
) -> SqlResult<QueryDef> {
    check_columns(table, values.keys())?;
    let keys: Vec<String> = if keys.is_empty() {
        table.primary_key.clone()
    } else {
        keys.iter().map(|k| k.to_string()).collect()
    };
    for key in &keys {
        if !values.contains_key(key) {
            return Err(SqlError::invalid_tree(format!(
                "insert-if-not-exists key '{}' has no value",
                key
            )));
        }
    }
    Ok(QueryDef::InsertIfNotExists(InsertIfNotExistsDef {
        table: table.name.clone(),
        values,
        keys,
    }))
}

pub fn insert_into(table: &TableDefinition, select: SelectDef) -> SqlResult<QueryDef> {
    if select.projection.is_empty() {
        return Err(SqlError::missing_columns(format!("insert into '{}' from select", table.name)));
    }
    check_columns(table, select.projection.keys())?;
    Ok(QueryDef::InsertInto(InsertIntoDef {
        table: table.name.clone(),
        select,
    }))
}

#[derive(Debug, Clone)]
pub struct UpdateBuilder<'t> {
    table: &'t TableDefinition,
    def: UpdateDef,
}

impl<'t> UpdateBuilder<'t> {
    pub fn table(table: &'t TableDefinition, alias: impl Into<String>) -> Self {
        Self {
            table,
            def: UpdateDef {
                table: table.name.clone(),
                alias: alias.into(),
                set: IndexMap::new(),
                filters: Vec::new(),
                output: IndexMap::new(),
                primary_key: table.primary_key.clone(),
            },
        }
    }

    pub fn alias(&self) -> &str {
        &self.def.alias
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.def.set.insert(column.into(), value.into());
        self
    }

    pub fn filter(mut self, condition: WhereExpr) -> Self {
        self.def.filters.push(condition);
        self
    }

    pub fn returning(mut self, columns: &[&str]) -> SqlResult<Self> {
        self.def.output = output_types(self.table, columns)?;
        Ok(self)
    }

    pub fn build(self) -> SqlResult<QueryDef> {
        if self.def.set.is_empty() {
            return Err(SqlError::missing_columns(format!("update of '{}'", self.def.table)));
        }
        check_columns(self.table, self.def.set.keys())?;
        Ok(QueryDef::Update(self.def))
    }
}

#[derive(Debug, Clone)]
pub struct DeleteBuilder<'t> {
    table: &'t TableDefinition,
    def: DeleteDef,
}

impl<'t> DeleteBuilder<'t> {
    pub fn from(table: &'t TableDefinition, alias: impl Into<String>) -> Self {
        Self {
            table,
            def: DeleteDef {
                table: table.name.clone(),
                alias: alias.into(),
                filters: Vec::new(),
                output: IndexMap::new(),
            },
        }
    }

    pub fn alias(&self) -> &str {
        &self.def.alias
    }

    pub fn filter(mut self, condition: WhereExpr) -> Self {
        self.def.filters.push(condition);
        self
    }

    pub fn returning(mut self, columns: &[&str]) -> SqlResult<Self> {
        self.def.output = output_types(self.table, columns)?;
        Ok(self)
    }

    pub fn build(self) -> QueryDef {
        QueryDef::Delete(self.def)
    }
}

/// Upsert keyed on the primary key. `update` defaults to every non-key value.
pub fn upsert(
    table: &TableDefinition,
    values: IndexMap<String, Expr>,
    update: Option<IndexMap<String, Expr>>,
) -> SqlResult<QueryDef> {
    check_columns(table, values.keys())?;
    if table.primary_key.is_empty() {
        return Err(SqlError::invalid_tree(format!(
            "upsert into '{}' needs a primary key",
            table.name
        )));
    }
    for key in &table.primary_key {
        if !values.contains_key(key) {
            return Err(SqlError::invalid_tree(format!("upsert key '{}' has no value", key)));
        }
    }
    let update = update.unwrap_or_else(|| {
        values
            .iter()
            .filter(|(k, _)| !table.primary_key.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    });
    check_columns(table, update.keys())?;
    if update.is_empty() {
        return Err(SqlError::missing_columns(format!("upsert update of '{}'", table.name)));
    }
    let column_types = table
        .columns
        .iter()
        .filter(|c| values.contains_key(&c.name))
        .map(|c| (c.name.clone(), c.column_type))
        .collect();
    Ok(QueryDef::Upsert(UpsertDef {
        table: table.name.clone(),
        keys: table.primary_key.clone(),
        values,
        update,
        column_types,
    }))
}

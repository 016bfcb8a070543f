//! Schema initialization and migrations
//!
//! The only state the engine persists is a history table with one text
//! primary-key column, `name`. A fresh database gets the whole schema plus
//! a history row for every known migration; an existing one only runs the
//! migrations it has not recorded yet.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::builder::SelectBuilder;
use crate::context::OrmContext;
use crate::ddl::create_all;
use crate::dialect::Dialect;
use crate::driver::Executor;
use crate::error::{SqlError, SqlResult};
use crate::expr::col;
use crate::query::{row, InsertDef, QueryDef};
use crate::schema::{Column, TableDefinition};
use crate::types::{ColumnType, Value};

/// A named schema change, applied once and recorded by name.
#[async_trait]
pub trait Migration<E: Executor>: Send + Sync {
    fn name(&self) -> &str;

    async fn up(&self, ctx: &mut OrmContext<E>) -> SqlResult<()>;
}

/// Migration made of fixed statements.
#[derive(Debug, Clone)]
pub struct StatementMigration {
    name: String,
    statements: Vec<QueryDef>,
}

impl StatementMigration {
    pub fn new(name: impl Into<String>, statements: Vec<QueryDef>) -> Self {
        Self {
            name: name.into(),
            statements,
        }
    }
}

#[async_trait]
impl<E: Executor> Migration<E> for StatementMigration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn up(&self, ctx: &mut OrmContext<E>) -> SqlResult<()> {
        ctx.execute(&self.statements).await.map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMode {
    /// Clear the schema and recreate everything.
    Force,
    /// Create from scratch only when no history exists; otherwise migrate.
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InitReport {
    /// The schema was created from scratch.
    pub fresh: bool,
    /// Migrations executed in this run, in order.
    pub applied: Vec<String>,
    /// Migrations recorded without running because the schema was created fresh.
    pub recorded: Vec<String>,
}

pub struct MigrationRunner<E: Executor> {
    migrations: Vec<Arc<dyn Migration<E>>>,
}

impl<E: Executor + 'static> MigrationRunner<E> {
    pub fn new() -> Self {
        Self { migrations: Vec::new() }
    }

    pub fn with_migration<M: Migration<E> + 'static>(mut self, migration: M) -> Self {
        self.migrations.push(Arc::new(migration));
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.migrations.iter().map(|m| m.name().to_string()).collect()
    }

    /// Definition of the history table.
    pub fn history_table(table: &str) -> TableDefinition {
        TableDefinition::new(table)
            .with_column(Column::new("name", ColumnType::Text(Some(255))).primary_key())
    }

    /// Open a connection on `ctx` and bring its database up to date.
    pub async fn initialize(
        self: Arc<Self>,
        ctx: &mut OrmContext<E>,
        mode: InitMode,
    ) -> SqlResult<InitReport> {
        ctx.connect_without_transaction(move |ctx| async move { self.run(ctx, mode).await }.boxed())
            .await
    }

    async fn run(&self, ctx: &mut OrmContext<E>, mode: InitMode) -> SqlResult<InitReport> {
        let report = match mode {
            InitMode::Force => self.create_fresh(ctx, true).await?,
            InitMode::Incremental => match self.read_history(ctx).await? {
                None => self.create_fresh(ctx, false).await?,
                Some(recorded) => self.migrate(ctx, &recorded).await?,
            },
        };
        info!(
            fresh = report.fresh,
            applied = report.applied.len(),
            recorded = report.recorded.len(),
            "schema initialized"
        );
        Ok(report)
    }

    async fn create_fresh(&self, ctx: &mut OrmContext<E>, clear: bool) -> SqlResult<InitReport> {
        let history = Self::history_table(&ctx.config().migration_table);
        let mut schema = ctx.schema().clone();
        schema.add_table_mut(history);
        let mut plan = create_all(&schema, ctx.renderer().kind())?;

        if clear {
            let name = ctx.config().schema_name().to_string();
            warn!(schema = %name, "clearing schema");
            plan.insert(0, QueryDef::ClearSchema { schema: name });
        }
        ctx.execute(&plan).await?;

        let names = self.names();
        self.record(ctx, &names).await?;
        Ok(InitReport {
            fresh: true,
            applied: Vec::new(),
            recorded: names,
        })
    }

    async fn migrate(&self, ctx: &mut OrmContext<E>, recorded: &HashSet<String>) -> SqlResult<InitReport> {
        let mut applied = Vec::new();
        for migration in &self.migrations {
            let name = migration.name().to_string();
            if recorded.contains(&name) {
                continue;
            }
            debug!(migration = %name, "applying migration");
            migration
                .up(ctx)
                .await
                .map_err(|err| SqlError::migration_error(&name, err.to_string()))?;
            self.record(ctx, std::slice::from_ref(&name)).await?;
            applied.push(name);
        }
        Ok(InitReport {
            fresh: false,
            applied,
            recorded: Vec::new(),
        })
    }

    /// Names in the history table, or `None` when the table does not exist.
    async fn read_history(&self, ctx: &mut OrmContext<E>) -> SqlResult<Option<HashSet<String>>> {
        let alias = ctx.next_alias();
        let select = SelectBuilder::from_table(ctx.config().migration_table.clone(), alias.clone())
            .column("name", col(alias, "name", ColumnType::Text(Some(255))))
            .build_query()?;

        match ctx.query(&select).await {
            Ok(records) => Ok(Some(
                records
                    .iter()
                    .filter_map(|r| match r.value("name") {
                        Some(Value::Text(name)) => Some(name.clone()),
                        _ => None,
                    })
                    .collect(),
            )),
            Err(err) => match err.native() {
                Some(native) if ctx.renderer().is_missing_object(native) => {
                    debug!(error = %native, "no migration history");
                    Ok(None)
                }
                _ => Err(err),
            },
        }
    }

    async fn record(&self, ctx: &mut OrmContext<E>, names: &[String]) -> SqlResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        let insert = QueryDef::Insert(InsertDef {
            table: ctx.config().migration_table.clone(),
            rows: names
                .iter()
                .map(|name| row([("name", Value::from(name.as_str()))]))
                .collect(),
            output: Default::default(),
            primary_key: vec!["name".to_string()],
            auto_increment: None,
        });
        ctx.execute(&[insert]).await.map(|_| ())
    }
}

impl<E: Executor + 'static> Default for MigrationRunner<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_table_shape() {
        let table = MigrationRunner::<Box<dyn Executor>>::history_table("_catena_migrations");
        assert_eq!(table.primary_key, vec!["name".to_string()]);
        assert_eq!(table.columns.len(), 1);
        assert!(!table.columns[0].nullable);
    }

    #[test]
    fn test_init_mode_serde() {
        let mode: InitMode = serde_json::from_str("\"incremental\"").unwrap();
        assert_eq!(mode, InitMode::Incremental);
    }
}

//! Schema initialization: fresh creation, incremental migration, forced reset.

mod common;

use async_trait::async_trait;
use common::{context, raw, ScriptedExecutor};
use std::sync::Arc;

use catena::{
    Column, ColumnType, DialectKind, InitMode, InitReport, Migration, MigrationRunner, NativeError,
    OrmContext, QueryDef, SqlError, SqlResult, StatementMigration, Value,
};

struct Broken;

#[async_trait]
impl Migration<ScriptedExecutor> for Broken {
    fn name(&self) -> &str {
        "003_broken"
    }

    async fn up(&self, _ctx: &mut OrmContext<ScriptedExecutor>) -> SqlResult<()> {
        Err(SqlError::invalid_tree("no such thing"))
    }
}

fn runner() -> MigrationRunner<ScriptedExecutor> {
    MigrationRunner::new()
        .with_migration(StatementMigration::new("001_init", Vec::new()))
        .with_migration(StatementMigration::new(
            "002_add_slug",
            vec![QueryDef::AddColumn {
                table: "post".into(),
                column: Column::new("slug", ColumnType::Text(Some(200))),
            }],
        ))
}

#[tokio::test]
async fn test_missing_history_creates_everything() {
    let executor = ScriptedExecutor::new().fail_next(NativeError::with_code(
        "42P01",
        "relation \"_catena_migrations\" does not exist",
    ));
    let mut ctx = context(DialectKind::Postgres, executor);

    let report = Arc::new(runner())
        .initialize(&mut ctx, InitMode::Incremental)
        .await
        .unwrap();

    assert_eq!(
        report,
        InitReport {
            fresh: true,
            applied: Vec::new(),
            recorded: vec!["001_init".to_string(), "002_add_slug".to_string()],
        }
    );
    let sql = ctx.executor().executed_sql();
    assert!(sql.iter().any(|s| s.starts_with(r#"CREATE TABLE "_catena_migrations""#)));
    let last = sql.last().unwrap();
    assert!(last.starts_with(r#"INSERT INTO "_catena_migrations""#));
    assert!(last.contains("'002_add_slug'"));
    assert!(!sql.iter().any(|s| s.contains("ADD COLUMN")));
}

#[tokio::test]
async fn test_existing_history_runs_only_new_migrations() {
    let executor = ScriptedExecutor::new().respond(vec![vec![raw(&[("name", Value::Text("001_init".into()))])]]);
    let mut ctx = context(DialectKind::Postgres, executor);

    let report = Arc::new(runner())
        .initialize(&mut ctx, InitMode::Incremental)
        .await
        .unwrap();

    assert!(!report.fresh);
    assert_eq!(report.applied, vec!["002_add_slug".to_string()]);
    assert_eq!(
        ctx.executor().kinds(),
        vec!["connect", "execute", "execute", "execute", "close"]
    );
    let sql = ctx.executor().executed_sql();
    assert!(sql[1].contains(r#"ADD COLUMN "slug""#));
    assert!(sql[2].contains("'002_add_slug'"));
}

#[tokio::test]
async fn test_force_clears_schema_first() {
    let mut ctx = context(DialectKind::MySql, ScriptedExecutor::new());

    let report = Arc::new(runner())
        .initialize(&mut ctx, InitMode::Force)
        .await
        .unwrap();

    assert!(report.fresh);
    assert_eq!(report.recorded.len(), 2);
    let sql = ctx.executor().executed_sql();
    assert!(sql[0].contains("DROP DATABASE"));
    assert!(!sql.iter().any(|s| s.starts_with("SELECT")));
}

#[tokio::test]
async fn test_unrelated_history_failure_is_rethrown() {
    let executor = ScriptedExecutor::new()
        .fail_next(NativeError::with_code("208", "Login failed for user 'catena'"));
    let mut ctx = context(DialectKind::MySql, executor);

    let err = Arc::new(runner())
        .initialize(&mut ctx, InitMode::Incremental)
        .await
        .unwrap_err();

    assert!(matches!(err, SqlError::Executor { .. }));
    assert_eq!(ctx.executor().kinds(), vec!["connect", "execute", "close"]);
}

#[tokio::test]
async fn test_coded_non_table_failure_is_rethrown() {
    let executor = ScriptedExecutor::new().fail_next(NativeError::with_code(
        "42703",
        "column \"name\" does not exist",
    ));
    let mut ctx = context(DialectKind::Postgres, executor);

    let err = Arc::new(runner())
        .initialize(&mut ctx, InitMode::Incremental)
        .await
        .unwrap_err();

    assert_eq!(err.native().and_then(|n| n.code.as_deref()), Some("42703"));
    assert_eq!(ctx.executor().kinds(), vec!["connect", "execute", "close"]);
    assert!(!ctx
        .executor()
        .executed_sql()
        .iter()
        .any(|s| s.starts_with("CREATE TABLE")));
}

#[tokio::test]
async fn test_failing_migration_is_named() {
    let executor = ScriptedExecutor::new().respond(vec![vec![
        raw(&[("name", Value::Text("001_init".into()))]),
        raw(&[("name", Value::Text("002_add_slug".into()))]),
    ]]);
    let mut ctx = context(DialectKind::SqlServer, executor);

    let err = Arc::new(runner().with_migration(Broken))
        .initialize(&mut ctx, InitMode::Incremental)
        .await
        .unwrap_err();

    assert!(matches!(err, SqlError::Migration { ref name, .. } if name == "003_broken"));
}

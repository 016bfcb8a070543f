//! Connection and transaction orchestration against a scripted executor.

mod common;

use common::{blog_schema, context, context_with, init_tracing, raw, Call, ScriptedExecutor};
use futures::FutureExt;

use catena::builder::{InsertBuilder, SelectBuilder};
use catena::query::{row, JoinKind};
use catena::{
    col, ColumnType, ConnectionStatus, DialectKind, EngineConfig, IsolationLevel, NativeError,
    OrderBy, OrmContext, QueryDef, Schema, SqlError, SqlResult, TableDefinition, TransactionCode, Value,
};
use std::sync::Arc;

fn authors_with_posts(schema: &Schema) -> SqlResult<QueryDef> {
    SelectBuilder::from_table("author", "t0")
        .column("id", col("t0", "id", ColumnType::Int))
        .column("name", col("t0", "name", ColumnType::Text(Some(100))))
        .join_relation(schema, "posts", JoinKind::Left, "t1", |posts| {
            Ok(posts
                .column("id", col("t1", "id", ColumnType::Int))
                .column("title", col("t1", "title", ColumnType::Text(Some(200))))
                .order_by(OrderBy::asc(col("t1", "id", ColumnType::Int))))
        })?
        .order_by(OrderBy::asc(col("t0", "id", ColumnType::Int)))
        .build_query()
}

#[tokio::test]
async fn test_select_reconstructs_nested_records() {
    init_tracing();
    let executor = ScriptedExecutor::new().respond(vec![vec![
        raw(&[("id", Value::Integer(1)), ("name", "Ann".into()), ("posts.id", Value::Integer(10)), ("posts.title", "A".into())]),
        raw(&[("id", Value::Integer(1)), ("name", "Ann".into()), ("posts.id", Value::Integer(11)), ("posts.title", "B".into())]),
        raw(&[("id", Value::Integer(2)), ("name", "Bob".into()), ("posts.id", Value::Null), ("posts.title", Value::Null)]),
    ]]);
    let mut ctx = context(DialectKind::Postgres, executor);
    let query = authors_with_posts(&blog_schema()).unwrap();

    let records = ctx
        .connect_without_transaction(move |ctx| async move { ctx.query(&query).await }.boxed())
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    let ann = &records[0];
    assert_eq!(ann.value("name"), Some(&Value::Text("Ann".into())));
    let posts = ann.many("posts").unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[1].value("title"), Some(&Value::Text("B".into())));
    assert!(records[1].many("posts").is_none());

    let sql = ctx.executor().executed_sql();
    assert_eq!(sql.len(), 1);
    assert!(sql[0].contains("LEFT JOIN LATERAL"));
    assert!(sql[0].contains(r#"AS "posts.title""#));
    assert_eq!(ctx.executor().kinds(), vec!["connect", "execute", "close"]);
}

#[tokio::test]
async fn test_mysql_multi_row_insert_reads_back_each_row() {
    let schema = blog_schema();
    let post = schema.find_table("post").unwrap().clone();
    let insert = InsertBuilder::into_table(&post)
        .row(row([("author_id", Value::Integer(1)), ("title", "A".into())]))
        .unwrap()
        .row(row([("author_id", Value::Integer(1)), ("title", "B".into())]))
        .unwrap()
        .returning(&["id", "title"])
        .unwrap()
        .build()
        .unwrap();

    let executor = ScriptedExecutor::new().respond(vec![
        vec![],
        vec![raw(&[("id", Value::Integer(7)), ("title", "A".into())])],
        vec![],
        vec![raw(&[("id", Value::Integer(8)), ("title", "B".into())])],
    ]);
    let mut ctx = context(DialectKind::MySql, executor);

    let records = ctx
        .connect(None, move |ctx| async move { ctx.query(&insert).await }.boxed())
        .await
        .unwrap();

    let ids: Vec<_> = records.iter().map(|r| r.value("id").cloned()).collect();
    assert_eq!(ids, vec![Some(Value::Integer(7)), Some(Value::Integer(8))]);
    let sql = ctx.executor().executed_sql();
    assert_eq!(sql.len(), 4);
    assert!(sql[1].ends_with("WHERE `id` = LAST_INSERT_ID()"));
    assert_eq!(ctx.executor().kinds(), vec!["connect", "begin", "execute", "commit", "close"]);
}

#[tokio::test]
async fn test_executor_errors_are_classified_and_rolled_back() {
    let executor = ScriptedExecutor::new()
        .fail_next(NativeError::with_code("1213", "Deadlock found when trying to get lock"));
    let mut ctx = context(DialectKind::MySql, executor);
    let query = authors_with_posts(&blog_schema()).unwrap();

    let err = ctx
        .connect(None, move |ctx| async move { ctx.query(&query).await.map(|_| ()) }.boxed())
        .await
        .unwrap_err();

    assert_eq!(err.transaction_code(), Some(TransactionCode::Deadlock));
    assert_eq!(
        ctx.executor().kinds(),
        vec!["connect", "begin", "execute", "rollback", "close"]
    );
    assert_eq!(ctx.status(), ConnectionStatus::Ready);
}

#[tokio::test]
async fn test_failed_commit_keeps_commit_error_when_rollback_finds_nothing() {
    let mut executor = ScriptedExecutor::new();
    executor.fail_commit = Some(NativeError::with_code("1205", "Transaction was deadlocked"));
    executor.fail_rollback = Some(NativeError::with_code(
        "3903",
        "The ROLLBACK TRANSACTION request has no corresponding BEGIN TRANSACTION.",
    ));
    let mut ctx = context(DialectKind::SqlServer, executor);

    let err = ctx
        .connect(None, |_| async { Ok(()) }.boxed())
        .await
        .unwrap_err();

    assert_eq!(err.transaction_code(), Some(TransactionCode::Deadlock));
    assert_eq!(ctx.executor().kinds(), vec!["connect", "begin", "commit", "rollback", "close"]);
}

#[tokio::test]
async fn test_rollback_failure_wins_over_body_error() {
    let mut executor = ScriptedExecutor::new();
    executor.fail_rollback = Some(NativeError::new("server closed the connection"));
    let mut ctx = context(DialectKind::Postgres, executor);

    let err = ctx
        .connect(None, |_| async { Err::<(), _>(SqlError::invalid_tree("body failed")) }.boxed())
        .await
        .unwrap_err();

    assert_eq!(err.native().map(|n| n.message.as_str()), Some("server closed the connection"));
}

#[tokio::test]
async fn test_isolation_level_reaches_executor() {
    let config = EngineConfig::builder()
        .dialect(DialectKind::Postgres)
        .isolation(IsolationLevel::RepeatableRead)
        .build()
        .unwrap();
    let mut ctx = OrmContext::new(ScriptedExecutor::new(), Arc::new(blog_schema()), config).unwrap();

    ctx.connect(None, |_| async { Ok(()) }.boxed()).await.unwrap();
    ctx.connect(Some(IsolationLevel::Serializable), |_| async { Ok(()) }.boxed())
        .await
        .unwrap();

    let begins: Vec<_> = ctx
        .executor()
        .calls
        .iter()
        .filter(|c| matches!(c, Call::Begin(_)))
        .cloned()
        .collect();
    assert_eq!(
        begins,
        vec![
            Call::Begin(Some(IsolationLevel::RepeatableRead)),
            Call::Begin(Some(IsolationLevel::Serializable)),
        ]
    );
}

#[tokio::test]
async fn test_trans_runs_on_open_connection() {
    let mut ctx = context(DialectKind::SqlServer, ScriptedExecutor::new());

    let status = ctx
        .connect_without_transaction(|ctx| {
            async move {
                ctx.trans(None, |ctx| async move { Ok(ctx.status()) }.boxed())
                    .await
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(status, ConnectionStatus::InTransaction);
    assert_eq!(ctx.executor().kinds(), vec!["connect", "begin", "commit", "close"]);
}

#[tokio::test]
async fn test_ddl_outside_transaction_is_allowed() {
    let mut ctx = context(DialectKind::Postgres, ScriptedExecutor::new());
    let plan = catena::ddl::create_all(&blog_schema(), DialectKind::Postgres).unwrap();

    ctx.connect_without_transaction(move |ctx| async move { ctx.execute(&plan).await.map(|_| ()) }.boxed())
        .await
        .unwrap();

    let sql = ctx.executor().executed_sql();
    assert!(sql[0].starts_with(r#"CREATE TABLE "author""#));
    assert!(sql.iter().any(|s| s.contains("FOREIGN KEY")));
}

#[tokio::test]
async fn test_invalid_relations_fail_before_connecting() {
    let schema = Schema::empty().with_table(
        TableDefinition::new("author")
            .with_column(catena::Column::new("id", ColumnType::Int).primary_key())
            .with_inverse("posts", "post", "author", false),
    );
    let mut ctx = context_with(DialectKind::MySql, schema, ScriptedExecutor::new());

    let err = ctx
        .connect_without_transaction(|_| async { Ok(()) }.boxed())
        .await
        .unwrap_err();

    assert!(matches!(err, SqlError::InvalidRelation { .. }));
    assert!(ctx.executor().calls.is_empty());
}

#[tokio::test]
async fn test_failed_connect_is_not_closed() {
    let mut executor = ScriptedExecutor::new();
    executor.fail_connect = Some(NativeError::new("connection refused"));
    let mut ctx = context(DialectKind::Postgres, executor);

    let err = ctx
        .connect(None, |_| async { Ok(()) }.boxed())
        .await
        .unwrap_err();

    assert_eq!(err.native().map(|n| n.message.as_str()), Some("connection refused"));
    assert_eq!(ctx.executor().kinds(), vec!["connect"]);
    assert_eq!(ctx.status(), ConnectionStatus::Ready);
}

//! Connection and transaction orchestration
//!
//! `OrmContext` owns one executor and runs caller bodies inside a connection
//! or a transaction. Status transitions:
//!
//! ```text
//! Ready --connect--> Connected --begin--> InTransaction
//!   ^                    |  ^                   |
//!   +-------close--------+  +--commit/rollback--+
//! ```
//!
//! Bodies receive the context back as `&mut`, so a nested `trans` or a
//! statement runs on the same connection.

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::builder::AliasGenerator;
use crate::config::EngineConfig;
use crate::dialect::{Dialect, Rendered, Renderer};
use crate::driver::{Executor, IsolationLevel, NativeError, Statement, TransactionCode};
use crate::error::{SqlError, SqlResult};
use crate::query::{QueryDef, ResultMeta};
use crate::reconstruct::{reconstruct_chunked, Record};
use crate::relations::validate_relations;
use crate::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection open.
    Ready,
    Connected,
    InTransaction,
}

/// Which result sets of the flattened batch belong to one definition.
struct Plan {
    indices: Vec<usize>,
    meta: Option<ResultMeta>,
}

pub struct OrmContext<E: Executor> {
    executor: E,
    renderer: Box<dyn Renderer>,
    schema: Arc<Schema>,
    config: EngineConfig,
    status: ConnectionStatus,
    aliases: AliasGenerator,
}

impl<E: Executor> OrmContext<E> {
    pub fn new(executor: E, schema: Arc<Schema>, config: EngineConfig) -> SqlResult<Self> {
        config.validate()?;
        let renderer = config.renderer()?;
        Ok(Self::with_renderer(executor, schema, config, renderer))
    }

    pub fn with_renderer(
        executor: E,
        schema: Arc<Schema>,
        config: EngineConfig,
        renderer: Box<dyn Renderer>,
    ) -> Self {
        Self {
            executor,
            renderer,
            schema,
            config,
            status: ConnectionStatus::Ready,
            aliases: AliasGenerator::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    /// Fresh SQL alias; the sequence restarts with every top-level connection.
    pub fn next_alias(&mut self) -> String {
        self.aliases.next_alias()
    }

    pub fn render(&self, def: &QueryDef) -> SqlResult<Rendered> {
        self.renderer.build(def)
    }

    /// Open a connection, run `body`, and always close.
    pub async fn connect_without_transaction<T, F>(&mut self, body: F) -> SqlResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut OrmContext<E>) -> BoxFuture<'c, SqlResult<T>>,
    {
        self.open().await?;
        let result = body(&mut *self).await;
        self.close(result).await
    }

    /// Open a connection and run `body` in a transaction.
    ///
    /// A failed body is rolled back and its error re-raised. When the
    /// rollback itself fails for any reason other than the transaction
    /// already being gone, the rollback failure is raised instead.
    pub async fn connect<T, F>(&mut self, isolation: Option<IsolationLevel>, body: F) -> SqlResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut OrmContext<E>) -> BoxFuture<'c, SqlResult<T>>,
    {
        self.open().await?;
        let result = self.run_transaction(isolation, body).await;
        self.close(result).await
    }

    /// Start a transaction on the already open connection. Never closes it.
    pub async fn trans<T, F>(&mut self, isolation: Option<IsolationLevel>, body: F) -> SqlResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut OrmContext<E>) -> BoxFuture<'c, SqlResult<T>>,
    {
        match self.status {
            ConnectionStatus::Ready => Err(SqlError::NotConnected),
            ConnectionStatus::InTransaction => Err(SqlError::AlreadyInTransaction),
            ConnectionStatus::Connected => self.run_transaction(isolation, body).await,
        }
    }

    /// Render and run `defs` as one batch, returning the records of each
    /// definition in order. Definitions without a result shape yield an
    /// empty list.
    pub async fn execute(&mut self, defs: &[QueryDef]) -> SqlResult<Vec<Vec<Record>>> {
        if self.status == ConnectionStatus::Ready {
            return Err(SqlError::NotConnected);
        }

        let mut statements: Vec<Statement> = Vec::new();
        let mut plans = Vec::with_capacity(defs.len());
        for def in defs {
            if self.status == ConnectionStatus::InTransaction && def.is_ddl() {
                return Err(SqlError::DdlInTransaction {
                    statement: def.tag().to_string(),
                });
            }
            let rendered = self.renderer.build(def)?;
            let offset = statements.len();
            let indices: Vec<usize> = match rendered.meta {
                Some(_) => rendered.result_indices().into_iter().map(|i| offset + i).collect(),
                None => Vec::new(),
            };
            for (i, sql) in rendered.statements.iter().enumerate() {
                let meta = if indices.contains(&(offset + i)) {
                    rendered.meta.clone()
                } else {
                    None
                };
                statements.push(Statement::new(sql.clone()).with_meta(meta));
            }
            debug!(tag = def.tag(), statements = rendered.statements.len(), "rendered");
            plans.push(Plan {
                indices,
                meta: rendered.meta,
            });
        }

        if statements.is_empty() {
            return Ok(plans.iter().map(|_| Vec::new()).collect());
        }

        let results = self
            .executor
            .execute_defs(&statements)
            .await
            .map_err(|native| self.wrap(native))?;

        let chunk_size = self.config.reconstruct_chunk_size;
        let mut output = Vec::with_capacity(plans.len());
        for plan in plans {
            let mut records = Vec::new();
            if let Some(meta) = &plan.meta {
                for index in plan.indices {
                    let rows = results.get(index).map(Vec::as_slice).unwrap_or(&[]);
                    records.extend(reconstruct_chunked(rows, meta, chunk_size).await?);
                }
            }
            output.push(records);
        }
        Ok(output)
    }

    /// Run a single definition and return its records.
    pub async fn query(&mut self, def: &QueryDef) -> SqlResult<Vec<Record>> {
        let mut results = self.execute(std::slice::from_ref(def)).await?;
        Ok(results.pop().unwrap_or_default())
    }

    /// Wrap a driver failure, classified for the active dialect.
    pub fn wrap(&self, native: NativeError) -> SqlError {
        SqlError::executor(self.renderer.classify_error(&native), native)
    }

    async fn open(&mut self) -> SqlResult<()> {
        if self.status != ConnectionStatus::Ready {
            return Err(SqlError::AlreadyConnected);
        }
        validate_relations(&self.schema)?;
        self.aliases.reset();
        self.executor
            .connect()
            .await
            .map_err(|native| self.wrap(native))?;
        self.status = ConnectionStatus::Connected;
        info!(dialect = %self.renderer.kind(), "connection opened");
        Ok(())
    }

    async fn close<T>(&mut self, result: SqlResult<T>) -> SqlResult<T> {
        let closed = self.executor.close().await;
        self.status = ConnectionStatus::Ready;
        match (closed, result) {
            (Ok(()), result) => {
                debug!(ok = result.is_ok(), "connection closed");
                result
            }
            (Err(native), Ok(_)) => Err(self.wrap(native)),
            (Err(native), Err(original)) => {
                warn!(error = %native, original = %original, "close failed after an earlier error");
                Err(original)
            }
        }
    }

    async fn run_transaction<T, F>(&mut self, isolation: Option<IsolationLevel>, body: F) -> SqlResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut OrmContext<E>) -> BoxFuture<'c, SqlResult<T>>,
    {
        let isolation = isolation.or(self.config.default_isolation);
        self.executor
            .begin_transaction(isolation)
            .await
            .map_err(|native| self.wrap(native))?;
        self.status = ConnectionStatus::InTransaction;
        debug!(isolation = ?isolation, "transaction started");

        let outcome = match body(&mut *self).await {
            Ok(value) => self
                .executor
                .commit_transaction()
                .await
                .map(|_| value)
                .map_err(|native| self.wrap(native)),
            Err(err) => Err(err),
        };

        let original = match outcome {
            Ok(value) => {
                self.status = ConnectionStatus::Connected;
                debug!("transaction committed");
                return Ok(value);
            }
            Err(err) => err,
        };

        let rolled_back = self.executor.rollback_transaction().await;
        self.status = ConnectionStatus::Connected;
        match rolled_back {
            Ok(()) => {
                debug!(error = %original, "transaction rolled back");
                Err(original)
            }
            Err(native) => {
                let failure = self.wrap(native);
                if failure.transaction_code() == Some(TransactionCode::NoActiveTransaction) {
                    warn!(error = %failure, original = %original, "rollback found no active transaction");
                    Err(original)
                } else {
                    warn!(error = %failure, original = %original, "rollback failed");
                    Err(failure)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::driver::RawRow;
    use async_trait::async_trait;
    use futures::FutureExt;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        fail_rollback: Option<NativeError>,
    }

    #[async_trait]
    impl Executor for Recorder {
        async fn connect(&mut self) -> Result<(), NativeError> {
            self.calls.push("connect".into());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), NativeError> {
            self.calls.push("close".into());
            Ok(())
        }

        async fn begin_transaction(&mut self, _: Option<IsolationLevel>) -> Result<(), NativeError> {
            self.calls.push("begin".into());
            Ok(())
        }

        async fn commit_transaction(&mut self) -> Result<(), NativeError> {
            self.calls.push("commit".into());
            Ok(())
        }

        async fn rollback_transaction(&mut self) -> Result<(), NativeError> {
            self.calls.push("rollback".into());
            match self.fail_rollback.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn execute_defs(&mut self, statements: &[Statement]) -> Result<Vec<Vec<RawRow>>, NativeError> {
            self.calls.push(format!("execute {}", statements.len()));
            Ok(statements.iter().map(|_| Vec::new()).collect())
        }
    }

    fn context(executor: Recorder) -> OrmContext<Recorder> {
        OrmContext::new(
            executor,
            Arc::new(Schema::empty()),
            EngineConfig::for_dialect(DialectKind::Postgres),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_commit_path() {
        let mut ctx = context(Recorder::default());
        let value = ctx
            .connect(None, |ctx| {
                async move {
                    assert_eq!(ctx.status(), ConnectionStatus::InTransaction);
                    Ok(7)
                }
                .boxed()
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(ctx.status(), ConnectionStatus::Ready);
        assert_eq!(ctx.executor().calls, vec!["connect", "begin", "commit", "close"]);
    }

    #[tokio::test]
    async fn test_rollback_tolerates_missing_transaction() {
        let mut ctx = context(Recorder {
            fail_rollback: Some(NativeError::with_code("25P01", "there is no transaction in progress")),
            ..Default::default()
        });
        let err = ctx
            .connect(None, |_| async { Err::<(), _>(SqlError::invalid_tree("boom")) }.boxed())
            .await
            .unwrap_err();

        assert_eq!(err, SqlError::invalid_tree("boom"));
        assert_eq!(ctx.executor().calls, vec!["connect", "begin", "rollback", "close"]);
    }

    #[tokio::test]
    async fn test_rollback_failure_replaces_original() {
        let mut ctx = context(Recorder {
            fail_rollback: Some(NativeError::new("connection reset")),
            ..Default::default()
        });
        let err = ctx
            .connect(None, |_| async { Err::<(), _>(SqlError::invalid_tree("boom")) }.boxed())
            .await
            .unwrap_err();

        assert_eq!(err.native(), Some(&NativeError::new("connection reset")));
    }

    #[tokio::test]
    async fn test_trans_requires_plain_connection() {
        let mut ctx = context(Recorder::default());
        let err = ctx
            .trans(None, |_| async { Ok(()) }.boxed())
            .await
            .unwrap_err();
        assert_eq!(err, SqlError::NotConnected);

        let err = ctx
            .connect(None, |ctx| {
                async move { ctx.trans(None, |_| async { Ok(()) }.boxed()).await }.boxed()
            })
            .await
            .unwrap_err();
        assert_eq!(err, SqlError::AlreadyInTransaction);
    }

    #[tokio::test]
    async fn test_ddl_rejected_inside_transaction() {
        let mut ctx = context(Recorder::default());
        let err = ctx
            .connect(None, |ctx| {
                async move {
                    ctx.execute(&[QueryDef::Truncate { table: "post".into() }])
                        .await
                        .map(|_| ())
                }
                .boxed()
            })
            .await
            .unwrap_err();

        assert_eq!(err, SqlError::DdlInTransaction { statement: "truncate".into() });
        assert!(!ctx.executor().calls.iter().any(|c| c.starts_with("execute")));
    }

    #[tokio::test]
    async fn test_alias_counter_resets_per_connection() {
        let mut ctx = context(Recorder::default());
        for _ in 0..2 {
            let aliases = ctx
                .connect_without_transaction(|ctx| {
                    async move { Ok((ctx.next_alias(), ctx.next_alias())) }.boxed()
                })
                .await
                .unwrap();
            assert_eq!(aliases, ("t0".to_string(), "t1".to_string()));
        }
    }

    #[tokio::test]
    async fn test_execute_requires_connection() {
        let mut ctx = context(Recorder::default());
        let err = ctx
            .execute(&[QueryDef::Truncate { table: "post".into() }])
            .await
            .unwrap_err();
        assert_eq!(err, SqlError::NotConnected);
    }
}

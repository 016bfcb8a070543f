//! Executor middleware
//!
//! A plugin turns any executor into an extended one. `LoggingPlugin` wraps
//! the base executor in `LoggingExecutor`, which traces every statement with
//! its timing and row counts.

use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::driver::{Executor, IsolationLevel, NativeError, RawRow, Statement};

/// Transforms an executor into an extended executor.
pub trait ExecutorPlugin<E: Executor>: Send + Sync {
    type Output: Executor;

    fn name(&self) -> &'static str;

    fn transform(&self, base: E) -> Self::Output;
}

/// Logging plugin - traces all SQL operations
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPlugin;

impl<E: Executor> ExecutorPlugin<E> for LoggingPlugin {
    type Output = LoggingExecutor<E>;

    fn name(&self) -> &'static str {
        "logging"
    }

    fn transform(&self, base: E) -> Self::Output {
        LoggingExecutor::new(base)
    }
}

/// Logging executor wrapper
#[derive(Debug)]
pub struct LoggingExecutor<E> {
    base: E,
    statements_run: u64,
}

impl<E> LoggingExecutor<E> {
    pub fn new(base: E) -> Self {
        Self {
            base,
            statements_run: 0,
        }
    }

    /// Statements sent to the base executor so far.
    pub fn statements_run(&self) -> u64 {
        self.statements_run
    }

    pub fn inner(&self) -> &E {
        &self.base
    }

    pub fn into_inner(self) -> E {
        self.base
    }
}

#[async_trait]
impl<E: Executor> Executor for LoggingExecutor<E> {
    async fn connect(&mut self) -> Result<(), NativeError> {
        let result = self.base.connect().await;
        match &result {
            Ok(()) => info!("[SQL] connected"),
            Err(e) => warn!(error = %e, "[SQL] connect failed"),
        }
        result
    }

    async fn close(&mut self) -> Result<(), NativeError> {
        debug!("[SQL] closing");
        self.base.close().await
    }

    async fn begin_transaction(
        &mut self,
        isolation: Option<IsolationLevel>,
    ) -> Result<(), NativeError> {
        debug!(isolation = ?isolation, "[SQL] begin transaction");
        self.base.begin_transaction(isolation).await
    }

    async fn commit_transaction(&mut self) -> Result<(), NativeError> {
        debug!("[SQL] commit");
        self.base.commit_transaction().await
    }

    async fn rollback_transaction(&mut self) -> Result<(), NativeError> {
        let result = self.base.rollback_transaction().await;
        match &result {
            Ok(()) => debug!("[SQL] rollback"),
            Err(e) => warn!(error = %e, "[SQL] rollback failed"),
        }
        result
    }

    async fn execute_defs(
        &mut self,
        statements: &[Statement],
    ) -> Result<Vec<Vec<RawRow>>, NativeError> {
        for statement in statements {
            debug!(sql = %statement.sql, "[SQL] executing");
        }
        let start = Instant::now();
        let result = self.base.execute_defs(statements).await;
        let duration = start.elapsed();
        self.statements_run += statements.len() as u64;

        match &result {
            Ok(sets) => {
                let rows: usize = sets.iter().map(Vec::len).sum();
                info!(?duration, statements = statements.len(), rows, "[SQL] completed");
            }
            Err(e) => warn!(?duration, error = %e, "[SQL] failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    struct Echo;

    #[async_trait]
    impl Executor for Echo {
        async fn connect(&mut self) -> Result<(), NativeError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), NativeError> {
            Ok(())
        }

        async fn begin_transaction(&mut self, _: Option<IsolationLevel>) -> Result<(), NativeError> {
            Ok(())
        }

        async fn commit_transaction(&mut self) -> Result<(), NativeError> {
            Ok(())
        }

        async fn rollback_transaction(&mut self) -> Result<(), NativeError> {
            Err(NativeError::with_code("25P01", "there is no transaction in progress"))
        }

        async fn execute_defs(&mut self, statements: &[Statement]) -> Result<Vec<Vec<RawRow>>, NativeError> {
            Ok(statements
                .iter()
                .map(|s| {
                    let mut row = RawRow::new();
                    row.insert("sql".to_string(), Value::Text(s.sql.clone()));
                    vec![row]
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_logging_executor_passes_through() {
        let mut executor = LoggingPlugin.transform(Echo);
        let sets = executor
            .execute_defs(&[Statement::new("SELECT 1"), Statement::new("SELECT 2")])
            .await
            .unwrap();

        assert_eq!(sets.len(), 2);
        assert_eq!(sets[1][0]["sql"], Value::Text("SELECT 2".into()));
        assert_eq!(executor.statements_run(), 2);
        assert_eq!(
            executor.rollback_transaction().await.unwrap_err().code.as_deref(),
            Some("25P01")
        );
    }
}

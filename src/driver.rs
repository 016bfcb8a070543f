//! Executor contract - the only boundary between the engine and a database
//!
//! The engine never opens sockets or parses connection strings. An executor
//! accepts rendered statements and transaction requests and hands back raw
//! rows; everything above it is dialect rendering and reconstruction.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::query::ResultMeta;
use crate::types::Value;

/// A raw result row as the driver produced it, keyed by column label.
pub type RawRow = IndexMap<String, Value>;

/// One statement of a rendered script, with the metadata of the rows the
/// caller will read from it (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub meta: Option<ResultMeta>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), meta: None }
    }

    pub fn with_meta(mut self, meta: Option<ResultMeta>) -> Self {
        self.meta = meta;
        self
    }
}

/// Opaque failure reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeError {
    pub code: Option<String>,
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { code: None, message: message.into() }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Normalized transactional failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionCode {
    NoActiveTransaction,
    AlreadyStarted,
    Deadlock,
    LockTimeout,
}

impl fmt::Display for TransactionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionCode::NoActiveTransaction => "no active transaction",
            TransactionCode::AlreadyStarted => "transaction already started",
            TransactionCode::Deadlock => "deadlock",
            TransactionCode::LockTimeout => "lock timeout",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Snapshot => "SNAPSHOT",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Executor trait - injected connection to a concrete database.
///
/// Exactly one statement is in flight at a time; the orchestrator owns the
/// executor mutably for the lifetime of a connection.
#[async_trait]
pub trait Executor: Send {
    async fn connect(&mut self) -> Result<(), NativeError>;

    async fn close(&mut self) -> Result<(), NativeError>;

    async fn begin_transaction(
        &mut self,
        isolation: Option<IsolationLevel>,
    ) -> Result<(), NativeError>;

    async fn commit_transaction(&mut self) -> Result<(), NativeError>;

    /// May fail with a classified "no active transaction" error when the
    /// database already aborted the transaction.
    async fn rollback_transaction(&mut self) -> Result<(), NativeError>;

    /// Run statements in order, returning one row array per statement.
    async fn execute_defs(
        &mut self,
        statements: &[Statement],
    ) -> Result<Vec<Vec<RawRow>>, NativeError>;
}

#[async_trait]
impl<E: Executor + ?Sized> Executor for Box<E> {
    async fn connect(&mut self) -> Result<(), NativeError> {
        (**self).connect().await
    }

    async fn close(&mut self) -> Result<(), NativeError> {
        (**self).close().await
    }

    async fn begin_transaction(
        &mut self,
        isolation: Option<IsolationLevel>,
    ) -> Result<(), NativeError> {
        (**self).begin_transaction(isolation).await
    }

    async fn commit_transaction(&mut self) -> Result<(), NativeError> {
        (**self).commit_transaction().await
    }

    async fn rollback_transaction(&mut self) -> Result<(), NativeError> {
        (**self).rollback_transaction().await
    }

    async fn execute_defs(
        &mut self,
        statements: &[Statement],
    ) -> Result<Vec<Vec<RawRow>>, NativeError> {
        (**self).execute_defs(statements).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_error_display() {
        assert_eq!(
            NativeError::with_code("1213", "Deadlock found").to_string(),
            "[1213] Deadlock found"
        );
        assert_eq!(NativeError::new("boom").to_string(), "boom");
    }

    #[test]
    fn test_isolation_sql() {
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
        let parsed: IsolationLevel = serde_json::from_str("\"read_committed\"").unwrap();
        assert_eq!(parsed, IsolationLevel::ReadCommitted);
    }
}

use thiserror::Error;

use crate::driver::{NativeError, TransactionCode};
use crate::types::ColumnType;

pub type SqlResult<T> = Result<T, SqlError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SqlError {
    // Raised by the fluent layer before a tree reaches a renderer.
    #[error("{operator} requires at least one operand")]
    EmptyLogicalList { operator: &'static str },

    #[error("limit on '{alias}' requires a preceding order_by")]
    LimitWithoutOrderBy { alias: String },

    #[error("ambiguous relation from '{table}' to '{target}': candidates {candidates:?}")]
    AmbiguousRelation {
        table: String,
        target: String,
        candidates: Vec<String>,
    },

    #[error("table '{table}' has no relation named '{relation}'")]
    UnknownRelation { table: String, relation: String },

    #[error("invalid query tree: {message}")]
    InvalidTree { message: String },

    // Render-time errors: malformed or incomplete trees.
    #[error("{context} has no columns")]
    MissingColumns { context: String },

    #[error("view '{view}' has no defining select")]
    MissingViewDefinition { view: String },

    #[error("procedure '{procedure}' has no body for {dialect}")]
    MissingProcedureBody { procedure: String, dialect: String },

    #[error(
        "relation '{relation}' on '{table}' lists {actual} column(s) but primary key of '{target}' has {expected}"
    )]
    KeyArityMismatch {
        table: String,
        relation: String,
        target: String,
        expected: usize,
        actual: usize,
    },

    #[error("{feature} is not supported by {dialect}")]
    Unsupported { feature: String, dialect: String },

    #[error("unknown table '{table}'")]
    UnknownTable { table: String },

    #[error("unknown column '{column}' on '{table}'")]
    UnknownColumn { table: String, column: String },

    // Executor and transaction state errors.
    #[error("executor error{}: {native}", code.map(|c| format!(" ({c})")).unwrap_or_default())]
    Executor {
        code: Option<TransactionCode>,
        native: NativeError,
    },

    #[error("a transaction is already in progress")]
    AlreadyInTransaction,

    #[error("no open connection")]
    NotConnected,

    #[error("a connection is already open")]
    AlreadyConnected,

    #[error("DDL statement '{statement}' cannot run inside a transaction")]
    DdlInTransaction { statement: String },

    // Reconstruction errors.
    #[error("cannot coerce value {value} of column '{column}' to {expected}")]
    Coercion {
        column: String,
        expected: ColumnType,
        value: String,
    },

    #[error("single relation '{relation}' produced {candidates} distinct rows for one parent")]
    InconsistentRelation { relation: String, candidates: usize },

    // Schema validation.
    #[error("invalid relation '{relation}' on '{table}': {reason}")]
    InvalidRelation {
        table: String,
        relation: String,
        reason: String,
    },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("migration '{name}' failed: {message}")]
    Migration { name: String, message: String },
}

impl SqlError {
    pub fn invalid_tree(message: impl Into<String>) -> Self {
        SqlError::InvalidTree { message: message.into() }
    }

    pub fn missing_columns(context: impl Into<String>) -> Self {
        SqlError::MissingColumns { context: context.into() }
    }

    pub fn unsupported(feature: impl Into<String>, dialect: impl Into<String>) -> Self {
        SqlError::Unsupported {
            feature: feature.into(),
            dialect: dialect.into(),
        }
    }

    pub fn unknown_table(table: impl Into<String>) -> Self {
        SqlError::UnknownTable { table: table.into() }
    }

    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        SqlError::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn unknown_relation(table: impl Into<String>, relation: impl Into<String>) -> Self {
        SqlError::UnknownRelation {
            table: table.into(),
            relation: relation.into(),
        }
    }

    pub fn invalid_relation(
        table: impl Into<String>,
        relation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SqlError::InvalidRelation {
            table: table.into(),
            relation: relation.into(),
            reason: reason.into(),
        }
    }

    pub fn coercion(column: impl Into<String>, expected: ColumnType, value: impl Into<String>) -> Self {
        SqlError::Coercion {
            column: column.into(),
            expected,
            value: value.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        SqlError::Config { message: message.into() }
    }

    pub fn migration_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        SqlError::Migration {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn executor(code: Option<TransactionCode>, native: NativeError) -> Self {
        SqlError::Executor { code, native }
    }

    /// Normalized transaction code, when this wraps a classified executor failure.
    pub fn transaction_code(&self) -> Option<TransactionCode> {
        match self {
            SqlError::Executor { code, .. } => *code,
            _ => None,
        }
    }

    /// The underlying driver error, if any.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            SqlError::Executor { native, .. } => Some(native),
            _ => None,
        }
    }
}

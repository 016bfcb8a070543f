//! # Catena: dialect-independent SQL
//!
//! Queries and schema changes are described as plain trees (`Expr`,
//! `WhereExpr`, `QueryDef`), rendered into MySQL, PostgreSQL or SQL Server
//! text by a `Renderer`, sent to an injected `Executor`, and the flat rows
//! that come back are folded into nested `Record`s.
//!
//! ```text
//! builders -> QueryDef -> Renderer::build -> Rendered -> Executor -> rows -> reconstruct -> Record
//! ```

#![warn(clippy::all)]

pub mod builder;
pub mod config;
pub mod context;
pub mod ddl;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod expr;
pub mod migration;
pub mod plugin;
pub mod query;
pub mod reconstruct;
pub mod relations;
pub mod schema;
pub mod types;

// Re-export main types
pub use builder::{AliasGenerator, DeleteBuilder, InsertBuilder, SelectBuilder, UpdateBuilder};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use context::{ConnectionStatus, OrmContext};
pub use dialect::{
    DatabaseVersion, DdlDialect, Dialect, DialectKind, MySqlDialect, PostgresDialect, Rendered,
    Renderer, SqlServerDialect,
};
pub use driver::{Executor, IsolationLevel, NativeError, RawRow, Statement, TransactionCode};
pub use error::{SqlError, SqlResult};
pub use expr::{col, is, null, val, Expr, OrderBy, WhereExpr};
pub use migration::{InitMode, InitReport, Migration, MigrationRunner, StatementMigration};
pub use plugin::{ExecutorPlugin, LoggingExecutor, LoggingPlugin};
pub use query::{QueryDef, ResultMeta, SelectDef};
pub use reconstruct::{reconstruct, Field, Record};
pub use schema::{Column, ForeignKeyAction, ProcedureDefinition, Schema, TableDefinition, ViewDefinition};
pub use types::{ColumnType, Value};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Shared fixtures: a scripted executor that records every call, and a small
//! blog schema.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;

use catena::driver::{Executor, IsolationLevel, NativeError, RawRow, Statement};
use catena::{Column, ColumnType, DialectKind, EngineConfig, ForeignKeyAction, OrmContext, Schema, TableDefinition, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect,
    Close,
    Begin(Option<IsolationLevel>),
    Commit,
    Rollback,
    Execute(Vec<String>),
}

/// Answers `execute_defs` from a queue; an empty queue yields one empty
/// result set per statement.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    pub calls: Vec<Call>,
    responses: VecDeque<Result<Vec<Vec<RawRow>>, NativeError>>,
    pub fail_connect: Option<NativeError>,
    pub fail_commit: Option<NativeError>,
    pub fail_rollback: Option<NativeError>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, sets: Vec<Vec<RawRow>>) -> Self {
        self.responses.push_back(Ok(sets));
        self
    }

    pub fn fail_next(mut self, err: NativeError) -> Self {
        self.responses.push_back(Err(err));
        self
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Execute(sql) => Some(sql.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.calls
            .iter()
            .map(|c| match c {
                Call::Connect => "connect",
                Call::Close => "close",
                Call::Begin(_) => "begin",
                Call::Commit => "commit",
                Call::Rollback => "rollback",
                Call::Execute(_) => "execute",
            })
            .collect()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn connect(&mut self) -> Result<(), NativeError> {
        self.calls.push(Call::Connect);
        match self.fail_connect.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), NativeError> {
        self.calls.push(Call::Close);
        Ok(())
    }

    async fn begin_transaction(&mut self, isolation: Option<IsolationLevel>) -> Result<(), NativeError> {
        self.calls.push(Call::Begin(isolation));
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<(), NativeError> {
        self.calls.push(Call::Commit);
        match self.fail_commit.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback_transaction(&mut self) -> Result<(), NativeError> {
        self.calls.push(Call::Rollback);
        match self.fail_rollback.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn execute_defs(&mut self, statements: &[Statement]) -> Result<Vec<Vec<RawRow>>, NativeError> {
        self.calls
            .push(Call::Execute(statements.iter().map(|s| s.sql.clone()).collect()));
        match self.responses.pop_front() {
            Some(Ok(mut sets)) => {
                while sets.len() < statements.len() {
                    sets.push(Vec::new());
                }
                Ok(sets)
            }
            Some(Err(err)) => Err(err),
            None => Ok(statements.iter().map(|_| Vec::new()).collect()),
        }
    }
}

pub fn raw(pairs: &[(&str, Value)]) -> RawRow {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn blog_schema() -> Schema {
    Schema::empty()
        .with_table(
            TableDefinition::new("author")
                .with_column(Column::new("id", ColumnType::Int).primary_key().auto_increment())
                .with_column(Column::new("name", ColumnType::Text(Some(100))).not_null())
                .with_inverse("posts", "post", "author", false),
        )
        .with_table(
            TableDefinition::new("post")
                .with_column(Column::new("id", ColumnType::Int).primary_key().auto_increment())
                .with_column(Column::new("author_id", ColumnType::Int).not_null())
                .with_column(Column::new("title", ColumnType::Text(Some(200))).not_null())
                .with_foreign_key("author", "author", ["author_id"], ForeignKeyAction::Cascade)
                .with_index("ix_post_title", ["title"], false),
        )
}

pub fn context(dialect: DialectKind, executor: ScriptedExecutor) -> OrmContext<ScriptedExecutor> {
    context_with(dialect, blog_schema(), executor)
}

pub fn context_with(dialect: DialectKind, schema: Schema, executor: ScriptedExecutor) -> OrmContext<ScriptedExecutor> {
    OrmContext::new(executor, Arc::new(schema), EngineConfig::for_dialect(dialect))
        .expect("valid config")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

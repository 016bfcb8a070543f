//! Query-definition trees
//!
//! `QueryDef` is the whole-statement tree a renderer consumes. A `SelectDef`
//! is self-referential: its joins carry their own (partial) selects, which is
//! what lets one definition describe a nested object graph.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::expr::{Expr, OrderBy, WhereExpr};
use crate::schema::{Column, ForeignKeyDefinition, IndexDefinition};
use crate::types::{ColumnType, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Source {
    Table { name: String, schema: Option<String> },
    View(String),
    Select(Box<SelectDef>),
    Union { selects: Vec<SelectDef>, all: bool },
    /// Name of a CTE declared by an enclosing `RecursiveCte`.
    Cte(String),
}

impl Source {
    pub fn table(name: impl Into<String>) -> Self {
        Source::Table {
            name: name.into(),
            schema: None,
        }
    }

    fn is_named(&self) -> bool {
        matches!(self, Source::Table { .. } | Source::View(_) | Source::Cte(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockMode {
    Update,
    Share,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub offset: u64,
    pub count: u64,
}

/// `WITH RECURSIVE name AS (base UNION ALL step)`; the outer select reads
/// from `Source::Cte(name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecursiveCte {
    pub name: String,
    pub base: Box<SelectDef>,
    pub step: Box<SelectDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinDef {
    pub kind: JoinKind,
    /// Relation name; namespaces the join's columns as `name.column`.
    pub name: String,
    pub is_single: bool,
    pub select: SelectDef,
    pub on: Vec<WhereExpr>,
}

impl JoinDef {
    /// A plain join is nothing more than a filtered table/view reference and
    /// renders as `JOIN ... ON`. Anything else needs a lateral subquery.
    pub fn is_plain(&self) -> bool {
        let s = &self.select;
        s.source.is_named()
            && s.projection.is_empty()
            && s.joins.is_empty()
            && s.order_by.is_empty()
            && s.group_by.is_empty()
            && s.having.is_empty()
            && s.limit.is_none()
            && s.top.is_none()
            && !s.distinct
            && s.lock.is_none()
            && s.recursive.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectDef {
    pub source: Source,
    pub alias: String,
    pub projection: IndexMap<String, Expr>,
    pub distinct: bool,
    pub top: Option<u64>,
    pub lock: Option<LockMode>,
    pub filters: Vec<WhereExpr>,
    pub having: Vec<WhereExpr>,
    pub joins: Vec<JoinDef>,
    pub order_by: Vec<OrderBy>,
    pub group_by: Vec<Expr>,
    pub limit: Option<Limit>,
    pub recursive: Option<RecursiveCte>,
}

impl SelectDef {
    pub fn new(source: Source, alias: impl Into<String>) -> Self {
        Self {
            source,
            alias: alias.into(),
            projection: IndexMap::new(),
            distinct: false,
            top: None,
            lock: None,
            filters: Vec::new(),
            having: Vec::new(),
            joins: Vec::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            limit: None,
            recursive: None,
        }
    }

    pub fn from_table(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(Source::table(table), alias)
    }

    /// Columns this select exposes to its consumer, in order. Lateral joins
    /// contribute their own outputs re-keyed under `join.name`.
    pub fn output_columns(&self) -> Vec<(String, ColumnType)> {
        let mut columns: Vec<(String, ColumnType)> = self
            .projection
            .iter()
            .map(|(key, expr)| (key.clone(), expr.column_type()))
            .collect();
        for join in self.joins.iter().filter(|j| !j.is_plain()) {
            for (key, ty) in join.select.output_columns() {
                columns.push((format!("{}.{}", join.name, key), ty));
            }
        }
        columns
    }

    /// Column and join shape of the rows this select produces.
    pub fn result_meta(&self) -> ResultMeta {
        let mut meta = ResultMeta {
            columns: self.output_columns().into_iter().collect(),
            joins: IndexMap::new(),
        };
        collect_joins(self, "", &mut meta.joins);
        meta
    }
}

fn collect_joins(select: &SelectDef, prefix: &str, joins: &mut IndexMap<String, JoinMeta>) {
    for join in &select.joins {
        let path = format!("{}{}", prefix, join.name);
        joins.insert(path.clone(), JoinMeta { is_single: join.is_single });
        collect_joins(&join.select, &format!("{}.", path), joins);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinMeta {
    pub is_single: bool,
}

/// Flat description of a result set: dotted column path to tag, and
/// relation path to join shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultMeta {
    pub columns: IndexMap<String, ColumnType>,
    pub joins: IndexMap<String, JoinMeta>,
}

impl ResultMeta {
    pub fn from_columns(columns: IndexMap<String, ColumnType>) -> Self {
        Self {
            columns,
            joins: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertDef {
    pub table: String,
    pub rows: Vec<IndexMap<String, Expr>>,
    /// Columns to hand back for each inserted row.
    pub output: IndexMap<String, ColumnType>,
    pub primary_key: Vec<String>,
    pub auto_increment: Option<String>,
}

impl InsertDef {
    /// Column list in first-seen order across all rows.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }

    pub fn supplies_auto_increment(&self) -> bool {
        match &self.auto_increment {
            Some(column) => self.rows.iter().any(|row| row.contains_key(column)),
            None => false,
        }
    }
}

/// Insert one row unless a row matching `keys` already exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertIfNotExistsDef {
    pub table: String,
    pub values: IndexMap<String, Expr>,
    pub keys: Vec<String>,
}

/// `INSERT INTO table (columns) SELECT ...`; projection keys map to columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertIntoDef {
    pub table: String,
    pub select: SelectDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDef {
    pub table: String,
    pub alias: String,
    pub set: IndexMap<String, Expr>,
    pub filters: Vec<WhereExpr>,
    pub output: IndexMap<String, ColumnType>,
    pub primary_key: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteDef {
    pub table: String,
    pub alias: String,
    pub filters: Vec<WhereExpr>,
    pub output: IndexMap<String, ColumnType>,
}

/// Update the row matching `keys`, inserting `values` when none exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertDef {
    pub table: String,
    pub keys: Vec<String>,
    pub values: IndexMap<String, Expr>,
    pub update: IndexMap<String, Expr>,
    /// Declared types of the written columns, when the table is known.
    #[serde(default)]
    pub column_types: IndexMap<String, ColumnType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTableDef {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
}

/// Procedure with its body already chosen for the target dialect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureDef {
    pub name: String,
    pub params: Vec<Column>,
    pub returns: Vec<Column>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryDef {
    Select(SelectDef),
    Insert(InsertDef),
    InsertIfNotExists(InsertIfNotExistsDef),
    InsertInto(InsertIntoDef),
    Update(UpdateDef),
    Delete(DeleteDef),
    Upsert(UpsertDef),

    CreateTable(CreateTableDef),
    DropTable { name: String, if_exists: bool },
    RenameTable { from: String, to: String },
    Truncate { table: String },
    AddColumn { table: String, column: Column },
    DropColumn { table: String, column: String },
    ModifyColumn { table: String, column: Column },
    RenameColumn { table: String, from: String, to: String },
    AddPrimaryKey { table: String, columns: Vec<String> },
    DropPrimaryKey { table: String },
    AddForeignKey(ForeignKeyDefinition),
    DropForeignKey { table: String, name: String },
    AddIndex(IndexDefinition),
    DropIndex { table: String, name: String },
    CreateView { name: String, select: Box<SelectDef> },
    DropView { name: String },
    CreateProcedure(ProcedureDef),
    DropProcedure { name: String },
    ExecProc {
        name: String,
        args: IndexMap<String, Expr>,
        returns: IndexMap<String, ColumnType>,
    },

    ClearSchema { schema: String },
    SchemaExists { schema: String },
    SwitchFk { enabled: bool },
}

impl QueryDef {
    pub fn tag(&self) -> &'static str {
        match self {
            QueryDef::Select(_) => "select",
            QueryDef::Insert(_) => "insert",
            QueryDef::InsertIfNotExists(_) => "insertIfNotExists",
            QueryDef::InsertInto(_) => "insertInto",
            QueryDef::Update(_) => "update",
            QueryDef::Delete(_) => "delete",
            QueryDef::Upsert(_) => "upsert",
            QueryDef::CreateTable(_) => "createTable",
            QueryDef::DropTable { .. } => "dropTable",
            QueryDef::RenameTable { .. } => "renameTable",
            QueryDef::Truncate { .. } => "truncate",
            QueryDef::AddColumn { .. } => "addColumn",
            QueryDef::DropColumn { .. } => "dropColumn",
            QueryDef::ModifyColumn { .. } => "modifyColumn",
            QueryDef::RenameColumn { .. } => "renameColumn",
            QueryDef::AddPrimaryKey { .. } => "addPrimaryKey",
            QueryDef::DropPrimaryKey { .. } => "dropPrimaryKey",
            QueryDef::AddForeignKey(_) => "addForeignKey",
            QueryDef::DropForeignKey { .. } => "dropForeignKey",
            QueryDef::AddIndex(_) => "addIndex",
            QueryDef::DropIndex { .. } => "dropIndex",
            QueryDef::CreateView { .. } => "createView",
            QueryDef::DropView { .. } => "dropView",
            QueryDef::CreateProcedure(_) => "createProcedure",
            QueryDef::DropProcedure { .. } => "dropProcedure",
            QueryDef::ExecProc { .. } => "execProc",
            QueryDef::ClearSchema { .. } => "clearSchema",
            QueryDef::SchemaExists { .. } => "schemaExists",
            QueryDef::SwitchFk { .. } => "switchFk",
        }
    }

    /// Statements that implicitly commit on at least one engine and so may
    /// not run inside a transaction.
    pub fn is_ddl(&self) -> bool {
        !matches!(
            self,
            QueryDef::Select(_)
                | QueryDef::Insert(_)
                | QueryDef::InsertIfNotExists(_)
                | QueryDef::InsertInto(_)
                | QueryDef::Update(_)
                | QueryDef::Delete(_)
                | QueryDef::Upsert(_)
                | QueryDef::ExecProc { .. }
                | QueryDef::SchemaExists { .. }
                | QueryDef::SwitchFk { .. }
        )
    }

    /// Shape of the rows the caller reads back, if the statement returns any.
    pub fn result_meta(&self) -> Option<ResultMeta> {
        match self {
            QueryDef::Select(select) => Some(select.result_meta()),
            QueryDef::Insert(InsertDef { output, .. })
            | QueryDef::Update(UpdateDef { output, .. })
            | QueryDef::Delete(DeleteDef { output, .. })
                if !output.is_empty() =>
            {
                Some(ResultMeta::from_columns(output.clone()))
            }
            QueryDef::ExecProc { returns, .. } if !returns.is_empty() => {
                Some(ResultMeta::from_columns(returns.clone()))
            }
            QueryDef::SchemaExists { .. } => {
                let mut columns = IndexMap::new();
                columns.insert("exists".to_string(), ColumnType::Boolean);
                Some(ResultMeta::from_columns(columns))
            }
            _ => None,
        }
    }
}

impl From<SelectDef> for QueryDef {
    fn from(select: SelectDef) -> Self {
        QueryDef::Select(select)
    }
}

/// Row literal helper: `row([("id", 1.into()), ("name", "x".into())])`.
pub fn row<K: Into<String>>(values: impl IntoIterator<Item = (K, Value)>) -> IndexMap<String, Expr> {
    values
        .into_iter()
        .map(|(k, v)| (k.into(), Expr::Value(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::col;

    fn author_join(select: SelectDef) -> JoinDef {
        JoinDef {
            kind: JoinKind::Left,
            name: "author".into(),
            is_single: true,
            on: vec![col("t1", "id", ColumnType::Int).eq(col("t0", "author_id", ColumnType::Int))],
            select,
        }
    }

    #[test]
    fn test_plain_join_detection() {
        let plain = author_join(SelectDef::from_table("authors", "t1"));
        assert!(plain.is_plain());

        let mut projected = SelectDef::from_table("authors", "t1");
        projected
            .projection
            .insert("name".into(), col("t1", "name", ColumnType::text()));
        assert!(!author_join(projected).is_plain());

        let mut ordered = SelectDef::from_table("authors", "t1");
        ordered.order_by.push(OrderBy::asc(col("t1", "id", ColumnType::Int)));
        assert!(!author_join(ordered).is_plain());

        let union = SelectDef::new(
            Source::Union {
                selects: vec![SelectDef::from_table("a", "u0"), SelectDef::from_table("b", "u1")],
                all: true,
            },
            "t1",
        );
        assert!(!author_join(union).is_plain());
    }

    #[test]
    fn test_result_meta_nests_lateral_outputs() {
        let mut country = SelectDef::from_table("countries", "t2");
        country
            .projection
            .insert("code".into(), col("t2", "code", ColumnType::Char(2)));

        let mut author = SelectDef::from_table("authors", "t1");
        author
            .projection
            .insert("name".into(), col("t1", "name", ColumnType::text()));
        author.joins.push(JoinDef {
            kind: JoinKind::Left,
            name: "country".into(),
            is_single: true,
            select: country,
            on: vec![],
        });

        let mut book = SelectDef::from_table("books", "t0");
        book.projection
            .insert("id".into(), col("t0", "id", ColumnType::Int));
        book.joins.push(author_join(author));

        let meta = book.result_meta();
        let keys: Vec<_> = meta.columns.keys().cloned().collect();
        assert_eq!(keys, vec!["id", "author.name", "author.country.code"]);
        assert_eq!(meta.columns["author.country.code"], ColumnType::Char(2));
        assert!(meta.joins["author"].is_single);
        assert!(meta.joins.contains_key("author.country"));
    }

    #[test]
    fn test_ddl_tagging() {
        assert!(QueryDef::Truncate { table: "t".into() }.is_ddl());
        assert!(QueryDef::ClearSchema { schema: "s".into() }.is_ddl());
        assert!(!QueryDef::SwitchFk { enabled: false }.is_ddl());
        assert!(!QueryDef::Select(SelectDef::from_table("t", "t0")).is_ddl());
    }

    #[test]
    fn test_insert_columns_first_seen() {
        let insert = InsertDef {
            table: "t".into(),
            rows: vec![
                row([("a", Value::Integer(1))]),
                row([("b", Value::Integer(2)), ("a", Value::Integer(3))]),
            ],
            output: IndexMap::new(),
            primary_key: vec!["a".into()],
            auto_increment: Some("id".into()),
        };
        assert_eq!(insert.columns(), vec!["a", "b"]);
        assert!(!insert.supplies_auto_increment());
    }
}

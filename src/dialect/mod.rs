//! Dialect rendering
//!
//! `Dialect` holds the shared clause assembly as default methods and leaves
//! every engine-specific decision to a hook. `DdlDialect` does the same for
//! schema statements, and `Renderer::build` is the single exhaustive dispatch
//! over `QueryDef`.

pub mod ddl;
pub mod mysql;
pub mod postgres;
pub mod sqlserver;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::driver::{NativeError, TransactionCode};
use crate::error::{SqlError, SqlResult};
use crate::expr::{
    AggregateFn, ArithOp, DateFn, DatePart, Expr, NullsOrder, NumFn, OrderBy, OrderDirection, StrFn,
    WhereExpr, WindowFn,
};
use crate::query::{
    DeleteDef, InsertDef, InsertIfNotExistsDef, InsertIntoDef, JoinDef, JoinKind, LockMode,
    QueryDef, RecursiveCte, ResultMeta, SelectDef, Source, UpdateDef, UpsertDef,
};
use crate::types::{ColumnType, Value};

pub use ddl::DdlDialect;
pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlserver::SqlServerDialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    MySql,
    Postgres,
    SqlServer,
}

impl DialectKind {
    pub fn name(&self) -> &'static str {
        match self {
            DialectKind::MySql => "MySQL",
            DialectKind::Postgres => "PostgreSQL",
            DialectKind::SqlServer => "SQL Server",
        }
    }

    /// Schema the engine uses when none is configured.
    pub fn default_schema(&self) -> &'static str {
        match self {
            DialectKind::MySql => "catena",
            DialectKind::Postgres => "public",
            DialectKind::SqlServer => "dbo",
        }
    }

    pub fn renderer(&self, version: Option<DatabaseVersion>) -> Box<dyn Renderer> {
        match (self, version) {
            (DialectKind::MySql, Some(v)) => Box::new(MySqlDialect::with_version(v)),
            (DialectKind::MySql, None) => Box::new(MySqlDialect::new()),
            (DialectKind::Postgres, Some(v)) => Box::new(PostgresDialect::with_version(v)),
            (DialectKind::Postgres, None) => Box::new(PostgresDialect::new()),
            (DialectKind::SqlServer, Some(v)) => Box::new(SqlServerDialect::with_version(v)),
            (DialectKind::SqlServer, None) => Box::new(SqlServerDialect::new()),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DialectKind {
    type Err = SqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DialectKind::MySql),
            "postgres" | "postgresql" | "pg" => Ok(DialectKind::Postgres),
            "sqlserver" | "mssql" | "tsql" => Ok(DialectKind::SqlServer),
            other => Err(SqlError::config_error(format!("unknown dialect '{}'", other))),
        }
    }
}

/// Server version, used to gate features that arrived in later releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl DatabaseVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn is_at_least(&self, other: &DatabaseVersion) -> bool {
        (self.major, self.minor, self.patch) >= (other.major, other.minor, other.patch)
    }
}

impl fmt::Display for DatabaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for DatabaseVersion {
    type Err = SqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.').map(|p| {
            p.parse::<u32>()
                .map_err(|_| SqlError::config_error(format!("invalid version '{}'", s)))
        });
        let major = parts
            .next()
            .ok_or_else(|| SqlError::config_error("empty version"))??;
        let minor = parts.next().transpose()?.unwrap_or(0);
        let patch = parts.next().transpose()?.unwrap_or(0);
        Ok(Self::new(major, minor, patch))
    }
}

/// Version-gated capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    WindowFunctions,
    RecursiveCte,
    LateralJoin,
    Merge,
    Trim,
}

impl Feature {
    pub fn name(&self) -> &'static str {
        match self {
            Feature::WindowFunctions => "window functions",
            Feature::RecursiveCte => "recursive CTEs",
            Feature::LateralJoin => "lateral joins",
            Feature::Merge => "MERGE",
            Feature::Trim => "TRIM",
        }
    }
}

/// A rendered script plus the hints needed to read its caller-visible rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rendered {
    pub statements: Vec<String>,
    /// Statement whose result set holds the rows; defaults to the last one.
    pub result_set_index: Option<usize>,
    /// For per-record scripts: distance between consecutive result sets.
    pub result_set_stride: Option<usize>,
    pub meta: Option<ResultMeta>,
}

impl Rendered {
    pub fn single(sql: impl Into<String>) -> Self {
        Self::script(vec![sql.into()])
    }

    pub fn script(statements: Vec<String>) -> Self {
        Self {
            statements,
            ..Self::default()
        }
    }

    pub fn with_result(mut self, index: usize) -> Self {
        self.result_set_index = Some(index);
        self
    }

    pub fn with_stride(mut self, stride: Option<usize>) -> Self {
        self.result_set_stride = stride;
        self
    }

    pub fn with_meta(mut self, meta: Option<ResultMeta>) -> Self {
        self.meta = meta;
        self
    }

    /// The whole script as one text.
    pub fn sql(&self) -> String {
        let mut out = String::new();
        for (i, statement) in self.statements.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(statement);
            if !statement.ends_with(';') {
                out.push(';');
            }
        }
        out
    }

    /// Indices of the result sets that carry caller-visible rows.
    pub fn result_indices(&self) -> Vec<usize> {
        if self.statements.is_empty() {
            return Vec::new();
        }
        let first = self
            .result_set_index
            .unwrap_or(self.statements.len() - 1);
        match self.result_set_stride {
            Some(stride) if stride > 0 => (first..self.statements.len()).step_by(stride).collect(),
            _ => vec![first],
        }
    }
}

/// Shared SQL assembly with per-engine hooks.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    fn version(&self) -> &DatabaseVersion;

    // ---- lexical hooks

    fn quote_identifier(&self, ident: &str) -> String;

    fn quote_string(&self, s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }

    fn render_bool(&self, b: bool) -> String {
        if b { "TRUE" } else { "FALSE" }.to_string()
    }

    fn render_blob(&self, bytes: &[u8]) -> String;

    /// Temporal and identifier literals; `text` is the canonical form.
    fn render_typed_literal(&self, _ty: ColumnType, text: &str) -> String {
        self.quote_string(text)
    }

    /// Cast target used to force floating point division.
    fn float_cast_type(&self) -> &'static str;

    /// First server version that has `feature`; `None` means always present.
    fn feature_since(&self, _feature: Feature) -> Option<DatabaseVersion> {
        None
    }

    fn supports(&self, feature: Feature) -> bool {
        self.feature_since(feature)
            .map(|minimum| self.version().is_at_least(&minimum))
            .unwrap_or(true)
    }

    fn require(&self, feature: Feature) -> SqlResult<()> {
        match self.feature_since(feature) {
            Some(minimum) if !self.version().is_at_least(&minimum) => Err(SqlError::unsupported(
                format!("{} (needs {} or later)", feature.name(), minimum),
                format!("{} {}", self.kind().name(), self.version()),
            )),
            _ => Ok(()),
        }
    }

    fn quote_path(&self, path: &[String]) -> String {
        path.iter()
            .map(|p| self.quote_identifier(p))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn qualify_table(&self, name: &str, schema: Option<&str>) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.quote_identifier(schema), self.quote_identifier(name)),
            None => self.quote_identifier(name),
        }
    }

    fn render_value(&self, value: &Value) -> SqlResult<String> {
        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => {
                if !r.is_finite() {
                    return Err(SqlError::invalid_tree(format!("non-finite literal {}", r)));
                }
                format!("{:?}", r)
            }
            Value::Decimal(d) => d.to_string(),
            Value::Text(s) => self.quote_string(s),
            Value::Blob(b) => self.render_blob(b),
            Value::Boolean(b) => self.render_bool(*b),
            other => self.render_typed_literal(other.column_type(), &other.to_string()),
        })
    }

    fn render_template(&self, parts: &[String], args: &[Expr]) -> SqlResult<String> {
        if parts.len() != args.len() + 1 {
            return Err(SqlError::invalid_tree("raw template arity mismatch"));
        }
        let mut sql = parts[0].clone();
        for (arg, part) in args.iter().zip(parts.iter().skip(1)) {
            sql.push_str(&self.render_expr(arg)?);
            sql.push_str(part);
        }
        Ok(sql)
    }

    // ---- expression hooks

    fn render_length(&self, value: &str) -> String {
        format!("CHAR_LENGTH({})", value)
    }

    fn render_trim(&self, value: &str) -> String {
        format!("TRIM({})", value)
    }

    fn render_substring(&self, value: &str, start: &str, length: Option<&str>) -> String {
        match length {
            Some(len) => format!("SUBSTRING({}, {}, {})", value, start, len),
            None => format!("SUBSTRING({}, {})", value, start),
        }
    }

    fn render_index_of(&self, value: &str, search: &str) -> String;

    fn render_to_text(&self, value: &str) -> String;

    fn render_ceil(&self, value: &str) -> String {
        format!("CEIL({})", value)
    }

    fn render_now(&self) -> String;

    fn render_extract(&self, part: DatePart, value: &str) -> String {
        format!("EXTRACT({} FROM {})", part.keyword(), value)
    }

    fn render_add_days(&self, value: &str, days: &str) -> String;

    fn render_diff_days(&self, end: &str, start: &str) -> String;

    fn render_if_null(&self, value: &str, fallback: &str) -> String {
        format!("COALESCE({}, {})", value, fallback)
    }

    fn render_if(&self, cond: &str, then: &str, otherwise: &str) -> String {
        format!("CASE WHEN {} THEN {} ELSE {} END", cond, then, otherwise)
    }

    /// A condition in value position.
    fn render_bool_value(&self, cond: &str) -> String {
        format!("({})", cond)
    }

    /// Whether AVG over integers must be widened to avoid truncation.
    fn widens_integer_avg(&self) -> bool {
        false
    }

    fn render_null_safe_eq(&self, left: &Expr, right: &Expr) -> SqlResult<String>;

    fn render_like(&self, value: &str, pattern: &str, case_insensitive: bool) -> String {
        if case_insensitive {
            format!("LOWER({}) LIKE LOWER({})", value, pattern)
        } else {
            format!("{} LIKE {}", value, pattern)
        }
    }

    fn render_regexp(&self, value: &str, pattern: &str) -> SqlResult<String>;

    // ---- expression assembly

    fn render_expr(&self, expr: &Expr) -> SqlResult<String> {
        match expr {
            Expr::Value(v) => self.render_value(v),
            Expr::Column { path, .. } => Ok(self.quote_path(path)),
            Expr::Raw { parts, args, .. } => self.render_template(parts, args),
            Expr::Str(f) => self.render_str_fn(f),
            Expr::Num(f) => self.render_num_fn(f),
            Expr::Date(f) => self.render_date_fn(f),
            Expr::IfNull { value, fallback } => Ok(self.render_if_null(
                &self.render_expr(value)?,
                &self.render_expr(fallback)?,
            )),
            Expr::NullIf { value, other } => Ok(format!(
                "NULLIF({}, {})",
                self.render_expr(value)?,
                self.render_expr(other)?
            )),
            Expr::Is(cond) => Ok(self.render_bool_value(&self.render_condition(cond)?)),
            Expr::Switch { cases, otherwise } => {
                if cases.is_empty() {
                    return Err(SqlError::invalid_tree("switch without cases"));
                }
                let mut sql = String::from("CASE");
                for (cond, value) in cases {
                    sql.push_str(&format!(
                        " WHEN {} THEN {}",
                        self.render_condition(cond)?,
                        self.render_expr(value)?
                    ));
                }
                if let Some(otherwise) = otherwise {
                    sql.push_str(&format!(" ELSE {}", self.render_expr(otherwise)?));
                }
                sql.push_str(" END");
                Ok(sql)
            }
            Expr::If { cond, then, otherwise } => Ok(self.render_if(
                &self.render_condition(cond)?,
                &self.render_expr(then)?,
                &self.render_expr(otherwise)?,
            )),
            Expr::Aggregate { func, arg, distinct } => {
                self.render_aggregate(*func, arg.as_deref(), *distinct)
            }
            Expr::Window { func, partition_by, order_by } => {
                self.render_window(func, partition_by, order_by)
            }
            Expr::Subquery(select) => Ok(format!("({})", self.render_select(select, true)?)),
        }
    }

    fn render_str_fn(&self, f: &StrFn) -> SqlResult<String> {
        Ok(match f {
            StrFn::Concat(parts) => {
                if parts.is_empty() {
                    return Err(SqlError::invalid_tree("concat without arguments"));
                }
                let rendered = parts
                    .iter()
                    .map(|p| self.render_expr(p))
                    .collect::<SqlResult<Vec<_>>>()?;
                format!("CONCAT({})", rendered.join(", "))
            }
            StrFn::Lower(v) => format!("LOWER({})", self.render_expr(v)?),
            StrFn::Upper(v) => format!("UPPER({})", self.render_expr(v)?),
            StrFn::Trim(v) => self.render_trim(&self.render_expr(v)?),
            StrFn::Length(v) => self.render_length(&self.render_expr(v)?),
            StrFn::Substring { value, start, length } => {
                let length = length.as_ref().map(|l| self.render_expr(l)).transpose()?;
                self.render_substring(
                    &self.render_expr(value)?,
                    &self.render_expr(start)?,
                    length.as_deref(),
                )
            }
            StrFn::Replace { value, from, to } => format!(
                "REPLACE({}, {}, {})",
                self.render_expr(value)?,
                self.render_expr(from)?,
                self.render_expr(to)?
            ),
            StrFn::IndexOf { value, search } => {
                self.render_index_of(&self.render_expr(value)?, &self.render_expr(search)?)
            }
            StrFn::ToText(v) => self.render_to_text(&self.render_expr(v)?),
        })
    }

    fn render_num_fn(&self, f: &NumFn) -> SqlResult<String> {
        Ok(match f {
            NumFn::Arith { op, left, right } => {
                let l = self.render_expr(left)?;
                let r = self.render_expr(right)?;
                if *op == ArithOp::Div
                    && left.column_type().is_integer()
                    && right.column_type().is_integer()
                {
                    format!("(CAST({} AS {}) / {})", l, self.float_cast_type(), r)
                } else {
                    format!("({} {} {})", l, op.symbol(), r)
                }
            }
            NumFn::Abs(v) => format!("ABS({})", self.render_expr(v)?),
            NumFn::Round { value, digits } => format!("ROUND({}, {})", self.render_expr(value)?, digits),
            NumFn::Floor(v) => format!("FLOOR({})", self.render_expr(v)?),
            NumFn::Ceil(v) => self.render_ceil(&self.render_expr(v)?),
        })
    }

    fn render_date_fn(&self, f: &DateFn) -> SqlResult<String> {
        Ok(match f {
            DateFn::Now => self.render_now(),
            DateFn::Extract { part, value } => self.render_extract(*part, &self.render_expr(value)?),
            DateFn::AddDays { value, days } => {
                self.render_add_days(&self.render_expr(value)?, &self.render_expr(days)?)
            }
            DateFn::DiffDays { end, start } => {
                self.render_diff_days(&self.render_expr(end)?, &self.render_expr(start)?)
            }
            DateFn::ToDate(v) => format!("CAST({} AS DATE)", self.render_expr(v)?),
        })
    }

    fn render_aggregate(&self, func: AggregateFn, arg: Option<&Expr>, distinct: bool) -> SqlResult<String> {
        let Some(arg) = arg else {
            return match func {
                AggregateFn::Count => Ok("COUNT(*)".to_string()),
                other => Err(SqlError::invalid_tree(format!("{} requires an argument", other.name()))),
            };
        };
        let mut rendered = self.render_expr(arg)?;
        if func == AggregateFn::Avg && self.widens_integer_avg() && arg.column_type().is_integer() {
            rendered = format!("CAST({} AS {})", rendered, self.float_cast_type());
        }
        let distinct = if distinct { "DISTINCT " } else { "" };
        Ok(format!("{}({}{})", func.name(), distinct, rendered))
    }

    fn render_window(&self, func: &WindowFn, partition_by: &[Expr], order_by: &[OrderBy]) -> SqlResult<String> {
        self.require(Feature::WindowFunctions)?;
        let call = match func {
            WindowFn::RowNumber => "ROW_NUMBER()".to_string(),
            WindowFn::Rank => "RANK()".to_string(),
            WindowFn::DenseRank => "DENSE_RANK()".to_string(),
            WindowFn::Lag { value, offset } => format!("LAG({}, {})", self.render_expr(value)?, offset),
            WindowFn::Lead { value, offset } => format!("LEAD({}, {})", self.render_expr(value)?, offset),
            WindowFn::Aggregate { func, arg } => self.render_aggregate(*func, arg.as_deref(), false)?,
        };
        if matches!(func, WindowFn::RowNumber | WindowFn::Rank | WindowFn::DenseRank | WindowFn::Lag { .. } | WindowFn::Lead { .. })
            && order_by.is_empty()
        {
            return Err(SqlError::invalid_tree(format!("{} requires an ordering", call)));
        }
        let mut over = Vec::new();
        if !partition_by.is_empty() {
            let parts = partition_by
                .iter()
                .map(|e| self.render_expr(e))
                .collect::<SqlResult<Vec<_>>>()?;
            over.push(format!("PARTITION BY {}", parts.join(", ")));
        }
        if !order_by.is_empty() {
            over.push(format!("ORDER BY {}", self.render_order_by(order_by)?));
        }
        Ok(format!("{} OVER ({})", call, over.join(" ")))
    }

    // ---- conditions

    fn render_condition(&self, cond: &WhereExpr) -> SqlResult<String> {
        match cond {
            WhereExpr::Eq(l, r) => self.render_null_safe_eq(l, r),
            WhereExpr::NotEq(l, r) => Ok(format!("NOT ({})", self.render_null_safe_eq(l, r)?)),
            WhereExpr::Compare { op, left, right } => Ok(format!(
                "{} {} {}",
                self.render_expr(left)?,
                op.symbol(),
                self.render_expr(right)?
            )),
            WhereExpr::Between { value, low, high } => Ok(format!(
                "{} BETWEEN {} AND {}",
                self.render_expr(value)?,
                self.render_expr(low)?,
                self.render_expr(high)?
            )),
            WhereExpr::IsNull(e) => Ok(format!("{} IS NULL", self.render_expr(e)?)),
            WhereExpr::Like { value, pattern, case_insensitive } => Ok(self.render_like(
                &self.render_expr(value)?,
                &self.render_expr(pattern)?,
                *case_insensitive,
            )),
            WhereExpr::Regexp { value, pattern } => {
                self.render_regexp(&self.render_expr(value)?, &self.render_expr(pattern)?)
            }
            WhereExpr::In { value, list } => {
                if list.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let items = list
                    .iter()
                    .map(|e| self.render_expr(e))
                    .collect::<SqlResult<Vec<_>>>()?;
                Ok(format!("{} IN ({})", self.render_expr(value)?, items.join(", ")))
            }
            WhereExpr::InQuery { value, query } => Ok(format!(
                "{} IN ({})",
                self.render_expr(value)?,
                self.render_select(query, true)?
            )),
            WhereExpr::Exists(query) => Ok(format!("EXISTS ({})", self.render_select(query, true)?)),
            WhereExpr::Not(inner) => Ok(format!("NOT ({})", self.render_condition(inner)?)),
            WhereExpr::And(items) => self.render_connective("AND", items),
            WhereExpr::Or(items) => self.render_connective("OR", items),
            WhereExpr::Raw { parts, args } => self.render_template(parts, args),
        }
    }

    fn render_connective(&self, operator: &'static str, items: &[WhereExpr]) -> SqlResult<String> {
        match items {
            [] => Err(SqlError::EmptyLogicalList { operator }),
            [only] => self.render_condition(only),
            many => {
                let parts = many
                    .iter()
                    .map(|c| self.render_condition(c))
                    .collect::<SqlResult<Vec<_>>>()?;
                Ok(format!("({})", parts.join(&format!(" {} ", operator))))
            }
        }
    }

    /// Conjunction of a WHERE/HAVING/ON list.
    fn render_where(&self, conditions: &[WhereExpr]) -> SqlResult<String> {
        let parts = conditions
            .iter()
            .map(|c| self.render_condition(c))
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(parts.join(" AND "))
    }

    // ---- select hooks

    /// Prefix placed after `SELECT [DISTINCT]` for `top`.
    fn render_top(&self, _count: u64) -> Option<String> {
        None
    }

    /// Trailing row-limiting clause. `nested` marks subqueries.
    fn render_row_limit(&self, select: &SelectDef, _nested: bool) -> Option<String> {
        match (select.limit, select.top) {
            (Some(limit), _) => Some(format!(
                "OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                limit.offset, limit.count
            )),
            (None, Some(top)) => Some(format!("FETCH FIRST {} ROWS ONLY", top)),
            (None, None) => None,
        }
    }

    fn supports_nulls_ordering(&self) -> bool {
        false
    }

    /// Table hint placed right after the locked source.
    fn render_lock_hint(&self, _lock: LockMode) -> Option<String> {
        None
    }

    /// Trailing locking clause.
    fn render_lock_clause(&self, lock: LockMode) -> Option<String> {
        Some(
            match lock {
                LockMode::Update => "FOR UPDATE",
                LockMode::Share => "FOR SHARE",
            }
            .to_string(),
        )
    }

    fn recursive_keyword(&self) -> &'static str {
        "WITH RECURSIVE"
    }

    fn supports_nested_cte(&self) -> bool {
        true
    }

    /// Correlated join for a branch that is more than a filtered table.
    fn render_lateral_join(&self, kind: JoinKind, subquery: &str, alias: &str) -> SqlResult<String>;

    // ---- select assembly

    fn render_order_by(&self, orders: &[OrderBy]) -> SqlResult<String> {
        let mut items = Vec::new();
        for order in orders {
            let expr = self.render_expr(&order.expr)?;
            let direction = match order.direction {
                OrderDirection::Asc => "ASC",
                OrderDirection::Desc => "DESC",
            };
            match order.nulls {
                None => items.push(format!("{} {}", expr, direction)),
                Some(nulls) if self.supports_nulls_ordering() => {
                    let nulls = match nulls {
                        NullsOrder::First => "NULLS FIRST",
                        NullsOrder::Last => "NULLS LAST",
                    };
                    items.push(format!("{} {} {}", expr, direction, nulls));
                }
                Some(nulls) => {
                    let (null_rank, value_rank) = match nulls {
                        NullsOrder::First => (0, 1),
                        NullsOrder::Last => (1, 0),
                    };
                    items.push(format!(
                        "CASE WHEN {} IS NULL THEN {} ELSE {} END",
                        expr, null_rank, value_rank
                    ));
                    items.push(format!("{} {}", expr, direction));
                }
            }
        }
        Ok(items.join(", "))
    }

    fn render_projection(&self, select: &SelectDef) -> SqlResult<String> {
        let mut items = Vec::new();
        for (key, expr) in &select.projection {
            items.push(format!("{} AS {}", self.render_expr(expr)?, self.quote_identifier(key)));
        }
        for join in select.joins.iter().filter(|j| !j.is_plain()) {
            for (key, _) in join.select.output_columns() {
                items.push(format!(
                    "{}.{} AS {}",
                    self.quote_identifier(&join.select.alias),
                    self.quote_identifier(&key),
                    self.quote_identifier(&format!("{}.{}", join.name, key))
                ));
            }
        }
        if items.is_empty() {
            items.push(format!("{}.*", self.quote_identifier(&select.alias)));
        }
        Ok(items.join(", "))
    }

    fn render_source(&self, source: &Source, alias: &str) -> SqlResult<String> {
        let alias = self.quote_identifier(alias);
        Ok(match source {
            Source::Table { name, schema } => {
                format!("{} AS {}", self.qualify_table(name, schema.as_deref()), alias)
            }
            Source::View(name) | Source::Cte(name) => {
                format!("{} AS {}", self.quote_identifier(name), alias)
            }
            Source::Select(inner) => format!("({}) AS {}", self.render_select(inner, true)?, alias),
            Source::Union { selects, all } => {
                if selects.len() < 2 {
                    return Err(SqlError::invalid_tree("a union needs at least two selects"));
                }
                let members = selects
                    .iter()
                    .enumerate()
                    .map(|(i, s)| self.render_union_member(s, i))
                    .collect::<SqlResult<Vec<_>>>()?;
                let glue = if *all { " UNION ALL " } else { " UNION " };
                format!("({}) AS {}", members.join(glue), alias)
            }
        })
    }

    fn render_union_member(&self, select: &SelectDef, _index: usize) -> SqlResult<String> {
        Ok(format!("({})", self.render_select(select, true)?))
    }

    fn render_join(&self, join: &JoinDef) -> SqlResult<String> {
        if join.is_plain() {
            let keyword = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::Left => "LEFT JOIN",
            };
            let mut conditions = join.on.clone();
            conditions.extend(join.select.filters.iter().cloned());
            let on = if conditions.is_empty() {
                "1 = 1".to_string()
            } else {
                self.render_where(&conditions)?
            };
            return Ok(format!(
                "{} {} ON {}",
                keyword,
                self.render_source(&join.select.source, &join.select.alias)?,
                on
            ));
        }
        let mut correlated = join.select.clone();
        correlated.filters.splice(0..0, join.on.iter().cloned());
        let subquery = self.render_select(&correlated, true)?;
        self.render_lateral_join(join.kind, &subquery, &join.select.alias)
    }

    fn render_recursive_cte(&self, cte: &RecursiveCte) -> SqlResult<String> {
        self.require(Feature::RecursiveCte)?;
        let columns = cte
            .base
            .output_columns()
            .into_iter()
            .map(|(k, _)| self.quote_identifier(&k))
            .collect::<Vec<_>>();
        if columns.is_empty() {
            return Err(SqlError::missing_columns(format!("recursive CTE '{}'", cte.name)));
        }
        Ok(format!(
            "{} {} ({}) AS ({} UNION ALL {})",
            self.recursive_keyword(),
            self.quote_identifier(&cte.name),
            columns.join(", "),
            self.render_select(&cte.base, false)?,
            self.render_select(&cte.step, false)?
        ))
    }

    fn render_select(&self, select: &SelectDef, nested: bool) -> SqlResult<String> {
        let mut sql = String::new();
        if let Some(cte) = &select.recursive {
            if nested && !self.supports_nested_cte() {
                return Err(SqlError::unsupported("recursive CTE inside a subquery", self.kind().name()));
            }
            sql.push_str(&self.render_recursive_cte(cte)?);
            sql.push(' ');
        }
        sql.push_str("SELECT ");
        if select.distinct {
            sql.push_str("DISTINCT ");
        }
        if let Some(prefix) = select.top.and_then(|n| self.render_top(n)) {
            sql.push_str(&prefix);
            sql.push(' ');
        }
        sql.push_str(&self.render_projection(select)?);
        sql.push_str(" FROM ");
        sql.push_str(&self.render_source(&select.source, &select.alias)?);
        if let Some(hint) = select.lock.and_then(|l| self.render_lock_hint(l)) {
            sql.push(' ');
            sql.push_str(&hint);
        }
        for join in &select.joins {
            sql.push(' ');
            sql.push_str(&self.render_join(join)?);
        }
        if !select.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.render_where(&select.filters)?);
        }
        if !select.group_by.is_empty() {
            let groups = select
                .group_by
                .iter()
                .map(|e| self.render_expr(e))
                .collect::<SqlResult<Vec<_>>>()?;
            sql.push_str(" GROUP BY ");
            sql.push_str(&groups.join(", "));
        }
        if !select.having.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&self.render_where(&select.having)?);
        }
        if !select.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.render_order_by(&select.order_by)?);
        } else if select.limit.is_some() {
            return Err(SqlError::LimitWithoutOrderBy { alias: select.alias.clone() });
        }
        if let Some(limit) = self.render_row_limit(select, nested) {
            sql.push(' ');
            sql.push_str(&limit);
        }
        if let Some(clause) = select.lock.and_then(|l| self.render_lock_clause(l)) {
            sql.push(' ');
            sql.push_str(&clause);
        }
        Ok(sql)
    }

    // ---- mutations

    fn default_values_clause(&self) -> &'static str {
        "DEFAULT VALUES"
    }

    /// Extra FROM needed for a table-less SELECT with a WHERE clause.
    fn dual_table(&self) -> &'static str {
        ""
    }

    fn render_column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `INSERT INTO t (cols)` and the matching `VALUES ...` tail, with an
    /// optional clause spliced between them.
    fn render_insert_statement(
        &self,
        table: &str,
        rows: &[IndexMap<String, Expr>],
        between: Option<&str>,
    ) -> SqlResult<String> {
        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        let mut sql = format!("INSERT INTO {}", self.quote_identifier(table));
        if columns.is_empty() {
            if rows.len() != 1 {
                return Err(SqlError::missing_columns(format!("multi-row insert into '{}'", table)));
            }
            if let Some(between) = between {
                sql.push(' ');
                sql.push_str(between);
            }
            sql.push(' ');
            sql.push_str(self.default_values_clause());
            return Ok(sql);
        }
        sql.push_str(&format!(" ({})", self.render_column_list(&columns)));
        if let Some(between) = between {
            sql.push(' ');
            sql.push_str(between);
        }
        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            let values = columns
                .iter()
                .map(|c| match row.get(c) {
                    Some(expr) => self.render_expr(expr),
                    None => Ok("DEFAULT".to_string()),
                })
                .collect::<SqlResult<Vec<_>>>()?;
            tuples.push(format!("({})", values.join(", ")));
        }
        sql.push_str(&format!(" VALUES {}", tuples.join(", ")));
        Ok(sql)
    }

    fn render_set_clause(&self, set: &IndexMap<String, Expr>) -> SqlResult<String> {
        if set.is_empty() {
            return Err(SqlError::missing_columns("update SET clause"));
        }
        let items = set
            .iter()
            .map(|(column, value)| Ok(format!("{} = {}", self.quote_identifier(column), self.render_expr(value)?)))
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(items.join(", "))
    }

    /// Null-safe key match against bare (unaliased) columns of `table`.
    fn render_key_match(&self, table: &str, keys: &[String], values: &IndexMap<String, Expr>) -> SqlResult<String> {
        let conditions = keys
            .iter()
            .map(|key| {
                let value = values
                    .get(key)
                    .cloned()
                    .ok_or_else(|| SqlError::invalid_tree(format!("no value for key column '{}'", key)))?;
                Ok(Expr::Column {
                    path: vec![table.to_string(), key.clone()],
                    ty: value.column_type(),
                }
                .eq(value))
            })
            .collect::<SqlResult<Vec<_>>>()?;
        self.render_where(&conditions)
    }

    fn build_insert(&self, def: &InsertDef) -> SqlResult<Rendered>;

    fn build_update(&self, def: &UpdateDef) -> SqlResult<Rendered>;

    fn build_delete(&self, def: &DeleteDef) -> SqlResult<Rendered>;

    fn build_upsert(&self, def: &UpsertDef) -> SqlResult<Rendered>;

    fn build_insert_if_not_exists(&self, def: &InsertIfNotExistsDef) -> SqlResult<Rendered> {
        if def.values.is_empty() {
            return Err(SqlError::missing_columns(format!("insert into '{}'", def.table)));
        }
        let columns: Vec<String> = def.values.keys().cloned().collect();
        let values = def
            .values
            .values()
            .map(|v| self.render_expr(v))
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(Rendered::single(format!(
            "INSERT INTO {} ({}) SELECT {}{} WHERE NOT EXISTS (SELECT 1 FROM {} WHERE {})",
            self.quote_identifier(&def.table),
            self.render_column_list(&columns),
            values.join(", "),
            self.dual_table(),
            self.quote_identifier(&def.table),
            self.render_key_match(&def.table, &def.keys, &def.values)?
        )))
    }

    fn build_insert_into(&self, def: &InsertIntoDef) -> SqlResult<Rendered> {
        let columns: Vec<String> = def.select.projection.keys().cloned().collect();
        if columns.is_empty() {
            return Err(SqlError::missing_columns(format!("insert into '{}' from select", def.table)));
        }
        Ok(Rendered::single(format!(
            "INSERT INTO {} ({}) {}",
            self.quote_identifier(&def.table),
            self.render_column_list(&columns),
            self.render_select(&def.select, false)?
        )))
    }

    /// One value of the `MERGE` source row.
    fn render_merge_source(&self, value: &Expr, _declared: Option<&ColumnType>) -> SqlResult<String> {
        self.render_expr(value)
    }

    /// `MERGE` keyed on `def.keys`; `target_hint` follows the target table.
    fn render_merge(&self, def: &UpsertDef, target_hint: &str) -> SqlResult<String> {
        if def.values.is_empty() {
            return Err(SqlError::missing_columns(format!("upsert into '{}'", def.table)));
        }
        let source_columns = def
            .values
            .iter()
            .map(|(column, value)| {
                Ok(format!(
                    "{} AS {}",
                    self.render_merge_source(value, def.column_types.get(column))?,
                    self.quote_identifier(column)
                ))
            })
            .collect::<SqlResult<Vec<_>>>()?;
        let on = def
            .keys
            .iter()
            .map(|key| {
                let ty = def
                    .values
                    .get(key)
                    .map(|v| v.column_type())
                    .ok_or_else(|| SqlError::invalid_tree(format!("no value for key column '{}'", key)))?;
                Ok(Expr::Column { path: vec!["target".into(), key.clone()], ty }
                    .eq(Expr::Column { path: vec!["source".into(), key.clone()], ty }))
            })
            .collect::<SqlResult<Vec<_>>>()?;
        let columns: Vec<String> = def.values.keys().cloned().collect();
        let inserted = columns
            .iter()
            .map(|c| format!("{}.{}", self.quote_identifier("source"), self.quote_identifier(c)))
            .collect::<Vec<_>>();
        let mut sql = format!(
            "MERGE INTO {}{} AS {} USING (SELECT {}) AS {} ON {}",
            self.quote_identifier(&def.table),
            target_hint,
            self.quote_identifier("target"),
            source_columns.join(", "),
            self.quote_identifier("source"),
            self.render_where(&on)?
        );
        if !def.update.is_empty() {
            sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", self.render_set_clause(&def.update)?));
        }
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            self.render_column_list(&columns),
            inserted.join(", ")
        ));
        Ok(sql)
    }

    // ---- failure classification

    /// Native codes this engine uses for transactional failures.
    fn transaction_code_for(&self, code: &str) -> Option<TransactionCode>;

    /// Native codes meaning "table does not exist".
    fn missing_table_codes(&self) -> &'static [&'static str];

    /// Recognizes a missing-table message from a driver that reports no code.
    fn is_missing_table_message(&self, message: &str) -> bool;

    fn classify_error(&self, err: &NativeError) -> Option<TransactionCode> {
        if let Some(code) = err.code.as_deref().and_then(|c| self.transaction_code_for(c)) {
            return Some(code);
        }
        let message = err.message.to_ascii_lowercase();
        if message.contains("no active transaction")
            || message.contains("no transaction is active")
            || message.contains("no transaction in progress")
            || message.contains("has no corresponding begin transaction")
        {
            Some(TransactionCode::NoActiveTransaction)
        } else if message.contains("transaction already started")
            || message.contains("already a transaction in progress")
        {
            Some(TransactionCode::AlreadyStarted)
        } else if message.contains("deadlock") {
            Some(TransactionCode::Deadlock)
        } else if message.contains("lock wait timeout") || message.contains("lock request time out") {
            Some(TransactionCode::LockTimeout)
        } else {
            None
        }
    }

    /// A coded error is judged on its code alone; the message only decides
    /// for code-less errors.
    fn is_missing_object(&self, err: &NativeError) -> bool {
        match err.code.as_deref() {
            Some(code) => self.missing_table_codes().contains(&code),
            None => self.is_missing_table_message(&err.message),
        }
    }
}

/// Statement-level entry point: one arm per `QueryDef` tag.
pub trait Renderer: DdlDialect {
    fn build(&self, def: &QueryDef) -> SqlResult<Rendered> {
        let rendered = match def {
            QueryDef::Select(select) => Rendered::single(self.render_select(select, false)?),
            QueryDef::Insert(insert) => self.build_insert(insert)?,
            QueryDef::InsertIfNotExists(insert) => self.build_insert_if_not_exists(insert)?,
            QueryDef::InsertInto(insert) => self.build_insert_into(insert)?,
            QueryDef::Update(update) => self.build_update(update)?,
            QueryDef::Delete(delete) => self.build_delete(delete)?,
            QueryDef::Upsert(upsert) => self.build_upsert(upsert)?,
            QueryDef::CreateTable(table) => self.build_create_table(table)?,
            QueryDef::DropTable { name, if_exists } => self.build_drop_table(name, *if_exists),
            QueryDef::RenameTable { from, to } => self.build_rename_table(from, to),
            QueryDef::Truncate { table } => self.build_truncate(table),
            QueryDef::AddColumn { table, column } => self.build_add_column(table, column)?,
            QueryDef::DropColumn { table, column } => self.build_drop_column(table, column),
            QueryDef::ModifyColumn { table, column } => self.build_modify_column(table, column)?,
            QueryDef::RenameColumn { table, from, to } => self.build_rename_column(table, from, to),
            QueryDef::AddPrimaryKey { table, columns } => self.build_add_primary_key(table, columns)?,
            QueryDef::DropPrimaryKey { table } => self.build_drop_primary_key(table),
            QueryDef::AddForeignKey(fk) => self.build_add_foreign_key(fk)?,
            QueryDef::DropForeignKey { table, name } => self.build_drop_foreign_key(table, name),
            QueryDef::AddIndex(index) => self.build_add_index(index)?,
            QueryDef::DropIndex { table, name } => self.build_drop_index(table, name),
            QueryDef::CreateView { name, select } => self.build_create_view(name, select)?,
            QueryDef::DropView { name } => self.build_drop_view(name),
            QueryDef::CreateProcedure(procedure) => self.build_create_procedure(procedure)?,
            QueryDef::DropProcedure { name } => self.build_drop_procedure(name),
            QueryDef::ExecProc { name, args, returns } => self.build_exec_proc(name, args, returns)?,
            QueryDef::ClearSchema { schema } => self.build_clear_schema(schema),
            QueryDef::SchemaExists { schema } => self.build_schema_exists(schema),
            QueryDef::SwitchFk { enabled } => self.build_switch_fk(*enabled),
        };
        Ok(rendered.with_meta(def.result_meta()))
    }
}

impl<T: DdlDialect + ?Sized> Renderer for T {}

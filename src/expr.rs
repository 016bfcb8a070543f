//! Expression trees
//!
//! `Expr` covers every scalar computation a query can carry. `WhereExpr` is
//! the restricted, boolean-only sibling: WHERE, HAVING and ON positions are
//! typed as `WhereExpr`, so a non-boolean member can never reach them.

use serde::{Deserialize, Serialize};

use crate::error::{SqlError, SqlResult};
use crate::query::SelectDef;
use crate::types::{ColumnType, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Value(Value),
    /// Identifier path, usually `[alias, column]`.
    Column { path: Vec<String>, ty: ColumnType },
    /// Literal SQL template; `parts` interleave with `args` (`parts.len() == args.len() + 1`).
    Raw {
        parts: Vec<String>,
        args: Vec<Expr>,
        ty: ColumnType,
    },
    Str(StrFn),
    Num(NumFn),
    Date(DateFn),
    IfNull {
        value: Box<Expr>,
        fallback: Box<Expr>,
    },
    NullIf {
        value: Box<Expr>,
        other: Box<Expr>,
    },
    /// A condition used as a boolean value.
    Is(Box<WhereExpr>),
    Switch {
        cases: Vec<(WhereExpr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    If {
        cond: Box<WhereExpr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Aggregate {
        func: AggregateFn,
        arg: Option<Box<Expr>>,
        distinct: bool,
    },
    Window {
        func: WindowFn,
        partition_by: Vec<Expr>,
        order_by: Vec<OrderBy>,
    },
    Subquery(Box<SelectDef>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StrFn {
    Concat(Vec<Expr>),
    Lower(Box<Expr>),
    Upper(Box<Expr>),
    Trim(Box<Expr>),
    Length(Box<Expr>),
    Substring {
        value: Box<Expr>,
        start: Box<Expr>,
        length: Option<Box<Expr>>,
    },
    Replace {
        value: Box<Expr>,
        from: Box<Expr>,
        to: Box<Expr>,
    },
    /// 1-based position of `search` in `value`, 0 when absent.
    IndexOf {
        value: Box<Expr>,
        search: Box<Expr>,
    },
    ToText(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NumFn {
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Abs(Box<Expr>),
    Round { value: Box<Expr>, digits: u32 },
    Floor(Box<Expr>),
    Ceil(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatePart {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DatePart {
    pub fn keyword(&self) -> &'static str {
        match self {
            DatePart::Year => "YEAR",
            DatePart::Month => "MONTH",
            DatePart::Day => "DAY",
            DatePart::Hour => "HOUR",
            DatePart::Minute => "MINUTE",
            DatePart::Second => "SECOND",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DateFn {
    Now,
    Extract { part: DatePart, value: Box<Expr> },
    AddDays { value: Box<Expr>, days: Box<Expr> },
    /// Whole days from `start` to `end`.
    DiffDays { end: Box<Expr>, start: Box<Expr> },
    ToDate(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggregateFn {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Max => "MAX",
            AggregateFn::Min => "MIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WindowFn {
    RowNumber,
    Rank,
    DenseRank,
    Lag { value: Box<Expr>, offset: u32 },
    Lead { value: Box<Expr>, offset: u32 },
    Aggregate { func: AggregateFn, arg: Option<Box<Expr>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub expr: Expr,
    pub direction: OrderDirection,
    pub nulls: Option<NullsOrder>,
}

impl OrderBy {
    pub fn asc(expr: Expr) -> Self {
        Self { expr, direction: OrderDirection::Asc, nulls: None }
    }

    pub fn desc(expr: Expr) -> Self {
        Self { expr, direction: OrderDirection::Desc, nulls: None }
    }

    pub fn nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = Some(nulls);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Gt,
    Lt,
    Gte,
    Lte,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Gte => ">=",
            CompareOp::Lte => "<=",
        }
    }
}

/// Boolean-only expression, the only shape allowed in WHERE/HAVING/ON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WhereExpr {
    /// Null-safe equality: `NULL = NULL` is true.
    Eq(Expr, Expr),
    /// Null-safe inequality.
    NotEq(Expr, Expr),
    Compare {
        op: CompareOp,
        left: Expr,
        right: Expr,
    },
    Between {
        value: Expr,
        low: Expr,
        high: Expr,
    },
    IsNull(Expr),
    Like {
        value: Expr,
        pattern: Expr,
        case_insensitive: bool,
    },
    Regexp {
        value: Expr,
        pattern: Expr,
    },
    In {
        value: Expr,
        list: Vec<Expr>,
    },
    InQuery {
        value: Expr,
        query: Box<SelectDef>,
    },
    Exists(Box<SelectDef>),
    Not(Box<WhereExpr>),
    And(Vec<WhereExpr>),
    Or(Vec<WhereExpr>),
    Raw {
        parts: Vec<String>,
        args: Vec<Expr>,
    },
}

impl WhereExpr {
    pub fn and(self, other: WhereExpr) -> WhereExpr {
        match self {
            WhereExpr::And(mut items) => {
                items.push(other);
                WhereExpr::And(items)
            }
            first => WhereExpr::And(vec![first, other]),
        }
    }

    pub fn or(self, other: WhereExpr) -> WhereExpr {
        match self {
            WhereExpr::Or(mut items) => {
                items.push(other);
                WhereExpr::Or(items)
            }
            first => WhereExpr::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> WhereExpr {
        WhereExpr::Not(Box::new(self))
    }

    /// Raw boolean SQL fragment; `?` marks each argument position.
    pub fn raw(template: &str, args: Vec<Expr>) -> SqlResult<WhereExpr> {
        let parts = split_template(template, args.len())?;
        Ok(WhereExpr::Raw { parts, args })
    }
}

fn split_template(template: &str, arg_count: usize) -> SqlResult<Vec<String>> {
    let parts: Vec<String> = template.split('?').map(str::to_string).collect();
    if parts.len() != arg_count + 1 {
        return Err(SqlError::invalid_tree(format!(
            "raw template '{}' has {} placeholder(s) but {} argument(s)",
            template,
            parts.len() - 1,
            arg_count
        )));
    }
    Ok(parts)
}

/// Conjunction; an empty list is a construction error.
pub fn and(conditions: Vec<WhereExpr>) -> SqlResult<WhereExpr> {
    if conditions.is_empty() {
        return Err(SqlError::EmptyLogicalList { operator: "AND" });
    }
    Ok(WhereExpr::And(conditions))
}

/// Disjunction; an empty list is a construction error.
pub fn or(conditions: Vec<WhereExpr>) -> SqlResult<WhereExpr> {
    if conditions.is_empty() {
        return Err(SqlError::EmptyLogicalList { operator: "OR" });
    }
    Ok(WhereExpr::Or(conditions))
}

pub fn not(condition: WhereExpr) -> WhereExpr {
    WhereExpr::Not(Box::new(condition))
}

pub fn exists(select: SelectDef) -> WhereExpr {
    WhereExpr::Exists(Box::new(select))
}

pub fn col(alias: impl Into<String>, name: impl Into<String>, ty: ColumnType) -> Expr {
    Expr::Column {
        path: vec![alias.into(), name.into()],
        ty,
    }
}

pub fn val(value: impl Into<Value>) -> Expr {
    Expr::Value(value.into())
}

pub fn null() -> Expr {
    Expr::Value(Value::Null)
}

/// Raw SQL expression; `?` marks each argument position.
pub fn raw(template: &str, args: Vec<Expr>, ty: ColumnType) -> SqlResult<Expr> {
    let parts = split_template(template, args.len())?;
    Ok(Expr::Raw { parts, args, ty })
}

pub fn is(condition: WhereExpr) -> Expr {
    Expr::Is(Box::new(condition))
}

pub fn if_then(condition: WhereExpr, then: Expr, otherwise: Expr) -> Expr {
    Expr::If {
        cond: Box::new(condition),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    }
}

pub fn switch(cases: Vec<(WhereExpr, Expr)>, otherwise: Option<Expr>) -> SqlResult<Expr> {
    if cases.is_empty() {
        return Err(SqlError::invalid_tree("switch requires at least one case"));
    }
    Ok(Expr::Switch {
        cases,
        otherwise: otherwise.map(Box::new),
    })
}

pub fn concat(parts: Vec<Expr>) -> Expr {
    Expr::Str(StrFn::Concat(parts))
}

pub fn now() -> Expr {
    Expr::Date(DateFn::Now)
}

pub fn count_all() -> Expr {
    Expr::Aggregate {
        func: AggregateFn::Count,
        arg: None,
        distinct: false,
    }
}

pub fn row_number() -> Expr {
    window(WindowFn::RowNumber)
}

pub fn rank() -> Expr {
    window(WindowFn::Rank)
}

pub fn dense_rank() -> Expr {
    window(WindowFn::DenseRank)
}

fn window(func: WindowFn) -> Expr {
    Expr::Window {
        func,
        partition_by: Vec::new(),
        order_by: Vec::new(),
    }
}

pub fn subquery(select: SelectDef) -> Expr {
    Expr::Subquery(Box::new(select))
}

impl Expr {
    pub fn eq(self, other: impl Into<Expr>) -> WhereExpr {
        WhereExpr::Eq(self, other.into())
    }

    pub fn not_eq(self, other: impl Into<Expr>) -> WhereExpr {
        WhereExpr::NotEq(self, other.into())
    }

    pub fn gt(self, other: impl Into<Expr>) -> WhereExpr {
        self.compare(CompareOp::Gt, other.into())
    }

    pub fn lt(self, other: impl Into<Expr>) -> WhereExpr {
        self.compare(CompareOp::Lt, other.into())
    }

    pub fn gte(self, other: impl Into<Expr>) -> WhereExpr {
        self.compare(CompareOp::Gte, other.into())
    }

    pub fn lte(self, other: impl Into<Expr>) -> WhereExpr {
        self.compare(CompareOp::Lte, other.into())
    }

    fn compare(self, op: CompareOp, right: Expr) -> WhereExpr {
        WhereExpr::Compare { op, left: self, right }
    }

    pub fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> WhereExpr {
        WhereExpr::Between {
            value: self,
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn is_null(self) -> WhereExpr {
        WhereExpr::IsNull(self)
    }

    pub fn is_not_null(self) -> WhereExpr {
        not(WhereExpr::IsNull(self))
    }

    pub fn like(self, pattern: impl Into<Expr>) -> WhereExpr {
        WhereExpr::Like {
            value: self,
            pattern: pattern.into(),
            case_insensitive: false,
        }
    }

    pub fn ilike(self, pattern: impl Into<Expr>) -> WhereExpr {
        WhereExpr::Like {
            value: self,
            pattern: pattern.into(),
            case_insensitive: true,
        }
    }

    pub fn regexp(self, pattern: impl Into<Expr>) -> WhereExpr {
        WhereExpr::Regexp {
            value: self,
            pattern: pattern.into(),
        }
    }

    pub fn in_list(self, list: Vec<Expr>) -> WhereExpr {
        WhereExpr::In { value: self, list }
    }

    pub fn in_query(self, query: SelectDef) -> WhereExpr {
        WhereExpr::InQuery {
            value: self,
            query: Box::new(query),
        }
    }

    pub fn lower(self) -> Expr {
        Expr::Str(StrFn::Lower(Box::new(self)))
    }

    pub fn upper(self) -> Expr {
        Expr::Str(StrFn::Upper(Box::new(self)))
    }

    pub fn trim(self) -> Expr {
        Expr::Str(StrFn::Trim(Box::new(self)))
    }

    pub fn length(self) -> Expr {
        Expr::Str(StrFn::Length(Box::new(self)))
    }

    pub fn substring(self, start: impl Into<Expr>, length: Option<Expr>) -> Expr {
        Expr::Str(StrFn::Substring {
            value: Box::new(self),
            start: Box::new(start.into()),
            length: length.map(Box::new),
        })
    }

    pub fn replace(self, from: impl Into<Expr>, to: impl Into<Expr>) -> Expr {
        Expr::Str(StrFn::Replace {
            value: Box::new(self),
            from: Box::new(from.into()),
            to: Box::new(to.into()),
        })
    }

    pub fn index_of(self, search: impl Into<Expr>) -> Expr {
        Expr::Str(StrFn::IndexOf {
            value: Box::new(self),
            search: Box::new(search.into()),
        })
    }

    pub fn to_text(self) -> Expr {
        Expr::Str(StrFn::ToText(Box::new(self)))
    }

    fn arith(self, op: ArithOp, right: Expr) -> Expr {
        Expr::Num(NumFn::Arith {
            op,
            left: Box::new(self),
            right: Box::new(right),
        })
    }

    pub fn add(self, other: impl Into<Expr>) -> Expr {
        self.arith(ArithOp::Add, other.into())
    }

    pub fn sub(self, other: impl Into<Expr>) -> Expr {
        self.arith(ArithOp::Sub, other.into())
    }

    pub fn mul(self, other: impl Into<Expr>) -> Expr {
        self.arith(ArithOp::Mul, other.into())
    }

    pub fn div(self, other: impl Into<Expr>) -> Expr {
        self.arith(ArithOp::Div, other.into())
    }

    pub fn modulo(self, other: impl Into<Expr>) -> Expr {
        self.arith(ArithOp::Mod, other.into())
    }

    pub fn abs(self) -> Expr {
        Expr::Num(NumFn::Abs(Box::new(self)))
    }

    pub fn round(self, digits: u32) -> Expr {
        Expr::Num(NumFn::Round {
            value: Box::new(self),
            digits,
        })
    }

    pub fn floor(self) -> Expr {
        Expr::Num(NumFn::Floor(Box::new(self)))
    }

    pub fn ceil(self) -> Expr {
        Expr::Num(NumFn::Ceil(Box::new(self)))
    }

    pub fn extract(self, part: DatePart) -> Expr {
        Expr::Date(DateFn::Extract {
            part,
            value: Box::new(self),
        })
    }

    pub fn add_days(self, days: impl Into<Expr>) -> Expr {
        Expr::Date(DateFn::AddDays {
            value: Box::new(self),
            days: Box::new(days.into()),
        })
    }

    pub fn diff_days(self, start: impl Into<Expr>) -> Expr {
        Expr::Date(DateFn::DiffDays {
            end: Box::new(self),
            start: Box::new(start.into()),
        })
    }

    pub fn to_date(self) -> Expr {
        Expr::Date(DateFn::ToDate(Box::new(self)))
    }

    pub fn if_null(self, fallback: impl Into<Expr>) -> Expr {
        Expr::IfNull {
            value: Box::new(self),
            fallback: Box::new(fallback.into()),
        }
    }

    pub fn null_if(self, other: impl Into<Expr>) -> Expr {
        Expr::NullIf {
            value: Box::new(self),
            other: Box::new(other.into()),
        }
    }

    fn aggregate(self, func: AggregateFn, distinct: bool) -> Expr {
        Expr::Aggregate {
            func,
            arg: Some(Box::new(self)),
            distinct,
        }
    }

    pub fn count(self) -> Expr {
        self.aggregate(AggregateFn::Count, false)
    }

    pub fn count_distinct(self) -> Expr {
        self.aggregate(AggregateFn::Count, true)
    }

    pub fn sum(self) -> Expr {
        self.aggregate(AggregateFn::Sum, false)
    }

    pub fn avg(self) -> Expr {
        self.aggregate(AggregateFn::Avg, false)
    }

    pub fn max(self) -> Expr {
        self.aggregate(AggregateFn::Max, false)
    }

    pub fn min(self) -> Expr {
        self.aggregate(AggregateFn::Min, false)
    }

    pub fn lag(self, offset: u32) -> Expr {
        window(WindowFn::Lag {
            value: Box::new(self),
            offset,
        })
    }

    pub fn lead(self, offset: u32) -> Expr {
        window(WindowFn::Lead {
            value: Box::new(self),
            offset,
        })
    }

    /// Turn a window function or plain aggregate into a windowed expression.
    pub fn over(self, partition_by: Vec<Expr>, order_by: Vec<OrderBy>) -> SqlResult<Expr> {
        let func = match self {
            Expr::Window { func, .. } => func,
            Expr::Aggregate { func, arg, distinct: false } => WindowFn::Aggregate { func, arg },
            other => {
                return Err(SqlError::invalid_tree(format!(
                    "over() requires a window function or aggregate, got {:?}",
                    other
                )))
            }
        };
        Ok(Expr::Window {
            func,
            partition_by,
            order_by,
        })
    }

    /// The primitive tag this expression produces.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Expr::Value(v) => v.column_type(),
            Expr::Column { ty, .. } | Expr::Raw { ty, .. } => *ty,
            Expr::Str(f) => match f {
                StrFn::Length(_) | StrFn::IndexOf { .. } => ColumnType::BigInt,
                _ => ColumnType::text(),
            },
            Expr::Num(f) => match f {
                NumFn::Arith { op, left, right } => {
                    numeric_result(*op, left.column_type(), right.column_type())
                }
                NumFn::Abs(v) | NumFn::Floor(v) | NumFn::Ceil(v) => v.column_type(),
                NumFn::Round { value, .. } => value.column_type(),
            },
            Expr::Date(f) => match f {
                DateFn::Now => ColumnType::DateTime,
                DateFn::Extract { .. } => ColumnType::Int,
                DateFn::AddDays { value, .. } => value.column_type(),
                DateFn::DiffDays { .. } => ColumnType::Int,
                DateFn::ToDate(_) => ColumnType::Date,
            },
            Expr::IfNull { value, .. } | Expr::NullIf { value, .. } => value.column_type(),
            Expr::Is(_) => ColumnType::Boolean,
            Expr::Switch { cases, otherwise } => cases
                .first()
                .map(|(_, e)| e.column_type())
                .or_else(|| otherwise.as_ref().map(|e| e.column_type()))
                .unwrap_or_else(ColumnType::text),
            Expr::If { then, .. } => then.column_type(),
            Expr::Aggregate { func, arg, .. } => aggregate_type(*func, arg.as_deref()),
            Expr::Window { func, .. } => match func {
                WindowFn::RowNumber | WindowFn::Rank | WindowFn::DenseRank => ColumnType::BigInt,
                WindowFn::Lag { value, .. } | WindowFn::Lead { value, .. } => value.column_type(),
                WindowFn::Aggregate { func, arg } => aggregate_type(*func, arg.as_deref()),
            },
            Expr::Subquery(select) => select
                .projection
                .values()
                .next()
                .map(Expr::column_type)
                .unwrap_or_else(ColumnType::text),
        }
    }
}

fn numeric_result(op: ArithOp, left: ColumnType, right: ColumnType) -> ColumnType {
    match (left, right) {
        (d @ ColumnType::Decimal { .. }, _) | (_, d @ ColumnType::Decimal { .. }) => d,
        (ColumnType::Float | ColumnType::Double, _) | (_, ColumnType::Float | ColumnType::Double) => {
            ColumnType::Double
        }
        _ if op == ArithOp::Div => ColumnType::Double,
        // date arithmetic keeps the temporal tag
        (t @ (ColumnType::Date | ColumnType::DateTime), _) => t,
        _ => ColumnType::BigInt,
    }
}

fn aggregate_type(func: AggregateFn, arg: Option<&Expr>) -> ColumnType {
    match func {
        AggregateFn::Count => ColumnType::BigInt,
        AggregateFn::Avg => match arg.map(Expr::column_type) {
            Some(d @ ColumnType::Decimal { .. }) => d,
            _ => ColumnType::Double,
        },
        AggregateFn::Sum => match arg.map(Expr::column_type) {
            Some(ColumnType::Int) | Some(ColumnType::BigInt) | None => ColumnType::BigInt,
            Some(other) => other,
        },
        AggregateFn::Max | AggregateFn::Min => arg
            .map(Expr::column_type)
            .unwrap_or(ColumnType::BigInt),
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Value(v)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Value(Value::Integer(v))
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Value(Value::from(v))
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::Value(Value::Real(v))
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Expr::Value(Value::Boolean(v))
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Expr::Value(Value::from(v))
    }
}

impl From<String> for Expr {
    fn from(v: String) -> Self {
        Expr::Value(Value::Text(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_logical_lists_fail() {
        assert_eq!(and(vec![]).unwrap_err(), SqlError::EmptyLogicalList { operator: "AND" });
        assert_eq!(or(vec![]).unwrap_err(), SqlError::EmptyLogicalList { operator: "OR" });
    }

    #[test]
    fn test_chained_and_flattens() {
        let id = col("t0", "id", ColumnType::Int);
        let cond = id.clone().gt(1).and(id.clone().lt(10)).and(id.is_not_null());
        match cond {
            WhereExpr::And(items) => assert_eq!(items.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_raw_template_arity() {
        let ok = raw("COALESCE(?, ?)", vec![val(1), val(2)], ColumnType::Int).unwrap();
        match ok {
            Expr::Raw { parts, .. } => assert_eq!(parts, vec!["COALESCE(", ", ", ")"]),
            other => panic!("expected raw, got {other:?}"),
        }
        assert!(raw("COALESCE(?, ?)", vec![val(1)], ColumnType::Int).is_err());
    }

    #[test]
    fn test_column_types_are_derived() {
        let price = col("t0", "price", ColumnType::Decimal { precision: 10, scale: 2 });
        let qty = col("t0", "qty", ColumnType::Int);
        assert_eq!(qty.clone().count().column_type(), ColumnType::BigInt);
        assert_eq!(qty.clone().avg().column_type(), ColumnType::Double);
        assert_eq!(
            price.clone().mul(qty.clone()).column_type(),
            ColumnType::Decimal { precision: 10, scale: 2 }
        );
        assert_eq!(qty.clone().sum().column_type(), ColumnType::BigInt);
        assert_eq!(is(qty.clone().gt(3)).column_type(), ColumnType::Boolean);
        assert_eq!(
            col("t0", "name", ColumnType::Char(8)).length().column_type(),
            ColumnType::BigInt
        );
        assert_eq!(row_number().column_type(), ColumnType::BigInt);
    }

    #[test]
    fn test_over_rejects_scalars() {
        let id = col("t0", "id", ColumnType::Int);
        assert!(id.clone().over(vec![], vec![]).is_err());
        let windowed = id
            .clone()
            .sum()
            .over(vec![col("t0", "group_id", ColumnType::Int)], vec![OrderBy::asc(id)])
            .unwrap();
        assert!(matches!(
            windowed,
            Expr::Window { func: WindowFn::Aggregate { func: AggregateFn::Sum, .. }, .. }
        ));
    }
}

//! SQL Server dialect
//!
//! T-SQL lacks LIMIT, LATERAL, boolean values in projections and a
//! null-safe equality operator; each is emulated here.

use indexmap::IndexMap;

use super::{DatabaseVersion, DdlDialect, Dialect, DialectKind, Feature, Rendered};
use crate::driver::TransactionCode;
use crate::error::{SqlError, SqlResult};
use crate::expr::{DatePart, Expr, WhereExpr};
use crate::query::{DeleteDef, InsertDef, JoinKind, LockMode, ProcedureDef, SelectDef, UpdateDef, UpsertDef};
use crate::schema::{Column, ForeignKeyAction};
use crate::types::{ColumnType, Value};

/// SQL Server dialect
pub struct SqlServerDialect {
    version: DatabaseVersion,
}

impl SqlServerDialect {
    pub fn new() -> Self {
        Self {
            version: DatabaseVersion::new(16, 0, 0), // SQL Server 2022
        }
    }

    pub fn with_version(version: DatabaseVersion) -> Self {
        Self { version }
    }

    fn output(&self, pseudo_table: &str, output: &IndexMap<String, ColumnType>) -> Option<String> {
        if output.is_empty() {
            return None;
        }
        let columns = output
            .keys()
            .map(|c| format!("{}.{} AS {}", pseudo_table, self.quote_identifier(c), self.quote_identifier(c)))
            .collect::<Vec<_>>();
        Some(format!("OUTPUT {}", columns.join(", ")))
    }

    fn filters(&self, filters: &[WhereExpr]) -> SqlResult<String> {
        if filters.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" WHERE {}", self.render_where(filters)?))
        }
    }
}

impl Default for SqlServerDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for SqlServerDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::SqlServer
    }

    fn version(&self) -> &DatabaseVersion {
        &self.version
    }

    fn feature_since(&self, feature: Feature) -> Option<DatabaseVersion> {
        match feature {
            Feature::WindowFunctions => Some(DatabaseVersion::new(11, 0, 0)),
            Feature::Merge => Some(DatabaseVersion::new(10, 0, 0)),
            Feature::Trim => Some(DatabaseVersion::new(14, 0, 0)),
            Feature::LateralJoin | Feature::RecursiveCte => None,
        }
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn quote_string(&self, s: &str) -> String {
        format!("N'{}'", s.replace('\'', "''"))
    }

    fn render_bool(&self, b: bool) -> String {
        if b { "1" } else { "0" }.to_string()
    }

    fn render_blob(&self, bytes: &[u8]) -> String {
        format!("0x{}", hex::encode_upper(bytes))
    }

    fn float_cast_type(&self) -> &'static str {
        "FLOAT"
    }

    fn render_length(&self, value: &str) -> String {
        format!("LEN({})", value)
    }

    fn render_trim(&self, value: &str) -> String {
        if self.supports(Feature::Trim) {
            format!("TRIM({})", value)
        } else {
            format!("LTRIM(RTRIM({}))", value)
        }
    }

    fn render_substring(&self, value: &str, start: &str, length: Option<&str>) -> String {
        match length {
            Some(len) => format!("SUBSTRING({}, {}, {})", value, start, len),
            None => format!("SUBSTRING({}, {}, LEN({}))", value, start, value),
        }
    }

    fn render_index_of(&self, value: &str, search: &str) -> String {
        format!("CHARINDEX({}, {})", search, value)
    }

    fn render_to_text(&self, value: &str) -> String {
        format!("CAST({} AS NVARCHAR(MAX))", value)
    }

    fn render_ceil(&self, value: &str) -> String {
        format!("CEILING({})", value)
    }

    fn render_now(&self) -> String {
        "SYSDATETIME()".to_string()
    }

    fn render_extract(&self, part: DatePart, value: &str) -> String {
        format!("DATEPART({}, {})", part.keyword().to_ascii_lowercase(), value)
    }

    fn render_add_days(&self, value: &str, days: &str) -> String {
        format!("DATEADD(day, {}, {})", days, value)
    }

    fn render_diff_days(&self, end: &str, start: &str) -> String {
        format!("DATEDIFF(day, {}, {})", start, end)
    }

    fn render_if_null(&self, value: &str, fallback: &str) -> String {
        format!("ISNULL({}, {})", value, fallback)
    }

    fn render_if(&self, cond: &str, then: &str, otherwise: &str) -> String {
        format!("IIF({}, {}, {})", cond, then, otherwise)
    }

    fn render_bool_value(&self, cond: &str) -> String {
        format!("CASE WHEN {} THEN 1 ELSE 0 END", cond)
    }

    fn widens_integer_avg(&self) -> bool {
        true
    }

    fn render_null_safe_eq(&self, left: &Expr, right: &Expr) -> SqlResult<String> {
        let null = Expr::Value(Value::Null);
        match (left == &null, right == &null) {
            (true, true) => Ok("1 = 1".to_string()),
            (false, true) => Ok(format!("{} IS NULL", self.render_expr(left)?)),
            (true, false) => Ok(format!("{} IS NULL", self.render_expr(right)?)),
            (false, false) => {
                let l = self.render_expr(left)?;
                let r = self.render_expr(right)?;
                Ok(format!(
                    "(({l} IS NULL AND {r} IS NULL) OR ({l} IS NOT NULL AND {r} IS NOT NULL AND {l} = {r}))"
                ))
            }
        }
    }

    fn render_regexp(&self, _value: &str, _pattern: &str) -> SqlResult<String> {
        Err(SqlError::unsupported("regular expression matching", self.kind().name()))
    }

    fn render_top(&self, count: u64) -> Option<String> {
        Some(format!("TOP ({})", count))
    }

    fn render_row_limit(&self, select: &SelectDef, nested: bool) -> Option<String> {
        match (select.limit, select.top) {
            (Some(limit), _) => Some(format!(
                "OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                limit.offset, limit.count
            )),
            (None, Some(_)) => None,
            // ORDER BY is only legal in a subquery alongside TOP or OFFSET.
            (None, None) if nested && !select.order_by.is_empty() => Some("OFFSET 0 ROWS".to_string()),
            (None, None) => None,
        }
    }

    fn render_lock_hint(&self, lock: LockMode) -> Option<String> {
        Some(
            match lock {
                LockMode::Update => "WITH (UPDLOCK, ROWLOCK)",
                LockMode::Share => "WITH (HOLDLOCK, ROWLOCK)",
            }
            .to_string(),
        )
    }

    fn render_lock_clause(&self, _lock: LockMode) -> Option<String> {
        None
    }

    fn recursive_keyword(&self) -> &'static str {
        "WITH"
    }

    fn supports_nested_cte(&self) -> bool {
        false
    }

    fn render_lateral_join(&self, kind: JoinKind, subquery: &str, alias: &str) -> SqlResult<String> {
        let keyword = match kind {
            JoinKind::Left => "OUTER APPLY",
            JoinKind::Inner => "CROSS APPLY",
        };
        Ok(format!("{} ({}) AS {}", keyword, subquery, self.quote_identifier(alias)))
    }

    fn render_union_member(&self, select: &SelectDef, index: usize) -> SqlResult<String> {
        let inner = self.render_select(select, true)?;
        if select.order_by.is_empty() && select.limit.is_none() && select.top.is_none() {
            Ok(format!("({})", inner))
        } else {
            Ok(format!(
                "(SELECT * FROM ({}) AS {})",
                inner,
                self.quote_identifier(&format!("_u{}", index))
            ))
        }
    }

    fn build_insert(&self, def: &InsertDef) -> SqlResult<Rendered> {
        let output = self.output("INSERTED", &def.output);
        let insert = self.render_insert_statement(&def.table, &def.rows, output.as_deref())?;
        if !def.supplies_auto_increment() {
            return Ok(Rendered::single(insert));
        }
        let table = self.quote_identifier(&def.table);
        Ok(Rendered::script(vec![
            format!("SET IDENTITY_INSERT {} ON", table),
            insert,
            format!("SET IDENTITY_INSERT {} OFF", table),
        ])
        .with_result(1))
    }

    fn build_update(&self, def: &UpdateDef) -> SqlResult<Rendered> {
        let alias = self.quote_identifier(&def.alias);
        let mut sql = format!("UPDATE {} SET {}", alias, self.render_set_clause(&def.set)?);
        if let Some(output) = self.output("INSERTED", &def.output) {
            sql.push(' ');
            sql.push_str(&output);
        }
        sql.push_str(&format!(
            " FROM {} AS {}{}",
            self.quote_identifier(&def.table),
            alias,
            self.filters(&def.filters)?
        ));
        Ok(Rendered::single(sql))
    }

    fn build_delete(&self, def: &DeleteDef) -> SqlResult<Rendered> {
        let alias = self.quote_identifier(&def.alias);
        let mut sql = format!("DELETE {}", alias);
        if let Some(output) = self.output("DELETED", &def.output) {
            sql.push(' ');
            sql.push_str(&output);
        }
        sql.push_str(&format!(
            " FROM {} AS {}{}",
            self.quote_identifier(&def.table),
            alias,
            self.filters(&def.filters)?
        ));
        Ok(Rendered::single(sql))
    }

    fn build_upsert(&self, def: &UpsertDef) -> SqlResult<Rendered> {
        self.require(Feature::Merge)?;
        let mut sql = self.render_merge(def, " WITH (HOLDLOCK)")?;
        // MERGE must be terminated.
        sql.push(';');
        Ok(Rendered::single(sql))
    }

    fn transaction_code_for(&self, code: &str) -> Option<TransactionCode> {
        match code {
            "3903" => Some(TransactionCode::NoActiveTransaction),
            "1205" => Some(TransactionCode::Deadlock),
            "1222" => Some(TransactionCode::LockTimeout),
            _ => None,
        }
    }

    fn missing_table_codes(&self) -> &'static [&'static str] {
        &["208"]
    }

    fn is_missing_table_message(&self, message: &str) -> bool {
        message.starts_with("Invalid object name '")
    }
}

impl DdlDialect for SqlServerDialect {
    fn native_type(&self, ty: &ColumnType) -> String {
        match ty {
            ColumnType::Int => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Float => "REAL".to_string(),
            ColumnType::Double => "FLOAT".to_string(),
            ColumnType::Decimal { precision, scale } => format!("DECIMAL({}, {})", precision, scale),
            ColumnType::Char(n) => format!("NCHAR({})", n),
            ColumnType::Text(Some(n)) => format!("NVARCHAR({})", n),
            ColumnType::Text(None) => "NVARCHAR(MAX)".to_string(),
            ColumnType::Boolean => "BIT".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME(3)".to_string(),
            ColumnType::DateTime => "DATETIME2(3)".to_string(),
            ColumnType::Uuid => "UNIQUEIDENTIFIER".to_string(),
            ColumnType::Binary => "VARBINARY(MAX)".to_string(),
        }
    }

    fn auto_increment_clause(&self) -> &'static str {
        "IDENTITY(1,1)"
    }

    fn fk_action(&self, action: ForeignKeyAction) -> &'static str {
        match action {
            ForeignKeyAction::Restrict => "NO ACTION",
            other => other.as_sql(),
        }
    }

    fn build_rename_table(&self, from: &str, to: &str) -> Rendered {
        Rendered::single(format!(
            "EXEC sp_rename {}, {}",
            self.quote_string(from),
            self.quote_string(to)
        ))
    }

    fn build_add_column(&self, table: &str, column: &Column) -> SqlResult<Rendered> {
        Ok(Rendered::single(format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(table),
            self.render_column(column)?
        )))
    }

    fn build_modify_column(&self, table: &str, column: &Column) -> SqlResult<Rendered> {
        Ok(Rendered::single(format!(
            "ALTER TABLE {} ALTER COLUMN {} {} {}",
            self.quote_identifier(table),
            self.quote_identifier(&column.name),
            self.native_type(&column.column_type),
            if column.nullable { "NULL" } else { "NOT NULL" }
        )))
    }

    fn build_rename_column(&self, table: &str, from: &str, to: &str) -> Rendered {
        Rendered::single(format!(
            "EXEC sp_rename {}, {}, N'COLUMN'",
            self.quote_string(&format!("{}.{}", table, from)),
            self.quote_string(to)
        ))
    }

    fn build_create_procedure(&self, def: &ProcedureDef) -> SqlResult<Rendered> {
        let params = def
            .params
            .iter()
            .map(|p| format!("@{} {}", p.name, self.native_type(&p.column_type)))
            .collect::<Vec<_>>();
        let signature = if params.is_empty() {
            String::new()
        } else {
            format!(" {}", params.join(", "))
        };
        Ok(Rendered::single(format!(
            "CREATE PROCEDURE {}{}\nAS\nBEGIN\n{}\nEND",
            self.quote_identifier(&def.name),
            signature,
            def.body.trim()
        )))
    }

    fn build_exec_proc(
        &self,
        name: &str,
        args: &IndexMap<String, Expr>,
        _returns: &IndexMap<String, ColumnType>,
    ) -> SqlResult<Rendered> {
        let args = args
            .iter()
            .map(|(param, value)| Ok(format!("@{} = {}", param, self.render_expr(value)?)))
            .collect::<SqlResult<Vec<_>>>()?;
        let mut sql = format!("EXEC {}", self.quote_identifier(name));
        if !args.is_empty() {
            sql.push(' ');
            sql.push_str(&args.join(", "));
        }
        Ok(Rendered::single(sql))
    }

    fn build_clear_schema(&self, schema: &str) -> Rendered {
        let schema = self.quote_string(schema);
        let drop = |statement: &str, catalog: &str, alias: &str| {
            format!(
                "SELECT @sql += N'{} ' + QUOTENAME(s.name) + N'.' + QUOTENAME({}.name) + N';' \
                 FROM {} {} JOIN sys.schemas s ON {}.schema_id = s.schema_id WHERE s.name = {};",
                statement, alias, catalog, alias, alias, schema
            )
        };
        let constraints = format!(
            "SELECT @sql += N'ALTER TABLE ' + QUOTENAME(s.name) + N'.' + QUOTENAME(t.name) \
             + N' DROP CONSTRAINT ' + QUOTENAME(f.name) + N';' \
             FROM sys.foreign_keys f JOIN sys.tables t ON f.parent_object_id = t.object_id \
             JOIN sys.schemas s ON t.schema_id = s.schema_id WHERE s.name = {};",
            schema
        );
        Rendered::single(format!(
            "DECLARE @sql NVARCHAR(MAX) = N''; {} {} {} {} EXEC sp_executesql @sql",
            constraints,
            drop("DROP VIEW", "sys.views", "v"),
            drop("DROP TABLE", "sys.tables", "t"),
            drop("DROP PROCEDURE", "sys.procedures", "p"),
        ))
    }

    fn build_schema_exists(&self, schema: &str) -> Rendered {
        Rendered::single(format!(
            "SELECT CASE WHEN EXISTS (SELECT 1 FROM sys.schemas WHERE name = {}) THEN 1 ELSE 0 END AS {}",
            self.quote_string(schema),
            self.quote_identifier("exists")
        ))
    }

    fn build_switch_fk(&self, enabled: bool) -> Rendered {
        let command = if enabled {
            "ALTER TABLE ? WITH CHECK CHECK CONSTRAINT ALL"
        } else {
            "ALTER TABLE ? NOCHECK CONSTRAINT ALL"
        };
        Rendered::single(format!("EXEC sp_MSforeachtable {}", self.quote_string(command)))
    }
}

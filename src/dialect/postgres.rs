//! PostgreSQL dialect

use indexmap::IndexMap;

use super::{DatabaseVersion, DdlDialect, Dialect, DialectKind, Feature, Rendered};
use crate::driver::TransactionCode;
use crate::error::SqlResult;
use crate::expr::{Expr, WhereExpr};
use crate::query::{DeleteDef, InsertDef, JoinKind, ProcedureDef, UpdateDef, UpsertDef};
use crate::schema::Column;
use crate::types::ColumnType;

/// PostgreSQL dialect
pub struct PostgresDialect {
    version: DatabaseVersion,
}

impl PostgresDialect {
    pub fn new() -> Self {
        Self {
            version: DatabaseVersion::new(16, 0, 0),
        }
    }

    pub fn with_version(version: DatabaseVersion) -> Self {
        Self { version }
    }

    fn returning(&self, alias: Option<&str>, output: &IndexMap<String, ColumnType>) -> String {
        if output.is_empty() {
            return String::new();
        }
        let columns = output
            .keys()
            .map(|c| match alias {
                Some(alias) => format!(
                    "{}.{} AS {}",
                    self.quote_identifier(alias),
                    self.quote_identifier(c),
                    self.quote_identifier(c)
                ),
                None => self.quote_identifier(c),
            })
            .collect::<Vec<_>>();
        format!(" RETURNING {}", columns.join(", "))
    }

    fn filters(&self, filters: &[WhereExpr]) -> SqlResult<String> {
        if filters.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" WHERE {}", self.render_where(filters)?))
        }
    }

    /// Pre-15 servers: `INSERT ... ON CONFLICT`, which needs a unique
    /// constraint over the key columns.
    fn render_on_conflict(&self, def: &UpsertDef) -> SqlResult<String> {
        let insert = self.render_insert_statement(&def.table, std::slice::from_ref(&def.values), None)?;
        let action = if def.update.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", self.render_set_clause(&def.update)?)
        };
        Ok(format!(
            "{} ON CONFLICT ({}) {}",
            insert,
            self.render_column_list(&def.keys),
            action
        ))
    }
}

impl Default for PostgresDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn version(&self) -> &DatabaseVersion {
        &self.version
    }

    fn feature_since(&self, feature: Feature) -> Option<DatabaseVersion> {
        match feature {
            Feature::LateralJoin => Some(DatabaseVersion::new(9, 3, 0)),
            Feature::Merge => Some(DatabaseVersion::new(15, 0, 0)),
            Feature::WindowFunctions | Feature::RecursiveCte | Feature::Trim => None,
        }
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn render_blob(&self, bytes: &[u8]) -> String {
        format!("decode('{}', 'hex')", hex::encode(bytes))
    }

    fn render_typed_literal(&self, ty: ColumnType, text: &str) -> String {
        let quoted = self.quote_string(text);
        match ty {
            ColumnType::Date => format!("DATE {}", quoted),
            ColumnType::Time => format!("TIME {}", quoted),
            ColumnType::DateTime => format!("TIMESTAMP {}", quoted),
            ColumnType::Uuid => format!("CAST({} AS UUID)", quoted),
            _ => quoted,
        }
    }

    fn float_cast_type(&self) -> &'static str {
        "DOUBLE PRECISION"
    }

    fn render_substring(&self, value: &str, start: &str, length: Option<&str>) -> String {
        match length {
            Some(len) => format!("SUBSTRING({} FROM {} FOR {})", value, start, len),
            None => format!("SUBSTRING({} FROM {})", value, start),
        }
    }

    fn render_index_of(&self, value: &str, search: &str) -> String {
        format!("POSITION({} IN {})", search, value)
    }

    fn render_to_text(&self, value: &str) -> String {
        format!("CAST({} AS TEXT)", value)
    }

    fn render_now(&self) -> String {
        "LOCALTIMESTAMP(3)".to_string()
    }

    fn render_add_days(&self, value: &str, days: &str) -> String {
        format!("({} + ({}) * INTERVAL '1 day')", value, days)
    }

    fn render_diff_days(&self, end: &str, start: &str) -> String {
        format!("(CAST({} AS DATE) - CAST({} AS DATE))", end, start)
    }

    fn render_null_safe_eq(&self, left: &Expr, right: &Expr) -> SqlResult<String> {
        Ok(format!(
            "{} IS NOT DISTINCT FROM {}",
            self.render_expr(left)?,
            self.render_expr(right)?
        ))
    }

    // A bare literal in the source row is typed as text or integer, not as
    // the target column.
    fn render_merge_source(&self, value: &Expr, declared: Option<&ColumnType>) -> SqlResult<String> {
        let rendered = self.render_expr(value)?;
        let ty = match (declared, value) {
            (Some(ty), _) => *ty,
            (None, Expr::Value(v)) if v.is_null() => return Ok(rendered),
            (None, _) => value.column_type(),
        };
        Ok(format!("CAST({} AS {})", rendered, self.native_type(&ty)))
    }

    fn render_like(&self, value: &str, pattern: &str, case_insensitive: bool) -> String {
        let operator = if case_insensitive { "ILIKE" } else { "LIKE" };
        format!("{} {} {}", value, operator, pattern)
    }

    fn render_regexp(&self, value: &str, pattern: &str) -> SqlResult<String> {
        Ok(format!("{} ~ {}", value, pattern))
    }

    fn supports_nulls_ordering(&self) -> bool {
        true
    }

    fn render_lateral_join(&self, kind: JoinKind, subquery: &str, alias: &str) -> SqlResult<String> {
        self.require(Feature::LateralJoin)?;
        let keyword = match kind {
            JoinKind::Left => "LEFT JOIN LATERAL",
            JoinKind::Inner => "INNER JOIN LATERAL",
        };
        Ok(format!("{} ({}) AS {} ON TRUE", keyword, subquery, self.quote_identifier(alias)))
    }

    fn build_insert(&self, def: &InsertDef) -> SqlResult<Rendered> {
        let mut sql = self.render_insert_statement(&def.table, &def.rows, None)?;
        sql.push_str(&self.returning(None, &def.output));
        Ok(Rendered::single(sql))
    }

    fn build_update(&self, def: &UpdateDef) -> SqlResult<Rendered> {
        Ok(Rendered::single(format!(
            "UPDATE {} AS {} SET {}{}{}",
            self.quote_identifier(&def.table),
            self.quote_identifier(&def.alias),
            self.render_set_clause(&def.set)?,
            self.filters(&def.filters)?,
            self.returning(Some(&def.alias), &def.output)
        )))
    }

    fn build_delete(&self, def: &DeleteDef) -> SqlResult<Rendered> {
        Ok(Rendered::single(format!(
            "DELETE FROM {} AS {}{}{}",
            self.quote_identifier(&def.table),
            self.quote_identifier(&def.alias),
            self.filters(&def.filters)?,
            self.returning(Some(&def.alias), &def.output)
        )))
    }

    fn build_upsert(&self, def: &UpsertDef) -> SqlResult<Rendered> {
        if self.supports(Feature::Merge) {
            Ok(Rendered::single(self.render_merge(def, "")?))
        } else {
            Ok(Rendered::single(self.render_on_conflict(def)?))
        }
    }

    fn transaction_code_for(&self, code: &str) -> Option<TransactionCode> {
        match code {
            "25P01" => Some(TransactionCode::NoActiveTransaction),
            "25001" => Some(TransactionCode::AlreadyStarted),
            "40P01" => Some(TransactionCode::Deadlock),
            "55P03" => Some(TransactionCode::LockTimeout),
            _ => None,
        }
    }

    fn missing_table_codes(&self) -> &'static [&'static str] {
        &["42P01"]
    }

    fn is_missing_table_message(&self, message: &str) -> bool {
        message.starts_with("relation \"") && message.ends_with("\" does not exist")
    }
}

impl DdlDialect for PostgresDialect {
    fn native_type(&self, ty: &ColumnType) -> String {
        match ty {
            ColumnType::Int => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Float => "REAL".to_string(),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Decimal { precision, scale } => format!("NUMERIC({}, {})", precision, scale),
            ColumnType::Char(n) => format!("CHAR({})", n),
            ColumnType::Text(Some(n)) => format!("VARCHAR({})", n),
            ColumnType::Text(None) => "TEXT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME(3)".to_string(),
            ColumnType::DateTime => "TIMESTAMP(3)".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Binary => "BYTEA".to_string(),
        }
    }

    fn auto_increment_clause(&self) -> &'static str {
        "GENERATED BY DEFAULT AS IDENTITY"
    }

    fn build_modify_column(&self, table: &str, column: &Column) -> SqlResult<Rendered> {
        let name = self.quote_identifier(&column.name);
        let native = self.native_type(&column.column_type);
        let mut actions = vec![format!("ALTER COLUMN {} TYPE {} USING {}::{}", name, native, name, native)];
        actions.push(if column.nullable {
            format!("ALTER COLUMN {} DROP NOT NULL", name)
        } else {
            format!("ALTER COLUMN {} SET NOT NULL", name)
        });
        actions.push(match &column.default {
            Some(value) => format!("ALTER COLUMN {} SET DEFAULT {}", name, self.render_value(value)?),
            None => format!("ALTER COLUMN {} DROP DEFAULT", name),
        });
        Ok(Rendered::single(format!(
            "ALTER TABLE {} {}",
            self.quote_identifier(table),
            actions.join(", ")
        )))
    }

    fn build_drop_index(&self, _table: &str, name: &str) -> Rendered {
        Rendered::single(format!("DROP INDEX IF EXISTS {}", self.quote_identifier(name)))
    }

    fn build_create_procedure(&self, def: &ProcedureDef) -> SqlResult<Rendered> {
        let params = def
            .params
            .iter()
            .map(|p| format!("{} {}", self.quote_identifier(&p.name), self.native_type(&p.column_type)))
            .collect::<Vec<_>>();
        let returns = if def.returns.is_empty() {
            "void".to_string()
        } else {
            let columns = def
                .returns
                .iter()
                .map(|c| format!("{} {}", self.quote_identifier(&c.name), self.native_type(&c.column_type)))
                .collect::<Vec<_>>();
            format!("TABLE({})", columns.join(", "))
        };
        Ok(Rendered::single(format!(
            "CREATE OR REPLACE FUNCTION {}({}) RETURNS {} AS $$\n#variable_conflict use_column\nBEGIN\n{}\nEND;\n$$ LANGUAGE plpgsql",
            self.quote_identifier(&def.name),
            params.join(", "),
            returns,
            def.body.trim()
        )))
    }

    fn build_drop_procedure(&self, name: &str) -> Rendered {
        Rendered::single(format!("DROP FUNCTION IF EXISTS {}", self.quote_identifier(name)))
    }

    fn build_exec_proc(
        &self,
        name: &str,
        args: &IndexMap<String, Expr>,
        returns: &IndexMap<String, ColumnType>,
    ) -> SqlResult<Rendered> {
        let args = args
            .iter()
            .map(|(param, value)| Ok(format!("{} => {}", self.quote_identifier(param), self.render_expr(value)?)))
            .collect::<SqlResult<Vec<_>>>()?;
        let call = format!("{}({})", self.quote_identifier(name), args.join(", "));
        Ok(Rendered::single(if returns.is_empty() {
            format!("SELECT {}", call)
        } else {
            format!("SELECT * FROM {}", call)
        }))
    }

    fn build_clear_schema(&self, schema: &str) -> Rendered {
        let schema = self.quote_identifier(schema);
        Rendered::script(vec![
            format!("DROP SCHEMA IF EXISTS {} CASCADE", schema),
            format!("CREATE SCHEMA {}", schema),
        ])
    }

    fn build_schema_exists(&self, schema: &str) -> Rendered {
        Rendered::single(format!(
            "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = {}) AS {}",
            self.quote_string(schema),
            self.quote_identifier("exists")
        ))
    }

    fn build_switch_fk(&self, enabled: bool) -> Rendered {
        let role = if enabled { "origin" } else { "replica" };
        Rendered::single(format!("SET session_replication_role = '{}'", role))
    }
}

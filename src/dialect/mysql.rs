//! MySQL dialect
//!
//! MySQL has no RETURNING/OUTPUT, so mutations that hand rows back are
//! rendered as short scripts whose read-back SELECT is flagged in `Rendered`.

use indexmap::IndexMap;

use super::{DatabaseVersion, DdlDialect, Dialect, DialectKind, Feature, Rendered};
use crate::driver::TransactionCode;
use crate::error::{SqlError, SqlResult};
use crate::expr::Expr;
use crate::query::{
    DeleteDef, InsertDef, InsertIfNotExistsDef, JoinKind, ProcedureDef, SelectDef, UpdateDef, UpsertDef,
};
use crate::schema::Column;
use crate::types::ColumnType;

const AFFECTED_TABLE: &str = "_catena_affected";

/// MySQL 8 dialect
pub struct MySqlDialect {
    version: DatabaseVersion,
}

impl MySqlDialect {
    pub fn new() -> Self {
        Self {
            version: DatabaseVersion::new(8, 0, 36),
        }
    }

    pub fn with_version(version: DatabaseVersion) -> Self {
        Self { version }
    }

    fn output_columns(&self, alias: Option<&str>, output: &IndexMap<String, ColumnType>) -> String {
        output
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
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `(a, b) IN ((1, 2), (3, 4))`, collapsed for single-column keys.
    fn key_in_list(&self, key: &[String], rows: &[IndexMap<String, Expr>], table: &str) -> SqlResult<String> {
        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            let values = key
                .iter()
                .map(|k| {
                    row.get(k)
                        .ok_or_else(|| {
                            SqlError::invalid_tree(format!(
                                "insert into '{}' returning rows must supply key column '{}'",
                                table, k
                            ))
                        })
                        .and_then(|e| self.render_expr(e))
                })
                .collect::<SqlResult<Vec<_>>>()?;
            tuples.push(if values.len() == 1 {
                values[0].clone()
            } else {
                format!("({})", values.join(", "))
            });
        }
        let columns = self.render_column_list(key);
        Ok(if key.len() == 1 {
            format!("{} IN ({})", columns, tuples.join(", "))
        } else {
            format!("({}) IN ({})", columns, tuples.join(", "))
        })
    }
}

impl Default for MySqlDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for MySqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn version(&self) -> &DatabaseVersion {
        &self.version
    }

    fn feature_since(&self, feature: Feature) -> Option<DatabaseVersion> {
        match feature {
            Feature::WindowFunctions | Feature::RecursiveCte => Some(DatabaseVersion::new(8, 0, 0)),
            Feature::LateralJoin => Some(DatabaseVersion::new(8, 0, 14)),
            Feature::Merge | Feature::Trim => None,
        }
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn quote_string(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('\'');
        for ch in s.chars() {
            match ch {
                '\0' => out.push_str("\\0"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\x1a' => out.push_str("\\Z"),
                '\\' => out.push_str("\\\\"),
                '\'' => out.push_str("\\'"),
                other => out.push(other),
            }
        }
        out.push('\'');
        out
    }

    fn render_blob(&self, bytes: &[u8]) -> String {
        format!("X'{}'", hex::encode_upper(bytes))
    }

    fn float_cast_type(&self) -> &'static str {
        "DOUBLE"
    }

    fn render_index_of(&self, value: &str, search: &str) -> String {
        format!("LOCATE({}, {})", search, value)
    }

    fn render_to_text(&self, value: &str) -> String {
        format!("CAST({} AS CHAR)", value)
    }

    fn render_now(&self) -> String {
        "NOW(3)".to_string()
    }

    fn render_add_days(&self, value: &str, days: &str) -> String {
        format!("DATE_ADD({}, INTERVAL {} DAY)", value, days)
    }

    fn render_diff_days(&self, end: &str, start: &str) -> String {
        format!("DATEDIFF({}, {})", end, start)
    }

    fn render_if_null(&self, value: &str, fallback: &str) -> String {
        format!("IFNULL({}, {})", value, fallback)
    }

    fn render_if(&self, cond: &str, then: &str, otherwise: &str) -> String {
        format!("IF({}, {}, {})", cond, then, otherwise)
    }

    fn render_null_safe_eq(&self, left: &Expr, right: &Expr) -> SqlResult<String> {
        Ok(format!("{} <=> {}", self.render_expr(left)?, self.render_expr(right)?))
    }

    fn render_regexp(&self, value: &str, pattern: &str) -> SqlResult<String> {
        Ok(format!("{} REGEXP {}", value, pattern))
    }

    fn render_row_limit(&self, select: &SelectDef, _nested: bool) -> Option<String> {
        match (select.limit, select.top) {
            (Some(limit), _) => Some(format!("LIMIT {}, {}", limit.offset, limit.count)),
            (None, Some(top)) => Some(format!("LIMIT {}", top)),
            (None, None) => None,
        }
    }

    fn render_lateral_join(&self, kind: JoinKind, subquery: &str, alias: &str) -> SqlResult<String> {
        self.require(Feature::LateralJoin)?;
        let keyword = match kind {
            JoinKind::Left => "LEFT JOIN LATERAL",
            JoinKind::Inner => "INNER JOIN LATERAL",
        };
        Ok(format!("{} ({}) AS {} ON TRUE", keyword, subquery, self.quote_identifier(alias)))
    }

    fn default_values_clause(&self) -> &'static str {
        "() VALUES ()"
    }

    fn dual_table(&self) -> &'static str {
        " FROM DUAL"
    }

    fn build_insert(&self, def: &InsertDef) -> SqlResult<Rendered> {
        if def.output.is_empty() {
            return Ok(Rendered::single(self.render_insert_statement(&def.table, &def.rows, None)?));
        }
        let read_back = |condition: String| {
            format!(
                "SELECT {} FROM {} WHERE {}",
                self.output_columns(None, &def.output),
                self.quote_identifier(&def.table),
                condition
            )
        };
        match &def.auto_increment {
            Some(generated) if !def.supplies_auto_increment() => {
                let mut statements = Vec::with_capacity(def.rows.len() * 2);
                for row in &def.rows {
                    statements.push(self.render_insert_statement(&def.table, std::slice::from_ref(row), None)?);
                    statements.push(read_back(format!(
                        "{} = LAST_INSERT_ID()",
                        self.quote_identifier(generated)
                    )));
                }
                let stride = if def.rows.len() > 1 { Some(2) } else { None };
                Ok(Rendered::script(statements).with_result(1).with_stride(stride))
            }
            _ => {
                if def.primary_key.is_empty() {
                    return Err(SqlError::invalid_tree(format!(
                        "insert into '{}' cannot return rows without a primary key",
                        def.table
                    )));
                }
                let condition = self.key_in_list(&def.primary_key, &def.rows, &def.table)?;
                Ok(Rendered::script(vec![
                    self.render_insert_statement(&def.table, &def.rows, None)?,
                    read_back(condition),
                ])
                .with_result(1))
            }
        }
    }

    fn build_update(&self, def: &UpdateDef) -> SqlResult<Rendered> {
        let table = self.quote_identifier(&def.table);
        let alias = self.quote_identifier(&def.alias);
        let set = self.render_set_clause(&def.set)?;
        let filters = if def.filters.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.render_where(&def.filters)?)
        };
        if def.output.is_empty() {
            return Ok(Rendered::single(format!(
                "UPDATE {} AS {} SET {}{}",
                table, alias, set, filters
            )));
        }
        if def.primary_key.is_empty() {
            return Err(SqlError::invalid_tree(format!(
                "update of '{}' cannot return rows without a primary key",
                def.table
            )));
        }
        // Captured before the update so that keys changed by SET do not
        // hide rows from the read-back.
        let affected = self.quote_identifier(AFFECTED_TABLE);
        let key_columns = self.render_column_list(&def.primary_key);
        let qualified_key = def
            .primary_key
            .iter()
            .map(|k| format!("{}.{}", alias, self.quote_identifier(k)))
            .collect::<Vec<_>>()
            .join(", ");
        let membership = format!("({}) IN (SELECT {} FROM {})", qualified_key, key_columns, affected);
        Ok(Rendered::script(vec![
            format!("DROP TEMPORARY TABLE IF EXISTS {}", affected),
            format!(
                "CREATE TEMPORARY TABLE {} AS SELECT {} FROM {} AS {}{}",
                affected,
                def.primary_key
                    .iter()
                    .map(|k| format!("{}.{} AS {}", alias, self.quote_identifier(k), self.quote_identifier(k)))
                    .collect::<Vec<_>>()
                    .join(", "),
                table,
                alias,
                filters
            ),
            format!("UPDATE {} AS {} SET {} WHERE {}", table, alias, set, membership),
            format!(
                "SELECT {} FROM {} AS {} WHERE {}",
                self.output_columns(Some(&def.alias), &def.output),
                table,
                alias,
                membership
            ),
            format!("DROP TEMPORARY TABLE IF EXISTS {}", affected),
        ])
        .with_result(3))
    }

    fn build_delete(&self, def: &DeleteDef) -> SqlResult<Rendered> {
        let table = self.quote_identifier(&def.table);
        let alias = self.quote_identifier(&def.alias);
        let filters = if def.filters.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.render_where(&def.filters)?)
        };
        let delete = format!("DELETE {} FROM {} AS {}{}", alias, table, alias, filters);
        if def.output.is_empty() {
            return Ok(Rendered::single(delete));
        }
        Ok(Rendered::script(vec![
            format!(
                "SELECT {} FROM {} AS {}{} FOR UPDATE",
                self.output_columns(Some(&def.alias), &def.output),
                table,
                alias,
                filters
            ),
            delete,
        ])
        .with_result(0))
    }

    fn build_upsert(&self, def: &UpsertDef) -> SqlResult<Rendered> {
        let insert = self.build_insert_if_not_exists(&InsertIfNotExistsDef {
            table: def.table.clone(),
            values: def.values.clone(),
            keys: def.keys.clone(),
        })?;
        if def.update.is_empty() {
            return Ok(insert);
        }
        let mut statements = vec![format!(
            "UPDATE {} SET {} WHERE {}",
            self.quote_identifier(&def.table),
            self.render_set_clause(&def.update)?,
            self.render_key_match(&def.table, &def.keys, &def.values)?
        )];
        statements.extend(insert.statements);
        Ok(Rendered::script(statements))
    }

    fn transaction_code_for(&self, code: &str) -> Option<TransactionCode> {
        match code {
            "1213" => Some(TransactionCode::Deadlock),
            "1205" => Some(TransactionCode::LockTimeout),
            _ => None,
        }
    }

    fn missing_table_codes(&self) -> &'static [&'static str] {
        &["1146"]
    }

    fn is_missing_table_message(&self, message: &str) -> bool {
        message.starts_with("Table '") && message.ends_with("' doesn't exist")
    }
}

impl DdlDialect for MySqlDialect {
    fn native_type(&self, ty: &ColumnType) -> String {
        match ty {
            ColumnType::Int => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Decimal { precision, scale } => format!("DECIMAL({}, {})", precision, scale),
            ColumnType::Char(n) => format!("CHAR({})", n),
            ColumnType::Text(Some(n)) => format!("VARCHAR({})", n),
            ColumnType::Text(None) => "LONGTEXT".to_string(),
            ColumnType::Boolean => "TINYINT(1)".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME(3)".to_string(),
            ColumnType::DateTime => "DATETIME(3)".to_string(),
            ColumnType::Uuid => "CHAR(36)".to_string(),
            ColumnType::Binary => "LONGBLOB".to_string(),
        }
    }

    fn auto_increment_clause(&self) -> &'static str {
        "AUTO_INCREMENT"
    }

    fn table_options(&self) -> &'static str {
        " ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
    }

    fn fk_requires_index(&self) -> bool {
        false
    }

    fn build_rename_table(&self, from: &str, to: &str) -> Rendered {
        Rendered::single(format!(
            "RENAME TABLE {} TO {}",
            self.quote_identifier(from),
            self.quote_identifier(to)
        ))
    }

    fn build_modify_column(&self, table: &str, column: &Column) -> SqlResult<Rendered> {
        Ok(Rendered::single(format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.quote_identifier(table),
            self.render_column(column)?
        )))
    }

    fn build_drop_primary_key(&self, table: &str) -> Rendered {
        Rendered::single(format!("ALTER TABLE {} DROP PRIMARY KEY", self.quote_identifier(table)))
    }

    fn build_drop_foreign_key(&self, table: &str, name: &str) -> Rendered {
        Rendered::single(format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        ))
    }

    fn build_create_procedure(&self, def: &ProcedureDef) -> SqlResult<Rendered> {
        let params = def
            .params
            .iter()
            .map(|p| format!("IN {} {}", self.quote_identifier(&p.name), self.native_type(&p.column_type)))
            .collect::<Vec<_>>();
        Ok(Rendered::single(format!(
            "CREATE PROCEDURE {}({})\nBEGIN\n{}\nEND",
            self.quote_identifier(&def.name),
            params.join(", "),
            def.body.trim()
        )))
    }

    fn build_exec_proc(
        &self,
        name: &str,
        args: &IndexMap<String, Expr>,
        _returns: &IndexMap<String, ColumnType>,
    ) -> SqlResult<Rendered> {
        let values = args
            .values()
            .map(|v| self.render_expr(v))
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(Rendered::single(format!(
            "CALL {}({})",
            self.quote_identifier(name),
            values.join(", ")
        ))
        .with_result(0))
    }

    fn build_clear_schema(&self, schema: &str) -> Rendered {
        let schema = self.quote_identifier(schema);
        Rendered::script(vec![
            format!("DROP DATABASE IF EXISTS {}", schema),
            format!("CREATE DATABASE {}", schema),
            format!("USE {}", schema),
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
        Rendered::single(format!("SET FOREIGN_KEY_CHECKS = {}", if enabled { 1 } else { 0 }))
    }
}

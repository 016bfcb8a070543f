//! Schema statements
//!
//! Shared DDL assembly on top of `Dialect`. Engines override the handful of
//! statements whose syntax genuinely differs.

use indexmap::IndexMap;

use super::{Dialect, Rendered};
use crate::error::{SqlError, SqlResult};
use crate::expr::Expr;
use crate::query::{CreateTableDef, ProcedureDef, SelectDef};
use crate::schema::{Column, ForeignKeyAction, ForeignKeyDefinition, IndexDefinition};
use crate::types::ColumnType;

pub trait DdlDialect: Dialect {
    fn native_type(&self, ty: &ColumnType) -> String;

    fn auto_increment_clause(&self) -> &'static str;

    /// Suffix after the closing parenthesis of CREATE TABLE.
    fn table_options(&self) -> &'static str {
        ""
    }

    /// Whether the engine leaves FK columns unindexed unless asked.
    fn fk_requires_index(&self) -> bool {
        true
    }

    fn fk_action(&self, action: ForeignKeyAction) -> &'static str {
        action.as_sql()
    }

    fn render_column(&self, column: &Column) -> SqlResult<String> {
        let mut sql = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            self.native_type(&column.column_type)
        );
        sql.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
        if let Some(default) = &column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&self.render_value(default)?);
        }
        if column.auto_increment {
            sql.push(' ');
            sql.push_str(self.auto_increment_clause());
        }
        Ok(sql)
    }

    fn primary_key_name(&self, table: &str) -> String {
        format!("pk_{}", table)
    }

    fn build_create_table(&self, def: &CreateTableDef) -> SqlResult<Rendered> {
        if def.columns.is_empty() {
            return Err(SqlError::missing_columns(format!("create table '{}'", def.name)));
        }
        let mut items = def
            .columns
            .iter()
            .map(|c| self.render_column(c))
            .collect::<SqlResult<Vec<_>>>()?;
        if !def.primary_key.is_empty() {
            items.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                self.quote_identifier(&self.primary_key_name(&def.name)),
                self.render_column_list(&def.primary_key)
            ));
        }
        Ok(Rendered::single(format!(
            "CREATE TABLE {} ({}){}",
            self.quote_identifier(&def.name),
            items.join(", "),
            self.table_options()
        )))
    }

    fn build_drop_table(&self, name: &str, if_exists: bool) -> Rendered {
        let guard = if if_exists { "IF EXISTS " } else { "" };
        Rendered::single(format!("DROP TABLE {}{}", guard, self.quote_identifier(name)))
    }

    fn build_rename_table(&self, from: &str, to: &str) -> Rendered {
        Rendered::single(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(from),
            self.quote_identifier(to)
        ))
    }

    fn build_truncate(&self, table: &str) -> Rendered {
        Rendered::single(format!("TRUNCATE TABLE {}", self.quote_identifier(table)))
    }

    fn build_add_column(&self, table: &str, column: &Column) -> SqlResult<Rendered> {
        Ok(Rendered::single(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.render_column(column)?
        )))
    }

    fn build_drop_column(&self, table: &str, column: &str) -> Rendered {
        Rendered::single(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        ))
    }

    fn build_modify_column(&self, table: &str, column: &Column) -> SqlResult<Rendered>;

    fn build_rename_column(&self, table: &str, from: &str, to: &str) -> Rendered {
        Rendered::single(format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote_identifier(table),
            self.quote_identifier(from),
            self.quote_identifier(to)
        ))
    }

    fn build_add_primary_key(&self, table: &str, columns: &[String]) -> SqlResult<Rendered> {
        if columns.is_empty() {
            return Err(SqlError::missing_columns(format!("primary key of '{}'", table)));
        }
        Ok(Rendered::single(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
            self.quote_identifier(table),
            self.quote_identifier(&self.primary_key_name(table)),
            self.render_column_list(columns)
        )))
    }

    fn build_drop_primary_key(&self, table: &str) -> Rendered {
        Rendered::single(format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_identifier(table),
            self.quote_identifier(&self.primary_key_name(table))
        ))
    }

    fn fk_index_name(&self, fk_name: &str) -> String {
        format!("ix_{}", fk_name)
    }

    fn build_add_foreign_key(&self, fk: &ForeignKeyDefinition) -> SqlResult<Rendered> {
        if fk.from_columns.is_empty() || fk.from_columns.len() != fk.to_columns.len() {
            return Err(SqlError::invalid_tree(format!(
                "foreign key '{}' has mismatched column lists",
                fk.name
            )));
        }
        let mut statements = vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            self.quote_identifier(&fk.from_table),
            self.quote_identifier(&fk.name),
            self.render_column_list(&fk.from_columns),
            self.quote_identifier(&fk.to_table),
            self.render_column_list(&fk.to_columns),
            self.fk_action(fk.on_delete),
            self.fk_action(fk.on_update)
        )];
        if self.fk_requires_index() {
            statements.push(format!(
                "CREATE INDEX {} ON {} ({})",
                self.quote_identifier(&self.fk_index_name(&fk.name)),
                self.quote_identifier(&fk.from_table),
                self.render_column_list(&fk.from_columns)
            ));
        }
        Ok(Rendered::script(statements))
    }

    fn build_drop_foreign_key(&self, table: &str, name: &str) -> Rendered {
        let mut statements = vec![format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        )];
        if self.fk_requires_index() {
            statements.extend(self.build_drop_index(table, &self.fk_index_name(name)).statements);
        }
        Rendered::script(statements)
    }

    fn build_add_index(&self, index: &IndexDefinition) -> SqlResult<Rendered> {
        if index.columns.is_empty() {
            return Err(SqlError::missing_columns(format!("index '{}'", index.name)));
        }
        let unique = if index.unique { "UNIQUE " } else { "" };
        Ok(Rendered::single(format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            self.quote_identifier(&index.name),
            self.quote_identifier(&index.table),
            self.render_column_list(&index.columns)
        )))
    }

    fn build_drop_index(&self, table: &str, name: &str) -> Rendered {
        Rendered::single(format!(
            "DROP INDEX {} ON {}",
            self.quote_identifier(name),
            self.quote_identifier(table)
        ))
    }

    fn build_create_view(&self, name: &str, select: &SelectDef) -> SqlResult<Rendered> {
        Ok(Rendered::single(format!(
            "CREATE VIEW {} AS {}",
            self.quote_identifier(name),
            self.render_select(select, false)?
        )))
    }

    fn build_drop_view(&self, name: &str) -> Rendered {
        Rendered::single(format!("DROP VIEW IF EXISTS {}", self.quote_identifier(name)))
    }

    fn build_create_procedure(&self, def: &ProcedureDef) -> SqlResult<Rendered>;

    fn build_drop_procedure(&self, name: &str) -> Rendered {
        Rendered::single(format!("DROP PROCEDURE IF EXISTS {}", self.quote_identifier(name)))
    }

    fn build_exec_proc(
        &self,
        name: &str,
        args: &IndexMap<String, Expr>,
        returns: &IndexMap<String, ColumnType>,
    ) -> SqlResult<Rendered>;

    /// Drop every object in `schema` and leave it empty.
    fn build_clear_schema(&self, schema: &str) -> Rendered;

    /// One row with a single boolean column named `exists`.
    fn build_schema_exists(&self, schema: &str) -> Rendered;

    fn build_switch_fk(&self, enabled: bool) -> Rendered;
}

#[cfg(test)]
mod tests {
    use crate::dialect::{DialectKind, Renderer};
    use crate::query::{CreateTableDef, QueryDef};
    use crate::schema::{Column, ForeignKeyAction, ForeignKeyDefinition};
    use crate::types::{ColumnType, Value};

    fn accounts() -> CreateTableDef {
        CreateTableDef {
            name: "accounts".into(),
            columns: vec![
                Column::new("id", ColumnType::BigInt).auto_increment(),
                Column::new("email", ColumnType::Text(Some(255))).not_null(),
                Column::new("active", ColumnType::Boolean).default_value(Value::Boolean(true)),
            ],
            primary_key: vec!["id".into()],
        }
    }

    #[test]
    fn test_create_table_per_dialect() {
        let def = QueryDef::CreateTable(accounts());
        let mysql = DialectKind::MySql.renderer(None).build(&def).unwrap();
        assert_eq!(
            mysql.sql(),
            "CREATE TABLE `accounts` (`id` BIGINT NOT NULL AUTO_INCREMENT, `email` VARCHAR(255) NOT NULL, \
             `active` TINYINT(1) NULL DEFAULT TRUE, CONSTRAINT `pk_accounts` PRIMARY KEY (`id`)) \
             ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;"
        );
        let pg = DialectKind::Postgres.renderer(None).build(&def).unwrap();
        assert!(pg.statements[0].contains("\"id\" BIGINT NOT NULL GENERATED BY DEFAULT AS IDENTITY"));
        let mssql = DialectKind::SqlServer.renderer(None).build(&def).unwrap();
        assert!(mssql.statements[0].contains("[id] BIGINT NOT NULL IDENTITY(1,1)"));
        assert!(mssql.statements[0].contains("[active] BIT NULL DEFAULT 1"));
    }

    #[test]
    fn test_create_table_without_columns_fails() {
        let def = QueryDef::CreateTable(CreateTableDef {
            name: "empty".into(),
            columns: vec![],
            primary_key: vec![],
        });
        for kind in [DialectKind::MySql, DialectKind::Postgres, DialectKind::SqlServer] {
            assert!(kind.renderer(None).build(&def).is_err());
        }
    }

    #[test]
    fn test_foreign_key_companion_index() {
        let fk = QueryDef::AddForeignKey(ForeignKeyDefinition {
            name: "fk_books_author".into(),
            from_table: "books".into(),
            from_columns: vec!["author_id".into()],
            to_table: "authors".into(),
            to_columns: vec!["id".into()],
            on_delete: ForeignKeyAction::Restrict,
            on_update: ForeignKeyAction::NoAction,
        });
        let mysql = DialectKind::MySql.renderer(None).build(&fk).unwrap();
        assert_eq!(mysql.statements.len(), 1);
        let pg = DialectKind::Postgres.renderer(None).build(&fk).unwrap();
        assert_eq!(pg.statements.len(), 2);
        assert_eq!(
            pg.statements[1],
            "CREATE INDEX \"ix_fk_books_author\" ON \"books\" (\"author_id\")"
        );
        let mssql = DialectKind::SqlServer.renderer(None).build(&fk).unwrap();
        assert!(mssql.statements[0].contains("ON DELETE NO ACTION"));
    }

    #[test]
    fn test_drop_foreign_key_drops_companion_index() {
        let drop = QueryDef::DropForeignKey {
            table: "books".into(),
            name: "fk_books_author".into(),
        };
        let pg = DialectKind::Postgres.renderer(None).build(&drop).unwrap();
        assert_eq!(pg.statements[1], "DROP INDEX IF EXISTS \"ix_fk_books_author\"");
        let mysql = DialectKind::MySql.renderer(None).build(&drop).unwrap();
        assert_eq!(
            mysql.statements,
            vec!["ALTER TABLE `books` DROP FOREIGN KEY `fk_books_author`".to_string()]
        );
    }

    #[test]
    fn test_renames() {
        let rename = QueryDef::RenameColumn {
            table: "books".into(),
            from: "title".into(),
            to: "name".into(),
        };
        assert_eq!(
            DialectKind::SqlServer.renderer(None).build(&rename).unwrap().statements[0],
            "EXEC sp_rename N'books.title', N'name', N'COLUMN'"
        );
        assert_eq!(
            DialectKind::Postgres.renderer(None).build(&rename).unwrap().statements[0],
            "ALTER TABLE \"books\" RENAME COLUMN \"title\" TO \"name\""
        );
        let table = QueryDef::RenameTable {
            from: "a".into(),
            to: "b".into(),
        };
        assert_eq!(
            DialectKind::MySql.renderer(None).build(&table).unwrap().statements[0],
            "RENAME TABLE `a` TO `b`"
        );
    }
}

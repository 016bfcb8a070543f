//! Schema to DDL planning
//!
//! Everything is resolved up front; a bad relation, view or procedure fails
//! the whole plan before a single statement is produced.

use tracing::debug;

use crate::dialect::DialectKind;
use crate::error::{SqlError, SqlResult};
use crate::query::{CreateTableDef, ProcedureDef, QueryDef};
use crate::relations::foreign_key_definition;
use crate::schema::Schema;

/// Ordered statements creating every object in `schema`: tables, foreign
/// keys, indexes, views, then procedures.
pub fn create_all(schema: &Schema, dialect: DialectKind) -> SqlResult<Vec<QueryDef>> {
    let mut tables = Vec::new();
    let mut foreign_keys = Vec::new();
    for table in schema.tables() {
        tables.push(QueryDef::CreateTable(CreateTableDef {
            name: table.name.clone(),
            columns: table.columns.clone(),
            primary_key: table.primary_key.clone(),
        }));
        for relation in table.relations.keys() {
            if let Some(fk) = foreign_key_definition(schema, &table.name, relation)? {
                foreign_keys.push(QueryDef::AddForeignKey(fk));
            }
        }
    }

    let indexes = schema.indexes().cloned().map(QueryDef::AddIndex);

    let mut views = Vec::new();
    for view in schema.views() {
        let definition = view
            .definition
            .as_ref()
            .ok_or_else(|| SqlError::MissingViewDefinition { view: view.name.clone() })?;
        views.push(QueryDef::CreateView {
            name: view.name.clone(),
            select: Box::new(definition()?),
        });
    }

    let mut procedures = Vec::new();
    for procedure in schema.procedures() {
        let body = procedure
            .bodies
            .get(&dialect)
            .ok_or_else(|| SqlError::MissingProcedureBody {
                procedure: procedure.name.clone(),
                dialect: dialect.name().to_string(),
            })?;
        procedures.push(QueryDef::CreateProcedure(ProcedureDef {
            name: procedure.name.clone(),
            params: procedure.params.clone(),
            returns: procedure.returns.clone(),
            body: body.clone(),
        }));
    }

    let mut plan = tables;
    plan.extend(foreign_keys);
    plan.extend(indexes);
    plan.extend(views);
    plan.extend(procedures);
    debug!(statements = plan.len(), %dialect, "schema creation planned");
    Ok(plan)
}

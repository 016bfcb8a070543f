//! Relation resolution and validation
//!
//! Forward relations (foreign keys and logical relation keys) list local
//! columns that correspond, in order, to the target table's primary key.
//! Inverse relations name a forward relation declared on their target.

use tracing::debug;

use crate::error::{SqlError, SqlResult};
use crate::expr::{col, WhereExpr};
use crate::schema::{ForeignKeyDefinition, ForwardRelation, Relation, Schema, TableDefinition};
use crate::types::ColumnType;

/// A relation with its column correspondence worked out.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRelation {
    pub name: String,
    pub source: String,
    pub target: String,
    /// `(source column, target column, tag)` in key order.
    pub pairs: Vec<(String, String, ColumnType)>,
    pub is_single: bool,
}

impl ResolvedRelation {
    /// ON conditions joining `target_alias` onto `source_alias`.
    pub fn join_conditions(&self, source_alias: &str, target_alias: &str) -> Vec<WhereExpr> {
        self.pairs
            .iter()
            .map(|(source, target, ty)| {
                col(target_alias, target.as_str(), *ty).eq(col(source_alias, source.as_str(), *ty))
            })
            .collect()
    }
}

fn table<'a>(schema: &'a Schema, name: &str) -> SqlResult<&'a TableDefinition> {
    schema.find_table(name).ok_or_else(|| SqlError::unknown_table(name))
}

/// Pair a forward relation's columns with the target primary key.
fn forward_pairs(
    schema: &Schema,
    source: &TableDefinition,
    relation: &str,
    forward: &ForwardRelation,
) -> SqlResult<Vec<(String, String, ColumnType)>> {
    let target = table(schema, &forward.target)?;
    if forward.columns.len() != target.primary_key.len() {
        return Err(SqlError::KeyArityMismatch {
            table: source.name.clone(),
            relation: relation.to_string(),
            target: target.name.clone(),
            expected: target.primary_key.len(),
            actual: forward.columns.len(),
        });
    }
    forward
        .columns
        .iter()
        .zip(target.primary_key.iter())
        .map(|(local, remote)| {
            let column = source
                .get_column(local)
                .ok_or_else(|| SqlError::unknown_column(&source.name, local))?;
            Ok((local.clone(), remote.clone(), column.column_type))
        })
        .collect()
}

pub fn resolve_relation(schema: &Schema, table_name: &str, relation: &str) -> SqlResult<ResolvedRelation> {
    let source = table(schema, table_name)?;
    let declared = source
        .relations
        .get(relation)
        .ok_or_else(|| SqlError::unknown_relation(table_name, relation))?;

    match declared {
        Relation::ForeignKey(forward) | Relation::RelationKey(forward) => Ok(ResolvedRelation {
            name: relation.to_string(),
            source: source.name.clone(),
            target: forward.target.clone(),
            pairs: forward_pairs(schema, source, relation, forward)?,
            is_single: true,
        }),
        Relation::Inverse(inverse) => {
            let child = table(schema, &inverse.target)?;
            let forward = child
                .relations
                .get(&inverse.forward)
                .and_then(Relation::forward)
                .ok_or_else(|| {
                    SqlError::invalid_relation(
                        table_name,
                        relation,
                        format!("'{}' has no forward relation '{}'", child.name, inverse.forward),
                    )
                })?;
            let pairs = forward_pairs(schema, child, &inverse.forward, forward)?
                .into_iter()
                .map(|(child_col, own_col, ty)| (own_col, child_col, ty))
                .collect();
            Ok(ResolvedRelation {
                name: relation.to_string(),
                source: source.name.clone(),
                target: child.name.clone(),
                pairs,
                is_single: inverse.single,
            })
        }
    }
}

/// Relations of `table_name` that point at `target`.
pub fn relations_to<'a>(schema: &'a Schema, table_name: &str, target: &str) -> SqlResult<Vec<&'a str>> {
    Ok(table(schema, table_name)?
        .relations
        .iter()
        .filter(|(_, r)| r.target() == target)
        .map(|(name, _)| name.as_str())
        .collect())
}

/// The unique relation from `table_name` to `target`.
pub fn unique_relation_to<'a>(schema: &'a Schema, table_name: &str, target: &str) -> SqlResult<&'a str> {
    let candidates = relations_to(schema, table_name, target)?;
    match candidates.as_slice() {
        [only] => Ok(*only),
        [] => Err(SqlError::unknown_relation(table_name, format!("<to {}>", target))),
        many => Err(SqlError::AmbiguousRelation {
            table: table_name.to_string(),
            target: target.to_string(),
            candidates: many.iter().map(|s| s.to_string()).collect(),
        }),
    }
}

/// Constraint definition for an enforced foreign key.
pub fn foreign_key_definition(
    schema: &Schema,
    table_name: &str,
    relation: &str,
) -> SqlResult<Option<ForeignKeyDefinition>> {
    let source = table(schema, table_name)?;
    match source.relations.get(relation) {
        Some(Relation::ForeignKey(forward)) => {
            let pairs = forward_pairs(schema, source, relation, forward)?;
            Ok(Some(ForeignKeyDefinition {
                name: format!("fk_{}_{}", source.name, relation),
                from_table: source.name.clone(),
                from_columns: pairs.iter().map(|(l, _, _)| l.clone()).collect(),
                to_table: forward.target.clone(),
                to_columns: pairs.iter().map(|(_, r, _)| r.clone()).collect(),
                on_delete: forward.on_delete,
                on_update: forward.on_update,
            }))
        }
        Some(_) => Ok(None),
        None => Err(SqlError::unknown_relation(table_name, relation)),
    }
}

/// Check every relation in the schema. Runs before any connection opens.
pub fn validate_relations(schema: &Schema) -> SqlResult<()> {
    for source in schema.tables() {
        for (name, relation) in &source.relations {
            if schema.find_table(relation.target()).is_none() {
                return Err(SqlError::invalid_relation(
                    &source.name,
                    name,
                    format!("unknown target table '{}'", relation.target()),
                ));
            }
            match relation {
                Relation::ForeignKey(forward) | Relation::RelationKey(forward) => {
                    forward_pairs(schema, source, name, forward)?;
                }
                Relation::Inverse(inverse) => {
                    let child = table(schema, &inverse.target)?;
                    let forward = match child.relations.get(&inverse.forward) {
                        None => {
                            return Err(SqlError::invalid_relation(
                                &source.name,
                                name,
                                format!("'{}' has no relation '{}'", child.name, inverse.forward),
                            ))
                        }
                        Some(Relation::Inverse(_)) => {
                            return Err(SqlError::invalid_relation(
                                &source.name,
                                name,
                                format!("'{}.{}' is itself an inverse relation", child.name, inverse.forward),
                            ))
                        }
                        Some(Relation::ForeignKey(f)) | Some(Relation::RelationKey(f)) => f,
                    };
                    if forward.target != source.name {
                        return Err(SqlError::invalid_relation(
                            &source.name,
                            name,
                            format!(
                                "'{}.{}' points at '{}', not '{}'",
                                child.name, inverse.forward, forward.target, source.name
                            ),
                        ));
                    }
                    if inverse.single && !child.is_unique_key(&forward.columns) {
                        return Err(SqlError::invalid_relation(
                            &source.name,
                            name,
                            format!(
                                "single inverse requires '{}.{}' columns to be unique",
                                child.name, inverse.forward
                            ),
                        ));
                    }
                }
            }
        }
    }
    debug!(tables = schema.tables().count(), "schema relations validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ForeignKeyAction};

    fn library() -> Schema {
        Schema::empty()
            .with_table(
                TableDefinition::new("authors")
                    .with_column(Column::new("id", ColumnType::Int).primary_key())
                    .with_column(Column::new("name", ColumnType::text()))
                    .with_inverse("books", "books", "author", false),
            )
            .with_table(
                TableDefinition::new("books")
                    .with_column(Column::new("id", ColumnType::Int).primary_key())
                    .with_column(Column::new("author_id", ColumnType::Int))
                    .with_column(Column::new("editor_id", ColumnType::Int))
                    .with_foreign_key("author", "authors", ["author_id"], ForeignKeyAction::Cascade)
                    .with_relation_key("editor", "authors", ["editor_id"]),
            )
    }

    #[test]
    fn test_forward_and_inverse_resolution() {
        let schema = library();
        validate_relations(&schema).unwrap();

        let author = resolve_relation(&schema, "books", "author").unwrap();
        assert_eq!(author.pairs, vec![("author_id".into(), "id".into(), ColumnType::Int)]);
        assert!(author.is_single);

        let books = resolve_relation(&schema, "authors", "books").unwrap();
        assert_eq!(books.pairs, vec![("id".into(), "author_id".into(), ColumnType::Int)]);
        assert!(!books.is_single);
        assert_eq!(books.join_conditions("t0", "t1").len(), 1);
    }

    #[test]
    fn test_arity_mismatch_is_reported_with_counts() {
        let schema = Schema::empty()
            .with_table(
                TableDefinition::new("parents")
                    .with_column(Column::new("a", ColumnType::Int))
                    .with_column(Column::new("b", ColumnType::Int))
                    .with_primary_key(["a", "b"]),
            )
            .with_table(
                TableDefinition::new("children")
                    .with_column(Column::new("id", ColumnType::Int).primary_key())
                    .with_column(Column::new("parent_a", ColumnType::Int))
                    .with_foreign_key("parent", "parents", ["parent_a"], ForeignKeyAction::NoAction),
            );
        let err = validate_relations(&schema).unwrap_err();
        assert_eq!(
            err,
            SqlError::KeyArityMismatch {
                table: "children".into(),
                relation: "parent".into(),
                target: "parents".into(),
                expected: 2,
                actual: 1,
            }
        );
        assert!(foreign_key_definition(&schema, "children", "parent").is_err());
    }

    #[test]
    fn test_inverse_must_name_forward_relation() {
        let schema = library().with_table(
            TableDefinition::new("reviews")
                .with_column(Column::new("id", ColumnType::Int).primary_key())
                .with_inverse("book", "books", "missing", true),
        );
        assert!(matches!(
            validate_relations(&schema),
            Err(SqlError::InvalidRelation { .. })
        ));
    }

    #[test]
    fn test_inverse_must_point_back() {
        let schema = library().with_table(
            TableDefinition::new("profiles")
                .with_column(Column::new("id", ColumnType::Int).primary_key())
                .with_inverse("first_book", "books", "author", true),
        );
        // books.author points at authors, not profiles
        assert!(validate_relations(&schema).is_err());
    }

    #[test]
    fn test_single_inverse_needs_unique_forward_key() {
        let mut schema = library();
        let mut authors = schema.find_table("authors").unwrap().clone();
        authors = authors.with_inverse("only_book", "books", "author", true);
        schema.add_table_mut(authors);
        let err = validate_relations(&schema).unwrap_err();
        assert!(err.to_string().contains("unique"), "{err}");
    }

    #[test]
    fn test_ambiguous_relation_detection() {
        let schema = library();
        let err = unique_relation_to(&schema, "books", "authors").unwrap_err();
        match err {
            SqlError::AmbiguousRelation { candidates, .. } => {
                assert_eq!(candidates, vec!["author", "editor"])
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(unique_relation_to(&schema, "authors", "books").unwrap(), "books");
    }

    #[test]
    fn test_relation_keys_emit_no_constraint() {
        let schema = library();
        assert!(foreign_key_definition(&schema, "books", "editor").unwrap().is_none());
        let fk = foreign_key_definition(&schema, "books", "author").unwrap().unwrap();
        assert_eq!(fk.name, "fk_books_author");
        assert_eq!(fk.to_columns, vec!["id"]);
    }
}

//! Result reconstruction
//!
//! Raw rows come back flat, with relation columns spelled as dotted paths
//! (`author.country.code`). Reconstruction coerces each declared column and
//! folds repeated rows back into nested records: one level at a time, the
//! non-relation columns of a row identify its group and each relation's
//! column slice is folded recursively under that group.

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use tracing::trace;

use crate::driver::RawRow;
use crate::error::{SqlError, SqlResult};
use crate::query::{JoinMeta, ResultMeta};
use crate::types::{Value, ValueKey};

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Value(Value),
    One(Record),
    Many(Vec<Record>),
}

impl Field {
    pub fn to_json(&self) -> JsonValue {
        match self {
            Field::Value(v) => v.to_json(),
            Field::One(r) => r.to_json(),
            Field::Many(rs) => JsonValue::Array(rs.iter().map(Record::to_json).collect()),
        }
    }
}

/// A reconstructed object: ordered keys, scalar or nested fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record(IndexMap<String, Field>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, field: Field) {
        self.0.insert(key.into(), field);
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.0.get(key)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        match self.0.get(key) {
            Some(Field::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn one(&self, key: &str) -> Option<&Record> {
        match self.0.get(key) {
            Some(Field::One(r)) => Some(r),
            _ => None,
        }
    }

    pub fn many(&self, key: &str) -> Option<&[Record]> {
        match self.0.get(key) {
            Some(Field::Many(rs)) => Some(rs),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> JsonValue {
        let mut object = JsonMap::new();
        for (key, field) in &self.0 {
            object.insert(key.clone(), field.to_json());
        }
        JsonValue::Object(object)
    }
}

type Row = IndexMap<String, Value>;

/// Coerce the declared columns of one raw row. Null and absent values drop
/// their key. With no declared columns (a `t.*` projection) the raw values
/// pass through untouched.
fn coerce_row(raw: &RawRow, meta: &ResultMeta) -> SqlResult<Row> {
    let mut row = Row::new();
    if meta.columns.is_empty() {
        for (key, value) in raw {
            if !value.is_null() {
                row.insert(key.clone(), value.clone());
            }
        }
        return Ok(row);
    }
    for (column, ty) in &meta.columns {
        let Some(value) = raw.get(column) else { continue };
        let coerced = ty.coerce(column, value)?;
        if !coerced.is_null() {
            row.insert(column.clone(), coerced);
        }
    }
    Ok(row)
}

/// Relations rooted at this level, and the join map each one hands down.
fn split_joins(joins: &IndexMap<String, JoinMeta>) -> Vec<(String, bool, IndexMap<String, JoinMeta>)> {
    let mut direct: Vec<(String, bool, IndexMap<String, JoinMeta>)> = joins
        .iter()
        .filter(|(path, _)| !path.contains('.'))
        .map(|(name, meta)| (name.clone(), meta.is_single, IndexMap::new()))
        .collect();
    for (path, meta) in joins {
        if let Some((head, rest)) = path.split_once('.') {
            if let Some(entry) = direct.iter_mut().find(|(name, _, _)| name == head) {
                entry.2.insert(rest.to_string(), *meta);
            }
        }
    }
    direct
}

struct Group {
    own: Row,
    slices: Vec<Vec<Row>>,
}

/// Grouping state for one nesting level.
struct Level {
    relations: Vec<(String, bool, IndexMap<String, JoinMeta>)>,
    groups: Vec<Group>,
    index: HashMap<Vec<(String, ValueKey)>, usize>,
}

impl Level {
    fn new(joins: &IndexMap<String, JoinMeta>) -> Self {
        Self {
            relations: split_joins(joins),
            groups: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn relation_of(&self, key: &str) -> Option<(usize, String)> {
        let (head, rest) = key.split_once('.')?;
        self.relations
            .iter()
            .position(|(name, _, _)| name == head)
            .map(|i| (i, rest.to_string()))
    }

    fn push(&mut self, row: Row) {
        let mut own = Row::new();
        let mut slices: Vec<Row> = vec![Row::new(); self.relations.len()];
        for (key, value) in row {
            match self.relation_of(&key) {
                Some((i, rest)) => {
                    slices[i].insert(rest, value);
                }
                None => {
                    own.insert(key, value);
                }
            }
        }
        let identity: Vec<(String, ValueKey)> = own
            .iter()
            .map(|(key, value)| (key.clone(), ValueKey::from(value)))
            .collect();
        let position = match self.index.get(&identity) {
            Some(&i) => i,
            None => {
                self.groups.push(Group {
                    own,
                    slices: vec![Vec::new(); self.relations.len()],
                });
                self.index.insert(identity, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[position];
        for (i, slice) in slices.into_iter().enumerate() {
            if !slice.is_empty() {
                group.slices[i].push(slice);
            }
        }
    }

    fn finish(self, path: &str) -> SqlResult<Vec<Record>> {
        let mut records = Vec::with_capacity(self.groups.len());
        for group in self.groups {
            let mut record = Record::new();
            for (key, value) in group.own {
                record.insert(key, Field::Value(value));
            }
            for ((name, is_single, joins), rows) in self.relations.iter().zip(group.slices) {
                if rows.is_empty() {
                    continue;
                }
                let relation_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{}.{}", path, name)
                };
                let mut nested = Level::new(joins);
                for row in rows {
                    nested.push(row);
                }
                let mut children = nested.finish(&relation_path)?;
                if *is_single {
                    if children.len() > 1 {
                        return Err(SqlError::InconsistentRelation {
                            relation: relation_path,
                            candidates: children.len(),
                        });
                    }
                    if let Some(child) = children.pop() {
                        record.insert(name.clone(), Field::One(child));
                    }
                } else if !children.is_empty() {
                    record.insert(name.clone(), Field::Many(children));
                }
            }
            if !record.is_empty() {
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// Coerce and fold `rows` into nested records.
pub fn reconstruct(rows: &[RawRow], meta: &ResultMeta) -> SqlResult<Vec<Record>> {
    let mut level = Level::new(&meta.joins);
    for raw in rows {
        let row = coerce_row(raw, meta)?;
        if !row.is_empty() {
            level.push(row);
        }
    }
    let records = level.finish("")?;
    trace!(rows = rows.len(), records = records.len(), "rows reconstructed");
    Ok(records)
}

/// As `reconstruct`, yielding to the scheduler after every `chunk_size` rows.
pub async fn reconstruct_chunked(
    rows: &[RawRow],
    meta: &ResultMeta,
    chunk_size: usize,
) -> SqlResult<Vec<Record>> {
    if chunk_size == 0 || rows.len() <= chunk_size {
        return reconstruct(rows, meta);
    }
    let mut level = Level::new(&meta.joins);
    for chunk in rows.chunks(chunk_size) {
        for raw in chunk {
            let row = coerce_row(raw, meta)?;
            if !row.is_empty() {
                level.push(row);
            }
        }
        tokio::task::yield_now().await;
    }
    let records = level.finish("")?;
    trace!(rows = rows.len(), records = records.len(), chunk_size, "rows reconstructed in chunks");
    Ok(records)
}

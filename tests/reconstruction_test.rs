//! Folding flat joined rows back into nested records.

mod common;

use common::raw;
use indexmap::IndexMap;
use proptest::prelude::*;

use catena::query::JoinMeta;
use catena::reconstruct::reconstruct_chunked;
use catena::{reconstruct, ColumnType, ResultMeta, SqlError, Value};

fn author_posts_meta(single: bool) -> ResultMeta {
    let mut columns = IndexMap::new();
    columns.insert("id".to_string(), ColumnType::Int);
    columns.insert("posts.id".to_string(), ColumnType::Int);
    columns.insert("posts.comments.body".to_string(), ColumnType::Text(None));
    let mut joins = IndexMap::new();
    joins.insert("posts".to_string(), JoinMeta { is_single: single });
    joins.insert("posts.comments".to_string(), JoinMeta { is_single: false });
    ResultMeta { columns, joins }
}

#[test]
fn test_two_level_nesting_keeps_first_seen_order() {
    let rows = vec![
        raw(&[("id", Value::Integer(1)), ("posts.id", Value::Integer(20)), ("posts.comments.body", "x".into())]),
        raw(&[("id", Value::Integer(1)), ("posts.id", Value::Integer(10)), ("posts.comments.body", "y".into())]),
        raw(&[("id", Value::Integer(1)), ("posts.id", Value::Integer(20)), ("posts.comments.body", "z".into())]),
    ];
    let records = reconstruct(&rows, &author_posts_meta(false)).unwrap();

    assert_eq!(records.len(), 1);
    let posts = records[0].many("posts").unwrap();
    let ids: Vec<_> = posts.iter().map(|p| p.value("id").cloned()).collect();
    assert_eq!(ids, vec![Some(Value::Integer(20)), Some(Value::Integer(10))]);
    assert_eq!(posts[0].many("comments").unwrap().len(), 2);
    assert_eq!(
        records[0].to_json(),
        serde_json::json!({
            "id": 1,
            "posts": [
                {"id": 20, "comments": [{"body": "x"}, {"body": "z"}]},
                {"id": 10, "comments": [{"body": "y"}]}
            ]
        })
    );
}

#[test]
fn test_single_relation_with_two_children_is_inconsistent() {
    let rows = vec![
        raw(&[("id", Value::Integer(1)), ("posts.id", Value::Integer(10))]),
        raw(&[("id", Value::Integer(1)), ("posts.id", Value::Integer(11))]),
    ];
    let err = reconstruct(&rows, &author_posts_meta(true)).unwrap_err();
    assert!(matches!(err, SqlError::InconsistentRelation { candidates: 2, .. }));
}

proptest! {
    #[test]
    fn prop_every_parent_keeps_its_children(
        children in prop::collection::vec(1usize..5, 1..20),
        chunk in 1usize..8,
    ) {
        let mut rows = Vec::new();
        for (parent, count) in children.iter().enumerate() {
            for child in 0..*count {
                rows.push(raw(&[
                    ("id", Value::Integer(parent as i64)),
                    ("posts.id", Value::Integer((parent * 100 + child) as i64)),
                ]));
            }
        }
        let meta = author_posts_meta(false);
        let records = reconstruct(&rows, &meta).unwrap();
        prop_assert_eq!(records.len(), children.len());
        for (record, count) in records.iter().zip(&children) {
            prop_assert_eq!(record.many("posts").map(|p| p.len()), Some(*count));
        }

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let chunked = runtime.block_on(reconstruct_chunked(&rows, &meta, chunk)).unwrap();
        prop_assert_eq!(chunked, records);
    }
}

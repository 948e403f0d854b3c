//! Offsets, limits and sort orders.

use super::helpers::{Person, Ranked, memory_database};
use crate::query::Filter;

#[allow(clippy::expect_used)]
async fn ranked(fields: &[i64]) -> crate::database::Database {
    let db = memory_database().await;
    for &field in fields {
        db.insert(&mut Ranked::new(field, &format!("rank {field}")))
            .await
            .expect("insert");
    }
    db
}

#[tokio::test]
async fn test_offset_and_limit_after_sort() {
    let db = ranked(&[5, 3, 1, 4, 2]).await;

    let page: Vec<i64> = db
        .find::<Ranked>(2, 2, None, &["Field"])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect")
        .iter()
        .map(|r| r.field)
        .collect();
    assert_eq!(page, vec![3, 4]);

    let top: Vec<String> = db
        .find::<Ranked>(0, 2, None, &["-Field"])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect")
        .into_iter()
        .map(|r| r.label)
        .collect();
    assert_eq!(top, vec!["rank 5", "rank 4"]);

    let past_end = db
        .find::<Ranked>(10, 2, None, &["Field"])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect");
    assert!(past_end.is_empty());

    let none = db
        .find::<Ranked>(0, 0, None, &[])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect");
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_index_order_with_descending_field() {
    let db = memory_database().await;
    for (name, age) in [("Bob", 30), ("Alice", 20), ("Carol", 10), ("Alice", 40)] {
        db.insert(&mut Person::new(name, age)).await.expect("insert");
    }

    // [Name, -Age] provides this order directly.
    let people: Vec<(String, i32)> = db
        .find::<Person>(0, usize::MAX, None, &["Name"])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect")
        .into_iter()
        .map(|p| (p.name, p.age))
        .collect();
    assert_eq!(
        people,
        vec![
            ("Alice".to_string(), 40),
            ("Alice".to_string(), 20),
            ("Bob".to_string(), 30),
            ("Carol".to_string(), 10),
        ]
    );

    // No index starts with -Age, so this sorts in memory.
    let ages: Vec<i32> = db
        .find::<Person>(1, 2, Some(Filter::ge("Age", 15i32)), &["-Age"])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect")
        .iter()
        .map(|p| p.age)
        .collect();
    assert_eq!(ages, vec![30, 20]);
}

#[tokio::test]
async fn test_cursor_pulls_one_at_a_time() {
    let db = ranked(&[1, 2, 3]).await;
    let mut cursor = db
        .find::<Ranked>(0, usize::MAX, Some(Filter::ne("Field", 2i64)), &["Field"])
        .await
        .expect("find");

    let first = cursor.next().await.expect("next").expect("first match");
    assert_eq!(first.field, 1);
    assert!(first.id.is_some());
    let second = cursor.previous().await.expect("previous").expect("second match");
    assert_eq!(second.field, 3);
    assert!(cursor.next().await.expect("next").is_none());
    assert!(cursor.next().await.expect("next").is_none());
}

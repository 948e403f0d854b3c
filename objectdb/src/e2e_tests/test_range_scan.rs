//! Compound range scans over the `[A, B]` index.

use super::helpers::{Pair, memory_database};
use crate::query::Filter;

#[allow(clippy::expect_used)]
async fn pairs(rows: &[(i32, i32)]) -> crate::database::Database {
    let db = memory_database().await;
    for &(a, b) in rows {
        db.insert(&mut Pair::new(a, b)).await.expect("insert");
    }
    db
}

#[allow(clippy::expect_used)]
async fn query(db: &crate::database::Database, filter: Filter) -> Vec<(i32, i32)> {
    db.find::<Pair>(0, usize::MAX, Some(filter), &[])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect")
        .into_iter()
        .map(|p| (p.a, p.b))
        .collect()
}

#[tokio::test]
async fn test_point_and_lower_bound() {
    let db = pairs(&[(1, 5), (1, 9), (2, 1)]).await;
    let found = query(&db, Filter::eq("A", 1i32) & Filter::ge("B", 6i32)).await;
    assert_eq!(found, vec![(1, 9)]);
}

#[tokio::test]
async fn test_results_in_index_order_without_duplicates() {
    let mut rows = Vec::new();
    for a in (0..6).rev() {
        for b in (0..6).rev() {
            rows.push((a, b));
        }
    }
    let db = pairs(&rows).await;

    let found = query(&db, Filter::eq("A", 3i32) & Filter::ge("B", 2i32)).await;
    assert_eq!(found, vec![(3, 2), (3, 3), (3, 4), (3, 5)]);

    // Overlapping branches: every match once, in (A, B) order.
    let filter = (Filter::ge("A", 1i32) & Filter::le("A", 2i32) & Filter::eq("B", 4i32))
        | (Filter::eq("A", 2i32) & Filter::ge("B", 4i32))
        | (Filter::eq("A", 5i32) & Filter::lt("B", 2i32));
    let found = query(&db, filter).await;
    assert_eq!(found, vec![(1, 4), (2, 4), (2, 5), (5, 0), (5, 1)]);
}

#[tokio::test]
async fn test_residual_filter_is_applied() {
    let db = pairs(&[(1, 1), (1, 2), (1, 3), (2, 2)]).await;
    let found = query(&db, Filter::eq("A", 1i32) & Filter::ne("B", 2i32)).await;
    assert_eq!(found, vec![(1, 1), (1, 3)]);

    let found = query(&db, Filter::eq("A", 1i32) & !Filter::gt("B", 1i32)).await;
    assert_eq!(found, vec![(1, 1)]);
}

#[tokio::test]
async fn test_unindexed_filter_scans_everything() {
    let db = pairs(&[(1, 7), (2, 7), (3, 8)]).await;
    let mut found = query(&db, Filter::eq("B", 7i32)).await;
    found.sort_unstable();
    assert_eq!(found, vec![(1, 7), (2, 7)]);
}

#[tokio::test]
async fn test_contradiction_yields_nothing() {
    let db = pairs(&[(1, 1), (5, 5)]).await;
    assert!(query(&db, Filter::gt("A", 3i32) & Filter::lt("A", 2i32)).await.is_empty());
    // Comparing against another class never matches.
    assert!(query(&db, Filter::eq("A", "1")).await.is_empty());
}

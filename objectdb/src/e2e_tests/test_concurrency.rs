//! Concurrent writers, readers and cursors.

use std::collections::HashSet;
use std::sync::Arc;

use super::helpers::{Pair, assert_healthy, memory_database};
use crate::query::Filter;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_writers_and_readers() {
    let db = Arc::new(memory_database().await);

    let mut writers = Vec::new();
    for a in 0..4 {
        let db = Arc::clone(&db);
        writers.push(tokio::spawn(async move {
            for b in 0..50 {
                db.insert(&mut Pair::new(a, b)).await.expect("insert");
            }
        }));
    }
    let mut readers = Vec::new();
    for a in 0..4 {
        let db = Arc::clone(&db);
        readers.push(tokio::spawn(async move {
            for _ in 0..10 {
                let found = db
                    .find::<Pair>(0, usize::MAX, Some(Filter::eq("A", a)), &[])
                    .await
                    .expect("find")
                    .collect_all()
                    .await
                    .expect("collect");
                assert!(found.iter().all(|p| p.a == a));
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in writers.into_iter().chain(readers) {
        handle.await.expect("task");
    }

    assert_eq!(db.count::<Pair>().await.expect("count"), 200);
    for a in 0..4 {
        let found = db
            .find::<Pair>(0, usize::MAX, Some(Filter::eq("A", a)), &[])
            .await
            .expect("find")
            .collect_all()
            .await
            .expect("collect");
        let bs: Vec<i32> = found.iter().map(|p| p.b).collect();
        assert_eq!(bs, (0..50).collect::<Vec<_>>());
    }
    assert_healthy(&db, "Pair").await;
}

#[tokio::test]
async fn test_cursor_survives_interleaved_writes() {
    let db = memory_database().await;
    let mut stored = Vec::new();
    for b in 0..40 {
        let mut pair = Pair::new(0, b);
        db.insert(&mut pair).await.expect("insert");
        stored.push(pair);
    }

    let mut cursor = db
        .find::<Pair>(0, usize::MAX, Some(Filter::eq("A", 0i32)), &[])
        .await
        .expect("find");
    let mut seen = HashSet::new();
    for _ in 0..10 {
        let pair = cursor.next().await.expect("next").expect("match");
        assert!(seen.insert(pair.id.expect("id")));
    }

    // Move already-returned objects ahead of the cursor and add new ones.
    for pair in stored.iter_mut().take(5) {
        pair.b += 100;
    }
    for pair in &stored[..5] {
        assert!(db.update(pair).await.expect("update"));
    }
    for b in 200..210 {
        db.insert(&mut Pair::new(0, b)).await.expect("insert");
    }
    assert!(db.delete(&stored[39]).await.expect("delete"));

    while let Some(pair) = cursor.next().await.expect("next") {
        assert!(seen.insert(pair.id.expect("id")), "duplicate {pair:?}");
    }
    // 40 originals, one deleted before it was reached, plus 10 new ones.
    assert_eq!(seen.len(), 49);
    assert!(!seen.contains(&stored[39].id.expect("id")));
}

//! Secondary indices follow inserts, updates and deletes.

use super::helpers::{Person, assert_healthy, memory_database};
use crate::codec::{Document, IndexDefinition};
use crate::database::Database;
use crate::query::Filter;
use crate::types::ObjectId;

#[allow(clippy::expect_used)]
async fn ages(db: &Database, filter: Filter) -> Vec<i32> {
    db.find::<Person>(0, usize::MAX, Some(filter), &[])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect")
        .iter()
        .map(|p| p.age)
        .collect()
}

#[allow(clippy::expect_used)]
async fn index_counts(db: &Database, collection: &str) -> Vec<(String, u64)> {
    db.verify(collection).await.expect("verify").indices
}

#[tokio::test]
async fn test_update_moves_index_entries() {
    let db = memory_database().await;
    let mut alice = Person::new("Alice", 30);
    db.insert(&mut alice).await.expect("insert");
    db.insert(&mut Person::new("Bob", 50)).await.expect("insert");

    alice.age = 31;
    assert!(db.update(&alice).await.expect("update"));
    assert!(ages(&db, Filter::eq("Age", 30i32)).await.is_empty());
    assert_eq!(ages(&db, Filter::eq("Age", 31i32)).await, vec![31]);
    assert_eq!(
        ages(&db, Filter::eq("Name", "Alice") & Filter::le("Age", 40i32)).await,
        vec![31]
    );

    // An update that leaves indexed fields alone keeps the entries.
    let alice = alice.with_bio("Unindexed change");
    assert!(db.update(&alice).await.expect("update"));
    assert_eq!(
        index_counts(&db, "Person").await,
        vec![
            ("Age_asc".to_string(), 2),
            ("Name_asc.Age_desc".to_string(), 2)
        ]
    );
    assert_healthy(&db, "Person").await;

    assert!(db.delete(&alice).await.expect("delete"));
    assert!(ages(&db, Filter::eq("Name", "Alice")).await.is_empty());
    assert_eq!(ages(&db, Filter::ge("Age", 0i32)).await, vec![50]);
    assert_eq!(
        index_counts(&db, "Person").await,
        vec![
            ("Age_asc".to_string(), 1),
            ("Name_asc.Age_desc".to_string(), 1)
        ]
    );
    assert_healthy(&db, "Person").await;
}

#[tokio::test]
async fn test_new_index_is_backfilled() {
    let db = memory_database().await;
    let notes = db.register_collection("Note", &[]).await.expect("register");
    for n in 1..=20u128 {
        let doc = Document::new("Note").with("Score", i64::try_from(n).expect("small"));
        assert!(notes.insert(&ObjectId::from_u128(n), &doc).await.expect("insert"));
    }
    assert!(notes.definitions().await.expect("definitions").is_empty());

    let score = IndexDefinition::new(&["Score"]).expect("definition");
    let again = db
        .register_collection("Note", std::slice::from_ref(&score))
        .await
        .expect("register with index");
    assert_eq!(again.definitions().await.expect("definitions"), vec![score]);
    assert_eq!(
        index_counts(&db, "Note").await,
        vec![("Score_asc".to_string(), 20)]
    );

    let found = db
        .find_documents("Note", 0, usize::MAX, Some(Filter::ge("Score", 15i64)), &[])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect");
    let ids: Vec<ObjectId> = found.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, (15..=20).map(ObjectId::from_u128).collect::<Vec<_>>());
    assert_healthy(&db, "Note").await;
}

#[tokio::test]
async fn test_document_without_indexed_field() {
    let db = memory_database().await;
    let score = IndexDefinition::new(&["Score"]).expect("definition");
    let notes = db
        .register_collection("Note", &[score])
        .await
        .expect("register");
    for n in 1..=3u128 {
        let doc = Document::new("Note").with("Score", 10i64);
        notes.insert(&ObjectId::from_u128(n), &doc).await.expect("insert");
    }
    let unscored = Document::new("Note").with("Text", "no score");
    notes
        .insert(&ObjectId::from_u128(99), &unscored)
        .await
        .expect("insert");
    assert_eq!(index_counts(&db, "Note").await, vec![("Score_asc".to_string(), 3)]);

    // The index misses the unscored note, so sorting by Score scans every
    // object. A missing field sorts as null, ahead of every number.
    let by_score = db
        .find_documents("Note", 0, usize::MAX, None, &["Score"])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect");
    let ids: Vec<ObjectId> = by_score.iter().map(|(id, _)| *id).collect();
    assert_eq!(
        ids,
        [99, 1, 2, 3].map(ObjectId::from_u128).to_vec()
    );

    // A filter on Score excludes it regardless of the plan.
    let scored = db
        .find_documents("Note", 0, usize::MAX, Some(Filter::ge("Score", 0i64)), &["Score"])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect");
    assert_eq!(scored.len(), 3);

    let everything = db
        .find_documents("Note", 0, usize::MAX, None, &[])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect");
    assert_eq!(everything.len(), 4);
    assert_healthy(&db, "Note").await;
}

#[tokio::test]
async fn test_duplicate_definition_is_rejected() {
    let db = memory_database().await;
    let score = IndexDefinition::new(&["Score"]).expect("definition");
    let result = db
        .register_collection("Note", &[score.clone(), score])
        .await;
    assert!(result.is_err());
    assert!(db.register_collection("bad name", &[]).await.is_err());
}

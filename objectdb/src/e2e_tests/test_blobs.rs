//! Large values moved out of line.

use super::helpers::{Person, assert_healthy, memory_database};

#[allow(clippy::expect_used)]
async fn blob_count(db: &crate::database::Database) -> u64 {
    db.verify("Person").await.expect("verify").blobs
}

#[tokio::test]
async fn test_large_field_round_trips_through_blob() {
    let db = memory_database().await;
    let bio = "All work and no play. ".repeat(40);
    let mut person = Person::new("Jack", 44).with_bio(bio.clone());
    let id = db.insert(&mut person).await.expect("insert");
    assert_eq!(blob_count(&db).await, 1);

    let loaded: Person = db.get(&id).await.expect("get").expect("stored");
    assert_eq!(loaded.bio.as_deref(), Some(bio.as_str()));
    assert_healthy(&db, "Person").await;

    // Shrinking the field releases its BLOB.
    person.bio = Some("Short".to_string());
    assert!(db.update(&person).await.expect("update"));
    assert_eq!(blob_count(&db).await, 0);
    let loaded: Person = db.get(&id).await.expect("get").expect("stored");
    assert_eq!(loaded, person);
    assert_healthy(&db, "Person").await;

    // Growing it again allocates a new one, and delete frees it.
    person.bio = Some(bio);
    assert!(db.update(&person).await.expect("update"));
    assert_eq!(blob_count(&db).await, 1);
    assert!(db.delete(&person).await.expect("delete"));
    assert_eq!(blob_count(&db).await, 0);
    assert_healthy(&db, "Person").await;
}

#[tokio::test]
async fn test_record_too_large_for_leaf_is_stored_whole() {
    let db = memory_database().await;
    // Each field fits under the threshold but together they overflow a leaf.
    let mut person = Person::new(&"n".repeat(50), 7).with_bio("b".repeat(60));
    let id = db.insert(&mut person).await.expect("insert");
    assert!(blob_count(&db).await >= 1);

    let loaded: Person = db.get(&id).await.expect("get").expect("stored");
    assert_eq!(loaded, person);
    assert_healthy(&db, "Person").await;

    assert!(db.delete(&person).await.expect("delete"));
    assert_eq!(blob_count(&db).await, 0);
    assert_healthy(&db, "Person").await;
}

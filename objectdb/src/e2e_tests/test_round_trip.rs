//! Insert, read back, update and delete typed objects.

use super::helpers::{Person, assert_healthy, memory_database};
use crate::database::DatabaseError;
use crate::types::ObjectId;

#[tokio::test]
async fn test_insert_assigns_id_and_reads_back() {
    let db = memory_database().await;

    let mut alice = Person::new("Alice", 34).with_bio("Likes trees");
    let id = db.insert(&mut alice).await.expect("insert");
    assert_eq!(alice.id, Some(id));
    assert!(!id.is_nil());

    let loaded: Person = db.get(&id).await.expect("get").expect("stored");
    assert_eq!(loaded, alice);
    assert_eq!(db.count::<Person>().await.expect("count"), 1);
    assert_healthy(&db, "Person").await;
}

#[tokio::test]
async fn test_update_and_delete() {
    let db = memory_database().await;
    let mut bob = Person::new("Bob", 40);
    let id = db.insert(&mut bob).await.expect("insert");

    bob.age = 41;
    bob.bio = Some("Moved".to_string());
    assert!(db.update(&bob).await.expect("update"));
    let loaded: Person = db.get(&id).await.expect("get").expect("stored");
    assert_eq!(loaded.age, 41);
    assert_eq!(loaded.bio.as_deref(), Some("Moved"));

    assert!(db.delete(&bob).await.expect("delete"));
    assert!(db.get::<Person>(&id).await.expect("get").is_none());
    // Not found is a normal outcome.
    assert!(!db.delete(&bob).await.expect("delete again"));
    assert!(!db.update(&bob).await.expect("update deleted"));
    assert_eq!(db.count::<Person>().await.expect("count"), 0);
    assert_healthy(&db, "Person").await;
}

#[tokio::test]
async fn test_identifier_errors() {
    let db = memory_database().await;

    let unsaved = Person::new("Nobody", 1);
    assert!(matches!(
        db.update(&unsaved).await,
        Err(DatabaseError::MissingObjectId)
    ));
    assert!(matches!(
        db.delete(&unsaved).await,
        Err(DatabaseError::MissingObjectId)
    ));

    let mut first = Person::new("First", 1);
    first.id = Some(ObjectId::from_u128(7));
    let id = db.insert(&mut first).await.expect("insert with id");
    assert_eq!(id, ObjectId::from_u128(7));

    let mut clash = Person::new("Clash", 2);
    clash.id = Some(id);
    assert!(matches!(
        db.insert(&mut clash).await,
        Err(DatabaseError::DuplicateObject(dup)) if dup == id
    ));
    assert_eq!(db.count::<Person>().await.expect("count"), 1);
}

#[tokio::test]
async fn test_missing_id_is_none() {
    let db = memory_database().await;
    let missing = ObjectId::from_u128(42);
    assert!(db.get::<Person>(&missing).await.expect("get").is_none());
    assert!(!db.delete_by_id::<Person>(&missing).await.expect("delete"));
}

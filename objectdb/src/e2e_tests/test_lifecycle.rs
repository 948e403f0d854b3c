//! Reopening a database directory and shutting down.

use futures::StreamExt;

use super::helpers::{Person, assert_healthy, directory_database, memory_database};
use crate::database::DatabaseError;
use crate::query::Filter;

#[tokio::test]
async fn test_objects_persist_across_reopen() {
    let dir = tempfile::tempdir().expect("temp dir");

    let mut alice = Person::new("Alice", 30).with_bio("x".repeat(300));
    {
        let db = directory_database(dir.path()).await;
        db.insert(&mut alice).await.expect("insert");
        db.insert(&mut Person::new("Bob", 25)).await.expect("insert");
        db.shutdown().await;
    }
    for file in [
        "Person.btree",
        "Person.blob",
        "Person.Age_asc.index",
        "Person.Name_asc.Age_desc.index",
    ] {
        assert!(dir.path().join(file).exists(), "{file}");
    }

    let db = directory_database(dir.path()).await;
    assert_eq!(
        db.open_collections().await.expect("open collections"),
        vec!["Person"]
    );
    assert_eq!(db.collections().await, vec!["Person"]);
    // Index files are found without the type declaring them.
    let person = db.collection("Person").await.expect("collection");
    assert_eq!(person.definitions().await.expect("definitions").len(), 2);
    assert_healthy(&db, "Person").await;

    let id = alice.id.expect("id");
    let loaded: Person = db.get(&id).await.expect("get").expect("stored");
    assert_eq!(loaded, alice);

    let young: Vec<String> = db
        .find::<Person>(0, usize::MAX, Some(Filter::lt("Age", 28i32)), &[])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect")
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(young, vec!["Bob"]);
    db.shutdown().await;
}

#[tokio::test]
async fn test_operations_fail_after_shutdown() {
    let db = memory_database().await;
    for age in [1, 2, 3] {
        db.insert(&mut Person::new("P", age)).await.expect("insert");
    }
    let mut cursor = db
        .find::<Person>(0, usize::MAX, None, &[])
        .await
        .expect("find");
    assert!(cursor.next().await.expect("next").is_some());

    db.shutdown().await;
    db.shutdown().await;

    assert!(matches!(
        cursor.next().await,
        Err(DatabaseError::Closed)
    ));
    assert!(matches!(
        db.count::<Person>().await,
        Err(DatabaseError::Closed)
    ));
    assert!(matches!(
        db.insert(&mut Person::new("Late", 9)).await,
        Err(DatabaseError::Closed)
    ));
    assert!(matches!(db.verify("Person").await, Err(DatabaseError::Closed)));
}

#[tokio::test]
async fn test_stream_yields_every_match() {
    let db = memory_database().await;
    for age in [10, 20, 30, 40] {
        db.insert(&mut Person::new("S", age)).await.expect("insert");
    }
    let stream = db
        .find::<Person>(1, 2, Some(Filter::ge("Age", 10i32)), &["Age"])
        .await
        .expect("find")
        .into_stream();
    let ages: Vec<i32> = stream
        .map(|p| p.expect("stream item").age)
        .collect()
        .await;
    assert_eq!(ages, vec![20, 30]);
}

#[tokio::test]
async fn test_unknown_collection() {
    let db = memory_database().await;
    assert!(matches!(
        db.verify("Nothing").await,
        Err(DatabaseError::UnknownCollection(name)) if name == "Nothing"
    ));
    assert!(db.open_collections().await.expect("open").is_empty());
}

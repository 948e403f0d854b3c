//! Failed mutations leave the files as they were.

use super::helpers::{Person, assert_healthy, memory_database};
use crate::database::{Database, DatabaseError};
use crate::query::Filter;
use crate::storage::{FaultConfig, StorageError};

#[tokio::test]
async fn test_index_read_fault_aborts_insert() {
    let db = memory_database().await;
    for (name, age) in [("Ann", 20), ("Ben", 30), ("Cat", 40)] {
        db.insert(&mut Person::new(name, age)).await.expect("insert");
    }

    let faults = db
        .fault_handle("Person", "Person.Age_asc.index")
        .await
        .expect("fault handle")
        .expect("in-memory file");
    faults.set_config(FaultConfig {
        read_error_rate: 1.0,
        ..FaultConfig::default()
    });

    let mut dan = Person::new("Dan", 50);
    let result = db.insert(&mut dan).await;
    assert!(
        matches!(
            result,
            Err(DatabaseError::Storage(StorageError::InjectedFault(_)))
        ),
        "{result:?}"
    );
    assert!(dan.id.is_none());

    faults.set_config(FaultConfig::no_faults());
    assert_eq!(db.count::<Person>().await.expect("count"), 3);
    let names: Vec<String> = db
        .find::<Person>(0, usize::MAX, Some(Filter::ge("Age", 0i32)), &[])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect")
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["Ann", "Ben", "Cat"]);
    assert_healthy(&db, "Person").await;

    db.insert(&mut dan).await.expect("insert after recovery");
    assert_eq!(db.count::<Person>().await.expect("count"), 4);
    assert_healthy(&db, "Person").await;
}

#[tokio::test]
async fn test_oversized_index_key_aborts_insert() {
    let db = memory_database().await;
    db.insert(&mut Person::new("Ann", 20)).await.expect("insert");

    // The name alone fits in a BLOB, but not in a [Name, -Age] index entry.
    let mut long = Person::new(&"x".repeat(200), 5);
    let result = db.insert(&mut long).await;
    assert!(
        matches!(
            result,
            Err(DatabaseError::Storage(StorageError::EntryTooLarge { .. }))
        ),
        "{result:?}"
    );

    let report = db.verify("Person").await.expect("verify");
    assert_eq!(report.objects, 1);
    assert_eq!(report.blobs, 0);
    assert_eq!(
        report.indices,
        vec![
            ("Age_asc".to_string(), 1),
            ("Name_asc.Age_desc".to_string(), 1)
        ]
    );
    assert_healthy(&db, "Person").await;
}

const COMMITTED_FILES: [&str; 3] = ["Person.blob", "Person.Age_asc.index", "Person.btree"];

fn flush_faults() -> [FaultConfig; 2] {
    [
        FaultConfig {
            write_error_rate: 1.0,
            ..FaultConfig::default()
        },
        FaultConfig {
            sync_error_rate: 1.0,
            ..FaultConfig::default()
        },
    ]
}

/// Ann is stored with a bio in a BLOB, so every file takes part in a
/// mutation of that object.
#[allow(clippy::expect_used)]
async fn database_with_ann() -> (Database, Person) {
    let db = memory_database().await;
    let mut ann = Person::new("Ann", 20).with_bio("a".repeat(500));
    db.insert(&mut ann).await.expect("insert");
    (db, ann)
}

#[allow(clippy::expect_used)]
async fn assert_unchanged_after_more_writes(db: &Database, ann: &Person, context: &str) {
    let id = ann.id.expect("stored");
    let loaded: Option<Person> = db.get(&id).await.expect("get");
    assert_eq!(loaded.as_ref(), Some(ann), "{context}");
    assert_healthy(db, "Person").await;

    // Blocks a lost commit freed must not be handed out again.
    let mut zed = Person::new("Zed", 90).with_bio("z".repeat(500));
    db.insert(&mut zed).await.expect("insert after failed commit");
    let loaded: Option<Person> = db.get(&id).await.expect("get");
    assert_eq!(loaded.as_ref(), Some(ann), "{context}");
    let ages: Vec<i32> = db
        .find::<Person>(0, usize::MAX, Some(Filter::ge("Age", 0i32)), &[])
        .await
        .expect("find")
        .collect_all()
        .await
        .expect("collect")
        .into_iter()
        .map(|p| p.age)
        .collect();
    assert_eq!(ages, vec![20, 90], "{context}");
    assert_healthy(db, "Person").await;
}

#[tokio::test]
async fn test_failed_flush_rolls_back_update() {
    for file_name in COMMITTED_FILES {
        for config in flush_faults() {
            let context = format!("{file_name} {config:?}");
            let (db, ann) = database_with_ann().await;
            let faults = db
                .fault_handle("Person", file_name)
                .await
                .expect("fault handle")
                .expect("in-memory file");

            let mut changed = ann.clone().with_bio("b".repeat(500));
            changed.age = 21;
            faults.set_config(config);
            let result = db.update(&changed).await;
            faults.set_config(FaultConfig::no_faults());
            assert!(
                matches!(
                    result,
                    Err(DatabaseError::Storage(StorageError::InjectedFault(_)))
                ),
                "{context}: {result:?}"
            );

            assert_unchanged_after_more_writes(&db, &ann, &context).await;
        }
    }
}

#[tokio::test]
async fn test_failed_flush_rolls_back_delete() {
    for file_name in COMMITTED_FILES {
        for config in flush_faults() {
            let context = format!("{file_name} {config:?}");
            let (db, ann) = database_with_ann().await;
            let faults = db
                .fault_handle("Person", file_name)
                .await
                .expect("fault handle")
                .expect("in-memory file");

            faults.set_config(config);
            let result = db.delete(&ann).await;
            faults.set_config(FaultConfig::no_faults());
            assert!(
                matches!(
                    result,
                    Err(DatabaseError::Storage(StorageError::InjectedFault(_)))
                ),
                "{context}: {result:?}"
            );

            assert_eq!(db.count::<Person>().await.expect("count"), 1, "{context}");
            assert_unchanged_after_more_writes(&db, &ann, &context).await;
        }
    }
}

#[tokio::test]
async fn test_failed_index_flush_keeps_blob_chains_apart() {
    let (db, ann) = database_with_ann().await;
    let faults = db
        .fault_handle("Person", "Person.Name_asc.Age_desc.index")
        .await
        .expect("fault handle")
        .expect("in-memory file");

    let mut changed = ann.clone().with_bio("b".repeat(500));
    changed.age = 21;
    faults.set_config(FaultConfig {
        write_error_rate: 1.0,
        ..FaultConfig::default()
    });
    assert!(db.update(&changed).await.is_err());
    faults.set_config(FaultConfig::no_faults());

    let report = db.verify("Person").await.expect("verify");
    assert_eq!(report.objects, 1);
    assert_eq!(report.blobs, 1);
    assert_unchanged_after_more_writes(&db, &ann, "second index").await;

    db.update(&changed).await.expect("update after recovery");
    let loaded: Option<Person> = db.get(&changed.id.expect("stored")).await.expect("get");
    assert_eq!(loaded, Some(changed));
    assert_healthy(&db, "Person").await;
}

//! Many random identifiers with interleaved deletes.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::helpers::{Pair, assert_healthy, memory_database};
use crate::types::ObjectId;

#[tokio::test]
async fn test_random_inserts_and_deletes() {
    let db = memory_database().await;
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut live: HashMap<ObjectId, Pair> = HashMap::new();
    let mut deleted = Vec::new();

    for i in 0..10_000 {
        let mut pair = Pair::new(rng.random_range(0..100), i);
        let id = db.insert(&mut pair).await.expect("insert");
        live.insert(id, pair);

        if rng.random_bool(0.3) {
            let victim = *live.keys().next().expect("at least one live object");
            assert!(db.delete_by_id::<Pair>(&victim).await.expect("delete"));
            live.remove(&victim);
            deleted.push(victim);
        }
    }

    assert_eq!(db.count::<Pair>().await.expect("count"), live.len() as u64);
    for (id, pair) in &live {
        let loaded: Pair = db.get(id).await.expect("get").expect("live object");
        assert_eq!(&loaded, pair);
    }
    for id in &deleted {
        assert!(db.get::<Pair>(id).await.expect("get").is_none());
    }

    let report = db.verify("Pair").await.expect("verify");
    assert_eq!(report.objects, live.len() as u64);
    assert_eq!(report.indices, vec![("A_asc.B_asc".to_string(), live.len() as u64)]);
    assert_healthy(&db, "Pair").await;
}

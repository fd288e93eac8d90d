// Shared checks every `Collection` implementation must pass.

use serde_json::{json, Value};

use crate::collection::{Collection, CollectionError, FindQuery, Record};

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

pub fn check_collection(collection: &dyn Collection) {
    // insert + lookup
    collection
        .insert_one(record(json!({"_id": "t2", "timestamp": "t2", "n": 2})))
        .unwrap();
    assert_eq!(
        collection.find_one("t2").unwrap(),
        Some(record(json!({"_id": "t2", "timestamp": "t2", "n": 2})))
    );
    assert_eq!(collection.find_one("missing").unwrap(), None);

    // uniqueness, no partial write
    let err = collection
        .insert_one(record(json!({"_id": "t2", "timestamp": "t2", "n": 99})))
        .unwrap_err();
    assert!(matches!(err, CollectionError::DuplicateKey(ref key) if key == "t2"));
    assert_eq!(collection.find_one("t2").unwrap().unwrap()["n"], json!(2));

    assert!(matches!(
        collection.insert_one(record(json!({"timestamp": "t0"}))),
        Err(CollectionError::MissingKey)
    ));

    // replace never creates
    let result = collection
        .replace_one("t9", record(json!({"_id": "t9", "timestamp": "t9"})))
        .unwrap();
    assert_eq!(result.matched_count, 0);
    assert_eq!(collection.find_one("t9").unwrap(), None);

    let result = collection
        .replace_one("t2", record(json!({"_id": "t2", "timestamp": "t2", "n": 3})))
        .unwrap();
    assert_eq!(result.matched_count, 1);
    assert_eq!(collection.find_one("t2").unwrap().unwrap()["n"], json!(3));

    // range queries
    collection
        .insert_one(record(json!({"_id": "t3", "timestamp": "t3"})))
        .unwrap();
    collection
        .insert_one(record(json!({"_id": "t1", "timestamp": "t1"})))
        .unwrap();

    let stamps = |query: FindQuery| -> Vec<String> {
        collection
            .find(&query)
            .unwrap()
            .into_iter()
            .map(|r| r["timestamp"].as_str().unwrap().to_string())
            .collect()
    };

    assert_eq!(stamps(FindQuery::since("timestamp", "")), ["t1", "t2", "t3"]);
    assert_eq!(stamps(FindQuery::since("timestamp", "t2")), ["t2", "t3"]);
    assert_eq!(stamps(FindQuery::since("timestamp", "").limit(1)), ["t1"]);
    assert!(stamps(FindQuery::since("timestamp", "t4")).is_empty());

    let projected = collection
        .find(&FindQuery::since("timestamp", "t3").without_key())
        .unwrap();
    assert_eq!(projected, vec![record(json!({"timestamp": "t3"}))]);
    assert!(collection.find_one("t3").unwrap().unwrap().contains_key("_id"));
}

#[path = "common/mod.rs"]
mod common;

use common::*;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use trailsieve::{
    CachedConfigStore, FileConfigStore, FileProcessor, Handler, LocalObjectStore, MemoryConfigStore, MemoryObjectStore,
    ObjectStore, PayloadType, ProcessError, ProcessorOptions,
};

fn sns(messages: &[Value]) -> Vec<u8> {
    let records: Vec<Value> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| json!({"EventSource": "aws:sns", "Sns": {"MessageId": format!("msg-{i}"), "Message": m.to_string()}}))
        .collect();
    serde_json::to_vec(&json!({ "Records": records })).unwrap()
}

fn memory_handler(store: Arc<MemoryObjectStore>, kind: PayloadType) -> Handler {
    let config = Arc::new(MemoryConfigStore::new().with(RULES_PATH, RULES_YAML));
    Handler::new(FileProcessor::new(store, config, ProcessorOptions::new(OUTPUT_BUCKET)), kind)
}

#[tokio::test]
async fn cloudtrail_notification_processes_every_key() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert(SOURCE_BUCKET, "AWSLogs/1/a.json.gz", gzip(&document(&scenario_records())));
    store.insert(SOURCE_BUCKET, "AWSLogs/1/b.json.gz", gzip(&document(&scenario_records()[..2])));
    let handler = memory_handler(store.clone(), PayloadType::Cloudtrail);

    let payload = sns(&[json!({"s3Bucket": SOURCE_BUCKET, "s3ObjectKey": ["AWSLogs/1/a.json.gz", "AWSLogs/1/b.json.gz"]})]);
    let summaries = handler.handle(&payload, &token()).await.unwrap();

    let counts: Vec<(usize, usize)> = summaries.iter().map(|s| (s.input_records, s.output_records)).collect();
    assert_eq!(counts, vec![(5, 3), (2, 1)]);
    assert!(store.contains(OUTPUT_BUCKET, "AWSLogs/1/a.json.gz"));
    assert!(store.contains(OUTPUT_BUCKET, "AWSLogs/1/b.json.gz"));
}

#[tokio::test]
async fn s3_notification_keys_are_url_decoded() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert(SOURCE_BUCKET, "AWSLogs/1/my file=1.json", document(&scenario_records()));
    let handler = memory_handler(store.clone(), PayloadType::S3);

    let message = json!({"Records": [{"s3": {"bucket": {"name": SOURCE_BUCKET}, "object": {"key": "AWSLogs/1/my+file%3D1.json"}}}]});
    let summaries = handler.handle(&sns(&[message]), &token()).await.unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].key, "AWSLogs/1/my file=1.json");
    assert!(store.contains(OUTPUT_BUCKET, "AWSLogs/1/my file=1.json"));
}

#[tokio::test]
async fn first_failure_stops_the_invocation() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert(SOURCE_BUCKET, "c.json", document(&scenario_records()));
    let handler = memory_handler(store.clone(), PayloadType::Cloudtrail);

    let payload = sns(&[json!({"s3Bucket": SOURCE_BUCKET, "s3ObjectKey": ["missing.json", "c.json"]})]);
    let err = handler.handle(&payload, &token()).await.unwrap_err();

    assert!(err.is_not_found(), "{:?}", err);
    assert!(!store.contains(OUTPUT_BUCKET, "c.json"));
}

#[tokio::test]
async fn malformed_envelope_is_a_notification_error() {
    let handler = memory_handler(Arc::new(MemoryObjectStore::new()), PayloadType::Cloudtrail);
    let err = handler.handle(b"not json", &token()).await.unwrap_err();
    assert!(matches!(err, ProcessError::Notification(_)), "{:?}", err);
}

#[tokio::test]
async fn empty_notification_is_a_no_op() {
    let handler = memory_handler(Arc::new(MemoryObjectStore::new()), PayloadType::S3);
    let summaries = handler.handle(br#"{"Records":[]}"#, &token()).await.unwrap();
    assert!(summaries.is_empty());
}

#[tokio::test]
async fn filesystem_collaborators_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let store_root = tmp.path().join("store");
    let config_root = tmp.path().join("config");

    let key = "AWSLogs/123/CloudTrail/us-east-1/2024/03/01/trail.json.gz";
    let src = store_root.join(SOURCE_BUCKET).join(key);
    fs::create_dir_all(src.parent().unwrap()).unwrap();
    fs::write(&src, gzip(&document(&scenario_records()))).unwrap();
    fs::create_dir_all(config_root.join("cloudtrail")).unwrap();
    fs::write(config_root.join("cloudtrail/rules"), RULES_YAML).unwrap();

    let store = Arc::new(LocalObjectStore::new(&store_root));
    let config = Arc::new(CachedConfigStore::new(FileConfigStore::new(&config_root), Duration::from_secs(60)));
    let objects: Arc<dyn ObjectStore> = store.clone();
    let handler = Handler::new(FileProcessor::new(objects, config, ProcessorOptions::new(OUTPUT_BUCKET)), PayloadType::Cloudtrail);

    let payload = sns(&[json!({"s3Bucket": SOURCE_BUCKET, "s3ObjectKey": [key]})]);
    let summaries = handler.handle(&payload, &token()).await.unwrap();
    assert_eq!(summaries[0].output_records, 3);

    let written = fs::read(store_root.join(OUTPUT_BUCKET).join(key)).unwrap();
    assert_eq!(names(&output_values(&written)), vec!["GetObject", "Encrypt", "AssumeRole"]);
    assert_eq!(store.list_keys(OUTPUT_BUCKET).await.unwrap(), vec![key.to_string()]);
}

#[tokio::test]
async fn summary_serializes_with_rfc3339_timestamp() {
    let (processor, _, _) = memory_processor(&document(&scenario_records()), RULES_YAML);
    let summary = processor.process(SOURCE_BUCKET, "AWSLogs/1/file.json.gz", &token()).await.unwrap();

    let v: Value = serde_json::to_value(&summary).unwrap();
    assert_eq!(v["output_records"], 3);
    let ts = v["finished_at"].as_str().unwrap();
    assert!(time::OffsetDateTime::parse(ts, &time::format_description::well_known::Rfc3339).is_ok(), "{}", ts);
}

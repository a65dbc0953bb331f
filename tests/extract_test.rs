//! Integration tests for pooled extraction runs

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{make_rows, MockFactory};
use siphon::descriptor::{DataSourceDescriptor, PlaintextCredentials, SourceKind};
use siphon::error::ErrorCategory;
use siphon::extract::{ExtractionParameters, ExtractorConfig, PooledExtractor};
use siphon::registry::{PoolDefaults, PoolRegistry};
use siphon::security::AllowedRoots;
use siphon::types::{Row, Value};

fn source() -> DataSourceDescriptor {
    DataSourceDescriptor::new(
        1,
        "orders",
        SourceKind::PostgreSql,
        "postgres://db.internal:5432/orders",
    )
    .with_credentials("extract_user", "enc:hunter2")
}

fn extractor(factory: Arc<MockFactory>) -> PooledExtractor {
    let registry = Arc::new(
        PoolRegistry::builder(Arc::new(PlaintextCredentials))
            .with_factory(factory)
            .with_pool_defaults(PoolDefaults {
                min_size: 1,
                max_size: 2,
                acquire_timeout: Duration::from_millis(200),
            })
            .build(),
    );

    let config = ExtractorConfig::default()
        .with_allowed_roots(AllowedRoots::new(vec!["/data/extractions".into()]));
    PooledExtractor::with_config(registry, config)
}

fn params() -> ExtractionParameters {
    ExtractionParameters::new("SELECT id, name FROM orders", "run-1.jsonl")
}

// ==================== Happy Path Tests ====================

#[tokio::test]
async fn test_zero_row_extraction_succeeds() {
    let extractor = extractor(MockFactory::with_rows(vec![]));

    let result = extractor.extract(&source(), &params()).await.unwrap();

    assert_eq!(result.records_extracted(), 0);
    assert_eq!(result.records_failed(), 0);
    assert!(!result.has_errors());
    assert_eq!(result.success_rate(), 0.0);
}

#[tokio::test]
async fn test_counts_rows_and_bytes() {
    let extractor = extractor(MockFactory::with_rows(make_rows(250)));

    let result = extractor.extract(&source(), &params()).await.unwrap();

    assert_eq!(result.records_extracted(), 250);
    assert_eq!(result.records_failed(), 0);
    assert!(result.bytes_processed() > 0);
    assert_eq!(result.success_rate(), 100.0);
}

#[tokio::test]
async fn test_batch_boundary_exact_and_overflow() {
    let extractor = extractor(MockFactory::with_rows(make_rows(1000)));
    let result = extractor.extract(&source(), &params()).await.unwrap();
    assert_eq!(result.records_extracted(), 1000);

    let extractor = extractor_with_rows(1001);
    let result = extractor.extract(&source(), &params()).await.unwrap();
    assert_eq!(result.records_extracted(), 1001);
}

fn extractor_with_rows(n: usize) -> PooledExtractor {
    extractor(MockFactory::with_rows(make_rows(n)))
}

#[tokio::test]
async fn test_all_null_row_counts_as_extracted() {
    let row = Row::new(
        vec!["a".to_string(), "b".to_string()],
        vec![Value::Null, Value::Null],
    );
    let extractor = extractor(MockFactory::with_rows(vec![row]));

    let result = extractor.extract(&source(), &params()).await.unwrap();

    // A row of NULLs is a legitimate row, not a failure
    assert_eq!(result.records_extracted(), 1);
    assert_eq!(result.records_failed(), 0);
}

#[tokio::test]
async fn test_result_carries_output_path_and_source_metadata() {
    let extractor = extractor(MockFactory::with_rows(make_rows(1)));

    let result = extractor.extract(&source(), &params()).await.unwrap();

    assert_eq!(
        result.output_path().as_deref(),
        Some("/data/extractions/run-1.jsonl")
    );
    let metadata = result.metadata();
    assert_eq!(metadata.get("data_source_id").map(String::as_str), Some("1"));
    assert_eq!(
        metadata.get("data_source_name").map(String::as_str),
        Some("orders")
    );
}

// ==================== Failure Capture Tests ====================

#[tokio::test]
async fn test_db_failure_captured_not_thrown() {
    let extractor = extractor(MockFactory::failing_queries("relation does not exist"));

    let result = extractor.extract(&source(), &params()).await.unwrap();

    assert_eq!(result.records_extracted(), 0);
    assert_eq!(result.error_count(), 1);
    assert!(result.errors()[0].contains("relation does not exist"));
}

#[tokio::test]
async fn test_mid_stream_error_terminates_with_partial_counts() {
    let factory = MockFactory::stream_error_after(make_rows(7), "decode failure at row 8");
    let extractor = extractor(factory);

    // The run must end at the first stream error rather than re-polling
    // a stream that keeps failing; the outer timeout guards against a spin.
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        extractor.extract(&source(), &params()),
    )
    .await
    .expect("extraction must terminate")
    .unwrap();

    assert_eq!(result.records_extracted(), 7);
    assert_eq!(result.records_failed(), 1);
    assert_eq!(result.error_count(), 1);
    assert!(result.errors()[0].contains("decode failure"));
}

#[tokio::test]
async fn test_immediately_erroring_stream_records_one_failure() {
    let factory = MockFactory::stream_error_after(vec![], "cursor lost");
    let extractor = extractor(factory);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        extractor.extract(&source(), &params()),
    )
    .await
    .expect("extraction must terminate")
    .unwrap();

    assert_eq!(result.records_extracted(), 0);
    assert_eq!(result.records_failed(), 1);
    assert_eq!(result.error_count(), 1);
}

#[tokio::test]
async fn test_pool_creation_failure_captured_not_thrown() {
    let factory = MockFactory::with_rows(make_rows(1)).failing_first_connects(10);
    let extractor = extractor(factory);

    let result = extractor.extract(&source(), &params()).await.unwrap();

    assert_eq!(result.records_extracted(), 0);
    assert_eq!(result.error_count(), 1);
    assert!(result.errors()[0].contains("Failed to create connection pool"));
}

// ==================== Security Gate Tests ====================

#[tokio::test]
async fn test_unsafe_query_thrown_before_any_connection() {
    let factory = MockFactory::with_rows(make_rows(1));
    let extractor = extractor(factory.clone());

    let bad = ExtractionParameters::new("SELECT 1; DROP TABLE orders", "run-1.jsonl");
    let err = extractor.extract(&source(), &bad).await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Security);
    // The gate fired before any pool or connection existed
    assert_eq!(factory.connect_count(), 0);
}

#[tokio::test]
async fn test_unsafe_path_thrown_before_any_connection() {
    let factory = MockFactory::with_rows(make_rows(1));
    let extractor = extractor(factory.clone());

    let bad = ExtractionParameters::new("SELECT 1", "../../etc/passwd");
    let err = extractor.extract(&source(), &bad).await.unwrap_err();

    assert!(err.is_security());
    assert_eq!(factory.connect_count(), 0);
}

// ==================== Pooling Behavior Tests ====================

#[tokio::test]
async fn test_connection_returned_after_each_run() {
    let extractor = extractor(MockFactory::with_rows(make_rows(10)));
    let src = source();

    for _ in 0..5 {
        let result = extractor.extract(&src, &params()).await.unwrap();
        assert_eq!(result.records_extracted(), 10);
        // Give the return task time to complete before the next borrow
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let stats = extractor.registry().pool_stats(1).await.unwrap();
    assert_eq!(stats.active_connections, 0);
    // Pool stayed at its prefilled size; nothing leaked per run
    assert!(stats.total_connections <= 2);
}

#[tokio::test]
async fn test_concurrent_extractions_share_one_pool() {
    let extractor = Arc::new(extractor(MockFactory::with_rows(make_rows(100))));
    let src = source();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let extractor = Arc::clone(&extractor);
        let src = src.clone();
        handles.push(tokio::spawn(async move {
            extractor.extract(&src, &params()).await.unwrap()
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap().records_extracted();
    }

    assert_eq!(total, 400);
    assert_eq!(extractor.registry().pool_count().await, 1);
}

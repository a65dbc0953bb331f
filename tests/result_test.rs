//! Integration tests for concurrent extraction result aggregation

use std::sync::Arc;

use siphon::ExtractionResult;

// ==================== Concurrency Tests ====================

#[tokio::test]
async fn test_no_lost_updates_across_tasks() {
    let result = Arc::new(ExtractionResult::new());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let result = Arc::clone(&result);
        handles.push(tokio::spawn(async move {
            for _ in 0..1000 {
                result.add_extracted(1);
                result.add_bytes(8);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(result.records_extracted(), 20_000);
    assert_eq!(result.bytes_processed(), 160_000);
}

#[tokio::test]
async fn test_error_iteration_while_appending() {
    let result = Arc::new(ExtractionResult::new());

    let writer = {
        let result = Arc::clone(&result);
        tokio::spawn(async move {
            for i in 0..500 {
                result.add_error(format!("error {i}"));
                tokio::task::yield_now().await;
            }
        })
    };

    // Snapshots observed mid-write must be internally consistent
    for _ in 0..50 {
        let snapshot = result.errors();
        for (i, msg) in snapshot.iter().enumerate() {
            assert_eq!(msg, &format!("error {i}"));
        }
        tokio::task::yield_now().await;
    }

    writer.await.unwrap();
    assert_eq!(result.error_count(), 500);
}

// ==================== Semantics Tests ====================

#[test]
fn test_blank_error_messages_filtered() {
    let result = ExtractionResult::new();

    result.add_error("");
    result.add_error("  \t ");
    result.add_error("real failure");

    assert_eq!(result.error_count(), 1);
    assert!(result.has_errors());
}

#[test]
fn test_success_rate_boundaries() {
    let empty = ExtractionResult::new();
    assert_eq!(empty.success_rate(), 0.0);

    let all_good = ExtractionResult::new();
    all_good.add_extracted(100);
    assert_eq!(all_good.success_rate(), 100.0);

    let all_bad = ExtractionResult::new();
    all_bad.add_failed(100);
    assert_eq!(all_bad.success_rate(), 0.0);

    let mixed = ExtractionResult::new();
    mixed.add_extracted(80);
    mixed.add_failed(20);
    assert_eq!(mixed.success_rate(), 80.0);
}

#[test]
fn test_merge_combines_partitioned_runs() {
    let total = ExtractionResult::new();
    total.add_extracted(100);
    total.add_error("partition 0: retryable timeout");

    let part = ExtractionResult::new();
    part.add_extracted(200);
    part.add_failed(5);
    part.add_bytes(4096);
    part.add_error("partition 1: bad row");
    part.add_error("partition 1: bad row again");

    total.merge(&part);

    assert_eq!(total.records_extracted(), 300);
    assert_eq!(total.records_failed(), 5);
    assert_eq!(total.bytes_processed(), 4096);
    assert_eq!(total.error_count(), 3);
}

#[tokio::test]
async fn test_merge_under_concurrent_updates() {
    let target = Arc::new(ExtractionResult::new());

    let mut handles = Vec::new();
    for p in 0..8 {
        let target = Arc::clone(&target);
        handles.push(tokio::spawn(async move {
            let part = ExtractionResult::new();
            part.add_extracted(1000);
            part.add_failed(10);
            part.add_error(format!("partition {p} had a hiccup"));
            target.merge(&part);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(target.records_extracted(), 8000);
    assert_eq!(target.records_failed(), 80);
    assert_eq!(target.error_count(), 8);
}

#[test]
fn test_display_matches_summary() {
    let result = ExtractionResult::new();
    result.add_extracted(42);

    assert_eq!(format!("{result}"), result.summary());
}

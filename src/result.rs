//! Concurrent extraction result aggregation.
//!
//! [`ExtractionResult`] is shared across the workers of one extraction run
//! (wrap it in an `Arc`). Counters are atomics updated with relaxed
//! ordering; only the error list takes a lock, and appending an error is
//! rare compared to counting rows. Reads are snapshots: `errors()` copies
//! the list, so callers can iterate while workers keep appending.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Shared aggregation target for one extraction run.
#[derive(Debug, Default)]
pub struct ExtractionResult {
    records_extracted: AtomicU64,
    records_failed: AtomicU64,
    bytes_processed: AtomicU64,
    errors: Mutex<Vec<String>>,
    output_path: Mutex<Option<String>>,
    metadata: Mutex<HashMap<String, String>>,
}

impl ExtractionResult {
    /// Create an empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Record successfully extracted records
    #[inline]
    pub fn add_extracted(&self, count: u64) {
        self.records_extracted.fetch_add(count, Ordering::Relaxed);
    }

    /// Record failed records
    #[inline]
    pub fn add_failed(&self, count: u64) {
        self.records_failed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record bytes processed
    #[inline]
    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_processed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Append an error message. Blank or whitespace-only messages are
    /// dropped so callers can pass through optional upstream messages
    /// without pre-checking them.
    pub fn add_error(&self, message: impl Into<String>) {
        let message = message.into();
        if message.trim().is_empty() {
            return;
        }
        self.lock_errors().push(message);
    }

    /// Records extracted so far
    pub fn records_extracted(&self) -> u64 {
        self.records_extracted.load(Ordering::Relaxed)
    }

    /// Records failed so far
    pub fn records_failed(&self) -> u64 {
        self.records_failed.load(Ordering::Relaxed)
    }

    /// Bytes processed so far
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed.load(Ordering::Relaxed)
    }

    /// Snapshot of the error list. The copy is safe to iterate while
    /// workers append further errors.
    pub fn errors(&self) -> Vec<String> {
        self.lock_errors().clone()
    }

    /// Number of errors recorded so far
    pub fn error_count(&self) -> usize {
        self.lock_errors().len()
    }

    /// Whether any errors have been recorded
    pub fn has_errors(&self) -> bool {
        !self.lock_errors().is_empty()
    }

    /// Percentage of attempted records that succeeded, `0.0` before any
    /// record was attempted.
    pub fn success_rate(&self) -> f64 {
        let extracted = self.records_extracted();
        let failed = self.records_failed();
        let attempted = extracted + failed;
        if attempted == 0 {
            return 0.0;
        }
        extracted as f64 * 100.0 / attempted as f64
    }

    /// Set the output location of the run
    pub fn set_output_path(&self, path: impl Into<String>) {
        *self.lock_output_path() = Some(path.into());
    }

    /// Output location, if set
    pub fn output_path(&self) -> Option<String> {
        self.lock_output_path().clone()
    }

    /// Attach a metadata entry (e.g. source name, run id)
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock_metadata().insert(key.into(), value.into());
    }

    /// Metadata snapshot
    pub fn metadata(&self) -> HashMap<String, String> {
        self.lock_metadata().clone()
    }

    /// Fold another result into this one: counters are summed, error
    /// lists concatenated, output path and metadata taken from `other`
    /// where unset here.
    pub fn merge(&self, other: &ExtractionResult) {
        self.add_extracted(other.records_extracted());
        self.add_failed(other.records_failed());
        self.add_bytes(other.bytes_processed());

        let other_errors = other.errors();
        if !other_errors.is_empty() {
            self.lock_errors().extend(other_errors);
        }

        {
            let mut path = self.lock_output_path();
            if path.is_none() {
                *path = other.output_path();
            }
        }

        let other_meta = other.metadata();
        if !other_meta.is_empty() {
            let mut meta = self.lock_metadata();
            for (k, v) in other_meta {
                meta.entry(k).or_insert(v);
            }
        }
    }

    /// One-line human-readable summary
    pub fn summary(&self) -> String {
        let mut line = format!(
            "extracted={} failed={} bytes={} errors={} success_rate={:.1}%",
            self.records_extracted(),
            self.records_failed(),
            self.bytes_processed(),
            self.error_count(),
            self.success_rate()
        );
        if let Some(path) = self.output_path() {
            line.push_str(&format!(" output={path}"));
        }
        line
    }

    // A worker that panicked mid-append must not wedge every later reader,
    // so poisoning is stripped instead of propagated.
    fn lock_errors(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.errors.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_output_path(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.output_path.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_metadata(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.metadata.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl fmt::Display for ExtractionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

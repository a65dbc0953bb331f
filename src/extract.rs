//! Pooled extraction runs.
//!
//! [`PooledExtractor`] drives one extraction against one data source:
//!
//! 1. Validate the query and output path (security gates, no I/O)
//! 2. Borrow a connection from the registry's pool for the source
//! 3. Stream rows, counting and sizing them in batches
//! 4. Finalize: stamp the output path and source metadata on the result
//!
//! Security rejections are returned as errors before any resource is
//! touched. Database-side failures (connect, query, timeout) are captured
//! into the [`ExtractionResult`] instead, so a run against a flaky source
//! still produces an inspectable result.

use std::sync::Arc;
use std::time::Duration;

use crate::descriptor::DataSourceDescriptor;
use crate::error::{Error, Result};
use crate::registry::PoolRegistry;
use crate::result::ExtractionResult;
use crate::security::{validate_output_path, validate_query, AllowedRoots};

/// How many rows are accumulated between checkpoint log lines
pub const DEFAULT_BATCH_SIZE: u64 = 1000;

/// Extractor configuration
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Directories the output path must resolve under
    pub allowed_roots: AllowedRoots,
    /// Rows per accumulation batch
    pub batch_size: u64,
    /// Wall-clock budget for consuming the whole row stream
    pub query_timeout: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            allowed_roots: AllowedRoots::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            query_timeout: Duration::from_secs(300),
        }
    }
}

impl ExtractorConfig {
    /// Set the allowed output roots
    pub fn with_allowed_roots(mut self, roots: AllowedRoots) -> Self {
        self.allowed_roots = roots;
        self
    }

    /// Set the accumulation batch size
    pub fn with_batch_size(mut self, rows: u64) -> Self {
        self.batch_size = rows.max(1);
        self
    }

    /// Set the stream consumption timeout
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

/// One extraction request: what to run and where the output goes
#[derive(Debug, Clone)]
pub struct ExtractionParameters {
    /// The SELECT statement to run
    pub query: String,
    /// Output location; relative paths resolve under the first allowed
    /// root, `None` uses the default output directory itself
    pub output_path: Option<String>,
    /// Free-form options carried through to the run metadata
    pub options: std::collections::HashMap<String, String>,
}

impl Default for ExtractionParameters {
    fn default() -> Self {
        Self {
            query: "SELECT 1".to_string(),
            output_path: None,
            options: std::collections::HashMap::new(),
        }
    }
}

impl ExtractionParameters {
    /// Create extraction parameters
    pub fn new(query: impl Into<String>, output_path: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            output_path: Some(output_path.into()),
            options: std::collections::HashMap::new(),
        }
    }

    /// Set the query
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Set the output path
    pub fn with_output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Attach a free-form option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Extraction driver bound to a pool registry.
pub struct PooledExtractor {
    registry: Arc<PoolRegistry>,
    config: ExtractorConfig,
}

impl PooledExtractor {
    /// Create an extractor over a registry with default configuration
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        Self {
            registry,
            config: ExtractorConfig::default(),
        }
    }

    /// Create an extractor with explicit configuration
    pub fn with_config(registry: Arc<PoolRegistry>, config: ExtractorConfig) -> Self {
        Self { registry, config }
    }

    /// Extractor configuration
    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// The registry this extractor borrows connections from
    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Run one extraction against `source`.
    ///
    /// Returns `Err` only for security rejections (unsafe query, unsafe
    /// output path); every other failure is recorded in the returned
    /// result's error list and failure counter.
    pub async fn extract(
        &self,
        source: &DataSourceDescriptor,
        params: &ExtractionParameters,
    ) -> Result<ExtractionResult> {
        // Both gates run before any pool or connection is touched.
        validate_query(&params.query)?;
        let output = match &params.output_path {
            Some(path) => validate_output_path(path, &self.config.allowed_roots)?,
            None => self.config.allowed_roots.default_output_dir().to_path_buf(),
        };

        let result = ExtractionResult::new();
        result.set_output_path(output.to_string_lossy());
        result.set_metadata("data_source_id", source.id.to_string());
        result.set_metadata("data_source_name", source.name.clone());
        result.set_metadata("source_kind", source.kind.to_string());
        for (key, value) in &params.options {
            result.set_metadata(key.clone(), value.clone());
        }

        tracing::info!(
            data_source = source.id,
            kind = %source.kind,
            output = %output.display(),
            "extraction started"
        );

        if let Err(e) = self.run(source, &params.query, &result).await {
            // Security errors never originate past the gates above, so
            // anything caught here is a run failure.
            tracing::warn!(
                data_source = source.id,
                error = %e,
                "extraction failed"
            );
            result.add_error(e.to_string());
        }

        result.set_metadata("rows_read", result.records_extracted().to_string());

        tracing::info!(
            data_source = source.id,
            extracted = result.records_extracted(),
            failed = result.records_failed(),
            errors = result.error_count(),
            "extraction finished"
        );

        Ok(result)
    }

    async fn run(
        &self,
        source: &DataSourceDescriptor,
        query: &str,
        result: &ExtractionResult,
    ) -> Result<()> {
        let conn = self.registry.get_connection(source).await?;

        let consume = async {
            let mut stream = conn.query_stream(query, &[]).await?;

            let mut batch_rows: u64 = 0;
            let mut batch_bytes: u64 = 0;

            loop {
                match stream.next().await {
                    Ok(Some(row)) => {
                        batch_rows += 1;
                        batch_bytes += row.estimated_size();

                        if batch_rows >= self.config.batch_size {
                            result.add_extracted(batch_rows);
                            result.add_bytes(batch_bytes);
                            tracing::debug!(
                                data_source = source.id,
                                total = result.records_extracted(),
                                "batch accumulated"
                            );
                            batch_rows = 0;
                            batch_bytes = 0;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // A stream error ends the run. Flush what the batch
                        // already holds so the partial counts survive.
                        if batch_rows > 0 {
                            result.add_extracted(batch_rows);
                            result.add_bytes(batch_bytes);
                        }
                        result.add_failed(1);
                        return Err(e);
                    }
                }
            }

            if batch_rows > 0 {
                result.add_extracted(batch_rows);
                result.add_bytes(batch_bytes);
            }

            Ok::<(), Error>(())
        };

        match tokio::time::timeout(self.config.query_timeout, consume).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::timeout(format!(
                "query exceeded {}s budget",
                self.config.query_timeout.as_secs()
            ))),
        }

        // `conn` drops here and returns to the pool on every path.
    }
}

//! Shared in-memory driver for integration tests

// Not every test binary exercises every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use siphon::connection::{
    Connection, ConnectionConfig, ConnectionFactory, RowStream, VecRowStream,
};
use siphon::descriptor::SourceKind;
use siphon::error::{Error, Result};
use siphon::types::{Row, Value};

/// Behavior of a mock connection per query
#[derive(Clone)]
pub enum QueryOutcome {
    /// Return these rows
    Rows(Vec<Row>),
    /// Fail with a query error carrying this message
    Fail(String),
    /// Stream these rows, then error on every subsequent poll
    RowsThenStreamError(Vec<Row>, String),
}

/// Row stream that yields its rows, then fails every later poll
pub struct ErroringRowStream {
    rows: std::vec::IntoIter<Row>,
    message: String,
}

impl RowStream for ErroringRowStream {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Row>>> + Send + '_>> {
        Box::pin(async move {
            match self.rows.next() {
                Some(row) => Ok(Some(row)),
                None => Err(Error::query(self.message.clone())),
            }
        })
    }
}

/// In-memory connection that serves a fixed outcome
pub struct MockConnection {
    outcome: QueryOutcome,
    valid: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        match &self.outcome {
            QueryOutcome::Rows(rows) | QueryOutcome::RowsThenStreamError(rows, _) => {
                Ok(rows.clone())
            }
            QueryOutcome::Fail(message) => Err(Error::query(message.clone())),
        }
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        match &self.outcome {
            QueryOutcome::RowsThenStreamError(rows, message) => Ok(Box::new(ErroringRowStream {
                rows: rows.clone().into_iter(),
                message: message.clone(),
            })),
            _ => {
                let rows = self.query(sql, params).await?;
                Ok(Box::new(VecRowStream::new(rows)))
            }
        }
    }

    async fn is_valid(&self) -> bool {
        self.valid
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory producing [`MockConnection`]s, with optional connect-failure
/// injection for pool creation tests.
pub struct MockFactory {
    kind: SourceKind,
    outcome: QueryOutcome,
    /// Number of connect() calls that fail before connects start succeeding
    fail_connects: AtomicUsize,
    /// Delay applied to every connect() call, in milliseconds
    connect_delay_ms: AtomicU64,
    connects: AtomicUsize,
}

impl MockFactory {
    pub fn new(kind: SourceKind, outcome: QueryOutcome) -> Arc<Self> {
        Arc::new(Self {
            kind,
            outcome,
            fail_connects: AtomicUsize::new(0),
            connect_delay_ms: AtomicU64::new(0),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn with_rows(rows: Vec<Row>) -> Arc<Self> {
        Self::new(SourceKind::PostgreSql, QueryOutcome::Rows(rows))
    }

    pub fn failing_queries(message: &str) -> Arc<Self> {
        Self::new(SourceKind::PostgreSql, QueryOutcome::Fail(message.to_string()))
    }

    pub fn stream_error_after(rows: Vec<Row>, message: &str) -> Arc<Self> {
        Self::new(
            SourceKind::PostgreSql,
            QueryOutcome::RowsThenStreamError(rows, message.to_string()),
        )
    }

    pub fn failing_first_connects(self: Arc<Self>, n: usize) -> Arc<Self> {
        self.fail_connects.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_connect_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let delay = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::connection("injected connect failure"));
        }

        Ok(Box::new(MockConnection {
            outcome: self.outcome.clone(),
            valid: true,
        }))
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }
}

/// Build `count` two-column rows with sequential ids
pub fn make_rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            Row::new(
                vec!["id".to_string(), "name".to_string()],
                vec![
                    Value::Int64(i as i64),
                    Value::String(format!("row-{}", i)),
                ],
            )
        })
        .collect()
}

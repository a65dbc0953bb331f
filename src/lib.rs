//! # siphon
//!
//! Pooled, security-gated data extraction from relational sources.
//!
//! Siphon runs read-only extraction queries against registered data
//! sources through per-source connection pools, with validation gates in
//! front of every run and a concurrent result aggregator behind it.
//!
//! ## Features
//!
//! - **Security Gates**: Lexical SQL-injection screening for extraction
//!   queries and traversal-safe output path validation, both rejecting
//!   before any database work starts
//! - **Pool Registry**: One connection pool per `(data source, kind)`,
//!   created exactly once under concurrent first use, with credential
//!   decryption at pool creation time
//! - **Streaming Extraction**: Row streams accumulated in batches of
//!   1000 with record, failure, and byte counters
//! - **Concurrent Results**: Lock-free counters and snapshot-safe error
//!   lists that merge across parallel extraction runs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use siphon::prelude::*;
//!
//! let registry = Arc::new(
//!     PoolRegistry::builder(Arc::new(PlaintextCredentials))
//!         .with_factory(Arc::new(PgConnectionFactory))
//!         .build(),
//! );
//!
//! let source = DataSourceDescriptor::new(7, "orders", SourceKind::PostgreSql,
//!     "postgres://db.internal:5432/orders");
//!
//! let extractor = PooledExtractor::new(registry);
//! let result = extractor
//!     .extract(&source, &ExtractionParameters::new(
//!         "SELECT id, total FROM orders WHERE created_at > $1",
//!         "orders-2024.jsonl",
//!     ))
//!     .await?;
//!
//! println!("{}", result.summary());
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL support via tokio-postgres
//! - `mysql` - MySQL/MariaDB support via mysql_async
//! - `full` - All features enabled

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod descriptor;
pub mod error;
pub mod extract;
pub mod pool;
pub mod registry;
pub mod result;
pub mod security;
pub mod types;

// Backend implementations (conditionally compiled)
#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{Row, Value};

    // Data source descriptors and credentials
    pub use crate::descriptor::{
        ConnectionStatus, CredentialDecryptor, DataSourceDescriptor, PlaintextCredentials,
        SourceKind,
    };

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, RowStream, VecRowStream,
    };

    // Pool types
    pub use crate::pool::{PoolConfig, PoolStats, PooledConnection, SourcePool};

    // Registry types
    pub use crate::registry::{PoolDefaults, PoolKey, PoolRegistry, PoolRegistryBuilder};

    // Security gates
    pub use crate::security::{
        is_query_safe, validate_output_path, validate_query, AllowedRoots,
    };

    // Extraction
    pub use crate::extract::{
        ExtractionParameters, ExtractorConfig, PooledExtractor, DEFAULT_BATCH_SIZE,
    };
    pub use crate::result::ExtractionResult;

    #[cfg(feature = "postgres")]
    pub use crate::postgres::PgConnectionFactory;

    #[cfg(feature = "mysql")]
    pub use crate::mysql::MySqlConnectionFactory;
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use result::ExtractionResult;
pub use types::Value;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::Int32(42);
        let _config = ConnectionConfig::new("postgres://localhost/test");
        let _roots = AllowedRoots::default();
        let _result = ExtractionResult::new();
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert!(!err.is_security());
    }

    #[test]
    fn test_value_types() {
        let v = Value::from(42_i32);
        assert!(!v.is_null());
        assert_eq!(v.as_i64(), Some(42));

        let v = Value::from("hello");
        assert_eq!(v.as_str(), Some("hello"));
    }

    #[test]
    fn test_source_kinds() {
        assert_eq!(SourceKind::PostgreSql.as_str(), "postgresql");
        assert_eq!(SourceKind::MySql.as_str(), "mysql");
    }

    #[test]
    fn test_query_gate_from_prelude() {
        assert!(is_query_safe("SELECT 1"));
        assert!(!is_query_safe("DROP TABLE users"));
    }
}

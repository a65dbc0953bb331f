//! Error types for siphon
//!
//! Provides granular error classification so callers can separate the two
//! failure surfaces of an extraction:
//! - Security violations (rejected query, rejected path) — raised before any
//!   resource is touched, always fatal to the request
//! - Execution failures (pool creation, connection, query, timeout) —
//!   captured into the extraction result as data

use std::fmt;
use thiserror::Error;

/// Result type for siphon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Security validation failure (rejected before any I/O)
    Security,
    /// Connection pool could not be created
    PoolCreation,
    /// Credential decryption failure
    Decryption,
    /// Connection-related errors
    Connection,
    /// Query execution errors
    Query,
    /// Timeout errors
    Timeout,
    /// Pool exhausted waiting for a connection
    PoolExhausted,
    /// Configuration error
    Configuration,
}

impl ErrorCategory {
    /// Whether errors in this category are security rejections that should
    /// surface to callers as invalid-input failures rather than run failures
    #[inline]
    pub const fn is_security(self) -> bool {
        matches!(self, Self::Security)
    }
}

/// Main error type for siphon
#[derive(Error, Debug)]
pub enum Error {
    /// Query failed SQL injection validation
    #[error("SQL injection validation failed: {message}")]
    QueryRejected {
        /// Reason the query was rejected
        message: String,
    },

    /// Output path contains a parent-directory traversal
    #[error("Path traversal detected in output path: {path}")]
    PathTraversal {
        /// The offending path
        path: String,
    },

    /// Output path falls outside every allowed root
    #[error("output path must be within allowed directories: {path}")]
    PathOutsideRoots {
        /// The offending path
        path: String,
    },

    /// Connection pool could not be created
    #[error("Failed to create connection pool: {message}")]
    PoolCreation {
        /// What went wrong during pool construction
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Credential decryption failed
    #[error("credential decryption failed: {message}")]
    Decryption {
        /// Decryption failure detail
        message: String,
    },

    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        /// Connection failure detail
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        /// Execution failure detail
        message: String,
        /// The SQL text, when available
        sql: Option<String>,
        /// Underlying cause, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout {
        /// What timed out
        message: String,
    },

    /// Connection pool exhausted
    #[error("pool exhausted: {message}")]
    PoolExhausted {
        /// Exhaustion detail
        message: String,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration {
        /// Configuration failure detail
        message: String,
    },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::QueryRejected { .. }
            | Self::PathTraversal { .. }
            | Self::PathOutsideRoots { .. } => ErrorCategory::Security,
            Self::PoolCreation { .. } => ErrorCategory::PoolCreation,
            Self::Decryption { .. } => ErrorCategory::Decryption,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::PoolExhausted { .. } => ErrorCategory::PoolExhausted,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Whether this is a security rejection (as opposed to a run failure)
    #[inline]
    pub fn is_security(&self) -> bool {
        self.category().is_security()
    }

    /// Create a query-rejected security error
    pub fn query_rejected(message: impl Into<String>) -> Self {
        Self::QueryRejected {
            message: message.into(),
        }
    }

    /// Create a path traversal security error
    pub fn path_traversal(path: impl Into<String>) -> Self {
        Self::PathTraversal { path: path.into() }
    }

    /// Create a path-outside-roots security error
    pub fn path_outside_roots(path: impl Into<String>) -> Self {
        Self::PathOutsideRoots { path: path.into() }
    }

    /// Create a pool creation error
    pub fn pool_creation(message: impl Into<String>) -> Self {
        Self::PoolCreation {
            message: message.into(),
            source: None,
        }
    }

    /// Create a pool creation error with source
    pub fn pool_creation_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::PoolCreation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a decryption error
    pub fn decryption(message: impl Into<String>) -> Self {
        Self::Decryption {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Security => write!(f, "security"),
            Self::PoolCreation => write!(f, "pool_creation"),
            Self::Decryption => write!(f, "decryption"),
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Timeout => write!(f, "timeout"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

//! Data source descriptors and the credential decryption seam.
//!
//! A [`DataSourceDescriptor`] identifies one external database and is
//! read-only after construction, so it can be shared across extraction
//! workers without synchronization. The stored password stays encrypted;
//! decryption happens exactly once per pool creation through the injected
//! [`CredentialDecryptor`] capability.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Kind of external data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// PostgreSQL
    PostgreSql,
    /// MySQL/MariaDB
    MySql,
    /// Oracle
    Oracle,
    /// SQL Server
    SqlServer,
    /// SQLite
    Sqlite,
}

impl SourceKind {
    /// Lower-case identifier, used in pool names and URL schemes
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostgreSql => "postgresql",
            Self::MySql => "mysql",
            Self::Oracle => "oracle",
            Self::SqlServer => "sqlserver",
            Self::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Last-known connection status of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Never probed
    #[default]
    Unknown,
    /// Last probe succeeded
    Connected,
    /// Last probe failed
    Failed,
}

/// Descriptor for one external data source.
///
/// Owned by the surrounding configuration store; the pool registry only
/// borrows it. Immutable for the life of its pool.
#[derive(Clone, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    /// Numeric identity
    pub id: u64,
    /// Display name
    pub name: String,
    /// Source kind
    pub kind: SourceKind,
    /// Connection URL (e.g. postgres://host:5432/db)
    pub url: String,
    /// Username for authentication
    pub username: String,
    /// Encrypted password, decrypted only at pool creation
    pub encrypted_password: String,
    /// Whether this source may be extracted from
    pub active: bool,
    /// Last-known connection status
    pub status: ConnectionStatus,
}

impl DataSourceDescriptor {
    /// Create an active descriptor with unknown status
    pub fn new(
        id: u64,
        name: impl Into<String>,
        kind: SourceKind,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            url: url.into(),
            username: String::new(),
            encrypted_password: String::new(),
            active: true,
            status: ConnectionStatus::Unknown,
        }
    }

    /// Set credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        encrypted_password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.encrypted_password = encrypted_password.into();
        self
    }

    /// Mark the descriptor inactive
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

impl std::fmt::Debug for DataSourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never let the ciphertext (or a mis-stored cleartext) reach logs.
        f.debug_struct("DataSourceDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("encrypted_password", &"***")
            .field("active", &self.active)
            .field("status", &self.status)
            .finish()
    }
}

/// Credential decryption capability, injected into the pool registry.
///
/// Called exactly once per pool creation; implementations must not cache the
/// decrypted form.
pub trait CredentialDecryptor: Send + Sync {
    /// Decrypt a stored ciphertext into the cleartext password
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Passthrough decryptor for configuration stores that hold cleartext
/// passwords (and for tests, which need no real cryptography).
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCredentials;

impl CredentialDecryptor for PlaintextCredentials {
    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        Ok(ciphertext.to_string())
    }
}

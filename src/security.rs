//! Security gates for the extraction engine.
//!
//! Two independent, stateless validators run before any pool or filesystem
//! interaction:
//! - Query gate: rejects anything that is not unambiguously a single
//!   read-only `SELECT` (allow-list-biased denylist)
//! - Path gate: rejects traversal segments and paths outside the configured
//!   allow-listed root directories
//!
//! Both are pure string/path checks with no I/O, so invalid requests fail
//! before a connection is ever borrowed from a pool.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Mutating or time-based keywords that must never follow a statement
/// separator in an extraction query.
const STACKED_KEYWORDS: &[&str] = &[
    "DROP", "INSERT", "UPDATE", "DELETE", "ALTER", "TRUNCATE", "EXEC", "WAITFOR",
];

/// Check whether a query passes the SQL injection gate.
///
/// # Examples
///
/// ```
/// use siphon::security::is_query_safe;
///
/// assert!(is_query_safe("SELECT id, name FROM users WHERE active = true"));
/// assert!(!is_query_safe("SELECT * FROM users; DROP TABLE users"));
/// assert!(!is_query_safe("SELECT * FROM users WHERE '1'='1'"));
/// ```
pub fn is_query_safe(query: &str) -> bool {
    validate_query(query).is_ok()
}

/// Validate a query against the SQL injection gate, with the rejection
/// reason on failure.
///
/// The matching is case-insensitive throughout. Rejected patterns:
/// - blank input, or anything not starting with `SELECT`
/// - stacked statements (`; DROP ...`, `; WAITFOR ...`, any second statement)
/// - `UNION`-based injection
/// - classic tautologies (`'1'='1'`, `OR 1=1`)
/// - `--` line comments and `/* */` block comments used to truncate a query
/// - `0x` hexadecimal literals used to smuggle identifiers
pub fn validate_query(query: &str) -> Result<()> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(Error::query_rejected("query is blank"));
    }

    let upper = trimmed.to_uppercase();

    if !upper.starts_with("SELECT") {
        return Err(Error::query_rejected(
            "only SELECT statements are allowed",
        ));
    }

    if upper.contains("--") {
        return Err(Error::query_rejected(
            "inline comment marker '--' is not allowed",
        ));
    }

    if upper.contains("/*") || upper.contains("*/") {
        return Err(Error::query_rejected(
            "block comment markers are not allowed",
        ));
    }

    // A single read-only statement may carry at most one trailing ';'.
    if let Some((_, rest)) = upper.split_once(';') {
        let rest = rest.trim();
        if !rest.is_empty() {
            let keyword = rest
                .split(|c: char| !c.is_ascii_alphabetic())
                .next()
                .unwrap_or_default();
            if STACKED_KEYWORDS.contains(&keyword) {
                return Err(Error::query_rejected(format!(
                    "stacked statement with mutating keyword '{keyword}'"
                )));
            }
            return Err(Error::query_rejected("multiple statements are not allowed"));
        }
    }

    if upper.contains("UNION") {
        return Err(Error::query_rejected("UNION-based pattern detected"));
    }

    if upper.contains("WAITFOR") {
        return Err(Error::query_rejected("WAITFOR is not allowed"));
    }

    let condensed: String = upper.split_whitespace().collect();
    if condensed.contains("'1'='1'") || condensed.contains("OR1=1") {
        return Err(Error::query_rejected("tautology pattern detected"));
    }

    if contains_hex_literal(&upper) {
        return Err(Error::query_rejected(
            "hexadecimal literal pattern detected",
        ));
    }

    Ok(())
}

/// Detect `0x`-prefixed hexadecimal literals (classic id smuggling).
fn contains_hex_literal(upper: &str) -> bool {
    upper
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|tok| {
            tok.len() > 2 && tok.starts_with("0X") && tok[2..].chars().all(|c| c.is_ascii_hexdigit())
        })
}

/// Allow-list of root directories extraction output may be written under.
#[derive(Debug, Clone)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl Default for AllowedRoots {
    fn default() -> Self {
        Self::new(vec![
            std::env::temp_dir().join("extractions"),
            PathBuf::from("/data/extractions"),
            PathBuf::from("/var/lib/siphon"),
        ])
    }
}

impl AllowedRoots {
    /// Create an allow-list from explicit roots. Roots are normalized
    /// lexically; the first root doubles as the default output directory.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: roots.iter().map(|r| normalize(r)).collect(),
        }
    }

    /// Add another allowed root
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(normalize(&root.into()));
        self
    }

    /// The configured roots
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Default output directory (the first allowed root)
    pub fn default_output_dir(&self) -> &Path {
        &self.roots[0]
    }
}

/// Validate an output path against the allow-listed roots.
///
/// Returns the normalized path on success. Relative paths are resolved under
/// the default output directory. The check is lexical (no filesystem I/O):
/// `..` components are rejected outright, then the normalized path must sit
/// under one of the allowed roots.
pub fn validate_output_path(path: &str, roots: &AllowedRoots) -> Result<PathBuf> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(Error::config("output path is blank"));
    }

    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::path_traversal(trimmed));
    }

    let resolved = if candidate.is_absolute() {
        normalize(candidate)
    } else {
        normalize(&roots.default_output_dir().join(candidate))
    };

    if roots.roots().iter().any(|r| resolved.starts_with(r)) {
        Ok(resolved)
    } else {
        Err(Error::path_outside_roots(trimmed))
    }
}

/// Lexical normalization: drop `.` components, keep everything else.
/// `..` components never reach this point; the caller rejects them first.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
